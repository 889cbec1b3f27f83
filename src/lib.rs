pub mod actions;
pub mod button;
pub mod config;
pub mod gpio;
pub mod http;
pub mod mail;
pub mod model;
pub mod printer;
pub mod raster;
pub mod scheduler;
pub mod serializer;
pub mod startup;
