//! Printer device capability.
//!
//! The print serializer is the only caller of these operations; everything else
//! builds [`PrintJob`](crate::model::PrintJob)s.

use crate::model::{Justify, PrintOp, RasterImage, Symbology, TextSize};
use async_trait::async_trait;
use thiserror::Error;

pub mod escpos;
mod log;
mod serial;

pub use log::LogPrinter;
pub use serial::SerialPrinter;

#[derive(Debug, Error)]
pub enum PrinterError {
    /// Device absent or never initialized.
    #[error("printer unavailable")]
    Unavailable,
    #[error("printer I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The serializer worker has stopped.
    #[error("print queue closed")]
    Closed,
}

#[async_trait]
pub trait PrinterDevice: Send {
    /// Check the device is present and accepting data.
    async fn probe(&mut self) -> Result<(), PrinterError>;

    async fn print_text(&mut self, s: &str) -> Result<(), PrinterError>;
    async fn print_line(&mut self, s: &str) -> Result<(), PrinterError>;
    async fn set_bold(&mut self, on: bool) -> Result<(), PrinterError>;
    async fn set_underline(&mut self, on: bool) -> Result<(), PrinterError>;
    async fn set_justify(&mut self, justify: Justify) -> Result<(), PrinterError>;
    async fn set_size(&mut self, size: TextSize) -> Result<(), PrinterError>;
    async fn feed(&mut self, lines: u8) -> Result<(), PrinterError>;
    async fn print_image(&mut self, image: &RasterImage) -> Result<(), PrinterError>;
    async fn print_barcode(&mut self, data: &str, symbology: Symbology) -> Result<(), PrinterError>;
    async fn sleep(&mut self) -> Result<(), PrinterError>;
    async fn wake(&mut self) -> Result<(), PrinterError>;
    async fn reset(&mut self) -> Result<(), PrinterError>;
}

/// Dispatch one [`PrintOp`] to the matching device operation.
pub async fn apply(device: &mut dyn PrinterDevice, op: &PrintOp) -> Result<(), PrinterError> {
    match op {
        PrintOp::Text(s) => device.print_text(s).await,
        PrintOp::Line(s) => device.print_line(s).await,
        PrintOp::Bold(on) => device.set_bold(*on).await,
        PrintOp::Underline(on) => device.set_underline(*on).await,
        PrintOp::Justify(j) => device.set_justify(*j).await,
        PrintOp::Size(size) => device.set_size(*size).await,
        PrintOp::Feed(lines) => device.feed(*lines).await,
        PrintOp::Image(img) => device.print_image(img).await,
        PrintOp::Barcode { data, symbology } => device.print_barcode(data, *symbology).await,
        PrintOp::Sleep => device.sleep().await,
        PrintOp::Wake => device.wake().await,
        PrintOp::Reset => device.reset().await,
    }
}
