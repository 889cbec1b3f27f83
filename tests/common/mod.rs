#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use thermo_station::model::{Justify, RasterImage, Symbology, TextSize};
use thermo_station::printer::{PrinterDevice, PrinterError};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Probe,
    Text(String),
    Line(String),
    Bold(bool),
    Underline(bool),
    Justify(Justify),
    Size(TextSize),
    Feed(u8),
    Image { width: u32, height: u32 },
    Barcode(String, Symbology),
    Sleep,
    Wake,
    Reset,
}

/// Printer fake that records every device call.
#[derive(Clone, Default)]
pub struct RecordingPrinter {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_probe: bool,
    /// Lines equal to this fail with an I/O error.
    fail_on: Option<String>,
}

impl RecordingPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_probe() -> Self {
        Self {
            fail_probe: true,
            ..Default::default()
        }
    }

    pub fn failing_on(line: &str) -> Self {
        Self {
            fail_on: Some(line.to_string()),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn lines(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                Call::Line(s) | Call::Text(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, call: Call) -> Result<(), PrinterError> {
        self.calls.lock().await.push(call);
        // give other tasks a chance to run between device calls
        tokio::task::yield_now().await;
        Ok(())
    }
}

#[async_trait]
impl PrinterDevice for RecordingPrinter {
    async fn probe(&mut self) -> Result<(), PrinterError> {
        if self.fail_probe {
            return Err(PrinterError::Unavailable);
        }
        self.record(Call::Probe).await
    }

    async fn print_text(&mut self, s: &str) -> Result<(), PrinterError> {
        self.record(Call::Text(s.to_string())).await
    }

    async fn print_line(&mut self, s: &str) -> Result<(), PrinterError> {
        if self.fail_on.as_deref() == Some(s) {
            return Err(PrinterError::Io(std::io::Error::other("paper jam")));
        }
        self.record(Call::Line(s.to_string())).await
    }

    async fn set_bold(&mut self, on: bool) -> Result<(), PrinterError> {
        self.record(Call::Bold(on)).await
    }

    async fn set_underline(&mut self, on: bool) -> Result<(), PrinterError> {
        self.record(Call::Underline(on)).await
    }

    async fn set_justify(&mut self, justify: Justify) -> Result<(), PrinterError> {
        self.record(Call::Justify(justify)).await
    }

    async fn set_size(&mut self, size: TextSize) -> Result<(), PrinterError> {
        self.record(Call::Size(size)).await
    }

    async fn feed(&mut self, lines: u8) -> Result<(), PrinterError> {
        self.record(Call::Feed(lines)).await
    }

    async fn print_image(&mut self, image: &RasterImage) -> Result<(), PrinterError> {
        self.record(Call::Image {
            width: image.width_px,
            height: image.height_px,
        })
        .await
    }

    async fn print_barcode(&mut self, data: &str, symbology: Symbology) -> Result<(), PrinterError> {
        self.record(Call::Barcode(data.to_string(), symbology)).await
    }

    async fn sleep(&mut self) -> Result<(), PrinterError> {
        self.record(Call::Sleep).await
    }

    async fn wake(&mut self) -> Result<(), PrinterError> {
        self.record(Call::Wake).await
    }

    async fn reset(&mut self) -> Result<(), PrinterError> {
        self.record(Call::Reset).await
    }
}

/// Small PNG: left half black, right half white.
pub fn half_black_png(width: u32, height: u32) -> Vec<u8> {
    use image::{DynamicImage, ImageFormat, Luma, GrayImage};
    let img = GrayImage::from_fn(width, height, |x, _| if x < width / 2 { Luma([0]) } else { Luma([255]) });
    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn mail_with_png(from: &str, to: &str, subject: &str, body: &str, png: &[u8]) -> String {
    format!(
        "From: {from}\r\n\
To: {to}\r\n\
Subject: {subject}\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"BOUNDARY\"\r\n\
\r\n\
--BOUNDARY\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
{body}\r\n\
--BOUNDARY\r\n\
Content-Type: image/png\r\n\
Content-Disposition: attachment; filename=\"photo.png\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
{}\r\n\
--BOUNDARY--\r\n",
        STANDARD.encode(png)
    )
}
