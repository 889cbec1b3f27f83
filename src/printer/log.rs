use super::{PrinterDevice, PrinterError};
use crate::model::{Justify, RasterImage, Symbology, TextSize};
use async_trait::async_trait;
use tracing::info;

/// Device used when printing is switched off: every operation is logged.
#[derive(Debug, Default)]
pub struct LogPrinter {
    pending: String,
}

impl LogPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush_line(&mut self) {
        if !self.pending.is_empty() {
            info!(target: "printer", text = %self.pending, "print");
            self.pending.clear();
        }
    }
}

#[async_trait]
impl PrinterDevice for LogPrinter {
    async fn probe(&mut self) -> Result<(), PrinterError> {
        Ok(())
    }

    async fn print_text(&mut self, s: &str) -> Result<(), PrinterError> {
        for part in s.split_inclusive('\n') {
            match part.strip_suffix('\n') {
                Some(line) => {
                    self.pending.push_str(line);
                    self.flush_line();
                }
                None => self.pending.push_str(part),
            }
        }
        Ok(())
    }

    async fn print_line(&mut self, s: &str) -> Result<(), PrinterError> {
        self.pending.push_str(s);
        self.flush_line();
        Ok(())
    }

    async fn set_bold(&mut self, _on: bool) -> Result<(), PrinterError> {
        Ok(())
    }

    async fn set_underline(&mut self, _on: bool) -> Result<(), PrinterError> {
        Ok(())
    }

    async fn set_justify(&mut self, _justify: Justify) -> Result<(), PrinterError> {
        Ok(())
    }

    async fn set_size(&mut self, _size: TextSize) -> Result<(), PrinterError> {
        Ok(())
    }

    async fn feed(&mut self, _lines: u8) -> Result<(), PrinterError> {
        self.flush_line();
        Ok(())
    }

    async fn print_image(&mut self, image: &RasterImage) -> Result<(), PrinterError> {
        self.flush_line();
        info!(target: "printer", width = image.width_px, height = image.height_px, "print image");
        Ok(())
    }

    async fn print_barcode(&mut self, data: &str, symbology: Symbology) -> Result<(), PrinterError> {
        self.flush_line();
        info!(target: "printer", data, ?symbology, "print barcode");
        Ok(())
    }

    async fn sleep(&mut self) -> Result<(), PrinterError> {
        self.flush_line();
        Ok(())
    }

    async fn wake(&mut self) -> Result<(), PrinterError> {
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), PrinterError> {
        self.flush_line();
        Ok(())
    }
}
