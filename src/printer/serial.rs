use super::escpos::{self, EscPos};
use super::{PrinterDevice, PrinterError};
use crate::model::{Justify, PrintOp, RasterImage, Symbology, TextSize};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Bits on the wire per byte (start + 8 data + stop, plus one bit of slack).
const BITS_PER_BYTE: f64 = 11.0;

/// Thermal printer attached to a serial character device (e.g. `/dev/serial0`).
///
/// Writes are paced to the baud rate; the printer has no flow control and
/// drops bytes once its buffer overruns.
pub struct SerialPrinter {
    path: PathBuf,
    baud: u32,
    port: File,
}

impl fmt::Debug for SerialPrinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialPrinter")
            .field("path", &self.path)
            .field("baud", &self.baud)
            .finish_non_exhaustive()
    }
}

impl SerialPrinter {
    /// Configure the line with `stty` and open the device for writing.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), baud = baud))]
    pub async fn open(path: impl AsRef<Path>, baud: u32) -> Result<Self, PrinterError> {
        let path = path.as_ref().to_path_buf();
        match Command::new("stty")
            .arg("-F")
            .arg(path.as_os_str())
            .arg(baud.to_string())
            .arg("raw")
            .arg("-echo")
            .kill_on_drop(true)
            .status()
            .await
        {
            Ok(s) if s.success() => debug!("serial line configured"),
            Ok(s) => warn!(status = %s, "stty failed; using current line settings"),
            Err(err) => warn!(?err, "stty not available; using current line settings"),
        }

        let port = OpenOptions::new().write(true).open(&path).await?;
        info!("serial printer opened");
        Ok(Self { path, baud, port })
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), PrinterError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.port.write_all(bytes).await?;
        self.port.flush().await?;
        let secs = bytes.len() as f64 * BITS_PER_BYTE / f64::from(self.baud.max(1));
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        Ok(())
    }

    async fn send_op(&mut self, op: &PrintOp) -> Result<(), PrinterError> {
        let bytes = escpos::encode(op);
        self.send(&bytes).await
    }
}

#[async_trait]
impl PrinterDevice for SerialPrinter {
    async fn probe(&mut self) -> Result<(), PrinterError> {
        let mut b = EscPos::new();
        b.wake().reset();
        self.send(&b.build()).await.map_err(|err| {
            warn!(?err, path = %self.path.display(), "printer probe failed");
            PrinterError::Unavailable
        })
    }

    async fn print_text(&mut self, s: &str) -> Result<(), PrinterError> {
        self.send_op(&PrintOp::Text(s.to_string())).await
    }

    async fn print_line(&mut self, s: &str) -> Result<(), PrinterError> {
        self.send_op(&PrintOp::Line(s.to_string())).await
    }

    async fn set_bold(&mut self, on: bool) -> Result<(), PrinterError> {
        self.send_op(&PrintOp::Bold(on)).await
    }

    async fn set_underline(&mut self, on: bool) -> Result<(), PrinterError> {
        self.send_op(&PrintOp::Underline(on)).await
    }

    async fn set_justify(&mut self, justify: Justify) -> Result<(), PrinterError> {
        self.send_op(&PrintOp::Justify(justify)).await
    }

    async fn set_size(&mut self, size: TextSize) -> Result<(), PrinterError> {
        self.send_op(&PrintOp::Size(size)).await
    }

    async fn feed(&mut self, lines: u8) -> Result<(), PrinterError> {
        self.send_op(&PrintOp::Feed(lines)).await
    }

    async fn print_image(&mut self, image: &RasterImage) -> Result<(), PrinterError> {
        let mut b = EscPos::new();
        b.image(image);
        self.send(&b.build()).await
    }

    async fn print_barcode(&mut self, data: &str, symbology: Symbology) -> Result<(), PrinterError> {
        let mut b = EscPos::new();
        b.barcode(data, symbology);
        self.send(&b.build()).await
    }

    async fn sleep(&mut self) -> Result<(), PrinterError> {
        self.send_op(&PrintOp::Sleep).await
    }

    async fn wake(&mut self) -> Result<(), PrinterError> {
        self.send_op(&PrintOp::Wake).await?;
        // the printer needs a moment after waking before it accepts data
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), PrinterError> {
        self.send_op(&PrintOp::Reset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_encoded_ops_to_device_file() {
        let td = tempdir().unwrap();
        let path = td.path().join("ttyFAKE");
        std::fs::write(&path, b"").unwrap();

        let mut printer = SerialPrinter::open(&path, 1_000_000).await.unwrap();
        printer.set_bold(true).await.unwrap();
        printer.print_line("Hello").await.unwrap();
        drop(printer);

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, b"\x1bE\x01Hello\n".to_vec());
    }

    #[tokio::test]
    async fn open_fails_for_missing_device() {
        let td = tempdir().unwrap();
        let err = SerialPrinter::open(td.path().join("missing"), 19200)
            .await
            .unwrap_err();
        assert!(matches!(err, PrinterError::Io(_)));
    }
}
