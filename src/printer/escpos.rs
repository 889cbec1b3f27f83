//! ESC/POS command encoding for small serial thermal printers.
//!
//! Each [`PrintOp`] maps to a short byte sequence. The serial device encodes
//! one op at a time and writes it straight through.

use crate::model::{Justify, PrintOp, RasterImage, Symbology, TextSize};

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;

/// Rows sent per `GS v 0` block; keeps each block inside the printer's buffer.
const RASTER_CHUNK_ROWS: u32 = 255;

/// Fluent ESC/POS byte builder.
#[derive(Debug, Default)]
pub struct EscPos {
    buf: Vec<u8>,
}

impl EscPos {
    pub fn new() -> Self {
        Self::default()
    }

    /// Printer text is 7-bit; anything else prints as `?`.
    pub fn text(&mut self, s: &str) -> &mut Self {
        self.buf
            .extend(s.chars().map(|c| if c.is_ascii() { c as u8 } else { b'?' }));
        self
    }

    pub fn line(&mut self, s: &str) -> &mut Self {
        self.text(s);
        self.buf.push(b'\n');
        self
    }

    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'E', on as u8]);
        self
    }

    pub fn underline(&mut self, on: bool) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'-', on as u8]);
        self
    }

    pub fn justify(&mut self, justify: Justify) -> &mut Self {
        let n = match justify {
            Justify::Left => 0,
            Justify::Center => 1,
            Justify::Right => 2,
        };
        self.buf.extend_from_slice(&[ESC, b'a', n]);
        self
    }

    pub fn size(&mut self, size: TextSize) -> &mut Self {
        let n = match size {
            TextSize::Small => 0x00,
            TextSize::Medium => 0x01,
            TextSize::Large => 0x11,
        };
        self.buf.extend_from_slice(&[GS, b'!', n]);
        self
    }

    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'd', lines]);
        self
    }

    /// Raster bit image (`GS v 0`), split into blocks of at most 255 rows.
    pub fn image(&mut self, image: &RasterImage) -> &mut Self {
        let x_bytes = image.row_bytes() as u16;
        let mut y = 0;
        while y < image.height_px {
            let rows = (image.height_px - y).min(RASTER_CHUNK_ROWS);
            self.buf.extend_from_slice(&[GS, b'v', b'0', 0]);
            self.buf.extend_from_slice(&x_bytes.to_le_bytes());
            self.buf.extend_from_slice(&(rows as u16).to_le_bytes());
            for row in y..y + rows {
                self.buf.extend_from_slice(image.row(row));
            }
            y += rows;
        }
        self
    }

    /// `GS k m n d1..dn` (function B, length-prefixed).
    pub fn barcode(&mut self, data: &str, symbology: Symbology) -> &mut Self {
        let m = match symbology {
            Symbology::UpcA => 65,
            Symbology::UpcE => 66,
            Symbology::Ean13 => 67,
            Symbology::Ean8 => 68,
            Symbology::Code39 => 69,
            Symbology::Itf => 70,
            Symbology::Codabar => 71,
            Symbology::Code93 => 72,
            Symbology::Code128 => 73,
        };
        let bytes: Vec<u8> = data.bytes().filter(u8::is_ascii).take(255).collect();
        self.buf.extend_from_slice(&[GS, b'k', m, bytes.len() as u8]);
        self.buf.extend_from_slice(&bytes);
        self
    }

    pub fn sleep(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'8', 1, 0]);
        self
    }

    /// Wake byte followed by cancelling the sleep timer.
    pub fn wake(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[0xFF, ESC, b'8', 0, 0]);
        self
    }

    pub fn reset(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'@']);
        self
    }

    pub fn op(&mut self, op: &PrintOp) -> &mut Self {
        match op {
            PrintOp::Text(s) => self.text(s),
            PrintOp::Line(s) => self.line(s),
            PrintOp::Bold(on) => self.bold(*on),
            PrintOp::Underline(on) => self.underline(*on),
            PrintOp::Justify(j) => self.justify(*j),
            PrintOp::Size(size) => self.size(*size),
            PrintOp::Feed(lines) => self.feed(*lines),
            PrintOp::Image(img) => self.image(img),
            PrintOp::Barcode { data, symbology } => self.barcode(data, *symbology),
            PrintOp::Sleep => self.sleep(),
            PrintOp::Wake => self.wake(),
            PrintOp::Reset => self.reset(),
        }
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// Encode a single op.
pub fn encode(op: &PrintOp) -> Vec<u8> {
    let mut b = EscPos::new();
    b.op(op);
    b.build()
}
