use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Paper width of the thermal printer in dots.
pub const PRINT_WIDTH_PX: u32 = 384;

/// Characters per line at the small (default) font size.
pub const LINE_CHARS: usize = 32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Justify {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TextSize {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Symbology {
    UpcA,
    UpcE,
    Ean13,
    Ean8,
    Code39,
    Itf,
    Codabar,
    Code93,
    Code128,
}

/// One-bit-per-pixel bitmap, rows packed MSB first, `1` = black.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width_px: u32,
    pub height_px: u32,
    pub bits: Vec<u8>,
}

impl RasterImage {
    /// Blank (all white) image.
    pub fn blank(width_px: u32, height_px: u32) -> Self {
        let bytes = Self::row_bytes_for(width_px) * height_px as usize;
        Self {
            width_px,
            height_px,
            bits: vec![0; bytes],
        }
    }

    fn row_bytes_for(width_px: u32) -> usize {
        width_px.div_ceil(8) as usize
    }

    pub fn row_bytes(&self) -> usize {
        Self::row_bytes_for(self.width_px)
    }

    pub fn set_black(&mut self, x: u32, y: u32) {
        let idx = y as usize * self.row_bytes() + (x / 8) as usize;
        self.bits[idx] |= 0x80 >> (x % 8);
    }

    pub fn is_black(&self, x: u32, y: u32) -> bool {
        let idx = y as usize * self.row_bytes() + (x / 8) as usize;
        self.bits[idx] & (0x80 >> (x % 8)) != 0
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.row_bytes();
        &self.bits[start..start + self.row_bytes()]
    }
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterImage")
            .field("width_px", &self.width_px)
            .field("height_px", &self.height_px)
            .finish_non_exhaustive()
    }
}

/// A single printer device operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintOp {
    Text(String),
    Line(String),
    Bold(bool),
    Underline(bool),
    Justify(Justify),
    Size(TextSize),
    Feed(u8),
    Image(RasterImage),
    Barcode { data: String, symbology: Symbology },
    Sleep,
    Wake,
    Reset,
}

impl PrintOp {
    fn is_style(&self) -> bool {
        matches!(
            self,
            PrintOp::Bold(_) | PrintOp::Underline(_) | PrintOp::Justify(_) | PrintOp::Size(_)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobKind {
    Text,
    StyledText,
    Image,
    Barcode,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Text => "text",
            JobKind::StyledText => "styled_text",
            JobKind::Image => "image",
            JobKind::Barcode => "barcode",
        }
    }
}

/// Which producer asked for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    Button,
    Scheduler(String),
    Mail(String),
    Http,
    Startup,
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSource::Button => f.write_str("button"),
            JobSource::Scheduler(name) => write!(f, "scheduler:{name}"),
            JobSource::Mail(id) => write!(f, "mail:{id}"),
            JobSource::Http => f.write_str("http"),
            JobSource::Startup => f.write_str("startup"),
        }
    }
}

/// Immutable unit of printer output. Built with [`PrintJobBuilder`].
#[derive(Debug, Clone)]
pub struct PrintJob {
    id: Uuid,
    kind: JobKind,
    ops: Vec<PrintOp>,
    requested_by: JobSource,
}

impl PrintJob {
    pub fn builder(requested_by: JobSource) -> PrintJobBuilder {
        PrintJobBuilder {
            ops: Vec::new(),
            requested_by,
        }
    }

    /// Plain text followed by a short feed.
    pub fn text(requested_by: JobSource, text: &str) -> Self {
        let mut b = Self::builder(requested_by);
        b.text(text);
        if !text.ends_with('\n') {
            b.text("\n");
        }
        b.feed(3);
        b.build()
    }

    /// A single image followed by a short feed.
    pub fn image(requested_by: JobSource, image: RasterImage) -> Self {
        let mut b = Self::builder(requested_by);
        b.image(image).feed(3);
        b.build()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn ops(&self) -> &[PrintOp] {
        &self.ops
    }

    pub fn requested_by(&self) -> &JobSource {
        &self.requested_by
    }

    /// Text rendition of the job, used when printing is degraded to logging.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for op in &self.ops {
            match op {
                PrintOp::Text(s) => out.push_str(s),
                PrintOp::Line(s) => {
                    out.push_str(s);
                    out.push('\n');
                }
                PrintOp::Image(img) => {
                    out.push_str(&format!("[image {}x{}]\n", img.width_px, img.height_px));
                }
                PrintOp::Barcode { data, symbology } => {
                    out.push_str(&format!("[barcode {symbology:?} {data}]\n"));
                }
                _ => {}
            }
        }
        out
    }
}

pub struct PrintJobBuilder {
    ops: Vec<PrintOp>,
    requested_by: JobSource,
}

impl PrintJobBuilder {
    pub fn op(&mut self, op: PrintOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn text(&mut self, s: &str) -> &mut Self {
        self.op(PrintOp::Text(s.to_string()))
    }

    pub fn line(&mut self, s: &str) -> &mut Self {
        self.op(PrintOp::Line(s.to_string()))
    }

    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.op(PrintOp::Bold(on))
    }

    pub fn underline(&mut self, on: bool) -> &mut Self {
        self.op(PrintOp::Underline(on))
    }

    pub fn justify(&mut self, j: Justify) -> &mut Self {
        self.op(PrintOp::Justify(j))
    }

    pub fn size(&mut self, size: TextSize) -> &mut Self {
        self.op(PrintOp::Size(size))
    }

    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.op(PrintOp::Feed(lines))
    }

    pub fn image(&mut self, image: RasterImage) -> &mut Self {
        self.op(PrintOp::Image(image))
    }

    pub fn barcode(&mut self, data: &str, symbology: Symbology) -> &mut Self {
        self.op(PrintOp::Barcode {
            data: data.to_string(),
            symbology,
        })
    }

    /// Full-width line of dashes, centered.
    pub fn divider(&mut self) -> &mut Self {
        self.justify(Justify::Center)
            .line(&"-".repeat(LINE_CHARS))
            .justify(Justify::Left)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn build(&mut self) -> PrintJob {
        let ops = std::mem::take(&mut self.ops);
        let kind = if ops.iter().any(|op| matches!(op, PrintOp::Image(_))) {
            JobKind::Image
        } else if ops.iter().any(|op| matches!(op, PrintOp::Barcode { .. })) {
            JobKind::Barcode
        } else if ops.iter().any(PrintOp::is_style) {
            JobKind::StyledText
        } else {
            JobKind::Text
        };
        PrintJob {
            id: Uuid::new_v4(),
            kind,
            ops,
            requested_by: self.requested_by.clone(),
        }
    }
}
