use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use thermo_station::config::Printer as PrinterCfg;
use thermo_station::model::{JobSource, Justify, PrintJob, PrintJobBuilder, PrintOp, Symbology, TextSize};
use thermo_station::printer::{LogPrinter, PrinterDevice, SerialPrinter};
use thermo_station::raster;
use thermo_station::serializer::PrintSerializer;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about = "Print a style, layout and barcode test page")]
struct Args {
    /// Path to YAML config file (reads only `printer`)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Serial device, overriding the config file
    #[arg(long)]
    device: Option<PathBuf>,

    /// Baud rate, overriding the config file
    #[arg(long)]
    baud: Option<u32>,

    /// Image to print at the end of the page
    #[arg(long)]
    image: Option<PathBuf>,

    /// Log the page instead of printing it
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, serde::Deserialize)]
struct PrinterOnlyConfig {
    printer: PrinterCfg,
}

fn sample_page() -> PrintJobBuilder {
    let mut b = PrintJob::builder(JobSource::Startup);
    b.op(PrintOp::Reset)
        .justify(Justify::Right)
        .line("Right justified")
        .justify(Justify::Center)
        .line("Center justified")
        .justify(Justify::Left)
        .line("Left justified")
        .bold(true)
        .line("Bold text")
        .bold(false)
        .underline(true)
        .line("Underlined text")
        .underline(false)
        .size(TextSize::Large)
        .line("Large")
        .size(TextSize::Medium)
        .line("Medium")
        .size(TextSize::Small)
        .line("Small")
        .divider()
        .feed(1)
        .barcode("THERMO", Symbology::Code39)
        .barcode("123456789123", Symbology::UpcA);
    b
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    let device: Box<dyn PrinterDevice> = if args.dry_run {
        Box::new(LogPrinter::new())
    } else {
        let (path, baud) = match (args.device.clone(), args.baud) {
            (Some(path), Some(baud)) => (path, baud),
            (device, baud) => {
                let raw = fs::read_to_string(&args.config)
                    .with_context(|| format!("reading {}", args.config.display()))?;
                let cfg: PrinterOnlyConfig = serde_yaml::from_str(&raw)?;
                (device.unwrap_or(cfg.printer.device), baud.unwrap_or(cfg.printer.baud))
            }
        };
        Box::new(SerialPrinter::open(&path, baud).await?)
    };

    let cancel = CancellationToken::new();
    let (printer, worker) = PrintSerializer::start(Some(device), cancel.clone()).await;
    if !printer.is_available() {
        bail!("printer did not answer the probe");
    }

    let mut page = sample_page();
    if let Some(path) = &args.image {
        page.image(raster::from_path(path).await?);
    }
    page.line("Self test done.").feed(3).op(PrintOp::Sleep);

    let ack = printer.submit(page.build()).await?;
    info!(ops = ack.ops, elapsed_ms = ack.elapsed.as_millis() as u64, "test page printed");

    cancel.cancel();
    if let Some(worker) = worker {
        worker.await?;
    }
    Ok(())
}
