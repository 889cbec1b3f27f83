//! Boot sequence: settle delay, network check with IP printout, greeting.

use crate::button::Indicator;
use crate::model::{JobSource, PrintJob};
use crate::raster;
use crate::serializer::PrintHandle;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_PROBE_ADDR: &str = "8.8.8.8:80";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("network is unreachable: {0}")]
    NetworkUnreachable(#[source] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct StartupOptions {
    /// Wait before printing; only applied when a printer is present.
    pub delay: Duration,
    pub check_network: bool,
    pub probe_addr: String,
    pub greeting: Option<PathBuf>,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            check_network: true,
            probe_addr: DEFAULT_PROBE_ADDR.to_string(),
            greeting: None,
        }
    }
}

/// Local address the kernel would route `probe_addr` from.
///
/// A UDP connect sends no packets.
pub async fn local_ip(probe_addr: &str) -> std::io::Result<IpAddr> {
    let sock = UdpSocket::bind("0.0.0.0:0").await?;
    sock.connect(probe_addr).await?;
    Ok(sock.local_addr()?.ip())
}

fn unreachable_job() -> PrintJob {
    let mut b = PrintJob::builder(JobSource::Startup);
    b.bold(true)
        .line("Network is unreachable.")
        .bold(false)
        .line("Connect display and keyboard")
        .line("for network troubleshooting.")
        .feed(3);
    b.build()
}

#[instrument(skip_all)]
pub async fn run(
    opts: &StartupOptions,
    printer: &PrintHandle,
    indicator: &Arc<Indicator>,
) -> Result<(), StartupError> {
    let _busy = indicator.busy();

    if printer.is_available() && !opts.delay.is_zero() {
        debug!(delay_secs = opts.delay.as_secs(), "waiting before greeting");
        tokio::time::sleep(opts.delay).await;
    }

    if opts.check_network {
        match local_ip(&opts.probe_addr).await {
            Ok(ip) => {
                info!(%ip, "network is up");
                let job = PrintJob::text(JobSource::Startup, &format!("My IP address is {ip}"));
                printer.submit_or_log(job).await;
            }
            Err(err) => {
                error!(?err, probe = %opts.probe_addr, "network is unreachable");
                printer.submit_or_log(unreachable_job()).await;
                if let Err(err) = printer.flush().await {
                    debug!(?err, "printer flush skipped");
                }
                return Err(StartupError::NetworkUnreachable(err));
            }
        }
    }

    if let Some(path) = &opts.greeting {
        match raster::from_path(path).await {
            Ok(image) => {
                printer.submit_or_log(PrintJob::image(JobSource::Startup, image)).await;
            }
            Err(err) => warn!(?err, path = %path.display(), "greeting image skipped"),
        }
    }
    Ok(())
}
