//! Single owner of the printer device.
//!
//! Producers hold a cloneable [`PrintHandle`] and send whole jobs down a
//! channel; one worker task renders them in arrival order, so bytes from two
//! jobs never interleave.

use crate::model::PrintJob;
use crate::printer::{self, PrinterDevice, PrinterError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const QUEUE_DEPTH: usize = 64;

/// Receipt for a job that was fully sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub job_id: Uuid,
    pub ops: usize,
    pub elapsed: Duration,
}

pub type AckReceiver = oneshot::Receiver<Result<Ack, PrinterError>>;

enum Command {
    Print(PrintJob, oneshot::Sender<Result<Ack, PrinterError>>),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct PrintHandle {
    tx: Option<mpsc::Sender<Command>>,
}

impl PrintHandle {
    /// Handle for a missing printer: every submission fails immediately.
    pub fn unavailable() -> Self {
        Self { tx: None }
    }

    pub fn is_available(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue `job` and return a receiver for its outcome without waiting.
    pub async fn enqueue(&self, job: PrintJob) -> Result<AckReceiver, PrinterError> {
        let tx = self.tx.as_ref().ok_or(PrinterError::Unavailable)?;
        let (reply, rx) = oneshot::channel();
        tx.send(Command::Print(job, reply))
            .await
            .map_err(|_| PrinterError::Closed)?;
        Ok(rx)
    }

    /// Queue `job` and wait until it has been printed.
    pub async fn submit(&self, job: PrintJob) -> Result<Ack, PrinterError> {
        let rx = self.enqueue(job).await?;
        rx.await.map_err(|_| PrinterError::Closed)?
    }

    /// Submit, logging the job text instead when the printer is unavailable.
    ///
    /// Returns `None` when the job was not printed.
    pub async fn submit_or_log(&self, job: PrintJob) -> Option<Ack> {
        let id = job.id();
        let source = job.requested_by().to_string();
        let summary = job.summary();
        match self.submit(job).await {
            Ok(ack) => Some(ack),
            Err(PrinterError::Unavailable) => {
                info!(%id, %source, text = %summary.trim_end(), "printer unavailable; job logged");
                None
            }
            Err(err) => {
                warn!(%id, %source, ?err, "print job failed");
                None
            }
        }
    }

    /// Resolves once every job queued before this call has been handled.
    pub async fn flush(&self) -> Result<(), PrinterError> {
        let tx = self.tx.as_ref().ok_or(PrinterError::Unavailable)?;
        let (reply, rx) = oneshot::channel();
        tx.send(Command::Flush(reply))
            .await
            .map_err(|_| PrinterError::Closed)?;
        rx.await.map_err(|_| PrinterError::Closed)
    }
}

pub struct PrintSerializer;

impl PrintSerializer {
    /// Probe `device` and start the worker that owns it.
    ///
    /// With no device, or a device that fails its probe, the returned handle is
    /// unavailable and no worker is started.
    pub async fn start(
        device: Option<Box<dyn PrinterDevice>>,
        cancel: CancellationToken,
    ) -> (PrintHandle, Option<JoinHandle<()>>) {
        let Some(mut device) = device else {
            warn!("no printer device; printing degraded to logging");
            return (PrintHandle::unavailable(), None);
        };
        if let Err(err) = device.probe().await {
            warn!(?err, "printer probe failed; printing degraded to logging");
            return (PrintHandle::unavailable(), None);
        }
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let worker = tokio::spawn(run_worker(device, rx, cancel));
        info!("print serializer started");
        (PrintHandle { tx: Some(tx) }, Some(worker))
    }
}

async fn run_worker(
    mut device: Box<dyn PrinterDevice>,
    mut rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
) {
    loop {
        let cmd = tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };
        match cmd {
            Command::Print(job, reply) => {
                let res = render(device.as_mut(), &job).await;
                let _ = reply.send(res);
            }
            Command::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
    info!("print serializer stopped");
}

#[instrument(skip_all, fields(id = %job.id(), kind = job.kind().as_str(), source = %job.requested_by()))]
async fn render(device: &mut dyn PrinterDevice, job: &PrintJob) -> Result<Ack, PrinterError> {
    let started = Instant::now();
    for op in job.ops() {
        if let Err(err) = printer::apply(device, op).await {
            warn!(?err, "print job aborted");
            // leave no style state behind for the next job
            if let Err(err) = device.reset().await {
                debug!(?err, "reset after failed job also failed");
            }
            return Err(err);
        }
    }
    let ack = Ack {
        job_id: job.id(),
        ops: job.ops().len(),
        elapsed: started.elapsed(),
    };
    debug!(ops = ack.ops, elapsed_ms = ack.elapsed.as_millis() as u64, "job printed");
    Ok(ack)
}
