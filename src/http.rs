//! HTTP trigger: `GET /{secret}/{action}/{param}`.

use crate::model::{JobSource, PrintJob};
use crate::printer::PrinterError;
use crate::serializer::PrintHandle;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug)]
pub struct HttpState {
    secret: String,
    printer: PrintHandle,
    started: Instant,
}

impl HttpState {
    pub fn new(secret: impl Into<String>, printer: PrintHandle) -> Arc<Self> {
        Arc::new(Self {
            secret: secret.into(),
            printer,
            started: Instant::now(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct TriggerReply {
    pub action: String,
    pub param: String,
    pub queued: bool,
}

pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/{secret}/{action}/{param}", get(trigger))
        .with_state(state)
}

async fn status(State(state): State<Arc<HttpState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "printer": if state.printer.is_available() { "ready" } else { "unavailable" },
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

async fn trigger(
    State(state): State<Arc<HttpState>>,
    Path((secret, action, param)): Path<(String, String, String)>,
) -> Json<TriggerReply> {
    let queued = if !secret_matches(&secret, &state.secret) {
        warn!(%action, "rejected request with wrong secret");
        false
    } else if action == "print" {
        enqueue_text(&state.printer, &param).await
    } else {
        info!(%action, "unknown action ignored");
        false
    };
    Json(TriggerReply {
        action,
        param,
        queued,
    })
}

/// Compare without short-circuiting on the first differing byte.
fn secret_matches(given: &str, expected: &str) -> bool {
    let (given, expected) = (given.as_bytes(), expected.as_bytes());
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

async fn enqueue_text(printer: &PrintHandle, text: &str) -> bool {
    let job = PrintJob::text(JobSource::Http, text);
    let id = job.id();
    match printer.enqueue(job).await {
        Ok(_) => {
            info!(%id, "http print queued");
            true
        }
        Err(PrinterError::Unavailable) => {
            info!(%id, text = %text, "printer unavailable; job logged");
            false
        }
        Err(err) => {
            warn!(%id, ?err, "http print not queued");
            false
        }
    }
}

/// Serve until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HttpState>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http trigger listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
