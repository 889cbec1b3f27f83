mod common;

use common::{Call, RecordingPrinter};
use thermo_station::http::{self, HttpState};
use thermo_station::model::{JobSource, PrintJob};
use thermo_station::printer::PrinterError;
use thermo_station::serializer::{PrintHandle, PrintSerializer};
use tokio_util::sync::CancellationToken;

const LINES_PER_JOB: usize = 5;

fn job(producer: &str, n: usize) -> PrintJob {
    let mut b = PrintJob::builder(JobSource::Http);
    for k in 0..LINES_PER_JOB {
        b.line(&format!("{producer}{n}:{k}"));
    }
    b.build()
}

async fn start(device: RecordingPrinter) -> (PrintHandle, CancellationToken) {
    let cancel = CancellationToken::new();
    let (handle, _worker) = PrintSerializer::start(Some(Box::new(device)), cancel.clone()).await;
    (handle, cancel)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_never_interleave() {
    let device = RecordingPrinter::new();
    let (handle, cancel) = start(device.clone()).await;

    let mut producers = Vec::new();
    for producer in ["A", "B", "C"] {
        let handle = handle.clone();
        producers.push(tokio::spawn(async move {
            for n in 0..20 {
                handle.submit(job(producer, n)).await.unwrap();
            }
        }));
    }
    for p in producers {
        p.await.unwrap();
    }

    let lines = device.lines().await;
    assert_eq!(lines.len(), 3 * 20 * LINES_PER_JOB);
    for chunk in lines.chunks(LINES_PER_JOB) {
        let (prefix, _) = chunk[0].split_once(':').unwrap();
        for (k, line) in chunk.iter().enumerate() {
            assert_eq!(line, &format!("{prefix}:{k}"), "job output interleaved: {chunk:?}");
        }
    }
    cancel.cancel();
}

#[tokio::test]
async fn per_producer_order_is_fifo() {
    let device = RecordingPrinter::new();
    let (handle, cancel) = start(device.clone()).await;

    let mut receipts = Vec::new();
    for n in 0..10 {
        receipts.push(handle.enqueue(job("A", n)).await.unwrap());
    }
    for rx in receipts {
        rx.await.unwrap().unwrap();
    }

    let firsts: Vec<String> = device
        .lines()
        .await
        .into_iter()
        .filter(|l| l.ends_with(":0"))
        .collect();
    let expected: Vec<String> = (0..10).map(|n| format!("A{n}:0")).collect();
    assert_eq!(firsts, expected);
    cancel.cancel();
}

#[tokio::test]
async fn failed_probe_fails_fast() {
    let (handle, _cancel) = start(RecordingPrinter::failing_probe()).await;
    assert!(!handle.is_available());
    assert!(matches!(
        handle.submit(job("A", 0)).await,
        Err(PrinterError::Unavailable)
    ));
    assert!(handle.submit_or_log(job("A", 1)).await.is_none());
}

#[tokio::test]
async fn failing_op_resets_device_and_queue_continues() {
    let device = RecordingPrinter::failing_on("A0:2");
    let (handle, cancel) = start(device.clone()).await;

    let err = handle.submit(job("A", 0)).await.unwrap_err();
    assert!(matches!(err, PrinterError::Io(_)));
    let ack = handle.submit(job("A", 1)).await.unwrap();
    assert_eq!(ack.ops, LINES_PER_JOB);

    let calls = device.calls().await;
    let reset_at = calls.iter().position(|c| *c == Call::Reset).unwrap();
    assert_eq!(calls[reset_at - 1], Call::Line("A0:1".into()));
    assert_eq!(calls[reset_at + 1], Call::Line("A1:0".into()));
    cancel.cancel();
}

#[tokio::test]
async fn flush_waits_for_earlier_jobs() {
    let device = RecordingPrinter::new();
    let (handle, cancel) = start(device.clone()).await;

    for n in 0..5 {
        let _ = handle.enqueue(job("F", n)).await.unwrap();
    }
    handle.flush().await.unwrap();
    assert_eq!(device.lines().await.len(), 5 * LINES_PER_JOB);
    cancel.cancel();
}

#[tokio::test]
async fn cancelled_worker_closes_queue() {
    let device = RecordingPrinter::new();
    let cancel = CancellationToken::new();
    let (handle, worker) = PrintSerializer::start(Some(Box::new(device)), cancel.clone()).await;
    cancel.cancel();
    worker.unwrap().await.unwrap();
    assert!(matches!(handle.submit(job("Z", 0)).await, Err(PrinterError::Closed)));
}

#[tokio::test]
async fn http_print_reaches_device() {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    let device = RecordingPrinter::new();
    let (handle, cancel) = start(device.clone()).await;
    let app = http::router(HttpState::new("s3cret", handle.clone()));

    let res = app
        .oneshot(Request::get("/s3cret/print/hello").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let reply: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply["queued"], true);

    handle.flush().await.unwrap();
    let calls = device.calls().await;
    assert!(calls.contains(&Call::Text("hello".into())));
    assert_eq!(calls.last(), Some(&Call::Feed(3)));
    cancel.cancel();
}
