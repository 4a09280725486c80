//! Error-event queue drained by a single logging task.

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::ProxyError;
use crate::lifecycle::ShutdownSignal;

/// One request-path failure, tagged with where it happened.
#[derive(Debug)]
pub struct ErrorEvent {
    /// `None` when the failure happened before any shard owned the request.
    pub shard: Option<usize>,
    pub method: String,
    pub path: String,
    pub error: ProxyError,
}

/// Non-blocking producer side of the error queue.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<ErrorEvent>,
}

impl ErrorReporter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ErrorEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue an event. Never waits; a full queue drops the event.
    pub fn report(&self, shard: Option<usize>, method: &str, path: &str, error: ProxyError) {
        let event = ErrorEvent {
            shard,
            method: method.to_string(),
            path: path.to_string(),
            error,
        };
        if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
            tracing::warn!(error = %event.error, "Error queue full, event dropped");
        }
    }
}

/// Log events until every reporter is gone or the abort signal fires.
pub async fn run_error_loop(mut events: mpsc::Receiver<ErrorEvent>, abort: ShutdownSignal) {
    loop {
        let event = tokio::select! {
            biased;
            _ = abort.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        log_event(&event);
    }
    tracing::debug!("Error loop exited");
}

fn log_event(event: &ErrorEvent) {
    match &event.error {
        ProxyError::ClientCanceled => tracing::info!(
            shard = ?event.shard,
            method = %event.method,
            path = %event.path,
            "Request abandoned by client"
        ),
        error if error.status().is_server_error() => tracing::error!(
            shard = ?event.shard,
            method = %event.method,
            path = %event.path,
            status = error.status().as_u16(),
            error = %error,
            "Request failed"
        ),
        error => tracing::warn!(
            shard = ?event.shard,
            method = %event.method,
            path = %event.path,
            status = error.status().as_u16(),
            error = %error,
            "Request failed"
        ),
    }
}
