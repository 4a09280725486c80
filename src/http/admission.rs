//! Admission control: a non-blocking concurrency gate in front of every
//! handler.
//!
//! # Design Decisions
//! - `try_acquire`, never `acquire`: overload is shed immediately with 429
//! - The permit travels with the response body and is released only when
//!   the body finishes or is dropped, so a streaming response keeps its slot

use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ProxyError;
use crate::observability::metrics;

/// Counting semaphore sized to the configured admission capacity.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot without waiting.
    pub fn try_admit(&self) -> Result<OwnedSemaphorePermit, ProxyError> {
        self.permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| ProxyError::AdmissionRejected)
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Middleware wrapping the request entry point with the admission gate.
pub async fn admission_middleware(
    State(admission): State<AdmissionController>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let permit = match admission.try_admit() {
        Ok(permit) => permit,
        Err(e) => {
            tracing::warn!(
                method = %request.method(),
                path = %request.uri().path(),
                capacity = admission.capacity(),
                "Admission rejected"
            );
            metrics::record_admission_rejected();
            return e.into_response();
        }
    };

    tracing::trace!(available = admission.available(), "Request admitted");
    let (parts, body) = next.run(request).await.into_parts();
    Response::from_parts(parts, hold_until_complete(body, permit))
}

/// Tie `permit` to the lifetime of `body`. Empty bodies release it at once.
fn hold_until_complete(body: Body, permit: OwnedSemaphorePermit) -> Body {
    if body.is_end_stream() {
        return body;
    }
    Body::from_stream(body.into_data_stream().map(move |chunk| {
        let _held = &permit;
        chunk
    }))
}
