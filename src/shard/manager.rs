//! Shard pool ownership, dispatch and drain.
//!
//! # Responsibilities
//! - Build the fixed shard pool and its queues from configuration
//! - Hand requests from the global queue to shards in round-robin order
//! - Close the global queue on shutdown and drain within a deadline
//!
//! # Design Decisions
//! - Only the dispatch loop closes the global queue, exactly once
//! - A hand-off waits for shard capacity for a bounded time only
//! - Past the drain deadline the shards are told to abort and detached

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::load_balancer::{LoadBalancer, RoundRobinCursor, SelectorError};
use crate::net::UpstreamTransport;
use crate::observability::metrics;
use crate::shard::errors::{run_error_loop, ErrorEvent, ErrorReporter};
use crate::shard::request::ProxyRequest;
use crate::shard::worker::{Shard, ShardSettings};

/// How the drain after shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Every shard and loop exited on its own.
    Complete,
    /// The deadline passed; remaining work was aborted.
    TimedOut,
}

/// Cloneable entry point into the global dispatch queue.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<ProxyRequest>,
}

impl Dispatcher {
    /// Enqueue a request. Fails with [`ProxyError::ShuttingDown`] once the
    /// queue has been closed.
    pub async fn submit(&self, request: ProxyRequest) -> Result<(), ProxyError> {
        self.tx.send(request).await.map_err(|_| {
            metrics::record_dispatch("rejected");
            ProxyError::ShuttingDown
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owner of the shard pool and the global dispatch queue.
pub struct ShardManager {
    config: Arc<ProxyConfig>,
    shards: Vec<Shard>,
    shard_queues: Vec<mpsc::Sender<ProxyRequest>>,
    cursor: RoundRobinCursor,
    queue_tx: mpsc::Sender<ProxyRequest>,
    queue_rx: mpsc::Receiver<ProxyRequest>,
    errors: ErrorReporter,
    error_events: mpsc::Receiver<ErrorEvent>,
    abort: Shutdown,
}

impl ShardManager {
    /// Build the shard pool and every queue. Nothing runs until [`run`](Self::run).
    pub fn start(config: Arc<ProxyConfig>) -> Result<Self, ProxyError> {
        if !config.load_balancing_alg.is_implemented() {
            return Err(SelectorError::Unsupported(config.load_balancing_alg).into());
        }

        let shard_count = config.shard_count;
        let cursor = RoundRobinCursor::new(shard_count)?;
        let (queue_tx, queue_rx) = mpsc::channel(config.dispatch.queue_capacity.max(1));
        let (errors, error_events) = ErrorReporter::channel(config.dispatch.error_queue_capacity);

        let shared = if config.transport.shared_client {
            Some(Arc::new(UpstreamTransport::new(&config.transport)?))
        } else {
            None
        };

        let settings = ShardSettings {
            algorithm: config.load_balancing_alg,
            buffer_size: config.buffer_size,
            max_body_bytes: config.server.max_body_bytes,
        };

        let mut shards = Vec::with_capacity(shard_count);
        let mut shard_queues = Vec::with_capacity(shard_count);
        for id in 0..shard_count {
            let transport = match &shared {
                Some(transport) => transport.clone(),
                None => Arc::new(UpstreamTransport::new(&config.transport)?),
            };
            let (tx, rx) = mpsc::channel(config.dispatch.shard_queue_capacity.max(1));
            shards.push(Shard::new(id, rx, transport, settings, errors.clone()));
            shard_queues.push(tx);
        }

        tracing::info!(
            shards = shard_count,
            shared_client = config.transport.shared_client,
            queue_capacity = config.dispatch.queue_capacity,
            "Shard pool built"
        );

        Ok(Self {
            config,
            shards,
            shard_queues,
            cursor,
            queue_tx,
            queue_rx,
            errors,
            error_events,
            abort: Shutdown::new(),
        })
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            tx: self.queue_tx.clone(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Spawn the shards and both loops, then block until `shutdown` fires
    /// and the pool has drained or the drain deadline has passed.
    pub async fn run(self, shutdown: ShutdownSignal) -> Drain {
        let ShardManager {
            config,
            shards,
            shard_queues,
            cursor,
            queue_tx,
            queue_rx,
            errors,
            error_events,
            abort,
        } = self;
        drop(queue_tx);

        let mut tasks = JoinSet::new();
        for shard in shards {
            tracing::debug!(shard = shard.id(), "Spawning shard");
            tasks.spawn(shard.run(abort.subscribe()));
        }

        let dispatch = DispatchLoop {
            queue: queue_rx,
            shards: shard_queues,
            cursor,
            handoff: config.dispatch.handoff_timeout(),
            errors,
        };
        tasks.spawn(dispatch.run(shutdown.clone()));
        tasks.spawn(run_error_loop(error_events, abort.subscribe()));

        shutdown.cancelled().await;
        let deadline = config.dispatch.shutdown_timeout();
        tracing::info!(deadline_secs = deadline.as_secs(), "Draining shard pool");

        let drained = tokio::time::timeout(deadline, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Shard pool task failed");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                tracing::info!("Shard pool drained");
                Drain::Complete
            }
            Err(_) => {
                let error = ProxyError::ShutdownDeadlineExceeded(deadline.as_secs());
                tracing::warn!(error = %error, pending = tasks.len(), "Abandoning in-flight work");
                abort.trigger();
                tasks.detach_all();
                Drain::TimedOut
            }
        }
    }
}

/// Outcome of one hand-off attempt.
enum Handoff<'a> {
    Ready(mpsc::Permit<'a, ProxyRequest>),
    Canceled,
    ShardClosed,
    TimedOut,
}

/// The single consumer of the global queue.
struct DispatchLoop {
    queue: mpsc::Receiver<ProxyRequest>,
    shards: Vec<mpsc::Sender<ProxyRequest>>,
    cursor: RoundRobinCursor,
    handoff: Duration,
    errors: ErrorReporter,
}

impl DispatchLoop {
    async fn run(mut self, shutdown: ShutdownSignal) {
        let mut closing = false;
        loop {
            let next = if closing {
                self.queue.recv().await
            } else {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        // Already-queued requests are still handed off below.
                        self.queue.close();
                        closing = true;
                        tracing::info!("Dispatch queue closed");
                        continue;
                    }
                    next = self.queue.recv() => next,
                }
            };

            match next {
                Some(request) => self.hand_off(request).await,
                None => break,
            }
        }
        tracing::debug!("Dispatch loop exited");
    }

    async fn hand_off(&self, mut request: ProxyRequest) {
        let (method, path) = request.describe();

        if request.is_canceled() {
            tracing::debug!(method = %method, path = %path, "Dropping canceled request before hand-off");
            metrics::record_dispatch("canceled");
            self.errors.report(None, &method, &path, ProxyError::ClientCanceled);
            return;
        }

        // The cursor was built over this exact slice.
        let index = self.cursor.next_index();
        let shard = &self.shards[index];

        let outcome = tokio::select! {
            biased;
            _ = request.sink.closed() => Handoff::Canceled,
            reserved = tokio::time::timeout(self.handoff, shard.reserve()) => match reserved {
                Ok(Ok(permit)) => Handoff::Ready(permit),
                Ok(Err(_)) => Handoff::ShardClosed,
                Err(_) => Handoff::TimedOut,
            },
        };

        match outcome {
            Handoff::Ready(permit) => {
                tracing::trace!(shard = index, method = %method, path = %path, "Request handed off");
                permit.send(request);
                metrics::record_dispatch("handed_off");
            }
            Handoff::Canceled => {
                tracing::debug!(shard = index, method = %method, path = %path, "Client gone during hand-off");
                metrics::record_dispatch("canceled");
                self.errors.report(None, &method, &path, ProxyError::ClientCanceled);
            }
            Handoff::ShardClosed => {
                let error = ProxyError::RequestDropped;
                request.sink.fail(&error);
                metrics::record_dispatch("dropped");
                self.errors.report(Some(index), &method, &path, error);
            }
            Handoff::TimedOut => {
                let error = ProxyError::DispatchTimeout(self.handoff.as_millis() as u64);
                tracing::warn!(shard = index, method = %method, path = %path, "Shard hand-off timed out");
                request.sink.fail(&error);
                metrics::record_dispatch("timeout");
                self.errors.report(Some(index), &method, &path, error);
            }
        }
    }
}
