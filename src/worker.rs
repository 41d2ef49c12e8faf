// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscribe Worker
//!
//! A worker owns one broker connection at a time and runs the loop
//!
//! ```text
//! Disconnected -> Connecting -> TopologyReady -> Consuming -> Disconnected
//! ```
//!
//! until its cancellation token fires. Setup failures restart the loop after
//! the additive backoff; a delivery stream that closes while consuming
//! restarts it immediately. Nothing a worker does is visible to its siblings.

use crate::{
    backoff::Backoff,
    channel::{BrokerConnection, Connector},
    config::SubscriberConfig,
    consumer::{consume, AckMode},
    dispatcher::CallbackRegistry,
    errors::AmqpError,
    otel::CONSUMER_TRACER_NAME,
    topology::SubscriberTopology,
};
use futures_util::StreamExt;
use opentelemetry::global;
use std::{fmt, sync::Arc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Observable state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Disconnected,
    Connecting,
    TopologyReady,
    Consuming,
    /// The worker was cancelled and its task finished.
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Disconnected => "disconnected",
            WorkerState::Connecting => "connecting",
            WorkerState::TopologyReady => "topology_ready",
            WorkerState::Consuming => "consuming",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a connection session ended.
#[derive(Debug)]
enum SessionEnd {
    SetupFailed(AmqpError),
    StreamClosed,
    Cancelled,
}

pub(crate) struct Worker {
    id: usize,
    config: Arc<SubscriberConfig>,
    topology: Arc<SubscriberTopology>,
    registry: Arc<CallbackRegistry>,
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    state: watch::Sender<WorkerState>,
    cancellation_token: CancellationToken,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        config: Arc<SubscriberConfig>,
        topology: Arc<SubscriberTopology>,
        registry: Arc<CallbackRegistry>,
        connector: Arc<dyn Connector>,
        cancellation_token: CancellationToken,
    ) -> (Self, watch::Receiver<WorkerState>) {
        let (state, state_rx) = watch::channel(WorkerState::Disconnected);
        let backoff = Backoff::new(config.reconnect_wait(), config.max_reconnect_wait());

        let worker = Worker {
            id,
            config,
            topology,
            registry,
            connector,
            backoff,
            state,
            cancellation_token,
        };

        (worker, state_rx)
    }

    /// Runs until the cancellation token fires.
    pub(crate) async fn run(mut self) {
        info!(worker_id = self.id, "subscribe worker starting");

        loop {
            let wait = match self.session().await {
                SessionEnd::Cancelled => break,
                SessionEnd::SetupFailed(err) => {
                    let wait = self.backoff.on_setup_failure();
                    error!(
                        worker_id = self.id,
                        error = err.to_string(),
                        "subscribe worker setup failure"
                    );
                    wait
                }
                SessionEnd::StreamClosed => {
                    error!(worker_id = self.id, "channel closed, restart worker now");
                    self.backoff.on_stream_closed()
                }
            };

            self.set_state(WorkerState::Disconnected);

            if !wait.is_zero() {
                info!(
                    worker_id = self.id,
                    wait_ms = wait.as_millis() as u64,
                    "wait to restart worker"
                );
                tokio::select! {
                    _ = self.cancellation_token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            info!(worker_id = self.id, "restarting worker now");
        }

        self.set_state(WorkerState::Stopped);
        info!(worker_id = self.id, "subscribe worker stopped");
    }

    /// One connection lifetime: dial, bootstrap, consume.
    async fn session(&mut self) -> SessionEnd {
        if self.cancellation_token.is_cancelled() {
            return SessionEnd::Cancelled;
        }

        self.set_state(WorkerState::Connecting);

        let conn = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => return SessionEnd::Cancelled,
            conn = self.connector.connect(self.config.addr()) => conn,
        };
        let conn = match conn {
            Ok(conn) => conn,
            Err(err) => return SessionEnd::SetupFailed(err),
        };

        let end = self.consume_connection(conn.as_ref()).await;
        conn.close().await;
        end
    }

    async fn consume_connection(&mut self, conn: &dyn BrokerConnection) -> SessionEnd {
        let ready = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => return SessionEnd::Cancelled,
            ready = self.topology.bootstrap(conn) => ready,
        };
        let (channel, mut deliveries) = match ready {
            Ok(ready) => ready,
            Err(err) => return SessionEnd::SetupFailed(err),
        };

        self.set_state(WorkerState::TopologyReady);
        self.backoff.on_consuming();
        self.set_state(WorkerState::Consuming);

        info!(
            worker_id = self.id,
            queue = self.config.queue(),
            "subscribe worker started, waiting for message"
        );

        let tracer = global::tracer(CONSUMER_TRACER_NAME);
        let mode = AckMode {
            auto_ack: self.config.auto_ack(),
            policy: self.config.ack_policy(),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => return SessionEnd::Cancelled,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    if let Err(err) =
                        consume(&tracer, &delivery, &self.registry, channel.as_ref(), mode).await
                    {
                        error!(
                            worker_id = self.id,
                            error = err.to_string(),
                            "error consume msg"
                        );
                    }
                }
                Some(Err(err)) => {
                    error!(
                        worker_id = self.id,
                        error = err.to_string(),
                        "delivery stream failure"
                    );
                    return SessionEnd::StreamClosed;
                }
                None => return SessionEnd::StreamClosed,
            }
        }
    }

    fn set_state(&self, state: WorkerState) {
        debug!(worker_id = self.id, state = %state, "worker state");
        self.state.send_replace(state);
    }
}
