// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topic Subscriber
//!
//! The subscriber owns the configuration and the callback registry, and
//! launches the worker pool. All workers consume the same queue, so each
//! delivery reaches exactly one of them.
//!
//! ```ignore
//! let cfg = SubscriberConfig::builder("amqp://localhost", "events", "order.*")
//!     .pool_size(4)
//!     .build()?;
//!
//! let subscriber = Subscriber::new(cfg);
//! subscriber.register_handler("order.created", handler_fn(|key, body| {
//!     println!("{key}: {body}");
//! }));
//!
//! let handle = subscriber.start();
//! // ...
//! handle.shutdown(Duration::from_secs(5)).await?;
//! ```

use crate::{
    channel::{AmqpConnector, Connector},
    config::SubscriberConfig,
    dispatcher::CallbackRegistry,
    errors::AmqpError,
    handler::ConsumerHandler,
    topology::SubscriberTopology,
    worker::{Worker, WorkerState},
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Subscriber {
    config: Arc<SubscriberConfig>,
    topology: Arc<SubscriberTopology>,
    registry: Arc<CallbackRegistry>,
    connector: Arc<dyn Connector>,
}

impl Subscriber {
    /// Creates a subscriber connecting through lapin.
    ///
    /// # Parameters
    /// * `config` - The validated subscriber configuration
    ///
    /// # Returns
    /// A subscriber with an empty callback registry
    pub fn new(config: SubscriberConfig) -> Self {
        Self::with_connector(config, Arc::new(AmqpConnector::new()))
    }

    /// Creates a subscriber dialing the broker through `connector`.
    ///
    /// # Parameters
    /// * `config` - The validated subscriber configuration
    /// * `connector` - Dials a fresh broker connection for every worker session
    pub fn with_connector(config: SubscriberConfig, connector: Arc<dyn Connector>) -> Self {
        debug!(queue = config.queue(), "queue name");

        Subscriber {
            topology: Arc::new(SubscriberTopology::new(&config)),
            config: Arc::new(config),
            registry: Arc::new(CallbackRegistry::new()),
            connector,
        }
    }

    /// Configuration shared by every worker.
    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// Queue consumed by every worker.
    pub fn queue_name(&self) -> &str {
        self.config.queue()
    }

    /// Routing-key handlers consulted on every delivery. Handlers can be
    /// added through [`Subscriber::register_handler`] before or after start.
    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Registers `handler` for deliveries carrying `routing_key`. A later
    /// registration for the same key replaces this one.
    ///
    /// # Parameters
    /// * `routing_key` - Exact routing key of the deliveries to handle
    /// * `handler` - The handler invoked for each matching delivery
    ///
    /// # Returns
    /// The subscriber, so registrations can be chained
    pub fn register_handler<H>(&self, routing_key: &str, handler: H) -> &Self
    where
        H: ConsumerHandler + 'static,
    {
        if self.registry.register(routing_key, Arc::new(handler)).is_some() {
            warn!(routing_key, "replacing registered handler");
        }
        self
    }

    /// Launches `pool_size` workers and returns immediately.
    ///
    /// Must be called from within a tokio runtime. Dropping the returned
    /// handle leaves the workers running.
    pub fn start(&self) -> SubscriberHandle {
        self.start_with_token(CancellationToken::new())
    }

    /// Same as [`Subscriber::start`], stopping the workers when `token` is
    /// cancelled.
    pub fn start_with_token(&self, token: CancellationToken) -> SubscriberHandle {
        let mut workers = Vec::with_capacity(self.config.pool_size());
        let mut states = Vec::with_capacity(self.config.pool_size());

        for worker_id in 0..self.config.pool_size() {
            info!(worker_id, "starting subscribe client");

            let (worker, state) = Worker::new(
                worker_id,
                self.config.clone(),
                self.topology.clone(),
                self.registry.clone(),
                self.connector.clone(),
                token.clone(),
            );

            workers.push(tokio::spawn(worker.run()));
            states.push(state);
        }

        info!(
            spawned_workers = workers.len(),
            queue = self.config.queue(),
            "all subscribe workers spawned"
        );

        SubscriberHandle {
            cancellation_token: token,
            workers,
            states,
        }
    }
}

/// Supervision handle over a started worker pool.
pub struct SubscriberHandle {
    cancellation_token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    states: Vec<watch::Receiver<WorkerState>>,
}

impl SubscriberHandle {
    /// Number of workers spawned by [`Subscriber::start`].
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Current state of every worker, indexed by worker id.
    pub fn states(&self) -> Vec<WorkerState> {
        self.states.iter().map(|rx| *rx.borrow()).collect()
    }

    /// Waits until every worker reports `state`.
    ///
    /// # Returns
    /// An error if a worker was dropped before reaching `state`
    pub async fn wait_for_state(&self, state: WorkerState) -> Result<(), AmqpError> {
        for rx in &self.states {
            let mut rx = rx.clone();
            rx.wait_for(|current| *current == state)
                .await
                .map_err(|_| AmqpError::InternalError)?;
        }
        Ok(())
    }

    /// Token shared by the workers. Cancelling it stops them without
    /// waiting, see [`SubscriberHandle::shutdown`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Whether any worker task is still running.
    pub fn has_active_workers(&self) -> bool {
        self.workers.iter().any(|handle| !handle.is_finished())
    }

    /// Cancels every worker and waits for them to stop.
    ///
    /// A handler running when shutdown starts is allowed to finish.
    ///
    /// # Parameters
    /// * `timeout` - How long to wait for all workers to finish
    ///
    /// # Returns
    /// * `AmqpError::ShutdownTimeout` if the workers did not stop in time
    /// * `AmqpError::WorkerPanic` for the first worker task that panicked
    pub async fn shutdown(mut self, timeout: Duration) -> Result<(), AmqpError> {
        info!(
            worker_count = self.workers.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating subscriber shutdown"
        );

        self.cancellation_token.cancel();

        let workers = std::mem::take(&mut self.workers);
        let join_all = async {
            let mut result = Ok(());
            for (worker_id, handle) in workers.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(
                        worker_id,
                        error = %join_error,
                        "worker task panicked during shutdown"
                    );
                    if result.is_ok() {
                        result = Err(AmqpError::WorkerPanic {
                            worker_id,
                            error: join_error.to_string(),
                        });
                    }
                }
            }
            result
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(result) => {
                info!("subscriber shutdown completed");
                result
            }
            Err(_) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(AmqpError::ShutdownTimeout(timeout))
            }
        }
    }
}
