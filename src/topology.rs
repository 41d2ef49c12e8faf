// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscriber Topology Bootstrap
//!
//! Every time a worker (re)connects it rebuilds the broker-side topology it
//! consumes from, in order:
//! 1. open a channel
//! 2. declare the durable topic exchange
//! 3. declare the durable, non-exclusive queue
//! 4. bind the queue to the exchange with the routing key
//! 5. set the consumer prefetch
//! 6. start consuming with a fresh consumer tag
//!
//! Any failing step aborts the bootstrap. Closing the connection is left to
//! the caller.

use crate::{
    channel::{BrokerChannel, BrokerConnection, DeliveryStream},
    config::SubscriberConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Declarations a worker performs before consuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberTopology {
    pub(crate) exchange: ExchangeDefinition,
    pub(crate) queue: QueueDefinition,
    pub(crate) binding: QueueBinding,
    pub(crate) prefetch_count: u16,
    pub(crate) no_ack: bool,
}

impl SubscriberTopology {
    pub fn new(cfg: &SubscriberConfig) -> SubscriberTopology {
        SubscriberTopology {
            exchange: ExchangeDefinition::new(cfg.exchange()).durable(),
            queue: QueueDefinition::new(cfg.queue())
                .durable()
                .auto_delete(cfg.auto_delete()),
            binding: QueueBinding::new(cfg.queue())
                .exchange(cfg.exchange())
                .routing_key(cfg.routing_key()),
            prefetch_count: cfg.prefetch_count(),
            no_ack: cfg.auto_ack(),
        }
    }

    pub fn exchange(&self) -> &ExchangeDefinition {
        &self.exchange
    }

    pub fn queue(&self) -> &QueueDefinition {
        &self.queue
    }

    pub fn binding(&self) -> &QueueBinding {
        &self.binding
    }

    /// Opens a channel on `conn`, installs the topology and starts a
    /// consumer.
    pub async fn bootstrap(
        &self,
        conn: &dyn BrokerConnection,
    ) -> Result<(Arc<dyn BrokerChannel>, DeliveryStream), AmqpError> {
        let channel = conn.create_channel().await?;

        self.install(channel.as_ref()).await?;
        let deliveries = self.consume(channel.as_ref()).await?;

        Ok((channel, deliveries))
    }

    /// Declares the exchange and queue, binds them and sets the prefetch.
    pub async fn install(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        self.install_exchange(channel).await?;
        self.install_queue(channel).await?;
        self.binding_queue(channel).await?;
        self.configure_qos(channel).await
    }

    async fn install_exchange(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", self.exchange.name());

        channel
            .exchange_declare(&self.exchange)
            .await
            .inspect_err(|err| {
                error!(
                    error = err.to_string(),
                    name = self.exchange.name(),
                    "error to declare the exchange"
                )
            })?;

        debug!("exchange: {} was created", self.exchange.name());
        Ok(())
    }

    async fn install_queue(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        debug!("creating queue: {}", self.queue.name());

        channel.queue_declare(&self.queue).await.inspect_err(|err| {
            error!(
                error = err.to_string(),
                name = self.queue.name(),
                "error to declare the queue"
            )
        })?;

        debug!("queue: {} was created", self.queue.name());
        Ok(())
    }

    async fn binding_queue(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            self.binding.queue_name(),
            self.binding.exchange_name(),
            self.binding.key()
        );

        channel.queue_bind(&self.binding).await.inspect_err(|err| {
            error!(error = err.to_string(), "error to bind queue to exchange")
        })?;

        debug!("queue was bounded");
        Ok(())
    }

    async fn configure_qos(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        channel
            .basic_qos(self.prefetch_count, false)
            .await
            .inspect_err(|err| error!(error = err.to_string(), "error to configure qos"))
    }

    async fn consume(&self, channel: &dyn BrokerChannel) -> Result<DeliveryStream, AmqpError> {
        let tag = new_consumer_tag(self.queue.name());
        debug!(consumer_tag = tag.as_str(), "starting consumer");

        channel
            .basic_consume(self.queue.name(), &tag, self.no_ack)
            .await
            .inspect_err(|err| error!(error = err.to_string(), "error to create the consumer"))
    }
}

/// Unique consumer tag for one bootstrap of `queue`.
pub(crate) fn new_consumer_tag(queue: &str) -> String {
    format!("{}-{}", queue, Uuid::new_v4())
}
