// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! Workers never talk to lapin directly. They dial through a [`Connector`],
//! open a [`BrokerChannel`] on the resulting [`BrokerConnection`] and read
//! deliveries from a [`DeliveryStream`]. [`AmqpConnector`] is the lapin-backed
//! implementation used in production.

use crate::{
    consumer::Delivery,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lapin::{
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions},
    types::{FieldTable, LongString},
    Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Reply code sent to the broker when a worker closes its connection.
const AMQP_REPLY_SUCCESS: u16 = 200;

/// Stream of deliveries produced by a started consumer.
///
/// The stream ends, or yields an error, when the broker closes the channel.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Dials the broker.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection to the broker listening on `addr`.
    async fn connect(&self, addr: &str) -> Result<Box<dyn BrokerConnection>, AmqpError>;
}

/// A live broker connection, exclusively owned by one worker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Opens a channel on this connection.
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError>;

    /// Closes the connection. Failures are logged and swallowed since the
    /// connection is usually already gone when this is called.
    async fn close(&self);
}

/// The subset of AMQP channel methods the subscriber relies on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares the exchange described by `def`.
    ///
    /// # Returns
    /// `AmqpError::DeclareExchangeError` if the broker refuses the declaration
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Declares the queue described by `def`.
    ///
    /// # Returns
    /// `AmqpError::DeclareQueueError` if the broker refuses the declaration
    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    /// Binds a queue to an exchange with the binding's routing key.
    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    /// Sets the consumer prefetch. The prefetch size is always 0 (unlimited).
    async fn basic_qos(&self, prefetch_count: u16, global: bool) -> Result<(), AmqpError>;

    /// Starts a consumer on `queue`.
    ///
    /// # Parameters
    /// * `queue` - The queue to consume from
    /// * `consumer_tag` - Tag identifying the consumer on the channel
    /// * `no_ack` - When true the broker considers deliveries acknowledged on send
    ///
    /// # Returns
    /// The stream of deliveries, which ends when the channel closes
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        no_ack: bool,
    ) -> Result<DeliveryStream, AmqpError>;

    /// Acknowledges a single delivery (never cumulative).
    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    /// Rejects a single delivery, asking the broker to redeliver it when
    /// `requeue` is set.
    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;
}

/// lapin-backed [`Connector`].
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector {
    connection_name: Option<String>,
}

impl AmqpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection name shown in the broker management UI.
    pub fn with_connection_name(mut self, name: &str) -> Self {
        self.connection_name = Some(name.to_owned());
        self
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self, addr: &str) -> Result<Box<dyn BrokerConnection>, AmqpError> {
        debug!("creating amqp connection...");

        let mut options = ConnectionProperties::default();
        if let Some(name) = &self.connection_name {
            options = options.with_connection_name(LongString::from(name.clone()));
        }

        match Connection::connect(addr, options).await {
            Ok(conn) => {
                debug!("amqp connected");
                Ok(Box::new(AmqpConnection { conn }))
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }
    }
}

/// lapin-backed [`BrokerConnection`].
pub struct AmqpConnection {
    conn: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        debug!("creating amqp channel...");

        match self.conn.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                Ok(Arc::new(AmqpChannel { channel }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    async fn close(&self) {
        if let Err(err) = self.conn.close(AMQP_REPLY_SUCCESS, "worker restart").await {
            debug!(error = err.to_string(), "connection was already closed");
        }
    }
}

/// lapin-backed [`BrokerChannel`].
pub struct AmqpChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.channel
            .exchange_declare(
                def.name(),
                def.kind(),
                def.options(),
                def.arguments(),
            )
            .await
            .map_err(|err| AmqpError::DeclareExchangeError(err.to_string()))
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        self.channel
            .queue_declare(def.name(), def.options(), def.arguments())
            .await
            .map(|_| ())
            .map_err(|err| AmqpError::DeclareQueueError(err.to_string()))
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.channel
            .queue_bind(
                binding.queue_name(),
                binding.exchange_name(),
                binding.key(),
                binding.options(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name().to_owned(),
                    binding.queue_name().to_owned(),
                    err.to_string(),
                )
            })
    }

    async fn basic_qos(&self, prefetch_count: u16, global: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions { global })
            .await
            .map_err(|err| AmqpError::QoSDeclarationError(err.to_string()))
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        no_ack: bool,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| AmqpError::BindingConsumerError(err.to_string()))?;

        Ok(consumer
            .map(|result| match result {
                Ok(delivery) => Ok(Delivery::from(delivery)),
                Err(err) => Err(AmqpError::ConsumerError(err.to_string())),
            })
            .boxed())
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| AmqpError::AckMessageError(err.to_string()))
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|err| AmqpError::NackMessageError(err.to_string()))
    }
}
