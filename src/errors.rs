// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Topic Subscriber
//!
//! `AmqpError` covers every broker step a worker performs while connecting,
//! bootstrapping its topology and consuming, plus the configuration and
//! supervision failures of the subscriber itself. `HandlerError` is the
//! outcome type returned by registered message handlers.

use std::time::Duration;
use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Broker-side variants carry the message of the underlying lapin error so the
/// worker can log it before restarting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`: {2}")]
    BindingExchangeToQueueError(String, String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error reading from the delivery stream
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`")]
    AckMessageError(String),

    /// Error negative-acknowledging a message
    #[error("failure to nack message `{0}`")]
    NackMessageError(String),

    /// The subscriber configuration is not usable
    #[error("invalid subscriber configuration: {0}")]
    InvalidConfig(String),

    /// Workers did not stop within the shutdown timeout
    #[error("workers did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    /// A worker task panicked
    #[error("worker #{worker_id} panicked: {error}")]
    WorkerPanic { worker_id: usize, error: String },
}

/// Outcome of a failed handler invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The payload could not be decoded into the handler's message type
    #[error("failure to parse payload: {0}")]
    ParsePayloadError(String),

    /// The handler's own logic failed
    #[error("handler failure: {0}")]
    Failure(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::ParsePayloadError(err.to_string())
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        HandlerError::Failure(msg.to_owned())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        HandlerError::Failure(msg)
    }
}
