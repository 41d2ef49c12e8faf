// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Self-healing topic subscriber for RabbitMQ.
//!
//! A [`Subscriber`] runs a pool of workers that each keep their own broker
//! connection, rebuild the exchange, queue and binding after any failure and
//! dispatch deliveries to handlers registered per routing key.

mod otel;

pub mod backoff;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod queue;
pub mod subscriber;
pub mod topology;
pub mod worker;

pub use channel::{AmqpConnector, BrokerChannel, BrokerConnection, Connector, DeliveryStream};
pub use config::{AckPolicy, SubscriberConfig, SubscriberSettings};
pub use consumer::Delivery;
pub use dispatcher::CallbackRegistry;
pub use errors::{AmqpError, HandlerError};
pub use handler::{handler_fn, json_handler, try_handler_fn, ConsumerHandler};
pub use subscriber::{Subscriber, SubscriberHandle};
pub use worker::WorkerState;
