// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Dispatch
//!
//! Handles a single delivery on the worker that received it: looks up the
//! handler registered for the routing key, runs it, then applies the
//! acknowledgment policy. Deliveries without a handler are dropped, and
//! acknowledged in manual-ack mode so the broker does not redeliver them.

use crate::{
    channel::BrokerChannel, config::AckPolicy, dispatcher::CallbackRegistry,
    errors::AmqpError, otel,
};
use lapin::types::{AMQPValue, ShortString};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::{debug, error, warn};

/// An inbound message, alive for the duration of one dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub headers: BTreeMap<ShortString, AMQPValue>,
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, routing_key: &str, body: impl Into<Vec<u8>>) -> Self {
        Delivery {
            delivery_tag,
            routing_key: routing_key.to_owned(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// Body decoded as UTF-8, invalid sequences replaced.
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Delivery {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            headers: delivery
                .properties
                .headers()
                .as_ref()
                .map(|headers| headers.inner().clone())
                .unwrap_or_default(),
            body: delivery.data,
        }
    }
}

/// How a worker settles deliveries with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AckMode {
    pub(crate) auto_ack: bool,
    pub(crate) policy: AckPolicy,
}

/// Dispatches one delivery and settles it.
///
/// Handler failures never propagate; only broker errors while acking or
/// nacking are returned.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    delivery: &Delivery,
    registry: &CallbackRegistry,
    channel: &dyn BrokerChannel,
    mode: AckMode,
) -> Result<(), AmqpError> {
    let (ctx, mut span) = otel::new_span(&delivery.headers, tracer, &delivery.routing_key);
    let body = delivery.body_str();

    debug!(
        routing_key = delivery.routing_key.as_str(),
        body = &*body,
        "message arrived"
    );

    let handled = match registry.get(&delivery.routing_key) {
        Some(handler) => match handler.exec(&ctx, &delivery.routing_key, &body).await {
            Ok(()) => {
                span.set_status(Status::Ok);
                true
            }
            Err(err) => {
                error!(
                    error = err.to_string(),
                    routing_key = delivery.routing_key.as_str(),
                    "handler failure"
                );
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from(err.to_string()),
                });
                false
            }
        },
        None => {
            warn!(
                routing_key = delivery.routing_key.as_str(),
                "no registered handler available, dropping message"
            );
            span.set_status(Status::Error {
                description: Cow::from("unsupported routing key"),
            });
            true
        }
    };

    if mode.auto_ack {
        return Ok(());
    }

    if !handled && mode.policy == AckPolicy::OnSuccess {
        warn!(
            delivery_tag = delivery.delivery_tag,
            "requeuing message after handler failure"
        );
        return channel
            .basic_nack(delivery.delivery_tag, true)
            .await
            .inspect_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                span.record_error(err);
            });
    }

    channel
        .basic_ack(delivery.delivery_tag)
        .await
        .inspect_err(|err| {
            error!(error = err.to_string(), "error whiling ack msg");
            span.record_error(err);
            span.set_status(Status::Error {
                description: Cow::from("error to ack msg"),
            });
        })
}
