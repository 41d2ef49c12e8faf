// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers
//!
//! A handler receives the routing key and the body of a delivery. It runs on
//! the worker task that received the delivery, so the worker reads nothing
//! else from the broker until the handler returns.

use crate::errors::HandlerError;
use async_trait::async_trait;
use opentelemetry::Context;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Processes deliveries for one routing key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    /// Handles one delivery.
    ///
    /// `ctx` carries the trace context extracted from the message headers.
    /// The returned result only gates acknowledgment when the subscriber is
    /// configured with [`AckPolicy::OnSuccess`](crate::config::AckPolicy).
    async fn exec(&self, ctx: &Context, routing_key: &str, body: &str)
        -> Result<(), HandlerError>;
}

/// Handler built from a plain `Fn(routing_key, body)` callback.
pub struct FnHandler<F> {
    f: F,
}

/// Wraps a callback that cannot fail.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&str, &str) + Send + Sync,
{
    FnHandler { f }
}

#[async_trait]
impl<F> ConsumerHandler for FnHandler<F>
where
    F: Fn(&str, &str) + Send + Sync,
{
    async fn exec(
        &self,
        _ctx: &Context,
        routing_key: &str,
        body: &str,
    ) -> Result<(), HandlerError> {
        (self.f)(routing_key, body);
        Ok(())
    }
}

/// Handler built from a fallible `Fn(routing_key, body)` callback.
pub struct TryFnHandler<F> {
    f: F,
}

pub fn try_handler_fn<F>(f: F) -> TryFnHandler<F>
where
    F: Fn(&str, &str) -> Result<(), HandlerError> + Send + Sync,
{
    TryFnHandler { f }
}

#[async_trait]
impl<F> ConsumerHandler for TryFnHandler<F>
where
    F: Fn(&str, &str) -> Result<(), HandlerError> + Send + Sync,
{
    async fn exec(
        &self,
        _ctx: &Context,
        routing_key: &str,
        body: &str,
    ) -> Result<(), HandlerError> {
        (self.f)(routing_key, body)
    }
}

/// Handler that decodes the body as JSON before calling `f`.
pub struct JsonHandler<T, F> {
    f: F,
    _payload: PhantomData<fn() -> T>,
}

pub fn json_handler<T, F>(f: F) -> JsonHandler<T, F>
where
    T: DeserializeOwned,
    F: Fn(&str, T) -> Result<(), HandlerError> + Send + Sync,
{
    JsonHandler {
        f,
        _payload: PhantomData,
    }
}

#[async_trait]
impl<T, F> ConsumerHandler for JsonHandler<T, F>
where
    T: DeserializeOwned,
    F: Fn(&str, T) -> Result<(), HandlerError> + Send + Sync,
{
    async fn exec(
        &self,
        _ctx: &Context,
        routing_key: &str,
        body: &str,
    ) -> Result<(), HandlerError> {
        let payload: T = serde_json::from_str(body)?;
        (self.f)(routing_key, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Deserialize, PartialEq)]
    struct OrderCreated {
        id: u32,
    }

    #[tokio::test]
    async fn fn_handler_passes_key_and_body() {
        let seen = Mutex::new(vec![]);
        let handler = handler_fn(|key, body| {
            seen.lock().unwrap().push(format!("{key}:{body}"));
        });

        handler
            .exec(&Context::new(), "order.created", "{}")
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["order.created:{}".to_owned()]);
    }

    #[tokio::test]
    async fn try_handler_surfaces_failure() {
        let handler = try_handler_fn(|_, _| Err("boom".into()));

        let result = handler.exec(&Context::new(), "k", "b").await;

        assert_eq!(result, Err(HandlerError::Failure("boom".to_owned())));
    }

    #[tokio::test]
    async fn json_handler_decodes_payload() {
        let seen = Mutex::new(None);
        let handler = json_handler(|_, order: OrderCreated| {
            *seen.lock().unwrap() = Some(order);
            Ok(())
        });

        handler
            .exec(&Context::new(), "order.created", r#"{"id":7}"#)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(OrderCreated { id: 7 }));
    }

    #[tokio::test]
    async fn json_handler_rejects_bad_payload() {
        let handler = json_handler(|_, _: OrderCreated| Ok(()));

        let result = handler.exec(&Context::new(), "order.created", "nope").await;

        assert!(matches!(result, Err(HandlerError::ParsePayloadError(_))));
    }
}
