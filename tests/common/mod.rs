// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Scripted in-memory broker used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};
use topic_subscriber::{
    exchange::ExchangeDefinition,
    handler_fn,
    queue::{QueueBinding, QueueDefinition},
    AmqpError, BrokerChannel, BrokerConnection, ConsumerHandler, Connector, Delivery,
    DeliveryStream,
};

/// What the broker does on one connection attempt.
#[derive(Debug, Clone)]
pub enum Attempt {
    DialFails,
    BindFails,
    /// Delivers the messages, then closes the stream.
    Consume(Vec<Delivery>),
    /// Delivers the messages, then keeps the stream open.
    ConsumeForever(Vec<Delivery>),
    /// Delivers whatever the test pushes through the sender returned by
    /// [`Attempt::fed`], until that sender is dropped.
    Fed(Arc<Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>>),
}

impl Attempt {
    pub fn fed() -> (Attempt, mpsc::UnboundedSender<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Attempt::Fed(Arc::new(Mutex::new(Some(rx)))), tx)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect(Instant),
    Closed,
    QueueDeclared(String),
    Consumed { queue: String, no_ack: bool },
    Acked(u64),
    Nacked(u64, bool),
    Handled(String, String),
}

pub struct FakeBroker {
    script: Mutex<VecDeque<Attempt>>,
    events: mpsc::UnboundedSender<Event>,
}

impl FakeBroker {
    /// Attempts past the end of `script` consume forever without messages.
    pub fn new(script: Vec<Attempt>) -> (Arc<FakeBroker>, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let broker = FakeBroker {
            script: Mutex::new(script.into()),
            events,
        };
        (Arc::new(broker), rx)
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.events.clone()
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Connector for FakeBroker {
    async fn connect(&self, _addr: &str) -> Result<Box<dyn BrokerConnection>, AmqpError> {
        self.emit(Event::Connect(Instant::now()));

        let attempt = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Attempt::ConsumeForever(vec![]));

        match attempt {
            Attempt::DialFails => Err(AmqpError::ConnectionError("connection refused".into())),
            attempt => Ok(Box::new(FakeConnection {
                attempt,
                events: self.sender(),
            })),
        }
    }
}

struct FakeConnection {
    attempt: Attempt,
    events: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        Ok(Arc::new(FakeChannel {
            attempt: self.attempt.clone(),
            events: self.events.clone(),
        }))
    }

    async fn close(&self) {
        let _ = self.events.send(Event::Closed);
    }
}

struct FakeChannel {
    attempt: Attempt,
    events: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    async fn exchange_declare(&self, _def: &ExchangeDefinition) -> Result<(), AmqpError> {
        Ok(())
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        let _ = self.events.send(Event::QueueDeclared(def.name().to_owned()));
        Ok(())
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        match self.attempt {
            Attempt::BindFails => Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange_name().to_owned(),
                binding.queue_name().to_owned(),
                "NOT_FOUND".to_owned(),
            )),
            _ => Ok(()),
        }
    }

    async fn basic_qos(&self, _prefetch_count: u16, _global: bool) -> Result<(), AmqpError> {
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
        no_ack: bool,
    ) -> Result<DeliveryStream, AmqpError> {
        let _ = self.events.send(Event::Consumed {
            queue: queue.to_owned(),
            no_ack,
        });

        Ok(match self.attempt.clone() {
            Attempt::Consume(deliveries) => stream::iter(deliveries.into_iter().map(Ok)).boxed(),
            Attempt::ConsumeForever(deliveries) => stream::iter(deliveries.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed(),
            Attempt::Fed(feed) => match feed.lock().unwrap().take() {
                Some(rx) => stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|delivery| (Ok(delivery), rx))
                })
                .boxed(),
                None => stream::pending().boxed(),
            },
            _ => stream::empty().boxed(),
        })
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        let _ = self.events.send(Event::Acked(delivery_tag));
        Ok(())
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        let _ = self.events.send(Event::Nacked(delivery_tag, requeue));
        Ok(())
    }
}

/// Handler reporting every invocation as [`Event::Handled`].
pub fn recording_handler(events: mpsc::UnboundedSender<Event>) -> impl ConsumerHandler {
    handler_fn(move |key, body| {
        let _ = events.send(Event::Handled(key.to_owned(), body.to_owned()));
    })
}

/// Next event, failing the test if none arrives within an hour of
/// (paused) time.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(3600), rx.recv())
        .await
        .expect("no broker event")
        .expect("broker dropped")
}

/// Collects the instants of the next `n` connection attempts.
pub async fn next_connects(rx: &mut mpsc::UnboundedReceiver<Event>, n: usize) -> Vec<Instant> {
    let mut connects = Vec::with_capacity(n);
    while connects.len() < n {
        if let Event::Connect(at) = next_event(rx).await {
            connects.push(at);
        }
    }
    connects
}

/// Drains the events already emitted.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = vec![];
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
