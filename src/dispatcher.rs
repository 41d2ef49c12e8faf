// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Callback Registry
//!
//! Maps routing keys to the handler that processes deliveries carrying that
//! key. One registry is shared by every worker of a subscriber. Workers only
//! read from it; registration normally happens before the subscriber starts
//! but is safe at any time and applies to the next delivery looked up.

use crate::handler::ConsumerHandler;
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::debug;

/// Routing key to handler mapping shared by all workers.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ConsumerHandler>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `routing_key`.
    ///
    /// The last registration for a key wins; the replaced handler, if any, is
    /// returned.
    pub fn register(
        &self,
        routing_key: &str,
        handler: Arc<dyn ConsumerHandler>,
    ) -> Option<Arc<dyn ConsumerHandler>> {
        debug!(routing_key, "registering handler");

        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(routing_key.to_owned(), handler)
    }

    /// Returns the handler registered for `routing_key`.
    ///
    /// The lock is released before the caller invokes the handler.
    pub fn get(&self, routing_key: &str) -> Option<Arc<dyn ConsumerHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(routing_key)
            .cloned()
    }

    pub fn contains(&self, routing_key: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(routing_key)
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered routing keys, sorted.
    pub fn routing_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("routing_keys", &self.routing_keys())
            .finish()
    }
}
