// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! The subscriber declares exactly one topic exchange per worker bootstrap.
//! This module describes that exchange and converts it into the lapin declare
//! arguments.

use lapin::{options::ExchangeDeclareOptions, types::FieldTable, ExchangeKind};

/// Definition of the topic exchange a subscriber consumes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
}

impl ExchangeDefinition {
    /// Creates a non-durable topic exchange definition.
    ///
    /// # Parameters
    /// * `name` - The exchange name
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            durable: false,
        }
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Subscriber exchanges always route by topic pattern.
    pub(crate) fn kind(&self) -> ExchangeKind {
        ExchangeKind::Topic
    }

    pub(crate) fn options(&self) -> ExchangeDeclareOptions {
        ExchangeDeclareOptions {
            passive: false,
            durable: self.durable,
            auto_delete: false,
            internal: false,
            nowait: false,
        }
    }

    pub(crate) fn arguments(&self) -> FieldTable {
        FieldTable::default()
    }
}
