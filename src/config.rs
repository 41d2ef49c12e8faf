// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscriber Configuration
//!
//! [`SubscriberConfig`] is the validated, immutable configuration shared by
//! every worker of a subscriber. It is built either directly with
//! [`SubscriberConfig::builder`] or from loosely typed [`SubscriberSettings`]
//! loaded from JSON or environment variables.

use crate::{errors::AmqpError, queue::random_queue_name};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Base reconnect wait used when none is configured.
pub const DEFAULT_RECONNECT_WAIT: Duration = Duration::from_secs(10);
/// Upper bound of the accumulated reconnect wait used when none is configured.
pub const DEFAULT_MAX_RECONNECT_WAIT: Duration = Duration::from_secs(300);
/// Consumer prefetch count.
pub const DEFAULT_PREFETCH_COUNT: u16 = 2;

/// When a delivery is acknowledged in manual-ack mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Ack after dispatch whatever the handler returned, and also when no
    /// handler is registered for the routing key.
    #[default]
    Always,
    /// Ack when the handler succeeded or no handler exists; nack with requeue
    /// when the handler failed.
    OnSuccess,
}

/// Validated subscriber configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberConfig {
    addr: String,
    exchange: String,
    routing_key: String,
    queue: String,
    pool_size: usize,
    auto_delete: bool,
    auto_ack: bool,
    reconnect_wait: Duration,
    max_reconnect_wait: Option<Duration>,
    prefetch_count: u16,
    ack_policy: AckPolicy,
}

impl SubscriberConfig {
    /// Starts a configuration for the broker at `addr` consuming `routing_key`
    /// from `exchange`.
    pub fn builder(addr: &str, exchange: &str, routing_key: &str) -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::new(addr, exchange, routing_key)
    }

    /// AMQP URI of the broker.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Name of the topic exchange declared on every bootstrap.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Binding key, which may carry topic wildcards.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Queue shared by all workers. Never empty.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Number of workers. Always at least 1.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }

    /// When true the broker acknowledges deliveries on send and the workers
    /// never ack or nack.
    pub fn auto_ack(&self) -> bool {
        self.auto_ack
    }

    /// Base wait added to the carried backoff after each setup failure.
    pub fn reconnect_wait(&self) -> Duration {
        self.reconnect_wait
    }

    /// `None` means the accumulated wait grows without bound.
    pub fn max_reconnect_wait(&self) -> Option<Duration> {
        self.max_reconnect_wait
    }

    pub fn prefetch_count(&self) -> u16 {
        self.prefetch_count
    }

    /// How handler failures are settled in manual-ack mode.
    pub fn ack_policy(&self) -> AckPolicy {
        self.ack_policy
    }
}

/// Builder for [`SubscriberConfig`].
#[derive(Debug, Clone)]
pub struct SubscriberConfigBuilder {
    addr: String,
    exchange: String,
    routing_key: String,
    queue: Option<String>,
    pool_size: usize,
    auto_delete: bool,
    auto_ack: bool,
    reconnect_wait: Duration,
    /// `None` until a cap is set explicitly.
    max_reconnect_wait: Option<Option<Duration>>,
    prefetch_count: u16,
    ack_policy: AckPolicy,
}

impl SubscriberConfigBuilder {
    fn new(addr: &str, exchange: &str, routing_key: &str) -> Self {
        Self {
            addr: addr.to_owned(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            queue: None,
            pool_size: 1,
            auto_delete: false,
            auto_ack: true,
            reconnect_wait: DEFAULT_RECONNECT_WAIT,
            max_reconnect_wait: None,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            ack_policy: AckPolicy::default(),
        }
    }

    /// Sets the queue name. An empty name means "generate one".
    pub fn queue(mut self, queue: &str) -> Self {
        self.queue = Some(queue.to_owned());
        self
    }

    /// Sets the number of workers. Defaults to 1.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    /// Defaults to true.
    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    /// Base wait added after every failed setup attempt. Must be greater
    /// than zero.
    pub fn reconnect_wait(mut self, wait: Duration) -> Self {
        self.reconnect_wait = wait;
        self
    }

    /// Caps the accumulated wait. `None` disables the cap.
    ///
    /// When never called, the cap is [`DEFAULT_MAX_RECONNECT_WAIT`], raised to
    /// the base wait if that is larger.
    pub fn max_reconnect_wait(mut self, max: Option<Duration>) -> Self {
        self.max_reconnect_wait = Some(max);
        self
    }

    pub fn prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = count;
        self
    }

    pub fn ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    /// Validates the configuration and resolves an unset queue name to a
    /// random one.
    ///
    /// # Returns
    /// `AmqpError::InvalidConfig` when the address or exchange is empty, the
    /// pool is empty, the base wait is zero or the cap is below the base wait
    pub fn build(self) -> Result<SubscriberConfig, AmqpError> {
        if self.addr.is_empty() {
            return Err(AmqpError::InvalidConfig("broker address is empty".to_owned()));
        }
        if self.exchange.is_empty() {
            return Err(AmqpError::InvalidConfig("exchange name is empty".to_owned()));
        }
        if self.pool_size == 0 {
            return Err(AmqpError::InvalidConfig(
                "pool size must be at least 1".to_owned(),
            ));
        }
        if self.reconnect_wait.is_zero() {
            return Err(AmqpError::InvalidConfig(
                "reconnect wait must be greater than zero".to_owned(),
            ));
        }
        let max_reconnect_wait = match self.max_reconnect_wait {
            Some(Some(max)) if max < self.reconnect_wait => {
                return Err(AmqpError::InvalidConfig(format!(
                    "max reconnect wait {:?} is below the base wait {:?}",
                    max, self.reconnect_wait
                )));
            }
            Some(max) => max,
            None => Some(DEFAULT_MAX_RECONNECT_WAIT.max(self.reconnect_wait)),
        };

        let queue = match self.queue {
            Some(queue) if !queue.is_empty() => queue,
            _ => {
                let queue = random_queue_name();
                debug!(queue = queue.as_str(), "generated queue name");
                queue
            }
        };

        Ok(SubscriberConfig {
            addr: self.addr,
            exchange: self.exchange,
            routing_key: self.routing_key,
            queue,
            pool_size: self.pool_size,
            auto_delete: self.auto_delete,
            auto_ack: self.auto_ack,
            reconnect_wait: self.reconnect_wait,
            max_reconnect_wait,
            prefetch_count: self.prefetch_count,
            ack_policy: self.ack_policy,
        })
    }
}

/// Raw subscriber settings as found in configuration files or the
/// environment.
///
/// `reconnect` and `max_reconnect` are in seconds. A `reconnect` of 0 falls
/// back to [`DEFAULT_RECONNECT_WAIT`]. A `max_reconnect` of 0 disables the
/// cap, and an unset one uses the builder default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubscriberSettings {
    pub addr: String,
    pub exchange: String,
    pub route_key: String,
    pub queue: String,
    pub pool: usize,
    pub auto_delete: bool,
    pub auto_ack: bool,
    pub reconnect: u64,
    pub max_reconnect: Option<u64>,
    pub prefetch: u16,
    pub ack_policy: AckPolicy,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            addr: String::new(),
            exchange: String::new(),
            route_key: String::new(),
            queue: String::new(),
            pool: 1,
            auto_delete: false,
            auto_ack: true,
            reconnect: DEFAULT_RECONNECT_WAIT.as_secs(),
            max_reconnect: None,
            prefetch: DEFAULT_PREFETCH_COUNT,
            ack_policy: AckPolicy::default(),
        }
    }
}

impl SubscriberSettings {
    /// Parses settings from a JSON object. Missing keys take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, AmqpError> {
        serde_json::from_str(raw).map_err(|err| AmqpError::InvalidConfig(err.to_string()))
    }

    /// Reads `<PREFIX>_ADDR`, `<PREFIX>_EXCHANGE`, `<PREFIX>_ROUTE_KEY`,
    /// `<PREFIX>_QUEUE`, `<PREFIX>_POOL`, `<PREFIX>_AUTO_DELETE`,
    /// `<PREFIX>_AUTO_ACK`, `<PREFIX>_RECONNECT`, `<PREFIX>_MAX_RECONNECT`,
    /// `<PREFIX>_PREFETCH` and `<PREFIX>_ACK_POLICY` from the environment.
    pub fn from_env(prefix: &str) -> Result<Self, AmqpError> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Same as [`SubscriberSettings::from_env`] with a custom variable source.
    pub fn from_lookup<L>(prefix: &str, lookup: L) -> Result<Self, AmqpError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{prefix}_{name}"));
        let mut settings = Self::default();

        if let Some(v) = var("ADDR") {
            settings.addr = v;
        }
        if let Some(v) = var("EXCHANGE") {
            settings.exchange = v;
        }
        if let Some(v) = var("ROUTE_KEY") {
            settings.route_key = v;
        }
        if let Some(v) = var("QUEUE") {
            settings.queue = v;
        }
        if let Some(v) = var("POOL") {
            settings.pool = parse_var(prefix, "POOL", &v)?;
        }
        if let Some(v) = var("AUTO_DELETE") {
            settings.auto_delete = parse_var(prefix, "AUTO_DELETE", &v)?;
        }
        if let Some(v) = var("AUTO_ACK") {
            settings.auto_ack = parse_var(prefix, "AUTO_ACK", &v)?;
        }
        if let Some(v) = var("RECONNECT") {
            settings.reconnect = parse_var(prefix, "RECONNECT", &v)?;
        }
        if let Some(v) = var("MAX_RECONNECT") {
            settings.max_reconnect = Some(parse_var(prefix, "MAX_RECONNECT", &v)?);
        }
        if let Some(v) = var("PREFETCH") {
            settings.prefetch = parse_var(prefix, "PREFETCH", &v)?;
        }
        if let Some(v) = var("ACK_POLICY") {
            settings.ack_policy = match v.as_str() {
                "always" => AckPolicy::Always,
                "on_success" => AckPolicy::OnSuccess,
                _ => {
                    return Err(AmqpError::InvalidConfig(format!(
                        "{prefix}_ACK_POLICY: unknown policy `{v}`"
                    )))
                }
            };
        }

        Ok(settings)
    }
}

fn parse_var<T: std::str::FromStr>(prefix: &str, name: &str, raw: &str) -> Result<T, AmqpError> {
    raw.trim()
        .parse()
        .map_err(|_| AmqpError::InvalidConfig(format!("{prefix}_{name}: invalid value `{raw}`")))
}

impl TryFrom<SubscriberSettings> for SubscriberConfig {
    type Error = AmqpError;

    fn try_from(settings: SubscriberSettings) -> Result<Self, Self::Error> {
        let reconnect_wait = match settings.reconnect {
            0 => DEFAULT_RECONNECT_WAIT,
            secs => Duration::from_secs(secs),
        };

        let mut builder =
            SubscriberConfig::builder(&settings.addr, &settings.exchange, &settings.route_key)
                .queue(&settings.queue)
                .pool_size(settings.pool)
                .auto_delete(settings.auto_delete)
                .auto_ack(settings.auto_ack)
                .reconnect_wait(reconnect_wait)
                .prefetch_count(settings.prefetch)
                .ack_policy(settings.ack_policy);

        if let Some(secs) = settings.max_reconnect {
            builder = builder.max_reconnect_wait((secs > 0).then(|| Duration::from_secs(secs)));
        }

        builder.build()
    }
}
