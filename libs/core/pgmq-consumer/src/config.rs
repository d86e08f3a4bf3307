//! Consumer configuration
//!
//! This module provides `ConsumerMode` and `ConsumerOptions`, the validated
//! configuration the consumer is built from.

use crate::error::ConsumerError;
use crate::event::{ConsumerEvent, EventListeners};
use crate::message::Message;
use std::str::FromStr;
use std::time::Duration;
use strum::{AsRefStr, Display};

/// How messages are taken from the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ConsumerMode {
    /// Lease messages for the visibility time; they must be deleted explicitly.
    Read,
    /// Atomically take messages; nothing is left to delete.
    Pop,
}

impl FromStr for ConsumerMode {
    type Err = ConsumerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(ConsumerMode::Read),
            "pop" => Ok(ConsumerMode::Pop),
            other => Err(ConsumerError::InvalidMode(other.to_string())),
        }
    }
}

/// Configuration for the consumer
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Queue to consume from
    pub queue_name: String,

    /// Read (leased) or pop (atomic take)
    pub mode: ConsumerMode,

    /// Visibility time in seconds; also the per-message processing budget
    pub visibility_time: u64,

    /// Number of workers, batch size and channel capacity
    pub pool_size: usize,

    /// Wait between empty polls in milliseconds (continuous polling only)
    pub polling_interval_ms: u64,

    /// Keep polling after the first batch
    pub polling_enabled: bool,

    /// Dead letter queue name
    pub dlq_queue_name: Option<String>,

    /// Deliveries allowed before a message is routed to the DLQ
    pub retries_before_dlq: i64,

    /// Event callbacks
    pub listeners: EventListeners,
}

impl ConsumerOptions {
    /// Create options with defaults for the given queue
    pub fn new(queue_name: impl Into<String>, mode: ConsumerMode) -> Self {
        Self {
            queue_name: queue_name.into(),
            mode,
            visibility_time: 30,
            pool_size: 1,
            polling_interval_ms: 1000,
            polling_enabled: true,
            dlq_queue_name: None,
            retries_before_dlq: 0,
            listeners: EventListeners::new(),
        }
    }

    /// Set the visibility time in seconds
    pub fn with_visibility_time(mut self, seconds: u64) -> Self {
        self.visibility_time = seconds;
        self
    }

    /// Set the pool size
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the wait between empty polls
    pub fn with_polling_interval_ms(mut self, interval: u64) -> Self {
        self.polling_interval_ms = interval;
        self
    }

    /// Enable or disable continuous polling
    pub fn with_polling(mut self, enabled: bool) -> Self {
        self.polling_enabled = enabled;
        self
    }

    /// Route messages delivered more than `retries` times to `queue_name`
    pub fn with_dlq(mut self, queue_name: impl Into<String>, retries: i64) -> Self {
        let queue_name = queue_name.into();
        self.dlq_queue_name = (!queue_name.is_empty()).then_some(queue_name);
        self.retries_before_dlq = retries;
        self
    }

    /// Register an event callback
    pub fn with_listener<F>(mut self, event: ConsumerEvent, listener: F) -> Self
    where
        F: Fn(&Message, Option<&ConsumerError>) + Send + Sync + 'static,
    {
        self.listeners = self.listeners.on(event, listener);
        self
    }

    /// Replace the whole listener table
    pub fn with_listeners(mut self, listeners: EventListeners) -> Self {
        self.listeners = listeners;
        self
    }

    /// Check the invariants the consumer relies on
    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.queue_name.is_empty() {
            return Err(ConsumerError::config("queue_name must not be empty"));
        }
        if self.pool_size == 0 {
            return Err(ConsumerError::config("pool_size must be at least 1"));
        }
        if self.visibility_time == 0 {
            return Err(ConsumerError::config("visibility_time must be at least 1 second"));
        }
        if self.dlq_queue_name.is_some() && self.retries_before_dlq <= 0 {
            return Err(ConsumerError::config(
                "retries_before_dlq must be set if dlq_queue_name is set",
            ));
        }
        Ok(())
    }

    /// Visibility time as a duration
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_time)
    }

    /// Wait between empty polls as a duration
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// DLQ queue name, if dead-lettering is active
    pub fn dlq(&self) -> Option<&str> {
        match &self.dlq_queue_name {
            Some(name) if self.retries_before_dlq > 0 => Some(name),
            _ => None,
        }
    }

    /// Whether the message must go to the DLQ instead of the handler
    pub fn should_dead_letter(&self, message: &Message) -> bool {
        self.dlq().is_some() && message.exceeded_retries(self.retries_before_dlq)
    }
}

#[cfg(feature = "config")]
impl core_config::FromEnv for ConsumerOptions {
    /// Requires CONSUMER_QUEUE_NAME; everything else has a default
    fn from_env() -> Result<Self, core_config::ConfigError> {
        use core_config::{env_or_default, env_parse, env_required, ConfigError};

        let mode_raw = env_or_default("CONSUMER_MODE", "read");
        let mode = mode_raw.parse().map_err(|e: ConsumerError| ConfigError::ParseError {
            key: "CONSUMER_MODE".to_string(),
            details: e.to_string(),
        })?;

        let mut options = Self::new(env_required("CONSUMER_QUEUE_NAME")?, mode)
            .with_visibility_time(env_parse("CONSUMER_VISIBILITY_TIME", 30)?)
            .with_pool_size(env_parse("CONSUMER_POOL_SIZE", 1)?)
            .with_polling_interval_ms(env_parse("CONSUMER_POLLING_INTERVAL_MS", 1000)?)
            .with_polling(env_parse("CONSUMER_POLLING_ENABLED", true)?);

        let dlq = env_or_default("CONSUMER_DLQ_QUEUE_NAME", "");
        if !dlq.is_empty() {
            options = options.with_dlq(dlq, env_parse("CONSUMER_RETRIES_BEFORE_DLQ", 0)?);
        }

        Ok(options)
    }
}
