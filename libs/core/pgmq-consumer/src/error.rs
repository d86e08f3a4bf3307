//! Consumer error types
//!
//! A single error enum covers the whole lifecycle:
//! - **Construction**: invalid mode or options, reported by `Consumer::new`
//! - **Runtime**: driver, handler and deadline failures, reported through events

use thiserror::Error;

/// Boxed error type accepted from user handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Consumer errors
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Consumer mode is neither `read` nor `pop`
    #[error("ConsumerMode must be 'pop' or 'read', got '{0}'")]
    InvalidMode(String),

    /// Options failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue backend failure (fetch, send or delete)
    #[error("Driver error: {0}")]
    Driver(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The user handler returned an error
    #[error("Handler error: {0}")]
    Handler(#[source] BoxError),

    /// The per-message visibility budget elapsed before processing finished
    #[error("Deadline exceeded after {0}s")]
    DeadlineExceeded(u64),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

impl ConsumerError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        ConsumerError::Config(message.into())
    }

    /// Create a driver error
    pub fn driver(message: impl Into<String>) -> Self {
        ConsumerError::Driver(message.into())
    }

    /// Wrap any error returned by a handler
    pub fn handler(error: impl Into<BoxError>) -> Self {
        ConsumerError::Handler(error.into())
    }

    /// Whether this error was raised while validating options
    pub fn is_validation(&self) -> bool {
        matches!(self, ConsumerError::InvalidMode(_) | ConsumerError::Config(_))
    }

    /// Whether this error is a deadline expiry
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ConsumerError::DeadlineExceeded(_))
    }
}

impl From<serde_json::Error> for ConsumerError {
    fn from(err: serde_json::Error) -> Self {
        ConsumerError::Serialization(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for ConsumerError {
    fn from(err: sqlx::Error) -> Self {
        ConsumerError::Driver(err.to_string())
    }
}

#[cfg(feature = "supabase")]
impl From<reqwest::Error> for ConsumerError {
    fn from(err: reqwest::Error) -> Self {
        ConsumerError::Driver(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors() {
        assert!(ConsumerError::InvalidMode("test".into()).is_validation());
        assert!(ConsumerError::config("bad").is_validation());
        assert!(!ConsumerError::driver("down").is_validation());
    }

    #[test]
    fn test_handler_error_keeps_source() {
        let err = ConsumerError::handler("error processing message");
        assert_eq!(err.to_string(), "Handler error: error processing message");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_deadline_exceeded() {
        let err = ConsumerError::DeadlineExceeded(30);
        assert!(err.is_deadline_exceeded());
        assert_eq!(err.to_string(), "Deadline exceeded after 30s");
    }

    #[test]
    fn test_from_serde_json() {
        let err: ConsumerError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ConsumerError::Serialization(_)));
    }
}
