//! User message handlers
//!
//! This module provides:
//! - `MessageHandler` trait for message processing logic
//! - `handler_fn` / `async_handler_fn` adapters for plain closures

use crate::error::{BoxError, ConsumerError};
use crate::message::Payload;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for message handlers.
///
/// Return `Ok(())` to have the message deleted, `Err` to leave it in the
/// queue for redelivery once its visibility time runs out.
///
/// # Example
///
/// ```rust,ignore
/// use pgmq_consumer::{MessageHandler, Payload, ConsumerError};
///
/// struct SubscriptionHandler {
///     billing: Arc<dyn BillingClient>,
/// }
///
/// #[async_trait]
/// impl MessageHandler for SubscriptionHandler {
///     async fn handle(&self, payload: &Payload) -> Result<(), ConsumerError> {
///         self.billing.activate(payload).await.map_err(ConsumerError::handler)
///     }
///
///     fn name(&self) -> &'static str {
///         "subscription_handler"
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message payload.
    async fn handle(&self, payload: &Payload) -> Result<(), ConsumerError>;

    /// Handler name for logging and metric labels.
    fn name(&self) -> &'static str {
        "handler"
    }
}

/// Handler built from a synchronous closure.
pub struct FnHandler<F> {
    f: F,
}

/// Wrap a synchronous closure as a `MessageHandler`.
pub fn handler_fn<F, E>(f: F) -> FnHandler<F>
where
    F: Fn(&Payload) -> Result<(), E> + Send + Sync,
    E: Into<BoxError>,
{
    FnHandler { f }
}

#[async_trait]
impl<F, E> MessageHandler for FnHandler<F>
where
    F: Fn(&Payload) -> Result<(), E> + Send + Sync,
    E: Into<BoxError>,
{
    async fn handle(&self, payload: &Payload) -> Result<(), ConsumerError> {
        (self.f)(payload).map_err(ConsumerError::handler)
    }

    fn name(&self) -> &'static str {
        "fn_handler"
    }
}

/// Handler built from a closure returning a future.
///
/// The closure receives its own copy of the payload.
pub struct AsyncFnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as a `MessageHandler`.
pub fn async_handler_fn<F, Fut>(f: F) -> AsyncFnHandler<F, Fut>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ConsumerError>> + Send,
{
    AsyncFnHandler {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for AsyncFnHandler<F, Fut>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ConsumerError>> + Send,
{
    async fn handle(&self, payload: &Payload) -> Result<(), ConsumerError> {
        (self.f)(payload.clone()).await
    }

    fn name(&self) -> &'static str {
        "async_fn_handler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Payload {
        json!({"msg": "hi"}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_handler_fn_success() {
        let handler = handler_fn(|p: &Payload| {
            assert_eq!(p["msg"], "hi");
            Ok::<_, BoxError>(())
        });

        assert!(handler.handle(&payload()).await.is_ok());
        assert_eq!(handler.name(), "fn_handler");
    }

    #[tokio::test]
    async fn test_handler_fn_error_is_wrapped() {
        let handler = handler_fn(|_: &Payload| Err("error processing message"));

        let err = handler.handle(&payload()).await.unwrap_err();
        assert!(matches!(err, ConsumerError::Handler(_)));
        assert!(err.to_string().contains("error processing message"));
    }

    #[tokio::test]
    async fn test_async_handler_fn() {
        let handler = async_handler_fn(|p: Payload| async move {
            if p.contains_key("msg") {
                Ok(())
            } else {
                Err(ConsumerError::handler("missing msg"))
            }
        });

        assert!(handler.handle(&payload()).await.is_ok());
        assert!(handler.handle(&Payload::new()).await.is_err());
    }
}
