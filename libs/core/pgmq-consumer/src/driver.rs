//! Queue backend capability
//!
//! The consumer never talks to a queue directly; it goes through a
//! `QueueDriver`. Leased-read and atomic-pop backends are both expressed
//! through this one trait.

use crate::error::ConsumerError;
use crate::message::{Message, Payload};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Operations a queue backend must provide.
///
/// Implementations are shared between the poller and every worker, so they
/// must be safe for concurrent use.
///
/// # Example
///
/// ```rust,ignore
/// use pgmq_consumer::{QueueDriver, Message, Payload, ConsumerError};
///
/// struct MyDriver { /* connection pool */ }
///
/// #[async_trait]
/// impl QueueDriver for MyDriver {
///     async fn send(&self, queue_name: &str, payload: &Payload) -> Result<(), ConsumerError> { /* ... */ }
///     async fn get(&self, queue_name: &str, visibility_time: u64, max_batch: usize) -> Result<Vec<Message>, ConsumerError> { /* ... */ }
///     async fn pop(&self, queue_name: &str) -> Result<Vec<Message>, ConsumerError> { /* ... */ }
///     async fn delete(&self, queue_name: &str, msg_id: i64) -> Result<(), ConsumerError> { /* ... */ }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Enqueue a new message.
    async fn send(&self, queue_name: &str, payload: &Payload) -> Result<(), ConsumerError>;

    /// Lease up to `max_batch` messages for `visibility_time` seconds.
    async fn get(
        &self,
        queue_name: &str,
        visibility_time: u64,
        max_batch: usize,
    ) -> Result<Vec<Message>, ConsumerError>;

    /// Atomically take and remove available messages.
    async fn pop(&self, queue_name: &str) -> Result<Vec<Message>, ConsumerError>;

    /// Permanently remove a message.
    async fn delete(&self, queue_name: &str, msg_id: i64) -> Result<(), ConsumerError>;
}

/// Enqueue every payload in order, stopping at the first failure.
///
/// Returns the number of messages sent.
pub async fn send_batch<I>(
    driver: &dyn QueueDriver,
    queue_name: &str,
    payloads: I,
) -> Result<usize, ConsumerError>
where
    I: IntoIterator<Item = Payload>,
{
    let mut sent = 0;
    for payload in payloads {
        driver.send(queue_name, &payload).await?;
        sent += 1;
    }

    debug!(queue = %queue_name, count = sent, "Sent batch");
    Ok(sent)
}

#[async_trait]
impl<T: QueueDriver + ?Sized> QueueDriver for Arc<T> {
    async fn send(&self, queue_name: &str, payload: &Payload) -> Result<(), ConsumerError> {
        (**self).send(queue_name, payload).await
    }

    async fn get(
        &self,
        queue_name: &str,
        visibility_time: u64,
        max_batch: usize,
    ) -> Result<Vec<Message>, ConsumerError> {
        (**self).get(queue_name, visibility_time, max_batch).await
    }

    async fn pop(&self, queue_name: &str) -> Result<Vec<Message>, ConsumerError> {
        (**self).pop(queue_name).await
    }

    async fn delete(&self, queue_name: &str, msg_id: i64) -> Result<(), ConsumerError> {
        (**self).delete(queue_name, msg_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(i: usize) -> Payload {
        let mut payload = Payload::new();
        payload.insert("message".into(), format!("Hello World {}", i).into());
        payload
    }

    #[tokio::test]
    async fn test_send_batch_in_order() {
        let mut driver = MockQueueDriver::new();
        let mut seq = mockall::Sequence::new();
        for i in 0..3 {
            let expected = payload(i);
            driver
                .expect_send()
                .withf(move |queue, p| queue == "subscriptions" && *p == expected)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }

        let sent = send_batch(&driver, "subscriptions", (0..3).map(payload))
            .await
            .unwrap();
        assert_eq!(sent, 3);
    }

    #[tokio::test]
    async fn test_send_batch_stops_on_error() {
        let mut driver = MockQueueDriver::new();
        driver
            .expect_send()
            .times(1)
            .returning(|_, _| Err(ConsumerError::driver("connection refused")));

        let err = send_batch(&driver, "subscriptions", (0..3).map(payload))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumerError::Driver(_)));
    }

    #[tokio::test]
    async fn test_arc_forwards_calls() {
        let mut driver = MockQueueDriver::new();
        driver
            .expect_delete()
            .withf(|queue, msg_id| queue == "subscriptions" && *msg_id == 1)
            .times(1)
            .returning(|_, _| Ok(()));

        let shared: Arc<dyn QueueDriver> = Arc::new(driver);
        shared.delete("subscriptions", 1).await.unwrap();
    }
}
