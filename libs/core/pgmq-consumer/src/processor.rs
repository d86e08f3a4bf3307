//! Per-message processing.
//!
//! Each message is processed under a deadline of one visibility time. The
//! deadline is advisory: when it fires the message is marked aborted and an
//! `abort-error` event is emitted, but a running handler is not interrupted.
//! Only the delete/notify step after the handler is skipped.

use crate::config::{ConsumerMode, ConsumerOptions};
use crate::driver::QueueDriver;
use crate::error::ConsumerError;
use crate::event::ConsumerEvent;
use crate::handler::MessageHandler;
use crate::message::Message;
use crate::metrics::ConsumerMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Abort timer armed for one message.
///
/// Dropping (or stopping) it disarms the timer.
pub(crate) struct Deadline {
    expires_at: Instant,
    cancelled: Arc<AtomicBool>,
    timer: JoinHandle<()>,
}

impl Deadline {
    /// Arm a timer that marks the message aborted after `timeout`.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn arm(
        timeout: Duration,
        message: &Message,
        options: &Arc<ConsumerOptions>,
        metrics: &ConsumerMetrics,
    ) -> Self {
        let expires_at = Instant::now() + timeout;
        let cancelled = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&cancelled);
        let options = Arc::clone(options);
        let metrics = metrics.clone();
        let message = message.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            flag.store(true, Ordering::SeqCst);

            warn!(
                queue = %options.queue_name,
                msg_id = message.msg_id,
                timeout_secs = timeout.as_secs(),
                "Message processing exceeded visibility time"
            );
            metrics.message_aborted();

            let error = ConsumerError::DeadlineExceeded(timeout.as_secs());
            options
                .listeners
                .notify(ConsumerEvent::AbortError, &message, Some(&error));
        });

        Self {
            expires_at,
            cancelled,
            timer,
        }
    }

    /// Whether the timer already fired
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Time left before the timer fires
    pub(crate) fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Disarm the timer
    pub(crate) fn stop(self) {
        drop(self);
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Runs one message through the DLQ or handler path.
pub(crate) struct MessageProcessor {
    handler: Arc<dyn MessageHandler>,
    driver: Arc<dyn QueueDriver>,
    options: Arc<ConsumerOptions>,
    metrics: ConsumerMetrics,
}

impl MessageProcessor {
    pub(crate) fn new(
        handler: Arc<dyn MessageHandler>,
        driver: Arc<dyn QueueDriver>,
        options: Arc<ConsumerOptions>,
    ) -> Self {
        let metrics = ConsumerMetrics::new(&options.queue_name, handler.name());
        Self {
            handler,
            driver,
            options,
            metrics,
        }
    }

    pub(crate) fn metrics(&self) -> &ConsumerMetrics {
        &self.metrics
    }

    /// Process a single message to completion.
    pub(crate) async fn process(&self, message: Message) {
        let deadline = Deadline::arm(
            self.options.visibility_timeout(),
            &message,
            &self.options,
            &self.metrics,
        );

        match self.options.dlq() {
            Some(dlq) if self.options.should_dead_letter(&message) => {
                self.send_to_dlq(&message, dlq, &deadline).await;
            }
            _ => self.handle(&message, &deadline).await,
        }

        deadline.stop();
    }

    /// Normal path: run the handler, delete on success.
    async fn handle(&self, message: &Message, deadline: &Deadline) {
        if deadline.is_cancelled() {
            debug!(msg_id = message.msg_id, "Deadline already exceeded, skipping handler");
            return;
        }

        debug!(
            queue = %self.options.queue_name,
            msg_id = message.msg_id,
            read_ct = message.read_ct,
            remaining_ms = deadline.remaining().as_millis() as u64,
            "Processing message"
        );

        let start = std::time::Instant::now();
        match self.handler.handle(&message.message).await {
            Ok(()) => {
                if deadline.is_cancelled() {
                    warn!(
                        msg_id = message.msg_id,
                        "Handler finished after deadline, leaving message for redelivery"
                    );
                    return;
                }

                match self.remove(message).await {
                    Ok(()) => {
                        self.metrics.message_finished(start.elapsed());
                        debug!(
                            msg_id = message.msg_id,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Message processed"
                        );
                        self.notify(ConsumerEvent::Finish, message, None);
                    }
                    Err(e) => {
                        error!(msg_id = message.msg_id, error = %e, "Failed to delete message");
                        self.metrics.message_failed();
                        self.notify(ConsumerEvent::Error, message, Some(&e));
                    }
                }
            }
            Err(e) => {
                warn!(
                    queue = %self.options.queue_name,
                    msg_id = message.msg_id,
                    read_ct = message.read_ct,
                    error = %e,
                    "Handler failed, message left for redelivery"
                );
                self.metrics.message_failed();
                self.notify(ConsumerEvent::Error, message, Some(&e));
            }
        }
    }

    /// DLQ path: forward the payload, then delete the source message.
    async fn send_to_dlq(&self, message: &Message, dlq: &str, deadline: &Deadline) {
        if deadline.is_cancelled() {
            warn!(msg_id = message.msg_id, "Timeout processing message, skipping DLQ send");
            return;
        }

        if let Err(e) = self.driver.send(dlq, &message.message).await {
            error!(
                msg_id = message.msg_id,
                dlq = %dlq,
                error = %e,
                "Failed to send message to DLQ"
            );
            self.metrics.message_failed();
            self.notify(ConsumerEvent::Error, message, Some(&e));
            return;
        }

        if deadline.is_cancelled() {
            warn!(
                msg_id = message.msg_id,
                "Deadline exceeded after DLQ send, leaving source message"
            );
            return;
        }

        match self.remove(message).await {
            Ok(()) => {
                info!(
                    queue = %self.options.queue_name,
                    dlq = %dlq,
                    msg_id = message.msg_id,
                    read_ct = message.read_ct,
                    "Moved message to DLQ"
                );
                self.metrics.message_dead_lettered();
                self.notify(ConsumerEvent::SendToDlq, message, None);
            }
            Err(e) => {
                error!(
                    msg_id = message.msg_id,
                    error = %e,
                    "Failed to delete message after DLQ send"
                );
                self.metrics.message_failed();
                self.notify(ConsumerEvent::Error, message, Some(&e));
            }
        }
    }

    /// Acknowledge a message. Popped messages are already gone.
    async fn remove(&self, message: &Message) -> Result<(), ConsumerError> {
        match self.options.mode {
            ConsumerMode::Pop => Ok(()),
            ConsumerMode::Read => {
                self.driver
                    .delete(&self.options.queue_name, message.msg_id)
                    .await
            }
        }
    }

    fn notify(&self, event: ConsumerEvent, message: &Message, error: Option<&ConsumerError>) {
        self.options.listeners.notify(event, message, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockQueueDriver;
    use crate::handler::{async_handler_fn, handler_fn};
    use crate::message::Payload;
    use serde_json::json;
    use std::sync::Mutex;

    type Recorded = Arc<Mutex<Vec<(ConsumerEvent, i64, Option<String>)>>>;

    fn message(msg_id: i64, read_ct: i64) -> Message {
        let payload = json!({"msg": "hi"}).as_object().cloned().unwrap();
        Message::new(msg_id, payload).with_read_ct(read_ct)
    }

    fn recording(options: ConsumerOptions) -> (Arc<ConsumerOptions>, Recorded) {
        let events: Recorded = Arc::new(Mutex::new(Vec::new()));
        let mut options = options;
        for event in ConsumerEvent::all() {
            let sink = Arc::clone(&events);
            options = options.with_listener(event, move |msg, err| {
                sink.lock()
                    .unwrap()
                    .push((event, msg.msg_id, err.map(|e| e.to_string())));
            });
        }
        (Arc::new(options), events)
    }

    fn ok_handler() -> Arc<dyn MessageHandler> {
        Arc::new(handler_fn(|_: &Payload| Ok::<_, ConsumerError>(())))
    }

    #[tokio::test]
    async fn test_read_mode_success_deletes_and_finishes() {
        let mut driver = MockQueueDriver::new();
        driver
            .expect_delete()
            .withf(|queue, msg_id| queue == "subscriptions" && *msg_id == 1)
            .times(1)
            .returning(|_, _| Ok(()));

        let (options, events) =
            recording(ConsumerOptions::new("subscriptions", ConsumerMode::Read));
        let processor = MessageProcessor::new(ok_handler(), Arc::new(driver), options);

        processor.process(message(1, 1)).await;

        let events = events.lock().unwrap();
        assert_eq!(events.as_slice(), &[(ConsumerEvent::Finish, 1, None)]);
    }

    #[tokio::test]
    async fn test_read_mode_handler_error_keeps_message() {
        let mut driver = MockQueueDriver::new();
        driver.expect_delete().never();

        let (options, events) =
            recording(ConsumerOptions::new("subscriptions", ConsumerMode::Read));
        let handler = Arc::new(handler_fn(|_: &Payload| Err("error processing message")));
        let processor = MessageProcessor::new(handler, Arc::new(driver), options);

        processor.process(message(1, 1)).await;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, ConsumerEvent::Error);
        assert_eq!(
            events[0].2.as_deref(),
            Some("Handler error: error processing message")
        );
    }

    #[tokio::test]
    async fn test_pop_mode_never_deletes() {
        let mut driver = MockQueueDriver::new();
        driver.expect_delete().never();

        let (options, events) = recording(ConsumerOptions::new("subscriptions", ConsumerMode::Pop));
        let processor = MessageProcessor::new(ok_handler(), Arc::new(driver), options.clone());
        processor.process(message(1, 1)).await;

        let failing = Arc::new(handler_fn(|_: &Payload| Err("boom")));
        let mut driver = MockQueueDriver::new();
        driver.expect_delete().never();
        let processor = MessageProcessor::new(failing, Arc::new(driver), options);
        processor.process(message(2, 1)).await;

        let events = events.lock().unwrap();
        assert_eq!(events[0], (ConsumerEvent::Finish, 1, None));
        assert_eq!(events[1].0, ConsumerEvent::Error);
    }

    #[tokio::test]
    async fn test_delete_failure_reports_error() {
        let mut driver = MockQueueDriver::new();
        driver
            .expect_delete()
            .times(1)
            .returning(|_, _| Err(ConsumerError::driver("connection reset")));

        let (options, events) =
            recording(ConsumerOptions::new("subscriptions", ConsumerMode::Read));
        let processor = MessageProcessor::new(ok_handler(), Arc::new(driver), options);

        processor.process(message(1, 1)).await;

        let events = events.lock().unwrap();
        assert_eq!(
            events.as_slice(),
            &[(
                ConsumerEvent::Error,
                1,
                Some("Driver error: connection reset".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn test_exceeded_retries_goes_to_dlq() {
        let mut driver = MockQueueDriver::new();
        let mut seq = mockall::Sequence::new();
        driver
            .expect_send()
            .withf(|queue, payload| queue == "subscriptions_dlq" && payload["msg"] == "hi")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        driver
            .expect_delete()
            .withf(|queue, msg_id| queue == "subscriptions" && *msg_id == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let (options, events) = recording(
            ConsumerOptions::new("subscriptions", ConsumerMode::Read)
                .with_dlq("subscriptions_dlq", 2),
        );
        let handler = Arc::new(handler_fn(|_: &Payload| -> Result<(), ConsumerError> {
            panic!("handler must not run for dead-lettered messages")
        }));
        let processor = MessageProcessor::new(handler, Arc::new(driver), options);

        processor.process(message(1, 3)).await;

        let events = events.lock().unwrap();
        assert_eq!(events.as_slice(), &[(ConsumerEvent::SendToDlq, 1, None)]);
    }

    #[tokio::test]
    async fn test_pop_mode_dlq_skips_delete() {
        let mut driver = MockQueueDriver::new();
        driver
            .expect_send()
            .withf(|queue, payload| queue == "subscriptions_dlq" && payload["msg"] == "hi")
            .times(1)
            .returning(|_, _| Ok(()));
        driver.expect_delete().never();

        let (options, events) = recording(
            ConsumerOptions::new("subscriptions", ConsumerMode::Pop)
                .with_dlq("subscriptions_dlq", 2),
        );
        let handler = Arc::new(handler_fn(|_: &Payload| -> Result<(), ConsumerError> {
            panic!("handler must not run for dead-lettered messages")
        }));
        let processor = MessageProcessor::new(handler, Arc::new(driver), options);

        processor.process(message(1, 3)).await;

        let events = events.lock().unwrap();
        assert_eq!(events.as_slice(), &[(ConsumerEvent::SendToDlq, 1, None)]);
    }

    #[tokio::test]
    async fn test_below_threshold_uses_handler() {
        let mut driver = MockQueueDriver::new();
        driver.expect_send().never();
        driver.expect_delete().times(1).returning(|_, _| Ok(()));

        let (options, events) = recording(
            ConsumerOptions::new("subscriptions", ConsumerMode::Read)
                .with_dlq("subscriptions_dlq", 2),
        );
        let processor = MessageProcessor::new(ok_handler(), Arc::new(driver), options);

        processor.process(message(1, 2)).await;

        assert_eq!(events.lock().unwrap()[0].0, ConsumerEvent::Finish);
    }

    #[tokio::test]
    async fn test_dlq_send_failure_keeps_message() {
        let mut driver = MockQueueDriver::new();
        driver
            .expect_send()
            .times(1)
            .returning(|_, _| Err(ConsumerError::driver("queue does not exist")));
        driver.expect_delete().never();

        let (options, events) = recording(
            ConsumerOptions::new("subscriptions", ConsumerMode::Read)
                .with_dlq("subscriptions_dlq", 2),
        );
        let processor = MessageProcessor::new(ok_handler(), Arc::new(driver), options);

        processor.process(message(1, 3)).await;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, ConsumerEvent::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_is_aborted() {
        let mut driver = MockQueueDriver::new();
        driver.expect_delete().never();

        let (options, events) = recording(
            ConsumerOptions::new("subscriptions", ConsumerMode::Read).with_visibility_time(1),
        );
        let handler = Arc::new(async_handler_fn(|_: Payload| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(())
        }));
        let processor = MessageProcessor::new(handler, Arc::new(driver), options);

        processor.process(message(1, 1)).await;

        let events = events.lock().unwrap();
        assert_eq!(
            events.as_slice(),
            &[(
                ConsumerEvent::AbortError,
                1,
                Some("Deadline exceeded after 1s".to_string())
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_handler_disarms_timer() {
        let mut driver = MockQueueDriver::new();
        driver.expect_delete().times(1).returning(|_, _| Ok(()));

        let (options, events) = recording(
            ConsumerOptions::new("subscriptions", ConsumerMode::Read).with_visibility_time(1),
        );
        let processor = MessageProcessor::new(ok_handler(), Arc::new(driver), options);

        processor.process(message(1, 1)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let events = events.lock().unwrap();
        assert_eq!(events.as_slice(), &[(ConsumerEvent::Finish, 1, None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_remaining() {
        let options = Arc::new(ConsumerOptions::new("subscriptions", ConsumerMode::Read));
        let metrics = ConsumerMetrics::new("subscriptions", "test");
        let deadline = Deadline::arm(Duration::from_secs(10), &message(1, 1), &options, &metrics);

        assert!(!deadline.is_cancelled());
        assert_eq!(deadline.remaining(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(deadline.is_cancelled());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
