//! Lifecycle event notification
//!
//! The consumer reports per-message outcomes through four events. Callbacks
//! are optional and run synchronously on the worker that produced the event,
//! so a slow callback slows that worker down.

use crate::error::ConsumerError;
use crate::message::Message;
use std::fmt;
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Lifecycle events emitted per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, AsRefStr, IntoStaticStr, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum ConsumerEvent {
    /// Handler succeeded and the message was deleted.
    Finish,
    /// Handler (or a driver call) failed; the message is left for redelivery.
    Error,
    /// The visibility budget elapsed before the message was done.
    AbortError,
    /// The message exceeded the retry threshold and was moved to the DLQ.
    SendToDlq,
}

impl ConsumerEvent {
    /// Get all event variants.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}

/// Event callback: the message and, for failure events, the error.
pub type EventListener = Arc<dyn Fn(&Message, Option<&ConsumerError>) + Send + Sync>;

/// One optional callback slot per event.
#[derive(Clone, Default)]
pub struct EventListeners {
    finish: Option<EventListener>,
    error: Option<EventListener>,
    abort_error: Option<EventListener>,
    send_to_dlq: Option<EventListener>,
}

impl EventListeners {
    /// Create an empty listener table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback, replacing any previous one for the same event
    pub fn on<F>(mut self, event: ConsumerEvent, listener: F) -> Self
    where
        F: Fn(&Message, Option<&ConsumerError>) + Send + Sync + 'static,
    {
        *self.slot_mut(event) = Some(Arc::new(listener));
        self
    }

    /// Whether a callback is registered for the event
    pub fn is_registered(&self, event: ConsumerEvent) -> bool {
        self.slot(event).is_some()
    }

    /// Invoke the callback for the event, if any
    pub fn notify(&self, event: ConsumerEvent, message: &Message, error: Option<&ConsumerError>) {
        if let Some(listener) = self.slot(event) {
            listener(message, error);
        }
    }

    fn slot(&self, event: ConsumerEvent) -> &Option<EventListener> {
        match event {
            ConsumerEvent::Finish => &self.finish,
            ConsumerEvent::Error => &self.error,
            ConsumerEvent::AbortError => &self.abort_error,
            ConsumerEvent::SendToDlq => &self.send_to_dlq,
        }
    }

    fn slot_mut(&mut self, event: ConsumerEvent) -> &mut Option<EventListener> {
        match event {
            ConsumerEvent::Finish => &mut self.finish,
            ConsumerEvent::Error => &mut self.error,
            ConsumerEvent::AbortError => &mut self.abort_error,
            ConsumerEvent::SendToDlq => &mut self.send_to_dlq,
        }
    }
}

impl fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<&'static str> = ConsumerEvent::all()
            .filter(|e| self.is_registered(*e))
            .map(|e| -> &'static str { e.into() })
            .collect();
        f.debug_struct("EventListeners")
            .field("registered", &registered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn message() -> Message {
        Message::new(7, serde_json::Map::new())
    }

    #[test]
    fn test_event_names() {
        assert_eq!(ConsumerEvent::Finish.to_string(), "finish");
        assert_eq!(ConsumerEvent::Error.as_ref(), "error");
        assert_eq!(ConsumerEvent::AbortError.to_string(), "abort-error");
        assert_eq!(ConsumerEvent::SendToDlq.to_string(), "send-to-dlq");

        let event: ConsumerEvent = "send-to-dlq".parse().unwrap();
        assert_eq!(event, ConsumerEvent::SendToDlq);
        assert!("sent-to-dlq".parse::<ConsumerEvent>().is_err());
    }

    #[test]
    fn test_notify_registered_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listeners = EventListeners::new().on(ConsumerEvent::Error, move |msg, err| {
            sink.lock()
                .unwrap()
                .push((msg.msg_id, err.map(|e| e.to_string())));
        });

        let err = ConsumerError::driver("boom");
        listeners.notify(ConsumerEvent::Error, &message(), Some(&err));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (7, Some("Driver error: boom".to_string())));
    }

    #[test]
    fn test_notify_without_listener_is_noop() {
        let listeners = EventListeners::new();
        for event in ConsumerEvent::all() {
            assert!(!listeners.is_registered(event));
            listeners.notify(event, &message(), None);
        }
    }

    #[test]
    fn test_debug_lists_registered_events() {
        let listeners = EventListeners::new().on(ConsumerEvent::Finish, |_, _| {});
        assert_eq!(
            format!("{:?}", listeners),
            "EventListeners { registered: [\"finish\"] }"
        );
    }
}
