//! pgmq Consumer
//!
//! A polling consumer for pgmq-style message queues.
//!
//! ## Features
//!
//! - **Two fetch modes**: `read` leases messages for a visibility time and
//!   deletes them on success, `pop` removes them on fetch
//! - **Bounded worker pool**: a fixed number of workers fed through a channel
//!   sized to the pool, giving backpressure on the poller
//! - **Visibility deadline**: each message gets one visibility time before it
//!   is reported as aborted and left for redelivery
//! - **Dead Letter Queue**: messages read more often than the retry threshold
//!   are moved to a DLQ without running the handler
//! - **Lifecycle events**: `finish`, `error`, `abort-error`, `send-to-dlq`
//! - **Prometheus metrics**: built-in counters and histograms
//! - **Drivers**: `postgres` (pgmq extension over sqlx) and `supabase`
//!   (PostgREST RPC over reqwest) behind cargo features
//!
//! ## Example
//!
//! ```ignore
//! use pgmq_consumer::{Consumer, ConsumerEvent, ConsumerMode, ConsumerOptions, handler_fn, PgmqConfig};
//!
//! let driver = PgmqConfig::new("localhost", "postgres", "postgres", "postgres")
//!     .connect()
//!     .await?;
//!
//! let options = ConsumerOptions::new("subscriptions", ConsumerMode::Read)
//!     .with_pool_size(4)
//!     .with_dlq("subscriptions_dlq", 2)
//!     .with_listener(ConsumerEvent::Error, |msg, err| {
//!         tracing::warn!(msg_id = msg.msg_id, error = ?err, "failed");
//!     });
//!
//! let consumer = Consumer::new(handler_fn(|payload: &Payload| handle(payload)), options, Arc::new(driver))?;
//! consumer.run(shutdown_rx).await?;
//! ```

mod config;
mod consumer;
mod driver;
mod error;
mod event;
mod handler;
mod message;
pub mod metrics;
mod poller;
mod processor;
mod worker;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "supabase")]
pub mod supabase;

// Re-export main types
pub use config::{ConsumerMode, ConsumerOptions};
pub use consumer::Consumer;
pub use driver::{send_batch, QueueDriver};
pub use error::{BoxError, ConsumerError};
pub use event::{ConsumerEvent, EventListener, EventListeners};
pub use handler::{async_handler_fn, handler_fn, AsyncFnHandler, FnHandler, MessageHandler};
pub use message::{payload_from_value, Message, Payload};
pub use metrics::{init_metrics, ConsumerMetrics};

#[cfg(feature = "postgres")]
pub use postgres::{PgmqConfig, PgmqDriver};
#[cfg(feature = "supabase")]
pub use supabase::{SupabaseConfig, SupabaseDriver};
