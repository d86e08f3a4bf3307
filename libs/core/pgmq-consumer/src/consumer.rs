//! Consumer orchestration
//!
//! Wires the poller, the bounded channel and the worker pool together.

use crate::config::ConsumerOptions;
use crate::driver::QueueDriver;
use crate::error::ConsumerError;
use crate::handler::MessageHandler;
use crate::poller::{PollExit, Poller};
use crate::processor::MessageProcessor;
use crate::worker::WorkerPool;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Queue consumer.
///
/// Polls a queue through a [`QueueDriver`] and fans messages out to a fixed
/// pool of workers, each running the handler under a visibility deadline.
///
/// # Example
///
/// ```rust,ignore
/// use pgmq_consumer::{Consumer, ConsumerMode, ConsumerOptions, handler_fn};
///
/// let options = ConsumerOptions::new("subscriptions", ConsumerMode::Read)
///     .with_pool_size(4)
///     .with_dlq("subscriptions_dlq", 2);
///
/// let consumer = Consumer::new(
///     handler_fn(|payload: &Payload| process(payload)),
///     options,
///     driver,
/// )?;
/// consumer.run(shutdown_rx).await?;
/// ```
pub struct Consumer {
    processor: Arc<MessageProcessor>,
    driver: Arc<dyn QueueDriver>,
    options: Arc<ConsumerOptions>,
}

impl Consumer {
    /// Create a consumer, validating the options.
    pub fn new<H>(
        handler: H,
        options: ConsumerOptions,
        driver: Arc<dyn QueueDriver>,
    ) -> Result<Self, ConsumerError>
    where
        H: MessageHandler + 'static,
    {
        Self::with_arc_handler(Arc::new(handler), options, driver)
    }

    /// Create a consumer with a shared handler.
    pub fn with_arc_handler(
        handler: Arc<dyn MessageHandler>,
        options: ConsumerOptions,
        driver: Arc<dyn QueueDriver>,
    ) -> Result<Self, ConsumerError> {
        options.validate()?;

        let options = Arc::new(options);
        let processor = Arc::new(MessageProcessor::new(
            handler,
            Arc::clone(&driver),
            Arc::clone(&options),
        ));

        Ok(Self {
            processor,
            driver,
            options,
        })
    }

    /// Validated options
    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    /// Run without an external shutdown signal.
    ///
    /// With polling enabled this never returns. With polling disabled it
    /// returns after one fetch cycle once every fetched message is done.
    pub async fn start(&self) -> Result<(), ConsumerError> {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        self.run(shutdown_rx).await
    }

    /// Run until one-shot completion or shutdown.
    ///
    /// Shutdown is requested by sending `true` or by dropping the sender.
    /// Messages already pushed to the workers are processed before this
    /// returns. In read mode the rest of an interrupted batch is left for
    /// redelivery; in pop mode the current batch is always pushed in full,
    /// since the backend has already removed it.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        let (tx, rx) = mpsc::channel(self.options.pool_size);
        let pool = WorkerPool::spawn(self.options.pool_size, Arc::clone(&self.processor), rx);

        info!(
            queue = %self.options.queue_name,
            mode = %self.options.mode,
            workers = pool.len(),
            visibility_time = self.options.visibility_time,
            polling = self.options.polling_enabled,
            dlq = ?self.options.dlq(),
            "Starting consumer"
        );

        let poller = Poller::new(
            Arc::clone(&self.driver),
            Arc::clone(&self.options),
            self.processor.metrics().clone(),
        );
        let exit = poller.run(tx, shutdown).await;

        info!(reason = ?exit, "Poller stopped, waiting for workers");
        pool.join().await;

        info!(queue = %self.options.queue_name, "Consumer stopped");
        match exit {
            PollExit::ChannelClosed => Err(ConsumerError::Shutdown),
            PollExit::OneShot | PollExit::Shutdown => Ok(()),
        }
    }
}
