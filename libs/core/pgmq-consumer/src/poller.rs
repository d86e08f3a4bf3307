//! Fetch loop feeding the worker channel.

use crate::config::{ConsumerMode, ConsumerOptions};
use crate::driver::QueueDriver;
use crate::message::Message;
use crate::metrics::ConsumerMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Why the poll loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollExit {
    /// Polling is disabled and the single cycle completed.
    OneShot,
    /// Shutdown was requested.
    Shutdown,
    /// Every worker is gone.
    ChannelClosed,
}

pub(crate) struct Poller {
    driver: Arc<dyn QueueDriver>,
    options: Arc<ConsumerOptions>,
    metrics: ConsumerMetrics,
}

impl Poller {
    pub(crate) fn new(
        driver: Arc<dyn QueueDriver>,
        options: Arc<ConsumerOptions>,
        metrics: ConsumerMetrics,
    ) -> Self {
        Self {
            driver,
            options,
            metrics,
        }
    }

    /// Fetch and push batches until one-shot completion or shutdown.
    ///
    /// In read mode shutdown may interrupt a batch; the unpushed leases
    /// expire and the backend redelivers them. In pop mode shutdown is only
    /// checked between batches.
    ///
    /// The sender is dropped on return, which closes the channel.
    pub(crate) async fn run(
        &self,
        tx: mpsc::Sender<Message>,
        mut shutdown: watch::Receiver<bool>,
    ) -> PollExit {
        loop {
            if *shutdown.borrow() {
                return PollExit::Shutdown;
            }

            let batch = self.fetch().await;

            if batch.is_empty() && self.options.polling_enabled {
                if sleep_or_shutdown(self.options.polling_interval(), &mut shutdown).await {
                    return PollExit::Shutdown;
                }
                continue;
            }

            for message in batch {
                let msg_id = message.msg_id;

                // Popped messages are already gone from the queue, so the
                // whole batch is handed to the workers before shutdown is honoured.
                if self.options.mode == ConsumerMode::Pop {
                    if tx.send(message).await.is_err() {
                        warn!(msg_id, "Worker channel closed, stopping poller");
                        return PollExit::ChannelClosed;
                    }
                    continue;
                }

                tokio::select! {
                    sent = tx.send(message) => {
                        if sent.is_err() {
                            warn!(msg_id, "Worker channel closed, stopping poller");
                            return PollExit::ChannelClosed;
                        }
                    }
                    _ = shutdown_requested(&mut shutdown) => {
                        info!(msg_id, "Shutdown while pushing batch, message left for redelivery");
                        return PollExit::Shutdown;
                    }
                }
            }

            if !self.options.polling_enabled {
                debug!(
                    wait_secs = self.options.visibility_time,
                    "Polling disabled, waiting one visibility time before stopping"
                );
                if sleep_or_shutdown(self.options.visibility_timeout(), &mut shutdown).await {
                    return PollExit::Shutdown;
                }
                return PollExit::OneShot;
            }
        }
    }

    /// Fetch one batch. Errors are logged and yield an empty batch.
    async fn fetch(&self) -> Vec<Message> {
        let queue = &self.options.queue_name;
        let result = match self.options.mode {
            ConsumerMode::Read => {
                self.driver
                    .get(queue, self.options.visibility_time, self.options.pool_size)
                    .await
            }
            ConsumerMode::Pop => self.driver.pop(queue).await,
        };

        match result {
            Ok(batch) => {
                if !batch.is_empty() {
                    debug!(queue = %queue, count = batch.len(), "Fetched batch");
                    self.metrics.batch_fetched(batch.len());
                }
                batch
            }
            Err(e) => {
                warn!(queue = %queue, mode = %self.options.mode, error = %e, "Failed to fetch messages");
                self.metrics.fetch_failed();
                Vec::new()
            }
        }
    }
}

/// Resolves once shutdown is requested or the signal sender is dropped.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleep for `duration`. Returns `true` if shutdown interrupted the sleep.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown_requested(shutdown) => true,
    }
}
