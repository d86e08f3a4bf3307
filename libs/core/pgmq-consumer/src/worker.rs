//! Fixed pool of worker tasks draining the message channel.
//!
//! Workers share one receiver. Each worker handles a single message at a
//! time and exits once the channel is closed and drained.

use crate::message::Message;
use crate::processor::MessageProcessor;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error};

pub(crate) struct WorkerPool {
    workers: JoinSet<()>,
}

impl WorkerPool {
    /// Spawn `size` workers reading from `rx`.
    pub(crate) fn spawn(
        size: usize,
        processor: Arc<MessageProcessor>,
        rx: mpsc::Receiver<Message>,
    ) -> Self {
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();

        for worker_id in 0..size {
            let rx = Arc::clone(&rx);
            let processor = Arc::clone(&processor);
            workers.spawn(async move {
                debug!(worker_id, "Worker started");

                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(message) = next else {
                        break;
                    };

                    let msg_id = message.msg_id;
                    let outcome = AssertUnwindSafe(processor.process(message))
                        .catch_unwind()
                        .await;
                    if outcome.is_err() {
                        error!(worker_id, msg_id, "Handler panicked, message left for redelivery");
                        processor.metrics().message_failed();
                    }
                }

                debug!(worker_id, "Worker stopped");
            });
        }

        Self { workers }
    }

    /// Number of workers still running
    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker to exit. The channel must be closed first.
    pub(crate) async fn join(mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }
    }
}
