//! pgmq Worker Service
//!
//! Runs a [`Consumer`] against a pgmq queue, or seeds a queue with test
//! messages.
//!
//! ## Architecture
//!
//! ```text
//! pgmq queue (Postgres or Supabase)
//!   ↓ (read/pop, CONSUMER_POOL_SIZE per batch)
//! Poller → bounded channel → WorkerPool
//!   ↓ (handler per message, visibility deadline)
//! delete / DLQ / lifecycle events → tracing
//! ```

pub mod cli;

use cli::{Cli, Commands, DriverKind};
use core_config::{Environment, FromEnv};
use eyre::{Result, WrapErr};
use pgmq_consumer::{
    async_handler_fn, metrics, send_batch, Consumer, ConsumerError, ConsumerEvent,
    ConsumerOptions, EventListeners, Payload, PgmqConfig, QueueDriver, SupabaseConfig,
    SupabaseDriver,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Run the command selected on the command line
pub async fn run(cli: Cli) -> Result<()> {
    let dotenv = dotenvy::dotenv();

    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    metrics::init_metrics();

    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env file"),
        Err(e) => debug!(error = %e, "No .env file loaded"),
    }

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?environment,
        driver = ?cli.driver,
        "Starting pgmq worker"
    );

    let driver = connect_driver(cli.driver).await?;

    match cli.command {
        Commands::Consume { fail } => consume(driver, fail).await,
        Commands::Produce { count, queue } => produce(driver.as_ref(), &queue, count).await,
    }
}

/// Build the configured queue driver from the environment
async fn connect_driver(kind: DriverKind) -> Result<Arc<dyn QueueDriver>> {
    match kind {
        DriverKind::Postgres => {
            let config =
                PgmqConfig::from_env().wrap_err("Failed to load PostgreSQL configuration")?;
            info!(host = %config.host, database = %config.database, "Connecting to PostgreSQL...");
            let driver = config
                .connect()
                .await
                .wrap_err("Failed to connect to PostgreSQL")?;
            Ok(Arc::new(driver))
        }
        DriverKind::Supabase => {
            let config =
                SupabaseConfig::from_env().wrap_err("Failed to load Supabase configuration")?;
            info!(url = %config.url, schema = %config.schema, "Using Supabase REST driver");
            Ok(Arc::new(SupabaseDriver::new(config)))
        }
    }
}

/// Consume until a shutdown signal arrives
async fn consume(driver: Arc<dyn QueueDriver>, fail: bool) -> Result<()> {
    let options = ConsumerOptions::from_env()
        .wrap_err("Failed to load consumer configuration")?
        .with_listeners(logging_listeners());

    let handler = async_handler_fn(move |payload: Payload| async move {
        info!(payload = %serde_json::Value::Object(payload), "Received message");
        if fail {
            return Err(ConsumerError::handler("error processing message"));
        }
        Ok(())
    });

    let consumer =
        Consumer::new(handler, options, driver).wrap_err("Invalid consumer configuration")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    consumer
        .run(shutdown_rx)
        .await
        .wrap_err("Consumer stopped with an error")?;

    debug!(metrics = %metrics::render_metrics(), "Final metrics");
    info!("pgmq worker stopped");
    Ok(())
}

/// Enqueue `count` numbered test messages
async fn produce(driver: &dyn QueueDriver, queue: &str, count: usize) -> Result<()> {
    let sent = send_batch(driver, queue, (0..count).map(test_payload))
        .await
        .wrap_err_with(|| format!("Failed to send messages to '{}'", queue))?;

    info!(queue = %queue, sent, "Messages enqueued");
    Ok(())
}

fn test_payload(i: usize) -> Payload {
    let mut payload = Payload::new();
    payload.insert("message".to_string(), format!("Hello World {}", i).into());
    payload
}

/// Listeners that log every lifecycle event
pub fn logging_listeners() -> EventListeners {
    EventListeners::new()
        .on(ConsumerEvent::Finish, |msg, _| {
            info!(msg_id = msg.msg_id, read_ct = msg.read_ct, "Message processed and finished");
        })
        .on(ConsumerEvent::Error, |msg, err| {
            warn!(
                msg_id = msg.msg_id,
                read_ct = msg.read_ct,
                error = ?err.map(ToString::to_string),
                "Error processing message"
            );
        })
        .on(ConsumerEvent::AbortError, |msg, err| {
            error!(
                msg_id = msg.msg_id,
                error = ?err.map(ToString::to_string),
                "Processing aborted after visibility time"
            );
        })
        .on(ConsumerEvent::SendToDlq, |msg, _| {
            warn!(msg_id = msg.msg_id, read_ct = msg.read_ct, "Message sent to DLQ");
        })
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
