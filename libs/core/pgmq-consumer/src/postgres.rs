//! pgmq driver over a Postgres connection pool
//!
//! Calls the pgmq extension functions (`send`, `read`, `pop`, `delete`) in
//! the configured schema.

use crate::driver::QueueDriver;
use crate::error::ConsumerError;
use crate::message::{payload_from_value, Message, Payload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "config")]
use core_config::{env_or_default, env_parse, env_required, ConfigError, FromEnv};

/// Default schema the pgmq extension installs into
pub const DEFAULT_SCHEMA: &str = "pgmq";

/// Connection settings for [`PgmqDriver`].
#[derive(Clone)]
pub struct PgmqConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Schema holding the pgmq functions
    pub schema: String,
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// Pool acquire timeout in seconds
    pub acquire_timeout_secs: u64,
}

impl std::fmt::Debug for PgmqConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgmqConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl PgmqConfig {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: 5432,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            schema: DEFAULT_SCHEMA.to_string(),
            max_connections: 10,
            acquire_timeout_secs: 8,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Convert into sqlx connect options
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }

    /// Open a pool and build a driver on it
    pub async fn connect(&self) -> Result<PgmqDriver, ConsumerError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs))
            .connect_with(self.connect_options())
            .await?;

        info!(
            host = %self.host,
            port = self.port,
            database = %self.database,
            schema = %self.schema,
            "Connected to PostgreSQL"
        );

        PgmqDriver::with_schema(pool, &self.schema)
    }
}

/// Load PgmqConfig from environment variables
///
/// Environment variables:
/// - `POSTGRES_HOST` (required)
/// - `POSTGRES_PORT` (optional, default: 5432)
/// - `POSTGRES_USER` (required)
/// - `POSTGRES_PASSWORD` (required)
/// - `POSTGRES_DATABASE` (required)
/// - `PGMQ_SCHEMA` (optional, default: pgmq)
/// - `POSTGRES_MAX_CONNECTIONS` (optional, default: 10)
#[cfg(feature = "config")]
impl FromEnv for PgmqConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(
            env_required("POSTGRES_HOST")?,
            env_required("POSTGRES_USER")?,
            env_required("POSTGRES_PASSWORD")?,
            env_required("POSTGRES_DATABASE")?,
        )
        .with_port(env_parse("POSTGRES_PORT", 5432)?)
        .with_schema(env_or_default("PGMQ_SCHEMA", DEFAULT_SCHEMA))
        .with_max_connections(env_parse("POSTGRES_MAX_CONNECTIONS", 10)?))
    }
}

/// Row shape returned by `read` and `pop`
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    msg_id: i64,
    read_ct: i32,
    enqueued_at: DateTime<Utc>,
    vt: DateTime<Utc>,
    message: Json<serde_json::Value>,
}

impl TryFrom<MessageRow> for Message {
    type Error = ConsumerError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            msg_id: row.msg_id,
            read_ct: i64::from(row.read_ct),
            enqueued_at: row.enqueued_at,
            vt: row.vt,
            message: payload_from_value(row.message.0)?,
        })
    }
}

/// SQL statements for one schema, built once.
#[derive(Debug, Clone)]
struct Statements {
    send: String,
    read: String,
    pop: String,
    delete: String,
}

impl Statements {
    fn new(schema: &str) -> Result<Self, ConsumerError> {
        let valid = !schema.is_empty()
            && schema
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ConsumerError::config(format!(
                "invalid pgmq schema name '{}'",
                schema
            )));
        }

        const COLUMNS: &str = "msg_id, read_ct, enqueued_at, vt, message";
        Ok(Self {
            send: format!(
                "SELECT * FROM {schema}.send(queue_name => $1, msg => $2, delay => $3)"
            ),
            read: format!(
                "SELECT {COLUMNS} FROM {schema}.read(queue_name => $1, vt => $2, qty => $3)"
            ),
            pop: format!("SELECT {COLUMNS} FROM {schema}.pop(queue_name => $1)"),
            delete: format!("SELECT {schema}.delete(queue_name => $1, msg_id => $2)"),
        })
    }
}

/// [`QueueDriver`] backed by the pgmq Postgres extension.
#[derive(Debug, Clone)]
pub struct PgmqDriver {
    pool: PgPool,
    statements: Statements,
}

impl PgmqDriver {
    /// Build a driver using the default `pgmq` schema
    pub fn new(pool: PgPool) -> Result<Self, ConsumerError> {
        Self::with_schema(pool, DEFAULT_SCHEMA)
    }

    /// Build a driver using a custom schema
    pub fn with_schema(pool: PgPool, schema: &str) -> Result<Self, ConsumerError> {
        Ok(Self {
            pool,
            statements: Statements::new(schema)?,
        })
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Convert fetched rows, logging the batch size
fn into_messages(queue_name: &str, rows: Vec<MessageRow>) -> Result<Vec<Message>, ConsumerError> {
    if !rows.is_empty() {
        debug!(queue = %queue_name, count = rows.len(), "Fetched rows");
    }
    rows.into_iter().map(Message::try_from).collect()
}

fn to_i32(name: &str, value: impl TryInto<i32>) -> Result<i32, ConsumerError> {
    value
        .try_into()
        .map_err(|_| ConsumerError::config(format!("{} does not fit in a 32-bit integer", name)))
}

#[async_trait]
impl QueueDriver for PgmqDriver {
    async fn send(&self, queue_name: &str, payload: &Payload) -> Result<(), ConsumerError> {
        sqlx::query(&self.statements.send)
            .bind(queue_name)
            .bind(Json(payload))
            .bind(0i32)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(
        &self,
        queue_name: &str,
        visibility_time: u64,
        max_batch: usize,
    ) -> Result<Vec<Message>, ConsumerError> {
        let rows = sqlx::query_as::<_, MessageRow>(&self.statements.read)
            .bind(queue_name)
            .bind(to_i32("visibility_time", visibility_time)?)
            .bind(to_i32("max_batch", max_batch)?)
            .fetch_all(&self.pool)
            .await?;
        into_messages(queue_name, rows)
    }

    async fn pop(&self, queue_name: &str) -> Result<Vec<Message>, ConsumerError> {
        let rows = sqlx::query_as::<_, MessageRow>(&self.statements.pop)
            .bind(queue_name)
            .fetch_all(&self.pool)
            .await?;
        into_messages(queue_name, rows)
    }

    async fn delete(&self, queue_name: &str, msg_id: i64) -> Result<(), ConsumerError> {
        let deleted: bool = sqlx::query_scalar(&self.statements.delete)
            .bind(queue_name)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await?;

        if !deleted {
            warn!(queue = %queue_name, msg_id, "Message was already gone on delete");
        }
        Ok(())
    }
}
