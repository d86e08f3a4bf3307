//! pgmq driver over the Supabase REST API
//!
//! Supabase exposes pgmq through PostgREST RPC wrappers in the
//! `pgmq_public` schema.

use crate::driver::QueueDriver;
use crate::error::ConsumerError;
use crate::message::{Message, Payload};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

#[cfg(feature = "config")]
use core_config::{env_or_default, env_required, ConfigError, FromEnv};

/// Schema Supabase exposes the pgmq wrappers in
pub const DEFAULT_SCHEMA: &str = "pgmq_public";

/// Project settings for [`SupabaseDriver`].
#[derive(Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    pub anon_key: String,
    pub schema: String,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("anon_key", &"***")
            .field("schema", &self.schema)
            .finish()
    }
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }
}

/// Load SupabaseConfig from environment variables
///
/// Environment variables:
/// - `SUPABASE_URL` (required)
/// - `SUPABASE_ANON_KEY` (required)
/// - `SUPABASE_SCHEMA` (optional, default: pgmq_public)
#[cfg(feature = "config")]
impl FromEnv for SupabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(env_required("SUPABASE_URL")?, env_required("SUPABASE_ANON_KEY")?)
            .with_schema(env_or_default("SUPABASE_SCHEMA", DEFAULT_SCHEMA)))
    }
}

/// [`QueueDriver`] calling the Supabase pgmq RPC endpoints.
#[derive(Clone)]
pub struct SupabaseDriver {
    client: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseDriver {
    pub fn new(config: SupabaseConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Use a preconfigured HTTP client (timeouts, proxies)
    pub fn with_client(client: reqwest::Client, config: SupabaseConfig) -> Self {
        Self { client, config }
    }

    fn rpc_url(&self, function: &str) -> String {
        format!(
            "{}/rest/v1/rpc/{}",
            self.config.url.trim_end_matches('/'),
            function
        )
    }

    /// Call an RPC function and decode its JSON result
    #[instrument(skip(self, body), fields(schema = %self.config.schema))]
    async fn rpc<R: DeserializeOwned>(&self, function: &str, body: &Value) -> Result<R, ConsumerError> {
        let response = self
            .client
            .post(self.rpc_url(function))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&self.config.anon_key)
            .header("Content-Profile", &self.config.schema)
            .header("Accept-Profile", &self.config.schema)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(function, status = %status, body = %body, "Supabase RPC failed");
            return Err(ConsumerError::driver(format!(
                "{} failed with status {}: {}",
                function, status, body
            )));
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn send_body(queue_name: &str, payload: &Payload) -> Value {
    json!({ "queue_name": queue_name, "message": payload })
}

fn read_body(queue_name: &str, visibility_time: u64, max_batch: usize) -> Value {
    json!({ "queue_name": queue_name, "sleep_seconds": visibility_time, "n": max_batch })
}

fn pop_body(queue_name: &str) -> Value {
    json!({ "queue_name": queue_name })
}

fn delete_body(queue_name: &str, msg_id: i64) -> Value {
    json!({ "queue_name": queue_name, "message_id": msg_id })
}

#[async_trait]
impl QueueDriver for SupabaseDriver {
    async fn send(&self, queue_name: &str, payload: &Payload) -> Result<(), ConsumerError> {
        let ids: Vec<i64> = self.rpc("send", &send_body(queue_name, payload)).await?;
        debug!(queue = %queue_name, msg_id = ?ids.first(), "Sent message");
        Ok(())
    }

    async fn get(
        &self,
        queue_name: &str,
        visibility_time: u64,
        max_batch: usize,
    ) -> Result<Vec<Message>, ConsumerError> {
        self.rpc("read", &read_body(queue_name, visibility_time, max_batch))
            .await
    }

    async fn pop(&self, queue_name: &str) -> Result<Vec<Message>, ConsumerError> {
        self.rpc("pop", &pop_body(queue_name)).await
    }

    async fn delete(&self, queue_name: &str, msg_id: i64) -> Result<(), ConsumerError> {
        let deleted: bool = self.rpc("delete", &delete_body(queue_name, msg_id)).await?;
        if !deleted {
            warn!(queue = %queue_name, msg_id, "Message was already gone on delete");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(url: &str) -> SupabaseDriver {
        SupabaseDriver::new(SupabaseConfig::new(url, "anon"))
    }

    #[test]
    fn test_rpc_url() {
        assert_eq!(
            driver("https://xyz.supabase.co").rpc_url("read"),
            "https://xyz.supabase.co/rest/v1/rpc/read"
        );
        assert_eq!(
            driver("https://xyz.supabase.co/").rpc_url("pop"),
            "https://xyz.supabase.co/rest/v1/rpc/pop"
        );
    }

    #[test]
    fn test_request_bodies() {
        let mut payload = Payload::new();
        payload.insert("message".into(), "Hello World 1".into());

        assert_eq!(
            send_body("subscriptions", &payload),
            json!({"queue_name": "subscriptions", "message": {"message": "Hello World 1"}})
        );
        assert_eq!(
            read_body("subscriptions", 30, 4),
            json!({"queue_name": "subscriptions", "sleep_seconds": 30, "n": 4})
        );
        assert_eq!(pop_body("subscriptions"), json!({"queue_name": "subscriptions"}));
        assert_eq!(
            delete_body("subscriptions", 9),
            json!({"queue_name": "subscriptions", "message_id": 9})
        );
    }

    #[test]
    fn test_decode_read_response() {
        let body = r#"[{
            "msg_id": 1,
            "read_ct": 2,
            "enqueued_at": "2024-05-01T10:00:00.123456+00:00",
            "vt": "2024-05-01T10:00:30.123456+00:00",
            "message": {"message": "Hello World 1"}
        }]"#;

        let messages: Vec<Message> = serde_json::from_str(body).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].msg_id, 1);
        assert_eq!(messages[0].read_ct, 2);
        assert_eq!(messages[0].message["message"], "Hello World 1");
    }

    #[test]
    fn test_config_debug_hides_key() {
        let config = SupabaseConfig::new("https://xyz.supabase.co", "super-secret");
        assert!(!format!("{:?}", config).contains("super-secret"));
        assert_eq!(config.schema, "pgmq_public");
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_config_from_env() {
        temp_env::with_vars(
            [
                ("SUPABASE_URL", Some("https://xyz.supabase.co")),
                ("SUPABASE_ANON_KEY", Some("anon")),
                ("SUPABASE_SCHEMA", None),
            ],
            || {
                let config = SupabaseConfig::from_env().unwrap();
                assert_eq!(config.url, "https://xyz.supabase.co");
                assert_eq!(config.schema, "pgmq_public");
            },
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_driver_error() {
        let err = driver("http://127.0.0.1:9").pop("subscriptions").await.unwrap_err();
        assert!(matches!(err, ConsumerError::Driver(_)));
    }
}
