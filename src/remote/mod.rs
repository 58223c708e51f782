//! Remote configuration document: playlist urls per slot plus a version stamp.
//!
//! Clients only know how to fetch; [`RemoteSource`] adds the bounded wait and
//! turns every failure into "not available".

use crate::config::RemoteConfig;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait RemoteConfigClient: Send + Sync {
    /// Raw field of a document, `None` when absent.
    async fn get_field(&self, collection: &str, document: &str, field: &str)
        -> anyhow::Result<Option<Value>>;
}

/// Fetches `{base_url}/{collection}/{document}` and reads fields from the JSON object.
pub struct HttpDocumentClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDocumentClient {
    pub fn new(base_url: &str, user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .context("build remote config client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RemoteConfigClient for HttpDocumentClient {
    async fn get_field(
        &self,
        collection: &str,
        document: &str,
        field: &str,
    ) -> anyhow::Result<Option<Value>> {
        let url = format!("{}/{collection}/{document}", self.base_url);
        let response = self.client.get(&url).send().await.context("fetch remote document")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("remote document error: {}", response.status());
        }
        let doc: Value = response.json().await.context("decode remote document")?;
        Ok(doc.get(field).cloned())
    }
}

/// Fields taken from the local config file.
#[derive(Debug, Clone, Default)]
pub struct StaticDocumentClient {
    fields: BTreeMap<String, String>,
}

impl StaticDocumentClient {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }
}

#[async_trait]
impl RemoteConfigClient for StaticDocumentClient {
    async fn get_field(&self, _: &str, _: &str, field: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.fields.get(field).map(|v| Value::String(v.clone())))
    }
}

/// Bounded-wait view over a [`RemoteConfigClient`].
#[derive(Clone)]
pub struct RemoteSource {
    client: Arc<dyn RemoteConfigClient>,
    collection: String,
    document: String,
    version_field: String,
    timeout: Duration,
}

impl RemoteSource {
    pub fn new(client: Arc<dyn RemoteConfigClient>, cfg: &RemoteConfig) -> Self {
        Self {
            client,
            collection: cfg.collection.clone(),
            document: cfg.document.clone(),
            version_field: cfg.version_field.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    pub fn from_config(cfg: &RemoteConfig, user_agent: &str) -> anyhow::Result<Self> {
        let client: Arc<dyn RemoteConfigClient> = match cfg.base_url.as_deref() {
            Some(base) => Arc::new(HttpDocumentClient::new(base, user_agent)?),
            None => Arc::new(StaticDocumentClient::new(cfg.static_fields.clone())),
        };
        Ok(Self::new(client, cfg))
    }

    async fn bounded_field(&self, field: &str) -> Option<Value> {
        let fut = self.client.get_field(&self.collection, &self.document, field);
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(field, error = %format!("{e:#}"), "remote config fetch failed");
                None
            }
            Err(_) => {
                warn!(field, timeout_secs = self.timeout.as_secs(), "remote config fetch timed out");
                None
            }
        }
    }

    /// Non-blank string field (a playlist url slot).
    pub async fn get_field(&self, field: &str) -> Option<String> {
        let value = self.bounded_field(field).await?;
        let s = value.as_str()?.trim();
        if s.is_empty() {
            debug!(field, "remote field blank");
            return None;
        }
        Some(s.to_string())
    }

    /// Integer version stamp; numeric strings are accepted.
    pub async fn get_version_stamp(&self) -> Option<i64> {
        match self.bounded_field(&self.version_field).await? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowClient;

    #[async_trait]
    impl RemoteConfigClient for SlowClient {
        async fn get_field(&self, _: &str, _: &str, _: &str) -> anyhow::Result<Option<Value>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Some(Value::from(1)))
        }
    }

    fn cfg() -> RemoteConfig {
        RemoteConfig::default()
    }

    #[tokio::test]
    async fn test_static_fields_and_version() {
        let mut fields = BTreeMap::new();
        fields.insert("urlm3u1".to_string(), " http://lists/a.m3u ".to_string());
        fields.insert("urlm3u2".to_string(), "   ".to_string());
        fields.insert("fecha_list".to_string(), "1700000000".to_string());
        let remote = RemoteSource::new(Arc::new(StaticDocumentClient::new(fields)), &cfg());

        assert_eq!(remote.get_field("urlm3u1").await.as_deref(), Some("http://lists/a.m3u"));
        assert_eq!(remote.get_field("urlm3u2").await, None);
        assert_eq!(remote.get_field("urlm3u3").await, None);
        assert_eq!(remote.get_version_stamp().await, Some(1_700_000_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_not_available() {
        let remote = RemoteSource::new(Arc::new(SlowClient), &cfg());
        assert_eq!(remote.get_version_stamp().await, None);
        assert_eq!(remote.get_field("urlm3u1").await, None);
    }
}
