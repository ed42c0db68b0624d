//! Request/response cache backend.

use super::FlagBackend;
use crate::error::BackendError;
use crate::types::{BackendKind, UsageFlag};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use trial_identity::Fingerprint;

/// Synthetic request path prefix; the fingerprint is appended.
pub const CACHE_PATH_PREFIX: &str = "/freetrial-check/";

#[derive(Debug, Serialize, Deserialize)]
struct UsageBody {
    used: bool,
    timestamp: String,
}

/// A cached response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    fn for_flag(flag: &UsageFlag) -> Result<Self, BackendError> {
        let body = serde_json::to_vec(&UsageBody {
            used: true,
            timestamp: flag.timestamp_iso(),
        })?;

        Ok(Self {
            status: 200,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Named cache of responses keyed by request path.
#[derive(Debug, Clone)]
pub struct CacheBackend {
    name: String,
    entries: Arc<RwLock<HashMap<String, CachedResponse>>>,
}

impl CacheBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request path under which the flag for `fingerprint` is cached.
    pub fn request_path(fingerprint: &Fingerprint) -> String {
        format!("{}{}", CACHE_PATH_PREFIX, fingerprint)
    }

    pub async fn put(&self, path: &str, response: CachedResponse) {
        self.entries.write().await.insert(path.to_string(), response);
    }

    pub async fn lookup(&self, path: &str) -> Option<CachedResponse> {
        self.entries.read().await.get(path).cloned()
    }

    pub async fn delete(&self, path: &str) -> bool {
        self.entries.write().await.remove(path).is_some()
    }
}

impl Default for CacheBackend {
    fn default() -> Self {
        Self::new("freetrial-cache")
    }
}

#[async_trait]
impl FlagBackend for CacheBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cache
    }

    async fn set_flag(&self, flag: &UsageFlag) -> Result<(), BackendError> {
        let path = Self::request_path(&flag.fingerprint);
        let response = CachedResponse::for_flag(flag)?;
        self.put(&path, response).await;
        debug!(cache = %self.name, path = %path, "Cached usage response");
        Ok(())
    }

    async fn has_flag(&self, fingerprint: &Fingerprint) -> Result<bool, BackendError> {
        let Some(response) = self.lookup(&Self::request_path(fingerprint)).await else {
            return Ok(false);
        };

        if response.status != 200 {
            return Ok(false);
        }

        let body: UsageBody = serde_json::from_slice(&response.body)?;
        Ok(body.used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn test_flag() -> UsageFlag {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        UsageFlag::new("e16490c8".parse().unwrap(), now)
    }

    #[tokio::test]
    async fn test_cached_response_shape() {
        let cache = CacheBackend::default();
        let flag = test_flag();

        cache.set_flag(&flag).await.unwrap();

        let response = cache.lookup("/freetrial-check/e16490c8").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-type"), Some("application/json"));

        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["used"], true);
        assert_eq!(body["timestamp"], "2026-10-16T12:00:00+00:00");
    }

    #[tokio::test]
    async fn test_has_flag() {
        let cache = CacheBackend::default();
        let flag = test_flag();

        assert!(!cache.has_flag(&flag.fingerprint).await.unwrap());
        cache.set_flag(&flag).await.unwrap();
        assert!(cache.has_flag(&flag.fingerprint).await.unwrap());

        assert!(cache.delete("/freetrial-check/e16490c8").await);
        assert!(!cache.has_flag(&flag.fingerprint).await.unwrap());
    }

    #[tokio::test]
    async fn test_garbled_body_is_an_error() {
        let cache = CacheBackend::default();
        let fp: Fingerprint = "e16490c8".parse().unwrap();

        cache
            .put(
                &CacheBackend::request_path(&fp),
                CachedResponse {
                    status: 200,
                    headers: vec![],
                    body: b"<html>".to_vec(),
                },
            )
            .await;

        assert!(matches!(
            cache.has_flag(&fp).await,
            Err(BackendError::Serialization(_))
        ));
    }
}
