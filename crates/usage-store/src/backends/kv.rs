//! String key-value stores (local and session scoped).

use super::FlagBackend;
use crate::error::BackendError;
use crate::types::{BackendKind, FlagKey, UsageFlag};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use trial_identity::Fingerprint;

/// Lifetime of the entries in a [`KeyValueBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyValueScope {
    /// Survives until the visitor clears site data.
    Local,
    /// Dropped when the session ends.
    Session,
}

/// String map keyed by flag key, value is the ISO claim timestamp.
///
/// Entries never expire on their own.
#[derive(Debug, Clone)]
pub struct KeyValueBackend {
    scope: KeyValueScope,
    entries: Arc<RwLock<HashMap<String, String>>>,
    max_entries: Option<usize>,
}

impl KeyValueBackend {
    pub fn local() -> Self {
        Self::with_scope(KeyValueScope::Local)
    }

    pub fn session() -> Self {
        Self::with_scope(KeyValueScope::Session)
    }

    fn with_scope(scope: KeyValueScope) -> Self {
        Self {
            scope,
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries: None,
        }
    }

    /// Refuse new keys once `max_entries` are stored.
    pub fn with_quota(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn scope(&self) -> KeyValueScope {
        self.scope
    }

    pub async fn get_item(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut entries = self.entries.write().await;

        if let Some(max) = self.max_entries {
            if !entries.contains_key(key) && entries.len() >= max {
                return Err(BackendError::QuotaExceeded(max));
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Drop every entry, as when the visitor clears site data.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// End the session. Session-scoped entries are gone afterwards.
    pub async fn end_session(&self) {
        if self.scope == KeyValueScope::Session {
            self.clear().await;
        }
    }

    pub async fn item_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl FlagBackend for KeyValueBackend {
    fn kind(&self) -> BackendKind {
        match self.scope {
            KeyValueScope::Local => BackendKind::Ephemeral,
            KeyValueScope::Session => BackendKind::Session,
        }
    }

    async fn set_flag(&self, flag: &UsageFlag) -> Result<(), BackendError> {
        self.set_item(flag.key.as_str(), &flag.timestamp_iso()).await?;
        debug!(backend = %self.kind(), key = %flag.key, "Stored usage flag");
        Ok(())
    }

    async fn has_flag(&self, fingerprint: &Fingerprint) -> Result<bool, BackendError> {
        let key = FlagKey::for_fingerprint(fingerprint);
        Ok(self.get_item(key.as_str()).await.is_some())
    }
}
