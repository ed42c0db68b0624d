//! On-disk record store keyed by flag string.

use super::FlagBackend;
use crate::error::BackendError;
use crate::types::{BackendKind, FlagKey, UsageFlag};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use trial_identity::Fingerprint;

/// Data version for schema migrations.
const DATA_VERSION: u32 = 1;

/// One stored usage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRecord {
    /// The flag key, `freetrial_used_<fingerprint>`.
    pub id: String,
    /// ISO-8601 claim time.
    pub timestamp: String,
    /// Claim time in epoch milliseconds.
    pub created: i64,
}

impl FlagRecord {
    pub fn from_flag(flag: &UsageFlag) -> Self {
        Self {
            id: flag.key.as_str().to_string(),
            timestamp: flag.timestamp_iso(),
            created: flag.timestamp.timestamp_millis(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexedData {
    version: u32,
    records: HashMap<String, FlagRecord>,
}

impl Default for IndexedData {
    fn default() -> Self {
        Self {
            version: DATA_VERSION,
            records: HashMap::new(),
        }
    }
}

/// JSON object store on disk.
///
/// Every read goes to disk, so deleting the file is observed immediately.
/// Writes are serialized in-process and land atomically via temp file +
/// rename.
#[derive(Debug)]
pub struct IndexedRecordBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl IndexedRecordBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch a record by flag key.
    pub async fn get(&self, id: &str) -> Result<Option<FlagRecord>, BackendError> {
        let data = self.load().await?;
        Ok(data.records.get(id).cloned())
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<usize, BackendError> {
        Ok(self.load().await?.records.len())
    }

    async fn load(&self) -> Result<IndexedData, BackendError> {
        if !fs::try_exists(&self.path).await? {
            return Ok(IndexedData::default());
        }

        let bytes = fs::read(&self.path).await?;
        let data: IndexedData = serde_json::from_slice(&bytes)?;

        if data.version != DATA_VERSION {
            warn!(
                "Record store version {} differs from {}, reading anyway",
                data.version, DATA_VERSION
            );
        }

        Ok(data)
    }

    async fn persist(&self, data: &IndexedData) -> Result<(), BackendError> {
        let bytes = serde_json::to_vec_pretty(data)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic write
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!("Saved record store ({} bytes) to {:?}", bytes.len(), self.path);
        Ok(())
    }
}

#[async_trait]
impl FlagBackend for IndexedRecordBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::IndexedRecord
    }

    #[instrument(skip(self, flag), fields(key = %flag.key))]
    async fn set_flag(&self, flag: &UsageFlag) -> Result<(), BackendError> {
        let _guard = self.write_lock.lock().await;

        let mut data = match self.load().await {
            Ok(data) => data,
            Err(BackendError::Serialization(e)) => {
                warn!("Record store at {:?} unreadable ({}), starting fresh", self.path, e);
                IndexedData::default()
            }
            Err(e) => return Err(e),
        };

        let record = FlagRecord::from_flag(flag);
        data.records.insert(record.id.clone(), record);
        self.persist(&data).await?;

        info!("Recorded usage flag in record store");
        Ok(())
    }

    async fn has_flag(&self, fingerprint: &Fingerprint) -> Result<bool, BackendError> {
        let key = FlagKey::for_fingerprint(fingerprint);
        Ok(self.get(key.as_str()).await?.is_some())
    }
}
