//! Local filesystem tensor store
//!
//! Stores one record file per key and commits transactions atomically.
//! Every record is first written to a temporary file; only once all of them
//! are on disk are they renamed into place, while readers of the same store
//! are held off. If a rename fails, the records already replaced are
//! restored from hard-linked backups.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use runtime_core::{Error, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::record;
use crate::session::{Executor, Pipeline};
use crate::{StoreSession, TensorBlob, TensorStore};

const RECORD_EXTENSION: &str = "tensor";

/// A record staged for publication
struct Staged {
    key: String,
    temp_path: PathBuf,
    target: PathBuf,
}

/// A record replaced during publication, with the backup of its old content
struct Replaced {
    target: PathBuf,
    backup: Option<PathBuf>,
}

/// Local filesystem tensor store
///
/// Clones share the publication lock. Stores opened separately on the same
/// directory do not coordinate with each other.
#[derive(Debug, Clone)]
pub struct LocalTensorStore {
    /// Directory holding every record
    base_path: PathBuf,

    /// Held for reading across a run of fetches and for writing across
    /// the rename phase of a commit
    publish: Arc<RwLock<()>>,
}

impl LocalTensorStore {
    /// Create a new LocalTensorStore instance
    ///
    /// # Arguments
    /// * `base_path` - Directory to use as the storage root
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            publish: Arc::new(RwLock::new(())),
        }
    }

    /// Get the base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a key to its record file
    fn record_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            return Err(Error::Transport {
                message: format!("invalid tensor key {:?}", key),
            });
        }
        Ok(self.base_path.join(format!("{}.{}", key, RECORD_EXTENSION)))
    }

    /// Generate a unique hidden file path next to the record
    fn side_path(&self, key: &str, suffix: &str) -> PathBuf {
        self.base_path
            .join(format!(".{}.{}.{}", key, Uuid::new_v4(), suffix))
    }

    /// Write and sync one temporary file
    async fn stage(&self, temp_path: &Path, blob: &TensorBlob) -> Result<()> {
        let mut file = fs::File::create(temp_path).await?;
        file.write_all(&record::encode(blob)).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn read_record(&self, key: &str) -> Result<TensorBlob> {
        let path = self.record_path(key)?;
        debug!(?path, "Reading tensor record");

        match fs::read(&path).await {
            Ok(data) => record::decode(key, data.into()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::TensorNotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(Error::Transport {
                message: format!("Failed to read {}: {}", key, e),
            }),
        }
    }

    /// Move one staged record into place, keeping a backup of the old one
    async fn replace(&self, staged: &Staged) -> std::io::Result<Replaced> {
        let backup_path = self.side_path(&staged.key, "bak");
        let backup = match fs::hard_link(&staged.target, &backup_path).await {
            Ok(()) => Some(backup_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        if let Err(e) = fs::rename(&staged.temp_path, &staged.target).await {
            if let Some(backup) = &backup {
                if let Err(e) = fs::remove_file(backup).await {
                    warn!(path = ?backup, error = %e, "Failed to remove record backup");
                }
            }
            return Err(e);
        }

        Ok(Replaced {
            target: staged.target.clone(),
            backup,
        })
    }

    async fn discard(staged: &[Staged]) {
        for record in staged {
            if let Err(e) = fs::remove_file(&record.temp_path).await {
                warn!(path = ?record.temp_path, error = %e, "Failed to remove staged record");
            }
        }
    }

    /// Undo every replacement, newest first
    async fn restore(replaced: &[Replaced]) {
        for record in replaced.iter().rev() {
            let result = match &record.backup {
                Some(backup) => fs::rename(backup, &record.target).await,
                None => fs::remove_file(&record.target).await,
            };
            if let Err(e) = result {
                warn!(path = ?record.target, error = %e, "Failed to restore record");
            }
        }
    }

    async fn drop_backups(replaced: &[Replaced]) {
        for backup in replaced.iter().filter_map(|record| record.backup.as_ref()) {
            if let Err(e) = fs::remove_file(backup).await {
                warn!(path = ?backup, error = %e, "Failed to remove record backup");
            }
        }
    }
}

#[async_trait]
impl TensorStore for LocalTensorStore {
    async fn session(&self) -> Result<Box<dyn StoreSession>> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| Error::StoreUnavailable {
                message: format!("Failed to open {:?}: {}", self.base_path, e),
            })?;
        Ok(Box::new(Pipeline::new(self.clone())))
    }
}

#[async_trait]
impl Executor for LocalTensorStore {
    #[instrument(skip(self), fields(backend = "local"))]
    async fn fetch(&self, key: &str) -> Result<TensorBlob> {
        let _publish = self.publish.read().await;
        self.read_record(key).await
    }

    #[instrument(skip(self, keys), fields(backend = "local", count = keys.len()))]
    async fn fetch_all(&self, keys: &[String]) -> Vec<Result<TensorBlob>> {
        let _publish = self.publish.read().await;

        let mut replies = Vec::with_capacity(keys.len());
        for key in keys {
            replies.push(self.read_record(key).await);
        }
        replies
    }

    #[instrument(skip(self, writes), fields(backend = "local", count = writes.len()))]
    async fn apply(&self, writes: Vec<(String, TensorBlob)>) -> Result<()> {
        let mut staged = Vec::with_capacity(writes.len());

        for (key, blob) in &writes {
            let target = match self.record_path(key) {
                Ok(target) => target,
                Err(e) => {
                    Self::discard(&staged).await;
                    return Err(Error::TransactionFailed {
                        message: e.to_string(),
                    });
                }
            };
            let record = Staged {
                key: key.clone(),
                temp_path: self.side_path(key, "tmp"),
                target,
            };

            let result = self.stage(&record.temp_path, blob).await;
            // a partially written file is staged too
            staged.push(record);
            if let Err(e) = result {
                Self::discard(&staged).await;
                return Err(Error::TransactionFailed {
                    message: format!("Failed to stage {}: {}", key, e),
                });
            }
        }

        let _publish = self.publish.write().await;
        let mut replaced = Vec::with_capacity(staged.len());
        for (index, record) in staged.iter().enumerate() {
            match self.replace(record).await {
                Ok(done) => replaced.push(done),
                Err(e) => {
                    Self::discard(&staged[index..]).await;
                    Self::restore(&replaced).await;
                    return Err(Error::TransactionFailed {
                        message: format!(
                            "Failed to publish {:?} to {:?}: {}",
                            record.temp_path, record.target, e
                        ),
                    });
                }
            }
        }
        Self::drop_backups(&replaced).await;

        debug!(count = replaced.len(), "Records published");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
