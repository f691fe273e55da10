use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Failures of a durable key-value store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store value for '{key}' is not valid JSON: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Opaque JSON values under string keys
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Returns whether the key existed
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;
}

/// In-memory store for tests and ephemeral hosts
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.values.remove(key).is_some())
    }
}

/// One JSON file per key inside a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a half-written value.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Use `root`, creating it if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(root);
        async_fs::create_dir_all(&store.root)
            .await
            .map_err(|source| StoreError::Io {
                key: store.root.display().to_string(),
                source,
            })?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `key`; bytes outside `[A-Za-z0-9._-]` are hex escaped so
    /// distinct keys never share a file
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() + 5);
        for byte in key.bytes() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                    name.push(byte as char)
                }
                other => name.push_str(&format!("%{:02x}", other)),
            }
        }
        name.push_str(".json");
        self.root.join(name)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        let content = match async_fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                });
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Serialization {
                key: key.to_string(),
                source,
            })
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let io_error = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        let bytes = serde_json::to_vec_pretty(&value).map_err(|source| {
            StoreError::Serialization {
                key: key.to_string(),
                source,
            }
        })?;

        async_fs::create_dir_all(&self.root).await.map_err(io_error)?;
        let path = self.path_for(key);
        let temp_path = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4()));

        let mut file = async_fs::File::create(&temp_path).await.map_err(io_error)?;
        file.write_all(&bytes).await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        drop(file);

        if let Err(source) = async_fs::rename(&temp_path, &path).await {
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(io_error(source));
        }

        debug!("Stored {} bytes under '{}'", bytes.len(), key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        match async_fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}
