use crate::{Error, Result};
use async_trait::async_trait;
use std::path::Path;

/// Durable key-value store for per-package content hashes.
#[async_trait]
pub trait HashStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Sled-backed store under the workspace `.devtools` directory.
pub struct SledHashStore {
    db: sled::Db,
}

impl SledHashStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(|e| Error::Store(format!("sled open failed: {}", e)))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl HashStore for SledHashStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .db
            .get(key)
            .map_err(|e| Error::Store(format!("sled get failed: {}", e)))?;
        Ok(value.map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.db
            .insert(key, value.as_bytes())
            .map_err(|e| Error::Store(format!("sled insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| Error::Store(format!("sled flush failed: {}", e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.db
            .remove(key)
            .map_err(|e| Error::Store(format!("sled remove failed: {}", e)))?;
        Ok(())
    }
}

/// In-memory store for tests.
pub struct MemoryHashStore {
    store: dashmap::DashMap<String, String>,
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self {
            store: dashmap::DashMap::new(),
        }
    }
}

impl Default for MemoryHashStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HashStore for MemoryHashStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.store.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.store.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        Ok(())
    }
}
