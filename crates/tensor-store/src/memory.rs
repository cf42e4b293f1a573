//! In-memory tensor store
//!
//! Keeps every record in a shared map. Sessions pipeline exactly like a
//! remote store would, which makes this backend the reference for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use runtime_core::{Error, Result};
use tracing::debug;

use crate::session::{Executor, Pipeline};
use crate::{StoreSession, TensorBlob, TensorKey, TensorStore};

/// Process-local tensor store shared by clones
#[derive(Debug, Clone, Default)]
pub struct MemoryTensorStore {
    tensors: Arc<RwLock<HashMap<String, TensorBlob>>>,
}

impl MemoryTensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a record directly, bypassing sessions
    pub fn insert(&self, key: &TensorKey, blob: TensorBlob) {
        self.tensors.write().insert(key.to_string(), blob);
    }

    /// Read a record directly, bypassing sessions
    pub fn get(&self, key: &TensorKey) -> Option<TensorBlob> {
        self.tensors.read().get(&key.to_string()).cloned()
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.tensors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.read().is_empty()
    }
}

#[async_trait]
impl TensorStore for MemoryTensorStore {
    async fn session(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(Pipeline::new(self.clone())))
    }
}

#[async_trait]
impl Executor for MemoryTensorStore {
    async fn fetch(&self, key: &str) -> Result<TensorBlob> {
        lookup(&self.tensors.read(), key)
    }

    async fn fetch_all(&self, keys: &[String]) -> Vec<Result<TensorBlob>> {
        let tensors = self.tensors.read();
        keys.iter().map(|key| lookup(&tensors, key)).collect()
    }

    async fn apply(&self, writes: Vec<(String, TensorBlob)>) -> Result<()> {
        let count = writes.len();
        let mut tensors = self.tensors.write();
        for (key, blob) in writes {
            tensors.insert(key, blob);
        }
        debug!(count, "Applied writes to memory store");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn lookup(tensors: &HashMap<String, TensorBlob>, key: &str) -> Result<TensorBlob> {
    tensors
        .get(key)
        .cloned()
        .ok_or_else(|| Error::TensorNotFound {
            key: key.to_string(),
        })
}
