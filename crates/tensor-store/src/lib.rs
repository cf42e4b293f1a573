//! Tensor Store - Pipelined tensor blob storage for the synchronization engine
//!
//! Provides store sessions that queue commands, flush them in one round
//! trip and return replies in issue order, plus atomic multi-record
//! transactions. Two backends are available:
//! - In-memory (shared map, used by tests and single-process runs)
//! - Local filesystem (one record file per key)
//!
//! # Example
//!
//! ```no_run
//! use tensor_store::{LocalTensorStore, TensorKey, TensorStore};
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let store = LocalTensorStore::new("/tmp/tensors");
//! let mut session = store.session().await?;
//! session.queue_get(&TensorKey::for_layer("job-1", "fc1.weight", None))?;
//! session.queue_get(&TensorKey::for_layer("job-1", "fc1.bias", None))?;
//! session.flush().await?;
//! let weight = session.receive_tensor().await?;
//! let bias = session.receive_tensor().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use runtime_core::config::{StoreBackend, StoreConfig};

mod key;
mod local;
mod memory;
pub mod record;
mod session;

pub use key::{ParamKind, TensorKey};
pub use local::LocalTensorStore;
pub use memory::MemoryTensorStore;
pub use session::{Reply, StoreSession, TensorBlob, TensorStore};

/// Shared handle to a tensor store
pub type TensorStoreHandle = Arc<dyn TensorStore>;

/// Open the store described by the configuration
pub fn open(config: &StoreConfig) -> TensorStoreHandle {
    match config.backend {
        StoreBackend::Memory => Arc::new(MemoryTensorStore::new()),
        StoreBackend::Local => Arc::new(LocalTensorStore::new(&config.base_path)),
    }
}
