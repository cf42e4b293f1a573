//! Model synchronization for distributed training jobs
//!
//! Holds the current weights of a network trained by many independent
//! worker invocations and merges their contributions:
//! - **Build**: load the published weights with one pipelined round trip
//! - **Update**: fold a worker's tensors into the running sum under a lock
//! - **Save**: publish the aggregate as a single store transaction
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use model_sync::Model;
//! use tensor_store::LocalTensorStore;
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let store = Arc::new(LocalTensorStore::new("/tmp/tensors"));
//! let model = Model::new("job-1", "lenet", vec!["fc1.weight".into(), "fc1.bias".into()], store);
//! model.update(0).await?;
//! model.update(1).await?;
//! model.save().await?;
//! # Ok(())
//! # }
//! ```

pub mod layer;
pub mod model;
pub mod registry;
pub mod tensor;

pub use layer::{Layer, LayerSummary};
pub use model::{Model, ModelHandle, ModelSummary, UpdateOutcome};
pub use registry::ModelRegistry;
pub use tensor::{DType, Tensor};
