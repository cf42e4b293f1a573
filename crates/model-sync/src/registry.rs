//! Models of the jobs currently running on this coordinator

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use runtime_core::config::ModelConfig;
use runtime_core::{Error, InferRequest, JobId, LayerName, Result, TrainRequest};
use tensor_store::TensorStoreHandle;
use tracing::info;

use crate::model::{Model, ModelHandle};

/// Owns one model per job, all backed by the same store
pub struct ModelRegistry {
    models: DashMap<JobId, ModelHandle>,
    store: TensorStoreHandle,
    config: ModelConfig,
}

impl ModelRegistry {
    pub fn new(store: TensorStoreHandle, config: ModelConfig) -> Self {
        Self {
            models: DashMap::new(),
            store,
            config,
        }
    }

    /// Create the model of a newly submitted job
    pub fn create(
        &self,
        job_id: &str,
        request: &TrainRequest,
        layer_names: Vec<LayerName>,
    ) -> Result<ModelHandle> {
        match self.models.entry(job_id.to_string()) {
            Entry::Occupied(_) => Err(Error::JobAlreadyExists {
                job_id: job_id.to_string(),
            }),
            Entry::Vacant(entry) => {
                let model = Arc::new(
                    Model::for_request(job_id, request, layer_names, self.store.clone())
                        .with_config(&self.config),
                );
                entry.insert(model.clone());
                info!(job_id = %job_id, function = %request.function_name, "Job model registered");
                Ok(model)
            }
        }
    }

    pub fn get(&self, job_id: &str) -> Result<ModelHandle> {
        self.models
            .get(job_id)
            .map(|model| model.clone())
            .ok_or_else(|| Error::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Model an inference request targets; its `model_id` is the job id
    pub fn for_inference(&self, request: &InferRequest) -> Result<ModelHandle> {
        self.get(&request.model_id)
    }

    /// Forget a finished job. The store keeps its last saved weights.
    pub fn remove(&self, job_id: &str) -> Result<ModelHandle> {
        self.models
            .remove(job_id)
            .map(|(_, model)| {
                info!(job_id = %job_id, "Job model removed");
                model
            })
            .ok_or_else(|| Error::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Ids of all registered jobs, sorted
    pub fn jobs(&self) -> Vec<JobId> {
        let mut jobs: Vec<_> = self.models.iter().map(|entry| entry.key().clone()).collect();
        jobs.sort();
        jobs
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
