//! Aggregate parameter state of one training job
//!
//! A [`Model`] is built once from the published weights, then merges every
//! worker contribution into a running sum and publishes that sum back to
//! the store as one transaction.
//!
//! Network I/O never happens under the state lock; only the arithmetic
//! merge and the snapshot taken by `save` are serialized.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use runtime_core::config::ModelConfig;
use runtime_core::{ContributionId, Error, JobId, LayerName, Result, TrainRequest};
use serde::{Deserialize, Serialize};
use tensor_store::{TensorKey, TensorStoreHandle};
use tracing::{debug, error, info, instrument, warn};

use crate::layer::{Layer, LayerSummary};
use crate::tensor::Tensor;

/// Result of merging one contribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Every layer of the contribution was folded into the state
    Merged,

    /// The contribution was already merged this round; nothing changed
    Duplicate,
}

/// Read-only view of a model's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub job_id: JobId,
    pub name: String,
    /// Contributions merged since the last clear
    pub contributions: usize,
    pub updated_at: Option<DateTime<Utc>>,
    /// Present layers, in schema order
    pub layers: Vec<LayerSummary>,
}

#[derive(Default)]
struct ModelState {
    layers: HashMap<LayerName, Arc<Layer>>,
    merged: HashSet<ContributionId>,
    contributions: usize,
    updated_at: Option<DateTime<Utc>>,
}

/// Parameters of one training job
pub struct Model {
    job_id: JobId,
    name: String,
    layer_names: Vec<LayerName>,
    store: TensorStoreHandle,
    deduplicate: bool,
    state: RwLock<ModelState>,
}

/// Thread-safe handle to a model
pub type ModelHandle = Arc<Model>;

impl Model {
    /// Create an empty model whose schema is `layer_names`
    pub fn new(
        job_id: impl Into<JobId>,
        name: impl Into<String>,
        layer_names: Vec<LayerName>,
        store: TensorStoreHandle,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            name: name.into(),
            layer_names,
            store,
            deduplicate: ModelConfig::default().deduplicate_contributions,
            state: RwLock::new(ModelState::default()),
        }
    }

    /// Create the model for a submitted training job
    pub fn for_request(
        job_id: impl Into<JobId>,
        request: &TrainRequest,
        layer_names: Vec<LayerName>,
        store: TensorStoreHandle,
    ) -> Self {
        Self::new(job_id, request.function_name.clone(), layer_names, store)
    }

    /// Apply model settings
    pub fn with_config(mut self, config: &ModelConfig) -> Self {
        self.deduplicate = config.deduplicate_contributions;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layer_names(&self) -> &[LayerName] {
        &self.layer_names
    }

    /// Current aggregate value of a layer
    pub fn layer(&self, name: &str) -> Option<Arc<Layer>> {
        self.state.read().layers.get(name).cloned()
    }

    /// Number of layers currently held
    pub fn len(&self) -> usize {
        self.state.read().layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().layers.is_empty()
    }

    /// Contributions merged since the last clear
    pub fn contributions(&self) -> usize {
        self.state.read().contributions
    }

    /// Populate the state with the job's published weights.
    ///
    /// Replaces the whole state on success and leaves it untouched on
    /// failure. Must not race with `update` on the same model.
    #[instrument(skip(self), fields(job_id = %self.job_id))]
    pub async fn build(&self) -> Result<()> {
        debug!("Building the model");

        let layers = self.fetch_layers(None).await.inspect_err(|e| {
            error!(error = %e, "Error building the model");
        })?;

        let count = layers.len();
        {
            let mut state = self.state.write();
            state.layers = layers
                .into_iter()
                .map(|layer| (layer.name().to_string(), Arc::new(layer)))
                .collect();
        }

        info!(layers = count, "Model built");
        Ok(())
    }

    /// Fold a worker's contribution into the state.
    ///
    /// The first contribution to a layer becomes its value; later ones are
    /// added elementwise. A failing layer aborts the call with the state
    /// exactly as it was before it. Nothing is retried.
    #[instrument(skip(self), fields(job_id = %self.job_id))]
    pub async fn update(&self, contribution: ContributionId) -> Result<UpdateOutcome> {
        debug!("Updating model layers");

        if self.deduplicate && self.state.read().merged.contains(&contribution) {
            warn!("Contribution already merged, skipping");
            return Ok(UpdateOutcome::Duplicate);
        }

        let layers = self
            .fetch_layers(Some(contribution))
            .await
            .inspect_err(|e| error!(error = %e, "Could not fetch contribution"))?;

        let outcome = self
            .merge(contribution, layers)
            .inspect_err(|e| error!(error = %e, "Error merging contribution"))?;

        if outcome == UpdateOutcome::Merged {
            debug!("Model updated");
        }
        Ok(outcome)
    }

    /// Publish the whole state as one transaction.
    ///
    /// Either every layer is written or none is; the state itself is not
    /// modified.
    #[instrument(skip(self), fields(job_id = %self.job_id))]
    pub async fn save(&self) -> Result<()> {
        info!("Publishing model on the store");

        let snapshot: Vec<Arc<Layer>> = {
            let state = self.state.read();
            self.layer_names
                .iter()
                .filter_map(|name| state.layers.get(name).cloned())
                .collect()
        };

        self.publish(&snapshot).await.inspect_err(|e| {
            error!(error = %e, "Could not save tensors");
        })?;

        info!(layers = snapshot.len(), "Model published on the store");
        Ok(())
    }

    async fn publish(&self, layers: &[Arc<Layer>]) -> Result<()> {
        let mut session = self.store.session().await?;
        session.begin()?;
        for layer in layers {
            let key = TensorKey::for_layer(&self.job_id, layer.name(), None);
            session.queue_set(&key, layer.tensor().to_blob())?;
        }
        session.commit().await
    }

    /// Drop the state to start a new round.
    ///
    /// The store keeps whatever was last saved.
    pub fn clear(&self) {
        *self.state.write() = ModelState::default();
        debug!(job_id = %self.job_id, "Wiped model state");
    }

    /// Describe every present layer
    pub fn summary(&self) -> ModelSummary {
        let summary = {
            let state = self.state.read();
            ModelSummary {
                job_id: self.job_id.clone(),
                name: self.name.clone(),
                contributions: state.contributions,
                updated_at: state.updated_at,
                layers: self
                    .layer_names
                    .iter()
                    .filter_map(|name| state.layers.get(name).map(|layer| layer.summary()))
                    .collect(),
            }
        };

        for layer in &summary.layers {
            info!(
                job_id = %self.job_id,
                name = %layer.name,
                dtype = %layer.dtype,
                shape = ?layer.shape,
                "Layer"
            );
        }
        summary
    }

    fn check_schema(&self) -> Result<()> {
        if self.layer_names.is_empty() {
            return Err(Error::EmptySchema {
                job_id: self.job_id.clone(),
            });
        }
        Ok(())
    }

    /// Fetch one tensor per schema name with a single pipelined round trip.
    ///
    /// Replies are consumed in issue order, so the i-th reply always belongs
    /// to the i-th name.
    async fn fetch_layers(&self, contribution: Option<ContributionId>) -> Result<Vec<Layer>> {
        self.check_schema()?;

        let keys: Vec<TensorKey> = self
            .layer_names
            .iter()
            .map(|name| TensorKey::for_layer(&self.job_id, name, contribution))
            .collect();

        let mut session = self.store.session().await?;
        for key in &keys {
            session.queue_get(key)?;
        }
        session.flush().await?;

        let mut layers = Vec::with_capacity(keys.len());
        for (name, key) in self.layer_names.iter().zip(&keys) {
            let blob = session.receive_tensor().await?;
            let tensor = Tensor::decode(&key.to_string(), &blob)?;
            debug!(layer = %name, shape = ?tensor.shape(), "Fetched layer");
            layers.push(Layer::new(name.clone(), tensor));
        }
        Ok(layers)
    }

    /// Merge fetched layers under the write lock, all or nothing
    fn merge(&self, contribution: ContributionId, layers: Vec<Layer>) -> Result<UpdateOutcome> {
        let mut state = self.state.write();

        // a concurrent call may have merged the same id while this one fetched
        if self.deduplicate && state.merged.contains(&contribution) {
            warn!("Contribution already merged, skipping");
            return Ok(UpdateOutcome::Duplicate);
        }

        let mut staged = Vec::with_capacity(layers.len());
        for layer in layers {
            let merged = match state.layers.get(layer.name()) {
                None => layer,
                Some(total) => total.merge(&layer)?,
            };
            staged.push(Arc::new(merged));
        }

        for layer in staged {
            state.layers.insert(layer.name().to_string(), layer);
        }
        if self.deduplicate {
            state.merged.insert(contribution);
        }
        state.contributions += 1;
        state.updated_at = Some(Utc::now());

        Ok(UpdateOutcome::Merged)
    }
}
