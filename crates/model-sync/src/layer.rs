//! Named model parameters

use runtime_core::Result;
use serde::{Deserialize, Serialize};

use crate::tensor::{DType, Tensor};

/// A single named tensor (weight or bias) of the network
///
/// Layers are immutable: merging produces a new layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    name: String,
    tensor: Tensor,
}

impl Layer {
    pub fn new(name: impl Into<String>, tensor: Tensor) -> Self {
        Self {
            name: name.into(),
            tensor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    pub fn dtype(&self) -> DType {
        self.tensor.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        self.tensor.shape()
    }

    /// Elementwise sum of this layer and another contribution to it
    pub fn merge(&self, other: &Layer) -> Result<Layer> {
        Ok(Layer {
            name: self.name.clone(),
            tensor: self.tensor.add(&self.name, &other.tensor)?,
        })
    }

    pub fn summary(&self) -> LayerSummary {
        LayerSummary {
            name: self.name.clone(),
            dtype: self.dtype(),
            shape: self.shape().to_vec(),
        }
    }
}

/// Name, datatype and shape of a layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
}
