//! Store key composition
//!
//! Every record of a job lives under `{job}.{layer}[.{contribution}].{weight|bias}`.
//! The aggregate tensors have no contribution segment; a worker's
//! contribution adds its id so it never collides with the aggregate or with
//! another worker.

use std::fmt;

use runtime_core::ContributionId;

const WEIGHT_SUFFIX: &str = "weight";
const BIAS_SUFFIX: &str = "bias";

/// Which parameter of a network layer a tensor holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Weight,
    Bias,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Weight => WEIGHT_SUFFIX,
            ParamKind::Bias => BIAS_SUFFIX,
        }
    }
}

/// Fully qualified key of one tensor record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorKey {
    /// Job partition the record belongs to
    pub job_id: String,

    /// Network layer, without the parameter suffix
    pub layer: String,

    /// Worker contribution, `None` for the aggregate
    pub contribution: Option<ContributionId>,

    /// Weight or bias
    pub param: ParamKind,
}

impl TensorKey {
    /// Key for a model layer name such as `fc1.weight`, `fc1.bias` or `fc1`.
    ///
    /// A trailing `.weight` or `.bias` selects the parameter kind; any other
    /// name is stored as a weight.
    pub fn for_layer(job_id: &str, layer_name: &str, contribution: Option<ContributionId>) -> Self {
        let (layer, param) = split_layer_name(layer_name);
        Self {
            job_id: job_id.to_string(),
            layer: layer.to_string(),
            contribution,
            param,
        }
    }
}

impl fmt::Display for TensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.job_id, self.layer)?;
        if let Some(contribution) = self.contribution {
            write!(f, ".{}", contribution)?;
        }
        write!(f, ".{}", self.param.as_str())
    }
}

fn split_layer_name(name: &str) -> (&str, ParamKind) {
    if let Some(layer) = name.strip_suffix(".weight") {
        (layer, ParamKind::Weight)
    } else if let Some(layer) = name.strip_suffix(".bias") {
        (layer, ParamKind::Bias)
    } else {
        (name, ParamKind::Weight)
    }
}
