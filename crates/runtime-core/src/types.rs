//! Core type definitions for the model synchronization engine

use serde::{Deserialize, Serialize};

/// Unique identifier types
pub type JobId = String;
pub type LayerName = String;

/// Identifies one worker invocation's contribution within a round
pub type ContributionId = u32;

/// Training job submitted to the controller
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrainRequest {
    /// Network architecture identifier
    pub model_type: String,

    /// Mini-batch size used by each worker
    pub batch_size: u32,

    /// Number of training epochs
    pub epochs: u32,

    /// Dataset the workers train on
    pub dataset: String,

    /// Learning rate handed to the workers
    pub learning_rate: f32,

    /// Serverless function implementing the network
    pub function_name: String,
}

/// Inference request submitted to the controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferRequest {
    /// Trained model to run
    pub model_id: String,

    /// Opaque input rows, passed through to the function
    pub data: Vec<serde_json::Value>,
}
