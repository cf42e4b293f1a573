//! Operator tool for inspecting and driving job models against a tensor store

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use ndarray::{ArrayD, IxDyn};
use runtime_core::{ContributionId, RuntimeConfig, TrainRequest};
use tensor_store::TensorKey;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use model_sync::{ModelRegistry, ModelSummary, Tensor, UpdateOutcome};

#[derive(Parser)]
#[command(name = "model-sync", version, about = "Build, merge and publish job models")]
struct Cli {
    /// JSON runtime configuration; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct JobArgs {
    /// Job whose records to use
    #[arg(short, long)]
    job: String,

    /// Layer names, in schema order
    #[arg(short, long = "layer", required = true)]
    layers: Vec<String>,

    /// Function implementing the network
    #[arg(short, long, default_value = "network")]
    function: String,
}

#[derive(Subcommand)]
enum Command {
    /// Load the published weights and print their summary
    Summary(JobArgs),

    /// Merge worker contributions concurrently and publish the result
    Merge {
        #[command(flatten)]
        job: JobArgs,

        /// Contribution ids to merge
        #[arg(long = "contribution", required = true)]
        contributions: Vec<ContributionId>,
    },

    /// Write constant float tensors for every layer
    Seed {
        #[command(flatten)]
        job: JobArgs,

        /// Tensor shape shared by every layer
        #[arg(long = "shape", required = true)]
        shape: Vec<usize>,

        /// Write a contribution instead of the published weights
        #[arg(long)]
        contribution: Option<ContributionId>,

        /// Value of every element
        #[arg(long, default_value_t = 0.0)]
        value: f32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    }
    .apply_env();
    config.validate()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = tensor_store::open(&config.store);
    let registry = ModelRegistry::new(store.clone(), config.model.clone());

    match cli.command {
        Command::Summary(job) => {
            let model = registry.create(&job.job, &request(&job), job.layers.clone())?;
            model.build().await?;
            print_summary(&model.summary())?;
        }
        Command::Merge { job, contributions } => {
            let model = registry.create(&job.job, &request(&job), job.layers.clone())?;

            let handles: Vec<_> = contributions
                .iter()
                .map(|&contribution| {
                    let model = Arc::clone(&model);
                    tokio::spawn(async move { (contribution, model.update(contribution).await) })
                })
                .collect();

            let mut failed = Vec::new();
            for handle in handles {
                match handle.await? {
                    (_, Ok(UpdateOutcome::Merged)) => {}
                    (contribution, Ok(UpdateOutcome::Duplicate)) => {
                        tracing::warn!(contribution, "Contribution listed more than once");
                    }
                    (contribution, Err(e)) => {
                        tracing::error!(contribution, error = %e, "Contribution lost");
                        failed.push(contribution);
                    }
                }
            }
            if !failed.is_empty() {
                return Err(format!("contributions {:?} could not be merged", failed).into());
            }

            model.save().await?;
            print_summary(&model.summary())?;
        }
        Command::Seed {
            job,
            shape,
            contribution,
            value,
        } => {
            let tensor = Tensor::Float32(ArrayD::from_elem(IxDyn(&shape), value));

            let mut session = store.session().await?;
            session.begin()?;
            for layer in &job.layers {
                let key = TensorKey::for_layer(&job.job, layer, contribution);
                session.queue_set(&key, tensor.to_blob())?;
            }
            session.commit().await?;

            tracing::info!(
                job_id = %job.job,
                layers = job.layers.len(),
                ?contribution,
                "Seeded tensors"
            );
        }
    }

    Ok(())
}

fn request(job: &JobArgs) -> TrainRequest {
    TrainRequest {
        function_name: job.function.clone(),
        ..Default::default()
    }
}

fn print_summary(summary: &ModelSummary) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
