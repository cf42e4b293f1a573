//! End-to-end training round over the filesystem store
//!
//! Simulates what the coordinator does for one job:
//! - Publish initial weights and build the model
//! - Workers write their tensors and the model merges them concurrently
//! - The aggregate is saved and read back by a fresh model

use std::sync::Arc;

use anyhow::Result;
use model_sync::{Model, ModelRegistry, Tensor, UpdateOutcome};
use ndarray::{ArrayD, IxDyn};
use runtime_core::config::ModelConfig;
use runtime_core::{Error, ErrorKind, TrainRequest};
use tensor_store::{LocalTensorStore, TensorKey, TensorStore, TensorStoreHandle};

const JOB: &str = "job-e2e";

fn layer_names() -> Vec<String> {
    ["conv1.weight", "conv1.bias", "fc1.weight", "fc1.bias"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn shape_of(layer: &str) -> Vec<usize> {
    match layer {
        "conv1.weight" => vec![6, 1, 5, 5],
        "conv1.bias" => vec![6],
        "fc1.weight" => vec![10, 24],
        _ => vec![10],
    }
}

fn filled(layer: &str, value: f32) -> Tensor {
    Tensor::Float32(ArrayD::from_elem(IxDyn(&shape_of(layer)), value))
}

/// Write one tensor per layer in a single transaction, like a worker does
async fn publish(store: &dyn TensorStore, contribution: Option<u32>, value: f32) -> Result<()> {
    let mut session = store.session().await?;
    session.begin()?;
    for layer in layer_names() {
        let key = TensorKey::for_layer(JOB, &layer, contribution);
        session.queue_set(&key, filled(&layer, value).to_blob())?;
    }
    session.commit().await?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_round() -> Result<()> {
    init_tracing();
    let temp_dir = tempfile::tempdir()?;
    let store: TensorStoreHandle = Arc::new(LocalTensorStore::new(temp_dir.path()));

    // 1. Initial weights
    publish(store.as_ref(), None, 0.5).await?;
    let registry = ModelRegistry::new(store.clone(), ModelConfig::default());
    let request = TrainRequest {
        function_name: "lenet".to_string(),
        ..Default::default()
    };
    let model = registry.create(JOB, &request, layer_names())?;
    model.build().await?;
    assert_eq!(model.len(), 4);
    assert_eq!(model.layer("fc1.weight").unwrap().shape(), &[10, 24]);

    // 2. New round: contributions replace the built state
    model.clear();
    let workers = 8u32;
    for contribution in 0..workers {
        publish(store.as_ref(), Some(contribution), 1.0).await?;
    }

    let handles: Vec<_> = (0..workers)
        .map(|contribution| {
            let model = registry.get(JOB).unwrap();
            tokio::spawn(async move { model.update(contribution).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await??, UpdateOutcome::Merged);
    }
    assert_eq!(model.contributions(), workers as usize);

    for layer in layer_names() {
        assert_eq!(
            model.layer(&layer).unwrap().tensor(),
            &filled(&layer, workers as f32)
        );
    }

    // 3. Publish and reload
    model.save().await?;
    let fresh = Model::new(JOB, "lenet", layer_names(), store.clone());
    fresh.build().await?;
    for layer in layer_names() {
        assert_eq!(
            fresh.layer(&layer).unwrap().tensor().to_blob(),
            model.layer(&layer).unwrap().tensor().to_blob()
        );
    }

    Ok(())
}

#[tokio::test]
async fn test_lost_contribution_is_reported() -> Result<()> {
    init_tracing();
    let temp_dir = tempfile::tempdir()?;
    let store: TensorStoreHandle = Arc::new(LocalTensorStore::new(temp_dir.path()));
    publish(store.as_ref(), Some(0), 1.0).await?;

    let model = Model::new(JOB, "lenet", layer_names(), store.clone());
    model.update(0).await?;

    let err = model.update(1).await.unwrap_err();
    assert!(matches!(err, Error::TensorNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(model.contributions(), 1);

    // the coordinator recomputes the contribution and resubmits it
    publish(store.as_ref(), Some(1), 1.0).await?;
    assert_eq!(model.update(1).await?, UpdateOutcome::Merged);
    assert_eq!(
        model.layer("conv1.bias").unwrap().tensor(),
        &filled("conv1.bias", 2.0)
    );
    Ok(())
}

#[tokio::test]
async fn test_save_is_visible_all_at_once() -> Result<()> {
    init_tracing();
    let temp_dir = tempfile::tempdir()?;
    let store: TensorStoreHandle = Arc::new(LocalTensorStore::new(temp_dir.path()));
    publish(store.as_ref(), Some(0), 3.0).await?;

    let model = Model::new(JOB, "lenet", layer_names(), store.clone());
    model.update(0).await?;

    // nothing published yet
    let reader = Model::new(JOB, "lenet", layer_names(), store.clone());
    assert!(reader.build().await.is_err());

    model.save().await?;
    reader.build().await?;
    assert_eq!(reader.len(), 4);
    Ok(())
}

fn value_of(model: &Model, layer: &str) -> f32 {
    match model.layer(layer).unwrap().tensor() {
        Tensor::Float32(array) => array.iter().copied().next().unwrap(),
        other => panic!("unexpected tensor {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_build_during_saves_sees_whole_models() -> Result<()> {
    init_tracing();
    let temp_dir = tempfile::tempdir()?;
    let store: TensorStoreHandle = Arc::new(LocalTensorStore::new(temp_dir.path()));
    publish(store.as_ref(), None, 0.0).await?;

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for round in 1..=40 {
                publish(store.as_ref(), None, round as f32).await?;
            }
            Ok::<_, anyhow::Error>(())
        })
    };

    let mut seen = std::collections::BTreeSet::new();
    for _ in 0..300 {
        let reader = Model::new(JOB, "lenet", layer_names(), store.clone());
        reader.build().await?;

        let values: Vec<f32> = layer_names()
            .iter()
            .map(|layer| value_of(&reader, layer))
            .collect();
        assert!(
            values.iter().all(|v| *v == values[0]),
            "layers from different saves: {:?}",
            values
        );
        seen.insert(values[0] as u32);
    }

    writer.await??;
    assert!(!seen.is_empty());
    Ok(())
}
