//! Stores opened from runtime configuration

use anyhow::Result;
use model_sync::{Model, Tensor};
use ndarray::arr1;
use runtime_core::config::StoreBackend;
use runtime_core::RuntimeConfig;
use tensor_store::TensorKey;

#[tokio::test]
async fn test_local_store_from_config() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let mut config = RuntimeConfig::default();
    config.store.base_path = temp_dir.path().to_string_lossy().to_string();
    config.validate()?;

    let store = tensor_store::open(&config.store);
    let tensor = Tensor::Int64(arr1(&[1i64, 2, 3]).into_dyn());

    let mut session = store.session().await?;
    session.begin()?;
    session.queue_set(&TensorKey::for_layer("job", "emb", Some(2)), tensor.to_blob())?;
    session.commit().await?;

    assert!(temp_dir.path().join("job.emb.2.weight.tensor").exists());

    let model = Model::new("job", "net", vec!["emb".to_string()], store.clone())
        .with_config(&config.model);
    model.update(2).await?;
    assert_eq!(model.layer("emb").unwrap().tensor(), &tensor);
    Ok(())
}

#[tokio::test]
async fn test_memory_store_from_config() -> Result<()> {
    let config: RuntimeConfig = serde_json_config(r#"{"store": {"backend": "memory"}}"#)?;
    assert_eq!(config.store.backend, StoreBackend::Memory);

    let store = tensor_store::open(&config.store);
    let model = Model::new("job", "net", vec!["emb".to_string()], store);
    assert!(model.build().await.is_err());
    Ok(())
}

fn serde_json_config(raw: &str) -> Result<RuntimeConfig> {
    let temp = tempfile::NamedTempFile::new()?;
    std::fs::write(temp.path(), raw)?;
    Ok(RuntimeConfig::from_file(temp.path())?)
}
