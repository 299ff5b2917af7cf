use super::SignalService;
use crate::domain::ids::model_fingerprint;
use crate::domain::model::{LoadedModel, ModelArtifact, ModelMetadata};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ReloadOutcome {
    pub reloaded: bool,
    pub previous_version: Option<String>,
    pub current_version: Option<String>,
}

impl SignalService {
    /// One registry poll: read the active row, fingerprint it, and swap the
    /// model handle if the fingerprint moved.
    ///
    /// The new artifact is loaded into a local first; the publish is a single
    /// pointer swap, so requests never observe a half-loaded model. A load
    /// failure leaves the current model serving.
    pub async fn poll_registry(&self) -> Result<ReloadOutcome> {
        let previous_version = self.loaded_model().map(|m| m.metadata.version.clone());

        let active = self
            .registry
            .active_for_strategy(&self.config.strategy_id)
            .await
            .context("Registry read failed")?;

        let Some(metadata) = active else {
            if previous_version.is_some() {
                warn!(
                    "SignalService: No active model for strategy {}; keeping loaded model",
                    self.config.strategy_id
                );
            }
            self.metrics
                .model_reloads_total
                .with_label_values(&["unchanged"])
                .inc();
            return Ok(ReloadOutcome {
                reloaded: false,
                previous_version: previous_version.clone(),
                current_version: previous_version,
            });
        };

        let fingerprint = model_fingerprint(&metadata.version, &metadata.model_path);
        if self
            .loaded_model()
            .map(|m| m.fingerprint == fingerprint)
            .unwrap_or(false)
        {
            self.metrics
                .model_reloads_total
                .with_label_values(&["unchanged"])
                .inc();
            return Ok(ReloadOutcome {
                reloaded: false,
                previous_version: previous_version.clone(),
                current_version: previous_version,
            });
        }

        match load_artifact(&metadata).await {
            Ok(artifact) => {
                let version = metadata.version.clone();
                let loaded = LoadedModel {
                    metadata,
                    artifact,
                    fingerprint,
                    loaded_at: Utc::now(),
                };
                // Publish: single pointer swap. In-flight requests keep the
                // handle they already loaded.
                self.model.store(Some(Arc::new(loaded)));
                self.metrics
                    .set_model_info(&self.config.strategy_id, &version);
                self.metrics
                    .model_reloads_total
                    .with_label_values(&["swapped"])
                    .inc();
                info!(
                    "SignalService: Model swapped {} -> {} for strategy {}",
                    previous_version.as_deref().unwrap_or("none"),
                    version,
                    self.config.strategy_id
                );
                Ok(ReloadOutcome {
                    reloaded: true,
                    previous_version,
                    current_version: Some(version),
                })
            }
            Err(e) => {
                error!(
                    "SignalService: Failed to load model artifact for {} v{}: {}. Keeping current model.",
                    self.config.strategy_id, metadata.version, e
                );
                self.metrics
                    .model_reloads_total
                    .with_label_values(&["failed"])
                    .inc();
                Ok(ReloadOutcome {
                    reloaded: false,
                    previous_version: previous_version.clone(),
                    current_version: previous_version,
                })
            }
        }
    }

    /// Background poll loop at the configured cadence.
    pub async fn run_poller(self: Arc<Self>) {
        info!(
            "SignalService: Registry poller started (interval {:?})",
            self.config.reload_interval
        );
        let mut interval = tokio::time::interval(self.config.reload_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.poll_registry().await {
                error!("SignalService: Registry poll failed: {}", e);
            }
        }
    }
}

/// Read and parse the model artifact at `model_path`. Plain filesystem paths
/// and `file://` URIs are supported.
async fn load_artifact(metadata: &ModelMetadata) -> Result<ModelArtifact> {
    let path = metadata
        .model_path
        .strip_prefix("file://")
        .unwrap_or(&metadata.model_path);
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read model artifact at {}", path))?;
    let artifact: ModelArtifact = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse model artifact at {}", path))?;
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::signal_service::SignalServiceConfig;
    use crate::domain::model::{ModelStatus, StrategyDescriptor};
    use crate::domain::ports::FeatureSource;
    use crate::domain::repositories::ModelRegistryRepository;
    use crate::infrastructure::observability::Metrics;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::Write;

    struct StubRegistry {
        active: Mutex<Option<ModelMetadata>>,
    }

    #[async_trait]
    impl ModelRegistryRepository for StubRegistry {
        async fn active_for_strategy(&self, _strategy_id: &str) -> Result<Option<ModelMetadata>> {
            Ok(self.active.lock().clone())
        }

        async fn activate(&self, _strategy_id: &str, _version: &str) -> Result<()> {
            Ok(())
        }

        async fn insert(&self, _metadata: &ModelMetadata) -> Result<()> {
            Ok(())
        }
    }

    struct EmptyFeatures;

    #[async_trait]
    impl FeatureSource for EmptyFeatures {
        async fn features(
            &self,
            _symbols: &[String],
            _as_of: NaiveDate,
        ) -> Result<HashMap<String, HashMap<String, f64>>> {
            Ok(HashMap::new())
        }

        async fn latest_timestamp(&self) -> Result<Option<DateTime<chrono::Utc>>> {
            Ok(None)
        }
    }

    fn write_artifact(dir: &tempfile::TempDir, name: &str) -> String {
        let artifact = ModelArtifact {
            descriptor: StrategyDescriptor::Momentum {
                feature: "mom_20".to_string(),
                scale: 1.0,
            },
            feature_names: vec!["mom_20".to_string()],
        };
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(serde_json::to_vec(&artifact).unwrap().as_slice())
            .unwrap();
        path.to_string_lossy().into_owned()
    }

    fn metadata(version: &str, path: String) -> ModelMetadata {
        ModelMetadata {
            strategy_id: "default".to_string(),
            version: version.to_string(),
            status: ModelStatus::Active,
            model_path: path,
            performance_metrics: serde_json::json!({}),
            activated_at: Some(Utc::now()),
            deactivated_at: None,
        }
    }

    fn service(registry: Arc<StubRegistry>) -> SignalService {
        SignalService::new(
            registry,
            Arc::new(EmptyFeatures),
            SignalServiceConfig::default(),
            Metrics::default(),
        )
    }

    #[tokio::test]
    async fn test_poll_swaps_on_new_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(&dir, "v1.json");
        let registry = Arc::new(StubRegistry {
            active: Mutex::new(Some(metadata("v1", path))),
        });
        let service = service(registry.clone());

        let outcome = service.poll_registry().await.unwrap();
        assert!(outcome.reloaded);
        assert_eq!(outcome.current_version.as_deref(), Some("v1"));

        // Same fingerprint: second poll is a no-op
        let outcome = service.poll_registry().await.unwrap();
        assert!(!outcome.reloaded);

        // Activate v2 and poll again
        let path2 = write_artifact(&dir, "v2.json");
        *registry.active.lock() = Some(metadata("v2", path2));
        let outcome = service.poll_registry().await.unwrap();
        assert!(outcome.reloaded);
        assert_eq!(outcome.previous_version.as_deref(), Some("v1"));
        assert_eq!(outcome.current_version.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_failed_load_keeps_current_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(&dir, "v1.json");
        let registry = Arc::new(StubRegistry {
            active: Mutex::new(Some(metadata("v1", path))),
        });
        let service = service(registry.clone());
        service.poll_registry().await.unwrap();

        // Point v2 at a missing file
        *registry.active.lock() = Some(metadata("v2", "/nonexistent/model.json".to_string()));
        let outcome = service.poll_registry().await.unwrap();
        assert!(!outcome.reloaded);
        assert_eq!(outcome.current_version.as_deref(), Some("v1"));
        assert_eq!(
            service.loaded_model().unwrap().metadata.version,
            "v1".to_string()
        );
    }

    #[tokio::test]
    async fn test_no_active_row_reports_unloaded() {
        let registry = Arc::new(StubRegistry {
            active: Mutex::new(None),
        });
        let service = service(registry);
        let outcome = service.poll_registry().await.unwrap();
        assert!(!outcome.reloaded);
        assert!(outcome.current_version.is_none());
        assert!(service.loaded_model().is_none());
    }
}
