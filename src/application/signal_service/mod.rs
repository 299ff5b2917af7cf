pub mod reload;

use crate::domain::errors::ControlPlaneError;
use crate::domain::model::LoadedModel;
use crate::domain::ports::FeatureSource;
use crate::domain::repositories::ModelRegistryRepository;
use crate::domain::signals::{Signal, SignalMetadata, SignalSet};
use crate::infrastructure::observability::Metrics;
use arc_swap::ArcSwapOption;
use chrono::{NaiveDate, Utc};
use rayon::prelude::*;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Scale applied to clamped z-scores so predictions read as bounded daily
/// returns (z of +1 -> +2%).
const PREDICTION_SCALE: f64 = 0.02;
const Z_CLAMP: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct SignalServiceConfig {
    pub strategy_id: String,
    /// Minimum number of symbols with features before signals are produced.
    pub min_universe: usize,
    /// Long/short book size: top-N long, bottom-N short.
    pub top_n: usize,
    pub reload_interval: Duration,
}

impl Default for SignalServiceConfig {
    fn default() -> Self {
        Self {
            strategy_id: "default".to_string(),
            min_universe: 2,
            top_n: 1,
            reload_interval: Duration::from_secs(300),
        }
    }
}

/// Model registry client plus signal generator.
///
/// The loaded model lives behind an `ArcSwapOption`: requests grab the
/// current handle lock-free, the poller publishes a replacement with a single
/// pointer swap, and in-flight requests keep scoring on the handle they
/// already hold.
pub struct SignalService {
    pub(crate) registry: Arc<dyn ModelRegistryRepository>,
    pub(crate) features: Arc<dyn FeatureSource>,
    pub(crate) model: ArcSwapOption<LoadedModel>,
    pub(crate) config: SignalServiceConfig,
    pub(crate) metrics: Metrics,
}

impl SignalService {
    pub fn new(
        registry: Arc<dyn ModelRegistryRepository>,
        features: Arc<dyn FeatureSource>,
        config: SignalServiceConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry,
            features,
            model: ArcSwapOption::empty(),
            config,
            metrics,
        }
    }

    /// Current model handle, if one has been loaded.
    pub fn loaded_model(&self) -> Option<Arc<LoadedModel>> {
        self.model.load_full()
    }

    pub fn strategy_id(&self) -> &str {
        &self.config.strategy_id
    }

    /// Generate target weights for a universe at a date.
    pub async fn generate(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
        top_n_override: Option<usize>,
    ) -> Result<SignalSet, ControlPlaneError> {
        let Some(model) = self.loaded_model() else {
            self.metrics
                .signal_requests_total
                .with_label_values(&["model_not_loaded"])
                .inc();
            return Err(ControlPlaneError::ModelNotLoaded {
                strategy_id: self.config.strategy_id.clone(),
            });
        };
        let top_n = top_n_override.unwrap_or(self.config.top_n);
        if top_n == 0 {
            return Err(ControlPlaneError::validation("top_n must be positive"));
        }

        let feature_map = self
            .features
            .features(symbols, as_of)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(format!("feature fetch: {}", e)))?;

        if feature_map.len() < self.config.min_universe {
            warn!(
                "SignalService: Only {}/{} symbols have features for {} (min {})",
                feature_map.len(),
                symbols.len(),
                as_of,
                self.config.min_universe
            );
            self.metrics
                .signal_requests_total
                .with_label_values(&["insufficient_features"])
                .inc();
            return Ok(SignalSet::empty_with_warning(
                model.metadata.version.clone(),
                self.config.strategy_id.clone(),
                as_of,
                format!(
                    "only {} of {} symbols had features; minimum is {}",
                    feature_map.len(),
                    symbols.len(),
                    self.config.min_universe
                ),
            ));
        }

        // Model scoring is CPU-bound; run it on the worker pool.
        let artifact = model.artifact.clone();
        let scored = tokio::task::spawn_blocking(move || {
            let mut scored: Vec<(String, f64)> = feature_map
                .par_iter()
                .filter_map(|(symbol, features)| {
                    artifact.score(features).map(|raw| (symbol.clone(), raw))
                })
                .collect();
            scored.sort_by(|a, b| a.0.cmp(&b.0));
            scored
        })
        .await
        .map_err(|e| {
            ControlPlaneError::storage_permanent(format!("scoring task failed: {}", e))
        })?;

        if scored.len() < self.config.min_universe {
            self.metrics
                .signal_requests_total
                .with_label_values(&["insufficient_features"])
                .inc();
            return Ok(SignalSet::empty_with_warning(
                model.metadata.version.clone(),
                self.config.strategy_id.clone(),
                as_of,
                format!(
                    "only {} symbols scorable; minimum is {}",
                    scored.len(),
                    self.config.min_universe
                ),
            ));
        }
        if 2 * top_n > scored.len() {
            self.metrics
                .signal_requests_total
                .with_label_values(&["universe_too_small"])
                .inc();
            return Err(ControlPlaneError::validation(format!(
                "universe of {} cannot support top-{} plus bottom-{}",
                scored.len(),
                top_n,
                top_n
            )));
        }

        let signals = build_signals(&scored, top_n);
        self.metrics
            .signal_requests_total
            .with_label_values(&["ok"])
            .inc();

        Ok(SignalSet {
            signals,
            metadata: SignalMetadata {
                model_version: model.metadata.version.clone(),
                strategy_id: self.config.strategy_id.clone(),
                as_of_date: as_of,
                generated_at: Utc::now(),
                warning: None,
            },
        })
    }
}

/// Normalize raw scores, rank them, and assign equal top/bottom-N weights.
///
/// Degenerate predictions (zero variance) map to all-zero signals. Ranks are
/// dense: tied predictions share a rank. Selection ties break
/// lexicographically by symbol.
fn build_signals(scored: &[(String, f64)], top_n: usize) -> Vec<Signal> {
    let raw: Vec<f64> = scored.iter().map(|(_, v)| *v).collect();
    let mean = Statistics::mean(raw.iter());
    let sd = Statistics::population_std_dev(raw.iter());

    let predictions: Vec<(String, f64)> = if sd == 0.0 || !sd.is_finite() {
        scored.iter().map(|(s, _)| (s.clone(), 0.0)).collect()
    } else {
        scored
            .iter()
            .map(|(s, v)| {
                let z = ((v - mean) / sd).clamp(-Z_CLAMP, Z_CLAMP);
                (s.clone(), z * PREDICTION_SCALE)
            })
            .collect()
    };

    // Dense ranks over descending prediction; exact ties share a rank.
    let mut by_pred: Vec<(String, f64)> = predictions.clone();
    by_pred.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let mut ranks: HashMap<String, u32> = HashMap::new();
    let mut rank = 0u32;
    let mut last_pred: Option<f64> = None;
    for (symbol, pred) in &by_pred {
        if last_pred != Some(*pred) {
            rank += 1;
            last_pred = Some(*pred);
        }
        ranks.insert(symbol.clone(), rank);
    }

    let all_zero = predictions.iter().all(|(_, p)| *p == 0.0);
    let weight = Decimal::ONE / Decimal::from(top_n as u64);
    let longs: Vec<&String> = by_pred.iter().take(top_n).map(|(s, _)| s).collect();
    // Shorts get their own ascending sort so the lexicographic tie-break
    // applies on that end too.
    let mut by_pred_asc: Vec<&(String, f64)> = predictions.iter().collect();
    by_pred_asc.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let shorts: Vec<&String> = by_pred_asc.iter().take(top_n).map(|(s, _)| s).collect();

    predictions
        .iter()
        .map(|(symbol, pred)| {
            let target_weight = if all_zero {
                Decimal::ZERO
            } else if longs.contains(&symbol) {
                weight
            } else if shorts.contains(&symbol) {
                -weight
            } else {
                Decimal::ZERO
            };
            Signal {
                symbol: symbol.clone(),
                predicted_return: *pred,
                rank: ranks.get(symbol).copied().unwrap_or(0),
                target_weight,
            }
        })
        .collect()
}
