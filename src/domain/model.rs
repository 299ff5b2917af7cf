use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Registry lifecycle of a trained model artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Staging,
    Active,
    Inactive,
    Archived,
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelStatus::Staging => "staging",
            ModelStatus::Active => "active",
            ModelStatus::Inactive => "inactive",
            ModelStatus::Archived => "archived",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ModelStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staging" => Ok(ModelStatus::Staging),
            "active" => Ok(ModelStatus::Active),
            "inactive" => Ok(ModelStatus::Inactive),
            "archived" => Ok(ModelStatus::Archived),
            _ => Err(format!("Invalid model status: {}", s)),
        }
    }
}

/// One registry row per (strategy, version). The registry enforces that at
/// most one row per strategy is `active` at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub strategy_id: String,
    pub version: String,
    pub status: ModelStatus,
    pub model_path: String,
    pub performance_metrics: serde_json::Value,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

/// Strategy descriptor resolved at registry-load time.
///
/// Strategies differ only by artifact and hyperparameters; the family tag
/// selects the scoring branch as data, not as a type hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum StrategyDescriptor {
    /// Linear scoring: prediction = intercept + dot(weights, features).
    Linear {
        intercept: f64,
        weights: HashMap<String, f64>,
    },
    /// Momentum scoring: prediction = feature value under `feature`, scaled.
    Momentum { feature: String, scale: f64 },
}

/// Deserialized model artifact — the payload stored at `model_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub descriptor: StrategyDescriptor,
    /// Feature names the model expects; symbols missing any of them are
    /// skipped during scoring.
    pub feature_names: Vec<String>,
}

impl ModelArtifact {
    /// Score one symbol's feature vector. Returns `None` when a required
    /// feature is absent.
    pub fn score(&self, features: &HashMap<String, f64>) -> Option<f64> {
        for name in &self.feature_names {
            if !features.contains_key(name) {
                return None;
            }
        }
        match &self.descriptor {
            StrategyDescriptor::Linear { intercept, weights } => {
                let mut acc = *intercept;
                for (name, w) in weights {
                    acc += w * features.get(name).copied().unwrap_or(0.0);
                }
                Some(acc)
            }
            StrategyDescriptor::Momentum { feature, scale } => {
                features.get(feature).map(|v| v * scale)
            }
        }
    }
}

/// A loaded model plus the registry row it came from. Published atomically
/// by the signal service's hot-reload poller.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub metadata: ModelMetadata,
    pub artifact: ModelArtifact,
    pub fingerprint: String,
    pub loaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_linear_scoring() {
        let artifact = ModelArtifact {
            descriptor: StrategyDescriptor::Linear {
                intercept: 0.5,
                weights: features(&[("mom_20", 2.0), ("vol_20", -1.0)]),
            },
            feature_names: vec!["mom_20".to_string(), "vol_20".to_string()],
        };
        let score = artifact
            .score(&features(&[("mom_20", 1.0), ("vol_20", 0.5)]))
            .unwrap();
        assert!((score - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_feature_skips_symbol() {
        let artifact = ModelArtifact {
            descriptor: StrategyDescriptor::Momentum {
                feature: "mom_20".to_string(),
                scale: 1.0,
            },
            feature_names: vec!["mom_20".to_string()],
        };
        assert!(artifact.score(&features(&[("other", 1.0)])).is_none());
    }

    #[test]
    fn test_descriptor_wire_format_is_tagged() {
        let json = r#"{"family":"momentum","feature":"ret_5d","scale":0.1}"#;
        let descriptor: StrategyDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(
            descriptor,
            StrategyDescriptor::Momentum {
                feature: "ret_5d".to_string(),
                scale: 0.1
            }
        );
    }
}
