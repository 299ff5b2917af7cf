use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One symbol's model output: raw prediction, dense rank (ties share a rank),
/// and the equal-weight target assigned by top/bottom-N selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub predicted_return: f64,
    pub rank: u32,
    pub target_weight: Decimal,
}

/// Signal set for one universe and date, stamped with the model version that
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSet {
    pub signals: Vec<Signal>,
    pub metadata: SignalMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMetadata {
    pub model_version: String,
    pub strategy_id: String,
    pub as_of_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SignalSet {
    pub fn empty_with_warning(
        model_version: String,
        strategy_id: String,
        as_of_date: NaiveDate,
        warning: impl Into<String>,
    ) -> Self {
        Self {
            signals: Vec::new(),
            metadata: SignalMetadata {
                model_version,
                strategy_id,
                as_of_date,
                generated_at: Utc::now(),
                warning: Some(warning.into()),
            },
        }
    }

    /// Non-zero target weights keyed by symbol, the risk manager's input.
    pub fn target_weights(&self) -> Vec<(String, Decimal)> {
        self.signals
            .iter()
            .filter(|s| !s.target_weight.is_zero())
            .map(|s| (s.symbol.clone(), s.target_weight))
            .collect()
    }
}
