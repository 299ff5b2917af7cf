use thiserror::Error;

/// Risk rejection categories surfaced across service boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRejectionKind {
    Blacklist,
    PerSymbolCap,
    TotalNotional,
    DailyLoss,
}

impl std::fmt::Display for RiskRejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskRejectionKind::Blacklist => "blacklist",
            RiskRejectionKind::PerSymbolCap => "per_symbol_cap",
            RiskRejectionKind::TotalNotional => "total_notional",
            RiskRejectionKind::DailyLoss => "daily_loss",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorClass {
    /// Transport failures, timeouts, 5xx — safe to retry with the same id.
    Retriable,
    /// 4xx and validation rejections — retries will not help.
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorClass {
    Transient,
    Permanent,
}

/// Control-plane error taxonomy.
///
/// Every variant carries a stable `code()` that crosses service boundaries in
/// JSON responses, and an HTTP status for the API layer. These are ordinary
/// control-flow values, never assertions.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    #[error("Not authorized: {reason}")]
    Auth { reason: String },

    #[error("Circuit breaker tripped: {reason}")]
    CircuitBreakerTripped { reason: String },

    #[error("Risk violation ({kind}): {detail}")]
    RiskViolation {
        kind: RiskRejectionKind,
        detail: String,
    },

    #[error("No model loaded for strategy '{strategy_id}'")]
    ModelNotLoaded { strategy_id: String },

    #[error("Reconciled gate unset for service '{service}'")]
    ReconcilerNotReady { service: String },

    #[error("Broker error: {detail}")]
    Broker {
        class: BrokerErrorClass,
        detail: String,
    },

    #[error("Storage error: {detail}")]
    Storage {
        class: StorageErrorClass,
        detail: String,
    },

    #[error("Rate limit exceeded: {detail}")]
    RateLimited { detail: String },
}

impl ControlPlaneError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    pub fn broker_retriable(detail: impl Into<String>) -> Self {
        Self::Broker {
            class: BrokerErrorClass::Retriable,
            detail: detail.into(),
        }
    }

    pub fn broker_permanent(detail: impl Into<String>) -> Self {
        Self::Broker {
            class: BrokerErrorClass::Permanent,
            detail: detail.into(),
        }
    }

    pub fn storage_transient(detail: impl Into<String>) -> Self {
        Self::Storage {
            class: StorageErrorClass::Transient,
            detail: detail.into(),
        }
    }

    pub fn storage_permanent(detail: impl Into<String>) -> Self {
        Self::Storage {
            class: StorageErrorClass::Permanent,
            detail: detail.into(),
        }
    }

    /// Stable machine-readable code used in API responses and audit rows.
    pub fn code(&self) -> &'static str {
        match self {
            ControlPlaneError::Validation { .. } => "validation_error",
            ControlPlaneError::Auth { .. } => "auth_error",
            ControlPlaneError::CircuitBreakerTripped { .. } => "circuit_breaker_tripped",
            ControlPlaneError::RiskViolation { .. } => "risk_violation",
            ControlPlaneError::ModelNotLoaded { .. } => "model_not_loaded",
            ControlPlaneError::ReconcilerNotReady { .. } => "reconciler_not_ready",
            ControlPlaneError::Broker { .. } => "broker_error",
            ControlPlaneError::Storage { .. } => "storage_error",
            ControlPlaneError::RateLimited { .. } => "rate_limited",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ControlPlaneError::Validation { .. } => 400,
            ControlPlaneError::Auth { .. } => 403,
            ControlPlaneError::CircuitBreakerTripped { .. } => 409,
            ControlPlaneError::RiskViolation { .. } => 409,
            ControlPlaneError::ModelNotLoaded { .. } => 503,
            ControlPlaneError::ReconcilerNotReady { .. } => 503,
            ControlPlaneError::Broker { class, .. } => match class {
                BrokerErrorClass::Retriable => 504,
                BrokerErrorClass::Permanent => 502,
            },
            ControlPlaneError::Storage { .. } => 500,
            ControlPlaneError::RateLimited { .. } => 429,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ControlPlaneError::Broker {
                class: BrokerErrorClass::Retriable,
                ..
            } | ControlPlaneError::Storage {
                class: StorageErrorClass::Transient,
                ..
            }
        )
    }
}
