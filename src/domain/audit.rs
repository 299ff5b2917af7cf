use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only record of a control-plane action. Written on order submits,
/// cancels, flattens, circuit breaker transitions, reconcile heals, and
/// manual overrides; only retention jobs ever delete rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub actor: String,
    pub action: String,
    pub outcome: String,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        actor: impl Into<String>,
        action: impl Into<String>,
        outcome: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            actor: actor.into(),
            action: action.into(),
            outcome: outcome.into(),
            details,
            ip_address: None,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_get_unique_ids() {
        let a = AuditEvent::new("order", "gateway", "submit", "ok", serde_json::json!({}));
        let b = AuditEvent::new("order", "gateway", "submit", "ok", serde_json::json!({}));
        assert_ne!(a.id, b.id);
    }
}
