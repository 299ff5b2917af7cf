use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Circuit breaker state shared by every service through the coordination
/// store.
///
/// `Open` is normal operation. `Tripped` blocks risk-increasing actions.
/// `QuietPeriod` means conditions normalized but a cool-down is still
/// running before entries resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Open,
    Tripped,
    QuietPeriod,
}

impl BreakerState {
    pub fn allows_entries(&self) -> bool {
        matches!(self, BreakerState::Open)
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerState::Open => "OPEN",
            BreakerState::Tripped => "TRIPPED",
            BreakerState::QuietPeriod => "QUIET_PERIOD",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    Drawdown,
    BrokerErrors,
    DataStaleness,
    Manual,
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TripReason::Drawdown => "drawdown",
            TripReason::BrokerErrors => "broker_errors",
            TripReason::DataStaleness => "data_staleness",
            TripReason::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

/// The singleton breaker record. Serialized as JSON into one coordination
/// store key; transitions replace the whole record via compare-and-set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerRecord {
    pub state: BreakerState,
    pub tripped_at: Option<DateTime<Utc>>,
    pub trip_reason: Option<TripReason>,
    pub trip_details: Option<String>,
    pub reset_at: Option<DateTime<Utc>>,
    pub reset_by: Option<String>,
    pub trip_count_today: u32,
}

impl BreakerRecord {
    pub fn open() -> Self {
        Self {
            state: BreakerState::Open,
            tripped_at: None,
            trip_reason: None,
            trip_details: None,
            reset_at: None,
            reset_by: None,
            trip_count_today: 0,
        }
    }

    pub fn trip(&self, reason: TripReason, details: impl Into<String>) -> Self {
        Self {
            state: BreakerState::Tripped,
            tripped_at: Some(Utc::now()),
            trip_reason: Some(reason),
            trip_details: Some(details.into()),
            reset_at: None,
            reset_by: None,
            trip_count_today: self.trip_count_today + 1,
        }
    }

    pub fn into_quiet_period(&self, reset_by: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.state = BreakerState::QuietPeriod;
        next.reset_at = Some(Utc::now());
        next.reset_by = Some(reset_by.into());
        next
    }

    pub fn reopen(&self) -> Self {
        let mut next = self.clone();
        next.state = BreakerState::Open;
        next
    }
}

impl Default for BreakerRecord {
    fn default() -> Self {
        Self::open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trip_increments_count_and_records_reason() {
        let record = BreakerRecord::open();
        let tripped = record.trip(TripReason::Drawdown, "daily loss -3.2%");
        assert_eq!(tripped.state, BreakerState::Tripped);
        assert_eq!(tripped.trip_count_today, 1);
        assert_eq!(tripped.trip_reason, Some(TripReason::Drawdown));
        assert!(tripped.tripped_at.is_some());

        let again = tripped.trip(TripReason::Manual, "operator");
        assert_eq!(again.trip_count_today, 2);
    }

    #[test]
    fn test_quiet_period_then_reopen_keeps_history() {
        let tripped = BreakerRecord::open().trip(TripReason::BrokerErrors, "5xx spike");
        let quiet = tripped.into_quiet_period("ops@desk");
        assert_eq!(quiet.state, BreakerState::QuietPeriod);
        assert_eq!(quiet.reset_by.as_deref(), Some("ops@desk"));

        let reopened = quiet.reopen();
        assert_eq!(reopened.state, BreakerState::Open);
        assert_eq!(reopened.trip_count_today, 1);
        assert!(reopened.state.allows_entries());
    }

    #[test]
    fn test_serde_round_trip_uses_wire_names() {
        let record = BreakerRecord::open().trip(TripReason::DataStaleness, "bars 40m old");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("TRIPPED"));
        assert!(json.contains("data_staleness"));
        let back: BreakerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, BreakerState::Tripped);
    }
}
