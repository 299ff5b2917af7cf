//! Roles and step-up evidence for destructive actions.
//!
//! The console's authentication stack lives outside the control plane; what
//! crosses the boundary is a role claim plus, for destructive endpoints, a
//! short-lived HMAC proof that the caller re-authenticated.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    ViewState,
    SubmitOrders,
    Destructive,
    BreakerControl,
}

/// Permissions per known role. Unknown roles get the empty slice — no
/// permissions.
pub fn role_permissions(role: &str) -> &'static [Permission] {
    match role {
        "admin" => &[
            Permission::ViewState,
            Permission::SubmitOrders,
            Permission::Destructive,
            Permission::BreakerControl,
        ],
        "operator" => &[
            Permission::ViewState,
            Permission::SubmitOrders,
            Permission::BreakerControl,
        ],
        "viewer" => &[Permission::ViewState],
        _ => &[],
    }
}

pub fn role_has(role: &str, permission: Permission) -> bool {
    role_permissions(role).contains(&permission)
}

/// Verifier for step-up tokens of the form `hex(hmac(secret, "user|unix_ts"))`
/// presented alongside the user id and timestamp.
#[derive(Clone)]
pub struct StepUpVerifier {
    secret: Vec<u8>,
    max_age_secs: i64,
}

impl StepUpVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, max_age_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            max_age_secs,
        }
    }

    /// Mint a token; used by the CLI and by tests.
    pub fn mint(&self, user: &str, unix_ts: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(format!("{}|{}", user, unix_ts).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time verification plus a freshness window.
    pub fn verify(&self, user: &str, unix_ts: i64, token_hex: &str) -> bool {
        let age = Utc::now().timestamp() - unix_ts;
        if age < 0 || age > self.max_age_secs {
            return false;
        }
        let Ok(token) = hex::decode(token_hex) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return false;
        };
        mac.update(format!("{}|{}", user, unix_ts).as_bytes());
        mac.verify_slice(&token).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_role_has_no_permissions() {
        assert!(role_permissions("intern").is_empty());
        assert!(!role_has("intern", Permission::ViewState));
    }

    #[test]
    fn test_known_roles_are_defined() {
        for role in ["admin", "operator", "viewer"] {
            assert!(!role_permissions(role).is_empty());
        }
        assert!(role_has("admin", Permission::Destructive));
        assert!(!role_has("operator", Permission::Destructive));
        assert!(!role_has("viewer", Permission::SubmitOrders));
    }

    #[test]
    fn test_step_up_round_trip() {
        let verifier = StepUpVerifier::new(b"secret".to_vec(), 300);
        let now = Utc::now().timestamp();
        let token = verifier.mint("ops@desk", now);
        assert!(verifier.verify("ops@desk", now, &token));
        // Wrong user fails
        assert!(!verifier.verify("someone@else", now, &token));
        // Tampered token fails
        assert!(!verifier.verify("ops@desk", now, "deadbeef"));
    }

    #[test]
    fn test_step_up_rejects_stale_timestamp() {
        let verifier = StepUpVerifier::new(b"secret".to_vec(), 60);
        let stale = Utc::now().timestamp() - 120;
        let token = verifier.mint("ops@desk", stale);
        assert!(!verifier.verify("ops@desk", stale, &token));
    }
}
