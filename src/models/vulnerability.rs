//! Vulnerability records.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VulnerabilitySeverity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for VulnerabilitySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Remediation lifecycle. Transitions only move forward along
/// `Open → Pending → Mitigated → Resolved`; skipping ahead is allowed,
/// moving backwards is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VulnerabilityStatus {
    Open,
    Pending,
    Mitigated,
    Resolved,
}

impl VulnerabilityStatus {
    /// Position along the remediation chain.
    #[must_use]
    pub fn stage(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Pending => 1,
            Self::Mitigated => 2,
            Self::Resolved => 3,
        }
    }
}

impl fmt::Display for VulnerabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Mitigated => "mitigated",
            Self::Resolved => "resolved",
        };
        f.write_str(s)
    }
}

/// Tracked weakness with a remediation lifecycle.
///
/// Invariant: `discovered_at ≤ mitigated_at ≤ resolved_at` along the status
/// chain; the optional timestamps are set when their stage is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: VulnerabilitySeverity,
    pub status: VulnerabilityStatus,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub mitigated_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub affected_systems: Vec<String>,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(VulnerabilityStatus::Open.stage() < VulnerabilityStatus::Pending.stage());
        assert!(VulnerabilityStatus::Pending.stage() < VulnerabilityStatus::Mitigated.stage());
        assert!(VulnerabilityStatus::Mitigated.stage() < VulnerabilityStatus::Resolved.stage());
    }

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(VulnerabilitySeverity::Low < VulnerabilitySeverity::Critical);
    }
}
