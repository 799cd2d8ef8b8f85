//! Domain entities shared across the managers.

pub mod audit;
pub mod incident;
pub mod mfa;
pub mod role;
pub mod session;
pub mod user;
pub mod vulnerability;

pub use audit::{AuditAction, AuditEntry, AuditSeverity};
pub use incident::{IncidentStatus, SecurityIncident};
pub use mfa::{BackupCode, MfaChallenge, MfaEnrollment, MfaMethod, MfaMethodState, MfaRecord};
pub use role::Role;
pub use session::{MfaGate, Session};
pub use user::{Credential, User};
pub use vulnerability::{Vulnerability, VulnerabilitySeverity, VulnerabilityStatus};
