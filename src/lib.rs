//! Access-control and security-audit core for security testing tooling.
//!
//! The crate assembles five cooperating managers over pluggable stores:
//!
//! - [`auth::AuthManager`] — login, lockout, and the password lifecycle
//! - [`session::SessionManager`] — session expiry, inactivity, and the MFA gate
//! - [`mfa::MfaManager`] — TOTP enrollment, challenges, and backup codes
//! - [`rbac::RbacManager`] — role definitions and permission checks
//! - [`security::SecurityManager`] — incidents and vulnerability tracking
//!
//! Everything security-relevant flows into an append-only [`audit`] log with
//! monotone timestamps. [`system::AccessControlSystem`] wires a complete
//! assembly:
//!
//! ```no_run
//! use access_guard::config::AccessControlConfig;
//! use access_guard::context::RequestContext;
//! use access_guard::system::AccessControlSystem;
//!
//! # async fn demo() -> access_guard::error::AccessResult<()> {
//! let system = AccessControlSystem::in_memory(AccessControlConfig::default()).await?;
//! let ctx = RequestContext::system();
//! let user = system
//!     .auth()
//!     .create_user(&ctx, "alice", "alice@example.com", "Sw0rdfish-9", [])
//!     .await?;
//! system.rbac().assign_role(&ctx, &user.id, "operator").await?;
//! let login = system.auth().login(&ctx, "alice", "Sw0rdfish-9").await?;
//! let session = system.sessions().resolve(&ctx, &login.session.id).await?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod mfa;
pub mod models;
pub mod password;
pub mod random;
pub mod rbac;
pub mod security;
pub mod session;
pub mod store;
pub mod system;

pub use audit::AuditLogger;
pub use auth::{AuthManager, LoginResult};
pub use config::AccessControlConfig;
pub use context::{Principal, RequestContext};
pub use error::{AccessError, AccessResult};
pub use mfa::MfaManager;
pub use models::{AuditEntry, AuditSeverity, Session, User};
pub use rbac::RbacManager;
pub use security::SecurityManager;
pub use session::SessionManager;
pub use system::AccessControlSystem;
