//! Multi-factor authentication manager.
//!
//! Enrollment is two-phase: `enroll` issues secret material in a pending
//! state, `confirm_enrollment` proves possession and activates it. The
//! user record's `mfa_enabled` flag and method set are derived from the MFA
//! record and rewritten after every state change.
//!
//! Every mutation runs under a per-user async lock, so challenge
//! consumption and backup-code redemption stay at-most-once even when the
//! backing store suspends between the read and the write-back.

pub mod backup;
pub mod totp;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::audit::AuditLogger;
use crate::clock::SharedClock;
use crate::config::MfaPolicy;
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};
use crate::models::audit::{AuditAction, AuditEntry, AuditSeverity};
use crate::models::mfa::{
    BackupCode, MfaChallenge, MfaEnrollment, MfaMethod, MfaMethodState, MfaRecord,
};
use crate::models::user::User;
use crate::random::{SharedIdGenerator, SharedRandom};
use crate::store::{MfaStore, UserStore};

pub use totp::{TotpAlgorithm, TotpConfig, TotpGenerator};

/// Material handed to the user once, at enrollment time.
#[derive(Debug, Clone)]
pub struct EnrollmentSetup {
    pub method: MfaMethod,
    /// Base32 TOTP seed. Never surfaced again.
    pub secret: String,
    pub provisioning_uri: String,
    /// Must be echoed back to `confirm_enrollment`.
    pub confirmation_token: String,
}

pub struct MfaManager {
    mfa_store: Arc<dyn MfaStore>,
    user_store: Arc<dyn UserStore>,
    audit: Arc<dyn AuditLogger>,
    policy: MfaPolicy,
    totp: TotpGenerator,
    clock: SharedClock,
    ids: SharedIdGenerator,
    random: SharedRandom,
    /// Serializes read-modify-write sequences against the MFA store.
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MfaManager {
    pub fn new(
        mfa_store: Arc<dyn MfaStore>,
        user_store: Arc<dyn UserStore>,
        audit: Arc<dyn AuditLogger>,
        policy: MfaPolicy,
        clock: SharedClock,
        ids: SharedIdGenerator,
        random: SharedRandom,
    ) -> AccessResult<Self> {
        let totp = TotpGenerator::new(policy.totp.clone())?;
        Ok(Self {
            mfa_store,
            user_store,
            audit,
            policy,
            totp,
            clock,
            ids,
            random,
            user_locks: DashMap::new(),
        })
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Begin TOTP enrollment. Re-enrolling while pending replaces the
    /// pending secret; re-enrolling an active method is a conflict.
    pub async fn enroll(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        method: MfaMethod,
    ) -> AccessResult<EnrollmentSetup> {
        if method != MfaMethod::Totp {
            return Err(AccessError::invalid_input(
                "only totp supports explicit enrollment; backup codes are generated",
            ));
        }
        let user = self.user_store.get_by_id(ctx, user_id).await?;
        let now = self.clock.now();

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let mut record = match self.mfa_store.get(ctx, user_id).await {
            Ok(record) => record,
            Err(AccessError::NotFound(_)) => MfaRecord::new(user_id, now),
            Err(e) => return Err(e),
        };
        if let Some(existing) = record.enrollments.get(&method) {
            if existing.state == MfaMethodState::Active {
                return Err(AccessError::conflict("totp is already enrolled"));
            }
        }

        let secret = self.totp.generate_secret(self.random.as_ref());
        let confirmation_token = self.ids.generate();
        record.enrollments.insert(
            method,
            MfaEnrollment {
                method,
                state: MfaMethodState::Pending,
                secret: secret.clone(),
                confirmation_token: confirmation_token.clone(),
                enrolled_at: now,
            },
        );
        record.updated_at = now;
        self.mfa_store.upsert(ctx, &record).await?;

        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Create, "mfa", "totp enrollment started")
                    .with_context(ctx)
                    .with_resource_id(user_id)
                    .with_status("pending"),
            )
            .await?;

        Ok(EnrollmentSetup {
            method,
            provisioning_uri: self.totp.provisioning_uri(&secret, &user.username),
            secret,
            confirmation_token,
        })
    }

    /// Activate a pending enrollment. Requires the confirmation token from
    /// [`EnrollmentSetup`] plus a current code from the new secret.
    pub async fn confirm_enrollment(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        method: MfaMethod,
        confirmation_token: &str,
        code: &str,
    ) -> AccessResult<()> {
        let now = self.clock.now();
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let mut record = self.mfa_store.get(ctx, user_id).await?;
        let enrollment = record
            .enrollments
            .get_mut(&method)
            .ok_or_else(|| AccessError::not_found(format!("{method} enrollment")))?;
        if enrollment.state == MfaMethodState::Active {
            return Err(AccessError::conflict(format!("{method} is already active")));
        }
        if enrollment.confirmation_token != confirmation_token {
            return Err(AccessError::invalid_input("confirmation token does not match"));
        }
        if !self.totp.verify_at(&enrollment.secret, code, now)? {
            self.audit
                .append(
                    ctx,
                    AuditEntry::new(AuditAction::Security, "mfa", "enrollment confirmation failed")
                        .with_context(ctx)
                        .with_resource_id(user_id)
                        .with_severity(AuditSeverity::Medium)
                        .with_status("failed"),
                )
                .await?;
            return Err(AccessError::invalid_input("code does not match"));
        }

        enrollment.state = MfaMethodState::Active;
        enrollment.confirmation_token.clear();
        record.updated_at = now;
        self.mfa_store.upsert(ctx, &record).await?;
        self.sync_user_flags(ctx, user_id, &record).await?;

        info!(user_id, %method, "mfa method activated");
        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Update, "mfa", format!("{method} activated"))
                    .with_context(ctx)
                    .with_resource_id(user_id)
                    .with_status("success"),
            )
            .await?;
        Ok(())
    }

    /// Issue a verification challenge for an active method, superseding any
    /// live challenge for the same (user, method) pair.
    pub async fn start_verification(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        method: MfaMethod,
    ) -> AccessResult<MfaChallenge> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let record = self.mfa_store.get(ctx, user_id).await?;
        let active = match method {
            MfaMethod::Totp => record
                .enrollments
                .get(&method)
                .map_or(false, |e| e.state == MfaMethodState::Active),
            MfaMethod::BackupCode => record.backup_codes.iter().any(|c| !c.used),
        };
        if !active {
            return Err(AccessError::invalid_input(format!(
                "{method} is not active for this user"
            )));
        }

        let now = self.clock.now();
        let challenge = MfaChallenge {
            id: self.ids.generate(),
            user_id: user_id.to_string(),
            method,
            created_at: now,
            expires_at: now + self.policy.challenge_lifetime,
            consumed: false,
        };
        self.mfa_store.put_challenge(ctx, &challenge).await?;
        Ok(challenge)
    }

    /// Resolve a challenge with a code. A successful verification consumes
    /// the challenge; a failed one leaves it live until expiry.
    pub async fn verify(
        &self,
        ctx: &RequestContext,
        challenge_id: &str,
        code: &str,
    ) -> AccessResult<()> {
        let now = self.clock.now();
        // peek to learn the owner, then re-read under that user's lock so a
        // racing verify cannot consume the same challenge twice
        let user_id = self
            .mfa_store
            .get_challenge(ctx, challenge_id)
            .await?
            .user_id;
        let lock = self.user_lock(&user_id);
        let _guard = lock.lock().await;
        let mut challenge = self.mfa_store.get_challenge(ctx, challenge_id).await?;
        if challenge.consumed {
            return Err(AccessError::conflict("challenge already used"));
        }
        if challenge.is_expired(now) {
            return Err(AccessError::expired("mfa challenge"));
        }

        let user_id = challenge.user_id.clone();
        let outcome = match challenge.method {
            MfaMethod::Totp => {
                let record = self.mfa_store.get(ctx, &user_id).await?;
                let enrollment = record
                    .enrollments
                    .get(&MfaMethod::Totp)
                    .filter(|e| e.state == MfaMethodState::Active)
                    .ok_or_else(|| AccessError::not_found("totp enrollment"))?;
                if self.totp.verify_at(&enrollment.secret, code, now)? {
                    Ok(())
                } else {
                    Err(AccessError::invalid_input("code does not match"))
                }
            }
            MfaMethod::BackupCode => self
                .redeem_backup_code_locked(ctx, &user_id, code)
                .await
                .map_err(|e| match e {
                    // an unrecognized code is a bad proof, not a missing record
                    AccessError::NotFound(_) => {
                        AccessError::invalid_input("backup code does not match")
                    }
                    other => other,
                }),
        };

        match outcome {
            Ok(()) => {
                challenge.consumed = true;
                self.mfa_store.update_challenge(ctx, &challenge).await?;
                self.audit
                    .append(
                        ctx,
                        AuditEntry::new(AuditAction::Authorize, "mfa", "second factor verified")
                            .with_context(ctx)
                            .with_resource_id(&user_id)
                            .with_status("success"),
                    )
                    .await?;
                Ok(())
            }
            Err(e) => {
                self.audit
                    .append(
                        ctx,
                        AuditEntry::new(AuditAction::Security, "mfa", "second factor rejected")
                            .with_context(ctx)
                            .with_resource_id(&user_id)
                            .with_severity(AuditSeverity::Medium)
                            .with_status("failed")
                            .with_metadata("method", challenge.method.to_string().into()),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Replace the user's backup codes. Returns the plaintext codes; only
    /// hashes are stored.
    pub async fn generate_backup_codes(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> AccessResult<Vec<String>> {
        self.user_store.get_by_id(ctx, user_id).await?;
        let now = self.clock.now();
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let mut record = match self.mfa_store.get(ctx, user_id).await {
            Ok(record) => record,
            Err(AccessError::NotFound(_)) => MfaRecord::new(user_id, now),
            Err(e) => return Err(e),
        };

        let codes = backup::generate_codes(
            self.random.as_ref(),
            self.policy.backup_code_count,
            self.policy.backup_code_length,
        );
        record.backup_codes = codes
            .iter()
            .map(|c| BackupCode {
                hash: backup::hash_code(c),
                used: false,
            })
            .collect();
        record.updated_at = now;
        self.mfa_store.upsert(ctx, &record).await?;
        self.sync_user_flags(ctx, user_id, &record).await?;

        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Create, "mfa", "backup codes regenerated")
                    .with_context(ctx)
                    .with_resource_id(user_id)
                    .with_status("success")
                    .with_metadata("count", codes.len().into()),
            )
            .await?;
        Ok(codes)
    }

    /// Burn a backup code. An unknown code is `NotFound`; a known code that
    /// was already spent is `Conflict`.
    pub async fn redeem_backup_code(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        code: &str,
    ) -> AccessResult<()> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        self.redeem_backup_code_locked(ctx, user_id, code).await
    }

    /// Caller holds the user lock.
    async fn redeem_backup_code_locked(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        code: &str,
    ) -> AccessResult<()> {
        let now = self.clock.now();
        let mut record = self.mfa_store.get(ctx, user_id).await?;
        let idx = backup::find_match(&record.backup_codes, code)
            .ok_or_else(|| AccessError::not_found("backup code"))?;
        if record.backup_codes[idx].used {
            return Err(AccessError::conflict("backup code already used"));
        }
        record.backup_codes[idx].used = true;
        record.updated_at = now;
        self.mfa_store.upsert(ctx, &record).await?;
        Ok(())
    }

    /// Remove a method. Disabling the last active method turns `mfa_enabled`
    /// off on the user record.
    pub async fn disable(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        method: MfaMethod,
    ) -> AccessResult<()> {
        let now = self.clock.now();
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let mut record = self.mfa_store.get(ctx, user_id).await?;
        let removed = match method {
            MfaMethod::Totp => record.enrollments.remove(&method).is_some(),
            MfaMethod::BackupCode => {
                let had = !record.backup_codes.is_empty();
                record.backup_codes.clear();
                had
            }
        };
        if !removed {
            return Err(AccessError::not_found(format!("{method} enrollment")));
        }
        record.updated_at = now;
        self.mfa_store.upsert(ctx, &record).await?;
        self.sync_user_flags(ctx, user_id, &record).await?;

        self.audit
            .append(
                ctx,
                AuditEntry::new(AuditAction::Delete, "mfa", format!("{method} disabled"))
                    .with_context(ctx)
                    .with_resource_id(user_id)
                    .with_severity(AuditSeverity::Medium)
                    .with_status("success"),
            )
            .await?;
        Ok(())
    }

    /// Methods currently active for a user. A missing record means none.
    pub async fn active_methods(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> AccessResult<Vec<MfaMethod>> {
        match self.mfa_store.get(ctx, user_id).await {
            Ok(record) => Ok(derived_methods(&record)),
            Err(AccessError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Rewrite the derived MFA fields on the user record.
    async fn sync_user_flags(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        record: &MfaRecord,
    ) -> AccessResult<()> {
        let mut user: User = self.user_store.get_by_id(ctx, user_id).await?;
        let methods = derived_methods(record);
        user.mfa_enabled = !methods.is_empty();
        user.mfa_methods = methods.into_iter().collect();
        user.updated_at = self.clock.now();
        self.user_store.update(ctx, &user).await
    }
}

/// Active methods implied by a record: enrolled-and-confirmed TOTP, plus
/// backup codes whenever an unspent one remains.
fn derived_methods(record: &MfaRecord) -> Vec<MfaMethod> {
    let mut methods = record.active_methods();
    if record.backup_codes.iter().any(|c| !c.used) {
        methods.push(MfaMethod::BackupCode);
    }
    methods
}
