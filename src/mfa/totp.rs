//! TOTP code generation and verification (RFC 6238).

use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::error::{AccessError, AccessResult};
use crate::random::RandomSource;

const SECRET_LEN: usize = 20;

/// HMAC hash family for code derivation. SHA-1 is the interoperable default;
/// most authenticator apps ignore anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotpAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl TotpAlgorithm {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }
}

/// TOTP parameters. Captured per enrollment so a config change never breaks
/// previously enrolled secrets.
#[derive(Debug, Clone)]
pub struct TotpConfig {
    pub algorithm: TotpAlgorithm,
    /// Code length, 6 to 8 digits.
    pub digits: u32,
    /// Step length in seconds, 15 to 120.
    pub period: u64,
    /// Verification accepts codes from this many steps either side of now.
    pub skew: u64,
    /// Label shown in authenticator apps.
    pub issuer: String,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            algorithm: TotpAlgorithm::Sha1,
            digits: 6,
            period: 30,
            skew: 1,
            issuer: "access-guard".to_string(),
        }
    }
}

impl TotpConfig {
    pub fn validate(&self) -> AccessResult<()> {
        if !(6..=8).contains(&self.digits) {
            return Err(AccessError::invalid_input(
                "totp digits must be between 6 and 8",
            ));
        }
        if !(15..=120).contains(&self.period) {
            return Err(AccessError::invalid_input(
                "totp period must be between 15 and 120 seconds",
            ));
        }
        Ok(())
    }
}

/// Stateless TOTP engine for one parameter set.
#[derive(Debug, Clone)]
pub struct TotpGenerator {
    config: TotpConfig,
}

impl TotpGenerator {
    pub fn new(config: TotpConfig) -> AccessResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &TotpConfig {
        &self.config
    }

    /// Fresh Base32 (no padding) seed.
    #[must_use]
    pub fn generate_secret(&self, random: &dyn RandomSource) -> String {
        let mut buf = [0u8; SECRET_LEN];
        random.fill(&mut buf);
        BASE32_NOPAD.encode(&buf)
    }

    /// `otpauth://` URI for authenticator-app enrollment.
    #[must_use]
    pub fn provisioning_uri(&self, secret: &str, account: &str) -> String {
        let issuer = urlencoding::encode(&self.config.issuer);
        let account = urlencoding::encode(account);
        format!(
            "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&algorithm={}&digits={}&period={}",
            self.config.algorithm.as_str(),
            self.config.digits,
            self.config.period,
        )
    }

    /// The code valid at `at` for the given seed.
    pub fn code_at(&self, secret: &str, at: DateTime<Utc>) -> AccessResult<String> {
        let key = decode_secret(secret)?;
        let counter = self.counter_at(at)?;
        self.hotp(&key, counter)
    }

    /// Accepts codes within `skew` steps either side of `at`. Every window
    /// is checked so timing does not reveal which one matched.
    pub fn verify_at(&self, secret: &str, code: &str, at: DateTime<Utc>) -> AccessResult<bool> {
        let key = decode_secret(secret)?;
        let center = self.counter_at(at)?;
        let skew = self.config.skew;
        let mut matched = false;
        for counter in center.saturating_sub(skew)..=center.saturating_add(skew) {
            let expected = self.hotp(&key, counter)?;
            matched |= constant_time_eq(expected.as_bytes(), code.as_bytes());
        }
        Ok(matched)
    }

    fn counter_at(&self, at: DateTime<Utc>) -> AccessResult<u64> {
        let secs = u64::try_from(at.timestamp())
            .map_err(|_| AccessError::invalid_input("totp time precedes the unix epoch"))?;
        Ok(secs / self.config.period)
    }

    fn hotp(&self, key: &[u8], counter: u64) -> AccessResult<String> {
        let msg = counter.to_be_bytes();
        let digest = match self.config.algorithm {
            TotpAlgorithm::Sha1 => hmac_digest::<Hmac<Sha1>>(key, &msg)?,
            TotpAlgorithm::Sha256 => hmac_digest::<Hmac<Sha256>>(key, &msg)?,
            TotpAlgorithm::Sha512 => hmac_digest::<Hmac<Sha512>>(key, &msg)?,
        };
        // RFC 4226 dynamic truncation
        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        let bin = (u32::from(digest[offset] & 0x7f) << 24)
            | (u32::from(digest[offset + 1]) << 16)
            | (u32::from(digest[offset + 2]) << 8)
            | u32::from(digest[offset + 3]);
        let code = bin % 10u32.pow(self.config.digits);
        Ok(format!(
            "{code:0width$}",
            width = self.config.digits as usize
        ))
    }
}

fn hmac_digest<M: Mac + hmac::digest::KeyInit>(key: &[u8], msg: &[u8]) -> AccessResult<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| AccessError::internal("hmac key of invalid length"))?;
    mac.update(msg);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn decode_secret(secret: &str) -> AccessResult<Vec<u8>> {
    BASE32_NOPAD
        .decode(secret.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| AccessError::invalid_input("totp secret is not valid base32"))
}
