//! Time-windowed request tokens binding an admin form to one action.
//!
//! Time is cut into ticks of half the lifetime. A token is the leading
//! bytes of `HMAC-SHA256(secret, "<tick>|<action>")`, hex encoded, and is
//! accepted during its own tick and the one after.

use std::fmt;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_BYTES: usize = 10;

/// Which window accepted a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceAge {
    /// Issued during the current tick.
    Fresh,
    /// Issued during the previous tick.
    Aging,
}

#[derive(Clone)]
pub struct NonceSigner {
    mac: HmacSha256,
    lifetime_secs: i64,
}

impl fmt::Debug for NonceSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonceSigner")
            .field("lifetime_secs", &self.lifetime_secs)
            .finish_non_exhaustive()
    }
}

impl NonceSigner {
    pub fn new(secret: &str, lifetime_secs: i64) -> AppResult<Self> {
        if secret.is_empty() {
            return Err(AppError::new("NONCE/SECRET", "Nonce secret must not be empty"));
        }
        if lifetime_secs < 2 {
            return Err(AppError::new(
                "NONCE/LIFETIME",
                "Nonce lifetime must be at least two seconds",
            )
            .with_context("lifetime_secs", lifetime_secs.to_string()));
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|err| AppError::new("NONCE/SECRET", err.to_string()))?;
        Ok(NonceSigner { mac, lifetime_secs })
    }

    fn tick_at(&self, now: i64) -> i64 {
        let half = self.lifetime_secs / 2;
        (now + half - 1).div_euclid(half)
    }

    fn keyed(&self, tick: i64, action: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(tick.to_string().as_bytes());
        mac.update(b"|");
        mac.update(action.as_bytes());
        mac
    }

    pub fn create(&self, action: &str) -> String {
        self.create_at(action, Utc::now().timestamp())
    }

    pub fn create_at(&self, action: &str, now: i64) -> String {
        let tag = self.keyed(self.tick_at(now), action).finalize().into_bytes();
        hex::encode(&tag[..TOKEN_BYTES])
    }

    pub fn verify(&self, token: &str, action: &str) -> Option<NonceAge> {
        self.verify_at(token, action, Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, action: &str, now: i64) -> Option<NonceAge> {
        let Ok(bytes) = hex::decode(token) else {
            return None;
        };
        if bytes.len() != TOKEN_BYTES {
            return None;
        }
        let tick = self.tick_at(now);
        if self.keyed(tick, action).verify_truncated_left(&bytes).is_ok() {
            return Some(NonceAge::Fresh);
        }
        if self.keyed(tick - 1, action).verify_truncated_left(&bytes).is_ok() {
            return Some(NonceAge::Aging);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400;

    fn signer() -> NonceSigner {
        NonceSigner::new("test-secret", DAY).unwrap()
    }

    #[test]
    fn token_is_twenty_hex_chars() {
        let token = signer().create_at("attachments-migrate-1", 1_700_000_000);
        assert_eq!(token.len(), 20);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn accepts_current_and_previous_tick_only() {
        let signer = signer();
        let issued = 1_700_000_000;
        let token = signer.create_at("attachments-migrate-2", issued);

        assert_eq!(
            signer.verify_at(&token, "attachments-migrate-2", issued),
            Some(NonceAge::Fresh)
        );
        assert_eq!(
            signer.verify_at(&token, "attachments-migrate-2", issued + DAY / 2),
            Some(NonceAge::Aging)
        );
        assert_eq!(signer.verify_at(&token, "attachments-migrate-2", issued + DAY + 1), None);
    }

    #[test]
    fn rejects_other_actions_secrets_and_garbage() {
        let signer = signer();
        let now = 1_700_000_000;
        let token = signer.create_at("attachments-migrate-1", now);

        assert_eq!(signer.verify_at(&token, "attachments-migrate-2", now), None);
        let other = NonceSigner::new("other-secret", DAY).unwrap();
        assert_eq!(other.verify_at(&token, "attachments-migrate-1", now), None);
        assert_eq!(signer.verify_at("not-hex", "attachments-migrate-1", now), None);
        assert_eq!(signer.verify_at("", "attachments-migrate-1", now), None);
        assert_eq!(signer.verify_at(&token[..10], "attachments-migrate-1", now), None);
    }

    #[test]
    fn rejects_bad_construction() {
        assert_eq!(NonceSigner::new("", DAY).unwrap_err().code(), "NONCE/SECRET");
        assert_eq!(NonceSigner::new("s", 1).unwrap_err().code(), "NONCE/LIFETIME");
    }

    #[test]
    fn debug_hides_the_key() {
        let rendered = format!("{:?}", signer());
        assert!(!rendered.contains("test-secret"));
    }
}
