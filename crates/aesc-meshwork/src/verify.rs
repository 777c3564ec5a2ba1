//! Ping verification: clock skew, credential, signature, nonce.
//!
//! Checks run in that order. The nonce is consumed only after the signature
//! verifies, so a third party cannot burn a node's nonces.

use crate::error::{Error, Result};
use crate::models::{validate_coords, validate_node_id, validate_token, MIN_NONCE_LEN};
use crate::storage::Storage;
use aesc_sign::SignedPing;
use std::str::FromStr;
use std::sync::Arc;

/// Largest accepted distance between a ping's `ts` and server time.
pub const MAX_CLOCK_SKEW_MS: i64 = 5 * 60 * 1000;

/// How long a nonce is remembered. Anything older is already stale.
pub const NONCE_RETENTION_MS: i64 = 2 * MAX_CLOCK_SKEW_MS;

/// How strictly unregistered nodes are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingPolicy {
    /// Only pings from registered nodes with valid signatures are accepted.
    #[default]
    Strict,
    /// Pings from unregistered nodes are accepted and stored unverified.
    /// Registered nodes are still checked. Not a security boundary.
    Advisory,
}

impl FromStr for PingPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "advisory" => Ok(Self::Advisory),
            other => Err(Error::Config(format!("unknown ping policy: {other}"))),
        }
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub verified: bool,
}

/// Verifies signed envelopes against registered credentials.
pub struct Verifier {
    storage: Arc<Storage>,
    policy: PingPolicy,
}

impl Verifier {
    pub fn new(storage: Arc<Storage>, policy: PingPolicy) -> Self {
        Self { storage, policy }
    }

    pub fn policy(&self) -> PingPolicy {
        self.policy
    }

    /// Check field shapes without touching storage.
    pub fn validate_fields(ping: &SignedPing) -> Result<()> {
        validate_node_id(&ping.node_id)?;
        if let Some(sticker) = ping.sticker_id.as_deref().filter(|s| !s.is_empty()) {
            validate_token("stickerId", sticker, 1)?;
        }
        validate_token("nonce", &ping.nonce, MIN_NONCE_LEN)?;
        if ping.sig.is_empty() {
            return Err(Error::InvalidInput("sig is required".into()));
        }
        if ping.sig.len() % 2 != 0 || !ping.sig.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidInput("sig must be hex".into()));
        }
        validate_coords(ping.lat, ping.lon)
    }

    /// Run every check and consume the nonce.
    pub fn verify(&self, ping: &SignedPing, now_ms: i64) -> Result<Verdict> {
        Self::validate_fields(ping)?;

        if ping.ts.abs_diff(now_ms) > MAX_CLOCK_SKEW_MS as u64 {
            return Err(Error::StaleTimestamp);
        }

        let verified = match self.storage.get_credential(&ping.node_id)? {
            Some(registered) => {
                ping.verify(&registered.credential)?;
                true
            }
            None if self.policy == PingPolicy::Advisory => false,
            None => return Err(Error::UnknownNode),
        };

        if !self.storage.record_nonce(&ping.node_id, &ping.nonce, now_ms)? {
            return Err(Error::NonceReused);
        }

        Ok(Verdict { verified })
    }

    /// Drop nonces that can no longer pass the skew check.
    pub fn prune_nonces(&self, now_ms: i64) -> Result<usize> {
        let removed = self.storage.prune_nonces(now_ms - NONCE_RETENTION_MS)?;
        if removed > 0 {
            tracing::debug!(removed, "pruned nonces");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeCredential;
    use aesc_sign::{Credential, PingBuilder, Secret};
    use chrono::Utc;
    use tempfile::tempdir;

    const NOW: i64 = 1_700_000_000_000;

    fn setup(policy: PingPolicy) -> (tempfile::TempDir, Verifier, Secret) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let secret = Secret::parse("hex:00112233445566778899aabbccddeeff").unwrap();
        storage
            .put_credential(&NodeCredential {
                node_id: "n1".into(),
                credential: Credential::hmac(&secret),
                created_at: Utc::now(),
            })
            .unwrap();
        (dir, Verifier::new(storage, policy), secret)
    }

    fn signed(secret: &Secret, ts: i64, nonce: &str) -> SignedPing {
        PingBuilder::new("n1").at(ts).nonce(nonce).sign_hmac(secret).unwrap()
    }

    #[test]
    fn accepts_then_rejects_replay() {
        let (_dir, verifier, secret) = setup(PingPolicy::Strict);
        let ping = signed(&secret, NOW, "nonce-0001");
        assert_eq!(verifier.verify(&ping, NOW).unwrap(), Verdict { verified: true });
        assert!(matches!(verifier.verify(&ping, NOW), Err(Error::NonceReused)));
    }

    #[test]
    fn skew_boundary() {
        let (_dir, verifier, secret) = setup(PingPolicy::Strict);
        let edge = signed(&secret, NOW - MAX_CLOCK_SKEW_MS, "nonce-edge");
        assert!(verifier.verify(&edge, NOW).is_ok());
        let stale = signed(&secret, NOW - MAX_CLOCK_SKEW_MS - 1, "nonce-old");
        assert!(matches!(verifier.verify(&stale, NOW), Err(Error::StaleTimestamp)));
        let future = signed(&secret, NOW + MAX_CLOCK_SKEW_MS + 1, "nonce-new");
        assert!(matches!(verifier.verify(&future, NOW), Err(Error::StaleTimestamp)));
    }

    #[test]
    fn bad_signature_does_not_consume_nonce() {
        let (_dir, verifier, secret) = setup(PingPolicy::Strict);
        let mut forged = signed(&secret, NOW, "nonce-0002");
        forged.sig = "ab".repeat(32);
        assert!(matches!(verifier.verify(&forged, NOW), Err(Error::InvalidSignature)));

        let genuine = signed(&secret, NOW, "nonce-0002");
        assert!(verifier.verify(&genuine, NOW).is_ok());
    }

    #[test]
    fn tampered_sticker_fails() {
        let (_dir, verifier, secret) = setup(PingPolicy::Strict);
        let mut ping = PingBuilder::new("n1")
            .sticker("s1")
            .at(NOW)
            .nonce("nonce-0003")
            .sign_hmac(&secret)
            .unwrap();
        ping.sticker_id = Some("s2".into());
        assert!(matches!(verifier.verify(&ping, NOW), Err(Error::InvalidSignature)));
    }

    #[test]
    fn unknown_node_depends_on_policy() {
        let other = Secret::parse("other").unwrap();
        let ping = PingBuilder::new("stranger").at(NOW).nonce("nonce-0004").sign_hmac(&other).unwrap();

        let (_dir, strict, _) = setup(PingPolicy::Strict);
        assert!(matches!(strict.verify(&ping, NOW), Err(Error::UnknownNode)));

        let (_dir2, advisory, _) = setup(PingPolicy::Advisory);
        assert_eq!(advisory.verify(&ping, NOW).unwrap(), Verdict { verified: false });
        assert!(matches!(advisory.verify(&ping, NOW), Err(Error::NonceReused)));
    }

    #[test]
    fn advisory_still_checks_registered_nodes() {
        let (_dir, verifier, secret) = setup(PingPolicy::Advisory);
        let mut ping = signed(&secret, NOW, "nonce-0005");
        ping.sig = "00".repeat(32);
        assert!(matches!(verifier.verify(&ping, NOW), Err(Error::InvalidSignature)));
    }

    #[test]
    fn field_validation() {
        let (_dir, verifier, secret) = setup(PingPolicy::Strict);
        let mut ping = signed(&secret, NOW, "nonce-0006");
        ping.sig = "xyz".into();
        assert!(matches!(verifier.verify(&ping, NOW), Err(Error::InvalidInput(_))));

        let mut ping = signed(&secret, NOW, "short");
        ping.nonce = "short".into();
        assert!(matches!(verifier.verify(&ping, NOW), Err(Error::InvalidInput(_))));

        let mut ping = signed(&secret, NOW, "nonce-0007");
        ping.lat = Some(120.0);
        assert!(matches!(verifier.verify(&ping, NOW), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn pruning_reopens_old_nonces() {
        let (_dir, verifier, secret) = setup(PingPolicy::Strict);
        let ping = signed(&secret, NOW, "nonce-0008");
        verifier.verify(&ping, NOW).unwrap();
        assert_eq!(verifier.prune_nonces(NOW + 1).unwrap(), 0);
        assert_eq!(verifier.prune_nonces(NOW + NONCE_RETENTION_MS + 1).unwrap(), 1);
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("strict".parse::<PingPolicy>().unwrap(), PingPolicy::Strict);
        assert_eq!(" Advisory ".parse::<PingPolicy>().unwrap(), PingPolicy::Advisory);
        assert!("lax".parse::<PingPolicy>().is_err());
    }
}
