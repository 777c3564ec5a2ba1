//! Node credentials held by the verifier.

use crate::error::{Error, Result};
use crate::keys::{ed25519_verify, verifying_key};
use crate::mac::{hmac_verify, Secret};
use serde::{Deserialize, Serialize};

/// Signature scheme of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Shared-secret HMAC-SHA256.
    Hmac,
    /// Registered Ed25519 public key.
    Ed25519,
}

impl Scheme {
    /// Short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Hmac => "hmac",
            Scheme::Ed25519 => "ed25519",
        }
    }
}

impl std::str::FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hmac" | "hmac-sha256" => Ok(Scheme::Hmac),
            "ed25519" => Ok(Scheme::Ed25519),
            other => Err(Error::InvalidKey(format!("unknown scheme: {other}"))),
        }
    }
}

/// Verification material for one node.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Signature scheme
    pub scheme: Scheme,

    /// HMAC secret or Ed25519 public key, hex on the wire
    #[serde(with = "hex")]
    key: Vec<u8>,
}

impl Credential {
    /// Shared-secret credential.
    pub fn hmac(secret: &Secret) -> Self {
        Self {
            scheme: Scheme::Hmac,
            key: secret.as_bytes().to_vec(),
        }
    }

    /// Public-key credential; rejects keys that are not valid curve points.
    pub fn ed25519(public_key: &[u8]) -> Result<Self> {
        verifying_key(public_key)?;
        Ok(Self {
            scheme: Scheme::Ed25519,
            key: public_key.to_vec(),
        })
    }

    /// Public-key credential from hex.
    pub fn ed25519_from_hex(public_key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(public_key_hex.trim())
            .map_err(|_| Error::InvalidHex { field: "public key" })?;
        Self::ed25519(&bytes)
    }

    /// Build a credential from a scheme name and user-supplied key text.
    ///
    /// HMAC keys go through [`Secret::parse`]; Ed25519 keys are hex.
    pub fn parse(scheme: Scheme, key: &str) -> Result<Self> {
        match scheme {
            Scheme::Hmac => Ok(Self::hmac(&Secret::parse(key)?)),
            Scheme::Ed25519 => Self::ed25519_from_hex(key),
        }
    }

    /// Verify a hex signature over `message`.
    pub fn verify(&self, message: &str, sig_hex: &str) -> Result<()> {
        match self.scheme {
            Scheme::Hmac => hmac_verify(&self.key, message, sig_hex),
            Scheme::Ed25519 => ed25519_verify(&self.key, message, sig_hex),
        }
    }

    /// Printable identifier: the public key for Ed25519, only the secret
    /// length for HMAC.
    pub fn fingerprint(&self) -> String {
        match self.scheme {
            Scheme::Ed25519 => hex::encode(&self.key),
            Scheme::Hmac => format!("hmac:{}-byte", self.key.len()),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("scheme", &self.scheme)
            .field("key", &self.fingerprint())
            .finish()
    }
}
