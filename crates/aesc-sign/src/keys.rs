//! Ed25519 node keys.

use crate::error::{Error, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

/// Generate a new node signing key.
pub fn generate_signing_key() -> SigningKey {
    SigningKey::from_bytes(&rand::random::<[u8; 32]>())
}

/// Parse a hex-encoded 32-byte signing key seed.
pub fn parse_signing_key(seed_hex: &str) -> Result<SigningKey> {
    let bytes = hex::decode(seed_hex.trim()).map_err(|_| Error::InvalidHex { field: "signing key" })?;
    let seed: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("signing key must be 32 bytes, got {}", bytes.len())))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Sign a message, returning the 64-byte signature in hex.
pub fn ed25519_sign(key: &SigningKey, message: &str) -> String {
    hex::encode(key.sign(message.as_bytes()).to_bytes())
}

/// Verify a hex signature against a 32-byte public key.
pub fn ed25519_verify(public_key: &[u8], message: &str, sig_hex: &str) -> Result<()> {
    let key = verifying_key(public_key)?;
    let sig = hex::decode(sig_hex).map_err(|_| Error::InvalidHex { field: "sig" })?;
    let sig = Signature::from_slice(&sig).map_err(|_| Error::InvalidSignature)?;
    key.verify_strict(message.as_bytes(), &sig)
        .map_err(|_| Error::InvalidSignature)
}

pub(crate) fn verifying_key(public_key: &[u8]) -> Result<VerifyingKey> {
    let bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("public key must be 32 bytes, got {}", public_key.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| Error::InvalidKey(e.to_string()))
}
