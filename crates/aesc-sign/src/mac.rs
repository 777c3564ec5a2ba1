//! HMAC-SHA256 signatures over canonical messages.

use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Prefix that marks a secret as hex-encoded.
const HEX_PREFIX: &str = "hex:";

/// A shared HMAC secret.
///
/// Secrets are decoded explicitly: `hex:` followed by hex digits is
/// hex-decoded, anything else is used as its UTF-8 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Parse a secret from user input.
    pub fn parse(input: &str) -> Result<Self> {
        let bytes = match input.strip_prefix(HEX_PREFIX) {
            Some(hex_part) => {
                hex::decode(hex_part.trim()).map_err(|_| Error::InvalidHex { field: "secret" })?
            }
            None => input.as_bytes().to_vec(),
        };
        Self::from_bytes(bytes)
    }

    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::EmptySecret);
        }
        Ok(Self(bytes))
    }

    /// Generate a random 32-byte secret.
    pub fn generate() -> Self {
        Self(rand::random::<[u8; 32]>().to_vec())
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex form with the `hex:` prefix, accepted back by [`Secret::parse`].
    pub fn to_prefixed_hex(&self) -> String {
        format!("{HEX_PREFIX}{}", hex::encode(&self.0))
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret(<{} bytes>)", self.0.len())
    }
}

fn keyed(secret: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret).map_err(|e| Error::InvalidKey(e.to_string()))
}

/// Sign a message, returning the lowercase hex digest.
pub fn hmac_sign(secret: &[u8], message: &str) -> Result<String> {
    let mut mac = keyed(secret)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex digest in constant time.
pub fn hmac_verify(secret: &[u8], message: &str, sig_hex: &str) -> Result<()> {
    let sig = hex::decode(sig_hex).map_err(|_| Error::InvalidHex { field: "sig" })?;
    let mut mac = keyed(secret)?;
    mac.update(message.as_bytes());
    mac.verify_slice(&sig).map_err(|_| Error::InvalidSignature)
}
