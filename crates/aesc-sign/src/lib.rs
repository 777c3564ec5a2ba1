//! ÆSC Meshwork signing
//!
//! Canonical presence messages and the signatures nodes attach to them.
//!
//! # Canonical message
//!
//! Every ping (and every signal post) is authenticated over a single
//! pipe-separated string:
//!
//! ```text
//! nodeId|stickerId|ts|nonce
//! ```
//!
//! An absent sticker id contributes an empty field, and `ts` is the Unix
//! timestamp in milliseconds written in decimal.
//!
//! # Schemes
//!
//! - **HMAC-SHA256**: shared secret, lowercase hex digest. The secret is
//!   provisioned out of band; the server and the node both hold it.
//! - **Ed25519**: the node keeps its signing key and registers only the
//!   public half.
//!
//! # Example
//!
//! ```
//! use aesc_sign::{canonical_message, PingBuilder, Secret};
//!
//! assert_eq!(canonical_message("n1", None, 1000, "abc"), "n1||1000|abc");
//!
//! let secret = Secret::parse("correct horse battery staple").unwrap();
//! let ping = PingBuilder::new("n1")
//!     .at(1_700_000_000_000)
//!     .nonce("0123456789abcdef")
//!     .sign_hmac(&secret)
//!     .unwrap();
//! assert_eq!(ping.sig.len(), 64);
//! ```

mod credential;
mod envelope;
mod error;
mod keys;
mod mac;

pub use credential::{Credential, Scheme};
pub use envelope::{PingBuilder, SignedPing};
pub use error::{Error, Result};
pub use keys::{ed25519_sign, ed25519_verify, generate_signing_key, parse_signing_key};
pub use mac::{hmac_sign, hmac_verify, Secret};

/// Field separator of the canonical message.
pub const SEPARATOR: char = '|';

/// Build the canonical signing string `nodeId|stickerId|ts|nonce`.
pub fn canonical_message(node_id: &str, sticker_id: Option<&str>, ts: i64, nonce: &str) -> String {
    format!(
        "{node_id}{SEPARATOR}{}{SEPARATOR}{ts}{SEPARATOR}{nonce}",
        sticker_id.unwrap_or("")
    )
}

/// Generate a fresh random nonce (16 bytes, hex).
pub fn random_nonce() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Generate a pseudonymous node id (`n-` followed by 12 random bytes in hex).
pub fn generate_node_id() -> String {
    format!("n-{}", hex::encode(rand::random::<[u8; 12]>()))
}
