//! Signed presence envelopes.

use crate::credential::Credential;
use crate::error::Result;
use crate::keys::ed25519_sign;
use crate::mac::{hmac_sign, Secret};
use crate::{canonical_message, random_nonce};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

/// A signed ping as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPing {
    pub node_id: String,
    #[serde(default)]
    pub sticker_id: Option<String>,
    /// Unix milliseconds
    pub ts: i64,
    pub nonce: String,
    pub sig: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

impl SignedPing {
    /// Reconstruct the canonical message this ping claims to sign.
    pub fn message(&self) -> String {
        canonical_message(&self.node_id, self.sticker_id.as_deref(), self.ts, &self.nonce)
    }

    /// Check the signature against a credential.
    pub fn verify(&self, credential: &Credential) -> Result<()> {
        credential.verify(&self.message(), &self.sig)
    }
}

/// Client-side builder that fills in a timestamp and nonce and signs.
#[derive(Debug, Clone)]
pub struct PingBuilder {
    node_id: String,
    sticker_id: Option<String>,
    ts: Option<i64>,
    nonce: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl PingBuilder {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            sticker_id: None,
            ts: None,
            nonce: None,
            lat: None,
            lon: None,
        }
    }

    /// Attach a sticker id (a physical check-in point).
    pub fn sticker(mut self, sticker_id: impl Into<String>) -> Self {
        self.sticker_id = Some(sticker_id.into());
        self
    }

    /// Geotag the ping.
    pub fn location(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }

    /// Fix the timestamp instead of using the current time.
    pub fn at(mut self, ts: i64) -> Self {
        self.ts = Some(ts);
        self
    }

    /// Fix the nonce instead of generating one.
    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Sign with a shared HMAC secret.
    pub fn sign_hmac(self, secret: &Secret) -> Result<SignedPing> {
        self.finish(|message| hmac_sign(secret.as_bytes(), message))
    }

    /// Sign with an Ed25519 key.
    pub fn sign_ed25519(self, key: &SigningKey) -> Result<SignedPing> {
        self.finish(|message| Ok(ed25519_sign(key, message)))
    }

    fn finish(self, sign: impl FnOnce(&str) -> Result<String>) -> Result<SignedPing> {
        let ts = self.ts.unwrap_or_else(now_ms);
        let nonce = self.nonce.unwrap_or_else(random_nonce);
        let sticker_id = self.sticker_id.filter(|s| !s.is_empty());
        let message = canonical_message(&self.node_id, sticker_id.as_deref(), ts, &nonce);
        let sig = sign(&message)?;
        Ok(SignedPing {
            node_id: self.node_id,
            sticker_id,
            ts,
            nonce,
            sig,
            lat: self.lat,
            lon: self.lon,
        })
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_signing_key;

    #[test]
    fn hmac_ping_verifies() {
        let secret = Secret::parse("s3cret").unwrap();
        let ping = PingBuilder::new("n1")
            .at(1000)
            .nonce("abc")
            .sign_hmac(&secret)
            .unwrap();
        assert_eq!(ping.message(), "n1||1000|abc");
        assert!(ping.verify(&Credential::hmac(&secret)).is_ok());
    }

    #[test]
    fn ed25519_ping_with_sticker_verifies() {
        let key = generate_signing_key();
        let ping = PingBuilder::new("n1")
            .sticker("s-7")
            .location(51.5, -0.12)
            .sign_ed25519(&key)
            .unwrap();
        let cred = Credential::ed25519(key.verifying_key().as_bytes()).unwrap();
        assert!(ping.verify(&cred).is_ok());
        assert_eq!(ping.lat, Some(51.5));
    }

    #[test]
    fn coordinates_are_unsigned_but_identity_is_signed() {
        let secret = Secret::parse("s3cret").unwrap();
        let cred = Credential::hmac(&secret);
        let mut ping = PingBuilder::new("n1").sign_hmac(&secret).unwrap();

        // Coordinates are not part of the signed message.
        ping.lat = Some(10.0);
        assert!(ping.verify(&cred).is_ok());

        ping.node_id = "n2".into();
        assert!(ping.verify(&cred).is_err());
    }

    #[test]
    fn wire_format_is_camel_case() {
        let json = r#"{"nodeId":"n1","stickerId":null,"ts":1000,"nonce":"abc","sig":"00"}"#;
        let ping: SignedPing = serde_json::from_str(json).unwrap();
        assert_eq!(ping.node_id, "n1");
        assert_eq!(ping.sticker_id, None);
        assert_eq!(ping.lat, None);

        let out = serde_json::to_value(&ping).unwrap();
        assert_eq!(out["nodeId"], "n1");
        assert_eq!(out["ts"], 1000);
    }

    #[test]
    fn generated_fields_are_filled() {
        let secret = Secret::generate();
        let ping = PingBuilder::new("n1").sign_hmac(&secret).unwrap();
        assert!(ping.ts > 0);
        assert_eq!(ping.nonce.len(), 32);
    }
}
