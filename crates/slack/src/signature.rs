//! Slack request signing: `v0=` + hex(HMAC-SHA256(signing_secret, "v0:{timestamp}:{body}")).

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const DEFAULT_MAX_SKEW_SECS: i64 = 300;

const VERSION: &str = "v0";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing `{0}` header")]
    MissingHeader(&'static str),
    #[error("request timestamp is not a unix timestamp")]
    InvalidTimestamp,
    #[error("request timestamp is {skew_secs}s away from now")]
    Stale { skew_secs: u64 },
    #[error("signature is not a `v0=` hex digest")]
    Malformed,
    #[error("signature does not match request body")]
    Mismatch,
}

pub struct SignatureVerifier {
    secret: SecretString,
    max_skew_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret, max_skew_secs: DEFAULT_MAX_SKEW_SECS }
    }

    pub fn with_max_skew(mut self, max_skew_secs: i64) -> Self {
        self.max_skew_secs = max_skew_secs;
        self
    }

    pub fn verify_now(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), SignatureError> {
        let timestamp = timestamp.ok_or(SignatureError::MissingHeader(TIMESTAMP_HEADER))?;
        let signature = signature.ok_or(SignatureError::MissingHeader(SIGNATURE_HEADER))?;
        self.verify(timestamp, signature, body, chrono::Utc::now().timestamp())
    }

    pub fn verify(
        &self,
        timestamp: &str,
        signature: &str,
        body: &[u8],
        now: i64,
    ) -> Result<(), SignatureError> {
        let sent_at = timestamp.trim().parse::<i64>().map_err(|_| SignatureError::InvalidTimestamp)?;
        let skew_secs = now
            .checked_sub(sent_at)
            .map(i64::unsigned_abs)
            .ok_or(SignatureError::InvalidTimestamp)?;
        if skew_secs > self.max_skew_secs.unsigned_abs() {
            return Err(SignatureError::Stale { skew_secs });
        }

        let digest = signature
            .trim()
            .strip_prefix("v0=")
            .and_then(|hex_digest| hex::decode(hex_digest).ok())
            .ok_or(SignatureError::Malformed)?;

        self.mac(timestamp.trim(), body)?.verify_slice(&digest).map_err(|_| SignatureError::Mismatch)
    }

    /// Header value Slack would send for this body.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
        let digest = self.mac(timestamp, body)?.finalize().into_bytes();
        Ok(format!("{VERSION}={}", hex::encode(digest)))
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| SignatureError::Mismatch)?;
        mac.update(VERSION.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        Ok(mac)
    }
}
