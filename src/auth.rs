//! Request signature checks
//!
//! Clients sign a canonical `key=value&...` string built from the request's
//! business fields in a fixed, endpoint-specific order. The signature is
//! `hex(MD5(hex(SHA512(src))))`. There is no secret in the chain: anyone who
//! knows the canonical string can produce a valid signature, so this guards
//! against stale or accidentally altered requests, not against forgery. The
//! format is kept for compatibility with existing clients.

use crate::errors::{GatewayError, GatewayResult};
use md5::Md5;
use sha2::{Digest, Sha512};
use tracing::{debug, warn};

/// Builder for the canonical source string of a signed request
#[derive(Debug, Default, Clone)]
pub struct CanonicalString {
    buf: String,
}

impl CanonicalString {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: &str, value: impl AsRef<str>) -> Self {
        if !self.buf.is_empty() {
            self.buf.push('&');
        }
        self.buf.push_str(key);
        self.buf.push('=');
        self.buf.push_str(value.as_ref());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

/// Signature of a canonical string
pub fn compute_signature(src: &str) -> String {
    let sha512_hex = hex::encode(Sha512::digest(src.as_bytes()));
    hex::encode(Md5::digest(sha512_hex.as_bytes()))
}

/// Validates freshness and integrity of signed requests
#[derive(Debug, Clone)]
pub struct Authenticator {
    max_age_secs: u64,
}

impl Authenticator {
    pub fn new(max_age_secs: u64) -> Self {
        Self { max_age_secs }
    }

    /// Check a request against the current wall clock
    pub fn verify(&self, timestamp: i64, sign: &str, src: &str) -> GatewayResult<()> {
        self.verify_at(chrono::Utc::now().timestamp(), timestamp, sign, src)
    }

    /// Check a request against an explicit `now` (seconds since epoch)
    pub fn verify_at(&self, now: i64, timestamp: i64, sign: &str, src: &str) -> GatewayResult<()> {
        let age_secs = now.saturating_sub(timestamp);
        if age_secs > self.max_age_secs as i64 {
            debug!(age_secs, max_age_secs = self.max_age_secs, "Rejecting expired request signature");
            return Err(GatewayError::SignExpired {
                age_secs,
                max_age_secs: self.max_age_secs,
            });
        }

        let expected = compute_signature(src);
        if expected != sign {
            warn!(
                src = %src,
                expected = %expected,
                received = %sign,
                "Request signature mismatch"
            );
            return Err(GatewayError::SignInvalid);
        }

        Ok(())
    }
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new(120)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn channel_src(ts: i64) -> String {
        CanonicalString::new()
            .field("orgName", "Org1")
            .field("channelID", "mychannel")
            .field("timestamp", ts.to_string())
            .into_string()
    }

    #[test]
    fn test_canonical_string_layout() {
        assert_eq!(
            channel_src(42),
            "orgName=Org1&channelID=mychannel&timestamp=42"
        );
        assert_eq!(CanonicalString::new().field("a", "").as_str(), "a=");
    }

    #[test]
    fn test_signature_is_md5_of_sha512_hex() {
        // Fixed vector: empty source string
        let sha = hex::encode(Sha512::digest(b""));
        assert_eq!(compute_signature(""), hex::encode(Md5::digest(sha.as_bytes())));
        assert_eq!(compute_signature("").len(), 32);
        assert_eq!(compute_signature("abc"), compute_signature("abc"));
    }

    #[test]
    fn test_fresh_valid_request_passes() {
        let auth = Authenticator::default();
        let src = channel_src(NOW - 10);
        let sign = compute_signature(&src);
        assert!(auth.verify_at(NOW, NOW - 10, &sign, &src).is_ok());
    }

    #[test]
    fn test_boundary_age_is_accepted() {
        let auth = Authenticator::default();
        let src = channel_src(NOW - 120);
        let sign = compute_signature(&src);
        assert!(auth.verify_at(NOW, NOW - 120, &sign, &src).is_ok());
    }

    #[test]
    fn test_expired_fails_even_with_correct_signature() {
        let auth = Authenticator::default();
        for age in [121, 500, 86_400] {
            let src = channel_src(NOW - age);
            let sign = compute_signature(&src);
            let err = auth.verify_at(NOW, NOW - age, &sign, &src).unwrap_err();
            assert!(matches!(err, GatewayError::SignExpired { .. }), "age {}", age);
        }
    }

    #[test]
    fn test_single_character_mutation_changes_signature() {
        let src = channel_src(NOW);
        let sign = compute_signature(&src);
        let mut bytes = src.clone().into_bytes();
        for i in 0..bytes.len() {
            let original = bytes[i];
            bytes[i] = if original == b'x' { b'y' } else { b'x' };
            let mutated = String::from_utf8(bytes.clone()).unwrap();
            assert_ne!(compute_signature(&mutated), sign, "mutation at {}", i);
            bytes[i] = original;
        }
    }

    #[test]
    fn test_tampered_request_is_invalid() {
        let auth = Authenticator::default();
        let src = channel_src(NOW);
        let sign = compute_signature(&src);
        let tampered = src.replace("Org1", "Org2");
        let err = auth.verify_at(NOW, NOW, &sign, &tampered).unwrap_err();
        assert!(matches!(err, GatewayError::SignInvalid));
    }

    #[test]
    fn test_comparison_is_case_sensitive() {
        let auth = Authenticator::default();
        let src = channel_src(NOW);
        let sign = compute_signature(&src).to_uppercase();
        assert!(matches!(
            auth.verify_at(NOW, NOW, &sign, &src),
            Err(GatewayError::SignInvalid)
        ));
    }
}
