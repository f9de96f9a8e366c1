//! CSRF state, PKCE pairs and return-path validation for the OAuth login flow.
//!
//! Nothing here is stored server-side: the caller keeps the state and verifier in
//! short-lived cookies and hands them back at callback time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::auth::constant_time::constant_time_str_eq;

pub const STATE_MAX_AGE_MS: u64 = 10 * 60 * 1000;
const STATE_RANDOM_BYTES: usize = 32;
const VERIFIER_RANDOM_BYTES: usize = 64;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateRejection {
    #[error("missing")]
    Missing,
    #[error("length mismatch")]
    LengthMismatch,
    #[error("mismatch")]
    Mismatch,
    #[error("malformed")]
    Malformed,
    #[error("expired")]
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateValidation {
    pub valid: bool,
    pub reason: Option<StateRejection>,
}

impl StateValidation {
    fn ok() -> Self {
        Self { valid: true, reason: None }
    }

    fn reject(reason: StateRejection) -> Self {
        Self { valid: false, reason: Some(reason) }
    }

    pub fn into_result(self) -> Result<(), StateRejection> {
        match self.reason {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);
        Self { verifier, challenge }
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// `<64 hex chars>.<base36 issue time in ms>`
pub fn generate_state() -> String {
    generate_state_at(now_ms())
}

pub fn generate_state_at(issued_at_ms: u64) -> String {
    let mut bytes = [0u8; STATE_RANDOM_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}.{}", hex::encode(bytes), to_base36(issued_at_ms))
}

pub fn validate_state(stored: Option<&str>, received: Option<&str>) -> StateValidation {
    validate_state_at(stored, received, now_ms())
}

pub fn validate_state_at(stored: Option<&str>, received: Option<&str>, now_ms: u64) -> StateValidation {
    let (stored, received) = match (stored, received) {
        (Some(s), Some(r)) if !s.is_empty() && !r.is_empty() => (s, r),
        _ => return StateValidation::reject(StateRejection::Missing),
    };

    if stored.len() != received.len() {
        return StateValidation::reject(StateRejection::LengthMismatch);
    }
    if !constant_time_str_eq(stored, received) {
        return StateValidation::reject(StateRejection::Mismatch);
    }

    let issued_at = match stored.rsplit_once('.').and_then(|(_, ts)| from_base36(ts)) {
        Some(ts) => ts,
        None => return StateValidation::reject(StateRejection::Malformed),
    };

    if now_ms.saturating_sub(issued_at) > STATE_MAX_AGE_MS {
        return StateValidation::reject(StateRejection::Expired);
    }

    StateValidation::ok()
}

/// 64 random bytes, URL-safe base64 without padding (86 characters).
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_RANDOM_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 challenge: URL-safe base64 of SHA-256(verifier).
pub fn generate_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Accepts only local absolute paths; anything else falls back to `default`.
pub fn sanitize_return_path(candidate: Option<&str>, default: &str) -> String {
    match candidate {
        Some(path) if is_safe_return_path(path) => path.to_string(),
        _ => default.to_string(),
    }
}

pub fn is_safe_return_path(path: &str) -> bool {
    path.starts_with('/') && !path.contains("//") && !path.contains("..") && !path.contains('\\')
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn from_base36(value: &str) -> Option<u64> {
    if value.is_empty() {
        return None;
    }
    u64::from_str_radix(value, 36).ok()
}
