//! Credential hashing for the local password store.
//!
//! Stored hashes are self-describing: `$pbkdf2-sha256$<iterations>$<salt-hex>$<key-hex>`.
//! Older argon2 PHC strings are still accepted on verify, and anything that does
//! not parse as a known format is treated as a legacy plaintext credential.

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use sha2::Sha256;
use utoipa::ToSchema;

use crate::auth::constant_time::{constant_time_eq, constant_time_str_eq};
use crate::errors::AppError;

pub const HASH_ALGORITHM: &str = "pbkdf2-sha256";
pub const DEFAULT_ITERATIONS: u32 = 600_000;
const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;

const MIN_PASSWORD_LENGTH: usize = 12;
const MAX_PASSWORD_LENGTH: usize = 128;
const SEQUENTIAL_RUN: usize = 4;

/// How a stored credential string was recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredHash {
    Pbkdf2 { iterations: u32, salt: Vec<u8>, key: Vec<u8> },
    Argon2,
    /// Migration shim: the value is compared as-is. Remove once every
    /// credential has been rehashed on login.
    LegacyPlaintext,
}

impl StoredHash {
    pub fn parse(stored: &str) -> Self {
        if stored.starts_with("$argon2") && PasswordHash::new(stored).is_ok() {
            return StoredHash::Argon2;
        }

        let parts: Vec<&str> = stored.split('$').collect();
        if let ["", algo, iterations, salt, key] = parts.as_slice() {
            if *algo == HASH_ALGORITHM {
                let parsed = (
                    iterations.parse::<u32>().ok().filter(|n| *n > 0),
                    hex::decode(salt).ok().filter(|s| !s.is_empty()),
                    hex::decode(key).ok().filter(|k| !k.is_empty()),
                );
                if let (Some(iterations), Some(salt), Some(key)) = parsed {
                    return StoredHash::Pbkdf2 { iterations, salt, key };
                }
            }
        }

        StoredHash::LegacyPlaintext
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    iterations: u32,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self { iterations: DEFAULT_ITERATIONS }
    }
}

impl CredentialHasher {
    /// Hasher with a non-default work factor. Production code uses `default()`.
    pub fn with_iterations(iterations: u32) -> Self {
        Self { iterations: iterations.max(1) }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = derive_key(password, &salt, self.iterations);

        format!(
            "${}${}${}${}",
            HASH_ALGORITHM,
            self.iterations,
            hex::encode(salt),
            hex::encode(key)
        )
    }

    pub fn verify(&self, password: &str, stored: &str) -> bool {
        match StoredHash::parse(stored) {
            StoredHash::Pbkdf2 { iterations, salt, key } => {
                let mut derived = vec![0u8; key.len()];
                pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut derived);
                constant_time_eq(&derived, &key)
            }
            StoredHash::Argon2 => PasswordHash::new(stored)
                .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
                .unwrap_or(false),
            StoredHash::LegacyPlaintext => {
                tracing::warn!("verifying credential against legacy plaintext value");
                constant_time_str_eq(password, stored)
            }
        }
    }

    pub fn needs_rehash(&self, stored: &str) -> bool {
        match StoredHash::parse(stored) {
            StoredHash::Pbkdf2 { iterations, .. } => iterations < self.iterations,
            StoredHash::Argon2 | StoredHash::LegacyPlaintext => true,
        }
    }
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

pub fn hash_password(password: &str) -> String {
    CredentialHasher::default().hash(password)
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    CredentialHasher::default().verify(password, stored)
}

pub fn needs_rehash(stored: &str) -> bool {
    CredentialHasher::default().needs_rehash(stored)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PasswordRule {
    TooShort,
    TooLong,
    MissingLowercase,
    MissingUppercase,
    MissingDigit,
    MissingSymbol,
    SingleRepeatedCharacter,
    SequentialRun,
}

impl PasswordRule {
    pub fn describe(&self) -> String {
        match self {
            PasswordRule::TooShort => format!("must be at least {MIN_PASSWORD_LENGTH} characters"),
            PasswordRule::TooLong => format!("must be at most {MAX_PASSWORD_LENGTH} characters"),
            PasswordRule::MissingLowercase => "must contain a lowercase letter".to_string(),
            PasswordRule::MissingUppercase => "must contain an uppercase letter".to_string(),
            PasswordRule::MissingDigit => "must contain a digit".to_string(),
            PasswordRule::MissingSymbol => "must contain a symbol".to_string(),
            PasswordRule::SingleRepeatedCharacter => "must not repeat a single character".to_string(),
            PasswordRule::SequentialRun => {
                format!("must not contain {SEQUENTIAL_RUN} sequential characters")
            }
        }
    }
}

/// Checks password complexity and returns every violated rule.
pub fn password_violations(password: &str) -> Vec<PasswordRule> {
    let mut violations = Vec::new();
    let length = password.chars().count();

    if length < MIN_PASSWORD_LENGTH {
        violations.push(PasswordRule::TooShort);
    }
    if length > MAX_PASSWORD_LENGTH {
        violations.push(PasswordRule::TooLong);
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        violations.push(PasswordRule::MissingLowercase);
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        violations.push(PasswordRule::MissingUppercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push(PasswordRule::MissingDigit);
    }
    if !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        violations.push(PasswordRule::MissingSymbol);
    }

    let mut chars = password.chars();
    if let Some(first) = chars.next() {
        if length > 1 && chars.all(|c| c == first) {
            violations.push(PasswordRule::SingleRepeatedCharacter);
        }
    }
    if has_sequential_run(password) {
        violations.push(PasswordRule::SequentialRun);
    }

    violations
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    let violations = password_violations(password);
    if violations.is_empty() {
        return Ok(());
    }

    let message = violations
        .iter()
        .map(PasswordRule::describe)
        .collect::<Vec<_>>()
        .join("; ");
    Err(AppError::bad_request(format!("password {message}")))
}

// "abcd", "4321", "WXYZ": ascending or descending by one code point.
fn has_sequential_run(password: &str) -> bool {
    let lowered: Vec<u32> = password
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase() as u32)
        .collect();

    lowered.windows(SEQUENTIAL_RUN).any(|w| {
        let ascending = w.windows(2).all(|p| p[1] == p[0] + 1);
        let descending = w.windows(2).all(|p| p[0] == p[1] + 1);
        ascending || descending
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> CredentialHasher {
        CredentialHasher::with_iterations(1_000)
    }

    #[test]
    fn hash_then_verify() {
        let hasher = fast();
        let stored = hasher.hash("Correct-Horse-9");
        assert!(hasher.verify("Correct-Horse-9", &stored));
        assert!(!hasher.verify("correct-horse-9", &stored));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let hasher = fast();
        let a = hasher.hash("Repeat-Me-Twice-1");
        let b = hasher.hash("Repeat-Me-Twice-1");
        assert_ne!(a, b);
        assert!(hasher.verify("Repeat-Me-Twice-1", &a));
        assert!(hasher.verify("Repeat-Me-Twice-1", &b));
    }

    #[test]
    fn hash_format_is_self_describing() {
        let stored = fast().hash("Some-Password-42");
        match StoredHash::parse(&stored) {
            StoredHash::Pbkdf2 { iterations, salt, key } => {
                assert_eq!(iterations, 1_000);
                assert_eq!(salt.len(), SALT_LEN);
                assert_eq!(key.len(), KEY_LEN);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
        assert!(stored.starts_with("$pbkdf2-sha256$1000$"));
    }

    #[test]
    fn verification_uses_stored_iterations() {
        let low = CredentialHasher::with_iterations(500);
        let stored = low.hash("Upgrade-Path-77");
        // A hasher configured with a different work factor still verifies.
        assert!(fast().verify("Upgrade-Path-77", &stored));
    }

    #[test]
    fn plaintext_fallback_and_rehash() {
        let hasher = fast();
        assert!(hasher.verify("legacy-secret", "legacy-secret"));
        assert!(!hasher.verify("legacy-secreT", "legacy-secret"));
        assert!(hasher.needs_rehash("legacy-secret"));
    }

    #[test]
    fn malformed_pbkdf2_string_is_treated_as_plaintext() {
        assert_eq!(StoredHash::parse("$pbkdf2-sha256$abc$zz$zz"), StoredHash::LegacyPlaintext);
        assert_eq!(StoredHash::parse("$pbkdf2-sha256$10$00"), StoredHash::LegacyPlaintext);
    }

    #[test]
    fn needs_rehash_below_current_iterations() {
        let stored = CredentialHasher::with_iterations(500).hash("Work-Factor-1!");
        assert!(fast().needs_rehash(&stored));
        assert!(!CredentialHasher::with_iterations(500).needs_rehash(&stored));
    }

    #[test]
    fn strong_password_passes() {
        assert!(password_violations("Blue-Harbor-Light-93").is_empty());
        assert!(validate_password("Blue-Harbor-Light-93").is_ok());
    }

    #[test]
    fn reports_all_violations() {
        let violations = password_violations("short");
        assert!(violations.contains(&PasswordRule::TooShort));
        assert!(violations.contains(&PasswordRule::MissingUppercase));
        assert!(violations.contains(&PasswordRule::MissingDigit));
        assert!(violations.contains(&PasswordRule::MissingSymbol));
        assert!(!violations.contains(&PasswordRule::MissingLowercase));
    }

    #[test]
    fn rejects_low_entropy_patterns() {
        assert!(password_violations("aaaaaaaaaaaaaa").contains(&PasswordRule::SingleRepeatedCharacter));
        assert!(password_violations("Xy!1234-Harbor").contains(&PasswordRule::SequentialRun));
        assert!(password_violations("Xy!9-dcba-Harbor").contains(&PasswordRule::SequentialRun));
    }

    #[test]
    fn rejects_overlong_passwords() {
        let long = format!("Aa1!{}", "xq".repeat(70));
        assert!(password_violations(&long).contains(&PasswordRule::TooLong));
    }
}
