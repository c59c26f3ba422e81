//! Credential hashing.
//!
//! Passwords are hashed with Argon2id into PHC strings
//! (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`), so the parameters travel
//! with each digest and stale digests can be detected and upgraded.

use std::fmt;

use aes_gcm::aead::OsRng;
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CredentialError;

/// Strength rules applied to new passwords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    /// Minimum length in characters.
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    #[serde(default = "default_true")]
    pub require_digit: bool,

    #[serde(default = "default_true")]
    pub require_symbol: bool,

    #[serde(default = "default_true")]
    pub require_uppercase: bool,

    #[serde(default = "default_true")]
    pub require_lowercase: bool,
}

fn default_min_length() -> usize {
    8
}

fn default_true() -> bool {
    true
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            require_digit: true,
            require_symbol: true,
            require_uppercase: true,
            require_lowercase: true,
        }
    }
}

/// One reason a password fails the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum PolicyViolation {
    TooShort { min_length: usize },
    MissingDigit,
    MissingSymbol,
    MissingUppercase,
    MissingLowercase,
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::TooShort { min_length } => {
                write!(f, "must be at least {min_length} characters long")
            }
            PolicyViolation::MissingDigit => write!(f, "must contain a digit"),
            PolicyViolation::MissingSymbol => write!(f, "must contain a symbol"),
            PolicyViolation::MissingUppercase => write!(f, "must contain an uppercase letter"),
            PolicyViolation::MissingLowercase => write!(f, "must contain a lowercase letter"),
        }
    }
}

/// Checks `password` against `policy` and returns every violation found.
///
/// An empty result means the password is acceptable. This never hashes and
/// never fails.
///
/// ```
/// use carebase_core::crypto::{validate_strength, PasswordPolicy, PolicyViolation};
///
/// let violations = validate_strength("short", &PasswordPolicy::default());
/// assert!(violations.contains(&PolicyViolation::MissingDigit));
/// assert!(validate_strength("Str0ng!pass", &PasswordPolicy::default()).is_empty());
/// ```
pub fn validate_strength(password: &str, policy: &PasswordPolicy) -> Vec<PolicyViolation> {
    let mut violations = Vec::new();

    if password.chars().count() < policy.min_length {
        violations.push(PolicyViolation::TooShort {
            min_length: policy.min_length,
        });
    }
    if policy.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push(PolicyViolation::MissingDigit);
    }
    if policy.require_symbol
        && !password
            .chars()
            .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
    {
        violations.push(PolicyViolation::MissingSymbol);
    }
    if policy.require_uppercase && !password.chars().any(char::is_uppercase) {
        violations.push(PolicyViolation::MissingUppercase);
    }
    if policy.require_lowercase && !password.chars().any(char::is_lowercase) {
        violations.push(PolicyViolation::MissingLowercase);
    }

    violations
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashingParams {
    /// Memory cost in KiB.
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,

    #[serde(default = "default_iterations")]
    pub iterations: u32,

    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

fn default_memory_kib() -> u32 {
    19 * 1024
}

fn default_iterations() -> u32 {
    2
}

fn default_parallelism() -> u32 {
    1
}

impl Default for HashingParams {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

/// Outcome of [`CredentialHasher::rehash`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RehashOutcome {
    /// The password matched; here is a fresh digest under current parameters.
    Rehashed(String),
    /// The password did not match; keep the stored digest.
    Unchanged,
}

/// Produces and verifies password digests.
#[derive(Debug, Clone)]
pub struct CredentialHasher {
    params: HashingParams,
    min_length: usize,
}

impl CredentialHasher {
    pub fn new(params: HashingParams, policy: &PasswordPolicy) -> Self {
        Self {
            params,
            min_length: policy.min_length,
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>, CredentialError> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            None,
        )
        .map_err(|e| CredentialError::HashingFailed {
            message: format!("invalid argon2 parameters: {e}"),
        })?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Hashes a password with a fresh random salt.
    ///
    /// Only the length floor is enforced here; the full policy is the job of
    /// [`validate_strength`].
    pub fn hash(&self, password: &str) -> Result<String, CredentialError> {
        if password.chars().count() < self.min_length {
            return Err(CredentialError::WeakInput {
                violations: vec![PolicyViolation::TooShort {
                    min_length: self.min_length,
                }],
            });
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CredentialError::HashingFailed {
                message: e.to_string(),
            })?;
        Ok(hash.to_string())
    }

    /// Returns `true` if `password` matches `digest`.
    ///
    /// A malformed digest is treated as a mismatch.
    pub fn verify(&self, password: &str, digest: &str) -> bool {
        let parsed = match PasswordHash::new(digest) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "stored password digest is malformed");
                return false;
            }
        };
        // The digest carries its own parameters; verification honours them.
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Produces a fresh digest if `password` matches `digest`.
    pub fn rehash(&self, password: &str, digest: &str) -> Result<RehashOutcome, CredentialError> {
        if !self.verify(password, digest) {
            return Ok(RehashOutcome::Unchanged);
        }
        Ok(RehashOutcome::Rehashed(self.hash(password)?))
    }

    /// Returns `true` if `digest` was produced under different parameters.
    pub fn needs_rehash(&self, digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            return true;
        };
        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return true;
        }
        match Params::try_from(&parsed) {
            Ok(stored) => {
                stored.m_cost() != self.params.memory_kib
                    || stored.t_cost() != self.params.iterations
                    || stored.p_cost() != self.params.parallelism
            }
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> HashingParams {
        HashingParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn hasher() -> CredentialHasher {
        CredentialHasher::new(cheap(), &PasswordPolicy::default())
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher();
        let digest = hasher.hash("Correct#Horse9").unwrap();
        assert!(digest.starts_with("$argon2id$"));
        assert!(hasher.verify("Correct#Horse9", &digest));
        assert!(!hasher.verify("correct#horse9", &digest));
    }

    #[test]
    fn test_salt_is_random() {
        let hasher = hasher();
        let a = hasher.hash("Correct#Horse9").unwrap();
        let b = hasher.hash("Correct#Horse9").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_password_rejected() {
        let err = hasher().hash("abc").unwrap_err();
        match err {
            CredentialError::WeakInput { violations } => {
                assert_eq!(violations, vec![PolicyViolation::TooShort { min_length: 8 }]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_digest_is_mismatch() {
        assert!(!hasher().verify("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_rehash() {
        let hasher = hasher();
        let digest = hasher.hash("Correct#Horse9").unwrap();

        match hasher.rehash("Correct#Horse9", &digest).unwrap() {
            RehashOutcome::Rehashed(fresh) => {
                assert_ne!(fresh, digest);
                assert!(hasher.verify("Correct#Horse9", &fresh));
            }
            RehashOutcome::Unchanged => panic!("expected a fresh digest"),
        }
        assert_eq!(
            hasher.rehash("wrong", &digest).unwrap(),
            RehashOutcome::Unchanged
        );
    }

    #[test]
    fn test_needs_rehash_on_parameter_change() {
        let old = hasher();
        let digest = old.hash("Correct#Horse9").unwrap();
        assert!(!old.needs_rehash(&digest));

        let stronger = CredentialHasher::new(
            HashingParams {
                memory_kib: 2048,
                ..cheap()
            },
            &PasswordPolicy::default(),
        );
        assert!(stronger.needs_rehash(&digest));
        assert!(stronger.verify("Correct#Horse9", &digest));
    }

    #[test]
    fn test_validate_strength_reports_everything() {
        let violations = validate_strength("short", &PasswordPolicy::default());
        assert_eq!(
            violations,
            vec![
                PolicyViolation::TooShort { min_length: 8 },
                PolicyViolation::MissingDigit,
                PolicyViolation::MissingSymbol,
                PolicyViolation::MissingUppercase,
            ]
        );
    }

    #[test]
    fn test_validate_strength_accepts_strong() {
        assert!(validate_strength("Str0ng!pass", &PasswordPolicy::default()).is_empty());
    }

    #[test]
    fn test_validate_strength_counts_characters() {
        let policy = PasswordPolicy {
            min_length: 4,
            require_digit: false,
            require_symbol: false,
            require_uppercase: false,
            require_lowercase: false,
        };
        assert!(validate_strength("ñáéí", &policy).is_empty());
    }
}
