//! Password gate for application startup.
//!
//! A credential file holds a PBKDF2-HMAC-SHA256 hash of the password:
//!
//! ```json
//! { "salt": "<base64(16 bytes)>", "hash": "<base64(32 bytes)>", "iterations": 200000 }
//! ```
//!
//! The file is always replaced atomically, restricted to the owner, and hidden
//! where the platform supports it. Verification fails closed: a missing or
//! malformed file never authenticates anyone.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

pub const DEFAULT_ITERATIONS: u32 = 200_000;
pub const SALT_LEN: usize = 16;
pub const HASH_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential file i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential file is malformed: {0}")]
    Malformed(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Salted password hash as persisted in the credential file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(with = "b64")]
    salt: Vec<u8>,
    #[serde(with = "b64")]
    hash: Vec<u8>,
    #[serde(default = "default_iterations")]
    iterations: u32,
}

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Hash `password` under a fresh random salt.
    pub fn derive(password: &str, iterations: u32) -> Self {
        let iterations = iterations.max(1);
        let mut salt = vec![0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let hash = pbkdf2_sha256(password, &salt, iterations);
        Self {
            salt,
            hash: hash.to_vec(),
            iterations,
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Re-derive from `candidate` and compare in constant time.
    pub fn matches(&self, candidate: &str) -> bool {
        let derived = pbkdf2_sha256(candidate, &self.salt, self.iterations);
        derived.as_slice().ct_eq(self.hash.as_slice()).into()
    }

    fn validate(&self) -> Result<(), AuthError> {
        if self.salt.is_empty() {
            return Err(AuthError::Malformed("empty salt".to_string()));
        }
        if self.hash.len() != HASH_LEN {
            return Err(AuthError::Malformed(format!(
                "hash must be {HASH_LEN} bytes (got {})",
                self.hash.len()
            )));
        }
        if self.iterations == 0 {
            return Err(AuthError::Malformed("iterations must be >= 1".to_string()));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let raw = std::fs::read(path)?;
        let credentials: Credentials = serde_json::from_slice(&raw)?;
        credentials.validate()?;
        Ok(credentials)
    }

    pub fn store(&self, path: &Path) -> Result<(), AuthError> {
        let json = serde_json::to_vec(self)?;
        vaultbase_fs::write_secret_file(path, &json)?;
        Ok(())
    }
}

fn pbkdf2_sha256(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; HASH_LEN]> {
    let mut out = Zeroizing::new([0u8; HASH_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out[..]);
    out
}

/// The password gate bound to one credential file.
#[derive(Debug, Clone)]
pub struct AuthGate {
    path: PathBuf,
    iterations: u32,
}

impl AuthGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Override the iteration count used for newly written hashes.
    ///
    /// Existing files keep verifying with the count stored in them.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the credential file from `default_password` if it does not exist.
    ///
    /// Returns whether a file was created.
    pub fn ensure_credentials_exist(&self, default_password: &str) -> Result<bool, AuthError> {
        if self.path.exists() {
            return Ok(false);
        }
        Credentials::derive(default_password, self.iterations).store(&self.path)?;
        log::info!("created credential file at {}", self.path.display());
        Ok(true)
    }

    /// Check `candidate` against the stored hash. Any problem reading the file is
    /// a failed verification.
    pub fn verify(&self, candidate: &str) -> bool {
        match Credentials::load(&self.path) {
            Ok(credentials) => credentials.matches(candidate),
            Err(err) => {
                log::warn!("credential check failed closed for {}: {err}", self.path.display());
                false
            }
        }
    }

    /// Replace the stored password. Returns `false` if the file could not be written;
    /// the previous file is left intact in that case.
    pub fn set_password(&self, new_password: &str) -> bool {
        match Credentials::derive(new_password, self.iterations).store(&self.path) {
            Ok(()) => true,
            Err(err) => {
                log::error!("set_password failed for {}: {err}", self.path.display());
                false
            }
        }
    }
}

pub fn ensure_credentials_exist(path: &Path, default_password: &str) -> Result<bool, AuthError> {
    AuthGate::new(path).ensure_credentials_exist(default_password)
}

pub fn verify(path: &Path, candidate: &str) -> bool {
    AuthGate::new(path).verify(candidate)
}

pub fn set_password(path: &Path, new_password: &str) -> bool {
    AuthGate::new(path).set_password(new_password)
}

mod b64 {
    use super::STANDARD;
    use base64::Engine as _;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_and_match() {
        let credentials = Credentials::derive("Admin", 1_000);
        assert!(credentials.matches("Admin"));
        assert!(!credentials.matches("admin"));
        assert!(!credentials.matches(""));
    }

    #[test]
    fn same_password_gets_a_fresh_salt() {
        let a = Credentials::derive("Admin", 10);
        let b = Credentials::derive("Admin", 10);
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn stored_format_is_base64_json() {
        let credentials = Credentials::derive("pw", 5);
        let value = serde_json::to_value(&credentials).expect("serialize");
        let salt = value["salt"].as_str().expect("salt string");
        assert_eq!(STANDARD.decode(salt).expect("base64").len(), SALT_LEN);
        assert_eq!(value["iterations"], 5);
    }

    #[test]
    fn missing_iterations_defaults() {
        let json = format!(
            r#"{{"salt":"{}","hash":"{}"}}"#,
            STANDARD.encode([1u8; SALT_LEN]),
            STANDARD.encode([2u8; HASH_LEN])
        );
        let credentials: Credentials = serde_json::from_str(&json).expect("parse");
        assert_eq!(credentials.iterations(), DEFAULT_ITERATIONS);
    }
}
