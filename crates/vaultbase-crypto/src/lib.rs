//! Symmetric encryption for vaultbase.
//!
//! One key per logical domain (the database container, attachment blobs), each
//! kept in its own key file. Payloads are sealed with AES-256-GCM; the domain
//! name is bound as associated data so a blob sealed for one domain never opens
//! in another, even under the same key.

pub mod envelope;
pub mod key;

pub use envelope::{is_sealed, Envelope, ATTACHMENT_DOMAIN, DATABASE_DOMAIN};
pub use key::{load_key, load_or_create_key, write_key_file, SecretKey, KEY_LEN};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The bytes are not a container we sealed, or the key does not match.
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(&'static str),
    /// AES-GCM refused to encrypt (payload beyond the algorithm's length limit).
    #[error("encryption failed")]
    Seal,
    #[error("invalid key file {path}: {reason}")]
    InvalidKeyFile { path: PathBuf, reason: String },
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("key file i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CryptoError {
    /// Whether this error means the key material itself is unusable (a
    /// configuration problem) rather than the payload being bad.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CryptoError::InvalidKeyFile { .. } | CryptoError::InvalidKey(_) | CryptoError::Io { .. }
        )
    }
}
