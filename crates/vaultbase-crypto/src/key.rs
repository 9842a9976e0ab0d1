use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Decode key material as stored in a key file.
    ///
    /// Key files hold the raw 32 bytes. Hand-installed keys (e.g. a legacy key
    /// pasted by an operator) may instead be base64 text, standard or URL-safe
    /// alphabet, with surrounding whitespace.
    pub fn from_file_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() == KEY_LEN {
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(bytes);
            return Ok(Self(key));
        }

        let text = std::str::from_utf8(bytes)
            .map_err(|_| CryptoError::InvalidKey(format!("expected {KEY_LEN} raw bytes or base64 text")))?
            .trim();
        Self::from_base64(text)
    }

    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let text = text.trim();
        let decoded = STANDARD
            .decode(text)
            .or_else(|_| URL_SAFE.decode(text))
            .map_err(|err| CryptoError::InvalidKey(format!("base64: {err}")))?;
        let len = decoded.len();
        let key: [u8; KEY_LEN] = decoded
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected {KEY_LEN} bytes, got {len}")))?;
        Ok(Self(key))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Read the key stored at `path`.
pub fn load_key(path: &Path) -> Result<SecretKey, CryptoError> {
    let bytes = std::fs::read(path).map_err(|source| CryptoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    SecretKey::from_file_bytes(&bytes).map_err(|err| CryptoError::InvalidKeyFile {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Write `key` to `path` as raw bytes with owner-only permissions.
pub fn write_key_file(path: &Path, key: &SecretKey) -> Result<(), CryptoError> {
    vaultbase_fs::write_secret_file(path, key.as_bytes()).map_err(|source| CryptoError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Return the key at `path`, generating and persisting a fresh one if the file
/// does not exist yet.
///
/// Once the file exists every call returns the same key.
pub fn load_or_create_key(path: &Path) -> Result<SecretKey, CryptoError> {
    if path.exists() {
        return load_key(path);
    }

    let key = SecretKey::generate();
    write_key_file(path, &key)?;
    log::debug!("generated new key file at {}", path.display());
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_create_is_stable_across_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db_key.key");

        let first = load_or_create_key(&path).expect("create");
        let second = load_or_create_key(&path).expect("load");
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&path).expect("read").len(), KEY_LEN);
    }

    #[test]
    fn base64_key_files_are_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("legacy_key.key");
        let key = SecretKey::new([9u8; KEY_LEN]);
        std::fs::write(&path, format!("{}\n", key.to_base64())).expect("write");

        assert_eq!(load_key(&path).expect("load"), key);
    }

    #[test]
    fn short_key_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db_key.key");
        std::fs::write(&path, b"short").expect("write");

        let err = load_key(&path).expect_err("short key");
        assert!(matches!(err, CryptoError::InvalidKeyFile { .. }), "{err:?}");
        assert!(err.is_configuration());
    }

    #[test]
    fn debug_does_not_leak_key_bytes() {
        let key = SecretKey::new([0xAB; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "SecretKey(..)");
    }
}
