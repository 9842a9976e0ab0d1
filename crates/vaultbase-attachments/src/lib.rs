//! Encrypted attachment blobs.
//!
//! Each attached file is sealed under the attachment key and written to the blob
//! directory under a random `<uuid>.enc` name. The record only stores an
//! [`AttachmentRef`] pair (see [`reference`]); the blob name carries no
//! information about the original file.
//!
//! Reading a blob goes through a [`DecryptChain`]: current key, then the optional
//! legacy key (re-sealing the blob under the current key on success), then a
//! plaintext passthrough for files that were never encrypted.

pub mod decrypt;
pub mod reference;

pub use decrypt::{BlobDecryptor, DecryptChain, KeyDecryptor, PlaintextPassthrough, Recovery};
pub use reference::{display_names, format_refs, parse_refs, AttachmentRef};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use vaultbase_crypto::{CryptoError, Envelope, SecretKey, ATTACHMENT_DOMAIN};

pub const BLOB_EXTENSION: &str = "enc";
const VIEW_PREFIX: &str = "vaultbase-view-";
const NAME_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("attachment blob not found: {0}")]
    MissingBlob(String),
    #[error("invalid blob name: {0:?}")]
    InvalidBlobName(String),
    #[error("attachment blob {0} could not be decrypted with any configured key")]
    Undecryptable(String),
}

pub type Result<T> = std::result::Result<T, AttachmentError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> AttachmentError + '_ {
    move |source| AttachmentError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentConfig {
    /// Directory holding `<uuid>.enc` blobs.
    pub blob_dir: PathBuf,
    /// Current attachment key file; created on first open.
    pub key_path: PathBuf,
    /// Key for blobs written by older installs. Only used if the file exists.
    pub legacy_key_path: Option<PathBuf>,
    /// Scratch directory for decrypted copies handed to viewers.
    pub view_dir: PathBuf,
}

#[derive(Debug)]
pub struct AttachmentStore {
    config: AttachmentConfig,
    envelope: Envelope,
    chain: DecryptChain,
}

impl AttachmentStore {
    pub fn open(config: AttachmentConfig) -> Result<Self> {
        fs::create_dir_all(&config.blob_dir).map_err(io_err(&config.blob_dir))?;
        fs::create_dir_all(&config.view_dir).map_err(io_err(&config.view_dir))?;

        let key = vaultbase_crypto::load_or_create_key(&config.key_path)?;
        let envelope = Envelope::new(key.clone(), ATTACHMENT_DOMAIN);

        let mut chain = DecryptChain::new().with(KeyDecryptor::new(
            Envelope::new(key, ATTACHMENT_DOMAIN),
            Recovery::CurrentKey,
        ));
        if let Some(legacy) = load_legacy_key(config.legacy_key_path.as_deref()) {
            chain = chain.with(KeyDecryptor::new(
                Envelope::new(legacy, ATTACHMENT_DOMAIN),
                Recovery::LegacyKey,
            ));
        }
        chain = chain.with(PlaintextPassthrough);

        Ok(Self {
            config,
            envelope,
            chain,
        })
    }

    pub fn config(&self) -> &AttachmentConfig {
        &self.config
    }

    pub fn blob_path(&self, blob_name: &str) -> Result<PathBuf> {
        validate_blob_name(blob_name)?;
        Ok(self.config.blob_dir.join(blob_name))
    }

    /// Seal `source` into a new blob and return the reference to store in the record.
    pub fn save(&self, source: &Path) -> Result<AttachmentRef> {
        let plaintext = fs::read(source).map_err(io_err(source))?;
        let original_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.save_bytes(&original_name, &plaintext)
    }

    pub fn save_bytes(&self, original_name: &str, plaintext: &[u8]) -> Result<AttachmentRef> {
        let sealed = self.envelope.seal(plaintext)?;

        for _ in 0..NAME_ATTEMPTS {
            let blob_name = format!("{}.{BLOB_EXTENSION}", uuid::Uuid::new_v4().simple());
            let path = self.config.blob_dir.join(&blob_name);
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    drop(file);
                    vaultbase_fs::atomic_write_bytes(&path, &sealed).map_err(io_err(&path))?;
                    log::debug!("stored attachment {original_name:?} as {blob_name}");
                    return Ok(AttachmentRef::new(original_name, blob_name));
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(io_err(&path)(err)),
            }
        }
        Err(AttachmentError::Io {
            path: self.config.blob_dir.clone(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free blob name"),
        })
    }

    /// Decrypt a blob into memory.
    ///
    /// A blob that only opened with the legacy key is re-sealed under the current
    /// key before returning. A failed re-seal is logged; the plaintext is still
    /// returned.
    pub fn read(&self, blob_name: &str) -> Result<(Vec<u8>, Recovery)> {
        let path = self.blob_path(blob_name)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(AttachmentError::MissingBlob(blob_name.to_string()))
            }
            Err(err) => return Err(io_err(&path)(err)),
        };

        let (plaintext, recovery) = self
            .chain
            .decrypt(&bytes)
            .ok_or_else(|| AttachmentError::Undecryptable(blob_name.to_string()))?;

        match recovery {
            Recovery::LegacyKey => match self.reseal(&path, &plaintext) {
                Ok(()) => log::info!("migrated attachment {blob_name} to the current key"),
                Err(err) => log::warn!("could not re-seal legacy attachment {blob_name}: {err}"),
            },
            Recovery::Plaintext => {
                log::warn!("attachment {blob_name} is not encrypted; returning it as stored")
            }
            Recovery::CurrentKey => {}
        }
        Ok((plaintext, recovery))
    }

    fn reseal(&self, path: &Path, plaintext: &[u8]) -> Result<()> {
        let sealed = self.envelope.seal(plaintext)?;
        vaultbase_fs::atomic_write_bytes(path, &sealed).map_err(io_err(path))
    }

    /// Decrypt the blob into a fresh file in the view directory, keeping the original
    /// extension so the platform picks a suitable viewer. The caller owns the file;
    /// leftovers are removed by [`AttachmentStore::purge_views`].
    pub fn open_for_read(&self, reference: &AttachmentRef) -> Result<PathBuf> {
        let (plaintext, _) = self.read(&reference.blob_name)?;

        let dir = &self.config.view_dir;
        let mut file = tempfile::Builder::new()
            .prefix(VIEW_PREFIX)
            .suffix(reference.extension().unwrap_or_default())
            .tempfile_in(dir)
            .map_err(io_err(dir))?;
        io::Write::write_all(&mut file, &plaintext).map_err(io_err(file.path()))?;

        let (_, path) = file.keep().map_err(|err| AttachmentError::Io {
            path: dir.clone(),
            source: err.error,
        })?;
        Ok(path)
    }

    /// Remove the blob behind `reference`. Returns whether a file was deleted; a
    /// missing blob is not an error.
    pub fn delete(&self, reference: &AttachmentRef) -> Result<bool> {
        let path = self.blob_path(&reference.blob_name)?;
        vaultbase_fs::remove_if_exists(&path).map_err(io_err(&path))
    }

    /// Remove every blob in `refs`. Individual failures are logged and skipped;
    /// returns how many blobs were deleted.
    pub fn delete_all(&self, refs: &[AttachmentRef]) -> usize {
        refs.iter()
            .filter(|r| match self.delete(r) {
                Ok(deleted) => deleted,
                Err(err) => {
                    log::warn!("failed to delete attachment {}: {err}", r.blob_name);
                    false
                }
            })
            .count()
    }

    /// [`AttachmentStore::delete_all`] for a serialized FILE column value.
    pub fn delete_value(&self, value: &str) -> usize {
        self.delete_all(&parse_refs(value))
    }

    /// Delete decrypted view files left over from earlier sessions.
    pub fn purge_views(&self) -> usize {
        let dir = &self.config.view_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("cannot list view directory {}: {err}", dir.display());
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let is_view = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(VIEW_PREFIX));
            if !is_view {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) => log::warn!("could not remove view file {}: {err}", entry.path().display()),
            }
        }
        if removed > 0 {
            log::info!("removed {removed} stale attachment view file(s)");
        }
        removed
    }
}

fn load_legacy_key(path: Option<&Path>) -> Option<SecretKey> {
    let path = path?;
    if !path.exists() {
        return None;
    }
    match vaultbase_crypto::load_key(path) {
        Ok(key) => Some(key),
        Err(err) => {
            log::warn!("ignoring legacy key {}: {err}", path.display());
            None
        }
    }
}

/// Write a legacy key given as base64 text. The next [`AttachmentStore::open`] picks it up.
pub fn install_legacy_key(path: &Path, base64_key: &str) -> Result<()> {
    let key = SecretKey::from_base64(base64_key)?;
    vaultbase_crypto::write_key_file(path, &key)?;
    Ok(())
}

/// Blob names are a single path component so a crafted record value can never
/// reach outside the blob directory.
fn validate_blob_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).components().count() == 1;
    if ok {
        Ok(())
    } else {
        Err(AttachmentError::InvalidBlobName(name.to_string()))
    }
}
