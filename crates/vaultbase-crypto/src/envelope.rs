use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::key::SecretKey;
use crate::CryptoError;

const MAGIC: &[u8; 8] = b"VAULTENC";
const FORMAT_VERSION: u8 = 1;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

const HEADER_LEN: usize = 8 /* magic */
    + 1 /* format version */
    + NONCE_LEN
    + TAG_LEN;

/// Domain for the encrypted database container.
pub const DATABASE_DOMAIN: &str = "vaultbase-database";
/// Domain for attachment blobs.
pub const ATTACHMENT_DOMAIN: &str = "vaultbase-attachment";

/// Seals and opens byte buffers under one key and one domain.
#[derive(Clone)]
pub struct Envelope {
    key: SecretKey,
    domain: String,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl Envelope {
    pub fn new(key: SecretKey, domain: impl Into<String>) -> Self {
        Self {
            key,
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Encrypt `plaintext` with a fresh random nonce.
    ///
    /// Layout: magic | version | nonce | tag | ciphertext.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = self.cipher();
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce_bytes), &self.aad(), &mut buffer)
            .map_err(|_| CryptoError::Seal)?;

        let mut out = Vec::with_capacity(HEADER_LEN + buffer.len());
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(tag.as_slice());
        out.extend_from_slice(&buffer);
        Ok(out)
    }

    /// Decrypt a container produced by [`Envelope::seal`].
    ///
    /// Fails with [`CryptoError::InvalidCiphertext`] for truncated or foreign
    /// input, a wrong key, a wrong domain, or any tampering.
    pub fn open(&self, container: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let parsed = parse_container(container)?;

        let cipher = self.cipher();
        let mut buffer = parsed.ciphertext.to_vec();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&parsed.nonce),
                &self.aad(),
                &mut buffer,
                Tag::from_slice(&parsed.tag),
            )
            .map_err(|_| CryptoError::InvalidCiphertext("authentication failed"))?;
        Ok(buffer)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_bytes()))
    }

    fn aad(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(MAGIC.len() + 1 + self.domain.len());
        aad.extend_from_slice(MAGIC);
        aad.push(FORMAT_VERSION);
        aad.extend_from_slice(self.domain.as_bytes());
        aad
    }
}

/// Whether `bytes` start with the envelope magic.
///
/// This says nothing about whether any particular key opens them.
pub fn is_sealed(bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
}

#[derive(Debug)]
struct ParsedContainer<'a> {
    nonce: [u8; NONCE_LEN],
    tag: [u8; TAG_LEN],
    ciphertext: &'a [u8],
}

fn parse_container(bytes: &[u8]) -> Result<ParsedContainer<'_>, CryptoError> {
    if bytes.len() < HEADER_LEN {
        return Err(CryptoError::InvalidCiphertext("truncated container"));
    }
    if !is_sealed(bytes) {
        return Err(CryptoError::InvalidCiphertext("magic header mismatch"));
    }
    if bytes[MAGIC.len()] != FORMAT_VERSION {
        return Err(CryptoError::InvalidCiphertext("unsupported format version"));
    }

    let nonce_start = MAGIC.len() + 1;
    let tag_start = nonce_start + NONCE_LEN;

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&bytes[nonce_start..tag_start]);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&bytes[tag_start..HEADER_LEN]);

    Ok(ParsedContainer {
        nonce,
        tag,
        ciphertext: &bytes[HEADER_LEN..],
    })
}
