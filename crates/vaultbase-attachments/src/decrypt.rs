//! Ordered fallbacks for reading a blob.
//!
//! Blobs written by this store open with the current key. Older installs may hold
//! blobs sealed under a legacy key, or files copied in before encryption
//! existed. Each of those is one [`BlobDecryptor`]; the chain tries them in order.

use vaultbase_crypto::{is_sealed, Envelope};

/// Which link of the chain produced the plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    CurrentKey,
    /// Opened with the legacy key; the caller should re-seal under the current key.
    LegacyKey,
    /// The bytes were returned as-is. Lossy: a corrupt blob is indistinguishable
    /// from a never-encrypted file here.
    Plaintext,
}

pub trait BlobDecryptor: Send + Sync {
    fn recovery(&self) -> Recovery;

    /// `None` means "not mine"; the chain moves on.
    fn try_decrypt(&self, bytes: &[u8]) -> Option<Vec<u8>>;
}

pub struct KeyDecryptor {
    envelope: Envelope,
    recovery: Recovery,
}

impl KeyDecryptor {
    pub fn new(envelope: Envelope, recovery: Recovery) -> Self {
        Self { envelope, recovery }
    }
}

impl BlobDecryptor for KeyDecryptor {
    fn recovery(&self) -> Recovery {
        self.recovery
    }

    fn try_decrypt(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        self.envelope.open(bytes).ok()
    }
}

/// Accepts anything that does not look like one of our containers.
///
/// Sealed bytes that no key could open are refused, so a wrong or missing key
/// surfaces as an error instead of handing ciphertext to a viewer.
pub struct PlaintextPassthrough;

impl BlobDecryptor for PlaintextPassthrough {
    fn recovery(&self) -> Recovery {
        Recovery::Plaintext
    }

    fn try_decrypt(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        if is_sealed(bytes) {
            None
        } else {
            Some(bytes.to_vec())
        }
    }
}

#[derive(Default)]
pub struct DecryptChain {
    links: Vec<Box<dyn BlobDecryptor>>,
}

impl DecryptChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, link: impl BlobDecryptor + 'static) -> Self {
        self.links.push(Box::new(link));
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn decrypt(&self, bytes: &[u8]) -> Option<(Vec<u8>, Recovery)> {
        self.links
            .iter()
            .find_map(|link| link.try_decrypt(bytes).map(|plain| (plain, link.recovery())))
    }
}

impl std::fmt::Debug for DecryptChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<Recovery> = self.links.iter().map(|l| l.recovery()).collect();
        f.debug_struct("DecryptChain").field("links", &kinds).finish()
    }
}
