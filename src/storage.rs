/// Registry persistence: the storage boundary and the blob format.
///
/// The whole registry lives in one fixed slot as a single blob:
///
/// ```text
/// [ 'K' 'W' ] [ version ] [ len lo ] [ len hi ] [ JSON key listing ... ]
/// ```
///
/// A slot that does not start with the magic bytes (erased flash, first boot)
/// holds no registry. The version byte lets a later record shape decode blobs
/// written by this one.
use heapless::Vec;
use thiserror::Error;

use crate::defaults::MAX_BLOB_LEN;
use crate::registry::{Key, KeyList};
use crate::summary::{parse_key_list, render_key_list};

pub const BLOB_MAGIC: [u8; 2] = *b"KW";
pub const BLOB_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("registry blob does not fit the storage slot")]
    TooLarge,
    #[error("registry blob truncated: header says {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("unsupported registry blob version {0}")]
    UnsupportedVersion(u8),
    #[error("registry blob payload is not a valid key listing")]
    Decode,
    #[error("storage backend failure")]
    Backend,
}

/// Durable byte storage for the registry blob, addressed by one fixed slot.
pub trait KeyStore {
    type Error: core::fmt::Debug;

    /// Read the slot into `buf`. Returns the number of bytes read, or `None`
    /// if the slot has never been written.
    fn load(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Self::Error>;

    /// Replace the slot contents with `blob`.
    fn save(&mut self, blob: &[u8]) -> Result<(), Self::Error>;
}

impl<S: KeyStore + ?Sized> KeyStore for &mut S {
    type Error = S::Error;

    fn load(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        (**self).load(buf)
    }

    fn save(&mut self, blob: &[u8]) -> Result<(), Self::Error> {
        (**self).save(blob)
    }
}

/// Encode `keys` as a versioned blob into `buf`. Returns the blob length.
pub fn encode_keys(keys: &[Key], buf: &mut [u8]) -> Result<usize, StoreError> {
    if buf.len() < HEADER_LEN {
        return Err(StoreError::TooLarge);
    }
    let (header, payload) = buf.split_at_mut(HEADER_LEN);
    let len = render_key_list(keys, payload).map_err(|_| StoreError::TooLarge)?;
    let len16 = u16::try_from(len).map_err(|_| StoreError::TooLarge)?;

    header[..2].copy_from_slice(&BLOB_MAGIC);
    header[2] = BLOB_VERSION;
    header[3..5].copy_from_slice(&len16.to_le_bytes());
    Ok(HEADER_LEN + len)
}

/// Decode a blob read from storage.
///
/// Returns `Ok(None)` when the slot holds no registry (missing magic).
pub fn decode_keys(blob: &[u8]) -> Result<Option<KeyList>, StoreError> {
    if blob.len() < BLOB_MAGIC.len() || blob[..2] != BLOB_MAGIC {
        return Ok(None);
    }
    if blob.len() < HEADER_LEN {
        return Err(StoreError::Truncated {
            expected: HEADER_LEN,
            found: blob.len(),
        });
    }

    let len = u16::from_le_bytes([blob[3], blob[4]]) as usize;
    let payload = &blob[HEADER_LEN..];
    if payload.len() < len {
        return Err(StoreError::Truncated {
            expected: len,
            found: payload.len(),
        });
    }

    match blob[2] {
        1 => parse_key_list(&payload[..len])
            .map(Some)
            .map_err(|_| StoreError::Decode),
        v => Err(StoreError::UnsupportedVersion(v)),
    }
}

/// RAM-backed store. Loses everything on power loss; used on the host and
/// when no durable backend is wired.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blob: Option<Vec<u8, MAX_BLOB_LEN>>,
    saves: u32,
}

impl MemoryStore {
    pub const fn new() -> Self {
        Self {
            blob: None,
            saves: 0,
        }
    }

    /// A store whose slot already holds `blob`.
    pub fn with_blob(blob: &[u8]) -> Result<Self, StoreError> {
        let blob = Vec::from_slice(blob).map_err(|_| StoreError::TooLarge)?;
        Ok(Self {
            blob: Some(blob),
            saves: 0,
        })
    }

    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }

    /// Number of successful saves since creation.
    pub fn save_count(&self) -> u32 {
        self.saves
    }
}

impl KeyStore for MemoryStore {
    type Error = StoreError;

    fn load(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StoreError> {
        match &self.blob {
            Some(blob) => {
                let dst = buf.get_mut(..blob.len()).ok_or(StoreError::TooLarge)?;
                dst.copy_from_slice(blob);
                Ok(Some(blob.len()))
            }
            None => Ok(None),
        }
    }

    fn save(&mut self, blob: &[u8]) -> Result<(), StoreError> {
        self.blob = Some(Vec::from_slice(blob).map_err(|_| StoreError::TooLarge)?);
        self.saves += 1;
        Ok(())
    }
}
