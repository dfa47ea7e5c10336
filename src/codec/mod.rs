//! Descriptor encoding.
//!
//! Arguments travel to the workers as descriptors: the bincode encoding of the
//! value plus an xxh3 fingerprint of those bytes. Workers use the fingerprint to
//! skip decoding values they have already seen. The fingerprint is a cheap hash
//! of the bytes, so two different values can in principle collide; that is an
//! accepted approximation, not a correctness guarantee.

pub mod cache;

pub use cache::DescriptorCache;

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard()
}

/// Fingerprint used to recognise descriptors a worker has already decoded.
pub fn fingerprint(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

/// An encoded value together with the fingerprint of its encoding.
pub struct Descriptor<T> {
    fingerprint: u64,
    bytes: Arc<[u8]>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize> Descriptor<T> {
    pub fn encode(value: &T) -> Result<Self> {
        let bytes = bincode::serde::encode_to_vec(value, bincode_config())
            .map_err(|e| Error::codec(format!("encode failed: {}", e)))?;

        Ok(Self {
            fingerprint: fingerprint(&bytes),
            bytes: bytes.into(),
            _marker: PhantomData,
        })
    }
}

impl<T: DeserializeOwned> Descriptor<T> {
    pub fn decode(&self) -> Result<T> {
        let (value, _) = bincode::serde::decode_from_slice(&self.bytes, bincode_config())
            .map_err(|e| Error::codec(format!("decode failed: {}", e)))?;
        Ok(value)
    }
}

impl<T> Descriptor<T> {
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[cfg(test)]
    pub(crate) fn from_raw(fingerprint: u64, bytes: Vec<u8>) -> Self {
        Self {
            fingerprint,
            bytes: bytes.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Descriptor<T> {
    fn clone(&self) -> Self {
        Self {
            fingerprint: self.fingerprint,
            bytes: Arc::clone(&self.bytes),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Descriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("fingerprint", &format_args!("{:#018x}", self.fingerprint))
            .field("len", &self.bytes.len())
            .finish()
    }
}
