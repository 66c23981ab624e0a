use crate::{PodFsError, PodFsResult, PodPath};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

pub const HASH_LENGTH: usize = 32;

fn sha256(data: &[u8]) -> [u8; HASH_LENGTH] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn decode_hash(s: &str) -> PodFsResult<[u8; HASH_LENGTH]> {
    let raw = hex::decode(s)
        .map_err(|e| PodFsError::DecodeError(format!("invalid hex hash {}: {}", s, e)))?;
    raw.try_into().map_err(|raw: Vec<u8>| {
        PodFsError::DecodeError(format!(
            "hash length mismatch, expect {} got {}",
            HASH_LENGTH,
            raw.len()
        ))
    })
}

/// Feed key of a node: hash of its canonical absolute path.
///
/// There is no stable node id behind it, so moving a node changes its topic.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic([u8; HASH_LENGTH]);

impl Topic {
    pub fn from_path(path: &PodPath) -> Self {
        Self(sha256(path.as_str().as_bytes()))
    }

    pub fn from_hex(s: &str) -> PodFsResult<Self> {
        decode_hash(s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self.to_hex())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Opaque, content-derived reference to a blob in the block store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentRef([u8; HASH_LENGTH]);

impl ContentRef {
    pub fn from_content(data: &[u8]) -> Self {
        Self(sha256(data))
    }

    pub fn from_hex(s: &str) -> PodFsResult<Self> {
        decode_hash(s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentRef({})", self.to_hex())
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentRef::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
