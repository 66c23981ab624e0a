use crate::{PodFsError, PodFsResult};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::{Read, Write};

/// Gzip input is cut into members of this size and compressed in parallel.
pub const GZIP_MEMBER_SIZE: usize = 256 * 1024;

/// Block payload compression. Unknown names decode as identity so that files
/// written by a newer codec set remain readable as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Snappy,
    Unknown(String),
}

impl Compression {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Compression::None,
            "gzip" => Compression::Gzip,
            "snappy" => Compression::Snappy,
            _ => Compression::Unknown(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Compression::None => "",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Unknown(name) => name.as_str(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Compression::None)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => f.write_str("none"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl Serialize for Compression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Compression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Compression::from_name(&s))
    }
}

fn gzip_member(data: &[u8]) -> PodFsResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(data.len() / 2 + 64),
        flate2::Compression::default(),
    );
    encoder
        .write_all(data)
        .map_err(|e| PodFsError::Internal(format!("gzip compress failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| PodFsError::Internal(format!("gzip finish failed: {}", e)))
}

fn gzip_compress(data: &[u8]) -> PodFsResult<Vec<u8>> {
    if data.len() <= GZIP_MEMBER_SIZE {
        return gzip_member(data);
    }

    let members: Vec<PodFsResult<Vec<u8>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = data
            .chunks(GZIP_MEMBER_SIZE)
            .map(|piece| scope.spawn(move || gzip_member(piece)))
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    Err(PodFsError::Internal("gzip worker panicked".to_string()))
                })
            })
            .collect()
    });

    let mut out = Vec::new();
    for member in members {
        out.extend_from_slice(&member?);
    }
    Ok(out)
}

fn gzip_decompress(data: &[u8], size_hint: usize) -> PodFsResult<Vec<u8>> {
    let mut out = Vec::with_capacity(size_hint);
    MultiGzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| PodFsError::DecodeError(format!("gzip decompress failed: {}", e)))?;
    Ok(out)
}

/// Compress one block payload. The block size is accepted for symmetry with
/// [`decompress`], where it sizes the output buffer.
pub fn compress(data: &[u8], compression: &Compression, _block_size: u64) -> PodFsResult<Vec<u8>> {
    match compression {
        Compression::Gzip => gzip_compress(data),
        Compression::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| PodFsError::Internal(format!("snappy compress failed: {}", e))),
        Compression::None | Compression::Unknown(_) => Ok(data.to_vec()),
    }
}

/// Inverse of [`compress`].
pub fn decompress(data: &[u8], compression: &Compression, block_size: u64) -> PodFsResult<Vec<u8>> {
    match compression {
        Compression::Gzip => gzip_decompress(data, block_size as usize),
        Compression::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| PodFsError::DecodeError(format!("snappy decompress failed: {}", e))),
        Compression::None | Compression::Unknown(_) => Ok(data.to_vec()),
    }
}
