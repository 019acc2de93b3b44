//! GGUF checkpoint preflight
//!
//! Reads just enough of the GGUF header to reject files that llama.cpp
//! would otherwise abort on deep inside the loader.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// "GGUF" in little-endian byte order.
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// GGUF versions llama.cpp currently loads.
const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 2..=3;

/// Model validation errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to read model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("File too small to be a GGUF model")]
    Truncated,
    #[error("Not a GGUF file (magic {0:#010x})")]
    BadMagic(u32),
    #[error("Unsupported GGUF version {0}")]
    UnsupportedVersion(u32),
}

/// Header fields read during validation
#[derive(Debug, Clone)]
pub struct GgufMetadata {
    pub version: u32,
    pub tensor_count: u64,
    pub kv_count: u64,
}

/// Validate the GGUF header of the file at `path`.
pub fn validate_gguf(path: &Path) -> Result<GgufMetadata, ModelError> {
    let mut file = File::open(path)?;
    let mut header = [0u8; 24];
    file.read_exact(&mut header)
        .map_err(|_| ModelError::Truncated)?;

    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if magic != GGUF_MAGIC {
        return Err(ModelError::BadMagic(magic));
    }

    // GGUF v1 used 32-bit counts; llama.cpp dropped support for it
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(ModelError::UnsupportedVersion(version));
    }

    let mut tensor_bytes = [0u8; 8];
    tensor_bytes.copy_from_slice(&header[8..16]);
    let mut kv_bytes = [0u8; 8];
    kv_bytes.copy_from_slice(&header[16..24]);

    Ok(GgufMetadata {
        version,
        tensor_count: u64::from_le_bytes(tensor_bytes),
        kv_count: u64::from_le_bytes(kv_bytes),
    })
}
