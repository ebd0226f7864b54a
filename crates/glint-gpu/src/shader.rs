//! Compiled shader binary loading.
//!
//! Shader binaries are pre-compiled SPIR-V; this module only loads and
//! validates them. Compilation is out of scope.

use std::path::Path;

use crate::error::{GpuError, Result};

/// SPIR-V magic number (little-endian word order).
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// SPIR-V magic number as seen when the producer used the other endianness.
const SPIRV_MAGIC_SWAPPED: u32 = 0x0302_2307;

/// Raw words of one compiled shader stage.
///
/// Immutable once loaded; consumed by reflection and module creation and
/// discarded after the native module exists.
pub struct ShaderBinary {
    words: Vec<u32>,
}

impl ShaderBinary {
    /// Load a compiled shader binary from disk.
    ///
    /// Unreadable or malformed files are a fatal load error for this
    /// shader; no partial state is produced.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| GpuError::ShaderBinary(format!("{}: {e}", path.display())))?;
        Self::from_bytes(&bytes)
            .map_err(|e| GpuError::ShaderBinary(format!("{}: {e}", path.display())))
    }

    /// Build a binary from in-memory bytes (e.g. embedded SPIR-V).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 20 {
            return Err(GpuError::ShaderBinary(format!(
                "too short for a SPIR-V header ({} bytes)",
                bytes.len()
            )));
        }
        if bytes.len() % 4 != 0 {
            return Err(GpuError::ShaderBinary(format!(
                "length {} is not a multiple of 4",
                bytes.len()
            )));
        }

        let mut words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        match words[0] {
            SPIRV_MAGIC => {}
            SPIRV_MAGIC_SWAPPED => {
                // Produced on the other endianness; swap every word.
                for word in &mut words {
                    *word = word.swap_bytes();
                }
            }
            other => {
                return Err(GpuError::ShaderBinary(format!(
                    "bad magic number {other:#010x}"
                )));
            }
        }

        Ok(Self { words })
    }

    /// The SPIR-V words, magic first.
    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn header() -> Vec<u32> {
        // magic, version 1.6, generator, bound, schema
        vec![SPIRV_MAGIC, 0x0001_0600, 0, 8, 0]
    }

    #[test]
    fn loads_valid_binary() {
        let words = header();
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let binary = ShaderBinary::from_bytes(&bytes).unwrap();
        assert_eq!(binary.words()[0], SPIRV_MAGIC);
        assert_eq!(binary.words().len(), 5);
    }

    #[test]
    fn swaps_big_endian_binary() {
        let words = header();
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let binary = ShaderBinary::from_bytes(&bytes).unwrap();
        assert_eq!(binary.words()[0], SPIRV_MAGIC);
        assert_eq!(binary.words()[3], 8);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut words = header();
        words[0] = 0xDEAD_BEEF;
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert!(ShaderBinary::from_bytes(&bytes).is_err());
    }

    #[test]
    fn rejects_truncated_binary() {
        let bytes = [0x03, 0x02, 0x23];
        assert!(ShaderBinary::from_bytes(&bytes).is_err());
    }

    #[test]
    fn rejects_unaligned_length() {
        let words = header();
        let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        bytes.push(0);
        assert!(ShaderBinary::from_bytes(&bytes).is_err());
    }

    #[test]
    fn loads_from_file() {
        let words = header();
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        let binary = ShaderBinary::load(file.path()).unwrap();
        assert_eq!(binary.words().len(), 5);
    }

    #[test]
    fn missing_file_is_fatal() {
        assert!(ShaderBinary::load("/nonexistent/shader.vert.spv").is_err());
    }
}
