//! Save state files (quick save / quick load).
//!
//! Wraps an opaque console snapshot in a small container that remembers which
//! ROM it belongs to, so a state is never loaded into the wrong game.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "RMCS"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | ROM CRC32        |  u32 little-endian
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode `SaveState`
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::StateFileError;

/// Magic bytes identifying a save state file.
const MAGIC: &[u8; 4] = b"RMCS";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 12;

/// Payload of a state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveState {
    /// Console frame counter when the state was taken
    pub frame: u32,
    /// Opaque console snapshot
    pub blob: Vec<u8>,
}

/// Write a state to disk.
pub fn save_to_file(state: &SaveState, rom_crc32: u32, path: &Path) -> Result<(), StateFileError> {
    let payload = bincode::serialize(state)?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&rom_crc32.to_le_bytes());
    out.extend_from_slice(&compressed);

    std::fs::write(path, &out)?;
    info!(path = %path.display(), frame = state.frame, bytes = out.len(), "State saved");
    Ok(())
}

/// Load a state from disk, verifying magic, version and ROM.
pub fn load_from_file(path: &Path, expected_crc32: u32) -> Result<SaveState, StateFileError> {
    let data = std::fs::read(path)?;

    if data.len() < HEADER_LEN {
        return Err(StateFileError::TooSmall);
    }
    if &data[0..4] != MAGIC {
        return Err(StateFileError::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(StateFileError::Version { found: version, expected: FORMAT_VERSION });
    }
    let crc = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    if crc != expected_crc32 {
        return Err(StateFileError::RomMismatch { found: crc, expected: expected_crc32 });
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| StateFileError::Decompress(format!("{:?}", e)))?;
    let state: SaveState = bincode::deserialize(&decompressed)?;
    info!(path = %path.display(), frame = state.frame, "State loaded");
    Ok(state)
}

/// Derive the state file path from a ROM path.
/// `games/mario.nes` → `games/mario.state`
pub fn state_path(rom_path: &Path) -> PathBuf {
    let stem = rom_path.file_stem().and_then(|s| s.to_str()).unwrap_or("game");
    let dir = rom_path.parent().unwrap_or(Path::new("."));
    dir.join(format!("{}.state", stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.state");
        let state = SaveState { frame: 42, blob: (0..200u8).collect() };

        save_to_file(&state, 0xDEAD_BEEF, &path).unwrap();
        assert_eq!(load_from_file(&path, 0xDEAD_BEEF).unwrap(), state);
    }

    #[test]
    fn test_rom_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.state");
        save_to_file(&SaveState { frame: 1, blob: vec![1] }, 1, &path).unwrap();
        assert!(matches!(
            load_from_file(&path, 2),
            Err(StateFileError::RomMismatch { found: 1, expected: 2 })
        ));
    }

    #[test]
    fn test_bad_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.state");

        std::fs::write(&path, b"RMCS").unwrap();
        assert!(matches!(load_from_file(&path, 0), Err(StateFileError::TooSmall)));

        std::fs::write(&path, b"ABES\x01\0\0\0\0\0\0\0").unwrap();
        assert!(matches!(load_from_file(&path, 0), Err(StateFileError::BadMagic)));

        std::fs::write(&path, b"RMCS\x07\0\0\0\0\0\0\0").unwrap();
        assert!(matches!(load_from_file(&path, 0), Err(StateFileError::Version { found: 7, .. })));

        std::fs::write(&path, b"RMCS\x01\0\0\0\0\0\0\0garbage").unwrap();
        assert!(matches!(load_from_file(&path, 0), Err(StateFileError::Decompress(_))));
    }

    #[test]
    fn test_state_path() {
        assert_eq!(state_path(Path::new("games/mario.nes")), Path::new("games/mario.state"));
        assert_eq!(state_path(Path::new("zelda.fds")), Path::new("zelda.state"));
    }
}
