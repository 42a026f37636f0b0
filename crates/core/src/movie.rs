//! Input movies: per-port input tracks recorded from, and replayed into, the
//! arbiter.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "RMCM"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode `MovieData`
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::arbiter::{ControlState, MovieSource};
use crate::error::MovieError;
use crate::MAX_PORTS;

const MAGIC: &[u8; 4] = b"RMCM";
const FORMAT_VERSION: u32 = 1;

/// Serialized movie contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieData {
    /// CRC32 of the ROM the movie was recorded on
    pub rom_crc32: u32,
    /// Console state the recording started from (None = power-on)
    pub start_state: Option<Vec<u8>>,
    /// One byte per poll, per port
    pub tracks: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovieMode {
    Idle,
    Recording,
    Playing,
}

/// A movie being recorded or played back.
#[derive(Debug, Clone)]
pub struct Movie {
    data: MovieData,
    mode: MovieMode,
    cursor: [usize; MAX_PORTS],
}

impl Movie {
    /// Start a new recording.
    pub fn record(rom_crc32: u32, start_state: Option<Vec<u8>>) -> Self {
        info!(rom_crc32, "Movie recording started");
        Movie {
            data: MovieData { rom_crc32, start_state, tracks: vec![Vec::new(); MAX_PORTS] },
            mode: MovieMode::Recording,
            cursor: [0; MAX_PORTS],
        }
    }

    /// Play back previously recorded data from the beginning.
    pub fn play(mut data: MovieData) -> Self {
        data.tracks.resize(MAX_PORTS, Vec::new());
        info!(frames = data.tracks[0].len(), "Movie playback started");
        Movie { data, mode: MovieMode::Playing, cursor: [0; MAX_PORTS] }
    }

    pub fn mode(&self) -> MovieMode {
        self.mode
    }

    pub fn data(&self) -> &MovieData {
        &self.data
    }

    pub fn stop(&mut self) {
        if self.mode != MovieMode::Idle {
            debug!(mode = ?self.mode, "Movie stopped");
        }
        self.mode = MovieMode::Idle;
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), MovieError> {
        let payload = bincode::serialize(&self.data)?;
        let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

        let mut out = Vec::with_capacity(8 + compressed.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&compressed);
        std::fs::write(path, &out)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<MovieData, MovieError> {
        let data = std::fs::read(path)?;
        if data.len() < 8 || &data[0..4] != MAGIC {
            return Err(MovieError::BadHeader);
        }
        let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if version != FORMAT_VERSION {
            return Err(MovieError::BadHeader);
        }
        let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[8..])
            .map_err(|e| MovieError::Decompress(format!("{:?}", e)))?;
        Ok(bincode::deserialize(&decompressed)?)
    }
}

impl MovieSource for Movie {
    fn is_playing(&self) -> bool {
        self.mode == MovieMode::Playing
    }

    fn is_recording(&self) -> bool {
        self.mode == MovieMode::Recording
    }

    fn next_state(&mut self, port: u8) -> ControlState {
        let p = port as usize;
        let Some(track) = self.data.tracks.get(p) else {
            return ControlState::empty();
        };
        match track.get(self.cursor[p]) {
            Some(&b) => {
                self.cursor[p] += 1;
                ControlState::from_byte(b)
            }
            None => {
                info!(port, "Movie playback finished");
                self.mode = MovieMode::Idle;
                ControlState::empty()
            }
        }
    }

    fn record_state(&mut self, port: u8, state: ControlState) {
        if let Some(track) = self.data.tracks.get_mut(port as usize) {
            track.push(state.to_byte());
        }
    }
}
