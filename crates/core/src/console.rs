//! Interfaces to the emulated console.
//!
//! The cycle-accurate CPU/PPU core lives outside this crate. It is driven
//! through [`Console`], reads controllers through [`InputPort`], and reports
//! what it draws through an optional [`PpuObserver`] (a no-op by default)
//! instead of being specialised by an instrumented subclass.

use serde::{Deserialize, Serialize};

use crate::arbiter::ControlState;
use crate::error::{RomError, StateError};
use crate::palette::BLACK_INDEX;
use crate::rom::RomImage;
use crate::tiles::TileFlags;
use crate::{PIXEL_COUNT, SCREEN_WIDTH};

/// One frame of raw console output: 256×240 palette indices with emphasis bits.
///
/// The length is fixed at construction; there is no way to build a torn or
/// short frame.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    pixels: Box<[u16]>,
}

impl RawFrame {
    /// A frame filled with solid black.
    pub fn new() -> Self {
        Self::filled(BLACK_INDEX)
    }

    /// A frame filled with one raw pixel value.
    pub fn filled(pixel: u16) -> Self {
        RawFrame { pixels: vec![pixel; PIXEL_COUNT].into_boxed_slice() }
    }

    /// Wrap a pixel vector. Returns `None` unless it holds exactly one frame.
    pub fn from_vec(pixels: Vec<u16>) -> Option<Self> {
        if pixels.len() == PIXEL_COUNT {
            Some(RawFrame { pixels: pixels.into_boxed_slice() })
        } else {
            None
        }
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u16] {
        &mut self.pixels
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u16 {
        self.pixels[y * SCREEN_WIDTH + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, pixel: u16) {
        self.pixels[y * SCREEN_WIDTH + x] = pixel;
    }

    pub fn fill(&mut self, pixel: u16) {
        self.pixels.fill(pixel);
    }
}

impl Default for RawFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame").field("len", &self.pixels.len()).finish()
    }
}

/// Read access to pattern-table (CHR) memory, used to fetch tile bitmaps.
pub trait ChrReader {
    fn read_chr(&self, addr: u32) -> u8;
}

impl<F: Fn(u32) -> u8> ChrReader for F {
    fn read_chr(&self, addr: u32) -> u8 {
        self(addr)
    }
}

/// A tile the PPU used for one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileFetch {
    /// Absolute address of the tile's 16 bytes in CHR memory
    pub chr_addr: u32,
    /// Tile number reported to clients (CHR address / 16, masked for CHR-RAM)
    pub tile_index: u32,
    /// Palette indices for colors 0–3 (color 0 of sprites is transparent: 0xFF)
    pub palette: [u8; 4],
    pub flags: TileFlags,
    /// Fine horizontal scroll (background only)
    pub fine_x: u8,
    /// Row within the tile being drawn
    pub row: u8,
}

/// A sprite the PPU used for one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpriteFetch {
    pub tile: TileFetch,
    /// Sprite origin on screen
    pub x: u8,
    pub y: u8,
}

/// Provenance of one output pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFetch {
    pub x: u32,
    pub y: u32,
    pub background: Option<TileFetch>,
    pub sprite: Option<SpriteFetch>,
}

/// Receives draw-time callbacks from the PPU.
pub trait PpuObserver {
    /// Called before the first pixel of a frame.
    fn begin_frame(&mut self) {}
    /// Called once per rendered pixel.
    fn on_pixel(&mut self, _fetch: &PixelFetch, _chr: &dyn ChrReader) {}
    /// Called after the last pixel of a frame.
    fn end_frame(&mut self) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl PpuObserver for NoopObserver {}

/// Controller reads issued by the running game.
pub trait InputPort {
    fn read_port(&mut self, port: u8) -> ControlState;
}

/// The external emulation core.
pub trait Console {
    /// Load a ROM image and power-cycle.
    fn load_rom(&mut self, rom: &RomImage) -> Result<(), RomError>;

    /// Serialize the complete console state to an opaque blob.
    fn save_state(&self) -> Vec<u8>;

    /// Restore a blob produced by [`Console::save_state`].
    fn load_state(&mut self, state: &[u8]) -> Result<(), StateError>;

    /// Emulate exactly one frame.
    fn run_frame(&mut self, input: &mut dyn InputPort, observer: &mut dyn PpuObserver);

    /// Raw output of the most recent frame.
    fn raw_frame(&self) -> &RawFrame;

    /// Interleaved stereo samples produced by the most recent frame.
    fn audio_samples(&self) -> &[i16];

    /// Frames emulated since power-on (part of the saved state).
    fn frame_count(&self) -> u32;

    /// CRC32 of the loaded ROM, 0 if none.
    fn rom_crc32(&self) -> u32;

    fn pause(&mut self);
    fn resume(&mut self);
    fn is_paused(&self) -> bool;
}
