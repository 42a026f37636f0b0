//! Emulation settings.
//!
//! Read-only configuration consumed by the history, decode pipeline and tile
//! catalog. Loaded from an optional TOML file; every field has a default so an
//! empty file (or no file at all) is valid.
//!
//! ```toml
//! rewind_buffer_minutes = 2
//! video_filter = "Scale2x"
//! video_scale = 2.0
//!
//! [overscan]
//! top = 8
//! bottom = 8
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::{FRAMES_PER_SECOND, SCREEN_HEIGHT, SCREEN_WIDTH};

/// Default number of frames per rewind history block.
pub const DEFAULT_BLOCK_FRAMES: u32 = 30;
/// Default capacity of the per-frame sprite buffer.
pub const DEFAULT_SPRITE_CAPACITY: usize = 0x100;

bitflags::bitflags! {
    /// Runtime flags toggled by the emulation core itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EmulationFlags: u32 {
        /// Disable frame pacing (history replay and resync)
        const FORCE_MAX_SPEED = 0b0000_0001;
        /// Console is paused between frames
        const PAUSED = 0b0000_0010;
    }
}

/// Border region hidden from display and excluded from tile instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Overscan {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl Overscan {
    /// Visible width after cropping.
    pub fn screen_width(&self) -> u32 {
        (SCREEN_WIDTH as u32).saturating_sub(self.left + self.right)
    }

    /// Visible height after cropping.
    pub fn screen_height(&self) -> u32 {
        (SCREEN_HEIGHT as u32).saturating_sub(self.top + self.bottom)
    }

    /// True if pixel (x, y) lies inside the cropped border.
    /// Pixels off the screen count as cropped.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        if x >= SCREEN_WIDTH as u32 || y >= SCREEN_HEIGHT as u32 {
            return true;
        }
        x < self.left
            || y < self.top
            || (SCREEN_WIDTH as u32 - x - 1) < self.right
            || (SCREEN_HEIGHT as u32 - y - 1) < self.bottom
    }
}

/// Selectable video filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoFilterType {
    #[default]
    None,
    Ntsc,
    NtscHalfRes,
    NtscQuarterRes,
    Prescale2x,
    Prescale3x,
    Prescale4x,
    Scale2x,
}

/// Top-level emulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulationSettings {
    /// Rewind buffer length in minutes (0 disables rewinding)
    pub rewind_buffer_minutes: u32,
    /// Frames covered by one history block
    pub rewind_block_frames: u32,
    pub overscan: Overscan,
    pub video_filter: VideoFilterType,
    pub video_scale: f64,
    /// Display aspect ratio (0.0 = square pixels, no correction)
    pub aspect_ratio: f64,
    /// Hard upper bound on sprites recorded per frame
    pub sprite_capacity: usize,
}

impl Default for EmulationSettings {
    fn default() -> Self {
        EmulationSettings {
            rewind_buffer_minutes: 1,
            rewind_block_frames: DEFAULT_BLOCK_FRAMES,
            overscan: Overscan::default(),
            video_filter: VideoFilterType::None,
            video_scale: 1.0,
            aspect_ratio: 0.0,
            sprite_capacity: DEFAULT_SPRITE_CAPACITY,
        }
    }
}

impl EmulationSettings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Maximum number of blocks kept in the history queue.
    ///
    /// At the default block size this is 120 blocks per minute.
    pub fn max_history_blocks(&self) -> usize {
        if self.rewind_block_frames == 0 {
            return 0;
        }
        let frames = self.rewind_buffer_minutes as u64 * 60 * FRAMES_PER_SECOND as u64;
        (frames / self.rewind_block_frames as u64) as usize
    }
}
