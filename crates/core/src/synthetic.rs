//! A small deterministic console.
//!
//! Stands in for the external CPU/PPU core: a scrolling background built from
//! the ROM's pattern tables and a handful of sprites steered by the
//! controllers. It renders through the same [`PpuObserver`] hooks a real PPU
//! uses and its state is fully serializable, so rewinding, state files and
//! the protocol server can be exercised end to end.
//!
//! ## Controls
//!
//! ```text
//! Port 0 D-pad   move sprite 0        Port 0 B       freeze horizontal scroll
//! Port 1 D-pad   move sprite 1        Port 0 START   scroll down
//! Port 0 SELECT  red emphasis         any port A     advance sprite tile
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::arbiter::ControlState;
use crate::console::{Console, InputPort, PixelFetch, PpuObserver, RawFrame, SpriteFetch, TileFetch};
use crate::error::{RomError, StateError};
use crate::palette::EMPHASIS_RED;
use crate::rom::RomImage;
use crate::tiles::{pack_chr_planes, pixel_at, TileBitmap, TileFlags, TRANSPARENT};
use crate::{MAX_PORTS, SCREEN_HEIGHT, SCREEN_WIDTH};

const CHR_SIZE: usize = 0x2000;
/// Sprite patterns live in the second pattern table
const SPRITE_TABLE: u32 = 0x1000;
const SPRITE_COUNT: usize = 4;
const NAMETABLE_COLUMNS: usize = SCREEN_WIDTH / 8;
const NAMETABLE_ROWS: usize = SCREEN_HEIGHT / 8;

/// Stereo samples per frame (44.1 kHz / 60)
const AUDIO_FRAMES: usize = 735;
const AUDIO_AMPLITUDE: i16 = 2000;

const BG_PALETTES: [[u8; 4]; 4] = [
    [0x0F, 0x00, 0x10, 0x30],
    [0x0F, 0x06, 0x16, 0x26],
    [0x0F, 0x09, 0x19, 0x29],
    [0x0F, 0x01, 0x11, 0x21],
];

const SPRITE_PALETTES: [[u8; 4]; 2] = [
    [TRANSPARENT, 0x07, 0x17, 0x27],
    [TRANSPARENT, 0x02, 0x12, 0x22],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct SpriteSlot {
    x: u8,
    y: u8,
    tile: u8,
    /// `TileFlags` bits
    attr: u8,
}

/// Everything that `save_state` captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MachineState {
    rom_crc32: u32,
    frame_count: u32,
    scroll_x: u8,
    scroll_y: u8,
    emphasis: bool,
    sprites: [SpriteSlot; SPRITE_COUNT],
    audio_phase: u32,
    frame: RawFrame,
}

impl MachineState {
    fn power_on(rom_crc32: u32) -> Self {
        MachineState {
            rom_crc32,
            frame_count: 0,
            scroll_x: 0,
            scroll_y: 0,
            emphasis: false,
            sprites: [
                SpriteSlot { x: 64, y: 100, tile: 0, attr: 0 },
                SpriteSlot { x: 160, y: 100, tile: 1, attr: TileFlags::H_MIRROR.bits() },
                SpriteSlot { x: 32, y: 200, tile: 2, attr: TileFlags::V_MIRROR.bits() },
                SpriteSlot { x: 200, y: 40, tile: 3, attr: TileFlags::BACKGROUND_PRIORITY.bits() },
            ],
            audio_phase: 0,
            frame: RawFrame::new(),
        }
    }
}

/// Deterministic console implementation.
pub struct SyntheticConsole {
    chr: Vec<u8>,
    /// Pre-packed bitmaps for all 512 CHR tiles
    patterns: Vec<TileBitmap>,
    rom_loaded: bool,
    state: MachineState,
    audio: Vec<i16>,
    paused: bool,
}

impl SyntheticConsole {
    pub fn new() -> Self {
        let chr = builtin_chr();
        SyntheticConsole {
            patterns: pack_all(&chr),
            chr,
            rom_loaded: false,
            state: MachineState::power_on(0),
            audio: Vec::new(),
            paused: false,
        }
    }

    fn step_inputs(&mut self, input: &mut dyn InputPort) {
        let mut pads = [ControlState::empty(); MAX_PORTS];
        for (port, pad) in pads.iter_mut().enumerate() {
            *pad = input.read_port(port as u8);
        }
        let s = &mut self.state;

        for (slot, pad) in s.sprites.iter_mut().zip(&pads[..2]) {
            if pad.contains(ControlState::LEFT) {
                slot.x = slot.x.wrapping_sub(1);
            }
            if pad.contains(ControlState::RIGHT) {
                slot.x = slot.x.wrapping_add(1);
            }
            if pad.contains(ControlState::UP) {
                slot.y = slot.y.wrapping_sub(1);
            }
            if pad.contains(ControlState::DOWN) {
                slot.y = slot.y.wrapping_add(1);
            }
        }
        if pads.iter().any(|p| p.contains(ControlState::A)) {
            for slot in &mut s.sprites {
                slot.tile = slot.tile.wrapping_add(1);
            }
        }
        if !pads[0].contains(ControlState::B) {
            s.scroll_x = s.scroll_x.wrapping_add(1);
        }
        if pads[0].contains(ControlState::START) {
            s.scroll_y = ((s.scroll_y as usize + 1) % SCREEN_HEIGHT) as u8;
        }
        s.emphasis = pads[0].contains(ControlState::SELECT);
    }

    fn render(&mut self, observer: &mut dyn PpuObserver) {
        let chr = &self.chr;
        let reader = |addr: u32| chr.get(addr as usize).copied().unwrap_or(0);
        let patterns = &self.patterns;
        let s = &mut self.state;

        observer.begin_frame();
        for y in 0..SCREEN_HEIGHT {
            let by = (y + s.scroll_y as usize) % SCREEN_HEIGHT;
            let (ty, row) = (by / 8, by % 8);
            for x in 0..SCREEN_WIDTH {
                let bx = (x + s.scroll_x as usize) % SCREEN_WIDTH;
                let (tx, col) = (bx / 8, bx % 8);

                let tile = nametable_tile(tx, ty);
                let palette = BG_PALETTES[(tx / 2 + ty / 2) & 3];
                let bg_color = pixel_at(&patterns[tile as usize], col, row);
                let background = TileFetch {
                    chr_addr: tile as u32 * 16,
                    tile_index: tile as u32,
                    palette,
                    flags: TileFlags::empty(),
                    fine_x: s.scroll_x & 7,
                    row: row as u8,
                };

                let sprite = sprite_at(&s.sprites, patterns, x, y);
                let mut index = palette[bg_color as usize];
                if let Some((fetch, color)) = &sprite {
                    let behind = fetch.tile.flags.contains(TileFlags::BACKGROUND_PRIORITY);
                    if !behind || bg_color == 0 {
                        index = fetch.tile.palette[*color as usize];
                    }
                }
                let mut pixel = index as u16;
                if s.emphasis {
                    pixel |= EMPHASIS_RED;
                }
                s.frame.set(x, y, pixel);

                let fetch = PixelFetch {
                    x: x as u32,
                    y: y as u32,
                    background: Some(background),
                    sprite: sprite.map(|(f, _)| f),
                };
                observer.on_pixel(&fetch, &reader);
            }
        }
        observer.end_frame();
    }

    fn mix_audio(&mut self) {
        let period = 40 + (self.state.scroll_x as u32 % 64);
        self.audio.clear();
        for _ in 0..AUDIO_FRAMES {
            let high = (self.state.audio_phase / period) % 2 == 0;
            let v = if high { AUDIO_AMPLITUDE } else { -AUDIO_AMPLITUDE };
            self.audio.push(v);
            self.audio.push(v);
            self.state.audio_phase = self.state.audio_phase.wrapping_add(1);
        }
    }
}

impl Default for SyntheticConsole {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_chr() -> Vec<u8> {
    (0..CHR_SIZE)
        .map(|i| {
            let tile = (i / 16) as u8;
            let row = (i % 8) as u8;
            tile.rotate_left(row as u32) ^ (row.wrapping_mul(0x1D))
        })
        .collect()
}

fn pack_all(chr: &[u8]) -> Vec<TileBitmap> {
    chr.chunks_exact(16)
        .map(|c| {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(c);
            pack_chr_planes(&raw)
        })
        .collect()
}

fn nametable_tile(tx: usize, ty: usize) -> u8 {
    debug_assert!(tx < NAMETABLE_COLUMNS && ty < NAMETABLE_ROWS);
    ((tx * 7 + ty * 13) & 0xFF) as u8
}

/// The frontmost opaque sprite covering (x, y) and its color.
fn sprite_at(
    sprites: &[SpriteSlot; SPRITE_COUNT],
    patterns: &[TileBitmap],
    x: usize,
    y: usize,
) -> Option<(SpriteFetch, u8)> {
    sprites.iter().enumerate().find_map(|(i, slot)| {
        let dx = x.checked_sub(slot.x as usize).filter(|d| *d < 8)?;
        let dy = y.checked_sub(slot.y as usize).filter(|d| *d < 8)?;
        let flags = TileFlags::from_bits_truncate(slot.attr);
        let px = if flags.contains(TileFlags::H_MIRROR) { 7 - dx } else { dx };
        let py = if flags.contains(TileFlags::V_MIRROR) { 7 - dy } else { dy };
        let chr_addr = SPRITE_TABLE + slot.tile as u32 * 16;
        let color = pixel_at(&patterns[(chr_addr / 16) as usize], px, py);
        if color == 0 {
            return None;
        }
        let tile = TileFetch {
            chr_addr,
            tile_index: chr_addr / 16,
            palette: SPRITE_PALETTES[i % SPRITE_PALETTES.len()],
            flags,
            fine_x: 0,
            row: py as u8,
        };
        Some((SpriteFetch { tile, x: slot.x, y: slot.y }, color))
    })
}

impl Console for SyntheticConsole {
    fn load_rom(&mut self, rom: &RomImage) -> Result<(), RomError> {
        self.chr = if rom.has_chr_ram() {
            builtin_chr()
        } else {
            let mut chr = rom.chr.clone();
            chr.resize(CHR_SIZE, 0);
            chr
        };
        self.patterns = pack_all(&self.chr);
        self.state = MachineState::power_on(rom.crc32);
        self.rom_loaded = true;
        self.audio.clear();
        info!(rom = %rom.name, chr_ram = rom.has_chr_ram(), "Console powered on");
        Ok(())
    }

    fn save_state(&self) -> Vec<u8> {
        // Serializing plain owned data into a Vec cannot fail
        bincode::serialize(&self.state).unwrap_or_default()
    }

    fn load_state(&mut self, state: &[u8]) -> Result<(), StateError> {
        if !self.rom_loaded {
            return Err(StateError::NoRom);
        }
        let loaded: MachineState =
            bincode::deserialize(state).map_err(|e| StateError::Corrupt(e.to_string()))?;
        if loaded.rom_crc32 != self.state.rom_crc32 {
            return Err(StateError::RomMismatch);
        }
        debug!(frame = loaded.frame_count, "State loaded");
        self.state = loaded;
        Ok(())
    }

    fn run_frame(&mut self, input: &mut dyn InputPort, observer: &mut dyn PpuObserver) {
        self.state.frame_count = self.state.frame_count.wrapping_add(1);
        self.step_inputs(input);
        self.render(observer);
        self.mix_audio();
    }

    fn raw_frame(&self) -> &RawFrame {
        &self.state.frame
    }

    fn audio_samples(&self) -> &[i16] {
        &self.audio
    }

    fn frame_count(&self) -> u32 {
        self.state.frame_count
    }

    fn rom_crc32(&self) -> u32 {
        if self.rom_loaded { self.state.rom_crc32 } else { 0 }
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }
}
