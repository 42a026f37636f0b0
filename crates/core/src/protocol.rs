//! Binary automation protocol.
//!
//! A controlling process writes commands to the emulator's stdin and reads
//! replies from its stdout. Every integer is little-endian. The emulator
//! writes a single ready byte (0) whenever it can accept a command.
//!
//! ## Commands
//!
//! ```text
//! Step          0x00  info:u8 players:u8 bytes_per_player:u8 moves:u16
//!                     then moves × players input bytes (move-major)
//! GetState      0x01
//! LoadState     0x02  info:u8 len:u32 state[len]
//! GetTilesSoFar 0x03
//! GetSpriteTilesSoFar 0x04
//! ```
//!
//! ## Replies
//!
//! ```text
//! Step        per move:  [FB] [TILES_BY_PIXEL] [LIVE_SPRITES]   (as selected by info)
//!             then:      [NEW_TILES] [NEW_SPRITE_TILES]
//! GetState    len:u32 state[len]
//! LoadState   [FB]
//! Get*SoFar   tile sequence
//!
//! framebuffer     256×240 ARGB u32 (245,760 bytes)
//! pixel runs      count:u32, per run: len:u32 hash:u32 x_scroll:u8 y_scroll:u8
//! sprite list     count:u32, per sprite: hash:u32 flags:u8 x:u8 y:u8
//!                 flags bit 2 = H-mirror, bit 1 = V-mirror, bit 0 = behind background
//! tile sequence   count:u32, per tile: hash:u32 index:u32 palette:u32 pixels:64×u32 ARGB
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::arbiter::ControlState;
use crate::error::ProtocolError;
use crate::tiles::{PixelObservation, SpriteObservation, TileEntry};
use crate::MAX_PORTS;

/// Byte written when the server is ready for the next command.
pub const READY: u8 = 0;

/// Fixed size of one encoded tile in a tile sequence.
pub const TILE_RECORD_BYTES: usize = 4 + 4 + 4 + 64 * 4;

bitflags::bitflags! {
    /// Which observations a command should emit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InfoMask: u8 {
        const FB = 1 << 0;
        const NEW_TILES = 1 << 1;
        const NEW_SPRITE_TILES = 1 << 2;
        const TILES_BY_PIXEL = 1 << 3;
        const LIVE_SPRITES = 1 << 4;
    }
}

mod opcode {
    pub const STEP: u8 = 0;
    pub const GET_STATE: u8 = 1;
    pub const LOAD_STATE: u8 = 2;
    pub const GET_TILES_SO_FAR: u8 = 3;
    pub const GET_SPRITE_TILES_SO_FAR: u8 = 4;
}

/// A validated Step request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRequest {
    pub info: InfoMask,
    pub players: u8,
    /// `move_count × players` bytes, move-major
    pub inputs: Vec<u8>,
}

impl StepRequest {
    pub fn move_count(&self) -> usize {
        self.inputs.len() / self.players as usize
    }

    /// Input for `player` on move `index`.
    pub fn input(&self, index: usize, player: u8) -> ControlState {
        ControlState::from_byte(self.inputs[index * self.players as usize + player as usize])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Step(StepRequest),
    GetState,
    LoadState { info: InfoMask, state: Vec<u8> },
    GetTilesSoFar,
    GetSpriteTilesSoFar,
}

impl Command {
    /// Read one command. Returns `Ok(None)` on a clean end of stream.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Command>, ProtocolError> {
        let mut op = [0u8; 1];
        loop {
            match r.read(&mut op) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let cmd = match op[0] {
            opcode::STEP => {
                let info = InfoMask::from_bits_truncate(r.read_u8()?);
                let players = r.read_u8()?;
                let bytes_per_player = r.read_u8()?;
                let moves = r.read_u16::<LittleEndian>()?;
                if players == 0 {
                    return Err(ProtocolError::NoPlayers);
                }
                if players as usize > MAX_PORTS {
                    return Err(ProtocolError::TooManyPlayers(players));
                }
                if bytes_per_player != 1 {
                    return Err(ProtocolError::UnsupportedBytesPerPlayer(bytes_per_player));
                }
                if moves == 0 {
                    return Err(ProtocolError::ZeroMoves);
                }
                let mut inputs = vec![0u8; moves as usize * players as usize];
                r.read_exact(&mut inputs)?;
                Command::Step(StepRequest { info, players, inputs })
            }
            opcode::GET_STATE => Command::GetState,
            opcode::LOAD_STATE => {
                let info = InfoMask::from_bits_truncate(r.read_u8()?);
                let len = r.read_u32::<LittleEndian>()? as usize;
                if len == 0 {
                    return Err(ProtocolError::EmptyState);
                }
                let mut state = vec![0u8; len];
                r.read_exact(&mut state)?;
                Command::LoadState { info, state }
            }
            opcode::GET_TILES_SO_FAR => Command::GetTilesSoFar,
            opcode::GET_SPRITE_TILES_SO_FAR => Command::GetSpriteTilesSoFar,
            other => return Err(ProtocolError::UnknownCommand(other)),
        };
        Ok(Some(cmd))
    }

    /// Encode the command as a client would send it.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Command::Step(req) => {
                w.write_u8(opcode::STEP)?;
                w.write_u8(req.info.bits())?;
                w.write_u8(req.players)?;
                w.write_u8(1)?;
                w.write_u16::<LittleEndian>(req.move_count() as u16)?;
                w.write_all(&req.inputs)
            }
            Command::GetState => w.write_u8(opcode::GET_STATE),
            Command::LoadState { info, state } => {
                w.write_u8(opcode::LOAD_STATE)?;
                w.write_u8(info.bits())?;
                w.write_u32::<LittleEndian>(state.len() as u32)?;
                w.write_all(state)
            }
            Command::GetTilesSoFar => w.write_u8(opcode::GET_TILES_SO_FAR),
            Command::GetSpriteTilesSoFar => w.write_u8(opcode::GET_SPRITE_TILES_SO_FAR),
        }
    }
}

// ─── Reply encoders ─────────────────────────────────────────────────────────

pub fn write_framebuffer<W: Write>(w: &mut W, argb: &[u32]) -> io::Result<()> {
    let mut buf = Vec::with_capacity(argb.len() * 4);
    for &px in argb {
        buf.write_u32::<LittleEndian>(px)?;
    }
    w.write_all(&buf)
}

/// Run-length encode per-pixel background provenance, row-major.
pub fn write_pixel_runs<W: Write>(w: &mut W, pixels: &[PixelObservation]) -> io::Result<()> {
    let mut runs: Vec<(u32, u32, u8, u8)> = Vec::new();
    for p in pixels {
        let cell = (p.hash32(), p.x_scroll, p.y_scroll);
        match runs.last_mut() {
            Some(run) if (run.1, run.2, run.3) == cell => run.0 += 1,
            _ => runs.push((1, cell.0, cell.1, cell.2)),
        }
    }

    let mut buf = Vec::with_capacity(4 + runs.len() * 10);
    buf.write_u32::<LittleEndian>(runs.len() as u32)?;
    for (len, hash, xs, ys) in runs {
        buf.write_u32::<LittleEndian>(len)?;
        buf.write_u32::<LittleEndian>(hash)?;
        buf.write_u8(xs)?;
        buf.write_u8(ys)?;
    }
    w.write_all(&buf)
}

pub fn write_sprites<W: Write>(w: &mut W, sprites: &[SpriteObservation]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(sprites.len() as u32)?;
    for s in sprites {
        w.write_u32::<LittleEndian>(s.key.hash32())?;
        w.write_u8(s.flags.bits())?;
        w.write_u8(s.x)?;
        w.write_u8(s.y)?;
    }
    Ok(())
}

pub fn write_tiles<'a, W, I>(w: &mut W, tiles: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a TileEntry>,
{
    let tiles: Vec<&TileEntry> = tiles.into_iter().collect();
    let mut buf = Vec::with_capacity(4 + tiles.len() * TILE_RECORD_BYTES);
    buf.write_u32::<LittleEndian>(tiles.len() as u32)?;
    for t in tiles {
        buf.write_u32::<LittleEndian>(t.key.hash32())?;
        buf.write_u32::<LittleEndian>(t.tile_index)?;
        buf.write_u32::<LittleEndian>(t.key.packed_palette())?;
        for px in t.key.argb_pixels() {
            buf.write_u32::<LittleEndian>(px)?;
        }
    }
    w.write_all(&buf)
}

pub fn write_state<W: Write>(w: &mut W, state: &[u8]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(state.len() as u32)?;
    w.write_all(state)
}

// ─── Reply decoders ─────────────────────────────────────────────────────────

/// One decoded run of the pixel stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRun {
    pub len: u32,
    pub hash: u32,
    pub x_scroll: u8,
    pub y_scroll: u8,
}

/// One decoded entry of a sprite list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpriteRecord {
    pub hash: u32,
    pub flags: u8,
    pub x: u8,
    pub y: u8,
}

/// One decoded entry of a tile sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRecord {
    pub hash: u32,
    pub index: u32,
    pub palette: u32,
    pub pixels: Vec<u32>,
}

pub fn read_framebuffer<R: Read>(r: &mut R) -> io::Result<Vec<u32>> {
    let mut out = vec![0u32; crate::PIXEL_COUNT];
    r.read_u32_into::<LittleEndian>(&mut out)?;
    Ok(out)
}

pub fn read_pixel_runs<R: Read>(r: &mut R) -> io::Result<Vec<PixelRun>> {
    let n = r.read_u32::<LittleEndian>()?;
    (0..n)
        .map(|_| {
            Ok(PixelRun {
                len: r.read_u32::<LittleEndian>()?,
                hash: r.read_u32::<LittleEndian>()?,
                x_scroll: r.read_u8()?,
                y_scroll: r.read_u8()?,
            })
        })
        .collect()
}

pub fn read_sprites<R: Read>(r: &mut R) -> io::Result<Vec<SpriteRecord>> {
    let n = r.read_u32::<LittleEndian>()?;
    (0..n)
        .map(|_| {
            Ok(SpriteRecord {
                hash: r.read_u32::<LittleEndian>()?,
                flags: r.read_u8()?,
                x: r.read_u8()?,
                y: r.read_u8()?,
            })
        })
        .collect()
}

pub fn read_tiles<R: Read>(r: &mut R) -> io::Result<Vec<TileRecord>> {
    let n = r.read_u32::<LittleEndian>()?;
    (0..n)
        .map(|_| {
            let hash = r.read_u32::<LittleEndian>()?;
            let index = r.read_u32::<LittleEndian>()?;
            let palette = r.read_u32::<LittleEndian>()?;
            let mut pixels = vec![0u32; 64];
            r.read_u32_into::<LittleEndian>(&mut pixels)?;
            Ok(TileRecord { hash, index, palette, pixels })
        })
        .collect()
}

pub fn read_state<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut state = vec![0u8; len];
    r.read_exact(&mut state)?;
    Ok(state)
}
