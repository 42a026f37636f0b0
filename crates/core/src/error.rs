//! Error types shared across the crate.
//!
//! Each concern gets its own enum so callers can tell a fatal protocol
//! violation apart from a recoverable ROM or state-file failure.

use std::io;

/// Framing violations on the automation pipe. Always fatal for the session.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown command byte {0:#04x}")]
    UnknownCommand(u8),

    #[error("player count {0} exceeds the {max} controller ports", max = crate::MAX_PORTS)]
    TooManyPlayers(u8),

    #[error("player count must be at least 1")]
    NoPlayers,

    #[error("bytes per player must be 1, got {0}")]
    UnsupportedBytesPerPlayer(u8),

    #[error("step command with zero moves")]
    ZeroMoves,

    #[error("load-state command with an empty payload")]
    EmptyState,

    #[error("stream ended in the middle of a command")]
    Truncated,

    #[error("console rejected state: {0}")]
    State(#[from] StateError),

    #[error("I/O error on protocol stream: {0}")]
    Io(io::Error),
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated
        } else {
            ProtocolError::Io(e)
        }
    }
}

/// A console snapshot blob that could not be restored.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state blob is corrupt: {0}")]
    Corrupt(String),

    #[error("state was produced for a different ROM")]
    RomMismatch,

    #[error("no ROM loaded")]
    NoRom,
}

/// ROM container identification failures. Reported to the caller, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum RomError {
    #[error("file too small ({0} bytes)")]
    TooSmall(usize),

    #[error("unrecognized ROM container")]
    UnknownFormat,

    #[error("truncated {0} image")]
    Truncated(&'static str),

    #[error("{0} images are not supported by this console")]
    Unsupported(&'static str),

    #[error("read error: {0}")]
    Io(#[from] io::Error),
}

/// On-disk state container errors.
#[derive(Debug, thiserror::Error)]
pub enum StateFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("file too small")]
    TooSmall,

    #[error("invalid state file (bad magic)")]
    BadMagic,

    #[error("unsupported state file version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("state file belongs to ROM {found:08X}, loaded ROM is {expected:08X}")]
    RomMismatch { found: u32, expected: u32 },

    #[error("decompress error: {0}")]
    Decompress(String),

    #[error("serialization error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("console rejected state: {0}")]
    Console(#[from] StateError),
}

/// Movie file errors.
#[derive(Debug, thiserror::Error)]
pub enum MovieError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid movie file")]
    BadHeader,

    #[error("decompress error: {0}")]
    Decompress(String),

    #[error("serialization error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Settings file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
