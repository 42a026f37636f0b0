//! # remocon-core
//!
//! State-management and observation layer for a remote-controlled NES
//! emulator. An external controller (usually an automated agent talking over a
//! pipe) steps the console frame by frame, rewinds emulated time, and collects
//! a deduplicated catalog of the tiles and sprites drawn on screen.
//!
//! ## Architecture
//!
//! - [`tiles`]: Tile/sprite instrumentation: canonical [`tiles::TileKey`]s,
//!   content-addressed tile sets, per-frame sprite and pixel provenance
//! - [`arbiter`]: Per-port input arbitration between rewind, movie, netplay,
//!   test harness, debugger, programmatic override and live input
//! - [`video`]: Frame decode pipeline (synchronous or one background thread)
//!   on top of the [`filters`] chain
//! - [`history`]: Rewind/time-travel engine built from [`snapshot`] blocks
//! - [`session`]: Context object owning all of the above plus the console
//! - [`server`] / [`protocol`]: Binary automation protocol over a byte stream
//!
//! The CPU/PPU core itself is abstracted behind [`console::Console`];
//! [`synthetic::SyntheticConsole`] is a small deterministic implementation
//! used by the tests and the `remocon` binary.
//!
//! ## Per-frame data flow
//!
//! ```text
//! ControlArbiter ──input──▶ Console ──raw frame + provenance──▶ TileCatalog
//!                                    │
//!                                    └──raw frame──▶ FramePipeline ──▶ StateHistory ──▶ renderer
//! ```

pub mod error;
pub mod settings;
pub mod palette;
pub mod console;
pub mod rom;
pub mod tiles;
pub mod arbiter;
pub mod movie;
pub mod png;
pub mod filters;
pub mod video;
pub mod snapshot;
pub mod history;
pub mod savestate;
pub mod synthetic;
pub mod session;
pub mod protocol;
pub mod server;

pub use arbiter::{ControlArbiter, ControlState};
pub use console::{Console, RawFrame};
pub use error::{ProtocolError, RomError, StateError};
pub use history::{RewindState, StateHistory};
pub use session::Session;
pub use settings::EmulationSettings;
pub use tiles::{TileCatalog, TileKey};
pub use video::FramePipeline;

/// Visible picture width in pixels
pub const SCREEN_WIDTH: usize = 256;
/// Visible picture height in pixels
pub const SCREEN_HEIGHT: usize = 240;
/// Pixels per frame
pub const PIXEL_COUNT: usize = SCREEN_WIDTH * SCREEN_HEIGHT;
/// Bytes in one ARGB framebuffer as sent over the protocol (245,760)
pub const FRAMEBUFFER_BYTES: usize = PIXEL_COUNT * 4;
/// Number of controller ports
pub const MAX_PORTS: usize = 4;
/// Nominal frame rate used for rewind arithmetic
pub const FRAMES_PER_SECOND: u32 = 60;
