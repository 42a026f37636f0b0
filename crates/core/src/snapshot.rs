//! Rewind history blocks.
//!
//! A [`RewindData`] block holds a compressed console snapshot taken when the
//! block was opened, the number of frames emulated since then, and the input
//! each port saw during those frames. Replaying a block means loading its
//! snapshot and feeding the logged input back in order.

use std::collections::VecDeque;

use tracing::warn;

use crate::arbiter::ControlState;
use crate::console::Console;
use crate::error::StateError;
use crate::MAX_PORTS;

/// One history block.
#[derive(Clone, PartialEq, Eq)]
pub struct RewindData {
    /// Deflate-compressed console state
    snapshot: Vec<u8>,
    /// Frames recorded since the snapshot. Counts down while rewinding and can
    /// go negative during bookkeeping.
    pub frame_count: i32,
    /// Chronological input per port
    pub input_logs: [VecDeque<u8>; MAX_PORTS],
}

impl RewindData {
    /// Open a block at the console's current state.
    pub fn capture(console: &dyn Console) -> Self {
        let raw = console.save_state();
        RewindData {
            snapshot: miniz_oxide::deflate::compress_to_vec(&raw, 1),
            frame_count: 0,
            input_logs: Default::default(),
        }
    }

    /// Restore the console to the start of this block.
    pub fn load_state(&self, console: &mut dyn Console) -> Result<(), StateError> {
        let raw = miniz_oxide::inflate::decompress_to_vec(&self.snapshot)
            .map_err(|e| StateError::Corrupt(format!("{:?}", e)))?;
        console.load_state(&raw)
    }

    /// Like [`RewindData::load_state`], logging instead of failing.
    pub(crate) fn restore(&self, console: &mut dyn Console) {
        if let Err(e) = self.load_state(console) {
            warn!(error = %e, "Cannot restore history block");
        }
    }

    pub fn record_input(&mut self, port: u8, state: ControlState) {
        if let Some(log) = self.input_logs.get_mut(port as usize) {
            log.push_back(state.to_byte());
        }
    }

    /// Pop the oldest logged input for `port`.
    pub fn next_input(&mut self, port: u8) -> Option<ControlState> {
        self.input_logs.get_mut(port as usize)?.pop_front().map(ControlState::from_byte)
    }

    /// Forget the frames recorded in this block, keeping its snapshot.
    pub fn truncate(&mut self) {
        self.frame_count = 0;
        for log in &mut self.input_logs {
            log.clear();
        }
    }

    /// Compressed snapshot size in bytes.
    pub fn snapshot_len(&self) -> usize {
        self.snapshot.len()
    }
}

impl std::fmt::Debug for RewindData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewindData")
            .field("frame_count", &self.frame_count)
            .field("snapshot_len", &self.snapshot.len())
            .field("inputs", &self.input_logs.iter().map(|l| l.len()).collect::<Vec<_>>())
            .finish()
    }
}
