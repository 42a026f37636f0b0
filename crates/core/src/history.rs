//! Rewind / time-travel engine.
//!
//! While stopped, every emulated frame is counted into the active
//! [`RewindData`] block together with the input each port saw; a new block
//! (with a fresh snapshot) is opened every `block_frames` frames and the
//! oldest blocks are evicted beyond `max_blocks`.
//!
//! Rewinding replays blocks newest to oldest at maximum speed, buffers the
//! video and audio they produce, and plays the buffers back in reverse.
//!
//! ## States
//!
//! ```text
//!            start(false)                  enough frames buffered
//! Stopped ───────────────▶ Starting ──────────────────────────▶ Started
//!    ▲  │                      │                                   │
//!    │  │ start(true)          └───────────── stop ────────────────┤
//!    │  ▼                                                          ▼
//!    │ Debugging ──── block exhausted: stop ───────────────────▶ Stopping
//!    │                                                             │
//!    └──────────────── fast-forward distance reaches 0 ────────────┘
//! ```
//!
//! ## Per-frame call order
//!
//! ```text
//! console.run_frame      (input: get_input while rewinding, record_input otherwise)
//! process_frame          (decoded video)
//! process_audio
//! on_frame_done
//! process_end_of_frame
//! ```

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::arbiter::{ControlState, HistoryInput};
use crate::console::Console;
use crate::settings::EmulationSettings;
use crate::snapshot::RewindData;
use crate::video::{DecodedFrame, FrameSink};
use crate::FRAMES_PER_SECOND;

/// Final video output.
pub trait VideoRenderer {
    fn update_frame(&mut self, pixels: &[u32], width: u32, height: u32);
}

/// Final audio output. Samples are interleaved stereo.
pub trait SoundMixer {
    fn play_audio(&mut self, samples: &[i16]);
    fn stop_audio(&mut self, clear_buffer: bool);
}

/// Renderer that discards everything.
pub struct NullRenderer;

impl VideoRenderer for NullRenderer {
    fn update_frame(&mut self, _pixels: &[u32], _width: u32, _height: u32) {}
}

/// Mixer that discards everything.
pub struct NullMixer;

impl SoundMixer for NullMixer {
    fn play_audio(&mut self, _samples: &[i16]) {}
    fn stop_audio(&mut self, _clear_buffer: bool) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindState {
    Stopped,
    Starting,
    Started,
    Stopping,
    /// Single-step-back for the debugger
    Debugging,
}

/// Block geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Frames per block
    pub block_frames: u32,
    /// Blocks kept in the history queue (0 disables rewinding)
    pub max_blocks: usize,
}

impl HistoryConfig {
    pub fn from_settings(s: &EmulationSettings) -> Self {
        HistoryConfig { block_frames: s.rewind_block_frames, max_blocks: s.max_history_blocks() }
    }

    pub fn enabled(&self) -> bool {
        self.max_blocks > 0 && self.block_frames > 0
    }
}

/// The rewind engine. Lives on the emulation thread.
pub struct StateHistory {
    config: HistoryConfig,
    state: RewindState,
    history: VecDeque<RewindData>,
    /// Blocks consumed by the current rewind, most recently consumed first
    backup: VecDeque<RewindData>,
    current: RewindData,
    frames_to_fast_forward: i32,
    force_max_speed: bool,

    video_builder: Vec<DecodedFrame>,
    video_history: VecDeque<DecodedFrame>,
    audio_builder: Vec<i16>,
    audio_history: VecDeque<i16>,
}

impl StateHistory {
    /// Create the engine with its first block opened at the console's state.
    pub fn new(config: HistoryConfig, console: &dyn Console) -> Self {
        StateHistory {
            config,
            state: RewindState::Stopped,
            history: VecDeque::new(),
            backup: VecDeque::new(),
            current: RewindData::capture(console),
            frames_to_fast_forward: 0,
            force_max_speed: false,
            video_builder: Vec::new(),
            video_history: VecDeque::new(),
            audio_builder: Vec::new(),
            audio_history: VecDeque::new(),
        }
    }

    pub fn config(&self) -> HistoryConfig {
        self.config
    }

    pub fn set_config(&mut self, config: HistoryConfig) {
        self.config = config;
    }

    fn block_frames(&self) -> i32 {
        self.config.block_frames as i32
    }

    fn set_state(&mut self, state: RewindState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Rewind state");
            self.state = state;
        }
    }

    fn clear_media(&mut self) {
        self.video_builder.clear();
        self.video_history.clear();
        self.audio_builder.clear();
        self.audio_history.clear();
    }

    /// Drop all history and open a fresh block at the console's state.
    pub fn clear_buffer(&mut self, console: &dyn Console) {
        self.history.clear();
        self.backup.clear();
        self.frames_to_fast_forward = 0;
        self.force_max_speed = false;
        self.clear_media();
        self.set_state(RewindState::Stopped);
        self.current = RewindData::capture(console);
    }

    fn add_history_block(&mut self, console: &dyn Console) {
        let fresh = RewindData::capture(console);
        let done = std::mem::replace(&mut self.current, fresh);
        if done.frame_count > 0 {
            self.history.push_back(done);
        }
        while self.history.len() > self.config.max_blocks {
            self.history.pop_front();
            trace!("Evicted oldest history block");
        }
        trace!(blocks = self.history.len(), "History block added");
    }

    /// Make the next older block current and load it.
    fn pop_history(&mut self, console: &mut dyn Console) {
        if self.history.is_empty() && self.current.frame_count <= 0 {
            self.stop(console);
            return;
        }
        if self.current.frame_count <= 0 {
            if let Some(block) = self.history.pop_back() {
                self.current = block;
            }
        }
        self.backup.push_front(self.current.clone());
        self.current.restore(console);
        for s in self.audio_builder.drain(..).rev() {
            self.audio_history.push_front(s);
        }
        trace!(frames = self.current.frame_count, remaining = self.history.len(), "Rewinding block");
    }

    /// Begin rewinding. Ignored unless stopped and enabled.
    pub fn start(&mut self, for_debugger: bool, console: &mut dyn Console, mixer: &mut dyn SoundMixer) {
        if self.state != RewindState::Stopped || !self.config.enabled() {
            return;
        }
        console.pause();
        self.set_state(if for_debugger { RewindState::Debugging } else { RewindState::Starting });
        self.clear_media();
        self.backup.clear();

        self.pop_history(console);
        mixer.stop_audio(true);
        if self.state != RewindState::Stopped {
            self.force_max_speed = true;
        }
        console.resume();
    }

    /// Stop rewinding, fast-forwarding back to the frame on screen.
    pub fn stop(&mut self, console: &mut dyn Console) {
        if self.state == RewindState::Stopped || self.state == RewindState::Stopping {
            return;
        }
        console.pause();
        if self.backup.is_empty() {
            self.finish_stop();
            console.resume();
            return;
        }

        let mut ff: i32;
        if self.state == RewindState::Started {
            // Distance from the start of the oldest consumed block to the
            // frame on screen
            ff = self.video_history.len() as i32 + self.backup[0].frame_count;
            if self.backup.len() == 1 {
                ff = ff.min(self.backup[0].frame_count);
            }
            while self.backup.len() > 1 && ff >= self.backup[0].frame_count {
                if let Some(block) = self.backup.pop_front() {
                    ff -= block.frame_count;
                    self.history.push_back(block);
                }
            }
        } else {
            // Nothing shown yet: go back to where the rewind began
            while self.backup.len() > 1 {
                if let Some(block) = self.backup.pop_front() {
                    self.history.push_back(block);
                }
            }
            ff = self.backup[0].frame_count;
        }
        self.current = self.backup[0].clone();
        self.current.restore(console);

        self.frames_to_fast_forward = ff.max(0);
        if self.frames_to_fast_forward > 0 {
            self.set_state(RewindState::Stopping);
            self.current.frame_count = 0;
            self.force_max_speed = true;
            debug!(frames = self.frames_to_fast_forward, "Resynchronizing");
        } else {
            // Landed exactly on a block start
            self.current.truncate();
            self.finish_stop();
        }
        self.clear_media();
        console.resume();
    }

    fn finish_stop(&mut self) {
        self.backup.clear();
        self.frames_to_fast_forward = 0;
        self.force_max_speed = false;
        self.set_state(RewindState::Stopped);
    }

    /// Cancel a rewind immediately without resynchronizing.
    pub fn force_stop(&mut self) {
        if self.state == RewindState::Stopped {
            return;
        }
        while self.backup.len() > 1 {
            if let Some(block) = self.backup.pop_front() {
                self.history.push_back(block);
            }
        }
        if let Some(block) = self.backup.pop_front() {
            self.current = block;
        }
        self.finish_stop();
    }

    /// Frame-completed notification. Call after the frame's video and audio
    /// have been processed.
    pub fn on_frame_done(&mut self) {
        if !self.config.enabled() {
            return;
        }
        match self.state {
            RewindState::Starting | RewindState::Started | RewindState::Debugging => {
                self.current.frame_count -= 1;
            }
            RewindState::Stopping => {
                self.frames_to_fast_forward -= 1;
                self.current.frame_count += 1;
                if self.frames_to_fast_forward <= 0 {
                    self.complete_resync();
                }
            }
            RewindState::Stopped => {
                self.current.frame_count += 1;
            }
        }
    }

    /// Keep only the input the resync actually consumed.
    fn complete_resync(&mut self) {
        if let Some(original) = self.backup.front() {
            for (log, full) in self.current.input_logs.iter_mut().zip(&original.input_logs) {
                let consumed = full.len().saturating_sub(log.len());
                *log = full.iter().take(consumed).copied().collect();
            }
        }
        debug!(frames = self.current.frame_count, "Resync complete");
        self.finish_stop();
    }

    /// End-of-frame bookkeeping: pop the next block while rewinding, rotate
    /// blocks while recording.
    pub fn process_end_of_frame(&mut self, console: &mut dyn Console) {
        match self.state {
            RewindState::Starting | RewindState::Started | RewindState::Debugging => {
                if self.current.frame_count <= 0 {
                    if self.state == RewindState::Debugging {
                        self.stop(console);
                    } else {
                        self.pop_history(console);
                    }
                }
            }
            RewindState::Stopped => {
                if self.config.enabled() && self.current.frame_count >= self.block_frames() {
                    self.add_history_block(console);
                }
            }
            RewindState::Stopping => {}
        }
    }

    /// Route one decoded frame: buffer it while rewinding, show the buffered
    /// frames backwards once enough are ready, suppress output while
    /// resynchronizing, pass through otherwise.
    pub fn process_frame(&mut self, frame: DecodedFrame, renderer: &mut dyn VideoRenderer) {
        match self.state {
            RewindState::Starting | RewindState::Started => {
                self.video_builder.push(frame);
                let target = self.backup.front().map_or(0, |b| b.frame_count.max(0) as usize);
                if self.video_builder.len() == target {
                    for f in self.video_builder.drain(..).rev() {
                        self.video_history.push_front(f);
                    }
                }

                if self.state == RewindState::Started || self.video_history.len() >= self.config.block_frames as usize {
                    if self.state != RewindState::Started {
                        self.set_state(RewindState::Started);
                    }
                    self.force_max_speed = false;
                    if let Some(f) = self.video_history.pop_back() {
                        renderer.update_frame(&f.pixels, f.info.width, f.info.height);
                    }
                }
            }
            RewindState::Stopping | RewindState::Debugging => {}
            RewindState::Stopped => {
                renderer.update_frame(&frame.pixels, frame.info.width, frame.info.height);
            }
        }
    }

    /// Route one frame of interleaved audio. Returns true if anything was
    /// sent to the mixer.
    pub fn process_audio(&mut self, samples: &[i16], mixer: &mut dyn SoundMixer) -> bool {
        match self.state {
            RewindState::Starting | RewindState::Started => {
                self.audio_builder.extend_from_slice(samples);
                let n = samples.len();
                if self.state == RewindState::Started && self.audio_history.len() > n {
                    let out: Vec<i16> = (0..n).filter_map(|_| self.audio_history.pop_back()).collect();
                    mixer.play_audio(&out);
                    true
                } else {
                    false
                }
            }
            RewindState::Stopping | RewindState::Debugging => false,
            RewindState::Stopped => {
                mixer.play_audio(samples);
                true
            }
        }
    }

    /// Jump back `seconds` worth of whole blocks. Only while stopped.
    pub fn rewind_seconds(&mut self, seconds: u32, console: &mut dyn Console) {
        if self.state != RewindState::Stopped || !self.config.enabled() {
            return;
        }
        let remove = (seconds.saturating_mul(FRAMES_PER_SECOND) / self.config.block_frames).saturating_add(1);
        console.pause();
        let mut popped = 0;
        for _ in 0..remove {
            match self.history.pop_back() {
                Some(block) => {
                    self.current = block;
                    popped += 1;
                }
                None => break,
            }
        }
        self.current.restore(console);
        self.current.truncate();
        debug!(seconds, blocks = popped, "Rewound");
        console.resume();
    }

    pub fn state(&self) -> RewindState {
        self.state
    }

    pub fn is_rewinding(&self) -> bool {
        self.state != RewindState::Stopped
    }

    pub fn is_step_back(&self) -> bool {
        self.state == RewindState::Debugging
    }

    pub fn force_max_speed(&self) -> bool {
        self.force_max_speed
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn backup_len(&self) -> usize {
        self.backup.len()
    }

    pub fn frames_to_fast_forward(&self) -> i32 {
        self.frames_to_fast_forward
    }

    /// The block currently being recorded or replayed.
    pub fn current(&self) -> &RewindData {
        &self.current
    }

    pub fn record_input(&mut self, port: u8, state: ControlState) {
        if self.config.enabled() && self.state == RewindState::Stopped {
            self.current.record_input(port, state);
        }
    }

    /// Next replayed input for `port`; released buttons once the log is empty.
    pub fn get_input(&mut self, port: u8) -> ControlState {
        self.current.next_input(port).unwrap_or_else(|| {
            trace!(port, "Input log exhausted");
            ControlState::empty()
        })
    }
}

impl HistoryInput for StateHistory {
    fn is_rewinding(&self) -> bool {
        StateHistory::is_rewinding(self)
    }

    fn get_input(&mut self, port: u8) -> ControlState {
        StateHistory::get_input(self, port)
    }

    fn record_input(&mut self, port: u8, state: ControlState) {
        StateHistory::record_input(self, port, state)
    }
}

/// Frame sink that hands decoded frames to the history, which decides what
/// the renderer shows.
pub struct HistorySink<'a> {
    pub history: &'a mut StateHistory,
    pub renderer: &'a mut dyn VideoRenderer,
}

impl FrameSink for HistorySink<'_> {
    fn send_frame(&mut self, frame: DecodedFrame) {
        self.history.process_frame(frame, self.renderer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{InputPort, NoopObserver};
    use crate::filters::FrameInfo;
    use crate::rom::{build_ines, RomImage};
    use crate::settings::Overscan;
    use crate::synthetic::SyntheticConsole;

    #[derive(Default)]
    struct Screen {
        shown: Vec<u32>,
    }

    impl VideoRenderer for Screen {
        fn update_frame(&mut self, pixels: &[u32], _w: u32, _h: u32) {
            self.shown.push(pixels[0]);
        }
    }

    #[derive(Default)]
    struct Speaker {
        played: Vec<Vec<i16>>,
        stops: usize,
    }

    impl SoundMixer for Speaker {
        fn play_audio(&mut self, samples: &[i16]) {
            self.played.push(samples.to_vec());
        }
        fn stop_audio(&mut self, _clear: bool) {
            self.stops += 1;
        }
    }

    struct Driver<'a> {
        history: &'a mut StateHistory,
        script: &'a [u8],
    }

    impl InputPort for Driver<'_> {
        fn read_port(&mut self, port: u8) -> ControlState {
            if port != 0 {
                return ControlState::empty();
            }
            if self.history.is_rewinding() {
                return self.history.get_input(0);
            }
            let frame = self.history.current().frame_count as usize;
            let s = ControlState::from_byte(self.script[frame % self.script.len()]);
            self.history.record_input(0, s);
            s
        }
    }

    fn console() -> SyntheticConsole {
        let mut c = SyntheticConsole::new();
        let rom = RomImage::parse("t", build_ines(1, &[0x3C; 8192])).unwrap();
        c.load_rom(&rom).unwrap();
        c
    }

    fn config() -> HistoryConfig {
        HistoryConfig { block_frames: 10, max_blocks: 8 }
    }

    /// A decoded frame tagged with the console frame it came from.
    fn tagged(n: u32) -> DecodedFrame {
        DecodedFrame {
            pixels: vec![n],
            info: FrameInfo { width: 1, height: 1, original_width: 1, original_height: 1, bytes_per_pixel: 4 },
            overscan: Overscan::default(),
            frame_number: n,
            resolution_changed: false,
        }
    }

    fn step(h: &mut StateHistory, c: &mut SyntheticConsole, screen: &mut Screen, speaker: &mut Speaker, script: &[u8]) {
        c.run_frame(&mut Driver { history: h, script }, &mut NoopObserver);
        h.process_frame(tagged(c.frame_count()), screen);
        h.process_audio(&[1, 2], speaker);
        h.on_frame_done();
        h.process_end_of_frame(c);
    }

    #[test]
    fn test_blocks_rotate_and_evict() {
        let mut c = console();
        let mut h = StateHistory::new(config(), &c);
        let (mut scr, mut spk) = (Screen::default(), Speaker::default());
        for _ in 0..95 {
            step(&mut h, &mut c, &mut scr, &mut spk, &[0]);
        }
        assert_eq!(h.history_len(), 8);
        assert_eq!(h.current().frame_count, 5);
        assert_eq!(scr.shown.len(), 95);
        assert_eq!(spk.played.len(), 95);
    }

    #[test]
    fn test_disabled_ignores_start() {
        let mut c = console();
        let mut h = StateHistory::new(HistoryConfig { block_frames: 30, max_blocks: 0 }, &c);
        h.start(false, &mut c, &mut NullMixer);
        assert_eq!(h.state(), RewindState::Stopped);
        h.record_input(0, ControlState::A);
        assert!(h.current().input_logs[0].is_empty());
    }

    #[test]
    fn test_start_with_empty_history_is_noop() {
        let mut c = console();
        let mut h = StateHistory::new(config(), &c);
        h.start(false, &mut c, &mut NullMixer);
        assert_eq!(h.state(), RewindState::Stopped);
        assert!(!h.force_max_speed());
    }

    #[test]
    fn test_start_then_immediate_stop_restores() {
        let mut c = console();
        let mut h = StateHistory::new(config(), &c);
        let (mut scr, mut spk) = (Screen::default(), Speaker::default());
        let script = [0x80, 0x80, 0x01, 0x00, 0x40];
        for _ in 0..27 {
            step(&mut h, &mut c, &mut scr, &mut spk, &script);
        }
        let state_before = c.save_state();
        let logs_before = h.current().input_logs.clone();
        let count_before = h.current().frame_count;

        h.start(false, &mut c, &mut spk);
        assert_eq!(h.state(), RewindState::Starting);
        assert!(h.force_max_speed());
        h.stop(&mut c);
        assert_eq!(h.state(), RewindState::Stopping);
        assert_eq!(h.frames_to_fast_forward(), 7);

        let shown = scr.shown.len();
        while h.state() != RewindState::Stopped {
            step(&mut h, &mut c, &mut scr, &mut spk, &script);
        }
        // Resync is silent
        assert_eq!(scr.shown.len(), shown);
        assert_eq!(c.save_state(), state_before);
        assert_eq!(h.current().input_logs, logs_before);
        assert_eq!(h.current().frame_count, count_before);
        assert!(!h.force_max_speed());
    }

    #[test]
    fn test_rewind_plays_frames_backwards() {
        let mut c = console();
        let mut h = StateHistory::new(config(), &c);
        let (mut scr, mut spk) = (Screen::default(), Speaker::default());
        for _ in 0..40 {
            step(&mut h, &mut c, &mut scr, &mut spk, &[0x01, 0x02]);
        }
        // Just rotated: current block is empty, last block covers frames 30..39
        assert_eq!(h.current().frame_count, 0);
        scr.shown.clear();

        h.start(false, &mut c, &mut spk);
        assert_eq!(spk.stops, 1);
        for _ in 0..15 {
            step(&mut h, &mut c, &mut scr, &mut spk, &[0]);
        }
        assert_eq!(h.state(), RewindState::Started);
        // First frame shown is the newest (frame 40), then backwards
        assert_eq!(&scr.shown[..6], &[40, 39, 38, 37, 36, 35]);
    }

    #[test]
    fn test_stop_after_rewinding_resyncs_inputs() {
        let mut c = console();
        let mut h = StateHistory::new(config(), &c);
        let (mut scr, mut spk) = (Screen::default(), Speaker::default());
        let script = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40];
        for _ in 0..60 {
            step(&mut h, &mut c, &mut scr, &mut spk, &script);
        }
        h.start(false, &mut c, &mut spk);
        for _ in 0..25 {
            step(&mut h, &mut c, &mut scr, &mut spk, &script);
        }
        assert_eq!(h.state(), RewindState::Started);
        h.stop(&mut c);
        let ff = h.frames_to_fast_forward();
        assert!(ff > 0 && ff <= 10);
        while h.state() != RewindState::Stopped {
            step(&mut h, &mut c, &mut scr, &mut spk, &script);
        }
        // Recording resumes aligned with the console
        let fc = h.current().frame_count as usize;
        assert_eq!(h.current().input_logs[0].len(), fc);
        assert!(h.frames_to_fast_forward() == 0);
    }

    #[test]
    fn test_debug_step_back() {
        let mut c = console();
        let mut h = StateHistory::new(config(), &c);
        let (mut scr, mut spk) = (Screen::default(), Speaker::default());
        for _ in 0..14 {
            step(&mut h, &mut c, &mut scr, &mut spk, &[0]);
        }
        h.start(true, &mut c, &mut spk);
        assert!(h.is_step_back());
        let shown = scr.shown.len();
        for _ in 0..4 {
            step(&mut h, &mut c, &mut scr, &mut spk, &[0]);
        }
        // Block exhausted: stop resynchronizes silently
        assert_eq!(h.state(), RewindState::Stopping);
        assert_eq!(scr.shown.len(), shown);
    }

    #[test]
    fn test_force_stop() {
        let mut c = console();
        let mut h = StateHistory::new(config(), &c);
        let (mut scr, mut spk) = (Screen::default(), Speaker::default());
        for _ in 0..35 {
            step(&mut h, &mut c, &mut scr, &mut spk, &[0]);
        }
        h.start(false, &mut c, &mut spk);
        for _ in 0..12 {
            step(&mut h, &mut c, &mut scr, &mut spk, &[0]);
        }
        h.force_stop();
        assert_eq!(h.state(), RewindState::Stopped);
        assert_eq!(h.backup_len(), 0);
        assert!(!h.force_max_speed());
    }

    #[test]
    fn test_rewind_seconds() {
        let mut c = console();
        let mut h = StateHistory::new(HistoryConfig { block_frames: 30, max_blocks: 100 }, &c);
        let (mut scr, mut spk) = (Screen::default(), Speaker::default());
        for _ in 0..300 {
            step(&mut h, &mut c, &mut scr, &mut spk, &[0]);
        }
        assert_eq!(h.history_len(), 10);
        // 1 s = 2 blocks, plus one
        h.rewind_seconds(1, &mut c);
        assert_eq!(h.history_len(), 7);
        assert_eq!(c.frame_count(), 210);
        assert_eq!(h.current().frame_count, 0);

        // Asking for more than exists stops at the oldest block
        h.rewind_seconds(100, &mut c);
        assert_eq!(h.history_len(), 0);
        assert_eq!(c.frame_count(), 0);
    }

    #[test]
    fn test_rewind_seconds_huge_request() {
        let mut c = console();
        let mut h = StateHistory::new(HistoryConfig { block_frames: 1, max_blocks: 100 }, &c);
        let (mut scr, mut spk) = (Screen::default(), Speaker::default());
        for _ in 0..20 {
            step(&mut h, &mut c, &mut scr, &mut spk, &[0]);
        }
        h.rewind_seconds(u32::MAX, &mut c);
        assert_eq!(h.history_len(), 0);
        assert_eq!(c.frame_count(), 0);
        assert_eq!(h.state(), RewindState::Stopped);
    }

    #[test]
    fn test_get_input_on_empty_log() {
        let c = console();
        let mut h = StateHistory::new(config(), &c);
        assert!(h.get_input(0).is_empty());
        assert!(h.get_input(7).is_empty());
    }

    #[test]
    fn test_clear_buffer() {
        let mut c = console();
        let mut h = StateHistory::new(config(), &c);
        let (mut scr, mut spk) = (Screen::default(), Speaker::default());
        for _ in 0..25 {
            step(&mut h, &mut c, &mut scr, &mut spk, &[0]);
        }
        h.clear_buffer(&c);
        assert_eq!(h.history_len(), 0);
        assert_eq!(h.current().frame_count, 0);
    }
}
