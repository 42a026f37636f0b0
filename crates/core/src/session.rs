//! Emulation session.
//!
//! Owns the console and every piece of state layered on top of it. All
//! per-frame work happens in [`Session::step_frame`]:
//!
//! ```text
//! run_frame ── input:  ControlArbiter (rewind log / movie / netplay / ... / live)
//!          └── pixels: TileCatalog
//! decode    ── FramePipeline ──▶ StateHistory ──▶ renderer
//! audio     ── StateHistory ──▶ mixer
//! bookkeeping: StateHistory::on_frame_done, process_end_of_frame
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::arbiter::{
    AutoTest, ControlArbiter, ControlState, DebuggerOverrides, InputSources, MovieSource, NetClient, NetServer,
};
use crate::console::{Console, InputPort};
use crate::error::{MovieError, RomError, StateError, StateFileError};
use crate::filters::HdPack;
use crate::history::{HistoryConfig, HistorySink, NullMixer, NullRenderer, SoundMixer, StateHistory, VideoRenderer};
use crate::movie::{Movie, MovieData, MovieMode};
use crate::palette::raw_to_argb;
use crate::rom::RomImage;
use crate::savestate::{self, SaveState};
use crate::settings::{EmulationFlags, EmulationSettings};
use crate::tiles::TileCatalog;
use crate::video::{DecodeParams, FramePipeline};

/// Routes controller polls through the arbiter.
struct ArbitratedInput<'a> {
    arbiter: &'a mut ControlArbiter,
    sources: InputSources<'a>,
    history: &'a mut StateHistory,
}

impl InputPort for ArbitratedInput<'_> {
    fn read_port(&mut self, port: u8) -> ControlState {
        self.arbiter.get_control_state(port, &mut self.sources, &mut *self.history)
    }
}

/// One emulated console plus its history, decoder, catalog and input.
pub struct Session {
    settings: EmulationSettings,
    console: Box<dyn Console>,
    rom: Option<RomImage>,
    history: StateHistory,
    pipeline: FramePipeline,
    catalog: TileCatalog,
    arbiter: ControlArbiter,

    movie: Option<Movie>,
    net_client: Option<Box<dyn NetClient>>,
    net_server: Option<Box<dyn NetServer>>,
    auto_test: Option<Box<dyn AutoTest>>,
    debugger: DebuggerOverrides,

    renderer: Box<dyn VideoRenderer>,
    mixer: Box<dyn SoundMixer>,
    flags: EmulationFlags,
}

impl Session {
    /// Build a session around `console` with output discarded.
    pub fn new(settings: EmulationSettings, console: Box<dyn Console>) -> Self {
        let history = StateHistory::new(HistoryConfig::from_settings(&settings), console.as_ref());
        let pipeline = FramePipeline::new(DecodeParams::from_settings(&settings), None);
        let catalog = TileCatalog::new(settings.overscan, settings.sprite_capacity);
        Session {
            settings,
            console,
            rom: None,
            history,
            pipeline,
            catalog,
            arbiter: ControlArbiter::new(),
            movie: None,
            net_client: None,
            net_server: None,
            auto_test: None,
            debugger: DebuggerOverrides::default(),
            renderer: Box::new(NullRenderer),
            mixer: Box::new(NullMixer),
            flags: EmulationFlags::empty(),
        }
    }

    pub fn set_renderer(&mut self, renderer: Box<dyn VideoRenderer>) {
        self.renderer = renderer;
    }

    pub fn set_mixer(&mut self, mixer: Box<dyn SoundMixer>) {
        self.mixer = mixer;
    }

    /// Apply new settings. History geometry changes clear the history.
    pub fn apply_settings(&mut self, settings: EmulationSettings) {
        let config = HistoryConfig::from_settings(&settings);
        if config != self.history.config() {
            self.history.force_stop();
            self.history.set_config(config);
            self.history.clear_buffer(self.console.as_ref());
        }
        self.pipeline.set_params(DecodeParams::from_settings(&settings));
        self.catalog.set_overscan(settings.overscan);
        self.settings = settings;
    }

    // ─── ROM and state ──────────────────────────────────────────────────────

    /// Load a ROM and power-cycle. On failure the previous game keeps running.
    pub fn load_rom(&mut self, rom: RomImage) -> Result<(), RomError> {
        self.console.load_rom(&rom)?;
        self.catalog.clear();
        self.history.clear_buffer(self.console.as_ref());
        self.movie = None;
        info!(rom = %rom.name, format = rom.format.name(), "Session ready");
        self.rom = Some(rom);
        Ok(())
    }

    pub fn load_rom_file(&mut self, path: &Path) -> Result<(), RomError> {
        let rom = RomImage::load(path)?;
        self.load_rom(rom)
    }

    pub fn rom(&self) -> Option<&RomImage> {
        self.rom.as_ref()
    }

    /// Opaque snapshot of the console.
    pub fn save_state(&self) -> Vec<u8> {
        self.console.save_state()
    }

    /// Restore a snapshot. Any rewind in progress is cancelled and the
    /// history restarts from the loaded state.
    pub fn load_state(&mut self, state: &[u8]) -> Result<(), StateError> {
        if self.rom.is_none() {
            return Err(StateError::NoRom);
        }
        self.console.load_state(state)?;
        self.history.force_stop();
        self.history.clear_buffer(self.console.as_ref());
        debug!(frame = self.console.frame_count(), "Session state loaded");
        Ok(())
    }

    pub fn save_state_file(&self, path: &Path) -> Result<(), StateFileError> {
        let state = SaveState { frame: self.console.frame_count(), blob: self.save_state() };
        savestate::save_to_file(&state, self.console.rom_crc32(), path)
    }

    pub fn load_state_file(&mut self, path: &Path) -> Result<(), StateFileError> {
        let state = savestate::load_from_file(path, self.console.rom_crc32())?;
        self.load_state(&state.blob)?;
        Ok(())
    }

    // ─── Frame loop ─────────────────────────────────────────────────────────

    /// Emulate one frame and route its output.
    pub fn step_frame(&mut self) {
        {
            let sources = InputSources {
                movie: self.movie.as_mut().map(|m| m as &mut dyn MovieSource),
                net_client: self.net_client.as_mut().map(|c| c.as_mut() as &mut dyn NetClient),
                auto_test: self.auto_test.as_mut().map(|t| t.as_mut() as &mut dyn AutoTest),
                net_server: self.net_server.as_mut().map(|s| s.as_mut() as &mut dyn NetServer),
                debugger: Some(&self.debugger),
            };
            let mut input = ArbitratedInput { arbiter: &mut self.arbiter, sources, history: &mut self.history };
            self.console.run_frame(&mut input, &mut self.catalog);
        }

        let hd = if self.pipeline.hd_pack().is_some() { Some(self.catalog.pixels()) } else { None };
        let mut sink = HistorySink { history: &mut self.history, renderer: self.renderer.as_mut() };
        self.pipeline.update_frame_sync(self.console.raw_frame(), hd, &mut sink);
        if self.pipeline.is_running() {
            // The rewind buffers count decoded frames against console frames,
            // so while rewinding each step must deliver exactly its own frame.
            if sink.history.is_rewinding() {
                self.pipeline.flush(&mut sink);
            } else {
                self.pipeline.drain_decoded(&mut sink);
            }
        }

        self.history.process_audio(self.console.audio_samples(), self.mixer.as_mut());
        self.history.on_frame_done();
        self.history.process_end_of_frame(self.console.as_mut());

        self.flags.set(EmulationFlags::FORCE_MAX_SPEED, self.history.force_max_speed());
        self.flags.set(EmulationFlags::PAUSED, self.console.is_paused());
    }

    /// Latch `state` on `port` for the next frames until cleared.
    pub fn override_input(&mut self, port: u8, state: ControlState) {
        self.arbiter.override_state(port, state);
    }

    pub fn clear_overrides(&mut self) {
        self.arbiter.clear_all_overrides();
    }

    /// Feed live input for `port`.
    pub fn set_live_input(&mut self, port: u8, state: ControlState) {
        self.arbiter.set_live_state(port, state);
    }

    /// Set or clear the debugger's input override for `port`.
    pub fn set_debugger_input(&mut self, port: u8, state: Option<u32>) {
        self.debugger.set(port, state);
    }

    /// The current raw frame resolved to ARGB, without display filtering.
    pub fn framebuffer_argb(&self) -> Vec<u32> {
        self.console.raw_frame().pixels().iter().map(|&p| raw_to_argb(p)).collect()
    }

    // ─── Rewind ─────────────────────────────────────────────────────────────

    pub fn start_rewind(&mut self, for_debugger: bool) {
        // Frames still in the decode thread belong to the live timeline.
        if self.pipeline.is_running() {
            self.flush_decoded();
        }
        self.history.start(for_debugger, self.console.as_mut(), self.mixer.as_mut());
    }

    /// Stop rewinding. The debugger cancels outright; otherwise the console
    /// fast-forwards back to the frame on screen.
    pub fn stop_rewind(&mut self, for_debugger: bool) {
        if for_debugger {
            self.history.force_stop();
        } else {
            self.history.stop(self.console.as_mut());
        }
    }

    pub fn rewind_seconds(&mut self, seconds: u32) {
        self.history.rewind_seconds(seconds, self.console.as_mut());
    }

    pub fn clear_history(&mut self) {
        self.history.clear_buffer(self.console.as_ref());
    }

    // ─── Decode thread ──────────────────────────────────────────────────────

    pub fn start_decode_thread(&mut self) -> std::io::Result<()> {
        self.pipeline.start_thread()
    }

    pub fn stop_decode_thread(&mut self) {
        let mut sink = HistorySink { history: &mut self.history, renderer: self.renderer.as_mut() };
        self.pipeline.stop_thread(&mut sink);
    }

    /// Wait for the decode thread to catch up and route what it produced.
    pub fn flush_decoded(&mut self) -> usize {
        let mut sink = HistorySink { history: &mut self.history, renderer: self.renderer.as_mut() };
        self.pipeline.flush(&mut sink)
    }

    /// Install an HD pack. Restarts the decode thread if it was running.
    pub fn set_hd_pack(&mut self, pack: Option<Arc<HdPack>>) {
        let running = self.pipeline.is_running();
        if running {
            self.stop_decode_thread();
        }
        self.pipeline.set_hd_pack(pack);
        if running {
            if let Err(e) = self.start_decode_thread() {
                warn!(error = %e, "Decode thread not restarted");
            }
        }
    }

    /// PNG of the last displayed frame.
    pub fn take_screenshot(&self) -> Option<Vec<u8>> {
        self.pipeline.take_screenshot()
    }

    // ─── Movies ─────────────────────────────────────────────────────────────

    /// Record every resolved input from now on.
    pub fn record_movie(&mut self) {
        self.movie = Some(Movie::record(self.console.rom_crc32(), Some(self.save_state())));
    }

    /// Replay a movie from its starting state.
    pub fn play_movie(&mut self, data: MovieData) -> Result<(), StateError> {
        if data.rom_crc32 != self.console.rom_crc32() {
            return Err(StateError::RomMismatch);
        }
        if let Some(start) = &data.start_state {
            self.load_state(start)?;
        }
        self.movie = Some(Movie::play(data));
        Ok(())
    }

    /// Stop recording or playback, returning what was recorded or played.
    pub fn stop_movie(&mut self) -> Option<MovieData> {
        let mut movie = self.movie.take()?;
        movie.stop();
        Some(movie.data().clone())
    }

    pub fn save_movie(&self, path: &Path) -> Result<(), MovieError> {
        match &self.movie {
            Some(m) => m.save_to_file(path),
            None => Err(MovieError::BadHeader),
        }
    }

    pub fn movie_mode(&self) -> MovieMode {
        self.movie.as_ref().map_or(MovieMode::Idle, |m| m.mode())
    }

    // ─── External input sources ─────────────────────────────────────────────

    pub fn set_net_client(&mut self, client: Option<Box<dyn NetClient>>) {
        self.net_client = client;
    }

    pub fn set_net_server(&mut self, server: Option<Box<dyn NetServer>>) {
        self.net_server = server;
    }

    pub fn set_auto_test(&mut self, test: Option<Box<dyn AutoTest>>) {
        self.auto_test = test;
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn settings(&self) -> &EmulationSettings {
        &self.settings
    }

    pub fn flags(&self) -> EmulationFlags {
        self.flags
    }

    pub fn console(&self) -> &dyn Console {
        self.console.as_ref()
    }

    pub fn console_mut(&mut self) -> &mut dyn Console {
        self.console.as_mut()
    }

    pub fn history(&self) -> &StateHistory {
        &self.history
    }

    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    pub fn catalog(&self) -> &TileCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut TileCatalog {
        &mut self.catalog
    }

    pub fn arbiter(&self) -> &ControlArbiter {
        &self.arbiter
    }

    pub fn arbiter_mut(&mut self) -> &mut ControlArbiter {
        &mut self.arbiter
    }

    pub fn frame_count(&self) -> u32 {
        self.console.frame_count()
    }
}
