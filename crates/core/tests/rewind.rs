//! End-to-end rewind scenarios against the synthetic console.

use std::sync::{Arc, Mutex};

use remocon_core::arbiter::ControlState;
use remocon_core::console::{Console, InputPort, NoopObserver};
use remocon_core::filters::FrameInfo;
use remocon_core::history::{HistoryConfig, NullMixer, NullRenderer, RewindState, StateHistory, VideoRenderer};
use remocon_core::rom::{build_ines, RomImage};
use remocon_core::settings::Overscan;
use remocon_core::synthetic::SyntheticConsole;
use remocon_core::video::DecodedFrame;
use remocon_core::{EmulationSettings, Session};

/// Alternates RIGHT+A and LEFT every frame.
const SCRIPT: [u8; 2] = [0x81, 0x40];

fn console() -> SyntheticConsole {
    let chr: Vec<u8> = (0..8192u32).map(|i| (i * 7 % 251) as u8).collect();
    let mut c = SyntheticConsole::new();
    c.load_rom(&RomImage::parse("rewind", build_ines(2, &chr)).unwrap()).unwrap();
    c
}

/// Reads port 0 from the script while recording, from the history while
/// rewinding.
struct Recorder<'a> {
    history: &'a mut StateHistory,
}

impl InputPort for Recorder<'_> {
    fn read_port(&mut self, port: u8) -> ControlState {
        if port != 0 {
            return ControlState::empty();
        }
        if self.history.is_rewinding() {
            return self.history.get_input(0);
        }
        // Blocks start on even frames, so block-relative parity matches
        // absolute parity
        let frame = self.history.current().frame_count as usize;
        let s = ControlState::from_byte(SCRIPT[frame % SCRIPT.len()]);
        self.history.record_input(0, s);
        s
    }
}

/// Plain script playback for a reference run.
struct Script {
    frame: usize,
}

impl InputPort for Script {
    fn read_port(&mut self, port: u8) -> ControlState {
        if port != 0 {
            return ControlState::empty();
        }
        ControlState::from_byte(SCRIPT[self.frame % SCRIPT.len()])
    }
}

fn frame(n: u32) -> DecodedFrame {
    DecodedFrame {
        pixels: vec![n],
        info: FrameInfo { width: 1, height: 1, original_width: 1, original_height: 1, bytes_per_pixel: 4 },
        overscan: Overscan::default(),
        frame_number: n,
        resolution_changed: false,
    }
}

fn step(h: &mut StateHistory, c: &mut SyntheticConsole) {
    step_shown(h, c, &mut NullRenderer);
}

fn step_shown(h: &mut StateHistory, c: &mut SyntheticConsole, renderer: &mut dyn VideoRenderer) {
    c.run_frame(&mut Recorder { history: h }, &mut NoopObserver);
    h.process_frame(frame(c.frame_count()), renderer);
    h.process_audio(c.audio_samples(), &mut NullMixer);
    h.on_frame_done();
    h.process_end_of_frame(c);
}

fn reference(frames: u32) -> Vec<u8> {
    let mut c = console();
    for n in 0..frames {
        c.run_frame(&mut Script { frame: n as usize }, &mut NoopObserver);
    }
    c.save_state()
}

/// 120 frames of history in blocks of 30.
fn config() -> HistoryConfig {
    HistoryConfig { block_frames: 30, max_blocks: 4 }
}

fn recorded(frames: u32) -> (StateHistory, SyntheticConsole) {
    let mut c = console();
    let mut h = StateHistory::new(config(), &c);
    for _ in 0..frames {
        step(&mut h, &mut c);
    }
    (h, c)
}

#[test]
fn test_recording_matches_reference() {
    let (h, c) = recorded(300);
    assert_eq!(h.history_len(), 4);
    assert_eq!(c.save_state(), reference(300));
}

#[test]
fn test_rewind_then_stop_resynchronizes() {
    let (mut h, mut c) = recorded(300);

    h.start(false, &mut c, &mut NullMixer);
    assert_eq!(h.state(), RewindState::Starting);
    assert_eq!(c.frame_count(), 270);

    let mut guard = 0;
    while h.state() != RewindState::Started {
        step(&mut h, &mut c);
        guard += 1;
        assert!(guard <= 30);
    }

    h.stop(&mut c);
    assert_eq!(h.state(), RewindState::Stopping);
    assert!(h.frames_to_fast_forward() > 0);

    while h.frames_to_fast_forward() > 0 {
        step(&mut h, &mut c);
    }
    assert_eq!(h.state(), RewindState::Stopped);
    assert!(!h.force_max_speed());

    // One frame was shown backwards before stopping
    assert_eq!(c.frame_count(), 299);
    assert_eq!(c.save_state(), reference(299));

    // Recording resumes seamlessly
    step(&mut h, &mut c);
    assert_eq!(c.save_state(), reference(300));
}

#[test]
fn test_start_then_immediate_stop_is_identity() {
    let (mut h, mut c) = recorded(300);
    let before = c.save_state();

    h.start(false, &mut c, &mut NullMixer);
    h.stop(&mut c);
    assert_eq!(h.frames_to_fast_forward(), 30);
    while h.is_rewinding() {
        step(&mut h, &mut c);
    }
    assert_eq!(c.save_state(), before);
}

#[test]
fn test_rewind_seconds_lands_on_block_start() {
    let (mut h, mut c) = recorded(300);
    h.rewind_seconds(1, &mut c);
    assert_eq!(c.frame_count(), 210);
    assert_eq!(c.save_state(), reference(210));
    assert_eq!(h.current().frame_count, 0);
}

/// Collects the frame number each shown frame carries.
#[derive(Default)]
struct Shown(Vec<u32>);

impl VideoRenderer for Shown {
    fn update_frame(&mut self, pixels: &[u32], _width: u32, _height: u32) {
        self.0.push(pixels[0]);
    }
}

#[test]
fn test_deep_rewind_lands_without_drift() {
    for extra in [0u32, 1, 5, 29, 30, 31, 45, 59, 60, 61, 75] {
        let (mut h, mut c) = recorded(300);
        let mut shown = Shown::default();

        h.start(false, &mut c, &mut NullMixer);
        while h.state() != RewindState::Started {
            step_shown(&mut h, &mut c, &mut shown);
        }
        for _ in 0..extra {
            step_shown(&mut h, &mut c, &mut shown);
        }
        let last = 300 - extra;
        let expected: Vec<u32> = (last..=300).rev().collect();
        assert_eq!(shown.0, expected, "extra = {extra}");

        h.stop(&mut c);
        while h.is_rewinding() {
            step(&mut h, &mut c);
        }
        assert_eq!(c.frame_count(), last - 1, "extra = {extra}");
        assert_eq!(c.save_state(), reference(last - 1), "extra = {extra}");

        for _ in 0..40 {
            step(&mut h, &mut c);
        }
        assert_eq!(c.save_state(), reference(last - 1 + 40), "extra = {extra}");
    }
}

// ─── Full sessions ──────────────────────────────────────────────────────────

/// Renderer whose output outlives the session that owns it.
#[derive(Clone, Default)]
struct SharedShown(Arc<Mutex<Vec<u64>>>);

impl VideoRenderer for SharedShown {
    fn update_frame(&mut self, pixels: &[u32], _width: u32, _height: u32) {
        let bytes: Vec<u8> = pixels.iter().flat_map(|p| p.to_le_bytes()).collect();
        self.0.lock().unwrap().push(xxhash_rust::xxh3::xxh3_64(&bytes));
    }
}

struct SessionRewind {
    shown: Vec<u64>,
    landed_frame: u32,
    landed: Vec<u8>,
    after: Vec<u8>,
}

/// Record 100 frames, rewind until `extra` frames past the first backwards
/// frame, stop, and run 20 frames past the landing point.
fn session_rewind(threaded: bool, extra: u32) -> SessionRewind {
    let settings = EmulationSettings { rewind_block_frames: 30, ..EmulationSettings::default() };
    let mut s = Session::new(settings, Box::new(SyntheticConsole::new()));
    let chr: Vec<u8> = (0..8192u32).map(|i| (i * 7 % 251) as u8).collect();
    s.load_rom(RomImage::parse("rewind", build_ines(2, &chr)).unwrap()).unwrap();
    let shown = SharedShown::default();
    s.set_renderer(Box::new(shown.clone()));
    if threaded {
        s.start_decode_thread().unwrap();
    }

    for n in 0..100 {
        s.set_live_input(0, ControlState::from_byte(SCRIPT[n % SCRIPT.len()]));
        s.step_frame();
    }

    s.start_rewind(false);
    shown.0.lock().unwrap().clear();
    while s.history().state() != RewindState::Started {
        s.step_frame();
    }
    for _ in 0..extra {
        s.step_frame();
    }
    let backwards = shown.0.lock().unwrap().clone();

    s.stop_rewind(false);
    while s.history().is_rewinding() {
        s.step_frame();
    }
    let landed_frame = s.frame_count();
    let landed = s.save_state();
    for _ in 0..20 {
        s.step_frame();
    }
    let after = s.save_state();
    s.stop_decode_thread();

    SessionRewind { shown: backwards, landed_frame, landed, after }
}

#[test]
fn test_session_rewind_synchronous() {
    let r = session_rewind(false, 40);
    assert_eq!(r.shown.len(), 41);
    assert_eq!(r.landed_frame, 59);
}

#[test]
fn test_threaded_rewind_matches_synchronous() {
    for extra in [0, 9, 10, 40, 55] {
        let sync = session_rewind(false, extra);
        // Decode timing varies between runs
        for _ in 0..3 {
            let threaded = session_rewind(true, extra);
            assert_eq!(threaded.shown, sync.shown, "extra = {extra}");
            assert_eq!(threaded.landed_frame, sync.landed_frame, "extra = {extra}");
            assert_eq!(threaded.landed, sync.landed, "extra = {extra}");
            assert_eq!(threaded.after, sync.after, "extra = {extra}");
        }
    }
}
