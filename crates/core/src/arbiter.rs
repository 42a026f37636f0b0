//! Per-port input arbitration.
//!
//! Every time the game polls a controller, [`ControlArbiter::get_control_state`]
//! decides which source is authoritative for that port and frame. First match
//! wins:
//!
//! 1. rewind playback (the history's recorded input)
//! 2. movie playback
//! 3. network client session
//! 4. automated test harness
//! 5. network peer device bound to the port
//! 6. debugger input override
//! 7. programmatic override latch: keep the last value, skip polling
//! 8. the live device
//!
//! Whatever won is then recorded to the movie (if recording), broadcast to
//! network peers and appended to the history's input log.

use tracing::trace;

use crate::MAX_PORTS;

bitflags::bitflags! {
    /// Button state of one standard pad for one frame.
    ///
    /// Bit order is the pad's serial report order: A, B, Select, Start, Up,
    /// Down, Left, Right.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ControlState: u8 {
        const A = 0x01;
        const B = 0x02;
        const SELECT = 0x04;
        const START = 0x08;
        const UP = 0x10;
        const DOWN = 0x20;
        const LEFT = 0x40;
        const RIGHT = 0x80;
    }
}

impl ControlState {
    #[inline]
    pub fn from_byte(b: u8) -> Self {
        ControlState::from_bits_retain(b)
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self.bits()
    }
}

// ─── Input sources ──────────────────────────────────────────────────────────

/// The rewind engine's view of input: replay while rewinding, record otherwise.
pub trait HistoryInput {
    fn is_rewinding(&self) -> bool;
    fn get_input(&mut self, port: u8) -> ControlState;
    /// Ignored by the implementation unless history is stopped.
    fn record_input(&mut self, port: u8, state: ControlState);
}

/// Movie playback and recording.
pub trait MovieSource {
    fn is_playing(&self) -> bool;
    fn is_recording(&self) -> bool;
    fn next_state(&mut self, port: u8) -> ControlState;
    fn record_state(&mut self, port: u8, state: ControlState);
}

/// Connection to a remote netplay host.
pub trait NetClient {
    fn is_connected(&self) -> bool;
    fn controller_state(&mut self, port: u8) -> ControlState;
}

/// Automated ROM test harness.
pub trait AutoTest {
    fn is_running(&self) -> bool;
    fn controller_state(&mut self, port: u8) -> ControlState;
}

/// Netplay host side: peers bound to ports, and input fan-out.
pub trait NetServer {
    /// Raw state of the peer bound to `port`, if any.
    fn peer_state(&mut self, port: u8) -> Option<u32>;
    fn broadcast_input(&mut self, port: u8, state: ControlState);
}

/// Debugger-provided input overrides.
pub trait DebuggerInput {
    fn input_override(&self, port: u8) -> Option<u32>;
}

/// Per-port debugger overrides held in memory.
#[derive(Debug, Default, Clone)]
pub struct DebuggerOverrides {
    ports: [Option<u32>; MAX_PORTS],
}

impl DebuggerOverrides {
    pub fn set(&mut self, port: u8, state: Option<u32>) {
        if let Some(slot) = self.ports.get_mut(port as usize) {
            *slot = state;
        }
    }
}

impl DebuggerInput for DebuggerOverrides {
    fn input_override(&self, port: u8) -> Option<u32> {
        self.ports.get(port as usize).copied().flatten()
    }
}

/// The optional sources consulted for one poll. Absent means inactive.
#[derive(Default)]
pub struct InputSources<'a> {
    pub movie: Option<&'a mut dyn MovieSource>,
    pub net_client: Option<&'a mut dyn NetClient>,
    pub auto_test: Option<&'a mut dyn AutoTest>,
    pub net_server: Option<&'a mut dyn NetServer>,
    pub debugger: Option<&'a dyn DebuggerInput>,
}

// ─── Devices ────────────────────────────────────────────────────────────────

/// A controller plugged into one port.
pub trait ControlDevice {
    fn port(&self) -> u8;

    /// Poll the live input (keyboard, gamepad, agent) for this device.
    fn refresh_state(&mut self) -> ControlState;

    /// Update what the live input currently holds.
    fn set_live_state(&mut self, state: ControlState);

    /// Convert a netplay/debugger payload into this device's state.
    fn process_net_state(&self, raw: u32) -> ControlState {
        ControlState::from_byte(raw as u8)
    }
}

/// Standard 8-button pad.
#[derive(Debug, Clone)]
pub struct StandardController {
    port: u8,
    live: ControlState,
}

impl StandardController {
    pub fn new(port: u8) -> Self {
        StandardController { port, live: ControlState::empty() }
    }
}

impl ControlDevice for StandardController {
    fn port(&self) -> u8 {
        self.port
    }

    fn refresh_state(&mut self) -> ControlState {
        self.live
    }

    fn set_live_state(&mut self, state: ControlState) {
        self.live = state;
    }
}

// ─── Arbiter ────────────────────────────────────────────────────────────────

struct PortSlot {
    device: Box<dyn ControlDevice>,
    current: ControlState,
    overridden: bool,
}

/// Resolves the authoritative input for every port.
pub struct ControlArbiter {
    ports: Vec<PortSlot>,
}

impl Default for ControlArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlArbiter {
    /// Standard controllers on every port.
    pub fn new() -> Self {
        let ports = (0..MAX_PORTS as u8)
            .map(|p| PortSlot {
                device: Box::new(StandardController::new(p)),
                current: ControlState::empty(),
                overridden: false,
            })
            .collect();
        ControlArbiter { ports }
    }

    /// Plug a different device into `port`.
    pub fn set_device(&mut self, port: u8, device: Box<dyn ControlDevice>) {
        if let Some(slot) = self.ports.get_mut(port as usize) {
            slot.device = device;
        }
    }

    /// Feed the live input for `port` (what the device returns when polled).
    pub fn set_live_state(&mut self, port: u8, state: ControlState) {
        if let Some(slot) = self.ports.get_mut(port as usize) {
            slot.device.set_live_state(state);
        }
    }

    /// Resolve the state for `port` for this poll.
    pub fn get_control_state(
        &mut self,
        port: u8,
        sources: &mut InputSources<'_>,
        history: &mut dyn HistoryInput,
    ) -> ControlState {
        let Some(slot) = self.ports.get_mut(port as usize) else {
            return ControlState::empty();
        };

        if history.is_rewinding() {
            slot.current = history.get_input(port);
        } else if let Some(movie) = sources.movie.as_deref_mut().filter(|m| m.is_playing()) {
            slot.current = movie.next_state(port);
        } else if let Some(client) = sources.net_client.as_deref_mut().filter(|c| c.is_connected()) {
            slot.current = client.controller_state(port);
        } else if let Some(test) = sources.auto_test.as_deref_mut().filter(|t| t.is_running()) {
            slot.current = test.controller_state(port);
        } else if let Some(raw) = sources.net_server.as_deref_mut().and_then(|s| s.peer_state(port)) {
            slot.current = slot.device.process_net_state(raw);
        } else if let Some(raw) = sources.debugger.and_then(|d| d.input_override(port)) {
            slot.current = slot.device.process_net_state(raw);
        } else if !slot.overridden {
            slot.current = slot.device.refresh_state();
        }

        let state = slot.current;
        if let Some(movie) = sources.movie.as_deref_mut().filter(|m| m.is_recording()) {
            movie.record_state(port, state);
        }
        if let Some(server) = sources.net_server.as_deref_mut() {
            server.broadcast_input(port, state);
        }
        history.record_input(port, state);

        state
    }

    /// Latch `state` on `port`: live input is not polled until cleared.
    ///
    /// Higher-priority sources still win while the latch is set.
    pub fn override_state(&mut self, port: u8, state: ControlState) {
        if let Some(slot) = self.ports.get_mut(port as usize) {
            trace!(port, state = state.to_byte(), "Input override");
            slot.current = state;
            slot.overridden = true;
        }
    }

    pub fn override_clear(&mut self, port: u8) {
        if let Some(slot) = self.ports.get_mut(port as usize) {
            slot.overridden = false;
        }
    }

    pub fn clear_all_overrides(&mut self) {
        for slot in &mut self.ports {
            slot.overridden = false;
        }
    }

    pub fn is_overridden(&self, port: u8) -> bool {
        self.ports.get(port as usize).is_some_and(|s| s.overridden)
    }

    /// Last resolved state for `port`.
    pub fn current_state(&self, port: u8) -> ControlState {
        self.ports.get(port as usize).map_or(ControlState::empty(), |s| s.current)
    }
}
