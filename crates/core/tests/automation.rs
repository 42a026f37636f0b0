//! Automation pipe sessions driven end to end through the server.

use std::io::Cursor;

use remocon_core::protocol::{self, Command, InfoMask, StepRequest, READY};
use remocon_core::rom::{build_ines, RomImage};
use remocon_core::server::RemoconServer;
use remocon_core::synthetic::SyntheticConsole;
use remocon_core::{EmulationSettings, Session, FRAMEBUFFER_BYTES};

fn session() -> Session {
    let chr: Vec<u8> = (0..8192u32).map(|i| (i ^ (i >> 5)) as u8).collect();
    let mut s = Session::new(EmulationSettings::default(), Box::new(SyntheticConsole::new()));
    s.load_rom(RomImage::parse("pipe", build_ines(2, &chr)).unwrap()).unwrap();
    s
}

fn serve(session: &mut Session, commands: &[Command]) -> Vec<u8> {
    let mut input = Vec::new();
    for c in commands {
        c.write_to(&mut input).unwrap();
    }
    let mut server = RemoconServer::new(Cursor::new(input), Vec::new());
    server.run(session).unwrap();
    server.into_writer().unwrap()
}

fn step(info: InfoMask, players: u8, inputs: &[u8]) -> Command {
    Command::Step(StepRequest { info, players, inputs: inputs.to_vec() })
}

#[test]
fn test_two_players_three_moves_framebuffers_only() {
    let mut s = session();
    let out = serve(&mut s, &[step(InfoMask::FB, 2, &[0x08, 0x00, 0x01, 0x00, 0x00, 0x00])]);

    assert_eq!(out.len(), 1 + 3 * FRAMEBUFFER_BYTES + 1);
    assert_eq!(out[0], READY);
    assert_eq!(out[out.len() - 1], READY);

    // The last framebuffer is the frame now on screen
    let last = &out[1 + 2 * FRAMEBUFFER_BYTES..1 + 3 * FRAMEBUFFER_BYTES];
    let fb = protocol::read_framebuffer(&mut Cursor::new(last)).unwrap();
    assert_eq!(fb, s.framebuffer_argb());
}

#[test]
fn test_get_state_load_state_restores_screen() {
    let mut s = session();
    let out = serve(&mut s, &[step(InfoMask::empty(), 1, &[0x80, 0x80, 0x01, 0x10]), Command::GetState]);
    let state = protocol::read_state(&mut Cursor::new(&out[2..])).unwrap();
    let saved_fb = s.framebuffer_argb();

    // Wander off, then come back
    serve(&mut s, &[step(InfoMask::empty(), 1, &[0x40; 20])]);
    assert_ne!(s.framebuffer_argb(), saved_fb);

    let out = serve(&mut s, &[Command::LoadState { info: InfoMask::FB, state }]);
    assert_eq!(out.len(), 1 + FRAMEBUFFER_BYTES + 1);
    let fb = protocol::read_framebuffer(&mut Cursor::new(&out[1..])).unwrap();
    assert_eq!(fb, saved_fb);
    assert_eq!(s.frame_count(), 4);
}

#[test]
fn test_replayed_frames_add_no_tiles() {
    let mut s = session();
    let state = s.save_state();
    serve(&mut s, &[step(InfoMask::NEW_TILES | InfoMask::NEW_SPRITE_TILES, 1, &[0x01, 0x81, 0x08])]);
    let tiles = s.catalog().tiles().len();
    let sprite_tiles = s.catalog().sprite_tiles().len();
    assert!(tiles > 0);

    // Same frames again from the same state: everything is already known
    s.load_state(&state).unwrap();
    let out = serve(&mut s, &[step(InfoMask::NEW_TILES | InfoMask::NEW_SPRITE_TILES, 1, &[0x01, 0x81, 0x08])]);
    let mut r = Cursor::new(&out[1..]);
    assert!(protocol::read_tiles(&mut r).unwrap().is_empty());
    assert!(protocol::read_tiles(&mut r).unwrap().is_empty());
    assert_eq!(s.catalog().tiles().len(), tiles);
    assert_eq!(s.catalog().sprite_tiles().len(), sprite_tiles);
}

#[test]
fn test_truncated_command_is_fatal() {
    let mut s = session();
    let mut input = Vec::new();
    step(InfoMask::FB, 1, &[0, 0]).write_to(&mut input).unwrap();
    input.truncate(input.len() - 1);

    let mut server = RemoconServer::new(Cursor::new(input), Vec::new());
    assert!(server.run(&mut s).is_err());
}
