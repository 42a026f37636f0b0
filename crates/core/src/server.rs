//! Automation protocol server.
//!
//! Drives a [`Session`] from commands read off a byte stream (normally the
//! process's stdin/stdout pipe pair). See [`crate::protocol`] for the wire
//! format.
//!
//! ## Usage
//!
//! ```text
//! let mut server = RemoconServer::new(stdin.lock(), stdout.lock());
//! server.run(&mut session)?;   // returns Ok(()) when the client hangs up
//! ```
//!
//! Any framing violation ends the loop with `Err`; the caller is expected to
//! report it and exit.

use std::io::{BufWriter, Read, Write};

use tracing::{debug, error, info};

use crate::error::ProtocolError;
use crate::protocol::{self, Command, InfoMask, StepRequest, READY};
use crate::session::Session;

/// Serves protocol commands read from `R`, writing replies to `W`.
pub struct RemoconServer<R: Read, W: Write> {
    reader: R,
    writer: BufWriter<W>,
    commands: u64,
    frames: u64,
}

impl<R: Read, W: Write> RemoconServer<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        RemoconServer { reader, writer: BufWriter::new(writer), commands: 0, frames: 0 }
    }

    /// Announce readiness, then serve commands until the client closes the
    /// stream.
    pub fn run(&mut self, session: &mut Session) -> Result<(), ProtocolError> {
        self.send_ready()?;
        loop {
            match self.process_command(session) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!(error = %e, commands = self.commands, "Protocol violation");
                    return Err(e);
                }
            }
        }
        info!(commands = self.commands, frames = self.frames, "Client disconnected");
        Ok(())
    }

    /// Serve one command and signal readiness for the next. Returns false at
    /// end of stream.
    pub fn process_command(&mut self, session: &mut Session) -> Result<bool, ProtocolError> {
        let Some(cmd) = Command::read_from(&mut self.reader)? else {
            return Ok(false);
        };
        self.commands += 1;

        match cmd {
            Command::Step(req) => self.step(session, &req)?,
            Command::GetState => {
                let state = session.save_state();
                debug!(bytes = state.len(), "GetState");
                protocol::write_state(&mut self.writer, &state)?;
            }
            Command::LoadState { info, state } => {
                debug!(bytes = state.len(), "LoadState");
                session.load_state(&state)?;
                if info.contains(InfoMask::FB) {
                    protocol::write_framebuffer(&mut self.writer, &session.framebuffer_argb())?;
                }
            }
            Command::GetTilesSoFar => {
                debug!(count = session.catalog().tiles().len(), "GetTilesSoFar");
                protocol::write_tiles(&mut self.writer, session.catalog().tiles().iter())?;
            }
            Command::GetSpriteTilesSoFar => {
                debug!(count = session.catalog().sprite_tiles().len(), "GetSpriteTilesSoFar");
                protocol::write_tiles(&mut self.writer, session.catalog().sprite_tiles().iter())?;
            }
        }

        self.send_ready()?;
        Ok(true)
    }

    fn step(&mut self, session: &mut Session, req: &StepRequest) -> Result<(), ProtocolError> {
        debug!(moves = req.move_count(), players = req.players, info = req.info.bits(), "Step");
        for m in 0..req.move_count() {
            for p in 0..req.players {
                session.override_input(p, req.input(m, p));
            }
            session.step_frame();
            session.clear_overrides();
            self.frames += 1;

            if req.info.contains(InfoMask::FB) {
                protocol::write_framebuffer(&mut self.writer, &session.framebuffer_argb())?;
            }
            if req.info.contains(InfoMask::TILES_BY_PIXEL) {
                protocol::write_pixel_runs(&mut self.writer, session.catalog().pixels())?;
            }
            if req.info.contains(InfoMask::LIVE_SPRITES) {
                protocol::write_sprites(&mut self.writer, session.catalog().sprites())?;
            }
        }

        if req.info.contains(InfoMask::NEW_TILES) {
            protocol::write_tiles(&mut self.writer, session.catalog().tiles().new_entries())?;
            session.catalog_mut().reset_new_tiles();
        }
        if req.info.contains(InfoMask::NEW_SPRITE_TILES) {
            protocol::write_tiles(&mut self.writer, session.catalog().sprite_tiles().new_entries())?;
            session.catalog_mut().reset_new_sprite_tiles();
        }
        Ok(())
    }

    fn send_ready(&mut self) -> Result<(), ProtocolError> {
        self.writer.write_all(&[READY])?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn commands(&self) -> u64 {
        self.commands
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Recover the output stream.
    pub fn into_writer(self) -> Result<W, ProtocolError> {
        self.writer.into_inner().map_err(|e| ProtocolError::from(e.into_error()))
    }
}
