//! remocon: NES automation server.
//!
//! Loads a ROM and serves the binary automation protocol on stdin/stdout.
//! All diagnostics go to stderr so the pipe stays clean.
//!
//! ## Usage
//!
//! ```text
//! remocon game.nes                         # serve commands on stdin/stdout
//! remocon game.nes --threaded              # decode frames on a worker thread
//! remocon game.nes --load-state game.state # start from a saved state
//! remocon game.nes --headless 600 --screenshot out.png
//! ```
//!
//! Log verbosity is controlled with `RUST_LOG` (default `info`).

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use remocon_core::png::encode_png;
use remocon_core::server::RemoconServer;
use remocon_core::synthetic::SyntheticConsole;
use remocon_core::{EmulationSettings, Session, SCREEN_HEIGHT, SCREEN_WIDTH};

#[derive(Parser, Debug)]
#[command(name = "remocon", version, about = "Remote-controlled NES emulator")]
struct Args {
    /// ROM file (.nes, .fds, .unf)
    rom: PathBuf,

    /// Settings file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Decode frames on a background thread
    #[arg(long)]
    threaded: bool,

    /// Save state to restore before serving
    #[arg(long, value_name = "FILE")]
    load_state: Option<PathBuf>,

    /// Run this many frames without the protocol, then exit
    #[arg(long, value_name = "FRAMES")]
    headless: Option<u32>,

    /// Write a PNG of the last frame (headless mode)
    #[arg(long, value_name = "FILE", requires = "headless")]
    screenshot: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let settings = match &args.config {
        Some(path) => EmulationSettings::load(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?,
        None => EmulationSettings::default(),
    };

    let mut session = Session::new(settings, Box::new(SyntheticConsole::new()));
    session
        .load_rom_file(&args.rom)
        .with_context(|| format!("ROM not opened: {}", args.rom.display()))?;

    if let Some(path) = &args.load_state {
        session
            .load_state_file(path)
            .with_context(|| format!("Failed to load state {}", path.display()))?;
    }

    if args.threaded {
        session.start_decode_thread().context("Failed to start decode thread")?;
    }

    let result = match args.headless {
        Some(frames) => run_headless(&mut session, frames, args.screenshot.as_deref()),
        None => serve(&mut session),
    };

    session.stop_decode_thread();
    result
}

fn run_headless(session: &mut Session, frames: u32, screenshot: Option<&Path>) -> Result<()> {
    info!(frames, "Headless run");
    for _ in 0..frames {
        session.step_frame();
    }
    session.flush_decoded();

    if let Some(path) = screenshot {
        let png = session
            .take_screenshot()
            .unwrap_or_else(|| encode_png(SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32, &session.framebuffer_argb()));
        std::fs::write(path, png).with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Screenshot saved");
    }

    info!(
        frame = session.frame_count(),
        tiles = session.catalog().tiles().len(),
        sprite_tiles = session.catalog().sprite_tiles().len(),
        "Headless run finished"
    );
    Ok(())
}

fn serve(session: &mut Session) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut server = RemoconServer::new(stdin.lock(), stdout.lock());
    server.run(session).context("Automation pipe closed on error")?;
    Ok(())
}
