//! Fleet Viewer: terminal front end for live vehicle tracking.
//!
//! Connects to the position server over WebSocket and logs every marker
//! mutation instead of drawing a map. Stdin stands in for the map UI:
//!
//! ```text
//! +PLATE      start tracking
//! -PLATE      stop tracking
//! movestart   camera starts moving (updates are held back)
//! moveend     camera stops moving (held updates apply after the settle delay)
//! ?PLATE      print the latest report for PLATE
//! stats       print tracker counters
//! quit        exit (Ctrl-C works too)
//! ```
//!
//! Usage: `fleet-viewer [config.json]`

mod config;
mod surface;

use anyhow::Context;
use fleet_sync::{Tracker, TrackerHandle, WsTransport};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use config::ViewerConfig;
use surface::LogSurface;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Track(String),
    Untrack(String),
    MoveStart,
    MoveEnd,
    Report(String),
    Stats,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let plate = |rest: &str| {
            let rest = rest.trim();
            (!rest.is_empty()).then(|| rest.to_string())
        };

        match line {
            "movestart" => Some(Self::MoveStart),
            "moveend" => Some(Self::MoveEnd),
            "stats" => Some(Self::Stats),
            "quit" | "exit" => Some(Self::Quit),
            _ => {
                if let Some(rest) = line.strip_prefix('+') {
                    plate(rest).map(Self::Track)
                } else if let Some(rest) = line.strip_prefix('-') {
                    plate(rest).map(Self::Untrack)
                } else if let Some(rest) = line.strip_prefix('?') {
                    plate(rest).map(Self::Report)
                } else {
                    None
                }
            }
        }
    }
}

async fn execute(handle: &TrackerHandle, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Track(plate) => handle.toggle(plate, true).await?,
        Command::Untrack(plate) => handle.toggle(plate, false).await?,
        Command::MoveStart => handle.move_start().await?,
        Command::MoveEnd => handle.move_end().await?,
        Command::Report(plate) => match handle.report(plate.as_str()).await? {
            Some(report) => println!("{}", report.summary()),
            None => println!("{plate}: no data yet"),
        },
        Command::Stats => {
            let snapshot = handle.snapshot().await?;
            println!(
                "{} | motion {:?} | queued {} | tracking {}",
                if snapshot.connected { "connected" } else { "offline" },
                snapshot.motion,
                snapshot.queued,
                snapshot.tracked.len()
            );
            println!("buffer: {:?}", snapshot.buffer);
            println!("multiplexer: {:?}", snapshot.multiplexer);
        }
        Command::Quit => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => ViewerConfig::from_file(&path)?,
        None => ViewerConfig::default(),
    };
    info!("Fleet Viewer connecting to {}", config.sync.server_url);

    let (transport, events) = WsTransport::connect(&config.sync);
    let mut tracker = Tracker::new(transport, config.sync.buffer.clone());
    tracker.attach_surface(LogSurface::default());
    for plate in &config.plates {
        tracker.on_toggle_entity(plate.as_str().into(), true);
    }
    let (handle, task) = tracker.spawn(events, config.sync.channel_capacity);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                match Command::parse(&line) {
                    Some(Command::Quit) => break,
                    Some(command) => execute(&handle, command).await?,
                    None if line.trim().is_empty() => {}
                    None => warn!("Unknown command: {line}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    // Fails only if the tracker already stopped on its own.
    let _ = handle.shutdown().await;
    let tracker = task.await.context("tracker task panicked")?;
    if let Some(surface) = tracker.buffer().surface() {
        info!(
            "Fleet Viewer exiting: {} marker(s) on map, {} mutation(s)",
            surface.live_markers(),
            surface.mutations()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("+DXB-AX-1"), Some(Command::Track("DXB-AX-1".into())));
        assert_eq!(Command::parse(" - DXB-AX-1 "), Some(Command::Untrack("DXB-AX-1".into())));
        assert_eq!(Command::parse("?X"), Some(Command::Report("X".into())));
        assert_eq!(Command::parse("movestart"), Some(Command::MoveStart));
        assert_eq!(Command::parse("moveend\n"), Some(Command::MoveEnd));
        assert_eq!(Command::parse("stats"), Some(Command::Stats));
        assert_eq!(Command::parse("quit"), Some(Command::Quit));
    }

    #[test]
    fn test_parse_rejects_bare_prefix_and_noise() {
        assert_eq!(Command::parse("+"), None);
        assert_eq!(Command::parse("?  "), None);
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse(""), None);
    }
}
