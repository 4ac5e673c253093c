//! Billboard: headless signage player.
//!
//! Loads a JSON playlist of videos and images and cycles through it forever
//! (or `--loops` times), decoding videos through the Billboard playback core
//! and drawing their frames on the render thread.

mod app;
mod config;
mod playlist;
mod render;

use std::path::PathBuf;

use anyhow::{bail, Context};
use bb_common::RelayStrategy;
use bb_pipeline::{DecodeEngine, GraphicsContextBridge, SyntheticEngine};
use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::SignageApp;
use crate::config::{EngineKind, PlayerConfig};
use crate::playlist::Playlist;

#[derive(Parser, Debug)]
#[command(name = "billboard", about = "Headless signage player", version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Playlist file (overrides the config file)
    #[arg(short, long)]
    playlist: Option<PathBuf>,

    /// Frame handoff strategy: rendezvous or watermark
    #[arg(long)]
    strategy: Option<RelayStrategy>,

    /// Queue depth for the watermark strategy
    #[arg(long)]
    watermark: Option<usize>,

    /// Decode engine
    #[arg(long, value_enum)]
    engine: Option<EngineKind>,

    /// Stop after this many passes over the playlist
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    loops: Option<u32>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins if set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = effective_config(&args)?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let Some(playlist_path) = config.playlist.clone() else {
        bail!("no playlist given: pass --playlist or set \"playlist\" in the config file");
    };
    let playlist = Playlist::load(&playlist_path)?;

    let engine = build_engine(&config)?;
    tracing::info!(engine = engine.name(), "decode engine ready");

    // Headless build: no window, so the bridge carries no native handles and
    // engines fall back to their own GL context.
    let bridge = GraphicsContextBridge::install(GraphicsContextBridge::headless())?;

    let app = SignageApp::new(config, playlist, engine, Some(bridge))?;
    let summary = app.run(args.loops)?;
    if summary.failures > 0 {
        tracing::warn!(failures = summary.failures, "some entries failed to play");
    }
    Ok(())
}

/// Defaults, then the config file, then command-line flags.
fn effective_config(args: &Args) -> anyhow::Result<PlayerConfig> {
    let mut config = match &args.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };

    if let Some(playlist) = &args.playlist {
        config.playlist = Some(playlist.clone());
    }
    if let Some(strategy) = args.strategy {
        config.relay.strategy = strategy;
    }
    if let Some(watermark) = args.watermark {
        config.relay.watermark = watermark;
    }
    if let Some(engine) = args.engine {
        config.engine = engine;
    }

    config.validate()?;
    Ok(config)
}

fn build_engine(config: &PlayerConfig) -> anyhow::Result<Box<dyn DecodeEngine>> {
    match config.engine {
        EngineKind::Synthetic => Ok(Box::new(SyntheticEngine::with_clip(config.synthetic.clone()))),
        #[cfg(feature = "gstreamer")]
        EngineKind::Gstreamer => Ok(Box::new(bb_pipeline::GstEngine::new()?)),
        #[cfg(not(feature = "gstreamer"))]
        EngineKind::Gstreamer => bail!("built without the `gstreamer` feature"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_defaults() {
        let args = Args::parse_from([
            "billboard",
            "--playlist",
            "/tmp/list.json",
            "--strategy",
            "watermark",
            "--watermark",
            "6",
        ]);
        let config = effective_config(&args).unwrap();
        assert_eq!(config.relay.strategy, RelayStrategy::Watermark);
        assert_eq!(config.relay.watermark, 6);
        assert_eq!(config.playlist, Some(PathBuf::from("/tmp/list.json")));
    }

    #[test]
    fn invalid_override_rejected() {
        let args = Args::parse_from(["billboard", "--watermark", "0"]);
        assert!(effective_config(&args).is_err());
    }

    #[test]
    fn zero_loops_rejected_by_parser() {
        assert!(Args::try_parse_from(["billboard", "--loops", "0"]).is_err());
    }
}
