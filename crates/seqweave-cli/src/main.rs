//! seqweave: Headless pattern sequencer runner

mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use seqweave_services::{
    ChannelSink, EngineConfig, OutputMessage, PlaybackEngine, config_path, load_config,
    load_or_default, save_config,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "seqweave", about = "Loop-based MIDI pattern sequencer")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Play the demo arrangement and report what was sent
    Play {
        /// Bars to play
        #[arg(short, long, default_value_t = 4)]
        bars: u32,
        /// Override the configured tempo
        #[arg(long)]
        bpm: Option<f64>,
        /// Arm patterns from triggers instead of directly
        #[arg(long)]
        song: bool,
        /// Run on the clock thread in real time instead of rendering offline
        #[arg(long)]
        realtime: bool,
        /// Print every output message
        #[arg(long)]
        dump: bool,
    },
    /// Show the effective config, optionally writing it out
    Config {
        #[arg(long)]
        write: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("seqweave=debug".parse()?))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => load_or_default(),
    };

    match cli.command.unwrap_or(Commands::Play {
        bars: 4,
        bpm: None,
        song: false,
        realtime: false,
        dump: false,
    }) {
        Commands::Play { bars, bpm, song, realtime, dump } => {
            let mut config = config;
            if let Some(bpm) = bpm {
                config.bpm = bpm;
            }
            config.song_mode |= song;
            config.validate()?;
            play(&config, bars.max(1), realtime, dump)
        }
        Commands::Config { write } => {
            let path = cli.config.unwrap_or_else(config_path);
            println!("# {}", path.display());
            println!("{}", toml::to_string_pretty(&config)?);
            if write {
                save_config(&config, &path).with_context(|| format!("writing {}", path.display()))?;
                info!(path = %path.display(), "Config written");
            }
            Ok(())
        }
    }
}

fn play(config: &EngineConfig, bars: u32, realtime: bool, dump: bool) -> Result<()> {
    info!(bpm = config.bpm, ppqn = config.ppqn, song = config.song_mode, "Starting seqweave");

    let sink = Arc::new(ChannelSink::new(config.sink_capacity));
    let mut engine = PlaybackEngine::from_config(config, sink.clone());
    let bar_ticks = demo::build(engine.arrangement(), config)?;
    let end_tick = bar_ticks * bars as i64;
    let frame = Duration::from_millis(config.frame_interval_ms);

    let mut sent: Vec<OutputMessage> = Vec::new();
    engine.play();
    if realtime {
        engine.start()?;
        while engine.tick() < end_tick {
            thread::sleep(frame);
            sent.extend(sink.drain());
        }
        engine.stop()?;
    } else {
        while engine.tick() < end_tick {
            engine.run_frame(frame);
            sent.extend(sink.drain());
        }
        engine.stop_playback();
    }
    sent.extend(sink.drain());

    if dump {
        for msg in &sent {
            println!("{:>8}  buss {}  {:02X?}", msg.tick, msg.buss, msg.bytes());
        }
    }
    let notes = sent.iter().filter(|m| m.bytes()[0] & 0xF0 == 0x90).count();
    println!(
        "{} messages ({} note-ons) over {} bars, {} dropped",
        sent.len(),
        notes,
        bars,
        sink.dropped()
    );
    for (slot, pattern) in engine.arrangement().patterns() {
        println!("  [{slot}] {:<8} {} notes", pattern.name(), pattern.note_count());
    }
    Ok(())
}
