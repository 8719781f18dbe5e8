//! seqweave-services: Clock thread, MIDI I/O channels and configuration

pub mod config;
pub mod engine;
pub mod input;
pub mod midi_out;

pub use config::{ConfigError, EngineConfig, config_path, load_config, load_or_default, save_config};
pub use engine::{EngineError, EngineState, FrameClock, PlaybackEngine};
pub use input::{InputError, InputMessage, InputRouter, decode};
pub use midi_out::{ChannelSink, OutputMessage};
