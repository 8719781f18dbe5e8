//! Transport state shared between the clock and the patterns it drives

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU8, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::event::Pulse;

/// Transport playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl TransportState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Playing => 1,
            Self::Paused => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Playing,
            2 => Self::Paused,
            _ => Self::Stopped,
        }
    }
}

/// What a pattern may ask of its parent. Implementations are read from the
/// real-time thread and must not block.
pub trait PatternHost: Send + Sync {
    fn is_running(&self) -> bool;
    fn tick(&self) -> Pulse;
    /// Global transpose in semitones
    fn transpose(&self) -> i32;
    /// A tempo event was reached during playback
    fn set_beats_per_minute(&self, bpm: f64);
    /// Whether notes held across a pause or a trigger entry are re-sounded
    fn resume_note_ons(&self) -> bool {
        false
    }
    /// Pattern content or state changed and the session needs saving
    fn mark_modified(&self) {}
}

/// Lock-free transport shared by the clock thread and every pattern
#[derive(Debug)]
pub struct Transport {
    state: AtomicU8,
    tick: AtomicI64,
    transpose: AtomicI32,
    /// f64 bits
    bpm: AtomicU64,
    ppqn: u32,
    modified: AtomicBool,
    resume_note_ons: AtomicBool,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(192, 120.0)
    }
}

impl Transport {
    pub fn new(ppqn: u32, bpm: f64) -> Self {
        Self {
            state: AtomicU8::new(TransportState::Stopped.to_u8()),
            tick: AtomicI64::new(0),
            transpose: AtomicI32::new(0),
            bpm: AtomicU64::new(bpm.to_bits()),
            ppqn: ppqn.max(1),
            modified: AtomicBool::new(false),
            resume_note_ons: AtomicBool::new(true),
        }
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn play(&self) {
        self.state.store(TransportState::Playing.to_u8(), Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.state.store(TransportState::Paused.to_u8(), Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.state.store(TransportState::Stopped.to_u8(), Ordering::SeqCst);
        self.tick.store(0, Ordering::SeqCst);
    }

    pub fn set_tick(&self, tick: Pulse) {
        self.tick.store(tick.max(0), Ordering::SeqCst);
    }

    pub fn set_transpose(&self, semitones: i32) {
        self.transpose.store(semitones.clamp(-64, 63), Ordering::SeqCst);
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm.load(Ordering::SeqCst))
    }

    pub fn set_bpm(&self, bpm: f64) {
        if bpm > 0.0 {
            self.bpm.store(bpm.to_bits(), Ordering::SeqCst);
        }
    }

    pub fn ppqn(&self) -> u32 {
        self.ppqn
    }

    /// Pulses advanced per `millis` of wall time at the current tempo
    pub fn pulses_per(&self, millis: f64) -> f64 {
        self.bpm() * self.ppqn as f64 * millis / 60_000.0
    }

    pub fn set_resume_note_ons(&self, resume: bool) {
        self.resume_note_ons.store(resume, Ordering::SeqCst);
    }

    /// Read and clear the modified flag
    pub fn take_modified(&self) -> bool {
        self.modified.swap(false, Ordering::SeqCst)
    }
}

impl PatternHost for Transport {
    fn is_running(&self) -> bool {
        self.state() == TransportState::Playing
    }

    fn tick(&self) -> Pulse {
        self.tick.load(Ordering::SeqCst)
    }

    fn transpose(&self) -> i32 {
        self.transpose.load(Ordering::SeqCst)
    }

    fn set_beats_per_minute(&self, bpm: f64) {
        self.set_bpm(bpm);
    }

    fn resume_note_ons(&self) -> bool {
        self.resume_note_ons.load(Ordering::SeqCst)
    }

    fn mark_modified(&self) {
        self.modified.store(true, Ordering::SeqCst);
    }
}
