//! Clock thread driving pattern playback

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use seqweave_core::{Arrangement, MidiSink, PatternHost, PlaybackMode, Pulse, Transport};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::input::{InputMessage, InputRouter};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine already running")]
    AlreadyRunning,
    #[error("Engine not running")]
    NotRunning,
    #[error("Failed to spawn clock thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Converts wall time to pulses, carrying the fractional part so no time
/// is lost between frames
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameClock {
    tick: Pulse,
    remainder: f64,
}

impl FrameClock {
    pub fn tick(&self) -> Pulse {
        self.tick
    }

    pub fn reset(&mut self, tick: Pulse) {
        self.tick = tick;
        self.remainder = 0.0;
    }

    /// Advance by `pulses` and return the new tick
    pub fn advance(&mut self, pulses: f64) -> Pulse {
        let total = self.remainder + pulses.max(0.0);
        let whole = total.floor();
        self.remainder = total - whole;
        self.tick += whole as Pulse;
        self.tick
    }
}

/// State shared between the clock thread and callers
pub struct EngineState {
    arrangement: Arc<Arrangement>,
    input: InputRouter,
    clock: Mutex<FrameClock>,
    /// Clock thread alive
    running: AtomicBool,
    frames: AtomicU64,
    tick: AtomicI64,
}

impl EngineState {
    fn new(arrangement: Arc<Arrangement>, input_capacity: usize) -> Self {
        Self {
            arrangement,
            input: InputRouter::new(input_capacity),
            clock: Mutex::new(FrameClock::default()),
            running: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            tick: AtomicI64::new(0),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn tick(&self) -> Pulse {
        self.tick.load(Ordering::SeqCst)
    }

    fn reset_clock(&self, tick: Pulse) {
        match self.clock.lock() {
            Ok(mut clock) => clock.reset(tick),
            Err(poisoned) => poisoned.into_inner().reset(tick),
        }
        self.tick.store(tick, Ordering::SeqCst);
    }

    /// One frame: route queued input, then advance playback by `elapsed`
    fn process_frame(&self, elapsed: Duration) {
        self.input.drain(&self.arrangement);

        let transport = self.arrangement.transport();
        if !transport.is_running() {
            return;
        }
        let pulses = transport.pulses_per(elapsed.as_secs_f64() * 1000.0);
        let tick = match self.clock.lock() {
            Ok(mut clock) => clock.advance(pulses),
            Err(poisoned) => poisoned.into_inner().advance(pulses),
        };
        self.arrangement.play_all(tick);
        self.tick.store(tick, Ordering::SeqCst);
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

/// Owns the clock thread. Editors keep using the arrangement directly.
pub struct PlaybackEngine {
    state: Arc<EngineState>,
    thread: Option<JoinHandle<()>>,
    frame_interval: Duration,
}

impl PlaybackEngine {
    pub fn new(arrangement: Arc<Arrangement>, config: &EngineConfig) -> Self {
        arrangement.set_playback_mode(if config.song_mode {
            PlaybackMode::Song
        } else {
            PlaybackMode::Live
        });
        arrangement.set_resume_note_ons(config.resume_note_ons);
        Self {
            state: Arc::new(EngineState::new(arrangement, config.input_capacity)),
            thread: None,
            frame_interval: Duration::from_millis(config.frame_interval_ms.max(1)),
        }
    }

    /// Build the transport and arrangement described by `config`
    pub fn from_config(config: &EngineConfig, sink: Arc<dyn MidiSink>) -> Self {
        let transport = Arc::new(Transport::new(config.ppqn, config.bpm));
        let arrangement = Arc::new(Arrangement::new(transport, sink));
        Self::new(arrangement, config)
    }

    pub fn state(&self) -> Arc<EngineState> {
        self.state.clone()
    }

    pub fn arrangement(&self) -> &Arc<Arrangement> {
        &self.state.arrangement
    }

    /// Where device callbacks send live input
    pub fn input(&self) -> &InputRouter {
        &self.state.input
    }

    pub fn input_sender(&self) -> crossbeam_channel::Sender<InputMessage> {
        self.state.input.sender()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Start the clock thread
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.thread.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        self.state.running.store(true, Ordering::SeqCst);
        let state = self.state.clone();
        let interval = self.frame_interval;
        let handle = thread::Builder::new()
            .name("seqweave-clock".into())
            .spawn(move || Self::clock_loop(&state, interval));
        match handle {
            Ok(handle) => {
                self.thread = Some(handle);
                info!(interval_ms = interval.as_millis() as u64, "Playback engine started");
                Ok(())
            }
            Err(e) => {
                self.state.running.store(false, Ordering::SeqCst);
                Err(EngineError::Spawn(e))
            }
        }
    }

    /// Stop the clock thread, silencing every pattern
    pub fn stop(&mut self) -> Result<(), EngineError> {
        let handle = self.thread.take().ok_or(EngineError::NotRunning)?;
        self.state.running.store(false, Ordering::SeqCst);
        if handle.join().is_err() {
            warn!("Clock thread panicked");
        }
        self.state.arrangement.stop_all();
        info!(frames = self.state.frames(), "Playback engine stopped");
        Ok(())
    }

    fn clock_loop(state: &EngineState, interval: Duration) {
        let mut last = Instant::now();
        while state.running.load(Ordering::SeqCst) {
            thread::sleep(interval);
            let now = Instant::now();
            state.process_frame(now - last);
            last = now;
        }
        debug!("Clock loop exited");
    }

    /// Run one frame on the caller's thread, for offline rendering
    pub fn run_frame(&self, elapsed: Duration) {
        self.state.process_frame(elapsed);
    }

    // ==================== Transport ====================

    pub fn play(&self) {
        self.state.arrangement.start();
    }

    pub fn pause(&self) {
        self.state.arrangement.pause_all();
    }

    /// Stop and rewind to zero
    pub fn stop_playback(&self) {
        self.state.arrangement.stop_all();
        self.state.reset_clock(0);
    }

    pub fn seek(&self, tick: Pulse) {
        let tick = tick.max(0);
        self.state.arrangement.reposition(tick);
        self.state.reset_clock(tick);
    }

    pub fn tick(&self) -> Pulse {
        self.state.tick()
    }

    pub fn is_playing(&self) -> bool {
        self.state.arrangement.transport().is_running()
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
