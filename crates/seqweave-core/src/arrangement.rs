//! Arrangement: the set of patterns sharing one transport and clipboard

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::clipboard::Clipboard;
use crate::error::{Result, SeqweaveError};
use crate::event::{EventRecord, Pulse};
use crate::pattern::{Pattern, PatternContext};
use crate::playback::{PatternChange, PlaybackMode};
use crate::sink::MidiSink;
use crate::snapshot::PatternSnapshot;
use crate::transport::{PatternHost, Transport, TransportState};

pub const MAX_SLOTS: usize = 1024;

/// Hears every pattern's state changes, tagged with its slot
pub type ArrangementListener = Arc<dyn Fn(usize, PatternChange) + Send + Sync>;

type Listeners = Arc<Mutex<Vec<ArrangementListener>>>;

/// Owns pattern slots. The slot table is only locked long enough to clone
/// out the patterns, so a long edit on one pattern never blocks playback of
/// another.
pub struct Arrangement {
    slots: Mutex<Vec<Option<Arc<Pattern>>>>,
    transport: Arc<Transport>,
    clipboard: Arc<Clipboard>,
    sink: Arc<dyn MidiSink>,
    listeners: Listeners,
    song_mode: AtomicBool,
}

impl Arrangement {
    pub fn new(transport: Arc<Transport>, sink: Arc<dyn MidiSink>) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            transport,
            clipboard: Arc::new(Clipboard::new()),
            sink,
            listeners: Arc::new(Mutex::new(Vec::new())),
            song_mode: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn clipboard(&self) -> &Arc<Clipboard> {
        &self.clipboard
    }

    /// Context handed to every pattern this arrangement creates
    pub fn context(&self) -> PatternContext {
        PatternContext::new(self.transport.clone(), self.sink.clone(), self.clipboard.clone())
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<Arc<Pattern>>>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Slot table lock poisoned; continuing");
                poisoned.into_inner()
            }
        }
    }

    // ==================== Slots ====================

    pub fn new_pattern(&self, slot: usize) -> Result<Arc<Pattern>> {
        let pattern = Pattern::new(self.context(), self.transport.ppqn());
        self.install(slot, pattern)
    }

    pub fn load_pattern(&self, slot: usize, snapshot: PatternSnapshot) -> Result<Arc<Pattern>> {
        let pattern = Pattern::from_snapshot(self.context(), snapshot)?;
        self.install(slot, pattern)
    }

    fn install(&self, slot: usize, pattern: Pattern) -> Result<Arc<Pattern>> {
        if slot >= MAX_SLOTS {
            return Err(SeqweaveError::SlotOutOfRange(slot));
        }
        let pattern = Arc::new(pattern);
        {
            let mut slots = self.slots();
            if slots.len() <= slot {
                slots.resize(slot + 1, None);
            }
            if slots[slot].is_some() {
                return Err(SeqweaveError::SlotOccupied(slot));
            }
            slots[slot] = Some(pattern.clone());
        }
        let listeners = self.listeners.clone();
        pattern.on_change(Arc::new(move |change: PatternChange| fan_out(&listeners, slot, change)));
        debug!(slot, name = %pattern.name(), "Installed pattern");
        Ok(pattern)
    }

    /// Take a pattern out of its slot, silencing it first
    pub fn remove_pattern(&self, slot: usize) -> Result<Arc<Pattern>> {
        let removed = {
            let mut slots = self.slots();
            slots
                .get_mut(slot)
                .ok_or(SeqweaveError::SlotOutOfRange(slot))?
                .take()
                .ok_or(SeqweaveError::EmptySlot(slot))?
        };
        removed.off_playing_notes();
        debug!(slot, "Removed pattern");
        Ok(removed)
    }

    pub fn pattern(&self, slot: usize) -> Option<Arc<Pattern>> {
        self.slots().get(slot).cloned().flatten()
    }

    fn expect_pattern(&self, slot: usize) -> Result<Arc<Pattern>> {
        if slot >= MAX_SLOTS {
            return Err(SeqweaveError::SlotOutOfRange(slot));
        }
        self.pattern(slot).ok_or(SeqweaveError::EmptySlot(slot))
    }

    /// Occupied slots, in slot order
    pub fn patterns(&self) -> Vec<(usize, Arc<Pattern>)> {
        self.slots()
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.clone().map(|p| (i, p)))
            .collect()
    }

    pub fn pattern_count(&self) -> usize {
        self.slots().iter().filter(|p| p.is_some()).count()
    }

    // ==================== Playback ====================

    pub fn playback_mode(&self) -> PlaybackMode {
        if self.song_mode.load(Ordering::SeqCst) {
            PlaybackMode::Song
        } else {
            PlaybackMode::Live
        }
    }

    pub fn set_playback_mode(&self, mode: PlaybackMode) {
        self.song_mode.store(mode.is_song(), Ordering::SeqCst);
    }

    pub fn set_resume_note_ons(&self, resume: bool) {
        self.transport.set_resume_note_ons(resume);
    }

    /// One clock frame: advance every pattern to `tick`, then flush
    pub fn play_all(&self, tick: Pulse) {
        let mode = self.playback_mode();
        let resume = self.transport.resume_note_ons();
        for (_, pattern) in self.patterns() {
            pattern.play_queue(tick, mode, resume);
        }
        self.transport.set_tick(tick);
        if !self.sink.flush() {
            warn!(tick, "Sink flush failed");
        }
    }

    /// Start or resume. Coming out of a pause in live mode, notes held
    /// across the pause point are sounded again. Song mode resumes through
    /// the trigger scan instead.
    pub fn start(&self) {
        let resuming = self.transport.state() == TransportState::Paused;
        self.transport.play();
        let mode = self.playback_mode();
        if resuming && !mode.is_song() && self.transport.resume_note_ons() {
            let tick = self.transport.tick();
            for (_, pattern) in self.patterns() {
                if pattern.is_playing() {
                    pattern.resume_note_ons(tick);
                }
            }
        }
        info!(?mode, resuming, "Transport started");
    }

    /// Stop and rewind every pattern
    pub fn stop_all(&self) {
        let song = self.playback_mode().is_song();
        for (_, pattern) in self.patterns() {
            pattern.stop(song);
        }
        self.transport.stop();
        info!("Transport stopped");
    }

    pub fn pause_all(&self) {
        let song = self.playback_mode().is_song();
        for (_, pattern) in self.patterns() {
            pattern.pause(song);
        }
        self.transport.pause();
        info!(tick = self.transport.tick(), "Transport paused");
    }

    /// Move every pattern's play cursor, e.g. after a seek
    pub fn reposition(&self, tick: Pulse) {
        for (_, pattern) in self.patterns() {
            pattern.off_playing_notes();
            pattern.set_last_tick(tick);
        }
        self.transport.set_tick(tick);
    }

    // ==================== Input and editing ====================

    /// Offer live input to every recording or thru pattern. Returns how
    /// many accepted it.
    pub fn stream_event(&self, event: &EventRecord) -> usize {
        let tick = self.transport.tick();
        let mut accepted = 0;
        for (_, pattern) in self.patterns() {
            if !(pattern.is_recording() || pattern.is_thru()) {
                continue;
            }
            let mut ev = event.clone();
            ev.timestamp = tick;
            if pattern.stream_event(ev) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Move the selection of one pattern into another, landing its earliest
    /// event at `tick` and lowest note at `note`. Each pattern is locked in
    /// turn, never both at once. The move is all or nothing: a selection
    /// whose pitch span would run past 127 stays where it is.
    pub fn move_selected_between(&self, from: usize, to: usize, tick: Pulse, note: u8) -> Result<bool> {
        let source = self.expect_pattern(from)?;
        let target = self.expect_pattern(to)?;
        let Some((events, bx)) = source.take_selected() else {
            return Ok(false);
        };
        let lowest = events.minmax_notes().map(|(low, high)| (low, high - low));
        let fits = lowest.is_none_or(|(_, span)| note as u32 + span as u32 <= 127);
        if fits && target.paste_events(&events, tick, note) {
            return Ok(true);
        }
        // Put the selection back where it came from
        let home = lowest.map_or(0, |(low, _)| low);
        if !source.paste_events(&events, bx.tick_s, home) {
            warn!(from, "Could not restore selection after a failed move");
        }
        warn!(from, to, tick, note, "Selection did not fit the target pattern");
        Ok(false)
    }

    /// Bake the global transpose into every transposable pattern and
    /// reset it
    pub fn apply_song_transpose(&self) -> usize {
        let changed = self
            .patterns()
            .iter()
            .filter(|(_, p)| p.apply_song_transpose())
            .count();
        self.transport.set_transpose(0);
        changed
    }

    /// Read and clear the arrangement-wide modified flag
    pub fn take_modified(&self) -> bool {
        self.transport.take_modified()
    }

    pub fn snapshots(&self) -> Vec<(usize, PatternSnapshot)> {
        self.patterns()
            .into_iter()
            .map(|(slot, p)| (slot, p.snapshot()))
            .collect()
    }

    pub fn on_change(&self, listener: ArrangementListener) {
        match self.listeners.lock() {
            Ok(mut l) => l.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }
}

fn fan_out(listeners: &Listeners, slot: usize, change: PatternChange) {
    let listeners = match listeners.lock() {
        Ok(l) => l.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    for listener in &listeners {
        listener(slot, change);
    }
}
