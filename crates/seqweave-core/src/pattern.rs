//! A loopable pattern: events, triggers and edit history behind one lock
//!
//! The clock thread calls [`Pattern::play`] and [`Pattern::stream_event`]
//! while editors mutate the same pattern. Every public method takes the
//! lock exactly once and does its work through `PatternState`, whose
//! methods never lock, so no call path can lock twice. Change listeners
//! run after the lock is released.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use crate::clipboard::Clipboard;
use crate::error::{Result, SeqweaveError};
use crate::event::{
    DEFAULT_NOTE_OFF_VELOCITY, DEFAULT_NOTE_ON_VELOCITY, EventClass, EventRecord, MAX_DATA,
    NOTE_COUNT, Pulse,
};
use crate::event_list::{EventList, LinkStats, NoteInfo, SelectAction, SelectionBox};
use crate::playback::{PatternChange, PlaybackMode, RecordStyle, RecordVelocity};
use crate::scales::{ChordQuality, ScaleMode};
use crate::sink::MidiSink;
use crate::snapshot::PatternSnapshot;
use crate::transport::PatternHost;
use crate::trigger::{Trigger, TriggerEdit, TriggerList};
use crate::undo::UndoRedoStack;

pub const DEFAULT_PPQN: u32 = 192;
/// Ticks added to a song-recorded trigger ahead of the cursor
pub const SONG_RECORD_INCREMENT: Pulse = 16;
const UNTITLED: &str = "Untitled";

pub type ChangeListener = Arc<dyn Fn(PatternChange) + Send + Sync>;

/// Collaborators a pattern talks to
#[derive(Clone)]
pub struct PatternContext {
    pub host: Arc<dyn PatternHost>,
    pub sink: Arc<dyn MidiSink>,
    pub clipboard: Arc<Clipboard>,
}

impl PatternContext {
    pub fn new(host: Arc<dyn PatternHost>, sink: Arc<dyn MidiSink>, clipboard: Arc<Clipboard>) -> Self {
        Self { host, sink, clipboard }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct DirtyFlags {
    main: bool,
    edit: bool,
    perf: bool,
    names: bool,
}

struct PatternState {
    events: EventList,
    triggers: TriggerList,
    history: UndoRedoStack<EventList>,

    name: String,
    color: Option<u32>,
    ppqn: u32,
    beats_per_bar: u32,
    beat_width: u32,
    length: Pulse,
    channel: Option<u8>,
    buss: u8,
    snap: Pulse,

    playing: bool,
    queued: bool,
    one_shot: bool,
    muted: bool,
    thru: bool,
    transposable: bool,
    channel_match: bool,

    recording: bool,
    quantized_recording: bool,
    record_style: RecordStyle,
    record_velocity: RecordVelocity,
    loop_reset: bool,
    song_recording: bool,
    song_recording_snap: bool,
    song_record_tick: Pulse,

    last_tick: Pulse,
    queued_tick: Pulse,
    one_shot_tick: Pulse,
    trigger_offset: Pulse,
    playing_notes: [u16; NOTE_COUNT],

    /// Held notes during step entry
    notes_on: u32,
    /// Where the next step-entered note goes
    step_tick: Pulse,

    dirty: DirtyFlags,
    modified: bool,
    pending: Vec<PatternChange>,
}

impl PatternState {
    fn new(ppqn: u32) -> Self {
        let ppqn = ppqn.max(1);
        let length = 4 * ppqn as Pulse;
        Self {
            events: EventList::new(length),
            triggers: TriggerList::new(length),
            history: UndoRedoStack::new(),
            name: UNTITLED.to_string(),
            color: None,
            ppqn,
            beats_per_bar: 4,
            beat_width: 4,
            length,
            channel: Some(0),
            buss: 0,
            snap: (ppqn as Pulse / 4).max(1),
            playing: false,
            queued: false,
            one_shot: false,
            muted: false,
            thru: false,
            transposable: true,
            channel_match: false,
            recording: false,
            quantized_recording: false,
            record_style: RecordStyle::Merge,
            record_velocity: RecordVelocity::Preserve,
            loop_reset: false,
            song_recording: false,
            song_recording_snap: false,
            song_record_tick: 0,
            last_tick: 0,
            queued_tick: 0,
            one_shot_tick: 0,
            trigger_offset: 0,
            playing_notes: [0; NOTE_COUNT],
            notes_on: 0,
            step_tick: 0,
            dirty: DirtyFlags::default(),
            modified: false,
            pending: Vec::new(),
        }
    }

    /// An edit to the events. Starts a new timeline, so redo is dropped.
    fn touch(&mut self) {
        self.history.clear_redo();
        self.mark_changed();
    }

    fn mark_changed(&mut self) {
        self.dirty.main = true;
        self.dirty.edit = true;
        self.dirty.perf = true;
        self.modified = true;
    }

    fn touch_perf(&mut self) {
        self.dirty.main = true;
        self.dirty.perf = true;
    }

    fn unit_measure(&self) -> Pulse {
        let quarter_ticks = self.ppqn as Pulse * 4;
        (self.beats_per_bar as Pulse * quarter_ticks / self.beat_width.max(1) as Pulse).max(1)
    }

    fn measures(&self) -> u32 {
        let unit = self.unit_measure();
        ((self.length + unit - 1) / unit).max(1) as u32
    }

    fn expand_threshold(&self) -> Pulse {
        self.length - self.unit_measure() / 4
    }

    fn min_length(&self) -> Pulse {
        (self.ppqn as Pulse / 4).max(1)
    }

    fn live_transpose(&self, ctx: &PatternContext) -> i32 {
        if self.transposable { ctx.host.transpose() } else { 0 }
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Send one event, keeping the per-note count of sounding notes. A
    /// note-off for a note that is not sounding is dropped.
    fn put_event_on_bus(&mut self, ctx: &PatternContext, event: &EventRecord) -> bool {
        if let Some(note) = event.note() {
            let count = &mut self.playing_notes[note as usize];
            if event.is_note_on() {
                *count = count.saturating_add(1);
            } else if event.is_note_off() {
                if *count == 0 {
                    return true;
                }
                *count -= 1;
            }
        }
        let channel = self.channel.unwrap_or(event.channel);
        trace!(tick = event.timestamp, kind = ?event.kind, channel, "Emit");
        ctx.sink.put_event(self.buss, event, channel)
    }

    /// Route one event reached during playback: tempo goes to the host,
    /// other meta events are dropped, notes get the live transpose
    fn emit_playback(&mut self, ctx: &PatternContext, event: EventRecord, transpose: i32) -> bool {
        if let Some(bpm) = event.bpm() {
            ctx.host.set_beats_per_minute(bpm);
            return true;
        }
        if event.is_meta() {
            return true;
        }
        let event = if transpose != 0 && event.is_note() {
            match event.transposed(transpose) {
                Some(t) => t,
                None => return true,
            }
        } else {
            event
        };
        self.put_event_on_bus(ctx, &event)
    }

    fn off_playing_notes(&mut self, ctx: &PatternContext) {
        let channel = self.channel.unwrap_or(0);
        for note in 0..NOTE_COUNT {
            while self.playing_notes[note] > 0 {
                let off = EventRecord::note_off(self.last_tick, note as u8, 0).with_channel(channel);
                if !ctx.sink.put_event(self.buss, &off, channel) {
                    warn!(note, "Sink refused note-off while flushing");
                }
                self.playing_notes[note] -= 1;
            }
        }
        ctx.sink.flush();
    }

    // ------------------------------------------------------------------
    // Playback state
    // ------------------------------------------------------------------

    fn set_playing(&mut self, ctx: &PatternContext, playing: bool) -> bool {
        let changed = playing != self.playing;
        if changed {
            self.playing = playing;
            if !playing {
                self.off_playing_notes(ctx);
            }
            self.touch_perf();
            self.pending.push(PatternChange::Playing(playing));
        }
        self.queued = false;
        self.one_shot = false;
        changed
    }

    fn toggle_playing(&mut self, ctx: &PatternContext, tick: Pulse, resume: bool) {
        self.set_playing(ctx, !self.playing);
        if self.playing && resume {
            self.resume_note_ons(ctx, tick, self.trigger_offset);
        }
    }

    fn next_boundary(&self) -> Pulse {
        self.last_tick - self.last_tick.rem_euclid(self.length) + self.length
    }

    fn toggle_queued(&mut self) -> bool {
        self.queued = !self.queued;
        self.queued_tick = self.next_boundary();
        self.touch_perf();
        self.pending.push(PatternChange::Queued(self.queued));
        self.queued
    }

    fn toggle_one_shot(&mut self) -> bool {
        self.one_shot = !self.one_shot;
        self.one_shot_tick = self.next_boundary();
        self.touch_perf();
        self.pending.push(PatternChange::OneShot(self.one_shot));
        self.one_shot
    }

    fn set_muted(&mut self, ctx: &PatternContext, muted: bool) {
        if muted == self.muted {
            return;
        }
        self.muted = muted;
        if muted {
            self.set_playing(ctx, false);
        }
        self.touch_perf();
        self.pending.push(PatternChange::Muted(muted));
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    fn play(&mut self, ctx: &PatternContext, tick: Pulse, mode: PlaybackMode, resume: bool) {
        if self.muted {
            if self.playing {
                self.set_playing(ctx, false);
            }
            self.last_tick = tick + 1;
            return;
        }
        let mut start = self.last_tick;
        let mut end = tick + 1;

        if self.song_recording {
            self.triggers.grow_trigger(self.song_record_tick, tick, SONG_RECORD_INCREMENT);
            self.touch_perf();
        }
        if self.recording {
            self.check_loop_reset(ctx, start, tick);
        }

        let mut offset = 0;
        let mut turn_off = false;
        if mode.is_song() {
            let scan = self.triggers.play(start, end, self.playing, self.last_tick);
            if scan.armed && !self.playing {
                self.set_playing(ctx, true);
                if resume && scan.resume {
                    self.resume_note_ons(ctx, scan.start_tick, scan.offset);
                }
            }
            start = scan.start_tick;
            end = scan.end_tick;
            offset = scan.offset;
            turn_off = scan.turn_off;
        }
        self.trigger_offset = offset;

        if self.playing {
            self.play_range(ctx, start, end, offset);
        }
        if turn_off {
            self.set_playing(ctx, false);
        }
        self.last_tick = tick + 1;
    }

    /// Overwrite recording latches a reset when the frame crosses a loop
    /// boundary; expand recording grows the pattern near its end
    fn check_loop_reset(&mut self, ctx: &PatternContext, start: Pulse, tick: Pulse) {
        let len = self.length;
        match self.record_style {
            RecordStyle::Overwrite => {
                if start > 0 && start <= tick && tick.div_euclid(len) != (start - 1).div_euclid(len) {
                    self.loop_reset = true;
                }
            }
            RecordStyle::Expand => {
                if ctx.host.is_running() && tick >= self.expand_threshold() {
                    let grown = len + self.unit_measure();
                    self.resize(grown);
                    self.touch();
                    debug!(length = grown, "Expanded recording pattern");
                }
            }
            RecordStyle::Merge => {}
        }
    }

    /// Emit events whose absolute time falls in `[start, end)`. Pattern
    /// tick `t` sounds at `offset + t + k * length`.
    fn play_range(&mut self, ctx: &PatternContext, start: Pulse, end: Pulse, offset: Pulse) {
        let len = self.length;
        if len <= 0 || end <= start || self.events.is_empty() {
            return;
        }
        let last = end - 1;
        let transpose = self.live_transpose(ctx);
        // One loop early so note-offs parked at `length` are not missed
        let mut base = ((start - offset).div_euclid(len) - 1) * len + offset;
        let mut failures = 0usize;
        while base <= last {
            let from = self
                .events
                .as_slice()
                .partition_point(|e| base + e.timestamp < start);
            for i in from..self.events.len() {
                let Some(event) = self.events.get(i) else { break };
                let at = base + event.timestamp;
                if at > last {
                    break;
                }
                let mut out = event.clone();
                out.timestamp = at;
                if !self.emit_playback(ctx, out, transpose) {
                    failures += 1;
                }
            }
            base += len;
            if base + len <= last {
                // A whole loop fits in what is left of this frame
                std::thread::yield_now();
            }
        }
        if failures > 0 {
            warn!(failures, pattern = %self.name, "Sink refused events");
        }
    }

    /// Re-send note-ons of notes sounding across `tick`, where pattern
    /// tick 0 sounds at `offset`
    fn resume_note_ons(&mut self, ctx: &PatternContext, tick: Pulse, offset: Pulse) {
        let len = self.length;
        if len <= 0 {
            return;
        }
        let t = (tick - offset).rem_euclid(len);
        let transpose = self.live_transpose(ctx);
        for i in 0..self.events.len() {
            let sounding = {
                let Some(on) = self.events.get(i).filter(|e| e.is_note_on()) else { continue };
                let Some(off) = self.events.linked(i) else { continue };
                let (a, b) = (on.timestamp, off.timestamp);
                let inside = if a <= b { a < t && t < b } else { t > a || t < b };
                inside.then(|| on.clone())
            };
            if let Some(mut on) = sounding {
                on.timestamp = tick;
                self.emit_playback(ctx, on, transpose);
            }
        }
    }

    fn play_queue(&mut self, ctx: &PatternContext, tick: Pulse, mode: PlaybackMode, resume: bool) {
        if self.queued && self.queued_tick <= tick {
            let boundary = self.queued_tick;
            self.play(ctx, boundary - 1, mode, resume);
            self.toggle_playing(ctx, boundary, resume);
        }
        if self.one_shot && self.one_shot_tick <= tick {
            let boundary = self.one_shot_tick;
            self.play(ctx, boundary - 1, mode, resume);
            self.toggle_playing(ctx, boundary, resume);
            self.toggle_queued();
        }
        self.play(ctx, tick, mode, resume);
    }

    fn stop(&mut self, ctx: &PatternContext, song_mode: bool) {
        let was_playing = self.playing;
        self.off_playing_notes(ctx);
        self.set_playing(ctx, false);
        self.last_tick = 0;
        self.step_tick = 0;
        if !song_mode {
            self.set_playing(ctx, was_playing);
        }
    }

    fn pause(&mut self, ctx: &PatternContext, song_mode: bool) {
        let was_playing = self.playing;
        self.off_playing_notes(ctx);
        if !song_mode {
            self.set_playing(ctx, was_playing);
        }
    }

    // ------------------------------------------------------------------
    // Live input
    // ------------------------------------------------------------------

    fn stream_event(&mut self, ctx: &PatternContext, mut event: EventRecord) -> bool {
        if let Some(ch) = self.channel {
            if self.channel_match && event.channel != ch {
                return false;
            }
            event.channel = ch;
        }
        let len = self.length;
        if len <= 0 {
            return false;
        }
        event.timestamp = event.timestamp.rem_euclid(len);

        if self.recording && self.record_style == RecordStyle::Overwrite && self.loop_reset {
            self.loop_reset = false;
            self.events.clear();
            debug!(pattern = %self.name, "Overwrite recording cleared pattern");
        }

        let running = ctx.host.is_running();
        if self.recording {
            if running {
                if let Some(v) = event.kind.velocity().filter(|_| event.is_note_on()) {
                    event.kind.set_velocity(self.record_velocity.apply(v));
                }
                if self.events.add(event.clone()) {
                    self.touch();
                }
            } else {
                self.step_entry(&event);
            }
        }

        if self.thru {
            self.put_event_on_bus(ctx, &event);
        }

        if self.recording && running && event.is_note_off() {
            self.events.link_new();
            if self.quantized_recording {
                self.quantize_recorded(&event);
            }
        }
        true
    }

    /// With the transport stopped, each note becomes a snap-length note at
    /// the step cursor. The cursor moves on once every held key is up.
    fn step_entry(&mut self, event: &EventRecord) {
        if event.is_note_on() {
            let (Some(note), Some(velocity)) = (event.note(), event.kind.velocity()) else {
                return;
            };
            let velocity = self.record_velocity.apply(velocity);
            self.add_note(self.step_tick, self.snap, note, false, velocity);
            self.notes_on += 1;
        } else if event.is_note_off() && self.notes_on > 0 {
            self.notes_on -= 1;
            if self.notes_on == 0 {
                self.step_tick = (self.step_tick + self.snap).rem_euclid(self.length);
            }
        }
    }

    fn quantize_recorded(&mut self, note_off: &EventRecord) {
        let Some(index) = self
            .events
            .iter()
            .position(|e| e == note_off && e.is_linked())
        else {
            return;
        };
        self.events.unselect_all();
        self.events.select_pair(index);
        self.events
            .quantize_events(EventClass::NoteOn, 0, self.snap, 1, true);
        self.events.unselect_all();
    }

    // ------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------

    fn push_undo(&mut self) {
        self.history.push(&self.events);
    }

    fn pop_undo(&mut self) -> bool {
        let ok = self.history.undo(&mut self.events);
        if ok {
            self.after_history();
        }
        ok
    }

    fn pop_redo(&mut self) -> bool {
        let ok = self.history.redo(&mut self.events);
        if ok {
            self.after_history();
        }
        ok
    }

    fn after_history(&mut self) {
        self.events.set_length(self.length);
        self.events.verify_and_link();
        self.events.unselect_all();
        self.mark_changed();
    }

    fn add_note(&mut self, tick: Pulse, len: Pulse, note: u8, paint: bool, velocity: u8) -> bool {
        if tick < 0 || len <= 0 || note > MAX_DATA || self.length <= 0 {
            return false;
        }
        let tick = self.events.wrap(tick, false);
        // A note a full loop long only fits when it starts at 0
        let limit = if tick == 0 { self.length } else { self.length - 1 };
        let len = len.min(limit).max(1);
        if paint {
            self.events.remove_painted_at(tick, EventClass::NoteOn);
        }
        let channel = self.channel.unwrap_or(0);
        let mut on = EventRecord::note_on(tick, note, velocity).with_channel(channel);
        if paint {
            on.paint();
        }
        let off_tick = self.events.wrap(tick + len, true);
        let off = EventRecord::note_off(off_tick, note, DEFAULT_NOTE_OFF_VELOCITY).with_channel(channel);
        self.events.add(on);
        self.events.add(off);
        self.events.link_new();
        self.touch();
        true
    }

    fn add_event(&mut self, mut event: EventRecord, paint: bool) -> bool {
        if event.timestamp < 0 {
            return false;
        }
        event.timestamp = self.events.wrap(event.timestamp, event.is_note_off());
        if paint {
            self.events.remove_painted_at(event.timestamp, event.class());
            event.paint();
        }
        let is_off = event.is_note_off();
        if !self.events.add(event) {
            return false;
        }
        if is_off {
            self.events.link_new();
        }
        self.touch();
        true
    }

    fn remove_selected(&mut self) -> bool {
        if !self.events.any_selected() {
            return false;
        }
        self.push_undo();
        let removed = self.events.remove_selected();
        if removed {
            self.touch();
        }
        removed
    }

    fn resize(&mut self, len: Pulse) {
        self.length = len;
        self.events.set_length(len);
        self.triggers.set_length(len);
    }

    fn set_length(&mut self, ctx: &PatternContext, len: Pulse, adjust_triggers: bool) -> bool {
        let was_playing = self.playing;
        self.set_playing(ctx, false);
        let ok = len > 0;
        let len = if ok { len.max(self.min_length()) } else { self.length };
        self.resize(len);
        if adjust_triggers {
            self.triggers.adjust_offsets_to_length(len);
        }
        self.events.verify_and_link();
        if was_playing {
            self.set_playing(ctx, true);
        }
        if ok {
            self.touch();
        }
        ok
    }

    fn change_ppqn(&mut self, new_ppqn: u32) -> bool {
        let old = self.ppqn;
        if new_ppqn == 0 || new_ppqn == old {
            return false;
        }
        self.events.rescale(old, new_ppqn);
        self.triggers.change_ppqn(old, new_ppqn);
        let scale = |t: Pulse| t * new_ppqn as Pulse / old as Pulse;
        self.length = scale(self.length).max(1);
        self.snap = scale(self.snap).max(1);
        self.last_tick = scale(self.last_tick);
        self.step_tick = scale(self.step_tick);
        self.ppqn = new_ppqn;
        self.events.set_length(self.length);
        self.triggers.set_length(self.length);
        self.touch();
        true
    }

    fn apply_song_transpose(&mut self, ctx: &PatternContext) -> bool {
        let transpose = self.live_transpose(ctx);
        if transpose == 0 {
            return false;
        }
        self.push_undo();
        let mut changed = self.events.clone();
        changed.select_all();
        // Out-of-range notes keep their pitch
        changed.transpose_selected(transpose, ScaleMode::Chromatic);
        changed.unselect_all();
        self.events = changed;
        self.touch();
        true
    }

    fn song_recording_start(&mut self, tick: Pulse, snap: bool) {
        self.triggers.add(tick, SONG_RECORD_INCREMENT, 0, true);
        self.song_recording_snap = snap;
        self.song_record_tick = tick;
        self.song_recording = true;
        self.touch_perf();
    }

    fn song_recording_stop(&mut self, tick: Pulse) {
        self.song_recording = false;
        if self.song_recording_snap {
            let len = self.length - tick.rem_euclid(self.length);
            self.triggers.grow_trigger(self.song_record_tick, tick, len);
        }
        self.touch_perf();
    }

    fn to_snapshot(&self) -> PatternSnapshot {
        PatternSnapshot {
            name: self.name.clone(),
            color: self.color,
            length: self.length,
            ppqn: self.ppqn,
            beats_per_bar: self.beats_per_bar,
            beat_width: self.beat_width,
            channel: self.channel,
            buss: self.buss,
            transposable: self.transposable,
            events: self.events.iter().cloned().collect(),
            triggers: self.triggers.iter().copied().collect(),
        }
    }

    fn apply_snapshot(&mut self, snapshot: PatternSnapshot) -> Result<()> {
        snapshot.validate()?;
        self.name = if snapshot.name.is_empty() { UNTITLED.to_string() } else { snapshot.name };
        self.color = snapshot.color;
        self.ppqn = snapshot.ppqn;
        self.beats_per_bar = snapshot.beats_per_bar;
        self.beat_width = snapshot.beat_width;
        self.channel = snapshot.channel;
        self.buss = snapshot.buss;
        self.transposable = snapshot.transposable;
        self.snap = (self.ppqn as Pulse / 4).max(1);
        let length = snapshot.length.max(self.min_length());
        let mut events = EventList::new(length);
        {
            let mut bulk = events.bulk_append();
            for e in snapshot.events {
                bulk.append(e);
            }
        }
        self.events = events;
        self.triggers = TriggerList::new(length);
        self.triggers.replace(snapshot.triggers);
        self.length = length;
        self.history.clear();
        self.dirty.names = true;
        self.touch();
        Ok(())
    }
}

/// One pattern slot's worth of music, shareable across threads
pub struct Pattern {
    state: Mutex<PatternState>,
    ctx: PatternContext,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl Pattern {
    pub fn new(ctx: PatternContext, ppqn: u32) -> Self {
        Self {
            state: Mutex::new(PatternState::new(ppqn)),
            ctx,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn from_snapshot(ctx: PatternContext, snapshot: PatternSnapshot) -> Result<Self> {
        let pattern = Self::new(ctx, snapshot.ppqn.max(1));
        pattern.load_snapshot(snapshot)?;
        Ok(pattern)
    }

    pub fn context(&self) -> &PatternContext {
        &self.ctx
    }

    /// Listeners hear playback, queue, mute and record state changes
    pub fn on_change(&self, listener: ChangeListener) {
        match self.listeners.lock() {
            Ok(mut l) => l.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PatternState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Pattern lock poisoned; continuing with last state");
                poisoned.into_inner()
            }
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut PatternState, &PatternContext) -> R) -> R {
        let (result, changes, modified) = {
            let mut state = self.lock();
            let result = f(&mut *state, &self.ctx);
            let changes = std::mem::take(&mut state.pending);
            let modified = std::mem::take(&mut state.modified);
            (result, changes, modified)
        };
        if modified {
            self.ctx.host.mark_modified();
        }
        if !changes.is_empty() {
            let listeners = match self.listeners.lock() {
                Ok(l) => l.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            for change in changes {
                for listener in &listeners {
                    listener(change);
                }
            }
        }
        result
    }

    fn read<R>(&self, f: impl FnOnce(&PatternState) -> R) -> R {
        f(&*self.lock())
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    /// Emit everything due up to and including `tick`
    pub fn play(&self, tick: Pulse, mode: PlaybackMode, resume: bool) {
        self.with(|s, ctx| s.play(ctx, tick, mode, resume));
    }

    /// `play` preceded by any queued or one-shot arm/disarm that falls due
    pub fn play_queue(&self, tick: Pulse, mode: PlaybackMode, resume: bool) {
        self.with(|s, ctx| s.play_queue(ctx, tick, mode, resume));
    }

    /// Live input. Returns false when the channel filter rejects the event.
    pub fn stream_event(&self, event: EventRecord) -> bool {
        self.with(|s, ctx| s.stream_event(ctx, event))
    }

    /// Re-send note-ons of notes sounding across `tick`, using the phase of
    /// the last trigger played
    pub fn resume_note_ons(&self, tick: Pulse) {
        self.with(|s, ctx| {
            let offset = s.trigger_offset;
            s.resume_note_ons(ctx, tick, offset);
        });
    }

    pub fn set_playing(&self, playing: bool) -> bool {
        self.with(|s, ctx| s.set_playing(ctx, playing))
    }

    pub fn toggle_playing(&self) -> bool {
        self.with(|s, ctx| {
            let tick = ctx.host.tick();
            s.toggle_playing(ctx, tick, ctx.host.resume_note_ons());
            s.playing
        })
    }

    pub fn is_playing(&self) -> bool {
        self.read(|s| s.playing)
    }

    /// Arm or disarm at the next loop boundary
    pub fn toggle_queued(&self) -> bool {
        self.with(|s, _| s.toggle_queued())
    }

    pub fn is_queued(&self) -> bool {
        self.read(|s| s.queued)
    }

    /// Play one pass starting at the next loop boundary
    pub fn toggle_one_shot(&self) -> bool {
        self.with(|s, _| s.toggle_one_shot())
    }

    pub fn is_one_shot(&self) -> bool {
        self.read(|s| s.one_shot)
    }

    pub fn set_muted(&self, muted: bool) {
        self.with(|s, ctx| s.set_muted(ctx, muted));
    }

    pub fn is_muted(&self) -> bool {
        self.read(|s| s.muted)
    }

    /// Silence and rewind. In live mode the armed state survives.
    pub fn stop(&self, song_mode: bool) {
        self.with(|s, ctx| s.stop(ctx, song_mode));
    }

    /// Silence without rewinding
    pub fn pause(&self, song_mode: bool) {
        self.with(|s, ctx| s.pause(ctx, song_mode));
    }

    pub fn off_playing_notes(&self) {
        self.with(|s, ctx| s.off_playing_notes(ctx));
    }

    /// Audition a note on the pattern's output
    pub fn play_note_on(&self, note: u8) -> bool {
        self.with(|s, ctx| {
            let on = EventRecord::note_on(s.last_tick, note, DEFAULT_NOTE_ON_VELOCITY);
            let sent = s.put_event_on_bus(ctx, &on);
            ctx.sink.flush();
            sent
        })
    }

    pub fn play_note_off(&self, note: u8) -> bool {
        self.with(|s, ctx| {
            let off = EventRecord::note_off(s.last_tick, note, 0);
            let sent = s.put_event_on_bus(ctx, &off);
            ctx.sink.flush();
            sent
        })
    }

    pub fn last_tick(&self) -> Pulse {
        self.read(|s| s.last_tick)
    }

    /// Reposition the play cursor, e.g. after a transport seek
    pub fn set_last_tick(&self, tick: Pulse) {
        self.with(|s, _| s.last_tick = tick.max(0));
    }

    pub fn trigger_offset(&self) -> Pulse {
        self.read(|s| s.trigger_offset)
    }

    /// Total count of notes currently sounding through this pattern
    pub fn sounding_notes(&self) -> usize {
        self.read(|s| s.playing_notes.iter().map(|&c| c as usize).sum())
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    pub fn set_recording(&self, recording: bool) -> bool {
        self.with(|s, _| {
            if recording == s.recording {
                return false;
            }
            s.notes_on = 0;
            s.recording = recording;
            if !recording {
                s.quantized_recording = false;
            }
            s.pending.push(PatternChange::Recording(recording));
            true
        })
    }

    pub fn is_recording(&self) -> bool {
        self.read(|s| s.recording)
    }

    pub fn set_quantized_recording(&self, quantized: bool) {
        self.with(|s, _| s.quantized_recording = quantized);
    }

    pub fn is_quantized_recording(&self) -> bool {
        self.read(|s| s.quantized_recording)
    }

    /// Switching to overwrite latches a reset so the next input replaces
    /// the pattern
    pub fn set_record_style(&self, style: RecordStyle) {
        self.with(|s, _| {
            if style == RecordStyle::Overwrite && s.record_style != style {
                s.loop_reset = true;
            }
            s.record_style = style;
        });
    }

    pub fn record_style(&self) -> RecordStyle {
        self.read(|s| s.record_style)
    }

    pub fn set_record_velocity(&self, velocity: RecordVelocity) {
        self.with(|s, _| s.record_velocity = velocity);
    }

    pub fn set_thru(&self, thru: bool) {
        self.with(|s, _| s.thru = thru);
    }

    pub fn is_thru(&self) -> bool {
        self.read(|s| s.thru)
    }

    /// Only accept input on the pattern's own channel
    pub fn set_channel_match(&self, enabled: bool) {
        self.with(|s, _| s.channel_match = enabled);
    }

    pub fn song_recording_start(&self, tick: Pulse, snap: bool) {
        self.with(|s, _| s.song_recording_start(tick, snap));
    }

    pub fn song_recording_stop(&self, tick: Pulse) {
        self.with(|s, _| s.song_recording_stop(tick));
    }

    pub fn is_song_recording(&self) -> bool {
        self.read(|s| s.song_recording)
    }

    // ------------------------------------------------------------------
    // Event editing
    // ------------------------------------------------------------------

    /// Add a note. With `paint`, painted notes already starting at `tick`
    /// are replaced.
    pub fn add_note(&self, tick: Pulse, len: Pulse, note: u8, paint: bool, velocity: u8) -> bool {
        self.with(|s, _| s.add_note(tick, len, note, paint, velocity))
    }

    pub fn push_add_note(&self, tick: Pulse, len: Pulse, note: u8, paint: bool, velocity: u8) -> bool {
        self.with(|s, _| {
            s.push_undo();
            s.add_note(tick, len, note, paint, velocity)
        })
    }

    pub fn add_chord(&self, quality: ChordQuality, tick: Pulse, len: Pulse, root: u8, velocity: u8) -> bool {
        self.with(|s, _| {
            let notes = quality.notes(root);
            if notes.is_empty() {
                return false;
            }
            s.push_undo();
            notes
                .into_iter()
                .fold(false, |added, n| s.add_note(tick, len, n, false, velocity) || added)
        })
    }

    pub fn add_event(&self, event: EventRecord, paint: bool) -> bool {
        self.with(|s, _| s.add_event(event, paint))
    }

    /// Remove the selection (and partners), recording an undo step
    pub fn remove_selected(&self) -> bool {
        self.with(|s, _| s.remove_selected())
    }

    pub fn copy_selected(&self) -> bool {
        self.with(|s, ctx| {
            let copy = s.events.copy_selected();
            let copied = !copy.is_empty();
            ctx.clipboard.copy(copy);
            copied
        })
    }

    pub fn cut_selected(&self) -> bool {
        self.with(|s, ctx| {
            let copy = s.events.copy_selected();
            if copy.is_empty() {
                return false;
            }
            ctx.clipboard.copy(copy);
            s.remove_selected()
        })
    }

    /// Paste the shared clipboard with its earliest event at `tick` and
    /// lowest note at `note`
    pub fn paste_selected(&self, tick: Pulse, note: u8) -> bool {
        let Some(buffer) = self.ctx.clipboard.content() else {
            return false;
        };
        self.paste_events(&buffer, tick, note)
    }

    pub fn paste_events(&self, buffer: &EventList, tick: Pulse, note: u8) -> bool {
        self.with(|s, _| {
            if buffer.is_empty() {
                return false;
            }
            s.push_undo();
            let pasted = s.events.paste_selected(buffer, tick, note);
            if pasted {
                s.touch();
            }
            pasted
        })
    }

    /// Remove the selection and hand it back with its bounding box
    pub fn take_selected(&self) -> Option<(EventList, SelectionBox)> {
        self.with(|s, _| {
            let bx = s.events.selected_box()?;
            let copy = s.events.copy_selected();
            s.remove_selected();
            Some((copy, bx))
        })
    }

    pub fn select_events(&self, tick_s: Pulse, tick_f: Pulse, class: EventClass, cc: u8, action: SelectAction) -> usize {
        self.with(|s, _| s.events.select_events(tick_s, tick_f, class, cc, action))
    }

    pub fn select_note_events(&self, tick_s: Pulse, note_h: u8, tick_f: Pulse, note_l: u8, action: SelectAction) -> usize {
        self.with(|s, _| s.events.select_note_events(tick_s, note_h, tick_f, note_l, action))
    }

    pub fn select_all(&self) {
        self.with(|s, _| s.events.select_all());
    }

    pub fn unselect_all(&self) {
        self.with(|s, _| s.events.unselect_all());
    }

    pub fn count_selected_notes(&self) -> usize {
        self.read(|s| s.events.count_selected_notes())
    }

    pub fn selected_box(&self) -> Option<SelectionBox> {
        self.read(|s| s.events.selected_box())
    }

    /// Move the selection, recording an undo step
    pub fn move_selected_notes(&self, delta_tick: Pulse, delta_note: i32) -> bool {
        self.with(|s, _| {
            if !s.events.any_selected() {
                return false;
            }
            s.push_undo();
            let moved = s.events.move_selected(delta_tick, delta_note);
            if moved {
                s.touch();
            }
            moved
        })
    }

    pub fn stretch_selected(&self, delta_tick: Pulse) -> bool {
        self.with(|s, _| {
            let ok = s.events.stretch_selected(delta_tick);
            if ok {
                s.touch();
            }
            ok
        })
    }

    pub fn grow_selected(&self, delta: Pulse) -> bool {
        self.with(|s, _| {
            let ok = s.events.grow_selected(delta);
            if ok {
                s.touch();
            }
            ok
        })
    }

    /// Quantize to the pattern's snap divided by `divide`
    pub fn quantize(&self, class: EventClass, cc: u8, divide: i32, fix_links: bool) -> bool {
        self.with(|s, _| {
            let ok = s.events.quantize_events(class, cc, s.snap, divide, fix_links);
            if ok {
                s.touch();
            }
            ok
        })
    }

    pub fn push_quantize(&self, class: EventClass, cc: u8, divide: i32, fix_links: bool) -> bool {
        self.with(|s, _| {
            s.push_undo();
            let ok = s.events.quantize_events(class, cc, s.snap, divide, fix_links);
            if ok {
                s.touch();
            }
            ok
        })
    }

    /// Transpose the selection along `scale`, recording an undo step
    pub fn transpose_notes(&self, steps: i32, scale: ScaleMode) -> bool {
        self.with(|s, _| {
            if steps == 0 || !s.events.any_selected() {
                return false;
            }
            s.push_undo();
            let ok = s.events.transpose_selected(steps, scale);
            if ok {
                s.touch();
            }
            ok
        })
    }

    pub fn randomize_selected(&self, class: EventClass, cc: u8, range: u8) -> bool {
        self.with(|s, _| {
            let ok = s.events.randomize_selected(class, cc, range);
            if ok {
                s.touch();
            }
            ok
        })
    }

    pub fn change_event_data_range(
        &self,
        tick_s: Pulse,
        tick_f: Pulse,
        class: EventClass,
        cc: u8,
        data_s: u8,
        data_f: u8,
    ) -> bool {
        self.with(|s, _| {
            let ok = s.events.change_event_data_range(tick_s, tick_f, class, cc, data_s, data_f);
            if ok {
                s.touch();
            }
            ok
        })
    }

    pub fn edge_fix(&self) -> bool {
        self.with(|s, _| {
            let ok = s.events.edge_fix(s.snap);
            if ok {
                s.touch();
            }
            ok
        })
    }

    pub fn unpaint_all(&self) {
        self.with(|s, _| s.events.unpaint_all());
    }

    pub fn clear_events(&self) {
        self.with(|s, _| {
            s.push_undo();
            s.events.clear();
            s.touch();
        });
    }

    pub fn verify_and_link(&self) -> LinkStats {
        self.with(|s, _| s.events.verify_and_link())
    }

    /// Copy of the event list
    pub fn events(&self) -> EventList {
        self.read(|s| s.events.clone())
    }

    pub fn event_count(&self) -> usize {
        self.read(|s| s.events.len())
    }

    pub fn note_count(&self) -> usize {
        self.read(|s| s.events.note_count())
    }

    pub fn minmax_notes(&self) -> Option<(u8, u8)> {
        self.read(|s| s.events.minmax_notes())
    }

    pub fn intersect_notes(&self, position: Pulse, note: u8) -> Option<(Pulse, Pulse)> {
        self.read(|s| s.events.intersect_notes(position, note))
    }

    pub fn intersect_events(&self, start: Pulse, end: Pulse, class: EventClass) -> Option<Pulse> {
        self.read(|s| s.events.intersect_events(start, end, class))
    }

    /// Drawing data for every note, collected under one lock
    pub fn note_infos(&self) -> Vec<NoteInfo> {
        self.read(|s| s.events.note_infos().collect())
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub fn push_undo(&self) {
        self.with(|s, _| s.push_undo());
    }

    pub fn pop_undo(&self) -> bool {
        self.with(|s, _| s.pop_undo())
    }

    pub fn pop_redo(&self) -> bool {
        self.with(|s, _| s.pop_redo())
    }

    pub fn can_undo(&self) -> bool {
        self.read(|s| s.history.can_undo())
    }

    pub fn can_redo(&self) -> bool {
        self.read(|s| s.history.can_redo())
    }

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    pub fn add_trigger(&self, tick: Pulse, len: Pulse, offset: Pulse, fix_offset: bool) -> bool {
        self.trigger_edit(|t| t.add(tick, len, offset, fix_offset))
    }

    pub fn grow_trigger(&self, tick_from: Pulse, tick_to: Pulse, min_len: Pulse) -> bool {
        self.trigger_edit(|t| t.grow_trigger(tick_from, tick_to, min_len))
    }

    pub fn remove_trigger(&self, tick: Pulse) -> bool {
        self.trigger_edit(|t| t.remove(tick))
    }

    pub fn split_trigger(&self, tick: Pulse) -> bool {
        self.trigger_edit(|t| t.split(tick))
    }

    pub fn half_split_trigger(&self, tick: Pulse) -> bool {
        self.trigger_edit(|t| t.half_split(tick))
    }

    pub fn exact_split_trigger(&self, tick: Pulse) -> bool {
        self.trigger_edit(|t| t.exact_split(tick))
    }

    pub fn move_selected_triggers(&self, delta: Pulse, edit: TriggerEdit) -> bool {
        self.trigger_edit(|t| t.move_selected(delta, edit))
    }

    pub fn offset_selected_triggers(&self, delta: Pulse) -> bool {
        self.trigger_edit(|t| t.offset_selected(delta))
    }

    pub fn remove_selected_triggers(&self) -> bool {
        self.trigger_edit(|t| t.remove_selected())
    }

    pub fn paste_trigger(&self, tick: Option<Pulse>) -> bool {
        self.trigger_edit(|t| t.paste(tick))
    }

    pub fn move_triggers(&self, start: Pulse, distance: Pulse, insert: bool) -> bool {
        self.trigger_edit(|t| t.move_range(start, distance, insert))
    }

    pub fn copy_triggers(&self, start: Pulse, distance: Pulse) -> bool {
        self.trigger_edit(|t| t.copy_range(start, distance))
    }

    fn trigger_edit(&self, f: impl FnOnce(&mut TriggerList) -> bool) -> bool {
        self.with(|s, _| {
            let changed = f(&mut s.triggers);
            if changed {
                s.touch_perf();
                s.modified = true;
            }
            changed
        })
    }

    pub fn select_trigger(&self, tick: Pulse) -> bool {
        self.with(|s, _| s.triggers.select(tick))
    }

    pub fn unselect_trigger(&self, tick: Pulse) -> bool {
        self.with(|s, _| s.triggers.unselect(tick))
    }

    pub fn unselect_triggers(&self) {
        self.with(|s, _| s.triggers.unselect_all());
    }

    pub fn copy_selected_trigger(&self) -> bool {
        self.with(|s, _| s.triggers.copy_selected())
    }

    pub fn get_trigger_state(&self, tick: Pulse) -> bool {
        self.read(|s| s.triggers.get_state(tick))
    }

    pub fn intersect_trigger(&self, tick: Pulse) -> Option<(Pulse, Pulse)> {
        self.read(|s| s.triggers.intersect_range(tick))
    }

    pub fn triggers(&self) -> Vec<Trigger> {
        self.read(|s| s.triggers.iter().copied().collect())
    }

    pub fn trigger_maximum(&self) -> Pulse {
        self.read(|s| s.triggers.maximum())
    }

    pub fn push_trigger_undo(&self) {
        self.with(|s, _| s.triggers.push_undo());
    }

    pub fn pop_trigger_undo(&self) -> bool {
        self.trigger_edit(|t| t.pop_undo())
    }

    pub fn pop_trigger_redo(&self) -> bool {
        self.trigger_edit(|t| t.pop_redo())
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub fn length(&self) -> Pulse {
        self.read(|s| s.length)
    }

    /// Set the loop length, clamped to at least a sixteenth note.
    /// Returns false (keeping the old length) for a non-positive value.
    pub fn set_length(&self, len: Pulse, adjust_triggers: bool) -> bool {
        self.with(|s, ctx| s.set_length(ctx, len, adjust_triggers))
    }

    /// Set the time signature and a length of `measures` bars
    pub fn apply_length(&self, beats_per_bar: u32, beat_width: u32, measures: u32) -> bool {
        if beats_per_bar == 0 || beat_width == 0 || measures == 0 {
            return false;
        }
        self.with(|s, ctx| {
            s.beats_per_bar = beats_per_bar;
            s.beat_width = beat_width;
            let len = s.unit_measure() * measures as Pulse;
            s.set_length(ctx, len, true)
        })
    }

    /// Ticks in one bar
    pub fn unit_measure(&self) -> Pulse {
        self.read(|s| s.unit_measure())
    }

    pub fn measures(&self) -> u32 {
        self.read(|s| s.measures())
    }

    pub fn ppqn(&self) -> u32 {
        self.read(|s| s.ppqn)
    }

    pub fn change_ppqn(&self, ppqn: u32) -> Result<bool> {
        if ppqn == 0 {
            return Err(SeqweaveError::InvalidPpqn(ppqn));
        }
        Ok(self.with(|s, _| s.change_ppqn(ppqn)))
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.read(|s| s.beats_per_bar)
    }

    pub fn beat_width(&self) -> u32 {
        self.read(|s| s.beat_width)
    }

    pub fn snap(&self) -> Pulse {
        self.read(|s| s.snap)
    }

    pub fn set_snap(&self, snap: Pulse) {
        self.with(|s, _| s.snap = snap.max(1));
    }

    /// `None` leaves each event on its own channel
    pub fn channel(&self) -> Option<u8> {
        self.read(|s| s.channel)
    }

    pub fn set_channel(&self, channel: Option<u8>) {
        self.with(|s, _| {
            s.channel = channel.map(|c| c & 0x0F);
            s.mark_changed();
        });
    }

    pub fn buss(&self) -> u8 {
        self.read(|s| s.buss)
    }

    pub fn set_buss(&self, buss: u8) {
        self.with(|s, _| {
            s.buss = buss;
            s.mark_changed();
        });
    }

    pub fn name(&self) -> String {
        self.read(|s| s.name.clone())
    }

    pub fn set_name(&self, name: &str) {
        self.with(|s, _| {
            let name = name.trim();
            s.name = if name.is_empty() { UNTITLED.to_string() } else { name.to_string() };
            s.dirty.names = true;
            s.modified = true;
        });
    }

    pub fn color(&self) -> Option<u32> {
        self.read(|s| s.color)
    }

    pub fn set_color(&self, color: Option<u32>) {
        self.with(|s, _| {
            s.color = color;
            s.dirty.names = true;
            s.modified = true;
        });
    }

    pub fn transposable(&self) -> bool {
        self.read(|s| s.transposable)
    }

    pub fn set_transposable(&self, transposable: bool) {
        self.with(|s, _| {
            if s.transposable != transposable {
                s.transposable = transposable;
                s.modified = true;
            }
        });
    }

    /// Bake the host's global transpose into the notes
    pub fn apply_song_transpose(&self) -> bool {
        self.with(|s, ctx| s.apply_song_transpose(ctx))
    }

    // ------------------------------------------------------------------
    // Dirty flags (read and clear)
    // ------------------------------------------------------------------

    pub fn is_dirty_main(&self) -> bool {
        self.with(|s, _| std::mem::take(&mut s.dirty.main))
    }

    pub fn is_dirty_edit(&self) -> bool {
        self.with(|s, _| std::mem::take(&mut s.dirty.edit))
    }

    pub fn is_dirty_perf(&self) -> bool {
        self.with(|s, _| std::mem::take(&mut s.dirty.perf))
    }

    pub fn is_dirty_names(&self) -> bool {
        self.with(|s, _| std::mem::take(&mut s.dirty.names))
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> PatternSnapshot {
        self.read(|s| s.to_snapshot())
    }

    /// Replace the whole pattern. On error nothing changes.
    pub fn load_snapshot(&self, snapshot: PatternSnapshot) -> Result<()> {
        snapshot.validate()?;
        self.with(|s, ctx| {
            s.set_playing(ctx, false);
            s.apply_snapshot(snapshot)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use crate::transport::Transport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        transport: Arc<Transport>,
        sink: Arc<RecordingSink>,
        pattern: Pattern,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(Transport::new(192, 120.0));
        let sink = Arc::new(RecordingSink::new());
        let ctx = PatternContext::new(transport.clone(), sink.clone(), Arc::new(Clipboard::new()));
        Fixture {
            transport,
            sink,
            pattern: Pattern::new(ctx, 192),
        }
    }

    fn note_ons(pattern: &Pattern) -> Vec<(Pulse, u8)> {
        pattern
            .events()
            .iter()
            .filter(|e| e.is_note_on())
            .map(|e| (e.timestamp, e.note().unwrap_or(0)))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let f = fixture();
        assert_eq!(f.pattern.length(), 768);
        assert_eq!(f.pattern.measures(), 1);
        assert_eq!(f.pattern.unit_measure(), 768);
        assert_eq!(f.pattern.name(), "Untitled");
        assert_eq!(f.pattern.snap(), 48);
    }

    #[test]
    fn test_add_note_links() {
        let f = fixture();
        assert!(f.pattern.add_note(0, 96, 60, false, 100));
        let events = f.pattern.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events.linked(0).unwrap().timestamp, 96);
        assert!(!f.pattern.add_note(-5, 96, 60, false, 100));
        assert!(!f.pattern.add_note(0, 0, 60, false, 100));
        assert!(!f.pattern.add_note(0, 10, 128, false, 100));
    }

    #[test]
    fn test_painted_note_replaces_overlap() {
        let f = fixture();
        assert!(f.pattern.add_note(0, 96, 60, true, 100));
        assert!(f.pattern.add_note(0, 96, 60, true, 100));
        assert_eq!(f.pattern.event_count(), 2);
        assert_eq!(f.pattern.note_count(), 1);
        assert_eq!(f.pattern.verify_and_link().unlinked, 0);
    }

    #[test]
    fn test_play_emits_in_order_and_wraps() {
        let f = fixture();
        f.pattern.set_length(192, false);
        f.pattern.add_note(0, 96, 60, false, 100);
        f.pattern.add_note(96, 96, 64, false, 100);
        f.pattern.set_playing(true);

        f.pattern.play(191, PlaybackMode::Live, false);
        let first: Vec<_> = f.sink.take().iter().map(|s| (s.timestamp(), s.event.is_note_on())).collect();
        assert_eq!(first, vec![(0, true), (96, false), (96, true)]);

        f.pattern.play(383, PlaybackMode::Live, false);
        let second: Vec<_> = f.sink.take().iter().map(|s| s.timestamp()).collect();
        // The note-off parked at the loop end lands on the next loop start
        assert_eq!(second, vec![192, 192, 288, 288]);
        assert_eq!(f.pattern.last_tick(), 384);
    }

    #[test]
    fn test_short_pattern_many_loops_in_one_frame() {
        let f = fixture();
        f.pattern.set_length(48, false);
        f.pattern.add_note(0, 24, 60, false, 100);
        f.pattern.set_playing(true);
        f.pattern.play(479, PlaybackMode::Live, false);
        assert_eq!(f.sink.note_ons().len(), 10);
        assert_eq!(f.sink.note_offs().len(), 10);
    }

    #[test]
    fn test_muted_pattern_is_silent() {
        let f = fixture();
        f.pattern.add_note(0, 96, 60, false, 100);
        f.pattern.set_playing(true);
        f.pattern.set_muted(true);
        assert!(!f.pattern.is_playing());
        f.pattern.play(500, PlaybackMode::Live, false);
        assert!(f.sink.note_ons().is_empty());
        assert_eq!(f.pattern.last_tick(), 501);
    }

    #[test]
    fn test_stop_flushes_sounding_notes() {
        let f = fixture();
        f.pattern.add_note(0, 300, 60, false, 100);
        f.pattern.set_playing(true);
        f.pattern.play(10, PlaybackMode::Live, false);
        assert_eq!(f.pattern.sounding_notes(), 1);

        f.pattern.stop(false);
        assert_eq!(f.pattern.sounding_notes(), 0);
        assert_eq!(f.sink.note_offs(), vec![60]);
        assert!(f.pattern.is_playing());
        assert_eq!(f.pattern.last_tick(), 0);

        f.pattern.set_playing(true);
        f.pattern.stop(true);
        assert!(!f.pattern.is_playing());
    }

    #[test]
    fn test_unsounded_note_off_is_dropped() {
        let f = fixture();
        f.pattern.add_note(0, 96, 60, false, 100);
        f.pattern.set_last_tick(50);
        f.pattern.set_playing(true);
        f.pattern.play(100, PlaybackMode::Live, false);
        assert!(f.sink.note_offs().is_empty());
    }

    #[test]
    fn test_live_transpose() {
        let f = fixture();
        f.pattern.add_note(0, 96, 60, false, 100);
        f.pattern.add_note(100, 50, 126, false, 100);
        f.transport.set_transpose(3);
        f.pattern.set_playing(true);
        f.pattern.play(200, PlaybackMode::Live, false);
        // 126 + 3 is out of range and is skipped
        assert_eq!(f.sink.note_ons(), vec![63]);

        f.pattern.set_transposable(false);
        f.pattern.set_last_tick(0);
        f.sink.take();
        f.pattern.play(10, PlaybackMode::Live, false);
        assert_eq!(f.sink.note_ons(), vec![60]);
    }

    #[test]
    fn test_tempo_event_goes_to_host() {
        let f = fixture();
        f.pattern.add_event(EventRecord::tempo(10, 90.0), false);
        f.pattern.set_playing(true);
        f.pattern.play(20, PlaybackMode::Live, false);
        assert!(f.sink.is_empty());
        assert!((f.transport.bpm() - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_song_mode_follows_triggers() {
        let f = fixture();
        f.pattern.set_length(192, false);
        f.pattern.add_note(0, 48, 60, false, 100);
        f.pattern.add_trigger(0, 192, 0, true);

        f.pattern.play(191, PlaybackMode::Song, false);
        assert!(f.pattern.is_playing());
        assert_eq!(f.sink.note_ons(), vec![60]);

        f.pattern.play(383, PlaybackMode::Song, false);
        assert!(!f.pattern.is_playing());
        assert_eq!(f.sink.note_ons(), vec![60]);
    }

    #[test]
    fn test_song_mode_respects_trigger_offset() {
        let f = fixture();
        f.pattern.set_length(192, false);
        f.pattern.add_note(0, 48, 60, false, 100);
        f.pattern.add_trigger(96, 192, 96, false);
        f.pattern.play(200, PlaybackMode::Song, false);
        let ons: Vec<_> = f.sink.events().iter().filter(|s| s.event.is_note_on()).map(|s| s.timestamp()).collect();
        assert_eq!(ons, vec![96]);
        assert_eq!(f.pattern.trigger_offset(), 96);
    }

    #[test]
    fn test_song_entry_mid_trigger_resumes_with_offset() {
        let f = fixture();
        f.pattern.set_length(192, false);
        f.pattern.add_note(0, 100, 60, false, 100);
        f.pattern.add_trigger(96, 192, 96, false);
        f.pattern.set_last_tick(150);
        // Tick 150 is pattern tick 54, inside the held note
        f.pattern.play(160, PlaybackMode::Song, true);
        assert_eq!(f.sink.note_ons(), vec![60]);

        let g = fixture();
        g.pattern.set_length(192, false);
        g.pattern.add_note(0, 100, 60, false, 100);
        g.pattern.add_trigger(96, 192, 96, false);
        g.pattern.set_last_tick(200);
        // Pattern tick 104 is past the note-off
        g.pattern.play(210, PlaybackMode::Song, true);
        assert!(g.sink.note_ons().is_empty());
    }

    #[test]
    fn test_toggle_playing_resumes_from_host_tick() {
        let f = fixture();
        f.pattern.add_note(0, 500, 60, false, 100);
        f.transport.set_tick(100);
        assert!(f.pattern.toggle_playing());
        assert_eq!(f.sink.note_ons(), vec![60]);
        assert!(!f.pattern.toggle_playing());

        f.sink.take();
        f.transport.set_resume_note_ons(false);
        assert!(f.pattern.toggle_playing());
        assert!(f.sink.note_ons().is_empty());
    }

    #[test]
    fn test_resume_note_ons() {
        let f = fixture();
        f.pattern.add_note(0, 200, 60, false, 100);
        f.pattern.add_note(700, 200, 62, false, 100);
        f.pattern.add_note(300, 10, 64, false, 100);
        f.pattern.resume_note_ons(150);
        assert_eq!(f.sink.note_ons(), vec![60]);
        f.sink.take();
        // The note starting at 700 wraps past the loop end
        f.pattern.resume_note_ons(768 + 750);
        assert_eq!(f.sink.note_ons(), vec![62]);
    }

    #[test]
    fn test_queued_start_at_boundary() {
        let f = fixture();
        f.pattern.set_length(192, false);
        f.pattern.add_note(0, 48, 60, false, 100);
        f.pattern.play_queue(99, PlaybackMode::Live, false);
        assert!(f.pattern.toggle_queued());
        f.pattern.play_queue(150, PlaybackMode::Live, false);
        assert!(!f.pattern.is_playing());
        f.pattern.play_queue(250, PlaybackMode::Live, false);
        assert!(f.pattern.is_playing());
        assert!(!f.pattern.is_queued());
        let ons: Vec<_> = f.sink.events().iter().filter(|s| s.event.is_note_on()).map(|s| s.timestamp()).collect();
        assert_eq!(ons, vec![192]);
    }

    #[test]
    fn test_one_shot_plays_one_pass() {
        let f = fixture();
        f.pattern.set_length(192, false);
        f.pattern.add_note(0, 48, 60, false, 100);
        assert!(f.pattern.toggle_one_shot());
        for tick in (50..1000).step_by(50) {
            f.pattern.play_queue(tick, PlaybackMode::Live, false);
        }
        assert!(!f.pattern.is_playing());
        assert_eq!(f.sink.note_ons(), vec![60]);
    }

    #[test]
    fn test_change_notifications() {
        let f = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        f.pattern.on_change(Arc::new(move |change: PatternChange| {
            if matches!(change, PatternChange::Playing(_)) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        }));
        f.pattern.set_playing(true);
        f.pattern.set_playing(true);
        f.pattern.toggle_playing();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_recording_while_running() {
        let f = fixture();
        f.pattern.set_recording(true);
        f.pattern.set_record_velocity(RecordVelocity::Fixed(90));
        f.transport.play();
        assert!(f.pattern.stream_event(EventRecord::note_on(800, 60, 30)));
        assert!(f.pattern.stream_event(EventRecord::note_off(850, 60, 0)));

        let events = f.pattern.events();
        assert_eq!(note_ons(&f.pattern), vec![(32, 60)]);
        assert_eq!(events.get(0).unwrap().kind.velocity(), Some(90));
        assert_eq!(events.linked(0).unwrap().timestamp, 82);
        assert!(f.transport.take_modified());
    }

    #[test]
    fn test_quantized_recording() {
        let f = fixture();
        f.pattern.set_recording(true);
        f.pattern.set_quantized_recording(true);
        f.transport.play();
        f.pattern.stream_event(EventRecord::note_on(50, 60, 100));
        f.pattern.stream_event(EventRecord::note_off(90, 60, 0));
        assert_eq!(note_ons(&f.pattern), vec![(48, 60)]);
        assert_eq!(f.pattern.events().linked(0).unwrap().timestamp, 88);
    }

    #[test]
    fn test_step_entry_advances_per_chord() {
        let f = fixture();
        f.pattern.set_recording(true);
        f.pattern.stream_event(EventRecord::note_on(0, 60, 100));
        f.pattern.stream_event(EventRecord::note_on(0, 64, 100));
        f.pattern.stream_event(EventRecord::note_off(0, 60, 0));
        f.pattern.stream_event(EventRecord::note_off(0, 64, 0));
        f.pattern.stream_event(EventRecord::note_on(0, 67, 100));
        f.pattern.stream_event(EventRecord::note_off(0, 67, 0));
        assert_eq!(note_ons(&f.pattern), vec![(0, 60), (0, 64), (48, 67)]);
        assert_eq!(f.pattern.verify_and_link().unlinked, 0);
    }

    #[test]
    fn test_channel_filter_and_thru() {
        let f = fixture();
        f.pattern.set_channel(Some(2));
        f.pattern.set_channel_match(true);
        f.pattern.set_thru(true);
        assert!(!f.pattern.stream_event(EventRecord::note_on(0, 60, 100).with_channel(1)));
        assert!(f.sink.is_empty());
        assert!(f.pattern.stream_event(EventRecord::note_on(0, 60, 100).with_channel(2)));
        assert_eq!(f.sink.note_ons(), vec![60]);
        assert_eq!(f.sink.events()[0].channel, 2);
        // Thru alone records nothing
        assert_eq!(f.pattern.event_count(), 0);
    }

    #[test]
    fn test_overwrite_recording_replaces_on_loop() {
        let f = fixture();
        f.pattern.set_length(192, false);
        f.pattern.add_note(0, 48, 60, false, 100);
        f.pattern.set_recording(true);
        f.pattern.set_record_style(RecordStyle::Overwrite);
        f.transport.play();
        f.pattern.set_playing(true);

        f.pattern.stream_event(EventRecord::note_on(10, 62, 100));
        f.pattern.stream_event(EventRecord::note_off(20, 62, 0));
        assert_eq!(note_ons(&f.pattern), vec![(10, 62)]);

        f.pattern.play(100, PlaybackMode::Live, false);
        f.pattern.stream_event(EventRecord::note_on(110, 64, 100));
        assert_eq!(note_ons(&f.pattern), vec![(10, 62), (110, 64)]);

        f.pattern.play(200, PlaybackMode::Live, false);
        f.pattern.stream_event(EventRecord::note_on(205, 65, 100));
        assert_eq!(note_ons(&f.pattern), vec![(13, 65)]);
    }

    #[test]
    fn test_expand_recording_grows_length() {
        let f = fixture();
        f.pattern.set_recording(true);
        f.pattern.set_record_style(RecordStyle::Expand);
        f.transport.play();
        f.pattern.set_playing(true);
        f.pattern.play(700, PlaybackMode::Live, false);
        assert_eq!(f.pattern.length(), 1536);
        assert_eq!(f.pattern.measures(), 2);
    }

    #[test]
    fn test_song_recording_grows_trigger() {
        let f = fixture();
        f.pattern.set_length(192, false);
        f.pattern.song_recording_start(100, true);
        f.pattern.play(150, PlaybackMode::Live, false);
        assert_eq!(f.pattern.intersect_trigger(100), Some((100, 165)));
        f.pattern.song_recording_stop(250);
        assert!(!f.pattern.is_song_recording());
        // Snapped to the end of the loop holding tick 250
        assert_eq!(f.pattern.intersect_trigger(100), Some((100, 383)));
        assert!(f.pattern.is_dirty_perf());
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let f = fixture();
        f.pattern.add_note(0, 96, 60, false, 100);
        let before = f.pattern.events();
        f.pattern.push_undo();
        f.pattern.add_note(96, 96, 64, false, 100);
        let after = f.pattern.events();

        assert!(f.pattern.pop_undo());
        assert_eq!(f.pattern.events(), before);
        assert!(f.pattern.pop_redo());
        assert_eq!(f.pattern.events(), after);
        assert!(!f.pattern.pop_redo());
    }

    #[test]
    fn test_edit_after_undo_drops_redo() {
        let f = fixture();
        f.pattern.push_undo();
        f.pattern.add_note(0, 96, 60, false, 100);
        assert!(f.pattern.pop_undo());
        assert!(f.pattern.can_redo());

        f.pattern.add_note(96, 96, 64, false, 100);
        assert!(!f.pattern.can_redo());
        assert!(!f.pattern.pop_redo());
        assert_eq!(note_ons(&f.pattern), vec![(96, 64)]);
    }

    #[test]
    fn test_every_edit_drops_redo() {
        let edits: Vec<fn(&Pattern) -> bool> = vec![
            |p| p.add_event(EventRecord::control_change(10, 7, 64), false),
            |p| p.stretch_selected(10),
            |p| p.grow_selected(10),
            |p| p.quantize(EventClass::NoteOn, 0, 1, true),
            |p| p.change_event_data_range(0, 767, EventClass::NoteOn, 0, 10, 100),
        ];
        for edit in edits {
            let f = fixture();
            f.pattern.add_note(5, 96, 60, false, 100);
            f.pattern.select_all();
            f.pattern.push_undo();
            f.pattern.add_note(400, 96, 64, false, 100);
            f.pattern.pop_undo();
            f.pattern.select_all();
            assert!(f.pattern.can_redo());
            assert!(edit(&f.pattern));
            assert!(!f.pattern.can_redo());
        }
    }

    #[test]
    fn test_transpose_and_move_push_undo() {
        let f = fixture();
        f.pattern.add_note(0, 96, 60, false, 100);
        f.pattern.select_all();
        assert!(f.pattern.transpose_notes(2, ScaleMode::Chromatic));
        assert_eq!(note_ons(&f.pattern), vec![(0, 62)]);
        f.pattern.select_all();
        assert!(f.pattern.move_selected_notes(48, 0));
        assert_eq!(note_ons(&f.pattern), vec![(48, 62)]);

        assert!(f.pattern.pop_undo());
        assert!(f.pattern.pop_undo());
        assert_eq!(note_ons(&f.pattern), vec![(0, 60)]);
        assert_eq!(f.pattern.count_selected_notes(), 0);
    }

    #[test]
    fn test_cut_and_paste_through_clipboard() {
        let f = fixture();
        f.pattern.add_note(96, 48, 64, false, 100);
        f.pattern.add_note(120, 48, 60, false, 100);
        f.pattern.select_all();
        assert!(f.pattern.cut_selected());
        assert_eq!(f.pattern.event_count(), 0);
        assert!(!f.pattern.context().clipboard.is_empty());

        assert!(f.pattern.paste_selected(384, 48));
        assert_eq!(note_ons(&f.pattern), vec![(384, 52), (408, 48)]);
        assert_eq!(f.pattern.count_selected_notes(), 2);
    }

    #[test]
    fn test_add_chord() {
        let f = fixture();
        assert!(f.pattern.add_chord(ChordQuality::Minor, 0, 96, 57, 100));
        assert_eq!(f.pattern.minmax_notes(), Some((57, 64)));
        assert_eq!(f.pattern.note_count(), 3);
    }

    #[test]
    fn test_set_length_clamps() {
        let f = fixture();
        assert!(f.pattern.set_length(10, false));
        assert_eq!(f.pattern.length(), 48);
        assert!(!f.pattern.set_length(0, false));
        assert_eq!(f.pattern.length(), 48);
        assert!(f.pattern.apply_length(3, 4, 2));
        assert_eq!(f.pattern.length(), 1152);
        assert_eq!(f.pattern.measures(), 2);
    }

    #[test]
    fn test_set_length_prunes_events() {
        let f = fixture();
        f.pattern.add_note(0, 48, 60, false, 100);
        f.pattern.add_note(500, 48, 62, false, 100);
        f.pattern.set_length(192, false);
        assert_eq!(note_ons(&f.pattern), vec![(0, 60)]);
    }

    #[test]
    fn test_change_ppqn() {
        let f = fixture();
        f.pattern.add_note(96, 96, 60, false, 100);
        assert!(f.pattern.change_ppqn(96).unwrap());
        assert_eq!(f.pattern.length(), 384);
        assert_eq!(note_ons(&f.pattern), vec![(48, 60)]);
        assert!(f.pattern.change_ppqn(0).is_err());
    }

    #[test]
    fn test_apply_song_transpose() {
        let f = fixture();
        f.pattern.add_note(0, 96, 60, false, 100);
        assert!(!f.pattern.apply_song_transpose());
        f.transport.set_transpose(-2);
        assert!(f.pattern.apply_song_transpose());
        assert_eq!(note_ons(&f.pattern), vec![(0, 58)]);
        assert!(f.pattern.pop_undo());
        assert_eq!(note_ons(&f.pattern), vec![(0, 60)]);
    }

    #[test]
    fn test_metadata_and_dirty_flags() {
        let f = fixture();
        f.pattern.set_name("  ");
        assert_eq!(f.pattern.name(), "Untitled");
        f.pattern.set_name("Bass");
        assert_eq!(f.pattern.name(), "Bass");
        assert!(f.pattern.is_dirty_names());
        assert!(!f.pattern.is_dirty_names());

        f.pattern.set_channel(None);
        assert_eq!(f.pattern.channel(), None);
        assert!(f.pattern.is_dirty_edit());
        assert!(!f.pattern.is_dirty_edit());
        assert!(f.pattern.is_dirty_main());
    }

    #[test]
    fn test_free_channel_uses_event_channel() {
        let f = fixture();
        f.pattern.set_channel(None);
        f.pattern.add_event(EventRecord::control_change(0, 7, 100).with_channel(9), false);
        f.pattern.set_playing(true);
        f.pattern.play(10, PlaybackMode::Live, false);
        assert_eq!(f.sink.events()[0].channel, 9);
    }

    #[test]
    fn test_sink_failure_keeps_state() {
        let f = fixture();
        f.pattern.add_note(0, 96, 60, false, 100);
        f.sink.set_offline(true);
        f.pattern.set_playing(true);
        f.pattern.play(200, PlaybackMode::Live, false);
        assert_eq!(f.pattern.last_tick(), 201);
        assert_eq!(f.pattern.event_count(), 2);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let f = fixture();
        f.pattern.set_name("Lead");
        f.pattern.add_note(0, 96, 60, false, 100);
        f.pattern.add_trigger(0, 768, 0, true);
        let snap = f.pattern.snapshot();

        let ctx = f.pattern.context().clone();
        let copy = Pattern::from_snapshot(ctx, snap.clone()).unwrap();
        assert_eq!(copy.snapshot(), snap);
        assert_eq!(copy.events().linked(0).unwrap().timestamp, 96);

        let mut bad = snap;
        bad.length = 0;
        assert!(copy.load_snapshot(bad).is_err());
        assert_eq!(copy.name(), "Lead");
    }
}
