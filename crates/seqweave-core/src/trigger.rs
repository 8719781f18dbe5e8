//! Song-mode triggers: the ranges of song time where a pattern plays
//!
//! A trigger covers the inclusive range `[tick_start, tick_end]`. Its
//! `offset` is an absolute phase: pattern tick `t` sounds at song tick
//! `offset + t + k * length`, so cutting or resizing a trigger never moves
//! the music underneath it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::Pulse;
use crate::undo::UndoRedoStack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub tick_start: Pulse,
    /// Inclusive
    pub tick_end: Pulse,
    pub offset: Pulse,
    #[serde(skip)]
    pub selected: bool,
}

impl Trigger {
    pub fn new(tick_start: Pulse, tick_end: Pulse, offset: Pulse) -> Self {
        Self {
            tick_start,
            tick_end,
            offset,
            selected: false,
        }
    }

    pub fn length(&self) -> Pulse {
        self.tick_end - self.tick_start + 1
    }

    pub fn contains(&self, tick: Pulse) -> bool {
        tick >= self.tick_start && tick <= self.tick_end
    }
}

/// Which part of a selected trigger a drag moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEdit {
    Move,
    GrowStart,
    GrowEnd,
}

/// Result of scanning triggers over one playback interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerPlayback {
    /// Whether the pattern should be playing over the interval
    pub armed: bool,
    /// Playable sub-interval, half-open
    pub start_tick: Pulse,
    pub end_tick: Pulse,
    /// Phase of the governing trigger
    pub offset: Pulse,
    /// The pattern just became armed; sustained notes may need resuming
    pub resume: bool,
    /// Disarm after playing up to `end_tick`
    pub turn_off: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TriggerList {
    triggers: Vec<Trigger>,
    /// Pattern length, used to normalize offsets and snap splits
    length: Pulse,
    clipboard: Option<Trigger>,
    history: UndoRedoStack<Vec<Trigger>>,
}

impl TriggerList {
    pub fn new(length: Pulse) -> Self {
        Self {
            length: length.max(1),
            ..Default::default()
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Trigger> {
        self.triggers.iter()
    }

    pub fn as_slice(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn clear(&mut self) {
        self.triggers.clear();
    }

    pub fn set_length(&mut self, length: Pulse) {
        self.length = length.max(1);
    }

    /// Offset folded into `[0, length)`
    pub fn adjust_offset(&self, offset: Pulse) -> Pulse {
        offset.rem_euclid(self.length)
    }

    /// Replace the whole list, e.g. from a snapshot. Overlaps are resolved
    /// in favor of later triggers.
    pub fn replace(&mut self, triggers: impl IntoIterator<Item = Trigger>) {
        self.triggers.clear();
        for t in triggers {
            if t.tick_end >= t.tick_start {
                self.add(t.tick_start, t.length(), t.offset, false);
            }
        }
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    /// Decide the pattern's armed state over `[start_tick, end_tick)`.
    ///
    /// `playing` is the pattern's current state and `last_tick` its play
    /// cursor. A trigger that ends before the last tick of the interval
    /// counts as ended; one that starts on or before it counts as started.
    pub fn play(&self, start_tick: Pulse, end_tick: Pulse, playing: bool, last_tick: Pulse) -> TriggerPlayback {
        let last = end_tick - 1;
        let mut result = TriggerPlayback {
            armed: playing,
            start_tick,
            end_tick,
            ..Default::default()
        };
        let mut state = false;
        let mut trigger_tick = 0;
        for t in &self.triggers {
            if t.tick_start <= last {
                state = true;
                trigger_tick = t.tick_start;
                result.offset = t.offset;
            }
            if t.tick_end < last {
                state = false;
                trigger_tick = t.tick_end;
                result.offset = t.offset;
            }
            if t.tick_start > last || t.tick_end > last {
                break;
            }
        }

        if state != playing {
            if state {
                result.start_tick = trigger_tick.max(last_tick).max(start_tick);
                result.armed = true;
                result.resume = true;
            } else {
                result.end_tick = trigger_tick + 1;
                result.turn_off = true;
            }
        } else if self.triggers.is_empty() && playing {
            result.turn_off = true;
        }
        result
    }

    /// Whether a trigger covers `tick`
    pub fn get_state(&self, tick: Pulse) -> bool {
        self.intersect(tick)
    }

    // ------------------------------------------------------------------
    // Structural edits
    // ------------------------------------------------------------------

    /// Insert `[tick, tick + len)`. The new trigger wins: triggers inside it
    /// are removed and overlapping ones are cut back.
    pub fn add(&mut self, tick: Pulse, len: Pulse, offset: Pulse, fix_offset: bool) -> bool {
        if len <= 0 || tick < 0 {
            return false;
        }
        let end = tick + len - 1;
        let offset = if fix_offset { self.adjust_offset(offset) } else { offset };
        let mut kept = Vec::with_capacity(self.triggers.len() + 2);
        for t in self.triggers.drain(..) {
            if t.tick_end < tick || t.tick_start > end {
                kept.push(t);
                continue;
            }
            if t.tick_start < tick {
                kept.push(Trigger { tick_end: tick - 1, ..t });
            }
            if t.tick_end > end {
                kept.push(Trigger { tick_start: end + 1, ..t });
            }
        }
        kept.push(Trigger::new(tick, end, offset));
        kept.sort_by_key(|t| t.tick_start);
        self.triggers = kept;
        true
    }

    /// Extend the trigger holding `tick_from` so it covers `min_len` ticks
    /// from `tick_to`, creating it if needed
    pub fn grow_trigger(&mut self, tick_from: Pulse, tick_to: Pulse, min_len: Pulse) -> bool {
        let reach = tick_to + min_len.max(1) - 1;
        let found = self.triggers.iter().find(|t| t.contains(tick_from)).copied();
        match found {
            Some(t) => {
                let start = t.tick_start.min(tick_to);
                let end = t.tick_end.max(reach);
                if start == t.tick_start && end == t.tick_end {
                    return false;
                }
                self.add(start, end - start + 1, t.offset, false)
            }
            None => {
                let end = reach.max(tick_from);
                self.add(tick_from, end - tick_from + 1, 0, false)
            }
        }
    }

    pub fn intersect(&self, position: Pulse) -> bool {
        self.intersect_range(position).is_some()
    }

    /// Bounds of the trigger under `position`
    pub fn intersect_range(&self, position: Pulse) -> Option<(Pulse, Pulse)> {
        self.triggers
            .iter()
            .find(|t| t.contains(position))
            .map(|t| (t.tick_start, t.tick_end))
    }

    /// Cut the trigger holding `tick` at exactly `tick`, giving
    /// `[start, tick)` and `[tick, end]`
    pub fn exact_split(&mut self, tick: Pulse) -> bool {
        let Some(i) = self
            .triggers
            .iter()
            .position(|t| t.tick_start < tick && tick <= t.tick_end)
        else {
            return false;
        };
        let t = self.triggers[i];
        self.triggers[i].tick_end = tick - 1;
        self.triggers.insert(i + 1, Trigger::new(tick, t.tick_end, t.offset));
        debug!(tick, "Split trigger");
        true
    }

    /// Cut at the pattern-length boundary nearest `tick`, counted from the
    /// trigger's start
    pub fn split(&mut self, tick: Pulse) -> bool {
        let Some(t) = self.triggers.iter().find(|t| t.contains(tick)).copied() else {
            return false;
        };
        let rel = tick - t.tick_start;
        let rem = rel.rem_euclid(self.length);
        let snapped = if rem * 2 <= self.length { rel - rem } else { rel + self.length - rem };
        self.exact_split(t.tick_start + snapped)
    }

    /// Cut the trigger holding `tick` in half
    pub fn half_split(&mut self, tick: Pulse) -> bool {
        let Some(t) = self.triggers.iter().find(|t| t.contains(tick)).copied() else {
            return false;
        };
        self.exact_split(t.tick_start + t.length() / 2)
    }

    /// Drag selected triggers by `delta`, clamped so they never overlap a
    /// neighbor. Moving a whole trigger carries its content along.
    pub fn move_selected(&mut self, delta: Pulse, edit: TriggerEdit) -> bool {
        if delta == 0 {
            return false;
        }
        let n = self.triggers.len();
        let order: Vec<usize> = if delta > 0 { (0..n).rev().collect() } else { (0..n).collect() };
        let mut moved = false;
        for i in order {
            if !self.triggers[i].selected {
                continue;
            }
            let min_start = if i > 0 { self.triggers[i - 1].tick_end + 1 } else { 0 };
            let max_end = self.triggers.get(i + 1).map_or(Pulse::MAX, |t| t.tick_start - 1);
            let t = &mut self.triggers[i];
            match edit {
                TriggerEdit::Move => {
                    let d = delta.clamp(min_start - t.tick_start, max_end - t.tick_end);
                    if d != 0 {
                        t.tick_start += d;
                        t.tick_end += d;
                        t.offset += d;
                        moved = true;
                    }
                }
                TriggerEdit::GrowStart => {
                    let start = (t.tick_start + delta).clamp(min_start, t.tick_end);
                    moved |= start != t.tick_start;
                    t.tick_start = start;
                }
                TriggerEdit::GrowEnd => {
                    let end = (t.tick_end + delta).clamp(t.tick_start, max_end);
                    moved |= end != t.tick_end;
                    t.tick_end = end;
                }
            }
        }
        if moved {
            let len = self.length;
            for t in &mut self.triggers {
                t.offset = t.offset.rem_euclid(len);
            }
        }
        moved
    }

    /// Slide the content of selected triggers by `delta` without moving
    /// their bounds
    pub fn offset_selected(&mut self, delta: Pulse) -> bool {
        let len = self.length;
        let mut changed = false;
        for t in self.triggers.iter_mut().filter(|t| t.selected) {
            t.offset = (t.offset + delta).rem_euclid(len);
            changed = true;
        }
        changed
    }

    pub fn remove(&mut self, tick: Pulse) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|t| !t.contains(tick));
        self.triggers.len() != before
    }

    pub fn select(&mut self, tick: Pulse) -> bool {
        self.set_selected(tick, true)
    }

    pub fn unselect(&mut self, tick: Pulse) -> bool {
        self.set_selected(tick, false)
    }

    fn set_selected(&mut self, tick: Pulse, selected: bool) -> bool {
        match self.triggers.iter_mut().find(|t| t.contains(tick)) {
            Some(t) => {
                t.selected = selected;
                true
            }
            None => false,
        }
    }

    pub fn unselect_all(&mut self) {
        for t in &mut self.triggers {
            t.selected = false;
        }
    }

    pub fn any_selected(&self) -> bool {
        self.triggers.iter().any(|t| t.selected)
    }

    pub fn remove_selected(&mut self) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|t| !t.selected);
        self.triggers.len() != before
    }

    /// Hold the first selected trigger for a later `paste`
    pub fn copy_selected(&mut self) -> bool {
        self.clipboard = self.triggers.iter().find(|t| t.selected).copied();
        self.clipboard.is_some()
    }

    /// Paste the held trigger at `tick`, or right after the original when
    /// `tick` is `None`. The content keeps its phase relative to the
    /// trigger start.
    pub fn paste(&mut self, tick: Option<Pulse>) -> bool {
        let Some(held) = self.clipboard else {
            return false;
        };
        let start = tick.unwrap_or(held.tick_end + 1);
        let offset = self.adjust_offset(held.offset + start - held.tick_start);
        let pasted = self.add(start, held.length(), offset, false);
        if pasted && tick.is_none() {
            // Chained pastes land one after another
            self.clipboard = Some(Trigger::new(start, start + held.length() - 1, offset));
        }
        pasted
    }

    /// End tick of the last trigger, or 0
    pub fn maximum(&self) -> Pulse {
        self.triggers.last().map_or(0, |t| t.tick_end)
    }

    /// Refold every offset after the pattern length changes
    pub fn adjust_offsets_to_length(&mut self, new_length: Pulse) {
        self.set_length(new_length);
        let len = self.length;
        for t in &mut self.triggers {
            t.offset = t.offset.rem_euclid(len);
        }
    }

    /// Insert (`insert == true`) or delete `distance` ticks of song time at
    /// `start`, shifting later triggers
    pub fn move_range(&mut self, start: Pulse, distance: Pulse, insert: bool) -> bool {
        if distance <= 0 {
            return false;
        }
        let len = self.length;
        if insert {
            self.exact_split(start);
            for t in self.triggers.iter_mut().filter(|t| t.tick_start >= start) {
                t.tick_start += distance;
                t.tick_end += distance;
                t.offset = (t.offset + distance).rem_euclid(len);
            }
            return true;
        }
        let end = start + distance;
        let mut kept = Vec::with_capacity(self.triggers.len() + 1);
        for t in self.triggers.drain(..) {
            if t.tick_end < start {
                kept.push(t);
            } else if t.tick_start >= end {
                kept.push(Trigger {
                    tick_start: t.tick_start - distance,
                    tick_end: t.tick_end - distance,
                    offset: (t.offset - distance).rem_euclid(len),
                    ..t
                });
            } else {
                if t.tick_start < start {
                    kept.push(Trigger { tick_end: start - 1, ..t });
                }
                if t.tick_end >= end {
                    kept.push(Trigger {
                        tick_start: start,
                        tick_end: t.tick_end - distance,
                        offset: (t.offset - distance).rem_euclid(len),
                        ..t
                    });
                }
            }
        }
        self.triggers = kept;
        true
    }

    /// Duplicate `[start, start + distance)` right after itself, pushing
    /// later triggers out of the way
    pub fn copy_range(&mut self, start: Pulse, distance: Pulse) -> bool {
        if distance <= 0 {
            return false;
        }
        let end = start + distance;
        self.move_range(end, distance, true);
        let copies: Vec<Trigger> = self
            .triggers
            .iter()
            .filter(|t| t.tick_start >= start && t.tick_start < end)
            .copied()
            .collect();
        for t in copies {
            let tail = t.tick_end.min(end - 1);
            self.add(t.tick_start + distance, tail - t.tick_start + 1, t.offset + distance, true);
        }
        true
    }

    pub fn change_ppqn(&mut self, old_ppqn: u32, new_ppqn: u32) -> bool {
        if old_ppqn == 0 || new_ppqn == 0 || old_ppqn == new_ppqn {
            return false;
        }
        let scale = |t: Pulse| t * new_ppqn as Pulse / old_ppqn as Pulse;
        for t in &mut self.triggers {
            t.tick_start = scale(t.tick_start);
            t.tick_end = scale(t.tick_end + 1) - 1;
            t.offset = scale(t.offset);
        }
        // Triggers shorter than one new pulse vanish
        self.triggers.retain(|t| t.tick_end >= t.tick_start);
        self.length = scale(self.length).max(1);
        true
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub fn push_undo(&mut self) {
        self.history.push(&self.triggers);
    }

    pub fn pop_undo(&mut self) -> bool {
        let ok = self.history.undo(&mut self.triggers);
        if ok {
            self.unselect_all();
        }
        ok
    }

    pub fn pop_redo(&mut self) -> bool {
        let ok = self.history.redo(&mut self.triggers);
        if ok {
            self.unselect_all();
        }
        ok
    }
}
