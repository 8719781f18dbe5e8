//! Sorted event container with note linking, selection and bulk edits
//!
//! Events are kept ordered by `(timestamp, rank)`. Note-on/note-off pairs
//! are linked by index; every operation that reorders or removes events
//! remaps those indices so a link always points at its partner.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::event::{EventClass, EventRecord, MAX_DATA, Pulse};
use crate::scales::ScaleMode;

/// What `select_events` and `select_note_events` do to matching events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectAction {
    Select,
    Unselect,
    /// Flip each matching event in range
    Toggle,
    /// Flip every event of the class, ignoring the tick range
    Invert,
    /// Count what would be selected without changing anything
    Selecting,
}

/// Outcome of a linking pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub linked: usize,
    /// Note-ons left without a partner
    pub unlinked: usize,
    /// Events dropped for lying past the pattern length
    pub pruned: usize,
}

/// Bounding box of the current selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionBox {
    pub tick_s: Pulse,
    pub tick_f: Pulse,
    pub note_l: u8,
    pub note_h: u8,
}

/// How a drawing cursor should render one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteDraw {
    Linked,
    NoteOn,
    NoteOff,
    Tempo,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteInfo {
    pub start: Pulse,
    pub finish: Pulse,
    pub note: u8,
    pub velocity: u8,
    pub selected: bool,
    pub draw: NoteDraw,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventList {
    events: Vec<EventRecord>,
    /// Loop length used for wrapping edits; 0 disables wrapping and pruning
    length: Pulse,
}

impl EventList {
    pub fn new(length: Pulse) -> Self {
        Self {
            events: Vec::new(),
            length: length.max(0),
        }
    }

    pub fn length(&self) -> Pulse {
        self.length
    }

    pub fn set_length(&mut self, length: Pulse) {
        self.length = length.max(0);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn get(&self, index: usize) -> Option<&EventRecord> {
        self.events.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EventRecord> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[EventRecord] {
        &self.events
    }

    /// Partner of the event at `index`
    pub fn linked(&self, index: usize) -> Option<&EventRecord> {
        self.events.get(index)?.link.and_then(|l| self.events.get(l))
    }

    /// Wrap a timestamp into the loop. A note-off landing exactly on 0 is
    /// pushed to `length` so the note keeps a non-zero duration.
    pub fn wrap(&self, tick: Pulse, is_note_off: bool) -> Pulse {
        if self.length <= 0 {
            return tick.max(0);
        }
        let wrapped = tick.rem_euclid(self.length);
        if is_note_off && wrapped == 0 {
            self.length
        } else {
            wrapped
        }
    }

    // ------------------------------------------------------------------
    // Insertion and ordering
    // ------------------------------------------------------------------

    /// Insert keeping sort order. Only a negative timestamp is refused.
    pub fn add(&mut self, mut event: EventRecord) -> bool {
        if event.timestamp < 0 {
            warn!(tick = event.timestamp, "Refusing event with negative timestamp");
            return false;
        }
        event.link = None;
        event.marked = false;
        self.insert_sorted(event);
        true
    }

    fn insert_sorted(&mut self, event: EventRecord) -> usize {
        let key = event.sort_key();
        let pos = self.events.partition_point(|e| e.sort_key() <= key);
        for e in &mut self.events {
            if let Some(l) = e.link.as_mut() {
                if *l >= pos {
                    *l += 1;
                }
            }
        }
        self.events.insert(pos, event);
        pos
    }

    /// Unsorted bulk insertion. The list is sorted and linked when the
    /// guard is dropped; the guard's borrow keeps anyone from walking the
    /// list in between.
    pub fn bulk_append(&mut self) -> BulkAppend<'_> {
        BulkAppend { list: self, appended: 0 }
    }

    fn is_sorted(&self) -> bool {
        self.events.windows(2).all(|w| w[0].sort_key() <= w[1].sort_key())
    }

    /// Stable sort that carries links along with their events
    fn sort(&mut self) {
        if self.is_sorted() {
            return;
        }
        let n = self.events.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| self.events[i].sort_key());
        let mut new_pos = vec![0usize; n];
        for (new, &old) in order.iter().enumerate() {
            new_pos[old] = new;
        }
        for e in &mut self.events {
            e.link = e.link.map(|l| new_pos[l]);
        }
        // Stable on identical keys, so this reproduces `order`
        self.events.sort_by_key(|e| e.sort_key());
    }

    // ------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------

    /// Re-sort, clear every link, and pair each note-on with the nearest
    /// following unlinked note-off of the same note and channel, wrapping
    /// around to the start of the loop. Events past the loop length are
    /// dropped. Running it twice gives the same result.
    pub fn verify_and_link(&mut self) -> LinkStats {
        for e in &mut self.events {
            e.link = None;
            e.marked = false;
        }
        self.sort();
        let mut stats = LinkStats::default();

        if self.length > 0 {
            let length = self.length;
            let mut pruned = 0;
            for e in &mut self.events {
                if e.timestamp > length {
                    e.marked = true;
                    pruned += 1;
                }
            }
            if pruned > 0 {
                stats.pruned = self.remove_marked();
                debug!(pruned = stats.pruned, "Pruned events past pattern length");
            }
        }

        stats.linked = self.link_pass();
        stats.unlinked = self.unlinked_note_ons();
        if stats.unlinked > 0 {
            warn!(count = stats.unlinked, "Note-on events left unlinked");
        }
        stats
    }

    /// Link only note-ons that have no partner yet, leaving existing pairs
    /// alone. Used after a live note-off arrives.
    pub fn link_new(&mut self) -> usize {
        self.sort();
        self.link_pass()
    }

    fn link_pass(&mut self) -> usize {
        let n = self.events.len();
        let mut linked = 0;
        for on in 0..n {
            if !self.events[on].is_note_on() || self.events[on].link.is_some() {
                continue;
            }
            let partner = (on + 1..n)
                .chain(0..on)
                .find(|&off| self.can_link(on, off));
            if let Some(off) = partner {
                self.events[on].link = Some(off);
                self.events[off].link = Some(on);
                linked += 1;
            }
        }
        linked
    }

    fn can_link(&self, on: usize, off: usize) -> bool {
        let (a, b) = (&self.events[on], &self.events[off]);
        b.is_note_off() && b.link.is_none() && b.channel == a.channel && b.note() == a.note()
    }

    fn unlinked_note_ons(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.is_note_on() && e.link.is_none())
            .count()
    }

    /// Duration of the note starting at `on`, wrap-aware
    fn note_duration(&self, on: usize) -> Option<Pulse> {
        let off = self.events[on].link?;
        let (t_on, t_off) = (self.events[on].timestamp, self.events[off].timestamp);
        Some(if t_off >= t_on { t_off - t_on } else { t_off + self.length - t_on })
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Drop every marked event, remapping surviving links
    pub fn remove_marked(&mut self) -> usize {
        let n = self.events.len();
        let mut new_index = vec![None; n];
        let mut next = 0;
        for (i, e) in self.events.iter().enumerate() {
            if !e.marked {
                new_index[i] = Some(next);
                next += 1;
            }
        }
        let removed = n - next;
        if removed == 0 {
            return 0;
        }
        self.events.retain(|e| !e.marked);
        for e in &mut self.events {
            e.link = e.link.and_then(|l| new_index[l]);
        }
        removed
    }

    fn mark_with_partner(&mut self, index: usize) {
        self.events[index].marked = true;
        if let Some(l) = self.events[index].link {
            self.events[l].marked = true;
        }
    }

    /// Remove selected events along with the partners of selected notes
    pub fn remove_selected(&mut self) -> bool {
        for i in 0..self.events.len() {
            if self.events[i].selected {
                self.mark_with_partner(i);
            }
        }
        self.remove_marked() > 0
    }

    /// Remove painted events at `tick`. For notes, the painted note-on and
    /// its note-off go together; other events are matched by class.
    pub fn remove_painted_at(&mut self, tick: Pulse, class: EventClass) -> usize {
        for i in 0..self.events.len() {
            let e = &self.events[i];
            if e.timestamp == tick && e.painted && e.class() == class {
                self.mark_with_partner(i);
            }
        }
        self.remove_marked()
    }

    pub fn unpaint_all(&mut self) {
        for e in &mut self.events {
            e.painted = false;
        }
    }

    /// Remove one event equal in content to `event`, with its partner
    pub fn remove_event(&mut self, event: &EventRecord) -> bool {
        match self.events.iter().position(|e| e == event) {
            Some(i) => {
                self.mark_with_partner(i);
                self.remove_marked() > 0
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    fn apply(action: SelectAction, e: &mut EventRecord) -> bool {
        match action {
            SelectAction::Select => {
                e.selected = true;
                true
            }
            SelectAction::Unselect => {
                let was = e.selected;
                e.selected = false;
                was
            }
            SelectAction::Toggle | SelectAction::Invert => {
                e.selected = !e.selected;
                true
            }
            SelectAction::Selecting => true,
        }
    }

    /// Apply `action` to events of `class` (and controller `cc` for control
    /// changes) with timestamps in `[tick_s, tick_f]`. Returns the count.
    pub fn select_events(
        &mut self,
        tick_s: Pulse,
        tick_f: Pulse,
        class: EventClass,
        cc: u8,
        action: SelectAction,
    ) -> usize {
        let mut count = 0;
        for e in &mut self.events {
            if action != SelectAction::Invert {
                if e.timestamp > tick_f {
                    break;
                }
                if e.timestamp < tick_s {
                    continue;
                }
            }
            if e.kind.matches(class, cc) && Self::apply(action, e) {
                count += 1;
            }
        }
        count
    }

    /// Box-select notes: a linked pair is hit when its sounding interval
    /// overlaps `[tick_s, tick_f]` and its pitch is in `[note_l, note_h]`.
    /// Both halves of the pair change together. Returns the count of notes.
    pub fn select_note_events(
        &mut self,
        tick_s: Pulse,
        note_h: u8,
        tick_f: Pulse,
        note_l: u8,
        action: SelectAction,
    ) -> usize {
        let mut count = 0;
        for i in 0..self.events.len() {
            let e = &self.events[i];
            let Some(note) = e.note() else { continue };
            if note < note_l || note > note_h {
                continue;
            }
            let hit = match (e.is_note_on(), e.link) {
                (true, Some(l)) => {
                    let (on, off) = (e.timestamp, self.events[l].timestamp);
                    if on <= off {
                        on <= tick_f && off >= tick_s
                    } else {
                        on <= tick_f || off >= tick_s
                    }
                }
                // Linked note-offs are handled through their note-on
                (false, Some(_)) if e.is_note_off() => false,
                _ => e.timestamp >= tick_s && e.timestamp <= tick_f,
            };
            if !hit {
                continue;
            }
            if Self::apply(action, &mut self.events[i]) {
                count += 1;
            }
            if action != SelectAction::Selecting {
                if let Some(l) = self.events[i].link {
                    self.events[l].selected = self.events[i].selected;
                }
            }
        }
        count
    }

    /// Select the event at `index` and its partner
    pub fn select_pair(&mut self, index: usize) -> bool {
        let Some(e) = self.events.get_mut(index) else {
            return false;
        };
        e.selected = true;
        if let Some(l) = e.link {
            self.events[l].selected = true;
        }
        true
    }

    pub fn select_all(&mut self) {
        for e in &mut self.events {
            e.selected = true;
        }
    }

    pub fn unselect_all(&mut self) {
        for e in &mut self.events {
            e.selected = false;
        }
    }

    pub fn any_selected(&self) -> bool {
        self.events.iter().any(|e| e.selected)
    }

    pub fn count_selected_notes(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.selected && e.is_note_on())
            .count()
    }

    pub fn count_selected_events(&self, class: EventClass, cc: u8) -> usize {
        self.events
            .iter()
            .filter(|e| e.selected && e.kind.matches(class, cc))
            .count()
    }

    pub fn selected_box(&self) -> Option<SelectionBox> {
        let mut bx: Option<SelectionBox> = None;
        for e in self.events.iter().filter(|e| e.selected) {
            let note = e.note().unwrap_or(0);
            let b = bx.get_or_insert(SelectionBox {
                tick_s: e.timestamp,
                tick_f: e.timestamp,
                note_l: note,
                note_h: note,
            });
            b.tick_s = b.tick_s.min(e.timestamp);
            b.tick_f = b.tick_f.max(e.timestamp);
            if e.is_note() {
                b.note_l = b.note_l.min(note);
                b.note_h = b.note_h.max(note);
            }
        }
        bx
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn note_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_note_on()).count()
    }

    /// Lowest and highest pitch used by any note event
    pub fn minmax_notes(&self) -> Option<(u8, u8)> {
        let notes = self.events.iter().filter_map(|e| e.note());
        notes.fold(None, |acc, n| match acc {
            None => Some((n, n)),
            Some((lo, hi)) => Some((lo.min(n), hi.max(n))),
        })
    }

    pub fn max_timestamp(&self) -> Pulse {
        self.events.last().map_or(0, |e| e.timestamp)
    }

    /// Find the note of pitch `note` sounding at `position`, returning its
    /// on/off ticks
    pub fn intersect_notes(&self, position: Pulse, note: u8) -> Option<(Pulse, Pulse)> {
        self.events.iter().enumerate().find_map(|(i, e)| {
            if !e.is_note_on() || e.note() != Some(note) {
                return None;
            }
            let off = self.linked(i)?.timestamp;
            let on = e.timestamp;
            let inside = if on <= off {
                position >= on && position <= off
            } else {
                position >= on || position <= off
            };
            inside.then_some((on, off))
        })
    }

    /// First event of `class` with a timestamp in `[start, end]`
    pub fn intersect_events(&self, start: Pulse, end: Pulse, class: EventClass) -> Option<Pulse> {
        self.events
            .iter()
            .take_while(|e| e.timestamp <= end)
            .find(|e| e.timestamp >= start && e.class() == class)
            .map(|e| e.timestamp)
    }

    /// Caller-owned drawing cursor over notes and tempo markers.
    /// Linked note-offs are folded into their note-on.
    pub fn note_infos(&self) -> impl Iterator<Item = NoteInfo> + '_ {
        self.events.iter().enumerate().filter_map(move |(i, e)| {
            let velocity = e.kind.velocity().unwrap_or(0);
            let info = |start, finish, draw| NoteInfo {
                start,
                finish,
                note: e.note().unwrap_or(0),
                velocity,
                selected: e.selected,
                draw,
            };
            if e.is_tempo() {
                return Some(info(e.timestamp, e.timestamp, NoteDraw::Tempo));
            }
            if e.is_note_on() {
                return Some(match self.linked(i) {
                    Some(off) => info(e.timestamp, off.timestamp, NoteDraw::Linked),
                    None => info(e.timestamp, e.timestamp, NoteDraw::NoteOn),
                });
            }
            if e.is_note_off() && e.link.is_none() {
                return Some(info(e.timestamp, e.timestamp, NoteDraw::NoteOff));
            }
            None
        })
    }

    // ------------------------------------------------------------------
    // Transforms
    // ------------------------------------------------------------------

    /// Shift selected events in time and pitch. Pitches that would leave
    /// 0..=127 leave that event untouched.
    pub fn move_selected(&mut self, delta_tick: Pulse, delta_note: i32) -> bool {
        if self.length <= 0 {
            return false;
        }
        let mut moved = false;
        for i in 0..self.events.len() {
            if !self.events[i].selected {
                continue;
            }
            let e = &self.events[i];
            let new_note = match e.note() {
                Some(n) => {
                    let shifted = n as i32 + delta_note;
                    if !(0..=MAX_DATA as i32).contains(&shifted) {
                        continue;
                    }
                    Some(shifted as u8)
                }
                None => None,
            };
            let ts = self.wrap(e.timestamp + delta_tick, e.is_note_off());
            let e = &mut self.events[i];
            if let Some(n) = new_note {
                e.kind.set_note(n);
            }
            e.timestamp = ts;
            moved = true;
        }
        if moved {
            self.sort();
        }
        moved
    }

    /// Scale the selection's span by `delta_tick`, anchored at its first
    /// event
    pub fn stretch_selected(&mut self, delta_tick: Pulse) -> bool {
        let mut selected = self.events.iter().filter(|e| e.selected).map(|e| e.timestamp);
        let Some(first) = selected.next() else {
            return false;
        };
        let last = selected.fold(first, Pulse::max);
        let old_len = last - first;
        let new_len = old_len + delta_tick;
        if old_len <= 0 || new_len <= 1 {
            return false;
        }
        let ratio = new_len as f64 / old_len as f64;
        for i in 0..self.events.len() {
            if !self.events[i].selected {
                continue;
            }
            let e = &self.events[i];
            let stretched = first + ((e.timestamp - first) as f64 * ratio).round() as Pulse;
            let ts = self.wrap(stretched, e.is_note_off());
            self.events[i].timestamp = ts;
        }
        self.sort();
        true
    }

    /// Lengthen or shorten selected notes by moving their note-offs.
    /// Notes that would drop below one pulse or exceed the loop are skipped.
    pub fn grow_selected(&mut self, delta: Pulse) -> bool {
        if self.length <= 0 {
            return false;
        }
        let mut grown = false;
        for on in 0..self.events.len() {
            let e = &self.events[on];
            if !e.selected || !e.is_note_on() {
                continue;
            }
            let (Some(off), Some(duration)) = (e.link, self.note_duration(on)) else {
                continue;
            };
            let new_duration = duration + delta;
            if new_duration < 1 || new_duration >= self.length {
                continue;
            }
            let ts = self.wrap(e.timestamp + new_duration, true);
            self.events[off].timestamp = ts;
            grown = true;
        }
        if grown {
            self.sort();
        }
        grown
    }

    /// Round matching events to the nearest multiple of `snap / divide`,
    /// ties going to the earlier grid line. Applies to the selection if
    /// anything is selected, otherwise to every matching event. With
    /// `fix_links`, a moved note-on drags its note-off by the same amount.
    pub fn quantize_events(
        &mut self,
        class: EventClass,
        cc: u8,
        snap: Pulse,
        divide: i32,
        fix_links: bool,
    ) -> bool {
        if snap <= 0 || divide <= 0 || self.length <= 0 {
            return false;
        }
        let grid = snap / divide as Pulse;
        if grid <= 0 {
            return false;
        }
        let only_selected = self.any_selected();
        let n = self.events.len();
        let mut targets = vec![None; n];
        for (i, e) in self.events.iter().enumerate() {
            if !e.kind.matches(class, cc) || (only_selected && !e.selected) {
                continue;
            }
            let rem = e.timestamp.rem_euclid(grid);
            let rounded = if rem * 2 <= grid {
                e.timestamp - rem
            } else {
                e.timestamp + grid - rem
            };
            let q = self.wrap(rounded, e.is_note_off());
            if q != e.timestamp {
                targets[i] = Some(q);
            }
        }

        let mut changed = false;
        for i in 0..n {
            let Some(q) = targets[i] else { continue };
            if fix_links && self.events[i].is_note_on() {
                if let (Some(off), Some(duration)) = (self.events[i].link, self.note_duration(i)) {
                    if targets[off].is_none() {
                        let ts = self.wrap(q + duration.max(1), true);
                        self.events[off].timestamp = ts;
                    }
                }
            }
            self.events[i].timestamp = q;
            changed = true;
        }
        if changed {
            self.verify_and_link();
        }
        changed
    }

    /// Move selected note events by `steps` degrees of `scale`. Notes that
    /// would leave 0..=127 are left alone.
    pub fn transpose_selected(&mut self, steps: i32, scale: ScaleMode) -> bool {
        if steps == 0 {
            return false;
        }
        let mut changed = false;
        for e in self.events.iter_mut().filter(|e| e.selected) {
            let Some(note) = e.note() else { continue };
            if let Some(n) = scale.transpose(note, steps) {
                e.kind.set_note(n);
                changed = true;
            }
        }
        if changed {
            self.verify_and_link();
        }
        changed
    }

    /// Copy of the selected events, rebased so the earliest sits at tick 0
    pub fn copy_selected(&self) -> EventList {
        let mut out = EventList::new(0);
        let Some(earliest) = self.events.iter().filter(|e| e.selected).map(|e| e.timestamp).min() else {
            return out;
        };
        {
            let mut bulk = out.bulk_append();
            for e in self.events.iter().filter(|e| e.selected) {
                let mut copy = e.clone();
                copy.timestamp -= earliest;
                copy.painted = false;
                bulk.append(copy);
            }
        }
        out
    }

    /// Paste `buffer` so its earliest event lands on `tick` and its lowest
    /// pitch on `note`. Existing events are unselected and the pasted ones
    /// selected. Pasted notes that would leave 0..=127 are dropped.
    pub fn paste_selected(&mut self, buffer: &EventList, tick: Pulse, note: u8) -> bool {
        let Some(earliest) = buffer.events.iter().map(|e| e.timestamp).min() else {
            return false;
        };
        let note_delta = buffer
            .minmax_notes()
            .map_or(0, |(low, _)| note as i32 - low as i32);
        self.unselect_all();
        let mut pasted = 0;
        for e in &buffer.events {
            let mut copy = e.clone();
            if let Some(n) = e.note() {
                let shifted = n as i32 + note_delta;
                if !(0..=MAX_DATA as i32).contains(&shifted) {
                    continue;
                }
                copy.kind.set_note(shifted as u8);
            }
            copy.timestamp = self.wrap(e.timestamp - earliest + tick, e.is_note_off());
            copy.selected = true;
            copy.painted = false;
            copy.link = None;
            copy.marked = false;
            self.insert_sorted(copy);
            pasted += 1;
        }
        if pasted > 0 {
            self.verify_and_link();
        }
        pasted > 0
    }

    /// Move notes starting within half a snap of the loop end to tick 0,
    /// keeping their durations
    pub fn edge_fix(&mut self, snap: Pulse) -> bool {
        if self.length <= 0 || snap <= 0 {
            return false;
        }
        let threshold = self.length - snap / 2;
        let mut fixed = false;
        for on in 0..self.events.len() {
            let e = &self.events[on];
            if !e.is_note_on() || e.timestamp < threshold {
                continue;
            }
            let duration = self.note_duration(on);
            let link = e.link;
            self.events[on].timestamp = 0;
            if let (Some(off), Some(d)) = (link, duration) {
                let ts = self.wrap(d.max(1), true);
                self.events[off].timestamp = ts;
            }
            fixed = true;
        }
        if fixed {
            self.verify_and_link();
        }
        fixed
    }

    /// Jitter the value byte of selected events of `class` by up to
    /// `range` in either direction
    pub fn randomize_selected(&mut self, class: EventClass, cc: u8, range: u8) -> bool {
        if range == 0 {
            return false;
        }
        let mut changed = false;
        let spread = range as i32;
        for e in self.events.iter_mut().filter(|e| e.selected && e.kind.matches(class, cc)) {
            let Some(value) = e.kind.value() else { continue };
            let jitter = fastrand::i32(-spread..=spread);
            let v = (value as i32 + jitter).clamp(0, MAX_DATA as i32) as u8;
            if v != value {
                e.kind.set_value(v);
                changed = true;
            }
        }
        changed
    }

    /// Linear ramp of the value byte across `[tick_s, tick_f]`, from
    /// `data_s` at the start to `data_f` at the end. Restricted to the
    /// selection when anything in range is selected.
    pub fn change_event_data_range(
        &mut self,
        tick_s: Pulse,
        tick_f: Pulse,
        class: EventClass,
        cc: u8,
        data_s: u8,
        data_f: u8,
    ) -> bool {
        if tick_f < tick_s {
            return false;
        }
        let in_range = |e: &EventRecord| {
            e.timestamp >= tick_s && e.timestamp <= tick_f && e.kind.matches(class, cc)
        };
        let have_selection = self.events.iter().any(|e| e.selected && in_range(e));
        let span = (tick_f - tick_s).max(1) as f64;
        let mut changed = false;
        for e in &mut self.events {
            if !in_range(e) || (have_selection && !e.selected) {
                continue;
            }
            let frac = (e.timestamp - tick_s) as f64 / span;
            let v = data_s as f64 + (data_f as f64 - data_s as f64) * frac;
            changed |= e.kind.set_value(v.round().clamp(0.0, MAX_DATA as f64) as u8);
        }
        changed
    }

    /// Rescale every timestamp (and the length) for a new PPQN
    pub fn rescale(&mut self, old_ppqn: u32, new_ppqn: u32) -> bool {
        if old_ppqn == 0 || new_ppqn == 0 || old_ppqn == new_ppqn {
            return false;
        }
        let scale = |t: Pulse| t * new_ppqn as Pulse / old_ppqn as Pulse;
        for e in &mut self.events {
            e.timestamp = scale(e.timestamp);
        }
        self.length = scale(self.length);
        self.verify_and_link();
        true
    }
}

/// Guard returned by [`EventList::bulk_append`]
pub struct BulkAppend<'a> {
    list: &'a mut EventList,
    appended: usize,
}

impl BulkAppend<'_> {
    pub fn append(&mut self, mut event: EventRecord) {
        event.link = None;
        event.marked = false;
        self.list.events.push(event);
        self.appended += 1;
    }
}

impl Drop for BulkAppend<'_> {
    fn drop(&mut self) {
        if self.appended > 0 {
            let stats = self.list.verify_and_link();
            debug!(appended = self.appended, linked = stats.linked, "Bulk append finished");
        }
    }
}
