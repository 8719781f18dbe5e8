//! Timestamped MIDI events stored in a pattern

use serde::{Deserialize, Serialize};

/// Time in pulses (ticks). Signed so edit deltas can go negative before wrapping.
pub type Pulse = i64;

pub const MAX_DATA: u8 = 127;
pub const NOTE_COUNT: usize = 128;
pub const CHANNEL_COUNT: u8 = 16;
pub const DEFAULT_NOTE_ON_VELOCITY: u8 = 100;
pub const DEFAULT_NOTE_OFF_VELOCITY: u8 = 64;

const META_TEMPO: u8 = 0x51;

/// Event payload, one variant per MIDI message kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    NoteOff { note: u8, velocity: u8 },
    NoteOn { note: u8, velocity: u8 },
    Aftertouch { note: u8, pressure: u8 },
    ControlChange { controller: u8, value: u8 },
    ProgramChange { program: u8 },
    ChannelPressure { pressure: u8 },
    PitchBend { lsb: u8, msb: u8 },
    /// Set-tempo meta event, microseconds per quarter note
    Tempo { us_per_quarter: u32 },
    /// Any other meta/sysex payload, carried but never sent to a sink
    Meta { meta_type: u8, data: Vec<u8> },
}

/// Payload-free discriminant used for filtering (select, quantize, ramp)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventClass {
    NoteOff,
    NoteOn,
    Aftertouch,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    Tempo,
    Meta,
}

impl EventKind {
    pub fn class(&self) -> EventClass {
        match self {
            Self::NoteOff { .. } => EventClass::NoteOff,
            Self::NoteOn { .. } => EventClass::NoteOn,
            Self::Aftertouch { .. } => EventClass::Aftertouch,
            Self::ControlChange { .. } => EventClass::ControlChange,
            Self::ProgramChange { .. } => EventClass::ProgramChange,
            Self::ChannelPressure { .. } => EventClass::ChannelPressure,
            Self::PitchBend { .. } => EventClass::PitchBend,
            Self::Tempo { .. } => EventClass::Tempo,
            Self::Meta { .. } => EventClass::Meta,
        }
    }

    /// Same-tick ordering: note-offs sort before note-ons so a retriggered
    /// pitch is released before it is struck again.
    pub fn rank(&self) -> u8 {
        match self {
            Self::NoteOff { .. } => 0,
            Self::NoteOn { .. } => 1,
            Self::Aftertouch { .. } | Self::ChannelPressure { .. } | Self::PitchBend { .. } => 2,
            Self::ControlChange { .. } => 3,
            Self::ProgramChange { .. } => 4,
            Self::Tempo { .. } => 5,
            Self::Meta { .. } => 6,
        }
    }

    /// Note number for note-on, note-off and polyphonic aftertouch
    pub fn note(&self) -> Option<u8> {
        match self {
            Self::NoteOff { note, .. } | Self::NoteOn { note, .. } => Some(*note),
            Self::Aftertouch { note, .. } => Some(*note),
            _ => None,
        }
    }

    pub fn set_note(&mut self, new_note: u8) -> bool {
        match self {
            Self::NoteOff { note, .. } | Self::NoteOn { note, .. } | Self::Aftertouch { note, .. } => {
                *note = new_note.min(MAX_DATA);
                true
            }
            _ => false,
        }
    }

    pub fn velocity(&self) -> Option<u8> {
        match self {
            Self::NoteOff { velocity, .. } | Self::NoteOn { velocity, .. } => Some(*velocity),
            _ => None,
        }
    }

    pub fn set_velocity(&mut self, new_velocity: u8) {
        if let Self::NoteOff { velocity, .. } | Self::NoteOn { velocity, .. } = self {
            *velocity = new_velocity.min(MAX_DATA);
        }
    }

    /// The byte an editor treats as "the value": velocity, CC value,
    /// program, pressure, or pitch-bend MSB.
    pub fn value(&self) -> Option<u8> {
        match self {
            Self::NoteOff { velocity, .. } | Self::NoteOn { velocity, .. } => Some(*velocity),
            Self::Aftertouch { pressure, .. } | Self::ChannelPressure { pressure } => Some(*pressure),
            Self::ControlChange { value, .. } => Some(*value),
            Self::ProgramChange { program } => Some(*program),
            Self::PitchBend { msb, .. } => Some(*msb),
            Self::Tempo { .. } | Self::Meta { .. } => None,
        }
    }

    pub fn set_value(&mut self, new_value: u8) -> bool {
        let v = new_value.min(MAX_DATA);
        match self {
            Self::NoteOff { velocity, .. } | Self::NoteOn { velocity, .. } => *velocity = v,
            Self::Aftertouch { pressure, .. } | Self::ChannelPressure { pressure } => *pressure = v,
            Self::ControlChange { value, .. } => *value = v,
            Self::ProgramChange { program } => *program = v,
            Self::PitchBend { msb, .. } => *msb = v,
            Self::Tempo { .. } | Self::Meta { .. } => return false,
        }
        true
    }

    /// Class match, with the controller number checked only for control changes
    pub fn matches(&self, class: EventClass, cc: u8) -> bool {
        match self {
            Self::ControlChange { controller, .. } => class == EventClass::ControlChange && *controller == cc,
            other => other.class() == class,
        }
    }

    pub fn tempo_from_bpm(bpm: f64) -> Self {
        let us = if bpm > 0.0 { (60_000_000.0 / bpm).round() as u32 } else { 500_000 };
        Self::Tempo { us_per_quarter: us }
    }

    /// Encode a channel message; meta events have no wire form here
    pub fn to_midi_bytes(&self, channel: u8) -> Option<RawMidi> {
        let ch = channel & 0x0F;
        let raw = match *self {
            Self::NoteOff { note, velocity } => RawMidi::three(0x80 | ch, note, velocity),
            Self::NoteOn { note, velocity } => RawMidi::three(0x90 | ch, note, velocity),
            Self::Aftertouch { note, pressure } => RawMidi::three(0xA0 | ch, note, pressure),
            Self::ControlChange { controller, value } => RawMidi::three(0xB0 | ch, controller, value),
            Self::ProgramChange { program } => RawMidi::two(0xC0 | ch, program),
            Self::ChannelPressure { pressure } => RawMidi::two(0xD0 | ch, pressure),
            Self::PitchBend { lsb, msb } => RawMidi::three(0xE0 | ch, lsb, msb),
            Self::Tempo { .. } | Self::Meta { .. } => return None,
        };
        Some(raw)
    }

    /// Decode a channel message, returning the payload and its channel.
    /// A note-on with velocity 0 decodes as a note-off.
    pub fn from_midi_bytes(bytes: &[u8]) -> Option<(Self, u8)> {
        let status = *bytes.first()?;
        if status < 0x80 || status >= 0xF0 {
            return None;
        }
        let channel = status & 0x0F;
        let d0 = bytes.get(1).copied().unwrap_or(0) & 0x7F;
        let d1 = bytes.get(2).copied().unwrap_or(0) & 0x7F;
        let needs_two = !matches!(status & 0xF0, 0xC0 | 0xD0);
        if bytes.len() < if needs_two { 3 } else { 2 } {
            return None;
        }
        let kind = match status & 0xF0 {
            0x80 => Self::NoteOff { note: d0, velocity: d1 },
            0x90 if d1 == 0 => Self::NoteOff { note: d0, velocity: 0 },
            0x90 => Self::NoteOn { note: d0, velocity: d1 },
            0xA0 => Self::Aftertouch { note: d0, pressure: d1 },
            0xB0 => Self::ControlChange { controller: d0, value: d1 },
            0xC0 => Self::ProgramChange { program: d0 },
            0xD0 => Self::ChannelPressure { pressure: d0 },
            _ => Self::PitchBend { lsb: d0, msb: d1 },
        };
        Some((kind, channel))
    }

    pub fn meta_tempo_bytes(us_per_quarter: u32) -> [u8; 3] {
        let [_, a, b, c] = us_per_quarter.to_be_bytes();
        [a, b, c]
    }

    pub fn is_meta_tempo(meta_type: u8) -> bool {
        meta_type == META_TEMPO
    }
}

/// Encoded channel message (at most three bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMidi {
    bytes: [u8; 3],
    len: usize,
}

impl RawMidi {
    fn two(status: u8, d0: u8) -> Self {
        Self { bytes: [status, d0 & 0x7F, 0], len: 2 }
    }

    fn three(status: u8, d0: u8, d1: u8) -> Self {
        Self { bytes: [status, d0 & 0x7F, d1 & 0x7F], len: 3 }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// One event in a pattern.
///
/// Equality compares the musical content (time, payload, channel); the
/// selection, paint, and link flags are editor bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: Pulse,
    pub kind: EventKind,
    pub channel: u8,
    #[serde(skip)]
    pub(crate) selected: bool,
    #[serde(skip)]
    pub(crate) painted: bool,
    #[serde(skip)]
    pub(crate) marked: bool,
    /// Index of the paired note event inside the owning list
    #[serde(skip)]
    pub(crate) link: Option<usize>,
}

impl PartialEq for EventRecord {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.kind == other.kind && self.channel == other.channel
    }
}

impl EventRecord {
    pub fn new(timestamp: Pulse, kind: EventKind) -> Self {
        Self {
            timestamp,
            kind,
            channel: 0,
            selected: false,
            painted: false,
            marked: false,
            link: None,
        }
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel & 0x0F;
        self
    }

    pub fn note_on(timestamp: Pulse, note: u8, velocity: u8) -> Self {
        Self::new(timestamp, EventKind::NoteOn { note: note.min(MAX_DATA), velocity: velocity.min(MAX_DATA) })
    }

    pub fn note_off(timestamp: Pulse, note: u8, velocity: u8) -> Self {
        Self::new(timestamp, EventKind::NoteOff { note: note.min(MAX_DATA), velocity: velocity.min(MAX_DATA) })
    }

    pub fn control_change(timestamp: Pulse, controller: u8, value: u8) -> Self {
        Self::new(timestamp, EventKind::ControlChange { controller: controller.min(MAX_DATA), value: value.min(MAX_DATA) })
    }

    pub fn tempo(timestamp: Pulse, bpm: f64) -> Self {
        Self::new(timestamp, EventKind::tempo_from_bpm(bpm))
    }

    pub fn sort_key(&self) -> (Pulse, u8) {
        (self.timestamp, self.kind.rank())
    }

    pub fn class(&self) -> EventClass {
        self.kind.class()
    }

    pub fn note(&self) -> Option<u8> {
        self.kind.note()
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self.kind, EventKind::NoteOn { .. })
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self.kind, EventKind::NoteOff { .. })
    }

    /// Note-on, note-off or aftertouch: anything carrying a pitch
    pub fn is_note(&self) -> bool {
        self.kind.note().is_some()
    }

    pub fn is_tempo(&self) -> bool {
        matches!(self.kind, EventKind::Tempo { .. })
    }

    /// Meta and tempo events never reach a sink
    pub fn is_meta(&self) -> bool {
        matches!(self.kind, EventKind::Tempo { .. } | EventKind::Meta { .. })
    }

    pub fn bpm(&self) -> Option<f64> {
        match self.kind {
            EventKind::Tempo { us_per_quarter } if us_per_quarter > 0 => {
                Some(60_000_000.0 / us_per_quarter as f64)
            }
            _ => None,
        }
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn select(&mut self) {
        self.selected = true;
    }

    pub fn unselect(&mut self) {
        self.selected = false;
    }

    pub fn is_painted(&self) -> bool {
        self.painted
    }

    pub fn paint(&mut self) {
        self.painted = true;
    }

    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    /// Index of the paired event within the list this record came from
    pub fn link(&self) -> Option<usize> {
        self.link
    }

    /// Copy with the note shifted by `semitones`, or `None` if it leaves 0..=127.
    /// Non-note events are returned unchanged.
    pub fn transposed(&self, semitones: i32) -> Option<Self> {
        let mut copy = self.clone();
        if let Some(note) = self.note() {
            let shifted = note as i32 + semitones;
            if !(0..=MAX_DATA as i32).contains(&shifted) {
                return None;
            }
            copy.kind.set_note(shifted as u8);
        }
        Some(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_orders_note_off_first() {
        let off = EventRecord::note_off(10, 60, 0);
        let on = EventRecord::note_on(10, 62, 100);
        let cc = EventRecord::control_change(10, 7, 90);
        assert!(off.sort_key() < on.sort_key());
        assert!(on.sort_key() < cc.sort_key());
    }

    #[test]
    fn test_midi_bytes() {
        let kind = EventKind::NoteOn { note: 60, velocity: 100 };
        let raw = kind.to_midi_bytes(3).unwrap();
        assert_eq!(raw.as_slice(), &[0x93, 60, 100]);

        let (decoded, channel) = EventKind::from_midi_bytes(raw.as_slice()).unwrap();
        assert_eq!(decoded, kind);
        assert_eq!(channel, 3);

        let (zero_vel, _) = EventKind::from_midi_bytes(&[0x90, 60, 0]).unwrap();
        assert_eq!(zero_vel.class(), EventClass::NoteOff);

        assert!(EventKind::from_midi_bytes(&[0xC0]).is_none());
        assert!(EventKind::from_midi_bytes(&[0xF8]).is_none());
        assert_eq!(EventKind::ProgramChange { program: 5 }.to_midi_bytes(0).unwrap().as_slice(), &[0xC0, 5]);
    }

    #[test]
    fn test_matches_checks_controller() {
        let cc = EventRecord::control_change(0, 7, 90);
        assert!(cc.kind.matches(EventClass::ControlChange, 7));
        assert!(!cc.kind.matches(EventClass::ControlChange, 8));
        assert!(EventRecord::note_on(0, 60, 1).kind.matches(EventClass::NoteOn, 99));
    }

    #[test]
    fn test_transposed_rejects_out_of_range() {
        let on = EventRecord::note_on(0, 126, 100);
        assert_eq!(on.transposed(1).unwrap().note(), Some(127));
        assert!(on.transposed(2).is_none());
        let cc = EventRecord::control_change(0, 1, 1);
        assert_eq!(cc.transposed(40).unwrap(), cc);
    }

    #[test]
    fn test_tempo() {
        let t = EventRecord::tempo(0, 120.0);
        assert!(t.is_meta());
        assert_eq!(t.bpm(), Some(120.0));
        assert_eq!(EventKind::meta_tempo_bytes(500_000), [0x07, 0xA1, 0x20]);
    }
}
