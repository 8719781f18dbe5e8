//! seqweave-core: Pattern engine for a loop-based MIDI sequencer

pub mod arrangement;
mod clipboard;
mod error;
pub mod event;
pub mod event_list;
pub mod pattern;
mod playback;
pub mod scales;
pub mod sink;
mod snapshot;
mod transport;
pub mod trigger;
mod undo;

pub use arrangement::{Arrangement, ArrangementListener, MAX_SLOTS};
pub use clipboard::Clipboard;
pub use error::{Result, SeqweaveError};
pub use event::{EventClass, EventKind, EventRecord, Pulse, RawMidi};
pub use event_list::{EventList, LinkStats, NoteDraw, NoteInfo, SelectAction, SelectionBox};
pub use pattern::{ChangeListener, DEFAULT_PPQN, Pattern, PatternContext};
pub use playback::{PatternChange, PlaybackMode, RecordStyle, RecordVelocity};
pub use scales::{ChordQuality, ScaleMode};
pub use sink::{MidiSink, RecordingSink, SentEvent};
pub use snapshot::PatternSnapshot;
pub use transport::{PatternHost, Transport, TransportState};
pub use trigger::{Trigger, TriggerEdit, TriggerList, TriggerPlayback};
pub use undo::UndoRedoStack;
