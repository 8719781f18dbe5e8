//! MIDI output boundary

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::event::{EventRecord, Pulse};

/// Destination for resolved events. Called from the real-time thread, so
/// implementations must never block; a `false` return means the event
/// could not be delivered.
pub trait MidiSink: Send + Sync {
    /// Deliver one event on `buss`, already transposed and with its
    /// output channel resolved to `channel`
    fn put_event(&self, buss: u8, event: &EventRecord, channel: u8) -> bool;

    /// Push out anything buffered
    fn flush(&self) -> bool {
        true
    }
}

/// One delivered event as seen by a [`RecordingSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentEvent {
    pub buss: u8,
    pub channel: u8,
    pub event: EventRecord,
}

impl SentEvent {
    pub fn timestamp(&self) -> Pulse {
        self.event.timestamp
    }
}

/// Sink that keeps everything it receives, for tests and dry runs
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<SentEvent>>,
    offline: AtomicBool,
    flushes: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline, every delivery fails
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<SentEvent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn take(&self) -> Vec<SentEvent> {
        self.sent.lock().map(|mut s| std::mem::take(&mut *s)).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Pitches of delivered note-ons, in delivery order
    pub fn note_ons(&self) -> Vec<u8> {
        self.events()
            .iter()
            .filter(|s| s.event.is_note_on())
            .filter_map(|s| s.event.note())
            .collect()
    }

    pub fn note_offs(&self) -> Vec<u8> {
        self.events()
            .iter()
            .filter(|s| s.event.is_note_off())
            .filter_map(|s| s.event.note())
            .collect()
    }
}

impl MidiSink for RecordingSink {
    fn put_event(&self, buss: u8, event: &EventRecord, channel: u8) -> bool {
        if self.offline.load(Ordering::SeqCst) {
            return false;
        }
        let Ok(mut sent) = self.sent.lock() else {
            return false;
        };
        sent.push(SentEvent {
            buss,
            channel,
            event: event.clone(),
        });
        true
    }

    fn flush(&self) -> bool {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        !self.offline.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        assert!(sink.put_event(1, &EventRecord::note_on(0, 60, 100), 2));
        assert!(sink.put_event(1, &EventRecord::note_off(10, 60, 0), 2));
        assert_eq!(sink.note_ons(), vec![60]);
        assert_eq!(sink.note_offs(), vec![60]);
        assert_eq!(sink.events()[0].channel, 2);

        sink.set_offline(true);
        assert!(!sink.put_event(1, &EventRecord::note_on(0, 61, 100), 0));
        assert!(!sink.flush());
        assert_eq!(sink.take().len(), 2);
        assert!(sink.is_empty());
    }
}
