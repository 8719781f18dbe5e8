//! Non-blocking MIDI output queue
//!
//! The clock thread encodes each event and `try_send`s it into a bounded
//! channel; a device writer (or test) drains the other end. A full queue
//! drops the event instead of blocking the clock.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use seqweave_core::{EventRecord, MidiSink, Pulse, RawMidi};
use tracing::{trace, warn};

/// One encoded message ready for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMessage {
    pub buss: u8,
    pub tick: Pulse,
    pub midi: RawMidi,
}

impl OutputMessage {
    pub fn bytes(&self) -> &[u8] {
        self.midi.as_slice()
    }
}

pub struct ChannelSink {
    tx: Sender<OutputMessage>,
    rx: Receiver<OutputMessage>,
    sent: AtomicU64,
    dropped: AtomicU64,
    flushes: AtomicU64,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    /// Receiving end for a device writer
    pub fn receiver(&self) -> Receiver<OutputMessage> {
        self.rx.clone()
    }

    /// Everything queued so far
    pub fn drain(&self) -> Vec<OutputMessage> {
        self.rx.try_iter().collect()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl MidiSink for ChannelSink {
    fn put_event(&self, buss: u8, event: &EventRecord, channel: u8) -> bool {
        let Some(midi) = event.kind.to_midi_bytes(channel) else {
            // Meta events have no wire form
            return true;
        };
        let msg = OutputMessage {
            buss,
            tick: event.timestamp,
            midi,
        };
        match self.tx.try_send(msg) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                trace!(buss, tick = msg.tick, bytes = ?msg.bytes(), "Queued MIDI");
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!(dropped, "Output queue full, dropping events");
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    fn flush(&self) -> bool {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodes_on_pattern_channel() {
        let sink = ChannelSink::new(8);
        assert!(sink.put_event(1, &EventRecord::note_on(96, 60, 100), 9));
        let out = sink.drain();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes(), &[0x99, 60, 100]);
        assert_eq!(out[0].tick, 96);
        assert_eq!(out[0].buss, 1);
    }

    #[test]
    fn test_meta_events_skipped() {
        let sink = ChannelSink::new(8);
        assert!(sink.put_event(0, &EventRecord::tempo(0, 120.0), 0));
        assert!(sink.drain().is_empty());
        assert_eq!(sink.sent(), 0);
    }

    #[test]
    fn test_full_queue_drops() {
        let sink = ChannelSink::new(2);
        let ev = EventRecord::note_on(0, 60, 100);
        assert!(sink.put_event(0, &ev, 0));
        assert!(sink.put_event(0, &ev, 0));
        assert!(!sink.put_event(0, &ev, 0));
        assert_eq!(sink.dropped(), 1);
        assert_eq!(sink.drain().len(), 2);
        assert!(sink.put_event(0, &ev, 0));
    }
}
