//! Live MIDI input routed into recording and thru patterns

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use seqweave_core::{Arrangement, EventKind, EventRecord};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Input queue full")]
    Full,
    #[error("Input queue disconnected")]
    Disconnected,
    #[error("Unsupported MIDI message: {0:02X?}")]
    Unsupported(Vec<u8>),
}

#[derive(Debug, Clone)]
pub enum InputMessage {
    /// Raw bytes from a device callback
    Midi(Vec<u8>),
    Event(EventRecord),
}

/// Decode one channel message. The timestamp is filled in by the
/// arrangement when the event is routed.
pub fn decode(bytes: &[u8]) -> Result<EventRecord, InputError> {
    let (kind, channel) =
        EventKind::from_midi_bytes(bytes).ok_or_else(|| InputError::Unsupported(bytes.to_vec()))?;
    Ok(EventRecord::new(0, kind).with_channel(channel))
}

/// Bounded queue between device callbacks and the clock thread
pub struct InputRouter {
    tx: Sender<InputMessage>,
    rx: Receiver<InputMessage>,
}

impl InputRouter {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    pub fn sender(&self) -> Sender<InputMessage> {
        self.tx.clone()
    }

    /// Queue without blocking the caller
    pub fn submit(&self, msg: InputMessage) -> Result<(), InputError> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => InputError::Full,
            TrySendError::Disconnected(_) => InputError::Disconnected,
        })
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Hand every queued message to the arrangement. Returns how many
    /// pattern deliveries were accepted.
    pub fn drain(&self, arrangement: &Arrangement) -> usize {
        let mut accepted = 0;
        for msg in self.rx.try_iter() {
            let event = match msg {
                InputMessage::Event(event) => event,
                InputMessage::Midi(bytes) => match decode(&bytes) {
                    Ok(event) => event,
                    Err(e) => {
                        // Clock, sysex and other system messages land here
                        trace!(error = %e, "Skipping input");
                        continue;
                    }
                },
            };
            accepted += arrangement.stream_event(&event);
        }
        if accepted > 0 {
            debug!(accepted, "Routed live input");
        }
        accepted
    }
}
