//! Serializable view of a pattern for file writers and readers

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqweaveError};
use crate::event::{CHANNEL_COUNT, EventRecord, Pulse};
use crate::trigger::Trigger;

/// Everything needed to rebuild a pattern: events with absolute
/// timestamps, triggers, and metadata. Links and selection are rebuilt on
/// load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSnapshot {
    pub name: String,
    #[serde(default)]
    pub color: Option<u32>,
    pub length: Pulse,
    pub ppqn: u32,
    pub beats_per_bar: u32,
    pub beat_width: u32,
    /// `None` keeps each event's own channel on output
    pub channel: Option<u8>,
    pub buss: u8,
    #[serde(default = "default_transposable")]
    pub transposable: bool,
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

fn default_transposable() -> bool {
    true
}

impl PatternSnapshot {
    /// Reject shapes a pattern cannot hold
    pub fn validate(&self) -> Result<()> {
        if self.ppqn == 0 {
            return Err(SeqweaveError::InvalidPpqn(self.ppqn));
        }
        if self.length <= 0 {
            return Err(SeqweaveError::InvalidLength(self.length));
        }
        if self.beats_per_bar == 0 || self.beat_width == 0 {
            return Err(SeqweaveError::Snapshot(format!(
                "time signature {}/{}",
                self.beats_per_bar, self.beat_width
            )));
        }
        if let Some(ch) = self.channel.filter(|&c| c >= CHANNEL_COUNT) {
            return Err(SeqweaveError::Snapshot(format!("channel {ch}")));
        }
        if let Some(e) = self.events.iter().find(|e| e.timestamp < 0) {
            return Err(SeqweaveError::Snapshot(format!("negative timestamp {}", e.timestamp)));
        }
        if let Some(t) = self.triggers.iter().find(|t| t.tick_end < t.tick_start || t.tick_start < 0) {
            return Err(SeqweaveError::Snapshot(format!(
                "trigger {}..{}",
                t.tick_start, t.tick_end
            )));
        }
        Ok(())
    }
}
