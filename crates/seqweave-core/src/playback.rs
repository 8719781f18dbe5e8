//! Playback and recording mode types

use serde::{Deserialize, Serialize};

/// Who decides whether a pattern plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackMode {
    /// The user arms and mutes patterns directly
    #[default]
    Live,
    /// Triggers on the arrangement timeline arm patterns
    Song,
}

impl PlaybackMode {
    pub fn is_song(&self) -> bool {
        *self == Self::Song
    }
}

/// How live recording combines with existing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordStyle {
    #[default]
    Merge,
    /// Clear the pattern each time the loop restarts
    Overwrite,
    /// Lengthen the pattern by a measure as recording nears its end
    Expand,
}

/// Velocity applied to recorded note-ons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordVelocity {
    /// Keep the incoming velocity
    #[default]
    Preserve,
    #[serde(untagged)]
    Fixed(u8),
}

impl RecordVelocity {
    pub fn apply(&self, incoming: u8) -> u8 {
        match self {
            Self::Preserve => incoming,
            Self::Fixed(v) => (*v).min(127),
        }
    }
}

/// Flags reported through pattern change notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternChange {
    Playing(bool),
    Queued(bool),
    OneShot(bool),
    Muted(bool),
    Recording(bool),
}
