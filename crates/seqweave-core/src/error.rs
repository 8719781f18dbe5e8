//! Error types for seqweave

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeqweaveError {
    #[error("Pattern slot {0} is out of range")]
    SlotOutOfRange(usize),
    #[error("Pattern slot {0} is empty")]
    EmptySlot(usize),
    #[error("Pattern slot {0} is already occupied")]
    SlotOccupied(usize),
    #[error("Invalid pattern length: {0}")]
    InvalidLength(i64),
    #[error("Invalid PPQN: {0}")]
    InvalidPpqn(u32),
    #[error("Snapshot rejected: {0}")]
    Snapshot(String),
}

pub type Result<T> = std::result::Result<T, SeqweaveError>;
