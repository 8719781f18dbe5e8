//! Snapshot undo/redo history

use std::collections::VecDeque;

/// Default maximum number of snapshots kept on the undo side
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Whole-value snapshot history.
///
/// Every step stores a full clone of the value, so memory grows with the
/// size of the value times the depth. The undo side is capped at
/// `max_history`; the oldest snapshot is dropped when the cap is exceeded.
#[derive(Debug, Clone)]
pub struct UndoRedoStack<T: Clone> {
    /// Most recent at the back
    undo_stack: VecDeque<T>,
    /// Most recent at the back
    redo_stack: VecDeque<T>,
    max_history: usize,
}

impl<T: Clone> Default for UndoRedoStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> UndoRedoStack<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_HISTORY)
    }

    pub fn with_capacity(max_history: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history: max_history.max(1),
        }
    }

    /// Record `current` before a mutation. Starts a new timeline, so the
    /// redo side is cleared.
    pub fn push(&mut self, current: &T) {
        self.undo_stack.push_back(current.clone());
        self.redo_stack.clear();
        if self.undo_stack.len() > self.max_history {
            self.undo_stack.pop_front();
        }
    }

    /// Swap `current` with the newest undo snapshot. Returns false when
    /// there is nothing to undo.
    pub fn undo(&mut self, current: &mut T) -> bool {
        let Some(previous) = self.undo_stack.pop_back() else {
            return false;
        };
        let now = std::mem::replace(current, previous);
        self.redo_stack.push_back(now);
        true
    }

    /// Swap `current` with the newest redo snapshot
    pub fn redo(&mut self, current: &mut T) -> bool {
        let Some(next) = self.redo_stack.pop_back() else {
            return false;
        };
        let now = std::mem::replace(current, next);
        self.undo_stack.push_back(now);
        if self.undo_stack.len() > self.max_history {
            self.undo_stack.pop_front();
        }
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Drop the redo side after an edit made without a snapshot
    pub fn clear_redo(&mut self) {
        self.redo_stack.clear();
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_redo_round_trip() {
        let mut history = UndoRedoStack::new();
        let mut value = vec![1, 2, 3];

        history.push(&value);
        value.push(4);

        assert!(history.undo(&mut value));
        assert_eq!(value, vec![1, 2, 3]);
        assert!(history.redo(&mut value));
        assert_eq!(value, vec![1, 2, 3, 4]);
        assert!(!history.redo(&mut value));
    }

    #[test]
    fn test_push_clears_redo() {
        let mut history = UndoRedoStack::new();
        let mut value = 1;
        history.push(&value);
        value = 2;
        history.undo(&mut value);
        assert!(history.can_redo());

        history.push(&value);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_depth_is_capped() {
        let mut history = UndoRedoStack::with_capacity(3);
        for i in 0..10 {
            history.push(&i);
        }
        assert_eq!(history.undo_depth(), 3);

        let mut value = 10;
        assert!(history.undo(&mut value));
        assert_eq!(value, 9);
    }

    #[test]
    fn test_empty_undo_is_noop() {
        let mut history: UndoRedoStack<u8> = UndoRedoStack::new();
        let mut value = 5;
        assert!(!history.undo(&mut value));
        assert_eq!(value, 5);
    }
}
