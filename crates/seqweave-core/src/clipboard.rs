//! Event clipboard shared by every pattern in an arrangement

use std::sync::{Arc, Mutex};

use crate::event_list::EventList;

/// Single-slot clipboard. Each copy replaces the whole buffer with a new
/// immutable value, so a paste always sees one complete copy; the last
/// writer wins.
#[derive(Debug, Default)]
pub struct Clipboard {
    content: Mutex<Option<Arc<EventList>>>,
}

impl Clipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn copy(&self, events: EventList) {
        let content = (!events.is_empty()).then(|| Arc::new(events));
        match self.content.lock() {
            Ok(mut slot) => *slot = content,
            Err(poisoned) => *poisoned.into_inner() = content,
        }
    }

    /// Current buffer; cheap to clone and safe to hold while others copy
    pub fn content(&self) -> Option<Arc<EventList>> {
        match self.content.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        self.copy(EventList::default());
    }

    pub fn is_empty(&self) -> bool {
        self.content().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventRecord;

    #[test]
    fn test_last_copy_wins() {
        let clipboard = Clipboard::new();
        assert!(clipboard.is_empty());

        let mut first = EventList::new(0);
        first.add(EventRecord::note_on(0, 60, 100));
        clipboard.copy(first);
        let held = clipboard.content().unwrap();

        let mut second = EventList::new(0);
        second.add(EventRecord::note_on(0, 72, 100));
        second.add(EventRecord::note_off(10, 72, 0));
        clipboard.copy(second);

        // An earlier reader keeps its own complete copy
        assert_eq!(held.len(), 1);
        assert_eq!(clipboard.content().unwrap().len(), 2);

        clipboard.clear();
        assert!(clipboard.is_empty());
    }
}
