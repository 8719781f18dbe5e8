//! Clock thread and editor thread sharing the same patterns

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use seqweave_core::{
    Arrangement, EventClass, PlaybackMode, RecordingSink, ScaleMode, SelectAction, Transport,
};

fn arrangement() -> (Arc<Arrangement>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let arr = Arrangement::new(Arc::new(Transport::new(192, 120.0)), sink.clone());
    (Arc::new(arr), sink)
}

fn assert_sorted(events: &seqweave_core::EventList) {
    let stamps: Vec<_> = events.iter().map(|e| e.timestamp).collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "unsorted: {stamps:?}");
}

#[test]
fn test_editing_while_playing() {
    let (arr, sink) = arrangement();
    let pattern = arr.new_pattern(0).unwrap();
    pattern.set_playing(true);
    arr.start();

    let done = Arc::new(AtomicBool::new(false));
    let clock = {
        let arr = arr.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut tick = 0;
            while !done.load(Ordering::SeqCst) {
                tick += 24;
                arr.play_all(tick);
                thread::yield_now();
            }
            tick
        })
    };

    for round in 0..200i64 {
        let tick = (round * 37) % 768;
        let note = 40 + (round % 40) as u8;
        pattern.push_add_note(tick, 60, note, round % 3 == 0, 90);
        match round % 5 {
            0 => {
                pattern.select_note_events(0, 127, 383, 0, SelectAction::Select);
                pattern.quantize(EventClass::NoteOn, 0, 1, true);
                pattern.unselect_all();
            }
            1 => {
                pattern.select_all();
                pattern.transpose_notes(1, ScaleMode::Major);
                pattern.unselect_all();
            }
            2 => {
                pattern.pop_undo();
            }
            3 => {
                pattern.select_events(400, 500, EventClass::NoteOn, 0, SelectAction::Select);
                pattern.remove_selected();
            }
            _ => {
                pattern.pop_redo();
            }
        }
    }

    done.store(true, Ordering::SeqCst);
    let last = clock.join().unwrap();
    assert!(last > 0);

    assert_sorted(&pattern.events());
    let stats = pattern.verify_and_link();
    assert_eq!(stats.unlinked, 0);
    assert!(!sink.is_empty());

    arr.stop_all();
    assert_eq!(pattern.sounding_notes(), 0);
}

#[test]
fn test_cross_pattern_moves_do_not_deadlock() {
    let (arr, _) = arrangement();
    let a = arr.new_pattern(0).unwrap();
    let b = arr.new_pattern(1).unwrap();
    for i in 0..16 {
        a.add_note(i * 48, 24, 60, false, 100);
        b.add_note(i * 48, 24, 72, false, 100);
    }

    let forward = {
        let arr = arr.clone();
        let a = a.clone();
        thread::spawn(move || {
            for i in 0..100 {
                a.select_all();
                arr.move_selected_between(0, 1, (i * 48) % 768, 60).unwrap();
            }
        })
    };
    let backward = {
        let arr = arr.clone();
        let b = b.clone();
        thread::spawn(move || {
            for i in 0..100 {
                b.select_all();
                arr.move_selected_between(1, 0, (i * 24) % 768, 72).unwrap();
            }
        })
    };
    let clock = {
        let arr = arr.clone();
        thread::spawn(move || {
            arr.set_playback_mode(PlaybackMode::Live);
            for tick in (0..20_000).step_by(16) {
                arr.play_all(tick);
            }
        })
    };

    forward.join().unwrap();
    backward.join().unwrap();
    clock.join().unwrap();

    // Notes may merge onto the same tick but never vanish unpaired
    for p in [&a, &b] {
        let events = p.events();
        assert_sorted(&events);
        assert_eq!(events.len() % 2, 0);
    }
    assert!(a.note_count() + b.note_count() > 0);
}
