//! Seeded random edit sequences checked against the container invariants

use std::sync::Arc;

use seqweave_core::{
    Arrangement, EventClass, EventList, Pattern, Pulse, RecordingSink, ScaleMode, SelectAction,
    Transport, TriggerEdit,
};

const STEPS: usize = 400;

fn pattern() -> (Arrangement, Arc<Pattern>) {
    let arr = Arrangement::new(Arc::new(Transport::new(192, 120.0)), Arc::new(RecordingSink::new()));
    let p = arr.new_pattern(0).unwrap();
    (arr, p)
}

fn check_events(events: &EventList, step: usize, op: &str) {
    let length = events.length();
    let stamps: Vec<Pulse> = events.iter().map(|e| e.timestamp).collect();
    assert!(
        stamps.windows(2).all(|w| w[0] <= w[1]),
        "step {step} ({op}): unsorted {stamps:?}"
    );
    assert!(
        stamps.iter().all(|&t| (0..=length).contains(&t)),
        "step {step} ({op}): timestamp outside the loop"
    );

    let ons = events.iter().filter(|e| e.is_note_on()).count();
    let offs = events.iter().filter(|e| e.is_note_off()).count();
    assert_eq!(ons, offs, "step {step} ({op}): on/off counts differ");
    for (i, e) in events.iter().enumerate() {
        if !e.is_note_on() {
            continue;
        }
        let partner = events.linked(i);
        assert!(partner.is_some(), "step {step} ({op}): unlinked note-on at {i}");
        let partner = partner.unwrap();
        assert!(partner.is_note_off());
        assert_eq!(partner.note(), e.note());
        assert_eq!(partner.channel, e.channel);
    }
}

fn check_triggers(pattern: &Pattern, step: usize, op: &str) {
    let triggers = pattern.triggers();
    assert!(triggers.iter().all(|t| t.tick_start <= t.tick_end), "step {step} ({op}): empty trigger");
    assert!(
        triggers.windows(2).all(|w| w[0].tick_end < w[1].tick_start),
        "step {step} ({op}): overlapping triggers {triggers:?}"
    );
}

fn bounds(pattern: &Pattern) -> Vec<(Pulse, Pulse, Pulse)> {
    pattern
        .triggers()
        .iter()
        .map(|t| (t.tick_start, t.tick_end, t.offset))
        .collect()
}

#[test]
fn test_random_edits_keep_events_sorted_and_linked() {
    for seed in 0..8u64 {
        let mut rng = fastrand::Rng::with_seed(seed);
        let (_arr, p) = pattern();
        let len = p.length();

        for step in 0..STEPS {
            let op = match rng.u8(0..14) {
                0 | 1 => {
                    p.push_add_note(rng.i64(0..len), rng.i64(1..300), rng.u8(20..100), false, 100);
                    "add"
                }
                2 => {
                    p.add_note(rng.i64(0..len), rng.i64(1..len), rng.u8(0..128), false, 90);
                    "add_unrecorded"
                }
                3 => {
                    let a = rng.i64(0..len);
                    let b = rng.i64(a..=len);
                    let low = rng.u8(0..100);
                    p.select_note_events(a, low + 27, b, low, SelectAction::Select);
                    "select_box"
                }
                4 => {
                    p.select_all();
                    "select_all"
                }
                5 => {
                    p.remove_selected();
                    "remove"
                }
                6 => {
                    p.push_quantize(EventClass::NoteOn, 0, rng.i32(1..4), true);
                    "quantize"
                }
                7 => {
                    p.transpose_notes(rng.i32(-12..=12), ScaleMode::Chromatic);
                    "transpose"
                }
                8 => {
                    p.move_selected_notes(rng.i64(-200..200), rng.i32(-7..=7));
                    "move"
                }
                9 => {
                    p.pop_undo();
                    "undo"
                }
                10 => {
                    p.pop_redo();
                    "redo"
                }
                11 => {
                    if rng.bool() {
                        p.grow_selected(rng.i64(-50..50));
                    } else {
                        p.stretch_selected(rng.i64(-50..50));
                    }
                    "resize_notes"
                }
                12 => {
                    if p.copy_selected() {
                        p.paste_selected(rng.i64(0..len), rng.u8(0..120));
                    }
                    "copy_paste"
                }
                _ => {
                    p.unselect_all();
                    p.edge_fix();
                    "edge_fix"
                }
            };
            check_events(&p.events(), step, op);
            let stats = p.verify_and_link();
            assert_eq!(stats.unlinked, 0, "seed {seed} step {step} ({op})");
            check_events(&p.events(), step, op);
        }
    }
}

#[test]
fn test_random_undo_redo_round_trips() {
    for seed in 0..8u64 {
        let mut rng = fastrand::Rng::with_seed(seed);
        let (_arr, p) = pattern();
        let len = p.length();
        for _ in 0..20 {
            p.add_note(rng.i64(0..len), rng.i64(1..200), rng.u8(30..90), false, 100);
        }

        for _ in 0..100 {
            let before = p.events();
            p.push_undo();
            p.select_note_events(0, 127, rng.i64(0..len), 0, SelectAction::Select);
            let changed = match rng.u8(0..3) {
                0 => p.add_note(rng.i64(0..len), rng.i64(1..200), rng.u8(30..90), false, 100),
                1 => p.grow_selected(rng.i64(1..40)),
                _ => p.quantize(EventClass::NoteOn, 0, 1, true),
            };
            if !changed {
                assert!(p.pop_undo());
                assert_eq!(p.events(), before);
                continue;
            }
            let after = p.events();

            assert!(p.pop_undo());
            assert_eq!(p.events(), before);
            assert!(p.pop_redo());
            assert_eq!(p.events(), after);
            assert!(!p.pop_redo());
        }
    }
}

#[test]
fn test_random_quantize_is_idempotent() {
    for seed in 0..16u64 {
        let mut rng = fastrand::Rng::with_seed(seed);
        let (_arr, p) = pattern();
        let len = p.length();
        for _ in 0..30 {
            p.add_note(rng.i64(0..len), rng.i64(1..300), rng.u8(30..90), false, 100);
        }
        let divide = rng.i32(1..4);
        p.quantize(EventClass::NoteOn, 0, divide, true);
        let once = p.events();
        assert!(!p.quantize(EventClass::NoteOn, 0, divide, true));
        assert_eq!(p.events(), once);
    }
}

#[test]
fn test_random_trigger_edits_never_overlap() {
    for seed in 0..8u64 {
        let mut rng = fastrand::Rng::with_seed(seed);
        let (_arr, p) = pattern();
        let len = p.length();
        let song = len * 16;

        for step in 0..STEPS {
            let tick = rng.i64(0..song);
            let op = match rng.u8(0..11) {
                0 | 1 => {
                    p.add_trigger(tick, rng.i64(1..len * 3), rng.i64(0..len), rng.bool());
                    "add"
                }
                2 => {
                    p.grow_trigger(tick, tick + rng.i64(0..len), rng.i64(1..64));
                    "grow"
                }
                3 => {
                    match rng.u8(0..3) {
                        0 => p.split_trigger(tick),
                        1 => p.half_split_trigger(tick),
                        _ => p.exact_split_trigger(tick),
                    };
                    "split"
                }
                4 => {
                    p.select_trigger(tick);
                    let edit = match rng.u8(0..3) {
                        0 => TriggerEdit::Move,
                        1 => TriggerEdit::GrowStart,
                        _ => TriggerEdit::GrowEnd,
                    };
                    p.move_selected_triggers(rng.i64(-len..len), edit);
                    "move"
                }
                5 => {
                    p.remove_trigger(tick);
                    "remove"
                }
                6 => {
                    p.select_trigger(tick);
                    p.copy_selected_trigger();
                    let at = if rng.bool() { Some(rng.i64(0..song)) } else { None };
                    p.paste_trigger(at);
                    "paste"
                }
                7 => {
                    p.move_triggers(tick, rng.i64(1..len), rng.bool());
                    "move_range"
                }
                8 => {
                    p.copy_triggers(tick, rng.i64(1..len * 2));
                    "copy_range"
                }
                9 => {
                    p.unselect_triggers();
                    "unselect"
                }
                _ => {
                    let before = bounds(&p);
                    p.push_trigger_undo();
                    if p.add_trigger(tick, rng.i64(1..len), 0, true) {
                        let after = bounds(&p);
                        assert!(p.pop_trigger_undo());
                        assert_eq!(bounds(&p), before);
                        assert!(p.pop_trigger_redo());
                        assert_eq!(bounds(&p), after);
                    }
                    "undo_redo"
                }
            };
            check_triggers(&p, step, op);
        }
    }
}
