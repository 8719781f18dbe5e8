//! Demo arrangement: a bass line and a drum loop

use anyhow::Result;
use seqweave_core::{Arrangement, ChordQuality, EventRecord, Pulse};
use seqweave_services::EngineConfig;

const DRUM_CHANNEL: u8 = 9;
const KICK: u8 = 36;
const SNARE: u8 = 38;
const HAT: u8 = 42;

/// Fill slots 0-2 and return the length of one bar in ticks
pub fn build(arrangement: &Arrangement, config: &EngineConfig) -> Result<Pulse> {
    let bars = config.default_pattern_bars;
    let song = config.song_mode;

    let bass = arrangement.new_pattern(0)?;
    bass.set_name("Bass");
    bass.apply_length(4, 4, bars);
    let bar = bass.unit_measure();
    let beat = bar / 4;
    let eighth = beat / 2;
    for (i, root) in [36u8, 36, 43, 41].into_iter().enumerate() {
        let tick = i as Pulse * beat;
        bass.add_note(tick, eighth, root, false, 110);
        bass.add_note(tick + eighth, eighth / 2, root + 12, false, 80);
    }

    let drums = arrangement.new_pattern(1)?;
    drums.set_name("Drums");
    drums.set_channel(Some(DRUM_CHANNEL));
    drums.apply_length(4, 4, 1);
    for step in 0..8 {
        let tick = step * eighth;
        drums.add_note(tick, eighth / 4, HAT, false, if step % 2 == 0 { 90 } else { 60 });
    }
    for tick in [0, 2 * beat + eighth] {
        drums.add_note(tick, eighth / 2, KICK, false, 120);
    }
    for tick in [beat, 3 * beat] {
        drums.add_note(tick, eighth / 2, SNARE, false, 110);
    }

    let pad = arrangement.new_pattern(2)?;
    pad.set_name("Pad");
    pad.set_channel(Some(1));
    pad.apply_length(4, 4, 2);
    pad.add_chord(ChordQuality::Minor7, 0, bar - 1, 57, 70);
    pad.add_chord(ChordQuality::Major7, bar, bar - 1, 53, 70);
    pad.add_event(EventRecord::control_change(0, 7, 96), false);
    pad.add_event(EventRecord::tempo(0, config.bpm), false);

    if song {
        // Bass and drums from the top, pad joins on bar 2
        bass.add_trigger(0, bar * 8, 0, true);
        drums.add_trigger(0, bar * 8, 0, true);
        pad.add_trigger(bar, bar * 4, bar, true);
    } else {
        bass.set_playing(true);
        drums.set_playing(true);
        pad.set_playing(true);
    }
    Ok(bar)
}
