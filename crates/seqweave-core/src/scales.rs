//! Scale-aware transposition tables and chord shapes

use serde::{Deserialize, Serialize};

use crate::event::MAX_DATA;

// ============================================================================
// Scales
// ============================================================================

/// Scale/mode types, all rooted on C
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScaleMode {
    #[default]
    Chromatic,
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    HarmonicMinor,
    MelodicMinor,
    Pentatonic,
    Blues,
}

impl ScaleMode {
    /// Get scale intervals (semitones from root)
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            Self::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
            Self::Major => &[0, 2, 4, 5, 7, 9, 11],
            Self::Minor => &[0, 2, 3, 5, 7, 8, 10],
            Self::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Self::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            Self::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            Self::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Self::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            Self::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            Self::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11],
            Self::Pentatonic => &[0, 2, 4, 7, 9],
            Self::Blues => &[0, 3, 5, 6, 7, 10],
        }
    }

    pub fn contains(&self, pitch_class: u8) -> bool {
        self.intervals().contains(&(pitch_class % 12))
    }

    /// Semitones from each pitch class up to the next scale member
    pub fn up_table(&self) -> [u8; 12] {
        std::array::from_fn(|pc| {
            (1..=12u8)
                .find(|d| self.contains(pc as u8 + d))
                .unwrap_or(12)
        })
    }

    /// Semitones from each pitch class down to the previous scale member
    pub fn down_table(&self) -> [u8; 12] {
        std::array::from_fn(|pc| {
            (1..=12u8)
                .find(|d| self.contains(pc as u8 + 12 - d))
                .unwrap_or(12)
        })
    }

    /// Move `note` by `steps` scale degrees.
    ///
    /// An off-scale note is moved from the scale member just below it and
    /// keeps its chromatic distance from that member. Returns `None` when the
    /// result leaves 0..=127; the caller leaves such notes untouched.
    pub fn transpose(&self, note: u8, steps: i32) -> Option<u8> {
        let mut pitch = note as i32;
        if *self == Self::Chromatic {
            pitch += steps;
        } else {
            let pc = note % 12;
            let below = (0..12u8).find(|d| self.contains(pc + 12 - d)).unwrap_or(0) as i32;
            pitch -= below;
            let (up, down) = (self.up_table(), self.down_table());
            for _ in 0..steps.unsigned_abs() {
                let idx = pitch.rem_euclid(12) as usize;
                if steps > 0 {
                    pitch += up[idx] as i32;
                } else {
                    pitch -= down[idx] as i32;
                }
            }
            pitch += below;
        }
        (0..=MAX_DATA as i32).contains(&pitch).then_some(pitch as u8)
    }
}

// ============================================================================
// Chords
// ============================================================================

/// Chord quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Major7,
    Minor7,
    Dominant7,
    Diminished7,
    HalfDiminished7,
    Sus2,
    Sus4,
    Add9,
}

impl ChordQuality {
    /// Get chord intervals from root
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            Self::Major => &[0, 4, 7],
            Self::Minor => &[0, 3, 7],
            Self::Diminished => &[0, 3, 6],
            Self::Augmented => &[0, 4, 8],
            Self::Major7 => &[0, 4, 7, 11],
            Self::Minor7 => &[0, 3, 7, 10],
            Self::Dominant7 => &[0, 4, 7, 10],
            Self::Diminished7 => &[0, 3, 6, 9],
            Self::HalfDiminished7 => &[0, 3, 6, 10],
            Self::Sus2 => &[0, 2, 7],
            Self::Sus4 => &[0, 5, 7],
            Self::Add9 => &[0, 4, 7, 14],
        }
    }

    /// Chord tones on `root`, dropping any above 127
    pub fn notes(&self, root: u8) -> Vec<u8> {
        self.intervals()
            .iter()
            .map(|&i| root as u16 + i as u16)
            .filter(|&n| n <= MAX_DATA as u16)
            .map(|n| n as u8)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chromatic_transpose() {
        assert_eq!(ScaleMode::Chromatic.transpose(60, 2), Some(62));
        assert_eq!(ScaleMode::Chromatic.transpose(60, -12), Some(48));
        assert_eq!(ScaleMode::Chromatic.transpose(126, 5), None);
        assert_eq!(ScaleMode::Chromatic.transpose(1, -3), None);
    }

    #[test]
    fn test_major_transpose() {
        // C -> D -> E, E -> F is a half step
        assert_eq!(ScaleMode::Major.transpose(60, 1), Some(62));
        assert_eq!(ScaleMode::Major.transpose(60, 2), Some(64));
        assert_eq!(ScaleMode::Major.transpose(64, 1), Some(65));
        assert_eq!(ScaleMode::Major.transpose(60, 7), Some(72));
        assert_eq!(ScaleMode::Major.transpose(60, -1), Some(59));
        // C# moves with C and keeps its semitone
        assert_eq!(ScaleMode::Major.transpose(61, 1), Some(63));
    }

    #[test]
    fn test_tables() {
        let up = ScaleMode::Major.up_table();
        let down = ScaleMode::Major.down_table();
        assert_eq!(up[0], 2);
        assert_eq!(up[4], 1);
        assert_eq!(up[11], 1);
        assert_eq!(down[0], 1);
        assert_eq!(down[5], 1);
        assert_eq!(down[2], 2);
    }

    #[test]
    fn test_chord_notes() {
        assert_eq!(ChordQuality::Major.notes(60), vec![60, 64, 67]);
        assert_eq!(ChordQuality::Add9.notes(120), vec![120, 124]);
    }
}
