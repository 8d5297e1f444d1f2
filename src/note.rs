use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Letter index (C = 0 .. B = 6) for each pitch class. Sharps share the
/// letter of the natural below them.
const LETTER_OF_CLASS: [i32; 12] = [0, 0, 1, 1, 2, 3, 3, 4, 4, 5, 5, 6];

/// A pitch as a MIDI key number (60 = middle C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pitch(pub u8);

impl Pitch {
    pub fn octave(self) -> i32 {
        self.0 as i32 / 12 - 1
    }

    pub fn is_sharp(self) -> bool {
        PITCH_NAMES[(self.0 % 12) as usize].len() > 1
    }

    /// Position on a diatonic ladder, seven steps per octave. Used by the
    /// staff layout to place noteheads on lines and spaces.
    pub fn diatonic_index(self) -> i32 {
        (self.octave() + 1) * 7 + LETTER_OF_CLASS[(self.0 % 12) as usize]
    }

    /// Nearest pitch to a frequency in Hz (A4 = 440 Hz), or `None` when the
    /// frequency falls outside the MIDI key range.
    pub fn from_hz(hz: f64) -> Option<Self> {
        if !hz.is_finite() || hz <= 0.0 {
            return None;
        }
        let key = (69.0 + 12.0 * (hz / 440.0).log2()).round();
        (0.0..=127.0).contains(&key).then_some(Pitch(key as u8))
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PITCH_NAMES[(self.0 % 12) as usize], self.octave())
    }
}

/// Pitches sounding together. Empty means a rest.
pub type PitchSet = BTreeSet<Pitch>;

/// How long an event lasts, as decided by whoever produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NoteLength {
    /// A measured beat count in quarter-note units, still to be doubled and
    /// snapped to the notation lattice.
    Measured(f64),
    /// No usable measurement; rendered as a single quarter.
    Nominal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub label: String,
    pub pitches: PitchSet,
    pub length: NoteLength,
}

impl NoteEvent {
    pub fn new(pitches: PitchSet, length: NoteLength) -> Self {
        let label = match pitches.len() {
            0 => "rest",
            1 => "note",
            _ => "chord",
        };
        Self {
            label: label.to_string(),
            pitches,
            length,
        }
    }

    pub fn rest(length: NoteLength) -> Self {
        Self::new(PitchSet::new(), length)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl fmt::Display for NoteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.label)?;
        for (i, pitch) in self.pitches.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{pitch}")?;
        }
        match self.length {
            NoteLength::Measured(beats) => write!(f, "] {beats}"),
            NoteLength::Nominal => write!(f, "] nominal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_names() {
        assert_eq!(Pitch(60).to_string(), "C4");
        assert_eq!(Pitch(61).to_string(), "C#4");
        assert_eq!(Pitch(69).to_string(), "A4");
        assert_eq!(Pitch(0).to_string(), "C-1");
    }

    #[test]
    fn diatonic_ladder() {
        // E4 -> F4 is one step, B3 -> C4 is one step, C4 -> C#4 stays on C.
        assert_eq!(Pitch(65).diatonic_index() - Pitch(64).diatonic_index(), 1);
        assert_eq!(Pitch(60).diatonic_index() - Pitch(59).diatonic_index(), 1);
        assert_eq!(Pitch(61).diatonic_index(), Pitch(60).diatonic_index());
        assert_eq!(Pitch(72).diatonic_index() - Pitch(60).diatonic_index(), 7);
        assert!(Pitch(61).is_sharp());
        assert!(!Pitch(64).is_sharp());
    }

    #[test]
    fn pitch_from_frequency() {
        assert_eq!(Pitch::from_hz(440.0), Some(Pitch(69)));
        assert_eq!(Pitch::from_hz(261.63), Some(Pitch(60)));
        assert_eq!(Pitch::from_hz(0.0), None);
        assert_eq!(Pitch::from_hz(f64::NAN), None);
        assert_eq!(Pitch::from_hz(100_000.0), None);
    }

    #[test]
    fn labels_follow_pitch_count() {
        let chord: PitchSet = [Pitch(60), Pitch(64)].into_iter().collect();
        assert_eq!(NoteEvent::new(chord, NoteLength::Measured(1.0)).label, "chord");
        assert_eq!(NoteEvent::rest(NoteLength::Nominal).label, "rest");
        let single: PitchSet = [Pitch(60)].into_iter().collect();
        let event = NoteEvent::new(single, NoteLength::Measured(0.5));
        assert_eq!(event.to_string(), "note [C4] 0.5");
    }
}
