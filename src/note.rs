//! Notes
//!
//! Pitch classes and 12-tone equal temperament conversions referenced to
//! A4 = 440 Hz.

use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub(crate) const SEMITONES: usize = 12;

const A4_FREQUENCY: f32 = 440.0;
const A4_MIDI: f32 = 69.0;

/// Twelve chromatic pitch classes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NoteName {
    /// C
    C,
    /// C sharp / D flat
    Cs,
    /// D
    D,
    /// D sharp / E flat
    Ds,
    /// E
    E,
    /// F
    F,
    /// F sharp / G flat
    Fs,
    /// G
    G,
    /// G sharp / A flat
    Gs,
    /// A
    A,
    /// A sharp / B flat
    As,
    /// B
    B,
}

/// All pitch classes in ascending order starting at C.
pub const NOTE_NAMES: [NoteName; SEMITONES] = [
    NoteName::C,
    NoteName::Cs,
    NoteName::D,
    NoteName::Ds,
    NoteName::E,
    NoteName::F,
    NoteName::Fs,
    NoteName::G,
    NoteName::Gs,
    NoteName::A,
    NoteName::As,
    NoteName::B,
];

impl NoteName {
    /// Pitch class for any integer, wrapping negatives (`-1` is B).
    pub const fn from_pitch_class(pc: i64) -> NoteName {
        NOTE_NAMES[pc.rem_euclid(SEMITONES as i64) as usize]
    }

    /// Index of this pitch class, C = 0 .. B = 11.
    pub const fn pitch_class(self) -> usize {
        self as usize
    }

    /// Sharp spelling, e.g. `"C#"`.
    pub const fn as_str(self) -> &'static str {
        match self {
            NoteName::C => "C",
            NoteName::Cs => "C#",
            NoteName::D => "D",
            NoteName::Ds => "D#",
            NoteName::E => "E",
            NoteName::F => "F",
            NoteName::Fs => "F#",
            NoteName::G => "G",
            NoteName::Gs => "G#",
            NoteName::A => "A",
            NoteName::As => "A#",
            NoteName::B => "B",
        }
    }

    /// The pitch class `semitones` above this one.
    pub const fn transpose(self, semitones: i64) -> NoteName {
        Self::from_pitch_class(self as i64 + semitones)
    }
}

impl Display for NoteName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a note name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized note name `{0}`")]
pub struct ParseNoteError(pub String);

impl FromStr for NoteName {
    type Err = ParseNoteError;

    /// Accepts naturals with an optional `#`/`♯` or `b`/`♭` accidental.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let letter = chars.next().ok_or_else(|| ParseNoteError(s.to_string()))?;
        let natural: i64 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(ParseNoteError(s.to_string())),
        };
        let offset = match chars.as_str() {
            "" => 0,
            "#" | "♯" => 1,
            "b" | "♭" => -1,
            _ => return Err(ParseNoteError(s.to_string())),
        };
        Ok(NoteName::from_pitch_class(natural + offset))
    }
}

/// A frequency resolved to its nearest equal-tempered note.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NoteEvent {
    /// Pitch class of the nearest note.
    pub name: NoteName,
    /// Scientific octave number (A4 = 440 Hz).
    pub octave: i32,
    /// Signed offset from the nearest note, nominally -50..=50.
    pub cents: i32,
    /// The frequency that was converted, in Hz.
    pub frequency: f32,
}

impl NoteEvent {
    /// Note and octave, e.g. `"A4"`. Used as the note identity for hysteresis.
    pub fn label(&self) -> String {
        format!("{}{}", self.name, self.octave)
    }

    /// How close the note is to equal temperament.
    pub fn accuracy(&self) -> TuningAccuracy {
        TuningAccuracy::from_cents(self.cents)
    }
}

impl Display for NoteEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.name, self.octave)
    }
}

/// Fractional MIDI note number of `freq`.
pub fn freq_to_midi_note(freq: f32) -> f32 {
    12.0 * (freq / A4_FREQUENCY).log2() + A4_MIDI
}

/// Convert a frequency to note name, octave and cents.
///
/// Returns `None` for zero, negative, NaN or infinite input.
pub fn frequency_to_note(frequency: f32) -> Option<NoteEvent> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }

    let exact_midi = freq_to_midi_note(frequency);
    let midi = exact_midi.round();
    let cents = ((exact_midi - midi) * 100.0).round() as i32;
    let midi = midi as i64;

    Some(NoteEvent {
        name: NoteName::from_pitch_class(midi),
        octave: (midi.div_euclid(SEMITONES as i64) - 1) as i32,
        cents,
        frequency,
    })
}

/// Tuning indicator for a cents offset: `"♪"` when exact, otherwise signed
/// with a cent sign (`"+8¢"`, `"-12¢"`).
pub fn format_cents(cents: i32) -> String {
    match cents {
        0 => "♪".to_string(),
        c if c > 0 => format!("+{c}¢"),
        c => format!("{c}¢"),
    }
}

/// Coarse tuning classification of a cents offset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TuningAccuracy {
    /// Within 5 cents.
    InTune,
    /// Within 15 cents.
    Close,
    /// More than 15 cents off.
    OutOfTune,
}

impl TuningAccuracy {
    /// Classify a cents offset.
    pub fn from_cents(cents: i32) -> Self {
        match cents.unsigned_abs() {
            0..=5 => TuningAccuracy::InTune,
            6..=15 => TuningAccuracy::Close,
            _ => TuningAccuracy::OutOfTune,
        }
    }
}
