//! Chord Matcher
//!
//! Matches a 12-bin chroma vector against every rotation of a fixed catalogue
//! of chord quality templates using cosine similarity.

use std::fmt::Display;
use thiserror::Error;

use crate::chroma::ChromaVector;
use crate::note::{NoteName, SEMITONES};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of chord qualities
const NUM_CHORD_QUALITIES: usize = 9;

/// Total number of chords (root × quality)
const NUM_CHORDS: usize = SEMITONES * NUM_CHORD_QUALITIES;

/// Supported chord qualities
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChordQuality {
    /// Major chord (e.g., C-E-G)
    Major,
    /// Minor chord (e.g., C-Eb-G)
    Minor,
    /// Dominant seventh chord (e.g., C-E-G-Bb)
    DominantSeventh,
    /// Major seventh chord (e.g., C-E-G-B)
    MajorSeventh,
    /// Minor seventh chord (e.g., C-Eb-G-Bb)
    MinorSeventh,
    /// Suspended second chord (e.g., C-D-G)
    SuspendedSecond,
    /// Suspended fourth chord (e.g., C-F-G)
    SuspendedFourth,
    /// Diminished chord (e.g., C-Eb-Gb)
    Diminished,
    /// Augmented chord (e.g., C-E-G#)
    Augmented,
}

impl ChordQuality {
    /// Catalogue order. Earlier qualities win ties.
    pub const ALL: [ChordQuality; NUM_CHORD_QUALITIES] = [
        ChordQuality::Major,
        ChordQuality::Minor,
        ChordQuality::DominantSeventh,
        ChordQuality::MajorSeventh,
        ChordQuality::MinorSeventh,
        ChordQuality::SuspendedSecond,
        ChordQuality::SuspendedFourth,
        ChordQuality::Diminished,
        ChordQuality::Augmented,
    ];

    /// Semitone offsets from the root.
    pub const fn intervals(self) -> &'static [usize] {
        match self {
            ChordQuality::Major => &[0, 4, 7],
            ChordQuality::Minor => &[0, 3, 7],
            ChordQuality::DominantSeventh => &[0, 4, 7, 10],
            ChordQuality::MajorSeventh => &[0, 4, 7, 11],
            ChordQuality::MinorSeventh => &[0, 3, 7, 10],
            ChordQuality::SuspendedSecond => &[0, 2, 7],
            ChordQuality::SuspendedFourth => &[0, 5, 7],
            ChordQuality::Diminished => &[0, 3, 6],
            ChordQuality::Augmented => &[0, 4, 8],
        }
    }

    /// Suffix appended to the root in chord symbols. Empty for major.
    pub const fn suffix(self) -> &'static str {
        match self {
            ChordQuality::Major => "",
            ChordQuality::Minor => "m",
            ChordQuality::DominantSeventh => "7",
            ChordQuality::MajorSeventh => "maj7",
            ChordQuality::MinorSeventh => "m7",
            ChordQuality::SuspendedSecond => "sus2",
            ChordQuality::SuspendedFourth => "sus4",
            ChordQuality::Diminished => "dim",
            ChordQuality::Augmented => "aug",
        }
    }

    /// Binary pitch-class pattern rooted at C.
    pub fn template(self) -> ChordTemplate {
        let mut pattern = [0.0; SEMITONES];
        for &off in self.intervals() {
            pattern[off] = 1.0;
        }
        ChordTemplate {
            quality: self,
            pattern,
        }
    }
}

impl Display for ChordQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A chord quality pattern anchored at pitch class 0.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ChordTemplate {
    /// The quality this template describes.
    pub quality: ChordQuality,
    /// `1.0` at every chord tone, `0.0` elsewhere.
    pub pattern: [f32; SEMITONES],
}

impl ChordTemplate {
    /// Semitone offsets from the root.
    pub fn intervals(&self) -> &'static [usize] {
        self.quality.intervals()
    }

    /// The pattern transposed up to `root`.
    pub fn rotated(&self, root: NoteName) -> [f32; SEMITONES] {
        rotate_template(&self.pattern, root.pitch_class())
    }
}

/// Cyclically shift `template` up by `semitones`: entry `i` moves to
/// `(i + semitones) mod 12`.
pub fn rotate_template(template: &[f32; SEMITONES], semitones: usize) -> [f32; SEMITONES] {
    let mut rotated = [0.0; SEMITONES];
    for (i, &v) in template.iter().enumerate() {
        rotated[(i + semitones) % SEMITONES] = v;
    }
    rotated
}

/// Cosine similarity of two vectors over their common length.
///
/// Returns `0.0` when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (dot, mag_a, mag_b) = a
        .iter()
        .zip(b)
        .fold((0.0_f32, 0.0_f32, 0.0_f32), |(d, ma, mb), (&x, &y)| {
            (d + x * y, ma + x * x, mb + y * y)
        });
    let (mag_a, mag_b) = (mag_a.sqrt(), mag_b.sqrt());
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Chord symbol for display: `"C Major"` for major chords, otherwise root plus
/// suffix (`"Am"`, `"G7"`, `"Cmaj7"`).
pub fn format_chord_name(root: NoteName, quality: ChordQuality) -> String {
    match quality {
        ChordQuality::Major => format!("{root} Major"),
        q => format!("{root}{}", q.suffix()),
    }
}

/// Represents the best chord fit for a chroma vector.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChordMatch {
    /// The root note of the detected chord.
    pub root: NoteName,
    /// The quality (e.g., Major, Minor) of the detected chord.
    pub quality: ChordQuality,
    /// Formatted chord symbol, also the chord identity for stabilization.
    pub name: String,
    /// Cosine similarity between chroma and template, higher is better.
    pub confidence: f32,
    /// Chord tones, root first.
    pub notes: Vec<NoteName>,
}

impl ChordMatch {
    fn new(root: NoteName, quality: ChordQuality, confidence: f32) -> Self {
        ChordMatch {
            root,
            quality,
            name: format_chord_name(root, quality),
            confidence,
            notes: quality
                .intervals()
                .iter()
                .map(|&off| root.transpose(off as i64))
                .collect(),
        }
    }
}

impl Display for ChordMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Errors when configuring a [`ChordMatcher`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChordMatcherError {
    /// An invalid argument was provided to the builder.
    #[error("invalid argument `{arg}`: {msg}")]
    InvalidArgument {
        /// The name of the invalid argument.
        arg: &'static str,
        /// A description of the invalid argument.
        msg: String,
    },
}

/// Builder for `ChordMatcher` to customize the confidence floor
#[derive(Debug, Clone)]
pub struct ChordMatcherBuilder {
    min_confidence: f32,
}

impl ChordMatcherBuilder {
    /// Create a new builder with default min_confidence = 0.7
    pub fn new() -> Self {
        ChordMatcherBuilder {
            min_confidence: ChordMatcher::DEFAULT_MIN_CONFIDENCE,
        }
    }

    /// Set the minimum similarity for a match to be emitted (0.0..=1.0)
    pub fn min_confidence(mut self, value: f32) -> Self {
        self.min_confidence = value;
        self
    }

    /// Build the `ChordMatcher`
    pub fn build(self) -> Result<ChordMatcher, ChordMatcherError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ChordMatcherError::InvalidArgument {
                arg: "min_confidence",
                msg: format!("must be within 0..=1, got {}", self.min_confidence),
            });
        }
        Ok(ChordMatcher::with_min_confidence(self.min_confidence))
    }
}

impl Default for ChordMatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Precomputed rotated template for one (root, quality) pair
#[derive(Copy, Clone)]
struct Profile {
    root: NoteName,
    quality: ChordQuality,
    weights: [f32; SEMITONES],
}

/// Template-matching chord classifier
#[derive(Clone)]
pub struct ChordMatcher {
    min_confidence: f32,
    profiles: Vec<Profile>,
}

impl ChordMatcher {
    /// Confidence floor used by [`ChordMatcher::new`].
    pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.7;

    /// Return a builder to customize the confidence floor
    pub fn builder() -> ChordMatcherBuilder {
        ChordMatcherBuilder::new()
    }

    /// Create a matcher with default min_confidence = 0.7
    pub fn new() -> Self {
        Self::with_min_confidence(Self::DEFAULT_MIN_CONFIDENCE)
    }

    fn with_min_confidence(min_confidence: f32) -> Self {
        // Root-major order so the earliest root, then catalogue order, wins ties
        let mut profiles = Vec::with_capacity(NUM_CHORDS);
        for root in 0..SEMITONES {
            let root = NoteName::from_pitch_class(root as i64);
            for quality in ChordQuality::ALL {
                profiles.push(Profile {
                    root,
                    quality,
                    weights: quality.template().rotated(root),
                });
            }
        }

        ChordMatcher {
            min_confidence,
            profiles,
        }
    }

    /// The similarity floor below which no chord is reported.
    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    /// Best chord for `chroma`, or `None` if its similarity is below the floor.
    pub fn match_chroma(&self, chroma: &ChromaVector) -> Option<ChordMatch> {
        let mut best: Option<(&Profile, f32)> = None;
        for p in &self.profiles {
            let similarity = cosine_similarity(chroma.as_array(), &p.weights);
            let better = match best {
                None => true,
                Some((_, s)) => similarity > s,
            };
            if better {
                best = Some((p, similarity));
            }
        }

        let (profile, similarity) = best?;
        // NaN similarity or floor never passes
        if similarity.is_nan() || self.min_confidence.is_nan() || similarity < self.min_confidence {
            return None;
        }
        Some(ChordMatch::new(profile.root, profile.quality, similarity))
    }
}

impl Default for ChordMatcher {
    fn default() -> Self {
        ChordMatcher::new()
    }
}

/// Match `chroma` against the full catalogue with a one-off confidence floor.
///
/// The floor is clamped into `0.0..=1.0`; a NaN floor matches nothing.
pub fn match_chord(chroma: &ChromaVector, min_confidence: f32) -> Option<ChordMatch> {
    ChordMatcher::with_min_confidence(min_confidence.clamp(0.0, 1.0)).match_chroma(chroma)
}
