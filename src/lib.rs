//! # music_stabilizer
//!
//! Turns noisy per-frame musical estimates into stable, displayable state:
//! the current note, chord, key and tempo of a live audio stream.
//!
//! Raw pitch, key and tempo estimation is left to pluggable collaborators;
//! this crate gates the signal, builds chroma vectors and matches chord
//! templates, smooths pitch with note hysteresis, votes on keys with time
//! decay, and aggregates tempo confidence.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use music_stabilizer::{
//!     ChordMatcher, ChromaVector, KeyEstimate, KeyVoteAggregator, NoteName, Scale,
//! };
//!
//! fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1) Match a chroma vector against the chord catalogue
//!     let matcher = ChordMatcher::builder().min_confidence(0.7).build()?;
//!     let mut bins = [0.0; 12];
//!     for pc in [0, 4, 7] {
//!         bins[pc] = 1.0;
//!     }
//!     let chord = matcher.match_chroma(&ChromaVector::new(bins)).ok_or("no chord")?;
//!     assert_eq!(chord.name, "C Major");
//!
//!     // 2) Vote on the key from periodic extractor results
//!     let mut keys = KeyVoteAggregator::default();
//!     for secs in [0, 2, 4] {
//!         let estimate = KeyEstimate::parse("G", "major", 0.7)?.ok_or("no key")?;
//!         keys.record(estimate.into_vote(Duration::from_secs(secs)));
//!     }
//!     let key = keys.compute(Duration::from_secs(4)).ok_or("not enough votes")?;
//!     assert_eq!((key.key, key.scale), (NoteName::G, Scale::Major));
//!
//!     Ok(())
//! }
//! # run().unwrap();
//! ```
//!
//! ## Features
//! - `serde`: derives `Serialize`/`Deserialize` for configs and value types

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rust_2018_idioms)]
#![deny(clippy::all)]

/// Audio buffers and signal gating.
pub use frame::{FrameError, SampleFrame};
pub use gate::{rms, SignalGate};

/// Note names and frequency conversion.
pub use note::{
    format_cents, freq_to_midi_note, frequency_to_note, NoteEvent, NoteName, ParseNoteError,
    TuningAccuracy,
};

/// Spectrum, chroma and chord matching.
pub use chord_matcher::{
    cosine_similarity, format_chord_name, match_chord, rotate_template, ChordMatch, ChordMatcher,
    ChordMatcherBuilder, ChordMatcherError, ChordQuality, ChordTemplate,
};
pub use chord_tracker::{ChordStabilizer, ChordTracker};
pub use chroma::{
    extract_chroma, ChromaError, ChromaExtractor, ChromaExtractorBuilder, ChromaVector,
};
pub use spectrum::{SpectrumAnalyzer, SpectrumAnalyzerBuilder, SpectrumError};

/// Pitch smoothing and note hysteresis.
pub use pitch::{
    NoteStabilizer, NoteStabilizerBuilder, NoteStabilizerConfig, NoteStabilizerError, NoteUpdate,
    PitchEstimator, PitchSample,
};

/// Key voting.
pub use key::{
    calculate_key_scores, find_best_key, recency_weight, BestKey, KeyError, KeyEstimate, KeyInfo,
    KeyScore, KeyVote, KeyVoteAggregator, KeyVoteConfig, KeyVoteConfigError, Scale,
};
pub use key_detector::{
    ExtractorError, ExtractorStatus, KeyDetectionError, KeyDetector, KeyDetectorConfig,
    KeyExtractor,
};

/// Tempo aggregation.
pub use tempo::{TempoAggregator, TempoCandidate, TempoConfig, TempoEvent, TempoState};

/// Session driver.
pub use session::{AnalysisSession, SessionConfig, SessionError, SessionSnapshot};

/// Sample buffers.
pub mod frame;

/// RMS presence gate.
pub mod gate;

/// Equal-tempered note math.
pub mod note;

/// Windowed magnitude spectrum.
pub mod spectrum;

/// Twelve-bin chroma vectors.
pub mod chroma;

/// Chord template matching.
pub mod chord_matcher;

/// Chord stability over ticks.
pub mod chord_tracker;

/// Pitch estimate stabilization.
pub mod pitch;

/// Weighted key voting.
pub mod key;

/// Key extraction plumbing.
pub mod key_detector;

/// Tempo event aggregation.
pub mod tempo;

/// Per-session tick driver.
pub mod session;
