//! Analysis Session
//!
//! Single-owner driver for one listening session. Every frame goes through
//! the note stabilizer and the key collector; the chord path and key
//! analysis run on their own coarser intervals. Tempo arrives as events.

use log::{debug, info, warn};
use std::time::Duration;
use thiserror::Error;

use crate::chord_matcher::{ChordMatch, ChordMatcher, ChordMatcherError};
use crate::chord_tracker::{ChordStabilizer, ChordTracker};
use crate::chroma::{ChromaError, ChromaExtractor};
use crate::frame::SampleFrame;
use crate::gate::SignalGate;
use crate::key::KeyInfo;
use crate::key_detector::{KeyDetectionError, KeyDetector, KeyDetectorConfig, KeyExtractor};
use crate::pitch::{
    NoteStabilizer, NoteStabilizerConfig, NoteStabilizerError, NoteUpdate, PitchEstimator,
};
use crate::spectrum::{SpectrumAnalyzer, SpectrumError};
use crate::tempo::{TempoAggregator, TempoConfig, TempoEvent, TempoState};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Errors raised while assembling a session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    /// Bad spectrum settings.
    #[error(transparent)]
    Spectrum(#[from] SpectrumError),

    /// Bad chroma band.
    #[error(transparent)]
    Chroma(#[from] ChromaError),

    /// Bad chord matcher settings.
    #[error(transparent)]
    ChordMatcher(#[from] ChordMatcherError),

    /// Bad note stabilizer settings.
    #[error(transparent)]
    Note(#[from] NoteStabilizerError),

    /// Bad key detector settings.
    #[error(transparent)]
    Key(#[from] KeyDetectionError),
}

/// Configuration of every detector in a session.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionConfig {
    /// Note path.
    pub note: NoteStabilizerConfig,
    /// Gate in front of the chord path.
    pub chord_gate: SignalGate,
    /// Minimum template similarity for a chord.
    pub chord_min_confidence: f32,
    /// Consecutive chord ticks before a chord is displayed.
    pub chord_stable_ticks: u32,
    /// Time between chord ticks.
    pub chord_interval: Duration,
    /// FFT size of the chord spectrum.
    pub fft_size: usize,
    /// Floor of the chord spectrum in dB.
    pub min_decibels: f32,
    /// Spectral smoothing between chord ticks.
    pub smoothing_time_constant: f32,
    /// Lowest frequency folded into the chroma.
    pub chroma_min_frequency: f32,
    /// Highest frequency folded into the chroma.
    pub chroma_max_frequency: f32,
    /// Key path.
    pub key: KeyDetectorConfig,
    /// Time between key analyses.
    pub key_interval: Duration,
    /// Tempo path.
    pub tempo: TempoConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            note: NoteStabilizerConfig::default(),
            chord_gate: SignalGate::default(),
            chord_min_confidence: 0.6,
            chord_stable_ticks: ChordStabilizer::DEFAULT_REQUIRED_TICKS,
            chord_interval: Duration::from_millis(150),
            fft_size: 2048,
            min_decibels: -100.0,
            smoothing_time_constant: 0.8,
            chroma_min_frequency: 65.0,
            chroma_max_frequency: 2000.0,
            key: KeyDetectorConfig::default(),
            key_interval: Duration::from_secs(2),
            tempo: TempoConfig::default(),
        }
    }
}

/// What the display should show after a frame.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionSnapshot {
    /// Note update surfaced by this frame, if any.
    pub note: Option<NoteUpdate>,
    /// Chord on display.
    pub chord: Option<ChordMatch>,
    /// Last established key.
    pub key: Option<KeyInfo>,
    /// Current tempo.
    pub tempo: TempoState,
}

/// All per-session state, owned by one caller.
pub struct AnalysisSession<P, K> {
    pitch_estimator: P,
    notes: NoteStabilizer,
    chords: ChordTracker,
    keys: KeyDetector<K>,
    tempo: TempoAggregator,
    chord_interval: Duration,
    key_interval: Duration,
    last_chord_tick: Option<Duration>,
    last_key_tick: Option<Duration>,
    key: Option<KeyInfo>,
}

impl<P: PitchEstimator, K: KeyExtractor> AnalysisSession<P, K> {
    /// Assemble a session. The key extractor can be attached later with
    /// [`AnalysisSession::key_detector_mut`].
    pub fn new(config: SessionConfig, pitch_estimator: P) -> Result<Self, SessionError> {
        let spectrum = SpectrumAnalyzer::builder()
            .fft_size(config.fft_size)
            .min_decibels(config.min_decibels)
            .smoothing_time_constant(config.smoothing_time_constant)
            .build()?;
        let extractor = ChromaExtractor::builder()
            .min_frequency(config.chroma_min_frequency)
            .max_frequency(config.chroma_max_frequency)
            .build()?;
        let matcher = ChordMatcher::builder()
            .min_confidence(config.chord_min_confidence)
            .build()?;

        Ok(AnalysisSession {
            pitch_estimator,
            notes: NoteStabilizer::with_config(config.note)?,
            chords: ChordTracker::new(
                config.chord_gate,
                spectrum,
                extractor,
                matcher,
                ChordStabilizer::new(config.chord_stable_ticks),
            ),
            keys: KeyDetector::new(config.key)?,
            tempo: TempoAggregator::new(config.tempo),
            chord_interval: config.chord_interval,
            key_interval: config.key_interval,
            last_chord_tick: None,
            last_key_tick: None,
            key: None,
        })
    }

    /// Assemble a session with a ready key extractor.
    pub fn with_key_extractor(
        config: SessionConfig,
        pitch_estimator: P,
        key_extractor: K,
    ) -> Result<Self, SessionError> {
        let mut session = Self::new(config, pitch_estimator)?;
        session.keys.attach(Ok(key_extractor));
        Ok(session)
    }

    /// Run one frame through every detector that is due at `now`.
    ///
    /// Frames shorter than `fft_size` skip the chord path and leave the
    /// displayed chord as it was; the note and key paths still run.
    pub fn process_frame(
        &mut self,
        frame: &SampleFrame,
        now: Duration,
    ) -> Result<SessionSnapshot, SpectrumError> {
        if self.last_chord_tick.is_none() && self.last_key_tick.is_none() {
            info!("analysis session started ({} Hz)", frame.sample_rate());
        }

        let note = self.notes.tick(frame, &mut self.pitch_estimator, now);
        self.keys.collect(frame);

        match self.last_key_tick {
            None => self.last_key_tick = Some(now),
            Some(_) if due(self.last_key_tick, now, self.key_interval) => {
                self.last_key_tick = Some(now);
                self.analyze_key(now);
            }
            Some(_) => {}
        }

        if due(self.last_chord_tick, now, self.chord_interval) {
            self.last_chord_tick = Some(now);
            if frame.len() < self.chords.fft_size() {
                debug!(
                    "chord tick skipped: frame of {} samples, need {}",
                    frame.len(),
                    self.chords.fft_size()
                );
            } else {
                self.chords.tick(frame)?;
            }
        }

        Ok(SessionSnapshot {
            note,
            chord: self.chords.current().cloned(),
            key: self.key,
            tempo: self.tempo.state(),
        })
    }

    fn analyze_key(&mut self, now: Duration) {
        match self.keys.analyze(now) {
            Ok(Some(info)) => self.key = Some(info),
            Ok(None) => {}
            Err(KeyDetectionError::NotReady) => {}
            Err(err) => warn!("key analysis skipped: {err}"),
        }
    }

    /// Forward a beat-analyzer event.
    pub fn handle_tempo(&mut self, event: &TempoEvent) -> TempoState {
        self.tempo.handle(event)
    }

    /// Last established key.
    pub fn key(&self) -> Option<KeyInfo> {
        self.key
    }

    /// Chord on display.
    pub fn chord(&self) -> Option<&ChordMatch> {
        self.chords.current()
    }

    /// Current tempo.
    pub fn tempo(&self) -> TempoState {
        self.tempo.state()
    }

    /// The key detector, for attaching its extractor.
    pub fn key_detector_mut(&mut self) -> &mut KeyDetector<K> {
        &mut self.keys
    }

    /// Stop listening: every stabilizer returns to a cold state.
    pub fn stop(&mut self) {
        self.notes.reset();
        self.chords.reset();
        self.keys.reset();
        self.tempo.reset();
        self.last_chord_tick = None;
        self.last_key_tick = None;
        self.key = None;
        info!("analysis session stopped");
    }
}

fn due(last: Option<Duration>, now: Duration, interval: Duration) -> bool {
    match last {
        None => true,
        Some(t) => now.saturating_sub(t) >= interval,
    }
}
