//! Pitch
//!
//! Turns a per-frame stream of raw pitch estimates into a throttled stream
//! of stable notes: confidence/range rejection, exponential smoothing of the
//! frequency, note-identity hysteresis and a minimum interval between
//! surfaced updates.

use log::{debug, trace};
use std::time::Duration;
use thiserror::Error;

use crate::frame::SampleFrame;
use crate::gate::SignalGate;
use crate::note::{frequency_to_note, NoteEvent};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One raw estimate from an external pitch detector.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PitchSample {
    frequency: f32,
    confidence: f32,
}

impl PitchSample {
    /// Validate a raw estimate. The frequency must be finite and positive;
    /// the confidence must be finite and is clamped to `0.0..=1.0`.
    pub fn new(frequency: f32, confidence: f32) -> Option<Self> {
        if !frequency.is_finite() || frequency <= 0.0 || !confidence.is_finite() {
            return None;
        }
        Some(PitchSample {
            frequency,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    /// Estimated fundamental in Hz.
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Estimator confidence in `0.0..=1.0`.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// An external raw pitch detector (autocorrelation, YIN, MPM...).
pub trait PitchEstimator {
    /// Estimate the fundamental of `samples`, or `None` if no pitch was found.
    fn estimate(&mut self, samples: &[f32], sample_rate: u32) -> Option<PitchSample>;
}

impl<F> PitchEstimator for F
where
    F: FnMut(&[f32], u32) -> Option<PitchSample>,
{
    fn estimate(&mut self, samples: &[f32], sample_rate: u32) -> Option<PitchSample> {
        self(samples, sample_rate)
    }
}

/// A change surfaced to the display.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NoteUpdate {
    /// A stable note; its frequency is the smoothed one.
    Note(NoteEvent),
    /// No usable pitch: silence, low confidence or out of range.
    Silence,
}

impl NoteUpdate {
    /// The note, if any.
    pub fn note(&self) -> Option<&NoteEvent> {
        match self {
            NoteUpdate::Note(n) => Some(n),
            NoteUpdate::Silence => None,
        }
    }
}

/// Errors when validating a [`NoteStabilizerConfig`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NoteStabilizerError {
    /// An invalid argument was provided to the builder.
    #[error("invalid argument `{arg}`: {msg}")]
    InvalidArgument {
        /// The name of the invalid argument.
        arg: &'static str,
        /// A description of the invalid argument.
        msg: String,
    },
}

/// Tuning of a [`NoteStabilizer`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NoteStabilizerConfig {
    /// Presence gate applied to frames in [`NoteStabilizer::tick`].
    pub gate: SignalGate,
    /// Estimates must be strictly more confident than this.
    pub min_confidence: f32,
    /// Exclusive lower bound of the accepted range in Hz.
    pub min_frequency: f32,
    /// Exclusive upper bound of the accepted range in Hz.
    pub max_frequency: f32,
    /// Weight of the newest estimate in the moving average.
    pub smoothing_alpha: f32,
    /// Consecutive frames with the same note before it is surfaced.
    pub stable_frames: u32,
    /// Minimum time between surfaced updates.
    pub update_interval: Duration,
}

impl Default for NoteStabilizerConfig {
    fn default() -> Self {
        NoteStabilizerConfig {
            gate: SignalGate::default(),
            min_confidence: 0.8,
            min_frequency: 70.0,
            max_frequency: 2000.0,
            smoothing_alpha: 0.2,
            stable_frames: 4,
            update_interval: Duration::from_millis(100),
        }
    }
}

impl NoteStabilizerConfig {
    /// Check ranges: `alpha` in `(0, 1]`, a non-empty frequency range,
    /// confidence in `0..=1` and at least one stable frame.
    pub fn validate(&self) -> Result<(), NoteStabilizerError> {
        let invalid = |arg, msg: &str| {
            Err(NoteStabilizerError::InvalidArgument {
                arg,
                msg: msg.to_string(),
            })
        };
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return invalid("smoothing_alpha", "must be within (0, 1]");
        }
        if !(self.min_frequency >= 0.0 && self.max_frequency > self.min_frequency) {
            return invalid("max_frequency", "must be greater than min_frequency");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return invalid("min_confidence", "must be within 0..=1");
        }
        if self.stable_frames == 0 {
            return invalid("stable_frames", "must be >= 1");
        }
        Ok(())
    }
}

/// Builder for a [`NoteStabilizer`].
#[derive(Debug, Clone, Default)]
pub struct NoteStabilizerBuilder {
    config: NoteStabilizerConfig,
}

impl NoteStabilizerBuilder {
    /// Start from [`NoteStabilizerConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the presence gate.
    pub fn gate(mut self, gate: SignalGate) -> Self {
        self.config.gate = gate;
        self
    }

    /// Set the minimum estimator confidence.
    pub fn min_confidence(mut self, value: f32) -> Self {
        self.config.min_confidence = value;
        self
    }

    /// Set the accepted frequency range (exclusive bounds).
    pub fn frequency_range(mut self, min_hz: f32, max_hz: f32) -> Self {
        self.config.min_frequency = min_hz;
        self.config.max_frequency = max_hz;
        self
    }

    /// Set the moving-average weight of new estimates.
    pub fn smoothing_alpha(mut self, alpha: f32) -> Self {
        self.config.smoothing_alpha = alpha;
        self
    }

    /// Set the number of agreeing frames required.
    pub fn stable_frames(mut self, frames: u32) -> Self {
        self.config.stable_frames = frames;
        self
    }

    /// Set the minimum time between surfaced updates.
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.config.update_interval = interval;
        self
    }

    /// Finalize and create the stabilizer.
    pub fn build(self) -> Result<NoteStabilizer, NoteStabilizerError> {
        NoteStabilizer::with_config(self.config)
    }
}

/// Smoothing and hysteresis state for one pitch stream.
#[derive(Debug, Clone)]
pub struct NoteStabilizer {
    config: NoteStabilizerConfig,
    smoothed: Option<f32>,
    last_label: Option<String>,
    consecutive: u32,
    last_update: Option<Duration>,
    current: Option<NoteEvent>,
}

impl NoteStabilizer {
    /// Start customizing with a builder.
    pub fn builder() -> NoteStabilizerBuilder {
        NoteStabilizerBuilder::new()
    }

    /// Create a stabilizer with a validated configuration.
    pub fn with_config(config: NoteStabilizerConfig) -> Result<Self, NoteStabilizerError> {
        config.validate()?;
        Ok(NoteStabilizer {
            config,
            smoothed: None,
            last_label: None,
            consecutive: 0,
            last_update: None,
            current: None,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &NoteStabilizerConfig {
        &self.config
    }

    /// Gate `frame`, run `estimator` on it if there is signal, and ingest
    /// the result. The estimator is never called on silence.
    pub fn tick<E>(
        &mut self,
        frame: &SampleFrame,
        estimator: &mut E,
        now: Duration,
    ) -> Option<NoteUpdate>
    where
        E: PitchEstimator + ?Sized,
    {
        let sample = if self.config.gate.gate(frame.samples()) {
            estimator.estimate(frame.samples(), frame.sample_rate())
        } else {
            None
        };
        self.ingest(sample, now)
    }

    /// Feed one frame's raw estimate (`None` for silence or no pitch).
    ///
    /// Returns `Some` only when an update is surfaced to the display.
    pub fn ingest(&mut self, sample: Option<PitchSample>, now: Duration) -> Option<NoteUpdate> {
        let throttle_open = match self.last_update {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.config.update_interval,
        };

        let Some(sample) = sample.filter(|s| self.accepts(s)) else {
            if !throttle_open {
                return None;
            }
            self.clear_tracking();
            self.current = None;
            self.last_update = Some(now);
            return Some(NoteUpdate::Silence);
        };

        let alpha = self.config.smoothing_alpha;
        let smoothed = match self.smoothed {
            None => sample.frequency,
            Some(prev) => prev * (1.0 - alpha) + sample.frequency * alpha,
        };
        self.smoothed = Some(smoothed);

        let note = frequency_to_note(smoothed)?;
        let label = note.label();
        if self.last_label.as_deref() == Some(label.as_str()) {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            trace!("note candidate {label} at {smoothed:.2} Hz");
            self.consecutive = 1;
            self.last_label = Some(label);
        }

        if throttle_open && self.consecutive >= self.config.stable_frames {
            if self.current.map(|c| (c.name, c.octave)) != Some((note.name, note.octave)) {
                debug!("note stable: {note} ({:+} cents)", note.cents);
            }
            self.current = Some(note);
            self.last_update = Some(now);
            return Some(NoteUpdate::Note(note));
        }
        None
    }

    /// The last surfaced note.
    pub fn current(&self) -> Option<&NoteEvent> {
        self.current.as_ref()
    }

    /// The current moving-average frequency.
    pub fn smoothed_frequency(&self) -> Option<f32> {
        self.smoothed
    }

    /// Return to a cold state, including the throttle clock.
    pub fn reset(&mut self) {
        self.clear_tracking();
        self.current = None;
        self.last_update = None;
    }

    fn accepts(&self, sample: &PitchSample) -> bool {
        sample.confidence > self.config.min_confidence
            && sample.frequency > self.config.min_frequency
            && sample.frequency < self.config.max_frequency
    }

    fn clear_tracking(&mut self) {
        self.smoothed = None;
        self.last_label = None;
        self.consecutive = 0;
    }
}

impl Default for NoteStabilizer {
    fn default() -> Self {
        NoteStabilizer {
            config: NoteStabilizerConfig::default(),
            smoothed: None,
            last_label: None,
            consecutive: 0,
            last_update: None,
            current: None,
        }
    }
}
