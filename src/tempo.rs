//! Tempo Aggregator
//!
//! Folds the event stream of an external beat analyzer into a single
//! displayable BPM with a bounded confidence.

use log::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One beat-analyzer guess.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TempoCandidate {
    /// Tempo in BPM.
    pub tempo: f32,
    /// Number of analyzer votes behind the guess.
    pub count: u32,
}

/// Event emitted by the beat analyzer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TempoEvent {
    /// Ranked guesses, best first.
    Candidates(Vec<TempoCandidate>),
    /// The analyzer settled on a tempo.
    Stable(TempoCandidate),
}

/// Stabilized tempo.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TempoState {
    /// Rounded BPM, if any guess has been seen.
    pub bpm: Option<u32>,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl TempoState {
    /// Confidence as a whole percentage.
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u32
    }

    /// `true` while no confidence has been built up yet.
    pub fn is_analyzing(&self) -> bool {
        self.confidence <= 0.0
    }
}

/// Tuning of a [`TempoAggregator`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TempoConfig {
    /// Vote count at which a candidate reaches full confidence.
    pub full_confidence_votes: u32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        TempoConfig {
            full_confidence_votes: 100,
        }
    }
}

/// Maintains [`TempoState`] from beat-analyzer events.
#[derive(Debug, Clone, Default)]
pub struct TempoAggregator {
    config: TempoConfig,
    state: TempoState,
    stable: bool,
}

impl TempoAggregator {
    /// Aggregator with the given tuning. A zero vote count is treated as 1.
    pub fn new(config: TempoConfig) -> Self {
        TempoAggregator {
            config: TempoConfig {
                full_confidence_votes: config.full_confidence_votes.max(1),
            },
            state: TempoState::default(),
            stable: false,
        }
    }

    /// Take the top-ranked candidate. Ignored once the tempo is stable.
    pub fn on_candidates(&mut self, candidates: &[TempoCandidate]) -> TempoState {
        if self.stable {
            return self.state;
        }
        let Some(top) = candidates.first() else {
            return self.state;
        };
        let Some(bpm) = round_tempo(top.tempo) else {
            debug!("tempo candidate ignored: {}", top.tempo);
            return self.state;
        };

        let confidence = (top.count as f32 / self.config.full_confidence_votes as f32).min(1.0);
        self.state = TempoState {
            bpm: Some(bpm),
            confidence,
        };
        self.state
    }

    /// Lock onto the analyzer's resolved tempo at full confidence.
    pub fn on_stable(&mut self, tempo: f32) -> TempoState {
        let Some(bpm) = round_tempo(tempo) else {
            debug!("stable tempo ignored: {tempo}");
            return self.state;
        };
        if !self.stable || self.state.bpm != Some(bpm) {
            debug!("tempo stable at {bpm} BPM");
        }
        self.stable = true;
        self.state = TempoState {
            bpm: Some(bpm),
            confidence: 1.0,
        };
        self.state
    }

    /// Dispatch one analyzer event.
    pub fn handle(&mut self, event: &TempoEvent) -> TempoState {
        match event {
            TempoEvent::Candidates(list) => self.on_candidates(list),
            TempoEvent::Stable(c) => self.on_stable(c.tempo),
        }
    }

    /// Current state.
    pub fn state(&self) -> TempoState {
        self.state
    }

    /// `true` once a stable event has been seen.
    pub fn is_stable(&self) -> bool {
        self.stable
    }

    /// Back to `{bpm: None, confidence: 0}`.
    pub fn reset(&mut self) {
        self.state = TempoState::default();
        self.stable = false;
    }
}

fn round_tempo(tempo: f32) -> Option<u32> {
    if tempo.is_finite() && tempo > 0.0 {
        Some(tempo.round() as u32)
    } else {
        None
    }
}
