//! Key Detector
//!
//! Collects a few seconds of gated audio, hands it to an injected key
//! extractor on demand and feeds the result into a [`KeyVoteAggregator`].
//!
//! The extractor handle is owned by the detector and attached explicitly:
//! until it is attached (or if loading it failed) analysis reports a
//! checkable "not ready" error instead of silently doing nothing.

use log::{debug, warn};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

use crate::frame::SampleFrame;
use crate::gate::SignalGate;
use crate::key::{KeyEstimate, KeyInfo, KeyVoteAggregator, KeyVoteConfig, KeyVoteConfigError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Failure reported by an external key extractor.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractorError {
    /// The extractor could not be initialized.
    #[error("key extractor failed to load: {0}")]
    Load(String),

    /// The extractor rejected or failed on the given audio.
    #[error("key extraction failed: {0}")]
    Extraction(String),
}

/// An external key extractor working on multi-second audio.
pub trait KeyExtractor {
    /// Estimate the key of `samples`.
    ///
    /// `Ok(None)` means the extractor ran but found no key.
    fn extract_key(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Option<KeyEstimate>, ExtractorError>;
}

/// Readiness of the injected extractor.
#[derive(Debug)]
pub enum ExtractorStatus<E> {
    /// No handle attached yet.
    Pending,
    /// Ready to analyse.
    Ready(E),
    /// Loading failed; analysis is unavailable.
    Failed(ExtractorError),
}

/// Errors from [`KeyDetector::analyze`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KeyDetectionError {
    /// The extractor has not been attached yet.
    #[error("key extractor is not ready")]
    NotReady,

    /// The extractor failed to load.
    #[error("key extractor unavailable: {0}")]
    Unavailable(ExtractorError),

    /// The extractor failed on the buffered audio.
    #[error(transparent)]
    Extractor(#[from] ExtractorError),

    /// The vote configuration is invalid.
    #[error(transparent)]
    Config(#[from] KeyVoteConfigError),
}

/// Tuning of a [`KeyDetector`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyDetectorConfig {
    /// Gate applied before a frame is buffered.
    pub gate: SignalGate,
    /// Seconds of audio handed to the extractor.
    pub buffer_duration: Duration,
    /// Vote aggregation tuning.
    pub votes: KeyVoteConfig,
}

impl Default for KeyDetectorConfig {
    fn default() -> Self {
        KeyDetectorConfig {
            gate: SignalGate::for_key(),
            buffer_duration: Duration::from_secs(3),
            votes: KeyVoteConfig::default(),
        }
    }
}

/// Audio collector, extractor handle and vote aggregator for one session.
#[derive(Debug)]
pub struct KeyDetector<E> {
    gate: SignalGate,
    buffer_duration: Duration,
    frames: VecDeque<Vec<f32>>,
    sample_rate: u32,
    extractor: ExtractorStatus<E>,
    aggregator: KeyVoteAggregator,
}

impl<E: KeyExtractor> KeyDetector<E> {
    /// Detector with no extractor attached yet.
    pub fn new(config: KeyDetectorConfig) -> Result<Self, KeyDetectionError> {
        Ok(KeyDetector {
            gate: config.gate,
            buffer_duration: config.buffer_duration,
            frames: VecDeque::new(),
            sample_rate: 0,
            extractor: ExtractorStatus::Pending,
            aggregator: KeyVoteAggregator::new(config.votes)?,
        })
    }

    /// Detector with a ready extractor.
    pub fn with_extractor(
        config: KeyDetectorConfig,
        extractor: E,
    ) -> Result<Self, KeyDetectionError> {
        let mut detector = Self::new(config)?;
        detector.attach(Ok(extractor));
        Ok(detector)
    }

    /// Attach the outcome of loading the extractor.
    pub fn attach(&mut self, loaded: Result<E, ExtractorError>) {
        self.extractor = match loaded {
            Ok(e) => ExtractorStatus::Ready(e),
            Err(err) => {
                warn!("key extractor unavailable: {err}");
                ExtractorStatus::Failed(err)
            }
        };
    }

    /// `true` once a working extractor is attached.
    pub fn is_ready(&self) -> bool {
        matches!(self.extractor, ExtractorStatus::Ready(_))
    }

    /// Current extractor state.
    pub fn status(&self) -> &ExtractorStatus<E> {
        &self.extractor
    }

    /// Buffer `frame` if it passes the key gate, dropping the oldest frames
    /// beyond the buffer duration. Returns whether the frame was kept.
    pub fn collect(&mut self, frame: &SampleFrame) -> bool {
        if !self.gate.gate(frame.samples()) {
            return false;
        }
        if self.sample_rate != frame.sample_rate() {
            if !self.frames.is_empty() {
                debug!(
                    "key buffer flushed: sample rate changed {} -> {}",
                    self.sample_rate,
                    frame.sample_rate()
                );
            }
            self.frames.clear();
            self.sample_rate = frame.sample_rate();
        }

        let max_frames = (self.buffer_duration.as_secs_f64() * frame.sample_rate() as f64
            / frame.len() as f64)
            .ceil()
            .max(1.0) as usize;

        self.frames.push_back(frame.samples().to_vec());
        while self.frames.len() > max_frames {
            self.frames.pop_front();
        }
        true
    }

    /// Number of samples waiting for analysis.
    pub fn buffered_samples(&self) -> usize {
        self.frames.iter().map(Vec::len).sum()
    }

    /// Run the extractor over the buffered audio, record its vote and return
    /// the stabilized key.
    ///
    /// With nothing buffered the extractor is skipped and the stabilized key
    /// is recomputed from the existing votes. On extractor failure the
    /// buffer, votes and established key are left untouched.
    pub fn analyze(&mut self, now: Duration) -> Result<Option<KeyInfo>, KeyDetectionError> {
        let extractor = match &mut self.extractor {
            ExtractorStatus::Ready(e) => e,
            ExtractorStatus::Pending => return Err(KeyDetectionError::NotReady),
            ExtractorStatus::Failed(err) => return Err(KeyDetectionError::Unavailable(err.clone())),
        };

        if !self.frames.is_empty() {
            let combined: Vec<f32> = self.frames.iter().flatten().copied().collect();
            let estimate = extractor
                .extract_key(&combined, self.sample_rate)
                .map_err(|err| {
                    warn!("key detection error: {err}");
                    err
                })?;

            match estimate {
                Some(est) => {
                    self.aggregator.record(est.into_vote(now));
                }
                None => debug!("key extractor found no key in {} samples", combined.len()),
            }
            self.frames.clear();
        }

        Ok(self.aggregator.compute(now))
    }

    /// The vote aggregator.
    pub fn aggregator(&self) -> &KeyVoteAggregator {
        &self.aggregator
    }

    /// Clear buffered audio, votes and the established key. The extractor
    /// stays attached.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.sample_rate = 0;
        self.aggregator.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Scale;
    use crate::note::NoteName;

    /// Replays a fixed script of results and records the lengths it saw.
    #[derive(Debug)]
    struct Scripted {
        results: Vec<Result<Option<KeyEstimate>, ExtractorError>>,
        seen: Vec<usize>,
    }

    impl KeyExtractor for Scripted {
        fn extract_key(
            &mut self,
            samples: &[f32],
            _sample_rate: u32,
        ) -> Result<Option<KeyEstimate>, ExtractorError> {
            self.seen.push(samples.len());
            self.results.remove(0)
        }
    }

    fn estimate(
        key: NoteName,
        scale: Scale,
        strength: f32,
    ) -> Result<Option<KeyEstimate>, ExtractorError> {
        Ok(Some(KeyEstimate {
            key,
            scale,
            strength,
        }))
    }

    fn loud(len: usize) -> SampleFrame {
        SampleFrame::new(vec![0.1; len], 1_000).unwrap()
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn not_ready_until_attached() {
        let mut d: KeyDetector<Scripted> = KeyDetector::new(KeyDetectorConfig::default()).unwrap();
        assert!(!d.is_ready());
        assert_eq!(d.analyze(secs(0)), Err(KeyDetectionError::NotReady));

        d.attach(Err(ExtractorError::Load("wasm missing".into())));
        assert!(matches!(d.analyze(secs(0)), Err(KeyDetectionError::Unavailable(_))));
    }

    #[test]
    fn gate_and_buffer_bound() {
        let script = Scripted {
            results: vec![],
            seen: vec![],
        };
        let mut d = KeyDetector::with_extractor(KeyDetectorConfig::default(), script).unwrap();

        let quiet = SampleFrame::new(vec![0.008; 500], 1_000).unwrap();
        assert!(!d.collect(&quiet));

        // 3 s at 1 kHz in 500-sample frames = 6 frames
        for _ in 0..10 {
            assert!(d.collect(&loud(500)));
        }
        assert_eq!(d.buffered_samples(), 3_000);
    }

    #[test]
    fn votes_accumulate_into_a_key() {
        let script = Scripted {
            results: vec![
                estimate(NoteName::G, Scale::Major, 0.7),
                estimate(NoteName::G, Scale::Major, 0.8),
                estimate(NoteName::G, Scale::Major, 0.9),
            ],
            seen: vec![],
        };
        let mut d = KeyDetector::with_extractor(KeyDetectorConfig::default(), script).unwrap();

        for t in 0..2 {
            d.collect(&loud(1_000));
            assert_eq!(d.analyze(secs(2 * t)).unwrap(), None);
        }
        d.collect(&loud(1_000));
        let info = d.analyze(secs(4)).unwrap().unwrap();
        assert_eq!((info.key, info.scale), (NoteName::G, Scale::Major));
        assert!((info.strength - 0.8).abs() < 1e-5);
        assert_eq!(d.buffered_samples(), 0);
    }

    #[test]
    fn failure_leaves_state_untouched() {
        let script = Scripted {
            results: vec![
                estimate(NoteName::D, Scale::Minor, 0.6),
                estimate(NoteName::D, Scale::Minor, 0.6),
                estimate(NoteName::D, Scale::Minor, 0.6),
                Err(ExtractorError::Extraction("binding error".into())),
            ],
            seen: vec![],
        };
        let mut d = KeyDetector::with_extractor(KeyDetectorConfig::default(), script).unwrap();
        for t in 0..3 {
            d.collect(&loud(1_000));
            d.analyze(secs(t)).unwrap();
        }
        d.collect(&loud(1_000));
        assert!(matches!(d.analyze(secs(3)), Err(KeyDetectionError::Extractor(_))));
        assert_eq!(d.buffered_samples(), 1_000);
        assert_eq!(d.aggregator().len(), 3);
        assert_eq!(d.aggregator().current_key(), Some((NoteName::D, Scale::Minor)));
    }

    #[test]
    fn weak_or_missing_results_do_not_vote() {
        let script = Scripted {
            results: vec![Ok(None), estimate(NoteName::C, Scale::Major, 0.1)],
            seen: vec![],
        };
        let mut d = KeyDetector::with_extractor(KeyDetectorConfig::default(), script).unwrap();
        d.collect(&loud(1_000));
        d.analyze(secs(0)).unwrap();
        d.collect(&loud(1_000));
        d.analyze(secs(2)).unwrap();
        assert!(d.aggregator().is_empty());
    }

    #[test]
    fn empty_buffer_skips_extractor() {
        let script = Scripted {
            results: vec![],
            seen: vec![],
        };
        let mut d = KeyDetector::with_extractor(KeyDetectorConfig::default(), script).unwrap();
        assert_eq!(d.analyze(secs(0)).unwrap(), None);
        match d.status() {
            ExtractorStatus::Ready(s) => assert!(s.seen.is_empty()),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn reset_keeps_extractor() {
        let script = Scripted {
            results: vec![],
            seen: vec![],
        };
        let mut d = KeyDetector::with_extractor(KeyDetectorConfig::default(), script).unwrap();
        d.collect(&loud(1_000));
        d.reset();
        assert_eq!(d.buffered_samples(), 0);
        assert!(d.is_ready());
    }
}
