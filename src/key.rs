//! Key
//!
//! Weighted key voting. Raw key detections arrive every few seconds; each is
//! kept in a small FIFO window, weighted by strength and by an exponential
//! recency decay, and a challenger only replaces the established key once
//! it holds a large enough share of the weighted evidence.

use log::debug;
use std::collections::VecDeque;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::note::NoteName;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Major or minor mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Scale {
    /// Major (Ionian) mode
    Major,
    /// Natural minor (Aeolian) mode
    Minor,
}

impl Scale {
    /// Lowercase name, e.g. `"minor"`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Scale::Major => "major",
            Scale::Minor => "minor",
        }
    }
}

impl Display for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scale {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "major" | "maj" => Ok(Scale::Major),
            "minor" | "min" => Ok(Scale::Minor),
            _ => Err(KeyError::UnknownScale(s.to_string())),
        }
    }
}

/// Errors validating raw key-extractor output.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KeyError {
    /// The key name is not a pitch class.
    #[error("unrecognized key `{0}`")]
    UnknownKey(String),

    /// The scale is neither major nor minor.
    #[error("unrecognized scale `{0}`")]
    UnknownScale(String),

    /// The strength was NaN or infinite.
    #[error("key strength must be finite, got {0}")]
    InvalidStrength(f32),
}

/// One validated result of an external key extractor.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyEstimate {
    /// Tonic.
    pub key: NoteName,
    /// Mode.
    pub scale: Scale,
    /// Extractor strength, nominally `0.0..=1.0`.
    pub strength: f32,
}

impl KeyEstimate {
    /// Validate a stringly-typed extractor result.
    ///
    /// `Ok(None)` means the extractor reported no key (empty key string).
    pub fn parse(key: &str, scale: &str, strength: f32) -> Result<Option<Self>, KeyError> {
        if key.trim().is_empty() {
            return Ok(None);
        }
        let key = key
            .parse::<NoteName>()
            .map_err(|_| KeyError::UnknownKey(key.to_string()))?;
        let scale = scale.parse::<Scale>()?;
        if !strength.is_finite() {
            return Err(KeyError::InvalidStrength(strength));
        }
        Ok(Some(KeyEstimate {
            key,
            scale,
            strength,
        }))
    }

    /// Stamp this estimate as a vote taken at `timestamp`.
    pub fn into_vote(self, timestamp: Duration) -> KeyVote {
        KeyVote {
            key: self.key,
            scale: self.scale,
            strength: self.strength,
            timestamp,
        }
    }
}

/// One raw key detection with the time it was made.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyVote {
    /// Tonic.
    pub key: NoteName,
    /// Mode.
    pub scale: Scale,
    /// Extractor strength.
    pub strength: f32,
    /// Session time of the detection.
    pub timestamp: Duration,
}

/// The stabilized key reported to the display.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyInfo {
    /// Tonic.
    pub key: NoteName,
    /// Mode.
    pub scale: Scale,
    /// Mean unweighted strength of this key's votes in the window.
    pub strength: f32,
}

impl Display for KeyInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.key, self.scale)
    }
}

/// Aggregated evidence for one (key, scale).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct KeyScore {
    /// Tonic.
    pub key: NoteName,
    /// Mode.
    pub scale: Scale,
    /// Sum of `strength * recency_weight`.
    pub total_weight: f32,
    /// Sum of raw strengths.
    pub total_strength: f32,
    /// Number of votes.
    pub count: usize,
}

impl KeyScore {
    /// Mean raw strength.
    pub fn average_strength(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        self.total_strength / self.count as f32
    }

    fn is(&self, key: NoteName, scale: Scale) -> bool {
        self.key == key && self.scale == scale
    }
}

/// Winner of a set of [`KeyScore`]s.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BestKey {
    /// Index into the scores, `None` when no score has positive weight.
    pub index: Option<usize>,
    /// Winner's share of the total weight, `0.0` when there is none.
    pub vote_ratio: f32,
    /// Sum of all weights.
    pub total_weight: f32,
}

/// `exp(-age / time_constant)`; a zero time constant disables decay.
pub fn recency_weight(age: Duration, time_constant: Duration) -> f32 {
    if time_constant.is_zero() {
        return 1.0;
    }
    (-(age.as_secs_f64() / time_constant.as_secs_f64())).exp() as f32
}

/// Group `votes` by (key, scale) in first-seen order, summing decayed
/// weights, raw strengths and counts.
pub fn calculate_key_scores<'a, I>(
    votes: I,
    now: Duration,
    time_constant: Duration,
) -> Vec<KeyScore>
where
    I: IntoIterator<Item = &'a KeyVote>,
{
    let mut scores: Vec<KeyScore> = Vec::new();
    for vote in votes {
        let age = now.saturating_sub(vote.timestamp);
        let weight = vote.strength * recency_weight(age, time_constant);

        let idx = match scores.iter().position(|s| s.is(vote.key, vote.scale)) {
            Some(i) => i,
            None => {
                scores.push(KeyScore {
                    key: vote.key,
                    scale: vote.scale,
                    total_weight: 0.0,
                    total_strength: 0.0,
                    count: 0,
                });
                scores.len() - 1
            }
        };
        let score = &mut scores[idx];
        score.total_weight += weight;
        score.total_strength += vote.strength;
        score.count += 1;
    }
    scores
}

/// The score with the strictly largest weight (first wins ties).
pub fn find_best_key(scores: &[KeyScore]) -> BestKey {
    let mut index = None;
    let mut best = 0.0_f32;
    let mut total = 0.0_f32;
    for (i, s) in scores.iter().enumerate() {
        total += s.total_weight;
        if s.total_weight > best {
            best = s.total_weight;
            index = Some(i);
        }
    }
    BestKey {
        index,
        vote_ratio: if total > 0.0 { best / total } else { 0.0 },
        total_weight: total,
    }
}

/// Errors when validating a [`KeyVoteConfig`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KeyVoteConfigError {
    /// An invalid argument was provided.
    #[error("invalid argument `{arg}`: {msg}")]
    InvalidArgument {
        /// The name of the invalid argument.
        arg: &'static str,
        /// A description of the invalid argument.
        msg: String,
    },
}

/// Tuning of a [`KeyVoteAggregator`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyVoteConfig {
    /// Votes kept in the window.
    pub capacity: usize,
    /// Votes needed before any key is reported.
    pub min_votes: usize,
    /// Votes weaker than this are discarded.
    pub min_strength: f32,
    /// Weighted share a challenger needs to replace the current key.
    pub switching_threshold: f32,
    /// Recency decay time constant.
    pub decay_time_constant: Duration,
}

impl Default for KeyVoteConfig {
    fn default() -> Self {
        KeyVoteConfig {
            capacity: 8,
            min_votes: 3,
            min_strength: 0.3,
            switching_threshold: 0.6,
            decay_time_constant: Duration::from_secs(30),
        }
    }
}

impl KeyVoteConfig {
    /// Check that the window can ever reach `min_votes` and the threshold
    /// is a share.
    pub fn validate(&self) -> Result<(), KeyVoteConfigError> {
        if self.capacity == 0 || self.min_votes > self.capacity {
            return Err(KeyVoteConfigError::InvalidArgument {
                arg: "min_votes",
                msg: format!(
                    "must be <= capacity ({}) and capacity must be > 0",
                    self.capacity
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.switching_threshold) {
            return Err(KeyVoteConfigError::InvalidArgument {
                arg: "switching_threshold",
                msg: "must be within 0..=1".into(),
            });
        }
        if !self.min_strength.is_finite() {
            return Err(KeyVoteConfigError::InvalidArgument {
                arg: "min_strength",
                msg: "must be finite".into(),
            });
        }
        Ok(())
    }
}

/// Bounded vote window with decay-weighted voting and switch hysteresis.
#[derive(Debug, Clone)]
pub struct KeyVoteAggregator {
    config: KeyVoteConfig,
    votes: VecDeque<KeyVote>,
    current: Option<(NoteName, Scale)>,
}

impl KeyVoteAggregator {
    /// Aggregator with a validated configuration.
    pub fn new(config: KeyVoteConfig) -> Result<Self, KeyVoteConfigError> {
        config.validate()?;
        Ok(KeyVoteAggregator {
            votes: VecDeque::with_capacity(config.capacity),
            config,
            current: None,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &KeyVoteConfig {
        &self.config
    }

    /// `true` if a vote of this strength would be recorded.
    pub fn is_strong_enough(&self, strength: f32) -> bool {
        strength >= self.config.min_strength
    }

    /// Append `vote` if it clears the strength floor, evicting the oldest
    /// vote when the window is full. Returns whether it was recorded.
    pub fn record(&mut self, vote: KeyVote) -> bool {
        if !vote.strength.is_finite() || !self.is_strong_enough(vote.strength) {
            debug!(
                "key vote {} {} dropped: strength {:.2} below {:.2}",
                vote.key, vote.scale, vote.strength, self.config.min_strength
            );
            return false;
        }
        while self.votes.len() >= self.config.capacity {
            self.votes.pop_front();
        }
        self.votes.push_back(vote);
        true
    }

    /// Votes in the window, oldest first.
    pub fn votes(&self) -> impl Iterator<Item = &KeyVote> {
        self.votes.iter()
    }

    /// Number of votes in the window.
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    /// `true` when no votes are held.
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// The currently established key, if any.
    pub fn current_key(&self) -> Option<(NoteName, Scale)> {
        self.current
    }

    /// Scores of the window as seen at `now`.
    pub fn scores(&self, now: Duration) -> Vec<KeyScore> {
        calculate_key_scores(&self.votes, now, self.config.decay_time_constant)
    }

    /// Stabilized key at `now` without committing it.
    pub fn evaluate(&self, now: Duration) -> Option<KeyInfo> {
        if self.votes.len() < self.config.min_votes {
            return None;
        }

        let scores = self.scores(now);
        let best = find_best_key(&scores);
        let winner = scores[best.index?];
        if best.total_weight <= 0.0 {
            return None;
        }

        if let Some((key, scale)) = self.current {
            if !winner.is(key, scale) && best.vote_ratio < self.config.switching_threshold {
                debug!(
                    "holding key {key} {scale}: {} {} has only {:.0}% of weighted votes",
                    winner.key,
                    winner.scale,
                    best.vote_ratio * 100.0
                );
                let strength = scores
                    .iter()
                    .find(|s| s.is(key, scale))
                    .map_or(0.0, KeyScore::average_strength);
                return Some(KeyInfo {
                    key,
                    scale,
                    strength,
                });
            }
        }

        Some(KeyInfo {
            key: winner.key,
            scale: winner.scale,
            strength: winner.average_strength(),
        })
    }

    /// Stabilized key at `now`, committed as the established key.
    ///
    /// Returns `None` (and leaves the established key alone) while there is
    /// not enough evidence.
    pub fn compute(&mut self, now: Duration) -> Option<KeyInfo> {
        let info = self.evaluate(now)?;
        if self.current != Some((info.key, info.scale)) {
            debug!("key now {info}");
            self.current = Some((info.key, info.scale));
        }
        Some(info)
    }

    /// Drop every vote and the established key.
    pub fn reset(&mut self) {
        self.votes.clear();
        self.current = None;
    }
}

impl Default for KeyVoteAggregator {
    fn default() -> Self {
        let config = KeyVoteConfig::default();
        KeyVoteAggregator {
            votes: VecDeque::with_capacity(config.capacity),
            config,
            current: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Duration = Duration::from_secs(1_700_000);

    fn vote(key: NoteName, scale: Scale, strength: f32, age_secs: u64) -> KeyVote {
        KeyVote {
            key,
            scale,
            strength,
            timestamp: NOW - Duration::from_secs(age_secs),
        }
    }

    fn aggregator(votes: &[KeyVote], current: Option<(NoteName, Scale)>) -> KeyVoteAggregator {
        let mut agg = KeyVoteAggregator::default();
        for v in votes {
            agg.record(*v);
        }
        agg.current = current;
        agg
    }

    #[test]
    fn strength_floor() {
        let agg = KeyVoteAggregator::default();
        assert!(agg.is_strong_enough(0.3));
        assert!(agg.is_strong_enough(0.8));
        assert!(!agg.is_strong_enough(0.29));

        let mut agg = agg;
        assert!(!agg.record(vote(NoteName::C, Scale::Major, 0.1, 0)));
        assert!(!agg.record(vote(NoteName::C, Scale::Major, f32::NAN, 0)));
        assert!(agg.is_empty());
    }

    #[test]
    fn scores_group_and_decay() {
        assert!(calculate_key_scores(&[] as &[KeyVote], NOW, Duration::from_secs(30)).is_empty());

        let votes = [
            vote(NoteName::A, Scale::Minor, 0.6, 0),
            vote(NoteName::C, Scale::Major, 0.8, 60),
            vote(NoteName::A, Scale::Minor, 0.8, 0),
        ];
        let scores = calculate_key_scores(&votes, NOW, Duration::from_secs(30));
        assert_eq!(scores.len(), 2);

        let am = scores[0];
        assert_eq!((am.key, am.scale, am.count), (NoteName::A, Scale::Minor, 2));
        assert!((am.total_weight - 1.4).abs() < 1e-5);
        assert!((am.total_strength - 1.4).abs() < 1e-5);

        let c = scores[1];
        assert!((c.total_weight - 0.8 * (-2.0_f32).exp()).abs() < 1e-5);
        assert!((c.total_strength - 0.8).abs() < 1e-6);
    }

    #[test]
    fn fresh_vote_has_full_weight() {
        let w = recency_weight(Duration::ZERO, Duration::from_secs(30));
        assert_eq!(w, 1.0);
        let w = recency_weight(Duration::from_secs(60), Duration::from_secs(30));
        assert!((w - (-2.0_f32).exp()).abs() < 1e-6);
    }

    #[test]
    fn best_key_ratio() {
        let empty = find_best_key(&[]);
        assert_eq!(empty.index, None);
        assert_eq!(empty.vote_ratio, 0.0);

        let score = |key, w| KeyScore {
            key,
            scale: Scale::Major,
            total_weight: w,
            total_strength: w,
            count: 1,
        };
        let best = find_best_key(&[score(NoteName::C, 3.0), score(NoteName::A, 1.0)]);
        assert_eq!(best.index, Some(0));
        assert_eq!(best.vote_ratio, 0.75);
        assert_eq!(best.total_weight, 4.0);
    }

    #[test]
    fn needs_minimum_votes() {
        let strong = vote(NoteName::C, Scale::Major, 1.0, 0);
        let agg = aggregator(&[strong, strong], None);
        assert!(agg.evaluate(NOW).is_none());

        let agg = aggregator(&[strong, strong, strong], None);
        let info = agg.evaluate(NOW).unwrap();
        assert_eq!((info.key, info.scale), (NoteName::C, Scale::Major));
    }

    #[test]
    fn first_key_reports_mean_strength() {
        let mut agg = aggregator(
            &[
                vote(NoteName::A, Scale::Minor, 0.7, 0),
                vote(NoteName::A, Scale::Minor, 0.8, 0),
                vote(NoteName::A, Scale::Minor, 0.6, 0),
            ],
            None,
        );
        let info = agg.compute(NOW).unwrap();
        assert_eq!(info.to_string(), "A minor");
        assert!((info.strength - 0.7).abs() < 1e-5);
        assert_eq!(agg.current_key(), Some((NoteName::A, Scale::Minor)));
    }

    #[test]
    fn holds_key_below_switching_threshold() {
        let agg = aggregator(
            &[
                vote(NoteName::C, Scale::Major, 0.6, 0),
                vote(NoteName::C, Scale::Major, 0.6, 0),
                vote(NoteName::A, Scale::Minor, 0.7, 0),
                vote(NoteName::A, Scale::Minor, 0.7, 0),
            ],
            Some((NoteName::C, Scale::Major)),
        );
        // A minor leads (1.4 vs 1.2) but holds only 54%
        let info = agg.evaluate(NOW).unwrap();
        assert_eq!((info.key, info.scale), (NoteName::C, Scale::Major));
        assert!((info.strength - 0.6).abs() < 1e-5);
    }

    #[test]
    fn switches_at_threshold() {
        let agg = aggregator(
            &[
                vote(NoteName::A, Scale::Minor, 0.6, 0),
                vote(NoteName::A, Scale::Minor, 0.6, 0),
                vote(NoteName::A, Scale::Minor, 0.6, 0),
                vote(NoteName::C, Scale::Major, 0.4, 0),
                vote(NoteName::C, Scale::Major, 0.4, 0),
                vote(NoteName::G, Scale::Major, 0.4, 0),
                vote(NoteName::D, Scale::Major, 0.4, 0),
                vote(NoteName::E, Scale::Minor, 0.3, 0),
            ],
            Some((NoteName::C, Scale::Major)),
        );
        let scores = agg.scores(NOW);
        let best = find_best_key(&scores);
        assert!(best.vote_ratio < 0.6);
        assert_eq!(agg.evaluate(NOW).unwrap().key, NoteName::C);

        // exactly 60%: 1.8 of 3.0
        let agg = aggregator(
            &[
                vote(NoteName::A, Scale::Minor, 0.6, 0),
                vote(NoteName::A, Scale::Minor, 0.6, 0),
                vote(NoteName::A, Scale::Minor, 0.6, 0),
                vote(NoteName::C, Scale::Major, 0.4, 0),
                vote(NoteName::C, Scale::Major, 0.4, 0),
                vote(NoteName::G, Scale::Major, 0.4, 0),
            ],
            Some((NoteName::C, Scale::Major)),
        );
        let scores = agg.scores(NOW);
        assert!((find_best_key(&scores).vote_ratio - 0.6).abs() < 1e-5);
        let config = KeyVoteConfig {
            switching_threshold: find_best_key(&scores).vote_ratio,
            ..KeyVoteConfig::default()
        };
        let mut exact = KeyVoteAggregator::new(config).unwrap();
        for v in agg.votes() {
            exact.record(*v);
        }
        exact.current = Some((NoteName::C, Scale::Major));
        assert_eq!(exact.evaluate(NOW).unwrap().key, NoteName::A);
    }

    #[test]
    fn switches_on_dominant_challenger() {
        let agg = aggregator(
            &[
                vote(NoteName::A, Scale::Minor, 0.8, 0),
                vote(NoteName::A, Scale::Minor, 0.8, 0),
                vote(NoteName::A, Scale::Minor, 0.8, 0),
                vote(NoteName::C, Scale::Major, 0.5, 0),
            ],
            Some((NoteName::C, Scale::Major)),
        );
        let info = agg.evaluate(NOW).unwrap();
        assert_eq!((info.key, info.scale), (NoteName::A, Scale::Minor));
    }

    #[test]
    fn current_key_without_votes_reports_zero_strength() {
        let agg = aggregator(
            &[
                vote(NoteName::C, Scale::Major, 0.5, 0),
                vote(NoteName::A, Scale::Minor, 0.5, 0),
                vote(NoteName::G, Scale::Major, 0.5, 0),
            ],
            Some((NoteName::D, Scale::Minor)),
        );
        let info = agg.evaluate(NOW).unwrap();
        assert_eq!((info.key, info.scale), (NoteName::D, Scale::Minor));
        assert_eq!(info.strength, 0.0);
    }

    #[test]
    fn recent_votes_outweigh_old_ones() {
        let agg = aggregator(
            &[
                vote(NoteName::C, Scale::Major, 0.9, 90),
                vote(NoteName::C, Scale::Major, 0.9, 90),
                vote(NoteName::A, Scale::Minor, 0.6, 0),
                vote(NoteName::A, Scale::Minor, 0.6, 0),
                vote(NoteName::A, Scale::Minor, 0.6, 0),
            ],
            None,
        );
        assert_eq!(agg.evaluate(NOW).unwrap().key, NoteName::A);
    }

    #[test]
    fn window_is_fifo() {
        let mut agg = KeyVoteAggregator::default();
        agg.record(vote(NoteName::F, Scale::Major, 0.9, 10));
        for _ in 0..8 {
            agg.record(vote(NoteName::G, Scale::Major, 0.5, 0));
        }
        assert_eq!(agg.len(), 8);
        assert!(agg.votes().all(|v| v.key == NoteName::G));
    }

    #[test]
    fn compute_is_idempotent() {
        let mut agg = aggregator(
            &[
                vote(NoteName::E, Scale::Minor, 0.5, 20),
                vote(NoteName::G, Scale::Major, 0.7, 10),
                vote(NoteName::E, Scale::Minor, 0.6, 0),
            ],
            None,
        );
        let first = agg.compute(NOW);
        let second = agg.compute(NOW);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn not_enough_evidence_keeps_current() {
        let mut agg = aggregator(
            &[
                vote(NoteName::C, Scale::Major, 0.5, 0),
                vote(NoteName::C, Scale::Major, 0.5, 0),
                vote(NoteName::C, Scale::Major, 0.5, 0),
            ],
            None,
        );
        agg.compute(NOW);
        agg.votes.clear();
        assert!(agg.compute(NOW).is_none());
        assert_eq!(agg.current_key(), Some((NoteName::C, Scale::Major)));

        agg.reset();
        assert_eq!(agg.current_key(), None);
    }

    #[test]
    fn parses_extractor_output() {
        let est = KeyEstimate::parse("Eb", "minor", 0.7).unwrap().unwrap();
        assert_eq!((est.key, est.scale), (NoteName::Ds, Scale::Minor));
        assert_eq!(KeyEstimate::parse("", "major", 0.7), Ok(None));
        assert!(matches!(
            KeyEstimate::parse("X", "major", 0.7),
            Err(KeyError::UnknownKey(_))
        ));
        assert!(matches!(
            KeyEstimate::parse("C", "dorian", 0.7),
            Err(KeyError::UnknownScale(_))
        ));
        assert!(matches!(
            KeyEstimate::parse("C", "major", f32::INFINITY),
            Err(KeyError::InvalidStrength(_))
        ));
    }

    #[test]
    fn config_validation() {
        let bad = KeyVoteConfig {
            min_votes: 9,
            ..KeyVoteConfig::default()
        };
        assert!(KeyVoteAggregator::new(bad).is_err());
        assert!(KeyVoteAggregator::new(KeyVoteConfig::default()).is_ok());
    }
}
