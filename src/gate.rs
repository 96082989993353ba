//! Signal Gate
//!
//! RMS-based presence detection shared by every detector. A buffer is
//! "present" when its RMS strictly exceeds the gate threshold; everything
//! else is treated as silence and resets dependent state.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Root-mean-square amplitude of `samples`. Returns `0.0` for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Presence/silence classifier with a configurable RMS threshold.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SignalGate {
    /// RMS above which a buffer counts as signal.
    pub threshold: f32,
    /// RMS that maps to a full input-level reading.
    pub full_scale_rms: f32,
}

impl SignalGate {
    /// Threshold used by the pitch and chord paths.
    pub const DEFAULT_THRESHOLD: f32 = 0.005;

    /// Threshold used when collecting audio for key extraction.
    pub const KEY_THRESHOLD: f32 = 0.01;

    /// RMS treated as a full-scale input level.
    pub const DEFAULT_FULL_SCALE_RMS: f32 = 0.3;

    /// Gate with a custom threshold and the default full-scale RMS.
    pub const fn new(threshold: f32) -> Self {
        SignalGate {
            threshold,
            full_scale_rms: Self::DEFAULT_FULL_SCALE_RMS,
        }
    }

    /// Gate tuned for the key collector.
    pub const fn for_key() -> Self {
        Self::new(Self::KEY_THRESHOLD)
    }

    /// Override the RMS that reads as full scale on [`SignalGate::level`].
    pub fn with_full_scale_rms(mut self, full_scale_rms: f32) -> Self {
        self.full_scale_rms = full_scale_rms;
        self
    }

    /// `true` iff the RMS of `samples` exceeds the threshold.
    pub fn gate(&self, samples: &[f32]) -> bool {
        self.is_present(rms(samples))
    }

    /// `true` iff a precomputed RMS value exceeds the threshold.
    pub fn is_present(&self, rms: f32) -> bool {
        rms > self.threshold
    }

    /// Input level of `samples` on a `0.0..=1.0` scale.
    pub fn level(&self, samples: &[f32]) -> f32 {
        self.scale(rms(samples))
    }

    /// Position of the gate threshold on the same scale as [`SignalGate::level`].
    pub fn threshold_level(&self) -> f32 {
        self.scale(self.threshold)
    }

    fn scale(&self, rms: f32) -> f32 {
        if self.full_scale_rms <= 0.0 {
            return 0.0;
        }
        (rms / self.full_scale_rms).clamp(0.0, 1.0)
    }
}

impl Default for SignalGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}
