//! Sample Frame
//!
//! One validated mono capture buffer, as handed over by the capture device.

use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Errors when constructing a [`SampleFrame`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    /// The buffer contained no samples.
    #[error("sample frame must contain at least one sample")]
    Empty,

    /// The sample rate was zero.
    #[error("invalid sample rate {sample_rate} Hz, must be > 0")]
    InvalidSampleRate {
        /// The rejected sample rate.
        sample_rate: u32,
    },
}

/// A non-empty buffer of mono samples in `[-1, 1]` with its sample rate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SampleFrame {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl SampleFrame {
    /// Wrap `samples` captured at `sample_rate` Hz.
    ///
    /// Returns `Err(FrameError::Empty)` for an empty buffer and
    /// `Err(FrameError::InvalidSampleRate)` for a zero sample rate.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self, FrameError> {
        if samples.is_empty() {
            return Err(FrameError::Empty);
        }
        if sample_rate == 0 {
            return Err(FrameError::InvalidSampleRate { sample_rate });
        }
        Ok(SampleFrame {
            samples,
            sample_rate,
        })
    }

    /// Copy `samples` into a new frame.
    pub fn from_slice(samples: &[f32], sample_rate: u32) -> Result<Self, FrameError> {
        Self::new(samples.to_vec(), sample_rate)
    }

    /// The samples of this frame.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples. Never zero.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always `false`; present for API symmetry with slices.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Wall-clock length of the buffer.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Root-mean-square amplitude of the frame.
    pub fn rms(&self) -> f32 {
        crate::gate::rms(&self.samples)
    }

    /// Consume the frame, returning its samples.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}
