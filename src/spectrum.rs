//! Spectrum
//!
//! Frame-based magnitude spectrum in decibels, the frequency-domain input
//! of the chroma path. Mirrors the behavior of a typical real-time analyser
//! node: Blackman window, magnitudes scaled by `1 / fft_size`, exponential
//! smoothing between frames and a decibel floor.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::{f32::consts::PI, sync::Arc};
use thiserror::Error;

use crate::frame::SampleFrame;

/// Errors returned by the spectrum analyzer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpectrumError {
    /// Frame received was shorter than the FFT size.
    #[error("expected frame of at least {expected} samples, got {got}")]
    FrameTooShort {
        /// The FFT size.
        expected: usize,
        /// The actual size of the received audio frame.
        got: usize,
    },

    /// An error occurred during the configuration of the analyzer.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Builder for a [`SpectrumAnalyzer`].
#[derive(Debug, Clone)]
pub struct SpectrumAnalyzerBuilder {
    fft_size: usize,
    min_decibels: f32,
    smoothing_time_constant: f32,
}

impl SpectrumAnalyzerBuilder {
    /// Start with default parameters:
    /// fft_size = 2048, min_decibels = -100, smoothing_time_constant = 0.8.
    pub fn new() -> Self {
        SpectrumAnalyzerBuilder {
            fft_size: 2048,
            min_decibels: -100.0,
            smoothing_time_constant: 0.8,
        }
    }

    /// Set the FFT size (power of two, at least 32).
    pub fn fft_size(mut self, size: usize) -> Self {
        self.fft_size = size;
        self
    }

    /// Set the decibel floor applied to every bin.
    pub fn min_decibels(mut self, db: f32) -> Self {
        self.min_decibels = db;
        self
    }

    /// Set the inter-frame smoothing factor (`0.0` disables smoothing).
    pub fn smoothing_time_constant(mut self, value: f32) -> Self {
        self.smoothing_time_constant = value;
        self
    }

    /// Finalize and create the analyzer.
    pub fn build(self) -> Result<SpectrumAnalyzer, SpectrumError> {
        if self.fft_size < 32 || !self.fft_size.is_power_of_two() {
            return Err(SpectrumError::Configuration(format!(
                "fft_size must be a power of two >= 32, got {}",
                self.fft_size
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing_time_constant) {
            return Err(SpectrumError::Configuration(
                "smoothing_time_constant must be in [0, 1)".into(),
            ));
        }
        if !self.min_decibels.is_finite() {
            return Err(SpectrumError::Configuration(
                "min_decibels must be finite".into(),
            ));
        }

        // Prepare FFT plan once
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(self.fft_size);

        let bins = self.fft_size / 2;
        Ok(SpectrumAnalyzer {
            fft,
            fft_buffer: vec![Complex { re: 0.0, im: 0.0 }; self.fft_size],
            window: blackman_window(self.fft_size),
            smoothed: vec![0.0; bins],
            decibels: vec![self.min_decibels; bins],
            fft_size: self.fft_size,
            min_decibels: self.min_decibels,
            smoothing_time_constant: self.smoothing_time_constant,
        })
    }
}

impl Default for SpectrumAnalyzerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming dB magnitude spectrum.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_buffer: Vec<Complex<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    decibels: Vec<f32>,
    fft_size: usize,
    min_decibels: f32,
    smoothing_time_constant: f32,
}

impl SpectrumAnalyzer {
    /// Start customizing with a builder.
    pub fn builder() -> SpectrumAnalyzerBuilder {
        SpectrumAnalyzerBuilder::new()
    }

    /// FFT size in samples.
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of bins returned per frame (`fft_size / 2`).
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyse the most recent `fft_size` samples of `frame` and return the
    /// magnitude of each bin in dB.
    pub fn process(&mut self, frame: &SampleFrame) -> Result<&[f32], SpectrumError> {
        let samples = frame.samples();
        if samples.len() < self.fft_size {
            return Err(SpectrumError::FrameTooShort {
                expected: self.fft_size,
                got: samples.len(),
            });
        }
        let tail = &samples[samples.len() - self.fft_size..];

        for ((slot, &s), &w) in self.fft_buffer.iter_mut().zip(tail).zip(&self.window) {
            slot.re = s * w;
            slot.im = 0.0;
        }

        self.fft.process(&mut self.fft_buffer);

        let scale = 1.0 / self.fft_size as f32;
        let tau = self.smoothing_time_constant;
        for (i, (smooth, db)) in self
            .smoothed
            .iter_mut()
            .zip(self.decibels.iter_mut())
            .enumerate()
        {
            let magnitude = self.fft_buffer[i].norm() * scale;
            *smooth = tau * *smooth + (1.0 - tau) * magnitude;
            *db = if *smooth > 0.0 {
                (20.0 * smooth.log10()).max(self.min_decibels)
            } else {
                self.min_decibels
            };
        }

        Ok(&self.decibels)
    }

    /// Forget the smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|m| *m = 0.0);
        self.decibels.iter_mut().for_each(|d| *d = self.min_decibels);
    }
}

/// Blackman window of length `n`.
fn blackman_window(n: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42, 0.5, 0.08);
    (0..n)
        .map(|i| {
            let phase = 2.0 * PI * i as f32 / n as f32;
            a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()
        })
        .collect()
}
