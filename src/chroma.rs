//! Chroma
//!
//! Folds a dB magnitude spectrum into a 12-bin pitch-class profile
//! normalized so the dominant pitch class is exactly `1.0`.

use std::ops::Index;
use thiserror::Error;

use crate::note::{freq_to_midi_note, NoteName, SEMITONES};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Energy per pitch class, indexed C..B.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChromaVector([f32; SEMITONES]);

impl ChromaVector {
    /// Wrap raw pitch-class energies. Values are taken as given.
    pub const fn new(bins: [f32; SEMITONES]) -> Self {
        ChromaVector(bins)
    }

    /// The all-zero vector.
    pub const fn silent() -> Self {
        ChromaVector([0.0; SEMITONES])
    }

    /// Borrow the 12 bins.
    pub fn as_array(&self) -> &[f32; SEMITONES] {
        &self.0
    }

    /// `true` when every bin is zero.
    pub fn is_silent(&self) -> bool {
        self.0.iter().all(|&v| v == 0.0)
    }

    /// Pitch class with the most energy, or `None` for a silent vector.
    pub fn dominant(&self) -> Option<NoteName> {
        let (idx, max) = self
            .0
            .iter()
            .enumerate()
            .fold((0, 0.0_f32), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        (max > 0.0).then(|| NoteName::from_pitch_class(idx as i64))
    }

    /// Scale so the largest bin is `1.0`. A silent vector is left unchanged.
    pub fn normalize(&mut self) {
        let max = self.0.iter().cloned().fold(0.0_f32, f32::max);
        if max > 0.0 {
            self.0.iter_mut().for_each(|v| *v /= max);
        }
    }
}

impl Index<usize> for ChromaVector {
    type Output = f32;

    fn index(&self, idx: usize) -> &f32 {
        &self.0[idx]
    }
}

impl From<[f32; SEMITONES]> for ChromaVector {
    fn from(bins: [f32; SEMITONES]) -> Self {
        ChromaVector(bins)
    }
}

/// Errors when configuring a [`ChromaExtractor`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChromaError {
    /// The analysed band is empty or not strictly positive.
    #[error("invalid frequency band {min_frequency}..{max_frequency} Hz")]
    InvalidBand {
        /// Lower edge in Hz.
        min_frequency: f32,
        /// Upper edge in Hz.
        max_frequency: f32,
    },
}

/// Builder for a [`ChromaExtractor`].
#[derive(Debug, Clone)]
pub struct ChromaExtractorBuilder {
    min_frequency: f32,
    max_frequency: f32,
}

impl ChromaExtractorBuilder {
    /// Start with the musical band 65 Hz..2000 Hz (roughly C2 to C7).
    pub fn new() -> Self {
        ChromaExtractorBuilder {
            min_frequency: 65.0,
            max_frequency: 2000.0,
        }
    }

    /// Set the lowest analysed frequency.
    pub fn min_frequency(mut self, hz: f32) -> Self {
        self.min_frequency = hz;
        self
    }

    /// Set the highest analysed frequency.
    pub fn max_frequency(mut self, hz: f32) -> Self {
        self.max_frequency = hz;
        self
    }

    /// Finalize and create the extractor.
    pub fn build(self) -> Result<ChromaExtractor, ChromaError> {
        let valid = self.min_frequency.is_finite()
            && self.max_frequency.is_finite()
            && self.min_frequency > 0.0
            && self.max_frequency > self.min_frequency;
        if !valid {
            return Err(ChromaError::InvalidBand {
                min_frequency: self.min_frequency,
                max_frequency: self.max_frequency,
            });
        }
        Ok(ChromaExtractor {
            min_frequency: self.min_frequency,
            max_frequency: self.max_frequency,
        })
    }
}

impl Default for ChromaExtractorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Stateless dB-spectrum to chroma converter.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ChromaExtractor {
    min_frequency: f32,
    max_frequency: f32,
}

impl ChromaExtractor {
    /// Start customizing with a builder.
    pub fn builder() -> ChromaExtractorBuilder {
        ChromaExtractorBuilder::new()
    }

    /// Fold `magnitudes_db` (bins `0..len` covering `0..sample_rate/2`) into
    /// a normalized chroma vector.
    ///
    /// An empty buffer or zero sample rate gives the silent vector. Bins
    /// whose dB value or linear amplitude is non-finite contribute nothing.
    pub fn extract(&self, magnitudes_db: &[f32], sample_rate: u32) -> ChromaVector {
        let mut chroma = ChromaVector::silent();
        if magnitudes_db.is_empty() || sample_rate == 0 {
            return chroma;
        }

        let bin_width = sample_rate as f32 / (magnitudes_db.len() * 2) as f32;
        let min_bin = (self.min_frequency / bin_width).floor() as usize;
        let max_bin =
            (magnitudes_db.len() - 1).min((self.max_frequency / bin_width).floor() as usize);

        for (i, &db) in magnitudes_db
            .iter()
            .enumerate()
            .take(max_bin + 1)
            .skip(min_bin)
        {
            let freq = i as f32 * bin_width;
            if freq <= 0.0 || !db.is_finite() {
                continue;
            }
            let amplitude = 10f32.powf(db / 20.0);
            if !amplitude.is_finite() {
                continue;
            }
            let pitch_class = (freq_to_midi_note(freq).round() as i64).rem_euclid(SEMITONES as i64);
            chroma.0[pitch_class as usize] += amplitude;
        }

        // accumulated overflow
        if chroma.0.iter().any(|v| !v.is_finite()) {
            return ChromaVector::silent();
        }
        chroma.normalize();
        chroma
    }
}

impl Default for ChromaExtractor {
    fn default() -> Self {
        ChromaExtractor {
            min_frequency: 65.0,
            max_frequency: 2000.0,
        }
    }
}

/// [`ChromaExtractor::extract`] with the default 65..2000 Hz band.
pub fn extract_chroma(magnitudes_db: &[f32], sample_rate: u32) -> ChromaVector {
    ChromaExtractor::default().extract(magnitudes_db, sample_rate)
}
