//! Chord Tracker
//!
//! Per-tick chord pipeline: gate, spectrum, chroma, template match, and a
//! consecutive-tick stability filter in front of the displayed chord.

use log::{debug, trace};

use crate::chord_matcher::{ChordMatch, ChordMatcher};
use crate::chroma::ChromaExtractor;
use crate::frame::SampleFrame;
use crate::gate::SignalGate;
use crate::spectrum::{SpectrumAnalyzer, SpectrumError};

/// Surfaces a chord only after it was matched on `required_ticks`
/// consecutive ticks.
#[derive(Debug, Clone)]
pub struct ChordStabilizer {
    required_ticks: u32,
    candidate: Option<String>,
    count: u32,
    displayed: Option<ChordMatch>,
}

impl ChordStabilizer {
    /// Consecutive ticks used by [`ChordStabilizer::default`].
    pub const DEFAULT_REQUIRED_TICKS: u32 = 2;

    /// Stabilizer requiring `required_ticks` agreeing ticks (at least 1).
    pub fn new(required_ticks: u32) -> Self {
        ChordStabilizer {
            required_ticks: required_ticks.max(1),
            candidate: None,
            count: 0,
            displayed: None,
        }
    }

    /// Feed one tick's match and return the chord to display.
    ///
    /// A tick without a match resets the counter and clears the display.
    /// A different chord restarts the count at 1 while the previous chord
    /// stays on display.
    pub fn update(&mut self, detected: Option<ChordMatch>) -> Option<&ChordMatch> {
        let Some(chord) = detected else {
            self.clear();
            return None;
        };

        if self.candidate.as_deref() == Some(chord.name.as_str()) {
            self.count = self.count.saturating_add(1);
        } else {
            self.candidate = Some(chord.name.clone());
            self.count = 1;
        }

        if self.count >= self.required_ticks {
            if self.displayed.as_ref().map(|c| c.name.as_str()) != Some(chord.name.as_str()) {
                debug!("chord stable: {} ({:.2})", chord.name, chord.confidence);
            }
            self.displayed = Some(chord);
        }
        self.displayed.as_ref()
    }

    /// Drop the candidate and the displayed chord (silence).
    pub fn clear(&mut self) {
        self.candidate = None;
        self.count = 0;
        self.displayed = None;
    }

    /// The chord currently on display.
    pub fn current(&self) -> Option<&ChordMatch> {
        self.displayed.as_ref()
    }
}

impl Default for ChordStabilizer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_REQUIRED_TICKS)
    }
}

/// Full chord path for one analysis tick.
pub struct ChordTracker {
    gate: SignalGate,
    spectrum: SpectrumAnalyzer,
    extractor: ChromaExtractor,
    matcher: ChordMatcher,
    stabilizer: ChordStabilizer,
}

impl ChordTracker {
    /// Assemble a tracker from its parts.
    pub fn new(
        gate: SignalGate,
        spectrum: SpectrumAnalyzer,
        extractor: ChromaExtractor,
        matcher: ChordMatcher,
        stabilizer: ChordStabilizer,
    ) -> Self {
        ChordTracker {
            gate,
            spectrum,
            extractor,
            matcher,
            stabilizer,
        }
    }

    /// Run one tick over `frame` and return the chord to display.
    ///
    /// Silence clears the displayed chord without touching the spectrum.
    pub fn tick(&mut self, frame: &SampleFrame) -> Result<Option<&ChordMatch>, SpectrumError> {
        if !self.gate.gate(frame.samples()) {
            if self.stabilizer.current().is_some() {
                debug!("chord cleared: signal below gate");
            }
            self.stabilizer.clear();
            return Ok(None);
        }

        let magnitudes = self.spectrum.process(frame)?;
        let chroma = self.extractor.extract(magnitudes, frame.sample_rate());
        let detected = self.matcher.match_chroma(&chroma);
        trace!("chord candidate: {:?}", detected.as_ref().map(|c| &c.name));
        Ok(self.stabilizer.update(detected))
    }

    /// The chord currently on display.
    pub fn current(&self) -> Option<&ChordMatch> {
        self.stabilizer.current()
    }

    /// Minimum frame length accepted by [`ChordTracker::tick`].
    pub fn fft_size(&self) -> usize {
        self.spectrum.fft_size()
    }

    /// Drop all history: displayed chord, stability counter, spectral smoothing.
    pub fn reset(&mut self) {
        self.stabilizer.clear();
        self.spectrum.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord_matcher::ChordQuality;
    use crate::chroma::ChromaVector;
    use crate::note::NoteName;
    use std::f32::consts::PI;

    fn detect(bins: [f32; 12]) -> Option<ChordMatch> {
        ChordMatcher::new().match_chroma(&ChromaVector::new(bins))
    }

    fn c_major() -> Option<ChordMatch> {
        detect([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0])
    }

    fn a_minor() -> Option<ChordMatch> {
        detect([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0])
    }

    #[test]
    fn needs_two_consecutive_ticks() {
        let mut s = ChordStabilizer::default();
        assert!(s.update(c_major()).is_none());
        assert_eq!(s.update(c_major()).unwrap().name, "C Major");
        assert_eq!(s.update(c_major()).unwrap().name, "C Major");
    }

    #[test]
    fn new_chord_keeps_old_display_until_stable() {
        let mut s = ChordStabilizer::default();
        s.update(c_major());
        s.update(c_major());
        assert_eq!(s.update(a_minor()).unwrap().name, "C Major");
        assert_eq!(s.update(a_minor()).unwrap().name, "Am");
    }

    #[test]
    fn alternating_chords_never_surface() {
        let mut s = ChordStabilizer::default();
        for _ in 0..4 {
            assert!(s.update(c_major()).is_none());
            assert!(s.update(a_minor()).is_none());
        }
    }

    #[test]
    fn missing_match_resets_and_clears() {
        let mut s = ChordStabilizer::default();
        s.update(c_major());
        s.update(c_major());
        assert!(s.update(None).is_none());
        assert!(s.current().is_none());
        assert!(s.update(c_major()).is_none());
    }

    fn tracker() -> ChordTracker {
        ChordTracker::new(
            SignalGate::default(),
            SpectrumAnalyzer::builder()
                .fft_size(8192)
                .smoothing_time_constant(0.0)
                .build()
                .unwrap(),
            ChromaExtractor::default(),
            ChordMatcher::builder().min_confidence(0.6).build().unwrap(),
            ChordStabilizer::default(),
        )
    }

    fn chord_frame(freqs: &[f32], amplitude: f32) -> SampleFrame {
        let sr = 44_100;
        let samples = (0..8192)
            .map(|i| {
                let t = i as f32 / sr as f32;
                freqs
                    .iter()
                    .map(|f| amplitude * (2.0 * PI * f * t).sin())
                    .sum::<f32>()
            })
            .collect();
        SampleFrame::new(samples, sr).unwrap()
    }

    #[test]
    fn tracks_a_rendered_triad() {
        let mut t = tracker();
        let frame = chord_frame(&[523.25, 659.26, 783.99], 0.2);
        assert!(t.tick(&frame).unwrap().is_none());
        let chord = t.tick(&frame).unwrap().unwrap();
        assert_eq!(chord.root, NoteName::C);
        assert_eq!(chord.quality, ChordQuality::Major);
    }

    #[test]
    fn silence_clears_immediately() {
        let mut t = tracker();
        let frame = chord_frame(&[440.0, 523.25, 659.26], 0.2);
        t.tick(&frame).unwrap();
        assert_eq!(t.tick(&frame).unwrap().unwrap().name, "Am");

        let quiet = chord_frame(&[440.0], 0.001);
        assert!(t.tick(&quiet).unwrap().is_none());
        assert!(t.current().is_none());
    }

    #[test]
    fn short_frame_is_an_error_when_loud() {
        let mut t = tracker();
        let frame = SampleFrame::new(vec![0.5; 1024], 44_100).unwrap();
        assert!(t.tick(&frame).is_err());
    }
}
