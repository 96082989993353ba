//! Chord detection over rendered sine chords for every root and quality.

use lazy_static::lazy_static;
use music_stabilizer::{
    ChordMatcher, ChordQuality, ChordStabilizer, ChordTracker, ChromaExtractor, NoteName,
    SampleFrame, SignalGate, SpectrumAnalyzer,
};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

const SAMPLE_RATE: u32 = 44_100;
const FRAME_LEN: usize = 8_192;

/// One chord to render and detect.
#[derive(Debug, Clone)]
struct ChordCase {
    root: NoteName,
    quality: ChordQuality,
}

impl ChordCase {
    /// Sorted pitch classes of the chord.
    fn pitch_classes(&self) -> Vec<usize> {
        let mut pcs: Vec<usize> = self
            .quality
            .intervals()
            .iter()
            .map(|i| (self.root.pitch_class() + i) % 12)
            .collect();
        pcs.sort_unstable();
        pcs
    }

    /// Root in octave 4 with the chord stacked above it.
    fn render(&self) -> SampleFrame {
        let freqs: Vec<f32> = self
            .quality
            .intervals()
            .iter()
            .map(|i| {
                let midi = 60 + self.root.pitch_class() + i;
                440.0 * 2f32.powf((midi as f32 - 69.0) / 12.0)
            })
            .collect();

        let samples = (0..FRAME_LEN)
            .map(|n| {
                let t = n as f32 / SAMPLE_RATE as f32;
                freqs.iter().map(|f| 0.15 * (2.0 * PI * f * t).sin()).sum::<f32>()
            })
            .collect();
        SampleFrame::new(samples, SAMPLE_RATE).unwrap()
    }
}

fn all_cases() -> Vec<ChordCase> {
    let mut cases = Vec::new();
    for pc in 0..12 {
        for quality in ChordQuality::ALL {
            cases.push(ChordCase {
                root: NoteName::from_pitch_class(pc),
                quality,
            });
        }
    }
    cases
}

lazy_static! {
    static ref CASES: Vec<ChordCase> = all_cases();
}

fn tracker() -> ChordTracker {
    ChordTracker::new(
        SignalGate::default(),
        SpectrumAnalyzer::builder()
            .fft_size(FRAME_LEN)
            .smoothing_time_constant(0.0)
            .build()
            .unwrap(),
        ChromaExtractor::default(),
        ChordMatcher::builder().min_confidence(0.6).build().unwrap(),
        ChordStabilizer::default(),
    )
}

#[derive(Default, Debug)]
struct Counters {
    per_quality: [usize; 9],
}

impl Counters {
    fn increment(&mut self, quality: ChordQuality) {
        if let Some(i) = ChordQuality::ALL.iter().position(|q| *q == quality) {
            self.per_quality[i] += 1;
        }
    }
}

#[test]
fn test_rendered_chords() {
    assert_eq!(CASES.len(), 108);

    let failures = Arc::new(Mutex::new(Vec::<String>::new()));
    let counters = Arc::new(Mutex::new(Counters::default()));

    CASES.par_iter().for_each(|case| {
        let frame = case.render();
        let mut tracker = tracker();

        assert!(tracker.tick(&frame).unwrap().is_none(), "surfaced after one tick");
        let detected = tracker.tick(&frame).unwrap().cloned();

        let actual = detected.as_ref().map(|chord| {
            let mut pcs: Vec<usize> = chord.notes.iter().map(|n| n.pitch_class()).collect();
            pcs.sort_unstable();
            pcs
        });

        if actual.as_ref() != Some(&case.pitch_classes()) {
            counters.lock().unwrap().increment(case.quality);
            failures.lock().unwrap().push(format!(
                "expected = {} {}, actual = {:?}",
                case.root,
                case.quality,
                detected.map(|c| c.name)
            ));
        }
    });

    let failures = Arc::try_unwrap(failures).unwrap().into_inner().unwrap();
    let counters = Arc::try_unwrap(counters).unwrap().into_inner().unwrap();

    if !failures.is_empty() {
        let per_quality = ChordQuality::ALL
            .iter()
            .zip(counters.per_quality)
            .map(|(q, n)| format!("{q}={n}"))
            .collect::<Vec<_>>()
            .join("  ");
        panic!(
            "{} chord tests failed:\n {}\n\n{}",
            failures.len(),
            per_quality,
            failures.join("\n")
        );
    }
}

#[test]
fn test_silence_never_matches() {
    let mut tracker = tracker();
    let frame = SampleFrame::new(vec![0.0; FRAME_LEN], SAMPLE_RATE).unwrap();
    for _ in 0..4 {
        assert!(tracker.tick(&frame).unwrap().is_none());
    }
}
