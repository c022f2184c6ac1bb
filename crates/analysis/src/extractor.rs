use anyhow::Result;
use tracing::debug;

use pulseloop_audio::AudioWindow;
use pulseloop_domain::{Algorithm, TempoError, TempoEstimate, DEFAULT_MAX_TEMPO, DEFAULT_MIN_TEMPO};

/// Capability that turns a window of captured audio into one tempo reading.
///
/// A call may take hundreds of milliseconds on a full window; callers run it
/// off the capture path (see [`crate::scheduler`]).
pub trait TempoAnalyzer: Send {
    fn analyze(&self, window: &AudioWindow) -> Result<TempoEstimate>;
    fn algorithm(&self) -> Algorithm;
}

pub fn make_analyzer(algorithm: Algorithm, sample_rate: u32) -> Box<dyn TempoAnalyzer> {
    Box::new(OnsetAutocorrelation::new(algorithm, sample_rate))
}

/// Onset-energy autocorrelation tempo extractor.
///
/// The onset curve is the rectified frame-to-frame energy difference; its
/// autocorrelation is searched for a peak within the configured tempo band.
/// The accurate variant also scores the peak against its octave partners and
/// reports that salience as a confidence on a 0..~5.3 scale; the fast
/// variant skips the scoring pass and always reports zero.
///
/// The search band does not save the consumer from sanity-gating: a window
/// of near-silence still produces a reading, and it can land far outside
/// musical range.
pub struct OnsetAutocorrelation {
    algorithm: Algorithm,
    min_tempo: f32,
    max_tempo: f32,
    sample_rate: u32,
    frame_len: usize,
}

impl OnsetAutocorrelation {
    pub fn new(algorithm: Algorithm, sample_rate: u32) -> Self {
        Self {
            algorithm,
            min_tempo: DEFAULT_MIN_TEMPO,
            max_tempo: DEFAULT_MAX_TEMPO,
            sample_rate,
            frame_len: 512,
        }
    }

    fn onset_curve(&self, window: &AudioWindow) -> Vec<f32> {
        let samples: Vec<f32> = window.samples().collect();
        let energies: Vec<f32> = samples
            .chunks_exact(self.frame_len)
            .map(|frame| frame.iter().map(|s| s * s).sum())
            .collect();
        energies
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).max(0.0))
            .collect()
    }

    /// Highest-scoring lag within the tempo band, as (bpm, normalized peak).
    fn acf_peak(&self, onsets: &[f32], odf_rate: f32) -> Option<(f32, f32)> {
        let min_lag = (60.0 / self.max_tempo * odf_rate).round() as usize;
        let max_lag = (60.0 / self.min_tempo * odf_rate).round() as usize;
        if min_lag == 0 || onsets.len() <= max_lag * 2 {
            return None;
        }
        let energy: f32 = onsets.iter().map(|v| v * v).sum();
        if energy <= f32::EPSILON {
            return None;
        }
        let mut best_lag = 0;
        let mut best_val = 0.0f32;
        for lag in min_lag..=max_lag {
            let score = self.acf_at(onsets, lag, energy);
            if score > best_val {
                best_val = score;
                best_lag = lag;
            }
        }
        if best_lag == 0 {
            return None;
        }
        Some((odf_rate * 60.0 / best_lag as f32, best_val))
    }

    fn acf_at(&self, onsets: &[f32], lag: usize, energy: f32) -> f32 {
        if lag == 0 || lag >= onsets.len() || energy <= f32::EPSILON {
            return 0.0;
        }
        let mut acc = 0.0f32;
        for i in lag..onsets.len() {
            acc += onsets[i] * onsets[i - lag];
        }
        acc / energy
    }

    /// Confidence analogue on the extractor's native scale: a clean peak
    /// whose octave partners also correlate lands well above the gating
    /// floor, a muddy one below it.
    fn octave_salience(&self, onsets: &[f32], odf_rate: f32, bpm: f32, peak: f32) -> f32 {
        let energy: f32 = onsets.iter().map(|v| v * v).sum();
        let lag = (odf_rate * 60.0 / bpm).round() as usize;
        let half = self.acf_at(onsets, lag / 2, energy);
        let double = self.acf_at(onsets, lag * 2, energy);
        let support = half.max(double).max(0.0);
        (peak * 3.0 + support * 2.3).clamp(0.0, 5.32)
    }
}

impl TempoAnalyzer for OnsetAutocorrelation {
    fn analyze(&self, window: &AudioWindow) -> Result<TempoEstimate> {
        let onsets = self.onset_curve(window);
        let odf_rate = self.sample_rate as f32 / self.frame_len as f32;
        let (bpm, peak) = self
            .acf_peak(&onsets, odf_rate)
            .ok_or_else(|| TempoError::estimation("window too short or silent"))?;
        let confidence = match self.algorithm {
            Algorithm::Fast => 0.0,
            Algorithm::Accurate => self.octave_salience(&onsets, odf_rate, bpm, peak),
        };
        debug!(bpm, confidence, algorithm = ?self.algorithm, "tempo extracted");
        Ok(TempoEstimate::new(bpm, confidence, self.algorithm)?)
    }

    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}
