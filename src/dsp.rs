//! Fundamental-frequency estimation from raw PCM buffers.

use pitch_detector::pitch::{HannedFftDetector, PitchDetector};

/// Minimum RMS level before a buffer is considered voiced.
const MIN_RMS: f32 = 0.01;

/// Correlation threshold for accepting a period candidate.
const GOOD_ENOUGH_CORRELATION: f32 = 0.8;

/// Turns a PCM buffer into a fundamental-frequency estimate.
///
/// Implementations may keep scratch state between calls; they are driven
/// once per capture callback from a single thread.
pub trait FrequencyEstimator {
    /// Estimates the fundamental of `buffer`, or `None` if the signal is
    /// too quiet or aperiodic to pin down.
    fn estimate(&mut self, buffer: &[f32], sample_rate: f32) -> Option<f32>;
}

/// Time-domain autocorrelation estimator.
///
/// Sweeps candidate periods from short to long, scoring each by summed
/// absolute difference between the buffer and its shifted copy, and stops
/// at the first descent past a good-enough peak. The winning period is
/// refined by interpolating between its neighbors' scores.
#[derive(Default)]
pub struct Autocorrelator {
    correlations: Vec<f32>,
}

impl Autocorrelator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrequencyEstimator for Autocorrelator {
    fn estimate(&mut self, buffer: &[f32], sample_rate: f32) -> Option<f32> {
        let window = buffer.len() / 2;
        if window < 2 {
            return None;
        }

        let rms = (buffer.iter().map(|x| x * x).sum::<f32>()
            / buffer.len() as f32).sqrt();
        if rms < MIN_RMS {
            return None;
        }

        self.correlations.clear();
        self.correlations.resize(window + 1, 0.0);

        let mut best_period = 0;
        let mut best_correlation = 0.0;
        let mut last_correlation = 1.0;
        let mut found_pitch = false;
        let mut last_period = 0;

        for period in 2..=window {
            let sum: f32 = (0..window)
                .map(|j| (buffer[j] - buffer[j + period]).abs())
                .sum();
            let correlation = 1.0 - sum / window as f32;
            self.correlations[period] = correlation;
            last_period = period;

            if last_correlation > correlation {
                // descending away from a peak
                if best_correlation > GOOD_ENOUGH_CORRELATION {
                    found_pitch = true;
                    break;
                }
            } else if correlation > best_correlation {
                best_correlation = correlation;
                best_period = period;
            }
            last_correlation = correlation;
        }

        if !found_pitch || best_correlation < GOOD_ENOUGH_CORRELATION {
            return None;
        }

        // refine the period by the slope of the neighboring scores
        let mut shift = 0.0;
        if best_period >= 3 && last_period > best_period {
            shift = (self.correlations[best_period + 1]
                - self.correlations[best_period - 1]) / best_correlation * 8.0;
        }
        Some(sample_rate / (best_period as f32 + shift))
    }
}

/// FFT-based estimator backed by the `pitch-detector` crate.
#[derive(Default)]
pub struct FftEstimator {
    detector: HannedFftDetector,
}

impl FrequencyEstimator for FftEstimator {
    fn estimate(&mut self, buffer: &[f32], sample_rate: f32) -> Option<f32> {
        let signal: Vec<_> = buffer.iter().map(|&x| x as f64).collect();
        self.detector.detect_pitch(&signal, sample_rate as f64)
            .map(|f| f as f32)
    }
}
