//! Sampled analog waveform and its window statistics.
//!
//! The waveform is a plain sequence of doubles with an associated sampling
//! period. The statistics a readout would extract (charge integral, peak,
//! time over threshold, time of arrival, time of peak) are evaluated inside
//! an integration window `[start, start + gate)` against a threshold: if no
//! in-window sample rises above the threshold the statistic is absent.

use serde::{Deserialize, Serialize};

/// A time-sampled analog waveform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalogSignal {
    samples: Vec<f64>,
    sampling: f64,
}

impl AnalogSignal {
    /// Create a waveform from raw samples and a sampling period in ns.
    pub fn new(samples: Vec<f64>, sampling: f64) -> Self {
        AnalogSignal { samples, sampling }
    }

    /// An empty waveform with the given sampling period.
    pub fn empty(sampling: f64) -> Self {
        AnalogSignal {
            samples: Vec::new(),
            sampling,
        }
    }

    /// Number of sample points.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if the waveform holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sampling period in nanoseconds.
    pub fn sampling(&self) -> f64 {
        self.sampling
    }

    /// The raw samples.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Replace the samples, keeping the sampling period.
    pub fn set_samples(&mut self, samples: Vec<f64>) {
        self.samples = samples;
    }

    /// Change the sampling period.
    pub fn set_sampling(&mut self, sampling: f64) {
        self.sampling = sampling;
    }

    /// Drop all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Sample indices covered by `[start, start + gate)`, clamped to the
    /// sampled range. `None` if the clamped window is empty.
    fn window(&self, start: f64, gate: f64) -> Option<std::ops::Range<usize>> {
        if self.samples.is_empty() || gate <= 0.0 {
            return None;
        }
        let lo = (start / self.sampling).floor().max(0.0) as usize;
        let hi = (((start + gate) / self.sampling).floor() as usize).min(self.samples.len());
        if lo >= hi {
            return None;
        }
        Some(lo..hi)
    }

    /// In-window peak index and value, gated on the threshold.
    fn gated_peak(&self, start: f64, gate: f64, threshold: f64) -> Option<(usize, f64)> {
        let window = self.window(start, gate)?;
        let lo = window.start;
        let (idx, peak) = self.samples[window]
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(pi, pv), (i, &v)| {
                if v > pv {
                    (i, v)
                } else {
                    (pi, pv)
                }
            });
        if peak > threshold {
            Some((lo + idx, peak))
        } else {
            None
        }
    }

    /// Charge integral over the window: sum of samples times the sampling
    /// period. `None` if the in-window peak does not rise above `threshold`.
    pub fn integral(&self, start: f64, gate: f64, threshold: f64) -> Option<f64> {
        self.gated_peak(start, gate, threshold)?;
        let window = self.window(start, gate)?;
        Some(self.samples[window].iter().sum::<f64>() * self.sampling)
    }

    /// Maximum sample value in the window, `None` below threshold.
    pub fn peak(&self, start: f64, gate: f64, threshold: f64) -> Option<f64> {
        self.gated_peak(start, gate, threshold).map(|(_, v)| v)
    }

    /// Time over threshold: number of in-window samples strictly above the
    /// threshold, times the sampling period.
    pub fn tot(&self, start: f64, gate: f64, threshold: f64) -> Option<f64> {
        self.gated_peak(start, gate, threshold)?;
        let window = self.window(start, gate)?;
        let over = self.samples[window].iter().filter(|&&v| v > threshold).count();
        Some(over as f64 * self.sampling)
    }

    /// Time of arrival: time from `start` to the first in-window sample
    /// strictly above the threshold.
    pub fn toa(&self, start: f64, gate: f64, threshold: f64) -> Option<f64> {
        self.gated_peak(start, gate, threshold)?;
        let window = self.window(start, gate)?;
        let lo = window.start;
        self.samples[window]
            .iter()
            .position(|&v| v > threshold)
            .map(|i| (lo + i) as f64 * self.sampling - start)
    }

    /// Time of peak: time from `start` to the in-window maximum.
    pub fn top(&self, start: f64, gate: f64, threshold: f64) -> Option<f64> {
        self.gated_peak(start, gate, threshold)
            .map(|(idx, _)| idx as f64 * self.sampling - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> AnalogSignal {
        // Peak of 3.0 at sample 2, 1 ns sampling.
        AnalogSignal::new(vec![0.0, 1.0, 3.0, 2.0, 1.0, 0.0], 1.0)
    }

    #[test]
    fn test_peak_and_top() {
        let signal = triangle();
        assert_eq!(signal.peak(0.0, 6.0, 0.5), Some(3.0));
        assert_eq!(signal.top(0.0, 6.0, 0.5), Some(2.0));
    }

    #[test]
    fn test_integral_sums_window() {
        let signal = triangle();
        assert_eq!(signal.integral(0.0, 6.0, 0.5), Some(7.0));
        // Window restricted to the first three samples.
        assert_eq!(signal.integral(0.0, 3.0, 0.5), Some(4.0));
    }

    #[test]
    fn test_tot_counts_samples_above_threshold() {
        let signal = triangle();
        assert_eq!(signal.tot(0.0, 6.0, 0.5), Some(4.0));
        assert_eq!(signal.tot(0.0, 6.0, 1.5), Some(2.0));
    }

    #[test]
    fn test_toa_first_crossing() {
        let signal = triangle();
        assert_eq!(signal.toa(0.0, 6.0, 0.5), Some(1.0));
        assert_eq!(signal.toa(0.0, 6.0, 2.5), Some(2.0));
    }

    #[test]
    fn test_below_threshold_is_none() {
        let signal = triangle();
        assert_eq!(signal.peak(0.0, 6.0, 10.0), None);
        assert_eq!(signal.integral(0.0, 6.0, 10.0), None);
        assert_eq!(signal.tot(0.0, 6.0, 10.0), None);
        assert_eq!(signal.toa(0.0, 6.0, 10.0), None);
        assert_eq!(signal.top(0.0, 6.0, 10.0), None);
    }

    #[test]
    fn test_window_offset_times_are_relative() {
        let signal = triangle();
        // Window starting at 1 ns: first crossing is the sample at 1 ns.
        assert_eq!(signal.toa(1.0, 5.0, 0.5), Some(0.0));
        assert_eq!(signal.top(1.0, 5.0, 0.5), Some(1.0));
    }

    #[test]
    fn test_empty_window_is_none() {
        let signal = triangle();
        assert_eq!(signal.peak(100.0, 5.0, 0.5), None);
        assert_eq!(signal.peak(0.0, 0.0, 0.5), None);
        assert_eq!(AnalogSignal::empty(1.0).peak(0.0, 5.0, 0.5), None);
    }
}
