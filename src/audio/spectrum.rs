use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::capture::AudioCapture;

/// dB range mapped onto the 0-255 magnitude scale.
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

/// One frame of raw frequency magnitudes, borrowed from the analyzer.
#[derive(Clone, Copy, Debug)]
pub struct SpectrumFrame<'a> {
    pub bins: &'a [u8],
    pub sample_rate: f32,
}

/// Hann-windowed forward FFT over the newest capture window, with the
/// magnitudes dB-mapped onto unsigned bytes.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    bins: Vec<u8>,
    sample_rate: f32,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize, sample_rate: f32) -> Self {
        debug_assert!(fft_size.is_power_of_two());
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(fft_size),
            window: hann_window(fft_size),
            input: vec![0.0; fft_size],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            bins: vec![0; fft_size / 2],
            sample_rate,
        }
    }

    /// Analyze the most recent capture window.
    pub fn update(&mut self, capture: &AudioCapture) {
        capture.latest_window(&mut self.input);
        self.analyze();
    }

    /// Analyze an explicit sample window (used by tests and offline feeds).
    pub fn analyze_samples(&mut self, samples: &[f32]) {
        let n = samples.len().min(self.input.len());
        self.input.fill(0.0);
        self.input[..n].copy_from_slice(&samples[..n]);
        self.analyze();
    }

    fn analyze(&mut self) {
        let size = self.input.len();
        for i in 0..size {
            self.scratch[i] = Complex::new(self.input[i] * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        for (i, bin) in self.bins.iter_mut().enumerate() {
            let norm = self.scratch[i].norm() * 2.0 / size as f32;
            let db = 20.0 * norm.max(1e-10).log10();
            let scaled = (db - MIN_DB) / (MAX_DB - MIN_DB);
            *bin = (scaled.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }

    pub fn frame(&self) -> SpectrumFrame<'_> {
        SpectrumFrame {
            bins: &self.bins,
            sample_rate: self.sample_rate,
        }
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_window_shape() {
        let w = hann_window(1024);
        assert!(w[0].abs() < 0.01);
        assert!(w[1023].abs() < 0.01);
        assert!((w[512] - 1.0).abs() < 0.01);
    }

    #[test]
    fn silence_produces_zero_bins() {
        let mut analyzer = SpectrumAnalyzer::new(1024, 44100.0);
        analyzer.analyze_samples(&[0.0; 1024]);
        assert!(analyzer.frame().bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn sine_peaks_at_its_own_bin() {
        let size = 1024;
        let k = 32;
        let samples: Vec<f32> = (0..size)
            .map(|i| (2.0 * std::f32::consts::PI * k as f32 * i as f32 / size as f32).sin())
            .collect();

        let mut analyzer = SpectrumAnalyzer::new(size, 44100.0);
        analyzer.analyze_samples(&samples);
        let bins = analyzer.frame().bins;

        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, k);
        assert!(bins[k] > 200, "peak bin should be near full scale");
    }
}
