use super::spectrum::SpectrumFrame;

/// Longest frame delta fed into smoothing; a window pause must not turn
/// into one giant smoothing step.
const MAX_DT: f32 = 0.1;

/// Attack/release decay factors, calibrated at a 30 fps reference rate.
const ATTACK: f32 = 0.15;
const RELEASE: f32 = 0.45;
const REFERENCE_FRAME: f32 = 1.0 / 30.0;

/// Band boundaries in Hz. Everything above the last boundary is "presence".
const SUB_BASS_HZ: f32 = 60.0;
const BASS_HZ: f32 = 250.0;
const MID_HZ: f32 = 2000.0;
const TREBLE_HZ: f32 = 6000.0;

/// Phase advance weights per band.
const PHASE_BASS_WEIGHT: f32 = 0.5;
const PHASE_MID_WEIGHT: f32 = 0.3;
const PHASE_TREBLE_WEIGHT: f32 = 0.4;

/// Smoothed band energies, each 0.0-1.0.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bands {
    pub sub_bass: f32,
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    pub presence: f32,
}

/// Monotone phase accumulators (seconds-equivalent, unbounded). The audio
/// modulates their rate of advance, never their absolute value, so a band
/// spike bends the motion instead of teleporting it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Phase {
    pub base: f32,
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
}

/// Per-frame audio snapshot consumed by the scheduler and render pipeline.
/// Rebuilt in place every frame; downstream code only ever reads it.
#[derive(Clone, Copy, Debug, Default)]
pub struct AudioSignal {
    pub bands: Bands,
    pub beat: f32,
    pub energy: f32,
    pub phase: Phase,
    pub time: f32,
    pub dt: f32,
}

/// Onset detector over the combined bass energy: a slow exponential baseline
/// plus a still-rising gate, so a single decaying hit cannot fire twice
/// against its own stale baseline.
#[derive(Debug, Default)]
pub struct BeatDetector {
    baseline: f32,
    prev_energy: f32,
}

impl BeatDetector {
    /// Feed one frame of bass energy, returns the beat pulse (0.0-1.0).
    pub fn update(&mut self, bass_energy: f32) -> f32 {
        let rising = bass_energy > self.prev_energy;
        let pulse = if rising && bass_energy > self.baseline * 1.4 {
            ((bass_energy - self.baseline) / self.baseline.max(0.01)).min(1.0)
        } else {
            0.0
        };
        self.baseline = self.baseline * 0.92 + bass_energy * 0.08;
        self.prev_energy = bass_energy;
        pulse
    }
}

/// Turns raw u8 FFT magnitudes into the smoothed [`AudioSignal`] snapshot.
pub struct SignalProcessor {
    signal: AudioSignal,
    beat: BeatDetector,
}

impl SignalProcessor {
    pub fn new() -> Self {
        Self {
            signal: AudioSignal::default(),
            beat: BeatDetector::default(),
        }
    }

    pub fn signal(&self) -> &AudioSignal {
        &self.signal
    }

    /// Advance one frame. `spectrum` is the latest magnitude frame, or
    /// `None` when no audio source exists; in that case the bands decay
    /// toward silence rather than erroring out.
    pub fn update(&mut self, dt: f32, spectrum: Option<SpectrumFrame<'_>>) {
        let dt = dt.min(MAX_DT);
        let raw = match spectrum {
            Some(frame) => extract_bands(frame.bins, frame.sample_rate),
            None => Bands::default(),
        };

        let bands = &mut self.signal.bands;
        bands.sub_bass = smooth(bands.sub_bass, raw.sub_bass, dt);
        bands.bass = smooth(bands.bass, raw.bass, dt);
        bands.mid = smooth(bands.mid, raw.mid, dt);
        bands.treble = smooth(bands.treble, raw.treble, dt);
        bands.presence = smooth(bands.presence, raw.presence, dt);

        let bass_energy = 0.4 * bands.sub_bass + 0.6 * bands.bass;
        self.signal.beat = self.beat.update(bass_energy);
        self.signal.energy = 0.4 * bands.bass + 0.3 * bands.mid + 0.3 * bands.treble;

        let phase = &mut self.signal.phase;
        phase.base += dt;
        phase.bass += dt * (1.0 + self.signal.bands.bass * PHASE_BASS_WEIGHT);
        phase.mid += dt * (1.0 + self.signal.bands.mid * PHASE_MID_WEIGHT);
        phase.treble += dt * (1.0 + self.signal.bands.treble * PHASE_TREBLE_WEIGHT);

        self.signal.time += dt;
        self.signal.dt = dt;
    }
}

/// One asymmetric smoothing step. The decay factor is renormalized by the
/// actual frame delta so the perceptual response speed does not depend on
/// the display refresh rate.
fn smooth(current: f32, raw: f32, dt: f32) -> f32 {
    let rate = if raw > current { ATTACK } else { RELEASE };
    let adapted = rate.powf(REFERENCE_FRAME / dt.max(0.001));
    current * adapted + raw * (1.0 - adapted)
}

fn extract_bands(bins: &[u8], sample_rate: f32) -> Bands {
    if bins.is_empty() || sample_rate <= 0.0 {
        return Bands::default();
    }

    let bin_width = sample_rate / (bins.len() as f32 * 2.0);
    let edge = |freq: f32| -> usize { ((freq / bin_width).round() as usize).min(bins.len()) };

    let sub_bass_end = edge(SUB_BASS_HZ);
    let bass_end = edge(BASS_HZ);
    let mid_end = edge(MID_HZ);
    let treble_end = edge(TREBLE_HZ);

    Bands {
        sub_bass: band_mean(&bins[..sub_bass_end]),
        bass: band_mean(&bins[sub_bass_end..bass_end]),
        mid: band_mean(&bins[bass_end..mid_end]),
        treble: band_mean(&bins[mid_end..treble_end]),
        presence: band_mean(&bins[treble_end..]),
    }
}

fn band_mean(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = bins.iter().map(|&b| b as u32).sum();
    sum as f32 / bins.len() as f32 / 255.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 44100.0;

    fn full_spectrum(bins: &[u8]) -> SpectrumFrame<'_> {
        SpectrumFrame {
            bins,
            sample_rate: SAMPLE_RATE,
        }
    }

    #[test]
    fn dt_is_clamped() {
        let mut proc = SignalProcessor::new();
        proc.update(5.0, None);
        assert_eq!(proc.signal().dt, 0.1);
        assert_eq!(proc.signal().time, 0.1);
    }

    #[test]
    fn missing_spectrum_yields_silence() {
        let mut proc = SignalProcessor::new();
        proc.update(1.0 / 60.0, None);
        let s = proc.signal();
        assert_eq!(s.bands, Bands::default());
        assert_eq!(s.beat, 0.0);
        assert_eq!(s.energy, 0.0);
    }

    #[test]
    fn bands_rise_monotonically_toward_full_scale() {
        // Scenario A: all-255 bins over five frames at 60 fps.
        let bins = [255u8; 1024];
        let mut proc = SignalProcessor::new();
        let mut prev = Bands::default();
        for _ in 0..5 {
            proc.update(1.0 / 60.0, Some(full_spectrum(&bins)));
            let b = proc.signal().bands;
            assert!(b.sub_bass > prev.sub_bass && b.sub_bass <= 1.0);
            assert!(b.bass > prev.bass && b.bass <= 1.0);
            assert!(b.mid > prev.mid && b.mid <= 1.0);
            assert!(b.treble > prev.treble && b.treble <= 1.0);
            assert!(b.presence > prev.presence && b.presence <= 1.0);
            let expected = 0.4 * b.bass + 0.3 * b.mid + 0.3 * b.treble;
            assert!((proc.signal().energy - expected).abs() < 1e-6);
            prev = b;
        }
    }

    #[test]
    fn band_extraction_maps_frequency_boundaries() {
        // 1024 bins at 44.1kHz: bin width ~21.5 Hz, bass spans bins 3..12.
        let mut bins = [0u8; 1024];
        for bin in bins.iter_mut().take(12).skip(3) {
            *bin = 255;
        }
        let bands = extract_bands(&bins, SAMPLE_RATE);
        assert_eq!(bands.bass, 1.0);
        assert_eq!(bands.mid, 0.0);
        assert_eq!(bands.treble, 0.0);
        assert_eq!(bands.presence, 0.0);
    }

    #[test]
    fn beat_pulse_stays_in_unit_range() {
        let loud = [255u8; 512];
        let quiet = [0u8; 512];
        let mut proc = SignalProcessor::new();
        for i in 0..240 {
            let frame = if i % 20 < 3 { &loud[..] } else { &quiet[..] };
            proc.update(1.0 / 60.0, Some(full_spectrum(frame)));
            let beat = proc.signal().beat;
            assert!((0.0..=1.0).contains(&beat), "beat {} out of range", beat);
        }
    }

    #[test]
    fn beat_fires_with_unit_pulse_on_a_clean_onset() {
        // Scenario B: baseline stabilized at 0.1, single jump to 0.5.
        let mut det = BeatDetector::default();
        for _ in 0..400 {
            det.update(0.1);
        }
        let pulse = det.update(0.5);
        assert!((pulse - 1.0).abs() < 1e-4, "pulse was {}", pulse);
    }

    #[test]
    fn beat_does_not_refire_while_decaying() {
        let mut det = BeatDetector::default();
        for _ in 0..400 {
            det.update(0.1);
        }
        assert!(det.update(0.5) > 0.0);
        // Still above the stale baseline, but no longer rising.
        assert_eq!(det.update(0.45), 0.0);
        assert_eq!(det.update(0.4), 0.0);
    }

    #[test]
    fn phases_never_decrease() {
        let loud = [200u8; 1024];
        let mut proc = SignalProcessor::new();
        let mut prev = Phase::default();
        for &dt in &[0.0, 0.016, 0.1, 0.5, 0.033, 0.0, 0.25] {
            proc.update(dt, Some(full_spectrum(&loud)));
            let p = proc.signal().phase;
            assert!(p.base >= prev.base);
            assert!(p.bass >= prev.bass);
            assert!(p.mid >= prev.mid);
            assert!(p.treble >= prev.treble);
            prev = p;
        }
    }

    #[test]
    fn smoothing_never_overshoots_the_target() {
        let mut value = 0.0;
        for _ in 0..500 {
            let next = smooth(value, 1.0, 1.0 / 60.0);
            assert!(next >= value && next <= 1.0);
            value = next;
        }
        assert!(value > 0.99);
    }
}
