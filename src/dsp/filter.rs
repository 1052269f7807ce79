//! Resonant and bandpass filters
//!
//! RBJ cookbook biquads run forward and backward over the whole buffer
//! (zero-phase), with reflected edge padding so the ends don't ring.
//! Also hosts the one-pole lowpass used by the saturation tone control.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use super::effect::{ensure_range, Effect, EffectPosition};
use crate::engine::AudioBuffer;
use crate::error::{CantorError, Result};
use crate::{impl_effect_common, validated_params};

/// Q of a maximally flat second-order section
pub const BUTTERWORTH_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Edge padding for filters that settle almost at once
const MIN_PAD: usize = 12;

/// Pole time constants per pass for a second-order section (3 x order)
const SETTLING_TIME_CONSTANTS: f64 = 6.0;

/// Filter response shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Butterworth lowpass; `q` is ignored
    LowPass,
    /// Highpass with the configured `q`
    HighPass,
    /// Constant 0 dB peak gain bandpass
    #[default]
    BandPass,
    /// Lowpass with a resonant peak of roughly `q` at the cutoff
    ResonantLowPass,
    /// Bell boost/cut by `gain_db`
    Peaking,
}

/// Biquad filter coefficients, normalized by a0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    /// Calculate coefficients using the Audio EQ Cookbook formulas
    pub fn design(kind: FilterKind, sample_rate: f64, frequency: f64, q: f64, gain_db: f64) -> Self {
        let q = match kind {
            FilterKind::LowPass => BUTTERWORTH_Q as f64,
            _ => q,
        };
        let w0 = 2.0 * PI * frequency / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let (b0, b1, b2, a0, a1, a2) = match kind {
            FilterKind::LowPass | FilterKind::ResonantLowPass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterKind::HighPass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterKind::BandPass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
            FilterKind::Peaking => {
                let a = 10.0_f64.powf(gain_db / 40.0);
                (
                    1.0 + alpha * a,
                    -2.0 * cos_w0,
                    1.0 - alpha * a,
                    1.0 + alpha / a,
                    -2.0 * cos_w0,
                    1.0 - alpha / a,
                )
            }
        };

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Samples for the impulse response to decay by e^-6, from the pole radius
    pub fn settling_samples(&self) -> usize {
        let radius = self.a2.abs().sqrt();
        if radius <= f64::EPSILON {
            return 0;
        }
        if radius >= 1.0 {
            return usize::MAX;
        }
        let tau = -1.0 / radius.ln();
        (SETTLING_TIME_CONSTANTS * tau).ceil() as usize
    }

    /// Magnitude response at `frequency`
    pub fn magnitude_at(&self, frequency: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * frequency / sample_rate;
        let (c1, s1) = (w.cos(), w.sin());
        let (c2, s2) = ((2.0 * w).cos(), (2.0 * w).sin());
        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);
        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

/// Run a biquad over a slice (direct form I, f64 state)
pub fn biquad(samples: &[f32], coeffs: &BiquadCoeffs) -> Vec<f32> {
    let (mut x1, mut x2, mut y1, mut y2) = (0.0_f64, 0.0_f64, 0.0_f64, 0.0_f64);
    samples
        .iter()
        .map(|&s| {
            let x = s as f64;
            let y = coeffs.b0 * x + coeffs.b1 * x1 + coeffs.b2 * x2 - coeffs.a1 * y1 - coeffs.a2 * y2;
            x2 = x1;
            x1 = x;
            y2 = y1;
            y1 = y;
            y as f32
        })
        .collect()
}

/// Zero-phase filtering: forward pass, reverse, forward pass, reverse.
///
/// The signal is extended at both ends by odd reflection about its end
/// samples, long enough for the filter to settle; the padding is stripped
/// from the result.
pub fn filtfilt(samples: &[f32], coeffs: &BiquadCoeffs) -> Vec<f32> {
    let len = samples.len();
    if len == 0 {
        return Vec::new();
    }
    let pad = coeffs.settling_samples().max(MIN_PAD).min(len - 1);

    let first = samples[0];
    let last = samples[len - 1];
    let mut extended = Vec::with_capacity(len + 2 * pad);
    extended.extend((1..=pad).rev().map(|i| 2.0 * first - samples[i]));
    extended.extend_from_slice(samples);
    extended.extend((1..=pad).map(|i| 2.0 * last - samples[len - 1 - i]));

    let mut forward = biquad(&extended, coeffs);
    forward.reverse();
    let mut backward = biquad(&forward, coeffs);
    backward.reverse();

    backward[pad..pad + len].to_vec()
}

/// One-pole lowpass, `y[n] = y[n-1] + a (x[n] - y[n-1])`
pub fn one_pole_lowpass(samples: &[f32], cutoff_hz: f32, sample_rate: u32) -> Vec<f32> {
    let a = 1.0 - (-2.0 * PI * cutoff_hz as f64 / sample_rate as f64).exp();
    let mut state = 0.0_f64;
    samples
        .iter()
        .map(|&s| {
            state += a * (s as f64 - state);
            state as f32
        })
        .collect()
}

/// Biquad filter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFilterParams")]
pub struct FilterParams {
    kind: FilterKind,
    /// Cutoff or center frequency in Hz (20 to below nyquist)
    cutoff_hz: f32,
    /// Quality factor (0.1 to 30)
    q: f32,
    /// Peaking gain in dB (-24 to +24)
    gain_db: f32,
}

validated_params!(FilterParams, RawFilterParams {
    kind: FilterKind,
    cutoff_hz: f32,
    q: f32,
    gain_db: f32,
});

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            kind: FilterKind::BandPass,
            cutoff_hz: 1000.0,
            q: BUTTERWORTH_Q,
            gain_db: 0.0,
        }
    }
}

impl FilterParams {
    pub fn new(kind: FilterKind, cutoff_hz: f32, q: f32, gain_db: f32) -> Result<Self> {
        let params = Self {
            kind,
            cutoff_hz,
            q,
            gain_db,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn low_pass(cutoff_hz: f32) -> Result<Self> {
        Self::new(FilterKind::LowPass, cutoff_hz, BUTTERWORTH_Q, 0.0)
    }

    pub fn high_pass(cutoff_hz: f32, q: f32) -> Result<Self> {
        Self::new(FilterKind::HighPass, cutoff_hz, q, 0.0)
    }

    pub fn band_pass(center_hz: f32, q: f32) -> Result<Self> {
        Self::new(FilterKind::BandPass, center_hz, q, 0.0)
    }

    pub fn resonant_low_pass(cutoff_hz: f32, q: f32) -> Result<Self> {
        Self::new(FilterKind::ResonantLowPass, cutoff_hz, q, 0.0)
    }

    pub fn peaking(center_hz: f32, q: f32, gain_db: f32) -> Result<Self> {
        Self::new(FilterKind::Peaking, center_hz, q, gain_db)
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    pub fn q(&self) -> f32 {
        self.q
    }

    fn validate(&self) -> Result<()> {
        ensure_range("filter.cutoff_hz", self.cutoff_hz, 20.0, 96_000.0)?;
        ensure_range("filter.q", self.q, 0.1, 30.0)?;
        ensure_range("filter.gain_db", self.gain_db, -24.0, 24.0)
    }

    /// Coefficients for a buffer at `sample_rate`
    ///
    /// Fails when the cutoff is not below that rate's nyquist.
    pub fn coefficients(&self, sample_rate: u32) -> Result<BiquadCoeffs> {
        let nyquist = sample_rate as f32 / 2.0;
        if self.cutoff_hz >= nyquist {
            return Err(CantorError::invalid(
                "filter.cutoff_hz",
                self.cutoff_hz,
                &format!("below nyquist ({} Hz)", nyquist),
            ));
        }
        Ok(BiquadCoeffs::design(
            self.kind,
            sample_rate as f64,
            self.cutoff_hz as f64,
            self.q as f64,
            self.gain_db as f64,
        ))
    }
}

impl Effect for FilterParams {
    impl_effect_common!("filter", EffectPosition::Filter);

    fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        if buffer.is_empty() {
            return Ok(buffer.clone());
        }
        let coeffs = self.coefficients(buffer.sample_rate)?;
        Ok(buffer.map_channels(|ch| filtfilt(ch, &coeffs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::analysis::band_energy;
    use crate::engine::generate_test_tone;
    use approx::assert_relative_eq;

    #[test]
    fn test_bandpass_peak_is_unity() {
        let coeffs = BiquadCoeffs::design(FilterKind::BandPass, 48000.0, 1000.0, 2.0, 0.0);
        assert_relative_eq!(coeffs.magnitude_at(1000.0, 48000.0), 1.0, epsilon = 1e-6);
        assert!(coeffs.magnitude_at(8000.0, 48000.0) < 0.2);
    }

    #[test]
    fn test_resonant_lowpass_peaks_near_cutoff() {
        let resonant = BiquadCoeffs::design(FilterKind::ResonantLowPass, 48000.0, 2000.0, 8.0, 0.0);
        let flat = BiquadCoeffs::design(FilterKind::LowPass, 48000.0, 2000.0, 8.0, 0.0);
        assert!(resonant.magnitude_at(2000.0, 48000.0) > 6.0);
        assert_relative_eq!(flat.magnitude_at(2000.0, 48000.0), BUTTERWORTH_Q as f64, epsilon = 1e-6);
    }

    #[test]
    fn test_peaking_gain_at_center() {
        let coeffs = BiquadCoeffs::design(FilterKind::Peaking, 48000.0, 1000.0, 1.0, 6.0);
        let gain_db = 20.0 * coeffs.magnitude_at(1000.0, 48000.0).log10();
        assert_relative_eq!(gain_db, 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_lowpass_attenuates_highs() {
        let low = generate_test_tone(200.0, 0.5, 48000);
        let high = generate_test_tone(8000.0, 0.5, 48000);
        let mixed = AudioBuffer::sum(&[low, high], 48000);

        let filtered = FilterParams::low_pass(1000.0).unwrap().apply(&mixed).unwrap();
        let ch = filtered.channel(0);
        assert!(band_energy(ch, 48000, 7000.0, 9000.0) < 1e-3 * band_energy(ch, 48000, 100.0, 300.0));
    }

    #[test]
    fn test_filtfilt_preserves_length_and_dc() {
        let coeffs = BiquadCoeffs::design(FilterKind::LowPass, 48000.0, 500.0, 0.7, 0.0);
        let out = filtfilt(&vec![0.5; 4000], &coeffs);
        assert_eq!(out.len(), 4000);
        assert_relative_eq!(out[2000], 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_high_q_filter_settles_before_the_first_sample() {
        // A sine starting at zero phase continues cleanly under odd reflection
        let tone = generate_test_tone(500.0, 0.5, 16000);
        let coeffs = BiquadCoeffs::design(FilterKind::BandPass, 16000.0, 500.0, 20.0, 0.0);
        assert!(coeffs.settling_samples() > 1000);

        let out = filtfilt(tone.channel(0), &coeffs);
        let onset_error = out[..200]
            .iter()
            .zip(&tone.channel(0)[..200])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f32, f32::max);
        assert!(onset_error < 0.02, "onset error {}", onset_error);
    }

    #[test]
    fn test_cutoff_above_nyquist_rejected() {
        let params = FilterParams::low_pass(10_000.0).unwrap();
        let buffer = generate_test_tone(100.0, 0.1, 16000);
        assert!(matches!(
            params.apply(&buffer),
            Err(CantorError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_invalid_q_rejected() {
        assert!(FilterParams::band_pass(1000.0, 0.0).is_err());
        assert!(FilterParams::band_pass(1000.0, 40.0).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: FilterParams =
            serde_json::from_str(r#"{"kind": "resonant_low_pass", "cutoff_hz": 800, "q": 4}"#).unwrap();
        assert_eq!(ok.kind(), FilterKind::ResonantLowPass);
        assert!(serde_json::from_str::<FilterParams>(r#"{"cutoff_hz": 5}"#).is_err());
    }

    #[test]
    fn test_empty_input() {
        let out = FilterParams::default().apply(&AudioBuffer::empty(48000)).unwrap();
        assert!(out.is_empty());
    }
}
