//! Formant shifting
//!
//! Each STFT frame's spectral envelope is traced through its harmonic peaks:
//! bins that are the loudest within a small neighbourhood are joined by
//! straight lines in the log domain. Every bin is then scaled by the ratio of
//! the envelope's frequency-warped value to its own, and the frame's energy is
//! restored. Resonances move while the harmonic spacing, and so the pitch,
//! stays put.

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::effect::{ensure_range, Effect, EffectPosition};
use super::spectral::{validate_fft_size, Stft};
use crate::engine::AudioBuffer;
use crate::error::{CantorError, Result};
use crate::{impl_effect_common, validated_params};

/// A harmonic peak must be the loudest bin within this distance
const PEAK_RADIUS_HZ: f32 = 60.0;

/// Floor applied before taking logs
const LOG_FLOOR: f32 = 1e-9;

/// Per-bin gains are limited to +/-60 dB
const MAX_LOG_GAIN: f32 = 6.9;

/// Formant shift parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFormantShiftParams")]
pub struct FormantShiftParams {
    /// Envelope warp factor (0.5 to 2.0); above 1 raises formants
    shift_factor: f32,
    fft_size: usize,
}

validated_params!(FormantShiftParams, RawFormantShiftParams {
    shift_factor: f32,
    fft_size: usize,
});

impl Default for FormantShiftParams {
    fn default() -> Self {
        Self {
            shift_factor: 1.0,
            fft_size: 2048,
        }
    }
}

impl FormantShiftParams {
    pub fn new(shift_factor: f32) -> Result<Self> {
        let params = Self {
            shift_factor,
            ..Self::default()
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_fft_size(self, fft_size: usize) -> Result<Self> {
        let params = Self { fft_size, ..self };
        params.validate()?;
        Ok(params)
    }

    pub fn shift_factor(&self) -> f32 {
        self.shift_factor
    }

    fn validate(&self) -> Result<()> {
        ensure_range("formant.shift_factor", self.shift_factor, 0.5, 2.0)?;
        validate_fft_size("formant.fft_size", self.fft_size)
    }

    /// Peak-search radius in bins at `sample_rate`
    fn peak_radius(&self, sample_rate: u32) -> usize {
        ((PEAK_RADIUS_HZ * self.fft_size as f32 / sample_rate as f32).round() as usize).max(1)
    }
}

/// Log-magnitude envelope through the frame's spectral peaks
///
/// Outside the first and last peak the envelope holds the peak's level. A
/// frame without peaks (silence) gets its own log spectrum back.
fn peak_envelope(frame: &[Complex<f32>], radius: usize) -> Vec<f32> {
    let floor = LOG_FLOOR.ln();
    let logs: Vec<f32> = frame.iter().map(|b| b.norm().max(LOG_FLOOR).ln()).collect();
    let bins = logs.len();

    let peaks: Vec<usize> = (0..bins)
        .filter(|&k| {
            let lo = k.saturating_sub(radius);
            let hi = (k + radius + 1).min(bins);
            logs[k] > floor && logs[lo..hi].iter().all(|&v| v <= logs[k])
        })
        .collect();
    let (Some(&first), Some(&last)) = (peaks.first(), peaks.last()) else {
        return logs;
    };

    let mut envelope = vec![0.0_f32; bins];
    envelope[..=first].fill(logs[first]);
    envelope[last..].fill(logs[last]);
    for pair in peaks.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let span = (b - a) as f32;
        for (k, slot) in envelope.iter_mut().enumerate().take(b + 1).skip(a) {
            let t = (k - a) as f32 / span;
            *slot = logs[a] * (1.0 - t) + logs[b] * t;
        }
    }
    envelope
}

/// Linear interpolation into `values` at a fractional index, clamped to the ends
fn interpolate(values: &[f32], position: f32) -> f32 {
    let last = values.len() - 1;
    if position <= 0.0 {
        return values[0];
    }
    if position >= last as f32 {
        return values[last];
    }
    let idx = position.floor() as usize;
    let frac = position - idx as f32;
    values[idx] * (1.0 - frac) + values[idx + 1] * frac
}

fn frame_energy(frame: &[Complex<f32>]) -> f32 {
    frame.iter().map(|b| b.norm_sqr()).sum()
}

impl FormantShiftParams {
    fn shift_channel(&self, stft: &Stft, radius: usize, samples: &[f32]) -> Vec<f32> {
        let mut frames = stft.analyze(samples);
        for frame in frames.iter_mut() {
            let before = frame_energy(frame);
            if before <= 0.0 {
                continue;
            }
            let envelope = peak_envelope(frame, radius);
            for (k, bin) in frame.iter_mut().enumerate() {
                let warped = interpolate(&envelope, k as f32 / self.shift_factor);
                let log_gain = (warped - envelope[k]).clamp(-MAX_LOG_GAIN, MAX_LOG_GAIN);
                *bin *= log_gain.exp();
            }
            let after = frame_energy(frame);
            if after > 0.0 {
                let restore = (before / after).sqrt();
                frame.iter_mut().for_each(|bin| *bin *= restore);
            }
        }
        stft.synthesize(&frames, samples.len())
    }
}

impl Effect for FormantShiftParams {
    impl_effect_common!("formant_shift", EffectPosition::Filter);

    fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        if buffer.is_empty() || (self.shift_factor - 1.0).abs() < 1e-6 {
            return Ok(buffer.clone());
        }
        let stft = Stft::new(self.fft_size);
        let radius = self.peak_radius(buffer.sample_rate);
        debug!(shift = self.shift_factor, radius, "formant shift");

        let out = buffer.map_channels(|ch| self.shift_channel(&stft, radius, ch));
        if !out.is_finite() {
            return Err(CantorError::stage("formant_shift", "non-finite envelope"));
        }
        Ok(out)
    }
}
