//! Short-time Fourier transform and spectral freeze
//!
//! Frames are centered: the signal is padded by half a frame on both sides
//! so frame `i` is centered on sample `i * hop`. Synthesis is a weighted
//! overlap-add normalized by the summed squared window, which reconstructs
//! the input when frames are left untouched.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::effect::{ensure_range, Effect, EffectPosition};
use crate::engine::AudioBuffer;
use crate::error::{CantorError, Result};
use crate::{impl_effect_common, validated_params};

/// Periodic Hann window
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| {
            let phase = 2.0 * std::f64::consts::PI * n as f64 / size as f64;
            (0.5 - 0.5 * phase.cos()) as f32
        })
        .collect()
}

/// Planned forward/inverse transforms for one frame size
#[derive(Clone)]
pub struct Stft {
    fft_size: usize,
    hop: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft")
            .field("fft_size", &self.fft_size)
            .field("hop", &self.hop)
            .finish()
    }
}

impl Stft {
    /// Hann-windowed STFT with 75% overlap
    pub fn new(fft_size: usize) -> Self {
        Self::with_hop(fft_size, (fft_size / 4).max(1))
    }

    pub fn with_hop(fft_size: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft_size,
            hop,
            window: hann_window(fft_size),
            forward: planner.plan_fft_forward(fft_size),
            inverse: planner.plan_fft_inverse(fft_size),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Bins per frame (DC through nyquist)
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    fn pad(&self) -> usize {
        self.fft_size / 2
    }

    /// Frame count covering `len` samples
    pub fn num_frames(&self, len: usize) -> usize {
        let needed = len + 2 * self.pad();
        if needed <= self.fft_size {
            1
        } else {
            1 + (needed - self.fft_size).div_ceil(self.hop)
        }
    }

    /// Half-spectrum frames of `samples`
    pub fn analyze(&self, samples: &[f32]) -> Vec<Vec<Complex<f32>>> {
        let frames = self.num_frames(samples.len());
        let pad = self.pad();
        let mut padded = vec![0.0_f32; (frames - 1) * self.hop + self.fft_size];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let bins = self.num_bins();
        let mut scratch = vec![Complex::new(0.0, 0.0); self.fft_size];
        (0..frames)
            .map(|f| {
                let start = f * self.hop;
                for (i, slot) in scratch.iter_mut().enumerate() {
                    *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
                }
                self.forward.process(&mut scratch);
                scratch[..bins].to_vec()
            })
            .collect()
    }

    /// Inverse transform of one half-spectrum frame into real samples
    pub fn inverse_frame(&self, frame: &[Complex<f32>]) -> Vec<f32> {
        let n = self.fft_size;
        let bins = self.num_bins();
        let mut full = vec![Complex::new(0.0, 0.0); n];
        for (k, value) in frame.iter().take(bins).enumerate() {
            full[k] = *value;
            if k > 0 && k < n - k {
                full[n - k] = value.conj();
            }
        }
        self.inverse.process(&mut full);
        let scale = 1.0 / n as f32;
        full.iter().map(|c| c.re * scale).collect()
    }

    /// Weighted overlap-add back to exactly `len` samples
    pub fn synthesize(&self, frames: &[Vec<Complex<f32>>], len: usize) -> Vec<f32> {
        if frames.is_empty() {
            return vec![0.0; len];
        }
        let total = (frames.len() - 1) * self.hop + self.fft_size;
        let mut out = vec![0.0_f32; total];
        let mut norm = vec![0.0_f32; total];

        for (f, frame) in frames.iter().enumerate() {
            let start = f * self.hop;
            let time = self.inverse_frame(frame);
            for (i, sample) in time.iter().enumerate() {
                let w = self.window[i];
                out[start + i] += sample * w;
                norm[start + i] += w * w;
            }
        }

        let pad = self.pad();
        (0..len)
            .map(|i| {
                let idx = pad + i;
                if idx < total && norm[idx] > 1e-6 {
                    out[idx] / norm[idx]
                } else {
                    0.0
                }
            })
            .collect()
    }
}

// ============================================================================
// Spectral Freeze
// ============================================================================

/// Spectral freeze parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSpectralFreezeParams")]
pub struct SpectralFreezeParams {
    /// Position of the captured frame as a fraction of the duration (0-1)
    freeze_point: f32,
    /// Seconds over which the frozen spectrum fades in (0-30)
    fade_secs: f32,
    /// Maximum share of the frozen magnitude (0-1)
    blend: f32,
    /// Frame size, a power of two from 256 to 8192
    fft_size: usize,
}

validated_params!(SpectralFreezeParams, RawSpectralFreezeParams {
    freeze_point: f32,
    fade_secs: f32,
    blend: f32,
    fft_size: usize,
});

impl Default for SpectralFreezeParams {
    fn default() -> Self {
        Self {
            freeze_point: 0.3,
            fade_secs: 2.0,
            blend: 0.5,
            fft_size: 2048,
        }
    }
}

impl SpectralFreezeParams {
    pub fn new(freeze_point: f32, fade_secs: f32, blend: f32, fft_size: usize) -> Result<Self> {
        let params = Self {
            freeze_point,
            fade_secs,
            blend,
            fft_size,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn blend(&self) -> f32 {
        self.blend
    }

    fn validate(&self) -> Result<()> {
        ensure_range("spectral_freeze.freeze_point", self.freeze_point, 0.0, 1.0)?;
        ensure_range("spectral_freeze.fade_secs", self.fade_secs, 0.0, 30.0)?;
        ensure_range("spectral_freeze.blend", self.blend, 0.0, 1.0)?;
        validate_fft_size("spectral_freeze.fft_size", self.fft_size)
    }

    /// Frozen share for a frame `since` seconds after the freeze frame
    fn blend_at(&self, since: f32) -> f32 {
        if self.fade_secs <= 0.0 {
            self.blend
        } else {
            self.blend * (since / self.fade_secs).min(1.0)
        }
    }

    fn freeze_channel(&self, stft: &Stft, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        let mut frames = stft.analyze(samples);
        let last = frames.len() - 1;
        let target = (self.freeze_point as f64 * samples.len() as f64 / stft.hop() as f64).round();
        let freeze_idx = (target as usize).min(last);
        let frozen: Vec<f32> = frames[freeze_idx].iter().map(|c| c.norm()).collect();

        let frame_secs = stft.hop() as f32 / sample_rate as f32;
        for (offset, frame) in frames[freeze_idx..].iter_mut().enumerate() {
            let b = self.blend_at(offset as f32 * frame_secs);
            if b <= 0.0 {
                continue;
            }
            for (bin, frozen_mag) in frame.iter_mut().zip(&frozen) {
                let live_mag = bin.norm();
                let mag = live_mag * (1.0 - b) + frozen_mag * b;
                *bin = Complex::from_polar(mag, bin.arg());
            }
        }

        stft.synthesize(&frames, samples.len())
    }
}

pub(crate) fn validate_fft_size(field: &str, fft_size: usize) -> Result<()> {
    if !fft_size.is_power_of_two() || !(256..=8192).contains(&fft_size) {
        return Err(CantorError::invalid(
            field,
            fft_size,
            "a power of two from 256 to 8192",
        ));
    }
    Ok(())
}

impl Effect for SpectralFreezeParams {
    impl_effect_common!("spectral_freeze", EffectPosition::SpectralFreeze);

    fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        if buffer.is_empty() {
            return Ok(buffer.clone());
        }
        let stft = Stft::new(self.fft_size);
        debug!(
            samples = buffer.len(),
            fft_size = self.fft_size,
            blend = self.blend,
            "spectral freeze"
        );
        Ok(buffer.map_channels(|ch| self.freeze_channel(&stft, ch, buffer.sample_rate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::generate_test_tone;

    fn chirp(len: usize, sample_rate: u32) -> AudioBuffer {
        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * (200.0 + 400.0 * t) * t).sin() * 0.5
            })
            .collect();
        AudioBuffer::mono(samples, sample_rate)
    }

    #[test]
    fn test_stft_round_trip() {
        let tone = generate_test_tone(440.0, 0.25, 48000);
        let stft = Stft::new(1024);
        let frames = stft.analyze(tone.channel(0));
        let back = stft.synthesize(&frames, tone.len());
        assert_eq!(back.len(), tone.len());
        for (a, b) in tone.channel(0).iter().zip(&back) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_stft_handles_input_shorter_than_frame() {
        let stft = Stft::new(1024);
        let samples = vec![0.25_f32; 100];
        let back = stft.synthesize(&stft.analyze(&samples), samples.len());
        assert_eq!(back.len(), 100);
        assert!((back[50] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_freeze_preserves_length() {
        let input = chirp(20_011, 16000);
        let params = SpectralFreezeParams::new(0.5, 0.0, 1.0, 512).unwrap();
        let out = params.apply(&input).unwrap();
        assert_eq!(out.len(), input.len());
        assert!(out.is_finite());
    }

    #[test]
    fn test_zero_blend_reproduces_input() {
        let input = chirp(16000, 16000);
        let params = SpectralFreezeParams::new(0.2, 1.0, 0.0, 1024).unwrap();
        let out = params.apply(&input).unwrap();
        for (a, b) in input.channel(0).iter().zip(out.channel(0)) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_full_freeze_changes_tail() {
        let input = chirp(16000, 16000);
        let params = SpectralFreezeParams::new(0.1, 0.0, 1.0, 1024).unwrap();
        let out = params.apply(&input).unwrap();
        let head_diff: f32 = (0..1000)
            .map(|i| (input.channel(0)[i] - out.channel(0)[i]).abs())
            .sum();
        let tail_diff: f32 = (12000..13000)
            .map(|i| (input.channel(0)[i] - out.channel(0)[i]).abs())
            .sum();
        assert!(tail_diff > head_diff);
    }

    #[test]
    fn test_fft_size_must_be_power_of_two() {
        assert!(SpectralFreezeParams::new(0.5, 1.0, 0.5, 1000).is_err());
        assert!(SpectralFreezeParams::new(0.5, 1.0, 0.5, 128).is_err());
        assert!(SpectralFreezeParams::new(0.5, 1.0, 0.5, 4096).is_ok());
    }

    #[test]
    fn test_empty_input() {
        let out = SpectralFreezeParams::default()
            .apply(&AudioBuffer::empty(48000))
            .unwrap();
        assert!(out.is_empty());
    }
}
