//! Pitch detection, time stretching and pitch shifting
//!
//! - `detect_pitch`: YIN fundamental estimation
//! - `time_stretch`: phase vocoder, duration changes and pitch holds
//! - `pitch_shift`: stretch then resample, duration holds and pitch changes

use std::f32::consts::PI;

use rustfft::num_complex::Complex;

use super::spectral::Stft;
use crate::engine::buffer::{fit_length, slice_rms};
use crate::engine::io::resample_linear;

/// Frame size used by the phase vocoder
pub const VOCODER_FFT_SIZE: usize = 2048;

/// Lowest fundamental the detector searches for
pub const MIN_PITCH_HZ: f32 = 60.0;

/// Highest fundamental the detector searches for
pub const MAX_PITCH_HZ: f32 = 1000.0;

const YIN_THRESHOLD: f32 = 0.15;
const YIN_FALLBACK_THRESHOLD: f32 = 0.35;
const YIN_WINDOW: usize = 4096;
const VOICING_RMS: f32 = 1e-4;

/// Estimate the fundamental frequency of a slice with YIN.
///
/// Returns `None` for silence, unvoiced material, or slices shorter than
/// two periods of the lowest searchable pitch.
pub fn detect_pitch(samples: &[f32], sample_rate: u32) -> Option<f32> {
    detect_pitch_in_range(samples, sample_rate, MIN_PITCH_HZ, MAX_PITCH_HZ)
}

pub fn detect_pitch_in_range(
    samples: &[f32],
    sample_rate: u32,
    min_hz: f32,
    max_hz: f32,
) -> Option<f32> {
    let sr = sample_rate as f32;
    let tau_min = ((sr / max_hz).floor() as usize).max(2);
    let tau_max = (sr / min_hz).ceil() as usize;
    if samples.len() < 2 * tau_max || slice_rms(samples) < VOICING_RMS {
        return None;
    }

    let window = (samples.len() - tau_max).min(YIN_WINDOW);
    let start = (samples.len() - window - tau_max) / 2;
    let frame = &samples[start..start + window + tau_max];

    // Difference function
    let diff: Vec<f64> = (0..=tau_max)
        .map(|tau| {
            (0..window)
                .map(|j| {
                    let d = (frame[j] - frame[j + tau]) as f64;
                    d * d
                })
                .sum()
        })
        .collect();

    // Cumulative mean normalized difference
    let mut cmnd = vec![1.0_f32; tau_max + 1];
    let mut running = 0.0_f64;
    for tau in 1..=tau_max {
        running += diff[tau];
        cmnd[tau] = if running > 0.0 {
            (diff[tau] * tau as f64 / running) as f32
        } else {
            1.0
        };
    }

    let mut best = None;
    let mut tau = tau_min;
    while tau < tau_max {
        if cmnd[tau] < YIN_THRESHOLD {
            while tau + 1 < tau_max && cmnd[tau + 1] < cmnd[tau] {
                tau += 1;
            }
            best = Some(tau);
            break;
        }
        tau += 1;
    }

    let tau = match best {
        Some(t) => t,
        None => {
            let (t, value) = (tau_min..tau_max)
                .map(|t| (t, cmnd[t]))
                .min_by(|a, b| a.1.total_cmp(&b.1))?;
            if value > YIN_FALLBACK_THRESHOLD {
                return None;
            }
            t
        }
    };

    // Parabolic interpolation around the dip
    let refined = if tau > 1 && tau < tau_max {
        let (a, b, c) = (cmnd[tau - 1], cmnd[tau], cmnd[tau + 1]);
        let denom = a - 2.0 * b + c;
        if denom.abs() > 1e-9 {
            tau as f32 + 0.5 * (a - c) / denom
        } else {
            tau as f32
        }
    } else {
        tau as f32
    };

    Some(sr / refined)
}

fn wrap_phase(phase: f32) -> f32 {
    phase - 2.0 * PI * (phase / (2.0 * PI)).round()
}

/// Phase-vocoder time stretch.
///
/// `rate > 1` speeds up (shorter output), `rate < 1` slows down. The output
/// holds exactly `round(len / rate)` samples and keeps the input's pitch.
pub fn time_stretch(samples: &[f32], rate: f32) -> Vec<f32> {
    if samples.is_empty() || !rate.is_finite() || rate <= 0.0 {
        return Vec::new();
    }
    let target_len = (samples.len() as f64 / rate as f64).round() as usize;
    if (rate - 1.0).abs() < 1e-6 {
        return fit_length(samples.to_vec(), target_len);
    }

    let stft = Stft::new(VOCODER_FFT_SIZE);
    let frames = stft.analyze(samples);
    let last = frames.len() - 1;
    let bins = stft.num_bins();
    let hop = stft.hop() as f32;
    let expected: Vec<f32> = (0..bins)
        .map(|k| 2.0 * PI * k as f32 * hop / stft.fft_size() as f32)
        .collect();

    let mut phase: Vec<f32> = frames[0].iter().map(|c| c.arg()).collect();
    let mut out_frames = Vec::new();
    let limit = frames.len() as f64 + 1.0;
    let mut position = 0.0_f64;

    while position < limit {
        let idx = (position.floor() as usize).min(last);
        let next = (idx + 1).min(last);
        let frac = (position - position.floor()) as f32;

        let frame: Vec<Complex<f32>> = (0..bins)
            .map(|k| {
                let mag = frames[idx][k].norm() * (1.0 - frac) + frames[next][k].norm() * frac;
                Complex::from_polar(mag, phase[k])
            })
            .collect();
        out_frames.push(frame);

        for k in 0..bins {
            let delta = frames[next][k].arg() - frames[idx][k].arg() - expected[k];
            phase[k] += expected[k] + wrap_phase(delta);
        }
        position += rate as f64;
    }

    stft.synthesize(&out_frames, target_len)
}

/// Shift pitch by `semitones`, keeping the sample count
pub fn pitch_shift(samples: &[f32], semitones: f32) -> Vec<f32> {
    if samples.is_empty() || !semitones.is_finite() || semitones.abs() < 1e-3 {
        return samples.to_vec();
    }
    let ratio = 2.0_f32.powf(semitones / 12.0);
    let stretched = time_stretch(samples, 1.0 / ratio);
    let resampled = resample_linear(&stretched, 1.0 / ratio as f64);
    fit_length(resampled, samples.len())
}

/// Semitone distance from `from_hz` to `to_hz`
pub fn semitones_between(from_hz: f32, to_hz: f32) -> f32 {
    12.0 * (to_hz / from_hz).log2()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::generate_test_tone;
    use test_case::test_case;

    #[test_case(110.0 ; "low voice")]
    #[test_case(220.0 ; "mid voice")]
    #[test_case(440.0 ; "concert a")]
    fn test_detect_sine_pitch(freq: f32) {
        let tone = generate_test_tone(freq, 0.3, 48000);
        let detected = detect_pitch(tone.channel(0), 48000).unwrap();
        assert!((detected - freq).abs() < 1.0, "expected {} got {}", freq, detected);
    }

    #[test]
    fn test_detect_silence_is_none() {
        assert!(detect_pitch(&vec![0.0; 8000], 48000).is_none());
    }

    #[test]
    fn test_detect_short_slice_is_none() {
        let tone = generate_test_tone(220.0, 0.01, 48000);
        assert!(detect_pitch(tone.channel(0), 48000).is_none());
    }

    #[test_case(0.5 ; "slower")]
    #[test_case(1.5 ; "faster")]
    fn test_time_stretch_length(rate: f32) {
        let tone = generate_test_tone(220.0, 0.5, 48000);
        let out = time_stretch(tone.channel(0), rate);
        assert_eq!(out.len(), (tone.len() as f32 / rate).round() as usize);
    }

    #[test]
    fn test_time_stretch_keeps_pitch() {
        let tone = generate_test_tone(220.0, 0.5, 48000).with_gain(0.5);
        let out = time_stretch(tone.channel(0), 0.7);
        let detected = detect_pitch(&out, 48000).unwrap();
        assert!((detected - 220.0).abs() < 5.0, "detected {}", detected);
    }

    #[test]
    fn test_pitch_shift_octave_up() {
        let tone = generate_test_tone(220.0, 0.5, 48000).with_gain(0.5);
        let out = pitch_shift(tone.channel(0), 12.0);
        assert_eq!(out.len(), tone.len());
        let detected = detect_pitch(&out, 48000).unwrap();
        assert!((detected - 440.0).abs() < 10.0, "detected {}", detected);
    }

    #[test]
    fn test_zero_shift_is_identity() {
        let tone = generate_test_tone(220.0, 0.1, 48000);
        assert_eq!(pitch_shift(tone.channel(0), 0.0), tone.channel(0).to_vec());
    }

    #[test]
    fn test_semitones_between_octave() {
        assert!((semitones_between(220.0, 440.0) - 12.0).abs() < 1e-5);
    }
}
