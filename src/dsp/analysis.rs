//! Spectral measurements used for verification and debug logging

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use super::spectral::hann_window;

/// Largest analysis window; longer inputs are measured over their center
const MAX_ANALYSIS_SIZE: usize = 1 << 16;

/// Magnitude spectrum of a Hann-windowed slice
///
/// Returns the DC..nyquist magnitudes and the bin width in Hz.
pub fn magnitude_spectrum(samples: &[f32], sample_rate: u32) -> (Vec<f32>, f32) {
    if samples.is_empty() {
        return (Vec::new(), 0.0);
    }
    let size = samples.len().next_power_of_two().min(MAX_ANALYSIS_SIZE);
    let used = samples.len().min(size);
    let start = (samples.len() - used) / 2;
    let window = hann_window(used);

    let mut buf: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); size];
    for (i, slot) in buf.iter_mut().take(used).enumerate() {
        *slot = Complex::new(samples[start + i] * window[i], 0.0);
    }
    FftPlanner::new().plan_fft_forward(size).process(&mut buf);

    let mags = buf[..size / 2 + 1].iter().map(|c| c.norm()).collect();
    (mags, sample_rate as f32 / size as f32)
}

/// Magnitude-weighted mean frequency in Hz; zero for silence
pub fn spectral_centroid(samples: &[f32], sample_rate: u32) -> f32 {
    let (mags, bin_hz) = magnitude_spectrum(samples, sample_rate);
    let total: f64 = mags.iter().map(|&m| m as f64).sum();
    if total <= 1e-12 {
        return 0.0;
    }
    let weighted: f64 = mags
        .iter()
        .enumerate()
        .map(|(k, &m)| k as f64 * bin_hz as f64 * m as f64)
        .sum();
    (weighted / total) as f32
}

/// Summed squared magnitude of the bins between `low_hz` and `high_hz`
#[cfg(test)]
pub(crate) fn band_energy(samples: &[f32], sample_rate: u32, low_hz: f32, high_hz: f32) -> f32 {
    let (mags, bin_hz) = magnitude_spectrum(samples, sample_rate);
    if bin_hz <= 0.0 {
        return 0.0;
    }
    mags.iter()
        .enumerate()
        .filter(|(k, _)| {
            let freq = *k as f32 * bin_hz;
            freq >= low_hz && freq <= high_hz
        })
        .map(|(_, m)| m * m)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::generate_test_tone;

    #[test]
    fn test_centroid_of_pure_tone() {
        let tone = generate_test_tone(1000.0, 0.5, 48000);
        let centroid = spectral_centroid(tone.channel(0), 48000);
        assert!((centroid - 1000.0).abs() < 50.0, "centroid {}", centroid);
    }

    #[test]
    fn test_band_energy_locates_tone() {
        let tone = generate_test_tone(3000.0, 0.25, 48000);
        let inside = band_energy(tone.channel(0), 48000, 2900.0, 3100.0);
        let outside = band_energy(tone.channel(0), 48000, 500.0, 1500.0);
        assert!(inside > 1000.0 * outside);
    }

    #[test]
    fn test_silence_has_zero_centroid() {
        assert_eq!(spectral_centroid(&vec![0.0; 1024], 48000), 0.0);
        assert_eq!(spectral_centroid(&[], 48000), 0.0);
    }
}
