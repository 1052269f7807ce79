//! Audio file I/O for Cantor
//!
//! Writes rendered stems and mixes to WAV, reads WAV back for verification,
//! and converts between sample rates.
//!
//! Sample rate conversion uses linear interpolation (TODO: upgrade to sinc).

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::{AudioBuffer, ChannelLayout};
use crate::error::{CantorError, Result};

/// Export format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    sample_rate: u32,
    bit_depth: u16,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat {
            sample_rate: 48000,
            bit_depth: 24,
        }
    }
}

impl ExportFormat {
    /// Create a new export format; bit depth must be 16, 24 or 32
    pub fn new(sample_rate: u32, bit_depth: u16) -> Result<Self> {
        if !(8000..=192_000).contains(&sample_rate) {
            return Err(CantorError::invalid(
                "sample_rate",
                sample_rate,
                "8000 to 192000 Hz",
            ));
        }
        if !matches!(bit_depth, 16 | 24 | 32) {
            return Err(CantorError::invalid("bit_depth", bit_depth, "16, 24 or 32"));
        }
        Ok(ExportFormat {
            sample_rate,
            bit_depth,
        })
    }

    /// Create format for CD quality (44.1kHz, 16-bit)
    pub fn cd_quality() -> Self {
        ExportFormat {
            sample_rate: 44100,
            bit_depth: 16,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bit_depth(&self) -> u16 {
        self.bit_depth
    }
}

/// Export an AudioBuffer to a WAV file
///
/// Resamples when the buffer's rate differs from the export rate. Samples
/// are clamped to [-1, 1] for integer formats.
pub fn export_wav(buffer: &AudioBuffer, path: &Path, format: ExportFormat) -> Result<()> {
    let export = resample(buffer, format.sample_rate);
    let channels = export.channels().max(1) as u16;

    let spec = WavSpec {
        channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bit_depth,
        sample_format: if format.bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let mut writer = WavWriter::create(path, spec)?;
    let interleaved = export.to_interleaved();

    match format.bit_depth {
        16 => {
            for sample in interleaved {
                let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer.write_sample(scaled)?;
            }
        }
        24 => {
            for sample in interleaved {
                // 24-bit stored as i32 in hound
                let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                writer.write_sample(scaled)?;
            }
        }
        _ => {
            for sample in interleaved {
                writer.write_sample(sample)?;
            }
        }
    }

    writer.finalize()?;
    Ok(())
}

/// Read a WAV file into an AudioBuffer at its native sample rate
pub fn read_wav(path: &Path) -> Result<AudioBuffer> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let layout = ChannelLayout::from_count(spec.channels as usize).ok_or_else(|| {
        CantorError::invalid("channels", spec.channels, "1 (mono) or 2 (stereo)")
    })?;

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()?
        }
    };

    AudioBuffer::from_interleaved(&samples, layout, spec.sample_rate)
}

/// Generate a mono sine test tone
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> AudioBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let angular_freq = 2.0 * std::f64::consts::PI * frequency as f64 / sample_rate as f64;
    let samples = (0..num_samples)
        .map(|i| (angular_freq * i as f64).sin() as f32)
        .collect();
    AudioBuffer::mono(samples, sample_rate)
}

/// Resample a buffer to `target_rate`
///
/// Returns a clone when the rates already match.
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> AudioBuffer {
    if buffer.sample_rate == target_rate || buffer.sample_rate == 0 {
        return buffer.clone();
    }
    let ratio = target_rate as f64 / buffer.sample_rate as f64;
    let mut out = buffer.map_channels(|ch| resample_linear(ch, ratio));
    out.sample_rate = target_rate;
    out
}

/// Linear interpolation resampling by `ratio` (output rate / input rate)
///
/// TODO: Replace with sinc interpolation for high-quality resampling.
/// Linear interpolation aliases when downsampling.
pub fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() || ratio <= 0.0 {
        return Vec::new();
    }

    let source_len = samples.len();
    let target_len = ((source_len as f64) * ratio).round().max(1.0) as usize;
    let mut output = Vec::with_capacity(target_len);

    for i in 0..target_len {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < source_len {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else if src_idx < source_len {
            samples[src_idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generate_test_tone() {
        let buffer = generate_test_tone(440.0, 1.0, 48000);
        assert_eq!(buffer.len(), 48000);
        assert_eq!(buffer.channels(), 1);
        let half_cycle = (48000.0 / 440.0 / 2.0) as usize;
        assert!(buffer.samples[0][half_cycle].abs() < 0.1);
    }

    #[test]
    fn test_resample_linear_upsample() {
        let out = resample_linear(&[0.0, 1.0, 0.0, -1.0], 2.0);
        assert_eq!(out.len(), 8);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resample_changes_rate() {
        let tone = generate_test_tone(440.0, 0.5, 44100);
        let out = resample(&tone, 48000);
        assert_eq!(out.sample_rate, 48000);
        assert_eq!(out.len(), 24000);
    }

    #[test]
    fn test_export_format_rejects_odd_bit_depth() {
        assert!(ExportFormat::new(48000, 12).is_err());
        assert!(ExportFormat::new(48000, 24).is_ok());
    }

    #[test]
    fn test_round_trip_16bit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let tone = generate_test_tone(220.0, 0.2, 48000).with_gain(0.5);

        export_wav(&tone, &path, ExportFormat::new(48000, 16).unwrap()).unwrap();
        let back = read_wav(&path).unwrap();

        assert_eq!(back.len(), tone.len());
        for (a, b) in tone.channel(0).iter().zip(back.channel(0)) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_round_trip_32bit_float_stereo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let stereo = generate_test_tone(330.0, 0.1, 48000).to_stereo(0.5);

        export_wav(&stereo, &path, ExportFormat::new(48000, 32).unwrap()).unwrap();
        let back = read_wav(&path).unwrap();

        assert_eq!(back.channels(), 2);
        assert_eq!(back, stereo);
    }
}
