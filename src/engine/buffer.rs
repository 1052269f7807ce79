//! Audio Buffer Management
//!
//! Provides the core audio buffer type shared by every stage of the renderer.
//! Buffers are treated as values: transforms return a new buffer and leave
//! their input untouched, which keeps effect stages composable.

use crate::error::{CantorError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default render sample rate (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Peak level every stem is normalized to before mixing (about -1 dBFS)
pub const STEM_PEAK: f32 = 0.89;

/// Peak below which a buffer is treated as silent
pub const SILENCE_PEAK: f32 = 1e-6;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Peak absolute value of a sample slice
pub fn slice_peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max)
}

/// RMS level of a sample slice (linear)
pub fn slice_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Zero-pad or truncate a sample vector to exactly `len` samples
pub fn fit_length(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}

// ============================================================================
// Channel Layout
// ============================================================================

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    /// Single channel (mono)
    #[default]
    Mono,
    /// Two channels (stereo: left, right)
    Stereo,
}

impl ChannelLayout {
    /// Returns the number of channels for this layout
    pub fn num_channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    /// Create a ChannelLayout from a channel count
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            _ => None,
        }
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Per-channel audio buffer tagged with its sample rate
///
/// Every channel holds the same number of samples.
///
/// # Example
/// ```
/// use cantor::engine::{AudioBuffer, ChannelLayout};
///
/// let buffer = AudioBuffer::new(48000, ChannelLayout::Stereo, 48000);
/// assert_eq!(buffer.channels(), 2);
/// assert_eq!(buffer.len(), 48000);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer with the specified length and layout
    pub fn new(num_samples: usize, layout: ChannelLayout, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_samples]; layout.num_channels()],
            sample_rate,
        }
    }

    /// Create a mono buffer from a sample vector
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: vec![samples],
            sample_rate,
        }
    }

    /// Create an empty mono buffer
    pub fn empty(sample_rate: u32) -> Self {
        Self::mono(Vec::new(), sample_rate)
    }

    /// Create a buffer from per-channel vectors
    ///
    /// Fails if the channel count is not 1 or 2 or the channels differ in length.
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if ChannelLayout::from_count(samples.len()).is_none() {
            return Err(CantorError::invalid(
                "channels",
                samples.len(),
                "1 (mono) or 2 (stereo)",
            ));
        }
        let len = samples[0].len();
        if samples.iter().any(|ch| ch.len() != len) {
            return Err(CantorError::invalid(
                "channels",
                "unequal channel lengths",
                "every channel with the same sample count",
            ));
        }
        if sample_rate == 0 {
            return Err(CantorError::invalid("sample_rate", 0, "a positive rate in Hz"));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create an audio buffer from interleaved sample data
    pub fn from_interleaved(
        interleaved: &[f32],
        layout: ChannelLayout,
        sample_rate: u32,
    ) -> Result<Self> {
        let num_channels = layout.num_channels();

        if interleaved.len() % num_channels != 0 {
            return Err(CantorError::invalid(
                "interleaved",
                interleaved.len(),
                "a sample count divisible by the channel count",
            ));
        }

        let num_samples = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_samples); num_channels];
        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Convert the buffer to interleaved format (L, R, L, R, ... for stereo)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut interleaved = Vec::with_capacity(self.channels() * self.len());
        for sample_idx in 0..self.len() {
            for channel in &self.samples {
                interleaved.push(channel[sample_idx]);
            }
        }
        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer is empty (no samples)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Get the channel layout
    pub fn channel_layout(&self) -> Option<ChannelLayout> {
        ChannelLayout::from_count(self.channels())
    }

    /// Get immutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Apply a per-channel transform, producing a new buffer
    ///
    /// The transform must return the same length for every channel.
    pub fn map_channels<F>(&self, mut f: F) -> AudioBuffer
    where
        F: FnMut(&[f32]) -> Vec<f32>,
    {
        AudioBuffer {
            samples: self.samples.iter().map(|ch| f(ch)).collect(),
            sample_rate: self.sample_rate,
        }
    }

    /// Fallible variant of [`AudioBuffer::map_channels`]
    pub fn try_map_channels<F>(&self, mut f: F) -> Result<AudioBuffer>
    where
        F: FnMut(&[f32]) -> Result<Vec<f32>>,
    {
        let samples = self
            .samples
            .iter()
            .map(|ch| f(ch))
            .collect::<Result<Vec<_>>>()?;
        Ok(AudioBuffer {
            samples,
            sample_rate: self.sample_rate,
        })
    }

    /// Peak absolute sample value across all channels (linear)
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .map(|ch| slice_peak(ch))
            .fold(0.0_f32, f32::max)
    }

    /// RMS level across all channels (linear)
    pub fn rms(&self) -> f32 {
        let total = self.channels() * self.len();
        if total == 0 {
            return 0.0;
        }
        let sum_squares: f64 = self
            .samples
            .iter()
            .flat_map(|ch| ch.iter())
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        (sum_squares / total as f64).sqrt() as f32
    }

    /// Check if all samples are finite (not NaN or Infinity)
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }

    /// Whether the buffer carries no audible signal
    pub fn is_silent(&self) -> bool {
        self.peak() <= SILENCE_PEAK
    }

    /// Return a copy scaled by a linear gain
    pub fn with_gain(&self, gain: f32) -> AudioBuffer {
        self.map_channels(|ch| ch.iter().map(|s| s * gain).collect())
    }

    /// Return a copy peak-normalized to `target_peak`
    ///
    /// Silent buffers are returned unchanged rather than amplified.
    pub fn normalized(&self, target_peak: f32) -> AudioBuffer {
        let peak = self.peak();
        if peak <= SILENCE_PEAK || !peak.is_finite() {
            return self.clone();
        }
        self.with_gain(target_peak / peak)
    }

    /// Return a copy padded with trailing silence or truncated to `len`
    pub fn resized(&self, len: usize) -> AudioBuffer {
        self.map_channels(|ch| fit_length(ch.to_vec(), len))
    }

    /// Return a copy shifted in time by `offset` samples.
    ///
    /// Positive offsets prepend silence and grow the buffer. Negative offsets
    /// drop the head and pad the tail so the length is unchanged.
    pub fn shifted(&self, offset: isize) -> AudioBuffer {
        if offset >= 0 {
            let offset = offset as usize;
            self.map_channels(|ch| {
                let mut out = vec![0.0; offset];
                out.extend_from_slice(ch);
                out
            })
        } else {
            let skip = offset.unsigned_abs().min(self.len());
            let len = self.len();
            self.map_channels(|ch| fit_length(ch[skip..].to_vec(), len))
        }
    }

    /// Average all channels into a single mono channel
    pub fn to_mono(&self) -> AudioBuffer {
        if self.channels() <= 1 {
            return self.clone();
        }
        let scale = 1.0 / self.channels() as f32;
        let mono = (0..self.len())
            .map(|i| self.samples.iter().map(|ch| ch[i]).sum::<f32>() * scale)
            .collect();
        AudioBuffer::mono(mono, self.sample_rate)
    }

    /// Place the buffer in a stereo field with a constant-power pan law
    ///
    /// `pan` ranges from -1.0 (hard left) to 1.0 (hard right).
    pub fn to_stereo(&self, pan: f32) -> AudioBuffer {
        let mono = self.to_mono();
        let angle = (pan.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
        let (left_gain, right_gain) = (angle.cos(), angle.sin());
        let source = &mono.samples[0];
        AudioBuffer {
            samples: vec![
                source.iter().map(|s| s * left_gain).collect(),
                source.iter().map(|s| s * right_gain).collect(),
            ],
            sample_rate: self.sample_rate,
        }
    }

    /// Concatenate mono buffers end to end
    pub fn concat(parts: &[AudioBuffer], sample_rate: u32) -> AudioBuffer {
        let total = parts.iter().map(|p| p.len()).sum();
        let mut out = Vec::with_capacity(total);
        for part in parts {
            out.extend_from_slice(&part.to_mono().samples[0]);
        }
        AudioBuffer::mono(out, sample_rate)
    }

    /// Sum buffers sample by sample after padding them to the longest length
    ///
    /// The result has as many channels as the widest input; mono inputs
    /// are duplicated into every channel.
    pub fn sum(parts: &[AudioBuffer], sample_rate: u32) -> AudioBuffer {
        let len = parts.iter().map(|p| p.len()).max().unwrap_or(0);
        let channels = parts.iter().map(|p| p.channels()).max().unwrap_or(1).max(1);
        let mut out = vec![vec![0.0_f32; len]; channels];
        for part in parts {
            for (ch, target) in out.iter_mut().enumerate() {
                let source = &part.samples[ch.min(part.channels() - 1)];
                for (t, s) in target.iter_mut().zip(source.iter()) {
                    *t += s;
                }
            }
        }
        AudioBuffer {
            samples: out,
            sample_rate,
        }
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::empty(DEFAULT_SAMPLE_RATE)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(len: usize) -> AudioBuffer {
        AudioBuffer::mono((0..len).map(|i| i as f32 / len as f32).collect(), 1000)
    }

    #[test]
    fn test_new_buffer() {
        let buf = AudioBuffer::new(1000, ChannelLayout::Stereo, 44100);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.len(), 1000);
        assert_eq!(buf.sample_rate, 44100);
    }

    #[test]
    fn test_from_channels_rejects_unequal_lengths() {
        let result = AudioBuffer::from_channels(vec![vec![0.0; 10], vec![0.0; 11]], 48000);
        assert!(result.is_err());
    }

    #[test]
    fn test_interleaved_roundtrip() {
        let data = [0.1, -0.1, 0.2, -0.2];
        let buf = AudioBuffer::from_interleaved(&data, ChannelLayout::Stereo, 48000).unwrap();
        assert_eq!(buf.channel(0), &[0.1, 0.2]);
        assert_eq!(buf.to_interleaved(), data.to_vec());
    }

    #[test]
    fn test_normalized_hits_target_peak() {
        let buf = ramp(100).with_gain(0.25);
        let out = buf.normalized(STEM_PEAK);
        assert_relative_eq!(out.peak(), STEM_PEAK, epsilon = 1e-6);
    }

    #[test]
    fn test_normalized_leaves_silence_alone() {
        let buf = AudioBuffer::new(100, ChannelLayout::Mono, 48000);
        assert_eq!(buf.normalized(STEM_PEAK), buf);
    }

    #[test]
    fn test_shifted_positive_prepends_silence() {
        let out = ramp(10).shifted(3);
        assert_eq!(out.len(), 13);
        assert_eq!(&out.channel(0)[..3], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_shifted_negative_keeps_length() {
        let buf = ramp(10);
        let out = buf.shifted(-4);
        assert_eq!(out.len(), 10);
        assert_eq!(out.channel(0)[0], buf.channel(0)[4]);
        assert_eq!(out.channel(0)[9], 0.0);
    }

    #[test]
    fn test_sum_pads_to_longest() {
        let out = AudioBuffer::sum(&[ramp(10), ramp(20)], 1000);
        assert_eq!(out.len(), 20);
        assert_relative_eq!(out.channel(0)[15], ramp(20).channel(0)[15]);
    }

    #[test]
    fn test_center_pan_is_constant_power() {
        let out = AudioBuffer::mono(vec![1.0; 4], 48000).to_stereo(0.0);
        let power = out.channel(0)[0].powi(2) + out.channel(1)[0].powi(2);
        assert_relative_eq!(power, 1.0, epsilon = 1e-6);
    }
}
