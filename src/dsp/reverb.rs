//! Reverb effect
//!
//! Implements the Freeverb algorithm:
//! - 8 parallel damped comb filters
//! - 4 series allpass filters for diffusion
//! - Stereo spread on the right channel tank
//! - Pre-delay as leading silence on the wet path
//!
//! Comb feedback follows the decay time (RT60) rather than a room-size knob,
//! and the output grows by the pre-delay plus a decay tail.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::effect::{ensure_range, ms_to_samples, Effect, EffectPosition};
use crate::engine::AudioBuffer;
use crate::error::Result;
use crate::{impl_effect_common, validated_params};

// ============================================================================
// Freeverb Constants
// ============================================================================

/// Reference sample rate for Freeverb delays
const REFERENCE_SAMPLE_RATE: f64 = 44100.0;

/// Comb filter delays at 44100 Hz (8 filters)
const COMB_DELAYS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];

/// Allpass filter delays at 44100 Hz (4 filters)
const ALLPASS_DELAYS: [usize; 4] = [556, 441, 341, 225];

/// Stereo spread offset in samples (for right channel)
const STEREO_SPREAD: usize = 23;

/// Input attenuation into the comb bank
const FIXED_GAIN: f32 = 0.015;

/// Wet output scale
const WET_SCALE: f32 = 3.0;

/// Scale factor for damping parameter
const DAMP_SCALE: f32 = 0.4;

/// Longest tail appended to the output
const MAX_TAIL_SECS: f32 = 10.0;

// ============================================================================
// Parameters
// ============================================================================

/// Reverb effect parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawReverbParams")]
pub struct ReverbParams {
    /// Time for the tail to fall by 60 dB, in seconds (0.1 to 20)
    decay_secs: f32,
    /// Wet/dry mix (0.0 = dry, 1.0 = wet)
    mix: f32,
    /// Allpass diffusion: 0 (grainy) to 1 (smooth)
    diffusion: f32,
    /// Damping: 0 (bright) to 1 (dark)
    damping: f32,
    /// Pre-delay in milliseconds (0 to 500)
    pre_delay_ms: f32,
    /// Stereo width: 0 (mono) to 1 (full stereo)
    stereo_width: f32,
}

validated_params!(ReverbParams, RawReverbParams {
    decay_secs: f32,
    mix: f32,
    diffusion: f32,
    damping: f32,
    pre_delay_ms: f32,
    stereo_width: f32,
});

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            decay_secs: 2.5,
            mix: 0.3,
            diffusion: 0.6,
            damping: 0.5,
            pre_delay_ms: 20.0,
            stereo_width: 1.0,
        }
    }
}

impl ReverbParams {
    pub fn new(decay_secs: f32, mix: f32) -> Result<Self> {
        let params = Self {
            decay_secs,
            mix,
            ..Self::default()
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_pre_delay(self, pre_delay_ms: f32) -> Result<Self> {
        let params = Self { pre_delay_ms, ..self };
        params.validate()?;
        Ok(params)
    }

    pub fn with_character(self, diffusion: f32, damping: f32, stereo_width: f32) -> Result<Self> {
        let params = Self {
            diffusion,
            damping,
            stereo_width,
            ..self
        };
        params.validate()?;
        Ok(params)
    }

    pub fn decay_secs(&self) -> f32 {
        self.decay_secs
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }

    fn validate(&self) -> Result<()> {
        ensure_range("reverb.decay_secs", self.decay_secs, 0.1, 20.0)?;
        ensure_range("reverb.mix", self.mix, 0.0, 1.0)?;
        ensure_range("reverb.diffusion", self.diffusion, 0.0, 1.0)?;
        ensure_range("reverb.damping", self.damping, 0.0, 1.0)?;
        ensure_range("reverb.pre_delay_ms", self.pre_delay_ms, 0.0, 500.0)?;
        ensure_range("reverb.stereo_width", self.stereo_width, 0.0, 1.0)
    }

    /// Samples appended after the input for the decay tail
    pub fn tail_samples(&self, sample_rate: u32) -> usize {
        (self.decay_secs.min(MAX_TAIL_SECS) as f64 * sample_rate as f64).round() as usize
    }

    /// Output length for an input of `len` samples
    pub fn output_len(&self, len: usize, sample_rate: u32) -> usize {
        len + ms_to_samples(self.pre_delay_ms, sample_rate) + self.tail_samples(sample_rate)
    }

    fn allpass_gain(&self) -> f32 {
        0.2 + 0.5 * self.diffusion
    }
}

// ============================================================================
// Filter Components
// ============================================================================

/// Low-pass feedback comb filter
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    filter_state: f32,
    feedback: f32,
    damp: f32,
}

impl CombFilter {
    fn new(delay: usize, feedback: f32, damp: f32) -> Self {
        Self {
            buffer: vec![0.0; delay.max(1)],
            pos: 0,
            filter_state: 0.0,
            feedback,
            damp,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.filter_state = output * (1.0 - self.damp) + self.filter_state * self.damp;
        self.buffer[self.pos] = input + self.filter_state * self.feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

/// Schroeder allpass section
#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
    gain: f32,
}

impl AllpassFilter {
    fn new(delay: usize, gain: f32) -> Self {
        Self {
            buffer: vec![0.0; delay.max(1)],
            pos: 0,
            gain,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let output = delayed - self.gain * input;
        self.buffer[self.pos] = input + self.gain * output;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

/// One channel's comb bank and allpass chain
struct Tank {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

impl Tank {
    fn new(params: &ReverbParams, sample_rate: u32, spread: usize) -> Self {
        let scale = sample_rate as f64 / REFERENCE_SAMPLE_RATE;
        let damp = params.damping * DAMP_SCALE;
        let combs = COMB_DELAYS
            .iter()
            .map(|&d| {
                let delay = (((d + spread) as f64) * scale).round() as usize;
                let delay_secs = delay as f32 / sample_rate as f32;
                // RT60: the loop gain reaches -60 dB after decay_secs
                let feedback = 10.0_f32.powf(-3.0 * delay_secs / params.decay_secs);
                CombFilter::new(delay, feedback, damp)
            })
            .collect();
        let allpasses = ALLPASS_DELAYS
            .iter()
            .map(|&d| {
                let delay = (((d + spread) as f64) * scale).round() as usize;
                AllpassFilter::new(delay, params.allpass_gain())
            })
            .collect();
        Self { combs, allpasses }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let mut sum = 0.0;
        for comb in self.combs.iter_mut() {
            sum += comb.process(input);
        }
        self.allpasses.iter_mut().fold(sum, |acc, ap| ap.process(acc))
    }

    fn render(&mut self, input: &[f32]) -> Vec<f32> {
        input.iter().map(|&x| self.process(x * FIXED_GAIN) * WET_SCALE).collect()
    }
}

// ============================================================================
// Effect
// ============================================================================

impl Effect for ReverbParams {
    impl_effect_common!("reverb", EffectPosition::Reverb);

    fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        if buffer.is_empty() {
            return Ok(buffer.clone());
        }
        let sr = buffer.sample_rate;
        let pre_delay = ms_to_samples(self.pre_delay_ms, sr);
        let out_len = self.output_len(buffer.len(), sr);
        debug!(
            samples = buffer.len(),
            out_len,
            decay = self.decay_secs,
            "reverb"
        );

        // Tanks are fed the channel-summed signal, offset by the pre-delay
        let mono = buffer.to_mono();
        let mut wet_input = vec![0.0_f32; out_len];
        wet_input[pre_delay..pre_delay + buffer.len()].copy_from_slice(mono.channel(0));

        let dry_gain = 1.0 - self.mix;
        let mix_dry = |dry: &[f32], wet: &[f32]| -> Vec<f32> {
            (0..out_len)
                .map(|i| dry.get(i).copied().unwrap_or(0.0) * dry_gain + wet[i] * self.mix)
                .collect()
        };

        let left_wet = Tank::new(self, sr, 0).render(&wet_input);
        if buffer.channels() == 1 {
            return Ok(AudioBuffer::mono(mix_dry(buffer.channel(0), &left_wet), sr));
        }

        let right_wet = Tank::new(self, sr, STEREO_SPREAD).render(&wet_input);
        let wet1 = 0.5 * (1.0 + self.stereo_width);
        let wet2 = 0.5 * (1.0 - self.stereo_width);
        let left: Vec<f32> = (0..out_len)
            .map(|i| left_wet[i] * wet1 + right_wet[i] * wet2)
            .collect();
        let right: Vec<f32> = (0..out_len)
            .map(|i| right_wet[i] * wet1 + left_wet[i] * wet2)
            .collect();

        AudioBuffer::from_channels(
            vec![
                mix_dry(buffer.channel(0), &left),
                mix_dry(buffer.channel(1), &right),
            ],
            sr,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
