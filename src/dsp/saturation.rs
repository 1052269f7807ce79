//! Saturation Effect
//!
//! `tanh` waveshaping with a one-pole tone control and dry blend. The shaper
//! is normalized so full scale in maps to full scale out and the curve never
//! clips hard, which keeps the added harmonics odd and smooth.

use serde::{Deserialize, Serialize};

use super::effect::{ensure_range, Effect, EffectPosition};
use super::filter::one_pole_lowpass;
use crate::engine::AudioBuffer;
use crate::error::Result;
use crate::{impl_effect_common, validated_params};

// ============================================================================
// Constants
// ============================================================================

/// Extra shaper gain at full drive
const MAX_DRIVE_GAIN: f32 = 24.0;

/// Tone cutoff at `tone = 0`
const MIN_TONE_HZ: f32 = 500.0;

/// Tone cutoff at `tone = 1`
const MAX_TONE_HZ: f32 = 18_000.0;

// ============================================================================
// Parameters
// ============================================================================

/// Saturation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSaturationParams")]
pub struct SaturationParams {
    /// Drive amount (0.0 = gentle, 1.0 = heavy)
    drive: f32,
    /// Brightness of the shaped signal (0.0 = dark, 1.0 = open)
    tone: f32,
    /// Wet/dry mix (0.0 = dry, 1.0 = wet)
    mix: f32,
}

validated_params!(SaturationParams, RawSaturationParams {
    drive: f32,
    tone: f32,
    mix: f32,
});

impl Default for SaturationParams {
    fn default() -> Self {
        Self {
            drive: 0.3,
            tone: 0.7,
            mix: 1.0,
        }
    }
}

impl SaturationParams {
    pub fn new(drive: f32, tone: f32, mix: f32) -> Result<Self> {
        let params = Self { drive, tone, mix };
        params.validate()?;
        Ok(params)
    }

    pub fn drive(&self) -> f32 {
        self.drive
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }

    fn validate(&self) -> Result<()> {
        ensure_range("saturation.drive", self.drive, 0.0, 1.0)?;
        ensure_range("saturation.tone", self.tone, 0.0, 1.0)?;
        ensure_range("saturation.mix", self.mix, 0.0, 1.0)
    }

    /// Tone cutoff, exponential between 500 Hz and 18 kHz
    pub fn tone_cutoff_hz(&self) -> f32 {
        MIN_TONE_HZ * (MAX_TONE_HZ / MIN_TONE_HZ).powf(self.tone)
    }

    /// Waveshaper transfer curve
    #[inline]
    pub fn shape(&self, x: f32) -> f32 {
        let gain = 1.0 + MAX_DRIVE_GAIN * self.drive;
        (gain * x).tanh() / gain.tanh()
    }

    fn process_channel(&self, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        let shaped: Vec<f32> = samples.iter().map(|&x| self.shape(x)).collect();
        let cutoff = self.tone_cutoff_hz().min(sample_rate as f32 * 0.45);
        let toned = one_pole_lowpass(&shaped, cutoff, sample_rate);

        samples
            .iter()
            .zip(toned)
            .map(|(&dry, wet)| dry * (1.0 - self.mix) + wet * self.mix)
            .collect()
    }
}

impl Effect for SaturationParams {
    impl_effect_common!("saturation", EffectPosition::Saturation);

    fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        Ok(buffer.map_channels(|ch| self.process_channel(ch, buffer.sample_rate)))
    }
}

// ============================================================================
// Tests
// ============================================================================
