//! Delay Effect
//!
//! Recursive feedback delay: `y[n] = x[n] + feedback * y[n - D]`. The wet
//! signal is the delayed line output, so a single impulse produces echoes at
//! `D, 2D, 3D, ...` samples with amplitudes `1, fb, fb^2, ...`.

use serde::{Deserialize, Serialize};

use super::effect::{ensure_below, ensure_range, ms_to_samples, Effect, EffectPosition};
use crate::engine::AudioBuffer;
use crate::error::Result;
use crate::{impl_effect_common, validated_params};

/// Delay parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDelayParams")]
pub struct DelayParams {
    /// Delay time in milliseconds (1 to 5000)
    delay_ms: f32,
    /// Feedback amount, 0.0 up to but excluding 1.0
    feedback: f32,
    /// Wet/dry mix (0.0 = dry, 1.0 = wet)
    mix: f32,
}

validated_params!(DelayParams, RawDelayParams {
    delay_ms: f32,
    feedback: f32,
    mix: f32,
});

impl Default for DelayParams {
    fn default() -> Self {
        Self {
            delay_ms: 375.0,
            feedback: 0.35,
            mix: 0.25,
        }
    }
}

impl DelayParams {
    pub fn new(delay_ms: f32, feedback: f32, mix: f32) -> Result<Self> {
        let params = Self {
            delay_ms,
            feedback,
            mix,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn delay_ms(&self) -> f32 {
        self.delay_ms
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    fn validate(&self) -> Result<()> {
        ensure_range("delay.delay_ms", self.delay_ms, 1.0, 5000.0)?;
        // A feedback of 1.0 or more never decays
        ensure_below("delay.feedback", self.feedback, 0.0, 1.0)?;
        ensure_range("delay.mix", self.mix, 0.0, 1.0)
    }

    fn process_channel(&self, samples: &[f32], delay: usize) -> Vec<f32> {
        let mut line = vec![0.0_f32; samples.len()];
        let mut out = Vec::with_capacity(samples.len());
        for (n, &x) in samples.iter().enumerate() {
            let delayed = if n >= delay { line[n - delay] } else { 0.0 };
            line[n] = x + self.feedback * delayed;
            out.push(x * (1.0 - self.mix) + delayed * self.mix);
        }
        out
    }
}

impl Effect for DelayParams {
    impl_effect_common!("delay", EffectPosition::Delay);

    fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        let delay = ms_to_samples(self.delay_ms, buffer.sample_rate).max(1);
        Ok(buffer.map_channels(|ch| self.process_channel(ch, delay)))
    }
}
