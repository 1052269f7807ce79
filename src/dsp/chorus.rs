//! Chorus Effect
//!
//! Several modulated delay lines spread around a base delay. Each voice has
//! its own LFO phase and feedback path; the voices are summed and scaled by
//! `1 / sqrt(voices)`, so adding voices thickens the sound without the level
//! growing linearly.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use super::effect::{ensure_below, ensure_range, Effect, EffectPosition};
use crate::engine::AudioBuffer;
use crate::error::{CantorError, Result};
use crate::{impl_effect_common, validated_params};

/// Shortest modulated delay any voice may reach
const MIN_VOICE_DELAY_MS: f32 = 0.5;

/// Chorus parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawChorusParams")]
pub struct ChorusParams {
    /// Number of voices (1 to 16)
    voices: u32,
    /// Center delay in milliseconds (1 to 50)
    base_delay_ms: f32,
    /// Total spread of the voice delays in milliseconds (0 to 20)
    spread_ms: f32,
    /// LFO rate in Hz (0 to 10)
    lfo_rate_hz: f32,
    /// LFO depth in milliseconds (0 to 10)
    lfo_depth_ms: f32,
    /// Per-voice feedback, 0.0 up to but excluding 1.0
    feedback: f32,
    mix: f32,
}

validated_params!(ChorusParams, RawChorusParams {
    voices: u32,
    base_delay_ms: f32,
    spread_ms: f32,
    lfo_rate_hz: f32,
    lfo_depth_ms: f32,
    feedback: f32,
    mix: f32,
});

impl Default for ChorusParams {
    fn default() -> Self {
        Self {
            voices: 3,
            base_delay_ms: 20.0,
            spread_ms: 8.0,
            lfo_rate_hz: 0.8,
            lfo_depth_ms: 3.0,
            feedback: 0.2,
            mix: 0.5,
        }
    }
}

impl ChorusParams {
    pub fn new(voices: u32, base_delay_ms: f32, lfo_rate_hz: f32, lfo_depth_ms: f32, mix: f32) -> Result<Self> {
        let params = Self {
            voices,
            base_delay_ms,
            lfo_rate_hz,
            lfo_depth_ms,
            mix,
            ..Self::default()
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_spread(self, spread_ms: f32) -> Result<Self> {
        let params = Self { spread_ms, ..self };
        params.validate()?;
        Ok(params)
    }

    pub fn with_feedback(self, feedback: f32) -> Result<Self> {
        let params = Self { feedback, ..self };
        params.validate()?;
        Ok(params)
    }

    pub fn voices(&self) -> u32 {
        self.voices
    }

    fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.voices) {
            return Err(CantorError::invalid("chorus.voices", self.voices, "1 to 16"));
        }
        ensure_range("chorus.base_delay_ms", self.base_delay_ms, 1.0, 50.0)?;
        ensure_range("chorus.spread_ms", self.spread_ms, 0.0, 20.0)?;
        ensure_range("chorus.lfo_rate_hz", self.lfo_rate_hz, 0.0, 10.0)?;
        ensure_range("chorus.lfo_depth_ms", self.lfo_depth_ms, 0.0, 10.0)?;
        ensure_below("chorus.feedback", self.feedback, 0.0, 1.0)?;
        ensure_range("chorus.mix", self.mix, 0.0, 1.0)?;

        let shortest = self.base_delay_ms - self.spread_ms / 2.0 - self.lfo_depth_ms;
        if shortest < MIN_VOICE_DELAY_MS {
            return Err(CantorError::invalid(
                "chorus.base_delay_ms",
                self.base_delay_ms,
                "at least spread_ms / 2 + lfo_depth_ms + 0.5",
            ));
        }
        Ok(())
    }

    /// Center delay of voice `v` in milliseconds
    fn voice_delay_ms(&self, v: u32) -> f32 {
        if self.voices == 1 {
            return self.base_delay_ms;
        }
        let position = v as f32 / (self.voices - 1) as f32 - 0.5;
        self.base_delay_ms + self.spread_ms * position
    }

    fn process_channel(&self, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        let len = samples.len();
        let ms = sample_rate as f32 / 1000.0;
        let mut wet = vec![0.0_f32; len];
        let mut line = vec![0.0_f32; len];

        for v in 0..self.voices {
            let center = self.voice_delay_ms(v) * ms;
            let depth = self.lfo_depth_ms * ms;
            let phase = 2.0 * PI * v as f32 / self.voices as f32;
            let omega = 2.0 * PI * self.lfo_rate_hz / sample_rate as f32;

            for n in 0..len {
                let delay = (center + depth * (omega * n as f32 + phase).sin()).max(1.0);
                let read = n as f32 - delay;
                let tapped = if read < 0.0 {
                    0.0
                } else {
                    let idx = read.floor() as usize;
                    let frac = read - idx as f32;
                    let next = if idx + 1 < n { line[idx + 1] } else { 0.0 };
                    line[idx] * (1.0 - frac) + next * frac
                };
                line[n] = samples[n] + self.feedback * tapped;
                wet[n] += tapped;
            }
        }

        let scale = 1.0 / (self.voices as f32).sqrt();
        samples
            .iter()
            .zip(wet)
            .map(|(&dry, w)| dry * (1.0 - self.mix) + w * scale * self.mix)
            .collect()
    }
}

impl Effect for ChorusParams {
    impl_effect_common!("chorus", EffectPosition::Chorus);

    fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        Ok(buffer.map_channels(|ch| self.process_channel(ch, buffer.sample_rate)))
    }
}
