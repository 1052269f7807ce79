//! Glitch Effect
//!
//! Cuts the signal into fixed-size chunks and, per chunk, randomly applies a
//! stutter repeat, a tape stop or a bitcrush. Decisions come from a seedable
//! RNG and are shared by every channel so stereo images stay intact.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::effect::{ensure_range, ms_to_samples, Effect, EffectPosition};
use crate::engine::buffer::fit_length;
use crate::engine::AudioBuffer;
use crate::error::{CantorError, Result};
use crate::{impl_effect_common, validated_params};

/// Per-chunk transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlitchMode {
    /// Tile the head of the chunk `repeat_count` times
    Repeat,
    /// Play the chunk with a playback rate falling linearly to zero
    TapeStop,
    /// Quantize and sample-and-hold
    Bitcrush,
}

impl GlitchMode {
    pub const ALL: [GlitchMode; 3] = [GlitchMode::Repeat, GlitchMode::TapeStop, GlitchMode::Bitcrush];
}

/// Glitch parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGlitchParams")]
pub struct GlitchParams {
    /// Chunk length in milliseconds (5 to 2000)
    chunk_ms: f32,
    /// Probability that a chunk is glitched (0 to 1)
    intensity: f32,
    /// Tiles per repeated chunk (2 to 32)
    repeat_count: u32,
    /// Bitcrush resolution in bits (1 to 16)
    bit_depth: u32,
    /// Bitcrush sample-and-hold factor (1 to 64)
    rate_reduction: u32,
    /// Modes chunks are drawn from
    modes: Vec<GlitchMode>,
    /// Fixed seed; entropy is used when absent
    seed: Option<u64>,
}

validated_params!(GlitchParams, RawGlitchParams {
    chunk_ms: f32,
    intensity: f32,
    repeat_count: u32,
    bit_depth: u32,
    rate_reduction: u32,
    modes: Vec<GlitchMode>,
    seed: Option<u64>,
});

impl Default for GlitchParams {
    fn default() -> Self {
        Self {
            chunk_ms: 120.0,
            intensity: 0.3,
            repeat_count: 4,
            bit_depth: 8,
            rate_reduction: 4,
            modes: GlitchMode::ALL.to_vec(),
            seed: None,
        }
    }
}

impl GlitchParams {
    pub fn new(chunk_ms: f32, intensity: f32) -> Result<Self> {
        let params = Self {
            chunk_ms,
            intensity,
            ..Self::default()
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_repeat_count(self, repeat_count: u32) -> Result<Self> {
        let params = Self { repeat_count, ..self };
        params.validate()?;
        Ok(params)
    }

    pub fn with_bitcrush(self, bit_depth: u32, rate_reduction: u32) -> Result<Self> {
        let params = Self {
            bit_depth,
            rate_reduction,
            ..self
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_modes(self, modes: Vec<GlitchMode>) -> Result<Self> {
        let params = Self { modes, ..self };
        params.validate()?;
        Ok(params)
    }

    /// Replace the seed; seeds are not range checked
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self
        }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    fn validate(&self) -> Result<()> {
        ensure_range("glitch.chunk_ms", self.chunk_ms, 5.0, 2000.0)?;
        ensure_range("glitch.intensity", self.intensity, 0.0, 1.0)?;
        if !(2..=32).contains(&self.repeat_count) {
            return Err(CantorError::invalid("glitch.repeat_count", self.repeat_count, "2 to 32"));
        }
        if !(1..=16).contains(&self.bit_depth) {
            return Err(CantorError::invalid("glitch.bit_depth", self.bit_depth, "1 to 16"));
        }
        if !(1..=64).contains(&self.rate_reduction) {
            return Err(CantorError::invalid("glitch.rate_reduction", self.rate_reduction, "1 to 64"));
        }
        if self.modes.is_empty() {
            return Err(CantorError::invalid("glitch.modes", "[]", "at least one mode"));
        }
        Ok(())
    }

    /// Apply with an injected RNG
    pub fn apply_with_rng<R: Rng>(&self, buffer: &AudioBuffer, rng: &mut R) -> AudioBuffer {
        if buffer.is_empty() {
            return buffer.clone();
        }
        let chunk = ms_to_samples(self.chunk_ms, buffer.sample_rate).max(1);
        let num_chunks = buffer.len().div_ceil(chunk);

        // One decision per chunk, drawn before touching any channel
        let plan: Vec<Option<GlitchMode>> = (0..num_chunks)
            .map(|_| {
                if rng.gen::<f32>() < self.intensity {
                    Some(self.modes[rng.gen_range(0..self.modes.len())])
                } else {
                    None
                }
            })
            .collect();
        debug!(
            chunks = num_chunks,
            glitched = plan.iter().filter(|p| p.is_some()).count(),
            "glitch"
        );

        buffer.map_channels(|ch| {
            ch.chunks(chunk)
                .zip(&plan)
                .flat_map(|(piece, mode)| match mode {
                    Some(mode) => self.transform(piece, *mode),
                    None => piece.to_vec(),
                })
                .collect()
        })
    }

    fn transform(&self, chunk: &[f32], mode: GlitchMode) -> Vec<f32> {
        let len = chunk.len();
        let out = match mode {
            GlitchMode::Repeat => {
                let seg = (len / self.repeat_count as usize).max(1);
                chunk[..seg].iter().copied().cycle().take(len).collect()
            }
            GlitchMode::TapeStop => {
                let mut position = 0.0_f64;
                (0..len)
                    .map(|i| {
                        let idx = position.floor() as usize;
                        let frac = (position - idx as f64) as f32;
                        let a = chunk[idx.min(len - 1)];
                        let b = chunk[(idx + 1).min(len - 1)];
                        position += 1.0 - i as f64 / len as f64;
                        a * (1.0 - frac) + b * frac
                    })
                    .collect()
            }
            GlitchMode::Bitcrush => {
                // 2^bits levels spread evenly over -1..=1, endpoints included
                let steps = ((1_u32 << self.bit_depth) - 1) as f32;
                let hold = self.rate_reduction as usize;
                (0..len)
                    .map(|i| {
                        let held = chunk[i - i % hold].clamp(-1.0, 1.0);
                        let level = ((held + 1.0) * 0.5 * steps).round();
                        level / steps * 2.0 - 1.0
                    })
                    .collect()
            }
        };
        fit_length(out, len)
    }
}

impl Effect for GlitchParams {
    impl_effect_common!("glitch", EffectPosition::Glitch);

    fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        let mut rng = match self.seed {
            Some(seed) => Pcg64::seed_from_u64(seed),
            None => Pcg64::from_entropy(),
        };
        Ok(self.apply_with_rng(buffer, &mut rng))
    }
}
