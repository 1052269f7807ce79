//! Vocal layering
//!
//! Extra takes of a phrase get a random pitch and timing offset. Every
//! layer draws from its own `Pcg64` seeded from the render seed and the
//! layer index, so the result does not depend on the order layers are
//! rendered in.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::Serialize;

use crate::dsp::ms_to_samples;
use crate::dsp::pitch::pitch_shift;
use crate::engine::AudioBuffer;

/// Seed of an independent random stream derived from the render seed
pub fn derive_seed(seed: u64, stream: u64) -> u64 {
    // splitmix64 finalizer
    let mut z = seed ^ stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Offsets applied to one vocal layer
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LayerVariation {
    pub pitch_semitones: f32,
    pub timing_ms: f32,
}

impl LayerVariation {
    /// Draw the variation of layer `index`; layer 0 is never varied
    pub fn draw(seed: u64, index: usize, pitch_range: f32, timing_range_ms: f32) -> Self {
        if index == 0 {
            return Self::default();
        }
        let mut rng = Pcg64::seed_from_u64(derive_seed(seed, index as u64));
        let pitch_semitones = if pitch_range > 0.0 {
            rng.gen_range(-pitch_range..=pitch_range)
        } else {
            0.0
        };
        let timing_ms = if timing_range_ms > 0.0 {
            rng.gen_range(-timing_range_ms..=timing_range_ms)
        } else {
            0.0
        };
        Self {
            pitch_semitones,
            timing_ms,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.pitch_semitones == 0.0 && self.timing_ms == 0.0
    }

    /// Offset in samples; negative values move the layer earlier
    pub fn offset_samples(&self, sample_rate: u32) -> isize {
        let magnitude = ms_to_samples(self.timing_ms.abs(), sample_rate) as isize;
        if self.timing_ms < 0.0 {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Pitch shift then time shift a take
    pub fn apply(&self, take: &AudioBuffer) -> AudioBuffer {
        if self.is_identity() {
            return take.clone();
        }
        let shifted = if self.pitch_semitones != 0.0 {
            take.map_channels(|ch| pitch_shift(ch, self.pitch_semitones))
        } else {
            take.clone()
        };
        shifted.shifted(self.offset_samples(take.sample_rate))
    }
}

/// Sum takes after padding each to the longest
pub fn stack_layers(layers: &[AudioBuffer], sample_rate: u32) -> AudioBuffer {
    AudioBuffer::sum(layers, sample_rate)
}
