//! Timbre blends
//!
//! Fixed filter-and-mix recipes that color a voice:
//! - Choir: a wide chorus with a presence lift
//! - Android: resonant lowpass and a nasal band, mixed
//! - Machinery: driven, honking and thinned

use serde::{Deserialize, Serialize};

use crate::dsp::{ensure_range, ChorusParams, Effect, FilterParams, SaturationParams};
use crate::engine::AudioBuffer;
use crate::error::Result;
use crate::validated_params;

/// Named coloration recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimbreKind {
    #[default]
    Choir,
    Android,
    Machinery,
}

/// Timbre blend parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTimbreParams")]
pub struct TimbreParams {
    kind: TimbreKind,
    /// How much of the colored signal replaces the input (0.0 to 1.0)
    amount: f32,
}

validated_params!(TimbreParams, RawTimbreParams {
    kind: TimbreKind,
    amount: f32,
});

impl Default for TimbreParams {
    fn default() -> Self {
        Self {
            kind: TimbreKind::Choir,
            amount: 0.6,
        }
    }
}

impl TimbreParams {
    pub fn new(kind: TimbreKind, amount: f32) -> Result<Self> {
        let params = Self { kind, amount };
        params.validate()?;
        Ok(params)
    }

    pub fn kind(&self) -> TimbreKind {
        self.kind
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    fn validate(&self) -> Result<()> {
        ensure_range("timbre.amount", self.amount, 0.0, 1.0)
    }

    /// The colored signal before blending
    fn color(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        match self.kind {
            TimbreKind::Choir => {
                let chorus = ChorusParams::new(6, 18.0, 0.35, 4.0, 1.0)?.with_spread(10.0)?;
                let presence = FilterParams::peaking(3000.0, 0.9, 4.0)?;
                presence.apply(&chorus.apply(buffer)?)
            }
            TimbreKind::Android => {
                let resonant = FilterParams::resonant_low_pass(2600.0, 6.0)?.apply(buffer)?;
                let nasal = FilterParams::band_pass(1400.0, 3.0)?.apply(buffer)?;
                Ok(AudioBuffer::sum(
                    &[resonant.with_gain(0.6), nasal.with_gain(0.8)],
                    buffer.sample_rate,
                ))
            }
            TimbreKind::Machinery => {
                // Thin after driving, or the shaper regrows the fundamental
                let driven = SaturationParams::new(0.6, 0.9, 1.0)?.apply(buffer)?;
                let honk = FilterParams::peaking(1800.0, 1.5, 6.0)?.apply(&driven)?;
                FilterParams::high_pass(700.0, 0.7)?.apply(&honk)
            }
        }
    }

    /// Blend the recipe into `buffer`, keeping its peak level
    pub fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        if buffer.is_empty() || self.amount == 0.0 {
            return Ok(buffer.clone());
        }
        let colored = self.color(buffer)?.normalized(buffer.peak());
        let dry = 1.0 - self.amount;
        let mut out = buffer.clone();
        for (o, c) in out.samples.iter_mut().zip(&colored.samples) {
            for (s, w) in o.iter_mut().zip(c) {
                *s = *s * dry + w * self.amount;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::analysis::{band_energy, spectral_centroid};
    use crate::engine::generate_test_tone;
    use test_case::test_case;

    fn buzz() -> AudioBuffer {
        // Saw at 150 Hz
        let samples = (0..24000)
            .map(|i| 2.0 * ((i as f32 * 150.0 / 24000.0).fract()) - 1.0)
            .map(|s| s * 0.5)
            .collect();
        AudioBuffer::mono(samples, 24000)
    }

    #[test_case(TimbreKind::Choir)]
    #[test_case(TimbreKind::Android)]
    #[test_case(TimbreKind::Machinery)]
    fn test_recipe_changes_color(kind: TimbreKind) {
        let input = buzz();
        let out = TimbreParams::new(kind, 1.0).unwrap().apply(&input).unwrap();
        assert_eq!(out.len(), input.len());
        assert!(out.is_finite());
        assert_ne!(out, input);
        assert!((out.peak() - input.peak()).abs() < 0.05);
    }

    #[test]
    fn test_zero_amount_is_identity() {
        let input = generate_test_tone(220.0, 0.2, 24000);
        let out = TimbreParams::new(TimbreKind::Android, 0.0).unwrap().apply(&input).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_machinery_removes_low_end() {
        let input = buzz();
        let out = TimbreParams::new(TimbreKind::Machinery, 1.0).unwrap().apply(&input).unwrap();
        let before = spectral_centroid(input.channel(0), 24000);
        let after = spectral_centroid(out.channel(0), 24000);
        assert!(after > before * 1.1, "centroid {} -> {}", before, after);
        let fundamental = |b: &AudioBuffer| band_energy(b.channel(0), 24000, 100.0, 200.0);
        assert!(fundamental(&out) < fundamental(&input) * 0.1);
    }

    #[test]
    fn test_amount_validated() {
        assert!(TimbreParams::new(TimbreKind::Choir, 1.5).is_err());
        let parsed: TimbreParams = serde_json::from_str(r#"{"kind": "machinery"}"#).unwrap();
        assert_eq!(parsed.kind(), TimbreKind::Machinery);
        assert_eq!(parsed.amount(), 0.6);
    }

    #[test]
    fn test_empty_input() {
        let out = TimbreParams::default().apply(&AudioBuffer::empty(24000)).unwrap();
        assert!(out.is_empty());
    }
}
