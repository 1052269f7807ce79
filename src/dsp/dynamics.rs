//! Master dynamics: compressor followed by a brickwall limiter
//!
//! Both detectors are linked across channels so the stereo image never
//! shifts. The limiter has instant attack and ends with a hard ceiling, so
//! no output sample exceeds its threshold.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::effect::{ensure_range, Effect, EffectPosition};
use crate::engine::{db_to_linear, linear_to_db, AudioBuffer};
use crate::error::Result;
use crate::{impl_effect_common, validated_params};

/// Convert time in ms to a one-pole smoothing coefficient
#[inline]
fn time_to_coeff(time_ms: f32, sample_rate: u32) -> f32 {
    if time_ms <= 0.0 {
        return 0.0;
    }
    (-1.0 / (time_ms * 0.001 * sample_rate as f32)).exp()
}

/// Per-frame peak across channels
fn linked_peaks(buffer: &AudioBuffer) -> Vec<f32> {
    (0..buffer.len())
        .map(|i| {
            buffer
                .samples
                .iter()
                .map(|ch| ch[i].abs())
                .fold(0.0_f32, f32::max)
        })
        .collect()
}

fn apply_gains(buffer: &AudioBuffer, gains: &[f32]) -> AudioBuffer {
    buffer.map_channels(|ch| ch.iter().zip(gains).map(|(s, g)| s * g).collect())
}

// ============================================================================
// Compressor
// ============================================================================

/// Feed-forward peak compressor parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCompressorParams")]
pub struct CompressorParams {
    /// Threshold in dB (-60 to 0)
    threshold_db: f32,
    /// Compression ratio (1 to 20)
    ratio: f32,
    /// Attack time in ms (0.1 to 200)
    attack_ms: f32,
    /// Release time in ms (1 to 2000)
    release_ms: f32,
    /// Makeup gain in dB (0 to 24)
    makeup_db: f32,
}

validated_params!(CompressorParams, RawCompressorParams {
    threshold_db: f32,
    ratio: f32,
    attack_ms: f32,
    release_ms: f32,
    makeup_db: f32,
});

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            threshold_db: -18.0,
            ratio: 3.0,
            attack_ms: 10.0,
            release_ms: 150.0,
            makeup_db: 0.0,
        }
    }
}

impl CompressorParams {
    pub fn new(threshold_db: f32, ratio: f32, attack_ms: f32, release_ms: f32) -> Result<Self> {
        let params = Self {
            threshold_db,
            ratio,
            attack_ms,
            release_ms,
            makeup_db: 0.0,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_makeup(self, makeup_db: f32) -> Result<Self> {
        let params = Self { makeup_db, ..self };
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        ensure_range("compressor.threshold_db", self.threshold_db, -60.0, 0.0)?;
        ensure_range("compressor.ratio", self.ratio, 1.0, 20.0)?;
        ensure_range("compressor.attack_ms", self.attack_ms, 0.1, 200.0)?;
        ensure_range("compressor.release_ms", self.release_ms, 1.0, 2000.0)?;
        ensure_range("compressor.makeup_db", self.makeup_db, 0.0, 24.0)
    }

    /// Static gain reduction in dB for a detector level in dB
    pub fn gain_reduction_db(&self, level_db: f32) -> f32 {
        let over = level_db - self.threshold_db;
        if over <= 0.0 {
            0.0
        } else {
            over * (1.0 - 1.0 / self.ratio)
        }
    }
}

impl Effect for CompressorParams {
    impl_effect_common!("compressor", EffectPosition::Master);

    fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        let attack = time_to_coeff(self.attack_ms, buffer.sample_rate);
        let release = time_to_coeff(self.release_ms, buffer.sample_rate);
        let makeup = self.makeup_db;

        let mut envelope = 0.0_f32;
        let gains: Vec<f32> = linked_peaks(buffer)
            .into_iter()
            .map(|peak| {
                let coeff = if peak > envelope { attack } else { release };
                envelope = coeff * envelope + (1.0 - coeff) * peak;
                let reduction = self.gain_reduction_db(linear_to_db(envelope));
                db_to_linear(makeup - reduction)
            })
            .collect();

        Ok(apply_gains(buffer, &gains))
    }
}

// ============================================================================
// Limiter
// ============================================================================

/// Brickwall limiter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLimiterParams")]
pub struct LimiterParams {
    /// Ceiling as linear amplitude (0.01 to 1.0)
    threshold: f32,
    /// Release time in ms (1 to 1000)
    release_ms: f32,
}

validated_params!(LimiterParams, RawLimiterParams {
    threshold: f32,
    release_ms: f32,
});

impl Default for LimiterParams {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            release_ms: 50.0,
        }
    }
}

impl LimiterParams {
    pub fn new(threshold: f32, release_ms: f32) -> Result<Self> {
        let params = Self {
            threshold,
            release_ms,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn validate(&self) -> Result<()> {
        ensure_range("limiter.threshold", self.threshold, 0.01, 1.0)?;
        ensure_range("limiter.release_ms", self.release_ms, 1.0, 1000.0)
    }
}

impl Effect for LimiterParams {
    impl_effect_common!("limiter", EffectPosition::Master);

    fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        let release = time_to_coeff(self.release_ms, buffer.sample_rate);
        let ceiling = self.threshold;

        let mut gain = 1.0_f32;
        let gains: Vec<f32> = linked_peaks(buffer)
            .into_iter()
            .map(|peak| {
                let required = if peak > ceiling { ceiling / peak } else { 1.0 };
                let recovered = release * gain + (1.0 - release);
                gain = recovered.min(required);
                gain
            })
            .collect();

        let limited = apply_gains(buffer, &gains);
        // Hard ceiling catches float rounding in the gain path
        Ok(limited.map_channels(|ch| ch.iter().map(|s| s.clamp(-ceiling, ceiling)).collect()))
    }
}

// ============================================================================
// Master chain
// ============================================================================

/// Optional compressor then optional limiter, run once on the summed mix
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MasterDynamicsParams {
    #[serde(default)]
    pub compressor: Option<CompressorParams>,
    #[serde(default)]
    pub limiter: Option<LimiterParams>,
}

impl MasterDynamicsParams {
    pub fn is_bypassed(&self) -> bool {
        self.compressor.is_none() && self.limiter.is_none()
    }
}

impl Effect for MasterDynamicsParams {
    impl_effect_common!("master_dynamics", EffectPosition::Master);

    fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        let mut out = match &self.compressor {
            Some(compressor) => compressor.apply(buffer)?,
            None => buffer.clone(),
        };
        if let Some(limiter) = &self.limiter {
            out = limiter.apply(&out)?;
        }
        debug!(peak = out.peak(), "master dynamics");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::generate_test_tone;
    use approx::assert_relative_eq;
    use test_case::test_case;

    #[test_case(0.5 ; "half scale")]
    #[test_case(0.1 ; "deep limiting")]
    #[test_case(1.0 ; "full scale")]
    fn test_limiter_never_exceeds_threshold(threshold: f32) {
        let loud = generate_test_tone(220.0, 0.2, 48000).with_gain(3.0);
        let out = LimiterParams::new(threshold, 50.0).unwrap().apply(&loud).unwrap();
        assert!(out.peak() <= threshold, "peak {} > {}", out.peak(), threshold);
    }

    #[test]
    fn test_limiter_passes_quiet_signal() {
        let quiet = generate_test_tone(220.0, 0.1, 48000).with_gain(0.2);
        let out = LimiterParams::new(0.9, 50.0).unwrap().apply(&quiet).unwrap();
        for (a, b) in quiet.channel(0).iter().zip(out.channel(0)) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_compressor_static_curve() {
        let params = CompressorParams::new(-20.0, 4.0, 1.0, 100.0).unwrap();
        assert_eq!(params.gain_reduction_db(-30.0), 0.0);
        assert_relative_eq!(params.gain_reduction_db(-12.0), 6.0);
    }

    #[test]
    fn test_compressor_reduces_loud_signal() {
        let loud = generate_test_tone(220.0, 0.5, 48000).with_gain(0.9);
        let out = CompressorParams::new(-20.0, 8.0, 1.0, 100.0)
            .unwrap()
            .apply(&loud)
            .unwrap();
        assert!(out.rms() < loud.rms() * 0.5);
    }

    #[test]
    fn test_stereo_link_keeps_balance() {
        let stereo = generate_test_tone(220.0, 0.2, 48000).with_gain(2.0).to_stereo(-0.5);
        let out = LimiterParams::new(0.5, 20.0).unwrap().apply(&stereo).unwrap();
        let ratio_in = stereo.channel(1)[100] / stereo.channel(0)[100];
        let ratio_out = out.channel(1)[100] / out.channel(0)[100];
        assert_relative_eq!(ratio_in, ratio_out, epsilon = 1e-4);
    }

    #[test]
    fn test_master_chain_from_json() {
        let params: MasterDynamicsParams =
            serde_json::from_str(r#"{"limiter": {"threshold": 0.8}}"#).unwrap();
        assert!(params.compressor.is_none());
        assert_eq!(params.limiter.as_ref().unwrap().threshold(), 0.8);
        assert!(serde_json::from_str::<MasterDynamicsParams>(r#"{"limiter": {"threshold": 2.0}}"#).is_err());
    }

    #[test]
    fn test_empty_input() {
        let params = MasterDynamicsParams {
            compressor: Some(CompressorParams::default()),
            limiter: Some(LimiterParams::default()),
        };
        assert!(params.apply(&AudioBuffer::empty(48000)).unwrap().is_empty());
    }
}
