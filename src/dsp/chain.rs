//! Effect chain management
//!
//! The render order is held as data in [`STAGE_ORDER`]:
//! 1. Generation (speech synthesis or ambient generator)
//! 2. Per-stem normalization
//! 3. Filters, then glitch
//! 4. Saturation
//! 5. Chorus
//! 6. Delay
//! 7. Atmosphere (vocals only): spectral freeze, then reverb
//! 8. Level and pan
//! 9. Sum of all stems
//! 10. Master dynamics (once, on the mix)
//! 11. Final normalization
//!
//! A stem's chain holds only the effects its config enables. A stage that
//! fails or produces unusable audio is bypassed and recorded rather than
//! aborting the render.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::chorus::ChorusParams;
use super::delay::DelayParams;
use super::effect::{Effect, EffectPosition};
use super::filter::FilterParams;
use super::glitch::GlitchParams;
use super::reverb::ReverbParams;
use super::saturation::SaturationParams;
use super::spectral::SpectralFreezeParams;
use crate::engine::AudioBuffer;
use crate::error::{Result, StageDegradation};

/// One step of the render pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generation,
    Normalize,
    Filter,
    Glitch,
    Saturation,
    Chorus,
    Delay,
    SpectralFreeze,
    Reverb,
    LevelPan,
    Sum,
    MasterDynamics,
    FinalNormalize,
}

/// Fixed processing order of a render
pub const STAGE_ORDER: [Stage; 13] = [
    Stage::Generation,
    Stage::Normalize,
    Stage::Filter,
    Stage::Glitch,
    Stage::Saturation,
    Stage::Chorus,
    Stage::Delay,
    Stage::SpectralFreeze,
    Stage::Reverb,
    Stage::LevelPan,
    Stage::Sum,
    Stage::MasterDynamics,
    Stage::FinalNormalize,
];

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Generation => "generation",
            Stage::Normalize => "normalize",
            Stage::Filter => "filter",
            Stage::Glitch => "glitch",
            Stage::Saturation => "saturation",
            Stage::Chorus => "chorus",
            Stage::Delay => "delay",
            Stage::SpectralFreeze => "spectral_freeze",
            Stage::Reverb => "reverb",
            Stage::LevelPan => "level_pan",
            Stage::Sum => "sum",
            Stage::MasterDynamics => "master_dynamics",
            Stage::FinalNormalize => "final_normalize",
        }
    }

    /// Effect slot that implements this stage, if it is a per-stem effect
    pub fn effect_position(&self) -> Option<EffectPosition> {
        match self {
            Stage::Filter => Some(EffectPosition::Filter),
            Stage::Glitch => Some(EffectPosition::Glitch),
            Stage::Saturation => Some(EffectPosition::Saturation),
            Stage::Chorus => Some(EffectPosition::Chorus),
            Stage::Delay => Some(EffectPosition::Delay),
            Stage::SpectralFreeze => Some(EffectPosition::SpectralFreeze),
            Stage::Reverb => Some(EffectPosition::Reverb),
            _ => None,
        }
    }

    /// Spectral freeze and reverb only run on the vocal stem
    pub fn is_atmosphere(&self) -> bool {
        matches!(self, Stage::SpectralFreeze | Stage::Reverb)
    }
}

/// Per-stem effect blocks; an absent block disables its effect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StemEffects {
    #[serde(default)]
    pub filters: Vec<FilterParams>,
    #[serde(default)]
    pub glitch: Option<GlitchParams>,
    #[serde(default)]
    pub saturation: Option<SaturationParams>,
    #[serde(default)]
    pub chorus: Option<ChorusParams>,
    #[serde(default)]
    pub delay: Option<DelayParams>,
    #[serde(default)]
    pub spectral_freeze: Option<SpectralFreezeParams>,
    #[serde(default)]
    pub reverb: Option<ReverbParams>,
}

impl StemEffects {
    /// Effects configured for `stage`, in order
    fn for_stage(&self, stage: Stage) -> Vec<Box<dyn Effect>> {
        fn boxed<E: Effect + Clone + 'static>(e: &Option<E>) -> Vec<Box<dyn Effect>> {
            e.iter().map(|p| Box::new(p.clone()) as Box<dyn Effect>).collect()
        }
        match stage {
            Stage::Filter => self
                .filters
                .iter()
                .map(|f| Box::new(f.clone()) as Box<dyn Effect>)
                .collect(),
            Stage::Glitch => boxed(&self.glitch),
            Stage::Saturation => boxed(&self.saturation),
            Stage::Chorus => boxed(&self.chorus),
            Stage::Delay => boxed(&self.delay),
            Stage::SpectralFreeze => boxed(&self.spectral_freeze),
            Stage::Reverb => boxed(&self.reverb),
            _ => Vec::new(),
        }
    }

    /// Whether any atmosphere block is set
    pub fn has_atmosphere(&self) -> bool {
        self.spectral_freeze.is_some() || self.reverb.is_some()
    }

    /// Seed the glitch stage when it has no seed of its own
    pub fn seeded(&self, seed: u64) -> StemEffects {
        let mut effects = self.clone();
        if let Some(glitch) = effects.glitch.take() {
            effects.glitch = Some(match glitch.seed() {
                Some(_) => glitch,
                None => glitch.with_seed(seed),
            });
        }
        effects
    }
}

/// Chain of effects for processing
#[derive(Debug, Clone, Default)]
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
}

impl EffectChain {
    /// Create a new empty effect chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a stem's chain by walking [`STAGE_ORDER`]
    pub fn from_effects(effects: &StemEffects, include_atmosphere: bool) -> Self {
        let mut chain = Self::new();
        for stage in STAGE_ORDER {
            if stage.effect_position().is_none() {
                continue;
            }
            if stage.is_atmosphere() && !include_atmosphere {
                continue;
            }
            for effect in effects.for_stage(stage) {
                chain.add(effect);
            }
        }
        chain
    }

    /// Add an effect after every effect at the same or an earlier position
    pub fn add(&mut self, effect: Box<dyn Effect>) {
        let position = effect.position();
        let index = self
            .effects
            .iter()
            .position(|e| e.position() > position)
            .unwrap_or(self.effects.len());
        self.effects.insert(index, effect);
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Effect type names in processing order
    pub fn effect_types(&self) -> Vec<&'static str> {
        self.effects.iter().map(|e| e.effect_type()).collect()
    }

    /// Run every effect in order, bypassing any that fail recoverably
    pub fn process(
        &self,
        buffer: AudioBuffer,
        degradations: &mut Vec<StageDegradation>,
    ) -> Result<AudioBuffer> {
        self.effects.iter().try_fold(buffer, |current, effect| {
            run_optional_stage(effect.effect_type(), current, degradations, |b| {
                effect.apply(b)
            })
        })
    }
}

/// Run an optional stage, falling back to its input on a recoverable failure.
///
/// A `StageFailed` error, non-finite samples and an empty result from
/// non-empty input are logged, recorded in `degradations` and bypassed.
/// Fatal errors (see [`crate::CantorError::is_fatal`]) are returned to the caller.
pub fn run_optional_stage<F>(
    stage: &str,
    input: AudioBuffer,
    degradations: &mut Vec<StageDegradation>,
    f: F,
) -> Result<AudioBuffer>
where
    F: FnOnce(&AudioBuffer) -> Result<AudioBuffer>,
{
    let reason = match f(&input) {
        Ok(out) if !out.is_finite() => "produced non-finite samples".to_string(),
        Ok(out) if out.is_empty() && !input.is_empty() => "produced no audio".to_string(),
        Ok(out) => {
            debug!(stage, samples = out.len(), "stage complete");
            return Ok(out);
        }
        Err(e) if e.is_fatal() => {
            warn!(stage, error = %e, "stage failed fatally");
            return Err(e);
        }
        Err(e) => e.to_string(),
    };
    warn!(stage, %reason, "stage bypassed");
    degradations.push(StageDegradation {
        stage: stage.to_string(),
        reason,
    });
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::generate_test_tone;
    use crate::error::CantorError;
    use pretty_assertions::assert_eq;

    fn full_effects() -> StemEffects {
        StemEffects {
            filters: vec![FilterParams::high_pass(80.0, 0.7).unwrap()],
            glitch: Some(GlitchParams::default()),
            saturation: Some(SaturationParams::default()),
            chorus: Some(ChorusParams::default()),
            delay: Some(DelayParams::default()),
            spectral_freeze: Some(SpectralFreezeParams::default()),
            reverb: Some(ReverbParams::default()),
        }
    }

    #[test]
    fn test_stage_order_is_fixed() {
        let names: Vec<&str> = STAGE_ORDER.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "generation",
                "normalize",
                "filter",
                "glitch",
                "saturation",
                "chorus",
                "delay",
                "spectral_freeze",
                "reverb",
                "level_pan",
                "sum",
                "master_dynamics",
                "final_normalize",
            ]
        );
    }

    #[test]
    fn test_chain_follows_stage_order() {
        let chain = EffectChain::from_effects(&full_effects(), true);
        assert_eq!(
            chain.effect_types(),
            vec!["filter", "glitch", "saturation", "chorus", "delay", "spectral_freeze", "reverb"]
        );
    }

    #[test]
    fn test_atmosphere_excluded_for_ambient_stems() {
        let chain = EffectChain::from_effects(&full_effects(), false);
        assert_eq!(chain.effect_types(), vec!["filter", "glitch", "saturation", "chorus", "delay"]);
    }

    #[test]
    fn test_add_keeps_position_order() {
        let mut chain = EffectChain::new();
        chain.add(Box::new(ReverbParams::default()));
        chain.add(Box::new(SaturationParams::default()));
        chain.add(Box::new(DelayParams::default()));
        assert_eq!(chain.effect_types(), vec!["saturation", "delay", "reverb"]);
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let tone = generate_test_tone(440.0, 0.1, 48000);
        let mut degradations = Vec::new();
        let out = EffectChain::new().process(tone.clone(), &mut degradations).unwrap();
        assert_eq!(out, tone);
        assert!(degradations.is_empty());
    }

    #[test]
    fn test_failed_stage_falls_back_to_input() {
        let tone = generate_test_tone(440.0, 0.1, 48000);
        let mut degradations = Vec::new();
        let out = run_optional_stage("formant_shift", tone.clone(), &mut degradations, |_| {
            Err(CantorError::stage("formant_shift", "diverged"))
        })
        .unwrap();
        assert_eq!(out, tone);
        assert_eq!(degradations.len(), 1);
        assert_eq!(degradations[0].stage, "formant_shift");
    }

    #[test]
    fn test_non_finite_output_is_bypassed() {
        let tone = generate_test_tone(440.0, 0.1, 48000);
        let mut degradations = Vec::new();
        let out = run_optional_stage("saturation", tone.clone(), &mut degradations, |b| {
            Ok(b.with_gain(f32::NAN))
        })
        .unwrap();
        assert_eq!(out, tone);
        assert_eq!(degradations[0].reason, "produced non-finite samples");
    }

    #[test]
    fn test_fatal_error_is_not_bypassed() {
        let tone = generate_test_tone(440.0, 0.1, 48000);
        let mut degradations = Vec::new();
        let result = run_optional_stage("duration_control", tone, &mut degradations, |_| {
            Err(CantorError::EngineTimeout {
                engine: "energy".to_string(),
                timeout_ms: 10,
            })
        });
        assert!(matches!(result, Err(CantorError::EngineTimeout { .. })));
        assert!(degradations.is_empty());
    }

    #[test]
    fn test_seeded_fills_missing_glitch_seed() {
        let seeded = full_effects().seeded(42);
        assert_eq!(seeded.glitch.unwrap().seed(), Some(42));
        let fixed = StemEffects {
            glitch: Some(GlitchParams::default().with_seed(1)),
            ..StemEffects::default()
        };
        assert_eq!(fixed.seeded(42).glitch.unwrap().seed(), Some(1));
    }

    #[test]
    fn test_stem_effects_from_json() {
        let effects: StemEffects = serde_json::from_str(
            r#"{"delay": {"delay_ms": 250, "feedback": 0.4}, "filters": [{"kind": "high_pass", "cutoff_hz": 100}]}"#,
        )
        .unwrap();
        assert_eq!(effects.delay.unwrap().delay_ms(), 250.0);
        assert_eq!(effects.filters.len(), 1);
        assert!(effects.reverb.is_none());
    }
}
