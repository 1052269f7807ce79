//! Render configuration
//!
//! The JSON document describing one render. Effect blocks validate while
//! deserializing; `RenderConfig::validate` checks the cross-field rules
//! (ranges that depend on the sample rate, layering limits) before any
//! audio is produced.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backends::{Mode, ModeParams, RobotVoice};
use crate::dsp::{ensure_range, FormantShiftParams, MasterDynamicsParams, StemEffects};
use crate::engine::{ExportFormat, STEM_PEAK};
use crate::error::{CantorError, Result};
use crate::vocal::{MelodyEvent, MelodySource, TimbreParams, VocalSettings};

/// Limits for collaborator calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineTimeouts {
    pub tts_ms: u64,
    pub aligner_ms: u64,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            tts_ms: 30_000,
            aligner_ms: 20_000,
        }
    }
}

impl EngineTimeouts {
    pub fn tts(&self) -> Duration {
        Duration::from_millis(self.tts_ms)
    }

    pub fn aligner(&self) -> Duration {
        Duration::from_millis(self.aligner_ms)
    }
}

/// Ambient stem settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayerConfig {
    /// Linear mix level (0.0 to 2.0)
    pub level: f32,
    /// Stereo position (-1.0 left to 1.0 right); absent keeps the stem mono
    pub pan: Option<f32>,
    pub effects: StemEffects,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            level: 0.5,
            pan: None,
            effects: StemEffects::default(),
        }
    }
}

/// Vocal stem settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VocalConfig {
    pub voice: RobotVoice,
    /// TTS engine ids to try first, in order
    pub engines: Vec<String>,
    pub formant: Option<FormantShiftParams>,
    pub timbre: Option<TimbreParams>,
    /// Gain before the soft clip (-24 to +24 dB)
    pub output_gain_db: f32,
    /// Number of stacked takes (1 to 16)
    pub layer_count: u32,
    /// Random pitch offset range for extra layers (0 to 12 semitones)
    pub pitch_variation_semitones: f32,
    /// Random timing offset range for extra layers (0 to 500 ms)
    pub timing_variation_ms: f32,
    pub level: f32,
    pub pan: Option<f32>,
    pub effects: StemEffects,
}

impl Default for VocalConfig {
    fn default() -> Self {
        Self {
            voice: RobotVoice::default(),
            engines: Vec::new(),
            formant: None,
            timbre: None,
            output_gain_db: 0.0,
            layer_count: 1,
            pitch_variation_semitones: 0.0,
            timing_variation_ms: 0.0,
            level: 1.0,
            pan: None,
            effects: StemEffects::default(),
        }
    }
}

impl VocalConfig {
    pub fn processor_settings(&self) -> VocalSettings {
        VocalSettings {
            formant: self.formant.clone(),
            timbre: self.timbre.clone(),
            output_gain_db: self.output_gain_db,
        }
    }
}

/// Mastering settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MasterConfig {
    pub dynamics: MasterDynamicsParams,
    /// Peak of the final mix (0.01 to 1.0)
    pub master_peak: f32,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            dynamics: MasterDynamicsParams::default(),
            master_peak: STEM_PEAK,
        }
    }
}

/// Complete render document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub mode: Mode,
    /// Final of the mode in Hz
    pub root_hz: f32,
    /// Pulse multiplier for rhythmic layers (0.25 to 4)
    pub tempo_scale: f32,
    pub sample_rate: u32,
    pub bit_depth: u16,
    /// Fixing the seed makes the render reproducible
    pub seed: Option<u64>,
    /// Render stems and vocal layers on worker threads
    pub parallel: bool,
    /// Length of the ambient stems; defaults to the vocal length
    pub duration_secs: Option<f32>,
    pub timeouts: EngineTimeouts,
    pub melody: Option<MelodySource>,
    pub vocal: VocalConfig,
    pub pads: Option<LayerConfig>,
    pub drones: Option<LayerConfig>,
    pub percussion: Option<LayerConfig>,
    pub master: MasterConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Dorian,
            root_hz: 146.83,
            tempo_scale: 1.0,
            sample_rate: 48000,
            bit_depth: 24,
            seed: None,
            parallel: false,
            duration_secs: None,
            timeouts: EngineTimeouts::default(),
            melody: None,
            vocal: VocalConfig::default(),
            pads: None,
            drones: None,
            percussion: None,
            master: MasterConfig::default(),
        }
    }
}

fn validate_level(prefix: &str, level: f32, pan: Option<f32>) -> Result<()> {
    ensure_range(&format!("{}.level", prefix), level, 0.0, 2.0)?;
    if let Some(pan) = pan {
        ensure_range(&format!("{}.pan", prefix), pan, -1.0, 1.0)?;
    }
    Ok(())
}

/// Filter cutoffs must sit below the render nyquist
fn validate_effects(prefix: &str, effects: &StemEffects, sample_rate: u32) -> Result<()> {
    let nyquist = sample_rate as f32 / 2.0;
    for (i, filter) in effects.filters.iter().enumerate() {
        if filter.cutoff_hz() >= nyquist {
            return Err(CantorError::invalid(
                &format!("{}.effects.filters[{}].cutoff_hz", prefix, i),
                filter.cutoff_hz(),
                &format!("below the nyquist frequency of {} Hz", nyquist),
            ));
        }
    }
    Ok(())
}

impl RenderConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RenderConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every rule serde cannot express
    pub fn validate(&self) -> Result<()> {
        ExportFormat::new(self.sample_rate, self.bit_depth)?;
        ensure_range("root_hz", self.root_hz, 20.0, 2000.0)?;
        ensure_range("tempo_scale", self.tempo_scale, 0.25, 4.0)?;
        if let Some(duration) = self.duration_secs {
            ensure_range("duration_secs", duration, 0.0, 3600.0)?;
        }
        if self.timeouts.tts_ms == 0 {
            return Err(CantorError::invalid("timeouts.tts_ms", 0, "a positive number of ms"));
        }
        if self.timeouts.aligner_ms == 0 {
            return Err(CantorError::invalid("timeouts.aligner_ms", 0, "a positive number of ms"));
        }

        let vocal = &self.vocal;
        vocal.voice.validate()?;
        if !(1..=16).contains(&vocal.layer_count) {
            return Err(CantorError::invalid("vocal.layer_count", vocal.layer_count, "1 to 16"));
        }
        ensure_range(
            "vocal.pitch_variation_semitones",
            vocal.pitch_variation_semitones,
            0.0,
            12.0,
        )?;
        ensure_range("vocal.timing_variation_ms", vocal.timing_variation_ms, 0.0, 500.0)?;
        ensure_range("vocal.output_gain_db", vocal.output_gain_db, -24.0, 24.0)?;
        validate_level("vocal", vocal.level, vocal.pan)?;
        validate_effects("vocal", &vocal.effects, self.sample_rate)?;

        for (name, layer) in self.ambient_layers() {
            validate_level(name, layer.level, layer.pan)?;
            validate_effects(name, &layer.effects, self.sample_rate)?;
        }

        ensure_range("master.master_peak", self.master.master_peak, 0.01, 1.0)
    }

    /// Enabled ambient stems by name
    pub fn ambient_layers(&self) -> Vec<(&'static str, &LayerConfig)> {
        [
            ("pads", &self.pads),
            ("drones", &self.drones),
            ("percussion", &self.percussion),
        ]
        .into_iter()
        .filter_map(|(name, layer)| layer.as_ref().map(|l| (name, l)))
        .collect()
    }

    /// Musical context for the ambient generators
    pub fn mode_params(&self) -> ModeParams {
        ModeParams {
            mode: self.mode,
            root_hz: self.root_hz,
            tempo_scale: self.tempo_scale,
            seed: self.seed,
        }
    }

    pub fn export_format(&self) -> Result<ExportFormat> {
        ExportFormat::new(self.sample_rate, self.bit_depth)
    }

    /// Melody events, reading a melody file relative to `base_dir`
    pub fn melody_events(&self, base_dir: Option<&Path>) -> Result<Vec<MelodyEvent>> {
        match &self.melody {
            Some(source) => source.load(base_dir),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_is_default() {
        let config = RenderConfig::from_json("{}").unwrap();
        assert_eq!(config, RenderConfig::default());
        assert!(config.ambient_layers().is_empty());
    }

    #[test]
    fn test_full_document() {
        let config = RenderConfig::from_json(
            r#"{
                "mode": "phrygian",
                "tempo_scale": 0.5,
                "sample_rate": 44100,
                "bit_depth": 16,
                "seed": 7,
                "melody": [{"pitch_hz": 164.8, "duration_secs": 0.6}],
                "vocal": {
                    "layer_count": 3,
                    "pitch_variation_semitones": 0.3,
                    "formant": {"shift_factor": 1.2},
                    "timbre": {"kind": "android", "amount": 0.4},
                    "effects": {"reverb": {"decay_secs": 4.0, "mix": 0.4}}
                },
                "pads": {"level": 0.3, "pan": -0.4},
                "master": {"dynamics": {"limiter": {"threshold": 0.9}}, "master_peak": 0.95}
            }"#,
        )
        .unwrap();
        assert_eq!(config.mode, Mode::Phrygian);
        assert_eq!(config.vocal.layer_count, 3);
        assert!(config.vocal.effects.reverb.is_some());
        assert_eq!(config.ambient_layers().len(), 1);
        assert_eq!(config.melody_events(None).unwrap().len(), 1);
        assert!(config.master.dynamics.limiter.is_some());
    }

    #[test]
    fn test_effect_ranges_checked_while_parsing() {
        let err = RenderConfig::from_json(r#"{"vocal": {"effects": {"delay": {"feedback": 1.0}}}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(RenderConfig::from_json(r#"{"vocal": {"layers": 3}}"#).is_err());
        assert!(RenderConfig::from_json(r#"{"mode": "hypodorian"}"#).is_err());
    }

    #[test]
    fn test_cross_field_rules() {
        let cases = [
            r#"{"tempo_scale": 8}"#,
            r#"{"bit_depth": 12}"#,
            r#"{"vocal": {"layer_count": 0}}"#,
            r#"{"pads": {"pan": 2}}"#,
            r#"{"master": {"master_peak": 1.5}}"#,
            r#"{"sample_rate": 16000, "vocal": {"effects": {"filters": [{"kind": "low_pass", "cutoff_hz": 9000}]}}}"#,
        ];
        for json in cases {
            match RenderConfig::from_json(json) {
                Err(CantorError::ConfigValidation { .. }) => {}
                other => panic!("{} should fail validation, got {:?}", json, other),
            }
        }
    }

    #[test]
    fn test_round_trips_through_json() {
        let mut config = RenderConfig::default();
        config.percussion = Some(LayerConfig::default());
        config.seed = Some(3);
        let parsed = RenderConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
