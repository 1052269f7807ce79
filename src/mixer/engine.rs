//! Mixing engine
//!
//! Renders every stem, runs each through its effect chain in
//! [`STAGE_ORDER`](crate::dsp::STAGE_ORDER), sums them and masters the mix.
//! Stems are peak-normalized to [`STEM_PEAK`] before their effects and
//! padded to a common length before summing.

use std::path::PathBuf;
use std::thread;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn, Level};

use super::layering::{derive_seed, stack_layers, LayerVariation};
use crate::backends::{AmbientGenerator, Backends};
use crate::config::{LayerConfig, RenderConfig};
use crate::dsp::analysis::spectral_centroid;
use crate::dsp::{run_optional_stage, Effect, EffectChain, StemEffects};
use crate::engine::{resample, AudioBuffer, STEM_PEAK};
use crate::error::{CantorError, Result, StageDegradation};
use crate::vocal::{MelodyEvent, VocalProcessor};

/// Seed streams reserved for stems; vocal layers use 0..16
const STEM_STREAM_BASE: u64 = 1000;

/// One of the four rendered layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StemKind {
    Vocals,
    Pads,
    Drones,
    Percussion,
}

impl StemKind {
    pub const ALL: [StemKind; 4] = [StemKind::Vocals, StemKind::Pads, StemKind::Drones, StemKind::Percussion];

    pub fn name(&self) -> &'static str {
        match self {
            StemKind::Vocals => "vocals",
            StemKind::Pads => "pads",
            StemKind::Drones => "drones",
            StemKind::Percussion => "percussion",
        }
    }

    fn stream(&self) -> u64 {
        STEM_STREAM_BASE + *self as u64
    }
}

/// A processed stem, before level and pan
#[derive(Debug, Clone)]
pub struct Stem {
    pub kind: StemKind,
    pub audio: AudioBuffer,
}

/// Finished render
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Seed the render actually used
    pub seed: u64,
    pub stems: Vec<Stem>,
    pub mix: AudioBuffer,
    /// Stages bypassed along the way
    pub degradations: Vec<StageDegradation>,
}

impl SynthesisResult {
    pub fn stem(&self, kind: StemKind) -> Option<&AudioBuffer> {
        self.stems.iter().find(|s| s.kind == kind).map(|s| &s.audio)
    }

    pub fn duration_secs(&self) -> f64 {
        self.mix.duration_secs()
    }
}

/// Generated audio of a stem with its mix settings
struct RawStem<'a> {
    kind: StemKind,
    audio: AudioBuffer,
    effects: &'a StemEffects,
    level: f32,
    pan: Option<f32>,
}

/// Multi-stem renderer
pub struct MixingEngine {
    config: RenderConfig,
    backends: Backends,
    processor: VocalProcessor,
    base_dir: Option<PathBuf>,
}

impl MixingEngine {
    /// Build an engine for a validated config
    pub fn new(config: RenderConfig, backends: Backends) -> Result<Self> {
        config.validate()?;
        let processor = VocalProcessor::new(
            &backends,
            config.vocal.processor_settings(),
            config.sample_rate,
            config.timeouts.tts(),
            config.timeouts.aligner(),
        );
        Ok(Self {
            config,
            backends,
            processor,
            base_dir: None,
        })
    }

    /// Directory relative melody paths are resolved against
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render `text` into stems and a mastered mix
    pub fn render(&self, text: &str) -> Result<SynthesisResult> {
        let seed = self.config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let melody = self.config.melody_events(self.base_dir.as_deref())?;
        let sr = self.config.sample_rate;
        info!(seed, layers = self.config.vocal.layer_count, "render started");

        let mut degradations = Vec::new();
        let vocals = self.render_vocals(text, &melody, seed, &mut degradations)?;
        let duration = self
            .config
            .duration_secs
            .unwrap_or(vocals.duration_secs() as f32);

        let mut raw = vec![RawStem {
            kind: StemKind::Vocals,
            audio: vocals,
            effects: &self.config.vocal.effects,
            level: self.config.vocal.level,
            pan: self.config.vocal.pan,
        }];
        for (kind, audio, layer) in self.render_ambient(duration, seed)? {
            raw.push(RawStem {
                kind,
                audio,
                effects: &layer.effects,
                level: layer.level,
                pan: layer.pan,
            });
        }

        let processed: Vec<ProcessedStem> = if self.config.parallel {
            thread::scope(|scope| {
                let handles: Vec<_> = raw
                    .into_iter()
                    .map(|stem| scope.spawn(move || process_stem(stem, seed)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| join_worker(h).and_then(|r| r))
                    .collect::<Result<Vec<_>>>()
            })?
        } else {
            raw.into_iter()
                .map(|stem| process_stem(stem, seed))
                .collect::<Result<Vec<_>>>()?
        };

        let common_len = processed.iter().map(|p| p.stem.audio.len()).max().unwrap_or(0);
        let mut stems = Vec::with_capacity(processed.len());
        let mut placed = Vec::with_capacity(processed.len());
        for processed in processed {
            degradations.extend(processed.degradations);
            let audio = processed.stem.audio.resized(common_len);
            placed.push(level_pan(&audio, processed.level, processed.pan));
            stems.push(Stem {
                kind: processed.stem.kind,
                audio,
            });
        }

        let summed = AudioBuffer::sum(&placed, sr);
        debug!(stems = stems.len(), samples = summed.len(), "stems summed");
        let mix = self.master(summed, &mut degradations)?;
        info!(
            secs = mix.duration_secs(),
            peak = mix.peak(),
            degraded = degradations.len(),
            "render complete"
        );

        Ok(SynthesisResult {
            seed,
            stems,
            mix,
            degradations,
        })
    }

    /// Synthesize and stack the vocal layers
    fn render_vocals(
        &self,
        text: &str,
        melody: &[MelodyEvent],
        seed: u64,
        degradations: &mut Vec<StageDegradation>,
    ) -> Result<AudioBuffer> {
        let vocal = &self.config.vocal;
        let count = vocal.layer_count as usize;
        let render_layer = |index: usize| -> Result<(AudioBuffer, Vec<StageDegradation>)> {
            let phrase = self.processor.process(text, melody)?;
            let variation = LayerVariation::draw(
                seed,
                index,
                vocal.pitch_variation_semitones,
                vocal.timing_variation_ms,
            );
            debug!(layer = index, ?variation, "vocal layer");
            Ok((variation.apply(&phrase.audio), phrase.degradations))
        };

        let takes: Vec<(AudioBuffer, Vec<StageDegradation>)> = if self.config.parallel && count > 1 {
            thread::scope(|scope| {
                let handles: Vec<_> = (0..count)
                    .map(|index| scope.spawn(move || render_layer(index)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| join_worker(h).and_then(|r| r))
                    .collect::<Result<Vec<_>>>()
            })?
        } else {
            (0..count).map(render_layer).collect::<Result<Vec<_>>>()?
        };

        let mut layers = Vec::with_capacity(takes.len());
        for (audio, layer_degradations) in takes {
            degradations.extend(layer_degradations);
            layers.push(audio);
        }
        Ok(stack_layers(&layers, self.config.sample_rate))
    }

    /// Generate every enabled ambient stem
    fn render_ambient(&self, duration_secs: f32, seed: u64) -> Result<Vec<(StemKind, AudioBuffer, &LayerConfig)>> {
        let sr = self.config.sample_rate;
        let jobs: Vec<(StemKind, &dyn AmbientGenerator, &LayerConfig)> = [
            (StemKind::Pads, self.backends.pads.as_ref(), &self.config.pads),
            (StemKind::Drones, self.backends.drones.as_ref(), &self.config.drones),
            (StemKind::Percussion, self.backends.percussion.as_ref(), &self.config.percussion),
        ]
        .into_iter()
        .filter_map(|(kind, generator, layer)| layer.as_ref().map(|l| (kind, generator, l)))
        .collect();

        let generate = |kind: StemKind, generator: &dyn AmbientGenerator| -> Result<AudioBuffer> {
            let mut mode = self.config.mode_params();
            mode.seed = Some(derive_seed(seed, kind.stream()));
            let audio = generator.generate(duration_secs, &mode, sr)?;
            debug!(stem = kind.name(), engine = %generator.info().id, samples = audio.len(), "ambient generated");
            Ok(resample(&audio, sr))
        };

        let audio: Vec<AudioBuffer> = if self.config.parallel {
            thread::scope(|scope| {
                let handles: Vec<_> = jobs
                    .iter()
                    .map(|&(kind, generator, _)| scope.spawn(move || generate(kind, generator)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| join_worker(h).and_then(|r| r))
                    .collect::<Result<Vec<_>>>()
            })?
        } else {
            jobs.iter()
                .map(|&(kind, generator, _)| generate(kind, generator))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(jobs
            .into_iter()
            .zip(audio)
            .map(|((kind, _, layer), audio)| (kind, audio, layer))
            .collect())
    }

    /// Master dynamics then final normalization
    fn master(&self, mix: AudioBuffer, degradations: &mut Vec<StageDegradation>) -> Result<AudioBuffer> {
        let dynamics = &self.config.master.dynamics;
        let mix = if dynamics.is_bypassed() {
            mix
        } else {
            run_optional_stage(dynamics.effect_type(), mix, degradations, |b| dynamics.apply(b))?
        };

        // Normalizing above the limiter ceiling would undo it
        let target = match &dynamics.limiter {
            Some(limiter) => self.config.master.master_peak.min(limiter.threshold()),
            None => self.config.master.master_peak,
        };
        Ok(mix.normalized(target))
    }
}

/// A stem after its chain, with the mix settings still to apply
struct ProcessedStem {
    stem: Stem,
    level: f32,
    pan: Option<f32>,
    degradations: Vec<StageDegradation>,
}

/// Normalize a stem, then run its chain
fn process_stem(stem: RawStem<'_>, seed: u64) -> Result<ProcessedStem> {
    let mut degradations = Vec::new();
    let is_vocal = stem.kind == StemKind::Vocals;
    if !is_vocal && stem.effects.has_atmosphere() {
        warn!(stem = stem.kind.name(), "atmosphere effects only apply to vocals, ignoring");
    }

    let normalized = stem.audio.normalized(STEM_PEAK);
    let chain = EffectChain::from_effects(&stem.effects.seeded(derive_seed(seed, stem.kind.stream())), is_vocal);
    let brightness = |b: &AudioBuffer| {
        tracing::enabled!(Level::DEBUG).then(|| spectral_centroid(b.channel(0), b.sample_rate))
    };
    let centroid_in = brightness(&normalized);
    let audio = chain.process(normalized, &mut degradations)?;
    debug!(
        stem = stem.kind.name(),
        effects = ?chain.effect_types(),
        level = stem.level,
        pan = ?stem.pan,
        samples = audio.len(),
        centroid_in_hz = ?centroid_in,
        centroid_out_hz = ?brightness(&audio),
        "stem processed"
    );
    Ok(ProcessedStem {
        stem: Stem {
            kind: stem.kind,
            audio,
        },
        level: stem.level,
        pan: stem.pan,
        degradations,
    })
}

fn level_pan(audio: &AudioBuffer, level: f32, pan: Option<f32>) -> AudioBuffer {
    let leveled = audio.with_gain(level);
    match pan {
        Some(pan) => leveled.to_stereo(pan),
        None => leveled,
    }
}

fn join_worker<T>(handle: thread::ScopedJoinHandle<'_, T>) -> Result<T> {
    handle.join().map_err(|_| CantorError::stage("render", "worker thread panicked"))
}
