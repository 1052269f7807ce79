//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::backends::EngineRegistry;
use crate::config::RenderConfig;
use crate::engine::{export_wav, ExportFormat, RenderManifest};
use crate::error::Result;
use crate::mixer::{MixingEngine, SynthesisResult};

/// Options of the `render` command
#[derive(Debug, Clone)]
pub struct RenderOptions<'a> {
    pub text: &'a Path,
    pub output: &'a Path,
    pub config: Option<&'a Path>,
    pub duration_secs: Option<f32>,
    pub stems: bool,
}

/// Path of a stem file written next to the mix, e.g. `chant.vocals.wav`
pub fn stem_path(output: &Path, stem: &str) -> PathBuf {
    let stem_name = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "render".to_string());
    output.with_file_name(format!("{}.{}.wav", stem_name, stem))
}

/// Manifest path for a mix, e.g. `chant.manifest.json`
pub fn manifest_path(output: &Path) -> PathBuf {
    stem_path(output, "manifest").with_extension("json")
}

fn load_config(path: Option<&Path>) -> Result<RenderConfig> {
    match path {
        Some(path) => RenderConfig::load(path),
        None => Ok(RenderConfig::default()),
    }
}

/// Render text to a mix, optional stems and a manifest.
pub fn render(options: &RenderOptions<'_>) -> Result<RenderManifest> {
    let mut config = load_config(options.config)?;
    if let Some(duration) = options.duration_secs {
        config.duration_secs = Some(duration);
        config.validate()?;
    }
    let text = fs::read_to_string(options.text)?;
    info!(path = %options.text.display(), chars = text.len(), "text loaded");

    let mut registry = EngineRegistry::with_defaults(config.vocal.voice.clone());
    registry.prefer(&config.vocal.engines);
    let backends = registry.select()?;

    let format = config.export_format()?;
    let seed = config.seed;
    let mut engine = MixingEngine::new(config, backends)?;
    if let Some(dir) = options.config.and_then(Path::parent) {
        engine = engine.with_base_dir(dir);
    }
    let result = engine.render(&text)?;

    let manifest = write_outputs(&result, options, format)?;
    for degradation in &result.degradations {
        warn!("{}", degradation);
    }
    if seed.is_none() {
        info!(seed = result.seed, "no seed configured; pass this seed to reproduce the render");
    }
    Ok(manifest)
}

fn write_outputs(
    result: &SynthesisResult,
    options: &RenderOptions<'_>,
    format: ExportFormat,
) -> Result<RenderManifest> {
    if let Some(parent) = options.output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut manifest = RenderManifest::new(
        Uuid::new_v4(),
        format.sample_rate(),
        format.bit_depth(),
        Some(result.seed),
    );

    export_wav(&result.mix, options.output, format)?;
    manifest.record("mix", options.output, result.mix.duration_secs())?;
    println!("Mix written: {}", options.output.display());

    if options.stems {
        for stem in &result.stems {
            let path = stem_path(options.output, stem.kind.name());
            export_wav(&stem.audio, &path, format)?;
            manifest.record(stem.kind.name(), &path, stem.audio.duration_secs())?;
            println!("Stem written: {}", path.display());
        }
    }

    manifest.degradations = result.degradations.iter().map(|d| d.to_string()).collect();
    let path = manifest_path(options.output);
    manifest.write(&path)?;
    println!("Manifest written: {}", path.display());
    Ok(manifest)
}

/// Validate a config and print what it enables.
pub fn validate_config(path: &Path) -> Result<()> {
    let config = RenderConfig::load(path)?;

    println!("Config OK: {}", path.display());
    println!("{:-<60}", "");
    println!("Mode:         {:?} at {:.2} Hz", config.mode, config.root_hz);
    println!("Format:       {} Hz, {}-bit", config.sample_rate, config.bit_depth);
    println!("Vocal layers: {}", config.vocal.layer_count);
    let ambient: Vec<&str> = config.ambient_layers().into_iter().map(|(name, _)| name).collect();
    if ambient.is_empty() {
        println!("Ambient:      none");
    } else {
        println!("Ambient:      {}", ambient.join(", "));
    }
    match config.seed {
        Some(seed) => println!("Seed:         {}", seed),
        None => println!("Seed:         random"),
    }

    Ok(())
}

/// List engines in selection order.
pub fn list_engines() -> Result<()> {
    let registry = EngineRegistry::default();

    println!("Available engines:");
    println!("{:-<60}", "");
    for info in registry.describe() {
        println!("{:<12} {:<12} {}", info.id, format!("{:?}", info.kind), info.description);
    }

    Ok(())
}
