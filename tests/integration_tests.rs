//! Integration Tests
//!
//! End-to-end tests for the effect chain, duration control and rendering.

use std::fs;

use approx::assert_relative_eq;
use cantor::backends::{AlignedSegment, EngineRegistry};
use cantor::cli::commands::{self, RenderOptions};
use cantor::dsp::{
    ChorusParams, DelayParams, Effect, EffectChain, FilterParams, GlitchMode, GlitchParams,
    LimiterParams, ReverbParams, SaturationParams, SpectralFreezeParams, StemEffects,
};
use cantor::engine::buffer::slice_rms;
use cantor::engine::{generate_test_tone, read_wav, AudioBuffer, RenderManifest};
use cantor::vocal::AlignmentPlan;
use cantor::{CantorError, MixingEngine, RenderConfig};
use pretty_assertions::assert_eq;

fn all_effects() -> Vec<Box<dyn Effect>> {
    vec![
        Box::new(FilterParams::low_pass(2000.0).unwrap()),
        Box::new(GlitchParams::new(40.0, 0.5).unwrap().with_seed(3)),
        Box::new(SaturationParams::new(0.5, 0.5, 1.0).unwrap()),
        Box::new(ChorusParams::new(3, 20.0, 0.5, 3.0, 0.5).unwrap()),
        Box::new(DelayParams::new(120.0, 0.4, 0.5).unwrap()),
        Box::new(SpectralFreezeParams::new(0.5, 0.2, 0.5, 1024).unwrap()),
        Box::new(ReverbParams::new(1.5, 0.4).unwrap()),
        Box::new(LimiterParams::new(0.8, 50.0).unwrap()),
    ]
}

fn render_engine(config: RenderConfig) -> MixingEngine {
    let backends = EngineRegistry::default().select().unwrap();
    MixingEngine::new(config, backends).unwrap()
}

// === Effect Chain Tests ===

#[test]
fn test_every_effect_passes_empty_buffers_through() {
    let empty = AudioBuffer::empty(48000);
    for effect in all_effects() {
        let out = effect.apply(&empty).unwrap();
        assert!(out.is_empty(), "{} grew an empty buffer", effect.effect_type());
    }
}

#[test]
fn test_chain_orders_stages_regardless_of_insertion() {
    let mut chain = EffectChain::new();
    chain.add(Box::new(ReverbParams::new(1.0, 0.3).unwrap()));
    chain.add(Box::new(FilterParams::high_pass(80.0, 0.7).unwrap()));
    chain.add(Box::new(DelayParams::new(200.0, 0.3, 0.4).unwrap()));
    assert_eq!(chain.effect_types(), vec!["filter", "delay", "reverb"]);
}

#[test]
fn test_full_chain_on_tone_stays_finite() {
    let tone = generate_test_tone(440.0, 1.0, 48000);
    let mut chain = EffectChain::new();
    for effect in all_effects() {
        chain.add(effect);
    }
    let mut degradations = Vec::new();
    let out = chain.process(tone.clone(), &mut degradations).unwrap();

    assert!(degradations.is_empty(), "{:?}", degradations);
    assert!(out.is_finite());
    assert!(!out.is_silent());
    // Only the reverb tail lengthens the signal
    assert!(out.len() > tone.len());
}

#[test]
fn test_stem_effects_skip_atmosphere_when_excluded() {
    let effects = StemEffects {
        delay: Some(DelayParams::new(100.0, 0.2, 0.3).unwrap()),
        reverb: Some(ReverbParams::new(2.0, 0.5).unwrap()),
        ..StemEffects::default()
    };
    let vocal = EffectChain::from_effects(&effects, true);
    let ambient = EffectChain::from_effects(&effects, false);
    assert_eq!(vocal.effect_types(), vec!["delay", "reverb"]);
    assert_eq!(ambient.effect_types(), vec!["delay"]);
}

#[test]
fn test_reverb_tail_carries_energy() {
    let tone = generate_test_tone(440.0, 1.0, 48000);
    let reverb = ReverbParams::new(2.0, 0.5).unwrap();
    let out = reverb.apply(&tone).unwrap();

    assert!(out.len() > tone.len());
    let tail = slice_rms(&out.channel(0)[tone.len()..]);
    assert!(tail > 1e-4, "tail rms {}", tail);
}

#[test]
fn test_glitch_repeat_count_changes_output() {
    let tone = generate_test_tone(220.0, 1.0, 48000);
    let base = GlitchParams::new(50.0, 1.0)
        .unwrap()
        .with_modes(vec![GlitchMode::Repeat])
        .unwrap()
        .with_seed(9);
    let twice = base.clone().with_repeat_count(2).unwrap().apply(&tone).unwrap();
    let thrice = base.with_repeat_count(3).unwrap().apply(&tone).unwrap();
    assert_eq!(twice.len(), tone.len());
    assert_ne!(twice.samples, thrice.samples);
}

#[test]
fn test_limiter_holds_threshold_on_hot_signal() {
    let hot = generate_test_tone(100.0, 0.5, 48000).with_gain(3.0);
    let out = LimiterParams::new(0.7, 100.0).unwrap().apply(&hot).unwrap();
    assert!(out.peak() <= 0.7 + 1e-4, "peak {}", out.peak());
}

// === Duration Control Tests ===

#[test]
fn test_alignment_plan_hits_target_total() {
    let tone = generate_test_tone(200.0, 1.2, 16000);
    let segments = vec![
        AlignedSegment::new("lux", 0.0, 0.4).unwrap(),
        AlignedSegment::new("aeterna", 0.4, 1.2).unwrap(),
    ];
    let targets = [0.75, 1.5];
    let plan = AlignmentPlan::map(&segments, &targets);
    let out = plan.render(&tone);

    assert_relative_eq!(plan.total_output_secs(), 2.25, epsilon = 1e-9);
    assert_relative_eq!(out.duration_secs(), 2.25, epsilon = 1e-3);
}

// === Render Tests ===

#[test]
fn test_render_from_json_config() {
    let config = RenderConfig::from_json(
        r#"{
            "sample_rate": 16000,
            "seed": 11,
            "duration_secs": 2.0,
            "vocal": {"layer_count": 3, "pitch_variation_semitones": 2.0},
            "drones": {"level": 0.5}
        }"#,
    )
    .unwrap();
    let result = render_engine(config).render("kyrie eleison").unwrap();

    assert_eq!(result.seed, 11);
    assert_eq!(result.stems.len(), 2);
    assert!(result.mix.is_finite());
    assert!(result.mix.peak() <= 1.0);
}

#[test]
fn test_layered_render_depends_on_seed() {
    let config = |seed| RenderConfig {
        sample_rate: 16000,
        seed: Some(seed),
        vocal: serde_json::from_str(r#"{"layer_count": 3, "timing_variation_ms": 40.0}"#)
            .unwrap(),
        ..RenderConfig::default()
    };
    let a = render_engine(config(1)).render("sanctus").unwrap();
    let b = render_engine(config(1)).render("sanctus").unwrap();
    let c = render_engine(config(2)).render("sanctus").unwrap();

    assert_eq!(a.mix.samples, b.mix.samples);
    assert_ne!(a.mix.samples, c.mix.samples);
}

#[test]
fn test_whitespace_text_is_rejected() {
    let config = RenderConfig {
        sample_rate: 16000,
        seed: Some(1),
        ..RenderConfig::default()
    };
    let err = render_engine(config).render("  \n\t").unwrap_err();
    assert!(matches!(err, CantorError::EmptyAudio { .. }), "{:?}", err);
}

#[test]
fn test_cli_render_writes_manifest_with_hashes() {
    let dir = tempfile::tempdir().unwrap();
    let text = dir.path().join("hymn.txt");
    let config = dir.path().join("hymn.json");
    let output = dir.path().join("hymn.wav");
    fs::write(&text, "dies irae").unwrap();
    fs::write(
        &config,
        r#"{"sample_rate": 22050, "bit_depth": 16, "seed": 8, "pads": {"level": 0.3}}"#,
    )
    .unwrap();

    commands::render(&RenderOptions {
        text: &text,
        output: &output,
        config: Some(&config),
        duration_secs: None,
        stems: true,
    })
    .unwrap();

    let manifest: RenderManifest =
        serde_json::from_str(&fs::read_to_string(commands::manifest_path(&output)).unwrap())
            .unwrap();
    let names: Vec<&str> = manifest.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["mix", "vocals", "pads"]);
    assert_eq!(manifest.sample_rate, 22050);

    let mix = read_wav(&output).unwrap();
    let pads = read_wav(&commands::stem_path(&output, "pads")).unwrap();
    assert_eq!(mix.len(), pads.len());
}
