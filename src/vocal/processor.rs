//! Vocal processor
//!
//! Turns text into one finished vocal phrase. Stage order:
//! 1. Synthesis (TTS engine, behind a timeout; failure is fatal)
//! 2. Duration control (only when a melody supplies targets)
//! 3. Formant shift
//! 4. Timbre blend
//! 5. Melody contour
//! 6. Output gain and soft clip
//!
//! Stages 2 to 5 are optional: a stage failure is logged, recorded as a
//! degradation and the stage's input passes on unchanged. An aligner that is
//! unavailable or times out still aborts the phrase.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::aligner::DurationAligner;
use super::melody::{durations, MelodyEvent};
use super::timbre::TimbreParams;
use crate::backends::{call_with_timeout, Backends, TtsEngine};
use crate::dsp::pitch::{detect_pitch, pitch_shift, semitones_between};
use crate::dsp::{ms_to_samples, run_optional_stage, Effect, FormantShiftParams};
use crate::engine::{db_to_linear, resample, AudioBuffer};
use crate::error::{CantorError, Result, StageDegradation};

/// Melody slices shorter than this are left alone
pub const MIN_CONTOUR_SLICE_MS: f32 = 50.0;

/// Shifts smaller than this many semitones are skipped
const CONTOUR_TOLERANCE_SEMITONES: f32 = 0.05;

/// Post-synthesis settings of the vocal chain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VocalSettings {
    pub formant: Option<FormantShiftParams>,
    pub timbre: Option<TimbreParams>,
    pub output_gain_db: f32,
}

/// A processed phrase and the stages that were bypassed on the way
#[derive(Debug, Clone)]
pub struct VocalPhrase {
    pub audio: AudioBuffer,
    pub degradations: Vec<StageDegradation>,
}

/// Text-to-phrase pipeline
#[derive(Clone)]
pub struct VocalProcessor {
    tts: Arc<dyn TtsEngine>,
    durations: DurationAligner,
    settings: VocalSettings,
    sample_rate: u32,
    tts_timeout: Duration,
}

impl VocalProcessor {
    pub fn new(
        backends: &Backends,
        settings: VocalSettings,
        sample_rate: u32,
        tts_timeout: Duration,
        aligner_timeout: Duration,
    ) -> Self {
        Self {
            tts: Arc::clone(&backends.tts),
            durations: DurationAligner::new(Arc::clone(&backends.aligner), aligner_timeout),
            settings,
            sample_rate,
            tts_timeout,
        }
    }

    pub fn settings(&self) -> &VocalSettings {
        &self.settings
    }

    /// Raw speech at the render sample rate
    pub fn synthesize(&self, text: &str) -> Result<AudioBuffer> {
        if text.trim().is_empty() {
            return Err(CantorError::EmptyAudio {
                stage: "synthesis".to_string(),
            });
        }
        let tts = Arc::clone(&self.tts);
        let engine = tts.info().id.clone();
        let owned = text.to_string();
        let raw = call_with_timeout(&engine, self.tts_timeout, move || tts.synthesize(&owned))?;
        if raw.is_empty() {
            return Err(CantorError::EmptyAudio {
                stage: "synthesis".to_string(),
            });
        }
        if raw.sample_rate != self.sample_rate {
            debug!(from = raw.sample_rate, to = self.sample_rate, "resampling speech");
        }
        Ok(resample(&raw, self.sample_rate))
    }

    /// Render `text` through the full chain
    pub fn process(&self, text: &str, melody: &[MelodyEvent]) -> Result<VocalPhrase> {
        let mut degradations = Vec::new();
        let mut audio = self.synthesize(text)?;
        debug!(samples = audio.len(), "synthesis complete");

        if !melody.is_empty() {
            let targets = durations(melody);
            audio = run_optional_stage("duration_control", audio, &mut degradations, |b| {
                self.durations.align(b, text, &targets)
            })?;
        }

        if let Some(formant) = &self.settings.formant {
            audio = run_optional_stage("formant_shift", audio, &mut degradations, |b| formant.apply(b))?;
        }

        if let Some(timbre) = &self.settings.timbre {
            audio = run_optional_stage("timbre_blend", audio, &mut degradations, |b| timbre.apply(b))?;
        }

        if !melody.is_empty() {
            audio = run_optional_stage("melody_contour", audio, &mut degradations, |b| {
                Ok(apply_melody_contour(b, melody))
            })?;
        }

        let audio = soft_clip(&audio, self.settings.output_gain_db);
        info!(
            secs = audio.duration_secs(),
            degraded = degradations.len(),
            "vocal phrase rendered"
        );
        Ok(VocalPhrase {
            audio,
            degradations,
        })
    }
}

/// Pitch each melody slice of `buffer` to its event's target
///
/// Slices are consecutive from the start of the buffer. Rests, slices
/// under 50 ms and unvoiced slices pass through; audio past the end of the
/// melody is kept as is. The output has the input's length.
pub fn apply_melody_contour(buffer: &AudioBuffer, melody: &[MelodyEvent]) -> AudioBuffer {
    let len = buffer.len();
    let sr = buffer.sample_rate;
    let min_slice = ms_to_samples(MIN_CONTOUR_SLICE_MS, sr);
    let mono = buffer.to_mono();
    let mut out = buffer.clone();

    let mut cursor = 0;
    for event in melody {
        if cursor >= len {
            break;
        }
        let slice_len = ms_to_samples(event.duration_secs() * 1000.0, sr).min(len - cursor);
        let range = cursor..cursor + slice_len;
        cursor += slice_len;
        if event.is_rest() || slice_len < min_slice {
            continue;
        }

        let Some(current) = detect_pitch(&mono.channel(0)[range.clone()], sr) else {
            continue;
        };
        let semitones = semitones_between(current, event.pitch_hz());
        if semitones.abs() < CONTOUR_TOLERANCE_SEMITONES {
            continue;
        }
        debug!(current, target = event.pitch_hz(), semitones, "contour slice");
        for (target, source) in out.samples.iter_mut().zip(&buffer.samples) {
            let shifted = pitch_shift(&source[range.clone()], semitones);
            target[range.clone()].copy_from_slice(&shifted);
        }
    }
    out
}

/// Apply `gain_db` then a `tanh` soft clip
pub fn soft_clip(buffer: &AudioBuffer, gain_db: f32) -> AudioBuffer {
    let gain = db_to_linear(gain_db);
    buffer.map_channels(|ch| ch.iter().map(|s| (s * gain).tanh()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{AlignedSegment, EngineInfo, EngineKind, EngineRegistry, ForcedAligner};
    use crate::engine::generate_test_tone;
    use crate::vocal::timbre::TimbreKind;
    use approx::assert_relative_eq;

    /// Speech engine that answers every phrase with a steady tone
    struct ToneTts {
        info: EngineInfo,
    }

    impl TtsEngine for ToneTts {
        fn info(&self) -> &EngineInfo {
            &self.info
        }

        fn initialize(&mut self) -> Result<()> {
            Ok(())
        }

        fn synthesize(&self, _text: &str) -> Result<AudioBuffer> {
            Ok(generate_test_tone(150.0, 1.0, 16000).with_gain(0.5))
        }
    }

    /// Aligner whose engine is never reachable
    struct OfflineAligner {
        info: EngineInfo,
    }

    impl ForcedAligner for OfflineAligner {
        fn info(&self) -> &EngineInfo {
            &self.info
        }

        fn align(&self, _audio: &AudioBuffer, _text: &str) -> Result<Vec<AlignedSegment>> {
            Err(CantorError::EngineUnavailable {
                engine: self.info.id.clone(),
                reason: "service not running".to_string(),
            })
        }
    }

    fn robot_processor(settings: VocalSettings) -> VocalProcessor {
        let backends = EngineRegistry::default().select().unwrap();
        VocalProcessor::new(
            &backends,
            settings,
            16000,
            Duration::from_secs(30),
            Duration::from_secs(30),
        )
    }

    fn tone_processor() -> VocalProcessor {
        let mut registry = EngineRegistry::new();
        registry.register_tts(Box::new(ToneTts {
            info: EngineInfo::new("tone", "Tone", EngineKind::Tts, "steady 150 Hz"),
        }));
        let backends = registry.select().unwrap();
        VocalProcessor::new(
            &backends,
            VocalSettings::default(),
            16000,
            Duration::from_secs(30),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_empty_text_is_empty_audio() {
        let processor = robot_processor(VocalSettings::default());
        for text in ["", "  \n "] {
            assert!(matches!(
                processor.process(text, &[]),
                Err(CantorError::EmptyAudio { .. })
            ));
        }
    }

    #[test]
    fn test_speech_is_resampled_to_render_rate() {
        let phrase = robot_processor(VocalSettings::default()).process("kyrie", &[]).unwrap();
        assert_eq!(phrase.audio.sample_rate, 16000);
        assert!(!phrase.audio.is_silent());
        assert!(phrase.degradations.is_empty());
    }

    #[test]
    fn test_output_is_soft_clipped() {
        let settings = VocalSettings {
            output_gain_db: 18.0,
            ..VocalSettings::default()
        };
        let phrase = robot_processor(settings).process("gloria in excelsis", &[]).unwrap();
        assert!(phrase.audio.peak() <= 1.0);
        assert!(phrase.audio.peak() > 0.9);
    }

    #[test]
    fn test_melody_controls_duration() {
        let melody = vec![
            MelodyEvent::new(150.0, 0.4).unwrap(),
            MelodyEvent::new(165.0, 0.4).unwrap(),
            MelodyEvent::new(140.0, 0.4).unwrap(),
        ];
        let phrase = robot_processor(VocalSettings::default())
            .process("dona nobis pacem", &melody)
            .unwrap();
        assert_relative_eq!(phrase.audio.duration_secs(), 1.2, epsilon = 0.02);
    }

    #[test]
    fn test_contour_moves_pitch_of_voiced_slice() {
        let tone = generate_test_tone(150.0, 1.0, 16000).with_gain(0.5);
        let melody = vec![MelodyEvent::new(220.0, 0.5).unwrap()];
        let out = apply_melody_contour(&tone, &melody);
        assert_eq!(out.len(), tone.len());

        let shifted = detect_pitch(&out.channel(0)[..8000], 16000).unwrap();
        assert!((shifted - 220.0).abs() < 5.0, "detected {}", shifted);
        // Past the end of the melody the audio is untouched
        assert_eq!(&out.channel(0)[8000..], &tone.channel(0)[8000..]);
    }

    #[test]
    fn test_contour_skips_short_slices_and_rests() {
        let tone = generate_test_tone(150.0, 0.5, 16000);
        let melody = vec![
            MelodyEvent::new(300.0, 0.03).unwrap(),
            MelodyEvent::rest(0.2).unwrap(),
        ];
        assert_eq!(apply_melody_contour(&tone, &melody), tone);
    }

    #[test]
    fn test_tone_phrase_follows_melody() {
        let melody = vec![MelodyEvent::new(200.0, 1.0).unwrap()];
        let phrase = tone_processor().process("amen", &melody).unwrap();
        // One word, one target: the whole phrase is the stretched segment
        assert_relative_eq!(phrase.audio.duration_secs(), 1.0, epsilon = 0.02);
        let mid = phrase.audio.len() / 2;
        let pitch = detect_pitch(&phrase.audio.channel(0)[mid - 3000..mid + 3000], 16000).unwrap();
        assert!((pitch - 200.0).abs() < 6.0, "detected {}", pitch);
    }

    #[test]
    fn test_post_processing_stages_run() {
        let settings = VocalSettings {
            formant: Some(FormantShiftParams::new(1.3).unwrap()),
            timbre: Some(TimbreParams::new(TimbreKind::Android, 0.5).unwrap()),
            output_gain_db: 0.0,
        };
        let plain = robot_processor(VocalSettings::default()).process("sanctus", &[]).unwrap();
        let colored = robot_processor(settings).process("sanctus", &[]).unwrap();
        assert_eq!(plain.audio.len(), colored.audio.len());
        assert_ne!(plain.audio, colored.audio);
        assert!(colored.degradations.is_empty());
    }

    #[test]
    fn test_unavailable_aligner_aborts_phrase() {
        let mut backends = EngineRegistry::default().select().unwrap();
        backends.aligner = Arc::new(OfflineAligner {
            info: EngineInfo::new("offline", "Offline", EngineKind::Aligner, "never answers"),
        });
        let processor = VocalProcessor::new(
            &backends,
            VocalSettings::default(),
            16000,
            Duration::from_secs(30),
            Duration::from_secs(30),
        );
        let melody = vec![MelodyEvent::new(150.0, 0.5).unwrap()];
        let err = processor.process("kyrie", &melody).unwrap_err();
        assert!(matches!(err, CantorError::EngineUnavailable { .. }), "{:?}", err);
        assert_eq!(err.engine_name(), Some("offline"));

        // Without a melody the aligner is never consulted
        assert!(processor.process("kyrie", &[]).is_ok());
    }
}
