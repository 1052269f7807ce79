//! Text-to-speech engines
//!
//! `RobotTts` is a deterministic formant synthesizer: every syllable is a
//! buzzing glottal source filtered through the two formants of its vowel,
//! with a noise burst for a leading consonant and a short gap between
//! words. It sounds like a vintage vocoder, which suits the robotic voice
//! this crate renders, and its word gaps give the aligner clean boundaries.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EngineInfo, EngineKind};
use crate::dsp::{biquad, BiquadCoeffs, FilterKind};
use crate::engine::buffer::fit_length;
use crate::engine::AudioBuffer;
use crate::error::{CantorError, Result};

/// Text-to-speech collaborator contract
pub trait TtsEngine: Send + Sync {
    /// Get engine info
    fn info(&self) -> &EngineInfo;

    /// Prepare the engine; failure makes the registry try the next candidate
    fn initialize(&mut self) -> Result<()>;

    /// Render `text` as speech
    ///
    /// Fails with `EmptyAudio` when there is nothing to pronounce.
    fn synthesize(&self, text: &str) -> Result<AudioBuffer>;
}

/// Voice settings for the robot synthesizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RobotVoice {
    /// Fundamental at the start of a phrase in Hz
    pub pitch_hz: f32,
    /// Fractional pitch drop across a phrase
    pub declination: f32,
    /// Length of one syllable in milliseconds
    pub syllable_ms: f32,
    /// Silence between words in milliseconds
    pub word_gap_ms: f32,
    /// Native output rate of the engine
    pub sample_rate: u32,
}

impl Default for RobotVoice {
    fn default() -> Self {
        Self {
            pitch_hz: 140.0,
            declination: 0.1,
            syllable_ms: 190.0,
            word_gap_ms: 90.0,
            sample_rate: 48000,
        }
    }
}

impl RobotVoice {
    pub fn validate(&self) -> Result<()> {
        if !(50.0..=800.0).contains(&self.pitch_hz) {
            return Err(CantorError::invalid("voice.pitch_hz", self.pitch_hz, "50 to 800 Hz"));
        }
        if !(0.0..=0.5).contains(&self.declination) {
            return Err(CantorError::invalid("voice.declination", self.declination, "0 to 0.5"));
        }
        if !(40.0..=1000.0).contains(&self.syllable_ms) {
            return Err(CantorError::invalid("voice.syllable_ms", self.syllable_ms, "40 to 1000 ms"));
        }
        if !(0.0..=1000.0).contains(&self.word_gap_ms) {
            return Err(CantorError::invalid("voice.word_gap_ms", self.word_gap_ms, "0 to 1000 ms"));
        }
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(CantorError::invalid(
                "voice.sample_rate",
                self.sample_rate,
                "8000 to 192000 Hz",
            ));
        }
        Ok(())
    }
}

/// First two formant frequencies of a vowel letter
fn vowel_formants(vowel: char) -> (f32, f32) {
    match vowel {
        'a' => (730.0, 1090.0),
        'e' => (530.0, 1840.0),
        'i' | 'y' => (270.0, 2290.0),
        'o' => (570.0, 840.0),
        _ => (300.0, 870.0),
    }
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y')
}

/// Syllable plan: (has leading consonant, nucleus vowel)
fn syllables(word: &str) -> Vec<(bool, char)> {
    let letters: Vec<char> = word
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();
    if letters.is_empty() {
        return Vec::new();
    }

    let mut plan = Vec::new();
    let mut onset = false;
    let mut i = 0;
    while i < letters.len() {
        let c = letters[i];
        if is_vowel(c) {
            plan.push((onset, c));
            onset = false;
            while i < letters.len() && is_vowel(letters[i]) {
                i += 1;
            }
            continue;
        }
        onset = true;
        i += 1;
    }
    if plan.is_empty() {
        // Consonant-only words and numbers are hummed
        plan.push((true, 'u'));
    }
    plan
}

/// Formant-oscillator speech engine
pub struct RobotTts {
    info: EngineInfo,
    voice: RobotVoice,
}

impl RobotTts {
    pub fn new(voice: RobotVoice) -> Self {
        Self::with_id("robot", voice)
    }

    /// Same engine under another id, e.g. a low-rate voice
    pub fn with_id(id: &str, voice: RobotVoice) -> Self {
        Self {
            info: EngineInfo::new(
                id,
                "Robot Formant Voice",
                EngineKind::Tts,
                "Deterministic two-formant vocoder voice",
            ),
            voice,
        }
    }

    pub fn voice(&self) -> &RobotVoice {
        &self.voice
    }

    fn render_syllable(&self, onset: bool, vowel: char, pitch_hz: f32, noise: &mut Pcg64) -> Vec<f32> {
        let sr = self.voice.sample_rate;
        let len = (self.voice.syllable_ms * 0.001 * sr as f32) as usize;
        let onset_len = if onset { (0.025 * sr as f32) as usize } else { 0 };
        let voiced_len = len.saturating_sub(onset_len);

        let mut source = Vec::with_capacity(voiced_len);
        let mut phase = 0.0_f32;
        for _ in 0..voiced_len {
            source.push(2.0 * phase - 1.0);
            phase = (phase + pitch_hz / sr as f32).fract();
        }

        let (f1, f2) = vowel_formants(vowel);
        let c1 = BiquadCoeffs::design(FilterKind::BandPass, sr as f64, f1 as f64, 5.0, 0.0);
        let c2 = BiquadCoeffs::design(FilterKind::BandPass, sr as f64, f2 as f64, 6.0, 0.0);
        let formant1 = biquad(&source, &c1);
        let formant2 = biquad(&source, &c2);

        let attack = (0.01 * sr as f32).max(1.0);
        let release = (0.03 * sr as f32).max(1.0);
        let mut out: Vec<f32> = Vec::with_capacity(len);
        if onset_len > 0 {
            let burst: Vec<f32> = (0..onset_len).map(|_| noise.gen_range(-0.3..0.3)).collect();
            let hp = BiquadCoeffs::design(FilterKind::HighPass, sr as f64, 2000.0, 0.7, 0.0);
            out.extend(biquad(&burst, &hp));
        }
        out.extend((0..voiced_len).map(|i| {
            let env = (i as f32 / attack).min(1.0) * ((voiced_len - i) as f32 / release).min(1.0);
            (formant1[i] + 0.5 * formant2[i]) * env
        }));
        fit_length(out, len)
    }
}

impl Default for RobotTts {
    fn default() -> Self {
        Self::new(RobotVoice::default())
    }
}

impl TtsEngine for RobotTts {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    fn initialize(&mut self) -> Result<()> {
        self.voice.validate()
    }

    fn synthesize(&self, text: &str) -> Result<AudioBuffer> {
        let words: Vec<Vec<(bool, char)>> = text
            .split_whitespace()
            .map(syllables)
            .filter(|s| !s.is_empty())
            .collect();
        let total: usize = words.iter().map(|w| w.len()).sum();
        if total == 0 {
            return Err(CantorError::EmptyAudio {
                stage: "synthesis".to_string(),
            });
        }

        let sr = self.voice.sample_rate;
        let gap = vec![0.0_f32; (self.voice.word_gap_ms * 0.001 * sr as f32) as usize];
        let seed = text.bytes().fold(0xcbf29ce484222325_u64, |h, b| {
            (h ^ b as u64).wrapping_mul(0x100000001b3)
        });
        // Consonant noise is seeded from the text so a phrase always sounds the same
        let mut noise = Pcg64::seed_from_u64(seed);

        let mut samples = Vec::new();
        let mut index = 0;
        for (w, word) in words.iter().enumerate() {
            if w > 0 {
                samples.extend_from_slice(&gap);
            }
            for &(onset, vowel) in word {
                let progress = index as f32 / total as f32;
                let pitch = self.voice.pitch_hz * (1.0 - self.voice.declination * progress);
                samples.extend(self.render_syllable(onset, vowel, pitch, &mut noise));
                index += 1;
            }
        }

        let buffer = AudioBuffer::mono(samples, sr).normalized(0.8);
        debug!(
            engine = %self.info.id,
            words = words.len(),
            syllables = total,
            secs = buffer.duration_secs(),
            "synthesized speech"
        );
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syllable_plan() {
        assert_eq!(syllables("cantor"), vec![(true, 'a'), (true, 'o')]);
        assert_eq!(syllables("aria"), vec![(false, 'a'), (true, 'i')]);
        assert_eq!(syllables("hmm"), vec![(true, 'u')]);
        assert!(syllables("...").is_empty());
    }

    #[test]
    fn test_synthesis_length_tracks_syllables() {
        let tts = RobotTts::default();
        let one = tts.synthesize("la").unwrap();
        let three = tts.synthesize("la la la").unwrap();
        assert!(three.len() > 2 * one.len());
        assert_eq!(one.sample_rate, 48000);
        assert!(!one.is_silent());
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let tts = RobotTts::default();
        assert_eq!(tts.synthesize("kyrie eleison").unwrap(), tts.synthesize("kyrie eleison").unwrap());
    }

    #[test]
    fn test_empty_text_is_empty_audio() {
        let tts = RobotTts::default();
        for text in ["", "   ", "\n\t", "?!"] {
            assert!(matches!(tts.synthesize(text), Err(CantorError::EmptyAudio { .. })));
        }
    }

    #[test]
    fn test_initialize_validates_voice() {
        let mut tts = RobotTts::new(RobotVoice {
            pitch_hz: 10.0,
            ..RobotVoice::default()
        });
        assert!(tts.initialize().is_err());
        assert!(RobotTts::default().initialize().is_ok());
    }

    #[test]
    fn test_native_rate_is_respected() {
        let tts = RobotTts::new(RobotVoice {
            sample_rate: 16000,
            ..RobotVoice::default()
        });
        let out = tts.synthesize("sanctus").unwrap();
        assert_eq!(out.sample_rate, 16000);
    }
}
