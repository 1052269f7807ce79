//! Ambient layer generators
//!
//! Procedural pads, drones and percussion voiced in a liturgical mode.
//! Each generator is a plain function of duration, mode and sample rate;
//! percussion noise comes from a seeded RNG.

use std::f32::consts::PI;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EngineInfo, EngineKind};
use crate::dsp::one_pole_lowpass;
use crate::engine::AudioBuffer;
use crate::error::{CantorError, Result};

/// Church modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Ionian,
    #[default]
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Aeolian,
    Locrian,
}

impl Mode {
    /// Semitone offsets of the seven scale degrees above the final
    pub fn intervals(&self) -> [u8; 7] {
        const IONIAN: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];
        let rotation = match self {
            Mode::Ionian => 0,
            Mode::Dorian => 1,
            Mode::Phrygian => 2,
            Mode::Lydian => 3,
            Mode::Mixolydian => 4,
            Mode::Aeolian => 5,
            Mode::Locrian => 6,
        };
        let base = IONIAN[rotation];
        let mut out = [0u8; 7];
        for (i, slot) in out.iter_mut().enumerate() {
            let step = IONIAN[(rotation + i) % 7];
            *slot = (step + 12 - base) % 12;
        }
        out
    }

    /// Frequency of scale `degree` (0-based, may exceed an octave) above `root_hz`
    pub fn degree_hz(&self, root_hz: f32, degree: usize) -> f32 {
        let octave = (degree / 7) as f32;
        let semitones = self.intervals()[degree % 7] as f32 + 12.0 * octave;
        root_hz * 2.0_f32.powf(semitones / 12.0)
    }
}

/// Musical context handed to ambient generators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeParams {
    pub mode: Mode,
    /// Final (tonic) of the mode in Hz
    pub root_hz: f32,
    /// Multiplier on the base pulse of 72 beats per minute
    pub tempo_scale: f32,
    pub seed: Option<u64>,
}

impl Default for ModeParams {
    fn default() -> Self {
        Self {
            mode: Mode::Dorian,
            root_hz: 146.83,
            tempo_scale: 1.0,
            seed: None,
        }
    }
}

/// Ambient generator collaborator contract
pub trait AmbientGenerator: Send + Sync {
    fn info(&self) -> &EngineInfo;

    /// Generate `duration_secs` of audio at `sample_rate`
    fn generate(&self, duration_secs: f32, mode: &ModeParams, sample_rate: u32) -> Result<AudioBuffer>;
}

fn sample_count(duration_secs: f32, sample_rate: u32) -> Result<usize> {
    if !duration_secs.is_finite() || duration_secs < 0.0 {
        return Err(CantorError::invalid(
            "duration_secs",
            duration_secs,
            "a non-negative number of seconds",
        ));
    }
    Ok((duration_secs as f64 * sample_rate as f64).round() as usize)
}

/// Linear fade-in and fade-out envelope
fn swell(i: usize, len: usize, fade: usize) -> f32 {
    let fade = fade.min(len / 2).max(1);
    let rise = (i as f32 / fade as f32).min(1.0);
    let fall = ((len - i) as f32 / fade as f32).min(1.0);
    rise * fall
}

// ============================================================================
// Pads
// ============================================================================

/// Detuned saw triad on the mode's first, third and fifth degrees
pub struct PadGenerator {
    info: EngineInfo,
}

impl Default for PadGenerator {
    fn default() -> Self {
        Self {
            info: EngineInfo::new(
                "pad",
                "Modal Pad",
                EngineKind::Pad,
                "Detuned saw triad, lowpassed, with a slow swell",
            ),
        }
    }
}

impl AmbientGenerator for PadGenerator {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    fn generate(&self, duration_secs: f32, mode: &ModeParams, sample_rate: u32) -> Result<AudioBuffer> {
        let len = sample_count(duration_secs, sample_rate)?;
        let sr = sample_rate as f32;
        let voices: Vec<f32> = [0, 2, 4]
            .iter()
            .flat_map(|&degree| {
                let f = mode.mode.degree_hz(mode.root_hz, degree);
                [f * 0.997, f, f * 1.003]
            })
            .collect();

        let mut phases = vec![0.0_f32; voices.len()];
        let raw: Vec<f32> = (0..len)
            .map(|_| {
                let mut sum = 0.0;
                for (phase, f) in phases.iter_mut().zip(&voices) {
                    sum += 2.0 * *phase - 1.0;
                    *phase = (*phase + f / sr).fract();
                }
                sum / voices.len() as f32
            })
            .collect();

        let fade = (1.5 * sr) as usize;
        let samples: Vec<f32> = one_pole_lowpass(&raw, 1200.0_f32.min(sr * 0.45), sample_rate)
            .into_iter()
            .enumerate()
            .map(|(i, s)| s * swell(i, len, fade))
            .collect();
        debug!(samples = len, mode = ?mode.mode, "pad generated");
        Ok(AudioBuffer::mono(samples, sample_rate))
    }
}

// ============================================================================
// Drones
// ============================================================================

/// Sub-octave final and fifth with a slow breathing amplitude
pub struct DroneGenerator {
    info: EngineInfo,
}

impl Default for DroneGenerator {
    fn default() -> Self {
        Self {
            info: EngineInfo::new(
                "drone",
                "Modal Drone",
                EngineKind::Drone,
                "Low final and fifth with odd harmonics and slow breathing",
            ),
        }
    }
}

impl AmbientGenerator for DroneGenerator {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    fn generate(&self, duration_secs: f32, mode: &ModeParams, sample_rate: u32) -> Result<AudioBuffer> {
        let len = sample_count(duration_secs, sample_rate)?;
        let sr = sample_rate as f32;
        let root = mode.root_hz / 2.0;
        let fifth = mode.mode.degree_hz(root, 4);
        let fade = (2.0 * sr) as usize;

        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / sr;
                let tone = |f: f32| {
                    (2.0 * PI * f * t).sin() + 0.3 * (2.0 * PI * 3.0 * f * t).sin() + 0.1 * (2.0 * PI * 5.0 * f * t).sin()
                };
                let breath = 0.8 + 0.2 * (2.0 * PI * 0.1 * t).sin();
                (tone(root) * 0.6 + tone(fifth) * 0.4) * breath * swell(i, len, fade) * 0.5
            })
            .collect();
        debug!(samples = len, "drone generated");
        Ok(AudioBuffer::mono(samples, sample_rate))
    }
}

// ============================================================================
// Percussion
// ============================================================================

/// Low thumps on the beat and filtered noise ticks off the beat
pub struct PercussionGenerator {
    info: EngineInfo,
}

/// Pulse at `tempo_scale = 1`
pub const BASE_BPM: f32 = 72.0;

impl Default for PercussionGenerator {
    fn default() -> Self {
        Self {
            info: EngineInfo::new(
                "percussion",
                "Frame Drum",
                EngineKind::Percussion,
                "Pitched thumps on the beat, noise ticks between beats",
            ),
        }
    }
}

impl AmbientGenerator for PercussionGenerator {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    fn generate(&self, duration_secs: f32, mode: &ModeParams, sample_rate: u32) -> Result<AudioBuffer> {
        let len = sample_count(duration_secs, sample_rate)?;
        let sr = sample_rate as f32;
        if !(mode.tempo_scale.is_finite() && mode.tempo_scale > 0.0) {
            return Err(CantorError::invalid("tempo_scale", mode.tempo_scale, "a positive factor"));
        }
        let beat = ((60.0 / (BASE_BPM * mode.tempo_scale)) * sr) as usize;
        let beat = beat.max(1);
        let mut rng = Pcg64::seed_from_u64(mode.seed.unwrap_or(0));
        let mut samples = vec![0.0_f32; len];

        let thump_len = (0.25 * sr) as usize;
        let tick_len = (0.06 * sr) as usize;
        let mut start = 0;
        while start < len {
            let accent = rng.gen_range(0.7..1.0_f32);
            for i in 0..thump_len.min(len - start) {
                let t = i as f32 / sr;
                let pitch = mode.root_hz / 2.0 * (1.0 + 0.5 * (-t * 30.0).exp());
                samples[start + i] += accent * (2.0 * PI * pitch * t).sin() * (-t / 0.15).exp();
            }

            let off = start + beat / 2;
            if off < len {
                let noise: Vec<f32> = (0..tick_len.min(len - off))
                    .map(|_| rng.gen_range(-1.0..1.0_f32))
                    .collect();
                let filtered = one_pole_lowpass(&noise, 4000.0_f32.min(sr * 0.45), sample_rate);
                for (i, n) in filtered.iter().enumerate() {
                    let t = i as f32 / sr;
                    samples[off + i] += 0.3 * accent * n * (-t / 0.04).exp();
                }
            }
            start += beat;
        }

        debug!(samples = len, beat, "percussion generated");
        Ok(AudioBuffer::mono(samples, sample_rate))
    }
}
