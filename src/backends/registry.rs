//! Engine registry
//!
//! Holds the ordered TTS candidates and the aligner and ambient engines.
//! Selection initializes candidates in order and keeps the first that
//! comes up.

use std::sync::Arc;

use tracing::{info, warn};

use super::aligner::{EnergyAligner, ForcedAligner};
use super::ambient::{AmbientGenerator, DroneGenerator, PadGenerator, PercussionGenerator};
use super::tts::{RobotTts, RobotVoice, TtsEngine};
use super::EngineInfo;
use crate::error::{CantorError, Result};

/// Engines a render runs with, after selection
#[derive(Clone)]
pub struct Backends {
    pub tts: Arc<dyn TtsEngine>,
    pub aligner: Arc<dyn ForcedAligner>,
    pub pads: Arc<dyn AmbientGenerator>,
    pub drones: Arc<dyn AmbientGenerator>,
    pub percussion: Arc<dyn AmbientGenerator>,
}

/// Registry of available engines
pub struct EngineRegistry {
    tts: Vec<Box<dyn TtsEngine>>,
    aligner: Arc<dyn ForcedAligner>,
    pads: Arc<dyn AmbientGenerator>,
    drones: Arc<dyn AmbientGenerator>,
    percussion: Arc<dyn AmbientGenerator>,
}

impl EngineRegistry {
    /// Registry with no TTS candidates and the built-in aligner and generators
    pub fn new() -> Self {
        Self {
            tts: Vec::new(),
            aligner: Arc::new(EnergyAligner::new()),
            pads: Arc::new(PadGenerator::default()),
            drones: Arc::new(DroneGenerator::default()),
            percussion: Arc::new(PercussionGenerator::default()),
        }
    }

    /// Registry with the built-in robot voice and its low-rate variant
    pub fn with_defaults(voice: RobotVoice) -> Self {
        let mut registry = Self::new();
        let lofi = RobotVoice {
            sample_rate: 16000,
            ..voice.clone()
        };
        registry.register_tts(Box::new(RobotTts::new(voice)));
        registry.register_tts(Box::new(RobotTts::with_id("robot-lofi", lofi)));
        registry
    }

    /// Append a TTS candidate; earlier candidates are tried first
    pub fn register_tts(&mut self, engine: Box<dyn TtsEngine>) {
        self.tts.push(engine);
    }

    pub fn set_aligner(&mut self, aligner: Arc<dyn ForcedAligner>) {
        self.aligner = aligner;
    }

    /// Move the named candidates to the front, in the given order
    ///
    /// Names not registered are ignored; the rest keep their relative order.
    pub fn prefer(&mut self, ids: &[String]) {
        let mut ordered: Vec<Box<dyn TtsEngine>> = Vec::with_capacity(self.tts.len());
        for id in ids {
            if let Some(pos) = self.tts.iter().position(|e| &e.info().id == id) {
                ordered.push(self.tts.remove(pos));
            } else {
                warn!(engine = %id, "preferred TTS engine is not registered");
            }
        }
        ordered.append(&mut self.tts);
        self.tts = ordered;
    }

    /// TTS candidates in selection order
    pub fn tts_candidates(&self) -> Vec<&EngineInfo> {
        self.tts.iter().map(|e| e.info()).collect()
    }

    /// Every registered engine, TTS candidates first
    pub fn describe(&self) -> Vec<&EngineInfo> {
        let mut all = self.tts_candidates();
        all.push(self.aligner.info());
        all.push(self.pads.info());
        all.push(self.drones.info());
        all.push(self.percussion.info());
        all
    }

    /// Initialize TTS candidates in order and keep the first that succeeds
    pub fn select(self) -> Result<Backends> {
        let mut failures = Vec::new();
        for mut engine in self.tts {
            let id = engine.info().id.clone();
            match engine.initialize() {
                Ok(()) => {
                    info!(engine = %id, "TTS engine selected");
                    return Ok(Backends {
                        tts: Arc::from(engine),
                        aligner: self.aligner,
                        pads: self.pads,
                        drones: self.drones,
                        percussion: self.percussion,
                    });
                }
                Err(e) => {
                    warn!(engine = %id, error = %e, "TTS engine failed to initialize");
                    failures.push(format!("{}: {}", id, e));
                }
            }
        }

        let reason = if failures.is_empty() {
            "no TTS engines registered".to_string()
        } else {
            failures.join("; ")
        };
        Err(CantorError::EngineUnavailable {
            engine: "tts".to_string(),
            reason,
        })
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::with_defaults(RobotVoice::default())
    }
}
