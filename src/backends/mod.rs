//! Collaborator interfaces and built-in engines
//!
//! This module provides:
//! - `TtsEngine`, `ForcedAligner` and `AmbientGenerator` traits
//! - The engine registry with ordered fallback selection
//! - A timeout boundary for engine calls
//! - Deterministic built-in engines so a render needs no external services

pub mod aligner;
pub mod ambient;
pub mod bounded;
pub mod registry;
pub mod tts;

use serde::{Deserialize, Serialize};

pub use aligner::{validate_segments, AlignedSegment, EnergyAligner, ForcedAligner};
pub use ambient::{
    AmbientGenerator, DroneGenerator, Mode, ModeParams, PadGenerator, PercussionGenerator,
};
pub use bounded::call_with_timeout;
pub use registry::{Backends, EngineRegistry};
pub use tts::{RobotTts, RobotVoice, TtsEngine};

/// Role an engine fills in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Tts,
    Aligner,
    Pad,
    Drone,
    Percussion,
}

/// Information about an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    /// Identifier used in configs (e.g., "robot")
    pub id: String,
    /// Human-readable name
    pub name: String,
    pub kind: EngineKind,
    pub description: String,
}

impl EngineInfo {
    pub fn new(id: &str, name: &str, kind: EngineKind, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            description: description.to_string(),
        }
    }
}
