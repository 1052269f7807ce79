//! Cantor - Layered Robotic Vocal Renderer
//!
//! Cantor turns text into a stylized, robotic vocal phrase and mixes it with
//! generated ambient layers into a mastered arrangement.
//!
//! # Architecture
//!
//! Components, leaf first:
//! - `dsp`: stateless effects and the primitives they share
//! - `vocal`: duration control, timbre recipes and the vocal processor
//! - `mixer`: vocal layering, stem processing and mastering
//! - `backends`: speech, alignment and ambient engine contracts
//!
//! Rendering is offline: every stage takes a buffer and returns a new one.

pub mod backends;
pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod mixer;
pub mod vocal;

pub use config::RenderConfig;
pub use engine::AudioBuffer;
pub use error::{CantorError, Result, StageDegradation};
pub use mixer::{MixingEngine, SynthesisResult};
