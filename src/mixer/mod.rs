//! Multi-stem mixing
//!
//! Vocal layering and the engine that renders, processes, sums and masters
//! the stems of a render.

pub mod engine;
pub mod layering;

pub use engine::{MixingEngine, Stem, StemKind, SynthesisResult};
pub use layering::{derive_seed, stack_layers, LayerVariation};
