//! DSP Effects Library
//!
//! Stateless buffer transforms and the shared primitives they are built on.
//! Every effect is a validated parameter record implementing [`Effect`]:
//! `apply` borrows a buffer and returns a new one, and zero-length input
//! yields zero-length output.

pub mod analysis;
pub mod chain;
mod chorus;
mod delay;
mod dynamics;
mod effect;
mod filter;
mod formant;
mod glitch;
pub mod pitch;
mod reverb;
mod saturation;
pub mod spectral;

pub use chain::{run_optional_stage, EffectChain, Stage, StemEffects, STAGE_ORDER};
pub use chorus::ChorusParams;
pub use delay::DelayParams;
pub use dynamics::{CompressorParams, LimiterParams, MasterDynamicsParams};
pub use effect::{Effect, EffectPosition};
pub(crate) use effect::{ensure_range, ms_to_samples};
pub use filter::{biquad, filtfilt, one_pole_lowpass, BiquadCoeffs, FilterKind, FilterParams};
pub use formant::FormantShiftParams;
pub use glitch::{GlitchMode, GlitchParams};
pub use reverb::ReverbParams;
pub use saturation::SaturationParams;
pub use spectral::{SpectralFreezeParams, Stft};
