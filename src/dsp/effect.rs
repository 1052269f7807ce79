//! Effect trait definition
//!
//! Base trait for all buffer transforms. Effects are pure: `apply` borrows
//! its input and returns a new buffer, so one parameter set can be shared
//! across worker threads.

use crate::engine::AudioBuffer;
use crate::error::{CantorError, Result};

/// Position of an effect in the fixed processing order (lower runs first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EffectPosition {
    Filter = 0,
    Glitch = 1,
    Saturation = 2,
    Chorus = 3,
    Delay = 4,
    SpectralFreeze = 5,
    Reverb = 6,
    Master = 7,
}

/// Base trait for all DSP effects
pub trait Effect: Send + Sync + std::fmt::Debug {
    /// Get the effect type identifier
    fn effect_type(&self) -> &'static str;

    /// Where the effect sits in the processing order
    fn position(&self) -> EffectPosition;

    /// Transform a buffer, returning the processed copy
    fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer>;

    /// Clone the effect into a boxed trait object
    fn box_clone(&self) -> Box<dyn Effect>;
}

impl Clone for Box<dyn Effect> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Reject a value outside the inclusive range `[min, max]`
pub(crate) fn ensure_range(field: &str, value: f32, min: f32, max: f32) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(CantorError::invalid(
            field,
            value,
            &format!("{} to {}", min, max),
        ));
    }
    Ok(())
}

/// Reject a value outside the half-open range `[min, max)`
pub(crate) fn ensure_below(field: &str, value: f32, min: f32, max: f32) -> Result<()> {
    if !value.is_finite() || value < min || value >= max {
        return Err(CantorError::invalid(
            field,
            value,
            &format!("{} to below {}", min, max),
        ));
    }
    Ok(())
}

/// Number of samples covering `ms` milliseconds at `sample_rate`
#[inline]
pub(crate) fn ms_to_samples(ms: f32, sample_rate: u32) -> usize {
    (ms as f64 * sample_rate as f64 / 1000.0).round() as usize
}

/// Generate the deserialization path for a validated parameter record.
///
/// The parameter struct keeps its fields private and names the generated raw
/// mirror in `#[serde(try_from = "...")]`, so every config value passes
/// through `validate` before a record exists. Missing fields fall back to the
/// record's `Default`.
#[macro_export]
macro_rules! validated_params {
    ($name:ident, $raw:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, serde::Deserialize)]
        #[serde(default, deny_unknown_fields)]
        pub struct $raw {
            $( $field: $ty, )*
        }

        impl Default for $raw {
            fn default() -> Self {
                let defaults = <$name as Default>::default();
                $raw {
                    $( $field: defaults.$field, )*
                }
            }
        }

        impl TryFrom<$raw> for $name {
            type Error = $crate::error::CantorError;

            fn try_from(raw: $raw) -> $crate::error::Result<Self> {
                let params = $name {
                    $( $field: raw.$field, )*
                };
                params.validate()?;
                Ok(params)
            }
        }
    };
}

/// Helper macro to implement the common Effect trait methods
#[macro_export]
macro_rules! impl_effect_common {
    ($effect_type:expr, $position:expr) => {
        fn effect_type(&self) -> &'static str {
            $effect_type
        }

        fn position(&self) -> $crate::dsp::EffectPosition {
            $position
        }

        fn box_clone(&self) -> Box<dyn $crate::dsp::Effect> {
            Box::new(self.clone())
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_position_ordering() {
        assert!(EffectPosition::Filter < EffectPosition::Saturation);
        assert!(EffectPosition::Saturation < EffectPosition::Chorus);
        assert!(EffectPosition::Delay < EffectPosition::Reverb);
        assert!(EffectPosition::Reverb < EffectPosition::Master);
    }

    #[test]
    fn test_ensure_range() {
        assert!(ensure_range("mix", 0.5, 0.0, 1.0).is_ok());
        assert!(ensure_range("mix", 1.5, 0.0, 1.0).is_err());
        assert!(ensure_range("mix", f32::NAN, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_ensure_below_rejects_upper_bound() {
        assert!(ensure_below("feedback", 0.99, 0.0, 1.0).is_ok());
        assert!(ensure_below("feedback", 1.0, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_ms_to_samples() {
        assert_eq!(ms_to_samples(10.0, 48000), 480);
    }
}
