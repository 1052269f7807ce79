//! Melody events
//!
//! A melody is an ordered list of `(pitch_hz, duration_secs)` events given
//! inline in the render config or as a JSON file holding the same list.
//! A non-positive pitch is a rest.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CantorError, Result};

/// One note of the target contour
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMelodyEvent")]
pub struct MelodyEvent {
    pitch_hz: f32,
    duration_secs: f32,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMelodyEvent {
    pitch_hz: f32,
    duration_secs: f32,
}

impl TryFrom<RawMelodyEvent> for MelodyEvent {
    type Error = CantorError;

    fn try_from(raw: RawMelodyEvent) -> Result<Self> {
        MelodyEvent::new(raw.pitch_hz, raw.duration_secs)
    }
}

impl MelodyEvent {
    /// Create an event; the duration must be positive
    pub fn new(pitch_hz: f32, duration_secs: f32) -> Result<Self> {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(CantorError::invalid(
                "melody.duration_secs",
                duration_secs,
                "a positive number of seconds",
            ));
        }
        if !pitch_hz.is_finite() {
            return Err(CantorError::invalid("melody.pitch_hz", pitch_hz, "a finite frequency"));
        }
        Ok(Self {
            pitch_hz,
            duration_secs,
        })
    }

    pub fn rest(duration_secs: f32) -> Result<Self> {
        Self::new(0.0, duration_secs)
    }

    pub fn pitch_hz(&self) -> f32 {
        self.pitch_hz
    }

    pub fn duration_secs(&self) -> f32 {
        self.duration_secs
    }

    pub fn is_rest(&self) -> bool {
        self.pitch_hz <= 0.0
    }
}

/// Total length of a melody in seconds
pub fn total_secs(melody: &[MelodyEvent]) -> f64 {
    melody.iter().map(|e| e.duration_secs as f64).sum()
}

/// Per-event durations, used as duration-control targets
pub fn durations(melody: &[MelodyEvent]) -> Vec<f64> {
    melody.iter().map(|e| e.duration_secs as f64).collect()
}

/// Where a melody comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MelodySource {
    Inline(Vec<MelodyEvent>),
    File(PathBuf),
}

impl MelodySource {
    /// Resolve to events; relative file paths are taken from `base_dir`
    pub fn load(&self, base_dir: Option<&Path>) -> Result<Vec<MelodyEvent>> {
        match self {
            MelodySource::Inline(events) => Ok(events.clone()),
            MelodySource::File(path) => {
                let path = match base_dir {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path.clone(),
                };
                load_melody_file(&path)
            }
        }
    }
}

/// Read a JSON melody file: a list of `{"pitch_hz", "duration_secs"}` objects
pub fn load_melody_file(path: &Path) -> Result<Vec<MelodyEvent>> {
    let json = std::fs::read_to_string(path)?;
    let events: Vec<MelodyEvent> = serde_json::from_str(&json)?;
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_duration_must_be_positive() {
        assert!(MelodyEvent::new(220.0, 0.0).is_err());
        assert!(MelodyEvent::new(220.0, -0.5).is_err());
        assert!(MelodyEvent::new(220.0, f32::NAN).is_err());
        assert!(MelodyEvent::new(220.0, 0.5).is_ok());
    }

    #[test]
    fn test_rests() {
        assert!(MelodyEvent::rest(0.25).unwrap().is_rest());
        assert!(MelodyEvent::new(-1.0, 0.25).unwrap().is_rest());
        assert!(!MelodyEvent::new(196.0, 0.25).unwrap().is_rest());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Vec<MelodyEvent> =
            serde_json::from_str(r#"[{"pitch_hz": 220, "duration_secs": 0.5}]"#).unwrap();
        assert_eq!(ok.len(), 1);
        let bad: std::result::Result<Vec<MelodyEvent>, _> =
            serde_json::from_str(r#"[{"pitch_hz": 220, "duration_secs": 0}]"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_source_inline_and_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("chant.json"),
            r#"[{"pitch_hz": 146.8, "duration_secs": 0.5}, {"pitch_hz": 0, "duration_secs": 0.25}]"#,
        )
        .unwrap();

        let file: MelodySource = serde_json::from_str(r#""chant.json""#).unwrap();
        let events = file.load(Some(dir.path())).unwrap();
        assert_eq!(events.len(), 2);
        assert_relative_eq!(total_secs(&events), 0.75, epsilon = 1e-6);

        let inline: MelodySource =
            serde_json::from_str(r#"[{"pitch_hz": 220, "duration_secs": 1.0}]"#).unwrap();
        assert_eq!(inline.load(None).unwrap().len(), 1);
    }
}
