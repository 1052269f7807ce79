//! Duration control
//!
//! Reshapes an utterance so each aligned word lasts a target duration:
//! 1. Align: forced alignment of the audio against its text
//! 2. Map: pair segments with targets in order
//! 3. Stretch: phase-vocoder stretch per segment, then concatenate
//!
//! Audio outside the aligned segments is dropped, so the output lasts the
//! sum of the mapped durations.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::backends::{call_with_timeout, validate_segments, ForcedAligner};
use crate::dsp::pitch::time_stretch;
use crate::engine::buffer::fit_length;
use crate::engine::AudioBuffer;
use crate::error::{CantorError, Result};

pub use crate::backends::AlignedSegment;

/// Stretch factors within this distance of 1 are copied verbatim
pub const STRETCH_TOLERANCE: f64 = 0.01;

/// One segment of an alignment plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedSegment {
    pub text: String,
    pub start_secs: f64,
    pub end_secs: f64,
    pub target_secs: f64,
}

impl PlannedSegment {
    pub fn original_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }

    /// `target / original`, above 1 lengthens
    pub fn stretch(&self) -> f64 {
        if self.original_secs() <= 0.0 {
            return 1.0;
        }
        self.target_secs / self.original_secs()
    }

    /// Whether the segment is copied without stretching
    pub fn is_verbatim(&self) -> bool {
        self.original_secs() <= 0.0
            || self.target_secs <= 0.0
            || (self.stretch() - 1.0).abs() <= STRETCH_TOLERANCE
    }

    /// Duration this segment occupies in the output
    pub fn output_secs(&self) -> f64 {
        if self.is_verbatim() {
            self.original_secs()
        } else {
            self.target_secs
        }
    }
}

/// Segments paired with their target durations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlignmentPlan {
    pub segments: Vec<PlannedSegment>,
}

impl AlignmentPlan {
    /// Pair segments with targets in order
    ///
    /// Segments without a target keep their own duration; targets without
    /// a segment are discarded.
    pub fn map(segments: &[AlignedSegment], targets: &[f64]) -> Self {
        let segments = segments
            .iter()
            .enumerate()
            .map(|(i, seg)| PlannedSegment {
                text: seg.text().to_string(),
                start_secs: seg.start_secs(),
                end_secs: seg.end_secs(),
                target_secs: targets.get(i).copied().unwrap_or_else(|| seg.duration_secs()),
            })
            .collect();
        Self { segments }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_output_secs(&self) -> f64 {
        self.segments.iter().map(|s| s.output_secs()).sum()
    }

    /// Stretch every segment of `audio` and concatenate the results
    pub fn render(&self, audio: &AudioBuffer) -> AudioBuffer {
        let sr = audio.sample_rate as f64;
        let len = audio.len();
        let mut channels: Vec<Vec<f32>> = vec![Vec::new(); audio.channels()];

        for segment in &self.segments {
            let start = ((segment.start_secs * sr).round() as usize).min(len);
            let end = ((segment.end_secs * sr).round() as usize).clamp(start, len);
            let target_len = (segment.target_secs * sr).round() as usize;
            let pieces: Vec<&[f32]> = audio.samples.iter().map(|c| &c[start..end]).collect();

            // Channels share one timing: if any stretch fails, all keep the original
            let stretched = if segment.is_verbatim() || start == end {
                None
            } else {
                let rate = (segment.original_secs() / segment.target_secs) as f32;
                let attempt: Vec<Vec<f32>> = pieces.iter().map(|p| time_stretch(p, rate)).collect();
                if attempt.iter().any(|c| c.is_empty() || c.iter().any(|s| !s.is_finite())) {
                    warn!(segment = %segment.text, "stretch failed, keeping original timing");
                    None
                } else {
                    Some(attempt)
                }
            };

            match stretched {
                Some(stretched) => {
                    for (out, piece) in channels.iter_mut().zip(stretched) {
                        out.extend(fit_length(piece, target_len));
                    }
                }
                None => {
                    for (out, piece) in channels.iter_mut().zip(pieces) {
                        out.extend_from_slice(piece);
                    }
                }
            }
        }

        AudioBuffer {
            samples: channels,
            sample_rate: audio.sample_rate,
        }
    }
}

/// Forced alignment plus per-segment time stretch
#[derive(Clone)]
pub struct DurationAligner {
    aligner: Arc<dyn ForcedAligner>,
    timeout: Duration,
}

impl DurationAligner {
    pub fn new(aligner: Arc<dyn ForcedAligner>, timeout: Duration) -> Self {
        Self { aligner, timeout }
    }

    /// Align `audio` against `text` and pair the segments with `targets`
    pub fn plan(&self, audio: &AudioBuffer, text: &str, targets: &[f64]) -> Result<AlignmentPlan> {
        let aligner = Arc::clone(&self.aligner);
        let engine = aligner.info().id.clone();
        let audio = audio.clone();
        let text = text.to_string();
        let segments = call_with_timeout(&engine, self.timeout, move || aligner.align(&audio, &text))?;
        validate_segments(&segments).map_err(|e| CantorError::stage("duration_control", e))?;
        Ok(AlignmentPlan::map(&segments, targets))
    }

    /// Retime `audio` so its words last `targets`
    ///
    /// When the aligner finds no segments the input passes through unchanged.
    pub fn align(&self, audio: &AudioBuffer, text: &str, targets: &[f64]) -> Result<AudioBuffer> {
        let plan = self.plan(audio, text, targets)?;
        if plan.is_empty() {
            warn!("forced alignment found no segments, skipping duration control");
            return Ok(audio.clone());
        }
        let out = plan.render(audio);
        debug!(
            segments = plan.len(),
            input_secs = audio.duration_secs(),
            output_secs = out.duration_secs(),
            "duration control applied"
        );
        Ok(out)
    }
}
