//! Forced alignment
//!
//! `EnergyAligner` finds voiced regions from short-time energy and assigns
//! them to the transcript's words in order, merging across the shortest
//! pauses or splitting the longest regions until the counts agree.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EngineInfo, EngineKind};
use crate::engine::buffer::slice_rms;
use crate::engine::AudioBuffer;
use crate::error::{CantorError, Result};

/// A word and where it sits in the utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedSegment {
    text: String,
    start_secs: f64,
    end_secs: f64,
}

impl AlignedSegment {
    /// Create a segment; the end must lie after the start
    pub fn new(text: impl Into<String>, start_secs: f64, end_secs: f64) -> Result<Self> {
        if !start_secs.is_finite() || start_secs < 0.0 {
            return Err(CantorError::invalid("segment.start_secs", start_secs, "a non-negative time"));
        }
        if !end_secs.is_finite() || end_secs <= start_secs {
            return Err(CantorError::invalid("segment.end_secs", end_secs, "a time after start_secs"));
        }
        Ok(Self {
            text: text.into(),
            start_secs,
            end_secs,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn start_secs(&self) -> f64 {
        self.start_secs
    }

    pub fn end_secs(&self) -> f64 {
        self.end_secs
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// Check segments are time-ordered and non-overlapping
pub fn validate_segments(segments: &[AlignedSegment]) -> Result<()> {
    for pair in segments.windows(2) {
        if pair[1].start_secs < pair[0].end_secs {
            return Err(CantorError::invalid(
                "segments",
                format!("'{}' overlaps '{}'", pair[1].text, pair[0].text),
                "time-ordered, non-overlapping segments",
            ));
        }
    }
    Ok(())
}

/// Forced-alignment collaborator contract
pub trait ForcedAligner: Send + Sync {
    fn info(&self) -> &EngineInfo;

    /// Word segments of `audio` given its transcript; empty is a valid answer
    fn align(&self, audio: &AudioBuffer, text: &str) -> Result<Vec<AlignedSegment>>;
}

/// Energy-based word aligner
pub struct EnergyAligner {
    info: EngineInfo,
    /// Analysis frame in milliseconds
    frame_ms: f32,
    /// Pauses shorter than this are bridged
    min_gap_ms: f32,
    /// Regions shorter than this are discarded
    min_region_ms: f32,
    /// Voicing threshold relative to the loudest frame
    threshold_ratio: f32,
}

impl Default for EnergyAligner {
    fn default() -> Self {
        Self {
            info: EngineInfo::new(
                "energy",
                "Energy Aligner",
                EngineKind::Aligner,
                "Pairs words with voiced regions found from short-time energy",
            ),
            frame_ms: 10.0,
            min_gap_ms: 40.0,
            min_region_ms: 30.0,
            threshold_ratio: 0.05,
        }
    }
}

impl EnergyAligner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Voiced regions as half-open frame ranges
    fn voiced_regions(&self, samples: &[f32], frame: usize) -> Vec<(usize, usize)> {
        let energies: Vec<f32> = samples.chunks(frame).map(slice_rms).collect();
        let loudest = energies.iter().copied().fold(0.0_f32, f32::max);
        let threshold = (loudest * self.threshold_ratio).max(1e-4);

        let mut regions: Vec<(usize, usize)> = Vec::new();
        let mut start = None;
        for (i, &e) in energies.iter().enumerate() {
            match (e > threshold, start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    regions.push((s, i));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            regions.push((s, energies.len()));
        }

        let min_gap = (self.min_gap_ms / self.frame_ms).ceil() as usize;
        let mut bridged: Vec<(usize, usize)> = Vec::new();
        for region in regions {
            match bridged.last_mut() {
                Some(last) if region.0 - last.1 < min_gap => last.1 = region.1,
                _ => bridged.push(region),
            }
        }

        let min_region = (self.min_region_ms / self.frame_ms).ceil() as usize;
        bridged.retain(|(s, e)| e - s >= min_region);
        bridged
    }
}

/// Merge across the shortest pause until at most `count` regions remain
fn merge_to(regions: &mut Vec<(usize, usize)>, count: usize) {
    while regions.len() > count && regions.len() > 1 {
        let idx = (0..regions.len() - 1)
            .min_by_key(|&i| regions[i + 1].0 - regions[i].1)
            .unwrap_or(0);
        regions[idx].1 = regions[idx + 1].1;
        regions.remove(idx + 1);
    }
}

/// Halve the longest region until `count` regions exist or none can split
fn split_to(regions: &mut Vec<(usize, usize)>, count: usize) {
    while regions.len() < count {
        let Some((idx, &(s, e))) = regions.iter().enumerate().max_by_key(|(_, (s, e))| e - s) else {
            return;
        };
        if e - s < 2 {
            return;
        }
        let mid = s + (e - s) / 2;
        regions[idx] = (s, mid);
        regions.insert(idx + 1, (mid, e));
    }
}

impl ForcedAligner for EnergyAligner {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    fn align(&self, audio: &AudioBuffer, text: &str) -> Result<Vec<AlignedSegment>> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() || audio.is_empty() {
            return Ok(Vec::new());
        }

        let mono = audio.to_mono();
        let frame = ((self.frame_ms * 0.001 * audio.sample_rate as f32) as usize).max(1);
        let mut regions = self.voiced_regions(mono.channel(0), frame);
        merge_to(&mut regions, words.len());
        split_to(&mut regions, words.len());
        debug!(words = words.len(), regions = regions.len(), "energy alignment");

        let frame_secs = frame as f64 / audio.sample_rate as f64;
        let total_secs = audio.duration_secs();
        words
            .iter()
            .zip(regions)
            .map(|(word, (s, e))| {
                let start = s as f64 * frame_secs;
                let end = (e as f64 * frame_secs).min(total_secs);
                AlignedSegment::new(*word, start, end)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::tts::{RobotTts, TtsEngine};

    fn bursts(pattern: &[(f32, bool)], sample_rate: u32) -> AudioBuffer {
        let mut samples = Vec::new();
        for &(secs, voiced) in pattern {
            let len = (secs * sample_rate as f32) as usize;
            samples.extend((0..len).map(|i| {
                if voiced {
                    (i as f32 * 0.2).sin() * 0.5
                } else {
                    0.0
                }
            }));
        }
        AudioBuffer::mono(samples, sample_rate)
    }

    #[test]
    fn test_segment_requires_positive_duration() {
        assert!(AlignedSegment::new("a", 1.0, 1.0).is_err());
        assert!(AlignedSegment::new("a", 1.0, 0.5).is_err());
        assert!(AlignedSegment::new("a", 0.0, 0.5).is_ok());
    }

    #[test]
    fn test_overlapping_segments_rejected() {
        let segments = vec![
            AlignedSegment::new("a", 0.0, 0.5).unwrap(),
            AlignedSegment::new("b", 0.4, 0.9).unwrap(),
        ];
        assert!(validate_segments(&segments).is_err());
    }

    #[test]
    fn test_aligns_words_to_bursts() {
        let audio = bursts(&[(0.1, false), (0.3, true), (0.2, false), (0.4, true)], 16000);
        let segments = EnergyAligner::new().align(&audio, "ave maria").unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text(), "ave");
        assert!((segments[0].start_secs() - 0.1).abs() < 0.02);
        assert!((segments[0].duration_secs() - 0.3).abs() < 0.02);
        assert!((segments[1].start_secs() - 0.6).abs() < 0.02);
        assert!(validate_segments(&segments).is_ok());
    }

    #[test]
    fn test_more_words_than_bursts_splits() {
        let audio = bursts(&[(0.8, true)], 16000);
        let segments = EnergyAligner::new().align(&audio, "one two three").unwrap();
        assert_eq!(segments.len(), 3);
    }

    #[test]
    fn test_fewer_words_than_bursts_merges() {
        let audio = bursts(
            &[(0.2, true), (0.1, false), (0.2, true), (0.3, false), (0.2, true)],
            16000,
        );
        let segments = EnergyAligner::new().align(&audio, "gloria patri").unwrap();
        assert_eq!(segments.len(), 2);
        // The shorter pause is bridged first
        assert!((segments[0].end_secs() - 0.5).abs() < 0.02);
    }

    #[test]
    fn test_silence_gives_no_segments() {
        let audio = AudioBuffer::mono(vec![0.0; 16000], 16000);
        assert!(EnergyAligner::new().align(&audio, "amen").unwrap().is_empty());
        assert!(EnergyAligner::new().align(&audio, "").unwrap().is_empty());
    }

    #[test]
    fn test_aligns_robot_speech() {
        let speech = RobotTts::default().synthesize("dona nobis pacem").unwrap();
        let segments = EnergyAligner::new().align(&speech, "dona nobis pacem").unwrap();
        assert_eq!(segments.len(), 3);
        assert!(validate_segments(&segments).is_ok());
    }
}
