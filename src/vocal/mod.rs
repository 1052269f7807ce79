//! Vocal chain
//!
//! Melody events, duration control, timbre recipes and the processor that
//! strings them together behind the speech engine.

pub mod aligner;
pub mod melody;
pub mod processor;
pub mod timbre;

pub use aligner::{AlignedSegment, AlignmentPlan, DurationAligner, PlannedSegment};
pub use melody::{load_melody_file, MelodyEvent, MelodySource};
pub use processor::{apply_melody_contour, soft_clip, VocalPhrase, VocalProcessor, VocalSettings};
pub use timbre::{TimbreKind, TimbreParams};
