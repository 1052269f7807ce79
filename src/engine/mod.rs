//! Audio engine plumbing: buffers, WAV I/O and render manifests

pub mod buffer;
pub mod io;
pub mod manifest;

pub use buffer::{
    db_to_linear, linear_to_db, AudioBuffer, ChannelLayout, DEFAULT_SAMPLE_RATE, STEM_PEAK,
};
pub use io::{export_wav, generate_test_tone, read_wav, resample, ExportFormat};
pub use manifest::{RenderManifest, StemEntry};
