//! Render manifest
//!
//! A JSON sidecar written next to the rendered files recording what was
//! produced, when, and a SHA-256 checksum of each file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;

/// One written audio file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StemEntry {
    pub name: String,
    pub path: PathBuf,
    pub duration_secs: f64,
    pub sha256: String,
}

/// Record of a finished render
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderManifest {
    pub render_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub seed: Option<u64>,
    pub files: Vec<StemEntry>,
    /// Stages that failed and were bypassed during the render
    pub degradations: Vec<String>,
}

impl RenderManifest {
    pub fn new(render_id: Uuid, sample_rate: u32, bit_depth: u16, seed: Option<u64>) -> Self {
        Self {
            render_id,
            created_at: Utc::now(),
            sample_rate,
            bit_depth,
            seed,
            files: Vec::new(),
            degradations: Vec::new(),
        }
    }

    /// Checksum a written file and append it to the manifest
    pub fn record(&mut self, name: &str, path: &Path, duration_secs: f64) -> Result<()> {
        let sha256 = file_sha256(path)?;
        self.files.push(StemEntry {
            name: name.to_string(),
            path: path.to_path_buf(),
            duration_secs,
            sha256,
        });
        Ok(())
    }

    /// Write the manifest as pretty-printed JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Hex-encoded SHA-256 of a file's contents
pub fn file_sha256(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}
