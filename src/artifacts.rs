//! Artifact files (screenshot, CSV, PDF) produced by report runs.
//!
//! Execution log entries only record paths; the bytes live wherever the
//! renderer wrote them. An [`ArtifactStore`] resolves those paths.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::HistoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Screenshot,
    Csv,
    Pdf,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [ArtifactKind::Screenshot, ArtifactKind::Csv, ArtifactKind::Pdf];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "screenshot",
            ArtifactKind::Csv => "csv",
            ArtifactKind::Pdf => "pdf",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "image/png",
            ArtifactKind::Csv => "text/csv",
            ArtifactKind::Pdf => "application/pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "png",
            ArtifactKind::Csv => "csv",
            ArtifactKind::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "screenshot" => Ok(ArtifactKind::Screenshot),
            "csv" => Ok(ArtifactKind::Csv),
            "pdf" => Ok(ArtifactKind::Pdf),
            other => Err(HistoryError::invalid(format!(
                "invalid file type '{other}', expected screenshot, csv or pdf"
            ))),
        }
    }
}

/// Resolves recorded artifact paths to bytes.
pub trait ArtifactStore {
    fn exists(&self, path: &str) -> bool;

    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
}

/// Artifacts on the local filesystem. Relative paths are resolved against
/// `root` when one is configured.
#[derive(Debug, Clone, Default)]
pub struct FsArtifactStore {
    root: Option<PathBuf>,
}

impl FsArtifactStore {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(path))
    }
}

/// Suggested download name: the last component of the stored path.
pub fn suggested_filename(path: &str, kind: ArtifactKind, log_id: i64) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("report-{log_id}.{}", kind.extension()))
}
