//! Scoped storage for a downloaded match result.
//!
//! A result is staged in a temporary file that lives exactly as long as its
//! `DownloadHandle`. `DownloadSlot` keeps at most one handle and releases the
//! old one before staging a new one.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::api::disposition::DEFAULT_RESULT_FILENAME;
use crate::api::MatchResult;

/// A staged result. The temp file is deleted when the handle is dropped.
#[derive(Debug)]
pub struct DownloadHandle {
    file: NamedTempFile,
    filename: String,
    content_type: Option<String>,
    len: usize,
}

impl DownloadHandle {
    fn create(result: MatchResult) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("xlsxmatch-")
            .suffix(".download")
            .tempfile()?;
        file.write_all(&result.payload)?;
        file.flush()?;

        Ok(Self {
            file,
            filename: result.filename,
            content_type: result.content_type,
            len: result.payload.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the payload to `dir/<filename>` and return the new path
    pub fn persist_into(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let target = dir.join(safe_filename(&self.filename));
        std::fs::copy(self.file.path(), &target)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        Ok(target)
    }
}

/// Final path component of a server-suggested name
fn safe_filename(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .unwrap_or(DEFAULT_RESULT_FILENAME)
        .to_string()
}

/// Holds the current downloadable result, if any
#[derive(Debug, Default)]
pub struct DownloadSlot {
    current: Option<DownloadHandle>,
}

impl DownloadSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a new result, releasing the previous one first
    pub fn acquire(&mut self, result: MatchResult) -> std::io::Result<&DownloadHandle> {
        self.release();
        let handle = DownloadHandle::create(result)?;
        debug!(path = %handle.path().display(), bytes = handle.len(), "Download staged");
        Ok(self.current.insert(handle))
    }

    pub fn release(&mut self) {
        if let Some(handle) = self.current.take() {
            debug!(path = %handle.path().display(), "Download released");
        }
    }

    pub fn current(&self) -> Option<&DownloadHandle> {
        self.current.as_ref()
    }
}
