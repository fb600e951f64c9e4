//! Append-only JSON library of every successfully relayed source.
//!
//! The whole array lives in one pretty-printed file. Each append re-reads the
//! file, pushes the new entry and atomically replaces the file, so readers
//! never observe a half-written document.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Success,
}

/// One processed request, exactly as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    /// Final shareable URL on the relay or large-file host.
    pub url: String,
    /// File name the media was published under.
    pub src: String,
    pub title: String,
    #[serde(rename = "ytLink", alias = "sourceUrl")]
    pub source_url: String,
    pub status: EntryStatus,
}

pub struct LibraryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LibraryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every entry in insertion order. A library that was never
    /// written is empty rather than an error.
    pub fn load(&self) -> PipelineResult<Vec<LibraryEntry>> {
        read_entries(&self.path)
    }

    /// Appends `entry` and returns the new number of entries.
    pub fn append(&self, entry: &LibraryEntry) -> PipelineResult<usize> {
        let _guard = self.write_lock.lock();
        let mut entries = read_entries(&self.path)?;
        entries.push(entry.clone());
        write_json_atomic(&self.path, &entries)?;
        Ok(entries.len())
    }
}

fn read_entries(path: &Path) -> PipelineResult<Vec<LibraryEntry>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PipelineError::LibraryIo {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).map_err(|source| PipelineError::LibraryJson {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    let library_io = |source: io::Error| PipelineError::LibraryIo {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(library_io)?;
    }
    let tmp_path = path.with_extension("tmp");
    let payload = serde_json::to_vec_pretty(value).map_err(|source| PipelineError::LibraryJson {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(&tmp_path, payload).map_err(library_io)?;
    fs::rename(&tmp_path, path).map_err(library_io)?;
    Ok(())
}
