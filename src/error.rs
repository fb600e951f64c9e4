//! Error kinds produced by the acquisition-and-relay pipeline.
//!
//! Every stage returns a [`PipelineError`] so the HTTP layer can log the
//! precise failure while still collapsing it into one generic response.

use std::{io, path::PathBuf};

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request did not carry a source URL at all.
    #[error("missing source url")]
    MissingUrl,

    /// An upstream provider answered but did not hand back usable media.
    #[error("fetch failed during {stage}: {reason}")]
    Fetch { stage: &'static str, reason: String },

    /// An expected HTML element or JSON field was absent.
    #[error("could not extract `{selector}` during {stage}")]
    ScrapeExtraction {
        stage: &'static str,
        selector: &'static str,
    },

    /// The relay or large-file host answered with a non-success status.
    #[error("upload failed during {stage} with status {status}")]
    Upload {
        stage: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("http request failed during {stage}")]
    Http {
        stage: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} failed for {}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The library file exists but could not be read or rewritten.
    #[error("library io failure at {}", path.display())]
    LibraryIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The library file is not a JSON array of entries.
    #[error("library at {} is corrupt", path.display())]
    LibraryJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("background task failed")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub(crate) fn http(stage: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| Self::Http { stage, source }
    }

    pub(crate) fn io(
        operation: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io {
            operation,
            path,
            source,
        }
    }

    pub(crate) fn fetch(stage: &'static str, reason: impl Into<String>) -> Self {
        Self::Fetch {
            stage,
            reason: reason.into(),
        }
    }
}
