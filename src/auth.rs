//! Session cookie used when scraping source pages for their metadata title.
//!
//! The cookie is read once at startup and then shared read-only with the
//! fetchers that need it.

use std::{fs, io, path::Path};

use anyhow::{Context, Result};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCookie {
    header: Option<String>,
}

impl SessionCookie {
    pub fn new(header: impl Into<String>) -> Self {
        let header = header.into().trim().to_string();
        Self {
            header: (!header.is_empty()).then_some(header),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Reads the raw `Cookie` header value from `path`. A missing file means
    /// the scrape runs without a session.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => {
                let cookie = Self::new(raw);
                if cookie.header.is_none() {
                    warn!(path = %path.display(), "cookie file is empty");
                }
                Ok(cookie)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "cookie file not found, scraping anonymously");
                Ok(Self::anonymous())
            }
            Err(err) => Err(err).with_context(|| format!("Reading {}", path.display())),
        }
    }

    pub fn header_value(&self) -> Option<&str> {
        self.header.as_deref()
    }
}
