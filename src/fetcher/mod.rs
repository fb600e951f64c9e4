//! Media acquisition strategies.
//!
//! Every strategy turns a source URL into a fully written local file plus a
//! filesystem-safe display title. TikTok links always go through
//! [`TikTokFetcher`]; every other URL uses whichever generic strategy the
//! configuration names.

mod metadata;
mod tiktok;
mod title_scrape;

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, warn};

use crate::{
    auth::SessionCookie,
    config::{FetchStrategy, PLACEHOLDER_TITLE, RelaySettings},
    error::{PipelineError, PipelineResult},
    source::SourceKind,
};

pub use metadata::MetadataFetcher;
pub use tiktok::{Placeholder, TikTokFetcher};
pub use title_scrape::TitleScrapeFetcher;

/// Title used when sanitizing strips every character.
pub const FALLBACK_TITLE: &str = "untitled";

static DOWNLOAD_SEQUENCE: AtomicUsize = AtomicUsize::new(1);

/// A downloaded media file waiting to be relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    pub local_path: PathBuf,
    pub title: String,
    pub size_bytes: u64,
    pub duration_secs: Option<u64>,
    /// Set when the asset is the fixed placeholder rather than the requested
    /// media. Degraded assets are shared and must never be deleted.
    pub degraded: bool,
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    async fn fetch(&self, source_url: &str) -> PipelineResult<MediaAsset>;
}

/// The fetchers a pipeline dispatches between.
#[derive(Clone)]
pub struct FetcherSet {
    tiktok: Arc<dyn MediaFetcher>,
    generic: Arc<dyn MediaFetcher>,
}

impl FetcherSet {
    pub fn new(tiktok: Arc<dyn MediaFetcher>, generic: Arc<dyn MediaFetcher>) -> Self {
        Self { tiktok, generic }
    }

    pub fn from_settings(settings: &RelaySettings, client: Client, cookie: SessionCookie) -> Self {
        let work = WorkDir::new(&settings.work_dir, &settings.output_ext);
        let proxy = ProxyDownloader::new(client.clone(), &settings.proxy_api_url, work.clone());
        let generic: Arc<dyn MediaFetcher> = match settings.fetch_strategy {
            FetchStrategy::TitleScrape => {
                Arc::new(TitleScrapeFetcher::new(client.clone(), cookie, proxy))
            }
            FetchStrategy::Metadata => Arc::new(MetadataFetcher::new(
                client.clone(),
                &settings.info_api_url,
                proxy,
            )),
        };
        let placeholder = Placeholder {
            path: settings.placeholder_path.clone(),
            title: PLACEHOLDER_TITLE.to_string(),
        };
        let tiktok = Arc::new(TikTokFetcher::new(
            client,
            &settings.tiktok_api_url,
            work,
            placeholder,
        ));
        Self::new(tiktok, generic)
    }

    pub fn select(&self, kind: SourceKind) -> &dyn MediaFetcher {
        match kind {
            SourceKind::TikTok => self.tiktok.as_ref(),
            SourceKind::Generic => self.generic.as_ref(),
        }
    }
}

/// Keeps only ASCII word characters and whitespace, then collapses whitespace
/// runs into single spaces.
pub fn sanitize_title(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || ch.is_whitespace())
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        collapsed
    }
}

/// Directory that receives downloaded media, plus the extension to use.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
    ext: String,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>, ext: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            ext: ext.into(),
        }
    }

    pub fn ext(&self) -> &str {
        &self.ext
    }

    /// Builds a fresh file name; the timestamp and sequence keep concurrent
    /// downloads of the same title apart.
    pub fn allocate(&self, prefix: &str, title: &str) -> PathBuf {
        let stamp = chrono::Utc::now().timestamp_millis();
        let seq = DOWNLOAD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let slug = title.replace(' ', "-");
        self.root
            .join(format!("{prefix}-{slug}-{stamp}-{seq}.{}", self.ext))
    }
}

/// Binary fetches through the conversion proxy (`?url=<source>&type=<ext>`).
#[derive(Clone)]
pub struct ProxyDownloader {
    client: Client,
    api_url: String,
    work: WorkDir,
}

impl ProxyDownloader {
    pub fn new(client: Client, api_url: &str, work: WorkDir) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
            work,
        }
    }

    pub async fn download(&self, source_url: &str, title: String) -> PipelineResult<MediaAsset> {
        let path = self.work.allocate("Media", &title);
        let request = self
            .client
            .get(&self.api_url)
            .query(&[("url", source_url), ("type", self.work.ext())]);
        let size_bytes = download_to_file(request, "proxy download", &path).await?;
        Ok(MediaAsset {
            local_path: path,
            title,
            size_bytes,
            duration_secs: None,
            degraded: false,
        })
    }
}

/// Streams the response of `request` into `path`. The file is complete when
/// this returns `Ok`; on failure no partial file is left behind.
pub(crate) async fn download_to_file(
    request: RequestBuilder,
    stage: &'static str,
    path: &Path,
) -> PipelineResult<u64> {
    match write_response(request, stage, path).await {
        Ok(written) => {
            debug!(path = %path.display(), bytes = written, stage, "download complete");
            Ok(written)
        }
        Err(err) => {
            discard_file(path).await;
            Err(err)
        }
    }
}

async fn write_response(
    request: RequestBuilder,
    stage: &'static str,
    path: &Path,
) -> PipelineResult<u64> {
    let response = request.send().await.map_err(PipelineError::http(stage))?;
    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::fetch(stage, format!("upstream answered {status}")));
    }

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(PipelineError::io("creating work directory", parent))?;
    }
    let mut file = File::create(path)
        .await
        .map_err(PipelineError::io("creating media file", path))?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(PipelineError::http(stage))?;
        file.write_all(&chunk)
            .await
            .map_err(PipelineError::io("writing media file", path))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(PipelineError::io("flushing media file", path))?;

    if written == 0 {
        return Err(PipelineError::fetch(stage, "upstream returned an empty body"));
    }
    Ok(written)
}

/// Best-effort removal of a local media file.
pub(crate) async fn discard_file(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %err, "could not remove media file");
    }
}
