//! Request orchestration: classify, fetch, publish, record.
//!
//! A run is strictly sequential. The first failing stage aborts it and no
//! library entry is written; the downloaded file is removed either way.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{info, warn};

use crate::{
    auth::SessionCookie,
    config::RelaySettings,
    error::{PipelineError, PipelineResult},
    fetcher::{FetcherSet, MediaAsset, discard_file},
    library::{EntryStatus, LibraryEntry, LibraryStore},
    relay::{self, CjointHost, LargeFileHost, RelayHost, RelayResult, SelfHostedApi},
    source::classify,
};

#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub source_url: String,
}

impl AcquisitionRequest {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
        }
    }
}

/// Where a fetched asset gets published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Relay,
    LargeFile,
}

struct LargeFileBranch {
    host: Arc<dyn LargeFileHost>,
    threshold_bytes: u64,
}

pub struct Pipeline {
    fetchers: FetcherSet,
    relay: Arc<dyn RelayHost>,
    large_files: Option<LargeFileBranch>,
    library: Arc<LibraryStore>,
    output_ext: String,
}

impl Pipeline {
    pub fn new(
        fetchers: FetcherSet,
        relay: Arc<dyn RelayHost>,
        library: Arc<LibraryStore>,
        output_ext: impl Into<String>,
    ) -> Self {
        Self {
            fetchers,
            relay,
            large_files: None,
            library,
            output_ext: output_ext.into(),
        }
    }

    /// Files strictly larger than `threshold_bytes` skip the relay and are
    /// published by `host` from their source URL.
    pub fn with_large_file_host(mut self, host: Arc<dyn LargeFileHost>, threshold_bytes: u64) -> Self {
        self.large_files = Some(LargeFileBranch {
            host,
            threshold_bytes,
        });
        self
    }

    /// Wires the production providers named by `settings`.
    pub fn from_settings(
        settings: &RelaySettings,
        cookie: SessionCookie,
        library: Arc<LibraryStore>,
    ) -> Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .build()
            .context("building provider http client")?;
        let fetchers = FetcherSet::from_settings(settings, client.clone(), cookie);
        let relay = Arc::new(CjointHost::new(&settings.relay_base_url)?);
        let pipeline = Self::new(fetchers, relay, library, settings.output_ext.clone());
        Ok(match &settings.alt_host_url {
            Some(url) => pipeline.with_large_file_host(
                Arc::new(SelfHostedApi::new(client, url)),
                settings.size_threshold_bytes,
            ),
            None => pipeline,
        })
    }

    pub fn library(&self) -> &Arc<LibraryStore> {
        &self.library
    }

    pub fn route_for(&self, size_bytes: u64) -> Route {
        match &self.large_files {
            Some(branch) if size_bytes > branch.threshold_bytes => Route::LargeFile,
            _ => Route::Relay,
        }
    }

    pub async fn run(&self, request: AcquisitionRequest) -> PipelineResult<LibraryEntry> {
        let source_url = request.source_url.trim();
        if source_url.is_empty() {
            return Err(PipelineError::MissingUrl);
        }

        let kind = classify(source_url);
        let fetcher = self.fetchers.select(kind);
        info!(url = source_url, kind = kind.label(), fetcher = fetcher.name(), "fetching media");
        let asset = fetcher.fetch(source_url).await?;
        if asset.degraded {
            warn!(url = source_url, title = %asset.title, "continuing with placeholder media");
        }

        let src = format!("{}.{}", asset.title, self.output_ext);
        let published = self.publish(&asset, source_url, &src).await;
        if !asset.degraded {
            discard_file(&asset.local_path).await;
        }
        let hosted = published?;

        let entry = LibraryEntry {
            url: hosted.hosted_url,
            src,
            title: asset.title,
            source_url: source_url.to_string(),
            status: EntryStatus::Success,
        };
        let library = self.library.clone();
        let record = entry.clone();
        let total = tokio::task::spawn_blocking(move || library.append(&record)).await??;
        info!(title = %entry.title, url = %entry.url, total, "recorded library entry");
        Ok(entry)
    }

    async fn publish(
        &self,
        asset: &MediaAsset,
        source_url: &str,
        file_name: &str,
    ) -> PipelineResult<RelayResult> {
        match (self.route_for(asset.size_bytes), &self.large_files) {
            (Route::LargeFile, Some(branch)) => {
                info!(
                    bytes = asset.size_bytes,
                    threshold = branch.threshold_bytes,
                    host = branch.host.name(),
                    "media exceeds relay limit"
                );
                branch.host.publish_source(source_url).await
            }
            _ => relay::publish(self.relay.as_ref(), asset, file_name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::MediaFetcher;
    use async_trait::async_trait;
    use reqwest::Url;
    use std::{
        path::{Path, PathBuf},
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tempfile::tempdir;

    struct FixedFetcher {
        dir: PathBuf,
        title: &'static str,
        size: usize,
        degraded: bool,
        calls: AtomicUsize,
    }

    impl FixedFetcher {
        fn new(dir: &Path, title: &'static str, size: usize) -> Arc<Self> {
            Arc::new(Self {
                dir: dir.to_path_buf(),
                title,
                size,
                degraded: false,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MediaFetcher for FixedFetcher {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn fetch(&self, _source_url: &str) -> PipelineResult<MediaAsset> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let path = self.dir.join(format!("{}-{n}.m4a", self.title));
            std::fs::write(&path, vec![0u8; self.size]).unwrap();
            Ok(MediaAsset {
                local_path: path,
                title: self.title.to_string(),
                size_bytes: self.size as u64,
                duration_secs: None,
                degraded: self.degraded,
            })
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl MediaFetcher for FailingFetcher {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn fetch(&self, _source_url: &str) -> PipelineResult<MediaAsset> {
            Err(PipelineError::ScrapeExtraction {
                stage: "title scrape",
                selector: "meta",
            })
        }
    }

    #[derive(Default)]
    struct RecordingRelay {
        uploads: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RelayHost for RecordingRelay {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn fetch_upload_target(&self) -> PipelineResult<Url> {
            Ok(Url::parse("https://relay.test/upload").unwrap())
        }

        async fn submit_file(
            &self,
            _target: &Url,
            asset: &MediaAsset,
            file_name: &str,
        ) -> PipelineResult<String> {
            assert!(asset.local_path.exists(), "file must exist at upload time");
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PipelineError::Upload {
                    stage: "uploading file",
                    status: reqwest::StatusCode::BAD_GATEWAY,
                });
            }
            Ok(file_name.to_string())
        }

        async fn resolve_share_link(&self, upload_page: &str) -> PipelineResult<RelayResult> {
            Ok(RelayResult {
                hosted_url: format!("https://relay.test/doc/{upload_page}"),
            })
        }
    }

    #[derive(Default)]
    struct RecordingLargeHost {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LargeFileHost for RecordingLargeHost {
        fn name(&self) -> &'static str {
            "recording-large"
        }

        async fn publish_source(&self, source_url: &str) -> PipelineResult<RelayResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RelayResult {
                hosted_url: format!("https://large.test/?src={source_url}"),
            })
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        media: PathBuf,
        relay: Arc<RecordingRelay>,
        large: Arc<RecordingLargeHost>,
        pipeline: Pipeline,
    }

    fn harness_with(
        tiktok: Arc<dyn MediaFetcher>,
        generic: Arc<dyn MediaFetcher>,
        relay: RecordingRelay,
        threshold: Option<u64>,
        dir: tempfile::TempDir,
    ) -> Harness {
        let media = dir.path().join("media");
        let relay = Arc::new(relay);
        let large = Arc::new(RecordingLargeHost::default());
        let library = Arc::new(LibraryStore::new(dir.path().join("library.json")));
        let mut pipeline = Pipeline::new(
            FetcherSet::new(tiktok, generic),
            relay.clone(),
            library,
            "m4a",
        );
        if let Some(threshold) = threshold {
            pipeline = pipeline.with_large_file_host(large.clone(), threshold);
        }
        Harness {
            _dir: dir,
            media,
            relay,
            large,
            pipeline,
        }
    }

    fn harness(size: usize, threshold: Option<u64>) -> Harness {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        let fetcher = FixedFetcher::new(&media, "Clip", size);
        harness_with(
            fetcher.clone(),
            fetcher,
            RecordingRelay::default(),
            threshold,
            dir,
        )
    }

    fn media_files(harness: &Harness) -> usize {
        std::fs::read_dir(&harness.media).unwrap().count()
    }

    #[tokio::test]
    async fn large_file_skips_scrape_relay() {
        let h = harness(2048, Some(1024));
        let entry = h
            .pipeline
            .run(AcquisitionRequest::new("https://youtu.be/long"))
            .await
            .unwrap();

        assert_eq!(h.large.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.relay.uploads.load(Ordering::SeqCst), 0);
        assert_eq!(entry.url, "https://large.test/?src=https://youtu.be/long");
        assert_eq!(media_files(&h), 0);
    }

    #[tokio::test]
    async fn file_at_threshold_uses_scrape_relay() {
        let h = harness(1024, Some(1024));
        let entry = h
            .pipeline
            .run(AcquisitionRequest::new("https://youtu.be/short"))
            .await
            .unwrap();

        assert_eq!(h.relay.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(h.large.calls.load(Ordering::SeqCst), 0);
        assert_eq!(entry.url, "https://relay.test/doc/Clip.m4a");
        assert_eq!(entry.src, "Clip.m4a");
        assert_eq!(entry.status, EntryStatus::Success);
        assert_eq!(media_files(&h), 0);
    }

    #[tokio::test]
    async fn without_alternate_host_everything_is_relayed() {
        let h = harness(50 * 1024 * 1024, None);
        assert_eq!(h.pipeline.route_for(u64::MAX), Route::Relay);
        h.pipeline
            .run(AcquisitionRequest::new("https://youtu.be/huge"))
            .await
            .unwrap();
        assert_eq!(h.relay.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn library_grows_in_submission_order() {
        let h = harness(10, Some(1024));
        for idx in 0..3 {
            h.pipeline
                .run(AcquisitionRequest::new(format!("https://youtu.be/{idx}")))
                .await
                .unwrap();
        }
        let sources: Vec<_> = h
            .pipeline
            .library()
            .load()
            .unwrap()
            .into_iter()
            .map(|entry| entry.source_url)
            .collect();
        assert_eq!(
            sources,
            ["https://youtu.be/0", "https://youtu.be/1", "https://youtu.be/2"]
        );
    }

    #[tokio::test]
    async fn fetch_failure_writes_nothing() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("media")).unwrap();
        let h = harness_with(
            Arc::new(FailingFetcher),
            Arc::new(FailingFetcher),
            RecordingRelay::default(),
            None,
            dir,
        );

        let err = h
            .pipeline
            .run(AcquisitionRequest::new("https://youtu.be/nope"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ScrapeExtraction { .. }));
        assert!(h.pipeline.library().load().unwrap().is_empty());
        assert_eq!(h.relay.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn relay_failure_cleans_up_and_records_nothing() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        let fetcher = FixedFetcher::new(&media, "Clip", 10);
        let h = harness_with(
            fetcher.clone(),
            fetcher,
            RecordingRelay {
                fail: true,
                ..RecordingRelay::default()
            },
            None,
            dir,
        );

        let err = h
            .pipeline
            .run(AcquisitionRequest::new("https://youtu.be/x"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Upload { .. }));
        assert!(h.pipeline.library().load().unwrap().is_empty());
        assert_eq!(media_files(&h), 0);
    }

    #[tokio::test]
    async fn tiktok_urls_use_tiktok_fetcher() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        let tiktok = FixedFetcher::new(&media, "Tok", 10);
        let generic = FixedFetcher::new(&media, "Gen", 10);
        let h = harness_with(
            tiktok.clone(),
            generic.clone(),
            RecordingRelay::default(),
            None,
            dir,
        );

        let entry = h
            .pipeline
            .run(AcquisitionRequest::new("https://vt.tiktok.com/ABC123"))
            .await
            .unwrap();
        assert_eq!(entry.title, "Tok");
        h.pipeline
            .run(AcquisitionRequest::new("https://www.youtube.com/watch?v=1"))
            .await
            .unwrap();

        assert_eq!(tiktok.calls.load(Ordering::SeqCst), 1);
        assert_eq!(generic.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn degraded_placeholder_is_not_deleted() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        let placeholder = Arc::new(FixedFetcher {
            dir: media.clone(),
            title: "GDPH_BOT_MUSIC_TIKTOK_NOT_FOUND",
            size: 5,
            degraded: true,
            calls: AtomicUsize::new(0),
        });
        let h = harness_with(
            placeholder.clone(),
            placeholder,
            RecordingRelay::default(),
            None,
            dir,
        );

        let entry = h
            .pipeline
            .run(AcquisitionRequest::new("https://vm.tiktok.com/gone"))
            .await
            .unwrap();

        assert_eq!(entry.title, "GDPH_BOT_MUSIC_TIKTOK_NOT_FOUND");
        assert_eq!(entry.status, EntryStatus::Success);
        assert_eq!(media_files(&h), 1);
    }

    #[tokio::test]
    async fn blank_url_is_rejected() {
        let h = harness(10, None);
        let err = h
            .pipeline
            .run(AcquisitionRequest::new("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingUrl));
    }
}
