use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use super::{MediaAsset, MediaFetcher, ProxyDownloader, sanitize_title};
use crate::error::{PipelineError, PipelineResult};

/// Info providers disagree on whether lengths are numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(f64),
    Text(String),
}

impl Seconds {
    fn as_secs(&self) -> Option<u64> {
        match self {
            Seconds::Number(value) if *value >= 0.0 => Some(value.round() as u64),
            Seconds::Number(_) => None,
            Seconds::Text(value) => value.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VideoDetails {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<Seconds>,
    #[serde(default, rename = "lengthSeconds", alias = "length_seconds")]
    length_seconds: Option<Seconds>,
}

impl VideoDetails {
    fn duration_secs(&self) -> Option<u64> {
        self.duration
            .as_ref()
            .or(self.length_seconds.as_ref())
            .and_then(Seconds::as_secs)
    }
}

/// Either a flat `{ title, duration }` object or one nested under
/// `videoDetails`.
#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(default, rename = "videoDetails")]
    video_details: Option<VideoDetails>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<Seconds>,
    #[serde(default, rename = "lengthSeconds", alias = "length_seconds")]
    length_seconds: Option<Seconds>,
}

impl InfoResponse {
    fn into_details(self) -> VideoDetails {
        match self.video_details {
            Some(details) if details.title.is_some() => details,
            _ => VideoDetails {
                title: self.title,
                duration: self.duration,
                length_seconds: self.length_seconds,
            },
        }
    }
}

/// Asks a video-info endpoint for title and duration, then fetches the
/// binary through the conversion proxy.
pub struct MetadataFetcher {
    client: Client,
    info_api_url: String,
    proxy: ProxyDownloader,
}

impl MetadataFetcher {
    pub fn new(client: Client, info_api_url: &str, proxy: ProxyDownloader) -> Self {
        Self {
            client,
            info_api_url: info_api_url.to_string(),
            proxy,
        }
    }

    async fn video_info(&self, source_url: &str) -> PipelineResult<(String, Option<u64>)> {
        let response = self
            .client
            .get(&self.info_api_url)
            .query(&[("url", source_url)])
            .send()
            .await
            .map_err(PipelineError::http("metadata lookup"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::fetch(
                "metadata lookup",
                format!("info api answered {status}"),
            ));
        }
        let info: InfoResponse = response
            .json()
            .await
            .map_err(PipelineError::http("metadata lookup"))?;
        let details = info.into_details();
        let duration_secs = details.duration_secs();
        let title = details
            .title
            .filter(|title| !title.trim().is_empty())
            .ok_or(PipelineError::ScrapeExtraction {
                stage: "metadata lookup",
                selector: "title",
            })?;
        Ok((title, duration_secs))
    }
}

#[async_trait]
impl MediaFetcher for MetadataFetcher {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn fetch(&self, source_url: &str) -> PipelineResult<MediaAsset> {
        let (raw_title, duration_secs) = self.video_info(source_url).await?;
        let title = sanitize_title(&raw_title);
        info!(title = %title, duration_secs, "resolved video info");
        let mut asset = self.proxy.download(source_url, title).await?;
        asset.duration_secs = duration_secs;
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::WorkDir;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn fetcher(server: &MockServer, dir: &std::path::Path) -> MetadataFetcher {
        let client = Client::new();
        let proxy = ProxyDownloader::new(
            client.clone(),
            &server.url("/yt"),
            WorkDir::new(dir, "m4a"),
        );
        MetadataFetcher::new(client, &server.url("/info"), proxy)
    }

    #[test]
    fn nested_video_details_are_preferred() {
        let info: InfoResponse = serde_json::from_value(json!({
            "videoDetails": { "title": "Nested", "lengthSeconds": "212" }
        }))
        .unwrap();
        let details = info.into_details();
        assert_eq!(details.title.as_deref(), Some("Nested"));
        assert_eq!(details.duration_secs(), Some(212));
    }

    #[test]
    fn duration_and_length_seconds_may_both_appear() {
        let info: InfoResponse = serde_json::from_value(json!({
            "title": "x",
            "duration": 10,
            "lengthSeconds": "12"
        }))
        .unwrap();
        assert_eq!(info.into_details().duration_secs(), Some(10));

        let info: InfoResponse =
            serde_json::from_value(json!({ "title": "x", "length_seconds": "12" })).unwrap();
        assert_eq!(info.into_details().duration_secs(), Some(12));
    }

    #[tokio::test]
    async fn fetch_records_title_and_duration() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/info")
                    .query_param("url", "https://youtu.be/xyz");
                then.status(200)
                    .json_body(json!({ "title": "Lo-Fi Beats (1 hour)", "duration": 3600 }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/yt");
                then.status(200).body("data");
            })
            .await;
        let dir = tempdir().unwrap();

        let asset = fetcher(&server, dir.path())
            .fetch("https://youtu.be/xyz")
            .await
            .unwrap();

        assert_eq!(asset.title, "LoFi Beats 1 hour");
        assert_eq!(asset.duration_secs, Some(3600));
        assert_eq!(asset.size_bytes, 4);
    }

    #[tokio::test]
    async fn missing_title_fails() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/info");
                then.status(200).json_body(json!({ "duration": 10 }));
            })
            .await;
        let dir = tempdir().unwrap();

        let err = fetcher(&server, dir.path())
            .fetch("https://youtu.be/xyz")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ScrapeExtraction { .. }));
    }
}
