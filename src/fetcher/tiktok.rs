use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{MediaAsset, MediaFetcher, WorkDir, download_to_file, sanitize_title};
use crate::error::{PipelineError, PipelineResult};

/// Fixed asset handed back when the TikTok lookup cannot be used.
#[derive(Debug, Clone)]
pub struct Placeholder {
    pub path: PathBuf,
    pub title: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    data: Option<LookupData>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupData {
    #[serde(default)]
    title: String,
    play: String,
}

/// Resolves TikTok links through a lookup API that answers with a direct
/// stream URL. Lookup or download failures degrade to the placeholder.
pub struct TikTokFetcher {
    client: Client,
    api_url: String,
    work: WorkDir,
    placeholder: Placeholder,
}

impl TikTokFetcher {
    pub fn new(client: Client, api_url: &str, work: WorkDir, placeholder: Placeholder) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
            work,
            placeholder,
        }
    }

    async fn lookup(&self, source_url: &str) -> PipelineResult<LookupData> {
        let response = self
            .client
            .post(&self.api_url)
            .json(&json!({ "url": source_url }))
            .send()
            .await
            .map_err(PipelineError::http("tiktok lookup"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::fetch(
                "tiktok lookup",
                format!("lookup answered {status}"),
            ));
        }
        let body: LookupResponse = response
            .json()
            .await
            .map_err(PipelineError::http("tiktok lookup"))?;
        match body.data {
            Some(data) if !data.play.trim().is_empty() => Ok(data),
            _ => Err(PipelineError::fetch(
                "tiktok lookup",
                body.msg.unwrap_or_else(|| "no playable stream".to_string()),
            )),
        }
    }

    async fn download(&self, source_url: &str) -> PipelineResult<MediaAsset> {
        let data = self.lookup(source_url).await?;
        let title = sanitize_title(&data.title);
        let path = self.work.allocate("TikTok", &title);
        let size_bytes =
            download_to_file(self.client.get(data.play.trim()), "tiktok stream", &path).await?;
        info!(title = %title, bytes = size_bytes, "downloaded tiktok media");
        Ok(MediaAsset {
            local_path: path,
            title,
            size_bytes,
            duration_secs: None,
            degraded: false,
        })
    }

    async fn placeholder_asset(&self) -> MediaAsset {
        let size_bytes = tokio::fs::metadata(&self.placeholder.path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        MediaAsset {
            local_path: self.placeholder.path.clone(),
            title: self.placeholder.title.clone(),
            size_bytes,
            duration_secs: None,
            degraded: true,
        }
    }
}

#[async_trait]
impl MediaFetcher for TikTokFetcher {
    fn name(&self) -> &'static str {
        "tiktok"
    }

    async fn fetch(&self, source_url: &str) -> PipelineResult<MediaAsset> {
        match self.download(source_url).await {
            Ok(asset) => Ok(asset),
            Err(err) => {
                warn!(
                    url = source_url,
                    error = %err,
                    "tiktok lookup failed, using placeholder"
                );
                Ok(self.placeholder_asset().await)
            }
        }
    }
}
