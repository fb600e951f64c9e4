use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use super::{LargeFileHost, RelayResult};
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, alias = "fileName", alias = "file")]
    filename: Option<String>,
}

/// Self-hosted upload/retrieval API for media above the relay size limit.
/// It downloads the source itself, so only the source URL is sent.
pub struct SelfHostedApi {
    client: Client,
    base_url: String,
}

impl SelfHostedApi {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LargeFileHost for SelfHostedApi {
    fn name(&self) -> &'static str {
        "self-hosted"
    }

    async fn publish_source(&self, source_url: &str) -> PipelineResult<RelayResult> {
        const STAGE: &str = "large file upload";
        let response = self
            .client
            .get(format!("{}/upload", self.base_url))
            .query(&[("url", source_url)])
            .send()
            .await
            .map_err(PipelineError::http(STAGE))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Upload {
                stage: STAGE,
                status,
            });
        }
        let body: UploadResponse = response.json().await.map_err(PipelineError::http(STAGE))?;
        let hosted_url = match (body.url, body.filename) {
            (Some(url), _) if !url.trim().is_empty() => url,
            (_, Some(filename)) if !filename.trim().is_empty() => {
                format!("{}/download/{}", self.base_url, filename.trim_start_matches('/'))
            }
            _ => {
                return Err(PipelineError::ScrapeExtraction {
                    stage: STAGE,
                    selector: "url|filename",
                });
            }
        };
        info!(url = %hosted_url, "large file served by alternate host");
        Ok(RelayResult { hosted_url })
    }
}
