//! Publishing local media to a shareable URL.
//!
//! [`RelayHost`] wraps a form-based hosting site that has to be scraped in
//! three hops. [`LargeFileHost`] is the alternate path for files too big for
//! that site: it is handed the original source URL instead of the file.

mod cjoint;
mod self_hosted;

use async_trait::async_trait;
use reqwest::Url;
use tracing::info;

use crate::{error::PipelineResult, fetcher::MediaAsset};

pub use cjoint::{BROWSER_USER_AGENT, CjointHost};
pub use self_hosted::SelfHostedApi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResult {
    pub hosted_url: String,
}

#[async_trait]
pub trait RelayHost: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reads the current upload form target. Hosts regenerate it, so it is
    /// fetched again for every upload.
    async fn fetch_upload_target(&self) -> PipelineResult<Url>;

    /// Posts the file to `target` and returns the response page.
    async fn submit_file(
        &self,
        target: &Url,
        asset: &MediaAsset,
        file_name: &str,
    ) -> PipelineResult<String>;

    /// Follows the share link embedded in `upload_page` to the final URL.
    async fn resolve_share_link(&self, upload_page: &str) -> PipelineResult<RelayResult>;
}

#[async_trait]
pub trait LargeFileHost: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish_source(&self, source_url: &str) -> PipelineResult<RelayResult>;
}

/// Runs the full three-step relay protocol for one file.
pub async fn publish(
    host: &dyn RelayHost,
    asset: &MediaAsset,
    file_name: &str,
) -> PipelineResult<RelayResult> {
    let target = host.fetch_upload_target().await?;
    info!(host = host.name(), %target, file = file_name, "uploading media");
    let page = host.submit_file(&target, asset, file_name).await?;
    let result = host.resolve_share_link(&page).await?;
    info!(host = host.name(), url = %result.hosted_url, "relay complete");
    Ok(result)
}
