use std::sync::LazyLock;

use async_trait::async_trait;
use reqwest::{Client, header};
use scraper::Selector;
use tracing::info;

use super::{MediaAsset, MediaFetcher, ProxyDownloader, sanitize_title};
use crate::{
    auth::SessionCookie,
    error::{PipelineError, PipelineResult},
    scrape::first_attr,
};

const OG_TITLE: &str = r#"meta[property="og:title"]"#;

static OG_TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(OG_TITLE).expect("og:title selector is valid"));

/// Reads the page's `og:title` with the session cookie, then pulls the audio
/// through the conversion proxy.
pub struct TitleScrapeFetcher {
    client: Client,
    cookie: SessionCookie,
    proxy: ProxyDownloader,
}

impl TitleScrapeFetcher {
    pub fn new(client: Client, cookie: SessionCookie, proxy: ProxyDownloader) -> Self {
        Self {
            client,
            cookie,
            proxy,
        }
    }

    async fn scrape_title(&self, source_url: &str) -> PipelineResult<String> {
        let mut request = self.client.get(source_url);
        if let Some(cookie) = self.cookie.header_value() {
            request = request.header(header::COOKIE, cookie);
        }
        let response = request
            .send()
            .await
            .map_err(PipelineError::http("title scrape"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::fetch(
                "title scrape",
                format!("source page answered {status}"),
            ));
        }
        let html = response
            .text()
            .await
            .map_err(PipelineError::http("title scrape"))?;
        first_attr(&html, &OG_TITLE_SELECTOR, "content").ok_or(PipelineError::ScrapeExtraction {
            stage: "title scrape",
            selector: OG_TITLE,
        })
    }
}

#[async_trait]
impl MediaFetcher for TitleScrapeFetcher {
    fn name(&self) -> &'static str {
        "title-scrape"
    }

    async fn fetch(&self, source_url: &str) -> PipelineResult<MediaAsset> {
        let raw_title = self.scrape_title(source_url).await?;
        let title = sanitize_title(&raw_title);
        info!(title = %title, "resolved page title");
        self.proxy.download(source_url, title).await
    }
}
