use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    Body, Client, Url,
    multipart::{Form, Part},
};
use scraper::Selector;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{RelayHost, RelayResult};
use crate::{
    error::{PipelineError, PipelineResult},
    fetcher::MediaAsset,
    scrape::first_attr,
};

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const UPLOAD_FORM: &str = "#form-upload";
const SHARE_LINK: &str = ".share_url a";
const UPLOAD_FIELD: &str = "USERFILE";

static UPLOAD_FORM_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(UPLOAD_FORM).expect("upload form selector is valid"));
static SHARE_LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(SHARE_LINK).expect("share link selector is valid"));

/// cjoint.com style host: a landing page with an upload form whose action
/// changes, a result page with a share link, and a share page whose link is
/// relative to the site root.
pub struct CjointHost {
    client: Client,
    base: Url,
}

impl CjointHost {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .cookie_store(true)
            .build()
            .context("building relay http client")?;
        let base = Url::parse(base_url).with_context(|| format!("invalid relay url {base_url}"))?;
        Ok(Self::with_client(client, base))
    }

    pub fn with_client(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    async fn get_page(&self, url: Url, stage: &'static str) -> PipelineResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(PipelineError::http(stage))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Upload { stage, status });
        }
        response.text().await.map_err(PipelineError::http(stage))
    }

    fn join(&self, link: &str, stage: &'static str, selector: &'static str) -> PipelineResult<Url> {
        self.base
            .join(link)
            .map_err(|_| PipelineError::ScrapeExtraction { stage, selector })
    }
}

#[async_trait]
impl RelayHost for CjointHost {
    fn name(&self) -> &'static str {
        "cjoint"
    }

    async fn fetch_upload_target(&self) -> PipelineResult<Url> {
        const STAGE: &str = "reading upload form";
        let landing = self.get_page(self.base.clone(), STAGE).await?;
        let action = first_attr(&landing, &UPLOAD_FORM_SELECTOR, "action").ok_or(
            PipelineError::ScrapeExtraction {
                stage: STAGE,
                selector: UPLOAD_FORM,
            },
        )?;
        self.join(&action, STAGE, UPLOAD_FORM)
    }

    async fn submit_file(
        &self,
        target: &Url,
        asset: &MediaAsset,
        file_name: &str,
    ) -> PipelineResult<String> {
        const STAGE: &str = "uploading file";
        let file = tokio::fs::File::open(&asset.local_path)
            .await
            .map_err(PipelineError::io("opening media for upload", &asset.local_path))?;
        let length = file
            .metadata()
            .await
            .map_err(PipelineError::io("reading media metadata", &asset.local_path))?
            .len();
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), length)
            .file_name(file_name.to_string())
            .mime_str(mime.as_ref())
            .map_err(PipelineError::http(STAGE))?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let response = self
            .client
            .post(target.clone())
            .multipart(form)
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
        response.text().await.map_err(PipelineError::http(STAGE))
    }

    async fn resolve_share_link(&self, upload_page: &str) -> PipelineResult<RelayResult> {
        const STAGE: &str = "reading share link";
        let intermediate = first_attr(upload_page, &SHARE_LINK_SELECTOR, "href").ok_or(
            PipelineError::ScrapeExtraction {
                stage: STAGE,
                selector: SHARE_LINK,
            },
        )?;
        debug!(link = %intermediate, "found intermediate share link");
        let intermediate = self.join(&intermediate, STAGE, SHARE_LINK)?;

        const FINAL_STAGE: &str = "reading final share link";
        let share_page = self.get_page(intermediate, FINAL_STAGE).await?;
        let href = first_attr(&share_page, &SHARE_LINK_SELECTOR, "href").ok_or(
            PipelineError::ScrapeExtraction {
                stage: FINAL_STAGE,
                selector: SHARE_LINK,
            },
        )?;
        // The host sometimes leaks markup into the href; keep the part before
        // the first quote.
        let fragment = href.split('"').next().unwrap_or_default();
        let hosted = self.join(fragment, FINAL_STAGE, SHARE_LINK)?;
        Ok(RelayResult {
            hosted_url: hosted.to_string(),
        })
    }
}
