//! Authenticated publishing calls for one credential set.
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use super::token::TokenCache;
use super::{WeixinApi, FALLBACK_COVER_MEDIA_ID};
use crate::image::{load_image, AssetFetcher};
use crate::model::{Article, Credential, DraftHandle, MediaHandle};

/// Per-run session: owns the credential and its token cache, borrows the API
/// and the asset fetcher. Build one per account and drop it afterwards.
pub struct WeixinSession<'a> {
    api: &'a dyn WeixinApi,
    fetcher: &'a dyn AssetFetcher,
    credential: Credential,
    tokens: TokenCache,
}

impl<'a> WeixinSession<'a> {
    pub fn new(
        api: &'a dyn WeixinApi,
        fetcher: &'a dyn AssetFetcher,
        credential: Credential,
    ) -> Self {
        Self {
            api,
            fetcher,
            credential,
            tokens: TokenCache::default(),
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    async fn token(&mut self) -> Result<String> {
        self.tokens.ensure_token(self.api, &self.credential).await
    }

    /// Upload an image reference (URL or local path). An empty or absent
    /// reference resolves to the platform's fallback cover.
    pub async fn upload_image(&mut self, reference: Option<&str>) -> Result<MediaHandle> {
        let reference = match reference.map(str::trim).filter(|r| !r.is_empty()) {
            Some(r) => r,
            None => {
                info!("no image available, using fallback cover");
                return Ok(MediaHandle::new(FALLBACK_COVER_MEDIA_ID));
            }
        };

        let image = load_image(self.fetcher, reference)
            .await
            .with_context(|| format!("failed to load image {}", reference))?;
        let token = self.token().await?;
        let handle = self
            .api
            .upload_image(&token, image)
            .await
            .with_context(|| format!("failed to upload image {}", reference))?;
        info!(media_id = %handle.media_id, "uploaded image");
        Ok(handle)
    }

    pub async fn add_draft(&mut self, article: &Article) -> Result<DraftHandle> {
        let token = self.token().await?;
        let media_id = self
            .api
            .add_draft(&token, article, &self.credential.author)
            .await
            .context("failed to add draft")?;
        let draft = DraftHandle::draft(media_id);
        info!(media_id = %draft.publish_id, status = draft.status.as_str(), "draft created");
        Ok(draft)
    }

    pub async fn submit_publish(&mut self, draft: &DraftHandle) -> Result<DraftHandle> {
        let token = self.token().await?;
        let publish_id = self
            .api
            .submit_publish(&token, &draft.publish_id)
            .await
            .context("failed to submit draft for publishing")?;
        let published = DraftHandle::published(publish_id);
        info!(
            publish_id = %published.publish_id,
            status = published.status.as_str(),
            "draft submitted for publishing"
        );
        Ok(published)
    }

    /// Poll the publish job until the platform reports the article URL.
    /// Returns `None` once `max_retries` polls went by without one; a failed
    /// poll counts as an attempt.
    pub async fn poll_article_url(
        &mut self,
        published: &DraftHandle,
        max_retries: u32,
        interval: Duration,
    ) -> Option<String> {
        for attempt in 1..=max_retries {
            let polled = match self.token().await {
                Ok(token) => self.api.publish_status(&token, &published.publish_id).await,
                Err(err) => Err(err),
            };
            match polled {
                Ok(Some(url)) => {
                    info!(attempt, %url, "article url resolved");
                    return Some(url);
                }
                Ok(None) => {}
                Err(err) => warn!(?err, attempt, "publish status poll failed"),
            }
            if attempt < max_retries {
                tokio::time::sleep(interval).await;
            }
        }
        None
    }

    pub async fn create_menu(&mut self, article_url: &str) -> Result<()> {
        let token = self.token().await?;
        self.api
            .create_menu(&token, article_url)
            .await
            .context("failed to create menu (is the account verified?)")
    }

    pub async fn upload_news(&mut self, article: &Article) -> Result<MediaHandle> {
        let token = self.token().await?;
        let media_id = self
            .api
            .upload_news(&token, article, &self.credential.author)
            .await
            .context("failed to upload news material (is the account verified?)")?;
        Ok(MediaHandle::new(media_id))
    }

    pub async fn mass_send(&mut self, news: &MediaHandle) -> Result<()> {
        let token = self.token().await?;
        self.api
            .mass_send(&token, &news.media_id)
            .await
            .context("failed to mass send (is the account verified?)")
    }
}
