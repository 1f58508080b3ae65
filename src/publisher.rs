//! The publish workflow for one article on one account.
//!
//! Body images → cover → draft → submit → poll for the URL → menu →
//! news upload + mass send. Every failure is resolved into the returned
//! [`PublishReport`]; nothing is raised past [`publish_article`].
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::content::{
    cover_prompt, extract_image_urls, extract_title_digest, strip_code_fence, ContentError,
};
use crate::image::{ImageResolver, ImageSize};
use crate::model::{Article, DraftHandle, MediaHandle, PublishStage};
use crate::weixin::WeixinSession;

pub const SUCCESS_MESSAGE: &str = "成功发布文章到微信公众号";

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub poll_max_retries: u32,
    pub poll_interval: Duration,
    pub cover_size: ImageSize,
    pub update_menu: bool,
    pub mass_send: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            poll_max_retries: 10,
            poll_interval: Duration::from_secs(2),
            cover_size: ImageSize::COVER,
            update_menu: true,
            mass_send: true,
        }
    }
}

impl PublishOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            poll_max_retries: cfg.app.poll_max_retries,
            poll_interval: cfg.poll_interval(),
            update_menu: cfg.app.update_menu,
            mass_send: cfg.app.mass_send,
            ..Default::default()
        }
    }
}

/// Failures that stop the workflow for this article.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishFailure {
    #[error("无法从文章中提取标题或摘要：{0}")]
    Content(#[from] ContentError),
    #[error("上传封面图片失败，无法发布文章")]
    CoverUpload,
    #[error("上传草稿失败，无法发布文章")]
    Draft,
    #[error("草稿发布失败，无法发布文章")]
    Submit,
    #[error("上传图文消息素材失败，文章不会显示在公众号文章列表（请确认公众号已认证）")]
    NewsUpload,
    #[error("群发消息失败，文章不会显示在公众号文章列表（请确认公众号已认证）")]
    MassSend,
}

/// Failures that are logged and recorded but let the workflow continue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SoftFailure {
    #[error("正文图片上传失败，保留原链接 {url}：{reason}")]
    BodyImage { url: String, reason: String },
    #[error("无法获取到文章URL（publish_id {publish_id}）")]
    UrlUnavailable { publish_id: String },
    #[error("创建菜单失败，文章只能通过链接访问：{reason}")]
    MenuUpdate { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArticle {
    pub draft: DraftHandle,
    /// Published handle; carries the article URL once it was resolved.
    pub published: DraftHandle,
}

#[derive(Debug, Clone)]
pub struct PublishReport {
    /// Article body after fence stripping and image substitution.
    pub body: String,
    pub outcome: Result<PublishedArticle, PublishFailure>,
    pub soft_failures: Vec<SoftFailure>,
    pub stages: Vec<PublishStage>,
}

impl PublishReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn message(&self) -> String {
        match &self.outcome {
            Ok(_) => SUCCESS_MESSAGE.to_string(),
            Err(failure) => failure.to_string(),
        }
    }

    pub fn article_url(&self) -> Option<&str> {
        self.outcome
            .as_ref()
            .ok()
            .and_then(|p| p.published.url.as_deref())
    }
}

/// Everything the workflow accumulates besides its final outcome.
#[derive(Debug, Default)]
struct Progress {
    body: String,
    soft_failures: Vec<SoftFailure>,
    stages: Vec<PublishStage>,
}

impl Progress {
    fn reach(&mut self, stage: PublishStage) {
        info!(stage = stage.as_str(), "publish stage reached");
        self.stages.push(stage);
    }

    fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(PublishStage::as_str).collect()
    }
}

#[instrument(skip_all, fields(app_id = %session.credential().app_id))]
pub async fn publish_article(
    session: &mut WeixinSession<'_>,
    images: &dyn ImageResolver,
    raw_article: &str,
    opts: &PublishOptions,
) -> PublishReport {
    let mut progress = Progress {
        body: strip_code_fence(raw_article),
        ..Default::default()
    };
    let outcome = run(session, images, opts, &mut progress).await;
    match &outcome {
        Ok(_) => info!(
            stages = ?progress.stage_names(),
            soft_failures = progress.soft_failures.len(),
            "article published"
        ),
        Err(failure) => error!(
            %failure,
            stages = ?progress.stage_names(),
            "article publish failed"
        ),
    }
    PublishReport {
        body: progress.body,
        outcome,
        soft_failures: progress.soft_failures,
        stages: progress.stages,
    }
}

async fn run(
    session: &mut WeixinSession<'_>,
    images: &dyn ImageResolver,
    opts: &PublishOptions,
    progress: &mut Progress,
) -> Result<PublishedArticle, PublishFailure> {
    let (title, digest) = extract_title_digest(&progress.body)?;
    info!(%title, "extracted article title");

    let (body, image_failures) = substitute_body_images(session, &progress.body).await;
    progress.body = body;
    progress.soft_failures.extend(image_failures);

    let cover_ref = images
        .resolve(&cover_prompt(&title, &digest), opts.cover_size)
        .await;
    let cover = session
        .upload_image(cover_ref.as_deref())
        .await
        .map_err(|err| {
            error!(?err, "cover upload failed");
            PublishFailure::CoverUpload
        })?;

    let article = Article::new(&title, &digest, progress.body.clone(), cover);

    let draft = session.add_draft(&article).await.map_err(|err| {
        error!(?err, "draft build failed");
        PublishFailure::Draft
    })?;
    progress.reach(PublishStage::DraftBuilt);

    let mut published = session.submit_publish(&draft).await.map_err(|err| {
        error!(?err, "publish submit failed");
        PublishFailure::Submit
    })?;
    progress.reach(PublishStage::Submitted);

    match session
        .poll_article_url(&published, opts.poll_max_retries, opts.poll_interval)
        .await
    {
        Some(url) => {
            published = published.with_url(url);
            progress.reach(PublishStage::Published);
            progress.reach(PublishStage::UrlResolved);
        }
        None => {
            warn!(
                publish_id = %published.publish_id,
                "article url unavailable, skipping menu update"
            );
            progress.soft_failures.push(SoftFailure::UrlUnavailable {
                publish_id: published.publish_id.clone(),
            });
        }
    }

    if opts.update_menu {
        if let Some(url) = published.url.clone() {
            match session.create_menu(&url).await {
                Ok(()) => progress.reach(PublishStage::MenuUpdated),
                Err(err) => {
                    warn!(?err, "menu update failed");
                    progress.soft_failures.push(SoftFailure::MenuUpdate {
                        reason: format!("{:#}", err),
                    });
                }
            }
        }
    }

    if opts.mass_send {
        let news = session.upload_news(&article).await.map_err(|err| {
            error!(?err, "news material upload failed");
            PublishFailure::NewsUpload
        })?;
        session.mass_send(&news).await.map_err(|err| {
            error!(?err, "mass send failed");
            PublishFailure::MassSend
        })?;
        progress.reach(PublishStage::MassSent);
    }

    Ok(PublishedArticle { draft, published })
}

/// Re-host every external image of `body` on the platform and rewrite its
/// URL. Images that fail keep their original URL and are reported.
pub async fn substitute_body_images(
    session: &mut WeixinSession<'_>,
    body: &str,
) -> (String, Vec<SoftFailure>) {
    let mut rewrites = Vec::new();
    let mut failures = Vec::new();

    for url in extract_image_urls(body) {
        match session.upload_image(Some(&url)).await {
            Ok(MediaHandle {
                url: Some(hosted), ..
            }) => {
                // Attribute values come back decoded; the body may hold `&amp;`.
                if url.contains('&') {
                    rewrites.push((url.replace('&', "&amp;"), hosted.clone()));
                }
                rewrites.push((url, hosted));
            }
            Ok(MediaHandle { media_id, url: None }) => {
                warn!(%url, %media_id, "upload returned no image url");
                failures.push(SoftFailure::BodyImage {
                    url,
                    reason: "platform returned no image url".into(),
                });
            }
            Err(err) => {
                warn!(?err, %url, "body image substitution skipped");
                failures.push(SoftFailure::BodyImage {
                    url,
                    reason: format!("{:#}", err),
                });
            }
        }
    }
    (rewrite_urls(body, &rewrites), failures)
}

/// Replace every `(from, to)` pair in one pass. At each position the longest
/// matching `from` wins, so a URL that prefixes another never rewrites it.
fn rewrite_urls(body: &str, rewrites: &[(String, String)]) -> String {
    let mut ordered: Vec<&(String, String)> = rewrites.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while !rest.is_empty() {
        match ordered.iter().find(|(from, _)| rest.starts_with(from.as_str())) {
            Some((from, to)) => {
                out.push_str(to);
                rest = &rest[from.len()..];
            }
            None => {
                let ch_len = rest.chars().next().map_or(1, char::len_utf8);
                out.push_str(&rest[..ch_len]);
                rest = &rest[ch_len..];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_prefers_longest_url() {
        let body = r#"<img src="https://x.com/a.png"><img src="https://x.com/a.png?w=2">图"#;
        let rewrites = vec![
            ("https://x.com/a.png".to_string(), "https://mmbiz.qpic.cn/1/0".to_string()),
            ("https://x.com/a.png?w=2".to_string(), "https://mmbiz.qpic.cn/2/0".to_string()),
        ];
        assert_eq!(
            rewrite_urls(body, &rewrites),
            r#"<img src="https://mmbiz.qpic.cn/1/0"><img src="https://mmbiz.qpic.cn/2/0">图"#
        );
        assert_eq!(rewrite_urls(body, &[]), body);
    }
}
