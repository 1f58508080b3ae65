use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, warn};

use crate::model::{Article, MediaHandle};

pub mod session;
pub mod token;

pub use session::WeixinSession;
pub use token::{Clock, SystemClock, TokenCache};

const WEIXIN_API_BASE: &str = "https://api.weixin.qq.com/cgi-bin/";

/// Pre-existing image on the platform used as cover when no image could be
/// produced at all.
pub const FALLBACK_COVER_MEDIA_ID: &str =
    "SwCSRjrdGJNaWioRQUHzgF68BHFkSlb_f5xlTquvsOSA6Yy0ZRjFo0aW9eS3JJu_";

#[derive(Clone)]
pub struct WeixinClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for WeixinClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeixinClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64,
}

/// Binary image ready for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime: String,
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// The WeChat official-account endpoints used by the publishing workflow.
/// Every call fails on transport errors, a non-zero `errcode`, or a missing
/// response field.
#[async_trait]
pub trait WeixinApi: Send + Sync {
    async fn fetch_token(&self, app_id: &str, app_secret: &str) -> Result<TokenGrant>;

    async fn upload_image(&self, access_token: &str, image: ImageUpload) -> Result<MediaHandle>;

    /// Returns the draft's `media_id`.
    async fn add_draft(&self, access_token: &str, article: &Article, author: &str)
        -> Result<String>;

    /// Returns the `publish_id` of the publish job.
    async fn submit_publish(&self, access_token: &str, media_id: &str) -> Result<String>;

    /// `Ok(None)` while the platform has not produced the article URL yet.
    async fn publish_status(&self, access_token: &str, publish_id: &str)
        -> Result<Option<String>>;

    async fn create_menu(&self, access_token: &str, article_url: &str) -> Result<()>;

    /// Returns the `media_id` of the uploaded news material.
    async fn upload_news(&self, access_token: &str, article: &Article, author: &str)
        -> Result<String>;

    async fn mass_send(&self, access_token: &str, media_id: &str) -> Result<()>;
}

impl WeixinClient {
    pub fn new() -> Result<Self> {
        let base_url = Url::parse(WEIXIN_API_BASE).context("invalid default WeChat URL")?;
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("wx-autopub/0.1")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str, access_token: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .context("invalid WeChat base URL")?;
        url.query_pairs_mut()
            .append_pair("access_token", access_token);
        Ok(url)
    }

    pub fn build_json_request(
        &self,
        path: &str,
        access_token: &str,
        body: &Value,
    ) -> Result<reqwest::Request> {
        let endpoint = self.endpoint(path, access_token)?;
        self.http
            .post(endpoint)
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build WeChat request")
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Value> {
        let path = request.url().path().to_string();
        debug!(%path, "sending weixin request");
        let res = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("failed to reach WeChat ({})", path))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%path, %status, "weixin http error");
            return Err(anyhow!("weixin http error {}: {}", status, body));
        }

        let payload: Value = res
            .json()
            .await
            .with_context(|| format!("invalid WeChat response JSON ({})", path))?;
        check_errcode(payload)
    }

    async fn post_json(&self, path: &str, access_token: &str, body: Value) -> Result<Value> {
        let request = self.build_json_request(path, access_token, &body)?;
        self.execute(request).await
    }
}

#[async_trait]
impl WeixinApi for WeixinClient {
    async fn fetch_token(&self, app_id: &str, app_secret: &str) -> Result<TokenGrant> {
        let mut url = self
            .base_url
            .join("token")
            .context("invalid WeChat base URL")?;
        url.query_pairs_mut()
            .append_pair("grant_type", "client_credential")
            .append_pair("appid", app_id)
            .append_pair("secret", app_secret);
        let request = self
            .http
            .get(url)
            .build()
            .context("failed to build token request")?;
        let payload = self.execute(request).await?;
        parse_token_grant(&payload)
    }

    async fn upload_image(&self, access_token: &str, image: ImageUpload) -> Result<MediaHandle> {
        let mut url = self.endpoint("material/add_material", access_token)?;
        url.query_pairs_mut().append_pair("type", "image");

        let part = reqwest::multipart::Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(&image.mime)
            .context("invalid image MIME type")?;
        let form = reqwest::multipart::Form::new().part("media", part);
        let request = self
            .http
            .post(url)
            .multipart(form)
            .build()
            .context("failed to build image upload request")?;

        let payload = self.execute(request).await?;
        let media_id = require_str(&payload, "media_id")?;
        Ok(MediaHandle {
            media_id,
            url: optional_str(&payload, "url"),
        })
    }

    async fn add_draft(
        &self,
        access_token: &str,
        article: &Article,
        author: &str,
    ) -> Result<String> {
        let payload = self
            .post_json("draft/add", access_token, build_draft_request(article, author))
            .await?;
        require_str(&payload, "media_id")
    }

    async fn submit_publish(&self, access_token: &str, media_id: &str) -> Result<String> {
        let payload = self
            .post_json(
                "freepublish/submit",
                access_token,
                json!({ "media_id": media_id }),
            )
            .await?;
        require_str(&payload, "publish_id")
    }

    async fn publish_status(
        &self,
        access_token: &str,
        publish_id: &str,
    ) -> Result<Option<String>> {
        let payload = self
            .post_json(
                "freepublish/get",
                access_token,
                json!({ "publish_id": publish_id }),
            )
            .await?;
        Ok(parse_article_url(&payload))
    }

    async fn create_menu(&self, access_token: &str, article_url: &str) -> Result<()> {
        self.post_json("menu/create", access_token, build_menu_request(article_url))
            .await?;
        Ok(())
    }

    async fn upload_news(
        &self,
        access_token: &str,
        article: &Article,
        author: &str,
    ) -> Result<String> {
        let payload = self
            .post_json(
                "media/uploadnews",
                access_token,
                build_news_request(article, author),
            )
            .await?;
        require_str(&payload, "media_id")
    }

    async fn mass_send(&self, access_token: &str, media_id: &str) -> Result<()> {
        self.post_json(
            "message/mass/sendall",
            access_token,
            build_mass_send_request(media_id),
        )
        .await?;
        Ok(())
    }
}

/// Fail when the payload carries a non-zero `errcode`.
pub fn check_errcode(payload: Value) -> Result<Value> {
    match payload.get("errcode").and_then(Value::as_i64) {
        Some(code) if code != 0 => {
            let msg = payload
                .get("errmsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            Err(anyhow!("weixin error {}: {}", code, msg))
        }
        _ => Ok(payload),
    }
}

/// Read a string (or numeric) identifier field, failing when absent or empty.
pub fn require_str(payload: &Value, field: &str) -> Result<String> {
    match optional_str(payload, field) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => bail!("weixin response missing {}", field),
    }
}

fn optional_str(payload: &Value, field: &str) -> Option<String> {
    match payload.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_token_grant(payload: &Value) -> Result<TokenGrant> {
    let access_token = require_str(payload, "access_token")?;
    let expires_in = payload
        .get("expires_in")
        .and_then(Value::as_i64)
        .unwrap_or(7200);
    Ok(TokenGrant {
        access_token,
        expires_in,
    })
}

/// The article URL of a finished publish job, if the platform reports one.
pub fn parse_article_url(payload: &Value) -> Option<String> {
    optional_str(payload, "article_id").filter(|id| !id.is_empty())?;
    payload
        .pointer("/article_detail/item/0/article_url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

pub fn build_draft_request(article: &Article, author: &str) -> Value {
    json!({
        "articles": [
            {
                "title": article.title,
                "author": author,
                "digest": article.digest,
                "content": article.body,
                "thumb_media_id": article.cover.media_id,
                "need_open_comment": 1,
                "only_fans_can_comment": 0,
            }
        ]
    })
}

pub fn build_news_request(article: &Article, author: &str) -> Value {
    json!({
        "articles": [
            {
                "thumb_media_id": article.cover.media_id,
                "author": author,
                "title": article.title,
                "content": article.body,
                "digest": article.digest,
                "show_cover_pic": 1,
                "need_open_comment": 1,
                "only_fans_can_comment": 0,
            }
        ]
    })
}

pub fn build_menu_request(article_url: &str) -> Value {
    json!({
        "button": [
            {
                "type": "view",
                "name": "最新文章",
                "url": article_url,
            }
        ]
    })
}

pub fn build_mass_send_request(media_id: &str) -> Value {
    json!({
        "filter": { "is_to_all": true },
        "mpnews": { "media_id": media_id },
        "msgtype": "mpnews",
        "send_ignore_reprint": 1,
    })
}
