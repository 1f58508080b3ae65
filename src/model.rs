use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WeChat rejects draft titles longer than this many characters.
pub const TITLE_MAX_CHARS: usize = 64;
/// WeChat rejects digests longer than this many characters.
pub const DIGEST_MAX_CHARS: usize = 120;

pub const PLATFORM_WEIXIN: &str = "weixin";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    #[serde(rename = "appid")]
    pub app_id: String,
    #[serde(rename = "appsecret")]
    pub app_secret: String,
    pub author: String,
}

impl Credential {
    /// Accounts without an appid or appsecret are placeholders and get skipped.
    pub fn is_configured(&self) -> bool {
        !self.app_id.trim().is_empty() && !self.app_secret.trim().is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("app_id", &self.app_id)
            .field("author", &self.author)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaHandle {
    pub media_id: String,
    pub url: Option<String>,
}

impl MediaHandle {
    pub fn new(media_id: impl Into<String>) -> Self {
        Self {
            media_id: media_id.into(),
            url: None,
        }
    }

    pub fn with_url(media_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            media_id: media_id.into(),
            url: Some(url.into()),
        }
    }
}

/// A publishable article. Title and digest are cut to the platform limits on
/// construction, so every `Article` value is safe to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    pub digest: String,
    pub body: String,
    pub cover: MediaHandle,
}

impl Article {
    pub fn new(title: &str, digest: &str, body: impl Into<String>, cover: MediaHandle) -> Self {
        Self {
            title: truncate_title(title),
            digest: truncate_digest(digest),
            body: body.into(),
            cover,
        }
    }
}

/// First 64 characters, no ellipsis.
pub fn truncate_title(title: &str) -> String {
    title.chars().take(TITLE_MAX_CHARS).collect()
}

/// First 120 characters followed by `...` when the digest is longer.
pub fn truncate_digest(digest: &str) -> String {
    if digest.chars().count() > DIGEST_MAX_CHARS {
        let mut cut: String = digest.chars().take(DIGEST_MAX_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        digest.to_string()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    Draft,
    Published,
    Failed,
    Pending,
    Scheduled,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Draft => "draft",
            PublishStatus::Published => "published",
            PublishStatus::Failed => "failed",
            PublishStatus::Pending => "pending",
            PublishStatus::Scheduled => "scheduled",
        }
    }
}

/// Platform-side handle of a draft or publish job. Never mutated; each
/// workflow step derives a new handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftHandle {
    pub publish_id: String,
    pub status: PublishStatus,
    pub created_at: DateTime<Utc>,
    pub platform: String,
    pub url: Option<String>,
}

impl DraftHandle {
    pub fn draft(media_id: impl Into<String>) -> Self {
        let media_id = media_id.into();
        Self {
            url: Some(format!("https://mp.weixin.qq.com/s/{}", media_id)),
            publish_id: media_id,
            status: PublishStatus::Draft,
            created_at: Utc::now(),
            platform: PLATFORM_WEIXIN.to_string(),
        }
    }

    pub fn published(publish_id: impl Into<String>) -> Self {
        Self {
            publish_id: publish_id.into(),
            status: PublishStatus::Published,
            created_at: Utc::now(),
            platform: PLATFORM_WEIXIN.to_string(),
            url: None,
        }
    }

    pub fn with_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..self.clone()
        }
    }
}

/// Stages of one article's publish attempt, in the order they are reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PublishStage {
    DraftBuilt,
    Submitted,
    Published,
    UrlResolved,
    MenuUpdated,
    MassSent,
}

impl PublishStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStage::DraftBuilt => "DRAFT_BUILT",
            PublishStage::Submitted => "SUBMITTED",
            PublishStage::Published => "PUBLISHED",
            PublishStage::UrlResolved => "URL_RESOLVED",
            PublishStage::MenuUpdated => "MENU_UPDATED",
            PublishStage::MassSent => "MASS_SENT",
        }
    }
}
