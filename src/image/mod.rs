//! Cover image providers and image loading shared by the uploader.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use crate::config::{ImageApiType, ImgApi};
use crate::weixin::ImageUpload;

pub mod ali;
pub mod picsum;

pub use ali::AliImageGenerator;
pub use picsum::PicsumImages;

pub const DEFAULT_MIME: &str = "image/jpeg";

/// Requested image dimensions, written `width*height` as the providers expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const COVER: ImageSize = ImageSize {
        width: 900,
        height: 384,
    };
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*{}", self.width, self.height)
    }
}

impl FromStr for ImageSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once('*')
            .ok_or_else(|| anyhow!("image size must look like 900*384, got {}", s))?;
        Ok(Self {
            width: w.trim().parse().context("invalid image width")?,
            height: h.trim().parse().context("invalid image height")?,
        })
    }
}

/// Produces an image reference (remote URL or local path) for a prompt.
/// `None` means the caller should fall back to its default asset.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve(&self, prompt: &str, size: ImageSize) -> Option<String>;
}

/// Pick the provider named by the configuration. Done once at startup.
pub fn resolver_for(
    img_api: &ImgApi,
    image_dir: PathBuf,
    fetcher: Arc<dyn AssetFetcher>,
) -> Result<Box<dyn ImageResolver>> {
    let resolver: Box<dyn ImageResolver> = match img_api.api_type {
        ImageApiType::Ali => Box::new(AliImageGenerator::new(
            img_api.ali.api_key.clone(),
            img_api.ali.model.clone(),
            image_dir,
            fetcher,
        )?),
        ImageApiType::Picsum => Box::new(PicsumImages::new(image_dir, fetcher)),
    };
    Ok(resolver)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Downloads remote assets into memory.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset>;
}

#[derive(Clone, Debug)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent("wx-autopub/0.1")
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to download {}", url))?;
        if !res.status().is_success() {
            return Err(anyhow!("download of {} failed with {}", url, res.status()));
        }
        let content_type = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = res
            .bytes()
            .await
            .with_context(|| format!("failed to read body of {}", url))?;
        Ok(FetchedAsset {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

pub fn is_remote(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Load an image reference into memory: remote URLs are downloaded, anything
/// else is read as a local path.
pub async fn load_image(fetcher: &dyn AssetFetcher, reference: &str) -> Result<ImageUpload> {
    if is_remote(reference) {
        let asset = fetcher.fetch(reference).await?;
        let mime = asset
            .content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| DEFAULT_MIME.to_string());
        let file_name = format!("image.{}", extension_for_mime(&mime).unwrap_or("jpg"));
        return Ok(ImageUpload {
            bytes: asset.bytes,
            file_name,
            mime,
        });
    }

    let path = Path::new(reference);
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("local image not found: {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image.jpg")
        .to_string();
    Ok(ImageUpload {
        bytes,
        file_name,
        mime: mime_from_path(path).unwrap_or(DEFAULT_MIME).to_string(),
    })
}

/// Download `url` into `dir` under a fresh file name and return its path.
pub async fn save_image(fetcher: &dyn AssetFetcher, url: &str, dir: &Path) -> Result<PathBuf> {
    let asset = fetcher.fetch(url).await?;
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create image dir: {}", dir.display()))?;

    let ext = asset
        .content_type
        .as_deref()
        .and_then(|ct| extension_for_mime(ct.split(';').next().unwrap_or(ct).trim()))
        .unwrap_or("jpg");
    let path = dir.join(format!("{}.{}", uuid::Uuid::new_v4(), ext));
    fs::write(&path, &asset.bytes)
        .await
        .with_context(|| format!("failed to write image: {}", path.display()))?;
    debug!(%url, path = %path.display(), bytes = asset.bytes.len(), "saved image");
    Ok(path)
}

pub fn mime_from_path(path: &Path) -> Option<&'static str> {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
    {
        Some(ext) if ext == "jpg" || ext == "jpeg" => Some("image/jpeg"),
        Some(ext) if ext == "png" => Some("image/png"),
        Some(ext) if ext == "gif" => Some("image/gif"),
        Some(ext) if ext == "bmp" => Some("image/bmp"),
        Some(ext) if ext == "webp" => Some("image/webp"),
        _ => None,
    }
}

pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/bmp" => Some("bmp"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}
