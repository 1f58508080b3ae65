use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use super::{save_image, AssetFetcher, ImageResolver, ImageSize};

/// Stock photos from picsum.photos, saved locally. The prompt is ignored.
pub struct PicsumImages {
    image_dir: PathBuf,
    fetcher: Arc<dyn AssetFetcher>,
}

impl PicsumImages {
    pub fn new(image_dir: PathBuf, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self { image_dir, fetcher }
    }
}

pub fn picsum_url(size: ImageSize) -> String {
    format!(
        "https://picsum.photos/{}/{}?random=1",
        size.width, size.height
    )
}

#[async_trait]
impl ImageResolver for PicsumImages {
    async fn resolve(&self, _prompt: &str, size: ImageSize) -> Option<String> {
        let url = picsum_url(size);
        match save_image(self.fetcher.as_ref(), &url, &self.image_dir).await {
            Ok(path) => Some(path.to_string_lossy().into_owned()),
            Err(err) => {
                warn!(?err, %url, "picsum download failed");
                None
            }
        }
    }
}
