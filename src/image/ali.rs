use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{save_image, AssetFetcher, ImageResolver, ImageSize};

const DASHSCOPE_API_BASE: &str = "https://dashscope.aliyuncs.com/api/v1/";
const NEGATIVE_PROMPT: &str = "低分辨率、错误、最差质量、低质量、残缺、多余的手指、比例不良";
const MAX_TASK_POLLS: u32 = 30;
const TASK_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Text-to-image through DashScope's asynchronous task API.
#[derive(Clone)]
pub struct AliImageGenerator {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
    image_dir: PathBuf,
    fetcher: Arc<dyn AssetFetcher>,
}

impl fmt::Debug for AliImageGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliImageGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Succeeded(String),
    Failed(String),
}

impl AliImageGenerator {
    pub fn new(
        api_key: String,
        model: String,
        image_dir: PathBuf,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> Result<Self> {
        let base_url = Url::parse(DASHSCOPE_API_BASE).context("invalid DashScope URL")?;
        let http = Client::builder()
            .user_agent("wx-autopub/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
            model,
            image_dir,
            fetcher,
        })
    }

    async fn submit(&self, prompt: &str, size: ImageSize) -> Result<String> {
        let url = self
            .base_url
            .join("services/aigc/text2image/image-synthesis")?;
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .header("X-DashScope-Async", "enable")
            .json(&build_synthesis_request(&self.model, prompt, size))
            .send()
            .await
            .context("failed to reach DashScope")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("dashscope submit error {}: {}", status, body);
        }
        let payload: Value = res.json().await.context("invalid DashScope response")?;
        payload
            .pointer("/output/task_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("dashscope response missing task_id: {}", payload))
    }

    async fn task_state(&self, task_id: &str) -> Result<TaskState> {
        let url = self.base_url.join(&format!("tasks/{}", task_id))?;
        let res = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("failed to reach DashScope")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("dashscope task error {}: {}", status, body);
        }
        let payload: Value = res.json().await.context("invalid DashScope task response")?;
        Ok(parse_task_state(&payload))
    }

    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<String> {
        let task_id = self.submit(prompt, size).await?;
        info!(%task_id, model = %self.model, %size, "submitted image synthesis task");

        for _ in 0..MAX_TASK_POLLS {
            match self.task_state(&task_id).await? {
                TaskState::Succeeded(url) => return Ok(url),
                TaskState::Failed(reason) => bail!("image synthesis failed: {}", reason),
                TaskState::Running => tokio::time::sleep(TASK_POLL_INTERVAL).await,
            }
        }
        bail!("image synthesis task {} did not finish in time", task_id)
    }
}

#[async_trait]
impl ImageResolver for AliImageGenerator {
    async fn resolve(&self, prompt: &str, size: ImageSize) -> Option<String> {
        let url = match self.generate(prompt, size).await {
            Ok(url) => url,
            Err(err) => {
                warn!(?err, "ali image generation failed");
                return None;
            }
        };
        // Only the remote URL is uploaded; the local copy is best effort.
        if let Err(err) = save_image(self.fetcher.as_ref(), &url, &self.image_dir).await {
            warn!(?err, %url, "failed to keep a local copy of the generated image");
        }
        Some(url)
    }
}

pub fn build_synthesis_request(model: &str, prompt: &str, size: ImageSize) -> Value {
    json!({
        "model": model,
        "input": {
            "prompt": prompt,
            "negative_prompt": NEGATIVE_PROMPT,
        },
        "parameters": {
            "size": size.to_string(),
            "n": 1,
        }
    })
}

pub fn parse_task_state(payload: &Value) -> TaskState {
    let status = payload
        .pointer("/output/task_status")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN");
    match status {
        "PENDING" | "RUNNING" => TaskState::Running,
        "SUCCEEDED" => match payload
            .pointer("/output/results/0/url")
            .and_then(Value::as_str)
        {
            Some(url) => TaskState::Succeeded(url.to_string()),
            None => TaskState::Failed("task succeeded without a result url".into()),
        },
        other => {
            let message = payload
                .pointer("/output/message")
                .and_then(Value::as_str)
                .unwrap_or("");
            TaskState::Failed(format!("{} {}", other, message).trim().to_string())
        }
    }
}
