//! Configuration loader and validator for the WeChat auto-publisher.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::model::Credential;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub wechat: Wechat,
    pub img_api: ImgApi,
    pub hotnews: HotNews,
    pub platforms: Vec<Platform>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub fallback_topic: String,
    pub poll_max_retries: u32,
    pub poll_interval_ms: u64,
    #[serde(default = "default_true")]
    pub update_menu: bool,
    #[serde(default = "default_true")]
    pub mass_send: bool,
}

fn default_true() -> bool {
    true
}

/// WeChat public account credentials, one entry per account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wechat {
    pub credentials: Vec<Credential>,
}

/// Image provider selection and per-provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImgApi {
    pub api_type: ImageApiType,
    pub ali: ImgApiKey,
    pub picsum: ImgApiKey,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageApiType {
    Ali,
    Picsum,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImgApiKey {
    pub api_key: String,
    pub model: String,
}

impl ImgApi {
    /// Settings of the provider selected by `api_type`.
    pub fn selected(&self) -> &ImgApiKey {
        match self.api_type {
            ImageApiType::Ali => &self.ali,
            ImageApiType::Picsum => &self.picsum,
        }
    }
}

/// Hot-list aggregator endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HotNews {
    pub api_url: String,
}

/// Hot-list platform with its selection weight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Platform {
    pub name: String,
    pub weight: f64,
}

impl Config {
    /// Ensure required directories exist (`app.data_dir` and its `image` dir).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.image_dir())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.app.data_dir)
    }

    /// Where generated and downloaded images are stored.
    pub fn image_dir(&self) -> PathBuf {
        self.data_dir().join("image")
    }

    /// Default location of the generated article handed over by the writer.
    pub fn default_article_path(&self) -> PathBuf {
        self.data_dir().join("tmp_article.html")
    }

    /// Where the rewritten article body is persisted after publishing.
    pub fn final_article_path(&self) -> PathBuf {
        self.data_dir().join("final_article.html")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.app.poll_interval_ms)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.poll_max_retries == 0 {
        return Err(ConfigError::Invalid("app.poll_max_retries must be > 0"));
    }
    if cfg.app.fallback_topic.trim().is_empty() {
        return Err(ConfigError::Invalid("app.fallback_topic must be non-empty"));
    }

    if cfg.img_api.api_type == ImageApiType::Ali {
        let ali = cfg.img_api.selected();
        if ali.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("img_api.ali.api_key must be non-empty"));
        }
        if ali.model.trim().is_empty() {
            return Err(ConfigError::Invalid("img_api.ali.model must be non-empty"));
        }
    }

    if cfg.hotnews.api_url.trim().is_empty() {
        return Err(ConfigError::Invalid("hotnews.api_url must be non-empty"));
    }

    if cfg.platforms.is_empty() {
        return Err(ConfigError::Invalid("platforms must list at least one platform"));
    }
    if cfg.platforms.iter().any(|p| p.name.trim().is_empty()) {
        return Err(ConfigError::Invalid("platforms[].name must be non-empty"));
    }
    if cfg.platforms.iter().any(|p| p.weight < 0.0) {
        return Err(ConfigError::Invalid("platforms[].weight must be >= 0"));
    }
    // Empty appid/appsecret entries are placeholders and skipped at run time.

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  fallback_topic: "DeepSeek AI 提效秘籍"
  poll_max_retries: 10
  poll_interval_ms: 2000
  update_menu: true
  mass_send: true

wechat:
  credentials:
    - appid: "YOUR_WECHAT_APPID"
      appsecret: "YOUR_WECHAT_APPSECRET"
      author: "作者01"
    - appid: ""
      appsecret: ""
      author: "作者02"

img_api:
  api_type: picsum
  ali:
    api_key: ""
    model: "wanx2.0-t2i-turbo"
  picsum:
    api_key: ""
    model: ""

hotnews:
  api_url: "https://api.vvhan.com/api/hotlist/all"

platforms:
  - name: "微博"
    weight: 0.3
  - name: "抖音"
    weight: 0.25
  - name: "哔哩哔哩"
    weight: 0.12
  - name: "知乎热榜"
    weight: 0.10
  - name: "百度热点"
    weight: 0.08
  - name: "今日头条"
    weight: 0.07
  - name: "虎扑"
    weight: 0.05
  - name: "豆瓣小组"
    weight: 0.02
  - name: "澎湃新闻"
    weight: 0.01
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.img_api.api_type, ImageApiType::Picsum);
        assert_eq!(cfg.platforms.len(), 9);
        assert!(cfg.wechat.credentials[0].is_configured());
        assert!(!cfg.wechat.credentials[1].is_configured());
    }

    #[test]
    fn menu_and_mass_send_default_to_enabled() {
        let yaml = example()
            .replace("  update_menu: true\n", "")
            .replace("  mass_send: true\n", "");
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(cfg.app.update_menu);
        assert!(cfg.app.mass_send);
    }

    #[test]
    fn invalid_poll_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.poll_interval_ms = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("poll_interval_ms")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.poll_max_retries = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("poll_max_retries")), _ => panic!("wrong error") }
    }

    #[test]
    fn ali_requires_key_and_model() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.img_api.api_type = ImageApiType::Ali;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("ali.api_key")), _ => panic!("wrong error") }

        cfg.img_api.ali.api_key = "sk-test".into();
        validate(&cfg).unwrap();
        assert_eq!(cfg.img_api.selected().model, "wanx2.0-t2i-turbo");

        cfg.img_api.ali.model = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_platforms() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.platforms.clear();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.platforms[0].weight = -0.1;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_image_provider_is_rejected() {
        let yaml = example().replace("api_type: picsum", "api_type: midjourney");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn ensure_dirs_creates_image_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.join("image").exists());
        assert_eq!(cfg.final_article_path(), data_path.join("final_article.html"));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.wechat.credentials[0].author, "作者01");
        assert_eq!(cfg.poll_interval(), Duration::from_millis(2000));
    }
}
