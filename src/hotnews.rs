//! Hot-list aggregator client and topic selection.
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Platform;

const WEIGHT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct HotItem {
    #[serde(default)]
    pub title: String,
}

/// One platform's hot list as served by the aggregator.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct HotList {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: Vec<HotItem>,
}

#[derive(Debug, Deserialize)]
struct HotListResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Vec<HotList>>,
}

#[async_trait]
pub trait HotNewsSource: Send + Sync {
    async fn hot_lists(&self) -> Result<Vec<HotList>>;
}

#[derive(Debug, Clone)]
pub struct HotNewsClient {
    http: Client,
    api_url: Url,
}

impl HotNewsClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let api_url = Url::parse(api_url).context("invalid hotnews api_url")?;
        let http = Client::builder()
            .user_agent("wx-autopub/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, api_url })
    }
}

#[async_trait]
impl HotNewsSource for HotNewsClient {
    async fn hot_lists(&self) -> Result<Vec<HotList>> {
        let res = self
            .http
            .get(self.api_url.clone())
            .send()
            .await
            .context("failed to reach hot list api")?;
        if !res.status().is_success() {
            bail!("hot list api error {}", res.status());
        }
        let body = res.text().await.context("failed to read hot list body")?;
        parse_hot_lists(&body)
    }
}

pub fn parse_hot_lists(body: &str) -> Result<Vec<HotList>> {
    let parsed: HotListResponse =
        serde_json::from_str(body).context("invalid hot list response")?;
    match parsed {
        HotListResponse {
            success: true,
            data: Some(lists),
        } => Ok(lists),
        _ => bail!("hot list api reported no data"),
    }
}

/// Weighted random choice over `platforms`. When the weights do not add up
/// to 1 the first platform is returned.
pub fn pick_platform<'p, R: Rng + ?Sized>(
    platforms: &'p [Platform],
    rng: &mut R,
) -> Option<&'p Platform> {
    let first = platforms.first()?;
    let total: f64 = platforms.iter().map(|p| p.weight).sum();
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        warn!(total, "platform weights do not sum to 1, using the first platform");
        return Some(first);
    }

    let roll: f64 = rng.random();
    let mut cumulative = 0.0;
    for platform in platforms {
        cumulative += platform.weight;
        if roll < cumulative {
            return Some(platform);
        }
    }
    platforms.last()
}

/// The first `n` titles listed for `platform`.
pub fn topics_for(lists: &[HotList], platform: &str, n: usize) -> Vec<String> {
    lists
        .iter()
        .find(|list| list.name == platform)
        .map(|list| {
            list.data
                .iter()
                .map(|item| item.title.trim())
                .filter(|t| !t.is_empty())
                .take(n)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicChoice {
    pub platform: String,
    pub topic: String,
    /// Set when the configured fallback topic was used.
    pub fallback: bool,
}

pub async fn select_topic(
    source: &dyn HotNewsSource,
    platforms: &[Platform],
    fallback_topic: &str,
) -> TopicChoice {
    let platform = {
        let mut rng = rand::rng();
        pick_platform(platforms, &mut rng).map(|p| p.name.clone())
    };
    let Some(platform) = platform else {
        warn!("no platforms configured, using fallback topic");
        return fallback(String::new(), fallback_topic);
    };

    let lists = match source.hot_lists().await {
        Ok(lists) => lists,
        Err(err) => {
            warn!(?err, %platform, "hot list fetch failed, using fallback topic");
            return fallback(platform, fallback_topic);
        }
    };
    match topics_for(&lists, &platform, 1).into_iter().next() {
        Some(topic) => {
            info!(%platform, %topic, "selected hot topic");
            TopicChoice {
                platform,
                topic,
                fallback: false,
            }
        }
        None => {
            warn!(%platform, "platform has no hot topics, using fallback topic");
            fallback(platform, fallback_topic)
        }
    }
}

fn fallback(platform: String, topic: &str) -> TopicChoice {
    TopicChoice {
        platform,
        topic: topic.to_string(),
        fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn platforms(weights: &[(&str, f64)]) -> Vec<Platform> {
        weights
            .iter()
            .map(|(name, weight)| Platform {
                name: name.to_string(),
                weight: *weight,
            })
            .collect()
    }

    fn lists() -> Vec<HotList> {
        vec![
            HotList {
                name: "微博".into(),
                data: vec![
                    HotItem { title: "话题一".into() },
                    HotItem { title: " ".into() },
                    HotItem { title: "话题二".into() },
                ],
            },
            HotList {
                name: "知乎热榜".into(),
                data: vec![],
            },
        ]
    }

    struct Fixed(Result<Vec<HotList>, String>);

    #[async_trait]
    impl HotNewsSource for Fixed {
        async fn hot_lists(&self) -> Result<Vec<HotList>> {
            self.0.clone().map_err(|e| anyhow!(e))
        }
    }

    #[test]
    fn parses_aggregator_payload() {
        let body = r#"{"success":true,"data":[{"name":"微博","data":[{"title":"a","hot":"1"}]}]}"#;
        let lists = parse_hot_lists(body).unwrap();
        assert_eq!(lists[0].name, "微博");
        assert_eq!(lists[0].data[0].title, "a");

        assert!(parse_hot_lists(r#"{"success":false}"#).is_err());
        assert!(parse_hot_lists("not json").is_err());
    }

    #[test]
    fn weighted_pick_covers_every_platform() {
        let ps = platforms(&[("微博", 0.5), ("抖音", 0.3), ("B站", 0.2)]);
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(pick_platform(&ps, &mut rng).unwrap().name.clone());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn zero_weight_is_never_picked() {
        let ps = platforms(&[("微博", 1.0), ("抖音", 0.0)]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            assert_eq!(pick_platform(&ps, &mut rng).unwrap().name, "微博");
        }
    }

    #[test]
    fn bad_weights_fall_back_to_first() {
        let ps = platforms(&[("微博", 0.2), ("抖音", 0.2)]);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            assert_eq!(pick_platform(&ps, &mut rng).unwrap().name, "微博");
        }
        assert!(pick_platform(&[], &mut rng).is_none());
    }

    #[test]
    fn topics_skip_blank_titles() {
        assert_eq!(topics_for(&lists(), "微博", 2), vec!["话题一", "话题二"]);
        assert!(topics_for(&lists(), "知乎热榜", 1).is_empty());
        assert!(topics_for(&lists(), "unknown", 1).is_empty());
    }

    #[tokio::test]
    async fn select_topic_uses_hot_list() {
        let ps = platforms(&[("微博", 1.0)]);
        let choice = select_topic(&Fixed(Ok(lists())), &ps, "兜底").await;
        assert_eq!(
            choice,
            TopicChoice {
                platform: "微博".into(),
                topic: "话题一".into(),
                fallback: false,
            }
        );
    }

    #[tokio::test]
    async fn select_topic_falls_back() {
        let ps = platforms(&[("知乎热榜", 1.0)]);
        let empty = select_topic(&Fixed(Ok(lists())), &ps, "兜底").await;
        assert!(empty.fallback);
        assert_eq!(empty.topic, "兜底");

        let failed = select_topic(&Fixed(Err("offline".into())), &ps, "兜底").await;
        assert!(failed.fallback);
        assert_eq!(failed.platform, "知乎热榜");
    }
}
