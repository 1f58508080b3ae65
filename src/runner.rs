//! Publishes one article across every configured account.
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::hotnews::{select_topic, HotNewsClient, HotNewsSource, TopicChoice};
use crate::image::{resolver_for, AssetFetcher, HttpFetcher, ImageResolver};
use crate::publisher::{publish_article, PublishOptions, PublishReport};
use crate::weixin::{WeixinApi, WeixinClient, WeixinSession};

/// Progress events for whoever drives the run (CLI today).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Started { accounts: usize },
    Skipped { author: String },
    Topic {
        author: String,
        platform: String,
        topic: String,
    },
    Finished { author: String, message: String },
    Cancelled,
    Done,
}

#[derive(Debug, Clone)]
pub struct AccountReport {
    pub author: String,
    pub topic: TopicChoice,
    pub report: PublishReport,
    /// Where the rewritten body was written, `None` if writing failed.
    pub saved_to: Option<PathBuf>,
}

/// Services shared by every account of a run.
#[derive(Clone, Copy)]
pub struct RunDeps<'a> {
    pub api: &'a dyn WeixinApi,
    pub fetcher: &'a dyn AssetFetcher,
    pub images: &'a dyn ImageResolver,
    pub hotnews: &'a dyn HotNewsSource,
}

#[instrument(skip_all, fields(accounts = cfg.wechat.credentials.len()))]
pub async fn run_accounts(
    cfg: &Config,
    deps: RunDeps<'_>,
    article: &str,
    cancel: &AtomicBool,
    tx: &UnboundedSender<StatusUpdate>,
) -> Result<Vec<AccountReport>> {
    let opts = PublishOptions::from_config(cfg);
    let mut reports = Vec::new();
    let _ = tx.send(StatusUpdate::Started {
        accounts: cfg.wechat.credentials.len(),
    });

    for credential in &cfg.wechat.credentials {
        if cancel.load(Ordering::SeqCst) {
            warn!("run cancelled");
            let _ = tx.send(StatusUpdate::Cancelled);
            return Ok(reports);
        }
        if !credential.is_configured() {
            info!(author = %credential.author, "credential not configured, skipping");
            let _ = tx.send(StatusUpdate::Skipped {
                author: credential.author.clone(),
            });
            continue;
        }

        let topic = select_topic(deps.hotnews, &cfg.platforms, &cfg.app.fallback_topic).await;
        let _ = tx.send(StatusUpdate::Topic {
            author: credential.author.clone(),
            platform: topic.platform.clone(),
            topic: topic.topic.clone(),
        });

        let mut session = WeixinSession::new(deps.api, deps.fetcher, credential.clone());
        let report = publish_article(&mut session, deps.images, article, &opts).await;

        let final_path = cfg.final_article_path();
        let saved_to = match tokio::fs::write(&final_path, &report.body).await {
            Ok(()) => Some(final_path),
            Err(err) => {
                warn!(?err, path = %final_path.display(), "failed to write final article");
                None
            }
        };

        let _ = tx.send(StatusUpdate::Finished {
            author: credential.author.clone(),
            message: report.message(),
        });
        reports.push(AccountReport {
            author: credential.author.clone(),
            topic,
            report,
            saved_to,
        });
    }

    let _ = tx.send(StatusUpdate::Done);
    Ok(reports)
}

/// Build the real clients and run every account on a background task.
pub fn spawn_run(
    cfg: Config,
    article_path: PathBuf,
    cancel: Arc<AtomicBool>,
    tx: UnboundedSender<StatusUpdate>,
) -> JoinHandle<Result<Vec<AccountReport>>> {
    tokio::spawn(async move {
        let article = tokio::fs::read_to_string(&article_path)
            .await
            .with_context(|| format!("failed to read article {}", article_path.display()))?;

        let api = WeixinClient::new()?;
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(HttpFetcher::new()?);
        let images = resolver_for(&cfg.img_api, cfg.image_dir(), fetcher.clone())?;
        let hotnews = HotNewsClient::new(&cfg.hotnews.api_url)?;
        let deps = RunDeps {
            api: &api,
            fetcher: fetcher.as_ref(),
            images: images.as_ref(),
            hotnews: &hotnews,
        };

        run_accounts(&cfg, deps, &article, &cancel, &tx).await
    })
}
