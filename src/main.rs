use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use wx_autopub::config;
use wx_autopub::runner::{spawn_run, StatusUpdate};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Article HTML to publish (defaults to `{data_dir}/tmp_article.html`)
    #[arg(long)]
    article: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let article_path = args
        .article
        .unwrap_or_else(|| cfg.default_article_path());
    info!(article = %article_path.display(), "starting publish run");

    let cancel = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let ctrl_c_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current account");
            ctrl_c_flag.store(true, Ordering::SeqCst);
        }
    });

    let worker = spawn_run(cfg, article_path, cancel, tx);

    while let Some(update) = rx.recv().await {
        match update {
            StatusUpdate::Started { accounts } => info!(accounts, "run started"),
            StatusUpdate::Skipped { author } => info!(%author, "account skipped"),
            StatusUpdate::Topic {
                author,
                platform,
                topic,
            } => info!(%author, %platform, %topic, "topic selected"),
            StatusUpdate::Finished { author, message } => {
                info!(%author, %message, "account finished")
            }
            StatusUpdate::Cancelled => warn!("run cancelled"),
            StatusUpdate::Done => info!("run finished"),
        }
    }

    let reports = worker.await??;
    let failed = reports.iter().filter(|r| !r.report.is_success()).count();
    if failed > 0 {
        error!(failed, total = reports.len(), "some accounts failed to publish");
    }
    Ok(())
}
