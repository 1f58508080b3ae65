use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use wx_autopub::config;
use wx_autopub::hotnews::{topics_for, HotNewsClient, HotNewsSource};

#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Titles to print per platform
    #[arg(long, default_value_t = 5)]
    count: usize,

    /// Only print this platform
    #[arg(long)]
    platform: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))?;
    let client = HotNewsClient::new(&cfg.hotnews.api_url)?;

    let lists = client.hot_lists().await?;
    let names: Vec<&str> = match &args.platform {
        Some(name) => vec![name.as_str()],
        None => lists.iter().map(|l| l.name.as_str()).collect(),
    };
    if names.is_empty() {
        bail!("hot list api returned no platforms");
    }

    for name in names {
        let weight = cfg
            .platforms
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.weight);
        match weight {
            Some(w) => println!("{} (weight {:.2}):", name, w),
            None => println!("{} (not configured):", name),
        }
        for (i, title) in topics_for(&lists, name, args.count).iter().enumerate() {
            println!("  {}. {}", i + 1, title);
        }
    }
    Ok(())
}
