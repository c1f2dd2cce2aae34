use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use logship::cli::ship::{self, Overrides};
use logship::config::resolve_config_path;

#[derive(Parser)]
#[command(name = "logship")]
#[command(about = "Ship JSON log events from stdin to a search backend", long_about = None)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend URL; repeat to configure failover targets
    #[arg(long = "url")]
    urls: Vec<String>,

    /// Index name prefix
    #[arg(long)]
    index: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they never mix with piped output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logship=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());
    let overrides = Overrides {
        urls: cli.urls,
        index: cli.index,
    };

    ship::run(config_path, overrides).await?;

    Ok(())
}
