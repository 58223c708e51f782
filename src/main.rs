mod app;
mod catalog;
mod config;
mod ingest;
mod input;
mod playback;
mod player;
mod remote;
mod sidebar;
mod storage;
#[cfg(test)]
mod testutil;

use anyhow::Context;
use catalog::CatalogStore;
use clap::{Parser, Subcommand};
use ingest::IngestionCoordinator;
use ingest::state::IngestEvent;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "livetv", version, about = "Live TV from remote M3U playlists, played through mpv")]
struct Cli {
    /// Override config file path.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest the catalog and play the default channel (default).
    Run,
    /// Ingest the catalog headless and report the resolved channel.
    Ingest,
    /// List catalog channels in insertion order.
    Channels {
        /// Only channels from this remote slot (e.g. urlm3u1).
        #[arg(long)]
        source: Option<String>,
    },
    /// Print the sidebar selection for the current catalog.
    Sidebar,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref()).context("load config")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let mut app = app::App::new(cfg)?;
            app.run().await?;
        }
        Command::Ingest => {
            let store = CatalogStore::open_with_config(&cfg).context("open catalog")?;
            let (tx, mut rx) = mpsc::channel::<IngestEvent>(256);
            let coordinator = IngestionCoordinator::from_config(&cfg, store, tx)?;
            let printer = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    match ev {
                        IngestEvent::Progress(state) => println!("{}", state.label()),
                        IngestEvent::ChannelResolved(c) => println!("default channel: {} ({})", c.name, c.url),
                        IngestEvent::Settled => println!("all sources processed"),
                    }
                }
            });
            let report = coordinator.run().await;
            drop(coordinator);
            let _ = printer.await;
            if report.full_pass {
                println!("full pass, remote version {:?}", report.remote_version);
            }
            for (key, outcome) in &report.sources {
                println!("{key}: {outcome:?}");
            }
            if report.resolved.is_none() {
                anyhow::bail!("no live channels found");
            }
        }
        Command::Channels { source } => {
            let store = CatalogStore::open_with_config(&cfg).context("open catalog")?;
            let channels = match source {
                Some(key) => {
                    let desc = store
                        .get_source_descriptor(&key)
                        .await
                        .with_context(|| format!("unknown source {key}"))?;
                    match desc.id {
                        Some(id) => store.get_channels_by_source(id).await,
                        None => Vec::new(),
                    }
                }
                None => store.get_all_channels_ordered_by_insertion().await,
            };
            print_channels(&channels);
        }
        Command::Sidebar => {
            let store = CatalogStore::open_with_config(&cfg).context("open catalog")?;
            let selector = sidebar::SidebarSelector::new(store, &cfg.catalog);
            print_channels(&selector.select_for_sidebar().await);
        }
    }

    Ok(())
}

fn print_channels(channels: &[catalog::ChannelRecord]) {
    for (i, c) in channels.iter().enumerate() {
        let group = c.group.as_deref().unwrap_or("-");
        println!("{:04}. {}  [{group}]  {}", i + 1, c.name, c.url);
    }
}
