//! Harness for the PWA offline agent.
//!
//! Runs the lifecycle handlers against a real origin, with caches persisted
//! on disk so separate invocations see the same cache storage.
//!
//! ## Usage
//!
//! ```bash
//! # Install then activate through the registration host
//! pwa-harness --scope http://localhost:8000/ register
//!
//! # Serve a navigation the way the agent would (falls back to cached "/")
//! pwa-harness fetch /theaters --navigate
//!
//! # List caches and their entries
//! pwa-harness caches
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pwa_common::{init_logging, LogConfig, LogFormat};
use pwa_net::{HttpFetcher, LoaderConfig, Request, RequestMode, Response};
use pwa_sw::{
    AgentConfig, CacheStorage, DiskCacheStorage, NoopPlatform, OfflineAgent,
    ServiceWorkerRegistration,
};
use tracing::info;
use url::Url;

#[derive(Parser)]
#[command(name = "pwa-harness")]
#[command(about = "Drive the PWA offline agent against a real origin")]
struct Cli {
    /// Agent configuration (JSON); defaults reproduce the deployed agent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the scope (origin) from the configuration
    #[arg(long, global = true)]
    scope: Option<Url>,

    /// Directory holding the on-disk cache storage
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log filter directives (e.g. "pwa_sw=trace,reqwest=debug"); overrides -v
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the install handler (pre-cache core assets)
    Install,

    /// Run the activate handler (delete stale caches)
    Activate,

    /// Install and activate through the registration host, with retries
    Register,

    /// Send one request through the fetch handler
    Fetch {
        /// Path (or absolute URL) to request
        target: String,
        /// Treat the request as a document navigation
        #[arg(long, conflicts_with = "mode")]
        navigate: bool,
        /// Request mode: navigate, same-origin, no-cors or cors
        #[arg(long)]
        mode: Option<RequestMode>,
        /// Print the response body
        #[arg(long)]
        body: bool,
    },

    /// List caches and their entries
    Caches,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_logging(&LogConfig {
        format,
        directives: cli.log_filter.clone(),
        ..LogConfig::from_verbosity(cli.verbose)
    });

    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    if let Some(scope) = cli.scope {
        config.scope = scope;
    }
    config.validate()?;

    let cache_dir = match cli.cache_dir {
        Some(dir) => dir,
        None => dirs::cache_dir()
            .context("no cache directory on this platform; pass --cache-dir")?
            .join("pwa-harness"),
    };
    info!(cache_dir = %cache_dir.display(), scope = %config.scope, "Starting");

    let storage: Arc<dyn CacheStorage> = Arc::new(DiskCacheStorage::open_dir(&cache_dir).await?);
    let fetcher = Arc::new(HttpFetcher::new(LoaderConfig::default())?);

    match cli.command {
        Commands::Install => {
            let agent = OfflineAgent::new(config, storage, fetcher, Arc::new(NoopPlatform))?;
            agent.install().await?;
            println!(
                "installed {} core assets into {}",
                agent.core_assets().len(),
                agent.cache_name()
            );
        }

        Commands::Activate => {
            let agent = OfflineAgent::new(config, storage, fetcher, Arc::new(NoopPlatform))?;
            let deleted = agent.activate().await?;
            if deleted.is_empty() {
                println!("no stale caches");
            }
            for name in deleted {
                println!("deleted {name}");
            }
        }

        Commands::Register => {
            let (mut registration, _events) =
                ServiceWorkerRegistration::new(config.scope.clone(), storage, fetcher);
            registration.register(config).await?;
            if let Some(active) = &registration.active {
                println!("active: {} ({:?})", active.cache_name, active.state);
            }
        }

        Commands::Fetch {
            target,
            navigate,
            mode,
            body,
        } => {
            let url = config.resolve(&target)?;
            let mode = match (navigate, mode) {
                (true, _) => RequestMode::Navigate,
                (false, Some(mode)) => mode,
                (false, None) => RequestMode::default(),
            };

            let agent = OfflineAgent::new(config, storage, fetcher, Arc::new(NoopPlatform))?;
            match agent.handle_fetch(&Request::get(url.clone()).mode(mode)).await? {
                Some(response) => print_response(&response, body)?,
                None => bail!("no response for {url} (offline and nothing cached)"),
            }
        }

        Commands::Caches => {
            for name in storage.keys().await? {
                let current = if name == config.cache_name { " (current)" } else { "" };
                let entries = storage.entries_in(&name).await?;
                println!("{name}{current}: {} entries", entries.len());
                for entry in entries {
                    println!(
                        "  {} {} -> {} ({} bytes)",
                        entry.method,
                        entry.url,
                        entry.status,
                        entry.body.len()
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_response(response: &Response, with_body: bool) -> anyhow::Result<()> {
    let summary = serde_json::json!({
        "url": response.url.as_str(),
        "status": response.status.as_u16(),
        "from_cache": response.from_cache,
        "content_type": response.content_type().map(|m| m.to_string()),
        "bytes": response.body.len(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if with_body {
        println!("{}", String::from_utf8_lossy(&response.body));
    }
    Ok(())
}
