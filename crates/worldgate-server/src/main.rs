//! worldgate server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! store, starts the world-link refresher and the account scheduler, and
//! serves the JSON API over HTTP.
//!
//! # Key name lookup
//!
//! To print the key name a platform user must give their API key:
//!
//! ```sh
//! cargo run -p worldgate-server --bin server -- --print-key-name 1 someone --world 2101
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;
use worldgate_core::{keyname, model::PlatformId, world::WorldId};
use worldgate_gw2api::Gw2Client;
use worldgate_server::ServerConfig;
use worldgate_store_sqlite::SqliteStore;
use worldgate_verify::Services;

#[derive(Parser)]
#[command(author, version, about = "World-gated account verification server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the expected API key name for a platform user and exit.
  #[arg(long, num_args = 2, value_names = ["PLATFORM_ID", "PLATFORM_USER_ID"])]
  print_key_name: Option<Vec<String>>,

  /// World the key name is derived for. Only used with `--print-key-name`.
  #[arg(long)]
  world: Option<WorldId>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: print a key name and exit.
  if let Some(args) = cli.print_key_name {
    let [platform_id, platform_user_id] = args.as_slice() else {
      anyhow::bail!("--print-key-name takes a platform id and a platform user id");
    };
    let platform_id: PlatformId = platform_id
      .parse()
      .with_context(|| format!("invalid platform id {platform_id:?}"))?;
    println!("{}", keyname::api_key_name(cli.world, platform_id, platform_user_id));
    return Ok(());
  }

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("WORLDGATE").separator("__"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let fetcher = Gw2Client::new(&server_cfg.gw2_api_url, server_cfg.verify.request_timeout())
    .context("failed to build game API client")?;

  let services = Arc::new(Services::new(
    Arc::new(store),
    Arc::new(fetcher),
    server_cfg.verify.clone(),
  ));
  let (world_task, sync_task) = services.spawn_background();

  let app = worldgate_server::app(Arc::clone(&services));
  let address = server_cfg.address();

  info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  tokio::select! {
    result = axum::serve(listener, app) => {
      result.context("server error")?;
    }
    _ = tokio::signal::ctrl_c() => {
      info!("Received shutdown signal");
    }
  }

  world_task.abort();
  sync_task.abort();
  info!("Server stopped");
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
