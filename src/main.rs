mod commands;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use hubcache::config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hubcache")]
#[command(about = "Stale-while-revalidate and offline response caches for the hub")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/hubcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Site origin whose requests are cached
  #[arg(long)]
  origin: Option<String>,

  /// Cache generation tag (e.g. v2)
  #[arg(long)]
  version_tag: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a URL through the response cache
  Fetch {
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// List named response caches
  Caches,
  /// Key-value revalidation cache
  Kv {
    #[command(subcommand)]
    command: KvCommand,
  },
}

#[derive(Subcommand, Debug)]
enum KvCommand {
  /// Get a JSON document through the cache
  Get {
    url: String,
    /// Time-to-live in seconds (default from config)
    #[arg(long)]
    ttl: Option<u64>,
    /// Key parts; JSON values are encoded canonically (default: GET and the url)
    #[arg(long = "key")]
    key: Vec<String>,
  },
  /// Drop a key
  Invalidate { key: String },
  /// List cached keys
  Keys,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Command line wins over the file
  if let Some(origin) = args.origin {
    config.worker.origin = origin;
  }
  if let Some(version) = args.version_tag {
    config.worker.version = version;
  }

  let _guard = init_tracing(&config);

  match args.command {
    Command::Fetch { url, navigate } => commands::fetch(&config, &url, navigate).await,
    Command::Caches => commands::caches(&config),
    Command::Kv { command } => match command {
      KvCommand::Get { url, ttl, key } => commands::kv_get(&config, &url, ttl, &key).await,
      KvCommand::Invalidate { key } => commands::kv_invalidate(&config, &key),
      KvCommand::Keys => commands::kv_keys(&config),
    },
  }
}

/// Log to a daily file when `log_dir` is set, stderr otherwise.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hubcache=info"));

  match &config.log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "hubcache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}
