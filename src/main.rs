use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use swcache::cache::{CacheStorage, MemoryStorage, SqliteStorage};
use swcache::config::Config;
use swcache::interceptor::{HttpNetwork, Network, OfflineNetwork, RequestMode};
use swcache::Registration;

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "An offline-first request interceptor with versioned cache generations")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache generation id to use instead of the configured one
  #[arg(long = "version-id")]
  version_id: Option<String>,

  /// Keep caches in memory for this run only
  #[arg(long)]
  memory: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the manifest and activate the current generation
  Install,
  /// Send one request through the installed interceptor
  Fetch {
    /// Path on the origin, e.g. /static/style.css
    path: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Simulate having no network connectivity
    #[arg(long)]
    offline: bool,
    #[arg(long, default_value = "GET")]
    method: String,
  },
  /// List cache generations
  Generations,
  /// List entries of a generation (default: current)
  Entries {
    #[arg(long)]
    generation: Option<String>,
  },
  /// Delete every cache generation
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let config = if let Some(version) = args.version_id {
    Config { version, ..config }.validated()?
  } else {
    config
  };

  let _guard = init_logging(config.log_file.as_deref())?;

  if args.memory {
    run(args.command, &config, Arc::new(MemoryStorage::new())).await
  } else {
    let storage = Arc::new(SqliteStorage::open_path(&config.storage_path()?)?);
    run(args.command, &config, storage).await
  }
}

async fn run<S: CacheStorage + 'static>(
  command: Command,
  config: &Config,
  storage: Arc<S>,
) -> Result<()> {
  match command {
    Command::Install => {
      let registration = Registration::new(Arc::new(HttpNetwork::new(&config.network)?), storage);
      let interceptor = registration.register(config).await?;
      let entries = registration.storage().entry_keys(interceptor.generation())?;
      println!(
        "Installed generation {} ({} entries)",
        interceptor.generation(),
        entries.len()
      );
    }
    Command::Fetch {
      path,
      navigate,
      offline,
      method,
    } => {
      let mode = if navigate {
        RequestMode::Navigate
      } else {
        RequestMode::SubResource
      };
      if offline {
        fetch(config, Arc::new(OfflineNetwork), storage, &path, mode, &method).await?;
      } else {
        let network = Arc::new(HttpNetwork::new(&config.network)?);
        fetch(config, network, storage, &path, mode, &method).await?;
      }
    }
    Command::Generations => {
      for name in storage.keys()? {
        let marker = if name == config.version { "*" } else { " " };
        println!("{} {}", marker, name);
      }
    }
    Command::Entries { generation } => {
      let generation = generation.unwrap_or_else(|| config.version.clone());
      if !storage.has(&generation)? {
        return Err(eyre!("Generation {} does not exist", generation));
      }
      for key in storage.entry_keys(&generation)? {
        println!("{}", key);
      }
    }
    Command::Clear => {
      let registration = Registration::new(Arc::new(OfflineNetwork), storage);
      let removed = registration.unregister().await;
      println!("Deleted {} generation(s)", removed.len());
    }
  }

  Ok(())
}

async fn fetch<N: Network, S: CacheStorage + 'static>(
  config: &Config,
  network: Arc<N>,
  storage: Arc<S>,
  path: &str,
  mode: RequestMode,
  method: &str,
) -> Result<()> {
  let registration = Registration::new(network, storage);
  let interceptor = registration.resume(config)?.ok_or_else(|| {
    eyre!(
      "Generation {} is not installed. Run `swcache install` first.",
      config.version
    )
  })?;

  let request = interceptor.request(path, mode)?.with_method(method);
  let served = registration.handle_fetch(&request).await?;
  interceptor.settle().await;

  println!(
    "{} {} -> {} from {} ({} bytes)",
    request.method,
    request.url,
    served.data.status,
    served.source,
    served.data.body.len()
  );
  if let Some(content_type) = served.data.header("content-type") {
    println!("content-type: {}", content_type);
  }
  if let Some(cached_at) = served.cached_at {
    println!("cached at {}", cached_at.to_rfc3339());
  }

  Ok(())
}

/// Log to stderr, or to `log_file` when configured. Filter with RUST_LOG.
fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("swcache=info"));

  match log_file {
    Some(path) => {
      let dir = path.parent().unwrap_or_else(|| Path::new("."));
      let file = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file));
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_memory_flag_parses() {
    let args = Args::try_parse_from(["swcache", "--memory", "generations"]).unwrap();
    assert!(args.memory);
    assert!(matches!(args.command, Command::Generations));

    let args = Args::try_parse_from(["swcache", "clear"]).unwrap();
    assert!(!args.memory);
  }

  #[tokio::test]
  async fn test_commands_run_against_memory_storage() {
    let config = Config::default();
    let storage = Arc::new(MemoryStorage::new());
    storage.open(&config.version).unwrap();

    run(Command::Generations, &config, storage.clone()).await.unwrap();
    run(Command::Entries { generation: None }, &config, storage.clone())
      .await
      .unwrap();
    run(Command::Clear, &config, storage.clone()).await.unwrap();

    assert!(storage.keys().unwrap().is_empty());
    assert!(run(Command::Entries { generation: None }, &config, storage)
      .await
      .is_err());
  }
}
