use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use modelcache_config::CacheConfig;
use modelcache_service::{
  ArtifactRecord, FetchOutcome, FetchRequest, ModelCache, Progress, ProgressFn, infer_category,
  registry_key,
};

/// modelcache - local model artifact cache
#[derive(Parser)]
#[command(name = "modelcache")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.modelcache)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// List all registered models, most recently used first
  Models,

  /// List eviction candidates, least recently used first
  Lru {
    #[arg(long, default_value_t = 10)]
    limit: u32,
  },

  /// List all settings
  Settings,

  /// Show usage statistics
  Stats,

  /// Print a setting
  GetSetting { key: String },

  /// Change a setting
  SetSetting { key: String, value: String },

  /// Register a model file, or record another use of it
  Register {
    path: PathBuf,

    /// Category (default: inferred from the path)
    #[arg(long)]
    category: Option<String>,

    /// Exclude from eviction
    #[arg(long)]
    ignore: bool,
  },

  /// Protect a model from eviction
  Protect {
    path: PathBuf,

    /// Remove protection instead
    #[arg(long)]
    off: bool,
  },

  /// Forget a model (the file is not touched)
  Delete { path: PathBuf },

  /// Check free space in a directory against the configured floor
  Space {
    dir: PathBuf,

    #[arg(long, default_value_t = 0)]
    required: u64,
  },

  /// Show which models would be evicted to reclaim BYTES
  Plan {
    bytes: u64,

    /// Maximum number of candidates considered
    #[arg(long)]
    max: Option<u32>,
  },

  /// Download a model unless it is already present
  Fetch {
    url: String,

    /// Destination file, or directory with --into-dir
    dest: PathBuf,

    /// Extra request header as NAME:VALUE
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Bearer token; $NAME reads the environment variable NAME
    #[arg(long)]
    token: Option<String>,

    #[arg(long)]
    category: Option<String>,

    /// Treat DEST as a directory and name the file from the response
    #[arg(long)]
    into_dir: bool,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".modelcache"),
  };

  let Some(command) = cli.command else {
    println!("modelcache - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run(command, data_dir).await })
}

async fn run(command: Commands, data_dir: PathBuf) -> Result<()> {
  let config = CacheConfig::load(&data_dir)
    .with_context(|| format!("failed to load config from {}", data_dir.display()))?;
  let cache = ModelCache::open(&data_dir, config)
    .await
    .context("failed to open model cache")?;

  match command {
    Commands::Models => print_records(&cache.list_all().await?),
    Commands::Lru { limit } => print_records(&cache.list_lru(limit).await?),
    Commands::Settings => {
      for (key, value) in cache.list_settings().await? {
        println!("{key} = {value}");
      }
    }
    Commands::Stats => {
      let stats = cache.stats().await?;
      println!("models: {}", stats.count);
      println!("total size: {}", format_size(stats.total_bytes));
      println!();
      println!("by category:");
      for entry in &stats.by_category {
        println!("  {:<20} {}", entry.category, entry.count);
      }
      println!();
      println!("most used:");
      print_records(&stats.most_used);
    }
    Commands::GetSetting { key } => {
      println!("{}", cache.get_setting(&key, "").await);
    }
    Commands::SetSetting { key, value } => {
      cache.set_setting(&key, &value).await?;
      eprintln!("{key} = {value}");
    }
    Commands::Register {
      path,
      category,
      ignore,
    } => {
      let size_bytes = tokio::fs::metadata(&path)
        .await
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
      let category =
        category.unwrap_or_else(|| infer_category(Path::new(&registry_key(&path))));
      let record = cache
        .register_model(&path, &category, size_bytes, ignore)
        .await?;
      print_records(std::slice::from_ref(&record));
    }
    Commands::Protect { path, off } => {
      cache
        .protect(&path, !off)
        .await
        .with_context(|| format!("failed to update {}", path.display()))?;
    }
    Commands::Delete { path } => {
      cache
        .delete(&path)
        .await
        .with_context(|| format!("failed to delete {}", path.display()))?;
    }
    Commands::Space { dir, required } => {
      let report = cache.check_free_space(&dir, required).await;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Commands::Plan { bytes, max } => {
      let plan = cache.plan_eviction(bytes, max).await?;
      println!("{}", serde_json::to_string_pretty(&plan)?);
    }
    Commands::Fetch {
      url,
      dest,
      headers,
      token,
      category,
      into_dir,
    } => {
      let request = build_request(url, dest, &headers, token, category)?;
      fetch(&cache, &request, into_dir).await?;
    }
  }

  Ok(())
}

fn build_request(
  url: String,
  dest: PathBuf,
  headers: &[String],
  token: Option<String>,
  category: Option<String>,
) -> Result<FetchRequest> {
  let mut request = FetchRequest::new(url, dest);
  for header in headers {
    let Some((name, value)) = header.split_once(':') else {
      bail!("invalid header '{header}', expected NAME:VALUE");
    };
    request = request.header(name.trim(), value.trim());
  }
  if let Some(token) = token {
    request = request.bearer_token(&token);
  }
  if let Some(category) = category {
    request = request.category(category);
  }
  Ok(request)
}

async fn fetch(cache: &ModelCache, request: &FetchRequest, into_dir: bool) -> Result<()> {
  let cancel = CancellationToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!("cancelling...");
      on_signal.cancel();
    }
  });

  let progress: ProgressFn = Arc::new(|p: Progress| match p.fraction() {
    Some(fraction) => eprint!("\r{:>6.1}%", fraction * 100.0),
    None => eprint!("\r{}", format_size(p.downloaded as i64)),
  });

  let outcome = if into_dir {
    cache.fetch_into_dir(request, Some(progress), &cancel).await
  } else {
    cache.fetch(request, Some(progress), &cancel).await
  };
  eprintln!();

  match outcome.with_context(|| format!("failed to fetch {}", request.url))? {
    FetchOutcome::CacheHit { path } => println!("cached {}", path.display()),
    FetchOutcome::Downloaded { path, size_bytes } => {
      println!(
        "downloaded {} ({})",
        path.display(),
        format_size(size_bytes as i64)
      );
    }
  }
  Ok(())
}

fn print_records(records: &[ArtifactRecord]) {
  if records.is_empty() {
    println!("(none)");
    return;
  }

  println!(
    "{:<5} {:<40} {:<14} {:>10} {:>5} {:<20} {:<4} {:<4}",
    "ID", "FILENAME", "CATEGORY", "SIZE", "USES", "LAST USED", "PROT", "IGN"
  );
  for record in records {
    println!(
      "{:<5} {:<40} {:<14} {:>10} {:>5} {:<20} {:<4} {:<4}",
      record.id,
      record.filename,
      record.category,
      format_size(record.size_bytes),
      record.use_count,
      record.last_used.format("%Y-%m-%d %H:%M:%S").to_string(),
      yes_no(record.protected),
      yes_no(record.ignore_for_eviction),
    );
  }
}

fn yes_no(flag: bool) -> &'static str {
  if flag { "yes" } else { "no" }
}

fn format_size(bytes: i64) -> String {
  const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
  let mut size = bytes.max(0) as f64;
  let mut unit = 0;
  while size >= 1024.0 && unit < UNITS.len() - 1 {
    size /= 1024.0;
    unit += 1;
  }
  if unit == 0 {
    format!("{bytes} B")
  } else {
    format!("{size:.1} {}", UNITS[unit])
  }
}
