mod config;
mod github;
mod store;
mod sync;

use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::cell::Cell;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use github::types::RepoRef;
use github::GithubClient;
use store::Store;
use sync::{SyncEngine, SyncOutcome, SyncPhase, SyncProgress};

#[derive(Parser, Debug)]
#[command(name = "offhub")]
#[command(about = "Browse GitHub issues offline from your terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offhub/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Repository to sync, as "owner/name"
  #[arg(short, long)]
  repo: Option<String>,

  /// Path to the cache database (default: platform data dir)
  #[arg(long)]
  db: Option<PathBuf>,

  /// Re-fetch everything and drop issues no longer open upstream
  #[arg(long)]
  full: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let slug = args.repo.or_else(|| config.github.repo.clone()).ok_or_else(|| {
    eyre!("No repository given. Pass --repo owner/name or set github.repo in the config file.")
  })?;
  let repo: RepoRef = slug.parse()?;

  let token = config.resolve_token()?;
  let db_path = args.db.unwrap_or_else(|| config.cache_path());

  let client = GithubClient::new(&token)?;
  let store = Store::open(&db_path)?;
  let engine = SyncEngine::new(client, store);

  // First Ctrl+C requests a clean stop at the next issue boundary
  let cancel = CancellationToken::new();
  let ctrl_c_cancel = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!("\nstopping after the current issue...");
      ctrl_c_cancel.cancel();
    }
  });

  println!("Syncing {} into {}", repo, db_path.display());

  // Read back after a failure to report what made it into the cache
  let issues_seen = Cell::new(0u64);
  let comments_seen = Cell::new(0u64);
  let progress = |p: SyncProgress| {
    match p.phase {
      SyncPhase::Issues => issues_seen.set(p.current),
      SyncPhase::Comments => comments_seen.set(p.current),
    }
    eprint!(
      "\r  {} issues / {} comments",
      issues_seen.get(),
      comments_seen.get()
    );
  };

  let result = if args.full {
    engine.sync_full(&repo, &cancel, progress).await
  } else {
    engine.sync(&repo, &cancel, progress).await
  };
  eprintln!();

  match result {
    Ok(SyncOutcome::Completed(stats)) => {
      println!(
        "Synced {} issues and {} comments in {:.1?}",
        stats.issues_fetched, stats.comments_fetched, stats.elapsed
      );
      if stats.issues_deleted > 0 {
        println!(
          "Removed {} issues no longer open upstream",
          stats.issues_deleted
        );
      }
      let counts = engine.store().counts(&repo)?;
      println!(
        "Cache now holds {} issues and {} comments",
        counts.issues, counts.comments
      );
      Ok(())
    }
    Ok(SyncOutcome::Cancelled(stats)) => {
      println!(
        "Stopped early; kept the {} issues and {} comments synced so far",
        stats.issues_fetched, stats.comments_fetched
      );
      Ok(())
    }
    Err(e) => {
      eprintln!(
        "Sync failed after {} issues and {} comments were saved; the cache is still usable.",
        issues_seen.get(),
        comments_seen.get()
      );
      if e.is_auth() {
        eprintln!("Authentication failed; check your token with `gh auth status`.");
      } else if e.is_transient() {
        eprintln!("Temporary failure; rerun to resume from the last completed sync.");
      }
      Err(e.into())
    }
  }
}
