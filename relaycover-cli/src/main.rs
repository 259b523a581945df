//! relaycover CLI
//!
//! Measures how many of a nostr user's followees publish to relays the user
//! actually reads from.

mod report;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use relaycover_core::{decode_identity, format_relay_name_folded, CoverageConfig, SourceFlags};
use relaycover_pool::{PoolConfig, RelayPool, WsRelayPool};
use relaycover_runtime::{
    Aggregator, FileProfileCache, LoadUpdate, MemoryProfileCache, Phase, ProfileCache,
    StatusMessage,
};

#[derive(Parser)]
#[command(name = "relaycover")]
#[command(author, version, about = "relaycover: nostr followee relay coverage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,
}

#[derive(Args)]
struct RunOptions {
    /// npub or hex pubkey (or set RELAYCOVER_PUBKEY env var)
    #[arg(env = "RELAYCOVER_PUBKEY")]
    pubkey: String,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bootstrap relay (repeatable, replaces the built-in set)
    #[arg(long = "relay")]
    relays: Vec<String>,

    /// Per-session relay timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Profile cache file (kept in memory when omitted)
    #[arg(long)]
    cache: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze relay coverage of a user's followees
    Analyze {
        #[command(flatten)]
        run: RunOptions,

        /// Followees per subscription batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Batches in flight at once
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Ignore kind 10002 relay lists
        #[arg(long)]
        no_directory: bool,

        /// Ignore relay maps embedded in contact lists
        #[arg(long)]
        no_legacy: bool,

        /// Also write a JSON report (default: coverage_<timestamp>.json)
        #[arg(long, num_args = 0..=1)]
        json: Option<Option<PathBuf>>,
    },

    /// Show a user's profile, relay list and followee count
    Relays {
        #[command(flatten)]
        run: RunOptions,
    },

    /// Decode an npub or hex pubkey to canonical hex
    Decode {
        input: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match cli.command {
        Commands::Analyze {
            run,
            batch_size,
            max_concurrent,
            no_directory,
            no_legacy,
            json,
        } => {
            let mut config = load_config(&run)?;
            if let Some(n) = batch_size {
                config.batch_size = n;
            }
            if let Some(n) = max_concurrent {
                config.max_concurrent_batches = n;
            }
            config.validate()?;
            let flags = SourceFlags {
                use_directory_format: !no_directory,
                use_legacy_format: !no_legacy,
            };
            run_analysis(&run, config, flags, json).await?;
        }
        Commands::Relays { run } => {
            let config = load_config(&run)?;
            show_relays(&run, config).await?;
        }
        Commands::Decode { input } => match decode_identity(&input) {
            Some(identity) => println!("{}", identity),
            None => bail!("Invalid pubkey: {}", input),
        },
    }

    Ok(())
}

fn load_config(run: &RunOptions) -> Result<CoverageConfig> {
    let mut config = match &run.config {
        Some(path) => CoverageConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CoverageConfig::default(),
    };
    if !run.relays.is_empty() {
        config.bootstrap_relays = run.relays.clone();
    }
    if let Some(ms) = run.timeout_ms {
        config.timeout_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

struct Session {
    aggregator: Aggregator,
    file_cache: Option<Arc<FileProfileCache>>,
}

impl Session {
    fn open(run: &RunOptions, config: CoverageConfig) -> Self {
        let pool: Arc<dyn RelayPool> = Arc::new(WsRelayPool::new(PoolConfig {
            connect_timeout: config.connect_timeout(),
            ..Default::default()
        }));

        let mut states = pool.connection_states();
        tokio::spawn(async move {
            while let Ok(change) = states.recv().await {
                debug!("{} {:?}", change.relay, change.state);
            }
        });

        let (cache, file_cache): (Arc<dyn ProfileCache>, _) = match &run.cache {
            Some(path) => {
                let file = FileProfileCache::open(path);
                file.spawn_flusher(config.profile_flush_interval());
                let shared: Arc<dyn ProfileCache> = file.clone();
                (shared, Some(file))
            }
            None => {
                let memory: Arc<dyn ProfileCache> = Arc::new(MemoryProfileCache::new());
                (memory, None)
            }
        };

        Self {
            aggregator: Aggregator::new(pool, cache, config),
            file_cache,
        }
    }

    /// Drive the load stream to a terminal phase, echoing status changes.
    async fn load(&self, pubkey: &str) -> Result<Option<LoadUpdate>> {
        let mut updates = self.aggregator.load_user(pubkey);
        let mut last_status = None;
        while let Some(update) = updates.recv().await {
            if last_status != Some(update.status) {
                println!("{}", update.status);
                last_status = Some(update.status);
            }
            match (update.phase, update.status) {
                (_, StatusMessage::InvalidPubkey) => bail!("Invalid pubkey: {}", pubkey),
                (Phase::Ready, _) => return Ok(Some(update)),
                (Phase::Idle, _) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    fn close(&self) -> Result<()> {
        self.aggregator.cancel();
        if let Some(cache) = &self.file_cache {
            cache.flush()?;
        }
        Ok(())
    }
}

async fn run_analysis(
    run: &RunOptions,
    config: CoverageConfig,
    flags: SourceFlags,
    json: Option<Option<PathBuf>>,
) -> Result<()> {
    let session = Session::open(run, config);
    let Some(loaded) = session.load(&run.pubkey).await? else {
        return session.close();
    };

    let mut updates = session.aggregator.start_analysis(flags).await?;
    let mut last = None;
    let mut last_status = None;
    while let Some(update) = updates.recv().await {
        if last_status != Some(update.status) {
            println!("{}", update.status);
            last_status = Some(update.status);
        }
        last = Some(update);
    }
    let Some(last) = last else {
        bail!("Analysis ended without results");
    };

    println!("\n{}", "=".repeat(60));
    for line in report::dump_lines(
        loaded.user_profile.as_ref(),
        &loaded.user_relays,
        &last.followee_analyses,
    ) {
        println!("{}", line);
    }
    println!("{}", "=".repeat(60));
    println!("Relays: {}", report::relay_summary(&last.relay_statuses));
    for status in &last.relay_statuses {
        println!("  [{}]\n{}", status.state, indent(&format_relay_name_folded(&status.url)));
    }

    if let Some(output) = json {
        let output_path = output.unwrap_or_else(|| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S");
            PathBuf::from(format!("coverage_{}.json", timestamp))
        });
        let report = report::JsonReport::new(
            loaded.user_profile.as_ref(),
            &loaded.user_relays,
            &last.followee_analyses,
            &last.relay_statuses,
        );
        fs::write(&output_path, serde_json::to_string_pretty(&report)?)?;
        println!("\nReport saved to: {}", output_path.display());
    }

    session.close()
}

async fn show_relays(run: &RunOptions, config: CoverageConfig) -> Result<()> {
    let session = Session::open(run, config);
    let loaded = session.load(&run.pubkey).await?;

    if let Some(loaded) = loaded {
        if let Some(profile) = &loaded.user_profile {
            println!(
                "\nUser: {} ({})",
                profile.name.as_deref().unwrap_or("-"),
                profile.identity
            );
        }
        println!("Relays:");
        for relay in &loaded.user_relays {
            let mode = match (relay.read, relay.write) {
                (true, true) => "read+write",
                (true, false) => "read",
                _ => "write",
            };
            println!("  {} ({})", relay.url, mode);
        }
        println!("Followees: {}", loaded.followees.len());
    }

    session.close()
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("    {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}
