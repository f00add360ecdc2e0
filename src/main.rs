use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod clock;
mod config;
mod engine;
mod error;
mod learning;
mod storage;
mod sync;

use clock::SystemClock;
use config::AppConfig;
use engine::{AdaptiveLayout, EngineOptions, LoadSource};
use learning::AdaptationOutcome;
use storage::{CacheStore, LocalCache, MemoryCache};
use sync::{CourseRegistry, HttpRemote, LocalOnlyRemote, MergeStrategy, RemoteStore, SyncResult, SyncService};

/// Adaptive course-grid layout engine
#[derive(Parser)]
#[command(name = "adaptive")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tracks interactions and adapts the course grid layout", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Never contact the remote store; writes stay queued
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and default configuration
    Init {
        /// Base URL of the adaptive API to sync with
        #[arg(long)]
        remote: Option<String>,
    },

    /// Record one interaction
    Track {
        /// Interaction type, e.g. course_click, search, feature_usage
        kind: String,
        /// Event details as a JSON object
        #[arg(long, default_value = "{}")]
        details: String,
    },

    /// Show or change layout preferences
    Prefs {
        #[command(subcommand)]
        action: Option<PrefsAction>,
    },

    /// Run an adaptation pass now if the gate allows it
    Adapt,

    /// Show sync and adaptation status
    Status,

    /// Show usage insights and layout recommendations
    Stats,

    /// Clear learned behavior; adaptive settings are kept
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Drop the local history and cached keys
    ClearLocal,

    /// Export behavior and history to a file
    Export {
        /// Output file path
        #[arg(long, default_value = "adaptive-profile.json")]
        output: String,
    },

    /// Import a previously exported profile
    Import {
        /// Input file path
        input: String,
        /// Merge strategy: add (default), replace
        #[arg(long, default_value = "add")]
        merge: String,
    },

    /// Synchronize with the remote store
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Set one preference, e.g. `prefs set cardSize large`
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Drain the queue and push the current snapshot
    Push,

    /// Show sync status
    Status,

    /// Re-resolve placeholder course names through the registry
    RefreshNames,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = storage::get_data_dir()?;

    if let Commands::Init { remote } = &cli.command {
        info!("Initializing adaptive layout data directory");
        storage::init(&data_dir)?;
        println!("✅ Initialized {}", data_dir.display());

        if let Some(url) = remote {
            let config_path = data_dir.join(config::CONFIG_FILE);
            let mut config = config::load_config(&config_path)?;
            config.remote.base_url = Some(url.clone());
            config::save_config(&config, &config_path)?;
            println!("   Remote: {}", url);
        }
        return Ok(());
    }

    let config = config::load_config(&data_dir.join(config::CONFIG_FILE))?;
    let cache = Arc::new(open_cache(&data_dir)?);
    let engine = build_engine(&config, cache.clone(), cli.offline)?;
    let source = engine.load().await;
    info!("Loaded adaptive state from {:?}", source);

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::Track { kind, details } => {
            let details = parse_details(&details)?;
            let event = engine.track_interaction(kind.as_str(), details);
            println!("Tracked {} at {}", event.kind, event.timestamp.to_rfc3339());
            if let Some(at) = engine.last_adaptation() {
                println!("Last adaptation: {}", at.to_rfc3339());
            }
        }
        Commands::Prefs { action } => {
            if let Some(PrefsAction::Set { key, value }) = action {
                engine.set_layout_preference(&key, &value)?;
                println!("✅ {} = {}", key, value);
            }
            println!("{}", serde_json::to_string_pretty(&engine.layout_preferences())?);
        }
        Commands::Adapt => {
            match engine.trigger_layout_adaptation() {
                AdaptationOutcome::Skipped => {
                    println!("Adaptation skipped: not enough interactions since the last pass");
                }
                AdaptationOutcome::Adapted(patch) if patch.is_empty() => {
                    println!("No adaptation rule fired");
                }
                AdaptationOutcome::Adapted(patch) => {
                    println!("Layout adapted:");
                    println!("{}", serde_json::to_string_pretty(&patch)?);
                }
            }
        }
        Commands::Status => {
            show_status(&engine, &cache, source)?;
        }
        Commands::Stats => {
            show_stats(&engine);
        }
        Commands::Reset { yes } => {
            if !yes {
                return Err(anyhow!("Reset clears all learned behavior. Re-run with --yes to confirm"));
            }
            engine.reset_adaptive_behavior();
            println!("✅ Adaptive behavior reset");
        }
        Commands::ClearLocal => {
            engine.clear_local_data();
            println!("✅ Local history and cached keys cleared");
        }
        Commands::Export { output } => {
            let count = sync::export_state(
                Path::new(&output),
                &engine.user_behavior(),
                &engine.history(),
                &engine.session_id(),
            )?;
            println!("✅ Exported {} interactions to {}", count, output);
        }
        Commands::Import { input, merge } => {
            let strategy = match merge.as_str() {
                "replace" => MergeStrategy::Replace,
                "add" => MergeStrategy::Add,
                other => return Err(anyhow!("Unknown merge strategy: {}", other)),
            };
            let bundle = sync::read_bundle(Path::new(&input))?;
            let result = engine.import_bundle(bundle, strategy);

            println!("✅ Import complete from {}", result.source_session);
            println!("   Total interactions: {}", result.total);
            println!("   Imported: {}", result.imported);
            if result.skipped > 0 {
                println!("   Skipped: {}", result.skipped);
            }
        }
        Commands::Sync { action } => match action {
            SyncAction::Push => {
                let report = engine.force_sync().await;
                println!(
                    "Queue drained: {} synced, {} conflicts, {} dropped, {} remaining",
                    report.drain.synced, report.drain.conflicts, report.drain.dropped, report.drain.remaining
                );
                match report.snapshot {
                    SyncResult::Synced(_) => println!("✅ Snapshot synced"),
                    SyncResult::Conflict(_) => println!("⚠️  Remote reported a conflict; local state kept"),
                    SyncResult::Offline => println!("Offline: snapshot queued"),
                    SyncResult::Failed(e) => println!("❌ Snapshot push failed: {}", e),
                }
            }
            SyncAction::Status => {
                let status = engine.sync_status();
                println!("{}", serde_json::to_string_pretty(&status)?);
                println!("Indicator: {}", engine.sync_indicator());

                let pending = engine.sync_service().pending();
                if !pending.is_empty() {
                    println!();
                    println!("Queued writes:");
                    for item in pending {
                        println!(
                            "  {} {} (queued {}, {} failed attempts)",
                            item.id,
                            item.payload.kind(),
                            item.timestamp.to_rfc3339(),
                            item.retry_count
                        );
                    }
                }
            }
            SyncAction::RefreshNames => {
                let updated = engine.refresh_course_names().await;
                println!("Updated {} course names", updated);
            }
        },
    }

    engine.settle().await;

    let pending = engine.sync_status().pending_changes;
    if pending > 0 {
        warn!("{} writes still queued; they are not kept after exit", pending);
    }

    Ok(())
}

fn open_cache(data_dir: &Path) -> Result<CacheStore> {
    std::fs::create_dir_all(data_dir)?;
    CacheStore::open(&data_dir.join(storage::CACHE_DB))
}

fn build_engine(config: &AppConfig, cache: Arc<CacheStore>, offline: bool) -> Result<AdaptiveLayout> {
    let remote: Arc<dyn RemoteStore>;
    let registry: Arc<dyn CourseRegistry>;
    let online;
    match config.remote.base_url() {
        Some(url) => {
            let http = Arc::new(HttpRemote::from_env(url)?);
            remote = http.clone();
            registry = http;
            online = !offline;
        }
        None => {
            info!("No remote configured; running local-only");
            remote = Arc::new(LocalOnlyRemote);
            registry = Arc::new(LocalOnlyRemote);
            online = false;
        }
    }

    let clock = Arc::new(SystemClock);
    let sync = Arc::new(SyncService::new(
        remote,
        clock.clone(),
        config.sync.conflict_resolution,
        config.remote.timeout(),
        online,
    ));

    let options = EngineOptions {
        settings: config.adaptive.clone(),
        snapshot_debounce: config.sync.snapshot_debounce(),
        lookup_timeout: config.remote.timeout(),
    };

    let cache: Arc<dyn LocalCache> = cache;
    Ok(AdaptiveLayout::new(
        cache,
        Arc::new(MemoryCache::new()),
        sync,
        registry,
        clock,
        options,
    ))
}

fn parse_details(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("--details must be a JSON object, got {}", other)),
    }
}

fn show_status(engine: &AdaptiveLayout, cache: &CacheStore, source: LoadSource) -> Result<()> {
    let snapshot = engine.user_behavior();
    let status = engine.sync_status();

    println!("Adaptive Layout Status");
    println!("======================");
    println!();
    println!("Loaded from: {:?}", source);
    println!("Session: {}", engine.session_id());
    let history = engine.behavior_history();
    println!("Interactions recorded: {}", history.len());
    if let Some(latest) = history.last() {
        println!("Latest interaction: {} at {}", latest.kind, latest.timestamp.to_rfc3339());
    }
    println!(
        "Courses tracked: {}",
        snapshot.interaction_patterns.most_clicked_courses.len()
    );
    match snapshot.last_adaptation {
        Some(at) => println!("Last adaptation: {}", at.to_rfc3339()),
        None => println!("Last adaptation: never"),
    }
    println!();
    println!("Cache keys: {}", cache.count()?);
    if let Some(updated) = cache.updated_at(storage::BEHAVIOR_KEY)? {
        println!("Behavior cached at: {}", updated);
    }
    println!();
    println!("Sync: {}", engine.sync_indicator());
    println!("Connectivity: {:?}", engine.sync_service().connectivity());
    println!("Pending changes: {}", status.pending_changes);
    if let Some(last_sync) = status.last_sync {
        println!("Last sync: {}", last_sync.to_rfc3339());
    }
    Ok(())
}

fn show_stats(engine: &AdaptiveLayout) {
    let snapshot = engine.user_behavior();
    let history = engine.history();
    if history.is_empty() {
        println!("No interactions recorded yet");
        return;
    }

    let feature = engine::most_used_feature(&snapshot.interaction_patterns);
    let stats = engine::interaction_stats(&history);

    println!("Adaptive Layout Statistics");
    println!("==========================");
    println!();
    println!("Most used feature: {} ({} min)", feature.name, feature.minutes);
    println!("Searches: {}", snapshot.interaction_patterns.search_frequency);
    println!();
    println!("Last {} interactions:", engine::insights::STATS_WINDOW);
    println!("  Total: {}", stats.total);
    println!("  Course clicks: {}", stats.course_clicks);
    println!("  Navigation: {}", stats.navigation);
    println!("  Feature usage: {}", stats.feature_usage);

    let recommendations = engine::layout_recommendations(&snapshot);
    if !recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for rec in recommendations {
            println!("  - {}: {} ({} -> {})", rec.title, rec.description, rec.current, rec.suggested);
        }
    }
}
