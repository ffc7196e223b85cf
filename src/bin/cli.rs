//! Threadscope CLI - topic breakdowns of a timeline from the command line
//!
//! Usage: threadscope-cli [OPTIONS] <COMMAND>
//!
//! Supports JSON output for scripting. Logs go to stderr so stdout stays clean.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use threadscope_lib::{
    ai_client,
    cache::{ResultCache, SqliteStore},
    clustering::ClusterParams,
    models::Cluster,
    pipeline::{offline_tree, Pipeline, TopicService},
    settings::{self, Settings},
    source::{Credentials, ItemSource, JsonFileSource},
    utils::safe_truncate,
    CacheStatus,
};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Main CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "threadscope-cli")]
#[command(version, about = "Cluster a timeline into summarized topics", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Cache database path (default: from settings)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Settings file (default: <data dir>/threadscope/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Detailed logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or read cached) topics for an identity
    Topics {
        /// Requester identity the result is cached under
        identity: String,
        /// JSON file of posts to read the timeline from
        #[arg(long)]
        posts: PathBuf,
        #[arg(long, env = "THREADSCOPE_ACCESS_TOKEN", default_value = "")]
        access_token: String,
        #[arg(long, env = "THREADSCOPE_ACCESS_TOKEN_SECRET", default_value = "")]
        access_token_secret: String,
    },
    /// Cluster a posts file offline (local keywords, no model calls, no cache)
    Cluster {
        posts: PathBuf,
    },
    /// Show cache age and next refresh for an identity
    Status {
        identity: String,
    },
    /// Drop the cached topics of an identity
    Invalidate {
        identity: String,
    },
    /// Settings file operations
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective settings (API keys masked)
    Show,
    /// Write the effective settings to the settings file
    Init,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("THREADSCOPE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run_cli(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> Result<(), String> {
    // Handle completions first (no settings or DB needed)
    if let Commands::Completions { shell } = &cli.command {
        generate(*shell, &mut Cli::command(), "threadscope-cli", &mut std::io::stdout());
        return Ok(());
    }

    let settings_path = cli.settings.clone().unwrap_or_else(settings::default_settings_path);
    let settings = Settings::load(&settings_path);
    let db_path = cli.db.clone().map(PathBuf::from).unwrap_or_else(|| settings.cache_db_path());

    match cli.command {
        Commands::Topics { identity, posts, access_token, access_token_secret } => {
            let credentials = Credentials::new(access_token, access_token_secret);
            handle_topics(&identity, posts, &credentials, &settings, &db_path, cli.json).await
        }
        Commands::Cluster { posts } => handle_cluster(posts, cli.json).await,
        Commands::Status { identity } => handle_status(&identity, &settings, &db_path, cli.json),
        Commands::Invalidate { identity } => {
            open_cache(&settings, &db_path)?
                .invalidate(&identity)
                .map_err(|e| e.to_string())?;
            if cli.json {
                println!("{}", serde_json::json!({ "identity": identity, "invalidated": true }));
            } else {
                println!("Cleared cached topics for {}", identity);
            }
            Ok(())
        }
        Commands::Config { cmd } => handle_config(cmd, &settings, &settings_path, cli.json),
        Commands::Completions { .. } => Ok(()),
    }
}

fn open_cache(settings: &Settings, db_path: &Path) -> Result<ResultCache, String> {
    let store = SqliteStore::new(db_path).map_err(|e| format!("Failed to open cache at {}: {}", db_path.display(), e))?;
    Ok(ResultCache::from_settings(Arc::new(store), settings))
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_topics(
    identity: &str,
    posts: PathBuf,
    credentials: &Credentials,
    settings: &Settings,
    db_path: &Path,
    json: bool,
) -> Result<(), String> {
    let source = Arc::new(JsonFileSource::new(posts));
    let client = ai_client::client_from_settings(settings);
    let service = TopicService::new(Pipeline::new(source, client, settings), open_cache(settings, db_path)?);

    let report = service
        .topics_for(identity, credentials)
        .await
        .map_err(|e| {
            tracing::warn!("[CLI] {}", e);
            e.user_message().to_string()
        })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?);
        return Ok(());
    }

    match report.status {
        CacheStatus::InProgress => {
            println!("Topics for {} are still being built. Check back shortly.", identity);
        }
        _ => {
            print_tree(&report.roots);
            println!();
            println!(
                "Built {} ({}). Next refresh {}.",
                report.built_at.format("%Y-%m-%d %H:%M UTC"),
                if report.status == CacheStatus::Fresh { "cached" } else { "just now" },
                report.next_refresh.format("%Y-%m-%d %H:%M UTC")
            );
        }
    }
    Ok(())
}

async fn handle_cluster(posts: PathBuf, json: bool) -> Result<(), String> {
    let items = JsonFileSource::new(posts)
        .fetch(&Credentials::default())
        .await
        .map_err(|e| e.to_string())?;
    let roots = offline_tree(items, &ClusterParams::default()).map_err(|e| e.to_string())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&roots).map_err(|e| e.to_string())?);
    } else {
        print_tree(&roots);
    }
    Ok(())
}

fn handle_status(identity: &str, settings: &Settings, db_path: &Path, json: bool) -> Result<(), String> {
    let info = open_cache(settings, db_path)?
        .status(identity)
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", serde_json::json!({ "identity": identity, "entry": info }));
        return Ok(());
    }

    match info {
        None => println!("No cached topics for {}", identity),
        Some(info) => {
            println!("Identity:     {}", identity);
            println!("Age:          {}m {}s", info.age_secs / 60, info.age_secs % 60);
            println!("Next refresh: {}", info.next_refresh.format("%Y-%m-%d %H:%M UTC"));
            if info.in_progress {
                println!("State:        build in progress");
            } else if info.expired {
                println!("State:        expired (rebuilt on next request)");
            } else {
                println!("State:        fresh");
            }
        }
    }
    Ok(())
}

fn handle_config(cmd: ConfigCommands, settings: &Settings, path: &Path, json: bool) -> Result<(), String> {
    match cmd {
        ConfigCommands::Show => {
            let mut shown = settings.clone();
            shown.openai_api_key = shown.openai_api_key().map(|k| mask_key(&k));
            shown.anthropic_api_key = shown.anthropic_api_key().map(|k| mask_key(&k));
            let rendered = serde_json::to_string_pretty(&shown).map_err(|e| e.to_string())?;
            if json {
                println!("{}", rendered);
            } else {
                println!("Settings file: {}", path.display());
                println!("{}", rendered);
            }
        }
        ConfigCommands::Init => {
            settings.save(path).map_err(|e| e.to_string())?;
            if json {
                println!("{}", serde_json::json!({ "path": path.display().to_string() }));
            } else {
                println!("Wrote {}", path.display());
            }
        }
    }
    Ok(())
}

fn mask_key(key: &str) -> String {
    if key.len() <= 8 || !key.is_ascii() {
        return "****".to_string();
    }
    format!("{}...{}", safe_truncate(key, 4), &key[key.len() - 4..])
}

// ============================================================================
// Output
// ============================================================================

fn print_tree(roots: &[Cluster]) {
    if roots.is_empty() {
        println!("No topics.");
        return;
    }
    for root in roots {
        print_node(root, 0);
    }
}

fn print_node(node: &Cluster, depth: usize) {
    let indent = "  ".repeat(depth);
    let pivots = node.pivots.iter().cloned().collect::<Vec<_>>().join(" ");
    let title = match (&node.summary, node.is_misc()) {
        (Some(summary), _) => summary.clone(),
        (None, true) => "Everything else".to_string(),
        (None, false) => format!("{} threads", node.total_item_count()),
    };

    println!("{}- {}", indent, title);
    if !pivots.is_empty() {
        println!("{}  [{}]", indent, pivots);
    }
    for item in node.items() {
        let first_line = item.text.lines().next().unwrap_or("");
        println!("{}    · {}", indent, safe_truncate(first_line, 80));
    }
    for child in node.children() {
        print_node(child, depth + 1);
    }
}
