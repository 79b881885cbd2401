use std::{path::PathBuf, process::ExitCode};

use chrono::Utc;
use clap::Parser;
use troupe_llm::{
    Engine, GenerationRequest, Message, TroupeConfig,
    cache::{list_all, purge_all},
    config::EXAMPLE_CONFIG,
    observability::init_tracing,
    pricing::PricingTable,
    usage::{UsageLedger, UsageStore},
};

/// CLI arguments for troupe-llm
#[derive(Parser, Debug)]
#[command(version, about = "Operator tool for the troupe-llm invocation layer", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ~/.config/troupe-llm/troupe-llm.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Inspect or remove provider-side context caches
    Caches {
        #[command(subcommand)]
        action: CachesAction,
    },
    /// Send a one-line prompt and report token usage and cost
    Ping {
        #[arg(short, long, default_value = "Reply with the single word: pong")]
        prompt: String,
        /// Append the run totals to the usage log under this label
        #[arg(long)]
        record: Option<String>,
    },
    /// Show cumulative usage recorded by previous runs
    Usage,
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ~/.config/troupe-llm/troupe-llm.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Subcommand, Debug)]
enum CachesAction {
    /// List every cache visible to the configured credentials
    List,
    /// Delete every cache visible to the configured credentials
    Purge,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Command::Init { output, force } = &args.command {
        return run_init(output.clone(), *force);
    }

    let config = match load_config(args.config) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&config.observability) {
        eprintln!("{e}");
    }

    let result = match args.command {
        Command::Caches { action } => run_caches(&config, action).await,
        Command::Ping { prompt, record } => run_ping(&config, prompt, record).await,
        Command::Usage => run_usage(&config),
        Command::Init { .. } => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("Error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<TroupeConfig, String> {
    let Some(path) = path.or_else(TroupeConfig::default_path) else {
        return Err("Could not determine default config path. Please specify one with --config.".into());
    };
    if !path.exists() {
        return Err(format!(
            "Config file not found: {}\nRun `troupe-llm init` to create one.",
            path.display()
        ));
    }
    TroupeConfig::from_file(&path).map_err(|e| e.to_string())
}

fn build_engine(config: &TroupeConfig) -> Result<Engine, String> {
    let provider = config.require_provider().map_err(|e| e.to_string())?;
    Ok(Engine::from_config(provider, reqwest::Client::new()))
}

async fn run_caches(config: &TroupeConfig, action: CachesAction) -> Result<(), String> {
    let engine = build_engine(config)?;
    let api = engine.cache_api().map_err(|e| e.to_string())?;

    match action {
        CachesAction::List => {
            let caches = list_all(api.as_ref()).await.map_err(|e| e.to_string())?;
            if caches.is_empty() {
                println!("No context caches.");
                return Ok(());
            }
            let now = Utc::now();
            println!("{:<40} {:<24} {:<36} {:>10}", "NAME", "DISPLAY NAME", "MODEL", "REMAINING");
            for cache in caches {
                println!(
                    "{:<40} {:<24} {:<36} {:>9}s",
                    cache.name,
                    cache.display_name.as_deref().unwrap_or("-"),
                    cache.model,
                    cache.remaining(now).as_secs()
                );
            }
        }
        CachesAction::Purge => {
            let report = purge_all(api.as_ref()).await.map_err(|e| e.to_string())?;
            println!("Deleted {} context cache(s).", report.deleted.len());
            if !report.failed.is_empty() {
                return Err(format!(
                    "failed to delete {} cache(s): {}",
                    report.failed.len(),
                    report.failed.join(", ")
                ));
            }
        }
    }
    Ok(())
}

async fn run_ping(
    config: &TroupeConfig,
    prompt: String,
    record: Option<String>,
) -> Result<(), String> {
    let engine = build_engine(config)?;
    let mut ledger = UsageLedger::new(PricingTable::from_config(&config.usage));

    let request = GenerationRequest::new(vec![Message::user(prompt)]);
    let result = engine
        .generate(&request, &mut ledger)
        .await
        .map_err(|e| e.to_string())?;

    println!("{} ({}):", engine.model(), engine.provider_name());
    println!("{}", result.as_text().unwrap_or_default());

    let summary = ledger.summary();
    println!();
    println!(
        "input={} output={} cached={} cost=${:.6}",
        summary.total_input_tokens,
        summary.total_output_tokens,
        summary.total_cached_tokens,
        summary.total_cost
    );

    if let Some(label) = record {
        let store = UsageStore::from_config(&config.usage);
        ledger.persist(&label, &store).map_err(|e| e.to_string())?;
        println!("Recorded run '{}' in {}", label, store.log_path().display());
    }
    Ok(())
}

fn run_usage(config: &TroupeConfig) -> Result<(), String> {
    let store = UsageStore::from_config(&config.usage);
    let runs = store.read_runs().map_err(|e| e.to_string())?;
    let totals = store.cumulative().map_err(|e| e.to_string())?;

    println!("Runs recorded: {}", runs.len());
    if let Some(last) = runs.last() {
        println!("Last run: {} at {}", last.run_label, last.timestamp);
    }
    println!("Input tokens:  {}", totals.total_input);
    println!("Output tokens: {}", totals.total_output);
    println!("Cached tokens: {}", totals.total_cached);
    println!("Total cost:    ${:.6}", totals.total_cost);
    Ok(())
}

/// Create a default configuration file.
fn run_init(output: Option<PathBuf>, force: bool) -> ExitCode {
    let Some(output_path) = output.or_else(TroupeConfig::default_path) else {
        eprintln!("Could not determine default config path. Please specify one with --output.");
        return ExitCode::FAILURE;
    };

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        return ExitCode::FAILURE;
    }

    // Create parent directories if needed
    if let Some(parent) = output_path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        return ExitCode::FAILURE;
    }

    if let Err(e) = std::fs::write(&output_path, EXAMPLE_CONFIG) {
        eprintln!("Failed to write config file: {}", e);
        return ExitCode::FAILURE;
    }

    println!("Created config file: {}", output_path.display());
    println!("Set GEMINI_API_KEY, then try:");
    println!("  troupe-llm ping");
    ExitCode::SUCCESS
}
