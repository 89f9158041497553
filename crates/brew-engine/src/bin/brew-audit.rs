//! # Ledger Audit
//!
//! Replays every stock and point ledger and compares it with the cached
//! balances. Exits with status 1 when any figure drifted.
//!
//! ## Usage
//! ```bash
//! # Audit the database named by the default config
//! cargo run -p brew-engine --bin brew-audit
//!
//! # Explicit config, machine-readable output
//! cargo run -p brew-engine --bin brew-audit -- --config ./engine.toml --json
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use brew_engine::telemetry::init_tracing;
use brew_engine::{Engine, EngineConfig};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut json = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--json" => json = true,
            "--help" | "-h" => {
                println!("Brew POS Ledger Audit");
                println!();
                println!("Usage: brew-audit [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Engine config file (default: platform config dir)");
                println!("      --json           Print the report as JSON");
                println!("  -h, --help           Show this help message");
                return ExitCode::SUCCESS;
            }
            _ => {}
        }
        i += 1;
    }

    match run(config_path, json).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %e, "Audit failed");
            ExitCode::from(2)
        }
    }
}

/// Returns whether the ledgers are clean.
async fn run(config_path: Option<PathBuf>, json: bool) -> Result<bool, Box<dyn std::error::Error>> {
    let config = EngineConfig::load(config_path)?;
    let engine = Engine::open(config).await?;
    let report = engine.audit_ledgers().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Brew POS Ledger Audit");
        println!("=====================");
        println!("Database:    {}", engine.config().database.path.display());
        println!("Ingredients: {}", report.ingredients_checked);
        println!("Members:     {}", report.members_checked);
        println!();
        if report.is_clean() {
            println!("✓ All ledgers replay to their cached balances");
        } else {
            for drift in &report.drifts {
                println!("✗ {drift}");
            }
        }
    }

    Ok(report.is_clean())
}
