//! Kolosal Forecast CLI Module
//!
//! Command-line interface for training forecasters from a JSON config and a
//! CSV dataset.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::TrainingConfig;
use crate::tracking::{ExperimentTracker, LocalTracker};
use crate::training::{register_builtin_models, ModelRegistry, Trainer, TrainingOutcome};
use crate::utils::data_loader::{save_forecast, DataLoader};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString {
    s.truecolor(100, 100, 100)
}
fn accent(s: &str) -> ColoredString {
    s.truecolor(120, 170, 255)
}
fn muted(s: &str) -> ColoredString {
    s.truecolor(140, 140, 140)
}
fn ok(s: &str) -> ColoredString {
    s.truecolor(100, 210, 120)
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn kv(key: &str, val: &str) {
    println!("  {:<22} {}", muted(key), val.white());
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "kolosal-forecast")]
#[command(author = "KolosalAI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Time-series training and hyperparameter optimization")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a forecaster from a config and a CSV dataset
    Train {
        /// Training config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Input data file (CSV)
        #[arg(short, long)]
        data: PathBuf,

        /// Timestamp column name
        #[arg(long, default_value = "date")]
        date_column: String,

        /// Value column name
        #[arg(long, default_value = "value")]
        value_column: String,

        /// Override tracking.run_name
        #[arg(long)]
        run_name: Option<String>,

        /// Write test-period forecasts to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List registered model types
    Models,

    /// Validate a training config
    Validate {
        /// Training config (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Dispatch a parsed command line
pub fn run(cli: Cli) -> anyhow::Result<()> {
    let registry = ModelRegistry::global();
    register_builtin_models(registry);

    match cli.command {
        Commands::Train {
            config,
            data,
            date_column,
            value_column,
            run_name,
            output,
        } => cmd_train(
            registry,
            &config,
            &data,
            &date_column,
            &value_column,
            run_name.as_deref(),
            output.as_deref(),
        ),
        Commands::Models => cmd_models(registry),
        Commands::Validate { config } => cmd_validate(&config),
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_train(
    registry: &ModelRegistry,
    config_path: &Path,
    data_path: &Path,
    date_column: &str,
    value_column: &str,
    run_name: Option<&str>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    section("Train");

    step_run("Loading config");
    let mut config = TrainingConfig::from_file(config_path)?;
    if let Some(name) = run_name {
        config.set(&["tracking", "run_name"], serde_json::Value::String(name.to_string()))?;
    }
    step_done(&format!("{} / {}", config.model_type(), config.model_name()));

    step_run("Loading data");
    let start = Instant::now();
    let records = DataLoader::new()
        .with_columns(date_column, value_column)
        .load_records(data_path)?;
    step_done(&format!("{} rows in {:?}", records.len(), start.elapsed()));

    let tracker: Box<dyn ExperimentTracker> = Box::new(LocalTracker::new(config.tracking_dir()));
    let model_type = config.model_type().to_string();
    let mut trainer = Trainer::new(config, registry, tracker)?
        .with_artifact(data_path)
        .with_artifact(config_path);

    step_run(&format!("Training {}", model_type.cyan()));
    let start = Instant::now();
    let outcome = trainer.train_records(&records)?;
    step_done(&format!("{:?}", start.elapsed()));

    print_outcome(&outcome);

    if let Some(path) = output {
        step_run(&format!("Saving → {}", path.display()));
        save_forecast(path, &outcome.test_timestamps, &outcome.test_evaluation.predictions)?;
        step_done(&format!("{} rows", outcome.test_evaluation.predictions.len()));
    }
    println!();
    Ok(())
}

fn print_outcome(outcome: &TrainingOutcome) {
    section("Result");
    kv("Model", outcome.model.name());
    kv(
        "Frequency",
        &outcome.frequency.map_or_else(|| "unknown".to_string(), |f| f.code()),
    );
    if let Some(run_id) = &outcome.run_id {
        kv("Run", run_id);
    }

    for (name, value) in outcome.test_evaluation.metrics.iter() {
        println!("  {:<22} {}", muted(&format!("test {}", name)), format!("{:.4}", value).white().bold());
    }
    if let Some(val) = &outcome.validation_evaluation {
        for (name, value) in val.metrics.iter() {
            kv(&format!("val {}", name), &format!("{:.4}", value));
        }
    }

    if let Some(summary) = &outcome.study_summary {
        section("Search");
        kv(
            "Trials",
            &format!(
                "{} ({} ok, {} capped, {} failed)",
                summary.n_trials, summary.n_ok, summary.n_capped, summary.n_failed
            ),
        );
        if let Some(best) = summary.best_value {
            kv("Best loss", &format!("{:.4}", best));
        }
        kv("Stopped", &format!("{:?}", summary.stop_reason));
    }

    section("Parameters");
    for (name, value) in &outcome.best_params {
        kv(name, &value.to_string());
    }
}

pub fn cmd_models(registry: &ModelRegistry) -> anyhow::Result<()> {
    section("Models");
    for key in registry.list_models() {
        println!("  {} {}", ok("•"), key);
    }
    println!();
    Ok(())
}

pub fn cmd_validate(config_path: &Path) -> anyhow::Result<()> {
    section("Validate");
    match TrainingConfig::from_file(config_path) {
        Ok(config) => {
            println!("  {} {}", ok("✓"), "config is valid");
            kv("Model", &format!("{} ({})", config.model_type(), config.model_name()));
            kv("Search", if config.search_enabled() { "enabled" } else { "disabled" });
            kv("Max evals", &config.max_evals().to_string());
            kv("Metric", config.metric());
            println!();
            Ok(())
        }
        Err(e) => {
            println!("  {} {}", "✗".red(), e.to_string().red());
            println!();
            Err(e.into())
        }
    }
}
