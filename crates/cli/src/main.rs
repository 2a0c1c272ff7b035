//! patchport command-line tool.
//!
//! Carries marker-wrapped local modifications ("contact points") across
//! upstream upgrades. Subcommands cover the whole pipeline: extracting
//! contact points from the container tree, matching them against an
//! upgraded container, running the resumable merge phase, and inspecting
//! the work and error records.

mod style;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use patchport_core::config::AppConfig;
use patchport_core::discovery;
use patchport_core::engine::{EntryOutcome, MergeEngine};
use patchport_core::record::{ErrorRecord, RuntimeRecord};
use patchport_core::vcs::ContainerRepo;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Carry marker-wrapped local patches across upstream upgrades.
#[derive(Parser, Debug)]
#[command(name = "patchport", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a commented default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./patchport.toml")]
        output: PathBuf,
    },

    /// Load and validate the configuration.
    Validate,

    /// Copy marker-bearing files from the container into the
    /// contact-points tree.
    Extract,

    /// Match contact points against the container tree and (re)build the
    /// runtime record.
    Discover,

    /// Run the merge phase over the runtime record. Resumes at the first
    /// pending entry.
    Apply {
        /// Re-run discovery first, discarding the previous record.
        #[arg(long)]
        fresh: bool,
    },

    /// Show record counts and recent errors.
    Status,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{e:#}")));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { output } = &cli.command {
        return cmd_init(output);
    }

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = load_config(&config_path)?;
    init_tracing(&config);

    match &cli.command {
        Commands::Init { .. } => unreachable!(),
        Commands::Validate => cmd_validate(&config_path),
        Commands::Extract => cmd_extract(&config),
        Commands::Discover => cmd_discover(&config),
        Commands::Apply { fresh } => cmd_apply(&config, *fresh),
        Commands::Status => cmd_status(&config),
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn load_config(path: &PathBuf) -> Result<AppConfig> {
    let config = AppConfig::load_from_file(path)
        .with_context(|| format!("failed to load configuration from '{}'", path.display()))?;
    config
        .validate()
        .context("configuration is invalid")?;
    Ok(config)
}

fn init_tracing(config: &AppConfig) {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.options.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &PathBuf) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "'{}' already exists — remove it first or choose another path",
            output.display()
        );
    }
    std::fs::write(output, AppConfig::template())
        .with_context(|| format!("failed to write '{}'", output.display()))?;
    println!(
        "{}",
        style::success(&format!("wrote {}", output.display()))
    );
    println!(
        "{}",
        style::dim("Edit the marker token and tree paths before running 'patchport extract'.")
    );
    Ok(())
}

fn cmd_validate(config_path: &PathBuf) -> Result<()> {
    // load_config already validated; report and exit.
    println!(
        "{}",
        style::success(&format!("{} is valid", config_path.display()))
    );
    Ok(())
}

fn cmd_extract(config: &AppConfig) -> Result<()> {
    std::fs::create_dir_all(&config.trees.working_dir)?;
    std::fs::create_dir_all(&config.trees.contact_points_dir)?;
    let errors = ErrorRecord::open(config.trees.error_record_path());

    let report = discovery::extract(config, &errors)?;

    println!(
        "{}",
        style::success(&format!("extracted {} contact point(s)", report.copied))
    );
    if report.malformed > 0 {
        println!(
            "{}",
            style::warn(&format!(
                "{} file(s) with malformed markers — see {}",
                report.malformed,
                errors.path().display()
            ))
        );
    }
    if report.skipped > 0 {
        println!(
            "{}",
            style::dim(&format!("{} file(s) skipped by policy", report.skipped))
        );
    }
    Ok(())
}

fn cmd_discover(config: &AppConfig) -> Result<()> {
    std::fs::create_dir_all(&config.trees.working_dir)?;
    let mut record = RuntimeRecord::initialize(config.trees.runtime_record_path())?;
    let errors = ErrorRecord::initialize(config.trees.error_record_path())?;

    let report = discovery::discover(config, &mut record, &errors)?;

    println!(
        "{}",
        style::success(&format!(
            "{} queued for merge, {} for whole-file copy",
            report.matched, report.pure_copies
        ))
    );
    if report.unmatched > 0 {
        println!(
            "{}",
            style::warn(&format!(
                "{} contact point(s) have no upstream counterpart — see {}",
                report.unmatched,
                errors.path().display()
            ))
        );
    }
    Ok(())
}

fn cmd_apply(config: &AppConfig, fresh: bool) -> Result<()> {
    if fresh {
        cmd_discover(config)?;
    }

    let mut record = RuntimeRecord::load(config.trees.runtime_record_path())?;
    let errors = ErrorRecord::open(config.trees.error_record_path());
    let repo = ContainerRepo::open(&config.trees.container_root, &config.vcs.unmodified_ref)?;
    let engine = MergeEngine::new(config, &repo, &repo);

    let pending = record.pending_count();
    if pending == 0 {
        println!("{}", style::dim("nothing pending — run 'patchport discover' first?"));
        return Ok(());
    }

    let bar = ProgressBar::new(pending as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:30.blue} {pos}/{len} {msg}")
            .expect("static template"),
    );

    let mut failed = 0usize;
    let mut flagged = 0usize;
    while let Some((entry, outcome)) = engine.step(&mut record, &errors)? {
        match &outcome {
            EntryOutcome::Failed(_) => failed += 1,
            EntryOutcome::Merged { needs_review: true } => flagged += 1,
            _ => {}
        }
        bar.set_message(entry.contact_point.clone());
        bar.inc(1);
    }
    bar.finish_and_clear();

    let done = pending - failed;
    println!(
        "{}",
        style::success(&format!("{done} of {pending} entries processed cleanly"))
    );
    if flagged > 0 {
        println!(
            "{}",
            style::warn(&format!(
                "{flagged} merge(s) flagged for review — see {}",
                errors.path().display()
            ))
        );
    }
    if failed > 0 {
        println!(
            "{}",
            style::error(&format!(
                "{failed} entr(y/ies) failed — see {}",
                errors.path().display()
            ))
        );
    }
    Ok(())
}

fn cmd_status(config: &AppConfig) -> Result<()> {
    println!();
    println!("{}", style::header("patchport status"));
    println!("{}", "═".repeat(16));
    println!();

    match RuntimeRecord::load(config.trees.runtime_record_path()) {
        Ok(record) => {
            let pure = record
                .entries()
                .iter()
                .filter(|e| e.is_pure_copy())
                .count();
            println!("  Entries      {}", record.len());
            println!("  Processed    {}", record.processed_count());
            println!("  Pending      {}", record.pending_count());
            println!("  Pure copies  {}", pure);
        }
        Err(_) => {
            println!(
                "  {}",
                style::dim("No runtime record. Run 'patchport discover' first.")
            );
        }
    }

    let errors = ErrorRecord::open(config.trees.error_record_path());
    let entries = errors.read_all().unwrap_or_default();
    println!();
    if entries.is_empty() {
        println!("  {}", style::success("no recorded errors"));
    } else {
        println!("  {}", style::header(&format!("{} error(s)", entries.len())));
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["When", "Contact point", "Detail"]);
        for entry in entries.iter().rev().take(10) {
            table.add_row(vec![
                Cell::new(entry.timestamp.format("%Y-%m-%d %H:%M").to_string()),
                Cell::new(&entry.contact_point),
                Cell::new(&entry.detail),
            ]);
        }
        println!("{table}");
    }
    println!();
    Ok(())
}
