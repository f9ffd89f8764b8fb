//! Timeline runner CLI
//!
//! Usage:
//!   framecheck                          # Run every timeline under timelines/
//!   framecheck timelines/demos.toml     # Run one document
//!   framecheck --generate               # Write captures as new ground truth
//!   framecheck --workers 4 --report out/report.json
//!   framecheck --list-untracked         # Programs no timeline covers

use anyhow::{Context, bail};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

use framecheck::config::{RunnerConfig, init_logging};
use framecheck::orchestrator::{Collected, Orchestrator, TestReport, TestResult};
use framecheck::{ActionRegistry, RunHistory, TIMELINES_DIR, Timeline, demos};

#[derive(Parser)]
#[command(
    name = "framecheck",
    about = "Drive frame-stepped programs through scripted timelines and compare their frames"
)]
struct Cli {
    /// Timeline document or directory of documents
    #[arg(default_value = TIMELINES_DIR)]
    timelines: PathBuf,

    /// Log level (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    log: String,

    /// JSON settings file (default: config/framecheck.json, then the template)
    #[arg(long)]
    settings: Option<String>,

    /// Write captures as ground truth instead of comparing
    #[arg(long)]
    generate: bool,

    /// Directory for truth/capture pairs of failed comparisons
    #[arg(long)]
    save_compare_dir: Option<String>,

    /// Directory relative ground-truth paths resolve against
    #[arg(long)]
    baseline_root: Option<String>,

    /// Worker threads (0 = sequential)
    #[arg(long)]
    workers: Option<usize>,

    /// Seed forced on every program
    #[arg(long)]
    seed: Option<u64>,

    /// Fire at most one due step per frame
    #[arg(long)]
    one_step_per_tick: bool,

    /// Architecture for `machine` filtering
    #[arg(long)]
    machine: Option<String>,

    /// Write a JSON report here
    #[arg(long)]
    report: Option<String>,

    /// Append results to this SQLite database
    #[arg(long)]
    history_db: Option<String>,

    /// List catalog programs no timeline covers, then exit
    #[arg(long)]
    list_untracked: bool,

    /// Show remaining steps of failed tests
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> anyhow::Result<RunnerConfig> {
        let mut config = match &self.settings {
            Some(path) => RunnerConfig::from_file(path)?,
            None => RunnerConfig::from_config_files(),
        };
        if self.generate {
            config.generate_captures = true;
        }
        if self.one_step_per_tick {
            config.drain_steps = false;
        }
        if let Some(dir) = &self.save_compare_dir {
            config.save_compare_dir = dir.clone();
        }
        if let Some(root) = &self.baseline_root {
            config.baseline_root = root.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.machine.is_some() {
            config.machine = self.machine.clone();
        }
        if self.report.is_some() {
            config.report = self.report.clone();
        }
        if self.history_db.is_some() {
            config.history_db = self.history_db.clone();
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);
    let config = cli.config()?;

    println!("Framecheck");
    println!("==========\n");

    if !cli.timelines.exists() {
        bail!("No timelines found at {}", cli.timelines.display());
    }
    let timeline = Timeline::load_path(&cli.timelines)?.for_machine(&config.machine());

    let orchestrator = Orchestrator::new(
        ActionRegistry::with_builtins(),
        demos::catalog(),
        config.run_options(),
    );

    if cli.list_untracked {
        let untracked = orchestrator.untracked(&timeline.tests);
        println!("Untracked programs: {}", untracked.len());
        for path in untracked {
            println!("  {}", path);
        }
        return Ok(());
    }

    if timeline.is_empty() {
        println!("No tests found in {}", cli.timelines.display());
        std::process::exit(1);
    }

    let collected = orchestrator.collect(timeline);
    let planned = collected
        .iter()
        .filter(|c| matches!(c, Collected::Run(_)))
        .count();
    println!(
        "Running {} tests ({} rejected at collection)\n",
        planned,
        collected.len() - planned
    );

    let summary = orchestrator.run_collected(&collected)?;
    for report in &summary.reports {
        print_result(report, cli.verbose);
    }

    println!("\n==========");
    println!(
        "Results: {} passed, {} failed",
        summary.passed(),
        summary.failed()
    );

    if let Some(path) = &config.report {
        write_report(Path::new(path), &summary.to_json()?)?;
        println!("Report written to {}", path);
    }

    if let Some(db) = &config.history_db {
        let settings = serde_json::to_string(&config).ok();
        let history = RunHistory::open(Path::new(db), settings.as_deref())
            .with_context(|| format!("opening history database {}", db))?;
        let stored = history.record_summary(&summary);
        println!("Recorded {} results in session {}", stored, history.session_id());
    }

    if !summary.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

fn write_report(path: &Path, json: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

fn print_result(report: &TestReport, verbose: bool) {
    let name = &report.name;
    let dots = ".".repeat(50 - name.len().min(49));

    match &report.result {
        TestResult::Pass { frames } => {
            println!(
                "  {} {} PASS ({} frames, {} ms)",
                name, dots, frames, report.elapsed_ms
            );
        }
        TestResult::Fail { error, remaining } => {
            println!("  {} {} FAIL", name, dots);
            println!("    {}", error);
            if verbose {
                for step in remaining {
                    println!("      not run: {}", step);
                }
            }
        }
        TestResult::Error { message } => {
            println!("  {} {} ERROR", name, dots);
            println!("    {}", message);
        }
    }
}
