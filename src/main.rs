use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

mod config;
mod dedup;
mod error;
mod fingerprint;
mod fsops;
mod keywords;
mod pipeline;
mod severity;

use config::Config;
use dedup::{collect_unique, DedupReport, WalkFilter};
use error::{IoContext, Result};
use fingerprint::Fingerprint;
use keywords::{promote_relevant, KeywordFilter, KeywordReport};
use pipeline::{Pipeline, RunOptions, RunReport};
use severity::{split_by_severity, SeverityReport};

/// poc-sieve - Deduplicate and filter vulnerability templates for active scanning
#[derive(Parser)]
#[command(name = "poc-sieve")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (defaults to .poc-sieve.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Quiet mode - only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run dedup, severity and keyword stages in order
    Run {
        /// Corpus root
        source: PathBuf,

        /// Parent directory of the stage directories
        #[arg(short, long)]
        work_dir: Option<PathBuf>,

        /// Copy the final templates into this directory
        #[arg(short, long)]
        install: Option<PathBuf>,

        /// Keep step1/step2 (and step3 when installing) after the run
        #[arg(long)]
        keep_intermediate: bool,

        /// Clear stage directories left over from a previous run
        #[arg(long)]
        clean: bool,

        /// Output the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stage 1: copy one template per fingerprint into a target directory
    Dedup {
        /// Corpus root
        source: PathBuf,

        /// Output directory
        target: PathBuf,
    },

    /// Stage 2: move templates with a non-info severity out of a directory
    Severity {
        /// Directory produced by `dedup`
        source: PathBuf,

        /// Directory receiving non-info templates
        target: PathBuf,
    },

    /// Stage 3: move HTTP templates without excluded resources into a directory
    Keywords {
        /// Directory left by `severity`
        source: PathBuf,

        /// Directory receiving accepted templates
        target: PathBuf,
    },

    /// Print the dedup fingerprint of each file
    Fingerprint {
        /// Template files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let to_stderr = matches!(cli.command, Commands::Run { json: true, .. });
    let level = if cli.quiet { "warn" } else { cli.log_level.as_str() };
    init_logging(level, to_stderr);

    let result = Config::load(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Run { source, work_dir, install, keep_intermediate, clean, json } => {
            let config = Config {
                work_dir: work_dir.unwrap_or(config.work_dir),
                ..config
            };
            let options = RunOptions {
                clean,
                install,
                keep_intermediate,
                quiet: cli.quiet || json,
            };
            cmd_run(&source, &config, &options, json)
        }
        Commands::Dedup { source, target } => cmd_dedup(&source, &target, &config, cli.quiet),
        Commands::Severity { source, target } => cmd_severity(&source, &target, cli.quiet),
        Commands::Keywords { source, target } => cmd_keywords(&source, &target, &config, cli.quiet),
        Commands::Fingerprint { files } => cmd_fingerprint(&files),
    });

    if let Err(e) = result {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Events go to stdout so they interleave with progress, except when stdout carries JSON.
fn init_logging(level: &str, to_stderr: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = if to_stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .init();
}

fn cmd_run(source: &Path, config: &Config, options: &RunOptions, json: bool) -> Result<()> {
    let start = Instant::now();
    let pipeline = Pipeline::new(source, config)?;
    let report = pipeline.run(options)?;

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{}", out),
            Err(e) => tracing::error!(error = %e, "failed to serialize run report"),
        }
        return Ok(());
    }

    if !options.quiet {
        print_run_summary(&report);
        if options.keep_intermediate {
            let dirs = pipeline.dirs();
            println!(
                "  Intermediate:       {}, {}",
                dirs.unique.display().to_string().dimmed(),
                dirs.severe.display().to_string().dimmed()
            );
        }
        println!("  Time elapsed:       {:.2?}", start.elapsed());
        println!();
        println!("{}", "Processing complete!".green().bold());
    }
    Ok(())
}

fn print_run_summary(report: &RunReport) {
    println!();
    println!("{}", "Run Summary".green().bold());
    print_dedup(&report.dedup);
    print_severity(&report.severity);
    print_keywords(&report.keywords);
    if let Some(installed) = report.installed {
        println!("  Installed:          {}", installed.to_string().cyan());
    }
    println!("  Final templates:    {}", report.final_dir.display().to_string().cyan());
}

fn print_dedup(report: &DedupReport) {
    println!("  Templates scanned:  {}", report.scanned.to_string().cyan());
    println!("  Unique:             {}", report.unique.to_string().cyan());
    println!("  Duplicates:         {}", report.duplicates.to_string().dimmed());
    if report.errors > 0 {
        println!("  Unreadable:         {}", report.errors.to_string().yellow());
    }
}

fn print_severity(report: &SeverityReport) {
    println!("  Non-info moved:     {}", report.moved.to_string().cyan());
    println!(
        "  Retained:           {} info, {} without severity, {} unparseable",
        report.retained_info, report.retained_missing, report.retained_unparseable
    );
    if report.errors > 0 {
        println!("  Move failures:      {}", report.errors.to_string().yellow());
    }
}

fn print_keywords(report: &KeywordReport) {
    println!("  Accepted:           {}", report.accepted.to_string().green());
    println!("  Rejected:           {}", report.rejected.to_string().dimmed());
    if report.errors > 0 {
        println!("  Keyword failures:   {}", report.errors.to_string().yellow());
    }
}

fn cmd_dedup(source: &Path, target: &Path, config: &Config, quiet: bool) -> Result<()> {
    std::fs::create_dir_all(target).at(target)?;
    let filter = WalkFilter::new(source, &[target], &config.exclude)?;
    let report = collect_unique(source, target, &filter)?;
    if !quiet {
        println!();
        print_dedup(&report);
    }
    Ok(())
}

fn cmd_severity(source: &Path, target: &Path, quiet: bool) -> Result<()> {
    let report = split_by_severity(source, target)?;
    if !quiet {
        println!();
        print_severity(&report);
    }
    Ok(())
}

fn cmd_keywords(source: &Path, target: &Path, config: &Config, quiet: bool) -> Result<()> {
    let filter = KeywordFilter::new(&config.http_keywords, &config.skip_keywords)?;
    let report = promote_relevant(source, target, &filter)?;
    if !quiet {
        println!();
        print_keywords(&report);
    }
    Ok(())
}

fn cmd_fingerprint(files: &[PathBuf]) -> Result<()> {
    let mut first_seen: HashMap<Fingerprint, &Path> = HashMap::new();

    for path in files {
        match Fingerprint::of_file(path) {
            Ok(fingerprint) => match first_seen.get(&fingerprint) {
                Some(original) => println!(
                    "{}  {} {}",
                    fingerprint.to_string().yellow(),
                    path.display(),
                    format!("(duplicate of {})", original.display()).dimmed()
                ),
                None => {
                    println!("{}  {}", fingerprint.to_string().cyan(), path.display());
                    first_seen.insert(fingerprint, path);
                }
            },
            Err(e) => eprintln!("{}: {}", "error".red().bold(), e),
        }
    }

    Ok(())
}
