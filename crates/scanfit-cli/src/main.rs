//! scanfit: command-line driver for mesh-to-scan fitting.
//!
//! Replaces the interactive shell for scripted use: align a template model
//! to a scanned point cloud, project and filter data correspondences, run
//! the penalized fit, and write the fitted model out.
//!
//! # Logging
//!
//! Set `RUST_LOG` to control log output:
//! - `RUST_LOG=scanfit=info` - basic operation logging
//! - `RUST_LOG=scanfit=debug` - detailed progress logging
//! - `RUST_LOG=scanfit::timing=debug` - performance timing
//!
//! # Example
//!
//! ```bash
//! # Full pipeline with saved settings next to the run location
//! scanfit fit template.exfile --cloud scan.xyz --location runs/foot01
//!
//! # Inspect a model and scan without fitting
//! scanfit info template.exfile --cloud scan.xyz
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;

use commands::{align, fit, info, project};

/// scanfit - fit finite-element meshes to scanned point clouds.
#[derive(Parser)]
#[command(name = "scanfit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display model and point-cloud statistics
    Info {
        /// Input model file
        model: PathBuf,

        /// Scanned point cloud (XYZ text)
        #[arg(long)]
        cloud: Option<PathBuf>,
    },

    /// Prepare and save alignment settings for a session location
    Align {
        /// Input model file
        model: PathBuf,

        /// Scanned point cloud (XYZ text)
        #[arg(long)]
        cloud: PathBuf,

        /// Session location stem for settings files
        #[arg(long)]
        location: PathBuf,

        /// Overwrite the offset to centre the model on the data
        #[arg(long)]
        auto_centre: bool,

        /// Uniform scale to apply
        #[arg(long)]
        scale: Option<f64>,

        /// Mirror the model (sign flip convention)
        #[arg(long)]
        mirror: bool,
    },

    /// Project data points onto the model and report error statistics
    Project {
        /// Input model file
        model: PathBuf,

        /// Scanned point cloud (XYZ text)
        #[arg(long)]
        cloud: PathBuf,

        /// Session location stem; align settings are loaded when present
        #[arg(long)]
        location: Option<PathBuf>,

        /// Apply the top-error filter with this proportion of maximum error
        #[arg(long)]
        top_error: Option<f64>,

        /// Apply the non-normal filter with this alignment limit
        #[arg(long)]
        non_normal: Option<f64>,
    },

    /// Run the full align-project-filter-fit pipeline and write the output
    /// model
    Fit {
        /// Input model file
        model: PathBuf,

        /// Scanned point cloud (XYZ text)
        #[arg(long)]
        cloud: PathBuf,

        /// Session location stem; settings files are loaded from and the
        /// output model written to this stem
        #[arg(long)]
        location: PathBuf,

        /// Apply the top-error filter before fitting
        #[arg(long)]
        filter_top_error: bool,

        /// Apply the non-normal filter before fitting
        #[arg(long)]
        filter_non_normal: bool,

        /// Override the solver iteration bound
        #[arg(long)]
        iterations: Option<u32>,

        /// Number of project-fit rounds
        #[arg(long, default_value = "1")]
        rounds: u32,
    },
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "scanfit=info",
            2 => "scanfit=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    // Nicer panic reports during development.
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Info { model, cloud } => info::run(model, cloud.as_deref(), &cli),
        Commands::Align {
            model,
            cloud,
            location,
            auto_centre,
            scale,
            mirror,
        } => align::run(model, cloud, location, *auto_centre, *scale, *mirror, &cli),
        Commands::Project {
            model,
            cloud,
            location,
            top_error,
            non_normal,
        } => project::run(
            model,
            cloud,
            location.as_deref(),
            *top_error,
            *non_normal,
            &cli,
        ),
        Commands::Fit {
            model,
            cloud,
            location,
            filter_top_error,
            filter_non_normal,
            iterations,
            rounds,
        } => fit::run(
            model,
            cloud,
            location,
            *filter_top_error,
            *filter_non_normal,
            *iterations,
            *rounds,
            &cli,
        ),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(fit_err) = e.downcast_ref::<scanfit::FitError>() {
                eprintln!("{}: {}", "Error".red().bold(), fit_err);
                eprintln!("  {}: {}", "Code".cyan(), fit_err.code());
                if fit_err.is_recoverable() {
                    eprintln!(
                        "  {}: the session state is unchanged; adjust the input and retry",
                        "Note".green()
                    );
                }
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
