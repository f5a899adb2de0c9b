//! The `project` subcommand: data projections and error statistics.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use scanfit::ErrorStats;

use crate::{Cli, OutputFormat};
use super::{load_align_settings_if_present, load_session};

pub fn run(
    model: &Path,
    cloud: &Path,
    location: Option<&Path>,
    top_error: Option<f64>,
    non_normal: Option<f64>,
    cli: &Cli,
) -> Result<()> {
    let mut session = load_session(model, cloud)?;
    if let Some(location) = location {
        load_align_settings_if_present(&mut session, location)?;
    }
    session.set_phase_fit();
    let report = session.calculate_projections()?;

    let mut deactivated = 0usize;
    if let Some(proportion) = top_error {
        deactivated += session.filter_top_error(proportion)?.deactivated;
    }
    if let Some(limit) = non_normal {
        deactivated += session.filter_non_normal(limit)?.deactivated;
    }
    let stats = session.error_stats();

    match cli.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "projected": report.projected,
                    "skipped": report.skipped,
                    "deactivated": deactivated,
                    "active": session.cloud().active_count(),
                    "mean_error": stats.map(|s| s.mean),
                    "max_error": stats.map(|s| s.maximum),
                }))?
            );
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Projection".bold());
                println!("  projected: {}", report.projected);
                if report.skipped > 0 {
                    println!("  skipped:   {}", report.skipped);
                }
                if deactivated > 0 {
                    println!("  filtered:  {}", deactivated);
                }
                println!("  active:    {}", session.cloud().active_count());
                print_stats(stats);
            }
        }
    }
    Ok(())
}

pub(crate) fn print_stats(stats: Option<ErrorStats>) {
    match stats {
        Some(stats) => {
            println!("  mean error: {:.6}", stats.mean);
            println!("  max error:  {:.6}", stats.maximum);
        }
        None => println!("  no data"),
    }
}
