//! The `fit` subcommand: the full align-project-filter-fit pipeline.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use scanfit::io;
use tracing::info;

use crate::{Cli, OutputFormat};
use super::{load_align_settings_if_present, load_fit_settings_if_present, load_session};

#[allow(clippy::too_many_arguments)]
pub fn run(
    model: &Path,
    cloud: &Path,
    location: &Path,
    filter_top_error: bool,
    filter_non_normal: bool,
    iterations: Option<u32>,
    rounds: u32,
    cli: &Cli,
) -> Result<()> {
    let mut session = load_session(model, cloud)?;
    let align_loaded = load_align_settings_if_present(&mut session, location)?;
    let fit_loaded = load_fit_settings_if_present(&mut session, location)?;
    if let Some(iterations) = iterations {
        session.set_fit_max_iterations(iterations)?;
    }
    info!(align_loaded, fit_loaded, "session settings resolved");

    session.set_phase_fit();

    let rounds = rounds.max(1);
    let mut round = 0;
    let report = loop {
        let projection = session.calculate_projections()?;
        info!(round, projected = projection.projected, "projection round");
        if filter_top_error {
            let proportion = session.filter_settings().top_error_proportion;
            session.filter_top_error(proportion)?;
        }
        if filter_non_normal {
            let limit = session.filter_settings().non_normal_projection_limit;
            session.filter_non_normal(limit)?;
        }
        let fit_report = session.fit()?;
        round += 1;
        if round >= rounds {
            break fit_report;
        }
    };

    session.write_output_model(location)?;
    let output = io::output_model_path(location);

    match cli.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "iterations": report.iterations,
                    "converged": report.converged,
                    "initial_objective": report.initial_objective,
                    "final_objective": report.final_objective,
                    "mean_error": report.stats.map(|s| s.mean),
                    "max_error": report.stats.map(|s| s.maximum),
                    "active": session.cloud().active_count(),
                    "output": output.display().to_string(),
                }))?
            );
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Fit".bold());
                println!("  iterations: {}", report.iterations);
                println!("  converged:  {}", report.converged);
                println!(
                    "  objective:  {:.6e} -> {:.6e}",
                    report.initial_objective, report.final_objective
                );
                super::project::print_stats(report.stats);
                println!("  active:     {}", session.cloud().active_count());
                println!("  output:     {}", output.display());
            }
        }
    }
    Ok(())
}
