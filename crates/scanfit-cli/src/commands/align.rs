//! The `align` subcommand: prepare and persist alignment settings.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::{Cli, OutputFormat};
use super::{load_align_settings_if_present, load_session};

pub fn run(
    model: &Path,
    cloud: &Path,
    location: &Path,
    auto_centre: bool,
    scale: Option<f64>,
    mirror: bool,
    cli: &Cli,
) -> Result<()> {
    let mut session = load_session(model, cloud)?;
    let loaded = load_align_settings_if_present(&mut session, location)?;

    if let Some(scale) = scale {
        session.set_align_scale(scale)?;
    }
    if mirror {
        session.set_align_mirror(true);
    }
    if auto_centre {
        session.auto_centre_on_data()?;
    }
    session.save_align_settings(location)?;

    let state = session.alignment();
    let angles = state.euler_angles();
    let offset = state.offset();
    match cli.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "loaded_existing": loaded,
                    "euler_angles": [angles.x, angles.y, angles.z],
                    "scale": state.scale(),
                    "offset": [offset.x, offset.y, offset.z],
                    "mirror": state.mirror(),
                }))?
            );
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Alignment".bold());
                if loaded {
                    println!("  loaded existing settings for {}", location.display());
                }
                println!(
                    "  euler angles: ({:.4}, {:.4}, {:.4})",
                    angles.x, angles.y, angles.z
                );
                println!("  scale:        {:.4}", state.scale());
                println!(
                    "  offset:       ({:.4}, {:.4}, {:.4})",
                    offset.x, offset.y, offset.z
                );
                println!("  mirror:       {}", state.mirror());
                println!("  saved to {}", location.display());
            }
        }
    }
    Ok(())
}
