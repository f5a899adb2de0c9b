//! The `info` subcommand: model and point-cloud statistics.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use scanfit::io;

use crate::{Cli, OutputFormat};

pub fn run(model: &Path, cloud: Option<&Path>, cli: &Cli) -> Result<()> {
    let mesh = io::read_model(model)?;
    let coordinate_field = &mesh.fields[0];
    let bounds = coordinate_field.bounds();

    let cloud_data = cloud.map(io::read_point_cloud_xyz).transpose()?;

    match cli.format {
        OutputFormat::Json => {
            let mut value = serde_json::json!({
                "model": {
                    "path": model.display().to_string(),
                    "nodes": mesh.node_count,
                    "elements": mesh.element_count(),
                    "dimension": mesh.dimension(),
                    "coordinate_field": coordinate_field.name,
                },
            });
            if let Some((min, max)) = bounds {
                value["model"]["bounds"] = serde_json::json!({
                    "min": [min.x, min.y, min.z],
                    "max": [max.x, max.y, max.z],
                });
            }
            if let Some(points) = &cloud_data {
                value["cloud"] = serde_json::json!({
                    "points": points.point_count,
                });
            }
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Model".bold());
                println!("  path:             {}", model.display());
                println!("  nodes:            {}", mesh.node_count);
                println!("  elements:         {}", mesh.element_count());
                println!("  dimension:        {}", mesh.dimension());
                println!("  coordinate field: {}", coordinate_field.name);
                if let Some((min, max)) = bounds {
                    println!(
                        "  bounds:           ({:.3}, {:.3}, {:.3}) - ({:.3}, {:.3}, {:.3})",
                        min.x, min.y, min.z, max.x, max.y, max.z
                    );
                }
                if let Some(points) = &cloud_data {
                    println!("{}", "Point cloud".bold());
                    println!("  points:           {}", points.point_count);
                }
            }
        }
    }
    Ok(())
}
