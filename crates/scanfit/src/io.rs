//! Model output and point-cloud input.
//!
//! The output model file carries node and element geometry plus the current
//! (possibly renamed) coordinate field only, across every element dimension
//! present. The same format can be read back to resume from a previous
//! solution. Point clouds load from plain XYZ text: one point per line,
//! whitespace-separated, `#` comments ignored.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use nalgebra::Point3;
use tracing::{debug, info};

use crate::error::{FitError, FitResult};
use crate::types::{DataPointSet, Element, ElementShape, FeMesh, NodeField};

/// Path of the output model for a location stem.
pub fn output_model_path(location: &Path) -> PathBuf {
    let mut name = location.as_os_str().to_os_string();
    name.push("-output-model.exfile");
    PathBuf::from(name)
}

fn shape_keyword(shape: ElementShape) -> &'static str {
    match shape {
        ElementShape::Line2 => "line2",
        ElementShape::Quad4 => "quad4",
        ElementShape::Hex8 => "hex8",
    }
}

fn parse_shape(keyword: &str) -> Option<ElementShape> {
    match keyword {
        "line2" => Some(ElementShape::Line2),
        "quad4" => Some(ElementShape::Quad4),
        "hex8" => Some(ElementShape::Hex8),
        _ => None,
    }
}

/// Write the model geometry and its coordinate field.
///
/// Only the given coordinate field is written; other fields (including the
/// reference snapshot) stay private to the session.
pub fn write_output_model(path: &Path, mesh: &FeMesh, coordinate_field: usize) -> FitResult<()> {
    let file = File::create(path).map_err(|e| FitError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    let field = &mesh.fields[coordinate_field];

    let result: std::io::Result<()> = (|| {
        writeln!(writer, "! fitted model")?;
        writeln!(
            writer,
            "Field {} coordinate components={}",
            field.name, field.components
        )?;
        writeln!(writer, "Nodes {}", mesh.node_count)?;
        for (index, value) in field.values.iter().enumerate() {
            writeln!(
                writer,
                "{} {:.17e} {:.17e} {:.17e}",
                index + 1,
                value.x,
                value.y,
                value.z
            )?;
        }
        for dimension in 1..=3usize {
            let elements = mesh.elements_of_dimension(dimension);
            if elements.is_empty() {
                continue;
            }
            writeln!(writer, "Elements dimension={} count={}", dimension, elements.len())?;
            for (ordinal, &element_index) in elements.iter().enumerate() {
                let element = &mesh.elements[element_index as usize];
                write!(writer, "{} {}", ordinal + 1, shape_keyword(element.shape))?;
                for &node in &element.nodes {
                    write!(writer, " {}", node + 1)?;
                }
                writeln!(writer)?;
            }
        }
        writer.flush()
    })();
    result.map_err(|e| FitError::io_write(path, e))?;

    info!(
        path = %path.display(),
        nodes = mesh.node_count,
        elements = mesh.element_count(),
        field = %field.name,
        "output model written"
    );
    Ok(())
}

/// Read a model written by [`write_output_model`].
pub fn read_model(path: &Path) -> FitResult<FeMesh> {
    let file = File::open(path).map_err(|e| FitError::io_read(path, e))?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let mut mesh = FeMesh::new();
    let mut field_name = String::from("coordinates");
    let mut components = 3usize;
    let mut values: Vec<Point3<f64>> = Vec::new();

    let fail = |details: &str| FitError::parse_failed(path, details);

    while let Some(line) = lines.next() {
        let line = line.map_err(|e| FitError::io_read(path, e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('!') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("Field") => {
                field_name = tokens
                    .next()
                    .ok_or_else(|| fail("Field line missing name"))?
                    .to_string();
                for token in tokens {
                    if let Some(count) = token.strip_prefix("components=") {
                        components = count
                            .parse()
                            .map_err(|_| fail("bad components count"))?;
                    }
                }
            }
            Some("Nodes") => {
                let count: usize = tokens
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| fail("bad node count"))?;
                values.reserve(count);
                for _ in 0..count {
                    let line = lines
                        .next()
                        .ok_or_else(|| fail("truncated node list"))?
                        .map_err(|e| FitError::io_read(path, e))?;
                    let mut parts = line.split_whitespace();
                    let _index = parts.next();
                    let mut coordinates = [0.0f64; 3];
                    for value in coordinates.iter_mut() {
                        *value = parts
                            .next()
                            .and_then(|t| t.parse().ok())
                            .ok_or_else(|| fail("bad node coordinate"))?;
                    }
                    values.push(Point3::new(coordinates[0], coordinates[1], coordinates[2]));
                }
                mesh.node_count = values.len();
            }
            Some("Elements") => {
                let mut count = 0usize;
                for token in line.split_whitespace() {
                    if let Some(value) = token.strip_prefix("count=") {
                        count = value.parse().map_err(|_| fail("bad element count"))?;
                    }
                }
                for _ in 0..count {
                    let line = lines
                        .next()
                        .ok_or_else(|| fail("truncated element list"))?
                        .map_err(|e| FitError::io_read(path, e))?;
                    let mut parts = line.split_whitespace();
                    let _ordinal = parts.next();
                    let shape = parts
                        .next()
                        .and_then(parse_shape)
                        .ok_or_else(|| fail("unknown element shape"))?;
                    let mut nodes = Vec::with_capacity(shape.node_count());
                    for _ in 0..shape.node_count() {
                        let node: usize = parts
                            .next()
                            .and_then(|t| t.parse().ok())
                            .ok_or_else(|| fail("bad element node index"))?;
                        if node < 1 || node > mesh.node_count {
                            return Err(fail("element node index out of range"));
                        }
                        nodes.push((node - 1) as u32);
                    }
                    mesh.elements.push(Element::new(shape, nodes));
                }
            }
            _ => return Err(fail("unrecognized section")),
        }
    }

    if values.is_empty() {
        return Err(fail("model has no nodes"));
    }
    mesh.fields.push(NodeField {
        name: field_name,
        components,
        is_coordinate: true,
        values,
    });
    debug!(
        path = %path.display(),
        nodes = mesh.node_count,
        elements = mesh.element_count(),
        "model read"
    );
    Ok(mesh)
}

/// Read a point cloud from plain XYZ text.
pub fn read_point_cloud_xyz(path: &Path) -> FitResult<DataPointSet> {
    let file = File::open(path).map_err(|e| FitError::io_read(path, e))?;
    let reader = BufReader::new(file);
    let mut points = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| FitError::io_read(path, e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let mut coordinates = [0.0f64; 3];
        for value in coordinates.iter_mut() {
            *value = parts.next().and_then(|t| t.parse().ok()).ok_or_else(|| {
                FitError::parse_failed(path, format!("bad XYZ record on line {}", number + 1))
            })?;
        }
        points.push(Point3::new(coordinates[0], coordinates[1], coordinates[2]));
    }
    if points.is_empty() {
        return Err(FitError::empty_point_cloud(format!(
            "{} contains no points",
            path.display()
        )));
    }
    debug!(path = %path.display(), points = points.len(), "point cloud read");
    Ok(DataPointSet::from_points(points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Element, ElementShape};
    use std::io::Write as _;

    fn strip_mesh() -> FeMesh {
        let mut mesh = FeMesh::new();
        mesh.node_count = 6;
        mesh.add_field(NodeField::coordinates(
            "coordinates",
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.25),
                Point3::new(2.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(1.0, 1.0, -0.25),
                Point3::new(2.0, 1.0, 0.0),
            ],
        ));
        mesh.elements
            .push(Element::new(ElementShape::Quad4, vec![0, 1, 3, 4]));
        mesh.elements
            .push(Element::new(ElementShape::Quad4, vec![1, 2, 4, 5]));
        mesh.elements
            .push(Element::new(ElementShape::Line2, vec![0, 1]));
        mesh
    }

    #[test]
    fn test_model_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.exfile");
        let mesh = strip_mesh();
        write_output_model(&path, &mesh, 0).unwrap();

        let restored = read_model(&path).unwrap();
        assert_eq!(restored.node_count, 6);
        assert_eq!(restored.element_count(), 3);
        assert_eq!(restored.fields.len(), 1);
        assert_eq!(restored.fields[0].name, "coordinates");
        for (a, b) in mesh.fields[0]
            .values
            .iter()
            .zip(restored.fields[0].values.iter())
        {
            assert!((a - b).norm() < 1e-15);
        }
        // Element domains grouped by dimension: lines before quads in the
        // file, same connectivity either way.
        assert_eq!(restored.elements_of_dimension(2).len(), 2);
        assert_eq!(restored.elements_of_dimension(1).len(), 1);
    }

    #[test]
    fn test_only_coordinate_field_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.exfile");
        let mut mesh = strip_mesh();
        let reference = crate::binding::snapshot_reference(&mut mesh, 0);
        assert_eq!(mesh.fields[reference].name, "reference_coordinates");
        write_output_model(&path, &mesh, 0).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("reference_coordinates"));
        let restored = read_model(&path).unwrap();
        assert_eq!(restored.fields.len(), 1);
    }

    #[test]
    fn test_output_model_path() {
        let path = output_model_path(Path::new("/tmp/run7"));
        assert_eq!(path, PathBuf::from("/tmp/run7-output-model.exfile"));
    }

    #[test]
    fn test_read_point_cloud_xyz() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.xyz");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "# scanner export").unwrap();
        writeln!(file, "0.0 0.0 1.0").unwrap();
        writeln!(file, "1.5 -2.0 0.25").unwrap();
        writeln!(file).unwrap();
        drop(file);

        let cloud = read_point_cloud_xyz(&path).unwrap();
        assert_eq!(cloud.point_count, 2);
        assert_eq!(cloud.active_count(), 2);
        let field = &cloud.fields[cloud.field_index("data_coordinates").unwrap()];
        assert_eq!(field.values[1], Point3::new(1.5, -2.0, 0.25));
    }

    #[test]
    fn test_read_empty_cloud_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.xyz");
        std::fs::write(&path, "# nothing here\n").unwrap();
        let err = read_point_cloud_xyz(&path).unwrap_err();
        assert_eq!(err.code().as_str(), "FIT-2003");
    }

    #[test]
    fn test_read_malformed_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.exfile");
        std::fs::write(&path, "Nodes 2\n1 0 0 0\n").unwrap();
        let err = read_model(&path).unwrap_err();
        assert_eq!(err.code().as_str(), "FIT-1003");
    }
}
