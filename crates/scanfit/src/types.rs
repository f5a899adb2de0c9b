//! Core finite-element mesh and data cloud types.

use hashbrown::{HashMap, HashSet};
use nalgebra::Point3;

/// Shape of a parametric element.
///
/// Local coordinates ξ live in the unit interval/square/cube `[0,1]^d`.
/// Node ordering is tensor-product: local index `i + 2j (+ 4k)` with `i`
/// varying along ξ1, `j` along ξ2, `k` along ξ3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementShape {
    /// 1-D linear element with 2 nodes.
    Line2,
    /// 2-D bilinear element with 4 nodes.
    Quad4,
    /// 3-D trilinear element with 8 nodes.
    Hex8,
}

impl ElementShape {
    /// Parametric dimension of the element.
    #[inline]
    pub fn dimension(&self) -> usize {
        match self {
            ElementShape::Line2 => 1,
            ElementShape::Quad4 => 2,
            ElementShape::Hex8 => 3,
        }
    }

    /// Number of nodes the element connects.
    #[inline]
    pub fn node_count(&self) -> usize {
        match self {
            ElementShape::Line2 => 2,
            ElementShape::Quad4 => 4,
            ElementShape::Hex8 => 8,
        }
    }

    /// Local edges of a 2-D element as (node pair, along-axis, fixed-axis,
    /// fixed-value) tuples. Empty for other dimensions.
    pub fn local_edges(&self) -> &'static [LocalEdge] {
        match self {
            ElementShape::Quad4 => &QUAD4_EDGES,
            _ => &[],
        }
    }
}

/// A local edge of a 2-D element.
#[derive(Debug, Clone, Copy)]
pub struct LocalEdge {
    /// Local node indices of the edge endpoints, in along-axis order.
    pub nodes: [usize; 2],
    /// The ξ axis the edge runs along.
    pub along_axis: usize,
    /// The ξ axis held fixed on the edge.
    pub fixed_axis: usize,
    /// The fixed axis value (0.0 or 1.0).
    pub fixed_value: f64,
}

const QUAD4_EDGES: [LocalEdge; 4] = [
    LocalEdge {
        nodes: [0, 1],
        along_axis: 0,
        fixed_axis: 1,
        fixed_value: 0.0,
    },
    LocalEdge {
        nodes: [2, 3],
        along_axis: 0,
        fixed_axis: 1,
        fixed_value: 1.0,
    },
    LocalEdge {
        nodes: [0, 2],
        along_axis: 1,
        fixed_axis: 0,
        fixed_value: 0.0,
    },
    LocalEdge {
        nodes: [1, 3],
        along_axis: 1,
        fixed_axis: 0,
        fixed_value: 1.0,
    },
];

/// A mesh element: a shape plus global node indices.
#[derive(Debug, Clone)]
pub struct Element {
    pub shape: ElementShape,
    /// Global node indices, `shape.node_count()` of them.
    pub nodes: Vec<u32>,
}

impl Element {
    /// Create an element, checking the node count matches the shape.
    pub fn new(shape: ElementShape, nodes: Vec<u32>) -> Self {
        debug_assert_eq!(nodes.len(), shape.node_count());
        Self { shape, nodes }
    }

    /// Parametric dimension of the element.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.shape.dimension()
    }
}

/// A named node-based field with up to 3 components per node.
///
/// Values are stored padded to 3 components; `components` records how many
/// are meaningful (for validation and serialization).
#[derive(Debug, Clone)]
pub struct NodeField {
    pub name: String,
    /// Number of meaningful components, 1 to 3.
    pub components: usize,
    /// Whether this field is coordinate-typed.
    pub is_coordinate: bool,
    /// Per-node values, padded to 3 components.
    pub values: Vec<Point3<f64>>,
}

impl NodeField {
    /// Create a 3-component coordinate field.
    pub fn coordinates(name: impl Into<String>, values: Vec<Point3<f64>>) -> Self {
        Self {
            name: name.into(),
            components: 3,
            is_coordinate: true,
            values,
        }
    }

    /// Axis-aligned bounding range of the field values.
    /// Returns `(min, max)` or `None` if there are no values.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = *self.values.first()?;
        let mut min = first;
        let mut max = first;
        for p in &self.values[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }
        Some((min, max))
    }
}

/// A parametric finite-element mesh of dimension 1 to 3.
///
/// Elements of several dimensions may coexist (e.g. a surface mesh with its
/// bounding lines); the mesh dimension is the highest present. Node data
/// lives in named [`NodeField`]s; geometry is carried by whichever field the
/// binding step selects as the coordinate field.
#[derive(Debug, Clone, Default)]
pub struct FeMesh {
    /// Number of nodes all fields are defined over.
    pub node_count: usize,
    /// Elements of any dimension.
    pub elements: Vec<Element>,
    /// Named node fields.
    pub fields: Vec<NodeField>,
}

impl FeMesh {
    /// Create an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Check if the mesh has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Highest element dimension present, or 0 for an empty mesh.
    pub fn dimension(&self) -> usize {
        self.elements
            .iter()
            .map(|e| e.dimension())
            .max()
            .unwrap_or(0)
    }

    /// Indices of elements with the given dimension.
    pub fn elements_of_dimension(&self, dimension: usize) -> Vec<u32> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.dimension() == dimension)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Find a field index by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Add a field, returning its index.
    pub fn add_field(&mut self, field: NodeField) -> usize {
        debug_assert_eq!(field.values.len(), self.node_count);
        self.fields.push(field);
        self.fields.len() - 1
    }

    /// Unique edges of the given 2-D elements with their adjacent element
    /// uses. Pass `None` to take every 2-D element in the mesh.
    pub fn surface_edges(&self, restrict_to: Option<&HashSet<u32>>) -> Vec<SurfaceEdge> {
        let mut by_key: HashMap<[u32; 2], SurfaceEdge> = HashMap::new();
        let mut order: Vec<[u32; 2]> = Vec::new();
        for (index, element) in self.elements.iter().enumerate() {
            if element.dimension() != 2 {
                continue;
            }
            if let Some(subset) = restrict_to {
                if !subset.contains(&(index as u32)) {
                    continue;
                }
            }
            for (local_index, edge) in element.shape.local_edges().iter().enumerate() {
                let a = element.nodes[edge.nodes[0]];
                let b = element.nodes[edge.nodes[1]];
                let key = if a <= b { [a, b] } else { [b, a] };
                let entry = by_key.entry(key).or_insert_with(|| {
                    order.push(key);
                    SurfaceEdge {
                        nodes: [a, b],
                        adjacent: Vec::with_capacity(2),
                    }
                });
                entry.adjacent.push(EdgeUse {
                    element: index as u32,
                    local_edge: local_index as u8,
                });
            }
        }
        order
            .into_iter()
            .filter_map(|key| by_key.remove(&key))
            .collect()
    }
}

/// One use of an edge by an adjacent 2-D element.
#[derive(Debug, Clone, Copy)]
pub struct EdgeUse {
    /// Element index within the mesh.
    pub element: u32,
    /// Index into the element shape's `local_edges()`.
    pub local_edge: u8,
}

/// A unique mesh edge with the elements that share it.
#[derive(Debug, Clone)]
pub struct SurfaceEdge {
    /// Global node indices of the endpoints.
    pub nodes: [u32; 2],
    /// Elements sharing this edge: one on a boundary, two in the interior.
    pub adjacent: Vec<EdgeUse>,
}

/// An (element, local parametric coordinate) pair identifying a point on the
/// mesh. Only the first `dimension` components of `xi` are meaningful.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshLocation {
    pub element: u32,
    pub xi: [f64; 3],
}

/// A named subset of mesh elements restricting projection and fit scope.
#[derive(Debug, Clone)]
pub struct SurfaceSubregion {
    pub name: String,
    /// Element indices included in the subregion.
    pub elements: HashSet<u32>,
}

impl SurfaceSubregion {
    /// Create a subregion from element indices.
    pub fn new(name: impl Into<String>, elements: impl IntoIterator<Item = u32>) -> Self {
        Self {
            name: name.into(),
            elements: elements.into_iter().collect(),
        }
    }

    /// Global node indices of the subregion's elements.
    pub fn nodes(&self, mesh: &FeMesh) -> HashSet<u32> {
        let mut nodes = HashSet::new();
        for &index in &self.elements {
            if let Some(element) = mesh.elements.get(index as usize) {
                nodes.extend(element.nodes.iter().copied());
            }
        }
        nodes
    }

    /// The subregion's bounding 1-D edges (every edge of its elements).
    pub fn bounding_edges(&self, mesh: &FeMesh) -> Vec<SurfaceEdge> {
        mesh.surface_edges(Some(&self.elements))
    }
}

/// An ordered collection of scattered data points with per-point activity.
///
/// Points carry named fields just like mesh nodes; the binding step selects
/// the coordinate field. The `active` flags define the current fitting
/// subset: filters deactivate points, and clearing projections reactivates
/// the full set.
#[derive(Debug, Clone, Default)]
pub struct DataPointSet {
    /// Number of points all fields are defined over.
    pub point_count: usize,
    /// Named per-point fields.
    pub fields: Vec<NodeField>,
    /// Per-point membership in the active fitting subset.
    pub active: Vec<bool>,
}

impl DataPointSet {
    /// Create a point set from bare positions, with every point active.
    ///
    /// The positions become a coordinate field named `data_coordinates`.
    pub fn from_points(points: Vec<Point3<f64>>) -> Self {
        let count = points.len();
        Self {
            point_count: count,
            fields: vec![NodeField::coordinates("data_coordinates", points)],
            active: vec![true; count],
        }
    }

    /// Check if the cloud has no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.point_count == 0
    }

    /// Number of currently active points.
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }

    /// Reactivate every point.
    pub fn activate_all(&mut self) {
        self.active.iter_mut().for_each(|a| *a = true);
    }

    /// Find a field index by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_quad_strip() -> FeMesh {
        // Two quads sharing the edge between nodes 1 and 4:
        //   3 -- 4 -- 5
        //   |    |    |
        //   0 -- 1 -- 2
        let mut mesh = FeMesh::new();
        mesh.node_count = 6;
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(2.0, 1.0, 0.0),
        ];
        mesh.add_field(NodeField::coordinates("coordinates", positions));
        mesh.elements
            .push(Element::new(ElementShape::Quad4, vec![0, 1, 3, 4]));
        mesh.elements
            .push(Element::new(ElementShape::Quad4, vec![1, 2, 4, 5]));
        mesh
    }

    #[test]
    fn test_dimension_and_counts() {
        let mesh = two_quad_strip();
        assert_eq!(mesh.dimension(), 2);
        assert_eq!(mesh.element_count(), 2);
        assert_eq!(mesh.elements_of_dimension(2).len(), 2);
        assert!(mesh.elements_of_dimension(1).is_empty());
    }

    #[test]
    fn test_surface_edges_adjacency() {
        let mesh = two_quad_strip();
        let edges = mesh.surface_edges(None);
        // 7 unique edges: 6 boundary + 1 shared.
        assert_eq!(edges.len(), 7);
        let shared: Vec<_> = edges.iter().filter(|e| e.adjacent.len() == 2).collect();
        assert_eq!(shared.len(), 1);
        let mut nodes = shared[0].nodes;
        nodes.sort_unstable();
        assert_eq!(nodes, [1, 4]);
        assert_eq!(edges.iter().filter(|e| e.adjacent.len() == 1).count(), 6);
    }

    #[test]
    fn test_subregion_nodes_and_edges() {
        let mesh = two_quad_strip();
        let subregion = SurfaceSubregion::new("patch", [0u32]);
        let nodes = subregion.nodes(&mesh);
        assert_eq!(nodes.len(), 4);
        assert!(nodes.contains(&0) && nodes.contains(&4));
        let edges = subregion.bounding_edges(&mesh);
        assert_eq!(edges.len(), 4);
        assert!(edges.iter().all(|e| e.adjacent.len() == 1));
    }

    #[test]
    fn test_field_bounds() {
        let mesh = two_quad_strip();
        let (min, max) = mesh.fields[0].bounds().unwrap();
        assert_eq!(min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(max, Point3::new(2.0, 1.0, 0.0));
    }

    #[test]
    fn test_data_point_set_activity() {
        let mut cloud = DataPointSet::from_points(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ]);
        assert_eq!(cloud.active_count(), 3);
        cloud.active[1] = false;
        assert_eq!(cloud.active_count(), 2);
        cloud.activate_all();
        assert_eq!(cloud.active_count(), 3);
    }
}
