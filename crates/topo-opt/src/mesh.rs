//! Mesh data structures for the design domain.
//!
//! Nodes and elements are stored in input order. Element connectivity is kept
//! both as the node ids from the input deck and as indices into `nodes`, so
//! assembly never has to look ids up. Geometry that the optimizer needs every
//! iteration (element volume, centroid) is computed once here.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::elements::C3D8;
use crate::error::MeshTopologyError;

/// A node in the finite element mesh
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node ID (1-based indexing from input file)
    pub id: i32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Node {
    pub fn new(id: i32, x: f64, y: f64, z: f64) -> Self {
        Self { id, x, y, z }
    }

    pub fn coords(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Role of an element in the optimization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// Density is a design variable
    Design,
    /// Fixed at full density (mounting plates, load pads)
    Solid,
    /// Fixed at the minimum density (keep-out zones)
    Void,
}

impl Region {
    pub fn is_design(self) -> bool {
        self == Region::Design
    }
}

/// Element connectivity as read from the input, before geometry is checked
#[derive(Debug, Clone, PartialEq)]
pub struct ElementDef {
    pub id: i32,
    pub element_type: String,
    pub nodes: Vec<i32>,
    pub region: Region,
}

impl ElementDef {
    pub fn new(id: i32, nodes: Vec<i32>, region: Region) -> Self {
        Self {
            id,
            element_type: "C3D8".to_string(),
            nodes,
            region,
        }
    }
}

/// A validated hexahedral element
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub id: i32,
    /// Node IDs from the input deck
    pub node_ids: [i32; 8],
    /// Positions of the nodes in [`Mesh::nodes`]
    pub node_indices: [usize; 8],
    pub region: Region,
    pub volume: f64,
    pub centroid: [f64; 3],
}

/// Complete, validated mesh of the design domain
#[derive(Debug, Clone)]
pub struct Mesh {
    nodes: Vec<Node>,
    elements: Vec<Element>,
    node_lookup: HashMap<i32, usize>,
    node_sets: BTreeMap<String, Vec<usize>>,
    design_elements: Vec<usize>,
    max_edge_length: f64,
}

impl Mesh {
    /// Build a mesh and run every topology check.
    ///
    /// Node sets are given as node ids and stored as node indices.
    pub fn from_parts(
        nodes: Vec<Node>,
        elements: Vec<ElementDef>,
        node_sets: BTreeMap<String, Vec<i32>>,
    ) -> Result<Self, MeshTopologyError> {
        if nodes.is_empty() {
            return Err(MeshTopologyError::NoNodes);
        }
        if elements.is_empty() {
            return Err(MeshTopologyError::NoElements);
        }

        let mut node_lookup = HashMap::with_capacity(nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            if node_lookup.insert(node.id, index).is_some() {
                return Err(MeshTopologyError::DuplicateId {
                    kind: "node",
                    id: node.id,
                });
            }
        }

        let mut seen_elements = HashMap::with_capacity(elements.len());
        let mut built = Vec::with_capacity(elements.len());
        let mut max_edge_length: f64 = 0.0;
        for def in elements {
            if seen_elements.insert(def.id, ()).is_some() {
                return Err(MeshTopologyError::DuplicateId {
                    kind: "element",
                    id: def.id,
                });
            }
            let (element, edge) = Self::build_element(&nodes, &node_lookup, def)?;
            max_edge_length = max_edge_length.max(edge);
            built.push(element);
        }

        let mut sets = BTreeMap::new();
        for (name, ids) in node_sets {
            let mut indices = Vec::with_capacity(ids.len());
            for id in ids {
                let index = node_lookup.get(&id).copied().ok_or_else(|| {
                    MeshTopologyError::UnknownSetMember {
                        set: name.clone(),
                        kind: "node",
                        id,
                    }
                })?;
                indices.push(index);
            }
            indices.sort_unstable();
            indices.dedup();
            sets.insert(name.to_ascii_uppercase(), indices);
        }

        let design_elements: Vec<usize> = built
            .iter()
            .enumerate()
            .filter(|(_, e)| e.region.is_design())
            .map(|(i, _)| i)
            .collect();

        let mesh = Self {
            nodes,
            elements: built,
            node_lookup,
            node_sets: sets,
            design_elements,
            max_edge_length,
        };
        mesh.check_orphan_nodes()?;
        mesh.check_connectivity()?;
        if mesh.design_elements.is_empty() {
            return Err(MeshTopologyError::NoDesignElements);
        }
        Ok(mesh)
    }

    fn build_element(
        nodes: &[Node],
        node_lookup: &HashMap<i32, usize>,
        def: ElementDef,
    ) -> Result<(Element, f64), MeshTopologyError> {
        let element_type = def.element_type.to_ascii_uppercase();
        if !matches!(element_type.as_str(), "C3D8" | "C3D8R" | "C3D8I") {
            return Err(MeshTopologyError::UnsupportedElementType {
                element: def.id,
                element_type: def.element_type,
            });
        }
        let node_ids: [i32; 8] =
            def.nodes
                .as_slice()
                .try_into()
                .map_err(|_| MeshTopologyError::WrongNodeCount {
                    element: def.id,
                    actual: def.nodes.len(),
                    expected: 8,
                })?;

        let mut node_indices = [0usize; 8];
        let mut coords = [[0.0; 3]; 8];
        for (k, &node_id) in node_ids.iter().enumerate() {
            let index = *node_lookup
                .get(&node_id)
                .ok_or(MeshTopologyError::MissingNode {
                    element: def.id,
                    node: node_id,
                })?;
            node_indices[k] = index;
            coords[k] = nodes[index].coords();
        }

        let hex = C3D8::new(coords);
        let det_j = hex.min_jacobian_determinant();
        if !(det_j > 0.0) {
            return Err(MeshTopologyError::NonPositiveJacobian {
                element: def.id,
                det_j,
            });
        }
        let volume = hex
            .volume()
            .map_err(|_| MeshTopologyError::NonPositiveJacobian {
                element: def.id,
                det_j,
            })?;

        Ok((
            Element {
                id: def.id,
                node_ids,
                node_indices,
                region: def.region,
                volume,
                centroid: hex.centroid(),
            },
            hex.max_edge_length(),
        ))
    }

    fn check_orphan_nodes(&self) -> Result<(), MeshTopologyError> {
        let mut used = vec![false; self.nodes.len()];
        for element in &self.elements {
            for &n in &element.node_indices {
                used[n] = true;
            }
        }
        let orphans: Vec<i32> = used
            .iter()
            .zip(&self.nodes)
            .filter(|(used, _)| !**used)
            .map(|(_, node)| node.id)
            .collect();
        match orphans.first() {
            Some(&first) => Err(MeshTopologyError::OrphanNodes(orphans.len(), first)),
            None => Ok(()),
        }
    }

    /// Elements sharing a node belong to the same group; one group is required.
    fn check_connectivity(&self) -> Result<(), MeshTopologyError> {
        let mut parent: Vec<usize> = (0..self.elements.len()).collect();
        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        let mut owner: Vec<Option<usize>> = vec![None; self.nodes.len()];
        for (e, element) in self.elements.iter().enumerate() {
            for &n in &element.node_indices {
                match owner[n] {
                    Some(other) => {
                        let (a, b) = (find(&mut parent, e), find(&mut parent, other));
                        if a != b {
                            parent[a] = b;
                        }
                    }
                    None => owner[n] = Some(e),
                }
            }
        }

        let groups = (0..self.elements.len())
            .filter(|&i| find(&mut parent, i) == i)
            .count();
        if groups > 1 {
            return Err(MeshTopologyError::Disconnected(groups));
        }
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// 3 translational DOFs per node
    pub fn num_dofs(&self) -> usize {
        self.nodes.len() * 3
    }

    pub fn node_index(&self, id: i32) -> Option<usize> {
        self.node_lookup.get(&id).copied()
    }

    /// Node indices of a named node set (names are case-insensitive)
    pub fn node_set(&self, name: &str) -> Option<&[usize]> {
        self.node_sets
            .get(&name.to_ascii_uppercase())
            .map(Vec::as_slice)
    }

    pub fn node_set_names(&self) -> impl Iterator<Item = &str> {
        self.node_sets.keys().map(String::as_str)
    }

    /// Indices of the elements whose density is optimized
    pub fn design_elements(&self) -> &[usize] {
        &self.design_elements
    }

    pub fn max_edge_length(&self) -> f64 {
        self.max_edge_length
    }

    pub fn design_volume(&self) -> f64 {
        self.design_elements
            .iter()
            .map(|&e| self.elements[e].volume)
            .sum()
    }

    pub fn element_coords(&self, element: usize) -> [[f64; 3]; 8] {
        let mut coords = [[0.0; 3]; 8];
        for (k, &n) in self.elements[element].node_indices.iter().enumerate() {
            coords[k] = self.nodes[n].coords();
        }
        coords
    }

    pub fn element_geometry(&self, element: usize) -> C3D8 {
        C3D8::new(self.element_coords(element))
    }

    /// Global DOF indices of an element, node by node
    pub fn element_dofs(&self, element: usize) -> [usize; 24] {
        let mut dofs = [0usize; 24];
        for (k, &n) in self.elements[element].node_indices.iter().enumerate() {
            for d in 0..3 {
                dofs[k * 3 + d] = n * 3 + d;
            }
        }
        dofs
    }

    pub fn statistics(&self) -> MeshStatistics {
        let mut region_counts = BTreeMap::new();
        for element in &self.elements {
            *region_counts
                .entry(format!("{:?}", element.region))
                .or_insert(0) += 1;
        }
        MeshStatistics {
            num_nodes: self.nodes.len(),
            num_elements: self.elements.len(),
            num_dofs: self.num_dofs(),
            design_volume: self.design_volume(),
            max_edge_length: self.max_edge_length,
            region_counts,
        }
    }
}

/// Mesh statistics for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshStatistics {
    pub num_nodes: usize,
    pub num_elements: usize,
    pub num_dofs: usize,
    pub design_volume: f64,
    pub max_edge_length: f64,
    pub region_counts: BTreeMap<String, usize>,
}

impl MeshStatistics {
    /// Format as a human-readable string
    pub fn format(&self) -> String {
        let mut lines = vec![
            format!("Nodes: {}", self.num_nodes),
            format!("Elements: {}", self.num_elements),
            format!("DOFs: {}", self.num_dofs),
            format!("Design volume: {:.6e} m³", self.design_volume),
            format!("Max edge length: {:.6e} m", self.max_edge_length),
        ];
        if !self.region_counts.is_empty() {
            lines.push("Regions:".to_string());
            for (region, count) in &self.region_counts {
                lines.push(format!("  {region}: {count}"));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Regular `nx × ny × nz` brick grid of edge `h`, all elements in `Design`.
    /// Node set `FIXED_X0` holds the x = 0 face and `TIP` the nodes of the
    /// x = nx·h edge at y = 0 (bottom edge of the free end).
    pub fn grid(nx: usize, ny: usize, nz: usize, h: f64) -> Mesh {
        grid_with_regions(nx, ny, nz, h, |_, _, _| Region::Design)
    }

    pub fn grid_with_regions(
        nx: usize,
        ny: usize,
        nz: usize,
        h: f64,
        region: impl Fn(usize, usize, usize) -> Region,
    ) -> Mesh {
        let node_id = |i: usize, j: usize, k: usize| (1 + i + j * (nx + 1) + k * (nx + 1) * (ny + 1)) as i32;
        let mut nodes = Vec::new();
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    nodes.push(Node::new(
                        node_id(i, j, k),
                        i as f64 * h,
                        j as f64 * h,
                        k as f64 * h,
                    ));
                }
            }
        }
        let mut elements = Vec::new();
        let mut next = 1;
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    elements.push(ElementDef::new(
                        next,
                        vec![
                            node_id(i, j, k),
                            node_id(i + 1, j, k),
                            node_id(i + 1, j + 1, k),
                            node_id(i, j + 1, k),
                            node_id(i, j, k + 1),
                            node_id(i + 1, j, k + 1),
                            node_id(i + 1, j + 1, k + 1),
                            node_id(i, j + 1, k + 1),
                        ],
                        region(i, j, k),
                    ));
                    next += 1;
                }
            }
        }
        let mut sets = BTreeMap::new();
        let fixed: Vec<i32> = (0..=nz)
            .flat_map(|k| (0..=ny).map(move |j| (j, k)))
            .map(|(j, k)| node_id(0, j, k))
            .collect();
        let tip: Vec<i32> = (0..=nz).map(|k| node_id(nx, 0, k)).collect();
        sets.insert("FIXED_X0".to_string(), fixed);
        sets.insert("TIP".to_string(), tip);
        Mesh::from_parts(nodes, elements, sets).expect("grid fixture is valid")
    }
}
