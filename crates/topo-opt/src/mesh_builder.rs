//! Builds the design-domain mesh from a parsed input deck.
//!
//! Reads `*NODE`, `*ELEMENT`, `*ELSET` and `*NSET` cards. Element sets name
//! the fixed regions; every element outside them is a design element. Node
//! sets carry the supports and load-application points.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use topo_io::{Card, Deck};

use crate::error::MeshTopologyError;
use crate::mesh::{ElementDef, Mesh, Node, Region};

/// Element set names that mark fixed regions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSets {
    pub solid: String,
    pub void: String,
    /// Name an external solver knows the design elements by
    pub design: String,
}

impl Default for RegionSets {
    fn default() -> Self {
        Self {
            solid: "SOLID".to_string(),
            void: "VOID".to_string(),
            design: "DESIGN".to_string(),
        }
    }
}

/// Builds a mesh from the given deck
pub struct MeshBuilder {
    nodes: Vec<Node>,
    elements: Vec<(i32, String, Vec<i32>)>,
    element_sets: HashMap<String, BTreeSet<i32>>,
    node_sets: BTreeMap<String, Vec<i32>>,
    errors: Vec<String>,
}

impl MeshBuilder {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            elements: Vec::new(),
            element_sets: HashMap::new(),
            node_sets: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// Parse `path` (following `*INCLUDE`s) and build the mesh
    pub fn build_from_file(
        path: impl AsRef<Path>,
        regions: &RegionSets,
    ) -> Result<Mesh, MeshTopologyError> {
        let path = path.as_ref();
        let deck = Deck::parse_file_with_includes(path)
            .map_err(|err| MeshTopologyError::Input(format!("{}: {err}", path.display())))?;
        Self::build_from_deck(&deck, regions)
    }

    pub fn build_from_deck(deck: &Deck, regions: &RegionSets) -> Result<Mesh, MeshTopologyError> {
        let mut builder = Self::new();
        for card in &deck.cards {
            match card.keyword.to_ascii_uppercase().as_str() {
                "NODE" => builder.process_node_card(card),
                "ELEMENT" => builder.process_element_card(card),
                "ELSET" => builder.process_elset_card(card),
                "NSET" => builder.process_nset_card(card),
                _ => {}
            }
        }

        if !builder.errors.is_empty() {
            return Err(MeshTopologyError::Input(format!(
                "mesh building encountered {} errors:\n{}",
                builder.errors.len(),
                builder.errors.join("\n")
            )));
        }
        builder.finish(regions)
    }

    fn finish(self, regions: &RegionSets) -> Result<Mesh, MeshTopologyError> {
        let empty = BTreeSet::new();
        let solid = self
            .element_sets
            .get(&regions.solid.to_ascii_uppercase())
            .unwrap_or(&empty);
        let void = self
            .element_sets
            .get(&regions.void.to_ascii_uppercase())
            .unwrap_or(&empty);

        let mut defs = Vec::with_capacity(self.elements.len());
        for (id, element_type, nodes) in self.elements {
            let region = if solid.contains(&id) {
                Region::Solid
            } else if void.contains(&id) {
                Region::Void
            } else {
                Region::Design
            };
            defs.push(ElementDef {
                id,
                element_type,
                nodes,
                region,
            });
        }
        Mesh::from_parts(self.nodes, defs, self.node_sets)
    }

    fn process_node_card(&mut self, card: &Card) {
        let nset = card.parameter("NSET").map(str::to_ascii_uppercase);
        for (offset, fields) in card.data_fields() {
            if fields.is_empty() {
                continue;
            }
            if fields.len() < 4 {
                self.errors.push(format!(
                    "line {}: node line needs an id and 3 coordinates",
                    card.line_start + offset + 1
                ));
                continue;
            }
            let id = fields[0].parse::<i32>();
            let coords: Result<Vec<f64>, _> = fields[1..4].iter().map(|f| f.parse::<f64>()).collect();
            match (id, coords) {
                (Ok(id), Ok(c)) => {
                    self.nodes.push(Node::new(id, c[0], c[1], c[2]));
                    if let Some(set) = &nset {
                        self.node_sets.entry(set.clone()).or_default().push(id);
                    }
                }
                _ => self.errors.push(format!(
                    "line {}: invalid node line '{}'",
                    card.line_start + offset + 1,
                    fields.join(", ")
                )),
            }
        }
    }

    fn process_element_card(&mut self, card: &Card) {
        let Some(element_type) = card.parameter("TYPE") else {
            self.errors.push(format!(
                "line {}: *ELEMENT card without TYPE",
                card.line_start
            ));
            return;
        };
        let element_type = element_type.to_ascii_uppercase();
        let elset = card.parameter("ELSET").map(str::to_ascii_uppercase);

        // 8 node ids may be continued on the next line after a trailing comma
        let mut pending: Vec<&str> = Vec::new();
        let flush = |fields: &mut Vec<&str>, line: usize, this: &mut Self| {
            if fields.is_empty() {
                return;
            }
            let parsed: Result<Vec<i32>, _> = fields.iter().map(|f| f.parse::<i32>()).collect();
            match parsed {
                Ok(ids) => {
                    let id = ids[0];
                    this.elements
                        .push((id, element_type.clone(), ids[1..].to_vec()));
                    if let Some(set) = &elset {
                        this.element_sets.entry(set.clone()).or_default().insert(id);
                    }
                }
                Err(_) => this.errors.push(format!(
                    "line {line}: invalid element line '{}'",
                    fields.join(", ")
                )),
            }
            fields.clear();
        };

        let mut last_line = card.line_start;
        for (offset, fields) in card.data_fields() {
            last_line = card.line_start + offset + 1;
            let continues = card.data_lines[offset].trim_end().ends_with(',');
            pending.extend(fields);
            if !continues || pending.len() >= 9 {
                flush(&mut pending, last_line, self);
            }
        }
        flush(&mut pending, last_line, self);
    }

    fn process_elset_card(&mut self, card: &Card) {
        let Some(name) = card.parameter("ELSET") else {
            self.errors
                .push(format!("line {}: *ELSET card without ELSET", card.line_start));
            return;
        };
        let name = name.to_ascii_uppercase();
        match self.collect_ids(card, |b, set| {
            b.element_sets
                .get(set)
                .map(|ids| ids.iter().copied().collect())
        }) {
            Ok(ids) => self.element_sets.entry(name).or_default().extend(ids),
            Err(message) => self.errors.push(message),
        }
    }

    fn process_nset_card(&mut self, card: &Card) {
        let Some(name) = card.parameter("NSET") else {
            self.errors
                .push(format!("line {}: *NSET card without NSET", card.line_start));
            return;
        };
        let name = name.to_ascii_uppercase();
        match self.collect_ids(card, |b, set| b.node_sets.get(set).cloned()) {
            Ok(ids) => self.node_sets.entry(name).or_default().extend(ids),
            Err(message) => self.errors.push(message),
        }
    }

    /// Member ids of a set card. Handles `GENERATE` (start, end, step) and
    /// references to previously defined sets by name.
    fn collect_ids(
        &self,
        card: &Card,
        lookup: impl Fn(&Self, &str) -> Option<Vec<i32>>,
    ) -> Result<Vec<i32>, String> {
        let generate = card.has_flag("GENERATE");
        let mut ids = Vec::new();
        for (offset, fields) in card.data_fields() {
            let line = card.line_start + offset + 1;
            if generate {
                let nums: Result<Vec<i32>, _> = fields.iter().map(|f| f.parse::<i32>()).collect();
                match nums.as_deref() {
                    Ok([start, end]) => ids.extend(*start..=*end),
                    Ok([start, end, step]) if *step > 0 => {
                        ids.extend((*start..=*end).step_by(*step as usize))
                    }
                    _ => return Err(format!("line {line}: invalid GENERATE range")),
                }
                continue;
            }
            for field in fields {
                match field.parse::<i32>() {
                    Ok(id) => ids.push(id),
                    Err(_) => match lookup(self, &field.to_ascii_uppercase()) {
                        Some(members) => ids.extend(members),
                        None => return Err(format!("line {line}: unknown set '{field}'")),
                    },
                }
            }
        }
        Ok(ids)
    }
}
