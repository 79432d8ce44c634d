//! Neighborhood filter over design elements.
//!
//! Weights are `w_ij = max(0, r - |c_i - c_j|)` with `r` the filter radius
//! times the longest element edge. Rows are normalized, so the filter is a
//! weighted average: it maps constants to themselves and never leaves the
//! `[min, max]` range of its input. The variant (sensitivity or density) is
//! chosen when the filter is built and checked on every application.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::config::FilterKind;
use crate::error::ConfigurationError;
use crate::mesh::Mesh;

#[derive(Debug, Clone)]
pub struct DensityFilter {
    kind: FilterKind,
    radius: f64,
    /// Per design element: (design index, weight), including itself
    neighbors: Vec<Vec<(usize, f64)>>,
    weight_sums: Vec<f64>,
}

impl DensityFilter {
    /// Build neighborhoods once per run. `radius_factor` multiplies the
    /// longest element edge of the mesh.
    pub fn new(mesh: &Mesh, radius_factor: f64, kind: FilterKind) -> Self {
        let radius = radius_factor * mesh.max_edge_length();
        let centroids: Vec<[f64; 3]> = mesh
            .design_elements()
            .iter()
            .map(|&e| mesh.elements()[e].centroid)
            .collect();

        // cell buckets of edge `radius`: neighbors lie in the 27 adjacent cells
        let cell_of = |c: &[f64; 3]| -> (i64, i64, i64) {
            (
                (c[0] / radius).floor() as i64,
                (c[1] / radius).floor() as i64,
                (c[2] / radius).floor() as i64,
            )
        };
        let mut buckets: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
        for (i, c) in centroids.iter().enumerate() {
            buckets.entry(cell_of(c)).or_default().push(i);
        }

        let neighbors: Vec<Vec<(usize, f64)>> = centroids
            .par_iter()
            .map(|c| {
                let (cx, cy, cz) = cell_of(c);
                let mut row = Vec::new();
                for dx in -1..=1 {
                    for dy in -1..=1 {
                        for dz in -1..=1 {
                            let Some(bucket) = buckets.get(&(cx + dx, cy + dy, cz + dz)) else {
                                continue;
                            };
                            for &j in bucket {
                                let o = &centroids[j];
                                let d = ((c[0] - o[0]).powi(2)
                                    + (c[1] - o[1]).powi(2)
                                    + (c[2] - o[2]).powi(2))
                                .sqrt();
                                let w = radius - d;
                                if w > 0.0 {
                                    row.push((j, w));
                                }
                            }
                        }
                    }
                }
                row.sort_unstable_by_key(|&(j, _)| j);
                row
            })
            .collect();
        let weight_sums = neighbors
            .iter()
            .map(|row| row.iter().map(|&(_, w)| w).sum())
            .collect();

        Self {
            kind,
            radius,
            neighbors,
            weight_sums,
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Absolute filter radius [m]
    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Number of design elements within the radius of design element `i`, itself included
    pub fn neighborhood_size(&self, i: usize) -> usize {
        self.neighbors[i].len()
    }

    fn check(&self, requested: FilterKind) -> Result<(), ConfigurationError> {
        if requested != self.kind {
            return Err(ConfigurationError::FilterVariantMismatch {
                built: self.kind.as_str(),
                requested: requested.as_str(),
            });
        }
        Ok(())
    }

    fn check_len(&self, input: &[f64]) -> Result<(), ConfigurationError> {
        if input.len() != self.neighbors.len() {
            return Err(ConfigurationError::Invalid(format!(
                "filter input has {} values for {} design elements",
                input.len(),
                self.neighbors.len()
            )));
        }
        Ok(())
    }

    /// y_i = Σ_j w_ij x_j / Σ_j w_ij
    fn average(&self, input: &[f64]) -> Vec<f64> {
        self.neighbors
            .par_iter()
            .zip(&self.weight_sums)
            .map(|(row, &sum)| row.iter().map(|&(j, w)| w * input[j]).sum::<f64>() / sum)
            .collect()
    }

    /// Apply the filter as the given variant.
    ///
    /// Fails if `kind` is not the variant the filter was built for.
    pub fn apply(&self, kind: FilterKind, input: &[f64]) -> Result<Vec<f64>, ConfigurationError> {
        self.check(kind)?;
        self.check_len(input)?;
        Ok(self.average(input))
    }

    /// Chain rule through a density filter: g_j = Σ_i (w_ij / W_i) g_i
    pub fn apply_transpose(
        &self,
        kind: FilterKind,
        gradient: &[f64],
    ) -> Result<Vec<f64>, ConfigurationError> {
        self.check(kind)?;
        self.check_len(gradient)?;
        let mut out = vec![0.0; gradient.len()];
        for ((row, &sum), &g) in self.neighbors.iter().zip(&self.weight_sums).zip(gradient) {
            for &(j, w) in row {
                out[j] += w / sum * g;
            }
        }
        Ok(out)
    }
}
