use serde::{Deserialize, Serialize};

use super::context::{FeatureMap, LabelIndices};
use crate::error::{Error, Result};

/// Per-feature weight rows; `rows[f][k]` scores labeling `k` of the clique
/// size feature `f` belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    rows: Vec<Vec<f64>>,
}

impl Weights {
    /// All-zero weights shaped by the feature map and label indices.
    pub fn zeros(map: &FeatureMap, indices: &LabelIndices) -> Self {
        let rows = (0..map.num_features())
            .map(|f| vec![0.0; indices.clique(map.clique_size(f)).len()])
            .collect();
        Self { rows }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    /// Same shape as `self`, filled with zeros.
    pub fn zeros_like(&self) -> Self {
        Self {
            rows: self.rows.iter().map(|r| vec![0.0; r.len()]).collect(),
        }
    }

    /// Reshapes the optimizer's flat vector into rows shaped like `self`.
    pub fn from_flat(&self, flat: &[f64]) -> Result<Self> {
        if flat.len() != self.domain_dimension() {
            return Err(Error::DimensionMismatch {
                what: "flat weight vector",
                expected: self.domain_dimension(),
                got: flat.len(),
            });
        }
        let mut rows = Vec::with_capacity(self.rows.len());
        let mut offset = 0;
        for r in &self.rows {
            rows.push(flat[offset..offset + r.len()].to_vec());
            offset += r.len();
        }
        Ok(Self { rows })
    }

    pub fn to_flat(&self) -> Vec<f64> {
        self.rows.iter().flatten().copied().collect()
    }

    /// Total number of weights.
    pub fn domain_dimension(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn num_features(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, feature: usize) -> Option<&[f64]> {
        self.rows.get(feature).map(Vec::as_slice)
    }

    pub fn row_mut(&mut self, feature: usize) -> Option<&mut [f64]> {
        self.rows.get_mut(feature).map(Vec::as_mut_slice)
    }

    pub fn get(&self, feature: usize, k: usize) -> f64 {
        self.rows[feature][k]
    }

    pub fn set(&mut self, feature: usize, k: usize, value: f64) {
        self.rows[feature][k] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f64]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// `self += other`, cell by cell.
    pub fn add(&mut self, other: &Weights) {
        for (a, b) in self.rows.iter_mut().zip(&other.rows) {
            for (x, y) in a.iter_mut().zip(b) {
                *x += y;
            }
        }
    }

    pub fn scale(&mut self, factor: f64) {
        self.rows.iter_mut().flatten().for_each(|x| *x *= factor);
    }
}
