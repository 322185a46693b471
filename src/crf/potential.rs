use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::weights::Weights;
use crate::error::{Error, Result};

/// Scores one labeling of one clique from its active features.
///
/// `k` indexes the label index of `clique_size`; `values`, when present, is
/// aligned with `features`. Calibration only ever talks to this trait, so
/// implementations are free in how they turn features into log-potentials.
pub trait CliquePotential: Send + Sync {
    fn potential(
        &self,
        clique_size: usize,
        k: usize,
        features: &[usize],
        values: Option<&[f64]>,
        position: usize,
    ) -> f64;
}

/// Dot product of per-feature, per-labeling weights with feature values
/// (1.0 for binary features).
#[derive(Debug, Clone, Copy)]
pub struct LinearPotential<'a> {
    weights: &'a Weights,
}

impl<'a> LinearPotential<'a> {
    pub fn new(weights: &'a Weights) -> Self {
        Self { weights }
    }
}

impl CliquePotential for LinearPotential<'_> {
    fn potential(
        &self,
        _clique_size: usize,
        k: usize,
        features: &[usize],
        values: Option<&[f64]>,
        _position: usize,
    ) -> f64 {
        let mut score = 0.0;
        for (m, &f) in features.iter().enumerate() {
            // features pruned from the trained index carry no weight
            let Some(w) = self.weights.row(f).and_then(|row| row.get(k)) else {
                log::trace!("skipping feature {f} without weight for labeling {k}");
                continue;
            };
            let value = values.map_or(1.0, |v| v[m]);
            score += w * value;
        }
        score
    }
}

impl<P: CliquePotential + ?Sized> CliquePotential for Box<P> {
    fn potential(
        &self,
        clique_size: usize,
        k: usize,
        features: &[usize],
        values: Option<&[f64]>,
        position: usize,
    ) -> f64 {
        (**self).potential(clique_size, k, features, values, position)
    }
}

/// Registered potential implementations, resolved once when a model is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PotentialKind {
    #[default]
    Linear,
}

impl PotentialKind {
    pub fn build<'a>(self, weights: &'a Weights) -> Box<dyn CliquePotential + 'a> {
        match self {
            PotentialKind::Linear => Box::new(LinearPotential::new(weights)),
        }
    }
}

impl FromStr for PotentialKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(PotentialKind::Linear),
            _ => Err(Error::UnknownPotential(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_sums_active_weights() {
        let w = Weights::from_rows(vec![vec![1.0, -1.0], vec![0.5, 2.0]]);
        let p = LinearPotential::new(&w);
        assert_eq!(p.potential(1, 0, &[0, 1], None, 0), 1.5);
        assert_eq!(p.potential(1, 1, &[0, 1], Some(&[2.0, 0.5]), 0), -1.0);
    }

    #[test]
    fn linear_skips_unknown_features() {
        let w = Weights::from_rows(vec![vec![1.0, -1.0]]);
        let p = LinearPotential::new(&w);
        assert_eq!(p.potential(1, 1, &[0, 7], None, 3), -1.0);
    }

    #[test]
    fn kind_parses() {
        assert_eq!("Linear".parse::<PotentialKind>().unwrap(), PotentialKind::Linear);
        assert!("neural".parse::<PotentialKind>().is_err());
        let w = Weights::from_rows(vec![vec![0.25]]);
        assert_eq!(PotentialKind::Linear.build(&w).potential(1, 0, &[0], None, 0), 0.25);
    }
}
