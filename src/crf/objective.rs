use std::time::Instant;

use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;

use super::{
    clique_tree::CliqueTree,
    context::{FeatureMap, LabelIndices, ModelContext},
    potential::{CliquePotential, PotentialKind},
    prior::Prior,
    weights::Weights,
};
use crate::{
    dataset::{Dataset, Document},
    error::{Error, Result},
    math::log_normalize,
};

const SMALL_CONST: f64 = 1e-6;

/// What an optimizer needs: a value and a gradient over a flat domain.
pub trait Objective {
    fn domain_dimension(&self) -> usize;

    /// Fills `g` with the gradient at `w` and returns the value there.
    fn objective_and_gradients(&self, w: &[f64], g: &mut [f64]) -> Result<f64>;

    fn value(&self, w: &[f64]) -> Result<f64> {
        let mut g = vec![0.0; self.domain_dimension()];
        self.objective_and_gradients(w, &mut g)
    }

    fn gradient(&self, w: &[f64]) -> Result<Vec<f64>> {
        let mut g = vec![0.0; self.domain_dimension()];
        self.objective_and_gradients(w, &mut g)?;
        Ok(g)
    }
}

/// Negated conditional log-likelihood of a labeled dataset plus a prior.
///
/// The gradient is `E - Ehat`: expected feature counts under the calibrated
/// model minus the empirical counts of the gold labels.
pub struct CrfObjective<'a> {
    data: &'a Dataset,
    context: ModelContext,
    indices: LabelIndices,
    map: FeatureMap,
    prior: Prior,
    potential: PotentialKind,
    threads: usize,
    ehat: Weights,
}

impl<'a> CrfObjective<'a> {
    pub fn new(
        data: &'a Dataset,
        context: ModelContext,
        indices: LabelIndices,
        map: FeatureMap,
        prior: Prior,
        threads: usize,
    ) -> Result<Self> {
        let window = context.window();
        for doc in data.iter() {
            doc.check_window(window)?;
            map.check_document(doc)?;
            if let Some(&label) = doc.labels().iter().find(|&&l| l >= context.num_classes()) {
                return Err(Error::LabelOutOfRange {
                    label,
                    num_classes: context.num_classes(),
                });
            }
        }
        let mut objective = Self {
            data,
            context,
            indices,
            map,
            prior,
            potential: PotentialKind::Linear,
            threads: threads.max(1),
            ehat: Weights::default(),
        };
        let mut ehat = objective.zeros();
        for doc in data.iter() {
            objective.empirical_counts_for_doc(doc, &mut ehat);
        }
        objective.ehat = ehat;

        let (l, f, n, t) = (
            objective.context.num_classes(),
            objective.map.num_features(),
            data.len(),
            data.max_length(),
        );
        log::info!("set data (L: {l}, F: {f}, N: {n}, T: {t}, dimension: {})", objective.domain_dimension());
        Ok(objective)
    }

    pub fn with_potential(mut self, potential: PotentialKind) -> Self {
        self.potential = potential;
        self
    }

    pub fn context(&self) -> &ModelContext {
        &self.context
    }

    pub fn indices(&self) -> &LabelIndices {
        &self.indices
    }

    pub fn zeros(&self) -> Weights {
        Weights::zeros(&self.map, &self.indices)
    }

    pub fn empirical_counts(&self) -> &Weights {
        &self.ehat
    }

    /// Seeded starting point, uniform in `[1e-6, 1 + 1e-6)`.
    pub fn initial(&self, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..self.domain_dimension())
            .map(|_| rng.gen::<f64>() + SMALL_CONST)
            .collect()
    }

    pub fn to_weights(&self, x: &[f64]) -> Result<Weights> {
        self.zeros().from_flat(x)
    }

    pub fn clique_tree<P>(&self, doc: &Document, potential: &P) -> Result<CliqueTree>
    where
        P: CliquePotential + ?Sized,
    {
        CliqueTree::build(doc, &self.context, &self.indices, potential)
    }

    /// Adds the gold clique labelings of `doc` into `ehat`. Positions before
    /// the start count as background.
    pub fn empirical_counts_for_doc(&self, doc: &Document, ehat: &mut Weights) {
        let window = self.context.window();
        let mut history = vec![self.context.background(); window];
        for (i, &label) in doc.labels().iter().enumerate() {
            history.rotate_left(1);
            history[window - 1] = label;
            for (j, features) in doc.features()[i].iter().enumerate() {
                let clique = &history[window - 1 - j..];
                let Some(k) = self.indices.clique(j + 1).index_of(clique) else {
                    // only possible when the indices were built from other data
                    log::warn!("gold clique {clique:?} is not an admissible labeling");
                    continue;
                };
                for (n, &f) in features.iter().enumerate() {
                    let value = doc.values().map_or(1.0, |v| v[i][j][n]);
                    if let Some(row) = ehat.row_mut(f) {
                        row[k] += value;
                    }
                }
            }
        }
    }

    /// Adds the calibrated clique marginals of `doc` into `e`.
    pub fn expected_counts_for_doc(&self, tree: &CliqueTree, doc: &Document, e: &mut Weights) {
        for (i, position) in doc.features().iter().enumerate() {
            for (j, features) in position.iter().enumerate() {
                if features.is_empty() {
                    continue;
                }
                for (k, label) in self.indices.clique(j + 1).iter().enumerate() {
                    let p = tree.log_prob_window(i, label).exp();
                    for (n, &f) in features.iter().enumerate() {
                        let value = doc.values().map_or(1.0, |v| v[i][j][n]);
                        if let Some(cell) = e.row_mut(f).and_then(|row| row.get_mut(k)) {
                            *cell += p * value;
                        }
                    }
                }
            }
        }
    }

    /// `log P(gold labels)` under the calibrated tree.
    pub fn log_likelihood(tree: &CliqueTree, doc: &Document) -> f64 {
        tree.log_prob_start_pos() + tree.score_of_sequence(doc.labels())
    }

    /// Log-likelihood of one document under `weights`.
    pub fn value_for_doc(&self, weights: &Weights, index: usize) -> Result<f64> {
        let potential = self.potential.build(weights);
        let doc = self.data.get(index);
        let tree = self.clique_tree(doc, &potential)?;
        let ll = Self::log_likelihood(&tree, doc);
        if ll.is_nan() {
            return Err(Error::NumericUnderflow { doc: index });
        }
        Ok(ll)
    }

    /// Log-likelihood and expected counts over `docs`, sharded across workers
    /// that each own a private accumulator; shards are reduced in order.
    fn expectations(&self, weights: &Weights, docs: &[usize]) -> Result<(f64, Weights)> {
        let shard_len = docs.len().div_ceil(self.threads).max(1);
        let shards: Vec<Result<(f64, Weights)>> = docs
            .par_chunks(shard_len)
            .map(|shard| {
                let potential = self.potential.build(weights);
                let mut e = weights.zeros_like();
                let mut ll = 0.0;
                for &index in shard {
                    let doc = self.data.get(index);
                    let tree = self.clique_tree(doc, &potential)?;
                    let p = Self::log_likelihood(&tree, doc);
                    if p.is_nan() {
                        return Err(Error::NumericUnderflow { doc: index });
                    }
                    ll += p;
                    self.expected_counts_for_doc(&tree, doc, &mut e);
                }
                Ok((ll, e))
            })
            .collect();

        let mut total = 0.0;
        let mut e = weights.zeros_like();
        for shard in shards {
            let (ll, part) = shard?;
            total += ll;
            e.add(&part);
        }
        Ok((total, e))
    }

    /// Value and gradient over every document.
    pub fn calculate(&self, x: &[f64]) -> Result<(f64, Weights)> {
        let begin = Instant::now();
        let weights = self.to_weights(x)?;
        let all: Vec<usize> = (0..self.data.len()).collect();
        let (ll, mut gradient) = self.expectations(&weights, &all)?;
        for (f, ehat) in self.ehat.iter().enumerate() {
            if let Some(g) = gradient.row_mut(f) {
                g.iter_mut().zip(ehat).for_each(|(g, e)| *g -= e);
            }
        }
        let value = -ll + self.prior.apply(&weights, &mut gradient, 1.0);
        log::debug!(
            "objective: {value:.6} (docs: {}, threads: {}, took: {:?})",
            all.len(),
            self.threads,
            begin.elapsed()
        );
        Ok((value, gradient))
    }

    /// Value and gradient over a batch of document indices, with the
    /// empirical counts and the prior scaled by `batch / N`.
    pub fn calculate_stochastic(&self, x: &[f64], batch: &[usize]) -> Result<(f64, Weights)> {
        let weights = self.to_weights(x)?;
        let scale = batch.len() as f64 / self.data.len() as f64;
        let (ll, mut gradient) = self.expectations(&weights, batch)?;
        for (f, ehat) in self.ehat.iter().enumerate() {
            if let Some(g) = gradient.row_mut(f) {
                g.iter_mut().zip(ehat).for_each(|(g, e)| *g -= scale * e);
            }
        }
        let value = -ll + self.prior.apply(&weights, &mut gradient, scale);
        Ok((value, gradient))
    }

    /// Negated log-likelihood of a batch, without gradient or prior.
    pub fn value_at_batch(&self, x: &[f64], batch: &[usize]) -> Result<f64> {
        let weights = self.to_weights(x)?;
        let mut ll = 0.0;
        for &index in batch {
            ll += self.value_for_doc(&weights, index)?;
        }
        Ok(-ll)
    }

    /// Per position, `P(prev | curr)` as `[t][curr][prev]` and `P(next | curr)`
    /// as `[t][curr][next]`. Before the start only background is possible;
    /// after the end the rows stay zero.
    pub fn cond_probs(tree: &CliqueTree) -> (Vec<Vec<Vec<f64>>>, Vec<Vec<Vec<f64>>>) {
        let (len, nc) = (tree.len(), tree.num_classes());
        let mut prev_given_curr = vec![vec![vec![0.0; nc]; nc]; len];
        let mut next_given_curr = vec![vec![vec![0.0; nc]; nc]; len];
        for row in prev_given_curr[0].iter_mut() {
            row[tree.background()] = 1.0;
        }
        for i in 1..len {
            for l1 in 0..nc {
                for l2 in 0..nc {
                    let p = tree.log_prob_window(i, &[l1, l2]);
                    next_given_curr[i - 1][l1][l2] = p;
                    prev_given_curr[i][l2][l1] = p;
                }
            }
            for c in 0..nc {
                normalize_row(&mut next_given_curr[i - 1][c]);
                normalize_row(&mut prev_given_curr[i][c]);
            }
        }
        (prev_given_curr, next_given_curr)
    }
}

fn normalize_row(row: &mut [f64]) {
    log_normalize(row);
    row.iter_mut().for_each(|v| *v = v.exp());
}

impl Objective for CrfObjective<'_> {
    fn domain_dimension(&self) -> usize {
        self.ehat.domain_dimension()
    }

    fn objective_and_gradients(&self, w: &[f64], g: &mut [f64]) -> Result<f64> {
        if g.len() != self.domain_dimension() {
            return Err(Error::DimensionMismatch {
                what: "gradient buffer",
                expected: self.domain_dimension(),
                got: g.len(),
            });
        }
        let (value, gradient) = self.calculate(w)?;
        g.copy_from_slice(&gradient.to_flat());
        Ok(value)
    }
}
