use std::collections::HashMap;

use crate::{
    alphabet::Alphabet,
    dataset::{Dataset, Document},
    error::{Error, Result},
};

/// Immutable settings shared by everything that builds or queries a model:
/// the label alphabet, the background ("no entity") label and the clique
/// window size.
#[derive(Debug, Clone)]
pub struct ModelContext {
    labels: Alphabet,
    background: usize,
    window: usize,
}

impl ModelContext {
    pub fn new(labels: Alphabet, background_symbol: &str, window: usize) -> Result<Self> {
        let background = labels
            .id_of(background_symbol)
            .ok_or_else(|| Error::UnknownLabel(background_symbol.to_string()))?;
        if window == 0 {
            return Err(Error::DimensionMismatch {
                what: "window size",
                expected: 1,
                got: 0,
            });
        }
        Ok(Self {
            labels,
            background,
            window,
        })
    }

    pub fn labels(&self) -> &Alphabet {
        &self.labels
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn background(&self) -> usize {
        self.background
    }

    pub fn background_symbol(&self) -> &str {
        // the id was resolved from this alphabet in `new`
        self.labels.symbol(self.background).unwrap_or_default()
    }
}

/// The admissible joint labelings of one clique size.
#[derive(Debug, Clone, Default)]
pub struct CliqueLabels {
    labels: Vec<Vec<usize>>,
    ids: HashMap<Vec<usize>, usize>,
}

impl CliqueLabels {
    fn push(&mut self, label: Vec<usize>) -> usize {
        if let Some(&k) = self.ids.get(&label) {
            return k;
        }
        let k = self.labels.len();
        self.ids.insert(label.clone(), k);
        self.labels.push(label);
        k
    }

    pub fn get(&self, k: usize) -> &[usize] {
        &self.labels[k]
    }

    pub fn index_of(&self, label: &[usize]) -> Option<usize> {
        self.ids.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.labels.iter().map(Vec::as_slice)
    }
}

/// One [`CliqueLabels`] per clique size `1..=window`; entry `j` holds cliques of size `j + 1`.
#[derive(Debug, Clone)]
pub struct LabelIndices {
    by_size: Vec<CliqueLabels>,
}

impl LabelIndices {
    /// Every labeling of every clique size.
    pub fn full(num_classes: usize, window: usize) -> Self {
        let by_size = (1..=window)
            .map(|size| {
                let mut index = CliqueLabels::default();
                let mut label = vec![0; size];
                loop {
                    index.push(label.clone());
                    // odometer increment, last position fastest
                    let mut i = size;
                    loop {
                        if i == 0 {
                            return index;
                        }
                        i -= 1;
                        label[i] += 1;
                        if label[i] < num_classes {
                            break;
                        }
                        label[i] = 0;
                    }
                }
            })
            .collect();
        Self { by_size }
    }

    /// Only the labelings observed in gold data. Positions before the start
    /// of a document count as the background label.
    pub fn observed(context: &ModelContext, dataset: &Dataset) -> Self {
        let window = context.window();
        let mut by_size = vec![CliqueLabels::default(); window];
        for doc in dataset.iter() {
            let mut history = vec![context.background(); window];
            for &label in doc.labels() {
                history.rotate_left(1);
                history[window - 1] = label;
                for (j, index) in by_size.iter_mut().enumerate() {
                    index.push(history[window - 1 - j..].to_vec());
                }
            }
        }
        Self { by_size }
    }

    pub fn window(&self) -> usize {
        self.by_size.len()
    }

    /// Labelings of cliques of `size` consecutive positions.
    pub fn clique(&self, size: usize) -> &CliqueLabels {
        &self.by_size[size - 1]
    }
}

/// Clique size of every feature id; a feature's weight row has one entry per
/// labeling of that clique size.
#[derive(Debug, Clone, Default)]
pub struct FeatureMap {
    clique_sizes: Vec<usize>,
}

impl FeatureMap {
    pub fn new(clique_sizes: Vec<usize>) -> Self {
        Self { clique_sizes }
    }

    /// Assigns each feature the clique size under which it first fires.
    pub fn from_dataset(dataset: &Dataset, num_features: usize) -> Self {
        let mut clique_sizes = vec![0; num_features];
        for doc in dataset.iter() {
            for position in doc.features() {
                for (j, ids) in position.iter().enumerate() {
                    for &f in ids {
                        if f < num_features && clique_sizes[f] == 0 {
                            clique_sizes[f] = j + 1;
                        }
                    }
                }
            }
        }
        // never-seen features default to node features
        for size in clique_sizes.iter_mut().filter(|s| **s == 0) {
            *size = 1;
        }
        Self { clique_sizes }
    }

    pub fn clique_size(&self, feature: usize) -> usize {
        self.clique_sizes[feature]
    }

    pub fn num_features(&self) -> usize {
        self.clique_sizes.len()
    }

    /// Every feature of `doc` must be known and fire only in the clique slot
    /// its weight row was sized for.
    pub fn check_document(&self, doc: &Document) -> Result<()> {
        for position in doc.features() {
            for (j, ids) in position.iter().enumerate() {
                for &f in ids {
                    let Some(&size) = self.clique_sizes.get(f) else {
                        return Err(Error::DimensionMismatch {
                            what: "feature id",
                            expected: self.clique_sizes.len(),
                            got: f,
                        });
                    };
                    if size != j + 1 {
                        return Err(Error::DimensionMismatch {
                            what: "feature clique size",
                            expected: size,
                            got: j + 1,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ModelContext {
        let labels: Alphabet = ["O", "PER", "LOC"].into_iter().collect();
        ModelContext::new(labels, "O", 2).unwrap()
    }

    #[test]
    fn context_resolves_background() {
        let ctx = context();
        assert_eq!(ctx.background(), 0);
        assert_eq!(ctx.background_symbol(), "O");
        assert_eq!(ctx.num_classes(), 3);
        let labels: Alphabet = ["O"].into_iter().collect();
        assert!(matches!(
            ModelContext::new(labels, "X", 2),
            Err(Error::UnknownLabel(_))
        ));
    }

    #[test]
    fn full_indices_enumerate_products() {
        let indices = LabelIndices::full(3, 2);
        assert_eq!(indices.clique(1).len(), 3);
        assert_eq!(indices.clique(2).len(), 9);
        assert_eq!(indices.clique(2).get(5), &[1, 2]);
        assert_eq!(indices.clique(2).index_of(&[2, 0]), Some(6));
    }

    #[test]
    fn observed_indices_pad_with_background() {
        let ctx = context();
        let doc = Document::new(vec![vec![vec![], vec![]]; 2], None, vec![1, 2]).unwrap();
        let ds = Dataset::from(vec![doc]);
        let indices = LabelIndices::observed(&ctx, &ds);
        assert_eq!(indices.clique(1).len(), 2);
        assert_eq!(indices.clique(2).get(0), &[0, 1]);
        assert_eq!(indices.clique(2).get(1), &[1, 2]);
        assert_eq!(indices.clique(2).index_of(&[2, 1]), None);
    }

    #[test]
    fn feature_map_follows_first_clique() {
        let doc = Document::new(vec![vec![vec![0, 2], vec![1]]], None, vec![0]).unwrap();
        let map = FeatureMap::from_dataset(&Dataset::from(vec![doc]), 4);
        assert_eq!(map.clique_size(0), 1);
        assert_eq!(map.clique_size(1), 2);
        assert_eq!(map.clique_size(3), 1);
    }

    #[test]
    fn feature_map_rejects_a_feature_in_two_cliques() {
        let doc = Document::unlabeled(vec![vec![vec![0], vec![]], vec![vec![], vec![0]]], None).unwrap();
        let map = FeatureMap::from_dataset(&Dataset::from(vec![doc.clone()]), 1);
        assert!(matches!(
            map.check_document(&doc),
            Err(Error::DimensionMismatch { what: "feature clique size", expected: 1, got: 2 })
        ));
        assert!(matches!(
            FeatureMap::new(vec![]).check_document(&doc),
            Err(Error::DimensionMismatch { what: "feature id", .. })
        ));
    }
}
