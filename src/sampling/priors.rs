//! Sequence models that carry no features of their own and only couple
//! labels, combined with the CRFs through `FactoredModel`.

use std::collections::HashMap;

use super::{
    alignment::Alignment,
    model::{SequenceListener, SequenceModel},
};
use crate::error::Result;

/// Rewards aligned positions of two concatenated sequences for agreeing on
/// a label, in proportion to the link confidence.
///
/// Positions `0..len_a` belong to the first sequence, `len_a..len_a + len_b`
/// to the second.
#[derive(Debug, Clone)]
pub struct AlignmentPrior {
    len_a: usize,
    len_b: usize,
    num_classes: usize,
    weight: f64,
    /// Per position: the linked positions (already offset) and their confidence.
    links: Vec<Vec<(usize, f64)>>,
}

impl AlignmentPrior {
    pub fn new(
        alignment: &Alignment,
        len_a: usize,
        len_b: usize,
        num_classes: usize,
        weight: f64,
    ) -> Result<Self> {
        alignment.check_bounds(len_a, len_b)?;
        let mut links = vec![Vec::new(); len_a + len_b];
        for link in alignment.links() {
            let b = len_a + link.b;
            links[link.a].push((b, link.confidence));
            links[b].push((link.a, link.confidence));
        }
        Ok(Self {
            len_a,
            len_b,
            num_classes,
            weight,
            links,
        })
    }
}

impl SequenceModel for AlignmentPrior {
    fn length(&self) -> usize {
        self.len_a + self.len_b
    }

    /// Links may reach across the whole concatenation.
    fn left_window(&self) -> usize {
        self.length()
    }

    fn right_window(&self) -> usize {
        self.length()
    }

    fn possible_values(&self, _position: usize) -> Vec<usize> {
        (0..self.num_classes).collect()
    }

    fn scores_of(&self, sequence: &[usize], position: usize) -> Vec<f64> {
        let mut scores = vec![0.0; self.num_classes];
        for &(other, confidence) in &self.links[position] {
            scores[sequence[other]] += self.weight * confidence;
        }
        scores
    }

    fn score_of(&self, sequence: &[usize]) -> f64 {
        // each link is stored at both ends; count it from the first sequence only
        (0..self.len_a)
            .flat_map(|a| self.links[a].iter().map(move |&(b, c)| (a, b, c)))
            .filter(|&(a, b, _)| sequence[a] == sequence[b])
            .map(|(_, _, c)| self.weight * c)
            .sum()
    }
}

impl SequenceListener for AlignmentPrior {
    fn set_initial_sequence(&mut self, _sequence: &[usize]) {}

    fn update_sequence_element(&mut self, _sequence: &[usize], _position: usize, _old_label: usize) {}
}

/// Rewards a token for carrying the same non-background label everywhere it
/// occurs in the sequence: every pair of occurrences that agree adds `weight`.
///
/// Counts of `(token, label)` are cached and kept current through the
/// listener calls, so `scores_of` is only valid for the sequence the prior
/// was last told about.
#[derive(Debug, Clone)]
pub struct LabelConsistencyPrior {
    tokens: Vec<usize>,
    background: usize,
    num_classes: usize,
    weight: f64,
    counts: HashMap<(usize, usize), usize>,
}

impl LabelConsistencyPrior {
    /// `tokens[i]` identifies the word at position `i`.
    pub fn new(tokens: Vec<usize>, background: usize, num_classes: usize, weight: f64) -> Self {
        Self {
            tokens,
            background,
            num_classes,
            weight,
            counts: HashMap::new(),
        }
    }

    /// Occurrences of `token` currently labeled `label`.
    pub fn count(&self, token: usize, label: usize) -> usize {
        self.counts.get(&(token, label)).copied().unwrap_or(0)
    }

    fn pairs(n: usize) -> f64 {
        (n * n.saturating_sub(1)) as f64 / 2.0
    }
}

impl SequenceModel for LabelConsistencyPrior {
    fn length(&self) -> usize {
        self.tokens.len()
    }

    fn left_window(&self) -> usize {
        self.tokens.len()
    }

    fn right_window(&self) -> usize {
        self.tokens.len()
    }

    fn possible_values(&self, _position: usize) -> Vec<usize> {
        (0..self.num_classes).collect()
    }

    fn scores_of(&self, sequence: &[usize], position: usize) -> Vec<f64> {
        let token = self.tokens[position];
        (0..self.num_classes)
            .map(|label| {
                if label == self.background {
                    return 0.0;
                }
                let others = self.count(token, label) as f64
                    - if sequence[position] == label { 1.0 } else { 0.0 };
                self.weight * others.max(0.0)
            })
            .collect()
    }

    fn score_of(&self, sequence: &[usize]) -> f64 {
        let mut counts: HashMap<(usize, usize), usize> = HashMap::new();
        for (&token, &label) in self.tokens.iter().zip(sequence) {
            if label != self.background {
                *counts.entry((token, label)).or_default() += 1;
            }
        }
        counts.into_values().map(|n| self.weight * Self::pairs(n)).sum()
    }
}

impl SequenceListener for LabelConsistencyPrior {
    fn set_initial_sequence(&mut self, sequence: &[usize]) {
        self.counts.clear();
        for (&token, &label) in self.tokens.iter().zip(sequence) {
            if label != self.background {
                *self.counts.entry((token, label)).or_default() += 1;
            }
        }
    }

    fn update_sequence_element(&mut self, sequence: &[usize], position: usize, old_label: usize) {
        let token = self.tokens[position];
        if old_label != self.background {
            if let Some(n) = self.counts.get_mut(&(token, old_label)) {
                *n = n.saturating_sub(1);
            }
        }
        let label = sequence[position];
        if label != self.background {
            *self.counts.entry((token, label)).or_default() += 1;
        }
    }
}
