use super::{
    context::{LabelIndices, ModelContext},
    factor_table::FactorTable,
    potential::CliquePotential,
};
use crate::{
    dataset::Document,
    error::{Error, Result},
    math::{argmax, log_sum},
    sampling::model::{SequenceListener, SequenceModel},
};

/// One calibrated factor table per position of a document.
///
/// After [`CliqueTree::build`] every table holds the (unnormalized) joint
/// marginal of the `window` labels ending at its position, all sharing the
/// same partition function `z`. Positions before the start of the document
/// are pinned to the background label.
#[derive(Debug, Clone)]
pub struct CliqueTree {
    tables: Vec<FactorTable>,
    z: f64,
    window: usize,
    num_classes: usize,
    background: usize,
}

impl CliqueTree {
    /// Scores every admissible clique labeling with `potential`, merges the
    /// clique sizes of each position into one table, and calibrates.
    pub fn build<P>(
        doc: &Document,
        context: &ModelContext,
        indices: &LabelIndices,
        potential: &P,
    ) -> Result<Self>
    where
        P: CliquePotential + ?Sized,
    {
        if doc.is_empty() {
            return Err(Error::EmptyDocument);
        }
        let window = context.window();
        doc.check_window(window)?;
        let tables = (0..doc.len())
            .map(|pos| factor_table(doc, pos, context, indices, potential))
            .collect();
        Ok(Self::calibrate(tables, context.background()))
    }

    /// Calibrates pre-built local tables, all of the same window.
    pub fn from_tables(mut tables: Vec<FactorTable>, background: usize) -> Result<Self> {
        let Some(first) = tables.first() else {
            return Err(Error::EmptyDocument);
        };
        let (window, num_classes) = (first.window(), first.num_classes());
        if let Some(t) = tables.iter().find(|t| t.window() != window) {
            return Err(Error::DimensionMismatch {
                what: "factor table window",
                expected: window,
                got: t.window(),
            });
        }
        if let Some(t) = tables.iter().find(|t| t.num_classes() != num_classes) {
            return Err(Error::DimensionMismatch {
                what: "factor table classes",
                expected: num_classes,
                got: t.num_classes(),
            });
        }
        if background >= num_classes {
            return Err(Error::LabelOutOfRange {
                label: background,
                num_classes,
            });
        }
        for (pos, table) in tables.iter_mut().enumerate() {
            mask_before_start(table, pos, background);
        }
        Ok(Self::calibrate(tables, background))
    }

    fn calibrate(mut tables: Vec<FactorTable>, background: usize) -> Self {
        let len = tables.len();
        let window = tables[0].window();
        let num_classes = tables[0].num_classes();

        let mut messages = Vec::with_capacity(len.saturating_sub(1));
        for i in 1..len {
            let message = tables[i - 1].sum_out_front();
            tables[i].multiply_in_front(&message);
            messages.push(message);
        }
        for i in (0..len.saturating_sub(1)).rev() {
            let mut summed = tables[i + 1].sum_out_end();
            summed.divide_by(&messages[i]);
            tables[i].multiply_in_end(&summed);
        }
        let z = tables[0].total_mass();
        log::trace!("calibrated {len} tables, z = {z}");
        Self {
            tables,
            z,
            window,
            num_classes,
            background,
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn background(&self) -> usize {
        self.background
    }

    /// Log partition function.
    pub fn total_mass(&self) -> f64 {
        self.z
    }

    pub fn table(&self, position: usize) -> &FactorTable {
        &self.tables[position]
    }

    pub fn has_nan(&self) -> bool {
        self.z.is_nan() || self.tables.iter().any(FactorTable::has_nan)
    }

    /// Always 0: the labels before the document are fixed to background.
    pub fn log_prob_start_pos(&self) -> f64 {
        0.0
    }

    pub fn log_prob(&self, position: usize, label: usize) -> f64 {
        self.tables[position].unnormalized_log_prob_end(&[label]) - self.z
    }

    pub fn prob(&self, position: usize, label: usize) -> f64 {
        self.log_prob(position, label).exp()
    }

    /// Marginal distribution at one position.
    pub fn probs(&self, position: usize) -> Vec<f64> {
        (0..self.num_classes).map(|l| self.prob(position, l)).collect()
    }

    /// `[position][label]` marginal log probabilities.
    pub fn log_prob_table(&self) -> Vec<Vec<f64>> {
        (0..self.len())
            .map(|i| (0..self.num_classes).map(|l| self.log_prob(i, l)).collect())
            .collect()
    }

    /// Log probability of `labels` occupying the positions ending at `position`.
    pub fn log_prob_window(&self, position: usize, labels: &[usize]) -> f64 {
        let window = self.window;
        match labels.len() {
            n if n < window => self.tables[position].unnormalized_log_prob_end(labels) - self.z,
            n if n == window => self.tables[position].unnormalized_log_prob(labels) - self.z,
            n => {
                // joint of the first window, then chain conditionals
                let start = position + window - n;
                let mut p = self.tables[start].unnormalized_log_prob(&labels[..window]) - self.z;
                for (offset, i) in (window..n).enumerate() {
                    let prev = &labels[i + 1 - window..i];
                    p += self.cond_log_prob_given_previous(start + offset + 1, labels[i], prev);
                }
                p
            }
        }
    }

    /// `log P(label at position | the labels right before it)`.
    ///
    /// Longer histories are cut to the last `window - 1` labels; shorter ones
    /// marginalize out the unspecified positions.
    pub fn cond_log_prob_given_previous(&self, position: usize, label: usize, prev: &[usize]) -> f64 {
        let given = self.window - 1;
        let table = &self.tables[position];
        match prev.len() {
            n if n == given => table.conditional_log_prob_given_previous(prev, label),
            n if n > given => table.conditional_log_prob_given_previous(&prev[n - given..], label),
            n => {
                let mut reduced = table.sum_out_front();
                for _ in n + 1..given {
                    reduced = reduced.sum_out_front();
                }
                reduced.conditional_log_prob_given_previous(prev, label)
            }
        }
    }

    /// `log P(label at position | the labels right after it)`.
    pub fn cond_log_prob_given_next(&self, position: usize, label: usize, next: &[usize]) -> f64 {
        let given = self.window - 1;
        match next.len() {
            n if n == given => {
                self.tables[position + n].conditional_log_prob_given_next(next, label)
            }
            n if n > given => {
                self.tables[position + given].conditional_log_prob_given_next(&next[..given], label)
            }
            n => {
                let mut reduced = self.tables[position + n].sum_out_front();
                for _ in n + 1..given {
                    reduced = reduced.sum_out_front();
                }
                reduced.conditional_log_prob_given_next(next, label)
            }
        }
    }

    /// The `window - 1` labels before `position`, padded with background.
    fn history(&self, position: usize, label_at: impl Fn(usize) -> usize) -> Vec<usize> {
        let given = self.window - 1;
        (0..given)
            .map(|i| {
                (position + i)
                    .checked_sub(given)
                    .map_or(self.background, &label_at)
            })
            .collect()
    }

    /// `log P(sequence)`.
    pub fn score_of_sequence(&self, sequence: &[usize]) -> f64 {
        let mut given = vec![self.background; self.window - 1];
        let mut log_prob = 0.0;
        for (i, &label) in sequence.iter().enumerate().take(self.len()) {
            log_prob += self.cond_log_prob_given_previous(i, label, &given);
            if self.window > 1 {
                given.rotate_left(1);
                given[self.window - 2] = label;
            }
        }
        log_prob
    }

    /// Full conditional of every label at `position`, up to a constant.
    ///
    /// Sums the log conditionals of every factor whose window contains
    /// `position`: its own, and those of the next `window - 1` positions.
    pub fn scores_of_position(&self, sequence: &[usize], position: usize) -> Vec<f64> {
        let mut window = self.history(position, |p| sequence[p]);
        window.push(0);
        let last = window.len() - 1;
        let table = &self.tables[position];
        let mut scores: Vec<f64> = (0..self.num_classes)
            .map(|label| {
                window[last] = label;
                table.unnormalized_log_prob(&window)
            })
            .collect();

        for next in position + 1..(position + self.window).min(self.len()) {
            let next_table = &self.tables[next];
            for (label, score) in scores.iter_mut().enumerate() {
                let prev = self.history(next, |p| if p == position { label } else { sequence[p] });
                *score += next_table.conditional_log_prob_given_previous(&prev, sequence[next]);
            }
        }
        scores
    }

    /// Most probable label sequence, by Viterbi over the calibrated conditionals.
    pub fn best_sequence(&self) -> Vec<usize> {
        let nc = self.num_classes;
        let given = self.window - 1;
        // states are the last `window - 1` labels, mixed-radix encoded
        let num_states = nc.pow(given as u32);
        let decode = |mut s: usize| {
            let mut labels = vec![0; given];
            for slot in labels.iter_mut().rev() {
                *slot = s % nc;
                s /= nc;
            }
            labels
        };
        let start = (0..given).fold(0, |s, _| s * nc + self.background);

        let mut delta = vec![f64::NEG_INFINITY; num_states];
        delta[start] = 0.0;
        let mut back: Vec<Vec<(usize, usize)>> = Vec::with_capacity(self.len());
        for table in &self.tables {
            let mut next = vec![f64::NEG_INFINITY; num_states];
            let mut pointers = vec![(0, 0); num_states];
            for (s, &d) in delta.iter().enumerate() {
                if d == f64::NEG_INFINITY {
                    continue;
                }
                let mut first = decode(s);
                first.push(0);
                let row_start = table.index_of(&first);
                let row = &table.values()[row_start..row_start + nc];
                let z = log_sum(row);
                if z == f64::NEG_INFINITY {
                    continue;
                }
                for (label, &v) in row.iter().enumerate() {
                    let ns = (s * nc + label) % num_states;
                    let score = d + v - z;
                    if score > next[ns] {
                        next[ns] = score;
                        pointers[ns] = (s, label);
                    }
                }
            }
            delta = next;
            back.push(pointers);
        }

        let mut state = argmax(&delta);
        let mut labels = vec![0; self.len()];
        for (i, pointers) in back.iter().enumerate().rev() {
            let (prev, label) = pointers[state];
            labels[i] = label;
            state = prev;
        }
        labels
    }
}

/// Local potentials of every clique size ending at `pos`, merged into one
/// table of the full window.
fn factor_table<P>(
    doc: &Document,
    pos: usize,
    context: &ModelContext,
    indices: &LabelIndices,
    potential: &P,
) -> FactorTable
where
    P: CliquePotential + ?Sized,
{
    let features = &doc.features()[pos];
    let values = doc.values().map(|v| &v[pos]);
    let mut merged: Option<FactorTable> = None;
    for j in 0..context.window() {
        let size = j + 1;
        let mut table = FactorTable::new(context.num_classes(), size);
        for (k, label) in indices.clique(size).iter().enumerate() {
            let v = potential.potential(size, k, &features[j], values.map(|v| v[j].as_slice()), pos);
            table.set_value(label, v);
        }
        if let Some(smaller) = &merged {
            table.multiply_in_end(smaller);
        }
        merged = Some(table);
    }
    let mut table = merged.unwrap_or_else(|| FactorTable::new(context.num_classes(), 0));
    mask_before_start(&mut table, pos, context.background());
    table
}

/// Drops the cells of an early table that put a non-background label before
/// the start of the document.
fn mask_before_start(table: &mut FactorTable, pos: usize, background: usize) {
    let window = table.window();
    if pos + 1 >= window {
        return;
    }
    let before_start = window - 1 - pos;
    for i in 0..table.size() {
        if table.to_labels(i)[..before_start].iter().any(|&l| l != background) {
            table.set_value_at(i, f64::NEG_INFINITY);
        }
    }
}

impl SequenceModel for CliqueTree {
    fn length(&self) -> usize {
        self.len()
    }

    fn left_window(&self) -> usize {
        self.window - 1
    }

    fn right_window(&self) -> usize {
        self.window - 1
    }

    fn possible_values(&self, _position: usize) -> Vec<usize> {
        (0..self.num_classes).collect()
    }

    fn scores_of(&self, sequence: &[usize], position: usize) -> Vec<f64> {
        self.scores_of_position(sequence, position)
    }

    fn score_of(&self, sequence: &[usize]) -> f64 {
        self.score_of_sequence(sequence)
    }
}

/// Calibrated trees hold no per-sequence state.
impl SequenceListener for CliqueTree {
    fn set_initial_sequence(&mut self, _sequence: &[usize]) {}

    fn update_sequence_element(&mut self, _sequence: &[usize], _position: usize, _old_label: usize) {}
}
