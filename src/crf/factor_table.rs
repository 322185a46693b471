use std::fmt;

use crate::{
    error::{Error, Result},
    math::{log_add, log_normalize, log_sum, log_sum_stride},
};

/// Dense log-potential table over every joint assignment of a clique.
///
/// A clique spans `window` consecutive positions, each taking one of
/// `num_classes` labels. Cells are stored in mixed-radix order with the most
/// recent (rightmost) position varying fastest:
///
/// ```text
/// num_classes = 4, window = 2
///   [2, 3] -> 2 * 4 + 3 = 11
///   index % num_classes -> label at the current position
///   index / num_classes -> labels at the previous positions
/// ```
///
/// Cells never assigned hold `-inf` (zero probability).
#[derive(Debug, Clone, PartialEq)]
pub struct FactorTable {
    num_classes: usize,
    window: usize,
    table: Vec<f64>,
}

impl FactorTable {
    pub fn new(num_classes: usize, window: usize) -> Self {
        assert!(num_classes > 0, "factor table needs at least one class");
        Self {
            num_classes,
            window,
            table: vec![f64::NEG_INFINITY; pow(num_classes, window)],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of cells, `num_classes ^ window`.
    pub fn size(&self) -> usize {
        self.table.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.table
    }

    pub fn has_nan(&self) -> bool {
        self.table.iter().any(|v| v.is_nan())
    }

    /// Mixed-radix code of a label run of any length `<= window`.
    fn encode(&self, labels: &[usize]) -> usize {
        labels.iter().fold(0, |index, &label| {
            assert!(
                label < self.num_classes,
                "label {label} out of range (num classes: {})",
                self.num_classes
            );
            index * self.num_classes + label
        })
    }

    /// Cell index of a full clique label. Panics unless `labels` has exactly
    /// `window` entries, each below `num_classes`.
    pub fn index_of(&self, labels: &[usize]) -> usize {
        assert_eq!(
            labels.len(),
            self.window,
            "clique label {labels:?} does not fit window {}",
            self.window
        );
        self.encode(labels)
    }

    /// Checked form of [`FactorTable::index_of`].
    pub fn try_index_of(&self, labels: &[usize]) -> Result<usize> {
        if labels.len() != self.window {
            return Err(Error::InvalidCliqueLabel {
                expected_len: self.window,
                got: labels.len(),
            });
        }
        if let Some(&label) = labels.iter().find(|&&l| l >= self.num_classes) {
            return Err(Error::LabelOutOfRange {
                label,
                num_classes: self.num_classes,
            });
        }
        Ok(self.encode(labels))
    }

    /// Inverse of [`FactorTable::index_of`].
    pub fn to_labels(&self, mut index: usize) -> Vec<usize> {
        let mut labels = vec![0; self.window];
        for slot in labels.iter_mut().rev() {
            *slot = index % self.num_classes;
            index /= self.num_classes;
        }
        labels
    }

    pub fn value_at(&self, index: usize) -> f64 {
        self.table[index]
    }

    pub fn set_value_at(&mut self, index: usize, value: f64) {
        self.table[index] = value;
    }

    pub fn get_value(&self, labels: &[usize]) -> f64 {
        self.table[self.index_of(labels)]
    }

    pub fn set_value(&mut self, labels: &[usize], value: f64) {
        let i = self.index_of(labels);
        self.table[i] = value;
    }

    pub fn try_get_value(&self, labels: &[usize]) -> Result<f64> {
        Ok(self.table[self.try_index_of(labels)?])
    }

    pub fn try_set_value(&mut self, labels: &[usize], value: f64) -> Result<()> {
        let i = self.try_index_of(labels)?;
        self.table[i] = value;
        Ok(())
    }

    pub fn increment_value(&mut self, labels: &[usize], value: f64) {
        let i = self.index_of(labels);
        self.table[i] += value;
    }

    pub fn log_increment_value(&mut self, labels: &[usize], value: f64) {
        let i = self.index_of(labels);
        self.table[i] = log_add(self.table[i], value);
    }

    /// Partition function of this table alone.
    pub fn total_mass(&self) -> f64 {
        log_sum(&self.table)
    }

    pub fn unnormalized_log_prob(&self, labels: &[usize]) -> f64 {
        self.get_value(labels)
    }

    pub fn log_prob(&self, labels: &[usize]) -> f64 {
        self.unnormalized_log_prob(labels) - self.total_mass()
    }

    pub fn prob(&self, labels: &[usize]) -> f64 {
        self.log_prob(labels).exp()
    }

    /// Cells starting with `prefix` form one contiguous run; returns its bounds.
    fn front_run(&self, prefix: &[usize]) -> (usize, usize) {
        assert!(prefix.len() <= self.window, "prefix longer than window");
        let run = pow(self.num_classes, self.window - prefix.len());
        let start = self.encode(prefix) * run;
        (start, start + run)
    }

    /// Log mass of all cells whose leading labels are `prefix`.
    pub fn unnormalized_log_prob_front(&self, prefix: &[usize]) -> f64 {
        let (start, end) = self.front_run(prefix);
        log_sum(&self.table[start..end])
    }

    pub fn log_prob_front(&self, prefix: &[usize]) -> f64 {
        self.unnormalized_log_prob_front(prefix) - self.total_mass()
    }

    /// Log mass of all cells whose trailing labels are `suffix`.
    pub fn unnormalized_log_prob_end(&self, suffix: &[usize]) -> f64 {
        assert!(suffix.len() <= self.window, "suffix longer than window");
        let stride = pow(self.num_classes, suffix.len());
        log_sum_stride(&self.table, self.encode(suffix), stride)
    }

    pub fn log_prob_end(&self, suffix: &[usize]) -> f64 {
        self.unnormalized_log_prob_end(suffix) - self.total_mass()
    }

    fn check_given(&self, op: &str, given: &[usize]) {
        assert!(
            given.len() + 1 == self.window,
            "{op} requires given one less than clique size ({}) but was {given:?}",
            self.window
        );
    }

    /// `log P(of | given)` where `given` fills every position but the last.
    pub fn conditional_log_prob_given_previous(&self, given: &[usize], of: usize) -> f64 {
        self.check_given("conditional_log_prob_given_previous", given);
        let (start, end) = self.front_run(given);
        self.table[start + of] - log_sum(&self.table[start..end])
    }

    /// Log-normalized distribution over the last position given the others.
    pub fn conditional_log_probs_given_previous(&self, given: &[usize]) -> Vec<f64> {
        self.check_given("conditional_log_probs_given_previous", given);
        let (start, end) = self.front_run(given);
        let mut result = self.table[start..end].to_vec();
        log_normalize(&mut result);
        result
    }

    /// `log P(of | given)` where `given` fills every position but the first.
    pub fn conditional_log_prob_given_next(&self, given: &[usize], of: usize) -> f64 {
        self.check_given("conditional_log_prob_given_next", given);
        let suffix = self.encode(given);
        let stride = pow(self.num_classes, self.window - 1);
        let z = log_sum_stride(&self.table, suffix, stride);
        self.table[of * stride + suffix] - z
    }

    /// `log P(of | given)` where `given` is the first position and `of` the rest.
    pub fn conditional_log_prob_given_first(&self, given: usize, of: &[usize]) -> f64 {
        self.unnormalized_conditional_log_prob_given_first(given, of)
            - self.unnormalized_log_prob_front(&[given])
    }

    pub fn unnormalized_conditional_log_prob_given_first(&self, given: usize, of: &[usize]) -> f64 {
        assert!(
            of.len() + 1 == self.window,
            "unnormalized_conditional_log_prob_given_first requires of one less than clique size ({}) but was {of:?}",
            self.window
        );
        let stride = pow(self.num_classes, of.len());
        self.table[given * stride + self.encode(of)]
    }

    /// Adds a table whose window is a prefix of this one into every matching cell.
    pub fn multiply_in_front(&mut self, other: &FactorTable) {
        self.check_compatible(other);
        let divisor = pow(self.num_classes, self.window - other.window);
        for (i, v) in self.table.iter_mut().enumerate() {
            *v += other.table[i / divisor];
        }
    }

    /// Adds a table whose window is a suffix of this one into every matching cell.
    pub fn multiply_in_end(&mut self, other: &FactorTable) {
        self.check_compatible(other);
        let divisor = other.size();
        for (i, v) in self.table.iter_mut().enumerate() {
            *v += other.table[i % divisor];
        }
    }

    fn check_compatible(&self, other: &FactorTable) {
        assert_eq!(self.num_classes, other.num_classes, "class count mismatch");
        assert!(
            other.window <= self.window,
            "cannot multiply in a window of {} into a window of {}",
            other.window,
            self.window
        );
    }

    /// Marginalizes away the last position.
    pub fn sum_out_end(&self) -> FactorTable {
        assert!(self.window > 0, "nothing to sum out");
        let mut ft = FactorTable::new(self.num_classes, self.window - 1);
        for (i, chunk) in self.table.chunks(self.num_classes).enumerate() {
            ft.table[i] = log_sum(chunk);
        }
        ft
    }

    /// Marginalizes away the first position.
    pub fn sum_out_front(&self) -> FactorTable {
        assert!(self.window > 0, "nothing to sum out");
        let mut ft = FactorTable::new(self.num_classes, self.window - 1);
        let stride = ft.size();
        for i in 0..stride {
            ft.table[i] = log_sum_stride(&self.table, i, stride);
        }
        ft
    }

    /// Pointwise log-space subtraction. Cells that are `-inf` in both tables
    /// stay `-inf` instead of turning into NaN.
    pub fn divide_by(&mut self, other: &FactorTable) {
        assert_eq!(self.size(), other.size(), "divide_by needs equal table sizes");
        for (v, &o) in self.table.iter_mut().zip(&other.table) {
            if *v != f64::NEG_INFINITY || o != f64::NEG_INFINITY {
                *v -= o;
            }
        }
    }
}

fn pow(base: usize, exp: usize) -> usize {
    base.pow(exp as u32)
}

/// One `labels: probability` line per cell.
impl fmt::Display for FactorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let z = self.total_mass();
        writeln!(f, "{{")?;
        for (i, v) in self.table.iter().enumerate() {
            writeln!(f, "{:?}: {}", self.to_labels(i), (v - z).exp())?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(num_classes: usize, window: usize) -> FactorTable {
        let mut ft = FactorTable::new(num_classes, window);
        for i in 0..ft.size() {
            ft.set_value_at(i, ((i * 7 % 5) as f64) * 0.3 - 0.4);
        }
        ft
    }

    #[test]
    fn new_table_is_empty_mass() {
        let ft = FactorTable::new(3, 2);
        assert_eq!(ft.size(), 9);
        assert!(ft.values().iter().all(|v| *v == f64::NEG_INFINITY));
        assert_eq!(ft.total_mass(), f64::NEG_INFINITY);
    }

    #[test]
    fn index_round_trip() {
        assert_eq!(FactorTable::new(4, 2).index_of(&[2, 3]), 11);
        assert_eq!(FactorTable::new(4, 2).index_of(&[0, 2]), 2);
        let ft = FactorTable::new(4, 3);
        assert_eq!(ft.index_of(&[1, 2, 3]), 27);
        for i in 0..ft.size() {
            assert_eq!(ft.index_of(&ft.to_labels(i)), i);
        }
    }

    #[test]
    #[should_panic(expected = "does not fit window")]
    fn wrong_tuple_length_panics() {
        FactorTable::new(2, 2).get_value(&[1]);
    }

    #[test]
    fn checked_access_reports_errors() {
        let mut ft = FactorTable::new(2, 2);
        assert!(matches!(
            ft.try_set_value(&[0], 1.0),
            Err(Error::InvalidCliqueLabel { expected_len: 2, got: 1 })
        ));
        assert!(matches!(
            ft.try_get_value(&[0, 5]),
            Err(Error::LabelOutOfRange { label: 5, num_classes: 2 })
        ));
        ft.try_set_value(&[1, 0], 0.5).unwrap();
        assert_eq!(ft.try_get_value(&[1, 0]).unwrap(), 0.5);
    }

    #[test]
    fn repeated_sum_out_front_is_end_marginal() {
        let ft = filled(3, 3);
        let reduced = ft.sum_out_front().sum_out_front();
        assert_eq!(reduced.window(), 1);
        for label in 0..3 {
            let direct = ft.unnormalized_log_prob_end(&[label]);
            assert!((reduced.get_value(&[label]) - direct).abs() < 1e-12);
        }
    }

    #[test]
    fn repeated_sum_out_end_is_front_marginal() {
        let ft = filled(2, 3);
        let reduced = ft.sum_out_end().sum_out_end();
        for label in 0..2 {
            let direct = ft.unnormalized_log_prob_front(&[label]);
            assert!((reduced.get_value(&[label]) - direct).abs() < 1e-12);
        }
        assert!((reduced.total_mass() - ft.total_mass()).abs() < 1e-12);
    }

    #[test]
    fn multiply_then_divide_is_identity() {
        let original = filled(3, 2);
        let mut ft = original.clone();
        let other = filled(3, 2);
        ft.multiply_in_end(&other);
        ft.divide_by(&other);
        for (a, b) in ft.values().iter().zip(original.values()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn multiply_in_front_and_end_broadcast() {
        let mut ft = FactorTable::new(2, 2);
        for i in 0..4 {
            ft.set_value_at(i, 0.0);
        }
        let mut single = FactorTable::new(2, 1);
        single.set_value(&[0], 1.0);
        single.set_value(&[1], 2.0);

        let mut front = ft.clone();
        front.multiply_in_front(&single);
        assert_eq!(front.get_value(&[1, 0]), 2.0);
        assert_eq!(front.get_value(&[0, 1]), 1.0);

        let mut end = ft.clone();
        end.multiply_in_end(&single);
        assert_eq!(end.get_value(&[1, 0]), 1.0);
        assert_eq!(end.get_value(&[0, 1]), 2.0);
    }

    #[test]
    fn divide_keeps_double_negative_infinity() {
        let mut a = FactorTable::new(2, 1);
        let b = FactorTable::new(2, 1);
        a.divide_by(&b);
        assert!(a.values().iter().all(|v| *v == f64::NEG_INFINITY));
    }

    #[test]
    fn conditionals_normalize() {
        let ft = filled(3, 3);
        for a in 0..3 {
            for b in 0..3 {
                let total: f64 = (0..3)
                    .map(|k| ft.conditional_log_prob_given_previous(&[a, b], k).exp())
                    .sum();
                assert!((total - 1.0).abs() < 1e-9);
                let total: f64 = (0..3)
                    .map(|k| ft.conditional_log_prob_given_next(&[a, b], k).exp())
                    .sum();
                assert!((total - 1.0).abs() < 1e-9);
                let total: f64 = ft
                    .conditional_log_probs_given_previous(&[a, b])
                    .iter()
                    .map(|v| v.exp())
                    .sum();
                assert!((total - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn conditional_given_first_matches_joint_ratio() {
        let ft = filled(2, 2);
        let p = ft.conditional_log_prob_given_first(1, &[0]);
        let expected = ft.log_prob(&[1, 0]) - ft.log_prob_front(&[1]);
        assert!((p - expected).abs() < 1e-12);
    }

    #[test]
    fn sum_out_matches_hand_computation() {
        let mut ft = FactorTable::new(2, 3);
        let probs: [f64; 8] = [0.25, 0.35, 0.05, 0.07, 0.08, 0.16, 1e-50, 1e-50];
        for (i, p) in probs.iter().enumerate() {
            ft.set_value_at(i, p.ln());
        }
        let front = ft.sum_out_front();
        assert!((front.get_value(&[0, 0]).exp() - 0.33).abs() < 1e-12);
        assert!((front.get_value(&[1, 1]).exp() - 0.07).abs() < 1e-12);
        let end = ft.sum_out_end();
        assert!((end.get_value(&[0, 0]).exp() - 0.60).abs() < 1e-12);
        assert!((end.get_value(&[1, 1]).exp() - 2e-50).abs() < 1e-60);
    }

    #[test]
    fn log_increment_accumulates_mass() {
        let mut ft = FactorTable::new(2, 1);
        ft.log_increment_value(&[0], 0.0);
        ft.log_increment_value(&[0], 0.0);
        assert!((ft.get_value(&[0]) - 2f64.ln()).abs() < 1e-12);
        ft.increment_value(&[0], 1.0);
        assert!((ft.get_value(&[0]) - (1.0 + 2f64.ln())).abs() < 1e-12);
    }
}
