use std::{fmt::Display, iter::zip};

use crate::alphabet::Alphabet;

/// Label-wise performance values.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LabelMeasure {
    /// Number of correct predictions.
    pub num_correct: usize,
    /// Number of occurrences of the label in the gold-standard data.
    pub num_observation: usize,
    /// Number of predictions.
    pub num_prediction: usize,
    pub precision: f64,
    pub recall: f64,
    pub fmeasure: f64,
}

/// Overall performance of decoded sequences against gold labels.
#[derive(Debug)]
pub struct Evaluation {
    labels: Alphabet,
    tbl: Vec<LabelMeasure>,

    /// Number of correctly predicted items.
    pub item_total_correct: usize,
    /// Total number of items.
    pub item_total_num: usize,
    pub item_accuracy: f64,

    /// Number of correctly predicted sequences.
    pub inst_total_correct: usize,
    /// Total number of sequences.
    pub inst_total_num: usize,
    pub inst_accuracy: f64,

    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_fmeasure: f64,
}

impl Evaluation {
    pub fn new(labels: Alphabet) -> Self {
        Self {
            tbl: vec![LabelMeasure::default(); labels.len()],
            labels,
            item_total_correct: 0,
            item_total_num: 0,
            item_accuracy: 0.0,
            inst_total_correct: 0,
            inst_total_num: 0,
            inst_accuracy: 0.0,
            macro_precision: 0.0,
            macro_recall: 0.0,
            macro_fmeasure: 0.0,
        }
    }

    /// Adds one decoded sequence. Labels outside the alphabet are counted as items only.
    pub fn accumulate(&mut self, reference: &[usize], prediction: &[usize]) {
        let mut matched = 0;
        for (&r, &p) in zip(reference, prediction) {
            if let Some(m) = self.tbl.get_mut(r) {
                m.num_observation += 1;
            }
            if let Some(m) = self.tbl.get_mut(p) {
                m.num_prediction += 1;
            }
            if r == p {
                if let Some(m) = self.tbl.get_mut(r) {
                    m.num_correct += 1;
                }
                matched += 1;
            }
            self.item_total_num += 1;
        }
        self.item_total_correct += matched;

        if matched == reference.len() && reference.len() == prediction.len() {
            self.inst_total_correct += 1;
        }
        self.inst_total_num += 1;
    }

    pub fn label(&self, id: usize) -> Option<&LabelMeasure> {
        self.tbl.get(id)
    }

    /// Fills in the per-label and averaged scores from the accumulated counts.
    /// Labels never seen in the gold data are left out of the macro averages.
    pub fn evaluate(&mut self) {
        let mut observed = 0;
        self.macro_precision = 0.0;
        self.macro_recall = 0.0;
        self.macro_fmeasure = 0.0;
        for lev in self.tbl.iter_mut() {
            lev.precision = 0.0;
            lev.recall = 0.0;
            lev.fmeasure = 0.0;
            if lev.num_observation == 0 {
                continue;
            }
            observed += 1;

            if lev.num_prediction > 0 {
                lev.precision = lev.num_correct as f64 / lev.num_prediction as f64;
            }
            lev.recall = lev.num_correct as f64 / lev.num_observation as f64;
            if lev.precision + lev.recall > 0.0 {
                lev.fmeasure = lev.precision * lev.recall * 2.0 / (lev.precision + lev.recall);
            }
            self.macro_precision += lev.precision;
            self.macro_recall += lev.recall;
            self.macro_fmeasure += lev.fmeasure;
        }

        if observed > 0 {
            self.macro_precision /= observed as f64;
            self.macro_recall /= observed as f64;
            self.macro_fmeasure /= observed as f64;
        }
        if self.item_total_num > 0 {
            self.item_accuracy = self.item_total_correct as f64 / self.item_total_num as f64;
        }
        if self.inst_total_num > 0 {
            self.inst_accuracy = self.inst_total_correct as f64 / self.inst_total_num as f64;
        }
    }
}

impl Display for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Performance by label (#match, #model, #ref) (precision, recall, F1):")?;
        for (id, lev) in self.tbl.iter().enumerate() {
            let label = self.labels.symbol(id).unwrap_or("?");
            if lev.num_observation == 0 {
                writeln!(
                    f,
                    "\t{}: ({}, {}, {}) (******, ******, ******)",
                    label, lev.num_correct, lev.num_prediction, lev.num_observation
                )?;
            } else {
                writeln!(
                    f,
                    "\t{}: ({}, {}, {}) ({:.4}, {:.4}, {:.4})",
                    label, lev.num_correct, lev.num_prediction, lev.num_observation, lev.precision, lev.recall, lev.fmeasure
                )?;
            }
        }
        writeln!(
            f,
            "Macro-average precision, recall, F1: ({:.4}, {:.4}, {:.4})",
            self.macro_precision, self.macro_recall, self.macro_fmeasure
        )?;
        writeln!(f, "Item accuracy: {}/{} => {:.4}", self.item_total_correct, self.item_total_num, self.item_accuracy)?;
        writeln!(f, "Sequence accuracy: {}/{} => {:.4}", self.inst_total_correct, self.inst_total_num, self.inst_accuracy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_scores() {
        let labels: Alphabet = ["O", "PER", "LOC"].into_iter().collect();
        let mut eval = Evaluation::new(labels);
        eval.accumulate(&[0, 1, 1, 0], &[0, 1, 0, 0]);
        eval.accumulate(&[2, 0], &[2, 0]);
        eval.evaluate();

        assert_eq!(eval.item_total_correct, 5);
        assert_eq!(eval.item_total_num, 6);
        assert_eq!(eval.inst_total_correct, 1);
        assert_eq!(eval.inst_accuracy, 0.5);

        let o = eval.label(0).unwrap();
        assert_eq!((o.num_correct, o.num_prediction, o.num_observation), (3, 4, 3));
        assert_eq!(o.precision, 0.75);
        assert_eq!(o.recall, 1.0);
        let per = eval.label(1).unwrap();
        assert_eq!(per.precision, 1.0);
        assert_eq!(per.recall, 0.5);
        assert!((eval.macro_recall - 2.5 / 3.0).abs() < 1e-12);

        let report = eval.to_string();
        assert!(report.contains("PER: (1, 1, 2)"));
        assert!(report.contains("Sequence accuracy: 1/2"));
    }
}
