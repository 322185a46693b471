use crate::math::log_normalize;

/// A distribution over label sequences that can score full sequences and
/// the full conditional at one position.
///
/// `scores_of(sequence, position)[label]` must differ from
/// `score_of(sequence with label at position)` only by a term that does not
/// depend on `label`.
pub trait SequenceModel: Send + Sync {
    fn length(&self) -> usize;

    /// How many positions to the left a score at one position may look at.
    fn left_window(&self) -> usize;

    fn right_window(&self) -> usize;

    fn possible_values(&self, position: usize) -> Vec<usize>;

    /// Unnormalized log scores of every label at `position`, the rest of
    /// `sequence` held fixed.
    fn scores_of(&self, sequence: &[usize], position: usize) -> Vec<f64>;

    /// Log score of a complete sequence.
    fn score_of(&self, sequence: &[usize]) -> f64;

    fn score_of_at(&self, sequence: &[usize], position: usize) -> f64 {
        self.scores_of(sequence, position)[sequence[position]]
    }

    /// Normalized full conditional at `position`.
    fn conditional_distribution(&self, sequence: &[usize], position: usize) -> Vec<f64> {
        let mut scores = self.scores_of(sequence, position);
        log_normalize(&mut scores);
        scores.iter_mut().for_each(|s| *s = s.exp());
        scores
    }
}

/// Receives every change the sampler makes to the current sequence.
pub trait SequenceListener {
    fn set_initial_sequence(&mut self, sequence: &[usize]);

    /// `sequence[position]` already holds the new label.
    fn update_sequence_element(&mut self, sequence: &[usize], position: usize, old_label: usize);
}

/// Both capabilities; what the composite models hold and the sampler drives.
pub trait ListeningSequenceModel: SequenceModel + SequenceListener {}

impl<T: SequenceModel + SequenceListener + ?Sized> ListeningSequenceModel for T {}

impl<T: SequenceModel + ?Sized> SequenceModel for Box<T> {
    fn length(&self) -> usize {
        (**self).length()
    }

    fn left_window(&self) -> usize {
        (**self).left_window()
    }

    fn right_window(&self) -> usize {
        (**self).right_window()
    }

    fn possible_values(&self, position: usize) -> Vec<usize> {
        (**self).possible_values(position)
    }

    fn scores_of(&self, sequence: &[usize], position: usize) -> Vec<f64> {
        (**self).scores_of(sequence, position)
    }

    fn score_of(&self, sequence: &[usize]) -> f64 {
        (**self).score_of(sequence)
    }
}

impl<T: SequenceListener + ?Sized> SequenceListener for Box<T> {
    fn set_initial_sequence(&mut self, sequence: &[usize]) {
        (**self).set_initial_sequence(sequence)
    }

    fn update_sequence_element(&mut self, sequence: &[usize], position: usize, old_label: usize) {
        (**self).update_sequence_element(sequence, position, old_label)
    }
}

pub type BoxedModel<'a> = Box<dyn ListeningSequenceModel + 'a>;

/// Concatenation of component models over consecutive, non-overlapping
/// ranges of one long sequence (e.g. two sentences decoded jointly).
pub struct SequentialModel<'a> {
    models: Vec<BoxedModel<'a>>,
    /// `offsets[i]` is where model `i` starts; the last entry is the total length.
    offsets: Vec<usize>,
}

impl<'a> SequentialModel<'a> {
    pub fn new(models: Vec<BoxedModel<'a>>) -> Self {
        let mut offsets = Vec::with_capacity(models.len() + 1);
        let mut total = 0;
        offsets.push(0);
        for m in &models {
            total += m.length();
            offsets.push(total);
        }
        Self { models, offsets }
    }

    /// Start of each component's range.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets[..self.models.len()]
    }

    /// Component owning `position` and the position inside it.
    fn locate(&self, position: usize) -> (usize, usize) {
        // first offset strictly greater than position, minus one
        let i = self.offsets.partition_point(|&o| o <= position) - 1;
        (i, position - self.offsets[i])
    }

    fn range(&self, i: usize) -> std::ops::Range<usize> {
        self.offsets[i]..self.offsets[i + 1]
    }
}

impl SequenceModel for SequentialModel<'_> {
    fn length(&self) -> usize {
        self.offsets.last().copied().unwrap_or_default()
    }

    fn left_window(&self) -> usize {
        self.models.iter().map(|m| m.left_window()).max().unwrap_or_default()
    }

    fn right_window(&self) -> usize {
        self.models.iter().map(|m| m.right_window()).max().unwrap_or_default()
    }

    fn possible_values(&self, position: usize) -> Vec<usize> {
        let (i, local) = self.locate(position);
        self.models[i].possible_values(local)
    }

    fn scores_of(&self, sequence: &[usize], position: usize) -> Vec<f64> {
        let (i, local) = self.locate(position);
        self.models[i].scores_of(&sequence[self.range(i)], local)
    }

    fn score_of(&self, sequence: &[usize]) -> f64 {
        (0..self.models.len())
            .map(|i| self.models[i].score_of(&sequence[self.range(i)]))
            .sum()
    }
}

impl SequenceListener for SequentialModel<'_> {
    fn set_initial_sequence(&mut self, sequence: &[usize]) {
        for i in 0..self.models.len() {
            let range = self.range(i);
            self.models[i].set_initial_sequence(&sequence[range]);
        }
    }

    fn update_sequence_element(&mut self, sequence: &[usize], position: usize, old_label: usize) {
        let (i, local) = self.locate(position);
        let range = self.range(i);
        self.models[i].update_sequence_element(&sequence[range], local, old_label);
    }
}

/// Weighted sum of component models that all cover the same positions.
pub struct FactoredModel<'a> {
    models: Vec<(BoxedModel<'a>, f64)>,
}

impl<'a> FactoredModel<'a> {
    pub fn new(models: Vec<BoxedModel<'a>>) -> Self {
        Self::weighted(models.into_iter().map(|m| (m, 1.0)).collect())
    }

    pub fn weighted(models: Vec<(BoxedModel<'a>, f64)>) -> Self {
        Self { models }
    }
}

impl SequenceModel for FactoredModel<'_> {
    fn length(&self) -> usize {
        self.models.first().map_or(0, |(m, _)| m.length())
    }

    fn left_window(&self) -> usize {
        self.models.iter().map(|(m, _)| m.left_window()).max().unwrap_or_default()
    }

    fn right_window(&self) -> usize {
        self.models.iter().map(|(m, _)| m.right_window()).max().unwrap_or_default()
    }

    fn possible_values(&self, position: usize) -> Vec<usize> {
        self.models
            .first()
            .map(|(m, _)| m.possible_values(position))
            .unwrap_or_default()
    }

    fn scores_of(&self, sequence: &[usize], position: usize) -> Vec<f64> {
        let mut total: Vec<f64> = Vec::new();
        for (m, w) in &self.models {
            let scores = m.scores_of(sequence, position);
            if total.is_empty() {
                total = vec![0.0; scores.len()];
            }
            for (t, s) in total.iter_mut().zip(scores) {
                *t += w * s;
            }
        }
        total
    }

    fn score_of(&self, sequence: &[usize]) -> f64 {
        self.models.iter().map(|(m, w)| w * m.score_of(sequence)).sum()
    }
}

impl SequenceListener for FactoredModel<'_> {
    fn set_initial_sequence(&mut self, sequence: &[usize]) {
        for (m, _) in self.models.iter_mut() {
            m.set_initial_sequence(sequence);
        }
    }

    fn update_sequence_element(&mut self, sequence: &[usize], position: usize, old_label: usize) {
        for (m, _) in self.models.iter_mut() {
            m.update_sequence_element(sequence, position, old_label);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use super::*;

    /// Independent positions with fixed per-label scores; records listener
    /// calls and how often its window was asked for.
    pub(crate) struct TableModel {
        pub scores: Vec<Vec<f64>>,
        pub updates: Vec<(usize, usize)>,
        pub initialized: usize,
        pub window_queries: AtomicUsize,
    }

    impl TableModel {
        pub fn new(scores: Vec<Vec<f64>>) -> Self {
            Self {
                scores,
                updates: Vec::new(),
                initialized: 0,
                window_queries: AtomicUsize::new(0),
            }
        }
    }

    impl SequenceModel for TableModel {
        fn length(&self) -> usize {
            self.scores.len()
        }

        fn left_window(&self) -> usize {
            self.window_queries.fetch_add(1, Ordering::SeqCst);
            0
        }

        fn right_window(&self) -> usize {
            0
        }

        fn possible_values(&self, position: usize) -> Vec<usize> {
            (0..self.scores[position].len()).collect()
        }

        fn scores_of(&self, _sequence: &[usize], position: usize) -> Vec<f64> {
            self.scores[position].clone()
        }

        fn score_of(&self, sequence: &[usize]) -> f64 {
            sequence.iter().enumerate().map(|(i, &l)| self.scores[i][l]).sum()
        }
    }

    impl SequenceListener for TableModel {
        fn set_initial_sequence(&mut self, _sequence: &[usize]) {
            self.initialized += 1;
        }

        fn update_sequence_element(&mut self, _sequence: &[usize], position: usize, old_label: usize) {
            self.updates.push((position, old_label));
        }
    }

    #[test]
    fn sequential_model_offsets_positions() {
        let a = TableModel::new(vec![vec![0.0, 1.0]; 2]);
        let b = TableModel::new(vec![vec![5.0, 2.0]; 3]);
        let parts: Vec<BoxedModel> = vec![Box::new(a), Box::new(b)];
        let mut m = SequentialModel::new(parts);
        assert_eq!(m.length(), 5);
        assert_eq!(m.offsets(), &[0, 2]);
        assert_eq!(m.scores_of(&[0; 5], 1), vec![0.0, 1.0]);
        assert_eq!(m.scores_of(&[0; 5], 2), vec![5.0, 2.0]);
        assert_eq!(m.score_of(&[1, 1, 0, 0, 1]), 1.0 + 1.0 + 5.0 + 5.0 + 2.0);
        m.set_initial_sequence(&[0; 5]);
        m.update_sequence_element(&[0, 0, 0, 1, 0], 3, 0);
    }

    #[test]
    fn factored_model_weights_components() {
        let a = TableModel::new(vec![vec![1.0, 2.0]]);
        let b = TableModel::new(vec![vec![10.0, 0.0]]);
        let parts: Vec<(BoxedModel, f64)> = vec![(Box::new(a), 1.0), (Box::new(b), 0.5)];
        let m = FactoredModel::weighted(parts);
        assert_eq!(m.scores_of(&[0], 0), vec![6.0, 2.0]);
        assert_eq!(m.score_of(&[0]), 6.0);
        let p = m.conditional_distribution(&[0], 0);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[0] > p[1]);
    }

    /// Logs `(id, local position, old label)` for every update it sees.
    struct Recorder {
        id: usize,
        len: usize,
        log: Arc<Mutex<Vec<(usize, usize, usize)>>>,
    }

    impl SequenceModel for Recorder {
        fn length(&self) -> usize {
            self.len
        }

        fn left_window(&self) -> usize {
            0
        }

        fn right_window(&self) -> usize {
            0
        }

        fn possible_values(&self, _position: usize) -> Vec<usize> {
            vec![0, 1]
        }

        fn scores_of(&self, _sequence: &[usize], _position: usize) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn score_of(&self, _sequence: &[usize]) -> f64 {
            0.0
        }
    }

    impl SequenceListener for Recorder {
        fn set_initial_sequence(&mut self, sequence: &[usize]) {
            assert_eq!(sequence.len(), self.len);
        }

        fn update_sequence_element(&mut self, sequence: &[usize], position: usize, old_label: usize) {
            assert_eq!(sequence.len(), self.len);
            self.log.lock().unwrap().push((self.id, position, old_label));
        }
    }

    #[test]
    fn listeners_forward_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let recorder = |id, len| -> BoxedModel<'static> {
            Box::new(Recorder {
                id,
                len,
                log: log.clone(),
            })
        };
        let sequential = SequentialModel::new(vec![recorder(0, 2), recorder(1, 3)]);
        let parts: Vec<BoxedModel> = vec![Box::new(sequential), recorder(2, 5)];
        let mut m = FactoredModel::new(parts);
        m.set_initial_sequence(&[0; 5]);
        m.update_sequence_element(&[0, 0, 0, 1, 0], 3, 0);
        m.update_sequence_element(&[1, 0, 0, 1, 0], 0, 0);
        assert_eq!(
            *log.lock().unwrap(),
            vec![(1, 1, 0), (2, 3, 0), (0, 0, 0), (2, 0, 0)]
        );
    }
}
