use std::{collections::BTreeSet, str::FromStr};

use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{
    coloring::ConflictGraph,
    model::{SequenceListener, SequenceModel},
    schedule::CoolingSchedule,
};
use crate::{
    config::SamplerConfig,
    error::{Error, Result},
    math::{argmax, log_normalize, sample_from_distribution},
};

/// Order in which one sweep visits positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SamplingStyle {
    /// As many draws of a uniformly random position as there are positions.
    Random,
    /// Left to right.
    #[default]
    Sequential,
    /// One color class after another; members of a class are drawn together.
    Chromatic,
}

impl FromStr for SamplingStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" | "0" => Ok(SamplingStyle::Random),
            "sequential" | "1" => Ok(SamplingStyle::Sequential),
            "chromatic" | "2" => Ok(SamplingStyle::Chromatic),
            _ => Err(Error::UnknownSamplingStyle(s.to_string())),
        }
    }
}

impl TryFrom<String> for SamplingStyle {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<SamplingStyle> for String {
    fn from(s: SamplingStyle) -> Self {
        match s {
            SamplingStyle::Random => "random".to_string(),
            SamplingStyle::Sequential => "sequential".to_string(),
            SamplingStyle::Chromatic => "chromatic".to_string(),
        }
    }
}

/// Draws a label for `position` from the full conditional raised to
/// `1 / temperature`. A temperature of zero (or below) returns the mode.
pub fn draw_label<M, R>(model: &M, sequence: &[usize], position: usize, temperature: f64, rng: &mut R) -> usize
where
    M: SequenceModel + ?Sized,
    R: Rng + ?Sized,
{
    let values = model.possible_values(position);
    let scores = model.scores_of(sequence, position);
    let mut dist: Vec<f64> = values.iter().map(|&v| scores[v]).collect();
    if temperature <= 0.0 {
        return values[argmax(&dist)];
    }
    if temperature != 1.0 {
        dist.iter_mut().for_each(|s| *s /= temperature);
    }
    log_normalize(&mut dist);
    dist.iter_mut().for_each(|s| *s = s.exp());
    values[sample_from_distribution(&dist, rng)]
}

/// Gibbs sampler over a sequence model, with simulated annealing for
/// approximate MAP decoding.
///
/// The model passed to every method is also the listener: each label
/// change is reported through `update_sequence_element` before the next
/// position is drawn.
pub struct SequenceGibbsSampler {
    rng: StdRng,
    style: SamplingStyle,
    /// Classes larger than this are drawn on the rayon pool.
    chromatic_size: usize,
    /// Color classes for chromatic sweeps; derived from the model's windows when unset.
    partition: Option<Vec<Vec<usize>>>,
    /// Coloring of the current model's conflict graph, built once per run.
    derived: Option<Vec<Vec<usize>>>,
    /// Zero disables the speed-up.
    speed_up_threshold: usize,
    return_last_found_sequence: bool,
}

impl SequenceGibbsSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            style: SamplingStyle::default(),
            chromatic_size: 1,
            partition: None,
            derived: None,
            speed_up_threshold: 0,
            return_last_found_sequence: false,
        }
    }

    pub fn from_config(config: &SamplerConfig) -> Self {
        Self::new(config.seed)
            .with_style(config.sampling_style)
            .with_chromatic_size(config.chromatic_size)
            .with_speed_up_threshold(config.speed_up_threshold)
            .with_return_last_found_sequence(config.return_last_found_sequence)
    }

    pub fn with_style(mut self, style: SamplingStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_chromatic_size(mut self, size: usize) -> Self {
        self.chromatic_size = size;
        self
    }

    pub fn with_partition(mut self, partition: Vec<Vec<usize>>) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Replaces the explicit partition; `None` falls back to coloring the model.
    pub fn set_partition(&mut self, partition: Option<Vec<Vec<usize>>>) {
        self.partition = partition;
    }

    pub fn with_speed_up_threshold(mut self, threshold: usize) -> Self {
        self.speed_up_threshold = threshold;
        self
    }

    pub fn with_return_last_found_sequence(mut self, yes: bool) -> Self {
        self.return_last_found_sequence = yes;
        self
    }

    pub fn style(&self) -> SamplingStyle {
        self.style
    }

    /// Color classes used by chromatic sweeps: the explicit partition, or the
    /// coloring derived for the model of the current run.
    pub fn partition(&self) -> Option<&[Vec<usize>]> {
        self.partition.as_deref().or(self.derived.as_deref())
    }

    /// Uniform draw from each position's possible values.
    pub fn random_sequence<M: SequenceModel + ?Sized>(&mut self, model: &M) -> Vec<usize> {
        (0..model.length())
            .map(|i| {
                let values = model.possible_values(i);
                values[self.rng.gen_range(0..values.len())]
            })
            .collect()
    }

    /// Draws a label for `position` without touching the sequence.
    pub fn sample_position_helper<M: SequenceModel + ?Sized>(
        &mut self,
        model: &M,
        sequence: &[usize],
        position: usize,
        temperature: f64,
    ) -> usize {
        draw_label(model, sequence, position, temperature, &mut self.rng)
    }

    /// Resamples one position in place, notifying the model when the label changes.
    /// Returns the new label.
    pub fn sample_position<M>(&mut self, model: &mut M, sequence: &mut [usize], position: usize, temperature: f64) -> usize
    where
        M: SequenceModel + SequenceListener + ?Sized,
    {
        let label = self.sample_position_helper(&*model, sequence, position, temperature);
        set_label(model, sequence, position, label);
        label
    }

    /// One sweep in the configured style. With `only`, positions outside the
    /// set are left alone.
    ///
    /// Chromatic sweeps without an explicit partition reuse the coloring made
    /// when the current run started.
    pub fn sample_sequence_forward<M>(
        &mut self,
        model: &mut M,
        sequence: &mut [usize],
        temperature: f64,
        only: Option<&BTreeSet<usize>>,
    ) -> Result<()>
    where
        M: SequenceModel + SequenceListener + ?Sized,
    {
        check_length(&*model, sequence)?;
        let included = |i: &usize| only.map_or(true, |set| set.contains(i));
        match self.style {
            SamplingStyle::Sequential => {
                for i in (0..sequence.len()).filter(included) {
                    self.sample_position(model, sequence, i, temperature);
                }
            }
            SamplingStyle::Random => {
                let candidates: Vec<usize> = (0..sequence.len()).filter(included).collect();
                for _ in 0..candidates.len() {
                    let i = candidates[self.rng.gen_range(0..candidates.len())];
                    self.sample_position(model, sequence, i, temperature);
                }
            }
            SamplingStyle::Chromatic => {
                if self.partition.is_none() && self.derived.is_none() {
                    self.derived = Some(ConflictGraph::for_model(&*model).color());
                }
                let num_classes = self.partition().map_or(0, <[_]>::len);
                for c in 0..num_classes {
                    let members: Vec<usize> = match self.partition() {
                        Some(classes) => classes[c].iter().copied().filter(included).collect(),
                        None => Vec::new(),
                    };
                    if let Some(&bad) = members.iter().find(|&&i| i >= sequence.len()) {
                        return Err(Error::DimensionMismatch {
                            what: "color class position",
                            expected: sequence.len(),
                            got: bad,
                        });
                    }
                    self.sample_class(model, sequence, &members, temperature);
                }
            }
        }
        Ok(())
    }

    /// Draws every member of one color class against the same snapshot of
    /// the sequence, then applies the draws in class order. Each member gets
    /// its own generator seeded from the sampler's, so the outcome does not
    /// depend on whether the class ran on the pool.
    fn sample_class<M>(&mut self, model: &mut M, sequence: &mut [usize], members: &[usize], temperature: f64)
    where
        M: SequenceModel + SequenceListener + ?Sized,
    {
        let seeds: Vec<u64> = members.iter().map(|_| self.rng.gen()).collect();
        let shared: &M = model;
        let current: &[usize] = sequence;
        let draw = |(&position, &seed): (&usize, &u64)| {
            let mut rng = StdRng::seed_from_u64(seed);
            draw_label(shared, current, position, temperature, &mut rng)
        };
        let labels: Vec<usize> = if members.len() > self.chromatic_size {
            members.par_iter().zip(seeds.par_iter()).map(draw).collect()
        } else {
            members.iter().zip(&seeds).map(draw).collect()
        };
        for (&position, label) in members.iter().zip(labels) {
            set_label(model, sequence, position, label);
        }
    }

    /// Right-to-left scan, whatever the configured style.
    pub fn sample_sequence_backward<M>(&mut self, model: &mut M, sequence: &mut [usize], temperature: f64) -> Result<()>
    where
        M: SequenceModel + SequenceListener + ?Sized,
    {
        check_length(&*model, sequence)?;
        for i in (0..sequence.len()).rev() {
            self.sample_position(model, sequence, i, temperature);
        }
        Ok(())
    }

    /// `num_samples` sweeps at temperature 1 from `initial`; returns the last state.
    pub fn sample_sequence_repeatedly<M>(&mut self, model: &mut M, initial: Vec<usize>, num_samples: usize) -> Result<Vec<usize>>
    where
        M: SequenceModel + SequenceListener + ?Sized,
    {
        let mut sequence = self.start(model, Some(initial))?;
        for _ in 0..num_samples {
            self.sample_sequence_forward(model, &mut sequence, 1.0, None)?;
        }
        Ok(sequence)
    }

    /// Records the state after every `interval` sweeps, `num_samples` times.
    /// A random sequence is used when `initial` is `None`.
    pub fn collect_samples<M>(
        &mut self,
        model: &mut M,
        num_samples: usize,
        interval: usize,
        initial: Option<Vec<usize>>,
    ) -> Result<Vec<Vec<usize>>>
    where
        M: SequenceModel + SequenceListener + ?Sized,
    {
        let mut sequence = self.start(model, initial)?;
        let mut samples = Vec::with_capacity(num_samples);
        for _ in 0..num_samples {
            for _ in 0..interval.max(1) {
                self.sample_sequence_forward(model, &mut sequence, 1.0, None)?;
            }
            samples.push(sequence.clone());
        }
        Ok(samples)
    }

    /// Highest-scoring sequence among `num_samples` collected samples.
    pub fn find_best_using_sampling<M>(
        &mut self,
        model: &mut M,
        num_samples: usize,
        interval: usize,
        initial: Option<Vec<usize>>,
    ) -> Result<Vec<usize>>
    where
        M: SequenceModel + SequenceListener + ?Sized,
    {
        let samples = self.collect_samples(model, num_samples, interval, initial.clone())?;
        let mut best = match initial {
            Some(seq) => seq,
            None => samples.first().cloned().ok_or(Error::EmptyModel)?,
        };
        let mut best_score = model.score_of(&best);
        for sample in samples {
            let score = model.score_of(&sample);
            if score > best_score {
                best_score = score;
                best = sample;
            }
        }
        Ok(best)
    }

    /// One sweep per step of `schedule`, at that step's temperature.
    ///
    /// Returns the best-scoring sequence seen after any sweep, or the final
    /// one when configured to return the last found sequence.
    pub fn find_best_using_annealing<M>(
        &mut self,
        model: &mut M,
        schedule: &CoolingSchedule,
        initial: Option<Vec<usize>>,
    ) -> Result<Vec<usize>>
    where
        M: SequenceModel + SequenceListener + ?Sized,
    {
        let mut sequence = self.start(model, initial)?;
        let initial = sequence.clone();
        let mut best = sequence.clone();
        let mut best_score = f64::NEG_INFINITY;
        let mut changed: BTreeSet<usize> = BTreeSet::new();

        for k in 0..schedule.num_iterations() {
            let temperature = schedule.temperature(k);
            if self.speed_up_threshold > 0 && k >= self.speed_up_threshold {
                self.sample_sequence_forward(model, &mut sequence, temperature, Some(&changed))?;
            } else {
                self.sample_sequence_forward(model, &mut sequence, temperature, None)?;
                if self.speed_up_threshold > 0 {
                    changed.extend((0..sequence.len()).filter(|&i| sequence[i] != initial[i]));
                }
            }

            if self.return_last_found_sequence {
                best.copy_from_slice(&sequence);
            } else {
                let score = model.score_of(&sequence);
                if score > best_score {
                    best_score = score;
                    best.copy_from_slice(&sequence);
                }
            }
            if k % 50 == 0 {
                log::debug!("annealing iteration {k}: temperature {temperature:.6}, best score {best_score:.6}");
            }
        }
        Ok(best)
    }

    /// Validates or draws the starting sequence and hands it to the listener.
    fn start<M>(&mut self, model: &mut M, initial: Option<Vec<usize>>) -> Result<Vec<usize>>
    where
        M: SequenceModel + SequenceListener + ?Sized,
    {
        if model.length() == 0 {
            return Err(Error::EmptyModel);
        }
        self.derived = None;
        if self.style == SamplingStyle::Chromatic && self.partition.is_none() {
            self.derived = Some(ConflictGraph::for_model(&*model).color());
        }
        let sequence = match initial {
            Some(seq) => {
                check_length(&*model, &seq)?;
                seq
            }
            None => self.random_sequence(&*model),
        };
        model.set_initial_sequence(&sequence);
        Ok(sequence)
    }
}

fn check_length<M: SequenceModel + ?Sized>(model: &M, sequence: &[usize]) -> Result<()> {
    if sequence.len() != model.length() {
        return Err(Error::DimensionMismatch {
            what: "sequence length",
            expected: model.length(),
            got: sequence.len(),
        });
    }
    Ok(())
}

fn set_label<M: SequenceListener + ?Sized>(model: &mut M, sequence: &mut [usize], position: usize, label: usize) {
    let old = sequence[position];
    if old != label {
        sequence[position] = label;
        model.update_sequence_element(sequence, position, old);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::sampling::{model::tests::TableModel, schedule::AnnealingType};

    fn model() -> TableModel {
        // mode: [1, 0, 2]
        TableModel::new(vec![
            vec![0.0, 1.0, -1.0],
            vec![2.0, 0.5, 0.0],
            vec![0.0, 0.0, 3.0],
        ])
    }

    #[test]
    fn zero_temperature_takes_the_mode() {
        let mut m = model();
        let mut sampler = SequenceGibbsSampler::new(3);
        let mut seq = vec![0, 0, 0];
        m.set_initial_sequence(&seq);
        sampler.sample_sequence_forward(&mut m, &mut seq, 0.0, None).unwrap();
        assert_eq!(seq, vec![1, 0, 2]);
        assert_eq!(m.updates, vec![(0, 0), (2, 0)]);
    }

    #[test]
    fn annealing_finds_the_mode() {
        for style in [SamplingStyle::Sequential, SamplingStyle::Random, SamplingStyle::Chromatic] {
            let mut m = model();
            let mut sampler = SequenceGibbsSampler::new(11).with_style(style);
            let schedule = CoolingSchedule::new(AnnealingType::Exponential, 0.8, 60);
            let best = sampler.find_best_using_annealing(&mut m, &schedule, None).unwrap();
            assert_eq!(best, vec![1, 0, 2], "{style:?}");
            assert_eq!(m.initialized, 1);
        }
    }

    #[test]
    fn samples_follow_the_conditional() {
        // P(label 0) = 3/4
        let mut m = TableModel::new(vec![vec![3f64.ln(), 0.0]]);
        let mut sampler = SequenceGibbsSampler::new(5);
        let samples = sampler.collect_samples(&mut m, 4000, 1, Some(vec![1])).unwrap();
        let zeros = samples.iter().filter(|s| s[0] == 0).count() as f64 / 4000.0;
        assert!((zeros - 0.75).abs() < 0.03, "{zeros}");
    }

    #[test]
    fn chromatic_draws_do_not_depend_on_pool_use() {
        let run = |chromatic_size| {
            let mut m = TableModel::new(vec![vec![0.0, 0.3, 0.1]; 16]);
            let mut sampler = SequenceGibbsSampler::new(9)
                .with_style(SamplingStyle::Chromatic)
                .with_chromatic_size(chromatic_size);
            sampler.collect_samples(&mut m, 5, 1, Some(vec![0; 16])).unwrap()
        };
        assert_eq!(run(1), run(100));
    }

    #[test]
    fn partition_positions_are_checked() {
        let mut m = model();
        let mut sampler = SequenceGibbsSampler::new(1)
            .with_style(SamplingStyle::Chromatic)
            .with_partition(vec![vec![0, 2], vec![1, 3]]);
        let mut seq = vec![0, 0, 0];
        assert!(matches!(
            sampler.sample_sequence_forward(&mut m, &mut seq, 1.0, None),
            Err(Error::DimensionMismatch { got: 3, .. })
        ));
    }

    #[test]
    fn speed_up_only_revisits_changed_positions() {
        let mut m = model();
        let mut sampler = SequenceGibbsSampler::new(2).with_speed_up_threshold(1);
        let schedule = CoolingSchedule::exponential(0.0, 0.5, 5);
        let best = sampler.find_best_using_annealing(&mut m, &schedule, Some(vec![1, 1, 1])).unwrap();
        assert_eq!(best, vec![1, 0, 2]);
        // first sweep moves positions 1 and 2; later sweeps never touch 0
        assert_eq!(m.updates, vec![(1, 1), (2, 1)]);
    }

    #[test]
    fn best_of_samples_and_backward_sweeps() {
        let mut m = model();
        let mut sampler = SequenceGibbsSampler::new(4);
        let best = sampler.find_best_using_sampling(&mut m, 200, 2, None).unwrap();
        assert_eq!(best, vec![1, 0, 2]);

        let mut seq = vec![0, 1, 0];
        sampler.sample_sequence_backward(&mut m, &mut seq, 0.0).unwrap();
        assert_eq!(seq, vec![1, 0, 2]);
    }

    #[test]
    fn rejects_bad_starts() {
        let mut sampler = SequenceGibbsSampler::new(0);
        let mut empty = TableModel::new(Vec::new());
        assert!(matches!(
            sampler.sample_sequence_repeatedly(&mut empty, Vec::new(), 1),
            Err(Error::EmptyModel)
        ));
        let mut m = model();
        assert!(matches!(
            sampler.sample_sequence_repeatedly(&mut m, vec![0, 0], 1),
            Err(Error::DimensionMismatch { expected: 3, got: 2, .. })
        ));
    }

    #[test]
    fn parse_styles() {
        assert_eq!("Chromatic".parse::<SamplingStyle>().unwrap(), SamplingStyle::Chromatic);
        assert_eq!("0".parse::<SamplingStyle>().unwrap(), SamplingStyle::Random);
        assert!(matches!("gibbs".parse::<SamplingStyle>(), Err(Error::UnknownSamplingStyle(_))));
    }

    #[test]
    fn chromatic_run_colors_the_model_once() {
        let mut m = TableModel::new(vec![vec![0.0, 0.2]; 12]);
        let mut sampler = SequenceGibbsSampler::new(4).with_style(SamplingStyle::Chromatic);
        sampler.collect_samples(&mut m, 20, 2, None).unwrap();
        assert_eq!(m.window_queries.load(Ordering::SeqCst), 1);
        assert_eq!(sampler.partition().map(<[_]>::len), Some(1));

        let schedule = CoolingSchedule::new(AnnealingType::Linear, 0.9, 30);
        sampler.find_best_using_annealing(&mut m, &schedule, None).unwrap();
        assert_eq!(m.window_queries.load(Ordering::SeqCst), 2);
    }
}
