use std::{fs, io::BufRead, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    crf::{
        potential::PotentialKind,
        prior::{Prior, PriorType},
        trainer::GradientDescent,
    },
    error::Result,
    sampling::{
        alignment::Alignment,
        gibbs::SamplingStyle,
        schedule::{AnnealingType, CoolingSchedule},
    },
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveConfig {
    pub prior: PriorType,
    pub sigma: f64,
    /// Huber transition point.
    pub epsilon: f64,
    pub potential: PotentialKind,
    /// Gradient worker shards.
    pub threads: usize,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            prior: PriorType::Quadratic,
            sigma: 1.0,
            epsilon: 0.1,
            potential: PotentialKind::Linear,
            threads: 1,
        }
    }
}

impl ObjectiveConfig {
    pub fn prior(&self) -> Prior {
        Prior::new(self.prior, self.sigma, self.epsilon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub annealing: AnnealingType,
    pub annealing_rate: f64,
    /// Annealing sweeps.
    pub num_samples: usize,
    pub sampling_style: SamplingStyle,
    /// Color classes larger than this are drawn in parallel.
    pub chromatic_size: usize,
    /// Alignment links below this confidence are dropped when read.
    pub alignment_prune_threshold: f64,
    pub seed: u64,
    /// Start from the exact best sequence instead of a random one.
    pub init_viterbi: bool,
    pub return_last_found_sequence: bool,
    /// Sweeps after which only positions that moved are resampled; 0 disables.
    pub speed_up_threshold: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            annealing: AnnealingType::Linear,
            annealing_rate: 0.9,
            num_samples: 100,
            sampling_style: SamplingStyle::Sequential,
            chromatic_size: 1,
            alignment_prune_threshold: 0.0,
            seed: 1,
            init_viterbi: true,
            return_last_found_sequence: false,
            speed_up_threshold: 0,
        }
    }
}

impl SamplerConfig {
    pub fn schedule(&self) -> CoolingSchedule {
        CoolingSchedule::new(self.annealing, self.annealing_rate, self.num_samples)
    }

    /// Reads one alignment per line, pruned at the configured threshold.
    pub fn read_alignments<R: BufRead>(&self, input: R) -> Result<Vec<Alignment>> {
        Alignment::read(input, self.alignment_prune_threshold)
    }
}

/// Everything the driver reads from a JSON file; missing keys keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrfConfig {
    pub background_symbol: String,
    /// Clique size: 2 for first-order chains.
    pub window: usize,
    pub objective: ObjectiveConfig,
    pub trainer: GradientDescent,
    pub sampler: SamplerConfig,
}

impl Default for CrfConfig {
    fn default() -> Self {
        Self {
            background_symbol: "O".to_string(),
            window: 2,
            objective: ObjectiveConfig::default(),
            trainer: GradientDescent::default(),
            sampler: SamplerConfig::default(),
        }
    }
}

impl CrfConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let config = CrfConfig::from_json("{}").unwrap();
        assert_eq!(config.window, 2);
        assert_eq!(config.objective, ObjectiveConfig::default());
        assert_eq!(config.sampler, SamplerConfig::default());
        assert_eq!(config.objective.prior(), Prior::default());
    }

    #[test]
    fn parses_named_options() {
        let config = CrfConfig::from_json(
            r#"{
                "window": 3,
                "objective": {"prior": "HUBER", "sigma": 2.0},
                "sampler": {"annealing": "exp", "annealing_rate": 0.5, "num_samples": 4, "sampling_style": "chromatic"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.window, 3);
        assert_eq!(config.objective.prior, PriorType::Huber);
        assert_eq!(config.objective.sigma, 2.0);
        assert_eq!(config.objective.epsilon, 0.1);
        assert_eq!(config.sampler.sampling_style, SamplingStyle::Chromatic);
        assert_eq!(config.sampler.schedule().temperature(2), 0.25);
    }

    #[test]
    fn unknown_names_are_errors() {
        assert!(CrfConfig::from_json(r#"{"objective": {"prior": "laplace"}}"#).is_err());
        assert!(CrfConfig::from_json(r#"{"sampler": {"annealing": "cosine"}}"#).is_err());
        assert!(CrfConfig::from_json(r#"{"sampler": {"sampling_style": "gibbs"}}"#).is_err());
    }

    #[test]
    fn alignments_are_pruned_at_the_configured_threshold() {
        let config = CrfConfig::from_json(r#"{"sampler": {"alignment_prune_threshold": 0.5}}"#).unwrap();
        let text = "0-0-0.9 1-1-0.2\n\n2-1-0.5\n";
        let alignments = config.sampler.read_alignments(text.as_bytes()).unwrap();
        assert_eq!(alignments.len(), 3);
        assert_eq!(alignments[0].len(), 1);
        assert!(alignments[1].is_empty());
        assert_eq!(alignments[2].links()[0].a, 1);
    }
}
