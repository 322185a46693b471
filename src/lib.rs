//! Linear-chain conditional random fields: calibrated clique trees over
//! log-space factor tables, a likelihood objective with priors, and a Gibbs
//! sampler with simulated annealing for joint decoding of coupled sequences.

pub mod alphabet;
pub mod config;
pub mod crf;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod math;
pub mod sampling;

pub use alphabet::Alphabet;
pub use config::{CrfConfig, ObjectiveConfig, SamplerConfig};
pub use crf::{
    clique_tree::CliqueTree,
    context::{FeatureMap, LabelIndices, ModelContext},
    factor_table::FactorTable,
    objective::{CrfObjective, Objective},
    potential::{CliquePotential, LinearPotential, PotentialKind},
    prior::{Prior, PriorType},
    trainer::{GradientDescent, Trainer},
    weights::Weights,
};
pub use dataset::{Dataset, Document, TsvReader};
pub use error::{Error, Result};
pub use evaluation::Evaluation;
