//! Approximate joint decoding: Gibbs sampling with simulated annealing over
//! composed sequence models, optionally scheduled by graph coloring.

pub mod alignment;
pub mod coloring;
pub mod gibbs;
pub mod model;
pub mod priors;
pub mod schedule;

pub use alignment::{Alignment, AlignmentLink};
pub use coloring::ConflictGraph;
pub use gibbs::{SamplingStyle, SequenceGibbsSampler};
pub use model::{BoxedModel, FactoredModel, ListeningSequenceModel, SequenceListener, SequenceModel, SequentialModel};
pub use priors::{AlignmentPrior, LabelConsistencyPrior};
pub use schedule::{AnnealingType, CoolingSchedule};
