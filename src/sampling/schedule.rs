use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AnnealingType {
    /// `T_k = T_0 * (1 - k / N)`
    #[default]
    Linear,
    /// `T_k = T_0 * rate^k`
    Exponential,
}

impl FromStr for AnnealingType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(AnnealingType::Linear),
            "exp" | "exponential" => Ok(AnnealingType::Exponential),
            _ => Err(Error::UnknownAnnealing(s.to_string())),
        }
    }
}

impl TryFrom<String> for AnnealingType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AnnealingType> for String {
    fn from(a: AnnealingType) -> Self {
        match a {
            AnnealingType::Linear => "linear".to_string(),
            AnnealingType::Exponential => "exponential".to_string(),
        }
    }
}

/// Temperatures for a fixed number of annealing sweeps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoolingSchedule {
    kind: AnnealingType,
    start: f64,
    rate: f64,
    iterations: usize,
}

impl CoolingSchedule {
    pub fn linear(start: f64, iterations: usize) -> Self {
        Self {
            kind: AnnealingType::Linear,
            start,
            rate: 0.0,
            iterations,
        }
    }

    pub fn exponential(start: f64, rate: f64, iterations: usize) -> Self {
        Self {
            kind: AnnealingType::Exponential,
            start,
            rate,
            iterations,
        }
    }

    /// Starts at temperature 1.0.
    pub fn new(kind: AnnealingType, rate: f64, iterations: usize) -> Self {
        match kind {
            AnnealingType::Linear => Self::linear(1.0, iterations),
            AnnealingType::Exponential => Self::exponential(1.0, rate, iterations),
        }
    }

    pub fn num_iterations(&self) -> usize {
        self.iterations
    }

    pub fn temperature(&self, iteration: usize) -> f64 {
        match self.kind {
            AnnealingType::Linear => {
                self.start - iteration as f64 * (self.start / self.iterations as f64)
            }
            AnnealingType::Exponential => self.start * self.rate.powi(iteration as i32),
        }
    }
}
