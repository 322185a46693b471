use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::weights::Weights;
use crate::error::{Error, Result};

/// Regularizer added to the negated log-likelihood.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PriorType {
    None,
    /// Gaussian.
    #[default]
    Quadratic,
    /// Quadratic near zero, linear beyond epsilon.
    Huber,
    Quartic,
}

impl FromStr for PriorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(PriorType::None),
            // handled by other optimizers, so no prior term here
            "lasso" | "ridge" | "ae-lasso" | "sg-lasso" | "g-lasso" => Ok(PriorType::None),
            "quadratic" | "gaussian" => Ok(PriorType::Quadratic),
            "huber" => Ok(PriorType::Huber),
            "quartic" => Ok(PriorType::Quartic),
            _ => Err(Error::UnknownPrior(s.to_string())),
        }
    }
}

impl TryFrom<String> for PriorType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PriorType> for String {
    fn from(p: PriorType) -> Self {
        match p {
            PriorType::None => "none",
            PriorType::Quadratic => "quadratic",
            PriorType::Huber => "huber",
            PriorType::Quartic => "quartic",
        }
        .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prior {
    pub kind: PriorType,
    pub sigma: f64,
    pub epsilon: f64,
}

impl Default for Prior {
    fn default() -> Self {
        Self {
            kind: PriorType::Quadratic,
            sigma: 1.0,
            epsilon: 0.1,
        }
    }
}

impl Prior {
    pub fn new(kind: PriorType, sigma: f64, epsilon: f64) -> Self {
        Self { kind, sigma, epsilon }
    }

    /// Adds `scale` times the prior gradient into `gradient` and returns
    /// `scale` times the prior value.
    pub fn apply(&self, weights: &Weights, gradient: &mut Weights, scale: f64) -> f64 {
        let sigma_sq = self.sigma * self.sigma;
        let mut value = 0.0;
        for (f, row) in weights.iter().enumerate() {
            let Some(grad) = gradient.row_mut(f) else {
                continue;
            };
            for (g, &w) in grad.iter_mut().zip(row) {
                let (v, d) = match self.kind {
                    PriorType::None => (0.0, 0.0),
                    PriorType::Quadratic => (w * w / 2.0 / sigma_sq, w / sigma_sq),
                    PriorType::Huber => {
                        let eps = self.epsilon;
                        if w.abs() < eps {
                            (w * w / 2.0 / eps / sigma_sq, w / eps / sigma_sq)
                        } else {
                            ((w.abs() - eps / 2.0) / sigma_sq, w.signum() / sigma_sq)
                        }
                    }
                    PriorType::Quartic => {
                        let sigma_qu = sigma_sq * sigma_sq;
                        (w * w * w * w / 2.0 / sigma_qu, w / sigma_qu)
                    }
                };
                value += v;
                *g += scale * d;
            }
        }
        scale * value
    }
}
