use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::objective::Objective;
use crate::error::Result;

/// Turns an objective into fitted weights.
pub trait Trainer {
    fn train(&mut self, objective: &dyn Objective, initial: Vec<f64>) -> Result<Vec<f64>>;
}

/// Fixed-step gradient descent that halves its step whenever the value goes up.
///
/// Enough to fit small models end to end; not a substitute for a
/// quasi-Newton optimizer on real corpora.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientDescent {
    pub learning_rate: f64,
    pub max_iterations: usize,
    /// Stop once the relative improvement falls below this.
    pub tolerance: f64,
}

impl Default for GradientDescent {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_iterations: 100,
            tolerance: 1e-5,
        }
    }
}

impl Trainer for GradientDescent {
    fn train(&mut self, objective: &dyn Objective, initial: Vec<f64>) -> Result<Vec<f64>> {
        let begin = Instant::now();
        let n = objective.domain_dimension();
        let mut x = initial;
        let mut g = vec![0.0; n];
        let mut fx = objective.objective_and_gradients(&x, &mut g)?;
        let mut step = self.learning_rate;
        log::info!("gradient descent (dimension: {n}, step: {step}, max iterations: {})", self.max_iterations);

        for k in 1..=self.max_iterations {
            let candidate: Vec<f64> = x.iter().zip(&g).map(|(x, g)| x - step * g).collect();
            let mut cg = vec![0.0; n];
            let fc = objective.objective_and_gradients(&candidate, &mut cg)?;
            if fc > fx {
                step /= 2.0;
                log::debug!("iteration {k}: value went up ({fc:.6} > {fx:.6}), step -> {step}");
                if step < 1e-12 {
                    break;
                }
                continue;
            }
            let improvement = (fx - fc) / fx.abs().max(1.0);
            x = candidate;
            g = cg;
            fx = fc;
            let gnorm = g.iter().map(|v| v * v).sum::<f64>().sqrt();
            log::info!("***** iteration #{k} ***** loss: {fx:.6}, gnorm: {gnorm:.6}, step: {step}");
            if improvement < self.tolerance {
                break;
            }
        }
        log::info!("training took: {:?}", begin.elapsed());
        Ok(x)
    }
}
