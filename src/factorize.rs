//! In-process latent-factor oracle, used when no external oracle command is
//! configured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::OracleError;
use crate::matrix::Matrix;
use crate::oracle::ScoringOracle;

#[derive(Debug, Clone)]
pub struct FactorizationOracle {
    pub features: usize,
    pub steps: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    pub tolerance: f64,
    pub seed: u64,
}

impl FactorizationOracle {
    pub fn new(seed: u64) -> Self {
        Self {
            features: 3,
            steps: 5000,
            learning_rate: 0.0002,
            regularization: 0.02,
            tolerance: 0.001,
            seed,
        }
    }

    /// Gradient descent over the observed (non-zero) cells, then the full
    /// product of user and item factors. Returns `None` once `cancelled` is
    /// set; the flag is checked before every step.
    pub fn factorize(&self, input: &Matrix, cancelled: &AtomicBool) -> Option<Matrix> {
        let (users, items) = input.shape();
        let k = self.features;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut p: Vec<Vec<f64>> = (0..users)
            .map(|_| (0..k).map(|_| rng.gen::<f64>()).collect())
            .collect();
        let mut q: Vec<Vec<f64>> = (0..items)
            .map(|_| (0..k).map(|_| rng.gen::<f64>()).collect())
            .collect();

        let observed: Vec<(usize, usize, f64)> = (0..users)
            .flat_map(|i| (0..items).map(move |j| (i, j)))
            .map(|(i, j)| (i, j, input.get(i, j)))
            .filter(|&(_, _, value)| value > 0.0)
            .collect();

        let (alpha, beta) = (self.learning_rate, self.regularization);
        for _ in 0..self.steps {
            if cancelled.load(Ordering::Relaxed) {
                return None;
            }
            for &(i, j, value) in &observed {
                let error = value - dot(&p[i], &q[j]);
                for f in 0..k {
                    p[i][f] += alpha * (2.0 * error * q[j][f] - beta * p[i][f]);
                    q[j][f] += alpha * (2.0 * error * p[i][f] - beta * q[j][f]);
                }
            }

            let loss: f64 = observed
                .iter()
                .map(|&(i, j, value)| {
                    let penalty: f64 = (0..k)
                        .map(|f| (beta / 2.0) * (p[i][f].powi(2) + q[j][f].powi(2)))
                        .sum();
                    (value - dot(&p[i], &q[j])).powi(2) + penalty
                })
                .sum();
            if loss < self.tolerance {
                break;
            }
        }

        let mut predicted = Matrix::zeros(users, items);
        for i in 0..users {
            for j in 0..items {
                predicted.set(i, j, dot(&p[i], &q[j]));
            }
        }
        Some(predicted)
    }

    /// Runs `factorize` on the blocking pool. Dropping the returned future,
    /// as a timeout does, sets `cancelled` and stops the blocking task.
    async fn factorize_blocking(
        &self,
        input: &Matrix,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Matrix, OracleError> {
        let _cancel = CancelOnDrop(Arc::clone(&cancelled));
        let oracle = self.clone();
        let input = input.clone();
        tokio::task::spawn_blocking(move || oracle.factorize(&input, &cancelled))
            .await
            .map_err(|err| OracleError::Task(err.to_string()))?
            .ok_or_else(|| OracleError::Task("factorization cancelled".to_string()))
    }
}

struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl ScoringOracle for FactorizationOracle {
    fn name(&self) -> &str {
        "factorization"
    }

    async fn predict(&self, input: &Matrix) -> Result<Matrix, OracleError> {
        self.factorize_blocking(input, Arc::new(AtomicBool::new(false)))
            .await
    }
}
