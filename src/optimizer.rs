//! Adam optimizer over flat parameter and gradient slices

use anyhow::{bail, Result};

/// Optimizer hyperparameters. The fine-tuning run only sets the learning
/// rate; betas and epsilon keep the stock Adam defaults.
#[derive(Debug, Clone)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
}

impl AdamConfig {
    pub fn with_lr(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

/// Adam with bias-corrected first and second moment estimates.
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    m: Vec<f32>,
    v: Vec<f32>,
    t: u32,
}

impl Adam {
    pub fn new(num_params: usize, config: AdamConfig) -> Self {
        Self {
            config,
            m: vec![0.0; num_params],
            v: vec![0.0; num_params],
            t: 0,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.config.learning_rate
    }

    /// Apply one update to `params` from already-unscaled `grads`. Skipped
    /// steps simply never call this, so the moment estimates and timestep
    /// stay untouched on overflow.
    pub fn step(&mut self, params: &mut [f32], grads: &[f32]) -> Result<()> {
        if params.len() != self.m.len() || grads.len() != self.m.len() {
            bail!(
                "optimizer state for {} params, got {} params and {} grads",
                self.m.len(),
                params.len(),
                grads.len()
            );
        }
        self.t += 1;
        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            eps,
        } = self.config;
        let correction1 = 1.0 - beta1.powi(self.t as i32);
        let correction2 = 1.0 - beta2.powi(self.t as i32);

        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = beta1 * self.m[i] + (1.0 - beta1) * g;
            self.v[i] = beta2 * self.v[i] + (1.0 - beta2) * g * g;
            let m_hat = self.m[i] / correction1;
            let v_hat = self.v[i] / correction2;
            params[i] -= learning_rate * m_hat / (v_hat.sqrt() + eps);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_moves_against_gradient() {
        let mut optim = Adam::new(2, AdamConfig::with_lr(0.1));
        let mut params = vec![1.0, -1.0];
        let grads = vec![0.5, -0.5];
        optim.step(&mut params, &grads).unwrap();
        assert!(params[0] < 1.0);
        assert!(params[1] > -1.0);
    }

    #[test]
    fn test_mismatched_sizes_rejected() {
        let mut optim = Adam::new(2, AdamConfig::with_lr(0.1));
        let mut params = vec![0.0; 3];
        assert!(optim.step(&mut params, &[0.0; 3]).is_err());
    }

    #[test]
    fn test_identical_inputs_identical_updates() {
        // two replicas stepping with the same averaged gradient stay in sync
        let mut a = Adam::new(3, AdamConfig::with_lr(0.01));
        let mut b = Adam::new(3, AdamConfig::with_lr(0.01));
        let mut pa = vec![0.3, -0.2, 0.9];
        let mut pb = pa.clone();
        let grads = vec![0.1, 0.2, -0.3];
        for _ in 0..10 {
            a.step(&mut pa, &grads).unwrap();
            b.step(&mut pb, &grads).unwrap();
        }
        assert_eq!(pa, pb);
    }
}
