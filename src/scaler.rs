//! Dynamic loss scaling for reduced-precision training
//!
//! The loss is multiplied by a large scale factor before the backward pass so
//! small gradients survive the narrow numeric format. If the scaled gradients
//! overflow, that step's update is skipped and the scale backs off; after
//! enough clean steps the scale grows again. Skipping is a required
//! correctness behavior, not an error.

/// Loss-scale state machine. Constants follow the common GradScaler
/// convention: start at 2^16, halve on overflow, double every 2000 clean
/// steps.
#[derive(Debug, Clone)]
pub struct GradScaler {
    scale: f32,
    growth_factor: f32,
    backoff_factor: f32,
    growth_interval: u32,
    successes: u32,
}

impl GradScaler {
    pub fn new() -> Self {
        Self {
            scale: 65536.0,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2000,
            successes: 0,
        }
    }

    /// Current multiplier applied to the loss before backward.
    pub fn loss_scale(&self) -> f32 {
        self.scale
    }

    /// Divide the gradients back down by the current scale, reporting whether
    /// any non-finite value was found. On overflow the buffer is left as-is;
    /// the caller skips the update and zeroes the gradients anyway.
    pub fn unscale(&self, grads: &mut [f32]) -> bool {
        if grads.iter().any(|g| !g.is_finite()) {
            return true;
        }
        let inv = 1.0 / self.scale;
        for g in grads.iter_mut() {
            *g *= inv;
        }
        false
    }

    /// Advance the state machine after a step. `found_inf` is the result of
    /// [`GradScaler::unscale`] for that step.
    pub fn update(&mut self, found_inf: bool) {
        if found_inf {
            self.scale *= self.backoff_factor;
            self.successes = 0;
        } else {
            self.successes += 1;
            if self.successes >= self.growth_interval {
                self.scale *= self.growth_factor;
                self.successes = 0;
            }
        }
    }
}

impl Default for GradScaler {
    fn default() -> Self {
        Self::new()
    }
}
