//! Learning rate schedules.
//!
//! The segmentation and classification loops keep the configured rate for
//! every epoch; the detection loop decays it in steps.

use serde::{Deserialize, Serialize};

/// Epoch-indexed learning rate schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LrSchedule {
    /// Same rate every epoch
    Constant { lr: f64 },

    /// `initial_lr * decay_factor^(epoch / step_size)`
    StepDecay {
        initial_lr: f64,
        decay_factor: f64,
        step_size: usize,
    },
}

impl LrSchedule {
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    pub fn step_decay(initial_lr: f64, decay_factor: f64, step_size: usize) -> Self {
        Self::StepDecay {
            initial_lr,
            decay_factor,
            step_size,
        }
    }

    /// Rate for the zero-based `epoch`
    pub fn lr_at(&self, epoch: usize) -> f64 {
        match *self {
            LrSchedule::Constant { lr } => lr,
            LrSchedule::StepDecay {
                initial_lr,
                decay_factor,
                step_size,
            } => {
                let steps = epoch / step_size.max(1);
                initial_lr * decay_factor.powi(steps as i32)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant() {
        let schedule = LrSchedule::constant(1e-4);
        assert_eq!(schedule.lr_at(0), 1e-4);
        assert_eq!(schedule.lr_at(50), 1e-4);
    }

    #[test]
    fn test_step_decay_every_three_epochs() {
        let schedule = LrSchedule::step_decay(0.005, 0.1, 3);
        assert!((schedule.lr_at(0) - 0.005).abs() < 1e-12);
        assert!((schedule.lr_at(2) - 0.005).abs() < 1e-12);
        assert!((schedule.lr_at(3) - 0.0005).abs() < 1e-12);
        assert!((schedule.lr_at(6) - 0.00005).abs() < 1e-12);
    }

    #[test]
    fn test_zero_step_size_does_not_divide_by_zero() {
        let schedule = LrSchedule::step_decay(1.0, 0.5, 0);
        assert!((schedule.lr_at(2) - 0.25).abs() < 1e-12);
    }
}
