use anyhow::Result;
use rand::Rng;

use crate::learn::parameter::LearningParameter;
use crate::prelude::QNetwork;
use crate::tensor::Tensor;

/// Piecewise-linear epsilon decay: `epsilon_max` at iteration 0 down to `epsilon_min` at `epsilon_steps`,
/// constant afterwards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpsilonSchedule {
    pub epsilon_max: f64,
    pub epsilon_min: f64,
    pub epsilon_steps: u64,
}

impl EpsilonSchedule {
    pub fn new(
        epsilon_max: f64,
        epsilon_min: f64,
        epsilon_steps: u64,
    ) -> Self {
        assert!(epsilon_max >= epsilon_min, "epsilon_max must not be below epsilon_min");
        Self {
            epsilon_max,
            epsilon_min,
            epsilon_steps,
        }
    }

    pub fn epsilon_at(
        &self,
        iteration: u64,
    ) -> f64 {
        if iteration >= self.epsilon_steps {
            return self.epsilon_min;
        }
        let slope = (self.epsilon_min - self.epsilon_max) / self.epsilon_steps as f64;
        f64::max(self.epsilon_min, slope * iteration as f64 + self.epsilon_max)
    }
}

impl From<&LearningParameter> for EpsilonSchedule {
    fn from(param: &LearningParameter) -> Self { EpsilonSchedule::new(param.epsilon_max, param.epsilon_min, param.epsilon_steps) }
}

/// Epsilon-greedy action selection.
///
/// With probability `epsilon` a uniformly random action index in `[0, action_count)`,
/// otherwise the index of the network's best Q-value for `state` (a batch of one).
pub fn choose_action<N, R>(
    rng: &mut R,
    state: &Tensor,
    epsilon: f64,
    network: &N,
) -> Result<usize>
where
    N: QNetwork + ?Sized,
    R: Rng + ?Sized,
{
    if rng.gen::<f64>() < epsilon {
        Ok(rng.gen_range(0..network.action_count()))
    } else {
        let (_, argmax) = network.max_and_argmax(state)?;
        Ok(argmax[0])
    }
}
