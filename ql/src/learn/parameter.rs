use serde::{Deserialize, Serialize};

use crate::prelude::{ActionId, DatasetId};
use crate::replay::experience_buffer::DEFAULT_CHUNK_SIZE;

/// All parameters of an agent, persisted alongside it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentParameter {
    pub network: NetworkParameter,
    pub optimizer: OptimizerParameter,
    pub playing: PlayingParameter,
    pub learning: LearningParameter,
    pub testing: TestingParameter,
    pub state: RunningState,
}

impl AgentParameter {
    /// Default parameters for a game with the given minimal action set and screen size
    pub fn for_game(
        actions: Vec<ActionId>,
        height: usize,
        width: usize,
    ) -> Self {
        let mut param = Self::default();
        param.network.height = height;
        param.network.width = width;
        param.network.action_count = actions.len();
        param.network.actions = actions;
        param
    }

    /// Dimensions of one state `[channels, height, width]`
    pub fn state_shape(&self) -> [usize; 3] { [self.network.channels, self.network.height, self.network.width] }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkParameter {
    /// Frames per state
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    /// Action identifiers, indexed by the network's outputs
    pub actions: Vec<ActionId>,
    pub action_count: usize,
}

impl Default for NetworkParameter {
    fn default() -> Self {
        Self {
            channels: 4,
            height: 84,
            width: 84,
            actions: vec![],
            action_count: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizerParameter {
    pub name: String,
    pub epsilon: f32,
    pub momentum: f32,
    pub decay: f32,
    pub learning_rate: f32,
}

impl Default for OptimizerParameter {
    fn default() -> Self {
        Self {
            name: "RMSProp".to_string(),
            epsilon: 1e-6,
            momentum: 0.0,
            decay: 0.99,
            learning_rate: 0.000_25,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayingParameter {
    /// Number of times an action is repeated
    pub action_repeat: usize,
    /// Upper bound of random actions performed at the start of a game
    pub max_wait: usize,
    /// Experiences to observe before training starts
    pub observation_threshold: usize,
}

impl Default for PlayingParameter {
    fn default() -> Self {
        Self {
            action_repeat: 4,
            max_wait: 30,
            observation_threshold: 5_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LearningParameter {
    /// Capacity of the replay memory
    pub replay_capacity: usize,
    /// Frames per allocation chunk of the replay memory
    pub frame_chunk_size: usize,
    pub max_reward: f32,
    pub min_reward: f32,
    /// Discount rate; (0 <= 𝛾 <= 1) represents the value of future rewards
    pub discount: f32,
    pub epsilon_max: f64,
    pub epsilon_min: f64,
    /// Iteration at which epsilon reaches its minimum
    pub epsilon_steps: u64,
    pub batch_size: usize,
}

impl LearningParameter {
    /// Maps a raw reward to the learning reward by its sign: `max_reward` if positive,
    /// `min_reward` if negative, 0 otherwise.
    pub fn clip_reward(
        &self,
        reward: f32,
    ) -> f32 {
        if reward > 0.0 {
            self.max_reward
        } else if reward < 0.0 {
            self.min_reward
        } else {
            0.0
        }
    }
}

impl Default for LearningParameter {
    fn default() -> Self {
        Self {
            replay_capacity: 200_000,
            frame_chunk_size: DEFAULT_CHUNK_SIZE,
            max_reward: 1.0,
            min_reward: -1.0,
            discount: 0.95,
            epsilon_max: 1.0,
            epsilon_min: 0.1,
            epsilon_steps: 1_000_000,
            batch_size: 32,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestingParameter {
    /// Test every n training iterations
    pub epoch: u64,
    pub epsilon: f64,
    /// Environment steps per test
    pub iterations: usize,
    pub set_min: usize,
    pub set_max: usize,
    pub set_id: Option<DatasetId>,
}

impl Default for TestingParameter {
    fn default() -> Self {
        Self {
            epoch: 50_000,
            epsilon: 0.05,
            iterations: 10_000,
            set_min: 5_000,
            set_max: 5_000,
            set_id: None,
        }
    }
}

/// Running counters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningState {
    /// Training iterations performed
    pub iteration: u64,
    /// Games finished during training
    pub games: u64,
    /// Average cost over all iterations
    pub cost: f64,
    /// Average score over all games
    pub score: f64,
}

impl RunningState {
    pub fn record_cost(
        &mut self,
        cost: f32,
    ) {
        let it = self.iteration as f64;
        self.cost = self.cost * (it / (it + 1.0)) + cost as f64 / (it + 1.0);
    }

    pub fn record_game(
        &mut self,
        score: f32,
    ) {
        let g = self.games as f64;
        self.score = self.score * (g / (g + 1.0)) + score as f64 / (g + 1.0);
        self.games += 1;
    }
}
