use std::fmt::{Display, Formatter};
use std::path::Path;

use anyhow::Result;

use crate::frame::Frame;
use crate::learn::parameter::AgentParameter;
use crate::tensor::Tensor;

/// Identifier of an action as understood by the game emulator
pub type ActionId = i32;

pub type AgentId = u64;
pub type NetworkId = u64;
pub type DatasetId = u64;

/// Learning environment, modeling the world of a learning agent.
///
/// Screens are expected to be pre-scaled to the configured height/width and normalized to `[0, 1]`.
pub trait Environment {
    /// Resets the game to a defined starting point
    fn reset(&mut self) -> Result<()>;

    /// Performs one time/action-step and returns the raw reward earned during that step
    fn act(
        &mut self,
        action: ActionId,
    ) -> Result<f32>;

    /// Whether the game reached a terminal state
    fn game_over(&self) -> bool;

    /// Current screen (grayscale, scaled, normalized)
    fn screen(&self) -> Result<Frame>;

    /// The minimal set of legal actions for the loaded game
    fn minimal_action_set(&self) -> Vec<ActionId>;

    /// Output screen size as `(height, width)`
    fn screen_size(&self) -> (usize, usize);

    /// Writes the current screen as an image file into `folder`.
    fn save_frame(
        &self,
        folder: &Path,
    ) -> Result<()> {
        Err(QlError(format!("environment can not record frames to {}", folder.display())).into())
    }
}

/// 'Physical' Q-value network abstraction.
///
/// States are passed as tensors of shape `[n, channels, height, width]`.
pub trait QNetwork {
    /// Number of outputs (= number of actions)
    fn action_count(&self) -> usize;

    /// Q-values for each state; tensor of shape `[n, action_count]`
    fn forward(
        &self,
        states: &Tensor,
    ) -> Result<Tensor>;

    /// Best Q-value and the index of the action yielding it, for each state
    fn max_and_argmax(
        &self,
        states: &Tensor,
    ) -> Result<(Vec<f32>, Vec<usize>)> {
        let q = self.forward(states)?;
        Ok((0..q.len()).map(|i| q.row_max(i)).map(|(a, v)| (v, a)).unzip())
    }

    /// Mean over all Q-values and mean over the per-state maximum Q-value
    fn mean_and_max_mean(
        &self,
        states: &Tensor,
    ) -> Result<(f32, f32)> {
        let q = self.forward(states)?;
        if q.is_empty() {
            return Ok((0.0, 0.0));
        }
        let mean = q.data().iter().sum::<f32>() / q.data().len() as f32;
        let max_mean = (0..q.len()).map(|i| q.row_max(i).1).sum::<f32>() / q.len() as f32;
        Ok((mean, max_mean))
    }

    /// Performs a single training step using a batch of data.
    ///
    /// # Arguments
    /// * `states` Tensor `[n, channels, height, width]`
    /// * `action_mask` one-hot Tensor `[n, action_count]`
    /// * `targets` updated Q-values, one per state
    ///
    /// # Returns
    ///   calculated loss
    fn gradient_step(
        &mut self,
        states: &Tensor,
        action_mask: &Tensor,
        targets: &[f32],
    ) -> Result<f32>;

    /// Serialized parameters
    fn snapshot(&self) -> Result<Vec<u8>>;

    fn restore(
        &mut self,
        blob: &[u8],
    ) -> Result<()>;
}

/// Storage for agents, their networks, statistics and reusable datasets
pub trait PersistenceStore {
    fn create_agent(
        &mut self,
        name: &str,
        kind: &str,
        params: &AgentParameter,
    ) -> Result<AgentId>;

    fn update_agent_params(
        &mut self,
        agent: AgentId,
        params: &AgentParameter,
    ) -> Result<()>;

    fn load_agent_params(
        &self,
        agent: AgentId,
    ) -> Result<AgentParameter>;

    fn save_network_snapshot(
        &mut self,
        agent: AgentId,
        info: &str,
        blob: &[u8],
    ) -> Result<NetworkId>;

    /// Loads the network `network` of the agent or the latest saved one if `None`
    fn load_network(
        &self,
        agent: AgentId,
        network: Option<NetworkId>,
    ) -> Result<(NetworkId, Vec<u8>)>;

    fn append_stat(
        &mut self,
        agent: AgentId,
        network: NetworkId,
        series: &str,
        epoch: u64,
        value: f64,
    ) -> Result<()>;

    /// Datasets with the given per-item shape holding between `min_size` and `max_size` items
    fn list_datasets(
        &self,
        shape: &[usize],
        min_size: usize,
        max_size: usize,
    ) -> Result<Vec<(DatasetId, usize)>>;

    fn new_dataset(
        &mut self,
        data: &Tensor,
    ) -> Result<DatasetId>;

    fn load_dataset(
        &self,
        id: DatasetId,
    ) -> Result<Tensor>;
}

/// Fire-and-forget sink for plotted series
pub trait Telemetry {
    fn register_series(
        &self,
        group: &str,
        name: &str,
        line_count: usize,
    );

    fn append_point(
        &self,
        group: &str,
        name: &str,
        x: f64,
        values: &[f64],
    );
}

/// [Telemetry] writing every point to the log
#[derive(Default, Clone, Copy)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn register_series(
        &self,
        group: &str,
        name: &str,
        line_count: usize,
    ) {
        log::debug!("telemetry series {}/{} registered ({} line(s))", group, name, line_count);
    }

    fn append_point(
        &self,
        group: &str,
        name: &str,
        x: f64,
        values: &[f64],
    ) {
        log::info!("{}/{} @ {}: {:?}", group, name, x, values);
    }
}

#[derive(Debug)]
pub struct QlError(pub String);

impl QlError {
    pub fn from(msg: &str) -> Self { QlError(msg.to_string()) }
}

impl Display for QlError {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for QlError {}
