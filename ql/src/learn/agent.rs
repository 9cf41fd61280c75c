use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use itertools::Itertools;
use num_format::ToFormattedString;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::learn::frame_stack::FrameStack;
use crate::learn::mailbox::ProcessingFlag;
use crate::learn::parameter::AgentParameter;
use crate::learn::policy::{choose_action, EpsilonSchedule};
use crate::learn::worker::Trainer;
use crate::prelude::{AgentId, Environment, NetworkId, PersistenceStore, QNetwork, QlError, Telemetry};
use crate::replay::{ExperienceBuffer, Minibatch};
use crate::tensor::Tensor;
use crate::util::format;

pub const AGENT_KIND: &str = "DeepMindAgent";

pub const TEST_GROUP: &str = "Test";
pub const SERIES_Q_AVERAGE: &str = "Q Average";
pub const SERIES_Q_MAX_AVERAGE: &str = "Q Max Average";
pub const SERIES_SCORE: &str = "Average score";
pub const SERIES_REWARD: &str = "Average reward";

const TEST_SET_CHUNK: usize = 1_000;
const TEST_SET_SAMPLE_PROBABILITY: f64 = 0.25;
const WAIT_RETRY_DECREMENT: usize = 5;
const PROGRESS_LOG_INTERVAL: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Warmup,
    Train,
    Test,
    Replay,
    Stopped,
}

/// Which network to load along with an agent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkSelection {
    Latest,
    Id(NetworkId),
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TestReport {
    pub epoch: u64,
    pub q_average: f32,
    pub q_max_average: f32,
    pub score: f32,
    pub reward: f32,
    pub games: usize,
}

/// Deep Q-learning agent: plays an [Environment], learns from an [ExperienceBuffer] and evaluates itself
/// every `testing.epoch` iterations.
///
/// Training runs through the phases `Warmup` -> `Train` <-> `Test` and ends with `Stopped` as soon as
/// the [ProcessingFlag] is lowered. The flag is checked before every environment step and at every
/// episode boundary; callers driving the agent without an [crate::learn::worker::AgentHandle] raise it
/// through [Agent::processing] first.
pub struct Agent<E, N, P, T> {
    name: String,
    id: AgentId,
    param: AgentParameter,
    environment: E,
    network: N,
    store: P,
    telemetry: T,
    network_id: Option<NetworkId>,
    replay_memory: Option<ExperienceBuffer>,
    test_set: Option<Tensor>,
    input: FrameStack,
    rng: StdRng,
    processing: ProcessingFlag,
    phase: Phase,
    series_registered: bool,
}

impl<E, N, P, T> Agent<E, N, P, T>
where
    E: Environment,
    N: QNetwork,
    P: PersistenceStore,
    T: Telemetry,
{
    /// Registers a new agent with default parameters for the environment's game and saves its initial network.
    pub fn create(
        name: &str,
        environment: E,
        network: N,
        store: P,
        telemetry: T,
    ) -> Result<Self> {
        let (height, width) = environment.screen_size();
        let param = AgentParameter::for_game(environment.minimal_action_set(), height, width);
        Self::create_with(name, param, environment, network, store, telemetry)
    }

    /// Same as [Self::create] with explicit parameters
    pub fn create_with(
        name: &str,
        param: AgentParameter,
        environment: E,
        network: N,
        mut store: P,
        telemetry: T,
    ) -> Result<Self> {
        let id = store.create_agent(name, AGENT_KIND, &param)?;
        let mut agent = Self::assemble(name, id, param, environment, network, store, telemetry)?;
        agent.save_network()?;
        log::info!("created agent '{}' (id {})", name, id);
        Ok(agent)
    }

    /// Loads a stored agent and, depending on `network`, one of its saved networks
    pub fn load(
        id: AgentId,
        network: NetworkSelection,
        environment: E,
        network_impl: N,
        store: P,
        telemetry: T,
    ) -> Result<Self> {
        let param = store.load_agent_params(id)?;
        let mut agent = Self::assemble(&format!("agent-{}", id), id, param, environment, network_impl, store, telemetry)?;
        match network {
            NetworkSelection::Latest => agent.load_network(None)?,
            NetworkSelection::Id(network_id) => agent.load_network(Some(network_id))?,
            NetworkSelection::None => (),
        }
        log::info!(
            "loaded agent {} at iteration {}",
            id,
            agent.param.state.iteration.to_formatted_string(&format::number_format())
        );
        Ok(agent)
    }

    fn assemble(
        name: &str,
        id: AgentId,
        param: AgentParameter,
        environment: E,
        network: N,
        store: P,
        telemetry: T,
    ) -> Result<Self> {
        if network.action_count() != param.network.action_count || param.network.actions.len() != param.network.action_count {
            return Err(QlError(format!(
                "network has {} outputs, but the agent knows {} action(s) {:?}",
                network.action_count(),
                param.network.action_count,
                param.network.actions
            ))
            .into());
        }
        if environment.screen_size() != (param.network.height, param.network.width) {
            return Err(QlError(format!(
                "environment screen size {:?} does not match the agent's {}x{}",
                environment.screen_size(),
                param.network.height,
                param.network.width
            ))
            .into());
        }
        let input = FrameStack::new(param.network.channels, param.network.height, param.network.width);
        Ok(Self {
            name: name.to_string(),
            id,
            param,
            environment,
            network,
            store,
            telemetry,
            network_id: None,
            replay_memory: None,
            test_set: None,
            input,
            rng: StdRng::from_entropy(),
            processing: ProcessingFlag::default(),
            phase: Phase::Idle,
            series_registered: false,
        })
    }

    pub fn with_rng(
        mut self,
        rng: StdRng,
    ) -> Self {
        self.rng = rng;
        self
    }

    /// Shares `processing` with whoever should be able to stop the agent
    pub fn with_processing(
        mut self,
        processing: ProcessingFlag,
    ) -> Self {
        self.processing = processing;
        self
    }

    pub fn id(&self) -> AgentId { self.id }

    pub fn param(&self) -> &AgentParameter { &self.param }

    pub fn phase(&self) -> Phase { self.phase }

    pub fn network_id(&self) -> Option<NetworkId> { self.network_id }

    pub fn environment(&self) -> &E { &self.environment }

    pub fn network(&self) -> &N { &self.network }

    pub fn store(&self) -> &P { &self.store }

    pub fn telemetry(&self) -> &T { &self.telemetry }

    /// Dissolves the agent, handing back its store
    pub fn into_store(self) -> P { self.store }

    pub fn replay_memory(&self) -> Option<&ExperienceBuffer> { self.replay_memory.as_ref() }

    pub fn test_set(&self) -> Option<&Tensor> { self.test_set.as_ref() }

    pub fn processing(&self) -> ProcessingFlag { self.processing.clone() }

    /// Trains until the processing flag is lowered.
    ///
    /// Fills the replay memory and builds the fixed test set first, if that did not happen yet.
    pub fn train(&mut self) -> Result<()> {
        let result = self.initialize_replay().and_then(|_| {
            if self.test_set.is_none() && self.processing.should_continue() {
                self.initialize_test_set()?;
            }
            self.train_loop()
        });
        self.phase = Phase::Stopped;
        log::info!("agent '{}' stopped at iteration {}", self.name, self.param.state.iteration);
        result
    }

    fn train_loop(&mut self) -> Result<()> {
        let start = Instant::now();
        let schedule = EpsilonSchedule::from(&self.param.learning);

        while self.processing.should_continue() {
            self.phase = Phase::Train;
            self.new_game(self.param.playing.max_wait)?;
            opened(&mut self.replay_memory)?.add_frames(self.input.iter())?;

            let mut score = 0.0;
            let mut game_over = false;
            while !game_over && self.processing.should_continue() {
                let epsilon = schedule.epsilon_at(self.param.state.iteration);
                let action = choose_action(&mut self.rng, &self.input.to_tensor(), epsilon, &self.network)?;
                let raw_reward = self.perform_action(action)?;
                self.update_input()?;
                game_over = self.environment.game_over();
                score += raw_reward;
                let reward = self.param.learning.clip_reward(raw_reward);
                opened(&mut self.replay_memory)?.add_experience(self.input.last(), action, reward, game_over)?;

                let Some(cost) = self.learn()? else { continue };
                self.param.state.record_cost(cost);
                self.param.state.iteration += 1;

                let iteration = self.param.state.iteration;
                if iteration % PROGRESS_LOG_INTERVAL == 0 {
                    self.progress_log(start, epsilon, cost);
                }
                if iteration % self.param.testing.epoch.max(1) == 0 {
                    self.learning_update_log();
                    self.save_agent()?;
                    self.save_network()?;
                    self.test()?;
                    break;
                }
            }

            if game_over {
                self.param.state.record_game(score);
            }
        }
        Ok(())
    }

    /// One gradient step on a sampled minibatch. Returns the loss.
    fn learn(&mut self) -> Result<Option<f32>> {
        let batch_size = self.param.learning.batch_size;
        let replay_memory = self
            .replay_memory
            .as_ref()
            .ok_or_else(|| QlError::from("replay memory not initialized"))?;
        let Some(batch) = replay_memory.sample(&mut self.rng, batch_size)? else {
            return Ok(None);
        };
        let (max_future_q, _) = self.network.max_and_argmax(&batch.post_states)?;
        let targets = q_targets(&batch, &max_future_q, self.param.learning.discount);
        let cost = self.network.gradient_step(&batch.pre_states, &batch.action_mask, &targets)?;
        Ok(Some(cost))
    }

    /// Plays random games until the replay memory holds `observation_threshold` experiences
    pub fn initialize_replay(&mut self) -> Result<()> {
        self.phase = Phase::Warmup;
        if self.replay_memory.is_none() {
            let network = &self.param.network;
            self.replay_memory = Some(ExperienceBuffer::with_chunk_size(
                self.param.learning.replay_capacity,
                network.action_count,
                network.channels,
                network.height,
                network.width,
                self.param.learning.frame_chunk_size,
            ));
        }

        let threshold = self
            .param
            .playing
            .observation_threshold
            .min(self.param.learning.replay_capacity);
        if self.replay_len() >= threshold {
            return Ok(());
        }
        log::info!("filling replay memory with {} observations", threshold.to_formatted_string(&format::number_format()));

        let start = Instant::now();
        let action_count = self.param.network.action_count;
        while self.replay_len() < threshold && self.processing.should_continue() {
            self.new_game(self.param.playing.max_wait)?;
            opened(&mut self.replay_memory)?.add_frames(self.input.iter())?;
            let mut game_over = false;
            while !game_over && self.replay_len() < threshold && self.processing.should_continue() {
                let action = self.rng.gen_range(0..action_count);
                let raw_reward = self.perform_action(action)?;
                self.update_input()?;
                game_over = self.environment.game_over();
                let reward = self.param.learning.clip_reward(raw_reward);
                opened(&mut self.replay_memory)?.add_experience(self.input.last(), action, reward, game_over)?;
            }
        }
        log::info!(
            "replay memory holds {} observations [{}]",
            self.replay_len().to_formatted_string(&format::number_format()),
            format::elapsed(start.elapsed())
        );
        Ok(())
    }

    /// Provides the fixed set of states used to track Q-values across tests.
    ///
    /// Takes the dataset referenced by the parameters, else a stored one of matching shape and size,
    /// else records a new one from random play and stores it.
    pub fn initialize_test_set(&mut self) -> Result<()> {
        log::info!("initializing test set");
        if let Some(id) = self.param.testing.set_id {
            self.test_set = Some(self.store.load_dataset(id)?);
            return Ok(());
        }

        let shape = self.param.state_shape();
        let candidates = self
            .store
            .list_datasets(&shape, self.param.testing.set_min, self.param.testing.set_max)?;
        if let Some(&(id, size)) = candidates.first() {
            log::info!("reusing test set {} ({} states)", id, size);
            self.param.testing.set_id = Some(id);
            self.test_set = Some(self.store.load_dataset(id)?);
            return Ok(());
        }

        let size = self.param.testing.set_min;
        let [channels, height, width] = shape;
        let mut set = Tensor::new(&[size, channels, height, width]);
        let action_count = self.param.network.action_count;
        let mut collected = 0;
        while collected < size {
            if !self.processing.should_continue() {
                log::info!("test set recording interrupted after {} states", collected);
                return Ok(());
            }
            self.new_game(self.param.playing.max_wait)?;
            while collected < size && !self.environment.game_over() && self.processing.should_continue() {
                if self.rng.gen_bool(TEST_SET_SAMPLE_PROBABILITY) {
                    self.input.write_to(set.row_mut(collected));
                    collected += 1;
                }
                let action = self.rng.gen_range(0..action_count);
                self.perform_action(action)?;
                self.update_input()?;
            }
        }

        let id = self.store.new_dataset(&set)?;
        log::info!("recorded test set {} ({} states)", id, size);
        self.param.testing.set_id = Some(id);
        self.test_set = Some(set);
        Ok(())
    }

    /// Evaluates the current network: Q statistics over the test set and `testing.iterations` steps of
    /// nearly greedy play. Results go to telemetry and the store.
    ///
    /// Returns `None` if a stop request interrupted the test; nothing is reported in that case.
    pub fn test(&mut self) -> Result<Option<TestReport>> {
        let previous_phase = self.phase;
        self.phase = Phase::Test;
        let report = self.run_test();
        self.phase = previous_phase;
        report
    }

    fn run_test(&mut self) -> Result<Option<TestReport>> {
        let start = Instant::now();
        let epoch = self.param.state.iteration / self.param.testing.epoch.max(1);
        log::info!("testing (epoch {})", epoch);
        self.register_series();

        let (q_average, q_max_average) = self.test_set_q_statistics()?;

        let iterations = self.param.testing.iterations;
        let epsilon = self.param.testing.epsilon;
        let mut score = 0.0;
        let mut reward = 0.0;
        let mut games = 0;
        let mut step = 0;
        while step < iterations {
            self.new_game(0)?;
            while step < iterations && !self.environment.game_over() {
                if !self.processing.should_continue() {
                    log::info!("test interrupted");
                    return Ok(None);
                }
                let action = choose_action(&mut self.rng, &self.input.to_tensor(), epsilon, &self.network)?;
                let raw_reward = self.perform_action(action)?;
                self.update_input()?;
                score += raw_reward;
                reward += self.param.learning.clip_reward(raw_reward);
                step += 1;
            }
            games += 1;
        }

        let report = TestReport {
            epoch,
            q_average,
            q_max_average,
            score: score / games.max(1) as f32,
            reward: reward / games.max(1) as f32,
            games,
        };
        log::info!(
            "test done [{}]: Q avg {:.4}, Q max avg {:.4}, score {:.2}, reward {:.2} over {} game(s)",
            format::elapsed(start.elapsed()),
            report.q_average,
            report.q_max_average,
            report.score,
            report.reward,
            report.games
        );
        self.report(&report)?;
        Ok(Some(report))
    }

    /// Average Q-value and average best Q-value over the test set
    fn test_set_q_statistics(&self) -> Result<(f32, f32)> {
        let Some(set) = self.test_set.as_ref().filter(|s| !s.is_empty()) else {
            return Ok((0.0, 0.0));
        };
        let mut q_sum = 0.0;
        let mut q_max_sum = 0.0;
        for start in (0..set.len()).step_by(TEST_SET_CHUNK) {
            let chunk = set.rows(start..start + TEST_SET_CHUNK);
            let (q, q_max) = self.network.mean_and_max_mean(&chunk)?;
            q_sum += q * chunk.len() as f32;
            q_max_sum += q_max * chunk.len() as f32;
        }
        Ok((q_sum / set.len() as f32, q_max_sum / set.len() as f32))
    }

    fn register_series(&mut self) {
        if self.series_registered {
            return;
        }
        for name in [SERIES_Q_AVERAGE, SERIES_Q_MAX_AVERAGE, SERIES_SCORE, SERIES_REWARD] {
            self.telemetry.register_series(TEST_GROUP, name, 1);
        }
        self.series_registered = true;
    }

    fn report(
        &mut self,
        report: &TestReport,
    ) -> Result<()> {
        let values = [
            (SERIES_Q_AVERAGE, report.q_average),
            (SERIES_Q_MAX_AVERAGE, report.q_max_average),
            (SERIES_SCORE, report.score),
            (SERIES_REWARD, report.reward),
        ];
        for (series, value) in values {
            self.telemetry
                .append_point(TEST_GROUP, series, report.epoch as f64, &[value as f64]);
        }
        if let Some(network_id) = self.network_id {
            for (series, value) in values {
                self.store
                    .append_stat(self.id, network_id, series, report.epoch, value as f64)?;
            }
        }
        Ok(())
    }

    /// Plays one game with the given (or latest) network and the test epsilon.
    /// Writes every screen into `record_dir`, if present.
    ///
    /// Returns the raw score and the clipped reward of the game.
    pub fn replay(
        &mut self,
        network: Option<NetworkId>,
        record_dir: Option<&Path>,
    ) -> Result<(f32, f32)> {
        let previous_phase = self.phase;
        self.phase = Phase::Replay;
        let result = self.play_replay(network, record_dir);
        self.phase = previous_phase;
        result
    }

    fn play_replay(
        &mut self,
        network: Option<NetworkId>,
        record_dir: Option<&Path>,
    ) -> Result<(f32, f32)> {
        self.load_network(network)?;
        self.new_game(0)?;
        let epsilon = self.param.testing.epsilon;
        let mut score = 0.0;
        let mut reward = 0.0;
        while !self.environment.game_over() {
            let action = choose_action(&mut self.rng, &self.input.to_tensor(), epsilon, &self.network)?;
            let raw_reward = self.perform_action(action)?;
            score += raw_reward;
            reward += self.param.learning.clip_reward(raw_reward);
            if let Some(dir) = record_dir {
                self.environment.save_frame(dir)?;
            }
            self.update_input()?;
        }
        log::info!("replay finished with score {} (reward {})", score, reward);
        Ok((score, reward))
    }

    /// Resets the game and performs a random number (`0..=max_wait`) of random actions,
    /// capturing the screens of the last `channels` of them.
    fn new_game(
        &mut self,
        max_wait: usize,
    ) -> Result<()> {
        let channels = self.param.network.channels;
        let mut wait_bound = max_wait;
        'retry: loop {
            self.input.clear();
            self.environment.reset()?;
            let wait = self.rng.gen_range(0..=wait_bound);

            let mut performed = 0;
            while performed < wait.saturating_sub(channels) {
                self.perform_random_action()?;
                performed += 1;
                if self.environment.game_over() {
                    wait_bound = retry_wait_bound(performed, wait_bound);
                    continue 'retry;
                }
            }
            self.update_input()?;
            while performed < wait {
                self.perform_random_action()?;
                self.update_input()?;
                performed += 1;
                if self.environment.game_over() {
                    wait_bound = retry_wait_bound(performed, wait_bound);
                    continue 'retry;
                }
            }
            return Ok(());
        }
    }

    fn perform_random_action(&mut self) -> Result<f32> {
        let action = self.rng.gen_range(0..self.param.network.action_count);
        self.perform_action(action)
    }

    /// Repeats the action `action_repeat` times or until the game is over; returns the summed raw reward.
    fn perform_action(
        &mut self,
        action: usize,
    ) -> Result<f32> {
        let action_id = self.param.network.actions[action];
        let mut reward = 0.0;
        for _ in 0..self.param.playing.action_repeat.max(1) {
            reward += self.environment.act(action_id)?;
            if self.environment.game_over() {
                break;
            }
        }
        Ok(reward)
    }

    fn update_input(&mut self) -> Result<()> {
        self.input.push(self.environment.screen()?);
        Ok(())
    }

    fn save_agent(&mut self) -> Result<()> { self.store.update_agent_params(self.id, &self.param) }

    fn save_network(&mut self) -> Result<()> {
        let blob = self.network.snapshot()?;
        let info = self.param.state.iteration.to_string();
        let network_id = self.store.save_network_snapshot(self.id, &info, &blob)?;
        log::debug!("saved network {} of agent {} ({} bytes)", network_id, self.id, blob.len());
        self.network_id = Some(network_id);
        Ok(())
    }

    fn load_network(
        &mut self,
        network: Option<NetworkId>,
    ) -> Result<()> {
        let (network_id, blob) = self.store.load_network(self.id, network)?;
        self.network.restore(&blob)?;
        self.network_id = Some(network_id);
        log::info!("loaded network {} of agent {}", network_id, self.id);
        Ok(())
    }

    fn replay_len(&self) -> usize { self.replay_memory.as_ref().map_or(0, ExperienceBuffer::len) }

    fn progress_log(
        &self,
        start: Instant,
        epsilon: f64,
        cost: f32,
    ) {
        let number_format = format::number_format();
        let state = &self.param.state;
        log::info!(
            "{} - it: {} - score: {:.2} - 𝜀={:.4} - cost avg: {:.6} - cost: {:.6} - games: {}",
            format::elapsed(start.elapsed()),
            state.iteration.to_formatted_string(&number_format),
            state.score,
            epsilon,
            state.cost,
            cost,
            state.games.to_formatted_string(&number_format)
        );
    }

    fn learning_update_log(&self) {
        let Some(replay_memory) = self.replay_memory.as_ref() else {
            return;
        };
        let number_format = format::number_format();

        let mut action_counts = FxHashMap::<usize, usize>::default();
        for experience in replay_memory.iter() {
            action_counts
                .entry(experience.action())
                .and_modify(|e| *e += 1)
                .or_insert(1);
        }

        let total_actions = replay_memory.len();
        let action_distribution_line = action_counts
            .iter()
            .sorted()
            .map(|(&action, &count)| {
                let ratio = 100.0 * count as f32 / total_actions as f32;
                format!("{} {:.1}%", self.param.network.actions[action], ratio)
            })
            .join(", ");

        log::info!(
            "\n\
    iteration: {}, games: {}, 𝛾={:.2}, score avg: {:.2}, frames: {} in {} chunk(s) of {} ({} free)\n\
    action_distribution (of last {}): {}",
            self.param.state.iteration.to_formatted_string(&number_format),
            self.param.state.games.to_formatted_string(&number_format),
            self.param.learning.discount,
            self.param.state.score,
            replay_memory.allocator().live_count().to_formatted_string(&number_format),
            replay_memory.allocator().chunk_count(),
            replay_memory.allocator().chunk_size().to_formatted_string(&number_format),
            replay_memory.allocator().free_count().to_formatted_string(&number_format),
            total_actions.to_formatted_string(&number_format),
            action_distribution_line
        );
    }
}

fn opened(replay_memory: &mut Option<ExperienceBuffer>) -> Result<&mut ExperienceBuffer> {
    replay_memory
        .as_mut()
        .ok_or_else(|| QlError::from("replay memory not initialized").into())
}

fn retry_wait_bound(
    performed: usize,
    wait_bound: usize,
) -> usize {
    let reduced = wait_bound.saturating_sub(WAIT_RETRY_DECREMENT);
    log::warn!("game over after {} start action(s); retrying with a wait bound of {}", performed, reduced);
    reduced
}

/// `y = r + (1 - terminal) * discount * max_future_q` for every experience of the batch
pub fn q_targets(
    batch: &Minibatch,
    max_future_q: &[f32],
    discount: f32,
) -> Vec<f32> {
    batch
        .rewards
        .iter()
        .zip(&batch.terminals)
        .zip(max_future_q)
        .map(|((&r, &t), &q)| r + (1.0 - t) * discount * q)
        .collect()
}

impl<E, N, P, T> Trainer for Agent<E, N, P, T>
where
    E: Environment + Send + 'static,
    N: QNetwork + Send + 'static,
    P: PersistenceStore + Send + 'static,
    T: Telemetry + Send + 'static,
{
    fn name(&self) -> String { self.name.clone() }

    fn processing(&self) -> ProcessingFlag { self.processing.clone() }

    fn train(&mut self) -> Result<()> { Agent::train(self) }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use crate::test::fixed_q_network::FixedQNetwork;
    use crate::test::memory_store::MemoryStore;
    use crate::test::pixel_test_environment::PixelTestEnvironment;
    use crate::test::recording_telemetry::RecordingTelemetry;

    use super::*;

    type TestAgent = Agent<PixelTestEnvironment, FixedQNetwork, MemoryStore, RecordingTelemetry>;

    const Q_VALUES: [f32; 4] = [0.1, 0.9, 0.3, 0.5];

    fn small_parameter(environment: &PixelTestEnvironment) -> AgentParameter {
        let (height, width) = environment.screen_size();
        let mut param = AgentParameter::for_game(environment.minimal_action_set(), height, width);
        param.network.channels = 2;
        param.playing.action_repeat = 1;
        param.playing.max_wait = 4;
        param.playing.observation_threshold = 20;
        param.learning.replay_capacity = 50;
        param.learning.frame_chunk_size = 16;
        param.learning.batch_size = 4;
        param.learning.epsilon_steps = 100;
        param.testing.epoch = 10;
        param.testing.iterations = 8;
        param.testing.set_min = 5;
        param.testing.set_max = 10;
        param
    }

    fn agent(environment: PixelTestEnvironment) -> TestAgent {
        agent_with(environment, MemoryStore::new(), ProcessingFlag::default())
    }

    fn agent_with(
        environment: PixelTestEnvironment,
        store: MemoryStore,
        processing: ProcessingFlag,
    ) -> TestAgent {
        let param = small_parameter(&environment);
        Agent::create_with(
            "test",
            param,
            environment,
            FixedQNetwork::new(Q_VALUES.to_vec()),
            store,
            RecordingTelemetry::new(),
        )
        .unwrap()
        .with_rng(StdRng::seed_from_u64(42))
        .with_processing(processing)
    }

    #[test]
    fn test_create_registers_agent_and_initial_network() {
        let agent = agent(PixelTestEnvironment::new(2, 2, 7));
        assert_eq!(agent.id(), 1);
        assert_eq!(agent.network_id(), Some(1));
        assert_eq!(agent.phase(), Phase::Idle);
        assert_eq!(agent.store().agents[0].kind, AGENT_KIND);
        assert_eq!(agent.store().networks.len(), 1);
        assert_eq!(agent.store().networks[0].info, "0");
    }

    #[test]
    fn test_create_uses_environment_defaults() -> Result<()> {
        let environment = PixelTestEnvironment::new(3, 5, 7);
        let agent = Agent::create(
            "defaults",
            environment,
            FixedQNetwork::new(Q_VALUES.to_vec()),
            MemoryStore::new(),
            RecordingTelemetry::new(),
        )?;
        let network = &agent.param().network;
        assert_eq!((network.height, network.width), (3, 5));
        assert_eq!(network.actions, vec![0, 1, 3, 4]);
        assert_eq!(network.action_count, 4);
        assert_eq!(network.channels, 4);
        Ok(())
    }

    #[test]
    fn test_create_rejects_network_of_wrong_size() {
        let environment = PixelTestEnvironment::new(2, 2, 7);
        let result = Agent::create(
            "broken",
            environment,
            FixedQNetwork::new(vec![0.0, 1.0]),
            MemoryStore::new(),
            RecordingTelemetry::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_warmup_fills_replay_memory_without_learning() -> Result<()> {
        let mut agent = agent(PixelTestEnvironment::new(2, 2, 7));
        agent.processing().start();
        agent.initialize_replay()?;

        let replay_memory = agent.replay_memory().unwrap();
        assert_eq!(replay_memory.len(), 20);
        assert!(replay_memory.iter().any(|e| e.terminal()));
        assert!(replay_memory.iter().all(|e| e.reward() <= 1.0));
        assert_eq!(agent.network().gradient_calls(), 0);
        assert_eq!(agent.phase(), Phase::Warmup);
        assert!(agent.environment().resets() >= 3);
        Ok(())
    }

    #[test]
    fn test_warmup_stores_rewards_by_sign() -> Result<()> {
        let mut agent = agent(PixelTestEnvironment::new(2, 2, 7).with_reward(0.25, 2));
        agent.processing().start();
        agent.initialize_replay()?;

        let rewards: Vec<f32> = agent.replay_memory().unwrap().iter().map(|e| e.reward()).collect();
        assert!(rewards.contains(&1.0));
        assert!(rewards.iter().all(|&r| r == 0.0 || r == 1.0));
        Ok(())
    }

    #[test]
    fn test_new_game_retries_with_reduced_wait_bound() -> Result<()> {
        let mut agent = agent(PixelTestEnvironment::new(2, 2, 3));
        for _ in 0..20 {
            agent.new_game(30)?;
            assert!(!agent.environment().game_over());
        }
        Ok(())
    }

    #[test]
    fn test_new_game_without_wait_starts_from_blank_input() -> Result<()> {
        let mut agent = agent(PixelTestEnvironment::new(2, 2, 7));
        agent.new_game(0)?;
        assert_eq!(agent.environment().total_steps(), 0);
        let frames: Vec<f32> = agent.input.iter().map(|f| f.pixels()[0]).collect();
        assert_eq!(frames, vec![0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_perform_action_repeats_until_game_over() -> Result<()> {
        let mut agent = agent(PixelTestEnvironment::new(2, 2, 5).with_reward(1.0, 1));
        agent.param.playing.action_repeat = 4;
        agent.environment.reset()?;
        assert_eq!(agent.perform_action(2)?, 4.0);
        assert_eq!(agent.perform_action(2)?, 1.0);
        assert!(agent.environment().game_over());
        Ok(())
    }

    #[test]
    fn test_q_targets() {
        let batch = Minibatch {
            pre_states: Tensor::new(&[2, 1, 1, 1]),
            post_states: Tensor::new(&[2, 1, 1, 1]),
            action_mask: Tensor::new(&[2, 2]),
            rewards: vec![1.0, 0.5],
            terminals: vec![0.0, 1.0],
        };
        assert_eq!(q_targets(&batch, &[2.0, 3.0], 0.5), vec![2.0, 0.5]);
    }

    #[test]
    fn test_records_new_test_set() -> Result<()> {
        let mut agent = agent(PixelTestEnvironment::new(2, 2, 7));
        agent.processing().start();
        agent.initialize_test_set()?;

        assert_eq!(agent.param().testing.set_id, Some(1));
        assert_eq!(agent.test_set().unwrap().dims(), &[5, 2, 2, 2]);
        assert_eq!(agent.store().datasets.len(), 1);
        Ok(())
    }

    #[test]
    fn test_reuses_stored_test_set() -> Result<()> {
        let mut store = MemoryStore::new();
        store.new_dataset(&Tensor::new(&[30, 2, 2, 2]))?;
        store.new_dataset(&Tensor::new(&[6, 2, 2, 2]))?;
        let mut agent = agent_with(PixelTestEnvironment::new(2, 2, 7), store, ProcessingFlag::default());
        agent.initialize_test_set()?;

        assert_eq!(agent.param().testing.set_id, Some(2));
        assert_eq!(agent.test_set().unwrap().len(), 6);
        assert_eq!(agent.store().datasets.len(), 2);
        assert_eq!(agent.environment().total_steps(), 0);
        Ok(())
    }

    #[test]
    fn test_training_reports_test_epochs() -> Result<()> {
        let processing = ProcessingFlag::default();
        let environment = PixelTestEnvironment::new(2, 2, 7).stop_after(400, processing.clone());
        let mut agent = agent_with(environment, MemoryStore::new(), processing.clone());
        processing.start();
        agent.train()?;

        assert_eq!(agent.phase(), Phase::Stopped);
        let state = &agent.param().state;
        assert!(state.iteration >= 10);
        assert!(state.games > 0);
        assert_eq!(agent.network().gradient_calls() as u64, state.iteration);
        assert!(agent.network().last_targets().iter().all(|&y| y <= 1.0 + 0.95 * 0.9 + 1e-6));

        let q_points = agent.telemetry().points_of(TEST_GROUP, SERIES_Q_AVERAGE);
        assert!(!q_points.is_empty());
        for (i, point) in q_points.iter().enumerate() {
            assert_eq!(point.x, (i + 1) as f64);
            assert!((point.values[0] - 0.45).abs() < 1e-6);
        }
        let max_points = agent.telemetry().points_of(TEST_GROUP, SERIES_Q_MAX_AVERAGE);
        assert!((max_points[0].values[0] - 0.9).abs() < 1e-6);
        assert_eq!(agent.telemetry().series().len(), 4);

        let store = agent.store();
        assert_eq!(store.stats_of(SERIES_SCORE).len(), q_points.len());
        assert_eq!(store.stats_of(SERIES_REWARD)[0].epoch, 1);
        assert!(store.networks.len() > q_points.len());
        let saved_iteration = store.agents[0].params.state.iteration;
        assert!(saved_iteration >= 10 && saved_iteration % 10 == 0);
        assert_eq!(store.datasets.len(), 1);
        Ok(())
    }

    #[test]
    fn test_stopped_agent_does_not_play() -> Result<()> {
        let mut agent = agent(PixelTestEnvironment::new(2, 2, 7));
        agent.train()?;
        assert_eq!(agent.phase(), Phase::Stopped);
        assert_eq!(agent.replay_memory().map(|m| m.len()), Some(0));
        assert!(agent.test_set().is_none());
        assert_eq!(agent.environment().total_steps(), 0);
        Ok(())
    }

    #[test]
    fn test_interrupted_test_reports_nothing() -> Result<()> {
        let mut agent = agent(PixelTestEnvironment::new(2, 2, 7));
        assert_eq!(agent.test()?, None);
        assert!(agent.telemetry().points().is_empty());
        assert!(agent.store().stats.is_empty());
        Ok(())
    }

    #[test]
    fn test_replay_plays_one_game() -> Result<()> {
        let mut agent = agent(PixelTestEnvironment::new(2, 2, 6));
        let (score, reward) = agent.replay(None, None)?;
        assert_eq!(score, 4.0);
        assert_eq!(reward, 2.0);
        assert_eq!(agent.phase(), Phase::Idle);
        assert_eq!(agent.param().state.iteration, 0);
        Ok(())
    }

    #[test]
    fn test_replay_recording_needs_environment_support() {
        let mut agent = agent(PixelTestEnvironment::new(2, 2, 6));
        assert!(agent.replay(None, Some(Path::new("/tmp"))).is_err());
    }

    #[test]
    fn test_load_restores_latest_network() -> Result<()> {
        let store = agent(PixelTestEnvironment::new(2, 2, 7)).into_store();
        let agent = Agent::load(
            1,
            NetworkSelection::Latest,
            PixelTestEnvironment::new(2, 2, 7),
            FixedQNetwork::new(vec![0.0; 4]),
            store,
            RecordingTelemetry::new(),
        )?;
        assert_eq!(agent.network().q_values(), &Q_VALUES);
        assert_eq!(agent.network_id(), Some(1));
        assert_eq!(agent.param().network.channels, 2);
        Ok(())
    }

    #[test]
    fn test_load_without_network() -> Result<()> {
        let store = agent(PixelTestEnvironment::new(2, 2, 7)).into_store();
        let agent = Agent::load(
            1,
            NetworkSelection::None,
            PixelTestEnvironment::new(2, 2, 7),
            FixedQNetwork::new(vec![0.0; 4]),
            store,
            RecordingTelemetry::new(),
        )?;
        assert_eq!(agent.network().q_values(), &[0.0; 4]);
        assert_eq!(agent.network_id(), None);
        Ok(())
    }
}
