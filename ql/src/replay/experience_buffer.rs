use std::collections::VecDeque;

use anyhow::Result;
use rand::Rng;

use crate::frame::Frame;
use crate::prelude::QlError;
use crate::replay::frame_allocator::{FrameAllocator, Slot};
use crate::tensor::Tensor;

pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// One `(window, action, reward, terminal)` training sample.
///
/// The window holds `c+1` consecutive frame slots: the first `c` form the state before the action,
/// the last `c` the state reached by it.
#[derive(Clone, Debug)]
pub struct Experience {
    window: Vec<Slot>,
    action: usize,
    reward: f32,
    terminal: bool,
    // set once the following experience was built on top of this window
    window_shared: bool,
}

impl Experience {
    pub fn window(&self) -> &[Slot] { &self.window }

    pub fn pre_state(&self) -> &[Slot] { &self.window[..self.window.len() - 1] }

    pub fn post_state(&self) -> &[Slot] { &self.window[1..] }

    pub fn action(&self) -> usize { self.action }

    pub fn reward(&self) -> f32 { self.reward }

    pub fn terminal(&self) -> bool { self.terminal }

    /// Slots owned exclusively by this experience, released when it gets evicted.
    ///
    /// When the next experience continues this window, it shares all but the oldest slot.
    /// Otherwise (terminal state, or the episode got cut) the whole window belongs to this one.
    pub fn exclusive_slots(&self) -> &[Slot] {
        if self.window_shared {
            &self.window[..1]
        } else {
            &self.window
        }
    }
}

/// Training data sampled from the [ExperienceBuffer]
pub struct Minibatch {
    /// `[n, c, h, w]`
    pub pre_states: Tensor,
    /// `[n, c, h, w]`
    pub post_states: Tensor,
    /// one-hot `[n, action_count]`
    pub action_mask: Tensor,
    pub rewards: Vec<f32>,
    /// 1.0 for terminal post states, 0.0 otherwise
    pub terminals: Vec<f32>,
}

impl Minibatch {
    pub fn len(&self) -> usize { self.rewards.len() }

    pub fn is_empty(&self) -> bool { self.rewards.is_empty() }
}

/// Experience replay memory as described in
/// [Playing Atari with Deep Reinforcement Learning](https://arxiv.org/abs/1312.5602).
///
/// Keeps at most `capacity` experiences; the oldest one gets evicted first.
/// Frames live in a [FrameAllocator]; experiences reference them by [Slot].
/// Adding an experience takes just one new frame: its window is made of the `c` most recent frames plus the new one,
/// so consecutive experiences of an episode share `c` of their `c+1` frames.
pub struct ExperienceBuffer {
    capacity: usize,
    action_count: usize,
    channels: usize,
    frames: FrameAllocator,
    experiences: VecDeque<Experience>,
    window: VecDeque<Slot>,
    // window slots not referenced by any experience yet
    window_pending: bool,
}

impl ExperienceBuffer {
    pub fn new(
        capacity: usize,
        action_count: usize,
        channels: usize,
        height: usize,
        width: usize,
    ) -> Self {
        Self::with_chunk_size(capacity, action_count, channels, height, width, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(
        capacity: usize,
        action_count: usize,
        channels: usize,
        height: usize,
        width: usize,
        chunk_size: usize,
    ) -> Self {
        assert!(capacity > 0);
        assert!(channels > 0);
        assert!(action_count > 0);
        Self {
            capacity,
            action_count,
            channels,
            frames: FrameAllocator::new(chunk_size, height, width),
            experiences: VecDeque::with_capacity(capacity.min(1 << 20)),
            window: VecDeque::with_capacity(channels + 1),
            window_pending: false,
        }
    }

    pub fn len(&self) -> usize { self.experiences.len() }

    pub fn is_empty(&self) -> bool { self.experiences.is_empty() }

    pub fn capacity(&self) -> usize { self.capacity }

    pub fn allocator(&self) -> &FrameAllocator { &self.frames }

    /// Experiences, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Experience> { self.experiences.iter() }

    /// Starts a new window (e.g. at the beginning of an episode) with the last `c` of the given frames.
    pub fn add_frames<'a, I>(
        &mut self,
        frames: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = &'a Frame>,
    {
        let frames: Vec<&Frame> = frames.into_iter().collect();
        if frames.len() < self.channels {
            return Err(QlError(format!("a window needs {} frames, got {}", self.channels, frames.len())).into());
        }

        if self.window_pending {
            let unreferenced: Vec<Slot> = self.window.drain(..).collect();
            self.frames.free(&unreferenced)?;
        }
        self.window.clear();

        let slots = self.frames.insert(frames[frames.len() - self.channels..].iter().copied())?;
        self.window.extend(slots);
        self.window_pending = true;
        Ok(())
    }

    /// Stores the experience of performing `action` in the current window's state,
    /// which yielded `reward` and the new `frame`.
    pub fn add_experience(
        &mut self,
        frame: &Frame,
        action: usize,
        reward: f32,
        terminal: bool,
    ) -> Result<()> {
        if self.window.len() < self.channels {
            return Err(QlError::from("no open window: add_frames must start an episode before adding experiences").into());
        }
        debug_assert!(action < self.action_count, "action {} out of range", action);

        let continues_window = !self.window_pending;

        let slot = self.frames.insert([frame])?[0];
        self.window.push_back(slot);
        if self.window.len() > self.channels + 1 {
            // the dropped slot is still referenced by the previous experience
            self.window.pop_front();
        }

        if continues_window {
            if let Some(previous) = self.experiences.back_mut() {
                previous.window_shared = true;
            }
        }

        if self.experiences.len() == self.capacity {
            if let Some(oldest) = self.experiences.pop_front() {
                self.frames.free(oldest.exclusive_slots())?;
            }
        }

        self.experiences.push_back(Experience {
            window: self.window.iter().copied().collect(),
            action,
            reward,
            terminal,
            window_shared: false,
        });
        self.window_pending = false;

        if terminal {
            // frames are owned by the terminal experience now; nothing continues from here
            self.window.clear();
        }
        Ok(())
    }

    /// Draws `min(n, len)` distinct experiences uniformly at random.
    /// Returns `None` if the buffer is empty.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        n: usize,
    ) -> Result<Option<Minibatch>> {
        if self.is_empty() {
            return Ok(None);
        }

        let size = n.min(self.len());
        let indices = rand::seq::index::sample(rng, self.len(), size);

        let c = self.channels;
        let frame_len = self.frame_len();
        let state_dims = [size, c, self.frame_height(), self.frame_width()];
        let mut pre_states = Tensor::new(&state_dims);
        let mut post_states = Tensor::new(&state_dims);
        let mut action_mask = Tensor::new(&[size, self.action_count]);
        let mut rewards = Vec::with_capacity(size);
        let mut terminals = Vec::with_capacity(size);

        for (row, idx) in indices.into_iter().enumerate() {
            let experience = &self.experiences[idx];
            for (k, &slot) in experience.pre_state().iter().enumerate() {
                pre_states.row_mut(row)[k * frame_len..(k + 1) * frame_len].copy_from_slice(self.frames.get(slot)?);
            }
            for (k, &slot) in experience.post_state().iter().enumerate() {
                post_states.row_mut(row)[k * frame_len..(k + 1) * frame_len].copy_from_slice(self.frames.get(slot)?);
            }
            action_mask.set(&[row, experience.action], 1.0);
            rewards.push(experience.reward);
            terminals.push(if experience.terminal { 1.0 } else { 0.0 });
        }

        Ok(Some(Minibatch {
            pre_states,
            post_states,
            action_mask,
            rewards,
            terminals,
        }))
    }

    fn frame_len(&self) -> usize { self.frame_height() * self.frame_width() }

    fn frame_height(&self) -> usize { self.frames.height() }

    fn frame_width(&self) -> usize { self.frames.width() }
}
