use std::collections::VecDeque;

use crate::frame::Frame;
use crate::tensor::Tensor;

/// The `channels` most recent frames, oldest first - the agent's view of the game.
#[derive(Clone, Debug)]
pub struct FrameStack {
    height: usize,
    width: usize,
    channels: usize,
    frames: VecDeque<Frame>,
}

impl FrameStack {
    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
    ) -> Self {
        let mut stack = Self {
            height,
            width,
            channels,
            frames: VecDeque::with_capacity(channels),
        };
        stack.clear();
        stack
    }

    /// Fills the stack with blank frames
    pub fn clear(&mut self) {
        self.frames.clear();
        self.frames.extend((0..self.channels).map(|_| Frame::zeros(self.height, self.width)));
    }

    pub fn push(
        &mut self,
        frame: Frame,
    ) {
        debug_assert_eq!((frame.height(), frame.width()), (self.height, self.width));
        if self.frames.len() == self.channels {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn last(&self) -> &Frame {
        self.frames.back().expect("frame stack is never empty")
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Frame> { self.frames.iter() }

    /// Copies the stacked frames into `row` of a state batch
    pub fn write_to(
        &self,
        row: &mut [f32],
    ) {
        let frame_len = self.height * self.width;
        for (k, frame) in self.frames.iter().enumerate() {
            row[k * frame_len..(k + 1) * frame_len].copy_from_slice(frame.pixels());
        }
    }

    /// A batch of one: `[1, channels, height, width]`
    pub fn to_tensor(&self) -> Tensor {
        let mut tensor = Tensor::new(&[1, self.channels, self.height, self.width]);
        self.write_to(tensor.row_mut(0));
        tensor
    }
}
