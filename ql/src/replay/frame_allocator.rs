use std::collections::VecDeque;
use std::fmt::{Display, Formatter};

use crate::frame::Frame;

/// Handle of one stored frame: `(chunk index, offset within the chunk)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    chunk: u32,
    offset: u32,
}

impl Slot {
    pub fn chunk(&self) -> usize { self.chunk as usize }

    pub fn offset(&self) -> usize { self.offset as usize }
}

impl Display for Slot {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "({},{})", self.chunk, self.offset)
    }
}

/// Invariant violations of the [FrameAllocator]. None of them occurs in correct operation.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameStoreError {
    InvalidSlot(Slot),
    DoubleFree(Slot),
    ShapeMismatch { expected: (usize, usize), got: (usize, usize) },
    EmptyInsert,
}

impl Display for FrameStoreError {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            FrameStoreError::InvalidSlot(slot) => write!(f, "slot {} is not live", slot),
            FrameStoreError::DoubleFree(slot) => write!(f, "slot {} freed twice", slot),
            FrameStoreError::ShapeMismatch { expected, got } => {
                write!(f, "frame shape {}x{} does not match store shape {}x{}", got.0, got.1, expected.0, expected.1)
            }
            FrameStoreError::EmptyInsert => f.write_str("no frames to insert"),
        }
    }
}

impl std::error::Error for FrameStoreError {}

struct Chunk {
    frames: Vec<f32>,
    free: VecDeque<u32>,
    live: Vec<bool>,
}

impl Chunk {
    fn new(
        chunk_size: usize,
        frame_len: usize,
    ) -> Self {
        Self {
            frames: vec![0.0; chunk_size * frame_len],
            free: (0..chunk_size as u32).collect(),
            live: vec![false; chunk_size],
        }
    }
}

/// Chunked frame pool.
///
/// Frames are copied into chunks of `chunk_size` frames each; callers keep a [Slot] instead of the frame.
/// Chunks are appended when an insert can not be served from the free lists and are never released.
pub struct FrameAllocator {
    chunk_size: usize,
    height: usize,
    width: usize,
    chunks: Vec<Chunk>,
    free_count: usize,
    live_count: usize,
}

impl FrameAllocator {
    pub fn new(
        chunk_size: usize,
        height: usize,
        width: usize,
    ) -> Self {
        assert!(chunk_size > 0);
        assert!(chunk_size <= u32::MAX as usize);
        Self {
            chunk_size,
            height,
            width,
            chunks: vec![],
            free_count: 0,
            live_count: 0,
        }
    }

    fn frame_len(&self) -> usize { self.height * self.width }

    /// Copies each frame into a free storage location and returns their slots (order preserved)
    pub fn insert<'a, I>(
        &mut self,
        frames: I,
    ) -> Result<Vec<Slot>, FrameStoreError>
    where
        I: IntoIterator<Item = &'a Frame>,
        I::IntoIter: ExactSizeIterator,
    {
        let frames = frames.into_iter();
        let count = frames.len();
        if count == 0 {
            return Err(FrameStoreError::EmptyInsert);
        }

        while self.free_count < count {
            self.add_chunk();
        }

        let frame_len = self.frame_len();
        let expected = (self.height, self.width);
        let mut slots = Vec::with_capacity(count);
        let mut chunk_idx = 0;
        for frame in frames {
            let got = (frame.height(), frame.width());
            if got != expected {
                // hand back what was taken so far
                self.free(&slots)?;
                return Err(FrameStoreError::ShapeMismatch { expected, got });
            }
            let offset = loop {
                match self.chunks[chunk_idx].free.pop_front() {
                    Some(offset) => break offset,
                    None => chunk_idx += 1,
                }
            };
            let chunk = &mut self.chunks[chunk_idx];
            let start = offset as usize * frame_len;
            chunk.frames[start..start + frame_len].copy_from_slice(frame.pixels());
            chunk.live[offset as usize] = true;
            self.free_count -= 1;
            self.live_count += 1;
            slots.push(Slot {
                chunk: chunk_idx as u32,
                offset,
            });
        }
        Ok(slots)
    }

    /// Read-only view on the pixels stored at `slot`
    pub fn get(
        &self,
        slot: Slot,
    ) -> Result<&[f32], FrameStoreError> {
        if !self.is_live(slot) {
            return Err(FrameStoreError::InvalidSlot(slot));
        }
        let frame_len = self.frame_len();
        let start = slot.offset() * frame_len;
        Ok(&self.chunks[slot.chunk()].frames[start..start + frame_len])
    }

    /// Marks each slot as free for reuse
    pub fn free(
        &mut self,
        slots: &[Slot],
    ) -> Result<(), FrameStoreError> {
        for &slot in slots {
            let chunk = self.chunks.get_mut(slot.chunk()).ok_or(FrameStoreError::InvalidSlot(slot))?;
            match chunk.live.get_mut(slot.offset()) {
                None => return Err(FrameStoreError::InvalidSlot(slot)),
                Some(live) if !*live => return Err(FrameStoreError::DoubleFree(slot)),
                Some(live) => *live = false,
            }
            chunk.free.push_back(slot.offset);
            self.free_count += 1;
            self.live_count -= 1;
        }
        Ok(())
    }

    pub fn is_live(
        &self,
        slot: Slot,
    ) -> bool {
        self.chunks
            .get(slot.chunk())
            .and_then(|c| c.live.get(slot.offset()))
            .copied()
            .unwrap_or(false)
    }

    /// Number of slots currently holding a frame
    pub fn live_count(&self) -> usize { self.live_count }

    pub fn free_count(&self) -> usize { self.free_count }

    pub fn chunk_count(&self) -> usize { self.chunks.len() }

    pub fn chunk_size(&self) -> usize { self.chunk_size }

    pub fn height(&self) -> usize { self.height }

    pub fn width(&self) -> usize { self.width }

    fn add_chunk(&mut self) {
        log::debug!("frame store grows to {} chunk(s) of {} frames", self.chunks.len() + 1, self.chunk_size);
        self.chunks.push(Chunk::new(self.chunk_size, self.frame_len()));
        self.free_count += self.chunk_size;
    }
}
