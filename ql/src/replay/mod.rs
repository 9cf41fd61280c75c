pub mod experience_buffer;
pub mod frame_allocator;

pub use experience_buffer::{Experience, ExperienceBuffer, Minibatch};
pub use frame_allocator::{FrameAllocator, FrameStoreError, Slot};
