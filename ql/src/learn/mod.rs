pub mod agent;
pub mod frame_stack;
pub mod mailbox;
pub mod parameter;
pub mod policy;
pub mod worker;
