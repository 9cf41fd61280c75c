pub mod frame;
pub mod learn;
pub mod prelude;
pub mod replay;
pub mod tensor;
pub mod util;

pub mod test;
