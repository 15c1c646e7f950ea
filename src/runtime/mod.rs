//! Execution: runtime values, bytecode, the coroutine VM and the performer
//! that drives it block by block.

pub mod inputs;
pub mod ops;
pub mod performer;
pub mod value;
pub mod vm;

pub use performer::{OutputEvent, Performer};
pub use value::Value;
