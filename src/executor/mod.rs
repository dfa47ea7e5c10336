//! Task execution infrastructure.
//!
//! This module provides the worker pool: the messages passed over its queues,
//! the worker loop, the result store and the controller tying them together.

pub mod panic_handler;
pub mod pool;
pub(crate) mod store;
pub mod task;
pub(crate) mod worker;

pub use panic_handler::PanicInfo;
pub use pool::{Overrides, Pool};
pub use task::{FnDescriptor, Handle, TaskFn};
