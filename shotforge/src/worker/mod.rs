//! Queue consumers: the processor contract and the leasing worker pool.

pub mod pool;
pub mod processor;

pub use pool::{Worker, WorkerConfig, WorkerEvent};
pub use processor::{JobContext, Processor, ProgressReporter};
