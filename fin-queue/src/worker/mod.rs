pub mod processor;
pub mod pool;
pub mod stalled;

pub use processor::{ActiveJob, Processor};
pub use pool::{WorkerHandle, WorkerPool};
pub use stalled::StalledJobChecker;
