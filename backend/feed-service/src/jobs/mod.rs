pub mod fanout_dispatcher;
pub mod registry;

pub use fanout_dispatcher::{DispatcherWorker, FanoutDispatcher};
pub use registry::{JobLease, JobRegistry};
