// Process module - Core process lifecycle management

pub mod instance;
pub mod launcher;
pub mod monitor;
pub mod restart;
pub mod supervisor;

pub use instance::{InstanceId, InstanceSnapshot, InstanceState, InstanceStats, ProcessInstance};
pub use launcher::{launch, LaunchedChild};
pub use restart::{Backoff, RestartHistory, RestartPolicy};
pub use supervisor::{Supervisor, SupervisorHandle, SupervisorOptions};
