//! Process management for MCP servers

pub mod scan;
pub mod spawn;
pub mod supervisor;

pub use scan::{ProcessTable, SystemProcessTable};
pub use spawn::{child_environment, ChildProcess, Spawner, SystemChild, SystemSpawner};
pub use supervisor::{Launch, RunningProcess, ServerStatus, StopOutcome, Supervisor};
