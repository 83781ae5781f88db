//! mcp-manager library - launch and supervise MCP servers

pub mod builder;
pub mod command;
pub mod error;
pub mod process;
pub mod registry;
pub mod settings;
pub mod store;

// Re-export commonly used types
pub use builder::{BuildArtifact, Builder, Toolchain, ToolOutput};
pub use command::{build_command, CommandLine, Method};
pub use error::{ManagerError, Result};
pub use process::{Launch, ServerStatus, StopOutcome, Supervisor};
pub use settings::{Settings, Timing};
pub use store::{ConfigStore, EnvStore, ServerEntry};
