//! Error types for the server manager

use std::path::PathBuf;
use thiserror::Error;

/// Everything the manager can fail with.
///
/// Store corruption is surfaced unmodified. Process management failures
/// (start/stop/build) are logged where they happen and handed back to the
/// caller, which decides whether to exit.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("server is disabled: {0}")]
    ServerDisabled(String),

    #[error("server not found in configuration: {0}")]
    ServerNotConfigured(String),

    #[error("missing environment variables for {server}: {}", missing.join(", "))]
    MissingEnvironment { server: String, missing: Vec<String> },

    #[error("server {server} failed to start: {reason}")]
    StartFailed { server: String, reason: String },

    #[error("error stopping {server}: {reason}")]
    StopFailed { server: String, reason: String },

    #[error("cannot stop detached server: {0}")]
    CannotStopDetached(String),

    #[error("unsupported method: {0} (expected docker, npx or node)")]
    UnsupportedMethod(String),

    #[error("no Dockerfile or package.json found in {}", .0.display())]
    NoBuildDescriptor(PathBuf),

    #[error("server directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("building {server} failed at `{step}`: {output}")]
    BuildFailed {
        server: String,
        step: String,
        output: String,
    },

    #[error("invalid server name (use alphanumeric, dash, underscore): {0}")]
    InvalidServerName(String),

    #[error("corrupted file {}: {source}", path.display())]
    ConfigCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ManagerError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Short stable label for log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::UnknownServer(_) => "unknown_server",
            Self::ServerDisabled(_) => "server_disabled",
            Self::ServerNotConfigured(_) => "server_not_configured",
            Self::MissingEnvironment { .. } => "missing_environment",
            Self::StartFailed { .. } => "start_failed",
            Self::StopFailed { .. } => "stop_failed",
            Self::CannotStopDetached(_) => "cannot_stop_detached",
            Self::UnsupportedMethod(_) => "unsupported_method",
            Self::NoBuildDescriptor(_) => "no_build_descriptor",
            Self::SourceNotFound(_) => "source_not_found",
            Self::BuildFailed { .. } => "build_failed",
            Self::InvalidServerName(_) => "invalid_server_name",
            Self::ConfigCorrupt { .. } => "config_corrupt",
            Self::Io { .. } => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;
