//! Requirement registry - the compiled-in catalogue of known servers

use crate::command::Method;
use crate::error::{ManagerError, Result};

/// Ordered command line fragments identifying a running instance of a server.
///
/// A process matches when every fragment occurs in its command line, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchSignature(pub &'static [&'static str]);

impl LaunchSignature {
    pub fn matches(&self, cmdline: &str) -> bool {
        let mut rest = cmdline;
        for fragment in self.0 {
            match rest.find(fragment) {
                Some(idx) => rest = &rest[idx + fragment.len()..],
                None => return false,
            }
        }
        !self.0.is_empty()
    }
}

/// Static description of one managed server
#[derive(Debug, Clone, Copy)]
pub struct ServerSpec {
    pub name: &'static str,
    /// Environment variables that must be set before the server may start
    pub required_env: &'static [&'static str],
    pub default_method: Method,
    /// Whether `ALLOWED_PATHS` is bind-mounted into the container
    pub filesystem_access: bool,
    /// Background servers are always launched detached. Only these carry a
    /// signature, which is what makes them stoppable without a pid.
    pub detached_signature: Option<LaunchSignature>,
}

impl ServerSpec {
    pub fn always_detached(&self) -> bool {
        self.detached_signature.is_some()
    }
}

/// Colon-separated list of host paths the filesystem server may access
pub const ALLOWED_PATHS: &str = "ALLOWED_PATHS";

pub const SERVERS: &[ServerSpec] = &[
    ServerSpec {
        name: "brave-search",
        required_env: &["BRAVE_API_KEY"],
        default_method: Method::Docker,
        filesystem_access: false,
        detached_signature: None,
    },
    ServerSpec {
        name: "github",
        required_env: &["GITHUB_TOKEN"],
        default_method: Method::Docker,
        filesystem_access: false,
        detached_signature: None,
    },
    ServerSpec {
        name: "filesystem",
        required_env: &[ALLOWED_PATHS],
        default_method: Method::Docker,
        filesystem_access: true,
        detached_signature: None,
    },
    ServerSpec {
        name: "fetch",
        required_env: &[],
        default_method: Method::Docker,
        filesystem_access: false,
        detached_signature: None,
    },
    ServerSpec {
        name: "memory",
        required_env: &[],
        default_method: Method::Docker,
        filesystem_access: false,
        detached_signature: None,
    },
    ServerSpec {
        name: "slack",
        required_env: &["SLACK_BOT_TOKEN", "SLACK_APP_TOKEN"],
        default_method: Method::Docker,
        filesystem_access: false,
        detached_signature: None,
    },
    ServerSpec {
        name: "task-manager",
        required_env: &[],
        default_method: Method::Node,
        filesystem_access: false,
        detached_signature: Some(LaunchSignature(&["node", "task-manager", "index.js"])),
    },
];

/// All known servers, in registry order
pub fn all() -> &'static [ServerSpec] {
    SERVERS
}

/// Look up a server by name
pub fn find(name: &str) -> Option<&'static ServerSpec> {
    SERVERS.iter().find(|s| s.name == name)
}

/// Look up a server by name, failing with `UnknownServer`
pub fn lookup(name: &str) -> Result<&'static ServerSpec> {
    find(name).ok_or_else(|| ManagerError::UnknownServer(name.to_string()))
}

/// Validate a server name only contains safe characters before it becomes a path
pub fn validate_server_name(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ManagerError::InvalidServerName(name.to_string()));
    }
    Ok(())
}
