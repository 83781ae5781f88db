//! Command builder - turns a server, a launch method and the stored
//! environment into a concrete command line. Nothing here spawns.

use crate::error::{ManagerError, Result};
use crate::registry::{ServerSpec, ALLOWED_PATHS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How a server is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// `docker run` against a prebuilt image
    Docker,
    /// `npx` fetch-and-execute of a published package
    Npx,
    /// `node` on a local entry-point script
    Node,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Docker => "docker",
            Method::Npx => "npx",
            Method::Node => "node",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(Method::Docker),
            "npx" => Ok(Method::Npx),
            "node" => Ok(Method::Node),
            other => Err(ManagerError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program followed by arguments
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.argv().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if part.contains(&[' ', ';', '&', '|', '>', '<'][..]) {
                write!(f, "'{part}'")?;
            } else {
                f.write_str(part)?;
            }
        }
        Ok(())
    }
}

/// Image tag shared by `docker run` and `docker build`
pub fn image_name(server: &str) -> String {
    format!("mcp/{server}")
}

/// Published package run through npx
pub fn package_name(server: &str) -> String {
    format!("@modelcontextprotocol/server-{server}")
}

/// Build the launch command for `spec` using `method`
pub fn build_command(
    spec: &ServerSpec,
    method: Method,
    env: &BTreeMap<String, String>,
    servers_root: &Path,
) -> CommandLine {
    match method {
        Method::Docker => docker_command(spec, env),
        Method::Npx => CommandLine::new("npx")
            .arg("-y")
            .arg(package_name(spec.name)),
        Method::Node => node_command(spec, servers_root),
    }
}

fn docker_command(spec: &ServerSpec, env: &BTreeMap<String, String>) -> CommandLine {
    let mut cmd = CommandLine::new("docker").args(["run", "-i", "--rm"]);

    // Values are not inlined; docker reads them from the child environment
    for var in spec.required_env {
        if env.contains_key(*var) {
            cmd = cmd.arg("-e").arg(*var);
        }
    }

    if spec.filesystem_access {
        if let Some(paths) = env.get(ALLOWED_PATHS) {
            for path in paths.split(':').filter(|p| !p.is_empty()) {
                cmd = cmd.arg("-v").arg(format!("{path}:{path}"));
            }
        }
    }

    cmd.arg(image_name(spec.name))
}

fn node_command(spec: &ServerSpec, servers_root: &Path) -> CommandLine {
    let server_dir = servers_root.join(spec.name);
    // Background servers ship a compiled entry point
    let entry = if spec.always_detached() {
        server_dir.join("dist").join("index.js")
    } else {
        server_dir.join("index.js")
    };
    CommandLine::new("node").arg(entry.to_string_lossy())
}
