//! Builder - produces a server's image or compiled package from source

use crate::command::{image_name, CommandLine};
use crate::error::{ManagerError, Result};
use crate::registry::validate_server_name;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{error, info};

/// Captured result of one tool invocation
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// The tool's diagnostics, preferring stderr
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs build tools to completion
pub trait Toolchain {
    fn run(&mut self, command: &CommandLine, cwd: &Path) -> io::Result<ToolOutput>;
}

#[derive(Debug, Default)]
pub struct SystemToolchain;

impl Toolchain for SystemToolchain {
    fn run(&mut self, command: &CommandLine, cwd: &Path) -> io::Result<ToolOutput> {
        let output = Command::new(&command.program)
            .args(&command.args)
            .current_dir(cwd)
            .output()?;
        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// What a build produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildArtifact {
    /// Container image tag
    Image(String),
    /// Installed and compiled package in the source directory
    Package(PathBuf),
}

pub struct Builder {
    servers_root: PathBuf,
    toolchain: Box<dyn Toolchain>,
}

impl Builder {
    pub fn new(servers_root: impl Into<PathBuf>) -> Self {
        Self::with_toolchain(servers_root, Box::new(SystemToolchain))
    }

    pub fn with_toolchain(servers_root: impl Into<PathBuf>, toolchain: Box<dyn Toolchain>) -> Self {
        Self {
            servers_root: servers_root.into(),
            toolchain,
        }
    }

    pub fn source_dir(&self, name: &str) -> PathBuf {
        self.servers_root.join(name)
    }

    /// Build `name` from `<servers_root>/<name>`.
    ///
    /// A `Dockerfile` wins over a `package.json`. Package builds run
    /// `npm install` then `npm run build` and stop at the first failure.
    pub fn build(&mut self, name: &str) -> Result<BuildArtifact> {
        validate_server_name(name)?;
        let dir = self.source_dir(name);
        if !dir.is_dir() {
            error!("Server directory not found: {}", dir.display());
            return Err(ManagerError::SourceNotFound(dir));
        }

        if dir.join("Dockerfile").exists() {
            info!("Building Docker image for {name}");
            let image = image_name(name);
            let cmd = CommandLine::new("docker")
                .args(["build", "-t", image.as_str()])
                .arg(dir.to_string_lossy());
            self.run_step(name, &cmd, &dir)?;
            info!("Built Docker image {image}");
            return Ok(BuildArtifact::Image(image));
        }

        if dir.join("package.json").exists() {
            info!("Building npm package for {name}");
            let steps = [
                CommandLine::new("npm").arg("install"),
                CommandLine::new("npm").args(["run", "build"]),
            ];
            for step in &steps {
                self.run_step(name, step, &dir)?;
            }
            info!("Built npm package for {name}");
            return Ok(BuildArtifact::Package(dir));
        }

        error!("No Dockerfile or package.json found for {name}");
        Err(ManagerError::NoBuildDescriptor(dir))
    }

    fn run_step(&mut self, name: &str, cmd: &CommandLine, cwd: &Path) -> Result<()> {
        let failed = |output: String| {
            error!("Error building {name}: {output}");
            ManagerError::BuildFailed {
                server: name.to_string(),
                step: cmd.to_string(),
                output,
            }
        };

        let output = self
            .toolchain
            .run(cmd, cwd)
            .map_err(|e| failed(e.to_string()))?;
        if !output.success {
            return Err(failed(output.diagnostics()));
        }
        Ok(())
    }
}
