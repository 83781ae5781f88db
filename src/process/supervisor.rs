//! Process supervisor - starts, stops and reports on managed servers

use super::scan::{ProcessTable, SystemProcessTable};
use super::spawn::{child_environment, ChildProcess, Spawner, SystemSpawner};
use crate::command::{build_command, Method};
use crate::error::{ManagerError, Result};
use crate::registry::{self, ServerSpec};
use crate::settings::{Settings, Timing};
use crate::store::{ConfigStore, EnvStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::thread;
use tracing::{error, info, warn};

/// A server the supervisor launched during this run
pub enum RunningProcess {
    /// Pid retained; pollable and signalable
    Attached(Box<dyn ChildProcess>),
    /// Launched without a handle. Only servers with a launch signature can
    /// be stopped afterwards, by scanning the process table.
    Detached,
}

impl fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningProcess::Attached(child) => write!(f, "Attached({})", child.id()),
            RunningProcess::Detached => f.write_str("Detached"),
        }
    }
}

/// Reported state of one server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    NotConfigured,
    Disabled,
    Running,
    Crashed,
    Stopped,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::NotConfigured => "not_configured",
            ServerStatus::Disabled => "disabled",
            ServerStatus::Running => "running",
            ServerStatus::Crashed => "crashed",
            ServerStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    AlreadyRunning,
    Attached { pid: u32 },
    Detached,
}

/// Result of a successful `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was tracked under that name
    NotRunning,
    /// Exited after SIGTERM (or had already exited)
    Terminated,
    /// Needed SIGKILL after the polling window
    Killed,
    /// Detached server stopped by scan; zero means no match was found
    Scanned { matched: usize },
}

/// Owns the live process map and both persisted stores.
///
/// Dropping the supervisor runs [`Supervisor::shutdown`], so attached
/// children never outlive the scope that owns it. Detached ones do.
pub struct Supervisor {
    config: ConfigStore,
    env: EnvStore,
    servers_root: PathBuf,
    log_dir: PathBuf,
    timing: Timing,
    spawner: Box<dyn Spawner>,
    table: Box<dyn ProcessTable>,
    processes: BTreeMap<String, RunningProcess>,
}

impl Supervisor {
    /// Open the stores named by `settings` with the real OS backends
    pub fn open(settings: &Settings) -> Result<Self> {
        Self::with_backends(
            settings,
            Box::new(SystemSpawner),
            Box::new(SystemProcessTable::new()),
        )
    }

    pub fn with_backends(
        settings: &Settings,
        spawner: Box<dyn Spawner>,
        table: Box<dyn ProcessTable>,
    ) -> Result<Self> {
        let config = ConfigStore::load(settings.config_path())?;
        let env = EnvStore::load(settings.env_path())?;
        Ok(Self {
            config,
            env,
            servers_root: settings.servers_root.clone(),
            log_dir: settings.log_dir(),
            timing: settings.timing,
            spawner,
            table,
            processes: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn env(&self) -> &EnvStore {
        &self.env
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    pub fn enable(&mut self, name: &str, method: Method) -> Result<()> {
        self.config.enable(name, method)
    }

    /// Disable `name`, stopping it first if this supervisor launched it
    pub fn disable(&mut self, name: &str) -> Result<()> {
        self.config.disable(name)?;
        if self.is_tracked(name) {
            if let Err(e) = self.stop(name) {
                warn!("{name} disabled but still running: {e}");
            }
        }
        Ok(())
    }

    pub fn set_env(&mut self, name: &str, value: &str) -> Result<()> {
        self.env.set(name, value)
    }

    pub fn get_env(&self, name: &str) -> Option<&str> {
        self.env.get(name)
    }

    pub fn check_env(&self, server: &str) -> Result<(bool, Vec<String>)> {
        self.env.check(server)
    }

    /// Start `name`. Servers that are always detached ignore `detach = false`.
    pub fn start(&mut self, name: &str, detach: bool) -> Result<Launch> {
        let spec = registry::lookup(name)?;

        if let Some(process) = self.processes.get_mut(name) {
            let exited = match process {
                RunningProcess::Attached(child) => child.has_exited().unwrap_or(true),
                RunningProcess::Detached => false,
            };
            if !exited {
                warn!("Server already running: {name}");
                return Ok(Launch::AlreadyRunning);
            }
            warn!("Discarding handle of exited {name}");
            self.processes.remove(name);
        }

        let method = match self.config.entry(name) {
            Some(entry) if entry.enabled => entry.method,
            _ => {
                error!("Server is disabled: {name}");
                return Err(ManagerError::ServerDisabled(name.to_string()));
            }
        };

        let (_, missing) = self.env.check(name)?;
        if !missing.is_empty() {
            error!(
                "Missing environment variables for {name}: {}",
                missing.join(", ")
            );
            return Err(ManagerError::MissingEnvironment {
                server: name.to_string(),
                missing,
            });
        }

        let command = build_command(spec, method, self.env.vars(), &self.servers_root);
        let env = child_environment(self.env.vars());
        info!("Starting {name} server with command: {command}");

        if detach || spec.always_detached() {
            let log_path = self.log_dir.join(format!("{name}.log"));
            self.spawner
                .spawn_detached(&command, &env, &log_path)
                .map_err(|e| start_failed(name, e.to_string()))?;
            self.processes
                .insert(name.to_string(), RunningProcess::Detached);
            info!(
                "Started {name} server in background mode, output in {}",
                log_path.display()
            );
            return Ok(Launch::Detached);
        }

        let mut child = self
            .spawner
            .spawn_attached(&command, &env)
            .map_err(|e| start_failed(name, e.to_string()))?;

        // Catch servers that die straight away (bad image, missing module)
        thread::sleep(self.timing.start_grace());
        match child.has_exited() {
            Ok(false) => {}
            Ok(true) => {
                let stderr = child.take_stderr();
                let reason = match stderr.trim() {
                    "" => "process exited immediately".to_string(),
                    s => s.to_string(),
                };
                return Err(start_failed(name, reason));
            }
            Err(e) => {
                // The handle is about to be dropped, so it must not outlive it
                if let Err(kill_err) = child.kill() {
                    warn!("Failed to kill unpollable {name} (PID {}): {kill_err}", child.id());
                }
                return Err(start_failed(name, format!("cannot poll process: {e}")));
            }
        }

        let pid = child.id();
        self.processes
            .insert(name.to_string(), RunningProcess::Attached(child));
        info!("Started {name} server with PID {pid}");
        Ok(Launch::Attached { pid })
    }

    /// Stop `name` if this supervisor is tracking it
    pub fn stop(&mut self, name: &str) -> Result<StopOutcome> {
        let Some(process) = self.processes.remove(name) else {
            warn!("Server not running: {name}");
            return Ok(StopOutcome::NotRunning);
        };

        match process {
            RunningProcess::Attached(mut child) => match self.stop_attached(name, &mut *child) {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    // Keep the handle so a later stop or shutdown can retry
                    self.processes
                        .insert(name.to_string(), RunningProcess::Attached(child));
                    Err(e)
                }
            },
            RunningProcess::Detached => {
                let signature = registry::find(name).and_then(|spec| spec.detached_signature);
                match signature {
                    Some(signature) => {
                        info!("Stopping detached {name} server");
                        Ok(self.stop_by_scan(name, &signature))
                    }
                    None => {
                        warn!("Cannot stop detached server: {name}");
                        self.processes
                            .insert(name.to_string(), RunningProcess::Detached);
                        Err(ManagerError::CannotStopDetached(name.to_string()))
                    }
                }
            }
        }
    }

    fn stop_attached(&self, name: &str, child: &mut dyn ChildProcess) -> Result<StopOutcome> {
        let pid = child.id();
        let stop_failed = |e: std::io::Error| {
            error!("Error stopping {name} server: {e}");
            ManagerError::StopFailed {
                server: name.to_string(),
                reason: e.to_string(),
            }
        };

        // Signalling a reaped pid could hit an unrelated process
        if child.has_exited().map_err(stop_failed)? {
            info!("Server {name} (PID {pid}) had already exited");
            return Ok(StopOutcome::Terminated);
        }

        info!("Stopping {name} server (PID {pid})");
        child.terminate().map_err(stop_failed)?;

        for _ in 0..self.timing.stop_poll_attempts {
            if child.has_exited().map_err(stop_failed)? {
                info!("Stopped {name} server");
                return Ok(StopOutcome::Terminated);
            }
            thread::sleep(self.timing.stop_poll_interval());
        }

        if child.has_exited().map_err(stop_failed)? {
            info!("Stopped {name} server");
            return Ok(StopOutcome::Terminated);
        }

        warn!("Process did not terminate gracefully, killing {name}");
        child.kill().map_err(stop_failed)?;
        info!("Stopped {name} server");
        Ok(StopOutcome::Killed)
    }

    fn stop_by_scan(&mut self, name: &str, signature: &registry::LaunchSignature) -> StopOutcome {
        let pids = self.table.find(signature);
        if pids.is_empty() {
            warn!("No matching processes found for {name}");
        }
        for pid in &pids {
            match self.table.terminate(*pid) {
                Ok(()) => info!("Killed process {pid}"),
                Err(e) => warn!("Failed to kill process {pid}: {e}"),
            }
        }
        info!("Stopped {name} server");
        StopOutcome::Scanned {
            matched: pids.len(),
        }
    }

    /// Stop everything tracked, attached or detached. Failures are logged
    /// and skipped.
    pub fn stop_all(&mut self) {
        let names: Vec<String> = self.processes.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.stop(&name) {
                error!("Failed to stop {name}: {e}");
            }
        }
    }

    /// Stop every attached child. Detached servers are left running.
    pub fn shutdown(&mut self) {
        let names: Vec<String> = self
            .processes
            .iter()
            .filter(|(_, p)| matches!(p, RunningProcess::Attached(_)))
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            if let Err(e) = self.stop(&name) {
                error!("Failed to stop {name} during shutdown: {e}");
            }
        }
    }

    /// Status of every registered server, in registry order
    pub fn status(&mut self) -> Vec<(&'static str, ServerStatus)> {
        registry::all()
            .iter()
            .map(|spec| (spec.name, self.resolve_status(spec)))
            .collect()
    }

    pub fn status_of(&mut self, name: &str) -> Result<ServerStatus> {
        let spec = registry::lookup(name)?;
        Ok(self.resolve_status(spec))
    }

    fn resolve_status(&mut self, spec: &ServerSpec) -> ServerStatus {
        match self.config.entry(spec.name) {
            None => return ServerStatus::NotConfigured,
            Some(entry) if !entry.enabled => return ServerStatus::Disabled,
            Some(_) => {}
        }
        match self.processes.get_mut(spec.name) {
            None => ServerStatus::Stopped,
            // Optimistic: there is nothing to poll
            Some(RunningProcess::Detached) => ServerStatus::Running,
            Some(RunningProcess::Attached(child)) => match child.has_exited() {
                Ok(false) => ServerStatus::Running,
                Ok(true) | Err(_) => ServerStatus::Crashed,
            },
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn start_failed(name: &str, reason: String) -> ManagerError {
    error!("Server {name} failed to start: {reason}");
    ManagerError::StartFailed {
        server: name.to_string(),
        reason,
    }
}
