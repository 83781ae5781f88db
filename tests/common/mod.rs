//! Fakes for the process seams plus isolated settings

#![allow(dead_code)]

use mcp_manager::process::{ChildProcess, ProcessTable, Spawner};
use mcp_manager::registry::LaunchSignature;
use mcp_manager::{CommandLine, Settings, Supervisor, Timing};
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Settings rooted in a temp dir with near-zero waits
pub fn test_settings(dir: &TempDir) -> Settings {
    Settings {
        state_dir: dir.path().join("state"),
        servers_root: PathBuf::from("/srv/mcp-servers"),
        timing: Timing {
            start_grace_ms: 0,
            stop_poll_interval_ms: 1,
            stop_poll_attempts: 3,
        },
    }
}

#[derive(Debug, Default)]
pub struct SpawnState {
    pub attached: Vec<(CommandLine, BTreeMap<OsString, OsString>)>,
    pub detached: Vec<(CommandLine, PathBuf)>,
    pub alive: HashMap<u32, bool>,
    pub terminated: Vec<u32>,
    pub killed: Vec<u32>,
    next_pid: u32,

    /// Next spawn fails with this error message
    pub fail_spawn: Option<String>,
    /// Next attached child exits at once with this stderr
    pub exit_immediately: Option<String>,
    /// Children survive SIGTERM
    pub ignore_sigterm: bool,
    /// Signalling fails
    pub signal_error: bool,
    /// Liveness checks fail
    pub poll_error: bool,
}

impl SpawnState {
    /// Simulate a child exiting on its own
    pub fn crash(&mut self, pid: u32) {
        self.alive.insert(pid, false);
    }

    fn allocate_pid(&mut self) -> u32 {
        self.next_pid += 1;
        1000 + self.next_pid
    }
}

pub type Shared<T> = Arc<Mutex<T>>;

pub struct FakeSpawner {
    state: Shared<SpawnState>,
}

impl FakeSpawner {
    pub fn new() -> (Self, Shared<SpawnState>) {
        let state = Arc::new(Mutex::new(SpawnState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl Spawner for FakeSpawner {
    fn spawn_attached(
        &mut self,
        command: &CommandLine,
        env: &BTreeMap<OsString, OsString>,
    ) -> io::Result<Box<dyn ChildProcess>> {
        let mut state = self.state.lock().unwrap();
        if let Some(msg) = state.fail_spawn.take() {
            return Err(io::Error::new(io::ErrorKind::NotFound, msg));
        }
        state.attached.push((command.clone(), env.clone()));
        let pid = state.allocate_pid();
        let stderr = state.exit_immediately.take();
        state.alive.insert(pid, stderr.is_none());
        Ok(Box::new(FakeChild {
            pid,
            stderr: stderr.unwrap_or_default(),
            state: Arc::clone(&self.state),
        }))
    }

    fn spawn_detached(
        &mut self,
        command: &CommandLine,
        _env: &BTreeMap<OsString, OsString>,
        log_path: &Path,
    ) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(msg) = state.fail_spawn.take() {
            return Err(io::Error::new(io::ErrorKind::NotFound, msg));
        }
        state.detached.push((command.clone(), log_path.to_path_buf()));
        Ok(())
    }
}

pub struct FakeChild {
    pid: u32,
    stderr: String,
    state: Shared<SpawnState>,
}

impl ChildProcess for FakeChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        let state = self.state.lock().unwrap();
        if state.poll_error {
            return Err(io::Error::other("no child processes"));
        }
        Ok(!state.alive.get(&self.pid).copied().unwrap_or(false))
    }

    fn terminate(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.signal_error {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "operation not permitted",
            ));
        }
        state.terminated.push(self.pid);
        if !state.ignore_sigterm {
            state.alive.insert(self.pid, false);
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.signal_error {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "operation not permitted",
            ));
        }
        state.killed.push(self.pid);
        state.alive.insert(self.pid, false);
        Ok(())
    }

    fn take_stderr(&mut self) -> String {
        std::mem::take(&mut self.stderr)
    }
}

#[derive(Debug, Default)]
pub struct TableState {
    /// (pid, command line) pairs visible to a scan
    pub processes: Vec<(u32, String)>,
    pub terminated: Vec<u32>,
}

pub struct FakeTable {
    state: Shared<TableState>,
}

impl FakeTable {
    pub fn new() -> (Self, Shared<TableState>) {
        let state = Arc::new(Mutex::new(TableState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl ProcessTable for FakeTable {
    fn find(&mut self, signature: &LaunchSignature) -> Vec<u32> {
        let state = self.state.lock().unwrap();
        state
            .processes
            .iter()
            .filter(|(_, cmd)| signature.matches(cmd))
            .map(|(pid, _)| *pid)
            .collect()
    }

    fn terminate(&mut self, pid: u32) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.terminated.push(pid);
        state.processes.retain(|(p, _)| *p != pid);
        Ok(())
    }
}

/// Supervisor over fakes plus handles to inspect them
pub struct Harness {
    pub dir: TempDir,
    pub settings: Settings,
    pub spawned: Shared<SpawnState>,
    pub table: Shared<TableState>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let settings = test_settings(&dir);
        Self {
            dir,
            settings,
            spawned: Arc::new(Mutex::new(SpawnState::default())),
            table: Arc::new(Mutex::new(TableState::default())),
        }
    }

    /// Open a supervisor over fresh fakes, replacing the shared handles
    pub fn supervisor(&mut self) -> Supervisor {
        let (spawner, spawned) = FakeSpawner::new();
        let (table, table_state) = FakeTable::new();
        self.spawned = spawned;
        self.table = table_state;
        Supervisor::with_backends(&self.settings, Box::new(spawner), Box::new(table)).unwrap()
    }
}
