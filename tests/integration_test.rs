//! End-to-end supervision of real OS processes
//!
//! The launch commands point at docker/npx/node, which test hosts may not
//! have. `ShellSpawner` swaps each command for a small `sh` script before
//! handing it to the real `SystemSpawner`, so everything after command
//! building (spawning, grace window, signals, reaping) runs for real.

mod common;

use mcp_manager::process::{
    ChildProcess, ProcessTable, Spawner, SystemProcessTable, SystemSpawner,
};
use mcp_manager::{
    CommandLine, Launch, ManagerError, Method, ServerStatus, Settings, StopOutcome, Supervisor,
    Timing,
};
use nix::sys::signal;
use nix::unistd::Pid;
use serial_test::serial;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct ShellSpawner {
    script: String,
    inner: SystemSpawner,
}

impl ShellSpawner {
    fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
            inner: SystemSpawner,
        }
    }

    fn rewrite(&self) -> CommandLine {
        CommandLine::new("sh").arg("-c").arg(self.script.clone())
    }
}

impl Spawner for ShellSpawner {
    fn spawn_attached(
        &mut self,
        _command: &CommandLine,
        env: &BTreeMap<OsString, OsString>,
    ) -> io::Result<Box<dyn ChildProcess>> {
        let command = self.rewrite();
        self.inner.spawn_attached(&command, env)
    }

    fn spawn_detached(
        &mut self,
        _command: &CommandLine,
        env: &BTreeMap<OsString, OsString>,
        log_path: &Path,
    ) -> io::Result<()> {
        let command = self.rewrite();
        self.inner.spawn_detached(&command, env, log_path)
    }
}

fn settings(dir: &TempDir) -> Settings {
    Settings {
        timing: Timing {
            start_grace_ms: 200,
            stop_poll_interval_ms: 50,
            stop_poll_attempts: 10,
        },
        ..common::test_settings(dir)
    }
}

fn supervisor(dir: &TempDir, script: &str) -> Supervisor {
    Supervisor::with_backends(
        &settings(dir),
        Box::new(ShellSpawner::new(script)),
        Box::new(SystemProcessTable::new()),
    )
    .unwrap()
}

fn pid_exists(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[test]
#[serial]
fn test_memory_lifecycle_with_real_process() {
    let dir = TempDir::new().unwrap();
    let mut sup = supervisor(&dir, "exec sleep 30");
    sup.enable("memory", Method::Npx).unwrap();

    let Launch::Attached { pid } = sup.start("memory", false).unwrap() else {
        panic!("expected attached launch");
    };
    assert!(pid_exists(pid));
    assert_eq!(sup.status_of("memory").unwrap(), ServerStatus::Running);

    assert_eq!(sup.stop("memory").unwrap(), StopOutcome::Terminated);
    assert_eq!(sup.status_of("memory").unwrap(), ServerStatus::Stopped);
    assert!(!pid_exists(pid), "child should be reaped after stop");
}

#[test]
#[serial]
fn test_sigterm_resistant_process_is_killed() {
    let dir = TempDir::new().unwrap();
    let mut sup = supervisor(&dir, "trap '' TERM; while :; do sleep 0.1; done");
    sup.enable("fetch", Method::Npx).unwrap();

    let Launch::Attached { pid } = sup.start("fetch", false).unwrap() else {
        panic!("expected attached launch");
    };

    assert_eq!(sup.stop("fetch").unwrap(), StopOutcome::Killed);
    assert!(!pid_exists(pid));
}

#[test]
#[serial]
fn test_immediate_crash_surfaces_stderr() {
    let dir = TempDir::new().unwrap();
    let mut sup = supervisor(&dir, "echo 'Error: Cannot find module index.js' >&2; exit 1");
    sup.enable("fetch", Method::Node).unwrap();

    match sup.start("fetch", false) {
        Err(ManagerError::StartFailed { reason, .. }) => {
            assert_eq!(reason, "Error: Cannot find module index.js");
        }
        other => panic!("expected StartFailed, got {other:?}"),
    }
    assert!(!sup.is_tracked("fetch"));
}

#[test]
#[serial]
fn test_crash_after_start_is_reported() {
    let dir = TempDir::new().unwrap();
    let mut sup = supervisor(&dir, "sleep 0.5; exit 3");
    sup.enable("memory", Method::Npx).unwrap();

    sup.start("memory", false).unwrap();
    std::thread::sleep(Duration::from_millis(800));
    assert_eq!(sup.status_of("memory").unwrap(), ServerStatus::Crashed);
}

#[test]
#[serial]
fn test_drop_terminates_attached_children() {
    let dir = TempDir::new().unwrap();
    let pid = {
        let mut sup = supervisor(&dir, "exec sleep 30");
        sup.enable("memory", Method::Npx).unwrap();
        match sup.start("memory", false).unwrap() {
            Launch::Attached { pid } => pid,
            other => panic!("expected attached launch, got {other:?}"),
        }
    };
    assert!(!pid_exists(pid));
}

#[test]
#[serial]
fn test_start_failure_is_not_held_up_by_background_processes() {
    let dir = TempDir::new().unwrap();
    // The backgrounded sleep keeps the stderr pipe open after sh exits
    let mut sup = supervisor(&dir, "sleep 6 & echo boom >&2; exit 1");
    sup.enable("fetch", Method::Npx).unwrap();

    let started = Instant::now();
    match sup.start("fetch", false) {
        Err(ManagerError::StartFailed { reason, .. }) => assert_eq!(reason, "boom"),
        other => panic!("expected StartFailed, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
}

#[test]
#[serial]
fn test_noisy_server_is_not_blocked_by_its_output() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("past-output");
    let script = format!(
        "head -c 200000 /dev/zero >&2; head -c 200000 /dev/zero; touch {}; exec sleep 30",
        marker.display()
    );
    let mut sup = supervisor(&dir, &script);
    sup.enable("memory", Method::Npx).unwrap();

    assert!(matches!(sup.start("memory", false), Ok(Launch::Attached { .. })));
    for _ in 0..60 {
        if marker.exists() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(marker.exists(), "server stalled writing its output");
    assert_eq!(sup.status_of("memory").unwrap(), ServerStatus::Running);
    assert_eq!(sup.stop("memory").unwrap(), StopOutcome::Terminated);
}

#[test]
#[serial]
fn test_child_sees_inherited_and_stored_environment() {
    let dir = TempDir::new().unwrap();
    std::env::set_var("MCP_INTEGRATION_INHERITED", "from-manager");
    std::env::set_var("MCP_INTEGRATION_OVERRIDE", "from-manager");

    let mut sup = supervisor(
        &dir,
        "echo \"$MCP_INTEGRATION_INHERITED $MCP_INTEGRATION_OVERRIDE\" >&2; exit 1",
    );
    sup.set_env("MCP_INTEGRATION_OVERRIDE", "from-store").unwrap();
    sup.enable("memory", Method::Npx).unwrap();

    let result = sup.start("memory", false);

    std::env::remove_var("MCP_INTEGRATION_INHERITED");
    std::env::remove_var("MCP_INTEGRATION_OVERRIDE");

    match result {
        Err(ManagerError::StartFailed { reason, .. }) => {
            assert_eq!(reason, "from-manager from-store");
        }
        other => panic!("expected StartFailed, got {other:?}"),
    }
}

#[test]
#[serial]
fn test_detached_task_manager_survives_shutdown_and_is_found_by_scan() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let entry = settings
        .servers_root
        .join("task-manager")
        .join("dist")
        .join("index.js");
    // The trailing no-op keeps sh alive with a command line matching the signature
    let script = format!("sleep 10; : node {}", entry.display());
    let mut sup = supervisor(&dir, &script);
    sup.enable("task-manager", Method::Node).unwrap();

    assert_eq!(sup.start("task-manager", false).unwrap(), Launch::Detached);
    sup.shutdown();
    assert!(sup.is_tracked("task-manager"));
    assert!(settings.log_dir().join("task-manager.log").exists());
    std::thread::sleep(Duration::from_millis(200));

    let signature = mcp_manager::registry::find("task-manager")
        .and_then(|spec| spec.detached_signature)
        .unwrap();
    assert!(!SystemProcessTable::new().find(&signature).is_empty());

    match sup.stop("task-manager").unwrap() {
        StopOutcome::Scanned { matched } => assert!(matched >= 1),
        other => panic!("expected Scanned, got {other:?}"),
    }
    assert!(!sup.is_tracked("task-manager"));
}
