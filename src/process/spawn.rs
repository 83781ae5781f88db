//! Spawning server processes

use crate::command::CommandLine;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::{BTreeMap, VecDeque};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Most recent stderr bytes kept per attached child
const STDERR_TAIL_BYTES: usize = 16 * 1024;

/// How long `take_stderr` waits for the pipe to reach end of file. A
/// grandchild that inherited stderr can hold it open indefinitely.
const STDERR_DRAIN_WAIT: Duration = Duration::from_millis(250);

/// Full environment block for a child: the manager's own environment
/// overlaid with the stored variables, stored values winning.
pub fn child_environment(stored: &BTreeMap<String, String>) -> BTreeMap<OsString, OsString> {
    let mut env: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
    for (key, value) in stored {
        env.insert(OsString::from(key), OsString::from(value));
    }
    env
}

/// A launched process whose pid is retained
pub trait ChildProcess: Send {
    fn id(&self) -> u32;

    /// Non-blocking liveness check
    fn has_exited(&mut self) -> io::Result<bool>;

    /// Ask the process to exit (SIGTERM)
    fn terminate(&mut self) -> io::Result<()>;

    /// Force the process to exit (SIGKILL) and reap it
    fn kill(&mut self) -> io::Result<()>;

    /// The last stderr output of the process. Only call once it has exited;
    /// returns within a bounded wait even if the pipe stays open.
    fn take_stderr(&mut self) -> String;
}

/// Launches processes on behalf of the supervisor
pub trait Spawner: Send {
    /// Launch with piped stdio and hand back the handle
    fn spawn_attached(
        &mut self,
        command: &CommandLine,
        env: &BTreeMap<OsString, OsString>,
    ) -> io::Result<Box<dyn ChildProcess>>;

    /// Launch in its own process group with output appended to `log_path`,
    /// keeping nothing that could later be used to signal it
    fn spawn_detached(
        &mut self,
        command: &CommandLine,
        env: &BTreeMap<OsString, OsString>,
        log_path: &Path,
    ) -> io::Result<()>;
}

/// `std::process` backed spawner
#[derive(Debug, Default)]
pub struct SystemSpawner;

impl SystemSpawner {
    fn command(command: &CommandLine, env: &BTreeMap<OsString, OsString>) -> Command {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).env_clear().envs(env);
        cmd
    }
}

impl Spawner for SystemSpawner {
    fn spawn_attached(
        &mut self,
        command: &CommandLine,
        env: &BTreeMap<OsString, OsString>,
    ) -> io::Result<Box<dyn ChildProcess>> {
        // stdin stays open: stdio servers exit on EOF
        let mut child = Self::command(command, env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Both pipes are drained so a chatty server never blocks on a full buffer
        let drained = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => discard_output(stdout)
                .and_then(|()| StderrTail::spawn(stderr)),
            _ => Err(io::Error::other("child stdio was not captured")),
        };
        match drained {
            Ok(stderr) => Ok(Box::new(SystemChild { child, stderr })),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    fn spawn_detached(
        &mut self,
        command: &CommandLine,
        env: &BTreeMap<OsString, OsString>,
        log_path: &Path,
    ) -> io::Result<()> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new().create(true).append(true).open(log_path)?;

        let child = Self::command(command, env)
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .process_group(0)
            .spawn()?;

        // Deliberately not waited on; it outlives this handle
        drop(child);
        Ok(())
    }
}

fn discard_output(mut reader: impl Read + Send + 'static) -> io::Result<()> {
    thread::Builder::new()
        .name("stdout-drain".to_string())
        .spawn(move || {
            let _ = io::copy(&mut reader, &mut io::sink());
        })?;
    Ok(())
}

/// Bounded tail of a child's stderr, filled by a reader thread
struct StderrTail {
    tail: Arc<Mutex<VecDeque<u8>>>,
    eof: Receiver<()>,
}

impl StderrTail {
    fn spawn(mut reader: impl Read + Send + 'static) -> io::Result<Self> {
        let tail = Arc::new(Mutex::new(VecDeque::new()));
        let (done, eof) = mpsc::channel();
        let sink = Arc::clone(&tail);

        thread::Builder::new()
            .name("stderr-drain".to_string())
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let mut tail = sink.lock().unwrap_or_else(PoisonError::into_inner);
                            tail.extend(&buf[..n]);
                            let excess = tail.len().saturating_sub(STDERR_TAIL_BYTES);
                            tail.drain(..excess);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
                let _ = done.send(());
            })?;

        Ok(Self { tail, eof })
    }

    /// Whatever has been captured, after waiting at most `wait` for end of file
    fn collect(&self, wait: Duration) -> String {
        let _ = self.eof.recv_timeout(wait);
        let tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        let bytes: Vec<u8> = tail.iter().copied().collect();
        // Lossy on purpose: diagnostics only
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Handle around a `std::process::Child` whose output is being drained
pub struct SystemChild {
    child: Child,
    stderr: StderrTail,
}

impl ChildProcess for SystemChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        self.child.try_wait().map(|status| status.is_some())
    }

    fn terminate(&mut self) -> io::Result<()> {
        let pid = Pid::from_raw(self.child.id() as i32);
        signal::kill(pid, Signal::SIGTERM).map_err(io::Error::from)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }

    fn take_stderr(&mut self) -> String {
        self.stderr.collect(STDERR_DRAIN_WAIT)
    }
}
