//! Host process table scan - the only way to reach a detached server

use crate::registry::LaunchSignature;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::io;
use sysinfo::System;

/// Lookup and signalling of processes the supervisor holds no handle for
pub trait ProcessTable: Send {
    /// Pids whose command line matches `signature`, excluding this process
    fn find(&mut self, signature: &LaunchSignature) -> Vec<u32>;

    /// Send SIGTERM to `pid`
    fn terminate(&mut self, pid: u32) -> io::Result<()>;
}

/// sysinfo backed process table
pub struct SystemProcessTable {
    sys: System,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn find(&mut self, signature: &LaunchSignature) -> Vec<u32> {
        self.sys.refresh_processes();
        let own_pid = std::process::id();

        let mut pids: Vec<u32> = self
            .sys
            .processes()
            .iter()
            .filter_map(|(pid, proc)| {
                let pid = pid.as_u32();
                let cmd = proc.cmd().join(" ");
                (pid != own_pid && signature.matches(&cmd)).then_some(pid)
            })
            .collect();
        pids.sort_unstable();
        pids
    }

    fn terminate(&mut self, pid: u32) -> io::Result<()> {
        signal::kill(NixPid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from)
    }
}
