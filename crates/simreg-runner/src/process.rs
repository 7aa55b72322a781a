//! Simulator process lifecycle
//!
//! A slot's simulator runs under a [`ProcessGuard`]. The guard polls the
//! child at a fixed interval; when the deadline passes it asks the process
//! tree to terminate and kills it after the grace window. A guard that is
//! dropped while its child still runs kills the child.

use std::collections::HashMap;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

/// Polling and escalation settings for one slot process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// Time the process may run; `None` waits forever
    pub timeout: Option<Duration>,
    /// Interval between liveness checks
    pub poll_interval: Duration,
    /// Time between the termination request and the forced kill
    pub grace: Duration,
}

impl Default for Deadline {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: Duration::from_millis(100),
            grace: Duration::from_secs(5),
        }
    }
}

/// How a guarded process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The process exited on its own
    Exited(ExitStatus),
    /// The deadline passed and the process was stopped
    TimedOut {
        /// The process exited within the grace window after the termination request
        terminated: bool,
    },
}

/// RAII guard that kills and reaps its child on drop
pub struct ProcessGuard {
    child: Option<Child>,
    pid: u32,
}

impl std::fmt::Debug for ProcessGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGuard")
            .field("pid", &self.pid)
            .field("running", &self.child.is_some())
            .finish()
    }
}

impl ProcessGuard {
    /// Guard a spawned child
    #[must_use]
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Some(child),
            pid,
        }
    }

    /// Process ID of the child
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Poll the child until it exits or `deadline` passes
    ///
    /// # Errors
    ///
    /// Returns an error if the child was already consumed or cannot be polled.
    pub fn wait_with_deadline(&mut self, deadline: &Deadline) -> std::io::Result<WaitOutcome> {
        let start = Instant::now();
        loop {
            let child = self
                .child
                .as_mut()
                .ok_or_else(|| std::io::Error::other("Process already consumed"))?;
            if let Some(status) = child.try_wait()? {
                self.child = None;
                return Ok(WaitOutcome::Exited(status));
            }
            if deadline.timeout.is_some_and(|t| start.elapsed() >= t) {
                tracing::warn!(pid = self.pid, "deadline passed, terminating simulator");
                let terminated = self.terminate(deadline)?;
                return Ok(WaitOutcome::TimedOut { terminated });
            }
            std::thread::sleep(deadline.poll_interval);
        }
    }

    /// Request termination, then kill once the grace window has passed
    ///
    /// The process tree is recorded before the termination request, so
    /// descendants that outlive the child are still found and no process
    /// that reuses a reaped pid is signalled.
    ///
    /// Returns `true` if the process exited within the grace window.
    ///
    /// # Errors
    ///
    /// Returns an error if the child cannot be polled or reaped.
    pub fn terminate(&mut self, deadline: &Deadline) -> std::io::Result<bool> {
        let Some(mut child) = self.child.take() else {
            return Ok(true);
        };
        let tree = ProcessTree::snapshot(self.pid);
        tree.signal(sysinfo::Signal::Term);
        let requested = Instant::now();
        while requested.elapsed() < deadline.grace {
            if child.try_wait()?.is_some() {
                tree.descendants().signal(sysinfo::Signal::Kill);
                return Ok(true);
            }
            std::thread::sleep(deadline.poll_interval);
        }
        tracing::warn!(pid = self.pid, "simulator ignored termination request, killing");
        tree.signal(sysinfo::Signal::Kill);
        let _ = child.kill();
        child.wait()?;
        Ok(false)
    }

    /// Take the child, disabling the cleanup on drop
    #[must_use]
    pub fn take(mut self) -> Option<Child> {
        self.child.take()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
            tracing::debug!(pid = self.pid, "cleaning up simulator process");
            ProcessTree::snapshot(self.pid).signal(sysinfo::Signal::Kill);
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// A process and its descendants at one point in time
///
/// Each member is identified by pid and start time, descendants first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessTree {
    members: Vec<(sysinfo::Pid, u64)>,
}

impl ProcessTree {
    /// Record `pid` and every process below it
    ///
    /// Must be taken while `pid` is still unreaped.
    #[must_use]
    pub fn snapshot(pid: u32) -> Self {
        let root = sysinfo::Pid::from_u32(pid);
        let mut sys = sysinfo::System::new();
        sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

        let mut children: HashMap<sysinfo::Pid, Vec<sysinfo::Pid>> = HashMap::new();
        for (p, process) in sys.processes() {
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*p);
            }
        }

        let mut members = Vec::new();
        let mut stack = vec![root];
        while let Some(p) = stack.pop() {
            if let Some(process) = sys.process(p) {
                members.push((p, process.start_time()));
            }
            if let Some(c) = children.get(&p) {
                stack.extend(c.iter().copied());
            }
        }
        members.reverse();
        Self { members }
    }

    /// Pids in the tree, descendants first
    #[must_use]
    pub fn pids(&self) -> Vec<u32> {
        self.members.iter().map(|(p, _)| p.as_u32()).collect()
    }

    /// The tree without its root
    #[must_use]
    pub fn descendants(&self) -> Self {
        let mut members = self.members.clone();
        members.pop();
        Self { members }
    }

    /// Send `signal` to every member that still runs under its recorded start time
    pub fn signal(&self, signal: sysinfo::Signal) {
        if self.members.is_empty() {
            return;
        }
        let pids: Vec<sysinfo::Pid> = self.members.iter().map(|(p, _)| *p).collect();
        let mut sys = sysinfo::System::new();
        sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&pids), true);
        for (pid, started) in &self.members {
            let Some(process) = sys.process(*pid) else {
                continue;
            };
            if process.start_time() != *started {
                tracing::debug!(pid = pid.as_u32(), "pid was reused, not signalling");
                continue;
            }
            if process.kill_with(signal).is_none() && signal == sysinfo::Signal::Kill {
                let _ = process.kill();
            }
        }
    }
}
