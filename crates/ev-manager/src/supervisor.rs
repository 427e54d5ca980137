//! The manager's contract with whatever spawns and reaps module
//! subprocesses. Kept behind a trait so the handshake/state-machine logic
//! can be tested without touching real processes.

use std::path::Path;

/// Opaque handle to a spawned child. Carries no process-table access of its
/// own — every operation goes back through the [`ChildSupervisor`] that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildHandle(pub u32);

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatusKind {
    Exited(i32),
    Signaled(i32),
}

/// One reaped child: its handle and how it ended.
#[derive(Debug, Clone, Copy)]
pub struct ExitReport {
    pub handle: ChildHandle,
    pub status: ExitStatusKind,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to spawn module '{module_id}' binary '{path}': {source}")]
    Spawn {
        module_id: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("signal delivery to child {0:?} failed: {1}")]
    Signal(ChildHandle, String),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Spawns, reaps, and terminates module subprocesses. One subprocess per
/// non-standalone module; standalone modules are expected to already be
/// running (e.g. under a debugger) and are never passed to `spawn`.
pub trait ChildSupervisor: Send + Sync {
    fn spawn(&self, module_id: &str, exec_path: &Path, args: &[String]) -> SupervisorResult<ChildHandle>;

    /// Non-blocking poll: returns every child that has exited since the
    /// last call.
    fn reap_exited(&self) -> Vec<ExitReport>;

    /// Send a graceful-stop signal (SIGTERM).
    fn terminate(&self, handle: ChildHandle) -> SupervisorResult<()>;

    /// Force termination (SIGKILL).
    fn kill(&self, handle: ChildHandle) -> SupervisorResult<()>;
}

/// In-memory supervisor for tests: `spawn` allocates a handle with no real
/// process behind it; exits are only reported once a test calls
/// [`MockSupervisor::simulate_exit`].
pub mod mock {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::{ChildHandle, ChildSupervisor, ExitReport, ExitStatusKind, SupervisorResult};

    #[derive(Default)]
    pub struct MockSupervisor {
        next_id: AtomicU32,
        alive: Mutex<HashSet<u32>>,
        exited: Mutex<Vec<ExitReport>>,
        terminated: Mutex<HashSet<u32>>,
    }

    impl MockSupervisor {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Test hook: report `handle` as having exited with `status`,
        /// as if it had died on its own or in response to a signal sent
        /// through [`ChildSupervisor::terminate`]/[`ChildSupervisor::kill`].
        pub fn simulate_exit(&self, handle: ChildHandle, status: ExitStatusKind) {
            self.alive.lock().expect("mock supervisor poisoned").remove(&handle.0);
            self.exited.lock().expect("mock supervisor poisoned").push(ExitReport { handle, status });
        }

        #[must_use]
        pub fn was_terminated(&self, handle: ChildHandle) -> bool {
            self.terminated.lock().expect("mock supervisor poisoned").contains(&handle.0)
        }

        #[must_use]
        pub fn is_alive(&self, handle: ChildHandle) -> bool {
            self.alive.lock().expect("mock supervisor poisoned").contains(&handle.0)
        }
    }

    impl ChildSupervisor for MockSupervisor {
        fn spawn(&self, _module_id: &str, _exec_path: &std::path::Path, _args: &[String]) -> SupervisorResult<ChildHandle> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.alive.lock().expect("mock supervisor poisoned").insert(id);
            Ok(ChildHandle(id))
        }

        fn reap_exited(&self) -> Vec<ExitReport> {
            std::mem::take(&mut self.exited.lock().expect("mock supervisor poisoned"))
        }

        fn terminate(&self, handle: ChildHandle) -> SupervisorResult<()> {
            self.terminated.lock().expect("mock supervisor poisoned").insert(handle.0);
            Ok(())
        }

        fn kill(&self, handle: ChildHandle) -> SupervisorResult<()> {
            self.alive.lock().expect("mock supervisor poisoned").remove(&handle.0);
            Ok(())
        }
    }
}

#[cfg(unix)]
pub mod process {
    use std::collections::HashMap;
    use std::path::Path;
    use std::process::{Child, Command};
    use std::sync::Mutex;

    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    use super::{ChildHandle, ChildSupervisor, ExitReport, ExitStatusKind, SupervisorError, SupervisorResult};

    /// Spawns real subprocesses via [`std::process::Command`] and signals
    /// them via `nix`.
    #[derive(Default)]
    pub struct ProcessSupervisor {
        children: Mutex<HashMap<u32, Child>>,
    }

    impl ProcessSupervisor {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl ChildSupervisor for ProcessSupervisor {
        fn spawn(&self, module_id: &str, exec_path: &Path, args: &[String]) -> SupervisorResult<ChildHandle> {
            let child = Command::new(exec_path).args(args).spawn().map_err(|source| SupervisorError::Spawn {
                module_id: module_id.to_string(),
                path: exec_path.display().to_string(),
                source,
            })?;
            let pid = child.id();
            self.children.lock().expect("process supervisor poisoned").insert(pid, child);
            Ok(ChildHandle(pid))
        }

        fn reap_exited(&self) -> Vec<ExitReport> {
            let mut children = self.children.lock().expect("process supervisor poisoned");
            let mut exited = Vec::new();
            children.retain(|&pid, child| match child.try_wait() {
                Ok(Some(status)) => {
                    let kind = status
                        .code()
                        .map(ExitStatusKind::Exited)
                        .unwrap_or(ExitStatusKind::Signaled(0));
                    exited.push(ExitReport { handle: ChildHandle(pid), status: kind });
                    false
                }
                Ok(None) => true,
                Err(error) => {
                    tracing::warn!(pid, %error, "failed to poll child exit status, assuming still alive");
                    true
                }
            });
            exited
        }

        fn terminate(&self, handle: ChildHandle) -> SupervisorResult<()> {
            signal::kill(Pid::from_raw(handle.0 as i32), Signal::SIGTERM)
                .map_err(|errno| SupervisorError::Signal(handle, errno.to_string()))
        }

        fn kill(&self, handle: ChildHandle) -> SupervisorResult<()> {
            signal::kill(Pid::from_raw(handle.0 as i32), Signal::SIGKILL)
                .map_err(|errno| SupervisorError::Signal(handle, errno.to_string()))
        }
    }
}
