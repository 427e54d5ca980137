// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The manager side of the bootstrap handshake: answers `say_hello` and
//! `init_done`, tracks every module's state, and spawns/reaps/tears down
//! module subprocesses through a [`ChildSupervisor`].

mod error;
mod manager;
mod state;
mod supervisor;

pub use error::{ManagerError, ManagerResult};
pub use manager::Manager;
pub use state::ModuleState;
pub use supervisor::{ChildHandle, ChildSupervisor, ExitReport, ExitStatusKind, SupervisorError, SupervisorResult};
pub use supervisor::mock::MockSupervisor;

#[cfg(unix)]
pub use supervisor::process::ProcessSupervisor;
