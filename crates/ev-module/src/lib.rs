// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The bootstrap state machine (`Constructed -> Booted -> Initialized`) and
//! the schema-validated publish/call/implement/subscribe wrappers built on
//! top of [`ev_peer::Peer`].
//!
//! Every wrapper method here validates against the module's own resolved
//! interface map (`ev_module_model::Module`) before a value crosses the
//! wire or reaches a user handler. On the outgoing side a validation
//! failure fails the call locally; on the incoming side (a malformed
//! subscription value, a result that doesn't match its return type, or
//! arguments that don't match a command's schema) it is logged and
//! surfaced as an error or a dropped delivery — it never panics and never
//! tears down the peer.

mod error;
mod module_peer;
mod state;

pub use error::{ModuleError, ModuleResult};
pub use module_peer::{IoSyncHandle, ModulePeer};
pub use state::BootstrapState;
