// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Peer: the inbound-routing and call-bookkeeping layer that sits directly
//! on top of a [`Transport`](ev_transport::Transport).
//!
//! A `Peer` owns nothing about bootstrap state or schema validation — that's
//! `ev-module`'s job. It only knows how to turn a raw message into a
//! dispatched work item, and how to make `call_command` look synchronous to
//! its caller.

mod calls;
mod disposer;
mod error;
mod peer;

pub use disposer::Disposer;
pub use error::{PeerError, PeerResult};
pub use peer::{CommandHandler, Peer, DEFAULT_CALL_TIMEOUT};

// Re-exported so downstream crates can name handler types without a direct
// dependency on ev-worker.
pub use ev_worker::Handler;
