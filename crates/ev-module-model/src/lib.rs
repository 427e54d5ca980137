// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! In-memory module representation: a manifest's implementations and
//! requirements resolved against their interfaces, and the post-handshake
//! `ModuleConfig` a `ModulePeer` holds once the manager has answered
//! `say_hello`.

mod config;
mod error;
mod module;

pub use config::ModuleConfig;
pub use error::{ModuleModelError, ModuleModelResult};
pub use module::{InterfaceMapBuilder, Module, ModuleBuilder};
