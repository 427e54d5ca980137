// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Deployment config loading: resolves every module entry's manifest and
//! interfaces, normalizes its config, and cross-checks every requirement's
//! fulfillments against the rest of the deployment — the target module
//! must exist, provide a matching implementation, and that implementation
//! must provide the interface the requirement asks for. No module may
//! fulfill its own requirement.

mod deployment;
mod error;
mod loader;

pub use deployment::{DeploymentConfig, ResolvedModule, load};
pub use error::{ConfigError, ConfigResult};
pub use loader::{FilesystemManifestSource, ManifestSource, MockManifestSource};
