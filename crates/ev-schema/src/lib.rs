// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The schema layer: embedded manifest/interface/config JSON-schemas,
//! `SchemaValidator`, and the manifest/interface/config parsers built on
//! top of them.
//!
//! Parsing is strictly layered — validate the raw document against its
//! embedded schema, then walk the now-trusted structure into typed data —
//! and every validator carries the MD5 of the schema text it compiled from
//! so the schema pipeline's own build artifacts can be checked for
//! integrity at process start.

mod error;
mod hash;
mod model;
mod parse;
mod validator;

pub use error::{SchemaError, SchemaResult};
pub use hash::md5_hash;
pub use model::{
    CommandType, ConfigKeySchema, ConfigSetSchema, Implementation, Interface, Metadata, ModuleManifest, Requirement,
    VariableType,
};
pub use parse::{ModuleConfiguration, parse_interface, parse_interface_with_hash, parse_module, parse_module_configuration, parse_module_with_hash};
pub use validator::{Schema, SchemaValidator, ValidationResult, get_config_schema, get_interface_schema, get_module_schema, validate_config, validate_interface, validate_module};
