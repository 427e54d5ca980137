//! In-memory shapes produced by the schema parsers: [`Interface`],
//! [`ModuleManifest`], and the validator-bearing types they're built from.

use std::collections::HashMap;

use ev_core::Value;

use crate::validator::SchemaValidator;

/// A schema fragment plus the default value it was parsed with, if any.
pub struct ConfigKeySchema {
    pub validator: SchemaValidator,
    pub default: Option<Value>,
}

/// Mapping from config-key name to its schema (and optional default).
pub type ConfigSetSchema = HashMap<String, ConfigKeySchema>;

/// `{arguments: map<name, SchemaValidator>, return_type: SchemaValidator}`.
pub struct CommandType {
    pub arguments: HashMap<String, SchemaValidator>,
    pub return_type: SchemaValidator,
}

/// A variable's payload schema.
pub struct VariableType(pub SchemaValidator);

/// `{commands, variables, hash}` — `hash` is the MD5 of the canonical text
/// this interface was parsed from.
pub struct Interface {
    pub commands: HashMap<String, CommandType>,
    pub variables: HashMap<String, VariableType>,
    pub hash: String,
}

/// `{interface, config_schemas}` — a module's concrete provider of an
/// interface.
pub struct Implementation {
    pub interface: String,
    pub config_schemas: ConfigSetSchema,
}

/// `{interface, min_connections, max_connections}`.
pub struct Requirement {
    pub interface: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl Requirement {
    /// `(min, max) != (1, 1)`.
    #[must_use]
    pub fn is_vector(&self) -> bool {
        (self.min_connections, self.max_connections) != (1, 1)
    }
}

/// Author/license metadata copied out of a manifest's `metadata` block.
pub struct Metadata {
    pub authors: Vec<String>,
    pub license: String,
}

/// `{capabilities, config_schemas, implementations, requirements, metadata, hash}`.
pub struct ModuleManifest {
    pub capabilities: Vec<String>,
    pub config_schemas: ConfigSetSchema,
    pub implementations: HashMap<String, Implementation>,
    pub requirements: HashMap<String, Requirement>,
    pub metadata: Metadata,
    pub hash: String,
}
