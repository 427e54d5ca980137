//! Manifest, interface, and per-module configuration parsing.
//!
//! Parsing is strictly layered: validate the raw document against its
//! embedded schema first, then walk the now-trusted structure into the
//! typed shapes in [`crate::model`].

use std::collections::HashMap;

use ev_core::Value;
use serde_json::{Map, json};

use crate::error::{SchemaError, SchemaResult};
use crate::hash::md5_hash;
use crate::model::{CommandType, ConfigKeySchema, ConfigSetSchema, Implementation, Interface, Metadata, ModuleManifest, Requirement, VariableType};
use crate::validator::{self, SchemaValidator};

fn as_object<'a>(value: &'a Value, what: &str) -> SchemaResult<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| SchemaError::Validation {
        pointer: String::new(),
        message: format!("{what} must be a JSON object"),
    })
}

/// Build a [`ConfigSetSchema`] from a manifest's (or implementation's)
/// `config` object: each value is itself a schema fragment, optionally
/// carrying a `default` that must validate against its own schema.
pub fn parse_config_schema_set(config_set_json: &Value) -> SchemaResult<ConfigSetSchema> {
    let mut set = ConfigSetSchema::new();
    if config_set_json.is_null() {
        return Ok(set);
    }
    let obj = as_object(config_set_json, "config")?;

    for (key, schema_fragment) in obj {
        let validator = SchemaValidator::new(schema_fragment.clone()).map_err(|e| SchemaError::Validation {
            pointer: format!("/config/{key}"),
            message: e,
        })?;

        let default = schema_fragment.get("default").cloned();
        if let Some(default_value) = &default {
            if !validator.is_valid(default_value) {
                return Err(SchemaError::MissingDefault {
                    message: format!(
                        "Default value for config key '{key}' does not validate against its own schema"
                    ),
                });
            }
        }

        set.insert(key.clone(), ConfigKeySchema { validator, default });
    }

    Ok(set)
}

fn parse_capabilities(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn parse_metadata(value: &Value) -> SchemaResult<Metadata> {
    let authors = value
        .get("authors")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let license = value
        .get("license")
        .and_then(Value::as_str)
        .ok_or_else(|| SchemaError::Validation {
            pointer: "/metadata/license".to_string(),
            message: "metadata.license is required".to_string(),
        })?
        .to_string();
    Ok(Metadata { authors, license })
}

fn parse_implementations(value: &Value) -> SchemaResult<HashMap<String, Implementation>> {
    let mut out = HashMap::new();
    let obj = as_object(value, "implements")?;
    for (id, def) in obj {
        let interface = def
            .get("interface")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::Validation {
                pointer: format!("/implements/{id}/interface"),
                message: "implementation is missing 'interface'".to_string(),
            })?
            .to_string();
        let config_schemas = match def.get("config") {
            Some(c) => parse_config_schema_set(c)?,
            None => ConfigSetSchema::new(),
        };
        out.insert(id.clone(), Implementation { interface, config_schemas });
    }
    Ok(out)
}

fn parse_requirements(value: &Value) -> SchemaResult<HashMap<String, Requirement>> {
    let mut out = HashMap::new();
    let obj = as_object(value, "requires")?;
    for (id, def) in obj {
        let interface = def
            .get("interface")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::Validation {
                pointer: format!("/requires/{id}/interface"),
                message: "requirement is missing 'interface'".to_string(),
            })?
            .to_string();
        let min_connections = def.get("min_connections").and_then(Value::as_u64).unwrap_or(1) as u32;
        let max_connections = def.get("max_connections").and_then(Value::as_u64).unwrap_or(1) as u32;
        out.insert(
            id.clone(),
            Requirement {
                interface,
                min_connections,
                max_connections,
            },
        );
    }
    Ok(out)
}

/// Parse and validate a module manifest document, attaching `hash` as its
/// content identity.
pub fn parse_module_with_hash(module_json: &Value, hash: String) -> SchemaResult<ModuleManifest> {
    let result = validator::validate_module(module_json);
    if !result.ok() {
        return Err(SchemaError::Validation {
            pointer: result.pointer,
            message: result.error.unwrap_or_default(),
        });
    }

    let capabilities = module_json.get("capabilities").map(parse_capabilities).unwrap_or_default();
    let config_schemas = match module_json.get("config") {
        Some(c) => parse_config_schema_set(c)?,
        None => ConfigSetSchema::new(),
    };
    let implementations = match module_json.get("implements") {
        Some(i) => parse_implementations(i)?,
        None => HashMap::new(),
    };
    let requirements = match module_json.get("requires") {
        Some(r) => parse_requirements(r)?,
        None => HashMap::new(),
    };
    let metadata = parse_metadata(module_json.get("metadata").unwrap_or(&Value::Null))?;

    Ok(ModuleManifest {
        capabilities,
        config_schemas,
        implementations,
        requirements,
        metadata,
        hash,
    })
}

/// Parse a module manifest from its raw source text, computing its MD5
/// identity from the exact bytes supplied.
pub fn parse_module(module_text: &str) -> SchemaResult<ModuleManifest> {
    let module_json: Value = serde_json::from_str(module_text)?;
    let hash = md5_hash(module_text);
    parse_module_with_hash(&module_json, hash)
}

fn parse_type(type_json: &Value) -> SchemaResult<SchemaValidator> {
    SchemaValidator::new(type_json.clone()).map_err(|e| SchemaError::Validation {
        pointer: String::new(),
        message: e,
    })
}

fn parse_arguments(args_json: &Value) -> SchemaResult<HashMap<String, SchemaValidator>> {
    let mut out = HashMap::new();
    if args_json.is_null() {
        return Ok(out);
    }
    let obj = as_object(args_json, "arguments")?;
    for (name, type_json) in obj {
        out.insert(name.clone(), parse_type(type_json)?);
    }
    Ok(out)
}

fn parse_command(cmd_json: &Value) -> SchemaResult<CommandType> {
    let arguments = parse_arguments(cmd_json.get("arguments").unwrap_or(&json!({})))?;
    let return_type = parse_type(cmd_json.get("result").unwrap_or(&json!({})))?;
    Ok(CommandType { arguments, return_type })
}

fn parse_commands(cmds_json: &Value) -> SchemaResult<HashMap<String, CommandType>> {
    let mut out = HashMap::new();
    let obj = as_object(cmds_json, "cmds")?;
    for (name, cmd) in obj {
        out.insert(name.clone(), parse_command(cmd)?);
    }
    Ok(out)
}

fn parse_variable(var_json: &Value) -> SchemaResult<VariableType> {
    Ok(VariableType(parse_type(var_json)?))
}

fn parse_variables(vars_json: &Value) -> SchemaResult<HashMap<String, VariableType>> {
    let mut out = HashMap::new();
    let obj = as_object(vars_json, "vars")?;
    for (name, var) in obj {
        out.insert(name.clone(), parse_variable(var)?);
    }
    Ok(out)
}

/// Parse and validate an interface document, attaching `hash` as its
/// content identity.
pub fn parse_interface_with_hash(intf_json: &Value, hash: String) -> SchemaResult<Interface> {
    let result = validator::validate_interface(intf_json);
    if !result.ok() {
        return Err(SchemaError::Validation {
            pointer: result.pointer,
            message: result.error.unwrap_or_default(),
        });
    }

    let commands = match intf_json.get("cmds") {
        Some(c) => parse_commands(c)?,
        None => HashMap::new(),
    };
    let variables = match intf_json.get("vars") {
        Some(v) => parse_variables(v)?,
        None => HashMap::new(),
    };

    Ok(Interface { commands, variables, hash })
}

/// Parse an interface from its raw source text.
pub fn parse_interface(interface_text: &str) -> SchemaResult<Interface> {
    let interface_json: Value = serde_json::from_str(interface_text)?;
    let hash = md5_hash(interface_text);
    parse_interface_with_hash(&interface_json, hash)
}

/// Validate and normalize a value-level config set against its manifest
/// schema: fill in defaults, validate supplied values, reject unknown keys.
fn apply_config_set(config: &Value, schemas: &ConfigSetSchema) -> SchemaResult<Value> {
    let empty = Map::new();
    let supplied = config.as_object().unwrap_or(&empty);
    let mut out = Map::new();

    for (name, schema_item) in schemas {
        match supplied.get(name) {
            Some(value) => {
                if !schema_item.validator.is_valid(value) {
                    return Err(SchemaError::Validation {
                        pointer: format!("/{name}"),
                        message: format!(
                            "Supplied value for config key '{name}' does not validate against the config keys schema"
                        ),
                    });
                }
                out.insert(name.clone(), value.clone());
            }
            None => match &schema_item.default {
                Some(default) => {
                    out.insert(name.clone(), default.clone());
                }
                None => {
                    return Err(SchemaError::MissingDefault {
                        message: format!("Config key '{name}' in config set is not set and has no default key"),
                    });
                }
            },
        }
    }

    for key in supplied.keys() {
        if !schemas.contains_key(key) {
            return Err(SchemaError::Topology {
                message: format!("Config key '{key}' has been set in the configuration, but does not exist in the manifest"),
            });
        }
    }

    Ok(Value::Object(out))
}

fn parse_implementation_configuration(
    config_implementation: &Value,
    implementations: &HashMap<String, Implementation>,
) -> SchemaResult<Value> {
    let empty = Map::new();
    let supplied = config_implementation.as_object().unwrap_or(&empty);
    let mut out = Map::new();

    for (impl_name, impl_def) in implementations {
        let impl_config = supplied.get(impl_name).cloned().unwrap_or_else(|| json!({}));
        let parsed = apply_config_set(&impl_config, &impl_def.config_schemas).map_err(|e| SchemaError::Validation {
            pointer: format!("/config_implementation/{impl_name}"),
            message: format!("Failed to parse the config set for implementation id '{impl_name}'\n{e}"),
        })?;
        out.insert(impl_name.clone(), parsed);
    }

    for key in supplied.keys() {
        if !implementations.contains_key(key) {
            return Err(SchemaError::Topology {
                message: format!(
                    "Configuration found for an implementation named '{key}', that does not exist in the module manifest"
                ),
            });
        }
    }

    Ok(Value::Object(out))
}

fn check_connections(connections_json: &Value, requirements: &HashMap<String, Requirement>) -> SchemaResult<()> {
    let empty = Map::new();
    let supplied = connections_json.as_object().unwrap_or(&empty);

    for (req_id, requirement) in requirements {
        let count = supplied.get(req_id).and_then(Value::as_array).map_or(0, Vec::len) as u32;

        if count < requirement.min_connections {
            return Err(SchemaError::Topology {
                message: format!(
                    "Requirement with id '{req_id}' needs at least {} connection(s) to a fulfilling implementation",
                    requirement.min_connections
                ),
            });
        }
        if count > requirement.max_connections {
            return Err(SchemaError::Topology {
                message: format!(
                    "Requirement with id '{req_id}' can take at maximum {} connections to fulfilling implementations, but {count} have been defined in the config",
                    requirement.max_connections
                ),
            });
        }
    }

    for key in supplied.keys() {
        if !requirements.contains_key(key) {
            return Err(SchemaError::Topology {
                message: format!("Connection found for a requirement named '{key}', that does not exist in the module manifest"),
            });
        }
    }

    Ok(())
}

/// The normalized, cross-checked per-module configuration: config values
/// (module + per-implementation) and the still-raw connections object
/// (cardinality-checked but not yet resolved against the deployment-wide
/// module registry — that cross-check is [`ev-config`]'s job).
pub struct ModuleConfiguration {
    pub config_module: Value,
    pub config_implementations: Value,
    pub connections: Value,
}

/// Normalize a per-module config fragment against its manifest: validate
/// `config_module`/`config_implementation` and cardinality-check
/// `connections`.
pub fn parse_module_configuration(module_config_json: &Value, manifest: &ModuleManifest) -> SchemaResult<ModuleConfiguration> {
    let config_module_in = module_config_json.get("config_module").cloned().unwrap_or_else(|| json!({}));
    let config_module = apply_config_set(&config_module_in, &manifest.config_schemas)
        .map_err(|e| SchemaError::Validation {
            pointer: "/config_module".to_string(),
            message: format!("Failed to parse the config set for the module\n{e}"),
        })?;

    let config_implementation_in = module_config_json
        .get("config_implementation")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let config_implementations = parse_implementation_configuration(&config_implementation_in, &manifest.implementations)?;

    let connections = module_config_json.get("connections").cloned().unwrap_or_else(|| json!({}));
    check_connections(&connections, &manifest.requirements)?;

    Ok(ModuleConfiguration {
        config_module,
        config_implementations,
        connections,
    })
}
