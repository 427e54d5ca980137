//! Loads a full deployment: every module entry's manifest, interfaces, and
//! per-module config, then cross-checks every requirement's fulfillments
//! against the rest of the deployment.

use std::collections::HashMap;

use ev_core::{Fulfillment, Value};
use ev_module_model::Module;
use ev_schema::Interface;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::ManifestSource;

/// One module entry fully resolved: its manifest-backed [`Module`], its
/// normalized config, and its typed connections.
pub struct ResolvedModule {
    pub module_type: String,
    pub module: Module,
    pub config_module: Value,
    pub config_implementations: Value,
    pub connections: HashMap<String, Vec<Fulfillment>>,
    pub standalone: bool,
}

/// A fully loaded and cross-checked deployment.
pub struct DeploymentConfig {
    pub modules: HashMap<String, ResolvedModule>,
}

impl DeploymentConfig {
    #[must_use]
    pub fn module(&self, module_id: &str) -> Option<&ResolvedModule> {
        self.modules.get(module_id)
    }
}

fn parse_connections(connections_json: &Value) -> HashMap<String, Vec<Fulfillment>> {
    let mut out = HashMap::new();
    let Some(obj) = connections_json.as_object() else {
        return out;
    };
    for (req_id, fulfillments_json) in obj {
        let fulfillments = fulfillments_json
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|entry| {
                        let module_id = entry.get("module_id").and_then(Value::as_str).unwrap_or_default();
                        let implementation_id = entry.get("implementation_id").and_then(Value::as_str).unwrap_or_default();
                        Fulfillment::new(module_id, implementation_id)
                    })
                    .collect()
            })
            .unwrap_or_default();
        out.insert(req_id.clone(), fulfillments);
    }
    out
}

fn load_interfaces(module: &ev_schema::ModuleManifest, manifests: &dyn ManifestSource) -> ConfigResult<HashMap<String, Interface>> {
    let mut interfaces = HashMap::new();
    let interface_names = module
        .implementations
        .values()
        .map(|i| i.interface.clone())
        .chain(module.requirements.values().map(|r| r.interface.clone()));

    for name in interface_names {
        if interfaces.contains_key(&name) {
            continue;
        }
        let text = manifests.interface_text(&name)?;
        let interface = ev_schema::parse_interface(&text)?;
        interfaces.insert(name, interface);
    }

    Ok(interfaces)
}

/// Parse and validate `deployment_json` against the top-level config schema,
/// resolve every listed module's manifest and interfaces, normalize its
/// config, and cross-check every fulfillment: the target module must exist
/// in this same deployment, provide a matching implementation, and that
/// implementation's interface must match the requirement it fulfills. No
/// module may fulfill its own requirement.
pub fn load(deployment_json: &Value, manifests: &dyn ManifestSource, standalone_modules: &[String]) -> ConfigResult<DeploymentConfig> {
    let validation = ev_schema::validate_config(deployment_json);
    if !validation.ok() {
        return Err(ConfigError::Schema(ev_schema::SchemaError::Validation {
            pointer: validation.pointer,
            message: validation.error.unwrap_or_default(),
        }));
    }

    let entries = deployment_json.as_object().ok_or_else(|| {
        ConfigError::Schema(ev_schema::SchemaError::Validation {
            pointer: String::new(),
            message: "deployment config must be a JSON object keyed by module id".to_string(),
        })
    })?;

    let mut modules = HashMap::new();
    for (module_id, entry) in entries {
        let module_type = entry
            .get("module")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ConfigError::Schema(ev_schema::SchemaError::Validation {
                    pointer: format!("/{module_id}/module"),
                    message: format!("module entry '{module_id}' is missing its 'module' type"),
                })
            })?
            .to_string();

        let manifest_text = manifests.module_manifest_text(&module_type)?;
        let manifest = ev_schema::parse_module(&manifest_text)?;
        let module_configuration = ev_schema::parse_module_configuration(entry, &manifest)?;
        let interfaces = load_interfaces(&manifest, manifests)?;

        let connections = parse_connections(&module_configuration.connections);
        let standalone = entry.get("standalone").and_then(Value::as_bool).unwrap_or(false)
            || standalone_modules.iter().any(|id| id == module_id);

        modules.insert(
            module_id.clone(),
            ResolvedModule {
                module_type,
                module: Module::new(module_id.clone(), manifest, interfaces),
                config_module: module_configuration.config_module,
                config_implementations: module_configuration.config_implementations,
                connections,
                standalone,
            },
        );
    }

    validate_fulfillments(&modules)?;

    Ok(DeploymentConfig { modules })
}

fn validate_fulfillments(modules: &HashMap<String, ResolvedModule>) -> ConfigResult<()> {
    for (module_id, resolved) in modules {
        for (requirement_id, fulfillments) in &resolved.connections {
            let Some(requirement) = resolved.module.manifest.requirements.get(requirement_id) else {
                continue;
            };

            for fulfillment in fulfillments {
                if &fulfillment.module_id == module_id {
                    return Err(ConfigError::SelfFulfillment {
                        module_id: module_id.clone(),
                        requirement_id: requirement_id.clone(),
                    });
                }

                let Some(target) = modules.get(&fulfillment.module_id) else {
                    return Err(ConfigError::MissingFulfillmentTarget {
                        module_id: module_id.clone(),
                        requirement_id: requirement_id.clone(),
                        fulfillment: fulfillment.clone(),
                    });
                };

                let Some(target_implementation) = target.module.manifest.implementations.get(&fulfillment.implementation_id)
                else {
                    return Err(ConfigError::UnknownFulfillmentImplementation {
                        module_id: module_id.clone(),
                        requirement_id: requirement_id.clone(),
                        fulfillment: fulfillment.clone(),
                    });
                };

                if target_implementation.interface != requirement.interface {
                    return Err(ConfigError::InterfaceMismatch {
                        module_id: module_id.clone(),
                        requirement_id: requirement_id.clone(),
                        fulfillment: fulfillment.clone(),
                        expected: requirement.interface.clone(),
                        actual: target_implementation.interface.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MockManifestSource;
    use serde_json::json;

    fn manifest_text() -> &'static str {
        r#"{
            "metadata": { "authors": [], "license": "MIT" },
            "implements": { "main": { "interface": "evse" } },
            "requires": { "power_path": { "interface": "power_supply", "min_connections": 1, "max_connections": 1 } }
        }"#
    }

    fn provider_manifest_text() -> &'static str {
        r#"{
            "metadata": { "authors": [], "license": "MIT" },
            "implements": { "main": { "interface": "power_supply" } }
        }"#
    }

    fn interface_text() -> &'static str {
        r#"{"cmds": {}, "vars": {}}"#
    }

    fn sources() -> MockManifestSource {
        MockManifestSource::new()
            .with_manifest("evse_module", manifest_text())
            .with_manifest("power_module", provider_manifest_text())
            .with_interface("evse", interface_text())
            .with_interface("power_supply", interface_text())
    }

    #[test]
    fn loads_and_cross_checks_a_valid_deployment() {
        let deployment = json!({
            "charger": {
                "module": "evse_module",
                "connections": { "power_path": [{ "module_id": "supply", "implementation_id": "main" }] }
            },
            "supply": { "module": "power_module" }
        });

        let config = load(&deployment, &sources(), &[]).unwrap();
        assert_eq!(config.modules.len(), 2);
        let charger = config.module("charger").unwrap();
        assert_eq!(charger.connections["power_path"][0].module_id, "supply");
    }

    #[test]
    fn rejects_self_fulfillment() {
        let deployment = json!({
            "charger": {
                "module": "evse_module",
                "connections": { "power_path": [{ "module_id": "charger", "implementation_id": "main" }] }
            }
        });

        let err = load(&deployment, &sources(), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::SelfFulfillment { .. }));
    }

    #[test]
    fn rejects_fulfillment_target_not_in_deployment() {
        let deployment = json!({
            "charger": {
                "module": "evse_module",
                "connections": { "power_path": [{ "module_id": "ghost", "implementation_id": "main" }] }
            }
        });

        let err = load(&deployment, &sources(), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFulfillmentTarget { .. }));
    }

    #[test]
    fn rejects_interface_mismatch() {
        let deployment = json!({
            "charger": {
                "module": "evse_module",
                "connections": { "power_path": [{ "module_id": "other_charger", "implementation_id": "main" }] }
            },
            "other_charger": { "module": "evse_module" }
        });

        let err = load(&deployment, &sources(), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::InterfaceMismatch { .. }));
    }

    #[test]
    fn marks_standalone_modules() {
        let deployment = json!({ "supply": { "module": "power_module" } });
        let config = load(&deployment, &sources(), &["supply".to_string()]).unwrap();
        assert!(config.module("supply").unwrap().standalone);
    }
}
