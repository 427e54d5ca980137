//! `Module`, `ModuleBuilder`, and `InterfaceMapBuilder`: the in-memory
//! representation of a module's manifest plus its resolved interface map.

use std::collections::HashMap;

use ev_schema::{CommandType, Implementation, Interface, ModuleManifest, Requirement, VariableType, parse_interface};

use crate::error::{ModuleModelError, ModuleModelResult};

/// Deduplicates interface texts by name, rejecting name collisions whose
/// content hash disagrees with what was already seen.
#[derive(Default)]
pub struct InterfaceMapBuilder {
    interfaces: HashMap<String, Interface>,
}

impl InterfaceMapBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `interface_text` and add it under `name`, checking hash
    /// consistency if `name` was already added.
    pub fn add(&mut self, name: &str, interface_text: &str) -> ModuleModelResult<&mut Self> {
        let interface = parse_interface(interface_text).map_err(|_| ModuleModelError::MissingInterface(name.to_string()))?;
        self.insert(name, interface)?;
        Ok(self)
    }

    fn insert(&mut self, name: &str, interface: Interface) -> ModuleModelResult<()> {
        match self.interfaces.get(name) {
            None => {
                self.interfaces.insert(name.to_string(), interface);
            }
            Some(existing) if existing.hash == interface.hash => {}
            Some(_) => {
                return Err(ModuleModelError::InterfaceHashMismatch {
                    interface: name.to_string(),
                    owner: name.to_string(),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn build(self) -> HashMap<String, Interface> {
        self.interfaces
    }
}

/// Collects implementations and requirements while cross-checking that any
/// interface name reused across them agrees on its content hash.
pub struct ModuleBuilder {
    module_id: String,
    hash: String,
    implementations: HashMap<String, Implementation>,
    requirements: HashMap<String, Requirement>,
    interfaces: HashMap<String, Interface>,
}

impl ModuleBuilder {
    #[must_use]
    pub fn new(module_id: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            hash: hash.into(),
            implementations: HashMap::new(),
            requirements: HashMap::new(),
            interfaces: HashMap::new(),
        }
    }

    fn insert_interface(&mut self, interface_name: &str, interface: Interface) -> ModuleModelResult<()> {
        match self.interfaces.get(interface_name) {
            None => {
                self.interfaces.insert(interface_name.to_string(), interface);
                Ok(())
            }
            Some(existing) if existing.hash == interface.hash => Ok(()),
            Some(_) => Err(ModuleModelError::InterfaceHashMismatch {
                interface: interface_name.to_string(),
                owner: interface_name.to_string(),
            }),
        }
    }

    pub fn add_implementation(
        &mut self,
        id: impl Into<String>,
        def: Implementation,
        interface: Interface,
    ) -> ModuleModelResult<&mut Self> {
        let id = id.into();
        if self.implementations.contains_key(&id) {
            return Err(ModuleModelError::DuplicateImplementation(id));
        }
        self.insert_interface(&def.interface, interface)
            .map_err(|_| ModuleModelError::InterfaceHashMismatch {
                interface: def.interface.clone(),
                owner: id.clone(),
            })?;
        self.implementations.insert(id, def);
        Ok(self)
    }

    pub fn add_requirement(
        &mut self,
        id: impl Into<String>,
        def: Requirement,
        interface: Interface,
    ) -> ModuleModelResult<&mut Self> {
        let id = id.into();
        if self.requirements.contains_key(&id) {
            return Err(ModuleModelError::DuplicateRequirement(id));
        }
        self.insert_interface(&def.interface, interface)
            .map_err(|_| ModuleModelError::InterfaceHashMismatch {
                interface: def.interface.clone(),
                owner: id.clone(),
            })?;
        self.requirements.insert(id, def);
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> Module {
        Module {
            id: self.module_id,
            manifest: ModuleManifest {
                capabilities: Vec::new(),
                config_schemas: HashMap::new(),
                implementations: self.implementations,
                requirements: self.requirements,
                metadata: ev_schema::Metadata {
                    authors: Vec::new(),
                    license: String::new(),
                },
                hash: self.hash,
            },
            interfaces: self.interfaces,
        }
    }
}

/// `{id, manifest, interfaces}` — a module together with its fully
/// resolved interface map.
pub struct Module {
    pub id: String,
    pub manifest: ModuleManifest,
    pub interfaces: HashMap<String, Interface>,
}

impl Module {
    #[must_use]
    pub fn new(id: impl Into<String>, manifest: ModuleManifest, interfaces: HashMap<String, Interface>) -> Self {
        Self {
            id: id.into(),
            manifest,
            interfaces,
        }
    }

    pub fn get_implementation_interface(&self, implementation_id: &str) -> ModuleModelResult<&Interface> {
        let implementation = self
            .manifest
            .implementations
            .get(implementation_id)
            .ok_or_else(|| ModuleModelError::UnknownImplementation(implementation_id.to_string()))?;
        self.interfaces
            .get(&implementation.interface)
            .ok_or_else(|| ModuleModelError::MissingInterface(implementation.interface.clone()))
    }

    pub fn get_requirement_interface(&self, requirement_id: &str) -> ModuleModelResult<&Interface> {
        let requirement = self
            .manifest
            .requirements
            .get(requirement_id)
            .ok_or_else(|| ModuleModelError::UnknownRequirement(requirement_id.to_string()))?;
        self.interfaces
            .get(&requirement.interface)
            .ok_or_else(|| ModuleModelError::MissingInterface(requirement.interface.clone()))
    }

    pub fn get_command_type_for_implementation(&self, implementation_id: &str, command_name: &str) -> ModuleModelResult<&CommandType> {
        let interface = self.get_implementation_interface(implementation_id)?;
        interface
            .commands
            .get(command_name)
            .ok_or_else(|| ModuleModelError::UnknownCommand(command_name.to_string()))
    }

    pub fn get_variable_type_for_implementation(&self, implementation_id: &str, variable_name: &str) -> ModuleModelResult<&VariableType> {
        let interface = self.get_implementation_interface(implementation_id)?;
        interface
            .variables
            .get(variable_name)
            .ok_or_else(|| ModuleModelError::UnknownVariable(variable_name.to_string()))
    }

    pub fn get_command_type_for_requirement(&self, requirement_id: &str, command_name: &str) -> ModuleModelResult<&CommandType> {
        let interface = self.get_requirement_interface(requirement_id)?;
        interface
            .commands
            .get(command_name)
            .ok_or_else(|| ModuleModelError::UnknownCommand(command_name.to_string()))
    }

    pub fn get_variable_type_for_requirement(&self, requirement_id: &str, variable_name: &str) -> ModuleModelResult<&VariableType> {
        let interface = self.get_requirement_interface(requirement_id)?;
        interface
            .variables
            .get(variable_name)
            .ok_or_else(|| ModuleModelError::UnknownVariable(variable_name.to_string()))
    }

    #[must_use]
    pub fn has_implementable_commands(&self) -> bool {
        self.manifest.implementations.values().any(|impl_def| {
            self.interfaces
                .get(&impl_def.interface)
                .is_some_and(|intf| !intf.commands.is_empty())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ev_schema::parse_interface as parse_intf;

    fn echo_interface() -> Interface {
        parse_intf(r#"{"cmds":{"echo":{"arguments":{},"result":{}}},"vars":{}}"#).unwrap()
    }

    #[test]
    fn builder_rejects_duplicate_implementation_id() {
        let mut builder = ModuleBuilder::new("mod_a", "h1");
        builder
            .add_implementation("main", Implementation { interface: "evse".into(), config_schemas: HashMap::new() }, echo_interface())
            .unwrap();
        let err = builder
            .add_implementation("main", Implementation { interface: "evse".into(), config_schemas: HashMap::new() }, echo_interface())
            .unwrap_err();
        assert!(matches!(err, ModuleModelError::DuplicateImplementation(_)));
    }

    #[test]
    fn builder_rejects_interface_hash_mismatch() {
        let mut builder = ModuleBuilder::new("mod_a", "h1");
        builder
            .add_implementation("main", Implementation { interface: "evse".into(), config_schemas: HashMap::new() }, echo_interface())
            .unwrap();
        let different = parse_intf(r#"{"cmds":{"other":{"arguments":{},"result":{}}},"vars":{}}"#).unwrap();
        let err = builder
            .add_requirement("power", Requirement { interface: "evse".into(), min_connections: 1, max_connections: 1 }, different)
            .unwrap_err();
        assert!(matches!(err, ModuleModelError::InterfaceHashMismatch { .. }));
    }

    #[test]
    fn module_lookups_report_distinct_error_kinds() {
        let mut builder = ModuleBuilder::new("mod_a", "h1");
        builder
            .add_implementation("main", Implementation { interface: "evse".into(), config_schemas: HashMap::new() }, echo_interface())
            .unwrap();
        let module = builder.build();

        assert!(module.get_command_type_for_implementation("main", "echo").is_ok());
        assert!(matches!(
            module.get_command_type_for_implementation("main", "missing"),
            Err(ModuleModelError::UnknownCommand(_))
        ));
        assert!(matches!(
            module.get_command_type_for_implementation("ghost", "echo"),
            Err(ModuleModelError::UnknownImplementation(_))
        ));
    }
}
