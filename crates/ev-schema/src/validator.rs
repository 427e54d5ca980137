//! Schema compilation and validation.

use std::sync::OnceLock;

use ev_core::Value;

const MANIFEST_SCHEMA_TEXT: &str = include_str!("schemas/manifest.schema.json");
const INTERFACE_SCHEMA_TEXT: &str = include_str!("schemas/interface.schema.json");
const CONFIG_SCHEMA_TEXT: &str = include_str!("schemas/config.schema.json");

include!(concat!(env!("OUT_DIR"), "/schema_hashes.rs"));

/// A compiled JSON-schema plus the raw text and MD5 it was built from.
pub struct SchemaValidator {
    validator: jsonschema::Validator,
    schema: Value,
}

/// The outcome of validating one instance against one [`SchemaValidator`].
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub error: Option<String>,
    pub pointer: String,
    pub instance: Option<Value>,
    /// RFC 6902 patch of `add` operations for every schema-declared default
    /// missing from the instance, set only when validation succeeded.
    pub patch: Option<Value>,
}

impl ValidationResult {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Walk `schema`'s `properties`, recursing into nested object schemas, and
/// record an `add` operation for every property `instance` is missing that
/// declares a `default` — the same "missing value falls back to the
/// schema's default" rule `apply_config_set` applies to config keys.
fn default_patch(schema: &Value, instance: &Value) -> Value {
    let mut ops = Vec::new();
    collect_default_patch_ops(schema, instance, "", &mut ops);
    Value::Array(ops)
}

fn collect_default_patch_ops(schema: &Value, instance: &Value, base_path: &str, ops: &mut Vec<Value>) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    let instance_obj = instance.as_object();

    for (key, prop_schema) in properties {
        let path = format!("{base_path}/{key}");
        match instance_obj.and_then(|obj| obj.get(key)) {
            Some(child_instance) => collect_default_patch_ops(prop_schema, child_instance, &path, ops),
            None => {
                if let Some(default) = prop_schema.get("default") {
                    ops.push(serde_json::json!({"op": "add", "path": path, "value": default.clone()}));
                }
            }
        }
    }
}

/// The `uri` format checker requires the string to contain `"://"`; every
/// other named format falls back to the library's default checker.
fn uri_format_is_valid(value: &str) -> bool {
    value.contains("://")
}

impl SchemaValidator {
    /// Compile `schema` into a validator.
    ///
    /// # Errors
    /// Returns an error if `schema` is not a valid JSON-schema document.
    pub fn new(schema: Value) -> Result<Self, String> {
        let validator = jsonschema::options()
            .with_format("uri", |value: &str| uri_format_is_valid(value))
            .build(&schema)
            .map_err(|e| e.to_string())?;
        Ok(Self { validator, schema })
    }

    /// Compile from raw schema text.
    ///
    /// # Errors
    /// Returns an error if `text` is not valid JSON or not a valid schema.
    pub fn from_text(text: &str) -> Result<Self, String> {
        let schema: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        Self::new(schema)
    }

    /// Compile a validator or abort the process.
    ///
    /// Mirrors `create_schema_validator_or_die`: a corrupt embedded schema
    /// is a build artifact defect, not a recoverable runtime condition.
    #[must_use]
    pub fn new_or_die(text: &str, schema_ref: &str) -> Self {
        match Self::from_text(text) {
            Ok(v) => v,
            Err(e) => {
                panic!(
                    "Could not create SchemaValidator (schema reference: '{schema_ref}').\nReason: {e}\nTerminating."
                );
            }
        }
    }

    /// Validate `instance`, returning the first error encountered (if any).
    #[must_use]
    pub fn validate(&self, instance: &Value) -> ValidationResult {
        match self.validator.iter_errors(instance).next() {
            None => ValidationResult {
                error: None,
                pointer: String::new(),
                instance: None,
                patch: Some(default_patch(&self.schema, instance)),
            },
            Some(err) => ValidationResult {
                error: Some(err.to_string()),
                pointer: err.instance_path.to_string(),
                instance: Some(instance.clone()),
                patch: None,
            },
        }
    }

    /// Whether `instance` validates cleanly.
    #[must_use]
    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    /// The raw schema document this validator was built from.
    #[must_use]
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Extract the `default` key of this schema, if present.
    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.schema.get("default")
    }
}

/// Raw bytes, length, and MD5 of one of the three embedded schemas.
pub struct Schema {
    pub text: &'static str,
    pub md5: &'static str,
}

fn manifest_validator() -> &'static SchemaValidator {
    static CELL: OnceLock<SchemaValidator> = OnceLock::new();
    CELL.get_or_init(|| SchemaValidator::new_or_die(MANIFEST_SCHEMA_TEXT, "module, inlined"))
}

fn interface_validator() -> &'static SchemaValidator {
    static CELL: OnceLock<SchemaValidator> = OnceLock::new();
    CELL.get_or_init(|| SchemaValidator::new_or_die(INTERFACE_SCHEMA_TEXT, "interface, inlined"))
}

fn config_validator() -> &'static SchemaValidator {
    static CELL: OnceLock<SchemaValidator> = OnceLock::new();
    CELL.get_or_init(|| SchemaValidator::new_or_die(CONFIG_SCHEMA_TEXT, "config"))
}

#[must_use]
pub fn validate_module(input: &Value) -> ValidationResult {
    manifest_validator().validate(input)
}

#[must_use]
pub fn validate_interface(input: &Value) -> ValidationResult {
    interface_validator().validate(input)
}

#[must_use]
pub fn validate_config(input: &Value) -> ValidationResult {
    config_validator().validate(input)
}

#[must_use]
pub fn get_module_schema() -> Schema {
    Schema {
        text: MANIFEST_SCHEMA_TEXT,
        md5: MANIFEST_SCHEMA_MD5,
    }
}

#[must_use]
pub fn get_interface_schema() -> Schema {
    Schema {
        text: INTERFACE_SCHEMA_TEXT,
        md5: INTERFACE_SCHEMA_MD5,
    }
}

#[must_use]
pub fn get_config_schema() -> Schema {
    Schema {
        text: CONFIG_SCHEMA_TEXT,
        md5: CONFIG_SCHEMA_MD5,
    }
}
