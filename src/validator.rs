//! Form value validation against compiled schemas.
//!
//! A [`SchemaValidator`] checks presence of required fields itself and hands
//! type and length checks to a JSON Schema built from the compiled fields.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::compiler::CompiledSchema;
use crate::error::FormError;
use crate::types::{FieldKind, FieldSchema, ValidationErrorMap, Values};

/// Validator injected into a form: current values in, field errors out.
pub trait FormValidator: Send + Sync {
    fn validate(&self, values: &Values) -> ValidationErrorMap;
}

impl<F> FormValidator for F
where
    F: Fn(&Values) -> ValidationErrorMap + Send + Sync,
{
    fn validate(&self, values: &Values) -> ValidationErrorMap {
        self(values)
    }
}

/// Shared, type-erased validator.
pub type SharedValidator = Arc<dyn FormValidator>;

/// Presence, type and length checks derived from a compiled schema.
pub struct SchemaValidator {
    /// `(key, label)` of every required field, in field order.
    required: Vec<(String, String)>,
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    /// Build a validator for the fields of `compiled`.
    ///
    /// # Errors
    ///
    /// Returns `FormError::InvalidSchema` if the derived JSON Schema is rejected.
    pub fn new(compiled: &CompiledSchema) -> Result<Self, FormError> {
        let schema = to_json_schema(compiled);
        let validator =
            jsonschema::validator_for(&schema).map_err(|e| FormError::InvalidSchema {
                message: e.to_string(),
            })?;

        let required = compiled
            .fields
            .values()
            .filter(|f| f.props.required && f.kind != FieldKind::Checkbox)
            .map(|f| (f.key.clone(), f.props.label.clone()))
            .collect();

        Ok(Self {
            required,
            validator,
        })
    }
}

impl FormValidator for SchemaValidator {
    fn validate(&self, values: &Values) -> ValidationErrorMap {
        let mut errors = ValidationErrorMap::new();

        for (key, label) in &self.required {
            if values.get(key).map_or(true, is_blank) {
                errors.insert(key.clone(), format!("{label} is required."));
            }
        }

        let instance = Value::Object(
            values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        for error in self.validator.iter_errors(&instance) {
            let path = error.instance_path.to_string();
            let Some(field) = path.trim_start_matches('/').split('/').next() else {
                continue;
            };
            if field.is_empty() {
                continue;
            }
            errors
                .entry(field.to_string())
                .or_insert_with(|| error.to_string());
        }

        errors
    }
}

/// Build a [`SchemaValidator`] ready to inject into a form.
///
/// # Errors
///
/// Returns `FormError::InvalidSchema` if the derived JSON Schema is rejected.
pub fn schema_validator(compiled: &CompiledSchema) -> Result<SharedValidator, FormError> {
    Ok(Arc::new(SchemaValidator::new(compiled)?))
}

/// JSON Schema describing the value shapes of a compiled form.
///
/// Presence is not part of it: an empty string or `null` counts as missing,
/// which `required` cannot express.
pub fn to_json_schema(compiled: &CompiledSchema) -> Value {
    let properties: Map<String, Value> = compiled
        .fields
        .values()
        .map(|field| {
            let collection = compiled
                .defaults
                .get(&field.key)
                .is_some_and(Value::is_array);
            (field.key.clone(), field_schema(field, collection))
        })
        .collect();

    json!({
        "type": "object",
        "properties": properties,
    })
}

// --- Internal implementation ---

fn field_schema(field: &FieldSchema, collection: bool) -> Value {
    if collection {
        return json!({ "type": ["array", "null"] });
    }
    match field.kind {
        FieldKind::Number => json!({ "type": ["number", "null"] }),
        FieldKind::Checkbox => json!({ "type": ["boolean", "null"] }),
        // option values may be numeric or string keys
        FieldKind::Select | FieldKind::File => json!({}),
        _ => {
            let mut schema = json!({ "type": ["string", "null"] });
            if let Some(max) = field.props.max_length {
                schema["maxLength"] = json!(max);
            }
            schema
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
