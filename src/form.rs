//! Form state engine.
//!
//! [`FormState`] owns the values and field errors of one form instance.
//! Its key set is fixed by the compiled fields: every operation that names
//! a field checks it against that set, and [`FormState::reset_values`]
//! reconciles foreign value maps onto it.

use std::future::Future;

use serde_json::Value;

use crate::compiler::CompiledSchema;
use crate::error::{CrudError, FormError};
use crate::types::{FieldMap, ValidationErrorMap, Values};
use crate::validator::SharedValidator;

/// Values and errors of one form instance.
pub struct FormState {
    fields: FieldMap,
    defaults: Values,
    initial: Values,
    values: Values,
    errors: ValidationErrorMap,
    validator: Option<SharedValidator>,
}

impl FormState {
    /// A form over `fields`, starting from `defaults`.
    pub fn new(fields: FieldMap, defaults: Values) -> Self {
        let initial = reconcile(&fields, &defaults, &Values::new());
        Self {
            fields,
            defaults,
            values: initial.clone(),
            initial,
            errors: ValidationErrorMap::new(),
            validator: None,
        }
    }

    pub fn from_compiled(compiled: &CompiledSchema) -> Self {
        Self::new(compiled.fields.clone(), compiled.defaults.clone())
    }

    /// Start from existing values, e.g. an entity being edited.
    ///
    /// Keys outside the form are dropped and missing keys take their defaults.
    /// The result becomes what [`FormState::reset_values`] restores.
    pub fn with_initial_values(mut self, values: &Values) -> Self {
        self.initial = reconcile(&self.fields, &self.defaults, values);
        self.values = self.initial.clone();
        self
    }

    pub fn with_validator(mut self, validator: SharedValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn initial_values(&self) -> &Values {
        &self.initial
    }

    pub fn errors(&self) -> &ValidationErrorMap {
        &self.errors
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn error(&self, key: &str) -> Option<&str> {
        self.errors.get(key).map(String::as_str)
    }

    /// True when any value differs from the initial values.
    pub fn is_dirty(&self) -> bool {
        self.values != self.initial
    }

    /// Set one value and clear that field's error.
    pub fn set_value(&mut self, key: &str, value: Value) -> Result<(), FormError> {
        let slot = self
            .values
            .get_mut(key)
            .ok_or_else(|| unknown_field(key))?;
        *slot = value;
        self.errors.shift_remove(key);
        Ok(())
    }

    /// Merge a subset of values and clear their errors.
    ///
    /// Nothing is applied if any key is unknown.
    pub fn patch_values(&mut self, partial: Values) -> Result<(), FormError> {
        if let Some(key) = partial.keys().find(|k| !self.fields.contains_key(*k)) {
            return Err(unknown_field(key));
        }
        for (key, value) in partial {
            self.errors.shift_remove(&key);
            self.values.insert(key, value);
        }
        Ok(())
    }

    /// Restore the initial values, or the supplied ones reconciled onto the
    /// form's keys, and clear all errors.
    pub fn reset_values(&mut self, values: Option<&Values>) {
        self.values = match values {
            Some(values) => reconcile(&self.fields, &self.defaults, values),
            None => self.initial.clone(),
        };
        self.errors.clear();
    }

    pub fn set_error(&mut self, key: &str, message: impl Into<String>) -> Result<(), FormError> {
        if !self.fields.contains_key(key) {
            return Err(unknown_field(key));
        }
        self.errors.insert(key.to_string(), message.into());
        Ok(())
    }

    pub fn clear_error(&mut self, key: &str) {
        self.errors.shift_remove(key);
    }

    pub fn clear_all_errors(&mut self) {
        self.errors.clear();
    }

    /// Run the validator over the current values, replacing every error.
    ///
    /// Returns true when no errors remain. A form without a validator is
    /// always valid.
    pub fn validate_fields(&mut self) -> bool {
        self.errors = match &self.validator {
            Some(validator) => validator.validate(&self.values),
            None => ValidationErrorMap::new(),
        };
        self.errors.is_empty()
    }

    /// Copy server-side validation errors onto matching fields.
    ///
    /// Returns the keys that match no field, in input order.
    pub fn apply_validation_errors(&mut self, errors: &ValidationErrorMap) -> Vec<String> {
        let mut unmatched = Vec::new();
        for (key, message) in errors {
            if self.fields.contains_key(key) {
                self.errors.insert(key.clone(), message.clone());
            } else {
                unmatched.push(key.clone());
            }
        }
        unmatched
    }

    /// Validate, then hand a copy of the values to `action` if valid.
    ///
    /// An invalid form only populates errors and returns `None`.
    pub async fn submit<F, Fut, T>(&mut self, action: F) -> Option<T>
    where
        F: FnOnce(Values) -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.validate_fields() {
            tracing::debug!(errors = self.errors.len(), "submit blocked by validation");
            return None;
        }
        Some(action(self.values.clone()).await)
    }

    /// Like [`FormState::submit`] for a CRUD call.
    ///
    /// Server validation errors for known fields are applied to the form.
    /// If every key matched, the result is `Ok(None)`; otherwise the keys no
    /// field can show are returned as `CrudError::Validation`. Every other
    /// failure is returned as-is.
    pub async fn submit_request<F, Fut, T>(
        &mut self,
        action: F,
    ) -> Result<Option<T>, CrudError>
    where
        F: FnOnce(Values) -> Fut,
        Fut: Future<Output = Result<T, CrudError>>,
    {
        match self.submit(action).await {
            None => Ok(None),
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(CrudError::Validation { errors })) => {
                let unmatched = self.apply_validation_errors(&errors);
                if unmatched.is_empty() {
                    return Ok(None);
                }
                tracing::debug!(?unmatched, "server reported errors for unknown fields");
                let errors = errors
                    .into_iter()
                    .filter(|(key, _)| unmatched.contains(key))
                    .collect();
                Err(CrudError::Validation { errors })
            }
            Some(Err(other)) => Err(other),
        }
    }
}

fn reconcile(fields: &FieldMap, defaults: &Values, supplied: &Values) -> Values {
    fields
        .keys()
        .map(|key| {
            let value = supplied
                .get(key)
                .or_else(|| defaults.get(key))
                .cloned()
                .unwrap_or(Value::Null);
            (key.clone(), value)
        })
        .collect()
}

fn unknown_field(key: &str) -> FormError {
    FormError::UnknownField {
        key: key.to_string(),
    }
}
