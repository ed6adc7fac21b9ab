//! Field registry and renderer resolution.
//!
//! The registry holds field definitions by key. Rendering is looked up by
//! [`FieldKind`], never by field type: a [`RendererResolver`] layers
//! per-instance overrides over a shared [`RendererConfig`] and ends in a
//! generic fallback, so the same compiled fields can be drawn by unrelated
//! renderer sets.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::compiler::{CompiledSchema, ResolvedOptions};
use crate::error::RegistryError;
use crate::form::FormState;
use crate::types::{FieldKind, FieldMap, FieldProps, FieldSchema};

/// Field definitions of one form, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldRegistry {
    fields: FieldMap,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_compiled(compiled: &CompiledSchema) -> Self {
        Self {
            fields: compiled.fields.clone(),
        }
    }

    /// Register or replace a field definition.
    pub fn preset(
        &mut self,
        key: impl Into<String>,
        kind: FieldKind,
        props: FieldProps,
    ) -> &mut Self {
        let key = key.into();
        self.fields.insert(key.clone(), FieldSchema { key, kind, props });
        self
    }

    pub fn get(&self, key: &str) -> Result<&FieldSchema, RegistryError> {
        self.fields.get(key).ok_or_else(|| RegistryError::UnknownField {
            key: key.to_string(),
        })
    }

    pub fn get_all(&self) -> &FieldMap {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Store an option list delivered after the registry was built.
    ///
    /// A failed lookup leaves the field untouched.
    pub fn apply_options(&mut self, resolved: &ResolvedOptions) -> Result<(), RegistryError> {
        let field = self
            .fields
            .get_mut(&resolved.field)
            .ok_or_else(|| RegistryError::UnknownField {
                key: resolved.field.clone(),
            })?;
        if let Ok(options) = &resolved.result {
            field.props.options = options.clone();
        }
        Ok(())
    }
}

/// Draws one field. Implementations must be safe to share across threads.
pub trait FieldRenderer: Send + Sync {
    fn render(&self, field: &FieldSchema, value: &Value, error: Option<&str>) -> String;
}

/// `Label*: value` with the error on the following line.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRenderer;

impl FieldRenderer for PlainRenderer {
    fn render(&self, field: &FieldSchema, value: &Value, error: Option<&str>) -> String {
        let shown = match value {
            Value::Null => field.props.placeholder.clone().unwrap_or_default(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        with_error(format!("{}: {}", heading(field), shown), error)
    }
}

/// `[x] Label`
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckboxRenderer;

impl FieldRenderer for CheckboxRenderer {
    fn render(&self, field: &FieldSchema, value: &Value, error: Option<&str>) -> String {
        let mark = if value.as_bool().unwrap_or(false) { 'x' } else { ' ' };
        with_error(format!("[{mark}] {}", heading(field)), error)
    }
}

/// Shows the selected option's label and the size of the option list.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectRenderer;

impl FieldRenderer for SelectRenderer {
    fn render(&self, field: &FieldSchema, value: &Value, error: Option<&str>) -> String {
        let options = &field.props.options;
        let selected = options
            .iter()
            .find(|o| &o.value == value)
            .map(|o| o.label.clone())
            .or_else(|| field.props.placeholder.clone())
            .unwrap_or_default();
        with_error(
            format!("{}: <{}> ({} options)", heading(field), selected, options.len()),
            error,
        )
    }
}

/// Renderers configured for every form of an application.
#[derive(Clone, Default)]
pub struct RendererConfig {
    by_kind: HashMap<FieldKind, Arc<dyn FieldRenderer>>,
    default: Option<Arc<dyn FieldRenderer>>,
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checkbox and select renderers registered, plain text for the rest.
    pub fn standard() -> Self {
        Self::new()
            .with_kind(FieldKind::Checkbox, Arc::new(CheckboxRenderer))
            .with_kind(FieldKind::Select, Arc::new(SelectRenderer))
    }

    pub fn with_kind(mut self, kind: FieldKind, renderer: Arc<dyn FieldRenderer>) -> Self {
        self.by_kind.insert(kind, renderer);
        self
    }

    pub fn with_default(mut self, renderer: Arc<dyn FieldRenderer>) -> Self {
        self.default = Some(renderer);
        self
    }
}

/// Resolves renderers for one form instance.
///
/// Order: instance override, configured kind renderer, configured default,
/// generic fallback.
#[derive(Clone)]
pub struct RendererResolver {
    config: Arc<RendererConfig>,
    overrides: HashMap<FieldKind, Arc<dyn FieldRenderer>>,
    fallback: Arc<dyn FieldRenderer>,
}

impl RendererResolver {
    pub fn new(config: Arc<RendererConfig>) -> Self {
        Self {
            config,
            overrides: HashMap::new(),
            fallback: Arc::new(PlainRenderer),
        }
    }

    pub fn with_override(mut self, kind: FieldKind, renderer: Arc<dyn FieldRenderer>) -> Self {
        self.overrides.insert(kind, renderer);
        self
    }

    pub fn resolve(&self, kind: FieldKind) -> &dyn FieldRenderer {
        let renderer = self
            .overrides
            .get(&kind)
            .or_else(|| self.config.by_kind.get(&kind))
            .or(self.config.default.as_ref())
            .unwrap_or(&self.fallback);
        &**renderer
    }
}

impl Default for RendererResolver {
    fn default() -> Self {
        Self::new(Arc::new(RendererConfig::default()))
    }
}

/// Render every registered field with its current value and error.
pub fn render_form(
    registry: &FieldRegistry,
    state: &FormState,
    resolver: &RendererResolver,
) -> Vec<String> {
    registry
        .get_all()
        .values()
        .map(|field| {
            let value = state.value(&field.key).unwrap_or(&Value::Null);
            resolver
                .resolve(field.kind)
                .render(field, value, state.error(&field.key))
        })
        .collect()
}

fn heading(field: &FieldSchema) -> String {
    if field.props.required {
        format!("{}*", field.props.label)
    } else {
        field.props.label.clone()
    }
}

fn with_error(line: String, error: Option<&str>) -> String {
    match error {
        Some(message) => format!("{line}\n  ! {message}"),
        None => line,
    }
}
