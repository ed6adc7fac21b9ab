//! Schema compilation - turns an entity descriptor into form fields.
//!
//! [`compile`] is pure and synchronous: it returns every field, its default
//! value, and the list of foreign-key lookups whose `select` options still
//! need fetching. Those lookups are resolved separately by
//! [`resolve_options`], which yields each option list as soon as its own
//! request finishes.
//!
//! # Field kind inference
//!
//! | Source | Kind |
//! |--------|------|
//! | name contains `email` / `password` / `phone` / `url` | email / password / tel / url |
//! | `string`, `maxLength > 255` | textarea |
//! | `string`, `guid`, other | text |
//! | `int32`, `int64`, `decimal`, `double` | number (step for fractional) |
//! | `boolean` | checkbox |
//! | `datetime` | date |
//! | `binary` | file |
//!
//! Name hints are checked first.

use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};

use crate::client::{CrudClient, ListQuery};
use crate::error::CrudError;
use crate::types::{
    EdmType, EntityDescriptor, FieldKind, FieldMap, FieldProps, FieldSchema,
    NavigationPropertyDescriptor, PropertyDescriptor, SelectOption, Values, DECIMAL_STEP,
};

/// Item fields tried, in order, for an option's value.
pub const IDENTITY_FIELDS: &[&str] = &["Id", "id", "ID"];

/// Item fields tried, in order, for an option's label.
pub const LABEL_FIELDS: &[&str] = &["Name", "name", "Title", "title", "DisplayName", "displayName"];

/// A `select` field whose options come from another entity's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionLookup {
    /// Foreign-key field the options belong to (`CustomerId`).
    pub field: String,
    pub navigation: String,
    pub target_entity: String,
}

/// Result of compiling one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledSchema {
    pub entity: String,
    pub fields: FieldMap,
    pub defaults: Values,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lookups: Vec<OptionLookup>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl CompiledSchema {
    pub fn field(&self, key: &str) -> Option<&FieldSchema> {
        self.fields.get(key)
    }

    /// Store a resolved option list on its `select` field.
    ///
    /// Returns false when the lookup failed or the field is unknown; a failed
    /// lookup leaves the field with no options.
    pub fn apply_options(&mut self, resolved: &ResolvedOptions) -> bool {
        let options = match &resolved.result {
            Ok(options) => options,
            Err(error) => {
                tracing::warn!(field = %resolved.field, %error, "option lookup failed");
                return false;
            }
        };
        match self.fields.get_mut(&resolved.field) {
            Some(field) => {
                field.props.options = options.clone();
                true
            }
            None => false,
        }
    }
}

/// Option list for one lookup, delivered independently of the others.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub field: String,
    pub result: Result<Vec<SelectOption>, CrudError>,
}

/// Server-assigned identity columns never become form fields.
///
/// The match is on lowercase `id` anywhere in the name, so `VideoId` and
/// `ProviderId` count as identity. A foreign key behind a single-valued
/// navigation still comes back as a select field: the navigation pass runs
/// after this filter and its result wins. Without such a navigation the
/// property stays excluded.
pub fn is_identity_field(name: &str) -> bool {
    name == "Id" || name == "id" || name.contains("id")
}

/// Compile a descriptor into fields, defaults and pending option lookups.
///
/// Compiling the same descriptor twice yields identical output.
pub fn compile(descriptor: &EntityDescriptor) -> CompiledSchema {
    let mut fields = FieldMap::new();
    let mut defaults = Values::new();
    let mut lookups = Vec::new();
    let mut warnings = Vec::new();

    for property in &descriptor.properties {
        if is_identity_field(&property.name) {
            continue;
        }
        let field = compile_property(property);
        defaults.insert(property.name.clone(), default_value(property));
        fields.insert(property.name.clone(), field);
    }

    for navigation in descriptor
        .navigation_properties
        .iter()
        .filter(|n| !n.is_collection)
    {
        let fk_name = navigation.foreign_key_name();
        let Some(fk) = descriptor.property(&fk_name) else {
            let warning = format!(
                "navigation {}.{} skipped: no {} property",
                descriptor.name, navigation.name, fk_name
            );
            tracing::warn!(entity = %descriptor.name, navigation = %navigation.name, "{warning}");
            warnings.push(warning);
            continue;
        };

        fields.insert(fk_name.clone(), compile_reference(navigation, fk));
        defaults.insert(fk_name.clone(), Value::Null);
        lookups.push(OptionLookup {
            field: fk_name,
            navigation: navigation.name.clone(),
            target_entity: navigation.target_entity_name.clone(),
        });
    }

    CompiledSchema {
        entity: descriptor.name.clone(),
        fields,
        defaults,
        lookups,
        warnings,
    }
}

/// Issue one list query per lookup and yield each option list as it lands.
///
/// The stream ends once every lookup has produced a result.
pub fn resolve_options<'a>(
    client: &'a CrudClient,
    lookups: &[OptionLookup],
) -> BoxStream<'a, ResolvedOptions> {
    lookups
        .iter()
        .cloned()
        .map(|lookup| async move {
            let result = client
                .list(&lookup.target_entity, &ListQuery::default())
                .await
                .map(|page| options_from_items(&page.value));
            ResolvedOptions {
                field: lookup.field,
                result,
            }
        })
        .collect::<FuturesUnordered<_>>()
        .boxed()
}

/// Compile and wait for every option list.
pub async fn compile_resolved(
    client: &CrudClient,
    descriptor: &EntityDescriptor,
) -> CompiledSchema {
    let mut compiled = compile(descriptor);
    let lookups = compiled.lookups.clone();
    let mut stream = resolve_options(client, &lookups);
    while let Some(resolved) = stream.next().await {
        compiled.apply_options(&resolved);
    }
    compiled
}

/// Map collection items to options; items without an identity are skipped.
pub fn options_from_items(items: &[Value]) -> Vec<SelectOption> {
    items
        .iter()
        .filter_map(|item| {
            let id = IDENTITY_FIELDS
                .iter()
                .find_map(|k| item.get(*k))
                .filter(|v| !v.is_null())?;
            let label = LABEL_FIELDS
                .iter()
                .find_map(|k| item.get(*k).and_then(Value::as_str))
                .map(String::from)
                .unwrap_or_else(|| format!("ID: {}", display_id(id)));
            Some(SelectOption {
                value: id.clone(),
                label,
            })
        })
        .collect()
}

// --- Internal implementation ---

fn compile_property(property: &PropertyDescriptor) -> FieldSchema {
    let kind = FieldKind::from_name(&property.name)
        .unwrap_or_else(|| FieldKind::from_type(&property.abstract_type, property.max_length));

    FieldSchema {
        key: property.name.clone(),
        kind,
        props: FieldProps {
            label: property
                .display_name
                .clone()
                .unwrap_or_else(|| humanize(&property.name)),
            help_text: property.description.clone(),
            placeholder: property.placeholder.clone(),
            required: !property.nullable,
            max_length: property.max_length,
            step: (kind == FieldKind::Number && property.abstract_type.is_fractional())
                .then_some(DECIMAL_STEP),
            options: Vec::new(),
            navigation_property: None,
        },
    }
}

fn compile_reference(
    navigation: &NavigationPropertyDescriptor,
    fk: &PropertyDescriptor,
) -> FieldSchema {
    let label = fk
        .display_name
        .clone()
        .unwrap_or_else(|| humanize(&navigation.name));

    FieldSchema {
        key: fk.name.clone(),
        kind: FieldKind::Select,
        props: FieldProps {
            placeholder: Some(format!("Select {}", label.to_lowercase())),
            label,
            help_text: fk.description.clone(),
            required: !fk.nullable,
            options: Vec::new(),
            navigation_property: Some(navigation.name.clone()),
            ..FieldProps::default()
        },
    }
}

/// Typed default for required properties, `null` for optional ones.
/// Checkboxes have no null state and always start unchecked.
fn default_value(property: &PropertyDescriptor) -> Value {
    if property.abstract_type == EdmType::Boolean && !property.is_collection {
        return Value::Bool(false);
    }
    if property.nullable {
        return Value::Null;
    }
    if property.is_collection {
        return json!([]);
    }
    match &property.abstract_type {
        t if t.is_numeric() => json!(0),
        EdmType::Binary => Value::Null,
        _ => json!(""),
    }
}

/// `CustomerName` -> `Customer Name`, `unit_price` -> `Unit Price`
fn humanize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if c == '_' {
            out.push(' ');
        } else if c.is_uppercase() && prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
            out.push(' ');
            out.push(c);
        } else if prev.map_or(true, |p| p == '_') {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

fn display_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
