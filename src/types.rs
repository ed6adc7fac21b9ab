//! Core types for entity descriptors and compiled field schemas.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Annotation terms carrying a human-readable label, highest priority first.
pub const DISPLAY_NAME_TERMS: &[&str] = &[
    "Org.OData.Display.V1.DisplayName",
    "Common.Label",
    "com.sap.vocabularies.Common.v1.Label",
    "Core.DisplayName",
];

/// Annotation terms carrying help text, highest priority first.
pub const DESCRIPTION_TERMS: &[&str] = &[
    "Org.OData.Core.V1.Description",
    "Core.Description",
    "Common.QuickInfo",
    "com.sap.vocabularies.Common.v1.QuickInfo",
];

/// Annotation terms carrying input placeholder text, highest priority first.
pub const PLACEHOLDER_TERMS: &[&str] = &[
    "Org.OData.UI.V1.Placeholder",
    "UI.Placeholder",
    "com.sap.vocabularies.UI.v1.Placeholder",
];

/// Vendor attributes consulted when no annotation term is present.
pub const DISPLAY_NAME_ATTRIBUTES: &[&str] = &["label", "DisplayName"];
pub const DESCRIPTION_ATTRIBUTES: &[&str] = &["quickinfo", "Description"];
pub const PLACEHOLDER_ATTRIBUTES: &[&str] = &["placeholder", "Placeholder"];

/// Step used for fractional number inputs.
pub const DECIMAL_STEP: f64 = 0.01;

/// Strings longer than this compile to a textarea.
pub const TEXTAREA_THRESHOLD: u32 = 255;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Abstract primitive type of a property, mapped from `Edm.*` names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdmType {
    String,
    Int32,
    Int64,
    Decimal,
    Double,
    Boolean,
    DateTime,
    Guid,
    Binary,
    /// Complex, enum or otherwise unrecognised type, kept by name.
    Other(String),
}

impl EdmType {
    /// Map an `Edm.*` type name to its abstract type.
    pub fn from_edm(name: &str) -> Self {
        match name {
            "Edm.String" => EdmType::String,
            "Edm.Int32" | "Edm.Int16" | "Edm.Byte" | "Edm.SByte" => EdmType::Int32,
            "Edm.Int64" => EdmType::Int64,
            "Edm.Decimal" => EdmType::Decimal,
            "Edm.Double" | "Edm.Single" => EdmType::Double,
            "Edm.Boolean" => EdmType::Boolean,
            "Edm.DateTime" | "Edm.DateTimeOffset" | "Edm.Date" => EdmType::DateTime,
            "Edm.Guid" => EdmType::Guid,
            "Edm.Binary" | "Edm.Stream" => EdmType::Binary,
            other => EdmType::Other(other.to_string()),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            EdmType::Int32 | EdmType::Int64 | EdmType::Decimal | EdmType::Double
        )
    }

    pub fn is_fractional(&self) -> bool {
        matches!(self, EdmType::Decimal | EdmType::Double)
    }
}

/// A structural property of an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub abstract_type: EdmType,
    pub nullable: bool,
    /// Declared as `Collection(Edm.*)`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_collection: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

/// A relationship from one entity type to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationPropertyDescriptor {
    pub name: String,
    /// Unqualified name of the target entity type.
    pub target_entity_name: String,
    pub nullable: bool,
    pub is_collection: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner: Option<String>,
}

impl NavigationPropertyDescriptor {
    /// Name of the foreign-key property this navigation expects on its owner.
    pub fn foreign_key_name(&self) -> String {
        format!("{}Id", self.name)
    }
}

/// A fully parsed entity type. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,
    pub properties: Vec<PropertyDescriptor>,
    pub navigation_properties: Vec<NavigationPropertyDescriptor>,
}

impl EntityDescriptor {
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn navigation(&self, name: &str) -> Option<&NavigationPropertyDescriptor> {
        self.navigation_properties.iter().find(|n| n.name == name)
    }
}

/// Abstract kind of a form field, independent of how it is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Email,
    Password,
    Tel,
    Url,
    Textarea,
    Number,
    Checkbox,
    Date,
    Select,
    File,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Email => "email",
            FieldKind::Password => "password",
            FieldKind::Tel => "tel",
            FieldKind::Url => "url",
            FieldKind::Textarea => "textarea",
            FieldKind::Number => "number",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Date => "date",
            FieldKind::Select => "select",
            FieldKind::File => "file",
        }
    }

    /// Infer a kind from a field name alone.
    ///
    /// Returns `None` when the name carries no hint; name hints win over
    /// type-based inference.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.contains("email") {
            Some(FieldKind::Email)
        } else if lower.contains("password") {
            Some(FieldKind::Password)
        } else if lower.contains("phone") || lower.contains("mobile") {
            Some(FieldKind::Tel)
        } else if lower.contains("url") || lower.contains("website") {
            Some(FieldKind::Url)
        } else {
            None
        }
    }

    /// Infer a kind from the abstract property type.
    pub fn from_type(edm: &EdmType, max_length: Option<u32>) -> Self {
        match edm {
            EdmType::String => match max_length {
                Some(len) if len > TEXTAREA_THRESHOLD => FieldKind::Textarea,
                _ => FieldKind::Text,
            },
            EdmType::Int32 | EdmType::Int64 | EdmType::Decimal | EdmType::Double => {
                FieldKind::Number
            }
            EdmType::Boolean => FieldKind::Checkbox,
            EdmType::DateTime => FieldKind::Date,
            EdmType::Binary => FieldKind::File,
            EdmType::Guid | EdmType::Other(_) => FieldKind::Text,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A selectable value of a `select` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: Value,
    pub label: String,
}

/// Presentation properties of a compiled field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldProps {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation_property: Option<String>,
}

/// Renderer-agnostic description of one form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub key: String,
    pub kind: FieldKind,
    pub props: FieldProps,
}

/// Compiled fields of one entity, keyed by field name in declaration order.
pub type FieldMap = IndexMap<String, FieldSchema>;

/// Current or default values of a form, keyed by field name.
pub type Values = IndexMap<String, Value>;

/// Field-keyed validation messages, one per field.
pub type ValidationErrorMap = IndexMap<String, String>;
