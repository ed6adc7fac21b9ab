//! Entity descriptor parsing from EDM (CSDL/EDMX) schema documents.
//!
//! The whole document is parsed once into a [`SchemaDocument`]; individual
//! entity types are then looked up by exact, case-sensitive name. A missing
//! entity is a normal outcome and is reported as `None`, never as an error.
//!
//! Display metadata is best-effort. For each property the parser consults,
//! in order:
//!
//! 1. inline `<Annotation Term="...">` children,
//! 2. out-of-line `<Annotations Target="Ns.Entity/Property">` blocks,
//! 3. vendor attributes such as `sap:label`.
//!
//! Within each source the known terms are tried in priority order and the
//! first one present wins.

use std::collections::HashMap;

use indexmap::IndexMap;
use roxmltree::{Document, Node};

use crate::error::MetadataError;
use crate::types::{
    EdmType, EntityDescriptor, NavigationPropertyDescriptor, PropertyDescriptor,
    DESCRIPTION_ATTRIBUTES, DESCRIPTION_TERMS, DISPLAY_NAME_ATTRIBUTES, DISPLAY_NAME_TERMS,
    PLACEHOLDER_ATTRIBUTES, PLACEHOLDER_TERMS,
};

/// All entity types of one schema document, parsed once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDocument {
    namespaces: Vec<String>,
    entities: IndexMap<String, EntityDescriptor>,
}

impl SchemaDocument {
    /// Parse an EDMX/CSDL document.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::InvalidXml` when the text is not well-formed
    /// XML, or `MetadataError::InvalidDocument` when it contains no `Schema`.
    pub fn parse(xml: &str) -> Result<Self, MetadataError> {
        let doc = Document::parse(xml).map_err(|e| MetadataError::InvalidXml {
            message: e.to_string(),
        })?;

        let schemas: Vec<Node> = doc
            .descendants()
            .filter(|n| n.has_tag_name_local("Schema"))
            .collect();
        if schemas.is_empty() {
            return Err(MetadataError::InvalidDocument {
                message: "no Schema element found".to_string(),
            });
        }

        let namespaces = schemas
            .iter()
            .filter_map(|schema| schema.attribute("Namespace"))
            .map(str::to_string)
            .collect();
        let annotations = collect_targeted_annotations(&schemas);
        let mut entities = IndexMap::new();

        for schema in &schemas {
            for entity_type in schema
                .children()
                .filter(|n| n.has_tag_name_local("EntityType"))
            {
                let Some(name) = entity_type.attribute("Name") else {
                    continue;
                };
                let descriptor = parse_entity_type(entity_type, name, &annotations);
                entities.insert(name.to_string(), descriptor);
            }
        }

        tracing::debug!(entities = entities.len(), "parsed metadata document");
        Ok(Self {
            namespaces,
            entities,
        })
    }

    /// Namespaces of the `Schema` elements, in document order.
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(name)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Parse a document and extract a single entity type.
///
/// Returns `Ok(None)` when the document is valid but has no entity type with
/// exactly this name.
pub fn parse_entity(
    xml: &str,
    entity_name: &str,
) -> Result<Option<EntityDescriptor>, MetadataError> {
    let doc = SchemaDocument::parse(xml)?;
    Ok(doc.entity(entity_name).cloned())
}

/// Strip a namespace or alias qualifier: `Shop.Customer` -> `Customer`.
pub fn unqualified(type_name: &str) -> &str {
    type_name.rsplit('.').next().unwrap_or(type_name)
}

// --- Internal implementation ---

trait LocalName {
    fn has_tag_name_local(&self, name: &str) -> bool;
}

impl LocalName for Node<'_, '_> {
    fn has_tag_name_local(&self, name: &str) -> bool {
        self.is_element() && self.tag_name().name() == name
    }
}

/// Term -> value pairs keyed by `Entity/Property`.
type TargetedAnnotations = HashMap<String, HashMap<String, String>>;

fn collect_targeted_annotations(schemas: &[Node]) -> TargetedAnnotations {
    let mut result: TargetedAnnotations = HashMap::new();

    for schema in schemas {
        for block in schema
            .descendants()
            .filter(|n| n.has_tag_name_local("Annotations"))
        {
            let Some(target) = block.attribute("Target") else {
                continue;
            };
            // "Ns.Entity/Prop" -> "Entity/Prop"
            let Some((entity, prop)) = target.split_once('/') else {
                continue;
            };
            let key = format!("{}/{}", unqualified(entity), prop);
            let terms = result.entry(key).or_default();
            for annotation in block
                .children()
                .filter(|n| n.has_tag_name_local("Annotation"))
            {
                if let (Some(term), Some(value)) =
                    (annotation.attribute("Term"), annotation_value(annotation))
                {
                    terms.entry(term.to_string()).or_insert(value);
                }
            }
        }
    }

    result
}

fn parse_entity_type(
    node: Node,
    name: &str,
    annotations: &TargetedAnnotations,
) -> EntityDescriptor {
    let key = node
        .children()
        .filter(|n| n.has_tag_name_local("Key"))
        .flat_map(|k| k.children().filter(|n| n.has_tag_name_local("PropertyRef")))
        .filter_map(|r| r.attribute("Name").map(String::from))
        .collect();

    let properties = node
        .children()
        .filter(|n| n.has_tag_name_local("Property"))
        .filter_map(|p| parse_property(p, name, annotations))
        .collect();

    let navigation_properties = node
        .children()
        .filter(|n| n.has_tag_name_local("NavigationProperty"))
        .filter_map(parse_navigation)
        .collect();

    EntityDescriptor {
        name: name.to_string(),
        key,
        properties,
        navigation_properties,
    }
}

fn parse_property(
    node: Node,
    entity: &str,
    annotations: &TargetedAnnotations,
) -> Option<PropertyDescriptor> {
    let name = node.attribute("Name")?;
    let (is_collection, type_name) =
        split_collection(node.attribute("Type").unwrap_or("Edm.String"));
    let targeted = annotations.get(&format!("{entity}/{name}"));

    let lookup = |terms: &[&str], attributes: &[&str]| {
        inline_annotation(node, terms)
            .or_else(|| targeted.and_then(|t| first_term(t, terms)))
            .or_else(|| attribute_any_namespace(node, attributes))
    };

    Some(PropertyDescriptor {
        name: name.to_string(),
        abstract_type: EdmType::from_edm(type_name),
        nullable: parse_nullable(node),
        is_collection,
        // "max" and other non-numeric values mean unbounded
        max_length: node.attribute("MaxLength").and_then(|v| v.parse().ok()),
        display_name: lookup(DISPLAY_NAME_TERMS, DISPLAY_NAME_ATTRIBUTES),
        description: lookup(DESCRIPTION_TERMS, DESCRIPTION_ATTRIBUTES),
        placeholder: lookup(PLACEHOLDER_TERMS, PLACEHOLDER_ATTRIBUTES),
    })
}

fn parse_navigation(node: Node) -> Option<NavigationPropertyDescriptor> {
    let name = node.attribute("Name")?;
    let type_name = node.attribute("Type")?;

    let (is_collection, inner) = split_collection(type_name);

    Some(NavigationPropertyDescriptor {
        name: name.to_string(),
        target_entity_name: unqualified(inner).to_string(),
        nullable: parse_nullable(node),
        is_collection,
        partner: node.attribute("Partner").map(String::from),
    })
}

/// `Collection(Ns.T)` -> `(true, "Ns.T")`
fn split_collection(type_name: &str) -> (bool, &str) {
    match type_name
        .strip_prefix("Collection(")
        .and_then(|s| s.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, type_name),
    }
}

/// Missing `Nullable` means nullable.
fn parse_nullable(node: Node) -> bool {
    !matches!(node.attribute("Nullable"), Some(v) if v.eq_ignore_ascii_case("false"))
}

fn inline_annotation(node: Node, terms: &[&str]) -> Option<String> {
    terms.iter().find_map(|term| {
        node.children()
            .filter(|n| n.has_tag_name_local("Annotation"))
            .find(|n| n.attribute("Term").is_some_and(|t| term_matches(t, term)))
            .and_then(annotation_value)
    })
}

fn first_term(found: &HashMap<String, String>, terms: &[&str]) -> Option<String> {
    terms.iter().find_map(|term| {
        found
            .get(*term)
            .or_else(|| {
                found
                    .iter()
                    .find(|(t, _)| term_matches(t, term))
                    .map(|(_, v)| v)
            })
            .cloned()
    })
}

/// Terms may be written with a namespace alias (`Core.Description` for
/// `Org.OData.Core.V1.Description`), so compare exactly first and then by
/// the `Vocabulary.Term` pair with version segments dropped.
fn term_matches(actual: &str, wanted: &str) -> bool {
    actual == wanted || short_term(actual) == short_term(wanted)
}

fn short_term(term: &str) -> (&str, &str) {
    let (namespace, name) = term.rsplit_once('.').unwrap_or(("", term));
    let vocabulary = namespace
        .rsplit('.')
        .find(|segment| !is_version_segment(segment))
        .unwrap_or_default();
    (vocabulary, name)
}

fn is_version_segment(segment: &str) -> bool {
    segment
        .strip_prefix(['v', 'V'])
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

/// Value of an annotation: `String="..."` attribute, a `<String>` child,
/// or its text content.
fn annotation_value(node: Node) -> Option<String> {
    node.attribute("String")
        .map(String::from)
        .or_else(|| {
            node.children()
                .find(|n| n.has_tag_name_local("String"))
                .and_then(|n| n.text())
                .map(String::from)
        })
        .or_else(|| node.text().map(str::trim).filter(|t| !t.is_empty()).map(String::from))
}

/// Look up an attribute by local name, ignoring its namespace (`sap:label`).
fn attribute_any_namespace(node: Node, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        node.attributes()
            .find(|a| a.name() == *name)
            .map(|a| a.value().to_string())
    })
}
