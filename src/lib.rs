//! EDM Forms
//!
//! Schema-driven forms and CRUD for EDM/OData services.
//!
//! This library reads the `$metadata` document of a service and, with no
//! per-entity code, derives entity descriptors, editable form definitions and
//! a generic CRUD client whose validation failures come back as one
//! field-keyed error map.
//!
//! # Example
//!
//! ```
//! use edm_forms::{compile, FieldKind, SchemaDocument};
//!
//! let xml = r#"
//! <edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
//!   <edmx:DataServices>
//!     <Schema Namespace="Shop" xmlns="http://docs.oasis-open.org/odata/ns/edm">
//!       <EntityType Name="Order">
//!         <Key><PropertyRef Name="Id"/></Key>
//!         <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
//!         <Property Name="Total" Type="Edm.Decimal" Nullable="false"/>
//!         <Property Name="CustomerId" Type="Edm.Int32"/>
//!         <NavigationProperty Name="Customer" Type="Shop.Customer"/>
//!       </EntityType>
//!     </Schema>
//!   </edmx:DataServices>
//! </edmx:Edmx>"#;
//!
//! let doc = SchemaDocument::parse(xml).unwrap();
//! let compiled = compile(doc.entity("Order").unwrap());
//!
//! // Identity columns never reach the form
//! assert!(compiled.field("Id").is_none());
//! assert_eq!(compiled.field("Total").unwrap().kind, FieldKind::Number);
//! // The foreign key becomes a select fed from GET {endpoint}/Customer
//! assert_eq!(compiled.field("CustomerId").unwrap().kind, FieldKind::Select);
//! assert_eq!(compiled.lookups[0].target_entity, "Customer");
//! ```
//!
//! # Pipeline
//!
//! | Stage | Entry point |
//! |-------|-------------|
//! | fetch + memoize the document | [`MetadataCache::get`] |
//! | extract one entity type | [`SchemaDocument::parse`], [`parse_entity`] |
//! | derive fields and defaults | [`compile`], then [`resolve_options`] for selects |
//! | look up fields and renderers | [`FieldRegistry`], [`RendererResolver`] |
//! | hold values and errors | [`FormState`] |
//! | talk to the service | [`CrudClient`] |

mod cache;
mod client;
mod compiler;
mod error;
mod form;
mod loader;
mod parser;
mod registry;
mod transport;
mod types;
mod validator;

pub use cache::{
    CacheConfig, CacheEvent, CacheKey, CacheRecord, MetadataCache, DEFAULT_COALESCE_WINDOW,
    DEFAULT_TTL,
};
pub use client::{
    normalize_validation_errors, CachePolicy, CrudClient, EntityKey, EntitySet, ListQuery,
    ListResult,
};
pub use compiler::{
    compile, compile_resolved, is_identity_field, options_from_items, resolve_options,
    CompiledSchema, OptionLookup, ResolvedOptions,
};
pub use error::{CrudError, FormError, MetadataError, RegistryError, TransportError};
pub use form::FormState;
pub use loader::{
    collection_url, endpoint_of, entity_url, is_url, load_metadata, load_metadata_auto,
    load_metadata_url, metadata_url,
};
pub use parser::{parse_entity, SchemaDocument};
pub use registry::{
    render_form, CheckboxRenderer, FieldRegistry, FieldRenderer, PlainRenderer, RendererConfig,
    RendererResolver, SelectRenderer,
};
pub use transport::{HttpRequest, HttpResponse, Method, Transport};
pub use types::{
    json_type_name, EdmType, EntityDescriptor, FieldKind, FieldMap, FieldProps, FieldSchema,
    NavigationPropertyDescriptor, PropertyDescriptor, SelectOption, ValidationErrorMap, Values,
};
pub use validator::{
    schema_validator, to_json_schema, FormValidator, SchemaValidator, SharedValidator,
};

#[cfg(feature = "remote")]
pub use transport::{HttpTransport, HttpTransportBuilder};
