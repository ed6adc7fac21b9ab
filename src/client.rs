//! Generic CRUD client for entity collections of an OData-style service.
//!
//! One client serves every entity of an endpoint, either per call
//! (`client.list("Product", ..)`) or through an [`EntitySet`] handle that
//! binds the entity name once (`client.entity("Product").list(..)`).
//!
//! Validation failures are recognised in three body shapes and normalized
//! into one [`ValidationErrorMap`], first message per field:
//!
//! ```json
//! { "Name": ["The Name field is required."] }
//! { "error": { "details": [{ "target": "Name", "message": "..." }] } }
//! { "error": { "message": { "Name": "..." } } }
//! ```
//!
//! Bare field maps are only trusted on 400 and 422; the `error` object shapes
//! on any 4xx. Any other non-success response becomes an opaque
//! `CrudError::Request`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::MetadataCache;
use crate::error::{CrudError, MetadataError};
use crate::loader::{collection_url, entity_url, load_metadata_url};
use crate::parser::SchemaDocument;
use crate::transport::{HttpRequest, HttpResponse, Method, Transport};
use crate::types::{EntityDescriptor, ValidationErrorMap};

/// Key of a single entity instance, formatted as an OData literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Int(i64),
    Guid(String),
    Str(String),
}

impl EntityKey {
    /// Key from a JSON identity value (number or string).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(EntityKey::Int),
            Value::String(s) => Some(EntityKey::from(s.as_str())),
            _ => None,
        }
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        EntityKey::Int(value)
    }
}

impl From<i32> for EntityKey {
    fn from(value: i32) -> Self {
        EntityKey::Int(value.into())
    }
}

/// Integers and GUIDs become bare keys. A value already written as an OData
/// string literal (`'42'`) stays a string key, quotes doubled inside.
impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        let quoted = value
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''));
        if let Some(inner) = quoted {
            EntityKey::Str(inner.replace("''", "'"))
        } else if let Ok(n) = value.parse::<i64>() {
            EntityKey::Int(n)
        } else if is_guid(value) {
            EntityKey::Guid(value.to_string())
        } else {
            EntityKey::Str(value.to_string())
        }
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        EntityKey::from(value.as_str())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Int(n) => write!(f, "{n}"),
            EntityKey::Guid(g) => f.write_str(g),
            EntityKey::Str(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

fn is_guid(s: &str) -> bool {
    let groups: Vec<&str> = s.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()))
}

/// System query options of a list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub filter: Option<String>,
    pub select: Vec<String>,
    pub expand: Vec<String>,
    pub orderby: Option<String>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub count: bool,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn expand<I, S>(mut self, navigations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expand = navigations.into_iter().map(Into::into).collect();
        self
    }

    pub fn orderby(mut self, orderby: impl Into<String>) -> Self {
        self.orderby = Some(orderby.into());
        self
    }

    pub fn top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn count(mut self, count: bool) -> Self {
        self.count = count;
        self
    }

    /// Encoded query string without the leading `?`; empty when no option is set.
    pub fn to_query_string(&self) -> String {
        let mut params = Vec::new();
        if let Some(filter) = &self.filter {
            params.push(format!("$filter={}", urlencoding::encode(filter)));
        }
        if !self.select.is_empty() {
            params.push(format!("$select={}", urlencoding::encode(&self.select.join(","))));
        }
        if !self.expand.is_empty() {
            params.push(format!("$expand={}", urlencoding::encode(&self.expand.join(","))));
        }
        if let Some(orderby) = &self.orderby {
            params.push(format!("$orderby={}", urlencoding::encode(orderby)));
        }
        if let Some(top) = self.top {
            params.push(format!("$top={top}"));
        }
        if let Some(skip) = self.skip {
            params.push(format!("$skip={skip}"));
        }
        if self.count {
            params.push("$count=true".to_string());
        }
        params.join("&")
    }
}

/// One page of a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResult {
    #[serde(default)]
    pub value: Vec<Value>,
    #[serde(rename = "@odata.count", default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// Where the client gets entity descriptors from.
#[derive(Debug, Clone, Default)]
pub enum CachePolicy {
    /// Fetch and parse the schema document on every call.
    #[default]
    Uncached,
    /// Go through a shared metadata cache.
    Shared(MetadataCache),
}

/// CRUD client bound to one service endpoint.
#[derive(Clone)]
pub struct CrudClient {
    endpoint: String,
    transport: Arc<dyn Transport>,
    cache: CachePolicy,
}

impl fmt::Debug for CrudClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrudClient")
            .field("endpoint", &self.endpoint)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl CrudClient {
    pub fn new(endpoint: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            transport,
            cache: CachePolicy::Uncached,
        }
    }

    /// Client over the default HTTP transport.
    #[cfg(feature = "remote")]
    pub fn connect(endpoint: impl Into<String>) -> Result<Self, crate::error::TransportError> {
        let transport = crate::transport::HttpTransport::new()?;
        Ok(Self::new(endpoint, Arc::new(transport)))
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache = policy;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Handle with the entity name bound.
    pub fn entity(&self, name: impl Into<String>) -> EntitySet<'_> {
        EntitySet {
            client: self,
            name: name.into(),
        }
    }

    /// Descriptor of an entity type, according to the cache policy.
    pub async fn describe(
        &self,
        entity: &str,
        force_refresh: bool,
    ) -> Result<Arc<EntityDescriptor>, MetadataError> {
        match &self.cache {
            CachePolicy::Shared(cache) => cache.get(&self.endpoint, entity, force_refresh).await,
            CachePolicy::Uncached => {
                let xml = load_metadata_url(self.transport.as_ref(), &self.endpoint).await?;
                SchemaDocument::parse(&xml)?
                    .entity(entity)
                    .cloned()
                    .map(Arc::new)
                    .ok_or_else(|| MetadataError::EntityNotFound {
                        endpoint: self.endpoint.clone(),
                        entity: entity.to_string(),
                    })
            }
        }
    }

    /// `GET {endpoint}/{Entity}?{query}`
    pub async fn list(&self, entity: &str, query: &ListQuery) -> Result<ListResult, CrudError> {
        let mut url = collection_url(&self.endpoint, entity);
        let qs = query.to_query_string();
        if !qs.is_empty() {
            url.push('?');
            url.push_str(&qs);
        }

        let response = self.execute(HttpRequest::get(&url)).await?;
        let body = parse_body(&url, &response)?.unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(|e| CrudError::InvalidResponse {
            url,
            message: e.to_string(),
        })
    }

    /// `GET {endpoint}/{Entity}({id})[?$expand=...]`
    ///
    /// A 404 is `Ok(None)`.
    pub async fn get_by_id(
        &self,
        entity: &str,
        key: impl Into<EntityKey>,
        expand: Option<&str>,
    ) -> Result<Option<Value>, CrudError> {
        let key = key.into();
        let mut url = entity_url(&self.endpoint, entity, &key.to_string());
        if let Some(expand) = expand.filter(|e| !e.is_empty()) {
            url.push_str("?$expand=");
            url.push_str(&urlencoding::encode(expand));
        }

        match self.execute(HttpRequest::get(&url)).await {
            Ok(response) => parse_body(&url, &response),
            Err(CrudError::NotFound { .. }) => {
                tracing::debug!(entity, %key, "entity not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// `POST {endpoint}/{Entity}`; returns the created entity (`null` if the
    /// server sent no body).
    pub async fn create(&self, entity: &str, payload: &Value) -> Result<Value, CrudError> {
        let url = collection_url(&self.endpoint, entity);
        let response = self
            .execute(HttpRequest::new(Method::Post, &url).json(payload.clone()))
            .await
            .map_err(|e| with_entity(e, entity, "(new)"))?;
        tracing::info!(entity, "entity created");
        Ok(parse_body(&url, &response)?.unwrap_or(Value::Null))
    }

    /// `PUT {endpoint}/{Entity}({id})`
    pub async fn update(
        &self,
        entity: &str,
        key: impl Into<EntityKey>,
        payload: &Value,
    ) -> Result<Option<Value>, CrudError> {
        self.write(Method::Put, entity, key.into(), payload).await
    }

    /// `PATCH {endpoint}/{Entity}({id})`
    pub async fn patch(
        &self,
        entity: &str,
        key: impl Into<EntityKey>,
        payload: &Value,
    ) -> Result<Option<Value>, CrudError> {
        self.write(Method::Patch, entity, key.into(), payload).await
    }

    /// `DELETE {endpoint}/{Entity}({id})`
    pub async fn remove(&self, entity: &str, key: impl Into<EntityKey>) -> Result<(), CrudError> {
        let key = key.into();
        let url = entity_url(&self.endpoint, entity, &key.to_string());
        self.execute(HttpRequest::new(Method::Delete, &url))
            .await
            .map_err(|e| with_entity(e, entity, &key.to_string()))?;
        tracing::info!(entity, %key, "entity deleted");
        Ok(())
    }

    async fn write(
        &self,
        method: Method,
        entity: &str,
        key: EntityKey,
        payload: &Value,
    ) -> Result<Option<Value>, CrudError> {
        let url = entity_url(&self.endpoint, entity, &key.to_string());
        let response = self
            .execute(HttpRequest::new(method, &url).json(payload.clone()))
            .await
            .map_err(|e| with_entity(e, entity, &key.to_string()))?;
        tracing::info!(entity, %key, %method, "entity written");
        parse_body(&url, &response)
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, CrudError> {
        let method = request.method;
        let url = request.url.clone();
        let response = self.transport.send(request).await?;

        if response.is_success() {
            return Ok(response);
        }

        let error = error_from_response(&response);
        match &error {
            CrudError::Validation { errors } => {
                tracing::debug!(%method, %url, fields = errors.len(), "validation failed");
            }
            _ => tracing::warn!(%method, %url, status = response.status, %error, "request failed"),
        }
        Err(error)
    }
}

/// CRUD handle for one entity collection.
#[derive(Debug, Clone)]
pub struct EntitySet<'a> {
    client: &'a CrudClient,
    name: String,
}

impl EntitySet<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn describe(
        &self,
        force_refresh: bool,
    ) -> Result<Arc<EntityDescriptor>, MetadataError> {
        self.client.describe(&self.name, force_refresh).await
    }

    pub async fn list(&self, query: &ListQuery) -> Result<ListResult, CrudError> {
        self.client.list(&self.name, query).await
    }

    pub async fn get_by_id(
        &self,
        key: impl Into<EntityKey>,
        expand: Option<&str>,
    ) -> Result<Option<Value>, CrudError> {
        self.client.get_by_id(&self.name, key, expand).await
    }

    pub async fn create(&self, payload: &Value) -> Result<Value, CrudError> {
        self.client.create(&self.name, payload).await
    }

    pub async fn update(
        &self,
        key: impl Into<EntityKey>,
        payload: &Value,
    ) -> Result<Option<Value>, CrudError> {
        self.client.update(&self.name, key, payload).await
    }

    pub async fn patch(
        &self,
        key: impl Into<EntityKey>,
        payload: &Value,
    ) -> Result<Option<Value>, CrudError> {
        self.client.patch(&self.name, key, payload).await
    }

    pub async fn remove(&self, key: impl Into<EntityKey>) -> Result<(), CrudError> {
        self.client.remove(&self.name, key).await
    }
}

/// Recognise a validation-error body and flatten it to one message per field.
///
/// Returns `None` when the body matches none of the known shapes.
pub fn normalize_validation_errors(body: &Value) -> Option<ValidationErrorMap> {
    let mut errors = ValidationErrorMap::new();

    if let Some(error) = body.get("error").and_then(Value::as_object) {
        // { "error": { "details": [{ "target", "message" }] } }
        if let Some(details) = error.get("details").and_then(Value::as_array) {
            for detail in details {
                let target = detail.get("target").and_then(Value::as_str);
                let message = detail.get("message").and_then(Value::as_str);
                if let (Some(target), Some(message)) = (target, message) {
                    insert_first(&mut errors, target, message);
                }
            }
        }
        // { "error": { "message": { "Field": "..." } } }
        if errors.is_empty() {
            if let Some(fields) = error.get("message").and_then(Value::as_object) {
                collect_field_map(&mut errors, fields, true);
            }
        }
        // { "error": { "target": "Field", "message": "..." } }
        if errors.is_empty() {
            let target = error.get("target").and_then(Value::as_str);
            let message = error.get("message").and_then(Value::as_str);
            if let (Some(target), Some(message)) = (target, message) {
                insert_first(&mut errors, target, message);
            }
        }
    } else if let Some(object) = body.as_object() {
        // { "errors": { "Field": [...] }, "title": ... } or a bare { "Field": [...] }
        match object.get("errors") {
            Some(Value::Object(fields)) => collect_field_map(&mut errors, fields, false),
            // { "errors": ["..."] } lists messages, not fields
            Some(_) => {}
            None => collect_field_map(&mut errors, object, false),
        }
    }

    (!errors.is_empty()).then_some(errors)
}

/// Bare maps only count arrays of messages; a lone string there is more
/// likely a generic `message`/`title` than a field error.
fn collect_field_map(
    errors: &mut ValidationErrorMap,
    fields: &Map<String, Value>,
    allow_strings: bool,
) {
    for (field, messages) in fields {
        let first = match messages {
            Value::Array(items) => items.iter().find_map(Value::as_str),
            Value::String(s) if allow_strings => Some(s.as_str()),
            _ => None,
        };
        if let Some(message) = first {
            insert_first(errors, field, message);
        }
    }
}

fn insert_first(errors: &mut ValidationErrorMap, field: &str, message: &str) {
    let field = field.strip_prefix("$.").unwrap_or(field);
    errors
        .entry(field.to_string())
        .or_insert_with(|| message.to_string());
}

fn error_from_response(response: &HttpResponse) -> CrudError {
    let body = response.json().ok().flatten();

    let validation = match response.status {
        400 | 422 => body.as_ref().and_then(normalize_validation_errors),
        // Other client errors only count with an explicit `error` object
        401..=499 => body
            .as_ref()
            .filter(|b| b.get("error").is_some())
            .and_then(normalize_validation_errors),
        _ => None,
    };
    if let Some(errors) = validation {
        return CrudError::Validation { errors };
    }

    if response.status == 404 {
        return CrudError::NotFound {
            entity: String::new(),
            key: String::new(),
        };
    }

    let message = body
        .as_ref()
        .and_then(server_message)
        .unwrap_or_else(|| status_text(response.status));
    CrudError::Request {
        status: response.status,
        message,
    }
}

fn server_message(body: &Value) -> Option<String> {
    body.pointer("/error/message")
        .or_else(|| body.get("message"))
        .or_else(|| body.get("title"))
        .and_then(Value::as_str)
        .map(String::from)
}

fn status_text(status: u16) -> String {
    let reason = match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => return format!("HTTP {status}"),
    };
    format!("HTTP {status} {reason}")
}

fn with_entity(error: CrudError, entity: &str, key: &str) -> CrudError {
    match error {
        CrudError::NotFound { .. } => CrudError::NotFound {
            entity: entity.to_string(),
            key: key.to_string(),
        },
        other => other,
    }
}

fn parse_body(url: &str, response: &HttpResponse) -> Result<Option<Value>, CrudError> {
    response.json().map_err(|e| CrudError::InvalidResponse {
        url: url.to_string(),
        message: e.to_string(),
    })
}
