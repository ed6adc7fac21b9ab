//! Metadata loading from various sources, and service URL construction.
//!
//! Handles loading schema documents from files, strings and service
//! endpoints, and builds the resource URLs the cache and client talk to.

use std::path::Path;

use crate::error::{MetadataError, TransportError};
use crate::transport::{HttpRequest, Transport, ACCEPT_XML};

/// Path segment of the schema document below a service root.
pub const METADATA_SEGMENT: &str = "$metadata";

/// Load a schema document from a file path.
///
/// # Errors
///
/// Returns `MetadataError::FileNotFound` if the file doesn't exist,
/// or `MetadataError::ReadError` if it can't be read.
pub fn load_metadata(path: &Path) -> Result<String, MetadataError> {
    if !path.exists() {
        return Err(MetadataError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    std::fs::read_to_string(path).map_err(|source| MetadataError::ReadError {
        path: path.to_path_buf(),
        message: source.to_string(),
    })
}

/// Fetch the schema document of a service endpoint.
///
/// # Errors
///
/// Returns `MetadataError::Transport` if the request fails or the server
/// answers with a non-success status.
pub async fn load_metadata_url(
    transport: &dyn Transport,
    endpoint: &str,
) -> Result<String, MetadataError> {
    let url = metadata_url(endpoint);
    tracing::info!(%url, "fetching metadata");

    let response = transport
        .send(HttpRequest::get(&url).accept(ACCEPT_XML))
        .await?;

    // Check for HTTP errors before parsing
    if !response.is_success() {
        return Err(TransportError::new(&url, format!("HTTP {}", response.status))
            .with_status(response.status)
            .into());
    }

    Ok(response.body)
}

/// Load a schema document from a file path or service endpoint.
///
/// Automatically detects whether the source is a URL or file path.
pub async fn load_metadata_auto(
    transport: &dyn Transport,
    source: &str,
) -> Result<String, MetadataError> {
    if is_url(source) {
        load_metadata_url(transport, endpoint_of(source)).await
    } else {
        load_metadata(Path::new(source))
    }
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Strip a trailing `/$metadata` so either form can name a service.
pub fn endpoint_of(source: &str) -> &str {
    let trimmed = source.trim_end_matches('/');
    trimmed
        .strip_suffix(METADATA_SEGMENT)
        .map(|s| s.trim_end_matches('/'))
        .unwrap_or(trimmed)
}

/// `{endpoint}/$metadata`
pub fn metadata_url(endpoint: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), METADATA_SEGMENT)
}

/// `{endpoint}/{Entity}`
pub fn collection_url(endpoint: &str, entity: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), entity)
}

/// `{endpoint}/{Entity}({key})`, the key already formatted as an OData literal.
pub fn entity_url(endpoint: &str, entity: &str, key: &str) -> String {
    format!("{}({})", collection_url(endpoint, entity), key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_metadata_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "<edmx:Edmx/>").unwrap();

        let doc = load_metadata(file.path()).unwrap();
        assert!(doc.starts_with("<edmx:Edmx/>"));
    }

    #[test]
    fn load_metadata_file_not_found() {
        let result = load_metadata(Path::new("/nonexistent/metadata.xml"));
        assert!(matches!(result, Err(MetadataError::FileNotFound { .. })));
    }

    #[test]
    fn is_url_detection() {
        assert!(is_url("https://example.com/odata"));
        assert!(is_url("http://localhost:5000/odata"));
        assert!(!is_url("/path/to/metadata.xml"));
        assert!(!is_url("metadata.xml"));
    }

    #[test]
    fn endpoint_of_strips_metadata_segment() {
        assert_eq!(endpoint_of("http://svc/odata/$metadata"), "http://svc/odata");
        assert_eq!(endpoint_of("http://svc/odata/"), "http://svc/odata");
        assert_eq!(endpoint_of("http://svc/odata"), "http://svc/odata");
    }

    #[test]
    fn url_builders() {
        assert_eq!(metadata_url("http://svc/odata/"), "http://svc/odata/$metadata");
        assert_eq!(
            collection_url("http://svc/odata", "Customer"),
            "http://svc/odata/Customer"
        );
        assert_eq!(
            entity_url("http://svc/odata", "Order", "42"),
            "http://svc/odata/Order(42)"
        );
    }
}
