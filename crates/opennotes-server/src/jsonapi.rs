//! JSON:API 1.1 envelope types.

use axum::Json;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// The JSON:API media type.
pub const MEDIA_TYPE: &str = "application/vnd.api+json";

/// `jsonapi` member advertising the implemented version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonApiVersion {
    pub version: &'static str,
}

impl Default for JsonApiVersion {
    fn default() -> Self {
        Self { version: "1.1" }
    }
}

/// A single resource object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource<T> {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
    pub attributes: T,
}

/// Top-level document wrapping one resource.
#[derive(Debug, Clone, Serialize)]
pub struct Document<T> {
    pub data: Resource<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    pub jsonapi: JsonApiVersion,
}

/// Top-level document wrapping a resource collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionDocument<T> {
    pub data: Vec<Resource<T>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    pub jsonapi: JsonApiVersion,
}

impl<T: Serialize> Document<T> {
    #[must_use]
    pub fn new(resource_type: &str, id: impl ToString, attributes: T) -> Self {
        Self {
            data: Resource {
                resource_type: resource_type.to_owned(),
                id: id.to_string(),
                attributes,
            },
            meta: None,
            jsonapi: JsonApiVersion::default(),
        }
    }

    #[must_use]
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

impl<T: Serialize> CollectionDocument<T> {
    #[must_use]
    pub fn new(resources: Vec<Resource<T>>) -> Self {
        Self {
            data: resources,
            meta: None,
            jsonapi: JsonApiVersion::default(),
        }
    }
}

fn with_media_type(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(MEDIA_TYPE));
    response
}

impl<T: Serialize> IntoResponse for Document<T> {
    fn into_response(self) -> Response {
        with_media_type(Json(self).into_response())
    }
}

impl<T: Serialize> IntoResponse for CollectionDocument<T> {
    fn into_response(self) -> Response {
        with_media_type(Json(self).into_response())
    }
}

/// One error object of an error document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub status: String,
    pub title: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<serde_json::Value>,
}

/// Top-level error document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDocument {
    pub errors: Vec<ErrorObject>,
}

impl ErrorDocument {
    #[must_use]
    pub fn single(status: u16, title: &str, detail: String) -> Self {
        Self {
            errors: vec![ErrorObject {
                status: status.to_string(),
                title: title.to_owned(),
                detail,
                source: None,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_shape_matches_jsonapi() {
        let doc = Document::new("batch-jobs", "abc", json!({"status": "pending"}));
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["data"]["type"], "batch-jobs");
        assert_eq!(value["data"]["id"], "abc");
        assert_eq!(value["data"]["attributes"]["status"], "pending");
        assert_eq!(value["jsonapi"]["version"], "1.1");
    }

    #[test]
    fn error_document_shape() {
        let doc = ErrorDocument::single(409, "Conflict", "active job exists".to_owned());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["errors"][0]["status"], "409");
        assert_eq!(value["errors"][0]["title"], "Conflict");
    }
}
