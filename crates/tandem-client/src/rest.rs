//! REST helper for one-off document and user calls.
//!
//! Request bodies are sent with snake_case keys and responses come back with
//! camelCase keys, both rewritten at every nesting level.

use reqwest::header::ACCEPT;
use reqwest::Method;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Body the server returns when its own upstream call failed.
pub const FAILED_TO_FETCH: &str = "TypeError: Failed to fetch";

/// REST errors.
#[derive(Debug, Error)]
pub enum RestError {
    /// The request could not be sent or the response not read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server reported a failure.
    #[error("Server error.")]
    Server,

    /// The response body is not JSON.
    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Rewrite a camelCase key as snake_case.
///
/// `documentId` becomes `document_id`, `HTTPRequest` becomes `http_request`.
#[must_use]
pub fn decamelize(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next = chars.get(i + 1).copied();
            let after_lower = prev.is_ascii_lowercase() || prev.is_ascii_digit();
            let ends_acronym = prev.is_ascii_uppercase()
                && next.is_some_and(|n| n.is_ascii_lowercase() || n.is_ascii_digit());
            if after_lower || ends_acronym {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }

    out
}

/// Rewrite a snake_case or kebab-case key as camelCase.
#[must_use]
pub fn camelize(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;

    for c in key.chars() {
        if c == '_' || c == '-' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else if out.is_empty() {
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

/// Apply `rename` to every object key, at every depth.
#[must_use]
pub fn rename_keys(value: Value, rename: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (rename(&k), rename_keys(v, rename)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| rename_keys(v, rename))
                .collect(),
        ),
        other => other,
    }
}

/// Client for the multiplayer REST API.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    /// Create a client for the given endpoint.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Get the endpoint.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue a request and return the camelCased response.
    ///
    /// `GET` requests carry no body.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Http`] if the request fails, [`RestError::Decode`]
    /// if the response is not JSON and [`RestError::Server`] if the response is
    /// the failure sentinel.
    pub async fn request(
        &self,
        path: &str,
        data: &Value,
        method: Method,
    ) -> Result<Value, RestError> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        debug!(method = %method, url = %url, "REST request");

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(ACCEPT, "application/json");
        if method != Method::GET {
            request = request.json(&rename_keys(data.clone(), &decamelize));
        }

        let body = request.send().await?.bytes().await?;
        let value: Value = serde_json::from_slice(&body)?;

        if value.as_str() == Some(FAILED_TO_FETCH) {
            return Err(RestError::Server);
        }

        Ok(rename_keys(value, &camelize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::json;

    #[test]
    fn test_decamelize() {
        assert_eq!(decamelize("documentId"), "document_id");
        assert_eq!(decamelize("firstName"), "first_name");
        assert_eq!(decamelize("HTTPRequest"), "http_request");
        assert_eq!(decamelize("node2Id"), "node2_id");
        assert_eq!(decamelize("already_snake"), "already_snake");
    }

    #[test]
    fn test_camelize() {
        assert_eq!(camelize("document_id"), "documentId");
        assert_eq!(camelize("created-at"), "createdAt");
        assert_eq!(camelize("name"), "name");
        assert_eq!(camelize("rootId"), "rootId");
    }

    #[test]
    fn test_rename_keys_is_deep() {
        let value = json!({
            "userId": "u1",
            "userProperties": {"favoriteColor": "red"},
            "nodeList": [{"parentId": "p"}],
            "tags": ["keepThis"]
        });

        let renamed = rename_keys(value, &decamelize);

        assert_eq!(
            renamed,
            json!({
                "user_id": "u1",
                "user_properties": {"favorite_color": "red"},
                "node_list": [{"parent_id": "p"}],
                "tags": ["keepThis"]
            })
        );
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_request_rewrites_keys_both_ways() {
        let app = Router::new().route(
            "/documents",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"received": body, "created_at": "now"}))
            }),
        );
        let client = RestClient::new(serve(app).await);

        let response = client
            .request("/documents", &json!({"documentName": "Plan"}), Method::POST)
            .await
            .unwrap();

        // The echoed body arrives snake_cased, then is camelCased back.
        assert_eq!(
            response,
            json!({"received": {"documentName": "Plan"}, "createdAt": "now"})
        );
    }

    #[tokio::test]
    async fn test_failure_sentinel() {
        let app = Router::new().route(
            "/users",
            post(|| async { Json(json!(FAILED_TO_FETCH)) }),
        );
        let client = RestClient::new(serve(app).await);

        let result = client.request("users", &json!({}), Method::POST).await;
        assert!(matches!(result, Err(RestError::Server)));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = RestClient::new(format!("http://{}", addr));
        let result = client.request("users", &json!({}), Method::POST).await;
        assert!(matches!(result, Err(RestError::Http(_))));
    }
}
