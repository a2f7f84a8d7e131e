use http::request::Parts;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use url::Url;

use super::Response;
use crate::utils::{
    body_base64, deserialize_header_map, generate_request_id, headers_to_map, target_url,
};

/// An inbound HTTP call captured by the relay and forwarded to the agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation ID, generated by the relay and never reused
    pub id: String,

    /// HTTP method (GET, POST, PUT, DELETE, etc.)
    pub method: String,

    /// Request path including the query string
    /// Example: "/api/v1/users?limit=10"
    pub path: String,

    /// HTTP headers as a map of header name to list of values
    #[serde(default, deserialize_with = "deserialize_header_map")]
    pub header: HashMap<String, Vec<String>>,

    /// Fully buffered request body, Base64 on the wire
    #[serde(default, with = "body_base64")]
    pub body: Vec<u8>,

    /// Address of the original caller
    #[serde(default)]
    pub remote: String,
}

impl Request {
    /// Create a new request with a fresh correlation ID
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: generate_request_id(),
            method: method.into(),
            path: path.into(),
            header: HashMap::new(),
            body: Vec::new(),
            remote: String::new(),
        }
    }

    /// Capture an incoming HTTP request. The body must already be buffered.
    pub fn from_http(parts: &Parts, body: Vec<u8>, remote: Option<SocketAddr>) -> Self {
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Self {
            id: generate_request_id(),
            method: parts.method.as_str().to_string(),
            path: path.to_string(),
            header: headers_to_map(&parts.headers),
            body,
            remote: remote.map(|addr| addr.to_string()).unwrap_or_default(),
        }
    }

    /// Add a header value, keeping any existing values
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Replace the body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Resolve this request against the local target's base URL
    pub fn target_url(&self, base: &Url) -> Url {
        target_url(base, &self.path)
    }

    /// Build the response answering this request
    pub fn respond(&self, code: u16) -> Response {
        Response::new(self.id.clone(), code)
    }
}
