use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::utils::{body_base64, deserialize_header_map, headers_to_map, map_to_headers};
use crate::{Result, TunnelError};

/// The answer to a [`Request`](super::Request), produced by an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Must match the id of the request being answered
    pub id: String,

    /// HTTP status code (200, 404, 500, etc.)
    pub code: u16,

    /// Response headers as a map of header name to list of values
    #[serde(default, deserialize_with = "deserialize_header_map")]
    pub header: HashMap<String, Vec<String>>,

    /// Fully buffered response body, Base64 on the wire
    #[serde(default, with = "body_base64")]
    pub body: Vec<u8>,
}

impl Response {
    /// Create a new response
    pub fn new(id: impl Into<String>, code: u16) -> Self {
        Self {
            id: id.into(),
            code,
            header: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Capture a response received from the local target
    pub fn from_http(
        id: impl Into<String>,
        status: StatusCode,
        headers: &HeaderMap,
        body: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            code: status.as_u16(),
            header: headers_to_map(headers),
            body,
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

    /// Turn this response into an HTTP response for the original caller.
    ///
    /// Headers are copied before the status is applied; the status code must be valid.
    pub fn into_http(self) -> Result<http::Response<Vec<u8>>> {
        let headers = map_to_headers(&self.header);
        let status = StatusCode::from_u16(self.code).map_err(|_| {
            TunnelError::InvalidMessage(format!("Invalid status code: {}", self.code))
        })?;

        let mut response = http::Response::new(self.body);
        *response.headers_mut() = headers;
        *response.status_mut() = status;

        Ok(response)
    }
}
