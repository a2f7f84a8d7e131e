//! Local callers
//!
//! An [`HttpCaller`] turns a tunnelled [`Request`] into a [`Response`] by
//! replaying it somewhere. [`LocalCaller`] performs the real HTTP call; the
//! other callers wrap it to add logging and on-disk captures.

use backstream_common::{
    Request, Response, Result, TunnelError, map_to_headers, strip_hop_by_hop,
};
use reqwest::header::{CONTENT_LENGTH, HOST};
use reqwest::{Client, Method};
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Replays tunnelled requests and produces their responses
pub trait HttpCaller: Send + Sync + 'static {
    fn call(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Calls the local service over HTTP
#[derive(Debug, Clone)]
pub struct LocalCaller {
    client: Client,
    target: Url,
}

impl LocalCaller {
    pub fn new(target: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TunnelError::HttpError(e.to_string()))?;

        Ok(Self { client, target })
    }
}

impl HttpCaller for LocalCaller {
    async fn call(&self, request: &Request) -> Result<Response> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            TunnelError::InvalidMessage(format!("Unsupported HTTP method: {}", request.method))
        })?;
        let url = request.target_url(&self.target);

        // Host and framing come from the target URL and the buffered body
        let mut headers = map_to_headers(&request.header);
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);

        debug!("Forwarding: {} {}", request.method, url);

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| TunnelError::LocalServiceUnavailable(e.to_string()))?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);

        let body = response
            .bytes()
            .await
            .map_err(|e| TunnelError::LocalServiceUnavailable(e.to_string()))?;

        Ok(Response::from_http(
            request.id.clone(),
            status,
            &headers,
            body.to_vec(),
        ))
    }
}

/// Logs every exchange with its processing time
#[derive(Debug, Clone)]
pub struct TracingCaller<C> {
    inner: C,
}

impl<C> TracingCaller<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: HttpCaller> HttpCaller for TracingCaller<C> {
    async fn call(&self, request: &Request) -> Result<Response> {
        let start_time = Instant::now();
        let result = self.inner.call(request).await;
        let elapsed_ms = start_time.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => info!(
                request_id = %request.id,
                method = %request.method,
                path = %request.path,
                remote = %request.remote,
                code = response.code,
                elapsed_ms,
                "request served"
            ),
            Err(e) => warn!(
                request_id = %request.id,
                method = %request.method,
                path = %request.path,
                elapsed_ms,
                "request failed: {}",
                e
            ),
        }

        result
    }
}

/// Writes `<id>.json` with the request and its outcome for every exchange
#[derive(Debug, Clone)]
pub struct CaptureCaller<C> {
    inner: C,
    dir: PathBuf,
}

impl<C> CaptureCaller<C> {
    pub fn new(inner: C, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }

    async fn write_capture(&self, request: &Request, outcome: serde_json::Value) -> Result<()> {
        let mut capture = json!({ "request": request });
        if let (Some(map), serde_json::Value::Object(extra)) = (capture.as_object_mut(), outcome) {
            map.extend(extra);
        }

        let file_name = capture_file_name(&request.id).ok_or_else(|| {
            TunnelError::InvalidMessage(format!("Unsafe capture id: {:?}", request.id))
        })?;

        let data = serde_json::to_vec_pretty(&capture)?;
        let path = self.dir.join(file_name);
        tokio::fs::write(&path, data).await.map_err(|e| {
            TunnelError::InternalError(format!("Failed to write {}: {}", path.display(), e))
        })
    }
}

/// `<id>.json` when the correlation id is a plain token (`[A-Za-z0-9_-]+`)
fn capture_file_name(id: &str) -> Option<String> {
    let plain = !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    plain.then(|| format!("{}.json", id))
}

impl<C: HttpCaller> HttpCaller for CaptureCaller<C> {
    async fn call(&self, request: &Request) -> Result<Response> {
        let result = self.inner.call(request).await;

        let outcome = match &result {
            Ok(response) => json!({ "response": response }),
            Err(e) => json!({ "error": e.to_string() }),
        };

        // A failed capture never fails the exchange itself
        if let Err(e) = self.write_capture(request, outcome).await {
            warn!(request_id = %request.id, "Failed to capture exchange: {}", e);
        }

        result
    }
}
