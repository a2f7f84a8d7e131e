use url::Url;

use crate::{Result, TunnelError};

/// Convert a relay URL into the WebSocket URL the agent dials.
///
/// `http` maps to `ws` and `https` to `wss`; WebSocket URLs pass through.
pub fn to_websocket_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;

    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(TunnelError::ConnectionError(format!(
                "Unsupported scheme: {}",
                other
            )));
        }
    };

    url.set_scheme(scheme)
        .map_err(|_| TunnelError::ConnectionError(format!("Cannot switch scheme to {}", scheme)))?;
    Ok(url)
}

/// Build the local target URL for a forwarded path.
///
/// The base URL's path is replaced by `path`. A query string carried in `path`
/// replaces the base query; without one the base query is kept.
pub fn target_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();

    match path.split_once('?') {
        Some((path, query)) => {
            url.set_path(path);
            url.set_query(Some(query));
        }
        None => url.set_path(path),
    }
    url.set_fragment(None);

    url
}
