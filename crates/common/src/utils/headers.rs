use http::{HeaderMap, HeaderName, HeaderValue, header};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

/// Convert HTTP headers to our internal format
/// Supports multiple values per header name, kept in their original order
pub fn headers_to_map(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();

    for (name, value) in headers.iter() {
        let key = name.as_str().to_string();
        let val = String::from_utf8_lossy(value.as_bytes()).into_owned();

        map.entry(key).or_default().push(val);
    }

    map
}

/// Convert our internal header format to HTTP HeaderMap
/// Names or values that are not valid HTTP are skipped
pub fn map_to_headers(map: &HashMap<String, Vec<String>>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, values) in map.iter() {
        if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
            for value in values {
                if let Ok(header_value) = HeaderValue::from_str(value) {
                    headers.append(header_name.clone(), header_value);
                }
            }
        }
    }

    headers
}

/// Connection-scoped headers that must not be replayed on another hop
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    HeaderName::from_static("keep-alive"),
];

/// Remove hop-by-hop headers; the body is fully buffered on both sides
/// so framing is recomputed by whoever sends it next.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Deserialize a header map whose values are either a string or a list of strings.
/// `null` decodes to an empty map.
pub fn deserialize_header_map<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<HashMap<String, OneOrMany>>::deserialize(deserializer)?;

    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, values)| match values {
            OneOrMany::One(value) => (name, vec![value]),
            OneOrMany::Many(values) => (name, values),
        })
        .collect())
}
