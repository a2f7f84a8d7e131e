mod encoding;
mod endpoint;
mod headers;
mod id;

pub use encoding::{body_base64, decode_body, encode_body};
pub use endpoint::{target_url, to_websocket_url};
pub use headers::{deserialize_header_map, headers_to_map, map_to_headers, strip_hop_by_hop};
pub use id::{generate_agent_id, generate_request_id};
