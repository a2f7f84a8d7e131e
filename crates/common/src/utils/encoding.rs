use base64::{Engine as _, engine::general_purpose::STANDARD};

/// Encode bytes to Base64 string
pub fn encode_body(body: &[u8]) -> String {
    STANDARD.encode(body)
}

/// Decode Base64 string to bytes
pub fn decode_body(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}

/// Serde adapter carrying raw bytes as a Base64 string.
///
/// `null` and a missing field both decode to an empty body.
pub mod body_base64 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::encode_body(body))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => super::decode_body(&encoded).map_err(D::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
