//! Base64 transport for compiled artifacts.

use base64::Engine;

use crate::error::Result;

/// Encode artifact bytes for a JSON payload (standard alphabet, padded).
pub fn encode_artifact(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a payload produced by [`encode_artifact`].
pub fn decode_artifact(text: &str) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text.trim())?)
}
