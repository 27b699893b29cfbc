//! Identifier hashing and base64 helpers.
//!
//! All binary values on the wire (payloads, keys, signatures, ids) are
//! URL-safe base64 with padding.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Computes the protocol hash of a sequence of strings.
///
/// Each element is fed to SHA-256 as its decimal byte length followed by
/// its bytes, so `["ab", "c"]` and `["a", "bc"]` never collide. The digest
/// is returned as padded URL-safe base64.
pub fn hash<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        let part = part.as_ref();
        hasher.update(part.len().to_string().as_bytes());
        hasher.update(part.as_bytes());
    }
    URL_SAFE.encode(hasher.finalize())
}

/// Encodes bytes as padded URL-safe base64.
pub fn encode_base64(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE.encode(bytes)
}

/// Decodes padded URL-safe base64.
pub fn decode_base64(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE.decode(value)
}
