//! Ed25519-compatible Schnorr keys.

use crate::error::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use pop_types::{decode_base64, encode_base64, Message, MessageData, PopError};
use rand::rngs::OsRng;

/// A signing keypair: the server identity, or an organizer/attendee key in
/// tests and tools.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Base64 public key, as used in `sender` fields.
    pub fn public_key(&self) -> String {
        encode_base64(self.signing_key.verifying_key().as_bytes())
    }

    /// Signs raw bytes and returns the base64 signature.
    pub fn sign(&self, bytes: &[u8]) -> String {
        encode_base64(self.signing_key.sign(bytes).to_bytes())
    }

    /// Builds a complete signed message carrying `data`.
    pub fn sign_message(&self, data: &MessageData) -> Result<Message, PopError> {
        let payload = data.to_bytes()?;
        let data = encode_base64(&payload);
        let signature = self.sign(&payload);
        let message_id = Message::compute_id(&data, &signature);

        Ok(Message {
            data,
            sender: self.public_key(),
            signature,
            message_id,
            witness_signatures: Vec::new(),
        })
    }
}

/// Decodes a base64 public key.
pub fn decode_public_key(public_key: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = decode_base64(public_key).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey("expected 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Verifies a base64 signature over `payload` with a base64 public key.
pub fn verify_signature(
    public_key: &str,
    payload: &[u8],
    signature: &str,
) -> Result<(), CryptoError> {
    let key = decode_public_key(public_key)?;
    let bytes =
        decode_base64(signature).map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    let bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature("expected 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&bytes);

    key.verify(payload, &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pop_types::data::ChallengeRequest;

    #[test]
    fn sign_and_verify() {
        let keys = KeyPair::generate();
        let signature = keys.sign(b"payload");
        verify_signature(&keys.public_key(), b"payload", &signature).expect("should verify");

        let err = verify_signature(&keys.public_key(), b"tampered", &signature)
            .expect_err("tampered payload must fail");
        assert!(matches!(err, CryptoError::VerificationFailed));

        let other = KeyPair::generate();
        assert!(verify_signature(&other.public_key(), b"payload", &signature).is_err());
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let keys = KeyPair::generate();
        assert!(matches!(
            verify_signature("short", b"x", &keys.sign(b"x")),
            Err(CryptoError::InvalidPublicKey(_))
        ));
        assert!(matches!(
            verify_signature(&keys.public_key(), b"x", "AAAA"),
            Err(CryptoError::InvalidSignature(_))
        ));
    }

    #[test]
    fn signed_message_is_self_consistent() {
        let keys = KeyPair::from_secret_bytes(&[7u8; 32]);
        let data = MessageData::ChallengeRequest(ChallengeRequest { timestamp: 42 });
        let msg = keys.sign_message(&data).expect("should sign");

        assert_eq!(msg.sender, keys.public_key());
        assert_eq!(msg.message_id, Message::compute_id(&msg.data, &msg.signature));
        let payload = msg.payload().expect("payload");
        verify_signature(&msg.sender, &payload, &msg.signature).expect("should verify");
        assert_eq!(msg.parse_data().expect("parse"), data);
    }
}
