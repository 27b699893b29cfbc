/// Errors raised by key handling, signature checks and ballot decryption.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// A public key could not be decoded.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// A signature could not be decoded.
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),

    /// The signature does not match the payload and key.
    #[error("signature verification failed")]
    VerificationFailed,

    /// A secret key could not be decoded.
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// A ballot ciphertext is malformed or does not decrypt to an index.
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),
}
