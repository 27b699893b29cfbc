//! Signing, signature verification and ElGamal ballot encryption.
//!
//! Message signatures are Schnorr signatures on edwards25519 whose wire
//! format (`R || s`, 64 bytes) and verification equation are those of
//! Ed25519, so `ed25519-dalek` verifies them directly. Secret ballots use
//! ElGamal over the same curve via `curve25519-dalek`.

mod elgamal;
mod error;
mod signing;

pub use elgamal::{encrypt_index, ElectionKeyPair, CIPHERTEXT_LEN};
pub use error::CryptoError;
pub use signing::{decode_public_key, verify_signature, KeyPair};
