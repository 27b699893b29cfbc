//! ElGamal encryption of ballot indexes on edwards25519.
//!
//! A plaintext is embedded into a curve point whose compressed encoding
//! starts with the data length followed by the data bytes; the remaining
//! bytes are random and chosen so the point lies in the prime-order
//! subgroup. A ciphertext is `K || C` with `K = k·B` and `C = M + k·P`.

use crate::error::CryptoError;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use pop_types::{decode_base64, encode_base64};
use rand::RngCore;

/// Length in bytes of an encrypted ballot (`K || C`).
pub const CIPHERTEXT_LEN: usize = 64;

/// Maximum number of data bytes a single point can carry.
const EMBED_CAPACITY: usize = 29;

fn random_scalar() -> Scalar {
    let mut wide = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

fn decode_point(bytes: &[u8]) -> Option<EdwardsPoint> {
    let bytes: [u8; 32] = bytes.try_into().ok()?;
    CompressedEdwardsY(bytes).decompress()
}

/// The per-election keypair held by the server.
#[derive(Clone)]
pub struct ElectionKeyPair {
    secret: Scalar,
    public: EdwardsPoint,
}

impl std::fmt::Debug for ElectionKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectionKeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

impl ElectionKeyPair {
    pub fn generate() -> Self {
        let secret = random_scalar();
        Self {
            secret,
            public: EdwardsPoint::mul_base(&secret),
        }
    }

    /// Restores a keypair from its stored canonical scalar encoding.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidSecretKey)?;
        let secret = Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes))
            .ok_or(CryptoError::InvalidSecretKey)?;
        Ok(Self {
            secret,
            public: EdwardsPoint::mul_base(&secret),
        })
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Base64 of the compressed public point, as published in `election#key`.
    pub fn public_key(&self) -> String {
        encode_base64(self.public.compress().as_bytes())
    }

    /// Decrypts a ballot ciphertext into the chosen option index.
    pub fn decrypt_index(&self, ciphertext: &[u8]) -> Result<u16, CryptoError> {
        if ciphertext.len() != CIPHERTEXT_LEN {
            return Err(CryptoError::InvalidCiphertext(format!(
                "expected {CIPHERTEXT_LEN} bytes, got {}",
                ciphertext.len()
            )));
        }

        let k = decode_point(&ciphertext[..32])
            .ok_or_else(|| CryptoError::InvalidCiphertext("K is not a point".to_string()))?;
        let c = decode_point(&ciphertext[32..])
            .ok_or_else(|| CryptoError::InvalidCiphertext("C is not a point".to_string()))?;

        let shared = self.secret * k;
        let plain = (c - shared).compress().to_bytes();

        let len = usize::from(plain[0]);
        if len > EMBED_CAPACITY {
            return Err(CryptoError::InvalidCiphertext(
                "embedded length out of range".to_string(),
            ));
        }
        let data = &plain[1..1 + len];
        if data.len() < 2 {
            return Err(CryptoError::InvalidCiphertext(
                "embedded data shorter than an index".to_string(),
            ));
        }
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }
}

fn embed(data: &[u8]) -> EdwardsPoint {
    let mut rng = rand::thread_rng();
    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        bytes[0] = data.len() as u8;
        bytes[1..1 + data.len()].copy_from_slice(data);

        if let Some(point) = CompressedEdwardsY(bytes).decompress() {
            if point.is_torsion_free() && point.compress().to_bytes() == bytes {
                return point;
            }
        }
    }
}

/// Encrypts an option index for the election public key (base64).
pub fn encrypt_index(public_key: &str, index: u16) -> Result<Vec<u8>, CryptoError> {
    let bytes = decode_base64(public_key).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let public = decode_point(&bytes)
        .ok_or_else(|| CryptoError::InvalidPublicKey("not a curve point".to_string()))?;

    let message = embed(&index.to_be_bytes());
    let k = random_scalar();
    let big_k = EdwardsPoint::mul_base(&k);
    let c = message + k * public;

    let mut out = Vec::with_capacity(CIPHERTEXT_LEN);
    out.extend_from_slice(big_k.compress().as_bytes());
    out.extend_from_slice(c.compress().as_bytes());
    Ok(out)
}
