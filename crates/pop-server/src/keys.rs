//! Server identity key, created on first start and persisted.

use pop_crypto::KeyPair;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("stored server key has {0} bytes, expected 32")]
    Corrupt(usize),
}

/// Loads the server signing key, generating and storing one if none exists.
pub fn load_or_create_server_key(conn: &Connection) -> Result<KeyPair, KeyError> {
    let stored: Option<Vec<u8>> = conn
        .query_row("SELECT secret_key FROM server_keys WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    if let Some(secret) = stored {
        let bytes: [u8; 32] = secret
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::Corrupt(secret.len()))?;
        return Ok(KeyPair::from_secret_bytes(&bytes));
    }

    let keys = KeyPair::generate();
    conn.execute(
        "INSERT INTO server_keys (id, secret_key, public_key) VALUES (1, ?1, ?2)",
        params![keys.secret_bytes().to_vec(), keys.public_key()],
    )?;
    tracing::info!(public_key = %keys.public_key(), "generated server key");
    Ok(keys)
}
