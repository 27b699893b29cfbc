use crate::FederationError;
use pop_types::data::Challenge;
use rand::RngCore;
use rusqlite::{params, Connection};

/// Bytes of randomness in a challenge value, hex-encoded on the wire.
const CHALLENGE_BYTES: usize = 32;

/// An outstanding challenge minted for a federation channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    pub value: String,
    pub channel: String,
    pub valid_until: i64,
}

/// Mints a fresh random challenge valid for `ttl_secs` from `now`.
pub fn mint_challenge(now: i64, ttl_secs: i64) -> Challenge {
    let mut bytes = [0u8; CHALLENGE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    Challenge {
        value: hex::encode(bytes),
        valid_until: now + ttl_secs,
    }
}

pub fn insert_challenge(conn: &Connection, record: &ChallengeRecord) -> Result<(), FederationError> {
    conn.execute(
        "INSERT INTO federation_challenges (value, channel_path, valid_until) VALUES (?1, ?2, ?3)",
        params![record.value, record.channel, record.valid_until],
    )?;
    Ok(())
}

/// Whether `value` is outstanding on `channel` and not expired at `now`.
pub fn challenge_valid(
    conn: &Connection,
    value: &str,
    channel: &str,
    now: i64,
) -> Result<bool, FederationError> {
    let valid = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM federation_challenges
            WHERE value = ?1 AND channel_path = ?2 AND valid_until >= ?3
         )",
        params![value, channel, now],
        |row| row.get(0),
    )?;
    Ok(valid)
}

/// Consumes a challenge. Returns the number of rows removed, so a second
/// consumption of the same value returns 0.
pub fn consume_challenge(conn: &Connection, value: &str) -> Result<usize, FederationError> {
    let removed = conn.execute("DELETE FROM federation_challenges WHERE value = ?1", [value])?;
    Ok(removed)
}
