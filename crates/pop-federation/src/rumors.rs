use crate::FederationError;
use pop_types::jsonrpc::RumorParams;
use pop_types::Message;
use rusqlite::{params, Connection};

pub fn has_rumor(conn: &Connection, sender_id: &str, rumor_id: i64) -> Result<bool, FederationError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM rumors WHERE sender_id = ?1 AND rumor_id = ?2)",
        params![sender_id, rumor_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Records a rumor as applied. Returns `false` if it was already recorded.
pub fn store_rumor(conn: &Connection, rumor: &RumorParams) -> Result<bool, FederationError> {
    let params_json = serde_json::to_string(rumor)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO rumors (sender_id, rumor_id, params_json) VALUES (?1, ?2, ?3)",
        params![rumor.sender_id, rumor.rumor_id, params_json],
    )?;
    Ok(inserted == 1)
}

/// Highest rumor id recorded for `sender_id`.
pub fn max_rumor_id(conn: &Connection, sender_id: &str) -> Result<Option<i64>, FederationError> {
    let max = conn.query_row(
        "SELECT MAX(rumor_id) FROM rumors WHERE sender_id = ?1",
        [sender_id],
        |row| row.get::<_, Option<i64>>(0),
    )?;
    Ok(max)
}

/// A gossiped message that failed with a retryable error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnprocessedMessage {
    pub channel: String,
    pub message: Message,
    pub last_error: String,
}

pub fn store_unprocessed(
    conn: &Connection,
    channel: &str,
    message: &Message,
    last_error: &str,
) -> Result<(), FederationError> {
    let message_json = serde_json::to_string(message)?;
    conn.execute(
        "INSERT INTO unprocessed_messages (message_id, channel_path, message_json, last_error)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(message_id) DO UPDATE SET last_error = excluded.last_error",
        params![message.message_id, channel, message_json, last_error],
    )?;
    Ok(())
}

pub fn list_unprocessed(conn: &Connection) -> Result<Vec<UnprocessedMessage>, FederationError> {
    let mut stmt = conn.prepare(
        "SELECT channel_path, message_json, last_error FROM unprocessed_messages
         ORDER BY received_at ASC, message_id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut pending = Vec::new();
    for row in rows {
        let (channel, message_json, last_error) = row?;
        pending.push(UnprocessedMessage {
            channel,
            message: serde_json::from_str(&message_json)?,
            last_error,
        });
    }
    Ok(pending)
}

pub fn delete_unprocessed(conn: &Connection, message_id: &str) -> Result<(), FederationError> {
    conn.execute(
        "DELETE FROM unprocessed_messages WHERE message_id = ?1",
        [message_id],
    )?;
    Ok(())
}
