use crate::ChannelError;
use pop_types::{
    decode_base64, ChannelPath, IdsByChannel, Message, MessageBatch, MessageData, PopError,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Deserialize;

/// A message as held in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub seq: i64,
    pub channel: String,
    pub object: String,
    pub action: String,
    pub message: Message,
    data_json: String,
}

impl StoredMessage {
    /// Parses the stored payload into its typed form.
    pub fn parse_data(&self) -> Result<MessageData, PopError> {
        MessageData::from_slice(self.data_json.as_bytes())
    }
}

#[derive(Deserialize)]
struct Header {
    object: String,
    action: String,
}

const SELECT_STORED: &str =
    "SELECT seq, channel_path, object, action, message_json, data_json FROM messages";

fn map_row(row: &Row) -> rusqlite::Result<StoredMessage> {
    let message_json: String = row.get(4)?;
    let message = serde_json::from_str(&message_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(StoredMessage {
        seq: row.get(0)?,
        channel: row.get(1)?,
        object: row.get(2)?,
        action: row.get(3)?,
        message,
        data_json: row.get(5)?,
    })
}

/// Appends a message to a channel's log.
///
/// A second insert of the same `message_id` fails with
/// [`ChannelError::DuplicateMessage`], so concurrent deliveries resolve to
/// exactly one stored copy.
pub fn store_message(conn: &Connection, channel: &str, message: &Message) -> Result<(), ChannelError> {
    let payload = decode_base64(&message.data)
        .map_err(|e| ChannelError::MalformedPayload(e.to_string()))?;
    let data_json = String::from_utf8(payload)
        .map_err(|e| ChannelError::MalformedPayload(e.to_string()))?;
    let header: Header = serde_json::from_str(&data_json)?;
    let message_json = serde_json::to_string(message)?;

    let result = conn.execute(
        "INSERT INTO messages
            (message_id, channel_path, sender, object, action, message_json, data_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            message.message_id,
            channel,
            message.sender,
            header.object,
            header.action,
            message_json,
            data_json,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
            Err(ChannelError::DuplicateMessage(message.message_id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn has_message(conn: &Connection, message_id: &str) -> Result<bool, ChannelError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE message_id = ?1)",
        [message_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn get_message(conn: &Connection, message_id: &str) -> Result<Option<StoredMessage>, ChannelError> {
    let stored = conn
        .query_row(
            &format!("{SELECT_STORED} WHERE message_id = ?1"),
            [message_id],
            map_row,
        )
        .optional()?;
    Ok(stored)
}

/// All messages stored on a channel, in storage order.
pub fn catchup(conn: &Connection, channel: &str) -> Result<Vec<Message>, ChannelError> {
    let mut stmt =
        conn.prepare("SELECT message_json FROM messages WHERE channel_path = ?1 ORDER BY seq ASC")?;
    let rows = stmt.query_map([channel], |row| row.get::<_, String>(0))?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(serde_json::from_str(&row?)?);
    }
    Ok(messages)
}

/// Messages of one `object#action` on a channel, in storage order.
pub fn messages_with_action(
    conn: &Connection,
    channel: &str,
    object: &str,
    action: &str,
) -> Result<Vec<StoredMessage>, ChannelError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_STORED} WHERE channel_path = ?1 AND object = ?2 AND action = ?3 ORDER BY seq ASC"
    ))?;
    let rows = stmt.query_map(params![channel, object, action], map_row)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

/// The most recent message on a channel whose object matches and whose
/// action is one of `actions`.
pub fn last_message_with_actions(
    conn: &Connection,
    channel: &str,
    object: &str,
    actions: &[&str],
) -> Result<Option<StoredMessage>, ChannelError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_STORED} WHERE channel_path = ?1 AND object = ?2 ORDER BY seq DESC"
    ))?;
    let mut rows = stmt.query_map(params![channel, object], map_row)?;
    while let Some(row) = rows.next().transpose()? {
        if actions.contains(&row.action.as_str()) {
            return Ok(Some(row));
        }
    }
    Ok(None)
}

/// Federation channels hold per-link handshakes and are never replicated.
fn is_replicated(channel: &str) -> bool {
    !ChannelPath::new(channel).is_federation()
}

/// Every stored message id, grouped by channel. Used to build heartbeats.
/// Federation channels are left out.
pub fn ids_by_channel(conn: &Connection) -> Result<IdsByChannel, ChannelError> {
    let mut stmt =
        conn.prepare("SELECT channel_path, message_id FROM messages ORDER BY channel_path, seq")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut ids = IdsByChannel::new();
    for row in rows {
        let (channel, id) = row?;
        if !is_replicated(&channel) {
            continue;
        }
        ids.entry(channel).or_default().push(id);
    }
    Ok(ids)
}

/// The subset of `offered` ids not present in storage, grouped by channel.
/// Channels with nothing missing, and federation channels, are omitted.
pub fn missing_ids(conn: &Connection, offered: &IdsByChannel) -> Result<IdsByChannel, ChannelError> {
    let mut missing = IdsByChannel::new();
    for (channel, ids) in offered.iter().filter(|(c, _)| is_replicated(c)) {
        for id in ids {
            if !has_message(conn, id)? {
                missing.entry(channel.clone()).or_default().push(id.clone());
            }
        }
    }
    Ok(missing)
}

/// Loads the requested messages, grouped by the channel they were asked for.
/// Unknown ids and federation channels are skipped.
pub fn messages_by_ids(conn: &Connection, wanted: &IdsByChannel) -> Result<MessageBatch, ChannelError> {
    let mut stmt = conn.prepare(
        "SELECT message_json FROM messages WHERE channel_path = ?1 AND message_id = ?2",
    )?;
    let mut batch = MessageBatch::new();
    for (channel, ids) in wanted.iter().filter(|(c, _)| is_replicated(c)) {
        for id in ids {
            let json: Option<String> = stmt
                .query_row(params![channel, id], |row| row.get(0))
                .optional()?;
            if let Some(json) = json {
                batch
                    .entry(channel.clone())
                    .or_default()
                    .push(serde_json::from_str(&json)?);
            }
        }
    }
    Ok(batch)
}
