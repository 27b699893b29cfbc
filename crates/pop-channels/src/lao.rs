//! LAO records and roll-call queries.

use crate::messages::{last_message_with_actions, StoredMessage};
use crate::ChannelError;
use pop_types::MessageData;
use rusqlite::{params, Connection, OptionalExtension};

/// The persisted identity of a LAO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaoRecord {
    pub path: String,
    pub lao_id: String,
    pub organizer: String,
    pub witnesses: Vec<String>,
    pub creation: i64,
}

pub fn insert_lao(conn: &Connection, lao: &LaoRecord) -> Result<(), ChannelError> {
    let witnesses_json = serde_json::to_string(&lao.witnesses)?;
    conn.execute(
        "INSERT INTO laos (path, lao_id, organizer, witnesses_json, creation)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            lao.path,
            lao.lao_id,
            lao.organizer,
            witnesses_json,
            lao.creation
        ],
    )?;
    Ok(())
}

pub fn get_lao(conn: &Connection, lao_path: &str) -> Result<Option<LaoRecord>, ChannelError> {
    let row = conn
        .query_row(
            "SELECT path, lao_id, organizer, witnesses_json, creation FROM laos WHERE path = ?1",
            [lao_path],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((path, lao_id, organizer, witnesses_json, creation)) => Ok(Some(LaoRecord {
            path,
            lao_id,
            organizer,
            witnesses: serde_json::from_str(&witnesses_json)?,
            creation,
        })),
        None => Ok(None),
    }
}

/// The most recent roll-call transition stored on a LAO channel.
pub fn last_roll_call(conn: &Connection, lao_path: &str) -> Result<Option<StoredMessage>, ChannelError> {
    last_message_with_actions(
        conn,
        lao_path,
        "roll_call",
        &["create", "open", "reopen", "close"],
    )
}

/// The attendees of the most recently closed roll call, or an empty list.
pub fn current_attendees(conn: &Connection, lao_path: &str) -> Result<Vec<String>, ChannelError> {
    let Some(last_close) = last_message_with_actions(conn, lao_path, "roll_call", &["close"])?
    else {
        return Ok(Vec::new());
    };

    match last_close.parse_data() {
        Ok(MessageData::RollCallClose(close)) => Ok(close.attendees),
        Ok(_) => Ok(Vec::new()),
        Err(e) => Err(ChannelError::MalformedPayload(e.to_string())),
    }
}
