use crate::ChannelError;
use pop_types::ChannelType;
use rusqlite::{params, Connection, OptionalExtension};

/// A channel to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub path: String,
    pub channel_type: ChannelType,
    /// The owning LAO path, for every channel below `/root/<lao>`.
    pub lao_path: Option<String>,
}

impl NewChannel {
    pub fn new(path: impl Into<String>, channel_type: ChannelType, lao_path: Option<&str>) -> Self {
        Self {
            path: path.into(),
            channel_type,
            lao_path: lao_path.map(str::to_string),
        }
    }
}

/// Inserts a channel. Returns `false` when the path already exists.
pub fn insert_channel(conn: &Connection, channel: &NewChannel) -> Result<bool, ChannelError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO channels (path, channel_type, lao_path) VALUES (?1, ?2, ?3)",
        params![
            channel.path,
            channel.channel_type.as_str(),
            channel.lao_path
        ],
    )?;
    Ok(inserted == 1)
}

/// Looks up the declared type of a persisted channel.
pub fn channel_type(conn: &Connection, path: &str) -> Result<Option<ChannelType>, ChannelError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT channel_type FROM channels WHERE path = ?1",
            [path],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(ChannelError::MalformedPayload),
        None => Ok(None),
    }
}

pub fn channel_exists(conn: &Connection, path: &str) -> Result<bool, ChannelError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM channels WHERE path = ?1)",
        [path],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Lists every persisted channel path, for rebuilding the registry at startup.
pub fn list_channels(conn: &Connection) -> Result<Vec<String>, ChannelError> {
    let mut stmt = conn.prepare("SELECT path FROM channels ORDER BY path ASC")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut paths = Vec::new();
    for row in rows {
        paths.push(row?);
    }
    Ok(paths)
}
