use crate::ElectionError;
use pop_channels::last_message_with_actions;
use pop_crypto::ElectionKeyPair;
use pop_types::data::{ElectionQuestion, SECRET_BALLOT};
use rusqlite::{params, Connection, OptionalExtension};

/// An election as fixed by its setup message.
#[derive(Debug, Clone)]
pub struct ElectionRecord {
    pub path: String,
    pub lao_path: String,
    pub election_id: String,
    pub version: String,
    pub created_at: i64,
    pub questions: Vec<ElectionQuestion>,
    pub keys: ElectionKeyPair,
}

impl ElectionRecord {
    pub fn is_secret_ballot(&self) -> bool {
        self.version == SECRET_BALLOT
    }

    pub fn question(&self, id: &str) -> Option<&ElectionQuestion> {
        self.questions.iter().find(|q| q.id == id)
    }
}

/// Lifecycle position of an election, derived from its channel log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionStatus {
    Created,
    Open,
    Ended,
}

pub fn insert_election(conn: &Connection, election: &ElectionRecord) -> Result<(), ElectionError> {
    let questions_json = serde_json::to_string(&election.questions)?;
    conn.execute(
        "INSERT INTO elections
            (path, lao_path, election_id, version, created_at, questions_json, secret_key, public_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            election.path,
            election.lao_path,
            election.election_id,
            election.version,
            election.created_at,
            questions_json,
            election.keys.secret_bytes().to_vec(),
            election.keys.public_key(),
        ],
    )?;
    Ok(())
}

pub fn get_election(conn: &Connection, path: &str) -> Result<Option<ElectionRecord>, ElectionError> {
    let row = conn
        .query_row(
            "SELECT path, lao_path, election_id, version, created_at, questions_json, secret_key
             FROM elections WHERE path = ?1",
            [path],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Vec<u8>>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((path, lao_path, election_id, version, created_at, questions_json, secret)) = row
    else {
        return Ok(None);
    };

    Ok(Some(ElectionRecord {
        path,
        lao_path,
        election_id,
        version,
        created_at,
        questions: serde_json::from_str(&questions_json)?,
        keys: ElectionKeyPair::from_secret_bytes(&secret)?,
    }))
}

/// Reads the lifecycle position from the last open/end message on the
/// election channel.
pub fn election_status(conn: &Connection, path: &str) -> Result<ElectionStatus, ElectionError> {
    let last = last_message_with_actions(conn, path, "election", &["open", "end"])?;
    Ok(match last.as_ref().map(|m| m.action.as_str()) {
        Some("end") => ElectionStatus::Ended,
        Some(_) => ElectionStatus::Open,
        None => ElectionStatus::Created,
    })
}
