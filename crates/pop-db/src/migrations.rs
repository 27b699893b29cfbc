//! Schema migrations compiled into the binary.
//!
//! Applied names are recorded in `_pop_migrations`. A migration and its
//! record commit together, so a failed migration leaves no trace and runs
//! again on the next start.

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

/// `(name, sql)` in application order. Append only.
const MIGRATIONS: &[(&str, &str)] = &[
    ("000_init", include_str!("migrations/000_init.sql")),
    ("001_laos", include_str!("migrations/001_laos.sql")),
    ("002_elections", include_str!("migrations/002_elections.sql")),
    (
        "003_federation_challenges",
        include_str!("migrations/003_federation_challenges.sql"),
    ),
    ("004_rumors", include_str!("migrations/004_rumors.sql")),
    ("005_server_keys", include_str!("migrations/005_server_keys.sql")),
];

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _pop_migrations (
    name TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration {name} failed: {source}")]
    Apply {
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to read applied migrations: {0}")]
    Tracking(#[source] rusqlite::Error),
}

/// Brings the schema up to date. Returns the number of migrations applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply_all(conn, MIGRATIONS)
}

fn is_applied(conn: &Connection, name: &str) -> Result<bool, MigrationError> {
    conn.query_row(
        "SELECT 1 FROM _pop_migrations WHERE name = ?1",
        [name],
        |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
    .map_err(MigrationError::Tracking)
}

fn apply_one(conn: &Connection, name: &'static str, sql: &str) -> Result<(), MigrationError> {
    let apply = || -> rusqlite::Result<()> {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute("INSERT INTO _pop_migrations (name) VALUES (?1)", [name])?;
        tx.commit()
    };
    apply().map_err(|source| MigrationError::Apply { name, source })
}

fn apply_all(
    conn: &Connection,
    migrations: &[(&'static str, &'static str)],
) -> Result<usize, MigrationError> {
    conn.execute_batch(TRACKING_TABLE)
        .map_err(MigrationError::Tracking)?;

    let mut applied = 0;
    for &(name, sql) in migrations {
        if is_applied(conn, name)? {
            continue;
        }
        apply_one(conn, name, sql)?;
        tracing::info!(migration = name, "applied migration");
        applied += 1;
    }
    if applied == 0 {
        tracing::debug!("schema up to date");
    }
    Ok(applied)
}
