//! Database layer for the pop server.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and embedded SQL migrations. Query helpers live in the domain crates
//! (`pop-channels`, `pop-election`, `pop-federation`) next to the logic that
//! owns each table.
//!
//! SQLite in WAL mode gives concurrent readers with a single writer, which
//! matches the server: many connections read while publishes write one
//! transaction per message.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
