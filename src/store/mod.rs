//! SQLite-backed persistence for the active sandbox id, so a restarted
//! process can re-attach to an environment that is still running.

pub mod session;

pub use session::SessionStore;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

/// Open the database and create tables if needed.
pub fn init_db(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;

         CREATE TABLE IF NOT EXISTS sandbox_session (
             id INTEGER PRIMARY KEY CHECK (id = 1),
             sandbox_id TEXT NOT NULL,
             url TEXT,
             updated_at TEXT NOT NULL
         );",
    )?;
    Ok(())
}
