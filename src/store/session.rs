//! Sandbox session persistence: track the active sandbox id so it can be
//! reconnected after a restart.

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Load the persisted sandbox id, if any.
pub fn load_sandbox_id(conn: &Connection) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT sandbox_id FROM sandbox_session WHERE id = 1")?;

    let result = stmt.query_row([], |row| row.get(0)).optional()?;
    Ok(result)
}

/// Persist the active sandbox id (upsert, always row id=1).
pub fn save_sandbox_id(conn: &Connection, sandbox_id: &str, url: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO sandbox_session (id, sandbox_id, url, updated_at)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
             sandbox_id = excluded.sandbox_id,
             url = excluded.url,
             updated_at = excluded.updated_at",
        params![sandbox_id, url, now],
    )?;
    Ok(())
}

/// Clear the persisted sandbox id (sandbox was killed).
pub fn clear_sandbox_id(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM sandbox_session WHERE id = 1", [])?;
    Ok(())
}

/// Shared handle over one connection. `rusqlite::Connection` is not `Sync`,
/// so access is serialised.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(super::init_db(db_path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn load(&self) -> Result<Option<String>> {
        load_sandbox_id(&self.conn.lock())
    }

    pub fn save(&self, sandbox_id: &str, url: &str) -> Result<()> {
        save_sandbox_id(&self.conn.lock(), sandbox_id, url)
    }

    pub fn clear(&self) -> Result<()> {
        clear_sandbox_id(&self.conn.lock())
    }
}
