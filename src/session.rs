use crate::db;
use crate::paths::AppPaths;
use crate::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One run of the client or the download job. Only used to correlate logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub started_at_ms: i64,
}

pub fn create_session(paths: &AppPaths, name: &str) -> Result<Session> {
    let conn = db::connect(paths)?;
    let session = Session {
        id: Uuid::new_v4().to_string(),
        name: name.trim().to_string(),
        started_at_ms: db::now_ms(),
    };
    conn.execute(
        "INSERT INTO session (id, name, started_at_ms) VALUES (?1, ?2, ?3)",
        params![&session.id, &session.name, session.started_at_ms],
    )?;
    Ok(session)
}

pub fn list_sessions(paths: &AppPaths, limit: usize) -> Result<Vec<Session>> {
    let conn = db::connect(paths)?;
    let mut stmt = conn.prepare(
        "SELECT id, name, started_at_ms FROM session ORDER BY started_at_ms DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(Session {
                id: row.get(0)?,
                name: row.get(1)?,
                started_at_ms: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
