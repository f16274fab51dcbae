use crate::paths::AppPaths;
use crate::Result;
use rusqlite::{Connection, OpenFlags};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const CURRENT_SCHEMA_VERSION: u32 = 2;

pub fn open(paths: &AppPaths) -> Result<Connection> {
    paths.ensure_dirs()?;

    let conn = Connection::open_with_flags(
        paths.db_path(),
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
    )?;

    conn.busy_timeout(Duration::from_secs(10))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS video (
  id TEXT PRIMARY KEY,
  subscription_id TEXT,
  title TEXT NOT NULL,
  channel TEXT,
  published_at_ms INTEGER,
  added_at_ms INTEGER NOT NULL,
  duration TEXT,
  status TEXT NOT NULL,
  status_changed_at_ms INTEGER
);

CREATE TABLE IF NOT EXISTS download (
  video_id TEXT PRIMARY KEY,
  queued_at_ms INTEGER NOT NULL,
  FOREIGN KEY (video_id) REFERENCES video(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS session (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  started_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_video_status ON video(status);
CREATE INDEX IF NOT EXISTS idx_video_added ON video(added_at_ms);
CREATE INDEX IF NOT EXISTS idx_download_queued ON download(queued_at_ms);
"#,
    )?;

    // Schema v1 kept the GUI tag inside `status`; split it out.
    if !has_column(conn, "video", "user_tag")? {
        conn.execute("ALTER TABLE video ADD COLUMN user_tag TEXT", [])?;
    }
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_video_user_tag ON video(user_tag)",
        [],
    )?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key='schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(v) if v == CURRENT_SCHEMA_VERSION.to_string() => {}
        _ => {
            conn.execute(
                "INSERT INTO meta(key, value) VALUES('schema_version', ?)
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                [CURRENT_SCHEMA_VERSION.to_string()],
            )?;
        }
    }

    Ok(())
}

pub fn ensure_schema(paths: &AppPaths) -> Result<()> {
    let conn = open(paths)?;
    migrate(&conn)?;
    Ok(())
}

/// Opens and migrates in one step; every store operation goes through here.
pub(crate) fn connect(paths: &AppPaths) -> Result<Connection> {
    let conn = open(paths)?;
    migrate(&conn)?;
    Ok(conn)
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) trait OptionalRowExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalRowExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
