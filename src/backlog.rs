//! Backlog Queue: the `download` table.
//!
//! A row means "fetch this video once". Rows are created by subscription
//! refresh or a manual enqueue and destroyed exactly once, by [`claim`],
//! before the fetch starts. A crash after the claim loses the entry rather
//! than fetching it twice.

use crate::db;
use crate::paths::AppPaths;
use crate::videos::normalize_video_id;
use crate::{EngineError, Result};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub video_id: String,
    pub queued_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Queued,
    AlreadyQueued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    Claimed,
    /// Someone else removed the entry first. Not an error: skip the fetch.
    AlreadyClaimed,
}

pub fn enqueue(paths: &AppPaths, video_id: &str) -> Result<EnqueueOutcome> {
    let video_id = normalize_video_id(video_id)?;
    let conn = db::connect(paths)?;

    let known: i64 = conn.query_row(
        "SELECT COUNT(*) FROM video WHERE id=?1",
        [video_id],
        |row| row.get(0),
    )?;
    if known == 0 {
        return Err(EngineError::UnknownVideo(video_id.to_string()));
    }

    let inserted = conn.execute(
        "INSERT INTO download (video_id, queued_at_ms) VALUES (?1, ?2)
         ON CONFLICT(video_id) DO NOTHING",
        params![video_id, db::now_ms()],
    )?;
    Ok(if inserted == 1 {
        EnqueueOutcome::Queued
    } else {
        EnqueueOutcome::AlreadyQueued
    })
}

/// Enqueues each id independently; a rejected id does not stop the rest.
pub fn enqueue_many<'a, I>(
    paths: &AppPaths,
    video_ids: I,
) -> Vec<(String, Result<EnqueueOutcome>)>
where
    I: IntoIterator<Item = &'a str>,
{
    video_ids
        .into_iter()
        .map(|id| (id.trim().to_string(), enqueue(paths, id)))
        .collect()
}

/// Snapshot of the backlog, oldest first. Entries added afterwards are not
/// part of the returned list.
pub fn list_pending(paths: &AppPaths) -> Result<Vec<BacklogEntry>> {
    let conn = db::connect(paths)?;
    let mut stmt = conn.prepare(
        "SELECT video_id, queued_at_ms FROM download ORDER BY queued_at_ms ASC, video_id ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(BacklogEntry {
                video_id: row.get(0)?,
                queued_at_ms: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Atomically removes the entry. Exactly one caller per entry sees `Claimed`.
pub fn claim(paths: &AppPaths, video_id: &str) -> Result<ClaimOutcome> {
    let conn = db::connect(paths)?;
    let deleted = conn.execute("DELETE FROM download WHERE video_id=?1", [video_id])?;
    Ok(if deleted == 1 {
        ClaimOutcome::Claimed
    } else {
        ClaimOutcome::AlreadyClaimed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::videos::seed_video;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn test_paths() -> (tempfile::TempDir, AppPaths) {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        db::ensure_schema(&paths).expect("schema");
        (dir, paths)
    }

    #[test]
    fn enqueue_is_idempotent() {
        let (_dir, paths) = test_paths();
        seed_video(&paths, "abc", "Video");

        assert_eq!(enqueue(&paths, "abc").expect("first"), EnqueueOutcome::Queued);
        assert_eq!(
            enqueue(&paths, " abc ").expect("second"),
            EnqueueOutcome::AlreadyQueued
        );
        assert_eq!(list_pending(&paths).expect("pending").len(), 1);
    }

    #[test]
    fn enqueue_requires_known_video() {
        let (_dir, paths) = test_paths();
        let err = enqueue(&paths, "ghost").expect_err("unknown");
        assert!(matches!(err, EngineError::UnknownVideo(_)));
        assert!(list_pending(&paths).expect("pending").is_empty());
    }

    #[test]
    fn enqueue_many_keeps_going_past_bad_ids() {
        let (_dir, paths) = test_paths();
        seed_video(&paths, "a", "A");
        seed_video(&paths, "c", "C");

        let results = enqueue_many(&paths, ["a", "missing", "  ", "c", "a"]);
        let ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["a", "missing", "", "c", "a"]);
        assert!(matches!(results[0].1, Ok(EnqueueOutcome::Queued)));
        assert!(matches!(results[1].1, Err(EngineError::UnknownVideo(_))));
        assert!(matches!(results[2].1, Err(EngineError::InvalidVideoId(_))));
        assert!(matches!(results[3].1, Ok(EnqueueOutcome::Queued)));
        assert!(matches!(results[4].1, Ok(EnqueueOutcome::AlreadyQueued)));

        let pending: Vec<_> = list_pending(&paths)
            .expect("pending")
            .into_iter()
            .map(|e| e.video_id)
            .collect();
        assert_eq!(pending.len(), 2);
        assert!(pending.contains(&"a".to_string()));
        assert!(pending.contains(&"c".to_string()));
    }

    #[test]
    fn claim_removes_entry_once() {
        let (_dir, paths) = test_paths();
        seed_video(&paths, "abc", "Video");
        enqueue(&paths, "abc").expect("enqueue");

        assert_eq!(claim(&paths, "abc").expect("claim"), ClaimOutcome::Claimed);
        assert_eq!(
            claim(&paths, "abc").expect("reclaim"),
            ClaimOutcome::AlreadyClaimed
        );
        assert!(list_pending(&paths).expect("pending").is_empty());
    }

    #[test]
    fn claim_of_missing_entry_is_already_claimed() {
        let (_dir, paths) = test_paths();
        assert_eq!(
            claim(&paths, "never-queued").expect("claim"),
            ClaimOutcome::AlreadyClaimed
        );
    }

    #[test]
    fn concurrent_claims_have_a_single_winner() {
        let (_dir, paths) = test_paths();
        let ids = ["v1", "v2", "v3"];
        for id in ids {
            seed_video(&paths, id, id);
            enqueue(&paths, id).expect("enqueue");
        }

        const WORKERS: usize = 8;
        let barrier = Arc::new(Barrier::new(WORKERS));
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let paths = paths.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    ids.iter()
                        .map(|id| claim(&paths, id).expect("claim"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<ClaimOutcome>> = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect();

        for (idx, id) in ids.iter().enumerate() {
            let winners = results
                .iter()
                .filter(|r| r[idx] == ClaimOutcome::Claimed)
                .count();
            assert_eq!(winners, 1, "entry {id} must be claimed exactly once");
        }
        assert!(list_pending(&paths).expect("pending").is_empty());
    }

    #[test]
    fn deleting_video_drops_backlog_entry() {
        let (_dir, paths) = test_paths();
        seed_video(&paths, "abc", "Video");
        enqueue(&paths, "abc").expect("enqueue");

        let conn = db::connect(&paths).expect("connect");
        conn.execute("DELETE FROM video WHERE id='abc'", [])
            .expect("delete video");

        assert!(list_pending(&paths).expect("pending").is_empty());
    }
}
