//! Status Store: one row per discovered video.
//!
//! A video carries two independent fields. `status` is the fetch lifecycle
//! and is written by the download orchestrator; `user_tag` is owned by the
//! client and only changes through [`set_user_tag`] and [`delete_watched`].

use crate::db::{self, OptionalRowExt};
use crate::paths::AppPaths;
use crate::{EngineError, Result};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    New,
    Downloading,
    Downloaded,
    FailedToClaim,
    FailedToFetch,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::New => "new",
            VideoStatus::Downloading => "downloading",
            VideoStatus::Downloaded => "downloaded",
            VideoStatus::FailedToClaim => "failed_to_claim",
            VideoStatus::FailedToFetch => "failed_to_fetch",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "new" => Some(VideoStatus::New),
            "downloading" => Some(VideoStatus::Downloading),
            "downloaded" => Some(VideoStatus::Downloaded),
            "failed_to_claim" => Some(VideoStatus::FailedToClaim),
            "failed_to_fetch" => Some(VideoStatus::FailedToFetch),
            _ => None,
        }
    }

    /// True once a fetch attempt has concluded either way.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Downloaded | VideoStatus::FailedToFetch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTag {
    ToWatch,
    ToDelete,
    Saved,
    Deleted,
}

impl UserTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserTag::ToWatch => "to_watch",
            UserTag::ToDelete => "to_delete",
            UserTag::Saved => "saved",
            UserTag::Deleted => "deleted",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "to_watch" => Some(UserTag::ToWatch),
            "to_delete" => Some(UserTag::ToDelete),
            "saved" => Some(UserTag::Saved),
            "deleted" => Some(UserTag::Deleted),
            _ => None,
        }
    }
}

/// The client's list modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoFilter {
    /// Every video that has not been deleted.
    Subscriptions,
    ToWatch,
    ToDelete,
    Saved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub subscription_id: Option<String>,
    pub title: String,
    pub channel: Option<String>,
    pub published_at_ms: Option<i64>,
    pub added_at_ms: i64,
    pub duration: Option<String>,
    pub status: VideoStatus,
    pub user_tag: Option<UserTag>,
    pub status_changed_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVideo {
    pub id: String,
    pub subscription_id: Option<String>,
    pub title: String,
    pub channel: Option<String>,
    pub published_at_ms: Option<i64>,
    pub duration: Option<String>,
}

const VIDEO_COLUMNS: &str = "id, subscription_id, title, channel, published_at_ms, added_at_ms, \
                             duration, status, user_tag, status_changed_at_ms";

/// Records a newly discovered video with status `New`.
///
/// Returns `false` and leaves the row untouched when the id already exists.
pub fn insert_video(paths: &AppPaths, video: NewVideo) -> Result<bool> {
    let id = normalize_video_id(&video.id)?;
    let conn = db::connect(paths)?;
    let inserted = conn.execute(
        r#"
INSERT INTO video (
  id,
  subscription_id,
  title,
  channel,
  published_at_ms,
  added_at_ms,
  duration,
  status,
  user_tag,
  status_changed_at_ms
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL)
ON CONFLICT(id) DO NOTHING
"#,
        params![
            id,
            video.subscription_id,
            video.title,
            video.channel,
            video.published_at_ms,
            db::now_ms(),
            video.duration,
            VideoStatus::New.as_str(),
        ],
    )?;
    Ok(inserted == 1)
}

pub fn get_video(paths: &AppPaths, video_id: &str) -> Result<Option<Video>> {
    let conn = db::connect(paths)?;
    let video = conn
        .query_row(
            &format!("SELECT {VIDEO_COLUMNS} FROM video WHERE id=?1"),
            [video_id],
            row_to_video,
        )
        .optional()?;
    Ok(video)
}

/// Writes the fetch-lifecycle status only; the user tag is never touched.
pub fn set_status(paths: &AppPaths, video_id: &str, status: VideoStatus) -> Result<()> {
    let conn = db::connect(paths)?;
    let updated = conn.execute(
        "UPDATE video SET status=?1, status_changed_at_ms=?2 WHERE id=?3",
        params![status.as_str(), db::now_ms(), video_id],
    )?;
    if updated == 0 {
        return Err(EngineError::UnknownVideo(video_id.to_string()));
    }
    Ok(())
}

pub fn set_user_tag(paths: &AppPaths, video_id: &str, tag: Option<UserTag>) -> Result<()> {
    let conn = db::connect(paths)?;
    let updated = conn.execute(
        "UPDATE video SET user_tag=?1 WHERE id=?2",
        params![tag.map(|t| t.as_str()), video_id],
    )?;
    if updated == 0 {
        return Err(EngineError::UnknownVideo(video_id.to_string()));
    }
    Ok(())
}

pub fn list_videos(
    paths: &AppPaths,
    filter: VideoFilter,
    search: Option<&str>,
) -> Result<Vec<Video>> {
    let conn = db::connect(paths)?;

    let tag_clause = match filter {
        VideoFilter::Subscriptions => "(user_tag IS NULL OR user_tag <> ?1)",
        VideoFilter::ToWatch | VideoFilter::ToDelete | VideoFilter::Saved => "user_tag = ?1",
    };
    let tag = match filter {
        VideoFilter::Subscriptions => UserTag::Deleted,
        VideoFilter::ToWatch => UserTag::ToWatch,
        VideoFilter::ToDelete => UserTag::ToDelete,
        VideoFilter::Saved => UserTag::Saved,
    };
    let pattern = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.to_lowercase()));

    let sql = format!(
        r#"
SELECT {VIDEO_COLUMNS}
FROM video
WHERE {tag_clause}
  AND (?2 IS NULL OR lower(title) LIKE ?2 OR lower(coalesce(channel, '')) LIKE ?2)
ORDER BY coalesce(published_at_ms, added_at_ms) DESC, added_at_ms DESC
"#
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![tag.as_str(), pattern], row_to_video)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_by_status(paths: &AppPaths, status: VideoStatus) -> Result<Vec<Video>> {
    let conn = db::connect(paths)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {VIDEO_COLUMNS} FROM video WHERE status=?1 ORDER BY status_changed_at_ms ASC, id ASC"
    ))?;
    let rows = stmt
        .query_map([status.as_str()], row_to_video)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Videos left in `Downloading`, i.e. a previous run died mid-fetch.
pub fn stale_downloading(paths: &AppPaths) -> Result<Vec<Video>> {
    list_by_status(paths, VideoStatus::Downloading)
}

/// Moves every `ToDelete` video to `Deleted`.
pub fn delete_watched(paths: &AppPaths) -> Result<usize> {
    let conn = db::connect(paths)?;
    let updated = conn.execute(
        "UPDATE video SET user_tag=?1 WHERE user_tag=?2",
        params![UserTag::Deleted.as_str(), UserTag::ToDelete.as_str()],
    )?;
    Ok(updated)
}

pub(crate) fn normalize_video_id(raw: &str) -> Result<&str> {
    let id = raw.trim();
    if id.is_empty() || id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(EngineError::InvalidVideoId(raw.to_string()));
    }
    Ok(id)
}

fn row_to_video(row: &rusqlite::Row<'_>) -> rusqlite::Result<Video> {
    let status: String = row.get(7)?;
    let user_tag: Option<String> = row.get(8)?;
    Ok(Video {
        id: row.get(0)?,
        subscription_id: row.get(1)?,
        title: row.get(2)?,
        channel: row.get(3)?,
        published_at_ms: row.get(4)?,
        added_at_ms: row.get(5)?,
        duration: row.get(6)?,
        status: VideoStatus::from_str(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                format!("unknown video status: {status}").into(),
            )
        })?,
        user_tag: user_tag.as_deref().and_then(UserTag::from_str),
        status_changed_at_ms: row.get(9)?,
    })
}

#[cfg(test)]
pub(crate) fn seed_video(paths: &AppPaths, id: &str, title: &str) {
    insert_video(
        paths,
        NewVideo {
            id: id.to_string(),
            subscription_id: None,
            title: title.to_string(),
            channel: Some("Test Channel".to_string()),
            published_at_ms: None,
            duration: None,
        },
    )
    .expect("seed video");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_paths() -> (tempfile::TempDir, AppPaths) {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        db::ensure_schema(&paths).expect("schema");
        (dir, paths)
    }

    #[test]
    fn insert_is_new_and_untagged() {
        let (_dir, paths) = test_paths();
        seed_video(&paths, "dQw4w9WgXcQ", "First");

        let video = get_video(&paths, "dQw4w9WgXcQ")
            .expect("get")
            .expect("exists");
        assert_eq!(video.status, VideoStatus::New);
        assert_eq!(video.user_tag, None);
        assert!(video.status_changed_at_ms.is_none());
    }

    #[test]
    fn insert_existing_id_keeps_row() {
        let (_dir, paths) = test_paths();
        seed_video(&paths, "abc", "Original");
        set_status(&paths, "abc", VideoStatus::Downloaded).expect("status");

        let inserted = insert_video(
            &paths,
            NewVideo {
                id: "abc".to_string(),
                subscription_id: None,
                title: "Rediscovered".to_string(),
                channel: None,
                published_at_ms: None,
                duration: None,
            },
        )
        .expect("insert");
        assert!(!inserted);

        let video = get_video(&paths, "abc").expect("get").expect("exists");
        assert_eq!(video.title, "Original");
        assert_eq!(video.status, VideoStatus::Downloaded);
    }

    #[test]
    fn insert_rejects_blank_id() {
        let (_dir, paths) = test_paths();
        let err = insert_video(
            &paths,
            NewVideo {
                id: "  ".to_string(),
                subscription_id: None,
                title: "Nothing".to_string(),
                channel: None,
                published_at_ms: None,
                duration: None,
            },
        )
        .expect_err("blank id");
        assert!(matches!(err, EngineError::InvalidVideoId(_)));
    }

    #[test]
    fn status_write_does_not_clobber_user_tag() {
        let (_dir, paths) = test_paths();
        seed_video(&paths, "abc", "Tagged");
        set_user_tag(&paths, "abc", Some(UserTag::Saved)).expect("tag");

        set_status(&paths, "abc", VideoStatus::Downloading).expect("downloading");
        set_status(&paths, "abc", VideoStatus::Downloaded).expect("downloaded");

        let video = get_video(&paths, "abc").expect("get").expect("exists");
        assert_eq!(video.status, VideoStatus::Downloaded);
        assert_eq!(video.user_tag, Some(UserTag::Saved));
        assert!(video.status_changed_at_ms.is_some());
    }

    #[test]
    fn user_tag_write_does_not_touch_status() {
        let (_dir, paths) = test_paths();
        seed_video(&paths, "abc", "Tagged");
        set_status(&paths, "abc", VideoStatus::FailedToFetch).expect("status");

        set_user_tag(&paths, "abc", Some(UserTag::ToDelete)).expect("tag");

        let video = get_video(&paths, "abc").expect("get").expect("exists");
        assert_eq!(video.status, VideoStatus::FailedToFetch);
        assert_eq!(video.user_tag, Some(UserTag::ToDelete));
    }

    #[test]
    fn set_status_on_unknown_video_errors() {
        let (_dir, paths) = test_paths();
        let err = set_status(&paths, "missing", VideoStatus::Downloading).expect_err("unknown");
        assert!(matches!(err, EngineError::UnknownVideo(id) if id == "missing"));
    }

    #[test]
    fn list_filters_follow_user_tags() {
        let (_dir, paths) = test_paths();
        seed_video(&paths, "a", "Rust talk");
        seed_video(&paths, "b", "Cooking show");
        seed_video(&paths, "c", "Old news");
        seed_video(&paths, "d", "Keeper");
        set_user_tag(&paths, "b", Some(UserTag::ToWatch)).expect("tag b");
        set_user_tag(&paths, "c", Some(UserTag::Deleted)).expect("tag c");
        set_user_tag(&paths, "d", Some(UserTag::Saved)).expect("tag d");

        let all = list_videos(&paths, VideoFilter::Subscriptions, None).expect("all");
        let mut ids: Vec<_> = all.iter().map(|v| v.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "d"]);

        let to_watch = list_videos(&paths, VideoFilter::ToWatch, None).expect("to watch");
        assert_eq!(to_watch.len(), 1);
        assert_eq!(to_watch[0].id, "b");

        let saved = list_videos(&paths, VideoFilter::Saved, None).expect("saved");
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, "d");

        let searched =
            list_videos(&paths, VideoFilter::Subscriptions, Some("RUST")).expect("search");
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].id, "a");

        let by_channel =
            list_videos(&paths, VideoFilter::Subscriptions, Some("test channel")).expect("channel");
        assert_eq!(by_channel.len(), 3);
    }

    #[test]
    fn delete_watched_moves_to_delete_only() {
        let (_dir, paths) = test_paths();
        seed_video(&paths, "a", "Watched");
        seed_video(&paths, "b", "Also watched");
        seed_video(&paths, "c", "Saved");
        set_user_tag(&paths, "a", Some(UserTag::ToDelete)).expect("tag a");
        set_user_tag(&paths, "b", Some(UserTag::ToDelete)).expect("tag b");
        set_user_tag(&paths, "c", Some(UserTag::Saved)).expect("tag c");

        assert_eq!(delete_watched(&paths).expect("delete"), 2);
        assert!(list_videos(&paths, VideoFilter::ToDelete, None)
            .expect("to delete")
            .is_empty());
        let c = get_video(&paths, "c").expect("get").expect("exists");
        assert_eq!(c.user_tag, Some(UserTag::Saved));
    }

    #[test]
    fn stale_downloading_lists_only_downloading() {
        let (_dir, paths) = test_paths();
        seed_video(&paths, "a", "Stuck");
        seed_video(&paths, "b", "Done");
        set_status(&paths, "a", VideoStatus::Downloading).expect("a");
        set_status(&paths, "b", VideoStatus::Downloaded).expect("b");

        let stale = stale_downloading(&paths).expect("stale");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "a");
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            VideoStatus::New,
            VideoStatus::Downloading,
            VideoStatus::Downloaded,
            VideoStatus::FailedToClaim,
            VideoStatus::FailedToFetch,
        ] {
            assert_eq!(VideoStatus::from_str(status.as_str()), Some(status));
        }
        assert!(VideoStatus::Downloaded.is_terminal());
        assert!(VideoStatus::FailedToFetch.is_terminal());
        assert!(!VideoStatus::Downloading.is_terminal());
    }
}
