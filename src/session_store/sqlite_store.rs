//! SQLite-backed session store using SeaORM.
//!
//! Persists session records to a local SQLite database. The status
//! compare-and-set is issued as a filtered `UPDATE`, so transitions are
//! linearizable per session without any application-side locking.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, Database, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, Set, Statement, TransactionTrait,
};
use uuid::Uuid;

use crate::error_handling::types::StoreError;
use crate::session_store::db_entities as sessions;
use crate::session_store::store_trait::SessionStore;
use crate::session_store::types::{Session, SessionFilter, SessionStats, SessionStatus};

/// Session store backend over SQLite.
///
/// Construct with [`SqliteSessionStore::open_file`] for a database file or
/// [`SqliteSessionStore::connect`] with a full DSN.
pub struct SqliteSessionStore {
    conn: DatabaseConnection,
}

impl SqliteSessionStore {
    /// Connects using a SeaORM DSN (e.g. `sqlite://sessions.db?mode=rwc`)
    /// and ensures the schema exists.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        info!("Connecting session store at: {}", dsn);
        let conn = Database::connect(dsn).await.map_err(|e| {
            error!("DB connect failed: {}", e);
            StoreError::ConnectionFailed
        })?;

        debug!("Ensuring sessions table exists");
        conn.execute(Statement::from_string(
            DbBackend::Sqlite,
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                provider_id TEXT NOT NULL,
                status TEXT NOT NULL,
                progress_percent REAL NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                ended_at TEXT,
                directory_path TEXT NOT NULL,
                error_message TEXT,
                request TEXT NOT NULL,
                stats TEXT NOT NULL
            );
        "#
            .to_string(),
        ))
        .await
        .map_err(|e| {
            error!("Failed to create sessions table: {}", e);
            StoreError::WriteFailed
        })?;

        conn.execute(Statement::from_string(
            DbBackend::Sqlite,
            "CREATE INDEX IF NOT EXISTS idx_sessions_content_hash ON sessions(content_hash)"
                .to_string(),
        ))
        .await
        .map_err(|e| {
            error!("Failed to create content_hash index: {}", e);
            StoreError::WriteFailed
        })?;

        info!("Session store ready");
        Ok(Self { conn })
    }

    /// Creates or opens the database at a filesystem path; parent
    /// directories are ensured.
    pub async fn open_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create database directory: {}", e);
                StoreError::WriteFailed
            })?;
        }
        let dsn = format!("sqlite://{}?mode=rwc", path_ref.to_string_lossy());
        Self::connect(&dsn).await
    }

    fn to_model(session: &Session) -> Result<sessions::ActiveModel, StoreError> {
        let request = serde_json::to_string(&session.request).map_err(|e| {
            error!("Failed to serialize request for {}: {}", session.id, e);
            StoreError::WriteFailed
        })?;
        let stats = serde_json::to_string(&session.stats).map_err(|e| {
            error!("Failed to serialize stats for {}: {}", session.id, e);
            StoreError::WriteFailed
        })?;
        Ok(sessions::ActiveModel {
            id: Set(session.id.to_string()),
            content_hash: Set(session.content_hash.clone()),
            provider_id: Set(session.provider_id.clone()),
            status: Set(session.status.as_str().to_string()),
            progress_percent: Set(session.progress_percent),
            created_at: Set(session.created_at.to_rfc3339()),
            started_at: Set(session.started_at.map(|t| t.to_rfc3339())),
            ended_at: Set(session.ended_at.map(|t| t.to_rfc3339())),
            directory_path: Set(session.directory_path.to_string_lossy().into_owned()),
            error_message: Set(session.error_message.clone()),
            request: Set(request),
            stats: Set(stats),
        })
    }

    fn from_model(m: sessions::Model) -> Result<Session, StoreError> {
        let parse_time = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| StoreError::ReadFailed)
        };
        let status = SessionStatus::parse(&m.status).ok_or(StoreError::ReadFailed)?;
        Ok(Session {
            id: Uuid::parse_str(&m.id).map_err(|_| StoreError::ReadFailed)?,
            content_hash: m.content_hash,
            provider_id: m.provider_id,
            status,
            progress_percent: m.progress_percent,
            created_at: parse_time(&m.created_at)?,
            started_at: m.started_at.as_deref().map(parse_time).transpose()?,
            ended_at: m.ended_at.as_deref().map(parse_time).transpose()?,
            directory_path: m.directory_path.into(),
            error_message: m.error_message,
            request: serde_json::from_str(&m.request).map_err(|_| StoreError::ReadFailed)?,
            stats: serde_json::from_str(&m.stats).map_err(|_| StoreError::ReadFailed)?,
        })
    }

    fn active_status_strings() -> Vec<&'static str> {
        SessionStatus::ACTIVE.iter().map(|s| s.as_str()).collect()
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(&self, session: Session) -> Result<Session, StoreError> {
        let model = Self::to_model(&session)?;
        let txn = self.conn.begin().await.map_err(|e| {
            error!("Failed to begin create_session transaction: {}", e);
            StoreError::WriteFailed
        })?;

        let existing = sessions::Entity::find()
            .filter(
                Condition::all()
                    .add(sessions::Column::ContentHash.eq(session.content_hash.clone()))
                    .add(sessions::Column::Status.is_in(Self::active_status_strings())),
            )
            .one(&txn)
            .await
            .map_err(|e| {
                error!("DB read error in create_session dedup check: {}", e);
                StoreError::ReadFailed
            })?;

        if let Some(active) = existing {
            let _ = txn.rollback().await;
            let id = Uuid::parse_str(&active.id).map_err(|_| StoreError::ReadFailed)?;
            debug!(
                "Rejecting duplicate session for hash {}: {} is still active",
                session.content_hash, id
            );
            return Err(StoreError::DuplicateActive(id));
        }

        sessions::Entity::insert(model)
            .exec(&txn)
            .await
            .map_err(|e| {
                error!("DB write error in create_session insert: {}", e);
                StoreError::WriteFailed
            })?;
        txn.commit().await.map_err(|e| {
            error!("Failed to commit create_session: {}", e);
            StoreError::WriteFailed
        })?;

        info!(
            "Created session {} for content hash {} (provider {})",
            session.id, session.content_hash, session.provider_id
        );
        Ok(session)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[SessionStatus],
        to: SessionStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        // Terminal states are absorbing no matter what the caller passes.
        let from_strings: Vec<&'static str> = from
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.as_str())
            .collect();

        let now = Utc::now().to_rfc3339();
        let mut update = sessions::Entity::update_many()
            .col_expr(sessions::Column::Status, Expr::value(to.as_str()))
            .filter(sessions::Column::Id.eq(id.to_string()))
            .filter(sessions::Column::Status.is_in(from_strings));
        if to == SessionStatus::Starting {
            update = update.col_expr(sessions::Column::StartedAt, Expr::value(now.clone()));
        }
        if to.is_terminal() {
            update = update
                .col_expr(sessions::Column::EndedAt, Expr::value(now))
                .col_expr(
                    sessions::Column::ErrorMessage,
                    Expr::value(reason.map(|r| r.to_string())),
                );
        }

        let result = update.exec(&self.conn).await.map_err(|e| {
            error!("DB write error in update_status for {}: {}", id, e);
            StoreError::WriteFailed
        })?;

        if result.rows_affected == 0 {
            // Disambiguate: unknown id vs. a state outside the from-set.
            let current = self.get_session(id).await?;
            return match current {
                None => Err(StoreError::NotFound(id)),
                Some(s) => {
                    debug!(
                        "Refused transition {} -> {} for session {} (current: {})",
                        s.status, to, id, s.status
                    );
                    Err(StoreError::IllegalTransition {
                        current: s.status,
                        requested: to,
                    })
                }
            };
        }

        debug!("Session {} transitioned to {}", id, to);
        Ok(())
    }

    async fn update_progress(
        &self,
        id: Uuid,
        progress_percent: f64,
        stats: &SessionStats,
    ) -> Result<(), StoreError> {
        let stats_json = serde_json::to_string(stats).map_err(|e| {
            error!("Failed to serialize stats for {}: {}", id, e);
            StoreError::WriteFailed
        })?;
        let result = sessions::Entity::update_many()
            .col_expr(
                sessions::Column::ProgressPercent,
                Expr::value(progress_percent),
            )
            .col_expr(sessions::Column::Stats, Expr::value(stats_json))
            .filter(sessions::Column::Id.eq(id.to_string()))
            .exec(&self.conn)
            .await
            .map_err(|e| {
                error!("DB write error in update_progress for {}: {}", id, e);
                StoreError::WriteFailed
            })?;
        if result.rows_affected == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn complete_session(&self, id: Uuid) -> Result<(), StoreError> {
        self.update_status(id, &[SessionStatus::Running], SessionStatus::Completed, None)
            .await?;
        // Completed output is by definition fully processed.
        let result = sessions::Entity::update_many()
            .col_expr(sessions::Column::ProgressPercent, Expr::value(100.0))
            .filter(sessions::Column::Id.eq(id.to_string()))
            .exec(&self.conn)
            .await
            .map_err(|e| {
                error!("DB write error pinning progress for {}: {}", id, e);
                StoreError::WriteFailed
            })?;
        if result.rows_affected == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn fail_session(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        self.update_status(
            id,
            &SessionStatus::ACTIVE,
            SessionStatus::Failed,
            Some(error),
        )
        .await
    }

    async fn cancel_session(&self, id: Uuid, reason: &str) -> Result<(), StoreError> {
        self.update_status(
            id,
            &SessionStatus::ACTIVE,
            SessionStatus::Cancelled,
            Some(reason),
        )
        .await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let model = sessions::Entity::find_by_id(id.to_string())
            .one(&self.conn)
            .await
            .map_err(|e| {
                error!("DB read error in get_session for {}: {}", id, e);
                StoreError::ReadFailed
            })?;
        model.map(Self::from_model).transpose()
    }

    async fn list_active_by_content_hash(&self, hash: &str) -> Result<Vec<Session>, StoreError> {
        let rows = sessions::Entity::find()
            .filter(
                Condition::all()
                    .add(sessions::Column::ContentHash.eq(hash))
                    .add(sessions::Column::Status.is_in(Self::active_status_strings())),
            )
            .order_by_asc(sessions::Column::CreatedAt)
            .all(&self.conn)
            .await
            .map_err(|e| {
                error!("DB read error in list_active_by_content_hash: {}", e);
                StoreError::ReadFailed
            })?;
        rows.into_iter().map(Self::from_model).collect()
    }

    async fn list_active(&self) -> Result<Vec<Session>, StoreError> {
        let rows = sessions::Entity::find()
            .filter(sessions::Column::Status.is_in(Self::active_status_strings()))
            .all(&self.conn)
            .await
            .map_err(|e| {
                error!("DB read error in list_active: {}", e);
                StoreError::ReadFailed
            })?;
        rows.into_iter().map(Self::from_model).collect()
    }

    async fn list_sessions(
        &self,
        filter: Option<SessionFilter>,
    ) -> Result<Vec<Session>, StoreError> {
        let mut query = sessions::Entity::find();
        if let Some(f) = filter {
            let mut cond = Condition::all();
            if let Some(status) = f.status {
                cond = cond.add(sessions::Column::Status.eq(status.as_str()));
            }
            if let Some(hash) = f.content_hash {
                cond = cond.add(sessions::Column::ContentHash.eq(hash));
            }
            query = query.filter(cond);
        }
        let rows = query
            .order_by_asc(sessions::Column::CreatedAt)
            .all(&self.conn)
            .await
            .map_err(|e| {
                error!("DB read error in list_sessions: {}", e);
                StoreError::ReadFailed
            })?;
        debug!("Fetched {} session rows", rows.len());
        rows.into_iter().map(Self::from_model).collect()
    }

    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let terminal: Vec<&'static str> = vec!["completed", "failed", "cancelled", "timeout"];
        let result = sessions::Entity::delete_many()
            .filter(
                Condition::all()
                    .add(sessions::Column::Status.is_in(terminal))
                    .add(sessions::Column::EndedAt.lt(cutoff.to_rfc3339())),
            )
            .exec(&self.conn)
            .await
            .map_err(|e| {
                error!("DB write error in purge_terminal_older_than: {}", e);
                StoreError::WriteFailed
            })?;
        if result.rows_affected > 0 {
            info!(
                "Purged {} terminal session(s) older than {}",
                result.rows_affected, cutoff
            );
        }
        Ok(result.rows_affected as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::types::{AudioCodec, Container, Preset, TranscodeRequest, VideoCodec};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn temp_store() -> (SqliteSessionStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteSessionStore::open_file(dir.path().join("test.sqlite3"))
            .await
            .unwrap();
        (store, dir)
    }

    fn request(media_id: &str) -> TranscodeRequest {
        TranscodeRequest {
            media_id: media_id.to_string(),
            input_path: PathBuf::from("/media/in.mkv"),
            container: Container::Mp4,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            quality: 23,
            preset: Preset::Medium,
            max_height: None,
            max_bitrate_kbps: None,
            start_offset_seconds: None,
            options: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn create_and_fetch_round_trips() {
        let (store, _dir) = temp_store().await;
        let session = Session::new("ffmpeg", request("M1"));
        let id = session.id;
        let hash = session.content_hash.clone();
        store.create_session(session).await.unwrap();

        let fetched = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.content_hash, hash);
        assert_eq!(fetched.status, SessionStatus::Pending);
        assert_eq!(fetched.request.media_id, "M1");
    }

    #[tokio::test]
    async fn duplicate_active_hash_is_rejected() {
        let (store, _dir) = temp_store().await;
        let first = Session::new("ffmpeg", request("M1"));
        let first_id = first.id;
        store.create_session(first).await.unwrap();

        let second = Session::new("ffmpeg", request("M1"));
        match store.create_session(second).await {
            Err(StoreError::DuplicateActive(id)) => assert_eq!(id, first_id),
            other => panic!("expected DuplicateActive, got {:?}", other),
        }

        // Once the first session is terminal the hash is free again.
        store.fail_session(first_id, "boom").await.unwrap();
        store
            .create_session(Session::new("ffmpeg", request("M1")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cas_refuses_transitions_outside_the_from_set() {
        let (store, _dir) = temp_store().await;
        let session = Session::new("ffmpeg", request("M1"));
        let id = session.id;
        store.create_session(session).await.unwrap();

        // pending -> running is not part of the caller's from-set here.
        let err = store
            .update_status(id, &[SessionStatus::Starting], SessionStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));

        store
            .update_status(id, &[SessionStatus::Pending], SessionStatus::Starting, None)
            .await
            .unwrap();
        let fetched = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Starting);
        assert!(fetched.started_at.is_some());
    }

    #[tokio::test]
    async fn terminal_states_are_absorbing() {
        let (store, _dir) = temp_store().await;
        let session = Session::new("ffmpeg", request("M1"));
        let id = session.id;
        store.create_session(session).await.unwrap();
        store.cancel_session(id, "caller stop").await.unwrap();

        let err = store
            .update_status(
                id,
                &[SessionStatus::Cancelled],
                SessionStatus::Running,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));

        let fetched = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Cancelled);
        assert!(fetched.ended_at.is_some());
        assert_eq!(fetched.error_message.as_deref(), Some("caller stop"));
    }

    #[tokio::test]
    async fn progress_updates_do_not_touch_status() {
        let (store, _dir) = temp_store().await;
        let session = Session::new("ffmpeg", request("M1"));
        let id = session.id;
        store.create_session(session).await.unwrap();

        let mut stats = SessionStats::default();
        stats.frames = 100;
        stats.fps = 24.0;
        store.update_progress(id, 41.5, &stats).await.unwrap();

        let fetched = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Pending);
        assert_eq!(fetched.progress_percent, 41.5);
        assert_eq!(fetched.stats.frames, 100);
    }

    #[tokio::test]
    async fn complete_pins_progress_to_hundred() {
        let (store, _dir) = temp_store().await;
        let session = Session::new("ffmpeg", request("M1"));
        let id = session.id;
        store.create_session(session).await.unwrap();
        store
            .update_status(id, &[SessionStatus::Pending], SessionStatus::Starting, None)
            .await
            .unwrap();
        store
            .update_status(id, &[SessionStatus::Starting], SessionStatus::Running, None)
            .await
            .unwrap();
        store.complete_session(id).await.unwrap();

        let fetched = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);
        assert_eq!(fetched.progress_percent, 100.0);
    }

    #[tokio::test]
    async fn purge_removes_only_old_terminal_sessions() {
        let (store, _dir) = temp_store().await;
        let done = Session::new("ffmpeg", request("M1"));
        let done_id = done.id;
        store.create_session(done).await.unwrap();
        store.fail_session(done_id, "old failure").await.unwrap();

        let live = Session::new("ffmpeg", request("M2"));
        let live_id = live.id;
        store.create_session(live).await.unwrap();

        let purged = store
            .purge_terminal_older_than(Utc::now() + chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_session(done_id).await.unwrap().is_none());
        assert!(store.get_session(live_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_active_by_content_hash_sees_only_live_sessions() {
        let (store, _dir) = temp_store().await;
        let session = Session::new("ffmpeg", request("M1"));
        let id = session.id;
        let hash = session.content_hash.clone();
        store.create_session(session).await.unwrap();

        let active = store.list_active_by_content_hash(&hash).await.unwrap();
        assert_eq!(active.len(), 1);

        store.cancel_session(id, "stop").await.unwrap();
        let active = store.list_active_by_content_hash(&hash).await.unwrap();
        assert!(active.is_empty());
    }
}
