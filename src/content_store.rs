//! Append-only, content-addressable storage for output artifacts.
//!
//! Artifacts live under `{root}/store/{hh}/{hash}/` where `hh` is the first
//! two hex characters of the content hash (bounds per-directory entry
//! counts). In-flight output is staged in per-session workspaces under
//! `{root}/work/{session-id}/` and promoted with a single same-filesystem
//! directory rename, so readers never observe a partially populated
//! artifact. Published artifacts are immutable.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::error_handling::types::ContentStoreError;
use crate::session_store::store_trait::SessionStore;

/// Marker file holding the publish timestamp inside each artifact
/// directory. Written into the workspace before the rename so the canonical
/// directory is complete the instant it appears.
const PUBLISHED_MARKER: &str = ".published";

/// A published, immutable output directory for one content hash.
#[derive(Debug, Clone)]
pub struct ContentArtifact {
    pub content_hash: String,
    pub path: PathBuf,
    pub published_at: DateTime<Utc>,
    pub total_bytes: u64,
}

pub struct ContentStore {
    work_dir: PathBuf,
    store_dir: PathBuf,
    sessions: Arc<dyn SessionStore>,
}

impl ContentStore {
    /// Creates the store rooted at `root`, ensuring the workspace and
    /// canonical subtrees exist.
    pub fn new<P: AsRef<Path>>(
        root: P,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, ContentStoreError> {
        let root = root.as_ref().to_path_buf();
        let work_dir = root.join("work");
        let store_dir = root.join("store");
        fs::create_dir_all(&work_dir)?;
        fs::create_dir_all(&store_dir)?;
        info!("Content store initialized at {}", root.display());
        Ok(Self {
            work_dir,
            store_dir,
            sessions,
        })
    }

    /// Path of the private staging directory for a session. Pure; no I/O.
    pub fn workspace_path(&self, session_id: Uuid) -> PathBuf {
        self.work_dir.join(session_id.to_string())
    }

    /// Creates (or re-validates) the staging directory for a session.
    pub fn workspace(&self, session_id: Uuid) -> Result<PathBuf, ContentStoreError> {
        let path = self.workspace_path(session_id);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    fn artifact_dir(&self, content_hash: &str) -> PathBuf {
        let prefix = if content_hash.len() >= 2 {
            &content_hash[..2]
        } else {
            content_hash
        };
        self.store_dir.join(prefix).join(content_hash)
    }

    /// Atomically promotes a workspace to the canonical artifact directory
    /// for `content_hash`.
    ///
    /// First writer wins: when an artifact already exists the workspace is
    /// discarded and the existing artifact returned. The promotion is a
    /// single directory rename and is refused across filesystems, where it
    /// could not be atomic.
    pub fn publish(
        &self,
        workspace: &Path,
        content_hash: &str,
    ) -> Result<ContentArtifact, ContentStoreError> {
        let target = self.artifact_dir(content_hash);

        if target.exists() {
            debug!(
                "Artifact {} already published; discarding workspace {}",
                content_hash,
                workspace.display()
            );
            let _ = fs::remove_dir_all(workspace);
            return self
                .lookup(content_hash)?
                .ok_or_else(|| ContentStoreError::ArtifactNotFound(content_hash.to_string()));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let published_at = Utc::now();
        fs::write(workspace.join(PUBLISHED_MARKER), published_at.to_rfc3339())?;

        if let Err(err) = fs::rename(workspace, &target) {
            #[cfg(unix)]
            if err.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32) {
                return Err(ContentStoreError::CrossFilesystem(
                    workspace.to_path_buf(),
                    target,
                ));
            }
            // A concurrent publisher may have won the rename race.
            if target.exists() {
                debug!(
                    "Lost publish race for {}; discarding workspace {}",
                    content_hash,
                    workspace.display()
                );
                let _ = fs::remove_dir_all(workspace);
                return self
                    .lookup(content_hash)?
                    .ok_or_else(|| ContentStoreError::ArtifactNotFound(content_hash.to_string()));
            }
            return Err(ContentStoreError::IoError(err));
        }

        let total_bytes = artifact_payload_size(&target)?;
        info!(
            "Published artifact {} ({} bytes) at {}",
            content_hash,
            total_bytes,
            target.display()
        );
        Ok(ContentArtifact {
            content_hash: content_hash.to_string(),
            path: target,
            published_at,
            total_bytes,
        })
    }

    /// Returns the artifact for a content hash, if published.
    pub fn lookup(&self, content_hash: &str) -> Result<Option<ContentArtifact>, ContentStoreError> {
        let path = self.artifact_dir(content_hash);
        if !path.is_dir() {
            return Ok(None);
        }
        Ok(Some(self.read_artifact(content_hash, path)?))
    }

    fn read_artifact(
        &self,
        content_hash: &str,
        path: PathBuf,
    ) -> Result<ContentArtifact, ContentStoreError> {
        let published_at = fs::read_to_string(path.join(PUBLISHED_MARKER))
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| {
                // Marker missing or unreadable; fall back to directory mtime.
                fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now())
            });
        let total_bytes = artifact_payload_size(&path)?;
        Ok(ContentArtifact {
            content_hash: content_hash.to_string(),
            path,
            published_at,
            total_bytes,
        })
    }

    /// Deletes a published artifact. Refuses while any active session still
    /// references the hash.
    pub async fn delete(&self, content_hash: &str) -> Result<(), ContentStoreError> {
        let active = self
            .sessions
            .list_active_by_content_hash(content_hash)
            .await
            .map_err(|e| {
                ContentStoreError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    e.to_string(),
                ))
            })?;
        if !active.is_empty() {
            return Err(ContentStoreError::ArtifactInUse(content_hash.to_string()));
        }

        let path = self.artifact_dir(content_hash);
        if !path.is_dir() {
            return Err(ContentStoreError::ArtifactNotFound(content_hash.to_string()));
        }
        fs::remove_dir_all(&path)?;
        info!("Deleted artifact {}", content_hash);

        // Drop the fan-out directory when it became empty.
        if let Some(parent) = path.parent() {
            if fs::read_dir(parent).map(|mut d| d.next().is_none()).unwrap_or(false) {
                let _ = fs::remove_dir(parent);
            }
        }
        Ok(())
    }

    /// Removes a session's staging directory, if present. Supervisors call
    /// this on every exit path that did not publish.
    pub fn purge_workspace(&self, session_id: Uuid) -> Result<(), ContentStoreError> {
        let path = self.workspace_path(session_id);
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
            debug!("Purged workspace {}", path.display());
        }
        Ok(())
    }

    /// Lists all published artifacts. Used by the eviction sweep.
    pub fn list_artifacts(&self) -> Result<Vec<ContentArtifact>, ContentStoreError> {
        let mut artifacts = Vec::new();
        for prefix_entry in fs::read_dir(&self.store_dir)? {
            let prefix_entry = prefix_entry?;
            if !prefix_entry.file_type()?.is_dir() {
                continue;
            }
            for artifact_entry in fs::read_dir(prefix_entry.path())? {
                let artifact_entry = artifact_entry?;
                if !artifact_entry.file_type()?.is_dir() {
                    continue;
                }
                let hash = artifact_entry.file_name().to_string_lossy().into_owned();
                match self.read_artifact(&hash, artifact_entry.path()) {
                    Ok(artifact) => artifacts.push(artifact),
                    Err(e) => warn!("Skipping unreadable artifact {}: {}", hash, e),
                }
            }
        }
        Ok(artifacts)
    }

    /// Total bytes across all published artifacts.
    pub fn total_bytes(&self) -> Result<u64, ContentStoreError> {
        Ok(self.list_artifacts()?.iter().map(|a| a.total_bytes).sum())
    }

    /// Session ids that still have a staging directory on disk.
    pub fn list_workspaces(&self) -> Result<Vec<Uuid>, ContentStoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.work_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Ok(id) = Uuid::parse_str(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

/// Artifact payload size; the publish marker is bookkeeping, not payload.
fn artifact_payload_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else if entry.file_name() != PUBLISHED_MARKER {
            total += meta.len();
        }
    }
    Ok(total)
}

fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::types::{AudioCodec, Container, Preset, TranscodeRequest, VideoCodec};
    use crate::session_store::memory_store::MemorySessionStore;
    use crate::session_store::types::Session;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn store() -> (ContentStore, Arc<MemorySessionStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let sessions = Arc::new(MemorySessionStore::new());
        let content = ContentStore::new(dir.path(), sessions.clone()).unwrap();
        (content, sessions, dir)
    }

    fn request() -> TranscodeRequest {
        TranscodeRequest {
            media_id: "M1".to_string(),
            input_path: "/media/in.mkv".into(),
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

    const HASH: &str = "ab12cd34ab12cd34ab12cd34ab12cd34ab12cd34ab12cd34ab12cd34ab12cd34";

    #[tokio::test]
    async fn publish_promotes_workspace_under_fanout_prefix() {
        let (content, _sessions, _dir) = store();
        let id = Uuid::new_v4();
        let workspace = content.workspace(id).unwrap();
        fs::write(workspace.join("output.mp4"), b"encoded bytes").unwrap();

        let artifact = content.publish(&workspace, HASH).unwrap();
        assert!(artifact.path.ends_with(format!("ab/{}", HASH)));
        assert!(artifact.path.join("output.mp4").is_file());
        assert!(!workspace.exists());
        assert!(artifact.total_bytes > 0);

        let found = content.lookup(HASH).unwrap().unwrap();
        assert_eq!(found.content_hash, HASH);
    }

    #[tokio::test]
    async fn publish_is_first_writer_wins() {
        let (content, _sessions, _dir) = store();
        let first = content.workspace(Uuid::new_v4()).unwrap();
        fs::write(first.join("output.mp4"), b"first").unwrap();
        content.publish(&first, HASH).unwrap();

        let second = content.workspace(Uuid::new_v4()).unwrap();
        fs::write(second.join("output.mp4"), b"second, longer payload").unwrap();
        let artifact = content.publish(&second, HASH).unwrap();

        // The loser's workspace is discarded and the original bytes remain.
        assert!(!second.exists());
        assert_eq!(
            fs::read(artifact.path.join("output.mp4")).unwrap(),
            b"first"
        );
    }

    #[tokio::test]
    async fn lookup_of_unknown_hash_is_none() {
        let (content, _sessions, _dir) = store();
        assert!(content.lookup(HASH).unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_refuses_while_a_session_is_active() {
        let (content, sessions, _dir) = store();
        let workspace = content.workspace(Uuid::new_v4()).unwrap();
        fs::write(workspace.join("output.mp4"), b"bytes").unwrap();

        let mut session = Session::new("ffmpeg", request());
        // Pin the record to the artifact hash under test.
        session.content_hash = HASH.to_string();
        let id = session.id;
        sessions.create_session(session).await.unwrap();

        content.publish(&workspace, HASH).unwrap();
        assert!(matches!(
            content.delete(HASH).await,
            Err(ContentStoreError::ArtifactInUse(_))
        ));

        sessions.cancel_session(id, "done").await.unwrap();
        content.delete(HASH).await.unwrap();
        assert!(content.lookup(HASH).unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_workspace_removes_staging_directory() {
        let (content, _sessions, _dir) = store();
        let id = Uuid::new_v4();
        let workspace = content.workspace(id).unwrap();
        fs::write(workspace.join("partial.mp4"), b"partial").unwrap();
        assert_eq!(content.list_workspaces().unwrap(), vec![id]);

        content.purge_workspace(id).unwrap();
        assert!(!workspace.exists());
        assert!(content.list_workspaces().unwrap().is_empty());

        // Purging again is a no-op.
        content.purge_workspace(id).unwrap();
    }

    #[tokio::test]
    async fn list_artifacts_and_total_bytes_cover_the_tree() {
        let (content, _sessions, _dir) = store();
        for (hash, payload) in [(HASH, b"aaaa".as_slice()), (
            "ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00ff00",
            b"bbbbbbbb".as_slice(),
        )] {
            let workspace = content.workspace(Uuid::new_v4()).unwrap();
            fs::write(workspace.join("output.mp4"), payload).unwrap();
            content.publish(&workspace, hash).unwrap();
        }
        let artifacts = content.list_artifacts().unwrap();
        assert_eq!(artifacts.len(), 2);
        assert!(content.total_bytes().unwrap() >= 12);
    }
}
