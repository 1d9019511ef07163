use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ProvisionError, Result};
use crate::storage::{self, ArchiveStore, StoreError};

pub const DEFAULT_WORKSPACE_ROOT: &str = "/usr/local/share/rhetor";
pub const DEFAULT_BIND_SUBDIR: &str = "mflix-python";

const MAX_IDENTIFIER_LEN: usize = 64;
const MARKER_EXTENSION: &str = ".ready";

/// Stable name of a student's workspace for one course: `<course>-<student>`.
/// Doubles as local directory name and archive key stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Courses never contain `-`, so the first `-` always splits the id back
    /// into its two parts. Student ids that would name the course starter
    /// archive, or a marker or staging file next to another workspace, are
    /// refused.
    pub fn new(course: &str, student_id: &str) -> Result<Self> {
        validate_identifier("course", course)?;
        validate_identifier("studentID", student_id)?;

        if course.contains('-') {
            return Err(ProvisionError::InvalidRequest(
                "course must not contain '-'".to_string(),
            ));
        }

        let lowered = student_id.to_ascii_lowercase();
        if lowered == storage::STARTER_NAME {
            return Err(ProvisionError::InvalidRequest(format!(
                "studentID {student_id:?} is reserved"
            )));
        }
        if [MARKER_EXTENSION, storage::ARCHIVE_EXTENSION]
            .iter()
            .any(|ext| lowered.ends_with(ext))
        {
            return Err(ProvisionError::InvalidRequest(format!(
                "studentID must not end with {MARKER_EXTENSION} or {}",
                storage::ARCHIVE_EXTENSION
            )));
        }

        Ok(Self(format!("{course}-{student_id}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn archive_key(&self) -> String {
        storage::archive_key(&self.0)
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    pub root: PathBuf,
    /// Sub-directory of the workspace that is mounted into the container.
    pub bind_subdir: Option<String>,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_WORKSPACE_ROOT),
            bind_subdir: Some(DEFAULT_BIND_SUBDIR.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceOrigin {
    /// Restored from the student's own archive.
    Archive,
    /// First session: restored from the course starter archive.
    Starter,
    /// Complete local copy left behind by a save that never finished.
    Reused,
}

#[derive(Debug, Clone)]
pub struct LoadedWorkspace {
    pub id: WorkspaceId,
    pub path: PathBuf,
    pub bind_path: PathBuf,
    pub origin: WorkspaceOrigin,
}

/// Moves workspaces between the archive store and local disk.
///
/// Callers must hold the student's session slot while loading or saving, so
/// there is never more than one materialization of a workspace at a time.
#[derive(Clone)]
pub struct WorkspaceResolver {
    store: Arc<dyn ArchiveStore>,
    settings: WorkspaceSettings,
}

impl WorkspaceResolver {
    pub fn new(store: Arc<dyn ArchiveStore>, settings: WorkspaceSettings) -> Self {
        Self { store, settings }
    }

    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    pub fn path(&self, id: &WorkspaceId) -> PathBuf {
        self.settings.root.join(id.as_str())
    }

    pub fn exists(&self, id: &WorkspaceId) -> bool {
        self.path(id).is_dir()
    }

    fn archive_path(&self, id: &WorkspaceId) -> PathBuf {
        self.settings.root.join(id.archive_key())
    }

    // Written once extraction completed; lives outside the mounted tree
    fn marker_path(&self, id: &WorkspaceId) -> PathBuf {
        self.settings.root.join(format!("{id}{MARKER_EXTENSION}"))
    }

    fn bind_path(&self, path: &Path) -> PathBuf {
        match &self.settings.bind_subdir {
            Some(sub) if !sub.is_empty() => path.join(sub),
            _ => path.to_path_buf(),
        }
    }

    /// Materializes the workspace under the workspace root, restoring it from
    /// the store or from the course's starter archive.
    pub async fn load(&self, id: &WorkspaceId, course: &str) -> Result<LoadedWorkspace> {
        let failed = |source: anyhow::Error| ProvisionError::WorkspaceLoadFailed {
            workspace: id.to_string(),
            source,
        };

        let path = self.path(id);
        let marker = self.marker_path(id);

        if path.exists() {
            if marker.exists() {
                warn!(workspace = %id, "Reusing workspace whose last save did not complete");
                let bind_path = self.bind_path(&path);
                tokio::fs::create_dir_all(&bind_path)
                    .await
                    .with_context(|| format!("Failed to create {}", bind_path.display()))
                    .map_err(failed)?;
                return Ok(LoadedWorkspace {
                    id: id.clone(),
                    path,
                    bind_path,
                    origin: WorkspaceOrigin::Reused,
                });
            }

            warn!(workspace = %id, "Removing incomplete workspace left by an earlier load");
            tokio::fs::remove_dir_all(&path)
                .await
                .with_context(|| format!("Failed to remove stale {}", path.display()))
                .map_err(failed)?;
        }

        tokio::fs::create_dir_all(&self.settings.root)
            .await
            .with_context(|| format!("Failed to create {}", self.settings.root.display()))
            .map_err(failed)?;

        let (body, origin) = self.fetch(id, course).await.map_err(failed)?;
        info!(
            workspace = %id,
            origin = ?origin,
            bytes = body.len(),
            "Downloaded workspace archive"
        );

        let archive = self.archive_path(id);
        tokio::fs::write(&archive, &body)
            .await
            .with_context(|| format!("Failed to write {}", archive.display()))
            .map_err(failed)?;

        let extracted = self.extract(&archive, &path).await;
        remove_file_quietly(&archive).await;
        if let Err(e) = extracted {
            remove_dir_quietly(&path).await;
            return Err(failed(e));
        }

        let bind_path = self.bind_path(&path);
        tokio::fs::create_dir_all(&bind_path)
            .await
            .with_context(|| format!("Failed to create {}", bind_path.display()))
            .map_err(failed)?;
        tokio::fs::write(&marker, b"")
            .await
            .with_context(|| format!("Failed to write {}", marker.display()))
            .map_err(failed)?;

        info!(workspace = %id, path = %path.display(), "Workspace ready");
        Ok(LoadedWorkspace {
            id: id.clone(),
            path,
            bind_path,
            origin,
        })
    }

    async fn fetch(
        &self,
        id: &WorkspaceId,
        course: &str,
    ) -> anyhow::Result<(Vec<u8>, WorkspaceOrigin)> {
        match self.store.get(&id.archive_key()).await {
            Ok(body) => Ok((body, WorkspaceOrigin::Archive)),
            Err(StoreError::NotFound { .. }) => {
                let starter = storage::starter_key(course);
                info!(
                    workspace = %id,
                    starter = %starter,
                    "No saved workspace, using starter archive"
                );
                match self.store.get(&starter).await {
                    Ok(body) => Ok((body, WorkspaceOrigin::Starter)),
                    Err(StoreError::NotFound { .. }) => Err(anyhow!(
                        "neither {} nor starter archive {} exists",
                        id.archive_key(),
                        starter
                    )),
                    Err(e) => Err(anyhow!(e).context(format!("Failed to download {starter}"))),
                }
            }
            Err(e) => Err(anyhow!(e).context(format!("Failed to download {}", id.archive_key()))),
        }
    }

    async fn extract(&self, archive: &Path, dest: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let (archive, dest) = (archive.to_path_buf(), dest.to_path_buf());
        let entries = tokio::task::spawn_blocking(move || storage::unpack_into(&archive, &dest))
            .await
            .context("Extraction task panicked")??;

        tracing::debug!(entries, "Extracted workspace archive");
        Ok(())
    }

    /// Archives the workspace, uploads it and removes the local copy.
    /// On upload failure the local copy is kept for a later retry.
    pub async fn save(&self, id: &WorkspaceId) -> Result<String> {
        let failed = |source: anyhow::Error| ProvisionError::WorkspaceSaveFailed {
            workspace: id.to_string(),
            source,
        };

        let path = self.path(id);
        if !path.is_dir() {
            return Err(failed(anyhow!("{} does not exist", path.display())));
        }

        let archive = self.archive_path(id);
        let uploaded = self.upload(id, &path, &archive).await;
        remove_file_quietly(&archive).await;
        let location = uploaded.map_err(failed)?;

        remove_dir_quietly(&path).await;
        remove_file_quietly(&self.marker_path(id)).await;

        info!(workspace = %id, location = %location, "Workspace saved");
        Ok(location)
    }

    async fn upload(
        &self,
        id: &WorkspaceId,
        path: &Path,
        archive: &Path,
    ) -> anyhow::Result<String> {
        let (src, dst) = (path.to_path_buf(), archive.to_path_buf());
        let size = tokio::task::spawn_blocking(move || storage::pack_dir(&src, &dst))
            .await
            .context("Packing task panicked")??;
        tracing::debug!(workspace = %id, bytes = size, "Packed workspace");

        let body = tokio::fs::read(archive)
            .await
            .with_context(|| format!("Failed to read {}", archive.display()))?;

        self.store
            .put(&id.archive_key(), body)
            .await
            .with_context(|| format!("Failed to upload {}", id.archive_key()))
    }

    /// Drops a workspace that was restored for a provision that then failed.
    /// Reused workspaces hold unsaved work and are left alone.
    pub async fn discard(&self, workspace: &LoadedWorkspace) {
        if workspace.origin == WorkspaceOrigin::Reused {
            return;
        }
        remove_dir_quietly(&workspace.path).await;
        remove_file_quietly(&self.marker_path(&workspace.id)).await;
    }
}

/// Identifiers end up in directory names, archive keys and container names,
/// so only `[A-Za-z0-9._-]` is accepted and a leading dot is refused.
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ProvisionError::InvalidRequest(format!("{field} is required")));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(ProvisionError::InvalidRequest(format!(
            "{field} must be at most {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if value.starts_with('.') {
        return Err(ProvisionError::InvalidRequest(format!(
            "{field} must not start with '.'"
        )));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(ProvisionError::InvalidRequest(format!(
            "{field} contains invalid character {c:?}"
        )));
    }
    Ok(())
}

async fn remove_file_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

async fn remove_dir_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Could not remove directory {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalArchiveStore;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn identifiers_are_restricted() {
        for ok in ["s1", "M220P", "a.b_c-d", &"x".repeat(64)] {
            validate_identifier("id", ok).unwrap();
        }
        for bad in ["", ".hidden", "..", "a/b", "a b", "é", &"x".repeat(65)] {
            assert!(validate_identifier("id", bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn hyphenated_course_is_rejected() {
        let a = WorkspaceId::new("M", "a-b").unwrap();
        assert_eq!(a.as_str(), "M-a-b");
        assert!(matches!(
            WorkspaceId::new("M-a", "b"),
            Err(ProvisionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn reserved_student_ids_are_rejected() {
        for student_id in ["starter", "STARTER", "s1.ready", "s1.tgz", "s1.TGZ"] {
            assert!(
                matches!(
                    WorkspaceId::new("M220P", student_id),
                    Err(ProvisionError::InvalidRequest(_))
                ),
                "{student_id:?} accepted"
            );
        }
        for student_id in ["starter1", "my-starter", "s1.readyz", "tgz"] {
            WorkspaceId::new("M220P", student_id).unwrap();
        }
    }

    struct Fixture {
        _tmp: TempDir,
        store: Arc<LocalArchiveStore>,
        resolver: WorkspaceResolver,
        scratch: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalArchiveStore::new(tmp.path().join("store"), "rhetor"));
        let resolver = WorkspaceResolver::new(
            store.clone(),
            WorkspaceSettings {
                root: tmp.path().join("workspaces"),
                bind_subdir: Some("mflix-python".to_string()),
            },
        );
        let scratch = tmp.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        Fixture {
            _tmp: tmp,
            store,
            resolver,
            scratch,
        }
    }

    /// Uploads an archive of `files` under `key`.
    async fn seed(f: &Fixture, key: &str, files: &[(&str, &str)]) {
        let dir = f.scratch.join(key);
        for (name, content) in files {
            let file = dir.join(name);
            fs::create_dir_all(file.parent().unwrap()).unwrap();
            fs::write(file, content).unwrap();
        }
        let archive = f.scratch.join(format!("{key}.archive"));
        storage::pack_dir(&dir, &archive).unwrap();
        f.store.put(key, fs::read(&archive).unwrap()).await.unwrap();
    }

    fn snapshot(dir: &Path) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            for entry in fs::read_dir(&current).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path.strip_prefix(dir).unwrap().to_string_lossy().into_owned();
                    files.insert(rel, fs::read_to_string(&path).unwrap());
                }
            }
        }
        files
    }

    #[tokio::test]
    async fn first_load_falls_back_to_starter() {
        let f = fixture();
        seed(&f, "M220P-starter.tgz", &[("mflix-python/README.md", "starter")]).await;
        let id = WorkspaceId::new("M220P", "s1").unwrap();

        let loaded = f.resolver.load(&id, "M220P").await.unwrap();

        assert_eq!(loaded.origin, WorkspaceOrigin::Starter);
        assert_eq!(loaded.path, f.resolver.root().join("M220P-s1"));
        assert_eq!(loaded.bind_path, loaded.path.join("mflix-python"));
        assert_eq!(
            fs::read_to_string(loaded.bind_path.join("README.md")).unwrap(),
            "starter"
        );
        // The downloaded archive is not left behind
        assert!(!f.resolver.root().join("M220P-s1.tgz").exists());
    }

    #[tokio::test]
    async fn saved_archive_wins_over_starter() {
        let f = fixture();
        seed(&f, "M220P-starter.tgz", &[("mflix-python/README.md", "starter")]).await;
        seed(&f, "M220P-s1.tgz", &[("mflix-python/README.md", "mine")]).await;
        let id = WorkspaceId::new("M220P", "s1").unwrap();

        let loaded = f.resolver.load(&id, "M220P").await.unwrap();

        assert_eq!(loaded.origin, WorkspaceOrigin::Archive);
        assert_eq!(fs::read_to_string(loaded.bind_path.join("README.md")).unwrap(), "mine");
    }

    #[tokio::test]
    async fn load_without_any_archive_fails() {
        let f = fixture();
        let id = WorkspaceId::new("M220P", "s1").unwrap();

        let err = f.resolver.load(&id, "M220P").await.unwrap_err();

        assert!(matches!(err, ProvisionError::WorkspaceLoadFailed { .. }));
        assert!(!f.resolver.exists(&id));
    }

    #[tokio::test]
    async fn corrupt_archive_fails_and_leaves_no_directory() {
        let f = fixture();
        f.store.put("M220P-s1.tgz", b"not a tarball".to_vec()).await.unwrap();
        let id = WorkspaceId::new("M220P", "s1").unwrap();

        let err = f.resolver.load(&id, "M220P").await.unwrap_err();

        assert!(matches!(err, ProvisionError::WorkspaceLoadFailed { .. }));
        assert!(!f.resolver.exists(&id));
        assert!(!f.resolver.root().join("M220P-s1.tgz").exists());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_files() {
        let f = fixture();
        seed(&f, "M220P-starter.tgz", &[("mflix-python/README.md", "starter")]).await;
        let id = WorkspaceId::new("M220P", "s1").unwrap();

        let loaded = f.resolver.load(&id, "M220P").await.unwrap();
        fs::create_dir_all(loaded.bind_path.join("mflix")).unwrap();
        fs::write(loaded.bind_path.join("mflix/db.py"), "def get_movies(): ...\n").unwrap();
        fs::write(loaded.bind_path.join("README.md"), "edited").unwrap();
        let before = snapshot(&loaded.path);

        let location = f.resolver.save(&id).await.unwrap();
        assert!(location.ends_with("M220P-s1.tgz"));
        assert!(!f.resolver.exists(&id));
        assert!(!f.resolver.root().join("M220P-s1.tgz").exists());
        assert!(!f.resolver.root().join("M220P-s1.ready").exists());

        let reloaded = f.resolver.load(&id, "M220P").await.unwrap();
        assert_eq!(reloaded.origin, WorkspaceOrigin::Archive);
        assert_eq!(snapshot(&reloaded.path), before);
    }

    #[tokio::test]
    async fn directory_without_marker_is_treated_as_debris() {
        let f = fixture();
        seed(&f, "M220P-s1.tgz", &[("mflix-python/README.md", "saved")]).await;
        let id = WorkspaceId::new("M220P", "s1").unwrap();
        let stale = f.resolver.path(&id);
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("half-written"), "junk").unwrap();

        let loaded = f.resolver.load(&id, "M220P").await.unwrap();

        assert_eq!(loaded.origin, WorkspaceOrigin::Archive);
        assert!(!loaded.path.join("half-written").exists());
        assert_eq!(fs::read_to_string(loaded.bind_path.join("README.md")).unwrap(), "saved");
    }

    #[tokio::test]
    async fn complete_unsaved_workspace_is_reused() {
        let f = fixture();
        seed(&f, "M220P-starter.tgz", &[("mflix-python/README.md", "starter")]).await;
        let id = WorkspaceId::new("M220P", "s1").unwrap();
        let loaded = f.resolver.load(&id, "M220P").await.unwrap();
        fs::write(loaded.bind_path.join("unsaved.py"), "work").unwrap();

        let again = f.resolver.load(&id, "M220P").await.unwrap();

        assert_eq!(again.origin, WorkspaceOrigin::Reused);
        assert_eq!(fs::read_to_string(again.bind_path.join("unsaved.py")).unwrap(), "work");

        // Discarding never throws away unsaved work
        f.resolver.discard(&again).await;
        assert!(f.resolver.exists(&id));
    }

    #[tokio::test]
    async fn discard_removes_fresh_workspace() {
        let f = fixture();
        seed(&f, "M220P-starter.tgz", &[("mflix-python/README.md", "starter")]).await;
        let id = WorkspaceId::new("M220P", "s1").unwrap();
        let loaded = f.resolver.load(&id, "M220P").await.unwrap();

        f.resolver.discard(&loaded).await;

        assert!(!f.resolver.exists(&id));
        assert!(!f.resolver.root().join("M220P-s1.ready").exists());
    }

    struct RejectingStore {
        inner: LocalArchiveStore,
    }

    #[async_trait]
    impl ArchiveStore for RejectingStore {
        async fn get(&self, key: &str) -> std::result::Result<Vec<u8>, StoreError> {
            self.inner.get(key).await
        }

        async fn put(
            &self,
            _key: &str,
            _body: Vec<u8>,
        ) -> std::result::Result<String, StoreError> {
            Err(StoreError::Backend("bucket is read-only".to_string()))
        }
    }

    #[tokio::test]
    async fn failed_upload_keeps_local_copy_but_no_archive() {
        let f = fixture();
        seed(&f, "M220P-starter.tgz", &[("mflix-python/README.md", "starter")]).await;
        let resolver = WorkspaceResolver::new(
            Arc::new(RejectingStore {
                inner: LocalArchiveStore::new(f._tmp.path().join("store"), "rhetor"),
            }),
            WorkspaceSettings {
                root: f.resolver.root().to_path_buf(),
                bind_subdir: Some("mflix-python".to_string()),
            },
        );
        let id = WorkspaceId::new("M220P", "s1").unwrap();
        resolver.load(&id, "M220P").await.unwrap();

        let err = resolver.save(&id).await.unwrap_err();

        assert!(matches!(err, ProvisionError::WorkspaceSaveFailed { .. }));
        assert!(resolver.exists(&id));
        assert!(resolver.root().join("M220P-s1.ready").exists());
        assert!(!resolver.root().join("M220P-s1.tgz").exists());
    }

    #[tokio::test]
    async fn saving_missing_workspace_fails() {
        let f = fixture();
        let err = f.resolver.save(&WorkspaceId::new("M220P", "ghost").unwrap()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::WorkspaceSaveFailed { .. }));
    }
}
