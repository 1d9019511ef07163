#![allow(dead_code)]

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use rhetor::docker::{ContainerLifecycleManager, ContainerSettings, MockEngine};
use rhetor::operator::{PortAllocator, PortRange, SessionManager};
use rhetor::storage::{self, ArchiveStore, LocalArchiveStore, StoreError};
use rhetor::workspace::{WorkspaceResolver, WorkspaceSettings};

pub const BUCKET: &str = "rhetor";

/// Local bucket whose uploads can be switched off. Every upload notes how
/// many containers the engine still held when it ran.
pub struct FlakyStore {
    inner: LocalArchiveStore,
    engine: Arc<MockEngine>,
    fail_put: AtomicBool,
    containers_at_put: Mutex<Vec<(String, usize)>>,
}

impl FlakyStore {
    pub fn set_fail_put(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    /// `(key, live container count)` for each upload attempt, in order.
    pub fn containers_at_put(&self) -> Vec<(String, usize)> {
        self.containers_at_put.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<String, StoreError> {
        self.containers_at_put
            .lock()
            .unwrap()
            .push((key.to_string(), self.engine.count()));
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("upload of {key} refused")));
        }
        self.inner.put(key, body).await
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub engine: Arc<MockEngine>,
    pub store: Arc<FlakyStore>,
    pub manager: Arc<SessionManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_range(PortRange::default())
    }

    pub fn with_range(range: PortRange) -> Self {
        let tmp = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new());
        let store = Arc::new(FlakyStore {
            inner: LocalArchiveStore::new(tmp.path().join("store"), BUCKET),
            engine: engine.clone(),
            fail_put: AtomicBool::new(false),
            containers_at_put: Mutex::new(Vec::new()),
        });

        let manager = SessionManager::new(
            PortAllocator::new(range),
            ContainerLifecycleManager::new(engine.clone(), ContainerSettings::default()),
            WorkspaceResolver::new(
                store.clone(),
                WorkspaceSettings {
                    root: tmp.path().join("workspaces"),
                    bind_subdir: Some("mflix-python".to_string()),
                },
            ),
        );

        Self {
            tmp,
            engine,
            store,
            manager: Arc::new(manager),
        }
    }

    pub fn bucket(&self) -> PathBuf {
        self.tmp.path().join("store").join(BUCKET)
    }

    pub fn workspace_dir(&self, name: &str) -> PathBuf {
        self.tmp.path().join("workspaces").join(name)
    }

    /// Places an archive of `files` in the bucket under `key`.
    pub fn seed_archive(&self, key: &str, files: &[(&str, &str)]) {
        let src = self.tmp.path().join("seed").join(key);
        for (name, content) in files {
            let file = src.join(name);
            fs::create_dir_all(file.parent().unwrap()).unwrap();
            fs::write(file, content).unwrap();
        }
        fs::create_dir_all(self.bucket()).unwrap();
        storage::pack_dir(&src, &self.bucket().join(key)).unwrap();
    }

    pub fn seed_starter(&self, course: &str) {
        self.seed_archive(
            &storage::starter_key(course),
            &[
                ("mflix-python/README.md", "starter"),
                ("mflix-python/app.py", "print('hi')"),
            ],
        );
    }

    /// Extracts the archive stored under `key` and returns where it landed.
    pub fn open_archive(&self, key: &str) -> PathBuf {
        let dest = self.tmp.path().join("opened").join(key);
        fs::create_dir_all(&dest).unwrap();
        storage::unpack_into(&self.bucket().join(key), &dest).unwrap();
        dest
    }
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}
