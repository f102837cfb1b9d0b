//! Record store for tracked concursos + durable key-value snapshot storage.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use concursos_core::{Concurso, ConcursoPatch, InterestStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info_span, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "concursos-storage";

/// Fixed key the whole collection is persisted under.
pub const STORAGE_KEY: &str = "concursos-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing store snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("duplicate concurso id `{0}`")]
    DuplicateId(String),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Durable string storage addressed by key.
pub trait KeyValueStorage: Send + Sync + fmt::Debug {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("CONCURSOS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
        }
    }
}

/// One `<key>.json` file per key under a data directory.
#[derive(Debug, Clone)]
pub struct FileKeyValueStorage {
    root: PathBuf,
}

impl FileKeyValueStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl KeyValueStorage for FileKeyValueStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&path)(err)),
        }
    }

    /// Write through a temp file and an atomic rename so readers never see a
    /// half-written snapshot.
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(io_error(&self.root))?;

        let path = self.path_for(key);
        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", Uuid::new_v4(), value.len()));

        let result = fs::File::create(&temp_path)
            .and_then(|mut file| {
                file.write_all(value.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&temp_path, &path));

        if let Err(err) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(io_error(&path)(err));
        }
        Ok(())
    }
}

/// Process-local storage; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStorage {
    entries: Arc<std::sync::Mutex<HashMap<String, String>>>,
}

impl MemoryKeyValueStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryKeyValueStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    concursos: Vec<Concurso>,
}

#[derive(Debug, Serialize)]
struct PersistedStateRef<'a> {
    concursos: &'a [Concurso],
}

/// Ordered collection of concursos, persisted after every mutation.
#[derive(Debug)]
pub struct ConcursoStore {
    records: Vec<Concurso>,
    backend: Box<dyn KeyValueStorage>,
    revision: u64,
}

pub type SharedStore = Arc<Mutex<ConcursoStore>>;

impl ConcursoStore {
    /// Rehydrate from the backend. A missing or unreadable snapshot starts an
    /// empty store.
    pub fn open(backend: impl KeyValueStorage + 'static) -> Self {
        let records = match backend.read(STORAGE_KEY) {
            Ok(Some(blob)) => match serde_json::from_str::<PersistedState>(&blob) {
                Ok(state) => state.concursos,
                Err(err) => {
                    warn!(error = %err, "discarding malformed store snapshot");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "store snapshot unreadable; starting empty");
                Vec::new()
            }
        };

        Self {
            records,
            backend: Box::new(backend),
            revision: 0,
        }
    }

    pub fn open_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self::open(FileKeyValueStorage::new(data_dir))
    }

    pub fn in_memory() -> Self {
        Self::open(MemoryKeyValueStorage::new())
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn records(&self) -> &[Concurso] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&Concurso> {
        self.records.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bumped once per applied mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn interested(&self) -> impl Iterator<Item = &Concurso> {
        self.records
            .iter()
            .filter(|c| c.interest_status == InterestStatus::Interested)
    }

    /// Interested records that already carry coordinates.
    pub fn mapped(&self) -> impl Iterator<Item = &Concurso> {
        self.interested().filter(|c| c.has_coordinates())
    }

    /// Distinct non-empty region codes, sorted.
    pub fn regions(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|c| c.location.clone())
            .filter(|uf| !uf.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Swap the whole collection in a single step, then persist.
    pub fn replace_all(&mut self, records: Vec<Concurso>) -> Result<(), StoreError> {
        if let Some(dup) = first_duplicate_id(&records) {
            return Err(StoreError::DuplicateId(dup));
        }

        self.records = records;
        self.revision += 1;
        self.persist()
    }

    /// Apply `patch` to the record with `id`. Returns `Ok(false)` when no
    /// record matches; that is not an error.
    pub fn update_by_id(&mut self, id: &str, patch: ConcursoPatch) -> Result<bool, StoreError> {
        let Some(record) = self.records.iter_mut().find(|c| c.id == id) else {
            return Ok(false);
        };
        record.apply(patch);
        self.revision += 1;
        self.persist()?;
        Ok(true)
    }

    pub fn set_interest(&mut self, id: &str, status: InterestStatus) -> Result<bool, StoreError> {
        self.update_by_id(id, ConcursoPatch::interest(status))
    }

    fn persist(&self) -> Result<(), StoreError> {
        let span = info_span!("persist_store", key = STORAGE_KEY, records = self.records.len());
        let _guard = span.enter();

        let blob = serde_json::to_string(&PersistedStateRef {
            concursos: &self.records,
        })?;
        self.backend.write(STORAGE_KEY, &blob)
    }
}

fn first_duplicate_id(records: &[Concurso]) -> Option<String> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .iter()
        .find(|c| !seen.insert(c.id.as_str()))
        .map(|c| c.id.clone())
}
