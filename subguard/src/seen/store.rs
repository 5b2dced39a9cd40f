use std::collections::HashSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;
use crate::utils::fs;
use crate::{Error, Result};

/// Seen-set persistence settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenStoreConfig {
    pub path: PathBuf,
    /// Flush once this many additions are pending.
    pub autosave_every: u64,
    /// Cadence of the background flusher.
    pub flush_interval: Duration,
}

/// Result of [`SeenStore::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No file yet; started empty.
    Missing,
    /// Loaded this many identifiers.
    Loaded(usize),
    /// The file could not be read or parsed; started empty.
    Unreadable(String),
}

/// On-disk shape written by [`SeenStore::flush`].
#[derive(Serialize)]
struct SeenFile<'a> {
    ids: &'a [String],
    count: usize,
}

/// Shapes accepted by [`SeenStore::load`].
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSeen {
    Object {
        ids: Vec<String>,
    },
    Legacy(Vec<String>),
}

impl StoredSeen {
    fn into_ids(self) -> Vec<String> {
        match self {
            Self::Object { ids } | Self::Legacy(ids) => ids,
        }
    }
}

#[derive(Debug, Default)]
struct SeenState {
    ids: HashSet<String>,
    /// Additions not yet captured by a successful flush.
    dirty: u64,
    /// Ids claimed by a worker but not yet added.
    in_flight: HashSet<String>,
}

/// Durable set of processed item identifiers.
///
/// Lookups and inserts take a short synchronous lock. Flushes snapshot the
/// set under that lock and write it outside of it, so workers are never
/// blocked on disk I/O.
#[derive(Debug)]
pub struct SeenStore {
    path: PathBuf,
    autosave_every: u64,
    state: Mutex<SeenState>,
    /// Held until a snapshot write has finished, even if the flushing task is dropped.
    flush_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SeenStore {
    pub fn new(path: impl Into<PathBuf>, autosave_every: u64) -> Self {
        Self {
            path: path.into(),
            autosave_every: autosave_every.max(1),
            state: Mutex::new(SeenState::default()),
            flush_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn from_config(config: &SeenStoreConfig) -> Self {
        Self::new(config.path.clone(), config.autosave_every)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory set with the persisted one. Never fails.
    pub async fn load(&self) -> LoadOutcome {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No seen cache found, starting empty");
                return LoadOutcome::Missing;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read seen cache, starting empty");
                return LoadOutcome::Unreadable(e.to_string());
            }
        };

        match serde_json::from_slice::<StoredSeen>(&bytes) {
            Ok(stored) => {
                let ids: HashSet<String> = stored.into_ids().into_iter().collect();
                let count = ids.len();
                *self.state.lock() = SeenState {
                    ids,
                    ..SeenState::default()
                };
                info!(path = %self.path.display(), count, "Loaded seen cache");
                LoadOutcome::Loaded(count)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Seen cache is corrupt, starting empty");
                LoadOutcome::Unreadable(e.to_string())
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().ids.contains(id)
    }

    /// Reserve `id` for processing.
    ///
    /// Returns `false` if `id` is already seen or another caller holds the
    /// claim. The claim ends when `id` is [`add`](Self::add)ed.
    pub fn claim(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        if state.ids.contains(id) {
            return false;
        }
        state.in_flight.insert(id.to_string())
    }

    /// Insert `id`. Returns `false` if it was already present.
    pub fn add(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        state.in_flight.remove(id);
        let inserted = state.ids.insert(id.to_string());
        if inserted {
            state.dirty += 1;
        }
        inserted
    }

    pub fn len(&self) -> usize {
        self.state.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of additions not yet persisted.
    pub fn dirty_count(&self) -> u64 {
        self.state.lock().dirty
    }

    /// Whether enough additions are pending to warrant an autosave.
    pub fn needs_autosave(&self) -> bool {
        self.dirty_count() >= self.autosave_every
    }

    /// Persist the set atomically if anything changed.
    ///
    /// Returns `Ok(false)` when there was nothing to write. Concurrent calls
    /// are serialized; additions that race the snapshot stay pending.
    pub async fn flush(&self) -> Result<bool> {
        let flush_guard = self.flush_lock.clone().lock_owned().await;

        let (mut snapshot, captured) = {
            let state = self.state.lock();
            if state.dirty == 0 {
                return Ok(false);
            }
            (state.ids.iter().cloned().collect::<Vec<_>>(), state.dirty)
        };
        snapshot.sort_unstable();
        let count = snapshot.len();

        let path = self.path.clone();
        // The guard travels with the blocking write so a dropped flush still
        // excludes the next one until its rename has landed.
        let (_flush_guard, written) = tokio::task::spawn_blocking(move || {
            let written = write_atomic(&path, &snapshot);
            (flush_guard, written)
        })
        .await?;
        written?;

        {
            let mut state = self.state.lock();
            state.dirty = state.dirty.saturating_sub(captured);
        }
        debug!(path = %self.path.display(), count, "Flushed seen cache");
        Ok(true)
    }

    /// [`flush`](Self::flush), recording any failure in `metrics`.
    pub async fn flush_reporting(&self, metrics: &MetricsCollector) -> Result<bool> {
        let result = self.flush().await;
        if let Err(e) = &result {
            metrics.report_error(format!("Failed to save seen cache: {}", e));
        }
        result
    }
}

/// Write `ids` to a temp file next to `path`, fsync it, then rename over `path`.
fn write_atomic(path: &Path, ids: &[String]) -> Result<()> {
    write_atomic_with(path, |writer| {
        serde_json::to_writer(
            writer,
            &SeenFile {
                ids,
                count: ids.len(),
            },
        )?;
        Ok(())
    })
}

/// Atomically replace `path` with whatever `write` produces.
///
/// If `write` fails, `path` is left untouched and the temp file is removed.
fn write_atomic_with<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&std::fs::File>) -> Result<()>,
{
    fs::ensure_parent_dir_sync(path)?;
    let dir = fs::parent_or_current(path);

    let tmp = NamedTempFile::new_in(dir)
        .map_err(|e| fs::io_error("creating temp file in", dir, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        write(&mut writer)?;
        writer
            .flush()
            .map_err(|e| fs::io_error("writing", tmp.path(), e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| fs::io_error("syncing", tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| Error::io_path("replacing", path, e.error))?;

    sync_dir(dir);
    Ok(())
}

/// Best-effort fsync of the directory entry after a rename.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = std::fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Flush `store` every `interval` until `token` is cancelled.
pub async fn run_periodic_flush(
    store: Arc<SeenStore>,
    metrics: Arc<MetricsCollector>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Periodic seen-cache flusher stopping");
                break;
            }
            _ = ticker.tick() => {
                let _ = store.flush_reporting(&metrics).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> SeenStore {
        SeenStore::new(dir.path().join("seen.json"), 3)
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.load().await, LoadOutcome::Missing);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("seen.json"), b"{not json").unwrap();
        let store = store_in(&dir);
        assert!(matches!(store.load().await, LoadOutcome::Unreadable(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn accepts_object_and_legacy_formats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.json");

        std::fs::write(&path, br#"{"ids": ["a", "b"], "count": 2}"#).unwrap();
        let store = SeenStore::new(&path, 50);
        assert_eq!(store.load().await, LoadOutcome::Loaded(2));
        assert!(store.contains("a"));

        std::fs::write(&path, br#"["x", "y", "x"]"#).unwrap();
        let store = SeenStore::new(&path, 50);
        assert_eq!(store.load().await, LoadOutcome::Loaded(2));
        assert!(store.contains("y"));
        assert!(!store.contains("a"));
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.add("a"));
        assert!(!store.add("a"));
        assert_eq!(store.dirty_count(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn flush_writes_object_format_and_clears_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add("b");
        store.add("a");

        assert!(store.flush().await.unwrap());
        assert_eq!(store.dirty_count(), 0);
        assert!(!store.flush().await.unwrap());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["ids"], serde_json::json!(["a", "b"]));
        assert_eq!(raw["count"], 2);
    }

    #[tokio::test]
    async fn flush_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeenStore::new(dir.path().join("nested/deeper/seen.json"), 1);
        store.add("a");
        assert!(store.flush().await.unwrap());
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn autosave_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add("a");
        store.add("b");
        assert!(!store.needs_autosave());
        store.add("c");
        assert!(store.needs_autosave());
        store.flush().await.unwrap();
        assert!(!store.needs_autosave());
    }

    #[tokio::test]
    async fn failed_flush_keeps_changes_pending() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a dir").unwrap();

        let store = SeenStore::new(blocker.join("seen.json"), 1);
        store.add("a");
        let metrics = MetricsCollector::new();
        assert!(store.flush_reporting(&metrics).await.is_err());
        assert_eq!(store.dirty_count(), 1);

        let last_error = metrics.snapshot().last_error.unwrap();
        assert!(last_error.message.contains("seen cache"));
    }

    #[test]
    fn claim_is_exclusive_until_added() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.claim("a"));
        assert!(!store.claim("a"));
        assert!(!store.contains("a"));

        assert!(store.add("a"));
        assert!(!store.claim("a"));
        assert_eq!(store.dirty_count(), 1);
    }

    #[tokio::test]
    async fn loaded_ids_cannot_be_claimed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("seen.json"), br#"["old"]"#).unwrap();
        let store = store_in(&dir);
        store.load().await;
        assert!(!store.claim("old"));
        assert!(store.claim("new"));
    }

    #[test]
    fn failed_write_leaves_snapshot_and_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.json");
        write_atomic(&path, &["a".to_string(), "b".to_string()]).unwrap();
        let before = std::fs::read(&path).unwrap();

        let result = write_atomic_with(&path, |writer| {
            writer
                .write_all(br#"{"ids":["a","b","c"#)
                .map_err(|e| fs::io_error("writing", Path::new("tmp"), e))?;
            Err(Error::Other("disk full".into()))
        });
        assert!(matches!(result, Err(Error::Other(msg)) if msg == "disk full"));

        assert_eq!(std::fs::read(&path).unwrap(), before);
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("seen.json")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_flush_completes_before_the_next_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SeenStore::new(dir.path().join("seen.json"), u64::MAX));
        for n in 0..200_000 {
            store.add(&format!("t3_{n:06}"));
        }

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.flush().await })
        };
        while store.flush_lock.try_lock().is_ok() && !pending.is_finished() {
            tokio::task::yield_now().await;
        }
        pending.abort();
        let _ = pending.await;

        store.add("late");
        assert!(store.flush().await.unwrap());

        let reloaded = store_in(&dir);
        assert_eq!(reloaded.load().await, LoadOutcome::Loaded(200_001));
        assert!(reloaded.contains("late"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_flushes_and_adds() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir));

        let mut handles = Vec::new();
        for worker in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..25 {
                    store.add(&format!("{worker}-{n}"));
                    if n % 5 == 0 {
                        store.flush().await.unwrap();
                    }
                }
            }));
        }
        futures::future::join_all(handles).await;
        store.flush().await.unwrap();
        assert_eq!(store.dirty_count(), 0);

        let reloaded = store_in(&dir);
        assert_eq!(reloaded.load().await, LoadOutcome::Loaded(100));
    }

    #[tokio::test]
    async fn periodic_flush_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir));
        let metrics = Arc::new(MetricsCollector::new());
        let token = CancellationToken::new();
        store.add("a");

        let handle = tokio::spawn(run_periodic_flush(
            store.clone(),
            metrics,
            Duration::from_millis(20),
            token.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.dirty_count(), 0);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
