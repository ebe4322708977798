use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::Mutex;

use pixel_api::{BackendError, StateRecord, StateStore};

use super::config::FileStoreConfig;

const JOURNAL_FILE: &str = "state.jsonl";

// ════════════════════════════════════════════════════════════════
//  FileStateStore
// ════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Inner {
    initialized: bool,
    records: HashMap<String, StateRecord>,
    /// Последняя запись могла оборваться посреди строки.
    torn_tail: bool,
}

/// Durable state store: append-only JSONL журнал + индекс в памяти.
///
/// Каждый upsert дописывает одну строку под lock'ом, поэтому строки
/// журнала идут в порядке прихода и replay даёт last-write-wins.
/// `flush` переписывает журнал по одной строке на координату.
pub struct FileStateStore {
    data_dir: PathBuf,
    sync_writes: bool,
    inner: Mutex<Inner>,
}

impl FileStateStore {
    pub fn new(config: &FileStoreConfig) -> Self {
        Self {
            data_dir: PathBuf::from(&config.data_dir),
            sync_writes: config.sync_writes,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(JOURNAL_FILE)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // ── Init ──

    fn do_init(&self, inner: &mut Inner) -> Result<(), BackendError> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| BackendError::io(format!("mkdir {}: {e}", self.data_dir.display())))?;

        let path = self.journal_path();
        let journal = if path.exists() { replay(&path)? } else { Replay::default() };
        inner.records = journal.records;
        inner.torn_tail = false;

        // Битые строки и оборванный хвост вычищаются до первого append.
        if journal.skipped > 0 || journal.torn_tail {
            self.compact(&inner.records)?;
            tracing::warn!(
                path = %path.display(),
                skipped = journal.skipped,
                torn_tail = journal.torn_tail,
                "state journal repaired"
            );
        }
        inner.initialized = true;

        tracing::info!(
            path = %path.display(),
            records = inner.records.len(),
            "state journal loaded"
        );
        Ok(())
    }

    // ── Upsert ──

    /// Дописать строку. После неудачной записи следующая начинается с `\n`,
    /// чтобы не продолжать оборванную строку.
    fn append_line(&self, inner: &mut Inner, line: &str) -> Result<(), BackendError> {
        let mut buf = String::with_capacity(line.len() + 2);
        if inner.torn_tail {
            buf.push('\n');
        }
        buf.push_str(line);
        buf.push('\n');

        let result = self.write_journal(buf.as_bytes());
        inner.torn_tail = result.is_err();
        result
    }

    fn write_journal(&self, bytes: &[u8]) -> Result<(), BackendError> {
        let path = self.journal_path();
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| BackendError::io(format!("open {}: {e}", path.display())))?;
        f.write_all(bytes).map_err(|e| BackendError::io(format!("write: {e}")))?;
        if self.sync_writes {
            f.sync_data()?;
        }
        Ok(())
    }

    // ── Compaction ──

    fn compact(&self, records: &HashMap<String, StateRecord>) -> Result<(), BackendError> {
        let path = self.journal_path();
        let tmp = self.data_dir.join(format!("{JOURNAL_FILE}.tmp"));

        let mut keys: Vec<&String> = records.keys().collect();
        keys.sort();

        let mut f = std::fs::File::create(&tmp)
            .map_err(|e| BackendError::io(format!("create {}: {e}", tmp.display())))?;
        for key in keys {
            let line = serde_json::to_string(&records[key])?;
            writeln!(f, "{line}").map_err(|e| BackendError::io(format!("write: {e}")))?;
        }
        f.sync_all()?;
        drop(f);

        std::fs::rename(&tmp, &path)
            .map_err(|e| BackendError::io(format!("rename {}: {e}", tmp.display())))?;
        Ok(())
    }
}

#[derive(Default)]
struct Replay {
    records: HashMap<String, StateRecord>,
    skipped: usize,
    /// Файл не заканчивается на `\n`.
    torn_tail: bool,
}

/// Прочитать журнал; последняя строка для координаты побеждает.
fn replay(path: &Path) -> Result<Replay, BackendError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| BackendError::io(format!("read {}: {e}", path.display())))?;

    let mut journal = Replay {
        torn_tail: !content.is_empty() && !content.ends_with('\n'),
        ..Replay::default()
    };
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StateRecord>(line) {
            Ok(record) => {
                journal.records.insert(record.coordinate.clone(), record);
            }
            Err(e) => {
                journal.skipped += 1;
                tracing::warn!(path = %path.display(), line = n + 1, error = %e, "bad journal line, skipping");
            }
        }
    }
    Ok(journal)
}

impl StateStore for FileStateStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            self.do_init(&mut inner)
        })
    }

    fn upsert(
        &self,
        record: StateRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            let line = serde_json::to_string(&record)?;

            let mut inner = self.inner.lock().await;
            if !inner.initialized {
                return Err(BackendError::config("file store is not initialized"));
            }
            self.append_line(&mut inner, &line)?;
            inner.records.insert(record.coordinate.clone(), record);
            Ok(())
        })
    }

    fn get(
        &self,
        coordinate: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StateRecord>, BackendError>> + Send + '_>> {
        let coordinate = coordinate.to_string();
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner.records.get(&coordinate).cloned())
        })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            if !inner.initialized {
                return Ok(());
            }
            self.compact(&inner.records)?;
            tracing::info!(records = inner.records.len(), "state journal compacted");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixel_api::ErrorKind;

    fn store_in(dir: &Path) -> FileStateStore {
        FileStateStore::new(&FileStoreConfig {
            data_dir: dir.to_string_lossy().into_owned(),
            sync_writes: false,
        })
    }

    fn record(coordinate: &str, color: &str) -> StateRecord {
        StateRecord {
            coordinate: coordinate.into(),
            color: Some(color.into()),
            updated_by: Some("u1".into()),
            timestamp: Some(1000),
            last_updated: 1,
        }
    }

    fn journal_lines(store: &FileStateStore) -> usize {
        std::fs::read_to_string(store.journal_path()).unwrap().lines().count()
    }

    #[tokio::test]
    async fn upsert_before_init_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let err = store.upsert(record("1:1", "#000000")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store.init().await.unwrap();
            store.upsert(record("3:4", "#000000")).await.unwrap();
            store.upsert(record("3:4", "#FF0000")).await.unwrap();
            store.upsert(record("5:6", "#00FF00")).await.unwrap();
            assert_eq!(journal_lines(&store), 3);
        }

        let store = store_in(dir.path());
        store.init().await.unwrap();
        assert_eq!(store.len().await, 2);
        assert_eq!(store.get("3:4").await.unwrap(), Some(record("3:4", "#FF0000")));
    }

    #[tokio::test]
    async fn flush_compacts_journal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.init().await.unwrap();
        for _ in 0..4 {
            store.upsert(record("0:0", "#123456")).await.unwrap();
        }
        assert_eq!(journal_lines(&store), 4);

        store.flush().await.unwrap();
        assert_eq!(journal_lines(&store), 1);
        assert_eq!(store.get("0:0").await.unwrap(), Some(record("0:0", "#123456")));
    }

    #[tokio::test]
    async fn malformed_journal_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = serde_json::to_string(&record("7:7", "#777777")).unwrap();
        std::fs::write(dir.path().join(JOURNAL_FILE), format!("{good}\n{{broken\n\n")).unwrap();

        let store = store_in(dir.path());
        store.init().await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(store.get("7:7").await.unwrap().is_some());
        // журнал переписан без битой строки
        assert_eq!(journal_lines(&store), 1);
    }

    #[tokio::test]
    async fn upsert_after_torn_tail_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store.init().await.unwrap();
            store.upsert(record("1:1", "#111111")).await.unwrap();
        }

        // запись оборвалась посреди строки
        let path = dir.path().join(JOURNAL_FILE);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str(r#"{"coordinate":"2:2","col"#);
        std::fs::write(&path, content).unwrap();

        {
            let store = store_in(dir.path());
            store.init().await.unwrap();
            store.upsert(record("5:6", "#00FF00")).await.unwrap();
        }

        let store = store_in(dir.path());
        store.init().await.unwrap();
        assert_eq!(store.get("5:6").await.unwrap(), Some(record("5:6", "#00FF00")));
        assert_eq!(store.get("1:1").await.unwrap(), Some(record("1:1", "#111111")));
        assert!(store.get("2:2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_after_failed_append_starts_on_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.init().await.unwrap();

        // обрывок от неудачной записи: append_line пометил хвост как torn
        std::fs::write(store.journal_path(), r#"{"coordinate":"9:9""#).unwrap();
        store.inner.lock().await.torn_tail = true;

        store.upsert(record("5:6", "#00FF00")).await.unwrap();
        assert!(!store.inner.lock().await.torn_tail);

        let reopened = store_in(dir.path());
        reopened.init().await.unwrap();
        assert_eq!(reopened.get("5:6").await.unwrap(), Some(record("5:6", "#00FF00")));
    }
}
