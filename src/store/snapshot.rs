use super::StoreError;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// One dataset kept as a JSON file. Used as the read fallback when the
/// database is unreachable and as the primary store in offline mode.
#[derive(Debug)]
pub struct SnapshotStore<T> {
    dataset: &'static str,
    path: PathBuf,
    lock: Arc<Mutex<()>>,
    _records: PhantomData<fn() -> T>,
}

impl<T> Clone for SnapshotStore<T> {
    fn clone(&self) -> Self {
        Self {
            dataset: self.dataset,
            path: self.path.clone(),
            lock: self.lock.clone(),
            _records: PhantomData,
        }
    }
}

/// Exclusive access to one dataset file until dropped.
pub struct SnapshotGuard<'a, T> {
    store: &'a SnapshotStore<T>,
    _guard: MutexGuard<'a, ()>,
}

impl<T> SnapshotGuard<'_, T>
where
    T: Serialize + DeserializeOwned,
{
    pub async fn read(&self) -> Result<Vec<T>, StoreError> {
        self.store.read_unlocked().await
    }

    pub async fn write(&self, rows: &[T]) -> Result<(), StoreError> {
        self.store.write_unlocked(rows).await
    }
}

/// Decode a snapshot body: a bare array or an object with a `data` array.
/// Blank files hold no records.
pub fn decode_records<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, String> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_slice(bytes).map_err(|err| err.to_string())?;
    let records = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => return Err("expected an array or an object with `data`".into()),
        },
        _ => return Err("expected an array or an object with `data`".into()),
    };
    records
        .into_iter()
        .enumerate()
        .map(|(idx, record)| {
            serde_json::from_value(record).map_err(|err| format!("record {idx}: {err}"))
        })
        .collect()
}

impl<T> SnapshotStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(dir: &Path, dataset: &'static str) -> Self {
        Self {
            dataset,
            path: dir.join(format!("{dataset}.json")),
            lock: Arc::new(Mutex::new(())),
            _records: PhantomData,
        }
    }

    pub fn dataset(&self) -> &'static str {
        self.dataset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Vec<T>, StoreError> {
        self.lock().await.read().await
    }

    /// Take the store lock for a read-modify-write spanning several calls.
    pub async fn lock(&self) -> SnapshotGuard<'_, T> {
        SnapshotGuard {
            store: self,
            _guard: self.lock.lock().await,
        }
    }

    /// Load, change and write back the dataset under the store lock.
    /// Nothing is written when `apply` fails.
    pub async fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut Vec<T>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let guard = self.lock().await;
        let mut rows = guard.read().await?;
        let result = apply(&mut rows)?;
        guard.write(&rows).await?;
        Ok(result)
    }

    async fn read_unlocked(&self) -> Result<Vec<T>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(target = "ops.store", dataset = self.dataset, "snapshot missing; empty dataset");
                return Ok(Vec::new());
            }
            Err(err) => return Err(self.error("read", err)),
        };
        decode_records(&bytes).map_err(|err| self.error("parse", err))
    }

    async fn write_unlocked(&self, rows: &[T]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| self.error("create_dir", err))?;
        }
        let json = serde_json::to_vec_pretty(rows).map_err(|err| self.error("encode", err))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|err| self.error("write", err))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| self.error("rename", err))?;
        Ok(())
    }

    fn error(&self, op: &str, err: impl std::fmt::Display) -> StoreError {
        StoreError::Snapshot(format!("{} {op}: {err}", self.dataset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: i64,
        name: String,
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::<Row>::new(dir.path(), "rows");
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn accepts_wrapped_payloads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("rows.json"),
            r#"{"success": true, "data": [{"id": 1, "name": "a"}]}"#,
        )
        .unwrap();
        let store = SnapshotStore::<Row>::new(dir.path(), "rows");
        let rows = store.load().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "a");
    }

    #[tokio::test]
    async fn mutate_persists_and_failed_mutation_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::<Row>::new(dir.path(), "rows");
        store
            .mutate(|rows| {
                rows.push(Row {
                    id: 1,
                    name: "first".into(),
                });
                Ok(())
            })
            .await
            .unwrap();

        let err = store
            .mutate(|rows| -> Result<(), StoreError> {
                rows.clear();
                Err(StoreError::invalid("nope"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        let reloaded = SnapshotStore::<Row>::new(dir.path(), "rows");
        assert_eq!(reloaded.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rows.json"), "{not json").unwrap();
        let store = SnapshotStore::<Row>::new(dir.path(), "rows");
        assert!(matches!(store.load().await, Err(StoreError::Snapshot(_))));
    }

    #[test]
    fn wrong_record_shape_names_the_record() {
        let err = decode_records::<Row>(br#"[{"id": 1, "name": "a"}, {"foo": 1}]"#).unwrap_err();
        assert!(err.starts_with("record 1:"), "{err}");
        assert!(decode_records::<Row>(br#"{"rows": []}"#).is_err());
        assert!(decode_records::<Row>(b"  \n").unwrap().is_empty());
    }
}
