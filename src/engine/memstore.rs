use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use async_trait::async_trait;
use serde_json::{Map, Value};
use crate::{now_millis, Result, Error, EntityReader, EntityWriter, TableEnumeration, EntityStore};
use crate::engine::persistence::{Persistence, StoreData};
use crate::engine::Table;
use crate::model::Entity;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// In-memory entity tables, mirrored to [`Persistence`] after every mutation.
///
/// Tables are plain arrays: lookups scan, there is no index and no
/// transaction spanning more than one call.
pub struct MemStore {
    data: RwLock<StoreData>,
    persistence: Option<Arc<Persistence>>,
    pending_tasks: Arc<AtomicUsize>,
    generation: AtomicU64,
}

impl MemStore {
    pub fn new(initial_data: StoreData, persistence: Option<Arc<Persistence>>) -> Self {
        Self {
            data: RwLock::new(initial_data),
            persistence,
            pending_tasks: Arc::new(AtomicUsize::new(0)),
            generation: AtomicU64::new(0),
        }
    }

    /// Opens a store backed by `data_dir`, loading whatever tables are there.
    pub fn open(data_dir: &str) -> Result<Self> {
        let persistence = Arc::new(Persistence::new(data_dir)?);
        let initial_data = persistence.load_all()?;
        Ok(Self::new(initial_data, Some(persistence)))
    }

    /// Typed table scope over this store.
    pub fn table<T: Entity>(&self) -> Table<'_, T> {
        Table::new(self)
    }

    /// Waits until all background writes have reached disk.
    pub async fn wait(&self) {
        while self.pending_tasks.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreData>> {
        self.data.read().map_err(|_| Error::Internal("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreData>> {
        self.data.write().map_err(|_| Error::Internal("store lock poisoned".to_string()))
    }

    // Must be called while holding the write lock so generations follow mutation order.
    fn snapshot(&self, data: &StoreData, table: &str) -> (u64, Vec<Value>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        (generation, data.get(table).cloned().unwrap_or_default())
    }

    fn persist(&self, table: String, generation: u64, records: Vec<Value>) {
        if let Some(p) = &self.persistence {
            let p = p.clone();
            let pending = self.pending_tasks.clone();
            pending.fetch_add(1, Ordering::SeqCst);
            tokio::task::spawn_blocking(move || {
                if let Err(e) = p.save_table(&table, generation, &records) {
                    log::error!("Failed to persist table {}: {}", table, e);
                }
                pending.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }
}

/// Produces a fresh record id: creation millis in hex plus random bits.
pub fn new_id() -> String {
    format!("{:x}{:06x}", now_millis(), rand::random::<u32>() & 0x00ff_ffff)
}

fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

fn matches(record: &Value, query: &Map<String, Value>) -> bool {
    query.iter().all(|(field, expected)| record.get(field) == Some(expected))
}

fn not_found(table: &str, id: &str) -> Error {
    Error::RecordNotFound { table: table.to_string(), id: id.to_string() }
}

#[async_trait]
impl EntityReader for MemStore {
    async fn get(&self, table: &str, id: &str) -> Result<Value> {
        let data = self.read()?;
        data.get(table)
            .and_then(|records| records.iter().find(|r| record_id(r) == Some(id)))
            .cloned()
            .ok_or_else(|| not_found(table, id))
    }

    async fn list(&self, table: &str) -> Result<Vec<Value>> {
        let data = self.read()?;
        Ok(data.get(table).cloned().unwrap_or_default())
    }

    async fn filter(&self, table: &str, query: &Map<String, Value>) -> Result<Vec<Value>> {
        let data = self.read()?;
        Ok(data.get(table)
            .map(|records| records.iter().filter(|r| matches(r, query)).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl EntityWriter for MemStore {
    async fn create(&self, table: &str, record: Value) -> Result<Value> {
        let Value::Object(mut fields) = record else {
            return Err(Error::InvalidRequest("record must be a JSON object".to_string()));
        };
        let now = now_millis();
        let id = match fields.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => new_id(),
        };
        fields.insert("id".to_string(), Value::String(id.clone()));
        if fields.get("created_date").and_then(Value::as_u64).unwrap_or(0) == 0 {
            fields.insert("created_date".to_string(), now.into());
        }
        fields.insert("updated_date".to_string(), now.into());
        let record = Value::Object(fields);

        let (generation, snapshot) = {
            let mut data = self.write()?;
            let records = data.entry(table.to_string()).or_default();
            if records.iter().any(|r| record_id(r) == Some(id.as_str())) {
                return Err(Error::DuplicateEntry(format!("{} {}", table, id)));
            }
            records.push(record.clone());
            self.snapshot(&data, table)
        };
        self.persist(table.to_string(), generation, snapshot);
        Ok(record)
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value> {
        let Value::Object(patch) = patch else {
            return Err(Error::InvalidRequest("patch must be a JSON object".to_string()));
        };
        let (updated, generation, snapshot) = {
            let mut data = self.write()?;
            let record = data.get_mut(table)
                .and_then(|records| records.iter_mut().find(|r| record_id(r) == Some(id)))
                .ok_or_else(|| not_found(table, id))?;
            if let Value::Object(fields) = record {
                for (key, value) in patch {
                    if key != "id" && key != "created_date" {
                        fields.insert(key, value);
                    }
                }
                fields.insert("updated_date".to_string(), now_millis().into());
            }
            let updated = record.clone();
            let (generation, snapshot) = self.snapshot(&data, table);
            (updated, generation, snapshot)
        };
        self.persist(table.to_string(), generation, snapshot);
        Ok(updated)
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let (generation, snapshot) = {
            let mut data = self.write()?;
            let records = data.get_mut(table).ok_or_else(|| not_found(table, id))?;
            let before = records.len();
            records.retain(|r| record_id(r) != Some(id));
            if records.len() == before {
                return Err(not_found(table, id));
            }
            self.snapshot(&data, table)
        };
        self.persist(table.to_string(), generation, snapshot);
        Ok(())
    }

    async fn replace_all(&self, table: &str, records: Vec<Value>) -> Result<()> {
        let (generation, snapshot) = {
            let mut data = self.write()?;
            data.insert(table.to_string(), records);
            self.snapshot(&data, table)
        };
        self.persist(table.to_string(), generation, snapshot);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.wait().await;
        Ok(())
    }
}

#[async_trait]
impl TableEnumeration for MemStore {
    async fn tables(&self) -> Result<Vec<String>> {
        let data = self.read()?;
        let mut names: Vec<String> = data.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

impl EntityStore for MemStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_assigns_id_and_dates() {
        let store = MemStore::new(HashMap::new(), None);
        let created = store.create("users", json!({"email": "a@b.c"})).await.unwrap();

        let id = created["id"].as_str().unwrap();
        assert!(!id.is_empty());
        assert!(created["created_date"].as_u64().unwrap() > 0);
        assert_eq!(store.get("users", id).await.unwrap()["email"], json!("a@b.c"));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let store = MemStore::new(HashMap::new(), None);
        store.create("users", json!({"id": "u1"})).await.unwrap();
        let res = store.create("users", json!({"id": "u1"})).await;
        assert!(matches!(res, Err(Error::DuplicateEntry(_))));
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemStore::new(HashMap::new(), None);
        store.create("users", json!({"id": "u1", "points": 10, "score": 3})).await.unwrap();

        let updated = store.update("users", "u1", json!({"points": 25, "id": "hijack"})).await.unwrap();
        assert_eq!(updated["id"], json!("u1"));
        assert_eq!(updated["points"], json!(25));
        assert_eq!(updated["score"], json!(3));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemStore::new(HashMap::new(), None);
        store.create("bets", json!({"id": "b1"})).await.unwrap();
        store.delete("bets", "b1").await.unwrap();

        let res = store.get("bets", "b1").await;
        assert!(matches!(res, Err(Error::RecordNotFound { .. })));
        assert!(matches!(store.delete("bets", "b1").await, Err(Error::RecordNotFound { .. })));
    }

    #[tokio::test]
    async fn test_filter_by_fields() {
        let store = MemStore::new(HashMap::new(), None);
        store.create("bets", json!({"round_id": "r1", "user_id": "u1"})).await.unwrap();
        store.create("bets", json!({"round_id": "r1", "user_id": "u2"})).await.unwrap();
        store.create("bets", json!({"round_id": "r2", "user_id": "u1"})).await.unwrap();

        let mut query = Map::new();
        query.insert("round_id".to_string(), json!("r1"));
        assert_eq!(store.filter("bets", &query).await.unwrap().len(), 2);

        query.insert("user_id".to_string(), json!("u2"));
        assert_eq!(store.filter("bets", &query).await.unwrap().len(), 1);
        assert!(store.filter("missing", &query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mutations_are_mirrored_to_disk() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        {
            let store = MemStore::open(data_dir).unwrap();
            store.create("users", json!({"id": "u1", "points": 1})).await.unwrap();
            store.update("users", "u1", json!({"points": 2})).await.unwrap();
            store.create("rounds", json!({"id": "r1"})).await.unwrap();
            store.wait().await;
        }

        let reopened = MemStore::open(data_dir).unwrap();
        assert_eq!(reopened.get("users", "u1").await.unwrap()["points"], json!(2));
        assert_eq!(reopened.tables().await.unwrap(), vec!["rounds".to_string(), "users".to_string()]);
    }
}
