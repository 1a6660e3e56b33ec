use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use crate::{Result, Error};
use log::{debug, warn};

/// The in-memory shape of the store: table name to ordered records.
pub type StoreData = HashMap<String, Vec<serde_json::Value>>;

/// Handles disk I/O for the [`MemStore`](crate::engine::MemStore).
///
/// Each table is stored as one flat JSON array in `<data_dir>/<table>.json`,
/// written with an atomic "write-then-rename".
pub struct Persistence {
    data_dir: PathBuf,
    // Highest generation written per table; older snapshots are dropped.
    written: Mutex<HashMap<String, u64>>,
}

impl Persistence {
    /// Initializes a new `Persistence` handler in the specified directory.
    ///
    /// If the directory does not exist, it will be created.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self {
            data_dir: dir,
            written: Mutex::new(HashMap::new()),
        })
    }

    /// Writes a table snapshot atomically.
    ///
    /// `generation` orders snapshots taken by the store. A snapshot older than
    /// one already on disk is skipped, so out-of-order background writes never
    /// roll a table back.
    pub fn save_table(&self, table: &str, generation: u64, records: &[serde_json::Value]) -> Result<()> {
        validate_table_name(table)?;
        let mut written = self.written.lock().map_err(|_| Error::Internal("persistence lock poisoned".to_string()))?;
        if written.get(table).is_some_and(|last| *last > generation) {
            debug!("Skipping stale snapshot of {} (generation {})", table, generation);
            return Ok(());
        }

        let file_path = self.data_dir.join(format!("{}.json", table));
        let temp_path = file_path.with_extension("json.tmp");

        let bytes = serde_json::to_vec_pretty(records)?;

        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, &file_path)?;

        written.insert(table.to_string(), generation);
        Ok(())
    }

    /// Loads every table found in the data directory.
    ///
    /// Files that cannot be read or parsed are skipped with a warning.
    pub fn load_all(&self) -> Result<StoreData> {
        let mut all_data = HashMap::new();

        if !self.data_dir.exists() {
            return Ok(all_data);
        }

        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                let table = path.file_stem()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| Error::Internal("Invalid filename".to_string()))?
                    .to_string();

                let content = match fs::read(&path) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Could not read table file {:?}: {}", path, e);
                        continue;
                    }
                };

                let records: Vec<serde_json::Value> = match serde_json::from_slice(&content) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Could not parse table {:?}, starting it empty: {}", path, e);
                        continue;
                    }
                };

                all_data.insert(table, records);
            }
        }

        Ok(all_data)
    }
}

fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!("invalid table name '{}'", table)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use serde_json::json;

    #[test]
    fn test_save_and_load_all() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path()).unwrap();

        persistence.save_table("users", 1, &[json!({"id": "u1", "points": 1000})]).unwrap();

        let loaded = persistence.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["users"][0]["points"], json!(1000));
    }

    #[test]
    fn test_atomic_rename() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path()).unwrap();

        persistence.save_table("bets", 1, &[json!({"id": "b1"})]).unwrap();

        assert!(dir.path().join("bets.json").exists());
        assert!(!dir.path().join("bets.json.tmp").exists());
    }

    #[test]
    fn test_stale_generation_is_skipped() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path()).unwrap();

        persistence.save_table("users", 5, &[json!({"id": "new"})]).unwrap();
        persistence.save_table("users", 3, &[json!({"id": "old"})]).unwrap();

        let loaded = persistence.load_all().unwrap();
        assert_eq!(loaded["users"][0]["id"], json!("new"));
    }

    #[test]
    fn test_corrupt_file_is_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("users.json"), "{not json").unwrap();
        fs::write(dir.path().join("rounds.json"), r#"[{"id": "r1", "symbol": "BTC"}]"#).unwrap();

        let persistence = Persistence::new(dir.path()).unwrap();
        let loaded = persistence.load_all().unwrap();

        assert!(!loaded.contains_key("users"));
        assert_eq!(loaded["rounds"][0]["symbol"], json!("BTC"));
    }

    #[test]
    fn test_rejects_path_like_table_names() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path()).unwrap();
        assert!(matches!(
            persistence.save_table("../escape", 1, &[]),
            Err(Error::InvalidRequest(_))
        ));
    }
}
