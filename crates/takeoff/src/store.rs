use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::{
    error::{Result, TakeoffError},
    record::ResultRecord,
};

/// Upload ids become file names, so only a conservative character set is allowed
pub fn validate_upload_id(upload_id: &str) -> Result<()> {
    let valid = !upload_id.is_empty()
        && upload_id.len() <= 128
        && !upload_id.starts_with('.')
        && upload_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(TakeoffError::InvalidUploadId(upload_id.to_string()))
    }
}

/// Keyed storage for result records. A record is always replaced whole.
pub trait RecordStore: Send + Sync {
    fn load(&self, upload_id: &str) -> Result<Option<ResultRecord>>;

    fn save(&self, record: &ResultRecord) -> Result<()>;

    /// Overwrite the record with the empty structure
    fn reset(&self, upload_id: &str) -> Result<ResultRecord> {
        let record = ResultRecord::empty(upload_id);
        self.save(&record)?;
        Ok(record)
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, ResultRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ResultRecord>>> {
        self.records
            .lock()
            .map_err(|_| TakeoffError::StoreUnavailable("record map lock poisoned".into()))
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self, upload_id: &str) -> Result<Option<ResultRecord>> {
        Ok(self.records()?.get(upload_id).cloned())
    }

    fn save(&self, record: &ResultRecord) -> Result<()> {
        self.records()?.insert(record.upload_id.clone(), record.clone());
        Ok(())
    }
}

/// One pretty-printed JSON file per upload: `<dir>/<upload_id>.json`
#[derive(Debug, Clone)]
pub struct JsonFileRecordStore {
    dir: PathBuf,
}

impl JsonFileRecordStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn path_for(&self, upload_id: &str) -> Result<PathBuf> {
        validate_upload_id(upload_id)?;
        Ok(self.dir.join(format!("{upload_id}.json")))
    }
}

impl RecordStore for JsonFileRecordStore {
    fn load(&self, upload_id: &str) -> Result<Option<ResultRecord>> {
        let path = self.path_for(upload_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, record: &ResultRecord) -> Result<()> {
        let path = self.path_for(&record.upload_id)?;
        // Write beside the target and rename so readers never see a torn record
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_string_pretty(record)?)?;
        fs::rename(&staging, &path)?;
        tracing::debug!(upload_id = %record.upload_id, path = %path.display(), "saved result record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CategoryCount, RecordStatus};
    use tempfile::TempDir;

    #[test]
    fn test_upload_id_rules() {
        assert!(validate_upload_id("upload-42_a.v2").is_ok());
        assert!(validate_upload_id("").is_err());
        assert!(validate_upload_id("../etc").is_err());
        assert!(validate_upload_id("a/b").is_err());
    }

    #[test]
    fn test_memory_store_overwrites() {
        let store = MemoryRecordStore::new();
        assert_eq!(store.load("u1").unwrap(), None);

        let mut record = ResultRecord::empty("u1");
        record.counts.blue_x = CategoryCount::Available(3);
        store.save(&record).unwrap();
        record.counts.blue_x = CategoryCount::Available(1);
        store.save(&record).unwrap();
        assert_eq!(store.load("u1").unwrap().unwrap().counts.blue_x, CategoryCount::Available(1));

        let reset = store.reset("u1").unwrap();
        assert_eq!(reset.status, RecordStatus::Empty);
        assert_eq!(store.load("u1").unwrap().unwrap().counts.blue_x, CategoryCount::NotAvailable);
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileRecordStore::new(dir.path()).unwrap();
        assert_eq!(store.load("u1").unwrap(), None);

        let mut record = ResultRecord::empty("u1");
        record.status = RecordStatus::Completed;
        record.counts.green_rectangles = CategoryCount::Available(2);
        store.save(&record).unwrap();

        assert!(dir.path().join("u1.json").exists());
        assert_eq!(store.load("u1").unwrap(), Some(record));
        assert!(store.save(&ResultRecord::empty("../escape")).is_err());
    }
}
