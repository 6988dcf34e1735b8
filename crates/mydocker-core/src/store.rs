//! Durable per-container records.
//!
//! One `<id>.json` file per container in the data directory. The store does
//! not synchronize with the in-memory registry; the daemon is the single
//! writer.

use std::fs;
use std::io;
use std::path::PathBuf;

use mydocker_container::ContainerRecord;
use mydocker_error::{Error, Result};

/// On-disk container state store.
pub struct ContainerStore {
    data_dir: PathBuf,
}

impl ContainerStore {
    /// Creates a store rooted at `data_dir`, creating the directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .map_err(|e| Error::internal(format!("failed to create data directory: {e}")))?;
        Ok(Self { data_dir })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.data_dir.join(format!("{id}.json"))
    }

    /// Saves a container record.
    ///
    /// Writes to a temporary file and renames it into place so readers
    /// never observe a torn record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub fn save(&self, record: &ContainerRecord) -> Result<()> {
        let path = self.record_path(record.id.as_str());
        let data = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::internal(format!("failed to encode container state: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data)
            .map_err(|e| Error::internal(format!("failed to write container state: {e}")))?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::internal(format!("failed to commit container state: {e}")))?;
        Ok(())
    }

    /// Loads one container record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no record exists for `id`, or an
    /// internal error if the file cannot be decoded.
    pub fn load(&self, id: &str) -> Result<ContainerRecord> {
        let path = self.record_path(id);
        let data = fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::not_found(format!("container state not found: {id}"))
            } else {
                Error::internal(format!("failed to read container state: {e}"))
            }
        })?;

        serde_json::from_slice(&data)
            .map_err(|e| Error::internal(format!("failed to decode container state: {e}")))
    }

    /// Lists all container records on disk.
    ///
    /// Sub-directories and foreign extensions are ignored; corrupt files
    /// are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be read.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let entries = fs::read_dir(&self.data_dir)
            .map_err(|e| Error::internal(format!("failed to read data directory: {e}")))?;

        let mut records = Vec::new();
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            if path.is_dir() || path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(id) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("skipping unreadable container state {id}: {e}");
                }
            }
        }
        Ok(records)
    }

    /// Deletes a container record. Not-found is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn delete(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::internal(format!(
                "failed to delete container state: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mydocker_cgroups::ResourceLimits;
    use mydocker_container::{ContainerId, ContainerStatus};
    use tempfile::TempDir;

    fn record(id: &str) -> ContainerRecord {
        ContainerRecord::new(
            ContainerId::from_string(id),
            vec!["/bin/sleep".to_string(), "10".to_string()],
            PathBuf::from("/tmp/rootfs"),
            ResourceLimits::default(),
        )
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ContainerStore::new(dir.path()).unwrap();

        let mut rec = record("ab12cd34ef56");
        rec.pid = 1234;
        rec.status = ContainerStatus::Running;
        store.save(&rec).unwrap();

        let loaded = store.load("ab12cd34ef56").unwrap();
        assert_eq!(loaded.id, rec.id);
        assert_eq!(loaded.pid, 1234);
        assert_eq!(loaded.status, ContainerStatus::Running);
        assert_eq!(loaded.command, rec.command);
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = ContainerStore::new(dir.path()).unwrap();
        assert!(store.load("000000000000").unwrap_err().is_not_found());
    }

    #[test]
    fn save_overwrites_atomically() {
        let dir = TempDir::new().unwrap();
        let store = ContainerStore::new(dir.path()).unwrap();

        let mut rec = record("ab12cd34ef56");
        store.save(&rec).unwrap();
        rec.status = ContainerStatus::Exited;
        store.save(&rec).unwrap();

        assert_eq!(
            store.load("ab12cd34ef56").unwrap().status,
            ContainerStatus::Exited
        );
        // No temporary file is left behind.
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["ab12cd34ef56.json".to_string()]);
    }

    #[test]
    fn list_skips_foreign_and_corrupt_entries() {
        let dir = TempDir::new().unwrap();
        let store = ContainerStore::new(dir.path()).unwrap();

        store.save(&record("aaaaaaaaaaaa")).unwrap();
        store.save(&record("bbbbbbbbbbbb")).unwrap();
        fs::write(dir.path().join("corrupt.json"), "{not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        fs::create_dir(dir.path().join("subdir.json")).unwrap();

        let mut ids: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["aaaaaaaaaaaa", "bbbbbbbbbbbb"]);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ContainerStore::new(dir.path()).unwrap();

        store.save(&record("aaaaaaaaaaaa")).unwrap();
        store.delete("aaaaaaaaaaaa").unwrap();
        assert!(store.load("aaaaaaaaaaaa").unwrap_err().is_not_found());
        store.delete("aaaaaaaaaaaa").unwrap();
    }
}
