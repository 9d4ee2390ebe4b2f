//! Redb-backed listing store.
//!
//! ```yaml
//! index:
//!   store:
//!     backend: redb
//!     path: /var/lib/carfinder/listings.redb
//! ```

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::store::ListingStore;
use crate::IndexError;

const LISTINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("listings");

/// Persistent store on a single redb file. Every write is its own committed
/// transaction; `batch_put` commits once for the whole batch.
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a database at `path` and make sure the table exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let db = Database::create(path).map_err(IndexError::backend)?;

        let write_txn = db.begin_write().map_err(IndexError::backend)?;
        {
            let _table = write_txn
                .open_table(LISTINGS_TABLE)
                .map_err(IndexError::backend)?;
        }
        write_txn.commit().map_err(IndexError::backend)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl ListingStore for RedbStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
        let write_txn = self.db.begin_write().map_err(IndexError::backend)?;
        {
            let mut table = write_txn
                .open_table(LISTINGS_TABLE)
                .map_err(IndexError::backend)?;
            table.insert(key, value).map_err(IndexError::backend)?;
        }
        write_txn.commit().map_err(IndexError::backend)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        let read_txn = self.db.begin_read().map_err(IndexError::backend)?;
        let table = read_txn
            .open_table(LISTINGS_TABLE)
            .map_err(IndexError::backend)?;
        let value = table.get(key).map_err(IndexError::backend)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn delete(&self, key: &str) -> Result<(), IndexError> {
        let write_txn = self.db.begin_write().map_err(IndexError::backend)?;
        {
            let mut table = write_txn
                .open_table(LISTINGS_TABLE)
                .map_err(IndexError::backend)?;
            table.remove(key).map_err(IndexError::backend)?;
        }
        write_txn.commit().map_err(IndexError::backend)?;
        Ok(())
    }

    fn batch_put(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IndexError> {
        let write_txn = self.db.begin_write().map_err(IndexError::backend)?;
        {
            let mut table = write_txn
                .open_table(LISTINGS_TABLE)
                .map_err(IndexError::backend)?;
            for (key, value) in &entries {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(IndexError::backend)?;
            }
        }
        write_txn.commit().map_err(IndexError::backend)?;
        Ok(())
    }

    fn scan(
        &self,
        visitor: &mut dyn FnMut(&[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let read_txn = self.db.begin_read().map_err(IndexError::backend)?;
        let table = read_txn
            .open_table(LISTINGS_TABLE)
            .map_err(IndexError::backend)?;
        for item in table.iter().map_err(IndexError::backend)? {
            let (_, value) = item.map_err(IndexError::backend)?;
            visitor(value.value())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn redb_store_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let store = RedbStore::open(temp_file.path()).unwrap();

        store.put("key1", b"value1").unwrap();
        assert_eq!(store.get("key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get("missing").unwrap(), None);

        store.delete("key1").unwrap();
        assert_eq!(store.get("key1").unwrap(), None);
    }

    #[test]
    fn redb_store_batch_and_scan() {
        let temp_file = NamedTempFile::new().unwrap();
        let store = RedbStore::open(temp_file.path()).unwrap();

        store
            .batch_put(vec![
                ("key1".to_string(), b"value1".to_vec()),
                ("key2".to_string(), b"value2".to_vec()),
            ])
            .unwrap();

        let mut collected = Vec::new();
        store
            .scan(&mut |value| {
                collected.push(value.to_vec());
                Ok(())
            })
            .unwrap();
        assert_eq!(collected.len(), 2);
        assert!(collected.contains(&b"value2".to_vec()));
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listings.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            store.put("k", b"v").unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
    }
}
