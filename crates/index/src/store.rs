use std::collections::HashMap;
use std::sync::RwLock;

use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use listing::ListingRecord;
use serde::{Deserialize, Serialize};
use zstd::{decode_all, encode_all};

use crate::IndexError;

/// Bump this value whenever the on-disk [`StoredListing`] layout changes.
pub const STORE_SCHEMA_VERSION: u16 = 1;

/// Key-value storage for encoded listing records, keyed by canonical id.
pub trait ListingStore: Send + Sync {
    /// Insert or update a key-value pair.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError>;
    /// Retrieve a value by key.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError>;
    /// Delete a key-value pair.
    fn delete(&self, key: &str) -> Result<(), IndexError>;
    /// Insert or update multiple key-value pairs in one transaction.
    fn batch_put(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IndexError>;
    /// Visit every stored value.
    fn scan(
        &self,
        visitor: &mut dyn FnMut(&[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError>;
    /// Flush any buffered writes.
    fn flush(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Storage selection for the listing store.
///
/// ```
/// use index::StoreConfig;
///
/// let memory = StoreConfig::in_memory();
/// let disk = StoreConfig::redb("/var/lib/carfinder/listings.redb");
/// # let _ = (memory, disk);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// A redb database file at `path`.
    Redb { path: String },
    /// Process-local map; contents are lost on exit.
    #[default]
    InMemory,
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        StoreConfig::InMemory
    }

    pub fn redb<P: Into<String>>(path: P) -> Self {
        StoreConfig::Redb { path: path.into() }
    }

    /// Open the configured store.
    pub fn open(&self) -> Result<Box<dyn ListingStore>, IndexError> {
        match self {
            StoreConfig::InMemory => Ok(Box::new(InMemoryStore::new())),
            StoreConfig::Redb { path } => {
                #[cfg(feature = "backend-redb")]
                {
                    Ok(Box::new(RedbStore::open(path)?))
                }
                #[cfg(not(feature = "backend-redb"))]
                {
                    let _ = path;
                    Err(IndexError::backend("redb store disabled at compile time"))
                }
            }
        }
    }
}

/// An in-memory store using a `RwLock` around a `HashMap`.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ListingStore for InMemoryStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
        self.records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        let guard = self
            .records
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        Ok(guard.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), IndexError> {
        self.records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?
            .remove(key);
        Ok(())
    }

    fn batch_put(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IndexError> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        guard.extend(entries);
        Ok(())
    }

    fn scan(
        &self,
        visitor: &mut dyn FnMut(&[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let guard = self
            .records
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        for value in guard.values() {
            visitor(value)?;
        }
        Ok(())
    }
}

#[cfg(feature = "backend-redb")]
pub mod redb;

#[cfg(feature = "backend-redb")]
pub use self::redb::RedbStore;

/// Compression codec options for stored records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCodec {
    None,
    /// Zstd compression (default).
    #[default]
    Zstd,
}

/// Compression behavior configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub codec: CompressionCodec,
    /// Zstd level, 1-22.
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: CompressionCodec::default(),
            level: 3,
        }
    }
}

impl CompressionConfig {
    pub fn new(codec: CompressionCodec, level: i32) -> Self {
        Self { codec, level }
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, IndexError> {
        match self.codec {
            CompressionCodec::None => Ok(data.to_vec()),
            CompressionCodec::Zstd => Ok(encode_all(data, self.level)?),
        }
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, IndexError> {
        match self.codec {
            CompressionCodec::None => Ok(data.to_vec()),
            CompressionCodec::Zstd => Ok(decode_all(data)?),
        }
    }
}

/// Versioned envelope written to the store.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredListing {
    pub schema_version: u16,
    pub record: ListingRecord,
}

/// Encodes a record with bincode, then compresses it.
pub(crate) fn encode_record(
    compression: &CompressionConfig,
    record: &ListingRecord,
) -> Result<Vec<u8>, IndexError> {
    let envelope = StoredListing {
        schema_version: STORE_SCHEMA_VERSION,
        record: record.clone(),
    };
    let encoded = encode_to_vec(&envelope, standard())?;
    compression.compress(&encoded)
}

/// Decompresses and decodes a stored record.
pub(crate) fn decode_record(
    compression: &CompressionConfig,
    data: &[u8],
) -> Result<ListingRecord, IndexError> {
    let decompressed = compression.decompress(data)?;
    let (envelope, _): (StoredListing, usize) = decode_from_slice(&decompressed, standard())?;
    if envelope.schema_version != STORE_SCHEMA_VERSION {
        return Err(IndexError::Decode(format!(
            "unsupported store schema version {}",
            envelope.schema_version
        )));
    }
    Ok(envelope.record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use listing::{EmbeddingVector, Price, SourceId};

    fn sample() -> ListingRecord {
        ListingRecord::builder(SourceId::autotrader(), "https://autotrader.com/v/1", "2019 Civic")
            .with_price(Some(Price::from_dollars(18_000)))
            .with_embedding(EmbeddingVector::new(vec![0.25, -0.5, 1.0]).unwrap())
            .with_location("Denver, CO")
            .build()
            .unwrap()
    }

    #[test]
    fn codec_roundtrip_with_and_without_zstd() {
        let record = sample();
        for compression in [
            CompressionConfig::default(),
            CompressionConfig::new(CompressionCodec::None, 0),
        ] {
            let bytes = encode_record(&compression, &record).unwrap();
            let back = decode_record(&compression, &bytes).unwrap();
            assert_eq!(back, record);
        }
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = decode_record(&CompressionConfig::default(), b"not a record").unwrap_err();
        assert!(matches!(err, IndexError::Compression(_) | IndexError::Decode(_)));
    }

    #[test]
    fn in_memory_store_roundtrip() {
        let store = InMemoryStore::new();
        store.put("a", b"1").unwrap();
        store
            .batch_put(vec![("b".into(), b"2".to_vec()), ("c".into(), b"3".to_vec())])
            .unwrap();
        assert_eq!(store.get("b").unwrap(), Some(b"2".to_vec()));
        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);

        let mut count = 0;
        store
            .scan(&mut |_| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn store_config_deserializes_tagged() {
        let cfg: StoreConfig =
            serde_json::from_str(r#"{"backend":"redb","path":"/tmp/x.redb"}"#).unwrap();
        assert_eq!(cfg, StoreConfig::redb("/tmp/x.redb"));
        let cfg: StoreConfig = serde_json::from_str(r#"{"backend":"in_memory"}"#).unwrap();
        assert_eq!(cfg, StoreConfig::InMemory);
    }
}
