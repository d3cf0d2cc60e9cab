//! Type-erased database access for the server.
//!
//! The server routes raw fixed-size record bytes and never names key or
//! value types. [`ServerDatabase`] is the object-safe face of a
//! [`Database`] that decodes and encodes those bytes.

use bytes::BytesMut;
use uuid::Uuid;

use crate::common::{Error, Result};
use crate::engine::{Database, TreeStream};
use crate::net::protocol::DatabaseInfo;
use crate::types::{supported_encodings, EncodingDefinition, KeyComparer, TreeType};

/// A database the server can serve.
pub trait ServerDatabase: Send + Sync {
    fn name(&self) -> &str;

    fn key_type(&self) -> Uuid;

    fn value_type(&self) -> Uuid;

    /// Serialized key size.
    fn key_size(&self) -> usize;

    /// Serialized value size.
    fn value_size(&self) -> usize;

    fn encodings(&self) -> Vec<EncodingDefinition>;

    /// Insert `count` records packed back to back. Returns how many were new.
    fn write_raw(&self, count: u32, records: &[u8]) -> Result<u32>;

    fn hard_commit(&self) -> Result<()>;

    /// Start a range read between two encoded keys.
    fn read_raw(&self, start: &[u8], stop: &[u8]) -> Result<Box<dyn RawReader>>;

    fn close(&self);

    /// Description sent to clients.
    fn info(&self) -> DatabaseInfo {
        DatabaseInfo {
            name: self.name().to_string(),
            key_type: self.key_type(),
            value_type: self.value_type(),
            encodings: self.encodings(),
        }
    }
}

/// An open range read producing encoded records.
pub trait RawReader: Send {
    /// Append up to `max` records to `out`. Returns how many were appended;
    /// 0 means the read is finished.
    fn next_batch(&mut self, max: usize, out: &mut BytesMut) -> Result<usize>;
}

fn decode_key<K: TreeType>(bytes: &[u8]) -> Result<K> {
    if bytes.len() != K::SIZE {
        return Err(Error::protocol(format!(
            "key is {} bytes, expected {}",
            bytes.len(),
            K::SIZE
        )));
    }
    Ok(K::from_bytes(bytes))
}

impl<K, V, C> ServerDatabase for Database<K, V, C>
where
    K: TreeType,
    V: TreeType,
    C: KeyComparer<K>,
{
    fn name(&self) -> &str {
        Database::name(self)
    }

    fn key_type(&self) -> Uuid {
        K::TYPE_ID
    }

    fn value_type(&self) -> Uuid {
        V::TYPE_ID
    }

    fn key_size(&self) -> usize {
        K::SIZE
    }

    fn value_size(&self) -> usize {
        V::SIZE
    }

    fn encodings(&self) -> Vec<EncodingDefinition> {
        supported_encodings::<K, V>()
    }

    fn write_raw(&self, count: u32, records: &[u8]) -> Result<u32> {
        let record_size = K::SIZE + V::SIZE;
        if records.len() != count as usize * record_size {
            return Err(Error::protocol(format!(
                "{} bytes do not hold {} records of {} bytes",
                records.len(),
                count,
                record_size
            )));
        }
        self.write_batch(records.chunks_exact(record_size).map(|record| {
            let (key, value) = record.split_at(K::SIZE);
            (K::from_bytes(key), V::from_bytes(value))
        }))
    }

    fn hard_commit(&self) -> Result<()> {
        Database::hard_commit(self)
    }

    fn read_raw(&self, start: &[u8], stop: &[u8]) -> Result<Box<dyn RawReader>> {
        let start = decode_key::<K>(start)?;
        let stop = decode_key::<K>(stop)?;
        Ok(Box::new(self.read(&start, &stop)?))
    }

    fn close(&self) {
        Database::close(self)
    }
}

impl<K, V, C> RawReader for TreeStream<K, V, C>
where
    K: TreeType,
    V: TreeType,
    C: KeyComparer<K>,
{
    fn next_batch(&mut self, max: usize, out: &mut BytesMut) -> Result<usize> {
        let record_size = K::SIZE + V::SIZE;
        let mut count = 0;
        while count < max {
            let Some(record) = self.next() else {
                break;
            };
            let (key, value) = record?;
            let at = out.len();
            out.resize(at + record_size, 0);
            key.write_bytes(&mut out[at..at + K::SIZE]);
            value.write_bytes(&mut out[at + K::SIZE..at + record_size]);
            count += 1;
        }
        Ok(count)
    }
}
