//! Key and value types stored in a tree.
//!
//! The tree never looks inside a key or value. It only relies on
//! [`TreeType`] for sizing and serialization and on a [`KeyComparer`] for
//! ordering.

use std::cmp::Ordering;
use std::fmt;

use uuid::Uuid;

use crate::common::Result;
use crate::io::BinaryStream;

mod historian;
mod primitive;

pub use historian::{HistorianKey, HistorianValue};

// ============================================================================
// Serialization contract
// ============================================================================

/// Types up to this size go through the stream without a heap buffer.
const STACK_BUFFER_SIZE: usize = 64;

/// A fixed-size type that can be stored as a tree key or value.
///
/// `read_bytes`/`write_bytes` work on a slice of exactly [`TreeType::SIZE`]
/// bytes and are what the tree uses on its hot path. The stream variants are
/// built on them.
pub trait TreeType: Copy + Default + fmt::Debug + Send + Sync + 'static {
    /// Stable identity of the type, recorded in archive headers and checked
    /// when a client connects.
    const TYPE_ID: Uuid;

    /// Serialized size in bytes.
    const SIZE: usize;

    /// Set to the smallest value of the type.
    fn set_min(&mut self);

    /// Set to the largest value of the type.
    fn set_max(&mut self);

    /// Reset to the default value.
    fn clear(&mut self) {
        *self = Self::default();
    }

    /// Decode from `bytes`, which holds at least `SIZE` bytes.
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than `SIZE`.
    fn read_bytes(&mut self, bytes: &[u8]);

    /// Encode into `bytes`, which holds at least `SIZE` bytes.
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than `SIZE`.
    fn write_bytes(&self, bytes: &mut [u8]);

    /// Read from the stream's current position and advance.
    fn read_from(&mut self, stream: &mut BinaryStream) -> Result<()> {
        if Self::SIZE > STACK_BUFFER_SIZE {
            let mut buf = vec![0u8; Self::SIZE];
            stream.read_exact(&mut buf)?;
            self.read_bytes(&buf);
            return Ok(());
        }
        let mut buf = [0u8; STACK_BUFFER_SIZE];
        let buf = &mut buf[..Self::SIZE];
        stream.read_exact(buf)?;
        self.read_bytes(buf);
        Ok(())
    }

    /// Write at the stream's current position and advance.
    fn write_to(&self, stream: &mut BinaryStream) -> Result<()> {
        if Self::SIZE > STACK_BUFFER_SIZE {
            let mut buf = vec![0u8; Self::SIZE];
            self.write_bytes(&mut buf);
            return stream.write_all(&buf);
        }
        let mut buf = [0u8; STACK_BUFFER_SIZE];
        let buf = &mut buf[..Self::SIZE];
        self.write_bytes(buf);
        stream.write_all(buf)
    }

    /// Alternate encodings the type supports. Empty means fixed-width only.
    fn encoding_methods() -> Vec<EncodingDefinition> {
        Vec::new()
    }

    /// The smallest value.
    fn min_value() -> Self {
        let mut value = Self::default();
        value.set_min();
        value
    }

    /// The largest value.
    fn max_value() -> Self {
        let mut value = Self::default();
        value.set_max();
        value
    }

    /// Decode a fresh value from `bytes`.
    fn from_bytes(bytes: &[u8]) -> Self {
        let mut value = Self::default();
        value.read_bytes(bytes);
        value
    }
}

// ============================================================================
// Ordering
// ============================================================================

/// Total order over keys, injected into the tree.
pub trait KeyComparer<K>: Clone + Send + Sync + 'static {
    /// Compare two keys.
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Orders keys by their [`Ord`] implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord> KeyComparer<K> for NaturalOrder {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

// ============================================================================
// Encodings
// ============================================================================

/// Identifies how a key/value pair is laid out on disk or on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodingDefinition {
    /// Encoding applied to the key and value together, when they are not
    /// encoded separately.
    pub key_value_method: Option<Uuid>,
    /// Key encoding when encoded separately.
    pub key_method: Uuid,
    /// Value encoding when encoded separately.
    pub value_method: Uuid,
}

impl EncodingDefinition {
    /// Plain fixed-width encoding of both key and value.
    pub const FIXED_SIZE_METHOD: Uuid = Uuid::from_u128(0x1dea_326d_a63a_4f73_b51c_7b3125c6da55);

    /// The encoding every type supports.
    pub const FIXED_SIZE: EncodingDefinition = EncodingDefinition {
        key_value_method: None,
        key_method: Self::FIXED_SIZE_METHOD,
        value_method: Self::FIXED_SIZE_METHOD,
    };

    /// True for the plain fixed-width encoding.
    pub fn is_fixed_size(&self) -> bool {
        *self == Self::FIXED_SIZE
    }
}

impl fmt::Display for EncodingDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_value_method {
            Some(method) => write!(f, "KeyValue: {}", method),
            None => write!(f, "Key: {} Value: {}", self.key_method, self.value_method),
        }
    }
}

/// Every encoding a key/value pairing supports, fixed-size first.
pub fn supported_encodings<K: TreeType, V: TreeType>() -> Vec<EncodingDefinition> {
    let mut encodings = vec![EncodingDefinition::FIXED_SIZE];
    for encoding in K::encoding_methods().into_iter().chain(V::encoding_methods()) {
        if !encodings.contains(&encoding) {
            encodings.push(encoding);
        }
    }
    encodings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_order() {
        assert_eq!(NaturalOrder.compare(&1u32, &2u32), Ordering::Less);
        assert_eq!(NaturalOrder.compare(&7u64, &7u64), Ordering::Equal);
    }

    #[test]
    fn test_fixed_size_always_supported() {
        let encodings = supported_encodings::<HistorianKey, HistorianValue>();
        assert_eq!(encodings[0], EncodingDefinition::FIXED_SIZE);
        assert!(encodings[0].is_fixed_size());
    }

    /// A type too wide for the stack buffer.
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Wide([u8; 100]);

    impl Default for Wide {
        fn default() -> Self {
            Wide([0; 100])
        }
    }

    impl TreeType for Wide {
        const TYPE_ID: Uuid = Uuid::from_u128(0x5749_4445);
        const SIZE: usize = 100;

        fn set_min(&mut self) {
            self.0 = [0; 100];
        }

        fn set_max(&mut self) {
            self.0 = [0xFF; 100];
        }

        fn read_bytes(&mut self, bytes: &[u8]) {
            self.0.copy_from_slice(&bytes[..100]);
        }

        fn write_bytes(&self, bytes: &mut [u8]) {
            bytes[..100].copy_from_slice(&self.0);
        }
    }

    fn stream() -> BinaryStream {
        use crate::buffer::PageCache;
        use crate::io::PagedFile;
        use crate::storage::MemoryStore;
        use std::sync::Arc;

        let cache = Arc::new(PageCache::new(512, 4 * 512).unwrap());
        let store = Arc::new(MemoryStore::new(512).unwrap());
        BinaryStream::new(Arc::new(PagedFile::open(cache, store).unwrap()))
    }

    #[test]
    fn test_stream_round_trip_small_and_wide() {
        let mut stream = stream();
        stream.set_position(480);
        0xDEAD_BEEFu32.write_to(&mut stream).unwrap();
        let mut wide = Wide::default();
        wide.0[99] = 7;
        wide.write_to(&mut stream).unwrap();
        assert_eq!(stream.position(), 584);

        stream.set_position(480);
        let mut small = 0u32;
        small.read_from(&mut stream).unwrap();
        let mut read = Wide::default();
        read.read_from(&mut stream).unwrap();
        assert_eq!(small, 0xDEAD_BEEF);
        assert_eq!(read, wide);
    }

    #[test]
    fn test_min_max_bracket_values() {
        assert_eq!(<u32 as TreeType>::min_value(), 0);
        assert_eq!(<u64 as TreeType>::max_value(), u64::MAX);
        let key = HistorianKey::new(5, 6, 7);
        assert!(HistorianKey::min_value() < key);
        assert!(key < HistorianKey::max_value());
    }
}
