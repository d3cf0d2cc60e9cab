//! Unsigned integers as tree keys and values.

use uuid::Uuid;

use super::TreeType;

macro_rules! unsigned_tree_type {
    ($ty:ty, $id:expr) => {
        impl TreeType for $ty {
            const TYPE_ID: Uuid = Uuid::from_u128($id);
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn set_min(&mut self) {
                *self = <$ty>::MIN;
            }

            fn set_max(&mut self) {
                *self = <$ty>::MAX;
            }

            fn read_bytes(&mut self, bytes: &[u8]) {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(&bytes[..Self::SIZE]);
                *self = <$ty>::from_le_bytes(buf);
            }

            fn write_bytes(&self, bytes: &mut [u8]) {
                bytes[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

unsigned_tree_type!(u32, 0x03f4_bd3a_d9cf_4358_b177_2a6b9a1e2c1d);
unsigned_tree_type!(u64, 0x80ea_8c5b_9d41_4dc8_a3d4_5b2f0c6e1a77);
