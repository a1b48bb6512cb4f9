pub trait WriteBytesLe {
    fn write_le(&self, dst: &mut Vec<u8>);
}

pub trait WriteBytesBe {
    fn write_be(&self, dst: &mut Vec<u8>);
}

macro_rules! impl_num_le_be {
    ($($t:ty),+) => { $(
        impl WriteBytesLe for $t { #[inline] fn write_le(&self, dst: &mut Vec<u8>) { dst.extend_from_slice(&self.to_le_bytes()); }}
        impl WriteBytesBe for $t { #[inline] fn write_be(&self, dst: &mut Vec<u8>) { dst.extend_from_slice(&self.to_be_bytes()); }}
    )+ }
}

impl_num_le_be!(u8, i8, u16, i16, u32, i32, u64, i64, f32);

macro_rules! impl_array {
    ($trait:ident, $method:ident) => {
        impl<T: $trait, const N: usize> $trait for [T; N] {
            #[inline]
            fn $method(&self, dst: &mut Vec<u8>) {
                self.iter().for_each(|item| item.$method(dst));
            }
        }
    };
}

impl_array!(WriteBytesLe, write_le);
impl_array!(WriteBytesBe, write_be);

/// Concatenates the little-endian encodings of the given values.
#[macro_export]
macro_rules! join_bytes_le {
    ( $($value:expr),+ $(,)? ) => {{
        let mut vec = Vec::<u8>::new();
        $( $value.write_le(&mut vec); )+
        vec
    }};
}

#[cfg(test)]
mod tests {
    use crate::byteorder::{WriteBytesBe, WriteBytesLe};
    use ltctools_macros::ToBytes;

    #[derive(ToBytes)]
    struct Stamp {
        secs: i64,
        usec: i32,
        _pad: [u8; 4],
        tag: [u8; 2],
    }

    #[test]
    fn fields_in_declaration_order() {
        let s = Stamp {
            secs: 0x0102_0304_0506_0708,
            usec: -2,
            _pad: [0; 4],
            tag: *b"OK",
        };

        let mut le = Vec::new();
        let mut be = Vec::new();
        s.write_le(&mut le);
        s.write_be(&mut be);

        assert_eq!(le.len(), 18);
        assert_eq!(&le[..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&le[8..12], &[0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&le[12..], &[0, 0, 0, 0, b'O', b'K']);
        assert_eq!(&be[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&be[8..12], &[0xFF, 0xFF, 0xFF, 0xFE]);
    }

    #[test]
    fn join_little_endian() {
        let bytes = join_bytes_le!(1u16, 0x0A0B_0C0Du32, [7u8, 8]);
        assert_eq!(bytes, vec![1, 0, 0x0D, 0x0C, 0x0B, 0x0A, 7, 8]);
    }
}
