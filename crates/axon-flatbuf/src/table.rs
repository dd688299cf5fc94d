// SPDX-License-Identifier: MIT OR Apache-2.0
//! Read-only views of objects within a completed flatbuffer.

use crate::{
    SIZE_UOFFSET, SIZE_VOFFSET, read_f32, read_f64, read_i8, read_i16, read_i32, read_i64,
    read_indirect, read_soffset, read_u8, read_u16, read_u32, read_u64, read_uoffset,
};

/// A read-only view of a table within a flatbuffer.
///
/// Initializing a view does not validate the underlying buffer; the frame
/// must have been checked before decoding.
#[derive(Debug, Clone, Copy)]
pub struct Table<'a> {
    data: &'a [u8],
    pos: usize,
    vtable: usize,
    vsize: usize,
}

impl<'a> Table<'a> {
    /// View the root table of a completed flatbuffer.
    pub fn from_root(data: &'a [u8]) -> Self {
        let pos = read_uoffset(data, 0) as usize;
        Self::at(data, pos)
    }

    /// View the table at a known position within the flatbuffer.
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        let vtable = (pos as i64 - i64::from(read_soffset(data, pos))) as usize;
        let vsize = read_u16(data, vtable) as usize;
        Self {
            data,
            pos,
            vtable,
            vsize,
        }
    }

    /// The underlying buffer.
    pub fn buffer(&self) -> &'a [u8] {
        self.data
    }

    /// This table's position within the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The size in bytes of this table's vtable.
    pub fn vtable_size(&self) -> usize {
        self.vsize
    }

    /// The absolute offset of the `i`-th field, or zero when absent.
    ///
    /// Fields may be absent either because the writer omitted a
    /// default-valued field or because the writer predates the field.
    pub fn field_offset(&self, i: usize) -> usize {
        let entry = (2 + i) * SIZE_VOFFSET;
        if entry < self.vsize {
            let voffset = read_u16(self.data, self.vtable + entry) as usize;
            if voffset != 0 {
                return self.pos + voffset;
            }
        }
        0
    }

    /// Read a boolean field, returning `d` when absent.
    pub fn read_bool(&self, i: usize, d: bool) -> bool {
        match self.field_offset(i) {
            0 => d,
            off => read_u8(self.data, off) != 0,
        }
    }

    /// Read a string field. Absent fields read as `None`; an empty string is
    /// a present field with zero length.
    pub fn read_str(&self, i: usize) -> Option<&'a str> {
        let off = self.field_offset(i);
        if off == 0 {
            return None;
        }
        let target = read_indirect(self.data, off);
        let len = read_u32(self.data, target) as usize;
        let start = target + SIZE_UOFFSET;
        std::str::from_utf8(&self.data[start..start + len]).ok()
    }

    /// Read a byte-vector field. Absent and empty vectors both read as
    /// `None`.
    pub fn read_bytes(&self, i: usize) -> Option<&'a [u8]> {
        let len = self.vector_len(i) as usize;
        if len == 0 {
            return None;
        }
        let start = self.vector_pos(i)?;
        Some(&self.data[start..start + len])
    }

    /// The number of elements in a vector field, or zero when absent.
    pub fn vector_len(&self, i: usize) -> u32 {
        match self.field_offset(i) {
            0 => 0,
            off => {
                let vec = read_indirect(self.data, off);
                read_u32(self.data, vec)
            }
        }
    }

    /// The absolute position of the first element of a vector field.
    pub fn vector_pos(&self, i: usize) -> Option<usize> {
        match self.field_offset(i) {
            0 => None,
            off => Some(read_indirect(self.data, off) + SIZE_UOFFSET),
        }
    }

    /// View the table referenced by a union (or table) field, or `None` when
    /// the field is absent.
    pub fn read_union(&self, i: usize) -> Option<Table<'a>> {
        match self.field_offset(i) {
            0 => None,
            off => Some(Table::at(self.data, read_indirect(self.data, off))),
        }
    }
}

macro_rules! table_read_scalar {
    ($(#[$doc:meta])* $name:ident, $reader:ident, $ty:ty) => {
        impl<'a> Table<'a> {
            $(#[$doc])*
            pub fn $name(&self, i: usize, d: $ty) -> $ty {
                match self.field_offset(i) {
                    0 => d,
                    off => $reader(self.data, off),
                }
            }
        }
    };
}

table_read_scalar!(
    /// Read an `i8` field, returning `d` when absent.
    read_i8, read_i8, i8
);
table_read_scalar!(
    /// Read an `i16` field, returning `d` when absent.
    read_i16, read_i16, i16
);
table_read_scalar!(
    /// Read an `i32` field, returning `d` when absent.
    read_i32, read_i32, i32
);
table_read_scalar!(
    /// Read an `i64` field, returning `d` when absent.
    read_i64, read_i64, i64
);
table_read_scalar!(
    /// Read a `u8` field, returning `d` when absent.
    read_u8, read_u8, u8
);
table_read_scalar!(
    /// Read a `u16` field, returning `d` when absent.
    read_u16, read_u16, u16
);
table_read_scalar!(
    /// Read a `u32` field, returning `d` when absent.
    read_u32, read_u32, u32
);
table_read_scalar!(
    /// Read a `u64` field, returning `d` when absent.
    read_u64, read_u64, u64
);
table_read_scalar!(
    /// Read an `f32` field, returning `d` when absent.
    read_f32, read_f32, f32
);
table_read_scalar!(
    /// Read an `f64` field, returning `d` when absent.
    read_f64, read_f64, f64
);
