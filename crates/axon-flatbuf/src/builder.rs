// SPDX-License-Identifier: MIT OR Apache-2.0
//! State machine for building flatbuffer objects from leaf values upward.

use crate::{SIZE_SOFFSET, SIZE_UOFFSET, SIZE_VOFFSET, read_u16};

/// Number of metadata fields at the start of a vtable (its own size and the
/// object size).
const VTABLE_METADATA_FIELDS: usize = 2;

/// A flatbuffer under construction.
///
/// Byte buffers are constructed back-to-front: the head index decreases as
/// data is prepended, and the finalized bytes are `[head..capacity)`. All
/// offsets handed out by the builder are measured from the *end* of the
/// buffer, which keeps them stable while the front keeps moving.
///
/// ```
/// use axon_flatbuf::{Builder, Table};
///
/// let mut fb = Builder::new(0);
/// let name = fb.prepend_string("web");
/// fb.object_begin(2);
/// fb.object_prepend_uoffset(0, name, 0);
/// fb.object_prepend_u16(1, 8080, 0);
/// let root = fb.object_end();
/// fb.finish(root);
///
/// let tbl = Table::from_root(fb.data());
/// assert_eq!(tbl.read_str(0), Some("web"));
/// assert_eq!(tbl.read_u16(1, 0), 8080);
/// ```
#[derive(Debug)]
pub struct Builder {
    bytes: Vec<u8>,
    head: usize,
    minalign: usize,
    vtable: Vec<u32>,
    object_end: u32,
    vtables: Vec<u32>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Builder {
    /// Returns a new buffer with the given initial capacity.
    pub fn new(initial_size: usize) -> Self {
        Self {
            bytes: vec![0; initial_size],
            head: initial_size,
            minalign: 1,
            vtable: Vec::new(),
            object_end: 0,
            vtables: Vec::new(),
        }
    }

    /// The size of the written portion of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len() - self.head
    }

    /// True when nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The written bytes, front first.
    pub fn data(&self) -> &[u8] {
        &self.bytes[self.head..]
    }

    /// The current write position as an offset from the end of the buffer.
    pub fn offset(&self) -> u32 {
        self.len() as u32
    }

    /// Consume the builder, returning the written bytes.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.bytes.drain(..self.head);
        self.bytes
    }

    fn grow(&mut self) {
        let old_len = self.bytes.len();
        let new_len = (old_len * 2).max(1);
        let mut grown = vec![0u8; new_len];
        grown[new_len - old_len..].copy_from_slice(&self.bytes);
        self.bytes = grown;
        self.head += new_len - old_len;
    }

    fn ensure_space(&mut self, n: usize) {
        while self.head < n {
            self.grow();
        }
    }

    /// Prepend `n` zero bytes.
    pub fn pad(&mut self, n: usize) {
        self.ensure_space(n);
        for _ in 0..n {
            self.head -= 1;
            self.bytes[self.head] = 0;
        }
    }

    /// Prepare to write an element of `size` bytes after `additional_bytes`
    /// have been written, padding with zeros so that the element lands on a
    /// `size`-aligned offset. If all you need to do is align,
    /// `additional_bytes` is 0.
    pub fn prep(&mut self, size: usize, additional_bytes: usize) {
        if size > self.minalign {
            self.minalign = size;
        }

        let align_size = (!(self.len() + additional_bytes)).wrapping_add(1) & (size - 1);
        while self.head < align_size + size + additional_bytes {
            self.grow();
        }
        self.pad(align_size);
    }

    fn place(&mut self, raw: &[u8]) {
        self.ensure_space(raw.len());
        self.head -= raw.len();
        self.bytes[self.head..self.head + raw.len()].copy_from_slice(raw);
    }
}

macro_rules! prepend_scalar {
    ($(#[$doc:meta])* $name:ident, $ty:ty) => {
        impl Builder {
            $(#[$doc])*
            pub fn $name(&mut self, x: $ty) {
                self.prep(std::mem::size_of::<$ty>(), 0);
                self.place(&x.to_le_bytes());
            }
        }
    };
}

prepend_scalar!(
    /// Prepend an aligned little-endian `i8`.
    prepend_i8, i8
);
prepend_scalar!(
    /// Prepend an aligned little-endian `i16`.
    prepend_i16, i16
);
prepend_scalar!(
    /// Prepend an aligned little-endian `i32`.
    prepend_i32, i32
);
prepend_scalar!(
    /// Prepend an aligned little-endian `i64`.
    prepend_i64, i64
);
prepend_scalar!(
    /// Prepend a `u8`.
    prepend_u8, u8
);
prepend_scalar!(
    /// Prepend an aligned little-endian `u16`.
    prepend_u16, u16
);
prepend_scalar!(
    /// Prepend an aligned little-endian `u32`.
    prepend_u32, u32
);
prepend_scalar!(
    /// Prepend an aligned little-endian `u64`.
    prepend_u64, u64
);
prepend_scalar!(
    /// Prepend an aligned little-endian IEEE-754 `f32`.
    prepend_f32, f32
);
prepend_scalar!(
    /// Prepend an aligned little-endian IEEE-754 `f64`.
    prepend_f64, f64
);

impl Builder {
    /// Prepend a one-byte boolean.
    pub fn prepend_bool(&mut self, x: bool) {
        self.prepend_u8(x as u8);
    }

    /// Prepend a `uoffset` referring to a previously written value.
    ///
    /// The stored value is relative to where it is written, so the referent
    /// must already be in the buffer.
    pub fn prepend_uoffset(&mut self, off: u32) {
        self.prep(SIZE_UOFFSET, 0);
        debug_assert!(off <= self.offset(), "uoffset must refer backward");
        let relative = self.offset() - off + SIZE_UOFFSET as u32;
        self.place(&relative.to_le_bytes());
    }

    /// Prepend a NUL-terminated, length-prefixed string.
    ///
    /// Returns the string's offset for use in a parent object.
    pub fn prepend_string(&mut self, s: &str) -> u32 {
        self.prep(SIZE_UOFFSET, s.len() + 1);
        self.place(&[0]);
        self.head -= s.len();
        self.bytes[self.head..self.head + s.len()].copy_from_slice(s.as_bytes());
        self.vector_end(s.len())
    }

    /// Prepend an optional string; `None` yields the null offset 0.
    pub fn prepend_opt_string(&mut self, s: Option<&str>) -> u32 {
        match s {
            Some(s) => self.prepend_string(s),
            None => 0,
        }
    }

    /// Prepend an array of bytes, identical to a vector of `u8` elements.
    ///
    /// Returns the array's offset for use in a parent object.
    pub fn prepend_bytes(&mut self, src: &[u8]) -> u32 {
        self.prep(SIZE_UOFFSET, src.len());
        self.head -= src.len();
        self.bytes[self.head..self.head + src.len()].copy_from_slice(src);
        self.vector_end(src.len())
    }

    /// Begin a new vector whose contents will be prepended to the buffer.
    ///
    /// To preserve the order of the elements, prepend them in reverse order;
    /// flatbuffers are constructed from back to front.
    pub fn vector_begin(&mut self, elem_size: usize, num_elems: usize, alignment: usize) {
        self.prep(SIZE_UOFFSET, elem_size * num_elems);
        self.prep(alignment, elem_size * num_elems);
    }

    /// Finalize a vector, prefixing it with its element count.
    ///
    /// Returns the vector's offset for use in a parent object.
    pub fn vector_end(&mut self, num_elems: usize) -> u32 {
        // Space was reserved by vector_begin; write the length unaligned.
        self.place(&(num_elems as u32).to_le_bytes());
        self.offset()
    }

    /// Begin a new object with `num_fields` vtable slots.
    pub fn object_begin(&mut self, num_fields: usize) {
        self.vtable.clear();
        self.vtable.resize(num_fields, 0);
        self.object_end = self.offset();
        self.minalign = 1;
    }

    fn slot(&mut self, i: usize) {
        self.vtable[i] = self.offset();
    }

    /// Record a struct written immediately before this call as field `i`.
    ///
    /// Structs are stored inline in their parent object, so `x` must equal
    /// the current offset.
    pub fn object_prepend_struct(&mut self, i: usize, x: u32, d: u32) {
        if x != d {
            debug_assert_eq!(x, self.offset(), "structs must be written inline");
            self.slot(i);
        }
    }

    /// Prepend a `uoffset` field, omitted when equal to the default.
    pub fn object_prepend_uoffset(&mut self, i: usize, x: u32, d: u32) {
        if x != d {
            self.prepend_uoffset(x);
            self.slot(i);
        }
    }

    /// Prepend a boolean field, omitted when equal to the default.
    pub fn object_prepend_bool(&mut self, i: usize, x: bool, d: bool) {
        if x != d {
            self.prepend_bool(x);
            self.slot(i);
        }
    }

    /// Finalize the current object, writing its vtable or reusing an
    /// identical one already in the buffer.
    ///
    /// Returns the object's offset for use in a parent object.
    pub fn object_end(&mut self) -> u32 {
        // Placeholder for the soffset to the vtable, patched below.
        self.prepend_i32(0);
        let object_offset = self.offset();

        // Search backwards through previously written vtables for a layout
        // identical to this object's.
        let mut existing_vtable = 0u32;
        for &candidate in self.vtables.iter().rev() {
            let start = self.bytes.len() - candidate as usize;
            let byte_len = read_u16(&self.bytes, start) as usize;
            let metadata = VTABLE_METADATA_FIELDS * SIZE_VOFFSET;
            let fields = &self.bytes[start + metadata..start + byte_len];
            if vtable_matches(&self.vtable, object_offset, fields) {
                existing_vtable = candidate;
                break;
            }
        }

        if existing_vtable == 0 {
            // No match: write out this object's vtable in reverse.
            for i in (0..self.vtable.len()).rev() {
                let field_offset = if self.vtable[i] == 0 {
                    0
                } else {
                    object_offset - self.vtable[i]
                };
                self.prepend_u16(field_offset as u16);
            }

            let object_size = object_offset - self.object_end;
            self.prepend_u16(object_size as u16);

            let vtable_bytes = (self.vtable.len() + VTABLE_METADATA_FIELDS) * SIZE_VOFFSET;
            self.prepend_u16(vtable_bytes as u16);

            let object_start = self.bytes.len() - object_offset as usize;
            let soffset = self.offset() as i32 - object_offset as i32;
            self.bytes[object_start..object_start + SIZE_SOFFSET]
                .copy_from_slice(&soffset.to_le_bytes());

            self.vtables.push(self.offset());
        } else {
            // Point the object at the shared vtable; the offset may be
            // negative when the vtable sits later in the buffer.
            let object_start = self.bytes.len() - object_offset as usize;
            self.head = object_start;
            let soffset = existing_vtable as i32 - object_offset as i32;
            self.bytes[object_start..object_start + SIZE_SOFFSET]
                .copy_from_slice(&soffset.to_le_bytes());
        }

        self.vtable.clear();
        object_offset
    }

    /// Finalize the buffer by prepending the offset of the root object.
    pub fn finish(&mut self, root_table: u32) {
        self.prep(self.minalign, SIZE_UOFFSET);
        self.prepend_uoffset(root_table);
    }
}

macro_rules! object_prepend_scalar {
    ($(#[$doc:meta])* $name:ident, $prepend:ident, $ty:ty) => {
        impl Builder {
            $(#[$doc])*
            pub fn $name(&mut self, i: usize, x: $ty, d: $ty) {
                if x != d {
                    self.$prepend(x);
                    self.slot(i);
                }
            }
        }
    };
}

object_prepend_scalar!(
    /// Prepend an `i8` field, omitted when equal to the default.
    object_prepend_i8, prepend_i8, i8
);
object_prepend_scalar!(
    /// Prepend an `i16` field, omitted when equal to the default.
    object_prepend_i16, prepend_i16, i16
);
object_prepend_scalar!(
    /// Prepend an `i32` field, omitted when equal to the default.
    object_prepend_i32, prepend_i32, i32
);
object_prepend_scalar!(
    /// Prepend an `i64` field, omitted when equal to the default.
    object_prepend_i64, prepend_i64, i64
);
object_prepend_scalar!(
    /// Prepend a `u8` field, omitted when equal to the default.
    object_prepend_u8, prepend_u8, u8
);
object_prepend_scalar!(
    /// Prepend a `u16` field, omitted when equal to the default.
    object_prepend_u16, prepend_u16, u16
);
object_prepend_scalar!(
    /// Prepend a `u32` field, omitted when equal to the default.
    object_prepend_u32, prepend_u32, u32
);
object_prepend_scalar!(
    /// Prepend a `u64` field, omitted when equal to the default.
    object_prepend_u64, prepend_u64, u64
);
object_prepend_scalar!(
    /// Prepend an `f32` field, omitted when equal to the default.
    object_prepend_f32, prepend_f32, f32
);
object_prepend_scalar!(
    /// Prepend an `f64` field, omitted when equal to the default.
    object_prepend_f64, prepend_f64, f64
);

/// Compare a scratch vtable (offsets from the end of the buffer) against the
/// field portion of a previously serialized vtable.
fn vtable_matches(vtable: &[u32], object_offset: u32, serialized: &[u8]) -> bool {
    if vtable.len() * SIZE_VOFFSET != serialized.len() {
        return false;
    }

    for (i, &entry) in vtable.iter().enumerate() {
        let stored = read_u16(serialized, i * SIZE_VOFFSET);
        if stored == 0 && entry == 0 {
            continue;
        }
        if i64::from(stored) != i64::from(object_offset) - i64::from(entry) {
            return false;
        }
    }

    true
}
