// SPDX-License-Identifier: MIT OR Apache-2.0
//! axon-flatbuf
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Support for the flatbuffers serialization format used on the wire between
//! the agent and the daemon.
//!
//! See: <http://google.github.io/flatbuffers/index.html>
//!
//! Buffers are constructed in a last-first manner for simplicity and
//! performance: a [`Builder`] keeps a head cursor that moves toward the front
//! of an internal byte buffer as values are prepended, and the finished bytes
//! are everything from the head to the end. [`Table`] is a thin read-only
//! view over a completed buffer.
//!
//! Reads are non-validating; callers are expected to have framed the buffer
//! correctly before decoding it.

pub mod builder;
pub mod table;

pub use builder::Builder;
pub use table::Table;

/// Size in bytes of a `uoffset` (offset to an object, vector, or string).
pub const SIZE_UOFFSET: usize = 4;

/// Size in bytes of an `soffset` (signed offset from an object to its vtable).
pub const SIZE_SOFFSET: usize = 4;

/// Size in bytes of a `voffset` (offset within a vtable).
pub const SIZE_VOFFSET: usize = 2;

macro_rules! read_scalar {
    ($(#[$doc:meta])* $name:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(buf: &[u8], offset: usize) -> $ty {
            const N: usize = std::mem::size_of::<$ty>();
            let mut raw = [0u8; N];
            raw.copy_from_slice(&buf[offset..offset + N]);
            <$ty>::from_le_bytes(raw)
        }
    };
}

read_scalar!(
    /// Read a little-endian `i8` at `offset`.
    read_i8, i8
);
read_scalar!(
    /// Read a little-endian `i16` at `offset`.
    read_i16, i16
);
read_scalar!(
    /// Read a little-endian `i32` at `offset`.
    read_i32, i32
);
read_scalar!(
    /// Read a little-endian `i64` at `offset`.
    read_i64, i64
);
read_scalar!(
    /// Read a `u8` at `offset`.
    read_u8, u8
);
read_scalar!(
    /// Read a little-endian `u16` at `offset`.
    read_u16, u16
);
read_scalar!(
    /// Read a little-endian `u32` at `offset`.
    read_u32, u32
);
read_scalar!(
    /// Read a little-endian `u64` at `offset`.
    read_u64, u64
);
read_scalar!(
    /// Read a little-endian IEEE-754 `f32` at `offset`.
    read_f32, f32
);
read_scalar!(
    /// Read a little-endian IEEE-754 `f64` at `offset`.
    read_f64, f64
);

/// Read a `uoffset` (unsigned 32-bit offset) at `offset`.
pub fn read_uoffset(buf: &[u8], offset: usize) -> u32 {
    read_u32(buf, offset)
}

/// Read an `soffset` (signed 32-bit offset) at `offset`.
pub fn read_soffset(buf: &[u8], offset: usize) -> i32 {
    read_i32(buf, offset)
}

/// Dereference a `uoffset` stored at `pos`, yielding the absolute position of
/// the value it points at.
pub fn read_indirect(buf: &[u8], pos: usize) -> usize {
    pos + read_uoffset(buf, pos) as usize
}
