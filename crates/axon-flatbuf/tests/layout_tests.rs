// SPDX-License-Identifier: MIT OR Apache-2.0
//! Byte-for-byte layout tests for the back-to-front builder.
//!
//! The expected byte sequences are the canonical flatbuffer encodings; any
//! deviation here is a wire-compatibility break.

use axon_flatbuf::Builder;

fn assert_bytes(expected: &[u8], fb: &Builder) {
    assert_eq!(expected, fb.data(), "buffer layout mismatch");
}

#[test]
fn byte_layout_numbers() {
    let mut fb = Builder::new(0);
    assert_eq!(0, fb.len());

    fb.prepend_bool(true);
    assert_bytes(&[0x01], &fb);

    fb.prepend_i8(-127);
    assert_bytes(&[0x81, 0x01], &fb);

    fb.prepend_u8(255);
    assert_bytes(&[0xFF, 0x81, 0x01], &fb);

    // First value that requires padding.
    fb.prepend_i16(-32222);
    assert_bytes(&[0x22, 0x82, 0x00, 0xFF, 0x81, 0x01], &fb);

    // No padding required this time.
    fb.prepend_u16(0xFEEE);
    assert_bytes(&[0xEE, 0xFE, 0x22, 0x82, 0x00, 0xFF, 0x81, 0x01], &fb);

    fb.prepend_i32(-53687092);
    assert_bytes(
        &[
            0xCC, 0xCC, 0xCC, 0xFC, 0xEE, 0xFE, 0x22, 0x82, 0x00, 0xFF, 0x81, 0x01,
        ],
        &fb,
    );

    fb.prepend_u32(0x98765432);
    assert_bytes(
        &[
            0x32, 0x54, 0x76, 0x98, 0xCC, 0xCC, 0xCC, 0xFC, 0xEE, 0xFE, 0x22, 0x82, 0x00, 0xFF,
            0x81, 0x01,
        ],
        &fb,
    );

    let mut fb = Builder::new(0);
    fb.prepend_u64(0x1122334455667788);
    assert_bytes(&[0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11], &fb);
}

#[test]
fn byte_layout_vectors() {
    // 1 x byte
    let mut fb = Builder::new(0);
    fb.vector_begin(1, 1, 1);
    assert_bytes(&[0, 0, 0], &fb);
    fb.prepend_u8(1);
    assert_bytes(&[1, 0, 0, 0], &fb);
    fb.vector_end(1);
    assert_bytes(&[1, 0, 0, 0, 1, 0, 0, 0], &fb);

    // 2 x byte
    let mut fb = Builder::new(0);
    fb.vector_begin(1, 2, 1);
    assert_bytes(&[0, 0], &fb);
    fb.prepend_u8(1);
    assert_bytes(&[1, 0, 0], &fb);
    fb.prepend_u8(2);
    assert_bytes(&[2, 1, 0, 0], &fb);
    fb.vector_end(2);
    assert_bytes(&[2, 0, 0, 0, 2, 1, 0, 0], &fb);

    // 11 x byte vector matching the builder's initial size. The declared
    // count understates the writes, which forces a growth inside
    // vector_end and documents that the length lands wherever the head is.
    let mut fb = Builder::new(12);
    fb.vector_begin(1, 8, 1);
    for i in 1u8..12 {
        fb.prepend_u8(i);
    }
    fb.vector_end(8);
    assert_bytes(
        &[
            0x08, 0x00, 0x00, 0x00, 0x0B, 0x0A, 0x09, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02,
            0x01,
        ],
        &fb,
    );

    // 1 x uint16
    let mut fb = Builder::new(0);
    fb.vector_begin(2, 1, 1);
    assert_bytes(&[0, 0], &fb);
    fb.prepend_u16(1);
    assert_bytes(&[1, 0, 0, 0], &fb);
    fb.vector_end(1);
    assert_bytes(&[1, 0, 0, 0, 1, 0, 0, 0], &fb);

    // 2 x uint16
    let mut fb = Builder::new(0);
    fb.vector_begin(2, 2, 1);
    fb.prepend_u16(0xABCD);
    assert_bytes(&[0xCD, 0xAB], &fb);
    fb.prepend_u16(0xDCBA);
    assert_bytes(&[0xBA, 0xDC, 0xCD, 0xAB], &fb);
    fb.vector_end(2);
    assert_bytes(&[0x02, 0x00, 0x00, 0x00, 0xBA, 0xDC, 0xCD, 0xAB], &fb);
}

#[test]
fn byte_layout_strings() {
    let expected: [u8; 28] = [
        0, 0, 0, 0, 0, /* final prepend: empty string */
        0, 0, 0, /* padding */
        4, 0, 0, 0, b'm', b'o', b'o', b'p', 0, /* second string + NUL */
        0, 0, 0, /* padding */
        3, 0, 0, 0, b'f', b'o', b'o', 0, /* first string + NUL */
    ];

    let mut fb = Builder::new(0);

    let offset = fb.prepend_string("foo");
    assert_eq!(8, offset);
    assert_bytes(&expected[20..], &fb);

    let offset = fb.prepend_string("moop");
    assert_eq!(20, offset);
    assert_bytes(&expected[8..], &fb);

    let offset = fb.prepend_opt_string(None);
    assert_eq!(0, offset, "null string is the zero offset");

    let offset = fb.prepend_string("");
    assert_eq!(28, offset);
    assert_bytes(&expected, &fb);
}

#[test]
fn byte_layout_utf8() {
    let expected: [u8; 16] = [
        9, 0, 0, 0, /* length */
        230, 151, 165, 230, 156, 172, 232, 170, 158, 0, /* data + NUL */
        0, 0, /* padding */
    ];

    let mut fb = Builder::new(0);
    fb.prepend_string("日本語");
    assert_bytes(&expected, &fb);
}

#[test]
fn byte_layout_vtable_no_fields() {
    let mut fb = Builder::new(0);
    fb.object_begin(0);
    fb.object_end();

    assert_bytes(
        &[
            4, 0, /* vtable size */
            4, 0, /* object size */
            4, 0, 0, 0, /* vtable offset */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_vtable_one_bool() {
    let mut fb = Builder::new(0);
    fb.object_begin(1);
    fb.object_prepend_bool(0, true, false);
    fb.object_end();

    assert_bytes(
        &[
            6, 0, /* vtable size */
            8, 0, /* object size */
            7, 0, /* vtable[0]: T.a */
            6, 0, 0, 0, /* vtable offset */
            0, 0, 0, /* padding */
            1, /* T.a */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_vtable_default_bool_is_omitted() {
    let mut fb = Builder::new(0);
    fb.object_begin(1);
    fb.object_prepend_bool(0, false, false);
    fb.object_end();

    assert_bytes(
        &[
            6, 0, /* vtable size */
            4, 0, /* object size */
            0, 0, /* vtable[0]: absent */
            6, 0, 0, 0, /* vtable offset */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_vtable_one_short() {
    let mut fb = Builder::new(0);
    fb.object_begin(1);
    fb.object_prepend_i16(0, 0x789A, 0);
    fb.object_end();

    assert_bytes(
        &[
            6, 0, /* vtable size */
            8, 0, /* object size */
            6, 0, /* vtable[0]: T.a */
            6, 0, 0, 0, /* vtable offset */
            0, 0, /* padding */
            0x9A, 0x78, /* T.a */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_vtable_two_shorts() {
    let mut fb = Builder::new(0);
    fb.object_begin(2);
    fb.object_prepend_i16(0, 0x3456, 0);
    fb.object_prepend_i16(1, 0x789A, 0);
    fb.object_end();

    assert_bytes(
        &[
            8, 0, /* vtable size */
            8, 0, /* object size */
            6, 0, /* vtable[0]: T.a */
            4, 0, /* vtable[1]: T.b */
            8, 0, 0, 0, /* vtable offset */
            0x9A, 0x78, /* T.b */
            0x56, 0x34, /* T.a */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_vtable_short_and_bool() {
    let mut fb = Builder::new(0);
    fb.object_begin(2);
    fb.object_prepend_i16(0, 0x3456, 0);
    fb.object_prepend_bool(1, true, false);
    fb.object_end();

    assert_bytes(
        &[
            8, 0, /* vtable size */
            8, 0, /* object size */
            6, 0, /* vtable[0]: T.a */
            5, 0, /* vtable[1]: T.b */
            8, 0, 0, 0, /* vtable offset */
            0, /* padding */
            1, /* T.b */
            0x56, 0x34, /* T.a */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_vtable_empty_vector() {
    let mut fb = Builder::new(0);
    fb.vector_begin(1, 0, 1);
    let vector_end = fb.vector_end(0);
    fb.object_begin(1);
    fb.object_prepend_u32(0, vector_end, 0);
    fb.object_end();

    assert_bytes(
        &[
            6, 0, /* vtable size */
            8, 0, /* object size */
            4, 0, /* vtable[0]: T.a */
            6, 0, 0, 0, /* vtable offset */
            4, 0, 0, 0, /* T.a */
            0, 0, 0, 0, /* vector length */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_vtable_empty_vector_and_scalar() {
    let mut fb = Builder::new(0);
    fb.vector_begin(1, 0, 1);
    let vector_end = fb.vector_end(0);
    fb.object_begin(2);
    fb.object_prepend_i16(0, 55, 0);
    fb.object_prepend_uoffset(1, vector_end, 0);
    fb.object_end();

    assert_bytes(
        &[
            8, 0, /* vtable size */
            12, 0, /* object size */
            10, 0, /* vtable[0]: T.a */
            4, 0, /* vtable[1]: T.b */
            8, 0, 0, 0, /* vtable offset */
            8, 0, 0, 0, /* T.b */
            0, 0, 55, 0, /* T.a */
            0, 0, 0, 0, /* vector length */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_vtable_scalar_and_vector_same_alignment() {
    let mut fb = Builder::new(0);
    fb.vector_begin(2, 2, 1);
    fb.prepend_u16(0x1234); /* T.b[1] */
    fb.prepend_u16(0x5678); /* T.b[0] */
    let vector_end = fb.vector_end(2);
    fb.object_begin(2);
    fb.object_prepend_uoffset(1, vector_end, 0); /* T.b */
    fb.object_prepend_i16(0, 55, 0); /* T.a */
    fb.object_end();

    assert_bytes(
        &[
            8, 0, /* vtable size */
            12, 0, /* object size */
            6, 0, /* vtable[0]: T.a */
            8, 0, /* vtable[1]: T.b */
            8, 0, 0, 0, /* vtable offset */
            0, 0, /* padding */
            55, 0, /* T.a */
            4, 0, 0, 0, /* T.b */
            2, 0, 0, 0, /* vector length */
            0x78, 0x56, /* T.b[0] */
            0x34, 0x12, /* T.b[1] */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_vtable_vector_of_structs() {
    let mut fb = Builder::new(0);
    fb.vector_begin(2, 2, 1);
    fb.prepend_i8(33); /* T.v[1].b */
    fb.prepend_i8(44); /* T.v[1].a */
    fb.prepend_i8(55); /* T.v[0].b */
    fb.prepend_i8(66); /* T.v[0].a */
    let vector_end = fb.vector_end(2);
    fb.object_begin(1);
    fb.object_prepend_uoffset(0, vector_end, 0);
    fb.object_end();

    assert_bytes(
        &[
            6, 0, /* vtable size */
            8, 0, /* object size */
            4, 0, /* vtable[0] */
            6, 0, 0, 0, /* vtable offset */
            4, 0, 0, 0, /* vector offset */
            2, 0, 0, 0, /* vector length */
            66, 55, 44, 33, /* structs */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_vtable_mixed_alignment_with_root() {
    let mut fb = Builder::new(0);
    fb.object_begin(2);
    fb.object_prepend_i8(0, 33, 0);
    fb.object_prepend_i16(1, 66, 0);
    let object_end = fb.object_end();
    fb.finish(object_end);

    assert_bytes(
        &[
            12, 0, 0, 0, /* root object offset */
            8, 0, /* vtable size */
            8, 0, /* object size */
            7, 0, /* vtable[0]: T.a */
            4, 0, /* vtable[1]: T.b */
            8, 0, 0, 0, /* vtable offset */
            66, 0, /* T.b */
            0, /* padding */
            33, /* T.a */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_two_root_objects() {
    let mut fb = Builder::new(0);
    fb.object_begin(2);
    fb.object_prepend_i8(0, 33, 0); /* T1.a */
    fb.object_prepend_i8(1, 44, 0); /* T1.b */
    let object_end = fb.object_end();
    fb.finish(object_end);

    fb.object_begin(3);
    fb.object_prepend_i8(0, 55, 0); /* T2.a */
    fb.object_prepend_i8(1, 66, 0); /* T2.b */
    fb.object_prepend_i8(2, 77, 0); /* T2.c */
    let object_end = fb.object_end();
    fb.finish(object_end);

    assert_bytes(
        &[
            16, 0, 0, 0, /* root object offset */
            0, 0, /* padding */
            10, 0, /* vtable size */
            8, 0, /* object size */
            7, 0, /* vtable[0]: T2.a */
            6, 0, /* vtable[1]: T2.b */
            5, 0, /* vtable[2]: T2.c */
            10, 0, 0, 0, /* vtable offset */
            0, /* padding */
            77, /* T2.c */
            66, /* T2.b */
            55, /* T2.a */
            12, 0, 0, 0, /* root object offset */
            8, 0, /* vtable size */
            8, 0, /* object size */
            7, 0, /* vtable[0]: T1.a */
            6, 0, /* vtable[1]: T1.b */
            8, 0, 0, 0, /* vtable offset */
            0, 0, /* padding */
            44, /* T1.b */
            33, /* T1.a */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_eight_bools() {
    let mut fb = Builder::new(0);
    fb.object_begin(8);
    for i in 0..8 {
        fb.object_prepend_bool(i, true, false);
    }
    let object_end = fb.object_end();
    fb.finish(object_end);

    assert_bytes(
        &[
            24, 0, 0, 0, /* root object offset */
            20, 0, /* vtable size */
            12, 0, /* object size */
            11, 0, 10, 0, 9, 0, 8, 0, 7, 0, 6, 0, 5, 0, 4, 0, /* vtable[0..8] */
            20, 0, 0, 0, /* vtable offset */
            1, 1, 1, 1, 1, 1, 1, 1, /* T.h .. T.a */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_three_bools() {
    let mut fb = Builder::new(0);
    fb.object_begin(3);
    fb.object_prepend_bool(0, true, false);
    fb.object_prepend_bool(1, true, false);
    fb.object_prepend_bool(2, true, false);
    let object_end = fb.object_end();
    fb.finish(object_end);

    assert_bytes(
        &[
            16, 0, 0, 0, /* root object offset */
            0, 0, /* padding */
            10, 0, /* vtable size */
            8, 0, /* object size */
            7, 0, /* vtable[0]: T.a */
            6, 0, /* vtable[1]: T.b */
            5, 0, /* vtable[2]: T.c */
            10, 0, 0, 0, /* vtable offset */
            0, /* padding */
            1, 1, 1, /* T.c, T.b, T.a */
        ],
        &fb,
    );
}

#[test]
fn byte_layout_float_field() {
    let mut fb = Builder::new(0);
    fb.object_begin(1);
    fb.object_prepend_f32(0, 1.0, 0.0);
    fb.object_end();

    assert_bytes(
        &[
            6, 0, /* vtable size */
            8, 0, /* object size */
            4, 0, /* vtable[0]: T.a */
            6, 0, 0, 0, /* vtable offset */
            0, 0, 128, 63, /* T.a */
        ],
        &fb,
    );
}

#[test]
fn vtable_deduplication() {
    let expected: [u8; 36] = [
        /* obj2 */
        240, 255, 255, 255, /* == -16, offset to dedupped vtable */
        99, 0, 88, 77, /* obj1 */
        248, 255, 255, 255, /* == -8, offset to dedupped vtable */
        66, 0, 55, 44, /* obj0 */
        12, 0, /* vtable size */
        8, 0, /* object size */
        0, 0, /* vtable[0]: absent */
        7, 0, /* vtable[1] */
        6, 0, /* vtable[2] */
        4, 0, /* vtable[3] */
        12, 0, 0, 0, /* vtable offset */
        33, 0, 22, 11,
    ];

    let mut fb = Builder::new(0);

    fb.object_begin(4);
    fb.object_prepend_u8(0, 0, 0);
    fb.object_prepend_u8(1, 11, 0);
    fb.object_prepend_u8(2, 22, 0);
    fb.object_prepend_i16(3, 33, 0);
    let obj0 = fb.object_end();

    fb.object_begin(4);
    fb.object_prepend_u8(0, 0, 0);
    fb.object_prepend_u8(1, 44, 0);
    fb.object_prepend_u8(2, 55, 0);
    fb.object_prepend_i16(3, 66, 0);
    let obj1 = fb.object_end();

    fb.object_begin(4);
    fb.object_prepend_u8(0, 0, 0);
    fb.object_prepend_u8(1, 77, 0);
    fb.object_prepend_u8(2, 88, 0);
    fb.object_prepend_i16(3, 99, 0);
    let obj2 = fb.object_end();

    assert_bytes(&expected, &fb);

    use axon_flatbuf::Table;
    let len = fb.len();

    let tbl = Table::at(fb.data(), len - obj0 as usize);
    assert_eq!(12, tbl.vtable_size());
    assert_eq!(11, tbl.read_u8(1, 0));
    assert_eq!(22, tbl.read_u8(2, 0));
    assert_eq!(33, tbl.read_u8(3, 0));

    let tbl = Table::at(fb.data(), len - obj1 as usize);
    assert_eq!(12, tbl.vtable_size());
    assert_eq!(44, tbl.read_u8(1, 0));
    assert_eq!(55, tbl.read_u8(2, 0));
    assert_eq!(66, tbl.read_u8(3, 0));

    let tbl = Table::at(fb.data(), len - obj2 as usize);
    assert_eq!(12, tbl.vtable_size());
    assert_eq!(77, tbl.read_u8(1, 0));
    assert_eq!(88, tbl.read_u8(2, 0));
    assert_eq!(99, tbl.read_u8(3, 0));
}

#[test]
fn prepend_bytes_matches_explicit_vector() {
    let payload: Vec<u8> = (0u8..30).collect();

    let mut a = Builder::new(0);
    a.vector_begin(1, payload.len(), 1);
    for &byte in payload.iter().rev() {
        a.prepend_u8(byte);
    }
    a.vector_end(payload.len());

    let mut b = Builder::new(0);
    b.prepend_bytes(&payload);

    assert_eq!(a.data(), b.data());
}
