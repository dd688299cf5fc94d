// SPDX-License-Identifier: MIT OR Apache-2.0
//! The span batch command: an opaque, externally encoded batch of span
//! events forwarded to the daemon for trace-observer transport.

use crate::{Envelope, MessageBody, ProtoError, finish_message};
use axon_flatbuf::Builder;

/// SpanBatch body field indices.
mod field {
    pub const ENCODED: usize = 0;
    pub const COUNT: usize = 1;
    pub const NUM_FIELDS: usize = 2;
}

/// A parsed span batch body.
#[derive(Debug, Clone)]
pub struct SpanBatch {
    /// The opaque batch payload produced by the span encoder.
    pub encoded: Vec<u8>,
    /// The number of spans in the payload.
    pub count: u64,
}

/// Encode a complete span batch message.
pub fn encode(agent_run_id: &str, encoded: &[u8], count: u64) -> Builder {
    let mut fb = Builder::new(0);

    let payload = fb.prepend_bytes(encoded);
    fb.object_begin(field::NUM_FIELDS);
    fb.object_prepend_uoffset(field::ENCODED, payload, 0);
    fb.object_prepend_u64(field::COUNT, count, 0);
    let batch = fb.object_end();

    finish_message(&mut fb, Some(agent_run_id), batch, MessageBody::SpanBatch);
    fb
}

/// Decode a span batch message.
pub fn decode(data: &[u8]) -> Result<(Option<String>, SpanBatch), ProtoError> {
    let envelope = Envelope::decode(data);
    let body = envelope.expect_body(MessageBody::SpanBatch, "SPAN_BATCH")?;

    Ok((
        envelope.agent_run_id.map(str::to_owned),
        SpanBatch {
            encoded: body.read_bytes(field::ENCODED).unwrap_or_default().to_vec(),
            count: body.read_u64(field::COUNT, 0),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_round_trip() {
        let fb = encode("8917f979c4cf777", b"\x0a\x0b\x0c", 3);
        let (run_id, batch) = decode(fb.data()).expect("batch should decode");

        assert_eq!(Some("8917f979c4cf777".to_owned()), run_id);
        assert_eq!(b"\x0a\x0b\x0c".to_vec(), batch.encoded);
        assert_eq!(3, batch.count);
    }

    #[test]
    fn txn_message_is_not_a_span_batch() {
        let fb = crate::txndata::encode(&crate::txndata::TxnPayload {
            name: "t".into(),
            ..Default::default()
        });
        assert!(decode(fb.data()).is_err());
    }
}
