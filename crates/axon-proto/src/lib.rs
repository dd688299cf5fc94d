// SPDX-License-Identifier: MIT OR Apache-2.0
//! axon-proto
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Wire format for talking to the daemon.
//!
//! Every message is a flatbuffer whose root object is a three-field
//! envelope: the agent run id, a body-type discriminant, and the body
//! itself. Three command kinds exist: application queries
//! ([`appinfo`]), end-of-transaction data ([`txndata`]), and encoded
//! span batches ([`span_batch`]). The framing preamble around a
//! completed buffer belongs to the transport layer.

pub mod appinfo;
pub mod span_batch;
pub mod txndata;

use axon_core::limits::MIN_FLATBUFFER_SIZE;
use axon_flatbuf::{Builder, Table, read_uoffset};
use thiserror::Error;

/// Envelope field index: optional agent run id string.
pub const MESSAGE_FIELD_AGENT_RUN_ID: usize = 0;
/// Envelope field index: body-type discriminant.
pub const MESSAGE_FIELD_DATA_TYPE: usize = 1;
/// Envelope field index: offset to the body object.
pub const MESSAGE_FIELD_DATA: usize = 2;
/// Number of envelope fields.
pub const MESSAGE_NUM_FIELDS: usize = 3;

/// Body types carried by the message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageBody {
    /// No body.
    None = 0,
    /// Application query.
    App = 1,
    /// Application query reply.
    AppReply = 2,
    /// End-of-transaction data.
    Txn = 3,
    /// Encoded span batch.
    SpanBatch = 4,
}

impl MessageBody {
    /// Decode a discriminant byte, mapping unknown values to `None`.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::App),
            2 => Some(Self::AppReply),
            3 => Some(Self::Txn),
            4 => Some(Self::SpanBatch),
            _ => None,
        }
    }
}

/// Errors arising while building or parsing daemon commands.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The message envelope carried an unexpected body type.
    #[error("unexpected message type, data_type={0}")]
    UnexpectedBodyType(u8),

    /// The message envelope had no body where one was required.
    #[error("{0} reply missing a body")]
    MissingBody(&'static str),

    /// A JSON payload embedded in a command failed to parse.
    #[error("bad {context} JSON: {source}")]
    BadJson {
        /// Which embedded payload failed.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A reply carried a status value outside the known set.
    #[error("reply has unknown status status={0}")]
    UnknownStatus(i8),

    /// The buffer's root offset does not fit within the frame.
    #[error("flatbuffer root offset is too large, offset={0}")]
    CorruptFrame(usize),
}

/// Check a completed buffer's root offset against its length.
///
/// Returns `true` when the root offset cannot fit within a frame of
/// `len` bytes; such a buffer must not be transmitted.
pub fn is_frame_corrupt(data: &[u8], len: usize) -> bool {
    if data.len() < axon_flatbuf::SIZE_UOFFSET {
        return true;
    }
    let offset = read_uoffset(data, 0) as usize;
    len.saturating_sub(MIN_FLATBUFFER_SIZE) <= offset
}

/// Wrap a completed body object in the message envelope and finish the
/// buffer.
pub fn finish_message(
    fb: &mut Builder,
    agent_run_id: Option<&str>,
    body: u32,
    body_type: MessageBody,
) {
    let run_id = match agent_run_id {
        Some(id) if !id.is_empty() => fb.prepend_string(id),
        _ => 0,
    };

    fb.object_begin(MESSAGE_NUM_FIELDS);
    fb.object_prepend_uoffset(MESSAGE_FIELD_DATA, body, 0);
    fb.object_prepend_u8(MESSAGE_FIELD_DATA_TYPE, body_type as u8, 0);
    fb.object_prepend_uoffset(MESSAGE_FIELD_AGENT_RUN_ID, run_id, 0);
    let message = fb.object_end();

    fb.finish(message);
}

/// A decoded message envelope.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    /// The agent run id, when present.
    pub agent_run_id: Option<&'a str>,
    /// The declared body type.
    pub data_type: u8,
    root: Table<'a>,
}

impl<'a> Envelope<'a> {
    /// Decode the envelope at the root of a completed buffer.
    pub fn decode(data: &'a [u8]) -> Self {
        let root = Table::from_root(data);
        Self {
            agent_run_id: root.read_str(MESSAGE_FIELD_AGENT_RUN_ID),
            data_type: root.read_u8(MESSAGE_FIELD_DATA_TYPE, MessageBody::None as u8),
            root,
        }
    }

    /// View the body object, or `None` when the body field is absent.
    pub fn body(&self) -> Option<Table<'a>> {
        self.root.read_union(MESSAGE_FIELD_DATA)
    }

    /// View the body after checking it has the expected type.
    pub fn expect_body(
        &self,
        expected: MessageBody,
        what: &'static str,
    ) -> Result<Table<'a>, ProtoError> {
        if self.data_type != expected as u8 {
            return Err(ProtoError::UnexpectedBodyType(self.data_type));
        }
        self.body().ok_or(ProtoError::MissingBody(what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_envelope_is_minimum_size() {
        let mut fb = Builder::new(0);
        fb.object_begin(MESSAGE_NUM_FIELDS);
        let message = fb.object_end();
        fb.finish(message);

        assert_eq!(MIN_FLATBUFFER_SIZE, fb.len());
    }

    #[test]
    fn corrupt_frame_is_detected() {
        let mut fb = Builder::new(0);
        fb.object_begin(MESSAGE_NUM_FIELDS);
        let message = fb.object_end();
        fb.finish(message);

        // A well-formed empty envelope is exactly the minimum size, whose
        // root offset does not fit "within" len - MIN_FLATBUFFER_SIZE.
        assert!(is_frame_corrupt(fb.data(), fb.len()));

        let mut fb = Builder::new(0);
        let body = {
            fb.object_begin(0);
            fb.object_end()
        };
        finish_message(&mut fb, Some("12345"), body, MessageBody::App);
        assert!(!is_frame_corrupt(fb.data(), fb.len()));
    }

    #[test]
    fn envelope_round_trip() {
        let mut fb = Builder::new(0);
        let body = {
            fb.object_begin(1);
            fb.object_prepend_u8(0, 7, 0);
            fb.object_end()
        };
        finish_message(&mut fb, Some("run-42"), body, MessageBody::Txn);

        let envelope = Envelope::decode(fb.data());
        assert_eq!(Some("run-42"), envelope.agent_run_id);
        assert_eq!(MessageBody::Txn as u8, envelope.data_type);
        let body = envelope
            .expect_body(MessageBody::Txn, "TXNDATA")
            .expect("body should parse");
        assert_eq!(7, body.read_u8(0, 0));
    }

    #[test]
    fn empty_run_id_is_omitted() {
        let mut fb = Builder::new(0);
        let body = {
            fb.object_begin(0);
            fb.object_end()
        };
        finish_message(&mut fb, Some(""), body, MessageBody::App);

        let envelope = Envelope::decode(fb.data());
        assert_eq!(None, envelope.agent_run_id);
    }
}
