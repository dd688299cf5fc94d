// SPDX-License-Identifier: MIT OR Apache-2.0
//! axon-txn
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The per-request core of the agent: a slab-allocated tree of timed
//! segments with per-context parent stacks and user-directed re-parenting,
//! the transaction lifecycle that owns it, and the two-pass harvest
//! selector that turns a finished tree into a transaction trace and a set
//! of span events.
//!
//! A transaction is single-threaded by contract: it carries no lock, and
//! exactly one thread may touch it between `begin` and `end`.

pub mod arena;
pub mod attrs;
pub mod dt;
pub mod events;
pub mod exclusive;
pub mod harvest;
pub mod heap;
pub mod metrics;
pub mod segment;
pub mod span;
pub mod strings;
pub mod transmit;
pub mod txn;

pub use arena::SegmentId;
pub use attrs::{AttributeConfig, AttributeSet};
pub use dt::{DistributedTrace, InboundPayload};
pub use segment::{
    DatastoreAttributes, DatastoreInstance, ExternalAttributes, Segment, SegmentType,
};
pub use span::{SpanCategory, SpanEvent};
pub use transmit::{TransmitError, build_txn_payload, send_span_batch, send_txn_data};
pub use txn::{FinalData, Transaction, TxnError, TxnStatus};
