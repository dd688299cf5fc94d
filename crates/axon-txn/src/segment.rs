// SPDX-License-Identifier: MIT OR Apache-2.0
//! Segment data: the nodes of a transaction's trace tree.
//!
//! Historically segments have also been called nodes or trace nodes; the
//! words are interchangeable here. Segments may be created automatically by
//! instrumentation or programmatically through the public transaction API.

use crate::arena::SegmentId;
use crate::attrs::AttributeSet;
use crate::exclusive::ExclusiveTime;
use crate::strings::StringId;
use axon_core::time::Ticks;

/// Priority flag: the segment is the transaction's root.
pub const PRIORITY_ROOT: u32 = 1 << 16;
/// Priority flag: the segment's id went out in a distributed trace payload.
pub const PRIORITY_DT: u32 = 1 << 15;
/// Priority flag: the segment's id went out in a log payload.
pub const PRIORITY_LOG: u32 = 1 << 14;
/// Priority flag: the segment carries user attributes.
pub const PRIORITY_ATTR: u32 = 1 << 13;

/// What kind of work a segment describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentType {
    /// Plain timed work.
    #[default]
    Custom,
    /// A datastore operation.
    Datastore,
    /// An outbound HTTP call.
    External,
}

/// Traversal coloring.
///
/// Re-parenting is user-directed, so a cycle can exist in a malformed
/// tree. Nodes are colored during traversal to guarantee termination; two
/// successive traversals of the same tree use opposite colors, so the
/// color carries no meaning outside a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    /// Not visited by the current traversal.
    #[default]
    White,
    /// Visited by the current traversal.
    Grey,
}

impl Color {
    /// The other color.
    pub fn toggled(self) -> Self {
        match self {
            Self::White => Self::Grey,
            Self::Grey => Self::White,
        }
    }
}

/// Datastore instance location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatastoreInstance {
    /// Database host.
    pub host: Option<String>,
    /// Port, socket path, or instance id.
    pub port_path_or_id: Option<String>,
    /// Database name.
    pub database_name: Option<String>,
}

/// Attributes specific to datastore segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatastoreAttributes {
    /// The database vendor or driver.
    pub component: Option<String>,
    /// Raw SQL, when raw recording is allowed.
    pub sql: Option<String>,
    /// Obfuscated SQL.
    pub sql_obfuscated: Option<String>,
    /// Input query JSON (for ORMs that transform queries).
    pub input_query_json: Option<String>,
    /// Backtrace JSON captured at the call site.
    pub backtrace_json: Option<String>,
    /// Explain plan JSON.
    pub explain_plan_json: Option<String>,
    /// Instance location.
    pub instance: DatastoreInstance,
}

/// Attributes specific to external (outbound HTTP) segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalAttributes {
    /// GUID of the downstream transaction, when known.
    pub transaction_guid: Option<String>,
    /// Request URI.
    pub uri: Option<String>,
    /// HTTP client library.
    pub library: Option<String>,
    /// HTTP method.
    pub procedure: Option<String>,
    /// Response status code.
    pub status: u64,
}

/// Type-specific attributes; only one variant is live at a time so a
/// datastore segment never reserves space for external fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedAttributes {
    /// Datastore specifics.
    Datastore(DatastoreAttributes),
    /// External call specifics.
    External(ExternalAttributes),
}

/// An error recorded against a single segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentError {
    /// The error message shown on the span event. May be a sentinel when
    /// raw messages are disallowed.
    pub message: Option<String>,
    /// The error class.
    pub class: String,
}

/// A metric to materialize from this segment's duration at harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMetric {
    /// Full metric name.
    pub name: String,
    /// Whether the metric is scoped to the transaction.
    pub scoped: bool,
}

/// One node in the transaction's segment tree.
///
/// Start and stop times are offsets relative to the owning transaction's
/// absolute start time; a zero stop time means the segment is still
/// running.
#[derive(Debug, Default)]
pub struct Segment {
    /// The segment kind; decides which typed attributes apply.
    pub ty: SegmentType,
    /// Parent segment; `None` only for the transaction root.
    pub parent: Option<SegmentId>,
    /// Ordered children.
    pub children: Vec<SegmentId>,
    /// This segment's position within `parent.children`.
    pub child_ix: usize,
    /// Traversal coloring.
    pub color: Color,
    /// Start offset relative to the transaction start.
    pub start_time: Ticks,
    /// Stop offset relative to the transaction start; zero while active.
    pub stop_time: Ticks,
    /// Interned segment name.
    pub name: Option<StringId>,
    /// Interned asynchronous context name, when off the main context.
    pub async_context: Option<StringId>,
    /// Span id. Generated lazily when a span event will be emitted; set
    /// eagerly when the id was used in an outbound trace payload.
    pub id: Option<String>,
    /// Metrics to create from this segment's duration.
    pub metrics: Vec<SegmentMetric>,
    /// Exclusive-time accumulator; non-empty only during harvest.
    pub exclusive_time: Option<ExclusiveTime>,
    /// User attributes destined for the span event.
    pub attributes: Option<AttributeSet>,
    /// User attributes destined for the transaction event.
    pub attributes_txn_event: Option<AttributeSet>,
    /// Priority flags steering span-event selection.
    pub priority: u32,
    /// Datastore or external specifics.
    pub typed_attributes: Option<Box<TypedAttributes>>,
    /// Segment error attributes.
    pub error: Option<SegmentError>,
}

impl Segment {
    /// The segment's duration, zero while it is still running or when its
    /// timing is inverted.
    pub fn duration(&self) -> Ticks {
        self.stop_time.saturating_sub(self.start_time)
    }

    /// Set a priority flag.
    pub fn set_priority_flag(&mut self, flag: u32) {
        self.priority |= flag;
    }

    /// The current priority flag set.
    pub fn priority_flags(&self) -> u32 {
        self.priority
    }

    /// Borrow the datastore attributes, when this is a datastore segment.
    pub fn datastore(&self) -> Option<&DatastoreAttributes> {
        match self.typed_attributes.as_deref() {
            Some(TypedAttributes::Datastore(attrs)) => Some(attrs),
            _ => None,
        }
    }

    /// Borrow the external attributes, when this is an external segment.
    pub fn external(&self) -> Option<&ExternalAttributes> {
        match self.typed_attributes.as_deref() {
            Some(TypedAttributes::External(attrs)) => Some(attrs),
            _ => None,
        }
    }
}
