// SPDX-License-Identifier: MIT OR Apache-2.0
//! Distributed tracing state carried by a transaction.

use axon_core::time::Ticks;
use rand::Rng;
use rand::rngs::SmallRng;

/// An accepted inbound distributed trace payload.
#[derive(Debug, Clone, Default)]
pub struct InboundPayload {
    /// The caller's span GUID; becomes the root span's parent id.
    pub guid: Option<String>,
    /// Caller entity type (`App`, `Browser`, `Mobile`).
    pub parent_type: Option<String>,
    /// Caller application id.
    pub app_id: Option<String>,
    /// Caller account id.
    pub account_id: Option<String>,
    /// Transport used for the call (`HTTP`, `Kafka`, ...).
    pub transport_type: Option<String>,
    /// Time spent in transit, when the payload carried a timestamp.
    pub transport_duration: Option<Ticks>,
    /// Vendors that handled the trace upstream.
    pub tracing_vendors: Option<String>,
    /// Trusted parent span id from upstream vendor state.
    pub trusted_parent_id: Option<String>,
}

/// Distributed tracing metadata for one transaction.
#[derive(Debug, Clone, Default)]
pub struct DistributedTrace {
    /// This transaction's GUID: the id of its root span.
    pub guid: String,
    /// Trace id shared by every span in the distributed trace.
    pub trace_id: String,
    /// Whether the trace is sampled.
    pub sampled: bool,
    /// Sampling priority in `[0, 2)`.
    pub priority: f64,
    /// The inbound payload, when this transaction was called with one.
    pub inbound: Option<InboundPayload>,
}

impl DistributedTrace {
    /// Fresh trace state with generated identifiers and a random
    /// priority.
    pub fn generate(rng: &mut SmallRng) -> Self {
        let guid = generate_guid(rng);
        let trace_id = format!("{guid}{}", generate_guid(rng));
        Self {
            guid,
            trace_id,
            sampled: false,
            priority: rng.r#gen::<f64>(),
            inbound: None,
        }
    }

    /// Accept an inbound payload, adopting its trace id.
    pub fn accept_inbound(&mut self, trace_id: Option<String>, payload: InboundPayload) {
        if let Some(trace_id) = trace_id {
            self.trace_id = trace_id;
        }
        self.inbound = Some(payload);
    }
}

/// A 16-hex-digit identifier.
pub fn generate_guid(rng: &mut SmallRng) -> String {
    format!("{:016x}", rng.r#gen::<u64>())
}
