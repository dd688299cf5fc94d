// SPDX-License-Identifier: MIT OR Apache-2.0
//! The transaction controller: lifecycle, segment tree operations, and
//! per-context parent stacks.
//!
//! A transaction has no internal lock; exactly one thread manipulates it.
//! The embedding host guarantees this.

use crate::arena::{SegmentArena, SegmentId};
use crate::attrs::{AttributeConfig, AttributeSet};
use crate::dt::DistributedTrace;
use crate::events::{EventBuffer, SlowSqls};
use crate::exclusive::ExclusiveTime;
use crate::heap::BoundedHeap;
use crate::metrics::MetricTable;
use crate::segment::{
    Color, DatastoreAttributes, ExternalAttributes, PRIORITY_ATTR, PRIORITY_ROOT, Segment,
    SegmentError, SegmentMetric, SegmentType, TypedAttributes,
};
use crate::span::SpanEvent;
use crate::strings::{StringId, StringPool};
use axon_core::config::{EventLimits, TxnOptions};
use axon_core::time::{self, Ticks};
use axon_registry::AppHandle;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Error message substituted when high-security mode is on.
pub const HIGH_SECURITY_ERROR_MESSAGE: &str = "Message removed by high security setting";

/// Error message substituted when raw exception messages are disallowed.
pub const RAW_MESSAGE_DISALLOWED: &str = "Message removed by message parameters setting";

/// Transaction status flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxnStatus {
    /// Whether segments are currently being recorded.
    pub recording: bool,
    /// Whether the transaction name is final.
    pub path_is_frozen: bool,
    /// Whether this transaction should be dropped at the end.
    pub ignore: bool,
    /// Whether this is a background job rather than a web transaction.
    pub background: bool,
    /// Whether the transaction has ended.
    pub complete: bool,
}

/// The captured transaction error. At most one is kept, by priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnError {
    /// Priority used when merging errors across workers.
    pub priority: i32,
    /// The (possibly redacted) error message.
    pub message: String,
    /// The error class.
    pub class: String,
}

/// Data products generated when the transaction ends.
#[derive(Debug, Default)]
pub struct FinalData {
    /// The trace JSON, when a trace was selected.
    pub trace_json: Option<String>,
    /// Selected span events.
    pub span_events: Vec<SpanEvent>,
    /// Sum of all segments' exclusive time.
    pub total_time: Ticks,
}

/// CPU usage snapshots supplied by the embedding host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuUsage {
    /// User time at transaction start.
    pub user_start: Ticks,
    /// User time at transaction end.
    pub user_end: Ticks,
    /// System time at transaction start.
    pub sys_start: Ticks,
    /// System time at transaction end.
    pub sys_end: Ticks,
}

pub(crate) enum Visit {
    Pre(SegmentId),
    Post(SegmentId),
}

/// One request's worth of recorded work.
pub struct Transaction {
    /// Per-transaction options, copied from the application at start.
    pub options: TxnOptions,
    /// Status flags.
    pub status: TxnStatus,
    /// Absolute wall-clock start in microseconds; all segment times are
    /// relative to this.
    pub abs_start_time: Ticks,
    pub(crate) arena: SegmentArena,
    /// The root of the segment tree.
    pub(crate) segment_root: Option<SegmentId>,
    /// Count of segments ended during this transaction.
    pub segment_count: usize,
    default_parent_stack: Vec<SegmentId>,
    parent_stacks: HashMap<StringId, Vec<SegmentId>>,
    force_current_segment: Option<SegmentId>,
    segment_heap: Option<BoundedHeap<(u32, Ticks)>>,
    pub(crate) scoped_metrics: MetricTable,
    pub(crate) unscoped_metrics: MetricTable,
    pub(crate) trace_strings: StringPool,
    /// Custom events recorded through the API.
    pub custom_events: EventBuffer,
    /// Forwarded log events.
    pub log_events: EventBuffer,
    /// The captured error, if any.
    pub error: Option<TxnError>,
    /// Slow SQL log.
    pub slow_sqls: SlowSqls,
    /// Transaction-level user and agent attributes.
    pub attributes: AttributeSet,
    pub(crate) attribute_config: AttributeConfig,
    /// Distributed tracing state.
    pub distributed_trace: DistributedTrace,
    /// Full transaction metric name.
    pub name: String,
    /// Request URI, when known.
    pub request_uri: Option<String>,
    /// Synthetics resource id, when the request carried one.
    pub synthetics_resource_id: Option<String>,
    /// Detected package inventory, pre-serialized by the host.
    pub packages_json: Option<String>,
    pub(crate) rng: SmallRng,
    /// Application event limits in force for this transaction.
    pub limits: EventLimits,
    /// Whether the owning application is in high-security mode.
    pub high_security: bool,
    /// The application's run id at transaction start.
    pub agent_run_id: Option<String>,
    /// CPU snapshots supplied by the host.
    pub cpu: CpuUsage,
    /// Artifacts produced by [`end`](Transaction::end).
    pub final_data: FinalData,
    pub(crate) warned_exclusive_skip: bool,
}

impl Transaction {
    /// Begin a transaction against a connected application.
    pub fn begin(app: &AppHandle, options: TxnOptions, attribute_config: AttributeConfig) -> Self {
        let (limits, high_security, agent_run_id, seed) = {
            let mut app = app.lock();
            (
                app.limits,
                app.info.high_security,
                app.agent_run_id.clone(),
                app.rng_seed(),
            )
        };
        Self::begin_with(options, attribute_config, limits, high_security, agent_run_id, seed)
    }

    /// Begin a transaction from raw parts, for hosts that manage
    /// application state themselves and for tests.
    pub fn begin_with(
        options: TxnOptions,
        attribute_config: AttributeConfig,
        limits: EventLimits,
        high_security: bool,
        agent_run_id: Option<String>,
        seed: u64,
    ) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut distributed_trace = DistributedTrace::generate(&mut rng);
        distributed_trace.sampled = options.distributed_tracing_enabled;

        let custom_cap = if options.custom_events_enabled {
            options
                .custom_events_max_samples_stored
                .min(limits.custom.max(0) as usize)
        } else {
            0
        };
        let log_cap = if options.logging_enabled && options.log_forwarding_enabled {
            options
                .log_events_max_samples_stored
                .min(limits.log.max(0) as usize)
        } else {
            0
        };

        let segment_heap = if options.max_segments > 1 {
            Some(BoundedHeap::new(options.max_segments))
        } else {
            None
        };

        let mut txn = Self {
            options,
            status: TxnStatus {
                recording: true,
                ..TxnStatus::default()
            },
            abs_start_time: time::wall_clock_now(),
            arena: SegmentArena::new(),
            segment_root: None,
            segment_count: 0,
            default_parent_stack: Vec::new(),
            parent_stacks: HashMap::new(),
            force_current_segment: None,
            segment_heap,
            scoped_metrics: MetricTable::new(),
            unscoped_metrics: MetricTable::new(),
            trace_strings: StringPool::new(),
            custom_events: EventBuffer::new(custom_cap),
            log_events: EventBuffer::new(log_cap),
            error: None,
            slow_sqls: SlowSqls::new(),
            attributes: AttributeSet::new(attribute_config),
            attribute_config,
            distributed_trace,
            name: String::new(),
            request_uri: None,
            synthetics_resource_id: None,
            packages_json: None,
            rng,
            limits,
            high_security,
            agent_run_id,
            cpu: CpuUsage::default(),
            final_data: FinalData::default(),
            warned_exclusive_skip: false,
        };

        let root = txn.arena.allocate(Segment {
            priority: PRIORITY_ROOT,
            ..Segment::default()
        });
        txn.segment_root = Some(root);
        txn.default_parent_stack.push(root);
        txn
    }

    /// Microseconds elapsed since the transaction started.
    pub fn now_rel(&self) -> Ticks {
        time::wall_clock_now().saturating_sub(self.abs_start_time)
    }

    /// The root segment.
    pub fn root(&self) -> Option<SegmentId> {
        self.segment_root
    }

    /// Total segment allocations observed by the arena.
    pub fn allocated_segments(&self) -> usize {
        self.arena.count()
    }

    /// Borrow a segment.
    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.arena.get(id)
    }

    /// Mutably borrow a segment.
    pub fn segment_mut(&mut self, id: SegmentId) -> Option<&mut Segment> {
        self.arena.get_mut(id)
    }

    /// The transaction duration: the root segment's duration, or the time
    /// elapsed so far while the root is still running.
    pub fn duration(&self) -> Ticks {
        match self.segment_root.and_then(|root| self.arena.get(root)) {
            Some(root) if root.stop_time != 0 => root.duration(),
            _ => self.now_rel(),
        }
    }

    /// Override the current segment for the default context. The override
    /// wins over the parent stack until cleared with `None`.
    pub fn set_force_current_segment(&mut self, segment: Option<SegmentId>) {
        self.force_current_segment = segment;
    }

    // ── Parent stacks ───────────────────────────────────────────────

    fn stack(&self, context: Option<StringId>) -> Option<&Vec<SegmentId>> {
        match context {
            None => Some(&self.default_parent_stack),
            Some(ctx) => self.parent_stacks.get(&ctx),
        }
    }

    fn current_for(&self, context: Option<StringId>) -> Option<SegmentId> {
        if context.is_none()
            && let Some(forced) = self.force_current_segment
        {
            return Some(forced);
        }
        self.stack(context).and_then(|stack| stack.last().copied())
    }

    fn push_current(&mut self, context: Option<StringId>, segment: SegmentId) {
        match context {
            None => self.default_parent_stack.push(segment),
            Some(ctx) => self.parent_stacks.entry(ctx).or_default().push(segment),
        }
    }

    /// Pop `segment` from its context's stack, but only when it is the
    /// current segment there.
    fn retire_current(&mut self, context: Option<StringId>, segment: SegmentId) {
        let stack = match context {
            None => &mut self.default_parent_stack,
            Some(ctx) => match self.parent_stacks.get_mut(&ctx) {
                Some(stack) => stack,
                None => return,
            },
        };
        if stack.last() == Some(&segment) {
            stack.pop();
        }
    }

    /// The current segment for a context name, or for the default context
    /// when `context` is `None`.
    pub fn current_segment(&self, context: Option<&str>) -> Option<SegmentId> {
        let ctx = match context {
            None => None,
            Some(name) => match self.trace_strings.find(name) {
                Some(id) => Some(id),
                None => return None,
            },
        };
        self.current_for(ctx)
    }

    // ── Tree links ──────────────────────────────────────────────────

    fn link_child(&mut self, parent: SegmentId, child: SegmentId) {
        let ix = match self.arena.get_mut(parent) {
            Some(p) => {
                p.children.push(child);
                p.children.len() - 1
            }
            None => return,
        };
        if let Some(c) = self.arena.get_mut(child) {
            c.parent = Some(parent);
            c.child_ix = ix;
        }
    }

    /// Remove `child` from `parent`'s children; the vacated slot is filled
    /// by the last sibling, whose `child_ix` is rewritten.
    fn unlink_child(&mut self, parent: SegmentId, child: SegmentId) -> bool {
        let recorded_ix = match self.arena.get(child) {
            Some(c) => c.child_ix,
            None => return false,
        };
        let Some(p) = self.arena.get_mut(parent) else {
            return false;
        };

        let ix = if p.children.get(recorded_ix) == Some(&child) {
            recorded_ix
        } else {
            match p.children.iter().position(|&c| c == child) {
                Some(ix) => ix,
                None => return false,
            }
        };

        p.children.swap_remove(ix);
        let moved = p.children.get(ix).copied();
        if let Some(moved) = moved
            && let Some(m) = self.arena.get_mut(moved)
        {
            m.child_ix = ix;
        }
        true
    }

    // ── Segment lifecycle ───────────────────────────────────────────

    /// Allocate and start a segment.
    ///
    /// With an explicit parent the segment attaches there directly and the
    /// parent stacks are left alone. Otherwise the segment attaches to the
    /// current segment of `async_context` and becomes current there; a new
    /// async context parents to whatever is current on the main context.
    pub fn start_segment(
        &mut self,
        explicit_parent: Option<SegmentId>,
        async_context: Option<&str>,
    ) -> Option<SegmentId> {
        if !self.status.recording {
            return None;
        }

        let start_time = self.now_rel();
        let context = async_context.map(|name| self.trace_strings.add(name));

        let id = self.arena.allocate(Segment {
            color: Color::White,
            ty: SegmentType::Custom,
            start_time,
            async_context: context,
            ..Segment::default()
        });

        if let Some(parent) = explicit_parent {
            if self.arena.get(parent).is_none() {
                self.arena.release(id);
                return None;
            }
            self.link_child(parent, id);
            return Some(id);
        }

        let parent = match self.current_for(context) {
            Some(current) => Some(current),
            // A new async context is parented to whatever is current on
            // the main context.
            None if context.is_some() => self.current_for(None),
            None => None,
        };
        if let Some(parent) = parent {
            self.link_child(parent, id);
        }
        self.push_current(context, id);

        Some(id)
    }

    /// End a segment: fix its stop time, retire it from its parent stack,
    /// and enter it into the bounded retention heap when one is active.
    pub fn end_segment(&mut self, id: SegmentId) -> bool {
        let now_rel = self.now_rel();

        let (context, key) = match self.arena.get_mut(id) {
            Some(segment) => {
                if segment.stop_time == 0 {
                    segment.stop_time = now_rel;
                }
                (segment.async_context, (segment.priority, segment.duration()))
            }
            None => {
                debug!(target: "axon.txn", "cannot end null segment");
                return false;
            }
        };

        self.segment_count += 1;
        self.retire_current(context, id);

        let evicted = match &mut self.segment_heap {
            Some(heap) => heap.insert(key, id),
            None => None,
        };
        if let Some(evicted) = evicted {
            self.discard_for_capacity(evicted);
        }

        true
    }

    /// Discard a segment, merging any metrics it carries and re-parenting
    /// its children to its parent. The root cannot be discarded, nor can
    /// anything after the transaction has ended.
    pub fn discard_segment(&mut self, id: SegmentId) -> bool {
        if self.status.complete {
            return false;
        }
        let Some(segment) = self.arena.get(id) else {
            return false;
        };
        if segment.parent.is_none() {
            warn!(target: "axon.txn", "illegal action: tried to discard the root segment");
            return false;
        }

        let context = segment.async_context;
        self.retire_current(context, id);
        self.discard_impl(id)
    }

    /// Capacity eviction from the retention heap: like a discard, minus
    /// the stack retirement (the segment already ended).
    fn discard_for_capacity(&mut self, id: SegmentId) {
        let Some(segment) = self.arena.get(id) else {
            return;
        };
        if segment.parent.is_none() {
            return;
        }
        self.discard_impl(id);
    }

    fn discard_impl(&mut self, id: SegmentId) -> bool {
        let has_metrics = self
            .arena
            .get(id)
            .is_some_and(|segment| !segment.metrics.is_empty());
        if has_metrics {
            self.discard_merge_metrics(id);
        }

        let (parent, children) = match self.arena.get(id) {
            Some(segment) => (
                segment.parent.expect("checked by callers"),
                segment.children.clone(),
            ),
            None => return false,
        };

        if !self.unlink_child(parent, id) {
            return false;
        }
        for child in children {
            self.link_child(parent, child);
        }

        self.arena.release(id);
        true
    }

    /// Merge a discarded segment's metrics into the transaction tables.
    ///
    /// In the capped regime the exclusive-time calculation is skipped: the
    /// accumulators could otherwise grow without bound, so metric
    /// exclusive time is reported as zero and one warning per transaction
    /// is emitted. Uncapped, the full calculation runs and this segment's
    /// interval is folded into its parent's accumulator.
    fn discard_merge_metrics(&mut self, id: SegmentId) {
        let (duration, start, stop, context, parent, children, metrics) =
            match self.arena.get(id) {
                Some(segment) => {
                    if segment.stop_time < segment.start_time {
                        return;
                    }
                    (
                        segment.duration(),
                        segment.start_time,
                        segment.stop_time,
                        segment.async_context,
                        segment.parent,
                        segment.children.clone(),
                        segment.metrics.clone(),
                    )
                }
                None => return,
            };
        let Some(parent) = parent else { return };

        if self.options.max_segments > 1 {
            for metric in &metrics {
                self.merge_metric(metric, duration, 0);
            }
            if !self.warned_exclusive_skip {
                warn!(
                    target: "axon.txn",
                    "skipping metric exclusive time calculation due to segment limit"
                );
                self.warned_exclusive_skip = true;
            }
            return;
        }

        if !children.is_empty() {
            let child_windows: Vec<(Ticks, Ticks)> = children
                .iter()
                .filter_map(|&child| self.arena.get(child))
                .filter(|child| child.async_context == context)
                .map(|child| (child.start_time, child.stop_time))
                .collect();

            let segment = self.arena.get_mut(id).expect("segment exists");
            let exclusive = segment
                .exclusive_time
                .get_or_insert_with(|| ExclusiveTime::new(children.len(), start, stop));
            for (child_start, child_stop) in child_windows {
                exclusive.add_child(child_start, child_stop);
            }
        }

        // A leaf of the metric tree has no accumulator; its exclusive time
        // is its duration.
        let exclusive_time = match self.arena.get(id).and_then(|s| s.exclusive_time.as_ref()) {
            Some(exclusive) => exclusive.calculate(),
            None => duration,
        };

        let parent_matches_context = self
            .arena
            .get(parent)
            .is_some_and(|p| p.async_context == context);
        if parent_matches_context {
            let (p_children, p_start, p_stop) = {
                let p = self.arena.get(parent).expect("parent exists");
                (p.children.len(), p.start_time, p.stop_time)
            };
            let p = self.arena.get_mut(parent).expect("parent exists");
            p.exclusive_time
                .get_or_insert_with(|| ExclusiveTime::new(p_children, p_start, p_stop))
                .add_child(start, stop);
        }

        for metric in &metrics {
            self.merge_metric(metric, duration, exclusive_time);
        }
    }

    pub(crate) fn merge_metric(&mut self, metric: &SegmentMetric, duration: Ticks, exclusive: Ticks) {
        if metric.scoped {
            self.scoped_metrics.add(&metric.name, duration, exclusive);
        } else {
            self.unscoped_metrics.add(&metric.name, duration, exclusive);
        }
    }

    // ── Segment mutation ────────────────────────────────────────────

    /// Set a segment's name.
    pub fn set_segment_name(&mut self, id: SegmentId, name: &str) -> bool {
        let interned = self.trace_strings.add(name);
        match self.arena.get_mut(id) {
            Some(segment) => {
                segment.name = Some(interned);
                true
            }
            None => false,
        }
    }

    /// Override a segment's timing.
    pub fn set_segment_timing(&mut self, id: SegmentId, start: Ticks, duration: Ticks) -> bool {
        match self.arena.get_mut(id) {
            Some(segment) => {
                segment.start_time = start;
                segment.stop_time = start + duration;
                true
            }
            None => false,
        }
    }

    /// Append a metric to materialize from a segment's duration.
    pub fn add_segment_metric(&mut self, id: SegmentId, name: &str, scoped: bool) -> bool {
        match self.arena.get_mut(id) {
            Some(segment) => {
                if segment.metrics.is_empty() {
                    // Four covers the scoped and unscoped rollup pairs an
                    // instrumented segment typically creates.
                    segment.metrics.reserve(4);
                }
                segment.metrics.push(SegmentMetric {
                    name: name.to_owned(),
                    scoped,
                });
                true
            }
            None => false,
        }
    }

    /// Re-parent `segment` under `parent`.
    ///
    /// Fails when that would introduce a cycle: the target parent must not
    /// be reachable from `segment` by walking parent links.
    pub fn set_parent(&mut self, segment: SegmentId, parent: SegmentId) -> bool {
        if self.arena.get(segment).is_none() || self.arena.get(parent).is_none() {
            return false;
        }
        if self.arena.get(segment).and_then(|s| s.parent) == Some(parent) {
            return true;
        }

        let mut ancestor = Some(parent);
        while let Some(current) = ancestor {
            if current == segment {
                warn!(
                    target: "axon.txn",
                    "cannot set segment parent: it would introduce a cycle \
                     into the call-stack representation"
                );
                return false;
            }
            ancestor = self.arena.get(current).and_then(|s| s.parent);
        }

        if let Some(old_parent) = self.arena.get(segment).and_then(|s| s.parent) {
            self.unlink_child(old_parent, segment);
        }
        self.link_child(parent, segment);
        true
    }

    /// Attach `child` under `parent`; a convenience over
    /// [`set_parent`](Transaction::set_parent).
    pub fn add_child(&mut self, parent: SegmentId, child: SegmentId) -> bool {
        self.set_parent(child, parent)
    }

    /// Mark a segment as plain custom work, dropping typed attributes.
    pub fn set_segment_custom(&mut self, id: SegmentId) -> bool {
        match self.arena.get_mut(id) {
            Some(segment) => {
                segment.typed_attributes = None;
                segment.ty = SegmentType::Custom;
                true
            }
            None => false,
        }
    }

    /// Mark a segment as a datastore operation, copying the attributes.
    pub fn set_segment_datastore(&mut self, id: SegmentId, attrs: &DatastoreAttributes) -> bool {
        match self.arena.get_mut(id) {
            Some(segment) => {
                segment.typed_attributes =
                    Some(Box::new(TypedAttributes::Datastore(attrs.clone())));
                segment.ty = SegmentType::Datastore;
                true
            }
            None => false,
        }
    }

    /// Mark a segment as an external call, copying the attributes.
    pub fn set_segment_external(&mut self, id: SegmentId, attrs: &ExternalAttributes) -> bool {
        match self.arena.get_mut(id) {
            Some(segment) => {
                segment.typed_attributes = Some(Box::new(TypedAttributes::External(attrs.clone())));
                segment.ty = SegmentType::External;
                true
            }
            None => false,
        }
    }

    /// Record an error against a segment. The class is required; a missing
    /// message stays absent.
    pub fn set_segment_error(
        &mut self,
        id: SegmentId,
        message: Option<&str>,
        class: &str,
    ) -> bool {
        match self.arena.get_mut(id) {
            Some(segment) => {
                segment.error = Some(SegmentError {
                    message: message.map(str::to_owned),
                    class: class.to_owned(),
                });
                true
            }
            None => false,
        }
    }

    /// Record a caught exception against a segment, honoring error
    /// recording configuration and message redaction.
    pub fn record_segment_exception(
        &mut self,
        id: SegmentId,
        message: Option<&str>,
        class: &str,
    ) -> bool {
        if !self.options.err_enabled || !self.status.recording {
            return false;
        }

        let message = if self.high_security {
            Some(HIGH_SECURITY_ERROR_MESSAGE)
        } else if !self.options.allow_raw_exception_messages {
            Some(RAW_MESSAGE_DISALLOWED)
        } else {
            message
        };

        self.set_segment_error(id, message, class)
    }

    /// Add a user attribute destined for the span event. Removes any
    /// transaction-event attribute of the same name and raises the
    /// segment's span priority.
    pub fn segment_attributes_user_add(
        &mut self,
        id: SegmentId,
        destinations: u32,
        name: &str,
        value: Value,
    ) -> bool {
        let config = self.attribute_config;
        let Some(segment) = self.arena.get_mut(id) else {
            return false;
        };

        let added = segment
            .attributes
            .get_or_insert_with(|| AttributeSet::new(config))
            .user_add(destinations, name, value);
        if let Some(txn_event_attrs) = segment.attributes_txn_event.as_mut() {
            txn_event_attrs.user_remove(name);
        }
        segment.set_priority_flag(PRIORITY_ATTR);
        added
    }

    /// Add a user attribute that will be promoted onto the transaction
    /// event rather than the span event. Refused when a span attribute of
    /// the same name already exists.
    pub fn segment_attributes_user_txn_event_add(
        &mut self,
        id: SegmentId,
        destinations: u32,
        name: &str,
        value: Value,
    ) -> bool {
        let config = self.attribute_config;
        let Some(segment) = self.arena.get_mut(id) else {
            return false;
        };

        if segment
            .attributes
            .as_ref()
            .is_some_and(|attrs| attrs.user_exists(name))
        {
            return false;
        }

        let added = segment
            .attributes_txn_event
            .get_or_insert_with(|| AttributeSet::new(config))
            .user_add(destinations, name, value);
        segment.set_priority_flag(PRIORITY_ATTR);
        added
    }

    /// Lazily materialize a segment's span id.
    ///
    /// Ids are only generated when span events will actually be created;
    /// otherwise `None` is returned and the segment stays anonymous.
    pub fn ensure_segment_id(&mut self, id: SegmentId) -> Option<String> {
        if self.arena.get(id)?.id.is_none() {
            if !self.should_create_span_events() {
                return None;
            }
            let guid = crate::dt::generate_guid(&mut self.rng);
            self.arena.get_mut(id)?.id = Some(guid);
        }
        self.arena.get(id)?.id.clone()
    }

    /// Whether span events will be generated for this transaction.
    pub fn should_create_span_events(&self) -> bool {
        self.options.span_events_enabled
            && self.options.distributed_tracing_enabled
            && self.distributed_trace.sampled
    }

    // ── Event recording ─────────────────────────────────────────────

    /// Record a custom event, already serialized by the event sink.
    pub fn record_custom_event(&mut self, json: String) {
        if self.status.recording {
            self.custom_events.add(json, &mut self.rng);
        }
    }

    /// Record a log event, already serialized by the log sink.
    pub fn record_log_event(&mut self, json: String) {
        if self.status.recording {
            self.log_events.add(json, &mut self.rng);
        }
    }

    /// Record the transaction error; a higher priority replaces a lower
    /// one. Message redaction follows the same rules as segment errors.
    pub fn record_error(&mut self, priority: i32, message: &str, class: &str) {
        if !self.options.err_enabled || !self.status.recording {
            return;
        }
        if self
            .error
            .as_ref()
            .is_some_and(|existing| existing.priority >= priority)
        {
            return;
        }

        let message = if self.high_security {
            HIGH_SECURITY_ERROR_MESSAGE
        } else if !self.options.allow_raw_exception_messages {
            RAW_MESSAGE_DISALLOWED
        } else {
            message
        };

        self.error = Some(TxnError {
            priority,
            message: message.to_owned(),
            class: class.to_owned(),
        });
    }

    /// Record one slow SQL statement.
    pub fn record_slow_sql(
        &mut self,
        sql_id: u32,
        duration: Ticks,
        metric: &str,
        query: &str,
        params_json: &str,
    ) {
        if self.options.tt_slowsql && self.status.recording {
            self.slow_sqls.add(sql_id, duration, metric, query, params_json);
        }
    }

    /// Set the transaction name. Ignored once the path is frozen.
    pub fn set_name(&mut self, name: &str) {
        if !self.status.path_is_frozen {
            self.name = name.to_owned();
        }
    }

    /// Freeze the transaction name against further changes.
    pub fn freeze_name(&mut self) {
        self.status.path_is_frozen = true;
    }

    // ── Traversal ───────────────────────────────────────────────────

    /// Compute a pre/post traversal order over the tree rooted at `root`.
    ///
    /// Nodes are recolored with the toggle of the root's current color and
    /// already-toggled nodes are skipped, so traversal terminates exactly
    /// once per reachable node even when user re-parenting has produced a
    /// cycle.
    pub(crate) fn traversal_order(&mut self, root: SegmentId) -> Vec<Visit> {
        let Some(root_color) = self.arena.get(root).map(|s| s.color) else {
            return Vec::new();
        };
        let visited_color = root_color.toggled();

        let mut order = Vec::new();
        let mut stack = vec![Visit::Pre(root)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Pre(id) => {
                    let Some(segment) = self.arena.get_mut(id) else {
                        continue;
                    };
                    if segment.color == visited_color {
                        continue;
                    }
                    segment.color = visited_color;

                    order.push(Visit::Pre(id));
                    stack.push(Visit::Post(id));
                    let children = segment.children.clone();
                    for &child in children.iter().rev() {
                        stack.push(Visit::Pre(child));
                    }
                }
                Visit::Post(id) => order.push(Visit::Post(id)),
            }
        }
        order
    }

    /// Visit every reachable segment once in pre-order.
    pub fn for_each_segment(&mut self, mut f: impl FnMut(SegmentId, &Segment)) {
        let Some(root) = self.segment_root else { return };
        for visit in self.traversal_order(root) {
            if let Visit::Pre(id) = visit
                && let Some(segment) = self.arena.get(id)
            {
                f(id, segment);
            }
        }
    }

    // ── End of transaction ──────────────────────────────────────────

    /// End any segments still open on a parent stack; their stop time
    /// becomes the transaction's stop time.
    fn finalize_parent_stacks(&mut self, txn_stop: Ticks) {
        let mut open: Vec<SegmentId> = std::mem::take(&mut self.default_parent_stack);
        for (_, stack) in self.parent_stacks.drain() {
            open.extend(stack);
        }

        for id in open {
            let key = match self.arena.get_mut(id) {
                Some(segment) => {
                    if segment.stop_time == 0 {
                        segment.stop_time = txn_stop;
                    }
                    (segment.priority, segment.duration())
                }
                None => continue,
            };
            self.segment_count += 1;
            let evicted = match &mut self.segment_heap {
                Some(heap) => heap.insert(key, id),
                None => None,
            };
            if let Some(evicted) = evicted {
                self.discard_for_capacity(evicted);
            }
        }
    }

    /// End the transaction: stop the root, close any open segments, run
    /// the harvest selector, and retain the resulting artifacts on
    /// [`final_data`](Transaction::final_data).
    ///
    /// Returns `false` when the transaction was already complete or is
    /// ignored.
    pub fn end(&mut self) -> bool {
        if self.status.complete {
            return false;
        }
        if self.status.ignore {
            self.status.recording = false;
            self.status.complete = true;
            return false;
        }

        self.freeze_name();

        let now_rel = self.now_rel();
        let Some(root) = self.segment_root else {
            return false;
        };
        let txn_stop = match self.arena.get_mut(root) {
            Some(root_segment) => {
                if root_segment.stop_time == 0 {
                    root_segment.stop_time = now_rel;
                }
                root_segment.stop_time
            }
            None => return false,
        };

        self.finalize_parent_stacks(txn_stop);
        self.status.recording = false;

        crate::harvest::harvest(self);

        self.status.complete = true;
        true
    }

    #[cfg(test)]
    pub(crate) fn force_link_for_tests(&mut self, parent: SegmentId, child: SegmentId) {
        self.link_child(parent, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_txn() -> Transaction {
        Transaction::begin_with(
            TxnOptions::default(),
            AttributeConfig::default(),
            EventLimits::default(),
            false,
            None,
            99,
        )
    }

    #[test]
    fn traversal_visits_each_node_once() {
        let mut txn = test_txn();
        let root = txn.segment_root.unwrap();
        let a = txn.start_segment(None, None).unwrap();
        let b = txn.start_segment(None, None).unwrap();
        let c = txn.start_segment(Some(a), None).unwrap();

        let order = txn.traversal_order(root);
        let pre: Vec<SegmentId> = order
            .iter()
            .filter_map(|visit| match visit {
                Visit::Pre(id) => Some(*id),
                Visit::Post(_) => None,
            })
            .collect();

        assert_eq!(vec![root, a, b, c], pre);
        let post_count = order.len() - pre.len();
        assert_eq!(pre.len(), post_count, "every pre has a post");
    }

    #[test]
    fn traversal_terminates_on_a_forced_cycle() {
        let mut txn = test_txn();
        let root = txn.segment_root.unwrap();
        let a = txn.start_segment(None, None).unwrap();
        let b = txn.start_segment(None, None).unwrap();

        // The public API refuses cycles, so force one: a becomes a child
        // of its own descendant.
        txn.force_link_for_tests(b, a);

        let order = txn.traversal_order(root);
        let mut pre: Vec<SegmentId> = order
            .iter()
            .filter_map(|visit| match visit {
                Visit::Pre(id) => Some(*id),
                Visit::Post(_) => None,
            })
            .collect();
        pre.sort();
        pre.dedup();
        assert_eq!(3, pre.len(), "each reachable node exactly once");
    }

    #[test]
    fn successive_traversals_toggle_colors() {
        let mut txn = test_txn();
        let root = txn.segment_root.unwrap();
        let a = txn.start_segment(None, None).unwrap();

        let first = txn.traversal_order(root).len();
        let second = txn.traversal_order(root).len();
        assert_eq!(first, second, "second traversal sees the whole tree");

        let _ = a;
    }

    #[test]
    fn event_buffers_respect_app_limits() {
        let mut options = TxnOptions::default();
        options.custom_events_max_samples_stored = 10_000;
        let limits = EventLimits {
            custom: 2,
            ..EventLimits::default()
        };
        let mut txn = Transaction::begin_with(
            options,
            AttributeConfig::default(),
            limits,
            false,
            None,
            5,
        );

        for i in 0..10 {
            txn.record_custom_event(format!("[{i}]"));
        }
        assert_eq!(2, txn.custom_events.len());
        assert_eq!(10, txn.custom_events.seen());
    }

    #[test]
    fn error_record_keeps_the_highest_priority() {
        let mut txn = test_txn();
        txn.record_error(2, "first", "ErrorA");
        txn.record_error(1, "lower", "ErrorB");
        assert_eq!("first", txn.error.as_ref().unwrap().message);

        txn.record_error(5, "highest", "ErrorC");
        let error = txn.error.as_ref().unwrap();
        assert_eq!("highest", error.message);
        assert_eq!("ErrorC", error.class);
    }

    #[test]
    fn end_is_idempotent() {
        let mut txn = test_txn();
        let root = txn.segment_root.unwrap();
        txn.set_segment_timing(root, 0, 1_000_000);

        assert!(txn.end());
        assert!(txn.status.complete);
        assert!(!txn.end(), "a second end is refused");
    }
}
