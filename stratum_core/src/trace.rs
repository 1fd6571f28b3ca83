// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for renders and commits.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that the
//! reconciler calls as it schedules, renders, and commits. All method bodies
//! default to no-ops, so implementing only the events you care about is fine.
//!
//! [`Tracer`] owns an optional boxed sink. When the `trace` feature is
//! **off**, `Tracer` is zero-sized and every method compiles to nothing. When
//! **on**, each method performs a single `Option` branch before dispatching.
//!
//! [`CommitSummaryBuilder`] collects phase timestamps during a commit and
//! produces a [`CommitSummary`] at the end.
//!
//! A sink shared as `Rc<RefCell<S>>` is itself a sink, so a caller can hand a
//! clone to the reconciler and read the original afterwards.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies (one branch per call).
//! - `trace-rich` (implies `trace`): gates per-unit [`UnitSuspendedEvent`]
//!   and [`UnitErroredEvent`] plus the corresponding `TraceSink` methods.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

use crate::host::{SchedulerPriority, TaskHandle};
use crate::lane::{Lane, Lanes};
use crate::reconciler::ExitStatus;
use crate::time::{Duration, Timestamp};
use crate::unit::RootId;
#[cfg(feature = "trace-rich")]
use crate::unit::{UnitId, WakeableId};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which commit pass is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Snapshot pass before any host mutation.
    BeforeMutation,
    /// Host mutation pass.
    Mutation,
    /// Layout effects after mutation.
    Layout,
    /// Deferred passive effects.
    Passive,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted when a render attempt starts or resumes.
#[derive(Clone, Copy, Debug)]
pub struct RenderStartEvent {
    /// Root being rendered.
    pub root: RootId,
    /// Lanes being rendered.
    pub lanes: Lanes,
    /// Whether the attempt may yield.
    pub time_sliced: bool,
    /// Whether the in-progress tree was rebuilt from the committed tree.
    pub fresh: bool,
    /// Time at start.
    pub timestamp: Timestamp,
}

/// Emitted when a time-sliced render gives control back with work left.
#[derive(Clone, Copy, Debug)]
pub struct RenderYieldEvent {
    /// Root being rendered.
    pub root: RootId,
    /// Lanes being rendered.
    pub lanes: Lanes,
    /// Time of the yield.
    pub timestamp: Timestamp,
}

/// Emitted when a render attempt reaches a terminal status.
#[derive(Clone, Copy, Debug)]
pub struct RenderStopEvent {
    /// Root that was rendered.
    pub root: RootId,
    /// Lanes that were rendered.
    pub lanes: Lanes,
    /// How the attempt ended.
    pub status: ExitStatus,
    /// Time at stop.
    pub timestamp: Timestamp,
}

/// Emitted when a commit starts.
#[derive(Clone, Copy, Debug)]
pub struct CommitStartEvent {
    /// Root being committed.
    pub root: RootId,
    /// Lanes being committed.
    pub lanes: Lanes,
    /// Time at start.
    pub timestamp: Timestamp,
}

/// Emitted when a commit finishes.
#[derive(Clone, Copy, Debug)]
pub struct CommitStopEvent {
    /// Root that was committed.
    pub root: RootId,
    /// Lanes still pending after the commit.
    pub remaining: Lanes,
    /// Time at stop.
    pub timestamp: Timestamp,
}

/// Marks the beginning of a commit pass.
#[derive(Clone, Copy, Debug)]
pub struct PhaseBeginEvent {
    /// Root being committed.
    pub root: RootId,
    /// Which pass is starting.
    pub phase: PhaseKind,
    /// Time at the start of the pass.
    pub timestamp: Timestamp,
}

/// Marks the end of a commit pass.
#[derive(Clone, Copy, Debug)]
pub struct PhaseEndEvent {
    /// Root being committed.
    pub root: RootId,
    /// Which pass is ending.
    pub phase: PhaseKind,
    /// Time at the end of the pass.
    pub timestamp: Timestamp,
}

/// Emitted when work for a root is handed to the scheduler.
#[derive(Clone, Copy, Debug)]
pub struct TaskScheduledEvent {
    /// Root the work belongs to.
    pub root: RootId,
    /// Most urgent lane of the scheduled work.
    pub lane: Lane,
    /// Scheduler level used.
    pub priority: SchedulerPriority,
    /// Task handle; `None` for work placed on the synchronous queue.
    pub handle: Option<TaskHandle>,
    /// Time of scheduling.
    pub timestamp: Timestamp,
}

/// Emitted when a root's scheduled task is cancelled.
#[derive(Clone, Copy, Debug)]
pub struct TaskCancelledEvent {
    /// Root the task belonged to.
    pub root: RootId,
    /// The cancelled task.
    pub handle: TaskHandle,
    /// Time of cancellation.
    pub timestamp: Timestamp,
}

/// Emitted when a dependency of a suspended root resolves.
#[derive(Clone, Copy, Debug)]
pub struct PingEvent {
    /// Root that was waiting.
    pub root: RootId,
    /// Lanes that may now succeed.
    pub lanes: Lanes,
    /// Whether an in-progress render of those lanes was restarted.
    pub restarted: bool,
    /// Time of the ping.
    pub timestamp: Timestamp,
}

/// Per-commit timing summary produced by [`CommitSummaryBuilder`].
#[derive(Clone, Copy, Debug)]
pub struct CommitSummary {
    /// Root that was committed.
    pub root: RootId,
    /// Lanes that were committed.
    pub lanes: Lanes,
    /// Lanes still pending afterwards.
    pub remaining: Lanes,
    /// From the start of the render attempt to the start of the commit
    /// (zero if unknown).
    pub render: Duration,
    /// Before-mutation pass duration (zero if not run).
    pub before_mutation: Duration,
    /// Mutation pass duration (zero if not run).
    pub mutation: Duration,
    /// Layout pass duration (zero if not run).
    pub layout: Duration,
    /// Whole commit duration.
    pub total: Duration,
    /// Units the mutation pass visited.
    pub mutated_units: u32,
    /// Recoverable errors reported after this commit.
    pub recoverable_errors: u32,
}

/// A unit that reported a pending dependency.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug)]
pub struct UnitSuspendedEvent {
    /// The unit.
    pub unit: UnitId,
    /// What it waits on.
    pub wakeable: WakeableId,
    /// Lanes being rendered.
    pub lanes: Lanes,
}

/// A unit that failed during render.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug)]
pub struct UnitErroredEvent {
    /// The unit.
    pub unit: UnitId,
    /// Lanes being rendered.
    pub lanes: Lanes,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the reconciler.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called when a render attempt starts or resumes.
    fn on_render_start(&mut self, e: &RenderStartEvent) {
        _ = e;
    }

    /// Called when a time-sliced render yields.
    fn on_render_yield(&mut self, e: &RenderYieldEvent) {
        _ = e;
    }

    /// Called when a render attempt reaches a terminal status.
    fn on_render_stop(&mut self, e: &RenderStopEvent) {
        _ = e;
    }

    /// Called when a commit starts.
    fn on_commit_start(&mut self, e: &CommitStartEvent) {
        _ = e;
    }

    /// Called when a commit finishes.
    fn on_commit_stop(&mut self, e: &CommitStopEvent) {
        _ = e;
    }

    /// Called at the beginning of a commit pass.
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        _ = e;
    }

    /// Called at the end of a commit pass.
    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        _ = e;
    }

    /// Called when work is handed to the scheduler.
    fn on_task_scheduled(&mut self, e: &TaskScheduledEvent) {
        _ = e;
    }

    /// Called when a scheduled task is cancelled.
    fn on_task_cancelled(&mut self, e: &TaskCancelledEvent) {
        _ = e;
    }

    /// Called when a dependency resolves.
    fn on_ping(&mut self, e: &PingEvent) {
        _ = e;
    }

    /// Called with a per-commit timing summary.
    fn on_commit_summary(&mut self, s: &CommitSummary) {
        _ = s;
    }

    /// Called when a unit suspends (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    fn on_unit_suspended(&mut self, e: &UnitSuspendedEvent) {
        _ = e;
    }

    /// Called when a unit fails during render (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    fn on_unit_errored(&mut self, e: &UnitErroredEvent) {
        _ = e;
    }
}

impl<S: TraceSink + ?Sized> TraceSink for Rc<RefCell<S>> {
    fn on_render_start(&mut self, e: &RenderStartEvent) {
        self.borrow_mut().on_render_start(e);
    }

    fn on_render_yield(&mut self, e: &RenderYieldEvent) {
        self.borrow_mut().on_render_yield(e);
    }

    fn on_render_stop(&mut self, e: &RenderStopEvent) {
        self.borrow_mut().on_render_stop(e);
    }

    fn on_commit_start(&mut self, e: &CommitStartEvent) {
        self.borrow_mut().on_commit_start(e);
    }

    fn on_commit_stop(&mut self, e: &CommitStopEvent) {
        self.borrow_mut().on_commit_stop(e);
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.borrow_mut().on_phase_begin(e);
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.borrow_mut().on_phase_end(e);
    }

    fn on_task_scheduled(&mut self, e: &TaskScheduledEvent) {
        self.borrow_mut().on_task_scheduled(e);
    }

    fn on_task_cancelled(&mut self, e: &TaskCancelledEvent) {
        self.borrow_mut().on_task_cancelled(e);
    }

    fn on_ping(&mut self, e: &PingEvent) {
        self.borrow_mut().on_ping(e);
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        self.borrow_mut().on_commit_summary(s);
    }

    #[cfg(feature = "trace-rich")]
    fn on_unit_suspended(&mut self, e: &UnitSuspendedEvent) {
        self.borrow_mut().on_unit_suspended(e);
    }

    #[cfg(feature = "trace-rich")]
    fn on_unit_errored(&mut self, e: &UnitErroredEvent) {
        self.borrow_mut().on_unit_errored(e);
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Owner of an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
#[derive(Default)]
pub struct Tracer {
    #[cfg(feature = "trace")]
    sink: Option<Box<dyn TraceSink>>,
}

impl core::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Generates a forwarding method on [`Tracer`].
macro_rules! forward {
    ($(#[$meta:meta])* $name:ident => $method:ident($ty:ty)) => {
        $(#[$meta])*
        #[inline]
        pub fn $name(&mut self, e: &$ty) {
            #[cfg(feature = "trace")]
            if let Some(s) = &mut self.sink {
                s.$method(e);
            }
            #[cfg(not(feature = "trace"))]
            {
                _ = e;
            }
        }
    };
}

impl Tracer {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: Box<dyn TraceSink>) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {}
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns `true` if events reach a sink.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        #[cfg(feature = "trace")]
        {
            self.sink.is_some()
        }
        #[cfg(not(feature = "trace"))]
        {
            false
        }
    }

    /// Removes and returns the sink.
    pub fn take_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        #[cfg(feature = "trace")]
        {
            self.sink.take()
        }
        #[cfg(not(feature = "trace"))]
        {
            None
        }
    }

    forward!(
        /// Emits a [`RenderStartEvent`].
        render_start => on_render_start(RenderStartEvent)
    );
    forward!(
        /// Emits a [`RenderYieldEvent`].
        render_yield => on_render_yield(RenderYieldEvent)
    );
    forward!(
        /// Emits a [`RenderStopEvent`].
        render_stop => on_render_stop(RenderStopEvent)
    );
    forward!(
        /// Emits a [`CommitStartEvent`].
        commit_start => on_commit_start(CommitStartEvent)
    );
    forward!(
        /// Emits a [`CommitStopEvent`].
        commit_stop => on_commit_stop(CommitStopEvent)
    );
    forward!(
        /// Emits a [`PhaseBeginEvent`].
        phase_begin => on_phase_begin(PhaseBeginEvent)
    );
    forward!(
        /// Emits a [`PhaseEndEvent`].
        phase_end => on_phase_end(PhaseEndEvent)
    );
    forward!(
        /// Emits a [`TaskScheduledEvent`].
        task_scheduled => on_task_scheduled(TaskScheduledEvent)
    );
    forward!(
        /// Emits a [`TaskCancelledEvent`].
        task_cancelled => on_task_cancelled(TaskCancelledEvent)
    );
    forward!(
        /// Emits a [`PingEvent`].
        ping => on_ping(PingEvent)
    );
    forward!(
        /// Emits a [`CommitSummary`].
        commit_summary => on_commit_summary(CommitSummary)
    );

    /// Emits a [`UnitSuspendedEvent`] (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn unit_suspended(&mut self, e: &UnitSuspendedEvent) {
        if let Some(s) = &mut self.sink {
            s.on_unit_suspended(e);
        }
    }

    /// Emits a [`UnitErroredEvent`] (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn unit_errored(&mut self, e: &UnitErroredEvent) {
        if let Some(s) = &mut self.sink {
            s.on_unit_errored(e);
        }
    }
}

// ---------------------------------------------------------------------------
// CommitSummaryBuilder
// ---------------------------------------------------------------------------

/// Collects phase timestamps during a commit and produces a
/// [`CommitSummary`].
///
/// The passive pass runs after the commit returns and is not part of the
/// summary; its timing is reported through phase events only.
#[derive(Debug)]
pub struct CommitSummaryBuilder {
    root: RootId,
    lanes: Lanes,
    render_start: Option<Timestamp>,
    commit_start: Timestamp,
    phase_starts: [Option<Timestamp>; 3],
    phase_ends: [Option<Timestamp>; 3],
    mutated_units: u32,
}

impl CommitSummaryBuilder {
    /// Starts building a summary for a commit of `lanes` on `root`.
    #[must_use]
    pub fn new(
        root: RootId,
        lanes: Lanes,
        render_start: Option<Timestamp>,
        commit_start: Timestamp,
    ) -> Self {
        Self {
            root,
            lanes,
            render_start,
            commit_start,
            phase_starts: [None; 3],
            phase_ends: [None; 3],
            mutated_units: 0,
        }
    }

    /// Records the start of a pass.
    pub fn phase_begin(&mut self, phase: PhaseKind, t: Timestamp) {
        if let Some(idx) = commit_phase_index(phase) {
            self.phase_starts[idx] = Some(t);
        }
    }

    /// Records the end of a pass.
    pub fn phase_end(&mut self, phase: PhaseKind, t: Timestamp) {
        if let Some(idx) = commit_phase_index(phase) {
            self.phase_ends[idx] = Some(t);
        }
    }

    /// Adds to the count of units the mutation pass visited.
    pub fn add_mutated_units(&mut self, count: u32) {
        self.mutated_units = self.mutated_units.saturating_add(count);
    }

    /// Consumes the builder and produces the final [`CommitSummary`].
    #[must_use]
    pub fn finish(self, end: Timestamp, remaining: Lanes, recoverable_errors: u32) -> CommitSummary {
        CommitSummary {
            root: self.root,
            lanes: self.lanes,
            remaining,
            render: self
                .render_start
                .map_or(Duration::ZERO, |start| self.commit_start - start),
            before_mutation: self.phase_duration(PhaseKind::BeforeMutation),
            mutation: self.phase_duration(PhaseKind::Mutation),
            layout: self.phase_duration(PhaseKind::Layout),
            total: end - self.commit_start,
            mutated_units: self.mutated_units,
            recoverable_errors,
        }
    }

    fn phase_duration(&self, phase: PhaseKind) -> Duration {
        let Some(idx) = commit_phase_index(phase) else {
            return Duration::ZERO;
        };
        match (self.phase_starts[idx], self.phase_ends[idx]) {
            (Some(start), Some(end)) => end - start,
            _ => Duration::ZERO,
        }
    }
}

/// Maps the synchronous commit passes to array indices.
const fn commit_phase_index(phase: PhaseKind) -> Option<usize> {
    match phase {
        PhaseKind::BeforeMutation => Some(0),
        PhaseKind::Mutation => Some(1),
        PhaseKind::Layout => Some(2),
        PhaseKind::Passive => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stop() -> RenderStopEvent {
        RenderStopEvent {
            root: RootId(0),
            lanes: Lane::DEFAULT.into(),
            status: ExitStatus::Completed,
            timestamp: Timestamp(40),
        }
    }

    #[test]
    fn noop_sink_compiles() {
        let mut sink = NoopSink;
        sink.on_render_stop(&sample_stop());
        sink.on_ping(&PingEvent {
            root: RootId(0),
            lanes: Lane::RETRY_1.into(),
            restarted: false,
            timestamp: Timestamp(0),
        });
    }

    #[test]
    fn tracer_none_does_nothing() {
        let mut tracer = Tracer::none();
        assert!(!tracer.is_enabled());
        tracer.render_stop(&sample_stop());
        assert!(tracer.take_sink().is_none());
    }

    #[test]
    fn summary_builder_computes_durations() {
        let mut builder =
            CommitSummaryBuilder::new(RootId(1), Lane::SYNC.into(), Some(Timestamp(90)), Timestamp(100));
        builder.phase_begin(PhaseKind::BeforeMutation, Timestamp(100));
        builder.phase_end(PhaseKind::BeforeMutation, Timestamp(101));
        builder.phase_begin(PhaseKind::Mutation, Timestamp(101));
        builder.phase_end(PhaseKind::Mutation, Timestamp(105));
        builder.phase_begin(PhaseKind::Layout, Timestamp(105));
        builder.phase_end(PhaseKind::Layout, Timestamp(107));
        builder.phase_begin(PhaseKind::Passive, Timestamp(107));
        builder.add_mutated_units(3);

        let summary = builder.finish(Timestamp(108), Lanes::NONE, 1);
        assert_eq!(summary.render, Duration(10));
        assert_eq!(summary.before_mutation, Duration(1));
        assert_eq!(summary.mutation, Duration(4));
        assert_eq!(summary.layout, Duration(2));
        assert_eq!(summary.total, Duration(8));
        assert_eq!(summary.mutated_units, 3);
        assert_eq!(summary.recoverable_errors, 1);
    }

    #[test]
    fn summary_builder_missing_phases_are_zero() {
        let builder = CommitSummaryBuilder::new(RootId(0), Lanes::NONE, None, Timestamp(5));
        let summary = builder.finish(Timestamp(5), Lanes::NONE, 0);
        assert_eq!(summary.render, Duration::ZERO);
        assert_eq!(summary.mutation, Duration::ZERO);
        assert_eq!(summary.total, Duration::ZERO);
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tracer_dispatches_to_shared_sink() {
        use alloc::vec::Vec;

        #[derive(Default)]
        struct RecordingSink {
            stops: Vec<ExitStatus>,
        }
        impl TraceSink for RecordingSink {
            fn on_render_stop(&mut self, e: &RenderStopEvent) {
                self.stops.push(e.status);
            }
        }

        let shared = Rc::new(RefCell::new(RecordingSink::default()));
        let mut tracer = Tracer::new(Box::new(shared.clone()));
        assert!(tracer.is_enabled());
        tracer.render_stop(&sample_stop());
        assert_eq!(shared.borrow().stops, [ExitStatus::Completed]);
    }
}
