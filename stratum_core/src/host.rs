// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Collaborator contracts.
//!
//! The reconciler decides *when* and *in what order* work happens. Three
//! collaborators supply everything else:
//!
//! - **Cooperative scheduler** ([`CooperativeScheduler`]): runs tasks later
//!   at one of four priorities, answers "should I yield now", and owns the
//!   clock. Tasks are plain data ([`Task`], [`Microtask`]); the scheduler
//!   hands them back through
//!   [`Reconciler::run_task`](crate::reconciler::Reconciler::run_task) and
//!   [`Reconciler::run_microtask`](crate::reconciler::Reconciler::run_microtask).
//!
//! - **Unit evaluator** ([`UnitEvaluator`]): computes one unit at a time:
//!   which children it has, whether it is blocked on a dependency, whether
//!   it failed. It sees the tree through an [`EvalContext`].
//!
//! - **Host** ([`HostConfig`]): applies committed effects to the output
//!   tree in four ordered passes, runs delayed commits through timeouts
//!   ([`TimeoutTask`], handed back through
//!   [`Reconciler::run_timeout`](crate::reconciler::Reconciler::run_timeout)),
//!   and receives post-commit reports.
//!
//! Effects and evaluators never call back into the reconciler. They queue
//! [`UpdateRequest`]s on their context instead, and the reconciler schedules
//! them once the current pass finishes.

use alloc::vec::Vec;

use crate::error::{CapturedError, UnitError};
use crate::lane::{EventPriority, Lane, Lanes};
use crate::time::{Duration, Timestamp};
use crate::unit::{
    ChildSpec, ProcessedUpdates, RootId, Transition, UnitId, UnitStore, Update, UpdateAction,
    WakeableId,
};

// ---------------------------------------------------------------------------
// Scheduler side
// ---------------------------------------------------------------------------

/// Priority levels of the cooperative scheduler, most urgent first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchedulerPriority {
    /// Run before anything else.
    Immediate,
    /// Direct responses to user input.
    UserBlocking,
    /// Everything else.
    Normal,
    /// Only when nothing else is waiting.
    Idle,
}

impl SchedulerPriority {
    /// Maps an event priority onto a scheduler level.
    #[must_use]
    pub const fn from_event_priority(priority: EventPriority) -> Self {
        match priority {
            EventPriority::Discrete => Self::Immediate,
            EventPriority::Continuous => Self::UserBlocking,
            EventPriority::Default => Self::Normal,
            EventPriority::Idle => Self::Idle,
        }
    }
}

/// Identifies a scheduled task so it can be cancelled or continued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(pub u64);

/// Identifies a scheduled timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeoutHandle(pub u64);

/// A host-owned cache pooled by a root for the lanes that use it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheHandle(pub u64);

/// Work the reconciler asks the scheduler to run later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Task {
    /// Render (and possibly commit) the root's next lanes.
    PerformWork(RootId),
    /// Run pending passive effects.
    FlushPassiveEffects,
    /// Flush the synchronous queue after a failure interrupted it.
    FlushSyncQueue,
    /// Report completed transitions of a root to the host.
    TransitionCallbacks(RootId),
}

/// Work the reconciler asks to run before control returns to the event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Microtask {
    /// Flush the synchronous queue unless a render or commit is running.
    FlushSyncQueue,
}

/// Work the reconciler asks the host to run after a delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeoutTask {
    /// Commit the root's finished tree.
    CommitRoot(RootId),
}

/// What a finished task asks of the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// The task is finished.
    Done,
    /// Run the same task again, under the same handle, at the same priority.
    Continue,
}

/// The external cooperative task primitive.
pub trait CooperativeScheduler {
    /// Queues `task` at `priority` and returns its handle.
    fn schedule_task(&mut self, priority: SchedulerPriority, task: Task) -> TaskHandle;

    /// Cancels a queued task. Unknown or finished handles are ignored.
    fn cancel_task(&mut self, handle: TaskHandle);

    /// Returns `true` if the running task should give control back.
    fn should_yield(&mut self) -> bool;

    /// Returns the current time.
    fn now(&self) -> Timestamp;

    /// Queues a microtask.
    fn schedule_microtask(&mut self, task: Microtask);

    /// Hints that the host should paint before running the next task.
    fn request_paint(&mut self) {}
}

// ---------------------------------------------------------------------------
// Follow-up updates
// ---------------------------------------------------------------------------

/// An update an effect or evaluator wants scheduled on a unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Target unit.
    pub unit: UnitId,
    /// The change.
    pub action: UpdateAction,
}

// ---------------------------------------------------------------------------
// Host side
// ---------------------------------------------------------------------------

/// What a host effect callback can see and do.
#[derive(Debug)]
pub struct CommitContext<'a> {
    store: &'a UnitStore,
    root: RootId,
    lanes: Lanes,
    requests: &'a mut Vec<UpdateRequest>,
}

impl<'a> CommitContext<'a> {
    pub(crate) fn new(
        store: &'a UnitStore,
        root: RootId,
        lanes: Lanes,
        requests: &'a mut Vec<UpdateRequest>,
    ) -> Self {
        Self {
            store,
            root,
            lanes,
            requests,
        }
    }

    /// Returns the unit store.
    #[must_use]
    pub fn store(&self) -> &UnitStore {
        self.store
    }

    /// Returns the root being committed.
    #[must_use]
    pub fn root(&self) -> RootId {
        self.root
    }

    /// Returns the lanes being committed.
    #[must_use]
    pub fn lanes(&self) -> Lanes {
        self.lanes
    }

    /// Schedules an update on `unit` once the current pass finishes.
    pub fn request_update(&mut self, unit: UnitId, action: UpdateAction) {
        self.requests.push(UpdateRequest { unit, action });
    }
}

/// Host mutation primitives and post-commit reports.
///
/// Every effect callback may fail; a failure is attributed to the unit and
/// delivered to its nearest error boundary as a synchronous update. The
/// remaining units of the pass still run.
pub trait HostConfig {
    /// Reads host state before any mutation of this commit.
    fn commit_before_mutation(
        &mut self,
        cx: &mut CommitContext<'_>,
        unit: UnitId,
    ) -> Result<(), UnitError> {
        _ = (cx, unit);
        Ok(())
    }

    /// Applies placement, update, and visibility changes of `unit`.
    fn commit_mutation(&mut self, cx: &mut CommitContext<'_>, unit: UnitId)
    -> Result<(), UnitError>;

    /// Removes the subtree rooted at `deleted` from under `parent`.
    fn commit_deletion(
        &mut self,
        cx: &mut CommitContext<'_>,
        parent: UnitId,
        deleted: UnitId,
    ) -> Result<(), UnitError>;

    /// Runs effects that observe the mutated host tree.
    fn commit_layout(&mut self, cx: &mut CommitContext<'_>, unit: UnitId) -> Result<(), UnitError> {
        _ = (cx, unit);
        Ok(())
    }

    /// Tears down passive effects of `unit` (before re-running or on removal).
    fn commit_passive_unmount(
        &mut self,
        cx: &mut CommitContext<'_>,
        unit: UnitId,
    ) -> Result<(), UnitError> {
        _ = (cx, unit);
        Ok(())
    }

    /// Runs passive effects of `unit`.
    fn commit_passive_mount(
        &mut self,
        cx: &mut CommitContext<'_>,
        unit: UnitId,
    ) -> Result<(), UnitError> {
        _ = (cx, unit);
        Ok(())
    }

    /// Called after the mutation pass, before the layout pass.
    fn reset_after_commit(&mut self, root: RootId) {
        _ = root;
    }

    /// Runs `task` through
    /// [`Reconciler::run_timeout`](crate::reconciler::Reconciler::run_timeout)
    /// after `delay`.
    fn schedule_timeout(&mut self, task: TimeoutTask, delay: Duration) -> TimeoutHandle;

    /// Cancels a pending timeout. Unknown or fired handles are ignored.
    fn cancel_timeout(&mut self, handle: TimeoutHandle);

    /// Priority of the event currently being dispatched, for updates issued
    /// outside any explicit priority scope.
    fn current_event_priority(&self) -> EventPriority {
        EventPriority::Default
    }

    /// Reports an error that a synchronous re-render recovered from.
    fn on_recoverable_error(&mut self, root: RootId, error: &CapturedError) {
        _ = (root, error);
    }

    /// Reports transitions whose updates have all committed.
    fn on_transitions_complete(&mut self, root: RootId, transitions: &[Transition], end: Timestamp) {
        _ = (root, transitions, end);
    }

    /// Releases a pooled cache once no pending lane uses it.
    fn release_cache(&mut self, cache: CacheHandle) {
        _ = cache;
    }
}

// ---------------------------------------------------------------------------
// Evaluator side
// ---------------------------------------------------------------------------

/// Outcome of evaluating one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Continue with this unit (normally the first child).
    Continue(UnitId),
    /// The unit has no further work in this direction.
    Done,
    /// The unit cannot finish until `WakeableId` resolves.
    Suspend(WakeableId),
    /// The unit failed.
    Fail(UnitError),
}

/// What a unit evaluator can see and do during render.
#[derive(Debug)]
pub struct EvalContext<'a> {
    store: &'a mut UnitStore,
    root: RootId,
    render_lanes: Lanes,
    has_scheduled_update: bool,
    skipped_lanes: &'a mut Lanes,
    requests: &'a mut Vec<UpdateRequest>,
    pooled_cache: &'a mut Option<CacheHandle>,
    pooled_cache_lanes: &'a mut Lanes,
}

impl<'a> EvalContext<'a> {
    #[expect(clippy::too_many_arguments, reason = "split borrows of reconciler state")]
    pub(crate) fn new(
        store: &'a mut UnitStore,
        root: RootId,
        render_lanes: Lanes,
        has_scheduled_update: bool,
        skipped_lanes: &'a mut Lanes,
        requests: &'a mut Vec<UpdateRequest>,
        pooled_cache: &'a mut Option<CacheHandle>,
        pooled_cache_lanes: &'a mut Lanes,
    ) -> Self {
        Self {
            store,
            root,
            render_lanes,
            has_scheduled_update,
            skipped_lanes,
            requests,
            pooled_cache,
            pooled_cache_lanes,
        }
    }

    /// Returns the unit store.
    #[must_use]
    pub fn store(&self) -> &UnitStore {
        self.store
    }

    /// Returns the unit store for direct edits (state words, flags).
    pub fn store_mut(&mut self) -> &mut UnitStore {
        self.store
    }

    /// Returns the root being rendered.
    #[must_use]
    pub fn root(&self) -> RootId {
        self.root
    }

    /// Returns the lanes being rendered.
    #[must_use]
    pub fn render_lanes(&self) -> Lanes {
        self.render_lanes
    }

    /// Returns `true` if the unit being begun had updates in the render
    /// lanes. Always `false` outside `begin`.
    #[must_use]
    pub fn has_scheduled_update(&self) -> bool {
        self.has_scheduled_update
    }

    /// Applies the unit's updates in the render lanes.
    ///
    /// Lanes left behind are remembered by the render attempt.
    pub fn process_update_queue(&mut self, unit: UnitId) -> ProcessedUpdates {
        let out = self.store.process_update_queue(unit, self.render_lanes);
        *self.skipped_lanes |= out.skipped;
        out
    }

    /// Rebuilds the children of `unit`; see
    /// [`UnitStore::reconcile_children`].
    pub fn reconcile_children(&mut self, unit: UnitId, children: &[ChildSpec]) -> Option<UnitId> {
        self.store.reconcile_children(unit, children)
    }

    /// Skips re-evaluating `unit`; see [`UnitStore::bailout`].
    pub fn bailout(&mut self, unit: UnitId) -> Option<UnitId> {
        self.store.bailout(unit, self.render_lanes)
    }

    /// Schedules an update on `unit` once this render step returns.
    pub fn request_update(&mut self, unit: UnitId, action: UpdateAction) {
        self.requests.push(UpdateRequest { unit, action });
    }

    /// Returns the root's pooled cache, installing `create()` if there is
    /// none. The render lanes are recorded as users of the cache.
    pub fn pooled_cache(&mut self, create: impl FnOnce() -> CacheHandle) -> CacheHandle {
        *self.pooled_cache_lanes |= self.render_lanes;
        *self.pooled_cache.get_or_insert_with(create)
    }
}

/// Computes individual units.
///
/// `current` is the committed slot of the unit, or `None` on first mount.
pub trait UnitEvaluator {
    /// Evaluates `unit` on the way down.
    fn begin(&mut self, cx: &mut EvalContext<'_>, current: Option<UnitId>, unit: UnitId) -> Step;

    /// Finishes `unit` after all its children completed.
    fn complete(&mut self, cx: &mut EvalContext<'_>, current: Option<UnitId>, unit: UnitId)
    -> Step;

    /// Unwinds an incomplete `unit`. Returning `Some` restarts the render
    /// from that unit (normally the unit itself, after it captured).
    fn unwind(
        &mut self,
        cx: &mut EvalContext<'_>,
        current: Option<UnitId>,
        unit: UnitId,
    ) -> Option<UnitId> {
        _ = current;
        cx.store_mut().capture_boundary(unit)
    }

    /// Called for each ancestor of an abandoned in-progress unit, innermost
    /// first, when a render is thrown away.
    fn unwind_interrupted(&mut self, store: &UnitStore, unit: UnitId) {
        _ = (store, unit);
    }

    /// Resets per-render evaluator state after a unit suspended or failed.
    fn reset_after_throw(&mut self) {}

    /// Builds the update that delivers `error` to `boundary`, or `None` if
    /// the boundary declines it.
    fn create_error_update(
        &mut self,
        store: &UnitStore,
        boundary: UnitId,
        error: &CapturedError,
        lane: Lane,
    ) -> Option<Update> {
        _ = (store, boundary);
        Some(Update::capture(lane, error.clone()))
    }
}
