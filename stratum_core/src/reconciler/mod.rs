// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The reconciler: scheduling, rendering, and committing roots.
//!
//! A [`Reconciler`] owns every root, the unit arena, and all render and
//! commit state. There is no global state; the three collaborators are owned
//! as generic parameters and driven through explicit entry points:
//!
//! ```text
//!   enqueue_update ──► schedule_update_on_unit ──► ensure_root_is_scheduled
//!                                                      │
//!                 ┌────────────── Task::PerformWork ◄──┤ (non-sync lanes)
//!                 │               sync queue      ◄────┘ (sync lane)
//!                 ▼
//!   run_task / flush_sync ──► render (time-sliced or exhaustive)
//!                                   │
//!                                   ▼
//!                   exit status ──► commit now / after timeout / never
//!                                   │
//!                                   ▼
//!          before mutation ─► mutation ─► layout ─► passive (task)
//! ```
//!
//! The scheduler hands [`Task`]s back through [`Reconciler::run_task`],
//! microtasks through [`Reconciler::run_microtask`], and the host hands
//! timeouts back through [`Reconciler::run_timeout`].

mod commit;
mod recovery;
mod schedule;
mod suspense;
mod work_loop;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ops::{BitOr, BitOrAssign};

use crate::config::ReconcilerConfig;
use crate::error::{CapturedError, ReconcileError};
use crate::host::{
    CooperativeScheduler, HostConfig, Microtask, Task, TaskHandle, TaskStatus, TimeoutTask,
    UnitEvaluator, UpdateRequest,
};
use crate::lane::{EventPriority, Lane, LaneAllocator, Lanes};
use crate::root::RootState;
use crate::time::Timestamp;
use crate::trace::{TraceSink, Tracer};
use crate::unit::{RootId, Transition, TypeTag, UnitId, UnitMode, UnitStore, Update, WakeableId};

pub use suspense::jnd;
pub use work_loop::ExitStatus;

/// Which phases the reconciler is currently inside.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ExecutionContext(u8);

impl ExecutionContext {
    pub(crate) const NONE: Self = Self(0);
    pub(crate) const BATCHED: Self = Self(1 << 0);
    pub(crate) const RENDER: Self = Self(1 << 1);
    pub(crate) const COMMIT: Self = Self(1 << 2);

    pub(crate) const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub(crate) const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ExecutionContext {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ExecutionContext {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// State of the render attempt in progress, or of the last one.
#[derive(Debug)]
struct RenderState {
    root: Option<RootId>,
    unit: Option<UnitId>,
    render_lanes: Lanes,
    exit_status: ExitStatus,
    fatal_error: Option<CapturedError>,
    skipped_lanes: Lanes,
    interleaved_lanes: Lanes,
    render_phase_lanes: Lanes,
    pinged_lanes: Lanes,
    concurrent_errors: Vec<CapturedError>,
    recoverable_errors: Vec<CapturedError>,
    transitions: Vec<Transition>,
    started_at: Option<Timestamp>,
}

impl RenderState {
    fn new() -> Self {
        Self {
            root: None,
            unit: None,
            render_lanes: Lanes::NONE,
            exit_status: ExitStatus::InProgress,
            fatal_error: None,
            skipped_lanes: Lanes::NONE,
            interleaved_lanes: Lanes::NONE,
            render_phase_lanes: Lanes::NONE,
            pinged_lanes: Lanes::NONE,
            concurrent_errors: Vec::new(),
            recoverable_errors: Vec::new(),
            transitions: Vec::new(),
            started_at: None,
        }
    }
}

/// Passive effects waiting on a [`Task::FlushPassiveEffects`].
#[derive(Debug, Default)]
struct PassiveState {
    root: Option<RootId>,
    lanes: Lanes,
    remaining: Lanes,
    transitions: Vec<Transition>,
    is_flushing: bool,
    did_schedule_update: bool,
    nested_count: u32,
    nested_root: Option<RootId>,
}

/// Scope set by the batching entry points.
#[derive(Debug, Default)]
struct EventState {
    current_event_time: Option<Timestamp>,
    current_event_transition_lane: Lane,
    update_priority: Option<EventPriority>,
    transition: Option<Transition>,
}

/// Roots with synchronous work, flushed in order.
#[derive(Debug, Default)]
struct SyncQueue {
    roots: Vec<RootId>,
    is_flushing: bool,
}

/// Schedules, renders, and commits roots.
///
/// Generic over the [`CooperativeScheduler`] that runs its tasks, the
/// [`HostConfig`] that applies committed effects, and the [`UnitEvaluator`]
/// that computes units.
#[derive(Debug)]
pub struct Reconciler<S, H, E> {
    config: ReconcilerConfig,
    scheduler: S,
    host: H,
    evaluator: E,

    units: UnitStore,
    roots: Vec<RootState>,
    context: ExecutionContext,

    wip: RenderState,
    passive: PassiveState,
    event: EventState,
    sync_queue: SyncQueue,

    nested_update_count: u32,
    nested_update_root: Option<RootId>,

    concurrent_queue: Vec<(UnitId, Update)>,
    concurrently_updated_lanes: Lanes,

    lanes: LaneAllocator,
    most_recent_fallback_time: Timestamp,
    first_uncaught_error: Option<CapturedError>,
    requests: Vec<UpdateRequest>,
    retry_listeners: Vec<(UnitId, WakeableId)>,

    tracer: Tracer,
}

impl<S, H, E> Reconciler<S, H, E>
where
    S: CooperativeScheduler,
    H: HostConfig,
    E: UnitEvaluator,
{
    /// Creates a reconciler with no roots.
    #[must_use]
    pub fn new(config: ReconcilerConfig, scheduler: S, host: H, evaluator: E) -> Self {
        Self {
            config,
            scheduler,
            host,
            evaluator,
            units: UnitStore::new(),
            roots: Vec::new(),
            context: ExecutionContext::NONE,
            wip: RenderState::new(),
            passive: PassiveState::default(),
            event: EventState::default(),
            sync_queue: SyncQueue::default(),
            nested_update_count: 0,
            nested_update_root: None,
            concurrent_queue: Vec::new(),
            concurrently_updated_lanes: Lanes::NONE,
            lanes: LaneAllocator::new(),
            most_recent_fallback_time: Timestamp::ZERO,
            first_uncaught_error: None,
            requests: Vec::new(),
            retry_listeners: Vec::new(),
            tracer: Tracer::none(),
        }
    }

    /// Creates a root with an empty committed tree whose head unit has type
    /// `tag`.
    pub fn create_root(&mut self, mode: UnitMode, tag: TypeTag) -> RootId {
        #[expect(clippy::cast_possible_truncation, reason = "root count stays small")]
        let id = RootId(self.roots.len() as u32);
        let current = self.units.create_root_unit(id, mode, tag);
        self.roots.push(RootState::new(id, mode, current));
        id
    }

    // -- Accessors --

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Returns a root's state.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not created by this reconciler.
    #[must_use]
    pub fn root(&self, id: RootId) -> &RootState {
        self.validate_root(id);
        &self.roots[id.0 as usize]
    }

    /// Returns the ids of all roots.
    pub fn root_ids(&self) -> impl Iterator<Item = RootId> + '_ {
        self.roots.iter().map(RootState::id)
    }

    /// Returns the unit arena.
    #[must_use]
    pub fn units(&self) -> &UnitStore {
        &self.units
    }

    /// Returns the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Returns the scheduler mutably.
    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Returns the host.
    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Returns the host mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Returns the evaluator.
    #[must_use]
    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Returns the evaluator mutably.
    pub fn evaluator_mut(&mut self) -> &mut E {
        &mut self.evaluator
    }

    /// Returns `true` if a commit left passive effects that have not run.
    #[must_use]
    pub fn has_pending_passive_effects(&self) -> bool {
        self.passive.root.is_some()
    }

    /// Returns the root and lanes of the render attempt in progress, if any.
    #[must_use]
    pub fn render_in_progress(&self) -> Option<(RootId, Lanes)> {
        self.wip.root.map(|root| (root, self.wip.render_lanes))
    }

    /// Attaches a trace sink. Events are only delivered when the `trace`
    /// feature is enabled.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.tracer = Tracer::new(sink);
    }

    /// Detaches and returns the trace sink.
    pub fn take_trace_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        self.tracer.take_sink()
    }

    // -- Callbacks --

    /// Runs a task the scheduler queued.
    ///
    /// `did_timeout` is `true` when the scheduler ran the task because it
    /// waited too long; the render then runs to completion. A task whose
    /// handle is no longer the root's scheduled task returns
    /// [`TaskStatus::Done`] without doing anything.
    pub fn run_task(
        &mut self,
        handle: TaskHandle,
        task: Task,
        did_timeout: bool,
    ) -> Result<TaskStatus, ReconcileError> {
        match task {
            Task::PerformWork(root) => {
                self.validate_root(root);
                if self.roots[root.0 as usize].callback_node != Some(handle) {
                    return Ok(TaskStatus::Done);
                }
                let result = self.perform_concurrent_work_on_root(root, handle, did_timeout);
                if result.is_err() && self.roots[root.0 as usize].callback_node == Some(handle) {
                    // A failed task is finished; schedule whatever is left.
                    let state = &mut self.roots[root.0 as usize];
                    state.callback_node = None;
                    state.callback_priority = Lane::NONE;
                    let now = self.scheduler.now();
                    self.ensure_root_is_scheduled(root, now);
                }
                result
            }
            Task::FlushPassiveEffects => {
                self.flush_passive_effects()?;
                Ok(TaskStatus::Done)
            }
            Task::FlushSyncQueue => {
                self.flush_sync_callbacks()?;
                Ok(TaskStatus::Done)
            }
            Task::TransitionCallbacks(root) => {
                self.validate_root(root);
                self.run_transition_callbacks(root);
                Ok(TaskStatus::Done)
            }
        }
    }

    /// Runs a microtask the scheduler queued.
    pub fn run_microtask(&mut self, task: Microtask) -> Result<(), ReconcileError> {
        match task {
            Microtask::FlushSyncQueue => {
                if self
                    .context
                    .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
                {
                    return Ok(());
                }
                self.flush_sync_callbacks()
            }
        }
    }

    /// Runs a timeout the host scheduled.
    pub fn run_timeout(&mut self, task: TimeoutTask) -> Result<(), ReconcileError> {
        match task {
            TimeoutTask::CommitRoot(root) => {
                self.validate_root(root);
                self.commit_deferred(root)
            }
        }
    }

    #[inline]
    fn validate_root(&self, id: RootId) {
        assert!((id.0 as usize) < self.roots.len(), "unknown {id:?}");
    }
}
