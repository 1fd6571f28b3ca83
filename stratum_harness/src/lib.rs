// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deterministic collaborators for driving `stratum_core` roots in tests
//! and demos.
//!
//! - [`VirtualScheduler`]: priority task queue, microtask queue, a manual
//!   clock, and a scripted [`YieldPolicy`].
//! - [`RecordingHost`]: logs every commit callback, injects failures, queues
//!   timeouts, and turns effects into follow-up updates.
//! - [`ScriptedEvaluator`]: renders a static [`Tree`] whose nodes can
//!   suspend, fail, or act as boundaries.
//! - [`Harness`]: owns a reconciler built from the three and runs
//!   microtasks, tasks, and timeouts until nothing is left.

#![no_std]

extern crate alloc;

mod evaluator;
mod host;
mod scheduler;

use alloc::vec::Vec;

use stratum_core::config::ReconcilerConfig;
use stratum_core::error::ReconcileError;
use stratum_core::host::{CooperativeScheduler as _, TaskStatus};
use stratum_core::lane::Lane;
use stratum_core::reconciler::Reconciler;
use stratum_core::time::{Duration, Timestamp};
use stratum_core::unit::{
    RootId, Transition, TypeTag, UnitId, UnitMode, UpdateAction, WakeableId,
};

pub use evaluator::{Node, NodeId, NodeKind, ScriptedEvaluator, Tree};
pub use host::{CommitPass, HostOp, PendingTimeout, RecordingHost};
pub use scheduler::{QueuedTask, SchedulerEvent, VirtualScheduler, YieldPolicy};

/// A reconciler wired to the harness collaborators.
pub type HarnessReconciler = Reconciler<VirtualScheduler, RecordingHost, ScriptedEvaluator>;

/// Steps [`Harness::run_until_idle`] takes before it gives up.
const MAX_STEPS: usize = 10_000;

/// Drives a [`HarnessReconciler`].
///
/// Every entry point arms the timeouts the host was asked for with the
/// current time, so delays count from when they were requested.
#[derive(Debug)]
pub struct Harness {
    reconciler: HarnessReconciler,
}

impl Harness {
    /// Creates a harness rendering `tree`.
    #[must_use]
    pub fn new(config: ReconcilerConfig, tree: Tree) -> Self {
        Self {
            reconciler: Reconciler::new(
                config,
                VirtualScheduler::new(),
                RecordingHost::new(),
                ScriptedEvaluator::new(tree),
            ),
        }
    }

    /// Returns the reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &HarnessReconciler {
        &self.reconciler
    }

    /// Returns the reconciler for direct calls. Call
    /// [`arm_timeouts`](Self::arm_timeouts) afterwards if they may have
    /// scheduled a delayed commit.
    pub fn reconciler_mut(&mut self) -> &mut HarnessReconciler {
        &mut self.reconciler
    }

    /// Returns the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &VirtualScheduler {
        self.reconciler.scheduler()
    }

    /// Returns the scheduler for editing.
    pub fn scheduler_mut(&mut self) -> &mut VirtualScheduler {
        self.reconciler.scheduler_mut()
    }

    /// Returns the host.
    #[must_use]
    pub fn host(&self) -> &RecordingHost {
        self.reconciler.host()
    }

    /// Returns the host for editing.
    pub fn host_mut(&mut self) -> &mut RecordingHost {
        self.reconciler.host_mut()
    }

    /// Returns the evaluator.
    #[must_use]
    pub fn evaluator(&self) -> &ScriptedEvaluator {
        self.reconciler.evaluator()
    }

    /// Returns the evaluator for editing.
    pub fn evaluator_mut(&mut self) -> &mut ScriptedEvaluator {
        self.reconciler.evaluator_mut()
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.scheduler().now()
    }

    /// Creates a root.
    pub fn create_root(&mut self, mode: UnitMode) -> RootId {
        self.reconciler.create_root(mode, TypeTag(0))
    }

    /// Queues `action` on the head of `root`.
    pub fn update_root(&mut self, root: RootId, action: UpdateAction) -> Result<Lane, ReconcileError> {
        let out = self.reconciler.update_root(root, action);
        self.arm_timeouts();
        out
    }

    /// Queues `action` on the committed unit rendered from the node called
    /// `name`.
    ///
    /// # Panics
    ///
    /// Panics if no such unit is committed under `root`.
    pub fn update_node(
        &mut self,
        root: RootId,
        name: &str,
        action: UpdateAction,
    ) -> Result<Lane, ReconcileError> {
        let Some(unit) = self.committed_unit(root, name) else {
            panic!("no committed unit named {name}");
        };
        let out = self.reconciler.enqueue_update(unit, action);
        self.arm_timeouts();
        out
    }

    /// Queues `action` on the head of `root` inside `transition`.
    pub fn transition(
        &mut self,
        transition: Transition,
        root: RootId,
        action: UpdateAction,
    ) -> Result<Lane, ReconcileError> {
        let out = self
            .reconciler
            .start_transition(transition, |r| r.update_root(root, action));
        self.arm_timeouts();
        out
    }

    /// Resolves `wakeable` for the evaluator and delivers it to the
    /// reconciler.
    pub fn resolve(&mut self, wakeable: WakeableId) -> Result<(), ReconcileError> {
        self.reconciler.evaluator_mut().resolve(wakeable);
        let out = self.reconciler.resolve_wakeable(wakeable);
        self.arm_timeouts();
        out
    }

    /// Starts the clock on timeouts requested since the last call.
    pub fn arm_timeouts(&mut self) {
        let now = self.now();
        self.reconciler.host_mut().arm_timeouts(now);
    }

    /// Runs every queued microtask.
    pub fn run_microtasks(&mut self) -> Result<(), ReconcileError> {
        while let Some(task) = self.reconciler.scheduler_mut().pop_microtask() {
            let out = self.reconciler.run_microtask(task);
            self.arm_timeouts();
            out?;
        }
        Ok(())
    }

    /// Runs the most urgent task once. Returns `None` if nothing is queued.
    ///
    /// A task that asks to continue goes back to its place in the queue.
    pub fn run_next_task(&mut self) -> Option<Result<TaskStatus, ReconcileError>> {
        let queued = self.reconciler.scheduler_mut().pop_task()?;
        let did_timeout = queued.timed_out(self.now());
        self.reconciler.scheduler_mut().begin_slice();
        let out = self
            .reconciler
            .run_task(queued.handle, queued.task, did_timeout);
        if out == Ok(TaskStatus::Continue) {
            self.reconciler.scheduler_mut().requeue(queued);
        }
        self.arm_timeouts();
        Some(out)
    }

    /// Runs microtasks and tasks until both queues are empty. Timeouts are
    /// left alone.
    ///
    /// # Panics
    ///
    /// Panics if the queues do not drain within a fixed number of steps,
    /// which happens when a render yields forever.
    pub fn run_until_idle(&mut self) -> Result<(), ReconcileError> {
        for _ in 0..MAX_STEPS {
            self.run_microtasks()?;
            match self.run_next_task() {
                Some(out) => {
                    out?;
                }
                None => return Ok(()),
            }
        }
        panic!("task queue did not drain in {MAX_STEPS} steps");
    }

    /// Moves the clock forward by `by`, running each timeout that falls due
    /// on the way at its due time, followed by the work it queued.
    pub fn advance(&mut self, by: Duration) -> Result<(), ReconcileError> {
        let target = self.now() + by;
        loop {
            let Some(due) = self.host().next_due().filter(|&due| due <= target) else {
                break;
            };
            self.scheduler_mut().advance_to(due);
            self.fire_due_timeouts()?;
        }
        self.scheduler_mut().advance_to(target);
        Ok(())
    }

    /// Runs queued work, then keeps jumping the clock to the next timeout
    /// until no work and no timeouts are left.
    pub fn run_all(&mut self) -> Result<(), ReconcileError> {
        self.run_until_idle()?;
        while let Some(due) = self.host().next_due() {
            self.scheduler_mut().advance_to(due);
            self.fire_due_timeouts()?;
        }
        Ok(())
    }

    fn fire_due_timeouts(&mut self) -> Result<(), ReconcileError> {
        let now = self.now();
        while let Some(timeout) = self.reconciler.host_mut().take_due_timeout(now) {
            let out = self.reconciler.run_timeout(timeout.task);
            self.arm_timeouts();
            out?;
            self.run_until_idle()?;
        }
        Ok(())
    }

    /// Returns the committed unit rendered from the node called `name`.
    #[must_use]
    pub fn committed_unit(&self, root: RootId, name: &str) -> Option<UnitId> {
        let node = self.evaluator().tree().find(name)?;
        let units = self.reconciler.units();
        units
            .preorder(self.reconciler.root(root).current())
            .into_iter()
            .find(|&unit| units.type_tag(unit) == node.tag())
    }

    /// Returns the names of the committed units under `root`, in preorder,
    /// without the root itself.
    #[must_use]
    pub fn committed(&self, root: RootId) -> Vec<&'static str> {
        let units = self.reconciler.units();
        let tree = self.evaluator().tree();
        units
            .preorder(self.reconciler.root(root).current())
            .into_iter()
            .skip(1)
            .map(|unit| tree.name_of(units.type_tag(unit)))
            .collect()
    }

    /// Returns the committed state word of the root.
    #[must_use]
    pub fn root_state(&self, root: RootId) -> i64 {
        self.reconciler
            .units()
            .memoized_state(self.reconciler.root(root).current())
    }
}
