// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The interruptible depth-first work loop.
//!
//! A render walks the in-progress tree one unit at a time. `begin` runs on
//! the way down; when a unit has no more children to visit, `complete` runs
//! on the way up, and the walk continues with the sibling or the parent.
//! Units flagged [`INCOMPLETE`](EffectFlags::INCOMPLETE) are unwound
//! instead of completed until a boundary restarts the walk below itself.

use alloc::vec::Vec;
use core::mem;

use super::{ExecutionContext, Reconciler};
use crate::error::{CapturedError, Invariant, ReconcileError, UnitError};
use crate::host::{CooperativeScheduler, EvalContext, HostConfig, Step, UnitEvaluator};
use crate::lane::Lanes;
use crate::trace::{RenderStartEvent, RenderStopEvent, RenderYieldEvent};
use crate::unit::{EffectFlags, RootId, Transition, UnitId, WakeableId};

/// Outcome of a render attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// The attempt yielded and can resume.
    InProgress,
    /// A unit with no ancestor failed.
    FatalErrored,
    /// A boundary captured an error.
    Errored,
    /// A unit is blocked on a dependency; a fallback can be shown.
    Suspended,
    /// A unit is blocked and showing a fallback now would hide content that
    /// is already visible.
    SuspendedWithDelay,
    /// The tree finished.
    Completed,
    /// The attempt was abandoned at the root.
    DidNotComplete,
}

/// What a unit threw instead of finishing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum Thrown {
    Suspend(WakeableId),
    Fail(UnitError),
}

/// Builds an [`EvalContext`] from split borrows of the reconciler.
macro_rules! eval_cx {
    ($self:ident, $root:expr, $has_update:expr) => {{
        let root_state = &mut $self.roots[$root.0 as usize];
        EvalContext::new(
            &mut $self.units,
            $root,
            $self.wip.render_lanes,
            $has_update,
            &mut $self.wip.skipped_lanes,
            &mut $self.requests,
            &mut root_state.pooled_cache,
            &mut root_state.pooled_cache_lanes,
        )
    }};
}

impl<S, H, E> Reconciler<S, H, E>
where
    S: CooperativeScheduler,
    H: HostConfig,
    E: UnitEvaluator,
{
    /// Throws away any in-progress render and starts a new one on `lanes`.
    ///
    /// A pending commit timeout is cancelled and the ancestors of the
    /// abandoned unit are handed to
    /// [`UnitEvaluator::unwind_interrupted`]. Updates buffered since the last
    /// attempt are attached to their units.
    pub(super) fn prepare_fresh_stack(&mut self, root_id: RootId, lanes: Lanes) {
        let root = &mut self.roots[root_id.0 as usize];
        root.finished_work = None;
        root.finished_lanes = Lanes::NONE;
        if let Some(handle) = root.timeout_handle.take() {
            root.deferred_commit = None;
            self.host.cancel_timeout(handle);
        }
        let current = root.current;
        let transitions = root.transitions_for_lanes(lanes);

        if let Some(abandoned) = self.wip.unit {
            let mut node = self.units.parent(abandoned);
            while let Some(unit) = node {
                self.evaluator.unwind_interrupted(&self.units, unit);
                node = self.units.parent(unit);
            }
        }

        let head = self.units.create_work_in_progress(current);
        let wip = &mut self.wip;
        wip.root = Some(root_id);
        wip.unit = Some(head);
        wip.render_lanes = lanes;
        wip.exit_status = ExitStatus::InProgress;
        wip.fatal_error = None;
        wip.skipped_lanes = Lanes::NONE;
        wip.interleaved_lanes = Lanes::NONE;
        wip.render_phase_lanes = Lanes::NONE;
        wip.pinged_lanes = Lanes::NONE;
        wip.concurrent_errors.clear();
        wip.recoverable_errors.clear();
        wip.transitions = transitions;
        wip.started_at = Some(self.scheduler.now());

        self.finish_queueing_concurrent_updates();
    }

    /// Renders `lanes` of `root` to completion without yielding.
    pub(super) fn render_root_sync(
        &mut self,
        root_id: RootId,
        lanes: Lanes,
    ) -> Result<ExitStatus, ReconcileError> {
        let previous = self.context;
        self.context |= ExecutionContext::RENDER;
        let fresh = self.wip.root != Some(root_id) || self.wip.render_lanes != lanes;
        if fresh {
            self.prepare_fresh_stack(root_id, lanes);
        }
        self.tracer.render_start(&RenderStartEvent {
            root: root_id,
            lanes,
            time_sliced: false,
            fresh,
            timestamp: self.scheduler.now(),
        });

        while let Some(unit) = self.wip.unit {
            if let Err(thrown) = self.perform_unit_of_work(root_id, unit) {
                self.handle_error(root_id, thrown);
            }
        }

        let drained = self.drain_requests();
        self.context = previous;
        drained?;
        if self.wip.unit.is_some() {
            return Err(Invariant::IncompleteRender.into());
        }
        Ok(self.finish_render(root_id, lanes))
    }

    /// Renders `lanes` of `root` until done or until the scheduler asks to
    /// yield. Returns [`ExitStatus::InProgress`] after a yield.
    pub(super) fn render_root_concurrent(
        &mut self,
        root_id: RootId,
        lanes: Lanes,
    ) -> Result<ExitStatus, ReconcileError> {
        let previous = self.context;
        self.context |= ExecutionContext::RENDER;
        let fresh = self.wip.root != Some(root_id) || self.wip.render_lanes != lanes;
        if fresh {
            self.prepare_fresh_stack(root_id, lanes);
        }
        self.tracer.render_start(&RenderStartEvent {
            root: root_id,
            lanes,
            time_sliced: true,
            fresh,
            timestamp: self.scheduler.now(),
        });

        while let Some(unit) = self.wip.unit {
            if self.scheduler.should_yield() {
                break;
            }
            if let Err(thrown) = self.perform_unit_of_work(root_id, unit) {
                self.handle_error(root_id, thrown);
            }
        }

        let drained = self.drain_requests();
        self.context = previous;
        drained?;
        if self.wip.unit.is_some() {
            self.tracer.render_yield(&RenderYieldEvent {
                root: root_id,
                lanes,
                timestamp: self.scheduler.now(),
            });
            return Ok(ExitStatus::InProgress);
        }
        Ok(self.finish_render(root_id, lanes))
    }

    /// Closes a finished attempt. Its status and errors stay readable.
    fn finish_render(&mut self, root_id: RootId, lanes: Lanes) -> ExitStatus {
        self.finish_queueing_concurrent_updates();
        self.wip.root = None;
        self.wip.render_lanes = Lanes::NONE;
        let status = self.wip.exit_status;
        self.tracer.render_stop(&RenderStopEvent {
            root: root_id,
            lanes,
            status,
            timestamp: self.scheduler.now(),
        });
        status
    }

    /// Begins `unit` and moves to its first child, or completes it.
    fn perform_unit_of_work(&mut self, root_id: RootId, unit: UnitId) -> Result<(), Thrown> {
        let u = unit.0 as usize;
        let render_lanes = self.wip.render_lanes;
        let has_update = self.units.lanes[u].intersects(render_lanes);
        self.units.lanes[u] = self.units.lanes[u].remove(render_lanes);
        let current = self.units.alternate(unit);

        let step = {
            let mut cx = eval_cx!(self, root_id, has_update);
            self.evaluator.begin(&mut cx, current, unit)
        };
        match step {
            Step::Continue(next) => {
                self.wip.unit = Some(next);
                Ok(())
            }
            Step::Done => self.complete_unit_of_work(root_id, unit),
            Step::Suspend(wakeable) => Err(Thrown::Suspend(wakeable)),
            Step::Fail(error) => Err(Thrown::Fail(error)),
        }
    }

    /// Completes `unit` and its ancestors until one has a sibling left to
    /// visit or the root is reached.
    pub(super) fn complete_unit_of_work(
        &mut self,
        root_id: RootId,
        unit: UnitId,
    ) -> Result<(), Thrown> {
        let mut completed = unit;
        loop {
            let current = self.units.alternate(completed);
            let parent = self.units.parent(completed);

            if !self.units.flags(completed).contains(EffectFlags::INCOMPLETE) {
                let step = {
                    let mut cx = eval_cx!(self, root_id, false);
                    self.evaluator.complete(&mut cx, current, completed)
                };
                match step {
                    Step::Continue(next) => {
                        self.wip.unit = Some(next);
                        return Ok(());
                    }
                    Step::Done => self.units.bubble_properties(completed),
                    Step::Suspend(wakeable) => {
                        self.wip.unit = Some(completed);
                        return Err(Thrown::Suspend(wakeable));
                    }
                    Step::Fail(error) => {
                        self.wip.unit = Some(completed);
                        return Err(Thrown::Fail(error));
                    }
                }
            } else {
                let next = {
                    let mut cx = eval_cx!(self, root_id, false);
                    self.evaluator.unwind(&mut cx, current, completed)
                };
                if let Some(next) = next {
                    // Restart below the boundary that captured. Only host
                    // effects survive the unwind.
                    let n = next.0 as usize;
                    self.units.flags[n] = self.units.flags[n].intersection(EffectFlags::HOST_EFFECT_MASK);
                    self.wip.unit = Some(next);
                    return Ok(());
                }
                match parent {
                    Some(parent) => self.units.mark_incomplete(parent),
                    None => {
                        self.wip.exit_status = ExitStatus::DidNotComplete;
                        self.wip.unit = None;
                        return Ok(());
                    }
                }
            }

            if let Some(sibling) = self.units.next_sibling(completed) {
                self.wip.unit = Some(sibling);
                return Ok(());
            }
            match parent {
                Some(parent) => {
                    completed = parent;
                    self.wip.unit = Some(parent);
                }
                None => {
                    self.wip.unit = None;
                    break;
                }
            }
        }

        if self.wip.exit_status == ExitStatus::InProgress {
            self.wip.exit_status = ExitStatus::Completed;
        }
        Ok(())
    }

    /// Recovers from a unit that suspended or failed.
    ///
    /// The throw is delivered to the nearest capable ancestor and the failed
    /// unit is completed as incomplete. If that completion throws again, the
    /// new throw is handled one level further up.
    fn handle_error(&mut self, root_id: RootId, mut thrown: Thrown) {
        loop {
            self.evaluator.reset_after_throw();
            let errored = self.wip.unit;
            let Some((errored, parent)) =
                errored.and_then(|unit| self.units.parent(unit).map(|parent| (unit, parent)))
            else {
                self.fatal_render_error(root_id, errored, thrown);
                return;
            };

            self.throw_exception(root_id, parent, errored, thrown);
            match self.complete_unit_of_work(root_id, errored) {
                Ok(()) => return,
                Err(next) => {
                    thrown = next;
                    if self.wip.unit == Some(errored) {
                        self.wip.unit = self.units.parent(errored);
                    }
                }
            }
        }
    }

    /// Marks the attempt fatally failed at `unit` (or at the root head).
    fn fatal_render_error(&mut self, root_id: RootId, unit: Option<UnitId>, thrown: Thrown) {
        let origin = unit.unwrap_or(self.roots[root_id.0 as usize].current);
        let error = match thrown {
            Thrown::Fail(error) => error,
            Thrown::Suspend(wakeable) => UnitError::new(alloc::format!(
                "unit suspended on {wakeable:?} with no ancestor to show a fallback"
            )),
        };
        self.wip.exit_status = ExitStatus::FatalErrored;
        self.wip.fatal_error = Some(CapturedError::new(error, origin));
        self.wip.unit = None;
    }

    /// Takes the recoverable errors and transitions of the last attempt.
    pub(super) fn take_commit_payload(&mut self) -> (Vec<CapturedError>, Vec<Transition>) {
        (
            mem::take(&mut self.wip.recoverable_errors),
            mem::take(&mut self.wip.transitions),
        )
    }
}
