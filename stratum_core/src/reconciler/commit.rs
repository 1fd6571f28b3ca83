// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Applying a finished tree.
//!
//! A commit runs three passes over the finished tree back to back and
//! without yielding: before mutation, mutation, and layout. The committed
//! tree becomes current between the mutation and layout passes. Passive
//! effects run later, from a [`Task::FlushPassiveEffects`], or right after
//! the commit when it contained sync work. Every pass visits units children
//! first.

use alloc::vec::Vec;
use core::mem;

use super::{ExecutionContext, Reconciler};
use crate::error::{CapturedError, Invariant, ReconcileError};
use crate::host::{
    CommitContext, CooperativeScheduler, HostConfig, SchedulerPriority, Task, UnitEvaluator,
};
use crate::lane::{EventPriority, Lane, Lanes};
use crate::trace::{
    CommitStartEvent, CommitStopEvent, CommitSummaryBuilder, PhaseBeginEvent, PhaseEndEvent,
    PhaseKind,
};
use crate::unit::{
    EffectFlags, RootId, Transition, UnitId, UnitKind, deleted_subtree, effect_order,
};

/// Every flag any commit pass acts on.
const COMMIT_MASK: EffectFlags = EffectFlags::BEFORE_MUTATION_MASK
    .union(EffectFlags::MUTATION_MASK)
    .union(EffectFlags::LAYOUT_MASK)
    .union(EffectFlags::PASSIVE_MASK);

impl<S, H, E> Reconciler<S, H, E>
where
    S: CooperativeScheduler,
    H: HostConfig,
    E: UnitEvaluator,
{
    /// Commits the finished tree of `root` at discrete priority.
    pub(super) fn commit_root(
        &mut self,
        root_id: RootId,
        recoverable: Vec<CapturedError>,
        transitions: Vec<Transition>,
    ) -> Result<(), ReconcileError> {
        let previous_priority = self.event.update_priority.replace(EventPriority::Discrete);
        let previous_transition = self.event.transition.take();
        let result = self.commit_root_impl(root_id, recoverable, transitions);
        self.event.transition = previous_transition;
        self.event.update_priority = previous_priority;
        result
    }

    fn commit_root_impl(
        &mut self,
        root_id: RootId,
        recoverable: Vec<CapturedError>,
        transitions: Vec<Transition>,
    ) -> Result<(), ReconcileError> {
        // Effects of an earlier commit must run before this one changes the
        // tree under them.
        while self.flush_passive_effects()? {}

        if self
            .context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            return Err(Invariant::AlreadyWorking.into());
        }

        let root = &mut self.roots[root_id.0 as usize];
        let Some(finished) = root.finished_work.take() else {
            return Err(Invariant::NoFinishedWork.into());
        };
        let lanes = mem::replace(&mut root.finished_lanes, Lanes::NONE);
        if finished == root.current {
            return Err(Invariant::CommitCurrentTree.into());
        }
        // A new task is scheduled below if anything remains.
        root.callback_node = None;
        root.callback_priority = Lane::NONE;

        let start = self.scheduler.now();
        self.tracer.commit_start(&CommitStartEvent {
            root: root_id,
            lanes,
            timestamp: start,
        });
        let mut summary = CommitSummaryBuilder::new(root_id, lanes, self.wip.started_at, start);

        let remaining = self.units.lanes(finished)
            | self.units.child_lanes(finished)
            | self.concurrently_updated_lanes;
        self.roots[root_id.0 as usize].mark_finished(remaining);

        if self.wip.root == Some(root_id) {
            self.wip.root = None;
            self.wip.unit = None;
            self.wip.render_lanes = Lanes::NONE;
        }

        let flags = self.units.flags(finished) | self.units.subtree_flags(finished);
        // Transitions are reported from the passive flush, so they need one.
        let has_passive = flags.intersects(EffectFlags::PASSIVE_MASK) || !transitions.is_empty();
        if has_passive {
            self.scheduler
                .schedule_task(SchedulerPriority::Normal, Task::FlushPassiveEffects);
        }

        let drained = if flags.intersects(COMMIT_MASK) {
            let previous = self.context;
            self.context |= ExecutionContext::COMMIT;
            self.run_commit_passes(root_id, finished, lanes, &mut summary);
            let drained = self.drain_requests();
            self.context = previous;
            drained
        } else {
            self.roots[root_id.0 as usize].current = finished;
            Ok(())
        };

        if has_passive {
            self.passive.root = Some(root_id);
            self.passive.lanes = lanes;
            self.passive.remaining = remaining;
            self.passive.transitions = transitions;
        } else if let Some(cache) = self.roots[root_id.0 as usize].release_pooled_cache(remaining) {
            self.host.release_cache(cache);
        }

        let end = self.scheduler.now();
        let remaining = self.roots[root_id.0 as usize].pending_lanes;
        self.tracer.commit_stop(&CommitStopEvent {
            root: root_id,
            remaining,
            timestamp: end,
        });
        if self.tracer.is_enabled() {
            #[expect(clippy::cast_possible_truncation, reason = "error counts stay small")]
            let count = recoverable.len() as u32;
            self.tracer
                .commit_summary(&summary.finish(end, remaining, count));
        }

        self.ensure_root_is_scheduled(root_id, end);
        for error in &recoverable {
            self.host.on_recoverable_error(root_id, error);
        }
        drained?;
        if let Some(error) = self.first_uncaught_error.take() {
            return Err(ReconcileError::Uncaught(error));
        }

        // Sync work is expected to be fully applied, effects included, by the
        // time it returns.
        if self.passive.lanes.has(Lane::SYNC) && self.roots[root_id.0 as usize].mode.is_concurrent()
        {
            self.flush_passive_effects()?;
        }

        let remaining = self.roots[root_id.0 as usize].pending_lanes;
        if remaining.has(Lane::SYNC) {
            if self.nested_update_root == Some(root_id) {
                self.nested_update_count += 1;
            } else {
                self.nested_update_count = 0;
                self.nested_update_root = Some(root_id);
            }
        } else {
            self.nested_update_count = 0;
        }

        self.flush_sync_callbacks()
    }

    /// Runs the before-mutation, mutation, and layout passes and makes
    /// `finished` current.
    fn run_commit_passes(
        &mut self,
        root_id: RootId,
        finished: UnitId,
        lanes: Lanes,
        summary: &mut CommitSummaryBuilder,
    ) {
        self.begin_phase(root_id, PhaseKind::BeforeMutation, summary);
        for unit in effect_order(&self.units, finished, EffectFlags::BEFORE_MUTATION_MASK) {
            let mut cx = CommitContext::new(&self.units, root_id, lanes, &mut self.requests);
            if let Err(error) = self.host.commit_before_mutation(&mut cx, unit) {
                let parent = self.units.parent(unit);
                self.capture_commit_phase_error(unit, parent, error);
            }
        }
        self.end_phase(root_id, PhaseKind::BeforeMutation, summary);

        self.begin_phase(root_id, PhaseKind::Mutation, summary);
        let order = effect_order(&self.units, finished, EffectFlags::MUTATION_MASK);
        #[expect(clippy::cast_possible_truncation, reason = "unit counts fit in u32")]
        summary.add_mutated_units(order.len() as u32);
        for unit in order {
            self.commit_mutation_on_unit(root_id, unit, lanes);
        }
        self.host.reset_after_commit(root_id);
        self.roots[root_id.0 as usize].current = finished;
        self.end_phase(root_id, PhaseKind::Mutation, summary);

        self.begin_phase(root_id, PhaseKind::Layout, summary);
        for unit in effect_order(&self.units, finished, EffectFlags::LAYOUT_MASK) {
            let mut cx = CommitContext::new(&self.units, root_id, lanes, &mut self.requests);
            if let Err(error) = self.host.commit_layout(&mut cx, unit) {
                let parent = self.units.parent(unit);
                self.capture_commit_phase_error(unit, parent, error);
            }
            let flags = self.units.flags(unit);
            if self.units.kind(unit).root().is_some()
                && flags.contains(EffectFlags::CALLBACK)
                && self.first_uncaught_error.is_none()
            {
                self.first_uncaught_error = self.units.captured_errors(unit).first().cloned();
            }
        }
        self.end_phase(root_id, PhaseKind::Layout, summary);

        self.scheduler.request_paint();
    }

    fn commit_mutation_on_unit(&mut self, root_id: RootId, unit: UnitId, lanes: Lanes) {
        let flags = self.units.flags(unit);
        if flags.contains(EffectFlags::CHILD_DELETION) {
            let deletions = self.units.deletions(unit).to_vec();
            for deleted in deletions {
                let mut cx = CommitContext::new(&self.units, root_id, lanes, &mut self.requests);
                if let Err(error) = self.host.commit_deletion(&mut cx, unit, deleted) {
                    self.capture_commit_phase_error(deleted, Some(unit), error);
                }
                self.units.detach(deleted);
            }
        }

        if flags.intersects(EffectFlags::MUTATION_MASK.difference(EffectFlags::CHILD_DELETION)) {
            let mut cx = CommitContext::new(&self.units, root_id, lanes, &mut self.requests);
            if let Err(error) = self.host.commit_mutation(&mut cx, unit) {
                let parent = self.units.parent(unit);
                self.capture_commit_phase_error(unit, parent, error);
            }
        }

        if self.units.kind(unit) == UnitKind::Suspense {
            if flags.contains(EffectFlags::UPDATE) && !self.units.wakeables(unit).is_empty() {
                self.attach_retry_listeners(unit);
            }
            if flags.contains(EffectFlags::VISIBILITY | EffectFlags::DID_CAPTURE) {
                self.most_recent_fallback_time = self.scheduler.now();
            }
        }
    }

    /// Runs pending passive effects. Returns `false` if there were none.
    ///
    /// Unmount effects of the whole tree run before any mount effect.
    pub(crate) fn flush_passive_effects(&mut self) -> Result<bool, ReconcileError> {
        if self.passive.root.is_none() {
            return Ok(false);
        }
        let priority = EventPriority::Default.lower(EventPriority::from_lanes(self.passive.lanes));
        let previous_priority = self.event.update_priority.replace(priority);
        let previous_transition = self.event.transition.take();
        let result = self.flush_passive_effects_impl();
        self.event.transition = previous_transition;
        self.event.update_priority = previous_priority;
        result.map(|()| true)
    }

    fn flush_passive_effects_impl(&mut self) -> Result<(), ReconcileError> {
        let Some(root_id) = self.passive.root.take() else {
            return Ok(());
        };
        let lanes = mem::replace(&mut self.passive.lanes, Lanes::NONE);
        let remaining = mem::replace(&mut self.passive.remaining, Lanes::NONE);
        let transitions = mem::take(&mut self.passive.transitions);

        if self
            .context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            return Err(Invariant::PassiveFlushWhileWorking.into());
        }

        self.passive.is_flushing = true;
        self.passive.did_schedule_update = false;
        let previous = self.context;
        self.context |= ExecutionContext::COMMIT;

        let start = self.scheduler.now();
        self.tracer.phase_begin(&PhaseBeginEvent {
            root: root_id,
            phase: PhaseKind::Passive,
            timestamp: start,
        });
        let current = self.roots[root_id.0 as usize].current;
        let order = effect_order(&self.units, current, EffectFlags::PASSIVE_MASK);
        for &unit in &order {
            let flags = self.units.flags(unit);
            if flags.contains(EffectFlags::CHILD_DELETION) {
                for deleted in self.units.deletions(unit).to_vec() {
                    for removed in deleted_subtree(&self.units, deleted) {
                        let mut cx =
                            CommitContext::new(&self.units, root_id, lanes, &mut self.requests);
                        if let Err(error) = self.host.commit_passive_unmount(&mut cx, removed) {
                            self.capture_commit_phase_error(removed, Some(unit), error);
                        }
                    }
                }
            }
            if flags.contains(EffectFlags::PASSIVE) && self.units.alternate(unit).is_some() {
                let mut cx = CommitContext::new(&self.units, root_id, lanes, &mut self.requests);
                if let Err(error) = self.host.commit_passive_unmount(&mut cx, unit) {
                    let parent = self.units.parent(unit);
                    self.capture_commit_phase_error(unit, parent, error);
                }
            }
        }
        for &unit in &order {
            if !self.units.flags(unit).contains(EffectFlags::PASSIVE) {
                continue;
            }
            let mut cx = CommitContext::new(&self.units, root_id, lanes, &mut self.requests);
            if let Err(error) = self.host.commit_passive_mount(&mut cx, unit) {
                let parent = self.units.parent(unit);
                self.capture_commit_phase_error(unit, parent, error);
            }
        }
        self.tracer.phase_end(&PhaseEndEvent {
            root: root_id,
            phase: PhaseKind::Passive,
            timestamp: self.scheduler.now(),
        });

        let drained = self.drain_requests();
        self.context = previous;

        if self.passive.did_schedule_update {
            if self.passive.nested_root == Some(root_id) {
                self.passive.nested_count += 1;
            } else {
                self.passive.nested_count = 0;
                self.passive.nested_root = Some(root_id);
            }
        } else {
            self.passive.nested_count = 0;
        }
        self.passive.is_flushing = false;
        self.passive.did_schedule_update = false;

        if !transitions.is_empty() {
            self.roots[root_id.0 as usize]
                .pending_transition_callbacks
                .extend(transitions);
            self.scheduler
                .schedule_task(SchedulerPriority::Idle, Task::TransitionCallbacks(root_id));
        }
        if let Some(cache) = self.roots[root_id.0 as usize].release_pooled_cache(remaining) {
            self.host.release_cache(cache);
        }

        drained?;
        self.flush_sync_callbacks()
    }

    /// Reports the transitions of `root` that finished since the last call.
    pub(super) fn run_transition_callbacks(&mut self, root_id: RootId) {
        let completed = mem::take(&mut self.roots[root_id.0 as usize].pending_transition_callbacks);
        if completed.is_empty() {
            return;
        }
        let end = self.scheduler.now();
        self.host.on_transitions_complete(root_id, &completed, end);
    }

    fn begin_phase(&mut self, root: RootId, phase: PhaseKind, summary: &mut CommitSummaryBuilder) {
        let timestamp = self.scheduler.now();
        summary.phase_begin(phase, timestamp);
        self.tracer.phase_begin(&PhaseBeginEvent {
            root,
            phase,
            timestamp,
        });
    }

    fn end_phase(&mut self, root: RootId, phase: PhaseKind, summary: &mut CommitSummaryBuilder) {
        let timestamp = self.scheduler.now();
        summary.phase_end(phase, timestamp);
        self.tracer.phase_end(&PhaseEndEvent {
            root,
            phase,
            timestamp,
        });
    }
}
