// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Root scheduling, update entry points, and batching scopes.

use core::mem;

use super::{ExecutionContext, ExitStatus, Reconciler};
use crate::error::{Invariant, ReconcileError};
use crate::host::{
    CooperativeScheduler, HostConfig, Microtask, SchedulerPriority, Task, TaskHandle, TaskStatus,
    UnitEvaluator,
};
use crate::lane::{EventPriority, Lane, Lanes};
use crate::time::Timestamp;
use crate::trace::{TaskCancelledEvent, TaskScheduledEvent};
use crate::unit::{RootId, Transition, UnitId, Update, UpdateAction};

impl<S, H, E> Reconciler<S, H, E>
where
    S: CooperativeScheduler,
    H: HostConfig,
    E: UnitEvaluator,
{
    // -- Root scheduler --

    /// Makes sure `root` has exactly one task for its next lanes.
    ///
    /// Called after every update and at the end of every render and commit.
    /// A root keeps its task while the priority of its next lanes is
    /// unchanged; otherwise the old task is cancelled and a new one is
    /// scheduled. Synchronous work goes on the sync queue instead, flushed
    /// from a microtask.
    pub(crate) fn ensure_root_is_scheduled(&mut self, root_id: RootId, now: Timestamp) {
        let wip_lanes = if self.wip.root == Some(root_id) {
            self.wip.render_lanes
        } else {
            Lanes::NONE
        };
        let root = &mut self.roots[root_id.0 as usize];
        let existing = root.callback_node;
        root.mark_starved_lanes_as_expired(now, &self.config);
        let next = root.next_lanes(wip_lanes);

        if next.is_empty() {
            root.callback_node = None;
            root.callback_priority = Lane::NONE;
            if let Some(handle) = existing {
                self.scheduler.cancel_task(handle);
                self.tracer.task_cancelled(&TaskCancelledEvent {
                    root: root_id,
                    handle,
                    timestamp: now,
                });
            }
            return;
        }

        let priority = next.highest_priority();
        if priority == root.callback_priority {
            return;
        }
        if let Some(handle) = existing {
            self.scheduler.cancel_task(handle);
            self.tracer.task_cancelled(&TaskCancelledEvent {
                root: root_id,
                handle,
                timestamp: now,
            });
        }

        let (node, scheduler_priority) = if priority == Lane::SYNC {
            self.sync_queue.roots.push(root_id);
            self.scheduler.schedule_microtask(Microtask::FlushSyncQueue);
            (None, SchedulerPriority::Immediate)
        } else {
            let level = SchedulerPriority::from_event_priority(EventPriority::from_lanes(next));
            let handle = self
                .scheduler
                .schedule_task(level, Task::PerformWork(root_id));
            (Some(handle), level)
        };
        root.callback_priority = priority;
        root.callback_node = node;
        self.tracer.task_scheduled(&TaskScheduledEvent {
            root: root_id,
            lane: priority,
            priority: scheduler_priority,
            handle: node,
            timestamp: now,
        });
    }

    /// Body of a [`Task::PerformWork`].
    pub(super) fn perform_concurrent_work_on_root(
        &mut self,
        root_id: RootId,
        handle: TaskHandle,
        did_timeout: bool,
    ) -> Result<TaskStatus, ReconcileError> {
        self.event.current_event_time = None;
        self.event.current_event_transition_lane = Lane::NONE;

        if self
            .context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            return Err(Invariant::AlreadyWorking.into());
        }

        // Passive effects may schedule work that supersedes this task.
        let did_flush = self.flush_passive_effects()?;
        if did_flush && self.roots[root_id.0 as usize].callback_node != Some(handle) {
            return Ok(TaskStatus::Done);
        }

        let wip_lanes = if self.wip.root == Some(root_id) {
            self.wip.render_lanes
        } else {
            Lanes::NONE
        };
        let mut lanes = self.roots[root_id.0 as usize].next_lanes(wip_lanes);
        if lanes.is_empty() {
            return Ok(TaskStatus::Done);
        }

        let time_slice = !lanes.includes_blocking()
            && !lanes.intersects(self.roots[root_id.0 as usize].expired_lanes)
            && !did_timeout;
        let mut status = if time_slice {
            self.render_root_concurrent(root_id, lanes)?
        } else {
            self.render_root_sync(root_id, lanes)?
        };

        if status != ExitStatus::InProgress {
            if status == ExitStatus::Errored {
                let retry = self.roots[root_id.0 as usize].lanes_to_retry_synchronously_on_error();
                if !retry.is_empty() {
                    lanes = retry;
                    status = self.recover_from_concurrent_error(root_id, retry)?;
                }
            }
            if status == ExitStatus::FatalErrored {
                return Err(self.abort_fatal_render(root_id, lanes));
            }
            if status == ExitStatus::DidNotComplete {
                self.mark_root_suspended(root_id, lanes);
            } else {
                let root = &mut self.roots[root_id.0 as usize];
                root.finished_work = self.units.alternate(root.current);
                root.finished_lanes = lanes;
                self.finish_concurrent_render(root_id, status, lanes)?;
            }
        }

        let now = self.scheduler.now();
        self.ensure_root_is_scheduled(root_id, now);
        if self.roots[root_id.0 as usize].callback_node == Some(handle) {
            Ok(TaskStatus::Continue)
        } else {
            Ok(TaskStatus::Done)
        }
    }

    /// Renders and commits the sync lanes of `root` without yielding.
    pub(super) fn perform_sync_work_on_root(
        &mut self,
        root_id: RootId,
    ) -> Result<(), ReconcileError> {
        if self
            .context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            return Err(Invariant::AlreadyWorking.into());
        }
        self.flush_passive_effects()?;

        let mut lanes = self.roots[root_id.0 as usize].next_lanes(Lanes::NONE);
        if !lanes.has(Lane::SYNC) {
            let now = self.scheduler.now();
            self.ensure_root_is_scheduled(root_id, now);
            return Ok(());
        }

        let mut status = self.render_root_sync(root_id, lanes)?;
        if self.roots[root_id.0 as usize].mode.is_concurrent() && status == ExitStatus::Errored {
            let retry = self.roots[root_id.0 as usize].lanes_to_retry_synchronously_on_error();
            if !retry.is_empty() {
                lanes = retry;
                status = self.recover_from_concurrent_error(root_id, retry)?;
            }
        }
        if status == ExitStatus::FatalErrored {
            return Err(self.abort_fatal_render(root_id, lanes));
        }
        if status == ExitStatus::DidNotComplete {
            return Err(Invariant::SyncRenderDidNotComplete.into());
        }

        let root = &mut self.roots[root_id.0 as usize];
        root.finished_work = self.units.alternate(root.current);
        root.finished_lanes = lanes;
        let (recoverable, transitions) = self.take_commit_payload();
        self.commit_root(root_id, recoverable, transitions)?;

        let now = self.scheduler.now();
        self.ensure_root_is_scheduled(root_id, now);
        Ok(())
    }

    /// Renders every queued root with sync work.
    ///
    /// A failure stops the flush; the roots not yet flushed stay queued and
    /// an [`Immediate`](SchedulerPriority::Immediate) task resumes them.
    pub(crate) fn flush_sync_callbacks(&mut self) -> Result<(), ReconcileError> {
        if self.sync_queue.is_flushing || self.sync_queue.roots.is_empty() {
            return Ok(());
        }
        self.sync_queue.is_flushing = true;
        let previous_priority = self.event.update_priority.replace(EventPriority::Discrete);

        let mut result = Ok(());
        let mut i = 0;
        while i < self.sync_queue.roots.len() {
            let root = self.sync_queue.roots[i];
            i += 1;
            if let Err(error) = self.perform_sync_work_on_root(root) {
                result = Err(error);
                break;
            }
        }
        if result.is_err() {
            self.sync_queue.roots = self.sync_queue.roots.split_off(i);
            self.scheduler
                .schedule_task(SchedulerPriority::Immediate, Task::FlushSyncQueue);
        } else {
            self.sync_queue.roots.clear();
        }

        self.event.update_priority = previous_priority;
        self.sync_queue.is_flushing = false;
        result
    }

    // -- Updates --

    /// Queues `action` on `unit` and schedules its root.
    ///
    /// The lane is chosen from the current scope: sync outside concurrent
    /// mode, the render lanes for updates issued while rendering, the
    /// event's transition lane inside [`start_transition`](Self::start_transition),
    /// and the current update priority or the host's event priority
    /// otherwise. A sync update issued outside any batch is rendered and
    /// committed before this returns.
    ///
    /// Updates on units no longer attached to a root are dropped.
    ///
    /// # Panics
    ///
    /// Panics if `unit` was not created by this reconciler.
    pub fn enqueue_update(
        &mut self,
        unit: UnitId,
        action: UpdateAction,
    ) -> Result<Lane, ReconcileError> {
        self.units.validate(unit);
        let event_time = self.request_event_time();
        let lane = self.request_update_lane(unit);
        let update = Update {
            lane,
            action,
            transition: self.event.transition,
        };
        if let Some(root) = self.enqueue_concurrent_update(unit, update) {
            self.schedule_update_on_unit(root, lane, event_time)?;
        }
        Ok(lane)
    }

    /// Queues `action` on the head unit of `root`.
    pub fn update_root(
        &mut self,
        root: RootId,
        action: UpdateAction,
    ) -> Result<Lane, ReconcileError> {
        self.validate_root(root);
        let head = self.roots[root.0 as usize].current;
        self.enqueue_update(head, action)
    }

    /// Records an update in `lane` on `root` and makes sure the root is
    /// scheduled.
    pub(crate) fn schedule_update_on_unit(
        &mut self,
        root_id: RootId,
        lane: Lane,
        event_time: Timestamp,
    ) -> Result<(), ReconcileError> {
        self.check_for_nested_updates()?;
        if self.passive.is_flushing {
            self.passive.did_schedule_update = true;
        }
        self.roots[root_id.0 as usize].mark_updated(lane, event_time);

        if self.context.contains(ExecutionContext::RENDER) && self.wip.root == Some(root_id) {
            self.wip.render_phase_lanes |= lane;
            return Ok(());
        }

        if let Some(transition) = &mut self.event.transition {
            if transition.start_time.is_none() {
                transition.start_time = Some(self.scheduler.now());
            }
            self.roots[root_id.0 as usize].add_transition(lane, *transition);
        }

        if self.wip.root == Some(root_id) {
            self.wip.interleaved_lanes |= lane;
            if self.wip.exit_status == ExitStatus::SuspendedWithDelay {
                let render_lanes = self.wip.render_lanes;
                self.mark_root_suspended(root_id, render_lanes);
            }
        }

        self.ensure_root_is_scheduled(root_id, event_time);
        if lane == Lane::SYNC && self.context == ExecutionContext::NONE {
            self.flush_sync_callbacks()?;
        }
        Ok(())
    }

    /// Returns the event time for a new update. Updates within one event
    /// share it.
    pub(crate) fn request_event_time(&mut self) -> Timestamp {
        if self
            .context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            return self.scheduler.now();
        }
        if let Some(time) = self.event.current_event_time {
            return time;
        }
        let now = self.scheduler.now();
        self.event.current_event_time = Some(now);
        now
    }

    /// Picks the lane for a new update on `unit`.
    pub(crate) fn request_update_lane(&mut self, unit: UnitId) -> Lane {
        if !self.units.mode(unit).is_concurrent() {
            return Lane::SYNC;
        }
        if self.context.contains(ExecutionContext::RENDER) && !self.wip.render_lanes.is_empty() {
            return self.wip.render_lanes.pick_arbitrary();
        }
        if self.event.transition.is_some() {
            if self.event.current_event_transition_lane.is_none() {
                self.event.current_event_transition_lane = self.lanes.claim_transition_lane();
            }
            return self.event.current_event_transition_lane;
        }
        if let Some(priority) = self.event.update_priority {
            return priority.lane();
        }
        self.host.current_event_priority().lane()
    }

    /// Buffers an update until the next render attaches it, and returns the
    /// root `unit` belongs to.
    ///
    /// The unit's own lanes are marked right away so a bailout cannot skip
    /// it.
    pub(crate) fn enqueue_concurrent_update(
        &mut self,
        unit: UnitId,
        update: Update,
    ) -> Option<RootId> {
        self.concurrently_updated_lanes |= update.lane;
        self.units.merge_lanes_on_pair(unit, update.lane);
        self.concurrent_queue.push((unit, update));
        self.units.root_of(unit)
    }

    /// Moves buffered updates onto their units' queues and marks the path to
    /// the root.
    pub(super) fn finish_queueing_concurrent_updates(&mut self) {
        self.concurrently_updated_lanes = Lanes::NONE;
        for (unit, update) in mem::take(&mut self.concurrent_queue) {
            let lane = update.lane;
            self.units.enqueue_pending(unit, update);
            self.units.mark_update_lane_to_root(unit, lane);
        }
    }

    /// Schedules the updates effects and evaluators requested.
    pub(super) fn drain_requests(&mut self) -> Result<(), ReconcileError> {
        while !self.requests.is_empty() {
            for request in mem::take(&mut self.requests) {
                self.enqueue_update(request.unit, request.action)?;
            }
        }
        Ok(())
    }

    // -- Scopes --

    /// Runs `f` with sync flushing deferred to the end of the scope.
    pub fn batched_updates<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, ReconcileError> {
        let previous = self.context;
        self.context |= ExecutionContext::BATCHED;
        let out = f(self);
        self.context = previous;
        if self.context == ExecutionContext::NONE {
            self.flush_sync_callbacks()?;
        }
        Ok(out)
    }

    /// Runs `f` with updates at discrete priority.
    pub fn discrete_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous_priority = self.event.update_priority.replace(EventPriority::Discrete);
        let previous_transition = self.event.transition.take();
        let out = f(self);
        self.event.update_priority = previous_priority;
        self.event.transition = previous_transition;
        out
    }

    /// Runs `f` with updates at default priority, outside any transition.
    pub fn deferred_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous_priority = self.event.update_priority.replace(EventPriority::Default);
        let previous_transition = self.event.transition.take();
        let out = f(self);
        self.event.update_priority = previous_priority;
        self.event.transition = previous_transition;
        out
    }

    /// Runs `f` with updates at discrete priority, then flushes all sync
    /// work before returning.
    ///
    /// Inside a render or commit the flush is skipped.
    pub fn flush_sync<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, ReconcileError> {
        let previous_context = self.context;
        self.context |= ExecutionContext::BATCHED;
        let previous_priority = self.event.update_priority.replace(EventPriority::Discrete);
        let previous_transition = self.event.transition.take();
        let out = f(self);
        self.event.update_priority = previous_priority;
        self.event.transition = previous_transition;
        self.context = previous_context;
        if !self
            .context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            self.flush_sync_callbacks()?;
        }
        Ok(out)
    }

    /// Runs `f` with its updates tagged with `transition`.
    ///
    /// Updates issued in one call share a transition lane.
    pub fn start_transition<R>(
        &mut self,
        transition: Transition,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let previous = self.event.transition.replace(transition);
        let out = f(self);
        self.event.transition = previous;
        out
    }

    /// Renders `lanes` of `root` synchronously now, together with any sync
    /// work.
    pub fn flush_root(&mut self, root_id: RootId, lanes: Lanes) -> Result<(), ReconcileError> {
        self.validate_root(root_id);
        if lanes.is_empty() {
            return Ok(());
        }
        let now = self.scheduler.now();
        let root = &mut self.roots[root_id.0 as usize];
        root.mark_entangled(lanes | Lane::SYNC);
        root.mark_updated(Lane::SYNC, now);
        self.ensure_root_is_scheduled(root_id, now);
        if !self
            .context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
        {
            self.flush_sync_callbacks()?;
        }
        Ok(())
    }

    // -- Guards --

    /// Fails once a root re-commits synchronously or passive effects
    /// schedule updates too many times in a row. Both counters reset.
    pub(super) fn check_for_nested_updates(&mut self) -> Result<(), ReconcileError> {
        if self.nested_update_count > self.config.nested_update_limit {
            self.nested_update_count = 0;
            self.nested_update_root = None;
            self.passive.nested_count = 0;
            self.passive.nested_root = None;
            return Err(ReconcileError::MaxUpdateDepth);
        }
        if self.passive.nested_count > self.config.nested_passive_update_limit {
            self.nested_update_count = 0;
            self.nested_update_root = None;
            self.passive.nested_count = 0;
            self.passive.nested_root = None;
            return Err(ReconcileError::MaxPassiveUpdateDepth);
        }
        Ok(())
    }

    /// Throws away a fatally failed attempt, suspends its lanes, and returns
    /// the error to raise.
    fn abort_fatal_render(&mut self, root_id: RootId, lanes: Lanes) -> ReconcileError {
        let error = self.wip.fatal_error.take();
        self.prepare_fresh_stack(root_id, Lanes::NONE);
        self.mark_root_suspended(root_id, lanes);
        let now = self.scheduler.now();
        self.ensure_root_is_scheduled(root_id, now);
        match error {
            Some(error) => ReconcileError::Fatal(error),
            None => Invariant::IncompleteRender.into(),
        }
    }
}
