// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A host that records every effect it is asked to apply.

use alloc::string::String;
use alloc::vec::Vec;

use stratum_core::error::{CapturedError, UnitError};
use stratum_core::host::{CacheHandle, CommitContext, HostConfig, TimeoutHandle, TimeoutTask};
use stratum_core::lane::EventPriority;
use stratum_core::time::{Duration, Timestamp};
use stratum_core::unit::{EffectFlags, RootId, Transition, TypeTag, UnitId, UpdateAction};

/// A host callback that touches one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommitPass {
    /// `commit_before_mutation`.
    BeforeMutation,
    /// `commit_mutation`.
    Mutation,
    /// `commit_deletion`, reported for the deleted unit.
    Deletion,
    /// `commit_layout`.
    Layout,
    /// `commit_passive_unmount`.
    PassiveUnmount,
    /// `commit_passive_mount`.
    PassiveMount,
}

/// One entry of the [`RecordingHost`] log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostOp {
    /// A per-unit callback ran.
    Effect {
        /// Which callback.
        pass: CommitPass,
        /// Type of the unit it ran for.
        tag: TypeTag,
        /// Effect flags of the unit when the callback ran.
        flags: EffectFlags,
    },
    /// `reset_after_commit` ran.
    ResetAfterCommit(RootId),
    /// A recoverable error was reported.
    RecoverableError {
        /// Root that committed.
        root: RootId,
        /// The error message.
        message: String,
    },
    /// Transitions were reported complete.
    TransitionsComplete {
        /// Root that committed them.
        root: RootId,
        /// Ids of the transitions, in report order.
        ids: Vec<u32>,
        /// Reported end time.
        end: Timestamp,
    },
    /// A pooled cache was released.
    CacheReleased(CacheHandle),
}

/// A delayed commit the reconciler asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingTimeout {
    /// Handle returned to the reconciler.
    pub handle: TimeoutHandle,
    /// What to run.
    pub task: TimeoutTask,
    /// Requested delay.
    pub delay: Duration,
    /// When the delay started counting; filled in by the driver.
    pub armed_at: Option<Timestamp>,
}

impl PendingTimeout {
    /// Returns when the timeout fires, once armed.
    #[must_use]
    pub fn due(&self) -> Option<Timestamp> {
        self.armed_at.map(|at| at + self.delay)
    }
}

#[derive(Clone, Copy, Debug)]
struct Failure {
    pass: CommitPass,
    tag: TypeTag,
}

#[derive(Clone, Debug)]
struct FollowUp {
    pass: CommitPass,
    tag: TypeTag,
    action: UpdateAction,
    remaining: u32,
}

/// [`HostConfig`] that logs every callback and can be told to fail.
///
/// Timeouts are queued, not run. A driver arms them with the current time
/// and hands them back through
/// [`Reconciler::run_timeout`](stratum_core::reconciler::Reconciler::run_timeout)
/// when they fall due.
#[derive(Debug, Default)]
pub struct RecordingHost {
    log: Vec<HostOp>,
    failures: Vec<Failure>,
    follow_ups: Vec<FollowUp>,
    next_timeout: u64,
    timeouts: Vec<PendingTimeout>,
    event_priority: Option<EventPriority>,
}

impl RecordingHost {
    /// Creates a host with an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `pass` callback for a unit of type `tag` fail.
    pub fn fail_once(&mut self, pass: CommitPass, tag: TypeTag) {
        self.failures.push(Failure { pass, tag });
    }

    /// Makes the next `times` `pass` callbacks for units of type `tag`
    /// request `action` on that unit. `u32::MAX` never runs out.
    pub fn follow_up(&mut self, pass: CommitPass, tag: TypeTag, action: UpdateAction, times: u32) {
        self.follow_ups.push(FollowUp {
            pass,
            tag,
            action,
            remaining: times,
        });
    }

    /// Sets the priority reported for updates issued outside any scope.
    pub fn set_event_priority(&mut self, priority: Option<EventPriority>) {
        self.event_priority = priority;
    }

    /// Returns the log, oldest first.
    #[must_use]
    pub fn log(&self) -> &[HostOp] {
        &self.log
    }

    /// Forgets the log.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Returns the types `pass` ran for, in order.
    #[must_use]
    pub fn effects(&self, pass: CommitPass) -> Vec<TypeTag> {
        self.log
            .iter()
            .filter_map(|op| match *op {
                HostOp::Effect { pass: p, tag, .. } if p == pass => Some(tag),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of commits, counted by `reset_after_commit`.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.log
            .iter()
            .filter(|op| matches!(op, HostOp::ResetAfterCommit(_)))
            .count()
    }

    /// Returns the messages of reported recoverable errors.
    #[must_use]
    pub fn recoverable_errors(&self) -> Vec<&str> {
        self.log
            .iter()
            .filter_map(|op| match op {
                HostOp::RecoverableError { message, .. } => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Returns the timeouts not yet run or cancelled.
    #[must_use]
    pub fn pending_timeouts(&self) -> &[PendingTimeout] {
        &self.timeouts
    }

    /// Starts the clock on every timeout that has not been armed yet.
    pub fn arm_timeouts(&mut self, now: Timestamp) {
        for timeout in &mut self.timeouts {
            timeout.armed_at.get_or_insert(now);
        }
    }

    /// Removes and returns the armed timeout that falls due first, if it is
    /// due at or before `now`.
    pub fn take_due_timeout(&mut self, now: Timestamp) -> Option<PendingTimeout> {
        let (index, _) = self
            .timeouts
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.due().map(|due| (i, due)))
            .filter(|&(_, due)| due <= now)
            .min_by_key(|&(i, due)| (due, i))?;
        Some(self.timeouts.remove(index))
    }

    /// Returns when the earliest armed timeout falls due.
    #[must_use]
    pub fn next_due(&self) -> Option<Timestamp> {
        self.timeouts.iter().filter_map(PendingTimeout::due).min()
    }

    fn record(
        &mut self,
        cx: &mut CommitContext<'_>,
        pass: CommitPass,
        unit: UnitId,
    ) -> Result<(), UnitError> {
        let tag = cx.store().type_tag(unit);
        self.log.push(HostOp::Effect {
            pass,
            tag,
            flags: cx.store().flags(unit),
        });
        for follow_up in &mut self.follow_ups {
            if follow_up.pass == pass && follow_up.tag == tag && follow_up.remaining > 0 {
                if follow_up.remaining != u32::MAX {
                    follow_up.remaining -= 1;
                }
                cx.request_update(unit, follow_up.action.clone());
            }
        }
        if let Some(i) = self
            .failures
            .iter()
            .position(|f| f.pass == pass && f.tag == tag)
        {
            self.failures.remove(i);
            return Err(UnitError::new(alloc::format!("{pass:?} failed for {tag:?}")));
        }
        Ok(())
    }
}

impl HostConfig for RecordingHost {
    fn commit_before_mutation(
        &mut self,
        cx: &mut CommitContext<'_>,
        unit: UnitId,
    ) -> Result<(), UnitError> {
        self.record(cx, CommitPass::BeforeMutation, unit)
    }

    fn commit_mutation(
        &mut self,
        cx: &mut CommitContext<'_>,
        unit: UnitId,
    ) -> Result<(), UnitError> {
        self.record(cx, CommitPass::Mutation, unit)
    }

    fn commit_deletion(
        &mut self,
        cx: &mut CommitContext<'_>,
        _parent: UnitId,
        deleted: UnitId,
    ) -> Result<(), UnitError> {
        self.record(cx, CommitPass::Deletion, deleted)
    }

    fn commit_layout(&mut self, cx: &mut CommitContext<'_>, unit: UnitId) -> Result<(), UnitError> {
        self.record(cx, CommitPass::Layout, unit)
    }

    fn commit_passive_unmount(
        &mut self,
        cx: &mut CommitContext<'_>,
        unit: UnitId,
    ) -> Result<(), UnitError> {
        self.record(cx, CommitPass::PassiveUnmount, unit)
    }

    fn commit_passive_mount(
        &mut self,
        cx: &mut CommitContext<'_>,
        unit: UnitId,
    ) -> Result<(), UnitError> {
        self.record(cx, CommitPass::PassiveMount, unit)
    }

    fn reset_after_commit(&mut self, root: RootId) {
        self.log.push(HostOp::ResetAfterCommit(root));
    }

    fn schedule_timeout(&mut self, task: TimeoutTask, delay: Duration) -> TimeoutHandle {
        self.next_timeout += 1;
        let handle = TimeoutHandle(self.next_timeout);
        self.timeouts.push(PendingTimeout {
            handle,
            task,
            delay,
            armed_at: None,
        });
        handle
    }

    fn cancel_timeout(&mut self, handle: TimeoutHandle) {
        self.timeouts.retain(|t| t.handle != handle);
    }

    fn current_event_priority(&self) -> EventPriority {
        self.event_priority.unwrap_or(EventPriority::Default)
    }

    fn on_recoverable_error(&mut self, root: RootId, error: &CapturedError) {
        self.log.push(HostOp::RecoverableError {
            root,
            message: error.error.message().into(),
        });
    }

    fn on_transitions_complete(&mut self, root: RootId, transitions: &[Transition], end: Timestamp) {
        self.log.push(HostOp::TransitionsComplete {
            root,
            ids: transitions.iter().map(|t| t.id).collect(),
            end,
        });
    }

    fn release_cache(&mut self, cache: CacheHandle) {
        self.log.push(HostOp::CacheReleased(cache));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_fire_in_due_order_once_armed() {
        let mut host = RecordingHost::new();
        let task = TimeoutTask::CommitRoot(crate::tests::make_root_id());
        let late = host.schedule_timeout(task, Duration(30));
        let early = host.schedule_timeout(task, Duration(10));

        assert!(
            host.take_due_timeout(Timestamp(100)).is_none(),
            "unarmed timeouts never fire"
        );
        host.arm_timeouts(Timestamp(0));
        assert_eq!(host.next_due(), Some(Timestamp(10)));
        assert!(host.take_due_timeout(Timestamp(5)).is_none(), "not due yet");
        assert_eq!(host.take_due_timeout(Timestamp(40)).unwrap().handle, early);
        assert_eq!(host.take_due_timeout(Timestamp(40)).unwrap().handle, late);
    }

    #[test]
    fn cancelled_timeouts_are_dropped() {
        let mut host = RecordingHost::new();
        let task = TimeoutTask::CommitRoot(crate::tests::make_root_id());
        let handle = host.schedule_timeout(task, Duration(10));
        host.cancel_timeout(handle);
        assert!(host.pending_timeouts().is_empty(), "cancel removes it");
    }

    #[test]
    fn event_priority_defaults_to_default() {
        let mut host = RecordingHost::new();
        assert_eq!(host.current_event_priority(), EventPriority::Default);
        host.set_event_priority(Some(EventPriority::Continuous));
        assert_eq!(host.current_event_priority(), EventPriority::Continuous);
    }
}
