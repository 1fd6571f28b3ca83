// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Suspension: finishing suspended attempts, fallback throttling, pings,
//! and retries.
//!
//! A unit that cannot finish names a [`WakeableId`]. Two listeners may be
//! waiting on it once it resolves:
//!
//! - the root's **ping cache**, recorded while rendering, which marks the
//!   suspended lanes pinged so the next attempt may succeed, and
//! - a boundary's **retry listener**, recorded when a fallback commits, which
//!   schedules a render of the boundary in a fresh retry lane.
//!
//! [`Reconciler::resolve_wakeable`] dispatches to both.

use alloc::vec::Vec;

use super::{ExitStatus, Reconciler};
use crate::error::{Invariant, ReconcileError};
use crate::host::{CooperativeScheduler, HostConfig, TimeoutTask, UnitEvaluator};
use crate::lane::{Lane, Lanes};
use crate::root::DeferredCommit;
use crate::time::Duration;
use crate::trace::PingEvent;
use crate::unit::{RootId, UnitId, UnitKind, WakeableId};

/// Returns how long a fallback may be withheld once `elapsed` has passed
/// since the update that suspended.
///
/// The thresholds grow so that a longer wait is needed before the delay is
/// noticed: 120, 480, 1080, 1920, 3000 and 4320 ms, then multiples of
/// 1960 ms.
#[must_use]
pub fn jnd(elapsed: Duration) -> Duration {
    let t = elapsed.millis();
    let ms = match t {
        0..120 => 120,
        120..480 => 480,
        480..1080 => 1080,
        1080..1920 => 1920,
        1920..3000 => 3000,
        3000..4320 => 4320,
        _ => t.div_ceil(1960) * 1960,
    };
    Duration(ms)
}

impl<S, H, E> Reconciler<S, H, E>
where
    S: CooperativeScheduler,
    H: HostConfig,
    E: UnitEvaluator,
{
    /// Decides what to do with a finished attempt: commit it now, after a
    /// timeout, or not at all.
    pub(super) fn finish_concurrent_render(
        &mut self,
        root_id: RootId,
        status: ExitStatus,
        lanes: Lanes,
    ) -> Result<(), ReconcileError> {
        match status {
            ExitStatus::InProgress | ExitStatus::FatalErrored | ExitStatus::DidNotComplete => {
                Err(Invariant::IncompleteRender.into())
            }
            ExitStatus::Errored | ExitStatus::Completed => {
                let (recoverable, transitions) = self.take_commit_payload();
                self.commit_root(root_id, recoverable, transitions)
            }
            ExitStatus::Suspended => {
                self.mark_root_suspended(root_id, lanes);
                if lanes.includes_only_retries() && !self.config.force_flush_fallbacks {
                    let delay = self.fallback_delay(root_id, lanes);
                    if delay > self.config.min_suspend_timeout {
                        let root = &mut self.roots[root_id.0 as usize];
                        if !root.next_lanes(Lanes::NONE).is_empty() {
                            // More urgent work; it will produce its own tree.
                            return Ok(());
                        }
                        let suspended = root.suspended_lanes;
                        if !suspended.is_subset_of(lanes) {
                            // Other suspended lanes may unblock together with
                            // these; render them all again.
                            root.mark_pinged(suspended);
                            return Ok(());
                        }
                        self.defer_commit(root_id, delay);
                        return Ok(());
                    }
                }
                let (recoverable, transitions) = self.take_commit_payload();
                self.commit_root(root_id, recoverable, transitions)
            }
            ExitStatus::SuspendedWithDelay => {
                self.mark_root_suspended(root_id, lanes);
                if lanes.includes_only_transitions() {
                    // Keep showing the old content until new data arrives.
                    return Ok(());
                }
                if !self.config.force_flush_fallbacks {
                    let delay = self.fallback_delay(root_id, lanes);
                    if delay > self.config.min_suspend_timeout {
                        self.defer_commit(root_id, delay);
                        return Ok(());
                    }
                }
                let (recoverable, transitions) = self.take_commit_payload();
                self.commit_root(root_id, recoverable, transitions)
            }
        }
    }

    /// Time left until the fallback of `lanes` may no longer be withheld.
    fn fallback_delay(&self, root_id: RootId, lanes: Lanes) -> Duration {
        let now = self.scheduler.now();
        let event_time = self.roots[root_id.0 as usize]
            .most_recent_event_time(lanes)
            .unwrap_or(now);
        let elapsed = now.saturating_duration_since(event_time);
        jnd(elapsed).saturating_sub(elapsed)
    }

    /// Parks the finished tree until a [`TimeoutTask::CommitRoot`] fires.
    fn defer_commit(&mut self, root_id: RootId, delay: Duration) {
        let (recoverable_errors, transitions) = self.take_commit_payload();
        let handle = self
            .host
            .schedule_timeout(TimeoutTask::CommitRoot(root_id), delay);
        let root = &mut self.roots[root_id.0 as usize];
        root.timeout_handle = Some(handle);
        root.deferred_commit = Some(DeferredCommit {
            recoverable_errors,
            transitions,
        });
    }

    /// Commits a tree parked by [`defer_commit`](Self::defer_commit). A
    /// timeout whose tree was discarded in the meantime does nothing.
    pub(super) fn commit_deferred(&mut self, root_id: RootId) -> Result<(), ReconcileError> {
        let root = &mut self.roots[root_id.0 as usize];
        root.timeout_handle = None;
        let Some(deferred) = root.deferred_commit.take() else {
            return Ok(());
        };
        self.commit_root(root_id, deferred.recoverable_errors, deferred.transitions)
    }

    /// Suspends `lanes` on `root`, except lanes that were pinged or updated
    /// while the attempt ran.
    pub(super) fn mark_root_suspended(&mut self, root_id: RootId, lanes: Lanes) {
        let lanes = lanes
            .remove(self.wip.pinged_lanes)
            .remove(self.wip.interleaved_lanes)
            .remove(self.wip.render_phase_lanes);
        self.roots[root_id.0 as usize].mark_suspended(lanes);
    }

    // -- Status transitions --

    pub(super) fn render_did_suspend(&mut self) {
        if self.wip.exit_status == ExitStatus::InProgress {
            self.wip.exit_status = ExitStatus::Suspended;
        }
    }

    /// Upgrades the attempt to [`ExitStatus::SuspendedWithDelay`]. If work
    /// was skipped or arrived meanwhile, the render lanes are suspended right
    /// away so that work can go first.
    pub(super) fn render_did_suspend_delay_if_possible(&mut self) {
        if matches!(
            self.wip.exit_status,
            ExitStatus::InProgress | ExitStatus::Suspended | ExitStatus::Errored
        ) {
            self.wip.exit_status = ExitStatus::SuspendedWithDelay;
        }
        if let Some(root) = self.wip.root
            && (self.wip.skipped_lanes.includes_non_idle()
                || self.wip.interleaved_lanes.includes_non_idle())
        {
            let render_lanes = self.wip.render_lanes;
            self.mark_root_suspended(root, render_lanes);
        }
    }

    // -- Wakeables --

    /// Records that `wakeable` blocks `lanes` on `root`.
    pub(super) fn attach_ping_listener(&mut self, root_id: RootId, wakeable: WakeableId, lanes: Lanes) {
        self.roots[root_id.0 as usize].attach_ping(wakeable, lanes);
    }

    /// Records retry listeners for the dependencies a committed suspense
    /// boundary is waiting on.
    pub(super) fn attach_retry_listeners(&mut self, boundary: UnitId) {
        let key = self.units.key(boundary);
        for &wakeable in self.units.wakeables(boundary) {
            let known = self
                .retry_listeners
                .iter()
                .any(|&(b, w)| w == wakeable && self.units.key(b) == key);
            if !known {
                self.retry_listeners.push((boundary, wakeable));
            }
        }
    }

    /// Marks the lanes `wakeable` blocked on `root` as pinged.
    ///
    /// If the attempt in progress renders exactly those lanes and is waiting
    /// to show a delayed fallback, or is a retry inside the fallback throttle
    /// window, it restarts from a fresh stack. Otherwise it keeps going and
    /// the pinged lanes stay unsuspended when it finishes.
    ///
    /// # Panics
    ///
    /// Panics if `root_id` was not created by this reconciler.
    pub fn ping_suspended_root(&mut self, root_id: RootId, wakeable: WakeableId) {
        self.validate_root(root_id);
        let lanes = self.roots[root_id.0 as usize].take_ping(wakeable);
        if lanes.is_empty() {
            return;
        }
        let event_time = self.request_event_time();
        self.roots[root_id.0 as usize].mark_pinged(lanes);

        let mut restarted = false;
        let render_lanes = self.wip.render_lanes;
        if self.wip.root == Some(root_id)
            && !render_lanes.is_empty()
            && render_lanes.is_subset_of(lanes)
        {
            let now = self.scheduler.now();
            let within_throttle = now.saturating_duration_since(self.most_recent_fallback_time)
                < self.config.fallback_throttle;
            let restart = match self.wip.exit_status {
                ExitStatus::SuspendedWithDelay => true,
                ExitStatus::Suspended => render_lanes.includes_only_retries() && within_throttle,
                _ => false,
            };
            if restart {
                self.prepare_fresh_stack(root_id, Lanes::NONE);
                restarted = true;
            } else {
                self.wip.pinged_lanes |= lanes;
            }
        }

        self.tracer.ping(&PingEvent {
            root: root_id,
            lanes,
            restarted,
            timestamp: event_time,
        });
        self.ensure_root_is_scheduled(root_id, event_time);
    }

    /// Schedules a render of `boundary` because `wakeable`, which it showed a
    /// fallback for, resolved.
    ///
    /// # Panics
    ///
    /// Panics if `boundary` was not created by this reconciler.
    pub fn resolve_retry_wakeable(
        &mut self,
        boundary: UnitId,
        wakeable: WakeableId,
    ) -> Result<(), ReconcileError> {
        if self.units.kind(boundary) != UnitKind::Suspense {
            return Err(Invariant::NotASuspenseBoundary.into());
        }
        let key = self.units.key(boundary);
        let units = &self.units;
        self.retry_listeners
            .retain(|&(b, w)| !(w == wakeable && units.key(b) == key));
        self.retry_timed_out_boundary(boundary);
        Ok(())
    }

    /// Marks a fresh retry lane on `boundary` and schedules its root.
    fn retry_timed_out_boundary(&mut self, boundary: UnitId) {
        let lane = if self.units.mode(boundary).is_concurrent() {
            self.lanes.claim_retry_lane()
        } else {
            Lane::SYNC
        };
        let event_time = self.request_event_time();
        if let Some(root) = self.units.mark_update_lane_to_root(boundary, lane) {
            self.roots[root.0 as usize].mark_updated(lane, event_time);
            self.ensure_root_is_scheduled(root, event_time);
        }
    }

    /// Delivers the resolution of `wakeable` to every root that suspended on
    /// it and every boundary showing a fallback for it.
    pub fn resolve_wakeable(&mut self, wakeable: WakeableId) -> Result<(), ReconcileError> {
        let pinged: Vec<RootId> = self
            .roots
            .iter()
            .filter(|root| root.ping_cache.iter().any(|&(w, _)| w == wakeable))
            .map(|root| root.id)
            .collect();
        for root in pinged {
            self.ping_suspended_root(root, wakeable);
        }

        let mut boundaries: Vec<UnitId> = Vec::new();
        for &(boundary, w) in &self.retry_listeners {
            if w == wakeable
                && !boundaries
                    .iter()
                    .any(|&b| self.units.key(b) == self.units.key(boundary))
            {
                boundaries.push(boundary);
            }
        }
        for boundary in boundaries {
            self.resolve_retry_wakeable(boundary, wakeable)?;
        }
        Ok(())
    }
}
