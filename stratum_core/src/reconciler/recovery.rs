// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Delivering render and commit failures to boundaries.

use core::mem;

use super::work_loop::Thrown;
use super::{ExitStatus, Reconciler};
use crate::error::{CapturedError, ReconcileError, UnitError};
use crate::host::{CooperativeScheduler, HostConfig, UnitEvaluator};
use crate::lane::{Lane, Lanes};
use crate::unit::{EffectFlags, RootId, UnitId, UnitKind, Update};
#[cfg(feature = "trace-rich")]
use crate::trace::{UnitErroredEvent, UnitSuspendedEvent};

impl<S, H, E> Reconciler<S, H, E>
where
    S: CooperativeScheduler,
    H: HostConfig,
    E: UnitEvaluator,
{
    /// Marks `source` incomplete and hands what it threw to the nearest
    /// ancestor that can take it, starting at `parent`.
    ///
    /// A suspension goes to the nearest suspense boundary that is not
    /// already showing its fallback in this attempt. Without one, a
    /// concurrent attempt is abandoned and waits for the ping; a sync attempt
    /// turns the suspension into an error. Errors go to the nearest error
    /// boundary that accepts them, or to the root.
    pub(super) fn throw_exception(
        &mut self,
        root_id: RootId,
        parent: UnitId,
        source: UnitId,
        thrown: Thrown,
    ) {
        self.units.insert_flags(source, EffectFlags::INCOMPLETE);
        let render_lanes = self.wip.render_lanes;

        let error = match thrown {
            Thrown::Suspend(wakeable) => {
                #[cfg(feature = "trace-rich")]
                self.tracer.unit_suspended(&UnitSuspendedEvent {
                    unit: source,
                    wakeable,
                    lanes: render_lanes,
                });
                if let Some(boundary) = self.nearest_suspense_boundary(parent) {
                    let b = boundary.0 as usize;
                    self.units.flags[b] |= EffectFlags::SHOULD_CAPTURE | EffectFlags::UPDATE;
                    // The boundary must not bail out when it is begun again.
                    self.units.lanes[b] |= render_lanes;
                    if !self.units.wakeables[b].contains(&wakeable) {
                        self.units.wakeables[b].push(wakeable);
                    }
                    if self.units.mode(boundary).is_concurrent() {
                        self.attach_ping_listener(root_id, wakeable, render_lanes);
                    }
                    match self.units.alternate(boundary) {
                        None => self.render_did_suspend(),
                        Some(current)
                            if self.units.flags(current).contains(EffectFlags::DID_CAPTURE) => {}
                        Some(_) => self.render_did_suspend_delay_if_possible(),
                    }
                    return;
                }
                if !render_lanes.has(Lane::SYNC) {
                    self.attach_ping_listener(root_id, wakeable, render_lanes);
                    self.render_did_suspend_delay_if_possible();
                    return;
                }
                UnitError::new(
                    "a unit suspended while rendering synchronous input and no suspense \
                     boundary above it can show a fallback",
                )
            }
            Thrown::Fail(error) => error,
        };

        #[cfg(feature = "trace-rich")]
        self.tracer.unit_errored(&UnitErroredEvent {
            unit: source,
            lanes: render_lanes,
        });
        let captured = CapturedError::new(error, source);
        self.render_did_error(captured.clone());

        let lane = render_lanes.pick_arbitrary();
        let mut node = Some(parent);
        while let Some(unit) = node {
            let update = match self.units.kind(unit) {
                UnitKind::Root(_) => Some(
                    self.evaluator
                        .create_error_update(&self.units, unit, &captured, lane)
                        .unwrap_or_else(|| Update::capture(lane, captured.clone())),
                ),
                UnitKind::ErrorBoundary
                    if !self.units.flags(unit).contains(EffectFlags::DID_CAPTURE) =>
                {
                    self.evaluator
                        .create_error_update(&self.units, unit, &captured, lane)
                }
                _ => None,
            };
            if let Some(update) = update {
                self.units.insert_flags(unit, EffectFlags::SHOULD_CAPTURE);
                self.units.enqueue_captured(unit, update);
                return;
            }
            node = self.units.parent(unit);
        }
    }

    fn nearest_suspense_boundary(&self, from: UnitId) -> Option<UnitId> {
        let mut node = Some(from);
        while let Some(unit) = node {
            if self.units.kind(unit) == UnitKind::Suspense
                && !self.units.flags(unit).contains(EffectFlags::DID_CAPTURE)
            {
                return Some(unit);
            }
            node = self.units.parent(unit);
        }
        None
    }

    fn render_did_error(&mut self, error: CapturedError) {
        if self.wip.exit_status != ExitStatus::SuspendedWithDelay {
            self.wip.exit_status = ExitStatus::Errored;
        }
        self.wip.concurrent_errors.push(error);
    }

    /// Renders `lanes` again synchronously after an attempt errored.
    ///
    /// If the retry gets through without errors, the errors of the first
    /// attempt become recoverable errors reported after the commit.
    pub(super) fn recover_from_concurrent_error(
        &mut self,
        root_id: RootId,
        lanes: Lanes,
    ) -> Result<ExitStatus, ReconcileError> {
        let first_attempt = mem::take(&mut self.wip.concurrent_errors);
        let status = self.render_root_sync(root_id, lanes)?;
        if status != ExitStatus::Errored {
            let second_attempt = mem::take(&mut self.wip.recoverable_errors);
            self.wip.recoverable_errors = first_attempt;
            self.wip.recoverable_errors.extend(second_attempt);
        }
        Ok(status)
    }

    /// Delivers an error thrown by a host effect of `source` to the nearest
    /// error boundary at or above `ancestor`, or to the root, as a sync
    /// update.
    ///
    /// The rest of the commit continues; the update renders once the commit
    /// returns. An error with nowhere to go is dropped.
    pub(super) fn capture_commit_phase_error(
        &mut self,
        source: UnitId,
        ancestor: Option<UnitId>,
        error: UnitError,
    ) {
        let captured = CapturedError::new(error, source);
        let mut node = if self.units.kind(source).root().is_some() {
            Some(source)
        } else {
            ancestor
        };
        while let Some(unit) = node {
            let update = match self.units.kind(unit) {
                UnitKind::Root(_) => Some(
                    self.evaluator
                        .create_error_update(&self.units, unit, &captured, Lane::SYNC)
                        .unwrap_or_else(|| Update::capture(Lane::SYNC, captured.clone())),
                ),
                UnitKind::ErrorBoundary => {
                    self.evaluator
                        .create_error_update(&self.units, unit, &captured, Lane::SYNC)
                }
                _ => None,
            };
            if let Some(update) = update {
                let event_time = self.request_event_time();
                if let Some(root) = self.enqueue_concurrent_update(unit, update) {
                    self.roots[root.0 as usize].mark_updated(Lane::SYNC, event_time);
                    self.ensure_root_is_scheduled(root, event_time);
                }
                return;
            }
            node = self.units.parent(unit);
        }
    }
}
