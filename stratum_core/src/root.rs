// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-root state and lane bookkeeping.
//!
//! A root tracks which lanes have pending work, which of those are blocked
//! on a dependency (*suspended*), which blocked lanes may now succeed
//! (*pinged*), and which waited too long (*expired*). [`RootState::next_lanes`]
//! turns that into the lanes the next render should work on.

use alloc::vec::Vec;

use crate::config::ReconcilerConfig;
use crate::error::CapturedError;
use crate::host::{CacheHandle, TaskHandle, TimeoutHandle};
use crate::lane::{Lane, LaneMap, Lanes};
use crate::time::{Duration, Timestamp};
use crate::unit::{RootId, Transition, UnitId, UnitMode, WakeableId};

/// A commit deferred to a timeout, with the state it must carry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct DeferredCommit {
    pub(crate) recoverable_errors: Vec<CapturedError>,
    pub(crate) transitions: Vec<Transition>,
}

/// Everything the reconciler keeps per output tree.
#[derive(Debug)]
pub struct RootState {
    pub(crate) id: RootId,
    pub(crate) mode: UnitMode,
    pub(crate) current: UnitId,

    // -- Finished render awaiting commit --
    pub(crate) finished_work: Option<UnitId>,
    pub(crate) finished_lanes: Lanes,
    pub(crate) timeout_handle: Option<TimeoutHandle>,
    pub(crate) deferred_commit: Option<DeferredCommit>,

    // -- Scheduled task --
    pub(crate) callback_node: Option<TaskHandle>,
    pub(crate) callback_priority: Lane,

    // -- Lane bookkeeping --
    pub(crate) pending_lanes: Lanes,
    pub(crate) suspended_lanes: Lanes,
    pub(crate) pinged_lanes: Lanes,
    pub(crate) expired_lanes: Lanes,
    pub(crate) entangled_lanes: Lanes,
    pub(crate) entanglements: LaneMap<Lanes>,
    pub(crate) event_times: LaneMap<Option<Timestamp>>,
    pub(crate) expiration_times: LaneMap<Option<Timestamp>>,

    // -- Dependencies and transitions --
    pub(crate) ping_cache: Vec<(WakeableId, Lanes)>,
    pub(crate) transition_lanes: LaneMap<Vec<Transition>>,
    pub(crate) pending_transition_callbacks: Vec<Transition>,

    // -- Pooled cache --
    pub(crate) pooled_cache: Option<CacheHandle>,
    pub(crate) pooled_cache_lanes: Lanes,
}

impl RootState {
    pub(crate) fn new(id: RootId, mode: UnitMode, current: UnitId) -> Self {
        Self {
            id,
            mode,
            current,
            finished_work: None,
            finished_lanes: Lanes::NONE,
            timeout_handle: None,
            deferred_commit: None,
            callback_node: None,
            callback_priority: Lane::NONE,
            pending_lanes: Lanes::NONE,
            suspended_lanes: Lanes::NONE,
            pinged_lanes: Lanes::NONE,
            expired_lanes: Lanes::NONE,
            entangled_lanes: Lanes::NONE,
            entanglements: LaneMap::filled(Lanes::NONE),
            event_times: LaneMap::filled(None),
            expiration_times: LaneMap::filled(None),
            ping_cache: Vec::new(),
            transition_lanes: LaneMap::from_fn(|_| Vec::new()),
            pending_transition_callbacks: Vec::new(),
            pooled_cache: None,
            pooled_cache_lanes: Lanes::NONE,
        }
    }

    // -- Public view --

    /// Returns the root's identifier.
    #[must_use]
    pub fn id(&self) -> RootId {
        self.id
    }

    /// Returns the root's mode.
    #[must_use]
    pub fn mode(&self) -> UnitMode {
        self.mode
    }

    /// Returns the head of the committed tree.
    #[must_use]
    pub fn current(&self) -> UnitId {
        self.current
    }

    /// Returns the lanes with pending work.
    #[must_use]
    pub fn pending_lanes(&self) -> Lanes {
        self.pending_lanes
    }

    /// Returns the pending lanes blocked on a dependency.
    #[must_use]
    pub fn suspended_lanes(&self) -> Lanes {
        self.suspended_lanes
    }

    /// Returns the suspended lanes whose dependency resolved.
    #[must_use]
    pub fn pinged_lanes(&self) -> Lanes {
        self.pinged_lanes
    }

    /// Returns the lanes that waited past their expiration time.
    #[must_use]
    pub fn expired_lanes(&self) -> Lanes {
        self.expired_lanes
    }

    /// Returns the handle of the root's scheduled task, if any.
    #[must_use]
    pub fn callback_node(&self) -> Option<TaskHandle> {
        self.callback_node
    }

    /// Returns the lane the scheduled work was requested for.
    #[must_use]
    pub fn callback_priority(&self) -> Lane {
        self.callback_priority
    }

    /// Returns `true` if a finished tree waits on a commit timeout.
    #[must_use]
    pub fn has_pending_commit(&self) -> bool {
        self.timeout_handle.is_some()
    }

    /// Returns the root's pooled cache, if any.
    #[must_use]
    pub fn pooled_cache(&self) -> Option<CacheHandle> {
        self.pooled_cache
    }

    // -- Bookkeeping --

    /// Records an update in `lane` issued at `event_time`.
    ///
    /// Any non-idle update may unblock suspended work, so suspended and
    /// pinged lanes are cleared.
    pub(crate) fn mark_updated(&mut self, lane: Lane, event_time: Timestamp) {
        self.pending_lanes |= lane;
        if lane != Lane::IDLE {
            self.suspended_lanes = Lanes::NONE;
            self.pinged_lanes = Lanes::NONE;
        }
        if !lane.is_none() {
            *self.event_times.get_mut(lane) = Some(event_time);
        }
    }

    /// Marks `lanes` blocked. Their expiration times are dropped so a
    /// suspended lane cannot expire while it waits.
    pub(crate) fn mark_suspended(&mut self, lanes: Lanes) {
        self.suspended_lanes |= lanes;
        self.pinged_lanes = self.pinged_lanes.remove(lanes);
        for lane in lanes.iter() {
            *self.expiration_times.get_mut(lane) = None;
        }
    }

    /// Marks the suspended lanes among `lanes` as worth retrying.
    pub(crate) fn mark_pinged(&mut self, lanes: Lanes) {
        self.pinged_lanes |= self.suspended_lanes.intersect(lanes);
    }

    /// Drops bookkeeping for lanes that committed; `remaining` stay pending.
    pub(crate) fn mark_finished(&mut self, remaining: Lanes) {
        let no_longer_pending = self.pending_lanes.remove(remaining);
        self.pending_lanes = remaining;
        self.suspended_lanes = Lanes::NONE;
        self.pinged_lanes = Lanes::NONE;
        self.expired_lanes = self.expired_lanes.intersect(remaining);
        self.entangled_lanes = self.entangled_lanes.intersect(remaining);
        for lane in no_longer_pending.iter() {
            *self.entanglements.get_mut(lane) = Lanes::NONE;
            *self.event_times.get_mut(lane) = None;
            *self.expiration_times.get_mut(lane) = None;
            self.transition_lanes.get_mut(lane).clear();
        }
    }

    /// Makes `lanes` render together: whenever any of them is picked, all of
    /// them are.
    pub(crate) fn mark_entangled(&mut self, lanes: Lanes) {
        self.entangled_lanes |= lanes;
        for lane in self.entangled_lanes.iter() {
            let entry = self.entanglements.get_mut(lane);
            if lane.as_lanes().intersects(lanes) || entry.intersects(lanes) {
                *entry |= lanes;
            }
        }
    }

    /// Gives every pending lane an expiration time and moves the lanes past
    /// theirs into the expired set.
    ///
    /// Suspended lanes get no expiration time unless they were pinged.
    pub(crate) fn mark_starved_lanes_as_expired(
        &mut self,
        now: Timestamp,
        config: &ReconcilerConfig,
    ) {
        for lane in self.pending_lanes.iter() {
            match *self.expiration_times.get(lane) {
                None => {
                    let blocked = self.suspended_lanes.has(lane) && !self.pinged_lanes.has(lane);
                    if !blocked {
                        *self.expiration_times.get_mut(lane) =
                            expiration_offset(lane, config).map(|offset| now + offset);
                    }
                }
                Some(expires_at) if expires_at <= now => {
                    self.expired_lanes |= lane;
                }
                Some(_) => {}
            }
        }
    }

    /// Picks the lanes the next render should work on.
    ///
    /// Non-idle work goes first; within a class, unblocked lanes beat pinged
    /// ones. An in-progress render on `wip_lanes` is kept unless the new pick
    /// is more urgent, so that an equal-priority update does not throw away
    /// finished work.
    #[must_use]
    pub fn next_lanes(&self, wip_lanes: Lanes) -> Lanes {
        let pending = self.pending_lanes;
        if pending.is_empty() {
            return Lanes::NONE;
        }
        let suspended = self.suspended_lanes;
        let pinged = self.pinged_lanes;

        let mut next = Lanes::NONE;
        let non_idle_pending = pending.intersect(Lanes::NON_IDLE);
        if !non_idle_pending.is_empty() {
            let unblocked = non_idle_pending.remove(suspended);
            if !unblocked.is_empty() {
                next = unblocked.highest_priority_group();
            } else {
                let non_idle_pinged = non_idle_pending.intersect(pinged);
                if !non_idle_pinged.is_empty() {
                    next = non_idle_pinged.highest_priority_group();
                }
            }
        } else {
            let unblocked = pending.remove(suspended);
            if !unblocked.is_empty() {
                next = unblocked.highest_priority_group();
            } else if !pinged.is_empty() {
                next = pinged.highest_priority_group();
            }
        }
        if next.is_empty() {
            return Lanes::NONE;
        }

        if !wip_lanes.is_empty() && wip_lanes != next && !wip_lanes.intersects(suspended) {
            let next_lane = next.highest_priority();
            let wip_lane = wip_lanes.highest_priority();
            let keep_wip = next_lane.bits() >= wip_lane.bits()
                || (next_lane == Lane::DEFAULT && wip_lane.as_lanes().intersects(Lanes::TRANSITIONS));
            if keep_wip {
                return wip_lanes;
            }
        }

        let entangled = next.intersect(self.entangled_lanes);
        for lane in entangled.iter() {
            next |= *self.entanglements.get(lane);
        }
        next
    }

    /// Returns the latest event time recorded for any of `lanes`.
    #[must_use]
    pub fn most_recent_event_time(&self, lanes: Lanes) -> Option<Timestamp> {
        lanes.iter().filter_map(|lane| *self.event_times.get(lane)).max()
    }

    /// Returns the lanes a synchronous retry after a render error should
    /// include: everything pending except offscreen work, or offscreen work
    /// if that is all there is.
    #[must_use]
    pub fn lanes_to_retry_synchronously_on_error(&self) -> Lanes {
        let everything_but_offscreen = self.pending_lanes.remove(Lane::OFFSCREEN.as_lanes());
        if !everything_but_offscreen.is_empty() {
            everything_but_offscreen
        } else if self.pending_lanes.has(Lane::OFFSCREEN) {
            Lane::OFFSCREEN.as_lanes()
        } else {
            Lanes::NONE
        }
    }

    /// Records `transition` as active in `lane`.
    pub(crate) fn add_transition(&mut self, lane: Lane, transition: Transition) {
        if lane.is_none() {
            return;
        }
        let entry = self.transition_lanes.get_mut(lane);
        if !entry.iter().any(|t| t.id == transition.id) {
            entry.push(transition);
        }
    }

    /// Returns the transitions active in any of `lanes`.
    pub(crate) fn transitions_for_lanes(&self, lanes: Lanes) -> Vec<Transition> {
        let mut out: Vec<Transition> = Vec::new();
        for lane in lanes.iter() {
            for transition in self.transition_lanes.get(lane) {
                if !out.iter().any(|t| t.id == transition.id) {
                    out.push(*transition);
                }
            }
        }
        out
    }

    /// Records that `wakeable` blocks `lanes`. Returns `false` if that
    /// exact pair was already recorded.
    pub(crate) fn attach_ping(&mut self, wakeable: WakeableId, lanes: Lanes) -> bool {
        if self.ping_cache.iter().any(|&(w, l)| w == wakeable && l == lanes) {
            return false;
        }
        self.ping_cache.push((wakeable, lanes));
        true
    }

    /// Removes `wakeable` from the ping cache and returns the union of the
    /// lanes it blocked.
    pub(crate) fn take_ping(&mut self, wakeable: WakeableId) -> Lanes {
        let mut lanes = Lanes::NONE;
        self.ping_cache.retain(|&(w, l)| {
            if w == wakeable {
                lanes |= l;
                false
            } else {
                true
            }
        });
        lanes
    }

    /// Drops the pooled cache once none of `remaining` uses it, returning it
    /// for release.
    pub(crate) fn release_pooled_cache(&mut self, remaining: Lanes) -> Option<CacheHandle> {
        self.pooled_cache_lanes = self.pooled_cache_lanes.intersect(remaining);
        if self.pooled_cache_lanes.is_empty() {
            self.pooled_cache.take()
        } else {
            None
        }
    }
}

/// How long `lane` may wait before it is forced to render synchronously.
fn expiration_offset(lane: Lane, config: &ReconcilerConfig) -> Option<Duration> {
    const SYNC_LIKE: Lanes = Lanes::from_bits(
        Lane::SYNC.bits() | Lane::INPUT_CONTINUOUS_HYDRATION.bits() | Lane::INPUT_CONTINUOUS.bits(),
    );
    const DEFAULT_LIKE: Lanes = Lanes::from_bits(
        Lane::DEFAULT_HYDRATION.bits()
            | Lane::DEFAULT.bits()
            | Lane::TRANSITION_HYDRATION.bits()
            | Lanes::TRANSITIONS.bits(),
    );
    if SYNC_LIKE.has(lane) {
        Some(config.sync_expiration)
    } else if DEFAULT_LIKE.has(lane) {
        Some(config.default_expiration)
    } else {
        // Retries wait on data; idle and offscreen work may starve.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_root() -> RootState {
        RootState::new(RootId(0), UnitMode::CONCURRENT, UnitId(0))
    }

    #[test]
    fn updates_clear_suspension_except_idle() {
        let mut root = make_root();
        root.mark_updated(Lane::DEFAULT, Timestamp(10));
        root.mark_suspended(Lane::DEFAULT.into());
        root.mark_updated(Lane::IDLE, Timestamp(20));
        assert!(root.suspended_lanes().has(Lane::DEFAULT), "idle keeps suspension");
        root.mark_updated(Lane::INPUT_CONTINUOUS, Timestamp(30));
        assert!(root.suspended_lanes().is_empty());
        assert_eq!(root.most_recent_event_time(root.pending_lanes()), Some(Timestamp(30)));
    }

    #[test]
    fn next_lanes_prefers_unblocked_then_pinged() {
        let mut root = make_root();
        root.mark_updated(Lane::DEFAULT, Timestamp(0));
        root.mark_updated(Lane::TRANSITION_1, Timestamp(0));
        assert_eq!(root.next_lanes(Lanes::NONE), Lane::DEFAULT.as_lanes());

        root.mark_suspended(Lane::DEFAULT.into());
        assert_eq!(root.next_lanes(Lanes::NONE), Lane::TRANSITION_1.as_lanes());

        root.mark_suspended(Lane::TRANSITION_1.into());
        assert_eq!(root.next_lanes(Lanes::NONE), Lanes::NONE, "everything blocked");

        root.mark_pinged(Lane::TRANSITION_1.into());
        assert_eq!(root.next_lanes(Lanes::NONE), Lane::TRANSITION_1.as_lanes());
    }

    #[test]
    fn idle_only_runs_when_nothing_else_is_pending() {
        let mut root = make_root();
        root.mark_updated(Lane::IDLE, Timestamp(0));
        root.mark_updated(Lane::RETRY_1, Timestamp(0));
        assert_eq!(root.next_lanes(Lanes::NONE), Lane::RETRY_1.as_lanes());
        root.mark_finished(Lane::IDLE.into());
        assert_eq!(root.next_lanes(Lanes::NONE), Lane::IDLE.as_lanes());
    }

    #[test]
    fn in_progress_lanes_survive_equal_or_lower_updates() {
        let mut root = make_root();
        root.mark_updated(Lane::TRANSITION_1, Timestamp(0));
        let wip = root.next_lanes(Lanes::NONE);
        root.mark_updated(Lane::IDLE, Timestamp(0));
        assert_eq!(root.next_lanes(wip), wip);
        root.mark_updated(Lane::DEFAULT, Timestamp(0));
        assert_eq!(root.next_lanes(wip), wip, "default does not interrupt a transition");
        root.mark_updated(Lane::INPUT_CONTINUOUS, Timestamp(0));
        assert_eq!(root.next_lanes(wip), Lane::INPUT_CONTINUOUS.as_lanes());
    }

    #[test]
    fn entangled_lanes_render_together() {
        let mut root = make_root();
        root.mark_updated(Lane::SYNC, Timestamp(0));
        root.mark_updated(Lane::TRANSITION_1, Timestamp(0));
        root.mark_entangled(Lane::SYNC | Lane::TRANSITION_1);
        assert_eq!(root.next_lanes(Lanes::NONE), Lane::SYNC | Lane::TRANSITION_1);
        root.mark_finished(Lanes::NONE);
        assert!(root.entangled_lanes.is_empty());
        assert!(root.entanglements.get(Lane::SYNC).is_empty());
    }

    #[test]
    fn starved_lanes_expire() {
        let config = ReconcilerConfig::new();
        let mut root = make_root();
        root.mark_updated(Lane::DEFAULT, Timestamp(0));
        root.mark_updated(Lane::RETRY_1, Timestamp(0));
        root.mark_starved_lanes_as_expired(Timestamp(100), &config);
        assert_eq!(*root.expiration_times.get(Lane::DEFAULT), Some(Timestamp(5100)));
        assert_eq!(*root.expiration_times.get(Lane::RETRY_1), None, "retries never expire");

        root.mark_starved_lanes_as_expired(Timestamp(5099), &config);
        assert!(root.expired_lanes().is_empty());
        root.mark_starved_lanes_as_expired(Timestamp(5100), &config);
        assert_eq!(root.expired_lanes(), Lane::DEFAULT.as_lanes());
    }

    #[test]
    fn suspended_lanes_do_not_expire_until_pinged() {
        let config = ReconcilerConfig::new();
        let mut root = make_root();
        root.mark_updated(Lane::SYNC, Timestamp(0));
        root.mark_suspended(Lane::SYNC.into());
        root.mark_starved_lanes_as_expired(Timestamp(0), &config);
        assert_eq!(*root.expiration_times.get(Lane::SYNC), None);
        root.mark_pinged(Lane::SYNC.into());
        root.mark_starved_lanes_as_expired(Timestamp(0), &config);
        assert_eq!(*root.expiration_times.get(Lane::SYNC), Some(Timestamp(250)));
    }

    #[test]
    fn finishing_keeps_remaining_bookkeeping() {
        let mut root = make_root();
        root.mark_updated(Lane::DEFAULT, Timestamp(5));
        root.mark_updated(Lane::IDLE, Timestamp(6));
        root.add_transition(Lane::DEFAULT, Transition::new(1));
        root.mark_finished(Lane::IDLE.into());
        assert_eq!(root.pending_lanes(), Lane::IDLE.as_lanes());
        assert_eq!(*root.event_times.get(Lane::DEFAULT), None);
        assert_eq!(*root.event_times.get(Lane::IDLE), Some(Timestamp(6)));
        assert!(root.transitions_for_lanes(Lanes::ALL).is_empty());
    }

    #[test]
    fn error_retry_lanes_skip_offscreen() {
        let mut root = make_root();
        assert_eq!(root.lanes_to_retry_synchronously_on_error(), Lanes::NONE);
        root.mark_updated(Lane::OFFSCREEN, Timestamp(0));
        assert_eq!(root.lanes_to_retry_synchronously_on_error(), Lane::OFFSCREEN.as_lanes());
        root.mark_updated(Lane::DEFAULT, Timestamp(0));
        assert_eq!(root.lanes_to_retry_synchronously_on_error(), Lane::DEFAULT.as_lanes());
    }

    #[test]
    fn ping_cache_merges_lanes_per_wakeable() {
        let mut root = make_root();
        assert!(root.attach_ping(WakeableId(1), Lane::DEFAULT.into()));
        assert!(!root.attach_ping(WakeableId(1), Lane::DEFAULT.into()), "duplicate");
        assert!(root.attach_ping(WakeableId(1), Lane::RETRY_1.into()));
        assert!(root.attach_ping(WakeableId(2), Lane::IDLE.into()));
        assert_eq!(root.take_ping(WakeableId(1)), Lane::DEFAULT | Lane::RETRY_1);
        assert_eq!(root.take_ping(WakeableId(1)), Lanes::NONE);
        assert_eq!(root.ping_cache.len(), 1);
    }

    #[test]
    fn pooled_cache_released_when_lanes_finish() {
        let mut root = make_root();
        root.pooled_cache = Some(CacheHandle(3));
        root.pooled_cache_lanes = Lane::DEFAULT | Lane::IDLE;
        assert_eq!(root.release_pooled_cache(Lane::IDLE.into()), None);
        assert_eq!(root.release_pooled_cache(Lanes::NONE), Some(CacheHandle(3)));
        assert_eq!(root.pooled_cache(), None);
    }
}
