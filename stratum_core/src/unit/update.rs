// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Updates and transitions.

use alloc::vec::Vec;

use crate::error::CapturedError;
use crate::lane::{Lane, Lanes};
use crate::time::Timestamp;

/// A non-urgent batch of updates that callers want to hear about once it
/// commits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Caller-chosen identifier.
    pub id: u32,
    /// Label reported back through
    /// [`HostConfig::on_transitions_complete`](crate::host::HostConfig::on_transitions_complete).
    pub name: &'static str,
    /// When the transition started; filled in on first schedule if `None`.
    pub start_time: Option<Timestamp>,
}

impl Transition {
    /// Creates an unnamed transition.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self {
            id,
            name: "",
            start_time: None,
        }
    }

    /// Creates a named transition.
    #[must_use]
    pub const fn named(id: u32, name: &'static str) -> Self {
        Self {
            id,
            name,
            start_time: None,
        }
    }
}

/// What an update does to a unit's state word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateAction {
    /// Replace the state.
    Replace(i64),
    /// Add to the state.
    Add(i64),
    /// Deliver a captured error to a boundary.
    CaptureError(CapturedError),
}

/// A lane-tagged state change queued on a unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    /// The lane this update renders in.
    pub lane: Lane,
    /// The change.
    pub action: UpdateAction,
    /// The transition the update was issued under.
    pub transition: Option<Transition>,
}

impl Update {
    /// Creates an update with no transition.
    #[must_use]
    pub const fn new(lane: Lane, action: UpdateAction) -> Self {
        Self {
            lane,
            action,
            transition: None,
        }
    }

    /// Creates an update that delivers `error` to a boundary.
    #[must_use]
    pub fn capture(lane: Lane, error: CapturedError) -> Self {
        Self::new(lane, UpdateAction::CaptureError(error))
    }
}

/// Result of [`UnitStore::process_update_queue`](super::UnitStore::process_update_queue).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessedUpdates {
    /// Errors delivered to this unit in this render.
    pub captured: Vec<CapturedError>,
    /// Lanes of updates left for a later render.
    pub skipped: Lanes,
    /// Whether the state word changed.
    pub changed: bool,
}
