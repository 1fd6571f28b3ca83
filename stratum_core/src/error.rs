// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.
//!
//! Evaluators and hosts report failures as [`UnitError`]. Once the reconciler
//! knows which unit failed, the error travels as a [`CapturedError`]. Only
//! failures that no boundary can absorb, and runaway-loop guards, leave the
//! reconciler as a [`ReconcileError`].

use alloc::string::String;

use thiserror::Error;

use crate::unit::UnitId;

/// A failure reported by an evaluator or host callback.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UnitError {
    message: String,
}

impl UnitError {
    /// Creates an error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A [`UnitError`] attributed to the unit it was thrown from.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{error} (thrown from {origin:?})")]
pub struct CapturedError {
    /// The failure.
    pub error: UnitError,
    /// The unit whose evaluation or commit failed.
    pub origin: UnitId,
}

impl CapturedError {
    /// Attributes `error` to `origin`.
    #[must_use]
    pub fn new(error: UnitError, origin: UnitId) -> Self {
        Self { error, origin }
    }
}

/// Engine misuse or internal inconsistency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Invariant {
    /// Render or commit was entered while already rendering or committing.
    #[error("should not already be working")]
    AlreadyWorking,
    /// Passive effects were flushed from inside render or commit.
    #[error("cannot flush passive effects while already rendering")]
    PassiveFlushWhileWorking,
    /// A commit was requested for a root with no finished tree.
    #[error("no finished work to commit")]
    NoFinishedWork,
    /// The finished tree handed to commit is the tree already committed.
    #[error("cannot commit the same tree as before")]
    CommitCurrentTree,
    /// An exhaustive render returned with work left.
    #[error("cannot commit an incomplete root")]
    IncompleteRender,
    /// A synchronous render abandoned the whole tree.
    #[error("synchronous render did not complete")]
    SyncRenderDidNotComplete,
    /// A retry was requested on a unit that cannot show fallback content.
    #[error("retry requested on a unit that is not a suspense boundary")]
    NotASuspenseBoundary,
}

/// A failure surfaced to the caller of a reconciler entry point.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// A render failed at a unit with no ancestor; the attempt was discarded
    /// and its lanes suspended.
    #[error("unrecoverable render failure: {0}")]
    Fatal(CapturedError),
    /// An error reached the root. The root's content has been removed and
    /// that removal committed.
    #[error("uncaught error: {0}")]
    Uncaught(CapturedError),
    /// Too many synchronous re-commits of one root in a row.
    #[error(
        "maximum update depth exceeded: a unit keeps scheduling synchronous updates while committing"
    )]
    MaxUpdateDepth,
    /// Too many passive-effect flushes in a row scheduled further updates.
    #[error("maximum update depth exceeded: passive effects keep scheduling updates")]
    MaxPassiveUpdateDepth,
    /// Internal inconsistency or misuse.
    #[error(transparent)]
    Invariant(#[from] Invariant),
}
