// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Unit kinds and modes.

use super::id::RootId;

/// What a unit is, as far as the reconciler cares.
///
/// Component semantics belong to the evaluator; the reconciler only needs to
/// know which units anchor a root and which can capture failures or
/// suspensions thrown from their subtree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// The top of a root's tree.
    Root(RootId),
    /// A unit backed by a host node.
    Host,
    /// A unit with no host presence of its own.
    Component,
    /// Shows fallback content while its subtree waits on a dependency.
    Suspense,
    /// Replaces its subtree with fallback content when it fails.
    ErrorBoundary,
}

impl UnitKind {
    /// Returns the root this unit anchors, if it is a root unit.
    #[inline]
    #[must_use]
    pub const fn root(self) -> Option<RootId> {
        match self {
            Self::Root(id) => Some(id),
            _ => None,
        }
    }

    /// Returns `true` if errors thrown below this unit can be captured here.
    #[inline]
    #[must_use]
    pub const fn captures_errors(self) -> bool {
        matches!(self, Self::Root(_) | Self::ErrorBoundary)
    }

    /// Returns `true` if suspensions thrown below this unit can be captured here.
    #[inline]
    #[must_use]
    pub const fn captures_suspension(self) -> bool {
        matches!(self, Self::Suspense)
    }
}

/// Per-unit rendering mode bits, inherited from the root.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct UnitMode(u8);

impl UnitMode {
    /// Synchronous-only rendering.
    pub const LEGACY: Self = Self(0);
    /// Rendering may be time-sliced and updates may use any lane.
    pub const CONCURRENT: Self = Self(1 << 0);

    /// Returns `true` if the concurrent bit is set.
    #[inline]
    #[must_use]
    pub const fn is_concurrent(self) -> bool {
        self.0 & Self::CONCURRENT.0 != 0
    }
}
