// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Unit, root, and dependency identity types.

use core::fmt;

/// Sentinel value indicating "no unit" in index fields.
pub const INVALID: u32 = u32::MAX;

/// A handle to one record slot in a [`UnitStore`](super::UnitStore).
///
/// Every logical unit owns at most two slots: the committed one and the one
/// being rebuilt. The two are linked through
/// [`alternate`](super::UnitStore::alternate) and share a [`UnitKey`].
/// Slots are never freed, so a `UnitId` stays valid for the life of the store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub(crate) u32);

impl UnitId {
    /// Returns the raw slot index (for diagnostics only).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) const fn from_raw(raw: u32) -> Option<Self> {
        if raw == INVALID { None } else { Some(Self(raw)) }
    }

    #[inline]
    pub(crate) const fn raw(id: Option<Self>) -> u32 {
        match id {
            Some(id) => id.0,
            None => INVALID,
        }
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({})", self.0)
    }
}

/// The stable identity shared by a unit's committed and in-progress slots.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitKey(pub(crate) u32);

impl UnitKey {
    /// Returns the raw key value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitKey({})", self.0)
    }
}

/// A handle to a root registered with a [`Reconciler`](crate::Reconciler).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RootId(pub(crate) u32);

impl RootId {
    /// Returns the raw root index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootId({})", self.0)
    }
}

/// An external dependency a unit can suspend on.
///
/// The reconciler only compares these for equality; the data source that
/// hands them out decides what they mean.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WakeableId(pub u64);

impl fmt::Debug for WakeableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WakeableId({})", self.0)
    }
}

/// Evaluator-defined type of a unit (what a component "is").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeTag(pub u32);

/// Evaluator-defined key distinguishing siblings of the same type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChildKey(pub u64);
