// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Effect flags and the per-phase masks of the commit pipeline.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// Pending side effects recorded on a unit during render.
///
/// Bits below [`HOST_EFFECT_MASK`](Self::HOST_EFFECT_MASK) describe work for
/// the commit phases. [`INCOMPLETE`](Self::INCOMPLETE) and
/// [`SHOULD_CAPTURE`](Self::SHOULD_CAPTURE) only live during render and steer
/// unwinding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EffectFlags(u32);

impl EffectFlags {
    /// No effects.
    pub const NONE: Self = Self(0);
    /// The unit's host node must be inserted.
    pub const PLACEMENT: Self = Self(1 << 1);
    /// The unit changed; host content or layout effects must be applied.
    pub const UPDATE: Self = Self(1 << 2);
    /// Some children were removed; see [`UnitStore::deletions`](super::UnitStore::deletions).
    pub const CHILD_DELETION: Self = Self(1 << 4);
    /// The host node's text content must be cleared.
    pub const CONTENT_RESET: Self = Self(1 << 5);
    /// Captured errors or callbacks must be delivered during layout.
    pub const CALLBACK: Self = Self(1 << 6);
    /// The unit captured a failure or suspension during this render.
    pub const DID_CAPTURE: Self = Self(1 << 7);
    /// The unit's host reference must be attached or detached.
    pub const REF: Self = Self(1 << 9);
    /// Host state must be read before mutation.
    pub const SNAPSHOT: Self = Self(1 << 10);
    /// The unit has passive effects.
    pub const PASSIVE: Self = Self(1 << 11);
    /// A boundary switched between primary and fallback content.
    pub const VISIBILITY: Self = Self(1 << 13);

    /// Every flag that survives into commit.
    pub const HOST_EFFECT_MASK: Self = Self((1 << 15) - 1);
    /// The unit's subtree was abandoned and must be unwound.
    pub const INCOMPLETE: Self = Self(1 << 15);
    /// The unit must capture on unwind.
    pub const SHOULD_CAPTURE: Self = Self(1 << 16);

    /// Flags visited by the before-mutation pass.
    pub const BEFORE_MUTATION_MASK: Self = Self(Self::UPDATE.0 | Self::SNAPSHOT.0);
    /// Flags visited by the mutation pass.
    pub const MUTATION_MASK: Self = Self(
        Self::PLACEMENT.0
            | Self::UPDATE.0
            | Self::CHILD_DELETION.0
            | Self::CONTENT_RESET.0
            | Self::REF.0
            | Self::VISIBILITY.0,
    );
    /// Flags visited by the layout pass.
    pub const LAYOUT_MASK: Self =
        Self(Self::UPDATE.0 | Self::CALLBACK.0 | Self::REF.0 | Self::VISIBILITY.0);
    /// Flags visited by the passive pass.
    pub const PASSIVE_MASK: Self = Self(Self::PASSIVE.0 | Self::CHILD_DELETION.0);

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds flags from raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns `true` if no flag is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every flag of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if any flag of `other` is set.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Union.
    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `self` without `other`.
    #[inline]
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Intersection.
    #[inline]
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
}

impl BitOr for EffectFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for EffectFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for EffectFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EffectFlags({:#b})", self.0)
    }
}

/// The ordered passes of a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EffectPhase {
    /// Read host state before anything changes.
    BeforeMutation,
    /// Apply structural and content changes.
    Mutation,
    /// Effects that observe the mutated host.
    Layout,
    /// Effects deferred until after paint.
    Passive,
}

impl EffectPhase {
    /// All phases in commit order.
    pub const ALL: [Self; 4] = [
        Self::BeforeMutation,
        Self::Mutation,
        Self::Layout,
        Self::Passive,
    ];

    /// Returns the flags this phase visits.
    #[inline]
    #[must_use]
    pub const fn mask(self) -> EffectFlags {
        match self {
            Self::BeforeMutation => EffectFlags::BEFORE_MUTATION_MASK,
            Self::Mutation => EffectFlags::MUTATION_MASK,
            Self::Layout => EffectFlags::LAYOUT_MASK,
            Self::Passive => EffectFlags::PASSIVE_MASK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_only_flags_are_outside_host_mask() {
        assert!(!EffectFlags::HOST_EFFECT_MASK.intersects(EffectFlags::INCOMPLETE));
        assert!(!EffectFlags::HOST_EFFECT_MASK.intersects(EffectFlags::SHOULD_CAPTURE));
        assert!(
            EffectFlags::HOST_EFFECT_MASK.contains(EffectFlags::DID_CAPTURE),
            "DID_CAPTURE must survive unwinding"
        );
    }

    #[test]
    fn every_phase_mask_is_host_visible() {
        for phase in EffectPhase::ALL {
            assert!(
                EffectFlags::HOST_EFFECT_MASK.contains(phase.mask()),
                "{phase:?} mask leaks render-only bits"
            );
        }
    }

    #[test]
    fn deletion_is_seen_by_mutation_and_passive() {
        let f = EffectFlags::CHILD_DELETION;
        assert!(f.intersects(EffectPhase::Mutation.mask()));
        assert!(f.intersects(EffectPhase::Passive.mask()));
        assert!(!f.intersects(EffectPhase::Layout.mask()));
    }
}
