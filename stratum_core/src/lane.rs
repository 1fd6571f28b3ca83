// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Priority lanes.
//!
//! A [`Lane`] is one bit of a 31-bit priority word; a [`Lanes`] value is a set
//! of them. Lower bit positions are more urgent, so the highest-priority lane
//! of a set is its lowest set bit. [`Lane::SYNC`] (bit 0) outranks everything.
//!
//! ```text
//!   bit  0        SYNC
//!   bit  1..=2    input-continuous (hydration, normal)
//!   bit  3..=4    default (hydration, normal)
//!   bit  5        transition hydration
//!   bit  6..=21   16 transition lanes
//!   bit 22..=26   5 retry lanes
//!   bit 27        selective hydration
//!   bit 28..=29   idle (hydration, normal)
//!   bit 30        offscreen
//! ```
//!
//! Transition and retry lanes are handed out round-robin by
//! [`LaneAllocator`] so that unrelated transitions (or retries of unrelated
//! boundaries) land in different lanes and can finish independently.

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign};

/// Number of lanes in a [`Lanes`] word.
pub const TOTAL_LANES: usize = 31;

/// A single priority lane, or [`Lane::NONE`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lane(u32);

impl Lane {
    /// The absence of a lane.
    pub const NONE: Self = Self(0);
    /// The synchronous lane; always the most urgent.
    pub const SYNC: Self = Self(1 << 0);
    /// Hydration counterpart of [`INPUT_CONTINUOUS`](Self::INPUT_CONTINUOUS).
    pub const INPUT_CONTINUOUS_HYDRATION: Self = Self(1 << 1);
    /// Continuous input such as pointer moves and scrolling.
    pub const INPUT_CONTINUOUS: Self = Self(1 << 2);
    /// Hydration counterpart of [`DEFAULT`](Self::DEFAULT).
    pub const DEFAULT_HYDRATION: Self = Self(1 << 3);
    /// Updates with no more specific priority.
    pub const DEFAULT: Self = Self(1 << 4);
    /// Hydration lane for transitions.
    pub const TRANSITION_HYDRATION: Self = Self(1 << 5);
    /// First transition lane.
    pub const TRANSITION_1: Self = Self(1 << 6);
    /// Last transition lane.
    pub const TRANSITION_16: Self = Self(1 << 21);
    /// First retry lane.
    pub const RETRY_1: Self = Self(1 << 22);
    /// Last retry lane.
    pub const RETRY_5: Self = Self(1 << 26);
    /// Selective hydration.
    pub const SELECTIVE_HYDRATION: Self = Self(1 << 27);
    /// Hydration counterpart of [`IDLE`](Self::IDLE).
    pub const IDLE_HYDRATION: Self = Self(1 << 28);
    /// Work that may wait until nothing else is pending.
    pub const IDLE: Self = Self(1 << 29);
    /// Hidden subtrees.
    pub const OFFSCREEN: Self = Self(1 << 30);

    /// Returns the lane at bit `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= TOTAL_LANES`.
    #[inline]
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        assert!(index < TOTAL_LANES, "lane index out of range");
        Self(1 << index)
    }

    /// Returns the raw bit.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` for [`Lane::NONE`].
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns the bit position of this lane.
    ///
    /// # Panics
    ///
    /// Panics on [`Lane::NONE`].
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        assert!(self.0 != 0, "NONE has no lane index");
        self.0.trailing_zeros() as usize
    }

    /// Returns `true` if `self` is strictly more urgent than `other`.
    ///
    /// [`Lane::NONE`] is never more urgent than anything.
    #[inline]
    #[must_use]
    pub const fn is_higher_priority_than(self, other: Self) -> bool {
        self.0 != 0 && (other.0 == 0 || self.0 < other.0)
    }

    /// Widens this lane into a one-element set.
    #[inline]
    #[must_use]
    pub const fn as_lanes(self) -> Lanes {
        Lanes(self.0)
    }
}

impl fmt::Debug for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            f.write_str("Lane::NONE")
        } else {
            write!(f, "Lane({})", self.0.trailing_zeros())
        }
    }
}

/// A set of lanes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Lanes(u32);

impl Lanes {
    /// The empty set.
    pub const NONE: Self = Self(0);
    /// The blocking lanes: work in these lanes is rendered without yielding.
    pub const BLOCKING: Self = Self(
        Lane::SYNC.0
            | Lane::INPUT_CONTINUOUS_HYDRATION.0
            | Lane::INPUT_CONTINUOUS.0
            | Lane::DEFAULT_HYDRATION.0
            | Lane::DEFAULT.0,
    );
    /// All sixteen transition lanes.
    pub const TRANSITIONS: Self = Self(0b0000_0000_0011_1111_1111_1111_1100_0000);
    /// All five retry lanes.
    pub const RETRIES: Self = Self(0b0000_0111_1100_0000_0000_0000_0000_0000);
    /// Every lane below the idle group.
    pub const NON_IDLE: Self = Self(0b0000_1111_1111_1111_1111_1111_1111_1111);
    /// Every lane.
    pub const ALL: Self = Self((1 << TOTAL_LANES) - 1);

    /// Builds a set from raw bits, discarding bits beyond the lane range.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if the set is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set union.
    #[inline]
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Set difference: `self` without `other`.
    #[inline]
    #[must_use]
    pub const fn remove(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Set intersection.
    #[inline]
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Returns `true` if the sets share at least one lane.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns `true` if every lane of `subset` is in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, subset: Self) -> bool {
        self.0 & subset.0 == subset.0
    }

    /// Returns `true` if every lane of `self` is in `superset`.
    #[inline]
    #[must_use]
    pub const fn is_subset_of(self, superset: Self) -> bool {
        superset.contains(self)
    }

    /// Returns `true` if `lane` is in the set.
    #[inline]
    #[must_use]
    pub const fn has(self, lane: Lane) -> bool {
        self.0 & lane.0 != 0
    }

    /// Returns the most urgent lane of the set, or [`Lane::NONE`].
    #[inline]
    #[must_use]
    pub const fn highest_priority(self) -> Lane {
        Lane(self.0 & self.0.wrapping_neg())
    }

    /// Returns some lane of the set, or [`Lane::NONE`].
    ///
    /// Callers that only need "a lane of this batch" use this rather than
    /// [`highest_priority`](Self::highest_priority); the choice is free to
    /// change.
    #[inline]
    #[must_use]
    pub const fn pick_arbitrary(self) -> Lane {
        self.highest_priority()
    }

    /// Returns the lanes that should be worked on together with the most
    /// urgent lane of the set.
    ///
    /// Transitions batch with other pending transitions and retries with
    /// other retries; every other lane is rendered alone.
    #[must_use]
    pub const fn highest_priority_group(self) -> Self {
        let lane = self.highest_priority();
        if Self::TRANSITIONS.has(lane) {
            self.intersect(Self::TRANSITIONS)
        } else if Self::RETRIES.has(lane) {
            self.intersect(Self::RETRIES)
        } else {
            lane.as_lanes()
        }
    }

    /// Returns `true` if the set is non-empty and contains only retry lanes.
    #[inline]
    #[must_use]
    pub const fn includes_only_retries(self) -> bool {
        !self.is_empty() && self.is_subset_of(Self::RETRIES)
    }

    /// Returns `true` if the set is non-empty and contains only transition lanes.
    #[inline]
    #[must_use]
    pub const fn includes_only_transitions(self) -> bool {
        !self.is_empty() && self.is_subset_of(Self::TRANSITIONS)
    }

    /// Returns `true` if any lane must be rendered without yielding.
    #[inline]
    #[must_use]
    pub const fn includes_blocking(self) -> bool {
        self.intersects(Self::BLOCKING)
    }

    /// Returns `true` if any lane is below the idle group.
    #[inline]
    #[must_use]
    pub const fn includes_non_idle(self) -> bool {
        self.intersects(Self::NON_IDLE)
    }

    /// Iterates over the lanes of the set, most urgent first.
    #[inline]
    pub fn iter(self) -> LanesIter {
        LanesIter(self.0)
    }
}

impl From<Lane> for Lanes {
    #[inline]
    fn from(lane: Lane) -> Self {
        lane.as_lanes()
    }
}

impl BitOr for Lanes {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.merge(rhs)
    }
}

impl BitOr<Lane> for Lanes {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Lane) -> Self {
        self.merge(rhs.as_lanes())
    }
}

impl BitOr for Lane {
    type Output = Lanes;

    #[inline]
    fn bitor(self, rhs: Self) -> Lanes {
        Lanes(self.0 | rhs.0)
    }
}

impl BitOrAssign for Lanes {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitOrAssign<Lane> for Lanes {
    #[inline]
    fn bitor_assign(&mut self, rhs: Lane) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Lanes {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        self.intersect(rhs)
    }
}

impl fmt::Debug for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lanes({:#033b})", self.0)
    }
}

/// Iterator over the lanes of a [`Lanes`] set.
#[derive(Clone, Debug)]
pub struct LanesIter(u32);

impl Iterator for LanesIter {
    type Item = Lane;

    fn next(&mut self) -> Option<Lane> {
        if self.0 == 0 {
            return None;
        }
        let lane = self.0 & self.0.wrapping_neg();
        self.0 &= !lane;
        Some(Lane(lane))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for LanesIter {}

/// One value per lane, indexed by [`Lane::index`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaneMap<T>([T; TOTAL_LANES]);

impl<T: Copy> LaneMap<T> {
    /// Creates a map with every lane set to `value`.
    #[must_use]
    pub const fn filled(value: T) -> Self {
        Self([value; TOTAL_LANES])
    }
}

impl<T> LaneMap<T> {
    /// Creates a map by calling `f` once per lane index.
    #[must_use]
    pub fn from_fn(f: impl FnMut(usize) -> T) -> Self {
        Self(core::array::from_fn(f))
    }

    /// Returns the entry for `lane`.
    #[inline]
    #[must_use]
    pub fn get(&self, lane: Lane) -> &T {
        &self.0[lane.index()]
    }

    /// Returns the entry for `lane` mutably.
    #[inline]
    pub fn get_mut(&mut self, lane: Lane) -> &mut T {
        &mut self.0[lane.index()]
    }
}

/// Urgency class of the event that produced an update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    /// Discrete user input (clicks, key presses).
    Discrete,
    /// Continuous user input (drags, scrolls).
    Continuous,
    /// Anything else.
    Default,
    /// Background work.
    Idle,
}

impl EventPriority {
    /// Returns the representative lane of this priority.
    #[inline]
    #[must_use]
    pub const fn lane(self) -> Lane {
        match self {
            Self::Discrete => Lane::SYNC,
            Self::Continuous => Lane::INPUT_CONTINUOUS,
            Self::Default => Lane::DEFAULT,
            Self::Idle => Lane::IDLE,
        }
    }

    /// Classifies a lane set by its most urgent lane.
    #[must_use]
    pub const fn from_lanes(lanes: Lanes) -> Self {
        let lane = lanes.highest_priority();
        if !Lane::SYNC.is_higher_priority_than(lane) {
            Self::Discrete
        } else if !Lane::INPUT_CONTINUOUS.is_higher_priority_than(lane) {
            Self::Continuous
        } else if lane.as_lanes().includes_non_idle() {
            Self::Default
        } else {
            Self::Idle
        }
    }

    /// Returns the less urgent of two priorities.
    #[inline]
    #[must_use]
    pub fn lower(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Round-robin allocator for transition and retry lanes.
#[derive(Clone, Copy, Debug)]
pub struct LaneAllocator {
    next_transition: Lane,
    next_retry: Lane,
}

impl LaneAllocator {
    /// Creates an allocator starting at the first transition and retry lanes.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_transition: Lane::TRANSITION_1,
            next_retry: Lane::RETRY_1,
        }
    }

    /// Claims the next transition lane.
    pub fn claim_transition_lane(&mut self) -> Lane {
        let lane = self.next_transition;
        self.next_transition = Self::rotate(lane, Lane::TRANSITION_1, Lanes::TRANSITIONS);
        lane
    }

    /// Claims the next retry lane.
    pub fn claim_retry_lane(&mut self) -> Lane {
        let lane = self.next_retry;
        self.next_retry = Self::rotate(lane, Lane::RETRY_1, Lanes::RETRIES);
        lane
    }

    fn rotate(lane: Lane, first: Lane, group: Lanes) -> Lane {
        let next = Lane(lane.0 << 1);
        if group.has(next) { next } else { first }
    }
}

impl Default for LaneAllocator {
    fn default() -> Self {
        Self::new()
    }
}
