// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property tests for the lane algebra and the fallback delay curve.

use proptest::prelude::*;
use stratum_core::lane::{EventPriority, Lane, LaneAllocator, Lanes, TOTAL_LANES};
use stratum_core::reconciler::jnd;
use stratum_core::time::Duration;

fn lanes() -> impl Strategy<Value = Lanes> {
    (0_u32..(1 << TOTAL_LANES)).prop_map(Lanes::from_bits)
}

proptest! {
    #[test]
    fn highest_priority_is_lowest_member(set in lanes()) {
        let top = set.highest_priority();
        if set.is_empty() {
            prop_assert_eq!(top, Lane::NONE);
        } else {
            prop_assert!(set.has(top), "highest lane belongs to the set");
            for lane in set.iter() {
                prop_assert!(!lane.is_higher_priority_than(top), "{lane:?} outranks {top:?}");
            }
        }
    }

    #[test]
    fn iter_visits_every_lane_once(set in lanes()) {
        let mut rebuilt = Lanes::NONE;
        let mut count = 0;
        for lane in set.iter() {
            prop_assert!(!rebuilt.has(lane), "{lane:?} visited twice");
            rebuilt |= lane;
            count += 1;
        }
        prop_assert_eq!(rebuilt, set);
        prop_assert_eq!(count, set.bits().count_ones());
    }

    #[test]
    fn remove_and_intersect_partition(a in lanes(), b in lanes()) {
        let kept = a.remove(b);
        let shared = a.intersect(b);
        prop_assert!(!kept.intersects(b), "removed lanes are gone");
        prop_assert_eq!(kept | shared, a);
        prop_assert!(shared.is_subset_of(a) && shared.is_subset_of(b), "intersection is a subset of both");
    }

    #[test]
    fn group_contains_highest_lane(set in lanes()) {
        let group = set.highest_priority_group();
        prop_assert!(group.is_subset_of(set), "group stays inside the set");
        if !set.is_empty() {
            prop_assert!(group.has(set.highest_priority()), "group keeps the top lane");
        }
    }

    #[test]
    fn lower_priority_is_symmetric(a in 0_usize..4, b in 0_usize..4) {
        const ALL: [EventPriority; 4] = [
            EventPriority::Discrete,
            EventPriority::Continuous,
            EventPriority::Default,
            EventPriority::Idle,
        ];
        let (a, b) = (ALL[a], ALL[b]);
        prop_assert_eq!(a.lower(b), b.lower(a));
        prop_assert!(a.lower(b) >= a, "lower never raises urgency");
    }

    #[test]
    fn event_priority_of_its_lane_round_trips(index in 0_usize..4) {
        const ALL: [EventPriority; 4] = [
            EventPriority::Discrete,
            EventPriority::Continuous,
            EventPriority::Default,
            EventPriority::Idle,
        ];
        let priority = ALL[index];
        prop_assert_eq!(EventPriority::from_lanes(priority.lane().as_lanes()), priority);
    }

    #[test]
    fn jnd_is_monotonic(a in 0_u64..50_000, b in 0_u64..50_000) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(jnd(Duration(lo)) <= jnd(Duration(hi)), "jnd({lo}) > jnd({hi})");
        prop_assert!(jnd(Duration(hi)) >= Duration(hi), "jnd({hi}) below elapsed");
    }
}

#[test]
fn allocator_cycles_through_each_group() {
    let mut alloc = LaneAllocator::new();
    let transitions: Vec<Lane> = (0..17).map(|_| alloc.claim_transition_lane()).collect();
    assert_eq!(transitions[0], Lane::TRANSITION_1);
    assert_eq!(transitions[15], Lane::TRANSITION_16);
    assert_eq!(transitions[16], Lane::TRANSITION_1, "wraps after the last lane");

    let retries: Vec<Lane> = (0..6).map(|_| alloc.claim_retry_lane()).collect();
    assert_eq!(retries[4], Lane::RETRY_5);
    assert_eq!(retries[5], Lane::RETRY_1, "wraps after the last lane");
    assert!(
        retries.iter().all(|lane| Lanes::RETRIES.has(*lane)),
        "every claimed lane is a retry lane"
    );
}
