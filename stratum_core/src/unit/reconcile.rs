// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Child reconciliation and capture.

use alloc::vec::Vec;

use super::flags::EffectFlags;
use super::id::{ChildKey, INVALID, TypeTag, UnitId};
use super::kind::UnitKind;
use super::store::UnitStore;

/// One child an evaluator wants under the unit it is beginning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChildSpec {
    /// Structural kind of the child.
    pub kind: UnitKind,
    /// Evaluator-defined type; a changed type replaces the child.
    pub tag: TypeTag,
    /// Key distinguishing siblings of the same type.
    pub key: ChildKey,
}

impl ChildSpec {
    /// Creates a child description.
    #[must_use]
    pub const fn new(kind: UnitKind, tag: TypeTag, key: ChildKey) -> Self {
        Self { kind, tag, key }
    }
}

impl UnitStore {
    /// Rebuilds the children of `wip` from `children`.
    ///
    /// Each spec is matched against the committed children of `wip` by kind,
    /// tag, and key. Matches continue from their committed slot; the rest are
    /// created and flagged [`EffectFlags::PLACEMENT`]. Committed children
    /// left unmatched are recorded as deletions on `wip`.
    ///
    /// Returns the first new child.
    ///
    /// # Panics
    ///
    /// Panics if a spec names a root kind.
    pub fn reconcile_children(&mut self, wip: UnitId, children: &[ChildSpec]) -> Option<UnitId> {
        self.validate(wip);
        let w = wip.0 as usize;
        let mode = self.mode[w];
        self.deletions[w].clear();
        self.flags[w] = self.flags[w].difference(EffectFlags::CHILD_DELETION);

        let mut existing = Vec::new();
        let current = self.alternate[w];
        if current != INVALID {
            let mut child = self.first_child[current as usize];
            while child != INVALID {
                existing.push(child);
                child = self.next_sibling[child as usize];
            }
        }

        let mut first = INVALID;
        let mut prev = INVALID;
        for spec in children {
            assert!(spec.kind.root().is_none(), "a root cannot be a child");
            let matched = existing.iter().position(|&c| {
                let c = c as usize;
                self.kind[c] == spec.kind
                    && self.type_tag[c] == spec.tag
                    && self.child_key[c] == spec.key
            });
            let child = match matched {
                Some(pos) => {
                    let current_child = existing.remove(pos);
                    self.create_work_in_progress(UnitId(current_child)).0
                }
                None => {
                    let created = self.create_unit(spec.kind, mode, spec.tag, spec.key).0;
                    self.flags[created as usize] |= EffectFlags::PLACEMENT;
                    created
                }
            };
            self.parent[child as usize] = wip.0;
            self.next_sibling[child as usize] = INVALID;
            if prev == INVALID {
                first = child;
            } else {
                self.next_sibling[prev as usize] = child;
            }
            prev = child;
        }
        self.first_child[w] = first;

        if !existing.is_empty() {
            self.deletions[w].extend(existing.into_iter().map(UnitId));
            self.flags[w] |= EffectFlags::CHILD_DELETION;
        }
        UnitId::from_raw(first)
    }

    /// Gives `wip` in-progress copies of its committed children, unchanged.
    pub fn clone_children(&mut self, wip: UnitId) -> Option<UnitId> {
        self.validate(wip);
        let mut first = INVALID;
        let mut prev = INVALID;
        let mut current_child = self.first_child[wip.0 as usize];
        while current_child != INVALID {
            let next_current = self.next_sibling[current_child as usize];
            let child = self.create_work_in_progress(UnitId(current_child)).0;
            self.parent[child as usize] = wip.0;
            self.next_sibling[child as usize] = INVALID;
            if prev == INVALID {
                first = child;
            } else {
                self.next_sibling[prev as usize] = child;
            }
            prev = child;
            current_child = next_current;
        }
        self.first_child[wip.0 as usize] = first;
        UnitId::from_raw(first)
    }

    /// Skips re-evaluating `wip`.
    ///
    /// Returns `None` when nothing below it has work in `render_lanes`, in
    /// which case its committed children are kept as they are. Otherwise
    /// clones the children so the render can continue into them.
    pub fn bailout(&mut self, wip: UnitId, render_lanes: crate::lane::Lanes) -> Option<UnitId> {
        self.validate(wip);
        if !self.child_lanes[wip.0 as usize].intersects(render_lanes) {
            return None;
        }
        self.clone_children(wip)
    }

    /// Turns a pending capture on `wip` into a capture in progress.
    ///
    /// Returns `Some(wip)` when `wip` can capture and was asked to; the
    /// render then restarts from it. This is the default unwind behavior of
    /// [`UnitEvaluator::unwind`](crate::host::UnitEvaluator::unwind).
    pub fn capture_boundary(&mut self, wip: UnitId) -> Option<UnitId> {
        self.validate(wip);
        let w = wip.0 as usize;
        let flags = self.flags[w];
        let kind = self.kind[w];
        let can_capture = kind.captures_errors() || kind.captures_suspension();
        if !can_capture
            || !flags.contains(EffectFlags::SHOULD_CAPTURE)
            || flags.contains(EffectFlags::DID_CAPTURE)
        {
            return None;
        }
        let mut next = flags.difference(EffectFlags::SHOULD_CAPTURE) | EffectFlags::DID_CAPTURE;
        if kind.captures_suspension() {
            next |= EffectFlags::VISIBILITY;
        }
        self.flags[w] = next;
        Some(wip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::Lane;
    use crate::unit::{RootId, UnitMode};

    fn make_root(store: &mut UnitStore) -> UnitId {
        store.create_root_unit(RootId(0), UnitMode::CONCURRENT, TypeTag(0))
    }

    fn host(key: u64) -> ChildSpec {
        ChildSpec::new(UnitKind::Host, TypeTag(1), ChildKey(key))
    }

    /// Renders `specs` under the root and swaps the trees as a commit would.
    fn commit_children(store: &mut UnitStore, current: UnitId, specs: &[ChildSpec]) -> UnitId {
        let wip = store.create_work_in_progress(current);
        store.reconcile_children(wip, specs);
        store.bubble_properties(wip);
        wip
    }

    #[test]
    fn new_children_are_placed() {
        let mut store = UnitStore::new();
        let root = make_root(&mut store);
        let wip = commit_children(&mut store, root, &[host(1), host(2)]);
        let kids: Vec<_> = store.children(wip).collect();
        assert_eq!(kids.len(), 2);
        for kid in &kids {
            assert!(store.flags(*kid).contains(EffectFlags::PLACEMENT));
            assert_eq!(store.parent(*kid), Some(wip));
        }
        assert!(store.subtree_flags(wip).contains(EffectFlags::PLACEMENT));
    }

    #[test]
    fn matching_children_reuse_identity() {
        let mut store = UnitStore::new();
        let root = make_root(&mut store);
        let first = commit_children(&mut store, root, &[host(1), host(2)]);
        let old: Vec<_> = store.children(first).collect();

        // Swap order and drop one: key 2 survives, key 1 is deleted.
        let second = commit_children(&mut store, first, &[host(3), host(2)]);
        let new: Vec<_> = store.children(second).collect();
        assert_eq!(store.key(new[1]), store.key(old[1]), "key 2 kept its identity");
        assert!(!store.flags(new[1]).contains(EffectFlags::PLACEMENT));
        assert!(store.flags(new[0]).contains(EffectFlags::PLACEMENT));
        assert_eq!(store.deletions(second), [old[0]]);
        assert!(store.flags(second).contains(EffectFlags::CHILD_DELETION));
    }

    #[test]
    fn changed_tag_replaces_child() {
        let mut store = UnitStore::new();
        let root = make_root(&mut store);
        let first = commit_children(&mut store, root, &[host(1)]);
        let old = store.first_child(first);
        let other = ChildSpec::new(UnitKind::Component, TypeTag(9), ChildKey(1));
        let second = commit_children(&mut store, first, &[other]);
        assert_eq!(store.deletions(second).first().copied(), old);
    }

    #[test]
    fn bailout_skips_idle_subtrees() {
        let mut store = UnitStore::new();
        let root = make_root(&mut store);
        let first = commit_children(&mut store, root, &[host(1)]);
        let wip = store.create_work_in_progress(first);
        assert_eq!(store.bailout(wip, Lane::DEFAULT.into()), None);
        assert_eq!(
            store.first_child(wip),
            store.first_child(first),
            "committed children kept"
        );

        let child = store.first_child(first).unwrap();
        store.mark_update_lane_to_root(child, Lane::DEFAULT);
        let wip = store.create_work_in_progress(first);
        let cloned = store.bailout(wip, Lane::DEFAULT.into());
        assert!(cloned.is_some());
        assert_eq!(store.alternate(cloned.unwrap()), Some(child));
    }

    #[test]
    fn capture_flips_should_to_did() {
        let mut store = UnitStore::new();
        let boundary = store.create_unit(
            UnitKind::Suspense,
            UnitMode::CONCURRENT,
            TypeTag(2),
            ChildKey(0),
        );
        assert_eq!(store.capture_boundary(boundary), None, "nothing to capture");
        store.insert_flags(boundary, EffectFlags::SHOULD_CAPTURE);
        assert_eq!(store.capture_boundary(boundary), Some(boundary));
        let flags = store.flags(boundary);
        assert!(flags.contains(EffectFlags::DID_CAPTURE | EffectFlags::VISIBILITY));
        assert!(!flags.contains(EffectFlags::SHOULD_CAPTURE));
        assert_eq!(store.capture_boundary(boundary), None, "captures once");
    }

    #[test]
    fn plain_units_never_capture() {
        let mut store = UnitStore::new();
        let unit = store.create_unit(UnitKind::Host, UnitMode::CONCURRENT, TypeTag(1), ChildKey(0));
        store.insert_flags(unit, EffectFlags::SHOULD_CAPTURE);
        assert_eq!(store.capture_boundary(unit), None);
    }
}
