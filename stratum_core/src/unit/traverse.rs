// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tree traversal utilities.

use alloc::vec::Vec;

use super::flags::EffectFlags;
use super::id::{INVALID, UnitId};
use super::store::UnitStore;

/// An iterator over the direct children of a unit.
///
/// Created by [`UnitStore::children`].
#[derive(Debug)]
pub struct Children<'a> {
    store: &'a UnitStore,
    current: u32,
}

impl<'a> Children<'a> {
    pub(crate) fn new(store: &'a UnitStore, first: u32) -> Self {
        Self {
            store,
            current: first,
        }
    }
}

impl Iterator for Children<'_> {
    type Item = UnitId;

    fn next(&mut self) -> Option<UnitId> {
        if self.current == INVALID {
            return None;
        }
        let idx = self.current;
        self.current = self.store.next_sibling[idx as usize];
        Some(UnitId(idx))
    }
}

/// Collects the units under `top` (inclusive) whose own flags intersect
/// `mask`, children before parents and siblings in order.
///
/// Subtrees whose `subtree_flags` do not intersect `mask` are skipped
/// without being visited.
pub(crate) fn effect_order(store: &UnitStore, top: UnitId, mask: EffectFlags) -> Vec<UnitId> {
    let mut out = Vec::new();
    let mut stack: Vec<(u32, bool)> = alloc::vec![(top.0, false)];
    while let Some((idx, expanded)) = stack.pop() {
        let i = idx as usize;
        if expanded {
            if store.flags[i].intersects(mask) {
                out.push(UnitId(idx));
            }
            continue;
        }
        stack.push((idx, true));
        if store.subtree_flags[i].intersects(mask) {
            let first = stack.len();
            let mut child = store.first_child[i];
            while child != INVALID {
                stack.push((child, false));
                child = store.next_sibling[child as usize];
            }
            stack[first..].reverse();
        }
    }
    out
}

/// Collects the units of a subtree that is being deleted, children before
/// parents.
pub(crate) fn deleted_subtree(store: &UnitStore, top: UnitId) -> Vec<UnitId> {
    let mut out = store.preorder(top);
    out.reverse();
    out
}
