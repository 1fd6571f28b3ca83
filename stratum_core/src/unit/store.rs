// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Struct-of-arrays unit storage with double-buffered slots, update queues,
//! and lane bookkeeping along the parent path.

use alloc::vec::Vec;

use crate::error::CapturedError;
use crate::lane::{Lane, Lanes};

use super::flags::EffectFlags;
use super::id::{ChildKey, INVALID, RootId, TypeTag, UnitId, UnitKey, WakeableId};
use super::kind::{UnitKind, UnitMode};
use super::traverse::Children;
use super::update::{ProcessedUpdates, Update, UpdateAction};

/// Struct-of-arrays storage for all units of all roots.
///
/// Each logical unit occupies up to two slots (committed and in-progress)
/// linked through `alternate`. Slots are never freed; a render that is
/// thrown away leaves its slots to be reused by the next
/// [`create_work_in_progress`](Self::create_work_in_progress) of the same
/// unit.
///
/// Update queues follow the same split: updates land in a pending queue
/// shared by both slots, and each slot keeps its own base queue so an
/// abandoned render never loses an update.
#[derive(Debug)]
pub struct UnitStore {
    // -- Identity --
    pub(crate) kind: Vec<UnitKind>,
    pub(crate) mode: Vec<UnitMode>,
    pub(crate) key: Vec<UnitKey>,
    pub(crate) type_tag: Vec<TypeTag>,
    pub(crate) child_key: Vec<ChildKey>,

    // -- Topology --
    pub(crate) parent: Vec<u32>,
    pub(crate) first_child: Vec<u32>,
    pub(crate) next_sibling: Vec<u32>,
    pub(crate) alternate: Vec<u32>,

    // -- Effects --
    pub(crate) flags: Vec<EffectFlags>,
    pub(crate) subtree_flags: Vec<EffectFlags>,
    pub(crate) deletions: Vec<Vec<UnitId>>,

    // -- Pending work --
    pub(crate) lanes: Vec<Lanes>,
    pub(crate) child_lanes: Vec<Lanes>,

    // -- State --
    pub(crate) memoized_state: Vec<i64>,
    pub(crate) base_state: Vec<i64>,
    pub(crate) base_queue: Vec<Vec<Update>>,
    pub(crate) captured: Vec<Vec<CapturedError>>,
    pub(crate) wakeables: Vec<Vec<WakeableId>>,

    // -- Per identity (indexed by UnitKey) --
    pub(crate) pending: Vec<Vec<Update>>,

    pub(crate) len: u32,
}

impl Default for UnitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            kind: Vec::new(),
            mode: Vec::new(),
            key: Vec::new(),
            type_tag: Vec::new(),
            child_key: Vec::new(),
            parent: Vec::new(),
            first_child: Vec::new(),
            next_sibling: Vec::new(),
            alternate: Vec::new(),
            flags: Vec::new(),
            subtree_flags: Vec::new(),
            deletions: Vec::new(),
            lanes: Vec::new(),
            child_lanes: Vec::new(),
            memoized_state: Vec::new(),
            base_state: Vec::new(),
            base_queue: Vec::new(),
            captured: Vec::new(),
            wakeables: Vec::new(),
            pending: Vec::new(),
            len: 0,
        }
    }

    // -- Allocation --

    fn push_slot(
        &mut self,
        kind: UnitKind,
        mode: UnitMode,
        key: UnitKey,
        tag: TypeTag,
        child_key: ChildKey,
    ) -> u32 {
        let idx = self.len;
        self.len += 1;
        self.kind.push(kind);
        self.mode.push(mode);
        self.key.push(key);
        self.type_tag.push(tag);
        self.child_key.push(child_key);
        self.parent.push(INVALID);
        self.first_child.push(INVALID);
        self.next_sibling.push(INVALID);
        self.alternate.push(INVALID);
        self.flags.push(EffectFlags::NONE);
        self.subtree_flags.push(EffectFlags::NONE);
        self.deletions.push(Vec::new());
        self.lanes.push(Lanes::NONE);
        self.child_lanes.push(Lanes::NONE);
        self.memoized_state.push(0);
        self.base_state.push(0);
        self.base_queue.push(Vec::new());
        self.captured.push(Vec::new());
        self.wakeables.push(Vec::new());
        idx
    }

    /// Creates a detached unit with a fresh identity and returns its slot.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX - 1` identities are created.
    pub fn create_unit(
        &mut self,
        kind: UnitKind,
        mode: UnitMode,
        tag: TypeTag,
        child_key: ChildKey,
    ) -> UnitId {
        assert!(
            self.pending.len() < INVALID as usize,
            "unit identity space exhausted"
        );
        #[expect(clippy::cast_possible_truncation, reason = "bounded by the assert above")]
        let key = self.pending.len() as u32;
        self.pending.push(Vec::new());
        UnitId(self.push_slot(kind, mode, UnitKey(key), tag, child_key))
    }

    /// Creates the committed head unit of a root.
    pub fn create_root_unit(&mut self, root: RootId, mode: UnitMode, tag: TypeTag) -> UnitId {
        self.create_unit(UnitKind::Root(root), mode, tag, ChildKey::default())
    }

    /// Returns the in-progress slot for `current`, creating it on first use.
    ///
    /// The slot starts as a copy of `current` with its effects cleared, so a
    /// render can rebuild it without touching the committed record.
    pub fn create_work_in_progress(&mut self, current: UnitId) -> UnitId {
        self.validate(current);
        let c = current.0 as usize;
        let wip = if self.alternate[c] == INVALID {
            let w = self.push_slot(
                self.kind[c],
                self.mode[c],
                self.key[c],
                self.type_tag[c],
                self.child_key[c],
            );
            self.alternate[w as usize] = current.0;
            self.alternate[c] = w;
            w
        } else {
            let w = self.alternate[c];
            self.flags[w as usize] = EffectFlags::NONE;
            self.subtree_flags[w as usize] = EffectFlags::NONE;
            self.deletions[w as usize].clear();
            w
        };
        let w = wip as usize;
        self.parent[w] = self.parent[c];
        self.first_child[w] = self.first_child[c];
        self.next_sibling[w] = self.next_sibling[c];
        self.lanes[w] = self.lanes[c];
        self.child_lanes[w] = self.child_lanes[c];
        self.memoized_state[w] = self.memoized_state[c];
        self.base_state[w] = self.base_state[c];
        let queue = self.base_queue[c].clone();
        self.base_queue[w] = queue;
        self.captured[w].clear();
        self.wakeables[w].clear();
        UnitId(wip)
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns `true` if the store has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // -- Identity getters --

    /// Returns the kind of a unit.
    #[must_use]
    pub fn kind(&self, id: UnitId) -> UnitKind {
        self.validate(id);
        self.kind[id.0 as usize]
    }

    /// Returns the mode of a unit.
    #[must_use]
    pub fn mode(&self, id: UnitId) -> UnitMode {
        self.validate(id);
        self.mode[id.0 as usize]
    }

    /// Returns the identity shared by both slots of a unit.
    #[must_use]
    pub fn key(&self, id: UnitId) -> UnitKey {
        self.validate(id);
        self.key[id.0 as usize]
    }

    /// Returns the evaluator-defined type of a unit.
    #[must_use]
    pub fn type_tag(&self, id: UnitId) -> TypeTag {
        self.validate(id);
        self.type_tag[id.0 as usize]
    }

    /// Returns the evaluator-defined sibling key of a unit.
    #[must_use]
    pub fn child_key(&self, id: UnitId) -> ChildKey {
        self.validate(id);
        self.child_key[id.0 as usize]
    }

    // -- Topology getters --

    /// Returns the parent of a unit, if any.
    #[must_use]
    pub fn parent(&self, id: UnitId) -> Option<UnitId> {
        self.validate(id);
        UnitId::from_raw(self.parent[id.0 as usize])
    }

    /// Returns the first child of a unit, if any.
    #[must_use]
    pub fn first_child(&self, id: UnitId) -> Option<UnitId> {
        self.validate(id);
        UnitId::from_raw(self.first_child[id.0 as usize])
    }

    /// Returns the next sibling of a unit, if any.
    #[must_use]
    pub fn next_sibling(&self, id: UnitId) -> Option<UnitId> {
        self.validate(id);
        UnitId::from_raw(self.next_sibling[id.0 as usize])
    }

    /// Returns the other slot of the same unit, if one was created.
    #[must_use]
    pub fn alternate(&self, id: UnitId) -> Option<UnitId> {
        self.validate(id);
        UnitId::from_raw(self.alternate[id.0 as usize])
    }

    /// Returns an iterator over the direct children of a unit.
    #[must_use]
    pub fn children(&self, id: UnitId) -> Children<'_> {
        self.validate(id);
        Children::new(self, self.first_child[id.0 as usize])
    }

    /// Returns `id` and its descendants in depth-first pre-order.
    #[must_use]
    pub fn preorder(&self, id: UnitId) -> Vec<UnitId> {
        self.validate(id);
        let mut out = Vec::new();
        let mut stack = alloc::vec![id.0];
        while let Some(idx) = stack.pop() {
            out.push(UnitId(idx));
            let first = stack.len();
            let mut child = self.first_child[idx as usize];
            while child != INVALID {
                stack.push(child);
                child = self.next_sibling[child as usize];
            }
            stack[first..].reverse();
        }
        out
    }

    /// Walks parent links from `id` and returns the root they lead to.
    ///
    /// Returns `None` for a unit that was detached by a deletion.
    #[must_use]
    pub fn root_of(&self, id: UnitId) -> Option<RootId> {
        self.validate(id);
        let mut node = id.0;
        loop {
            let parent = self.parent[node as usize];
            if parent == INVALID {
                return self.kind[node as usize].root();
            }
            node = parent;
        }
    }

    // -- Effects --

    /// Returns the effect flags of a unit.
    #[must_use]
    pub fn flags(&self, id: UnitId) -> EffectFlags {
        self.validate(id);
        self.flags[id.0 as usize]
    }

    /// Returns the union of the effect flags below a unit.
    #[must_use]
    pub fn subtree_flags(&self, id: UnitId) -> EffectFlags {
        self.validate(id);
        self.subtree_flags[id.0 as usize]
    }

    /// Sets additional effect flags on a unit.
    pub fn insert_flags(&mut self, id: UnitId, flags: EffectFlags) {
        self.validate(id);
        self.flags[id.0 as usize] |= flags;
    }

    /// Clears effect flags on a unit.
    pub fn remove_flags(&mut self, id: UnitId, flags: EffectFlags) {
        self.validate(id);
        let slot = &mut self.flags[id.0 as usize];
        *slot = slot.difference(flags);
    }

    /// Returns the children removed from a unit in its last render.
    #[must_use]
    pub fn deletions(&self, id: UnitId) -> &[UnitId] {
        self.validate(id);
        &self.deletions[id.0 as usize]
    }

    // -- Pending work --

    /// Returns the lanes of updates pending on the unit itself.
    #[must_use]
    pub fn lanes(&self, id: UnitId) -> Lanes {
        self.validate(id);
        self.lanes[id.0 as usize]
    }

    /// Returns the lanes of updates pending below the unit.
    #[must_use]
    pub fn child_lanes(&self, id: UnitId) -> Lanes {
        self.validate(id);
        self.child_lanes[id.0 as usize]
    }

    // -- State --

    /// Returns the state word computed by the unit's last render.
    #[must_use]
    pub fn memoized_state(&self, id: UnitId) -> i64 {
        self.validate(id);
        self.memoized_state[id.0 as usize]
    }

    /// Overwrites the state word of a unit.
    pub fn set_memoized_state(&mut self, id: UnitId, state: i64) {
        self.validate(id);
        self.memoized_state[id.0 as usize] = state;
    }

    /// Returns the errors delivered to a unit in its last render.
    #[must_use]
    pub fn captured_errors(&self, id: UnitId) -> &[CapturedError] {
        self.validate(id);
        &self.captured[id.0 as usize]
    }

    /// Returns the dependencies a suspense boundary is waiting on.
    #[must_use]
    pub fn wakeables(&self, id: UnitId) -> &[WakeableId] {
        self.validate(id);
        &self.wakeables[id.0 as usize]
    }

    /// Returns the number of updates queued but not yet seen by a render.
    #[must_use]
    pub fn pending_update_count(&self, id: UnitId) -> usize {
        self.validate(id);
        self.pending[self.key[id.0 as usize].0 as usize].len()
    }

    // -- Update queues --

    pub(crate) fn enqueue_pending(&mut self, id: UnitId, update: Update) {
        let key = self.key[id.0 as usize].0 as usize;
        self.pending[key].push(update);
    }

    /// Queues an update on the in-progress slot only; it disappears if this
    /// render is abandoned.
    pub(crate) fn enqueue_captured(&mut self, wip: UnitId, update: Update) {
        let w = wip.0 as usize;
        self.lanes[w] |= update.lane;
        self.base_queue[w].push(update);
    }

    /// Applies the updates of `render_lanes` to the unit's state word.
    ///
    /// Pending updates are first appended to the base queues of both slots.
    /// Updates outside `render_lanes` are skipped; once one is skipped, every
    /// later update is kept in the base queue as well so the next render
    /// replays them in order. The unit's own lanes become the skipped lanes.
    ///
    /// Captured errors are collected rather than applied, recorded on the
    /// unit, and flagged with [`EffectFlags::CALLBACK`].
    pub fn process_update_queue(&mut self, wip: UnitId, render_lanes: Lanes) -> ProcessedUpdates {
        self.validate(wip);
        let w = wip.0 as usize;
        let key = self.key[w].0 as usize;

        let pending = core::mem::take(&mut self.pending[key]);
        if !pending.is_empty() {
            let alt = self.alternate[w];
            if alt != INVALID {
                self.base_queue[alt as usize].extend(pending.iter().cloned());
            }
            self.base_queue[w].extend(pending);
        }

        let queue = core::mem::take(&mut self.base_queue[w]);
        let mut state = self.base_state[w];
        let mut new_base_state = None;
        let mut rebased = Vec::new();
        let mut out = ProcessedUpdates::default();

        for update in queue {
            if !update.lane.as_lanes().is_subset_of(render_lanes) {
                if rebased.is_empty() {
                    new_base_state = Some(state);
                }
                out.skipped |= update.lane;
                rebased.push(update);
                continue;
            }
            let captured = match &update.action {
                UpdateAction::CaptureError(error) => Some(error.clone()),
                _ => None,
            };
            if let Some(error) = captured {
                out.captured.push(error);
                continue;
            }
            state = apply(state, &update.action);
            if !rebased.is_empty() {
                rebased.push(Update {
                    lane: Lane::NONE,
                    ..update
                });
            }
        }

        out.changed = state != self.memoized_state[w];
        self.base_state[w] = new_base_state.unwrap_or(state);
        self.base_queue[w] = rebased;
        self.memoized_state[w] = state;
        self.lanes[w] = out.skipped;
        if !out.captured.is_empty() {
            self.flags[w] |= EffectFlags::CALLBACK;
            self.captured[w].extend(out.captured.iter().cloned());
        }
        out
    }

    // -- Lane propagation --

    /// Marks `lane` on the unit and on the child lanes of every ancestor, in
    /// both slots, and returns the root reached.
    pub(crate) fn mark_update_lane_to_root(&mut self, id: UnitId, lane: Lane) -> Option<RootId> {
        let u = id.0 as usize;
        self.lanes[u] |= lane;
        let alt = self.alternate[u];
        if alt != INVALID {
            self.lanes[alt as usize] |= lane;
        }
        let mut node = id.0;
        let mut parent = self.parent[u];
        while parent != INVALID {
            let p = parent as usize;
            self.child_lanes[p] |= lane;
            let alt = self.alternate[p];
            if alt != INVALID {
                self.child_lanes[alt as usize] |= lane;
            }
            node = parent;
            parent = self.parent[p];
        }
        self.kind[node as usize].root()
    }

    /// Sets lanes on both slots of a unit without touching ancestors.
    pub(crate) fn merge_lanes_on_pair(&mut self, id: UnitId, lane: Lane) {
        let u = id.0 as usize;
        self.lanes[u] |= lane;
        let alt = self.alternate[u];
        if alt != INVALID {
            self.lanes[alt as usize] |= lane;
        }
    }

    /// Recomputes child lanes and subtree flags of a completed unit from its
    /// children, and points the children's parent links at it.
    ///
    /// When the children are still the committed ones (the unit bailed out),
    /// their effects belong to an earlier commit and are not bubbled.
    pub(crate) fn bubble_properties(&mut self, completed: UnitId) {
        let u = completed.0 as usize;
        let alt = self.alternate[u];
        let did_bailout = alt != INVALID && self.first_child[alt as usize] == self.first_child[u];

        let mut child_lanes = Lanes::NONE;
        let mut subtree = EffectFlags::NONE;
        let mut child = self.first_child[u];
        while child != INVALID {
            let c = child as usize;
            child_lanes = child_lanes | self.lanes[c] | self.child_lanes[c];
            if !did_bailout {
                subtree = subtree | self.subtree_flags[c] | self.flags[c];
            }
            self.parent[c] = completed.0;
            child = self.next_sibling[c];
        }
        self.child_lanes[u] = child_lanes;
        self.subtree_flags[u] |= subtree;
    }

    /// Marks a unit abandoned and drops the effects collected below it.
    pub(crate) fn mark_incomplete(&mut self, id: UnitId) {
        let u = id.0 as usize;
        self.flags[u] |= EffectFlags::INCOMPLETE;
        self.subtree_flags[u] = EffectFlags::NONE;
        self.deletions[u].clear();
    }

    /// Cuts a deleted unit loose from the tree in both slots.
    pub(crate) fn detach(&mut self, id: UnitId) {
        let u = id.0 as usize;
        self.parent[u] = INVALID;
        let alt = self.alternate[u];
        if alt != INVALID {
            self.parent[alt as usize] = INVALID;
        }
    }

    #[inline]
    pub(crate) fn validate(&self, id: UnitId) {
        assert!(id.0 < self.len, "unknown {id:?}");
    }
}

fn apply(state: i64, action: &UpdateAction) -> i64 {
    match action {
        UpdateAction::Replace(value) => *value,
        UpdateAction::Add(delta) => state.saturating_add(*delta),
        UpdateAction::CaptureError(_) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnitError;

    fn make_root(store: &mut UnitStore) -> UnitId {
        store.create_root_unit(RootId(0), UnitMode::CONCURRENT, TypeTag(0))
    }

    fn make_child(store: &mut UnitStore, parent: UnitId, tag: u32) -> UnitId {
        let child = store.create_unit(UnitKind::Host, UnitMode::CONCURRENT, TypeTag(tag), ChildKey(0));
        store.parent[child.0 as usize] = parent.0;
        let first = store.first_child[parent.0 as usize];
        store.next_sibling[child.0 as usize] = first;
        store.first_child[parent.0 as usize] = child.0;
        child
    }

    #[test]
    fn work_in_progress_pairs_with_current() {
        let mut store = UnitStore::new();
        let root = make_root(&mut store);
        let wip = store.create_work_in_progress(root);
        assert_ne!(wip, root);
        assert_eq!(store.alternate(wip), Some(root));
        assert_eq!(store.alternate(root), Some(wip));
        assert_eq!(store.key(wip), store.key(root), "pair shares identity");

        store.insert_flags(wip, EffectFlags::UPDATE);
        let again = store.create_work_in_progress(root);
        assert_eq!(again, wip, "second render reuses the slot");
        assert!(store.flags(again).is_empty(), "effects reset on reuse");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn lane_marking_reaches_root_through_both_slots() {
        let mut store = UnitStore::new();
        let root = make_root(&mut store);
        let child = make_child(&mut store, root, 1);
        let leaf = make_child(&mut store, child, 2);
        let root_wip = store.create_work_in_progress(root);

        let found = store.mark_update_lane_to_root(leaf, Lane::DEFAULT);
        assert_eq!(found, Some(RootId(0)));
        assert!(store.lanes(leaf).has(Lane::DEFAULT));
        assert!(store.child_lanes(child).has(Lane::DEFAULT));
        assert!(store.child_lanes(root).has(Lane::DEFAULT));
        assert!(store.child_lanes(root_wip).has(Lane::DEFAULT), "alternate marked");
    }

    #[test]
    fn detached_unit_has_no_root() {
        let mut store = UnitStore::new();
        let root = make_root(&mut store);
        let child = make_child(&mut store, root, 1);
        store.detach(child);
        assert_eq!(store.root_of(child), None);
        assert_eq!(store.mark_update_lane_to_root(child, Lane::SYNC), None);
    }

    #[test]
    fn skipped_updates_are_rebased() {
        let mut store = UnitStore::new();
        let root = make_root(&mut store);
        store.enqueue_pending(root, Update::new(Lane::IDLE, UpdateAction::Add(100)));
        store.enqueue_pending(root, Update::new(Lane::DEFAULT, UpdateAction::Add(1)));

        let wip = store.create_work_in_progress(root);
        let first = store.process_update_queue(wip, Lane::DEFAULT.into());
        assert_eq!(store.memoized_state(wip), 1, "only the default update applied");
        assert_eq!(first.skipped, Lane::IDLE.as_lanes());
        assert_eq!(store.lanes(wip), Lane::IDLE.as_lanes());

        // Commit the first render: the wip becomes current.
        let wip2 = store.create_work_in_progress(wip);
        assert_eq!(wip2, root);
        let second = store.process_update_queue(wip2, Lane::DEFAULT | Lane::IDLE);
        assert_eq!(
            store.memoized_state(wip2),
            101,
            "idle update replayed before the rebased default update"
        );
        assert!(second.skipped.is_empty());
    }

    #[test]
    fn abandoned_render_keeps_updates() {
        let mut store = UnitStore::new();
        let root = make_root(&mut store);
        store.enqueue_pending(root, Update::new(Lane::DEFAULT, UpdateAction::Replace(7)));

        let wip = store.create_work_in_progress(root);
        store.process_update_queue(wip, Lane::DEFAULT.into());
        assert_eq!(store.memoized_state(wip), 7);

        // Throw the render away and start again from the committed slot.
        let retry = store.create_work_in_progress(root);
        assert_eq!(store.memoized_state(retry), 0, "wip reset from current");
        store.process_update_queue(retry, Lane::DEFAULT.into());
        assert_eq!(store.memoized_state(retry), 7, "update still in current base queue");
    }

    #[test]
    fn captured_errors_flag_callback() {
        let mut store = UnitStore::new();
        let root = make_root(&mut store);
        let wip = store.create_work_in_progress(root);
        let error = CapturedError::new(UnitError::new("bad"), wip);
        store.enqueue_captured(wip, Update::capture(Lane::DEFAULT, error.clone()));
        let out = store.process_update_queue(wip, Lane::DEFAULT.into());
        assert_eq!(out.captured, [error]);
        assert!(store.flags(wip).contains(EffectFlags::CALLBACK));
        assert_eq!(store.captured_errors(wip).len(), 1);
    }

    #[test]
    fn bubbling_collects_lanes_and_flags() {
        let mut store = UnitStore::new();
        let root = make_root(&mut store);
        let a = make_child(&mut store, root, 1);
        let b = make_child(&mut store, root, 2);
        store.lanes[a.0 as usize] = Lane::IDLE.into();
        store.child_lanes[b.0 as usize] = Lane::DEFAULT.into();
        store.insert_flags(b, EffectFlags::PLACEMENT);

        store.bubble_properties(root);
        assert_eq!(store.child_lanes(root), Lane::IDLE | Lane::DEFAULT);
        assert!(store.subtree_flags(root).contains(EffectFlags::PLACEMENT));
    }

    #[test]
    fn preorder_visits_children_in_order() {
        let mut store = UnitStore::new();
        let root = make_root(&mut store);
        // make_child prepends, so create in reverse.
        let b = make_child(&mut store, root, 2);
        let a = make_child(&mut store, root, 1);
        let a1 = make_child(&mut store, a, 3);
        assert_eq!(store.preorder(root), [root, a, a1, b]);
    }

    #[test]
    #[should_panic(expected = "unknown UnitId")]
    fn unknown_id_panics() {
        let store = UnitStore::new();
        let _ = store.kind(UnitId(0));
    }
}
