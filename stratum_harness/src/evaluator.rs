// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A unit evaluator driven by a static tree description.

use alloc::format;
use alloc::vec::Vec;

use stratum_core::error::UnitError;
use stratum_core::host::{CacheHandle, EvalContext, Step, UnitEvaluator};
use stratum_core::unit::{
    ChildKey, ChildSpec, EffectFlags, TypeTag, UnitId, UnitKind, UnitStore, WakeableId,
};

/// Index of a node in a [`Tree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// Returns the type tag units rendered from this node carry.
    ///
    /// Tag 0 is reserved for the root.
    #[must_use]
    pub const fn tag(self) -> TypeTag {
        TypeTag(self.0 + 1)
    }

    /// Returns the node a type tag was rendered from.
    #[must_use]
    pub const fn from_tag(tag: TypeTag) -> Option<Self> {
        match tag.0 {
            0 => None,
            n => Some(Self(n - 1)),
        }
    }
}

/// Structural kind of a scripted node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A host node; re-rendering it requests a host update.
    Host,
    /// A node with no host presence.
    Component,
    /// Shows its fallback children while a child is suspended.
    Suspense,
    /// Shows its fallback children after a child failed.
    ErrorBoundary,
}

impl NodeKind {
    const fn unit_kind(self) -> UnitKind {
        match self {
            Self::Host => UnitKind::Host,
            Self::Component => UnitKind::Component,
            Self::Suspense => UnitKind::Suspense,
            Self::ErrorBoundary => UnitKind::ErrorBoundary,
        }
    }
}

/// One node of a [`Tree`].
#[derive(Clone, Copy, Debug)]
pub struct Node {
    /// Name used in assertions.
    pub name: &'static str,
    /// Structural kind.
    pub kind: NodeKind,
    parent: Option<NodeId>,
    in_fallback: bool,
    /// The node renders while the root state is at least this.
    pub visible_from: i64,
    /// The node stops rendering once the root state reaches this.
    pub visible_until: Option<i64>,
    /// The node suspends on this dependency until it is resolved.
    pub suspends_on: Option<WakeableId>,
    /// The node fails this many more times; `u32::MAX` fails forever.
    pub failures: u32,
    /// The node has passive effects every time it renders.
    pub passive: bool,
    /// The node has layout effects every time it renders.
    pub layout: bool,
    /// The node reads the root's pooled cache.
    pub uses_cache: bool,
}

impl Node {
    fn visible(&self, root_state: i64) -> bool {
        root_state >= self.visible_from && self.visible_until.is_none_or(|until| root_state < until)
    }
}

/// A static description of what a root renders.
///
/// Nodes are listed under their parent in insertion order. The root renders
/// the nodes without a parent. Visibility depends on the root's state word
/// only, so one update on the root can reveal or hide any part of the tree.
#[derive(Clone, Debug, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    root_failures: u32,
}

impl Tree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node under `parent` (or under the root).
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not a node of this tree.
    pub fn add(&mut self, parent: Option<NodeId>, name: &'static str, kind: NodeKind) -> NodeId {
        self.push(parent, name, kind, false)
    }

    /// Adds a host node to the fallback content of boundary `boundary`.
    ///
    /// # Panics
    ///
    /// Panics if `boundary` is not a suspense or error boundary of this tree.
    pub fn add_fallback(&mut self, boundary: NodeId, name: &'static str) -> NodeId {
        assert!(
            matches!(
                self.node(boundary).kind,
                NodeKind::Suspense | NodeKind::ErrorBoundary
            ),
            "fallback content needs a boundary"
        );
        self.push(Some(boundary), name, NodeKind::Host, true)
    }

    fn push(
        &mut self,
        parent: Option<NodeId>,
        name: &'static str,
        kind: NodeKind,
        in_fallback: bool,
    ) -> NodeId {
        if let Some(parent) = parent {
            assert!((parent.0 as usize) < self.nodes.len(), "unknown {parent:?}");
        }
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(Node {
            name,
            kind,
            parent,
            in_fallback,
            visible_from: i64::MIN,
            visible_until: None,
            suspends_on: None,
            failures: 0,
            passive: false,
            layout: false,
            uses_cache: false,
        });
        id
    }

    /// Returns a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a node of this tree.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    /// Returns a node for editing.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a node of this tree.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    /// Finds a node by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .and_then(|i| u32::try_from(i).ok())
            .map(NodeId)
    }

    /// Returns the name of the node a type tag was rendered from; `"root"`
    /// for the root.
    #[must_use]
    pub fn name_of(&self, tag: TypeTag) -> &'static str {
        NodeId::from_tag(tag)
            .and_then(|id| self.nodes.get(id.0 as usize))
            .map_or("root", |n| n.name)
    }

    /// Makes the root fail the next `times` times it is begun.
    pub fn fail_root(&mut self, times: u32) {
        self.root_failures = times;
    }

    fn child_specs(&self, parent: Option<NodeId>, fallback: bool, root_state: i64) -> Vec<ChildSpec> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent == parent && n.in_fallback == fallback && n.visible(root_state))
            .map(|(i, n)| {
                let id = NodeId(u32::try_from(i).unwrap_or(u32::MAX));
                ChildSpec::new(n.kind.unit_kind(), id.tag(), ChildKey(u64::from(id.0)))
            })
            .collect()
    }
}

/// [`UnitEvaluator`] that renders a [`Tree`].
///
/// The root's state word selects which nodes are visible. A unit bails out
/// when the root state did not change in this render and the unit has no
/// update of its own.
#[derive(Debug)]
pub struct ScriptedEvaluator {
    tree: Tree,
    resolved: Vec<WakeableId>,
    root_state: i64,
    root_changed: bool,
    next_cache: u64,
    began: Vec<TypeTag>,
    suspended: Vec<(TypeTag, WakeableId)>,
    failed: Vec<TypeTag>,
    interrupted: Vec<TypeTag>,
}

impl ScriptedEvaluator {
    /// Creates an evaluator for `tree`.
    #[must_use]
    pub fn new(tree: Tree) -> Self {
        Self {
            tree,
            resolved: Vec::new(),
            root_state: 0,
            root_changed: false,
            next_cache: 0,
            began: Vec::new(),
            suspended: Vec::new(),
            failed: Vec::new(),
            interrupted: Vec::new(),
        }
    }

    /// Returns the tree.
    #[must_use]
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Returns the tree for editing between renders.
    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    /// Marks `wakeable` resolved; nodes waiting on it render from now on.
    pub fn resolve(&mut self, wakeable: WakeableId) {
        if !self.resolved.contains(&wakeable) {
            self.resolved.push(wakeable);
        }
    }

    /// Returns the types begun (not bailed out), in order.
    #[must_use]
    pub fn began(&self) -> &[TypeTag] {
        &self.began
    }

    /// Returns the types that suspended, with what they waited on.
    #[must_use]
    pub fn suspended(&self) -> &[(TypeTag, WakeableId)] {
        &self.suspended
    }

    /// Returns the types that failed during render.
    #[must_use]
    pub fn failed(&self) -> &[TypeTag] {
        &self.failed
    }

    /// Returns the types unwound because a render was thrown away.
    #[must_use]
    pub fn interrupted(&self) -> &[TypeTag] {
        &self.interrupted
    }

    /// Forgets the render logs.
    pub fn clear_logs(&mut self) {
        self.began.clear();
        self.suspended.clear();
        self.failed.clear();
        self.interrupted.clear();
    }

    fn begin_root(&mut self, cx: &mut EvalContext<'_>, current: Option<UnitId>, unit: UnitId) -> Step {
        if self.tree.root_failures > 0 {
            if self.tree.root_failures != u32::MAX {
                self.tree.root_failures -= 1;
            }
            return Step::Fail(UnitError::new("root failed"));
        }
        let out = cx.process_update_queue(unit);
        self.root_state = cx.store().memoized_state(unit);
        self.root_changed = current.is_none() || out.changed || !out.captured.is_empty();
        let specs = if out.captured.is_empty() {
            self.tree.child_specs(None, false, self.root_state)
        } else {
            Vec::new()
        };
        cx.reconcile_children(unit, &specs)
            .map_or(Step::Done, Step::Continue)
    }
}

impl UnitEvaluator for ScriptedEvaluator {
    fn begin(&mut self, cx: &mut EvalContext<'_>, current: Option<UnitId>, unit: UnitId) -> Step {
        let tag = cx.store().type_tag(unit);
        if cx.store().kind(unit).root().is_some() {
            return self.begin_root(cx, current, unit);
        }
        let Some(id) = NodeId::from_tag(tag).filter(|id| (id.0 as usize) < self.tree.nodes.len())
        else {
            return Step::Fail(UnitError::new(format!("no node for {tag:?}")));
        };

        let capturing = cx.store().flags(unit).contains(EffectFlags::DID_CAPTURE);
        if current.is_some() && !capturing && !self.root_changed && !cx.has_scheduled_update() {
            return cx.bailout(unit).map_or(Step::Done, Step::Continue);
        }
        self.began.push(tag);

        let node = *self.tree.node(id);
        if let Some(wakeable) = node.suspends_on
            && !self.resolved.contains(&wakeable)
        {
            self.suspended.push((tag, wakeable));
            return Step::Suspend(wakeable);
        }
        if node.failures > 0 {
            if node.failures != u32::MAX {
                self.tree.node_mut(id).failures -= 1;
            }
            self.failed.push(tag);
            return Step::Fail(UnitError::new(format!("{} failed", node.name)));
        }

        // Error boundaries keep "showing fallback" in their state word.
        let was_errored = node.kind == NodeKind::ErrorBoundary && cx.store().memoized_state(unit) != 0;
        let out = cx.process_update_queue(unit);
        let mut flags = EffectFlags::NONE;
        if node.passive {
            flags |= EffectFlags::PASSIVE;
        }
        if node.layout || (node.kind == NodeKind::Host && current.is_some()) {
            flags |= EffectFlags::UPDATE;
        }
        cx.store_mut().insert_flags(unit, flags);
        if node.uses_cache {
            let next = &mut self.next_cache;
            cx.pooled_cache(|| {
                *next += 1;
                CacheHandle(*next)
            });
        }

        let show_fallback = match node.kind {
            NodeKind::Suspense => capturing,
            NodeKind::ErrorBoundary => {
                let errored = was_errored || !out.captured.is_empty();
                cx.store_mut().set_memoized_state(unit, i64::from(errored));
                errored
            }
            NodeKind::Host | NodeKind::Component => false,
        };
        let specs = self.tree.child_specs(Some(id), show_fallback, self.root_state);
        cx.reconcile_children(unit, &specs)
            .map_or(Step::Done, Step::Continue)
    }

    fn complete(
        &mut self,
        _cx: &mut EvalContext<'_>,
        _current: Option<UnitId>,
        _unit: UnitId,
    ) -> Step {
        Step::Done
    }

    fn unwind_interrupted(&mut self, store: &UnitStore, unit: UnitId) {
        self.interrupted.push(store.type_tag(unit));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tree() -> (Tree, NodeId, NodeId, NodeId) {
        let mut tree = Tree::new();
        let boundary = tree.add(None, "boundary", NodeKind::Suspense);
        let content = tree.add(Some(boundary), "content", NodeKind::Host);
        let spinner = tree.add_fallback(boundary, "spinner");
        (tree, boundary, content, spinner)
    }

    #[test]
    fn tags_round_trip_and_skip_the_root() {
        let (tree, boundary, ..) = make_tree();
        assert_eq!(NodeId::from_tag(boundary.tag()), Some(boundary));
        assert_eq!(NodeId::from_tag(TypeTag(0)), None, "tag 0 is the root");
        assert_eq!(tree.name_of(TypeTag(0)), "root");
        assert_eq!(tree.name_of(boundary.tag()), "boundary");
    }

    #[test]
    fn child_specs_split_primary_and_fallback() {
        let (tree, boundary, content, spinner) = make_tree();
        let primary = tree.child_specs(Some(boundary), false, 0);
        let fallback = tree.child_specs(Some(boundary), true, 0);
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].tag, content.tag());
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].tag, spinner.tag());
    }

    #[test]
    fn visibility_follows_root_state() {
        let (mut tree, boundary, content, _) = make_tree();
        tree.node_mut(content).visible_from = 1;
        tree.node_mut(content).visible_until = Some(3);
        assert!(tree.child_specs(Some(boundary), false, 0).is_empty(), "not yet");
        assert_eq!(tree.child_specs(Some(boundary), false, 2).len(), 1);
        assert!(tree.child_specs(Some(boundary), false, 3).is_empty(), "gone again");
    }

    #[test]
    fn find_by_name() {
        let (tree, _, content, _) = make_tree();
        assert_eq!(tree.find("content"), Some(content));
        assert_eq!(tree.find("missing"), None);
    }

    #[test]
    #[should_panic(expected = "fallback content needs a boundary")]
    fn fallback_requires_a_boundary() {
        let mut tree = Tree::new();
        let host = tree.add(None, "host", NodeKind::Host);
        tree.add_fallback(host, "spinner");
    }
}
