// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Unit tree data model.
//!
//! A *unit* is a node in the tree a root renders. Each unit has:
//!
//! - Identity: a slot handle ([`UnitId`]) and a [`UnitKey`] shared by the
//!   committed and in-progress slots of the same unit.
//! - Topology: parent, first-child, and sibling links forming an ordered tree.
//! - **Pending work**: [`lanes`](UnitStore::lanes) for updates on the unit and
//!   [`child_lanes`](UnitStore::child_lanes) for updates somewhere below it.
//! - **Effects**: [`flags`](UnitStore::flags) set during render and
//!   [`subtree_flags`](UnitStore::subtree_flags) bubbled up on completion so
//!   commit passes can skip quiet subtrees.
//! - **State**: a single state word advanced by lane-tagged
//!   [`Update`]s, plus captured errors and suspense dependencies.
//!
//! Units are stored in struct-of-arrays layout with index-based handles.
//!
//! # Double buffering
//!
//! A render never writes to the committed tree. It works on in-progress
//! slots created by [`create_work_in_progress`](UnitStore::create_work_in_progress),
//! and a commit makes the finished in-progress root the new committed root.
//! The old committed slots become the in-progress slots of the next render.

mod flags;
mod id;
mod kind;
mod reconcile;
mod store;
mod traverse;
mod update;

pub use flags::{EffectFlags, EffectPhase};
pub use id::{ChildKey, INVALID, RootId, TypeTag, UnitId, UnitKey, WakeableId};
pub use kind::{UnitKind, UnitMode};
pub use reconcile::ChildSpec;
pub use store::UnitStore;
pub use traverse::Children;
pub use update::{ProcessedUpdates, Transition, Update, UpdateAction};

pub(crate) use traverse::{deleted_subtree, effect_order};
