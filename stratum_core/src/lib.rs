// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interruptible, priority-laned tree reconciliation.
//!
//! `stratum_core` renders trees of units in the background, in priority
//! order, and applies the results to a host in a fixed sequence of commit
//! passes. It is `no_std` compatible (with `alloc`), keeps all units in a
//! struct-of-arrays arena addressed by index handles, and has no global
//! state: everything lives in a [`Reconciler`](reconciler::Reconciler).
//!
//! # Architecture
//!
//! ```text
//!   enqueue_update ──► lanes ──► RootState::next_lanes
//!                                      │
//!             CooperativeScheduler ◄───┘ (task or sync queue)
//!                     │
//!                     ▼
//!   work loop: begin ─► complete / unwind ──► ExitStatus
//!                                                 │
//!                     commit now, later, or never ┘
//!                     │
//!                     ▼
//!   HostConfig: before mutation ─► mutation ─► layout ─► passive
//! ```
//!
//! **[`lane`]**: 31-bit priority lanes, lane sets, and event priorities.
//!
//! **[`unit`]**: The unit arena. Each unit has a committed slot and an
//! in-progress slot; children are reconciled by key and type.
//!
//! **[`root`]**: Per-root lane bookkeeping: pending, suspended, pinged and
//! expired lanes, entanglement, event times, and the ping cache.
//!
//! **[`reconciler`]**: The root scheduler, work loop, suspense controller,
//! commit pipeline, and error recovery.
//!
//! **[`host`]**: The three collaborator traits: [`CooperativeScheduler`],
//! [`HostConfig`], and [`UnitEvaluator`].
//!
//! **[`config`]**: Limits and timeouts.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! render and commit instrumentation, with a zero-overhead
//! [`Tracer`](trace::Tracer) wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Gates per-unit
//!   suspended and errored events.
//!
//! [`CooperativeScheduler`]: host::CooperativeScheduler
//! [`HostConfig`]: host::HostConfig
//! [`UnitEvaluator`]: host::UnitEvaluator

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod config;
pub mod error;
pub mod host;
pub mod lane;
pub mod reconciler;
pub mod root;
pub mod time;
pub mod trace;
pub mod unit;
