// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording, pretty-printing, and Chrome trace export for stratum
//! diagnostics.
//!
//! This crate provides [`TraceSink`](stratum_core::trace::TraceSink)
//! implementations for development and post-mortem analysis:
//!
//! - [`pretty::PrettyPrintSink`]: human-readable one-line-per-event output.
//! - [`recorder::RecorderSink`]: compact binary recording with
//!   [`recorder::decode`] for playback.
//! - [`chrome::export`]: writes Chrome Trace Event Format JSON from recorded
//!   bytes.
//!
//! Attach a sink with
//! [`Reconciler::set_trace_sink`](stratum_core::reconciler::Reconciler::set_trace_sink).
//! Wrapping it in `Rc<RefCell<_>>` keeps a handle for reading it afterwards.

pub mod chrome;
pub mod pretty;
pub mod recorder;
