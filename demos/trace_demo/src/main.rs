// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scripted suspend/retry run that exercises the tracing and diagnostics
//! pipeline.
//!
//! Renders a page whose two sections wait on data, resolves the data over
//! virtual time, and records events to both a
//! [`PrettyPrintSink`](stratum_debug::pretty::PrettyPrintSink) and a
//! [`RecorderSink`](stratum_debug::recorder::RecorderSink), then exports a
//! Chrome trace JSON file.

use std::cell::RefCell;
use std::fs::File;
use std::io::BufWriter;
use std::rc::Rc;

use stratum_core::config::ReconcilerConfig;
use stratum_core::time::Duration;
use stratum_core::trace::{
    CommitStartEvent, CommitStopEvent, CommitSummary, PhaseBeginEvent, PhaseEndEvent, PingEvent,
    RenderStartEvent, RenderStopEvent, RenderYieldEvent, TaskCancelledEvent, TaskScheduledEvent,
    TraceSink, UnitErroredEvent, UnitSuspendedEvent,
};
use stratum_core::unit::{Transition, UnitMode, UpdateAction, WakeableId};
use stratum_harness::{Harness, NodeKind, Tree, YieldPolicy};

use stratum_debug::chrome;
use stratum_debug::pretty::PrettyPrintSink;
use stratum_debug::recorder::{RecordedEvent, RecorderSink, decode};

const HEADER_DATA: WakeableId = WakeableId(1);
const FEED_DATA: WakeableId = WakeableId(2);
const OUTPUT_PATH: &str = "trace_demo.json";

/// Sends every event to two sinks.
struct Tee<A, B>(A, B);

impl<A: TraceSink, B: TraceSink> TraceSink for Tee<A, B> {
    fn on_render_start(&mut self, e: &RenderStartEvent) {
        self.0.on_render_start(e);
        self.1.on_render_start(e);
    }

    fn on_render_yield(&mut self, e: &RenderYieldEvent) {
        self.0.on_render_yield(e);
        self.1.on_render_yield(e);
    }

    fn on_render_stop(&mut self, e: &RenderStopEvent) {
        self.0.on_render_stop(e);
        self.1.on_render_stop(e);
    }

    fn on_commit_start(&mut self, e: &CommitStartEvent) {
        self.0.on_commit_start(e);
        self.1.on_commit_start(e);
    }

    fn on_commit_stop(&mut self, e: &CommitStopEvent) {
        self.0.on_commit_stop(e);
        self.1.on_commit_stop(e);
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.0.on_phase_begin(e);
        self.1.on_phase_begin(e);
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.0.on_phase_end(e);
        self.1.on_phase_end(e);
    }

    fn on_task_scheduled(&mut self, e: &TaskScheduledEvent) {
        self.0.on_task_scheduled(e);
        self.1.on_task_scheduled(e);
    }

    fn on_task_cancelled(&mut self, e: &TaskCancelledEvent) {
        self.0.on_task_cancelled(e);
        self.1.on_task_cancelled(e);
    }

    fn on_ping(&mut self, e: &PingEvent) {
        self.0.on_ping(e);
        self.1.on_ping(e);
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        self.0.on_commit_summary(s);
        self.1.on_commit_summary(s);
    }

    fn on_unit_suspended(&mut self, e: &UnitSuspendedEvent) {
        self.0.on_unit_suspended(e);
        self.1.on_unit_suspended(e);
    }

    fn on_unit_errored(&mut self, e: &UnitErroredEvent) {
        self.0.on_unit_errored(e);
        self.1.on_unit_errored(e);
    }
}

/// `page` boundary around a `header` that waits on [`HEADER_DATA`] and a
/// nested `feed` boundary whose `posts` wait on [`FEED_DATA`].
fn build_tree() -> Tree {
    let mut tree = Tree::new();
    let page = tree.add(None, "page", NodeKind::Suspense);
    let header = tree.add(Some(page), "header", NodeKind::Host);
    tree.node_mut(header).suspends_on = Some(HEADER_DATA);
    let feed = tree.add(Some(page), "feed", NodeKind::Suspense);
    let posts = tree.add(Some(feed), "posts", NodeKind::Component);
    tree.node_mut(posts).suspends_on = Some(FEED_DATA);
    tree.node_mut(posts).passive = true;
    for name in ["post_a", "post_b", "post_c"] {
        tree.add(Some(posts), name, NodeKind::Host);
    }
    tree.add_fallback(page, "page_skeleton");
    tree.add_fallback(feed, "feed_spinner");
    tree
}

fn main() {
    // -- sinks -------------------------------------------------------------
    let pretty = PrettyPrintSink::new(Box::new(std::io::stdout()));
    let recorder = Rc::new(RefCell::new(RecorderSink::new()));

    // -- reconciler --------------------------------------------------------
    let mut harness = Harness::new(ReconcilerConfig::new(), build_tree());
    harness
        .reconciler_mut()
        .set_trace_sink(Box::new(Tee(pretty, recorder.clone())));
    harness.scheduler_mut().set_unit_cost(Duration(2));
    let root = harness.create_root(UnitMode::CONCURRENT);

    // -- script ------------------------------------------------------------
    println!("== mount");
    harness
        .update_root(root, UpdateAction::Replace(1))
        .expect("mount");
    harness.run_until_idle().expect("mount render");
    println!("   committed: {:?}", harness.committed(root));

    println!("== header data arrives at 200ms");
    harness.advance(Duration(200)).expect("advance");
    harness.resolve(HEADER_DATA).expect("resolve header");
    harness.run_all().expect("header retry");
    println!("   committed: {:?}", harness.committed(root));

    println!("== feed data arrives at 900ms");
    harness.advance(Duration(700)).expect("advance");
    harness.resolve(FEED_DATA).expect("resolve feed");
    harness.run_all().expect("feed retry");
    println!("   committed: {:?}", harness.committed(root));

    println!("== time-sliced transition");
    harness
        .scheduler_mut()
        .set_yield_policy(YieldPolicy::EveryUnits(2));
    harness
        .transition(Transition::named(1, "refresh"), root, UpdateAction::Add(1))
        .expect("transition");
    harness.run_until_idle().expect("transition render");
    println!("   state: {}", harness.root_state(root));

    // -- report ------------------------------------------------------------
    harness.reconciler_mut().take_trace_sink();
    let bytes = recorder.borrow().as_bytes().to_vec();
    let events: Vec<RecordedEvent> = decode(&bytes).collect();
    let commits = events
        .iter()
        .filter(|e| matches!(e, RecordedEvent::CommitSummary(_)))
        .count();
    let yields = events
        .iter()
        .filter(|e| matches!(e, RecordedEvent::RenderYield { .. }))
        .count();
    println!(
        "\nRecorded {} bytes, {} events, {commits} commits, {yields} yields.",
        bytes.len(),
        events.len(),
    );

    let file = File::create(OUTPUT_PATH).expect("failed to create trace file");
    let mut writer = BufWriter::new(file);
    chrome::export(&bytes, &mut writer).expect("failed to write Chrome trace");
    println!("Chrome trace written to {OUTPUT_PATH}");
}
