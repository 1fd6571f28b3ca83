// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Times are
//! scheduler milliseconds.

use std::io::Write;

use stratum_core::lane::Lanes;
use stratum_core::trace::{
    CommitStartEvent, CommitStopEvent, CommitSummary, PhaseBeginEvent, PhaseEndEvent, PhaseKind,
    PingEvent, RenderStartEvent, RenderStopEvent, RenderYieldEvent, TaskCancelledEvent,
    TaskScheduledEvent, TraceSink, UnitErroredEvent, UnitSuspendedEvent,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink").finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self { writer }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink and returns its writer.
    #[must_use]
    pub fn into_writer(self) -> W {
        self.writer
    }
}

fn phase_name(phase: PhaseKind) -> &'static str {
    match phase {
        PhaseKind::BeforeMutation => "before-mutation",
        PhaseKind::Mutation => "mutation",
        PhaseKind::Layout => "layout",
        PhaseKind::Passive => "passive",
    }
}

/// Formats a lane set as `{0,4}` by lane index.
fn lanes(lanes: Lanes) -> String {
    let indices: Vec<String> = lanes.iter().map(|l| l.index().to_string()).collect();
    format!("{{{}}}", indices.join(","))
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_render_start(&mut self, e: &RenderStartEvent) {
        let mode = if e.time_sliced { "sliced" } else { "sync" };
        let fresh = if e.fresh { " fresh" } else { "" };
        let _ = writeln!(
            self.writer,
            "[render:start] root={} lanes={} {mode}{fresh} at {}ms",
            e.root.index(),
            lanes(e.lanes),
            e.timestamp.millis(),
        );
    }

    fn on_render_yield(&mut self, e: &RenderYieldEvent) {
        let _ = writeln!(
            self.writer,
            "[render:yield] root={} lanes={} at {}ms",
            e.root.index(),
            lanes(e.lanes),
            e.timestamp.millis(),
        );
    }

    fn on_render_stop(&mut self, e: &RenderStopEvent) {
        let _ = writeln!(
            self.writer,
            "[render:stop] root={} lanes={} status={:?} at {}ms",
            e.root.index(),
            lanes(e.lanes),
            e.status,
            e.timestamp.millis(),
        );
    }

    fn on_commit_start(&mut self, e: &CommitStartEvent) {
        let _ = writeln!(
            self.writer,
            "[commit:start] root={} lanes={} at {}ms",
            e.root.index(),
            lanes(e.lanes),
            e.timestamp.millis(),
        );
    }

    fn on_commit_stop(&mut self, e: &CommitStopEvent) {
        let _ = writeln!(
            self.writer,
            "[commit:stop] root={} remaining={} at {}ms",
            e.root.index(),
            lanes(e.remaining),
            e.timestamp.millis(),
        );
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:begin] root={} {} at {}ms",
            e.root.index(),
            phase_name(e.phase),
            e.timestamp.millis(),
        );
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:end] root={} {} at {}ms",
            e.root.index(),
            phase_name(e.phase),
            e.timestamp.millis(),
        );
    }

    fn on_task_scheduled(&mut self, e: &TaskScheduledEvent) {
        let handle = e
            .handle
            .map_or_else(|| "sync-queue".to_owned(), |h| format!("task#{}", h.0));
        let _ = writeln!(
            self.writer,
            "[schedule] root={} lane={} priority={:?} {handle} at {}ms",
            e.root.index(),
            e.lane.index(),
            e.priority,
            e.timestamp.millis(),
        );
    }

    fn on_task_cancelled(&mut self, e: &TaskCancelledEvent) {
        let _ = writeln!(
            self.writer,
            "[cancel] root={} task#{} at {}ms",
            e.root.index(),
            e.handle.0,
            e.timestamp.millis(),
        );
    }

    fn on_ping(&mut self, e: &PingEvent) {
        let restarted = if e.restarted { " RESTARTED" } else { "" };
        let _ = writeln!(
            self.writer,
            "[ping] root={} lanes={}{restarted} at {}ms",
            e.root.index(),
            lanes(e.lanes),
            e.timestamp.millis(),
        );
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        let _ = writeln!(
            self.writer,
            "[summary] root={} lanes={} render={}ms before-mutation={}ms \
             mutation={}ms layout={}ms total={}ms units={} errors={}",
            s.root.index(),
            lanes(s.lanes),
            s.render.millis(),
            s.before_mutation.millis(),
            s.mutation.millis(),
            s.layout.millis(),
            s.total.millis(),
            s.mutated_units,
            s.recoverable_errors,
        );
    }

    fn on_unit_suspended(&mut self, e: &UnitSuspendedEvent) {
        let _ = writeln!(
            self.writer,
            "[suspend] unit={} wakeable={} lanes={}",
            e.unit.index(),
            e.wakeable.0,
            lanes(e.lanes),
        );
    }

    fn on_unit_errored(&mut self, e: &UnitErroredEvent) {
        let _ = writeln!(
            self.writer,
            "[error] unit={} lanes={}",
            e.unit.index(),
            lanes(e.lanes),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use stratum_core::lane::Lane;
    use stratum_core::reconciler::ExitStatus;
    use stratum_core::time::Timestamp;

    use super::*;
    use crate::tests::{make_root, record_suspend_and_retry};

    #[test]
    fn pretty_print_render_stop() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new());
        sink.on_render_stop(&RenderStopEvent {
            root: make_root(),
            lanes: Lane::DEFAULT | Lane::SYNC,
            status: ExitStatus::Completed,
            timestamp: Timestamp(12),
        });
        let output = String::from_utf8(sink.into_writer()).unwrap();
        assert_eq!(
            output, "[render:stop] root=0 lanes={0,4} status=Completed at 12ms\n",
            "one line per event"
        );
    }

    #[test]
    fn pretty_print_live_run() {
        let shared = Rc::new(RefCell::new(PrettyPrintSink::with_writer(Vec::<u8>::new())));
        record_suspend_and_retry(Box::new(shared.clone()));

        let output = String::from_utf8(shared.borrow().writer.clone()).unwrap();
        assert!(output.contains("[suspend]"), "got: {output}");
        assert!(output.contains("status=Suspended"), "got: {output}");
        assert_eq!(
            output.lines().filter(|l| l.starts_with("[summary]")).count(),
            2,
            "got: {output}"
        );
    }
}
