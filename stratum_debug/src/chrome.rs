// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! Each root is a process. Renders, commits, passive flushes, and scheduler
//! activity each get their own thread row.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use stratum_core::lane::Lanes;
use stratum_core::time::Timestamp;
use stratum_core::trace::PhaseKind;

use crate::recorder::{RecordedEvent, decode};

const TID_RENDER: u32 = 0;
const TID_COMMIT: u32 = 1;
const TID_PASSIVE: u32 = 2;
const TID_SCHEDULER: u32 = 3;

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Events without a timestamp of their own (per-unit events and summaries)
/// are placed at the last timestamp seen before them.
pub fn export(bytes: &[u8], writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();
    let mut last = Timestamp::ZERO;

    for recorded in decode(bytes) {
        if let Some(t) = recorded.timestamp() {
            last = t;
        }
        let event = match recorded {
            RecordedEvent::RenderStart {
                root,
                lanes,
                time_sliced,
                fresh,
                timestamp,
            } => json!({
                "ph": "B",
                "name": "Render",
                "cat": "Render",
                "ts": to_us(timestamp),
                "pid": root,
                "tid": TID_RENDER,
                "args": {
                    "lanes": lane_list(lanes),
                    "time_sliced": time_sliced,
                    "fresh": fresh,
                }
            }),
            RecordedEvent::RenderYield {
                root, timestamp, ..
            } => json!({
                "ph": "E",
                "name": "Render",
                "cat": "Render",
                "ts": to_us(timestamp),
                "pid": root,
                "tid": TID_RENDER,
                "args": { "yielded": true }
            }),
            RecordedEvent::RenderStop {
                root,
                status,
                timestamp,
                ..
            } => json!({
                "ph": "E",
                "name": "Render",
                "cat": "Render",
                "ts": to_us(timestamp),
                "pid": root,
                "tid": TID_RENDER,
                "args": { "status": format!("{status:?}") }
            }),
            RecordedEvent::CommitStart {
                root,
                lanes,
                timestamp,
            } => json!({
                "ph": "B",
                "name": "Commit",
                "cat": "Commit",
                "ts": to_us(timestamp),
                "pid": root,
                "tid": TID_COMMIT,
                "args": { "lanes": lane_list(lanes) }
            }),
            RecordedEvent::CommitStop {
                root,
                remaining,
                timestamp,
            } => json!({
                "ph": "E",
                "name": "Commit",
                "cat": "Commit",
                "ts": to_us(timestamp),
                "pid": root,
                "tid": TID_COMMIT,
                "args": { "remaining": lane_list(remaining) }
            }),
            RecordedEvent::PhaseBegin {
                root,
                phase,
                timestamp,
            } => json!({
                "ph": "B",
                "name": format!("{phase:?}"),
                "cat": "Commit",
                "ts": to_us(timestamp),
                "pid": root,
                "tid": phase_tid(phase),
            }),
            RecordedEvent::PhaseEnd {
                root,
                phase,
                timestamp,
            } => json!({
                "ph": "E",
                "name": format!("{phase:?}"),
                "cat": "Commit",
                "ts": to_us(timestamp),
                "pid": root,
                "tid": phase_tid(phase),
            }),
            RecordedEvent::TaskScheduled {
                root,
                lane,
                priority,
                handle,
                timestamp,
            } => json!({
                "ph": "i",
                "name": "TaskScheduled",
                "cat": "Scheduler",
                "ts": to_us(timestamp),
                "pid": root,
                "tid": TID_SCHEDULER,
                "s": "t",
                "args": {
                    "lane": lane.index(),
                    "priority": format!("{priority:?}"),
                    "task": handle.map(|h| h.0),
                }
            }),
            RecordedEvent::TaskCancelled {
                root,
                handle,
                timestamp,
            } => json!({
                "ph": "i",
                "name": "TaskCancelled",
                "cat": "Scheduler",
                "ts": to_us(timestamp),
                "pid": root,
                "tid": TID_SCHEDULER,
                "s": "t",
                "args": { "task": handle.0 }
            }),
            RecordedEvent::Ping {
                root,
                lanes,
                restarted,
                timestamp,
            } => json!({
                "ph": "i",
                "name": "Ping",
                "cat": "Suspense",
                "ts": to_us(timestamp),
                "pid": root,
                "tid": TID_SCHEDULER,
                "s": "p",
                "args": {
                    "lanes": lane_list(lanes),
                    "restarted": restarted,
                }
            }),
            RecordedEvent::CommitSummary(s) => json!({
                "ph": "i",
                "name": "CommitSummary",
                "cat": "Summary",
                "ts": to_us(last),
                "pid": s.root,
                "tid": TID_COMMIT,
                "s": "p",
                "args": {
                    "lanes": lane_list(s.lanes),
                    "remaining": lane_list(s.remaining),
                    "render_ms": s.render.millis(),
                    "before_mutation_ms": s.before_mutation.millis(),
                    "mutation_ms": s.mutation.millis(),
                    "layout_ms": s.layout.millis(),
                    "total_ms": s.total.millis(),
                    "mutated_units": s.mutated_units,
                    "recoverable_errors": s.recoverable_errors,
                }
            }),
            RecordedEvent::UnitSuspended {
                unit,
                wakeable,
                lanes,
            } => json!({
                "ph": "i",
                "name": "UnitSuspended",
                "cat": "Rich",
                "ts": to_us(last),
                "pid": 0,
                "tid": TID_RENDER,
                "s": "t",
                "args": {
                    "unit": unit,
                    "wakeable": wakeable.0,
                    "lanes": lane_list(lanes),
                }
            }),
            RecordedEvent::UnitErrored { unit, lanes } => json!({
                "ph": "i",
                "name": "UnitErrored",
                "cat": "Rich",
                "ts": to_us(last),
                "pid": 0,
                "tid": TID_RENDER,
                "s": "t",
                "args": {
                    "unit": unit,
                    "lanes": lane_list(lanes),
                }
            }),
        };
        events.push(event);
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn to_us(t: Timestamp) -> u64 {
    t.millis().saturating_mul(1000)
}

fn phase_tid(phase: PhaseKind) -> u32 {
    match phase {
        PhaseKind::Passive => TID_PASSIVE,
        PhaseKind::BeforeMutation | PhaseKind::Mutation | PhaseKind::Layout => TID_COMMIT,
    }
}

fn lane_list(lanes: Lanes) -> Vec<usize> {
    lanes.iter().map(|l| l.index()).collect()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use stratum_core::lane::Lane;
    use stratum_core::trace::{PhaseBeginEvent, PhaseEndEvent, PingEvent, TraceSink};

    use super::*;
    use crate::recorder::RecorderSink;
    use crate::tests::{make_root, record_suspend_and_retry};

    #[test]
    fn export_produces_valid_json() {
        let root = make_root();
        let mut rec = RecorderSink::new();
        rec.on_phase_begin(&PhaseBeginEvent {
            root,
            phase: PhaseKind::Mutation,
            timestamp: Timestamp(2),
        });
        rec.on_phase_end(&PhaseEndEvent {
            root,
            phase: PhaseKind::Mutation,
            timestamp: Timestamp(3),
        });
        rec.on_ping(&PingEvent {
            root,
            lanes: Lane::RETRY_1.into(),
            restarted: true,
            timestamp: Timestamp(5),
        });

        let mut out = Vec::new();
        export(rec.as_bytes(), &mut out).unwrap();
        let parsed: Vec<Value> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed.len(), 3);

        assert_eq!(parsed[0]["ph"], "B");
        assert_eq!(parsed[0]["name"], "Mutation");
        assert_eq!(parsed[0]["ts"], 2000, "milliseconds become microseconds");
        assert_eq!(parsed[1]["ph"], "E");
        assert_eq!(parsed[2]["name"], "Ping");
        assert_eq!(parsed[2]["args"]["restarted"], true);
        assert_eq!(parsed[2]["args"]["lanes"], json!([Lane::RETRY_1.index()]));
    }

    #[test]
    fn render_and_commit_spans_balance() {
        let shared = Rc::new(RefCell::new(RecorderSink::new()));
        record_suspend_and_retry(Box::new(shared.clone()));

        let mut out = Vec::new();
        export(shared.borrow().as_bytes(), &mut out).unwrap();
        let parsed: Vec<Value> = serde_json::from_slice(&out).unwrap();
        for name in ["Render", "Commit"] {
            let count = |ph: &str| {
                parsed
                    .iter()
                    .filter(|e| e["name"] == name && e["ph"] == ph)
                    .count()
            };
            assert!(count("B") > 0, "{name} spans present");
            assert_eq!(count("B"), count("E"), "{name} spans balance");
        }
    }

    #[test]
    fn export_empty_recording() {
        let mut out = Vec::new();
        export(&[], &mut out).unwrap();
        let parsed: Vec<Value> = serde_json::from_slice(&out).unwrap();
        assert!(parsed.is_empty(), "no events, empty array");
    }
}
