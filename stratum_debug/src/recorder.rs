// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].
//!
//! Roots and units are stored by their raw index, so decoded events carry
//! plain `u32` ids instead of handles.

use stratum_core::host::{SchedulerPriority, TaskHandle};
use stratum_core::lane::{Lane, Lanes};
use stratum_core::reconciler::ExitStatus;
use stratum_core::time::{Duration, Timestamp};
use stratum_core::trace::{
    CommitStartEvent, CommitStopEvent, CommitSummary, PhaseBeginEvent, PhaseEndEvent, PhaseKind,
    PingEvent, RenderStartEvent, RenderStopEvent, RenderYieldEvent, TaskCancelledEvent,
    TaskScheduledEvent, TraceSink, UnitErroredEvent, UnitSuspendedEvent,
};
use stratum_core::unit::WakeableId;

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_RENDER_START: u8 = 1;
const TAG_RENDER_YIELD: u8 = 2;
const TAG_RENDER_STOP: u8 = 3;
const TAG_COMMIT_START: u8 = 4;
const TAG_COMMIT_STOP: u8 = 5;
const TAG_PHASE_BEGIN: u8 = 6;
const TAG_PHASE_END: u8 = 7;
const TAG_TASK_SCHEDULED: u8 = 8;
const TAG_TASK_CANCELLED: u8 = 9;
const TAG_PING: u8 = 10;
const TAG_COMMIT_SUMMARY: u8 = 11;
const TAG_UNIT_SUSPENDED: u8 = 12;
const TAG_UNIT_ERRORED: u8 = 13;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_option_u64(&mut self, v: Option<u64>) {
        match v {
            Some(val) => {
                self.write_u8(1);
                self.write_u64(val);
            }
            None => {
                self.write_u8(0);
                self.write_u64(0);
            }
        }
    }

    fn write_lanes(&mut self, lanes: Lanes) {
        self.write_u32(lanes.bits());
    }

    fn write_time(&mut self, t: Timestamp) {
        self.write_u64(t.millis());
    }

    fn write_duration(&mut self, d: Duration) {
        self.write_u64(d.millis());
    }

    fn write_phase(&mut self, p: PhaseKind) {
        self.write_u8(match p {
            PhaseKind::BeforeMutation => 0,
            PhaseKind::Mutation => 1,
            PhaseKind::Layout => 2,
            PhaseKind::Passive => 3,
        });
    }

    fn write_status(&mut self, s: ExitStatus) {
        self.write_u8(match s {
            ExitStatus::InProgress => 0,
            ExitStatus::FatalErrored => 1,
            ExitStatus::Errored => 2,
            ExitStatus::Suspended => 3,
            ExitStatus::SuspendedWithDelay => 4,
            ExitStatus::Completed => 5,
            ExitStatus::DidNotComplete => 6,
        });
    }

    fn write_priority(&mut self, p: SchedulerPriority) {
        self.write_u8(match p {
            SchedulerPriority::Immediate => 0,
            SchedulerPriority::UserBlocking => 1,
            SchedulerPriority::Normal => 2,
            SchedulerPriority::Idle => 3,
        });
    }
}

impl TraceSink for RecorderSink {
    fn on_render_start(&mut self, e: &RenderStartEvent) {
        self.write_u8(TAG_RENDER_START);
        self.write_u32(e.root.index());
        self.write_lanes(e.lanes);
        self.write_bool(e.time_sliced);
        self.write_bool(e.fresh);
        self.write_time(e.timestamp);
    }

    fn on_render_yield(&mut self, e: &RenderYieldEvent) {
        self.write_u8(TAG_RENDER_YIELD);
        self.write_u32(e.root.index());
        self.write_lanes(e.lanes);
        self.write_time(e.timestamp);
    }

    fn on_render_stop(&mut self, e: &RenderStopEvent) {
        self.write_u8(TAG_RENDER_STOP);
        self.write_u32(e.root.index());
        self.write_lanes(e.lanes);
        self.write_status(e.status);
        self.write_time(e.timestamp);
    }

    fn on_commit_start(&mut self, e: &CommitStartEvent) {
        self.write_u8(TAG_COMMIT_START);
        self.write_u32(e.root.index());
        self.write_lanes(e.lanes);
        self.write_time(e.timestamp);
    }

    fn on_commit_stop(&mut self, e: &CommitStopEvent) {
        self.write_u8(TAG_COMMIT_STOP);
        self.write_u32(e.root.index());
        self.write_lanes(e.remaining);
        self.write_time(e.timestamp);
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.write_u8(TAG_PHASE_BEGIN);
        self.write_u32(e.root.index());
        self.write_phase(e.phase);
        self.write_time(e.timestamp);
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.write_u8(TAG_PHASE_END);
        self.write_u32(e.root.index());
        self.write_phase(e.phase);
        self.write_time(e.timestamp);
    }

    fn on_task_scheduled(&mut self, e: &TaskScheduledEvent) {
        self.write_u8(TAG_TASK_SCHEDULED);
        self.write_u32(e.root.index());
        self.write_u32(e.lane.bits());
        self.write_priority(e.priority);
        self.write_option_u64(e.handle.map(|h| h.0));
        self.write_time(e.timestamp);
    }

    fn on_task_cancelled(&mut self, e: &TaskCancelledEvent) {
        self.write_u8(TAG_TASK_CANCELLED);
        self.write_u32(e.root.index());
        self.write_u64(e.handle.0);
        self.write_time(e.timestamp);
    }

    fn on_ping(&mut self, e: &PingEvent) {
        self.write_u8(TAG_PING);
        self.write_u32(e.root.index());
        self.write_lanes(e.lanes);
        self.write_bool(e.restarted);
        self.write_time(e.timestamp);
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        self.write_u8(TAG_COMMIT_SUMMARY);
        self.write_u32(s.root.index());
        self.write_lanes(s.lanes);
        self.write_lanes(s.remaining);
        self.write_duration(s.render);
        self.write_duration(s.before_mutation);
        self.write_duration(s.mutation);
        self.write_duration(s.layout);
        self.write_duration(s.total);
        self.write_u32(s.mutated_units);
        self.write_u32(s.recoverable_errors);
    }

    fn on_unit_suspended(&mut self, e: &UnitSuspendedEvent) {
        self.write_u8(TAG_UNIT_SUSPENDED);
        self.write_u32(e.unit.index());
        self.write_u64(e.wakeable.0);
        self.write_lanes(e.lanes);
    }

    fn on_unit_errored(&mut self, e: &UnitErroredEvent) {
        self.write_u8(TAG_UNIT_ERRORED);
        self.write_u32(e.unit.index());
        self.write_lanes(e.lanes);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A commit summary read back from a recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordedSummary {
    /// Raw index of the committed root.
    pub root: u32,
    /// Lanes that were committed.
    pub lanes: Lanes,
    /// Lanes still pending afterwards.
    pub remaining: Lanes,
    /// Render time before the commit.
    pub render: Duration,
    /// Before-mutation pass duration.
    pub before_mutation: Duration,
    /// Mutation pass duration.
    pub mutation: Duration,
    /// Layout pass duration.
    pub layout: Duration,
    /// Whole commit duration.
    pub total: Duration,
    /// Units the mutation pass visited.
    pub mutated_units: u32,
    /// Recoverable errors reported after the commit.
    pub recoverable_errors: u32,
}

/// A decoded event from a binary recording.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedEvent {
    /// A [`RenderStartEvent`].
    RenderStart {
        /// Raw root index.
        root: u32,
        /// Lanes being rendered.
        lanes: Lanes,
        /// Whether the attempt may yield.
        time_sliced: bool,
        /// Whether the attempt started from a fresh stack.
        fresh: bool,
        /// Time at start.
        timestamp: Timestamp,
    },
    /// A [`RenderYieldEvent`].
    RenderYield {
        /// Raw root index.
        root: u32,
        /// Lanes being rendered.
        lanes: Lanes,
        /// Time of the yield.
        timestamp: Timestamp,
    },
    /// A [`RenderStopEvent`].
    RenderStop {
        /// Raw root index.
        root: u32,
        /// Lanes that were rendered.
        lanes: Lanes,
        /// How the attempt ended.
        status: ExitStatus,
        /// Time at stop.
        timestamp: Timestamp,
    },
    /// A [`CommitStartEvent`].
    CommitStart {
        /// Raw root index.
        root: u32,
        /// Lanes being committed.
        lanes: Lanes,
        /// Time at start.
        timestamp: Timestamp,
    },
    /// A [`CommitStopEvent`].
    CommitStop {
        /// Raw root index.
        root: u32,
        /// Lanes still pending.
        remaining: Lanes,
        /// Time at stop.
        timestamp: Timestamp,
    },
    /// A [`PhaseBeginEvent`].
    PhaseBegin {
        /// Raw root index.
        root: u32,
        /// Which pass started.
        phase: PhaseKind,
        /// Time at start.
        timestamp: Timestamp,
    },
    /// A [`PhaseEndEvent`].
    PhaseEnd {
        /// Raw root index.
        root: u32,
        /// Which pass ended.
        phase: PhaseKind,
        /// Time at end.
        timestamp: Timestamp,
    },
    /// A [`TaskScheduledEvent`].
    TaskScheduled {
        /// Raw root index.
        root: u32,
        /// Most urgent lane of the work.
        lane: Lane,
        /// Scheduler level used.
        priority: SchedulerPriority,
        /// Task handle; `None` for the synchronous queue.
        handle: Option<TaskHandle>,
        /// Time of scheduling.
        timestamp: Timestamp,
    },
    /// A [`TaskCancelledEvent`].
    TaskCancelled {
        /// Raw root index.
        root: u32,
        /// The cancelled task.
        handle: TaskHandle,
        /// Time of cancellation.
        timestamp: Timestamp,
    },
    /// A [`PingEvent`].
    Ping {
        /// Raw root index.
        root: u32,
        /// Lanes that may now succeed.
        lanes: Lanes,
        /// Whether the render in progress restarted.
        restarted: bool,
        /// Time of the ping.
        timestamp: Timestamp,
    },
    /// A [`CommitSummary`].
    CommitSummary(RecordedSummary),
    /// A [`UnitSuspendedEvent`].
    UnitSuspended {
        /// Raw unit index.
        unit: u32,
        /// What it waits on.
        wakeable: WakeableId,
        /// Lanes being rendered.
        lanes: Lanes,
    },
    /// A [`UnitErroredEvent`].
    UnitErrored {
        /// Raw unit index.
        unit: u32,
        /// Lanes being rendered.
        lanes: Lanes,
    },
}

impl RecordedEvent {
    /// Returns the time the event happened, if it carries one.
    #[must_use]
    pub fn timestamp(&self) -> Option<Timestamp> {
        match *self {
            Self::RenderStart { timestamp, .. }
            | Self::RenderYield { timestamp, .. }
            | Self::RenderStop { timestamp, .. }
            | Self::CommitStart { timestamp, .. }
            | Self::CommitStop { timestamp, .. }
            | Self::PhaseBegin { timestamp, .. }
            | Self::PhaseEnd { timestamp, .. }
            | Self::TaskScheduled { timestamp, .. }
            | Self::TaskCancelled { timestamp, .. }
            | Self::Ping { timestamp, .. } => Some(timestamp),
            Self::CommitSummary(_) | Self::UnitSuspended { .. } | Self::UnitErrored { .. } => None,
        }
    }
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Some(v)
    }

    fn read_u32(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let v = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().ok()?);
        self.pos += 4;
        Some(v)
    }

    fn read_u64(&mut self) -> Option<u64> {
        if self.remaining() < 8 {
            return None;
        }
        let v = u64::from_le_bytes(self.data[self.pos..self.pos + 8].try_into().ok()?);
        self.pos += 8;
        Some(v)
    }

    fn read_bool(&mut self) -> Option<bool> {
        Some(self.read_u8()? != 0)
    }

    fn read_option_u64(&mut self) -> Option<Option<u64>> {
        let present = self.read_u8()?;
        let val = self.read_u64()?;
        Some(if present != 0 { Some(val) } else { None })
    }

    fn read_lanes(&mut self) -> Option<Lanes> {
        Some(Lanes::from_bits(self.read_u32()?))
    }

    fn read_lane(&mut self) -> Option<Lane> {
        Some(self.read_lanes()?.highest_priority())
    }

    fn read_time(&mut self) -> Option<Timestamp> {
        Some(Timestamp(self.read_u64()?))
    }

    fn read_duration(&mut self) -> Option<Duration> {
        Some(Duration(self.read_u64()?))
    }

    fn read_phase(&mut self) -> Option<PhaseKind> {
        Some(match self.read_u8()? {
            0 => PhaseKind::BeforeMutation,
            1 => PhaseKind::Mutation,
            2 => PhaseKind::Layout,
            3 => PhaseKind::Passive,
            _ => return None,
        })
    }

    fn read_status(&mut self) -> Option<ExitStatus> {
        Some(match self.read_u8()? {
            0 => ExitStatus::InProgress,
            1 => ExitStatus::FatalErrored,
            2 => ExitStatus::Errored,
            3 => ExitStatus::Suspended,
            4 => ExitStatus::SuspendedWithDelay,
            5 => ExitStatus::Completed,
            6 => ExitStatus::DidNotComplete,
            _ => return None,
        })
    }

    fn read_priority(&mut self) -> Option<SchedulerPriority> {
        Some(match self.read_u8()? {
            0 => SchedulerPriority::Immediate,
            1 => SchedulerPriority::UserBlocking,
            2 => SchedulerPriority::Normal,
            3 => SchedulerPriority::Idle,
            _ => return None,
        })
    }

    fn decode_render_start(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::RenderStart {
            root: self.read_u32()?,
            lanes: self.read_lanes()?,
            time_sliced: self.read_bool()?,
            fresh: self.read_bool()?,
            timestamp: self.read_time()?,
        })
    }

    fn decode_render_yield(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::RenderYield {
            root: self.read_u32()?,
            lanes: self.read_lanes()?,
            timestamp: self.read_time()?,
        })
    }

    fn decode_render_stop(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::RenderStop {
            root: self.read_u32()?,
            lanes: self.read_lanes()?,
            status: self.read_status()?,
            timestamp: self.read_time()?,
        })
    }

    fn decode_commit_start(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::CommitStart {
            root: self.read_u32()?,
            lanes: self.read_lanes()?,
            timestamp: self.read_time()?,
        })
    }

    fn decode_commit_stop(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::CommitStop {
            root: self.read_u32()?,
            remaining: self.read_lanes()?,
            timestamp: self.read_time()?,
        })
    }

    fn decode_phase(&mut self, begin: bool) -> Option<RecordedEvent> {
        let root = self.read_u32()?;
        let phase = self.read_phase()?;
        let timestamp = self.read_time()?;
        Some(if begin {
            RecordedEvent::PhaseBegin {
                root,
                phase,
                timestamp,
            }
        } else {
            RecordedEvent::PhaseEnd {
                root,
                phase,
                timestamp,
            }
        })
    }

    fn decode_task_scheduled(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::TaskScheduled {
            root: self.read_u32()?,
            lane: self.read_lane()?,
            priority: self.read_priority()?,
            handle: self.read_option_u64()?.map(TaskHandle),
            timestamp: self.read_time()?,
        })
    }

    fn decode_task_cancelled(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::TaskCancelled {
            root: self.read_u32()?,
            handle: TaskHandle(self.read_u64()?),
            timestamp: self.read_time()?,
        })
    }

    fn decode_ping(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Ping {
            root: self.read_u32()?,
            lanes: self.read_lanes()?,
            restarted: self.read_bool()?,
            timestamp: self.read_time()?,
        })
    }

    fn decode_commit_summary(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::CommitSummary(RecordedSummary {
            root: self.read_u32()?,
            lanes: self.read_lanes()?,
            remaining: self.read_lanes()?,
            render: self.read_duration()?,
            before_mutation: self.read_duration()?,
            mutation: self.read_duration()?,
            layout: self.read_duration()?,
            total: self.read_duration()?,
            mutated_units: self.read_u32()?,
            recoverable_errors: self.read_u32()?,
        }))
    }

    fn decode_unit_suspended(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::UnitSuspended {
            unit: self.read_u32()?,
            wakeable: WakeableId(self.read_u64()?),
            lanes: self.read_lanes()?,
        })
    }

    fn decode_unit_errored(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::UnitErrored {
            unit: self.read_u32()?,
            lanes: self.read_lanes()?,
        })
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        match tag {
            TAG_RENDER_START => self.decode_render_start(),
            TAG_RENDER_YIELD => self.decode_render_yield(),
            TAG_RENDER_STOP => self.decode_render_stop(),
            TAG_COMMIT_START => self.decode_commit_start(),
            TAG_COMMIT_STOP => self.decode_commit_stop(),
            TAG_PHASE_BEGIN => self.decode_phase(true),
            TAG_PHASE_END => self.decode_phase(false),
            TAG_TASK_SCHEDULED => self.decode_task_scheduled(),
            TAG_TASK_CANCELLED => self.decode_task_cancelled(),
            TAG_PING => self.decode_ping(),
            TAG_COMMIT_SUMMARY => self.decode_commit_summary(),
            TAG_UNIT_SUSPENDED => self.decode_unit_suspended(),
            TAG_UNIT_ERRORED => self.decode_unit_errored(),
            _ => None, // unknown tag, stop
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::tests::{make_root, record_suspend_and_retry};

    #[test]
    fn round_trip_render_events() {
        let root = make_root();
        let mut rec = RecorderSink::new();
        rec.on_render_start(&RenderStartEvent {
            root,
            lanes: Lane::TRANSITION_1.into(),
            time_sliced: true,
            fresh: true,
            timestamp: Timestamp(10),
        });
        rec.on_render_stop(&RenderStopEvent {
            root,
            lanes: Lane::TRANSITION_1.into(),
            status: ExitStatus::SuspendedWithDelay,
            timestamp: Timestamp(14),
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(
            events,
            [
                RecordedEvent::RenderStart {
                    root: root.index(),
                    lanes: Lane::TRANSITION_1.into(),
                    time_sliced: true,
                    fresh: true,
                    timestamp: Timestamp(10),
                },
                RecordedEvent::RenderStop {
                    root: root.index(),
                    lanes: Lane::TRANSITION_1.into(),
                    status: ExitStatus::SuspendedWithDelay,
                    timestamp: Timestamp(14),
                },
            ],
            "fields survive encoding"
        );
    }

    #[test]
    fn sync_queue_task_has_no_handle() {
        let root = make_root();
        let mut rec = RecorderSink::new();
        rec.on_task_scheduled(&TaskScheduledEvent {
            root,
            lane: Lane::SYNC,
            priority: SchedulerPriority::Immediate,
            handle: None,
            timestamp: Timestamp(3),
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        let [
            RecordedEvent::TaskScheduled {
                lane,
                priority,
                handle,
                ..
            },
        ] = events.as_slice()
        else {
            panic!("expected one TaskScheduled, got {events:?}");
        };
        assert_eq!(*lane, Lane::SYNC);
        assert_eq!(*priority, SchedulerPriority::Immediate);
        assert_eq!(*handle, None);
    }

    #[test]
    fn records_a_live_suspend_and_retry() {
        let shared = Rc::new(RefCell::new(RecorderSink::new()));
        record_suspend_and_retry(Box::new(shared.clone()));

        let events: Vec<_> = decode(shared.borrow().as_bytes()).collect();
        let summaries = events
            .iter()
            .filter(|e| matches!(e, RecordedEvent::CommitSummary(_)))
            .count();
        assert_eq!(summaries, 2, "fallback commit and retry commit");
        assert!(
            events.iter().any(|e| matches!(
                e,
                RecordedEvent::UnitSuspended {
                    wakeable: WakeableId(1),
                    ..
                }
            )),
            "suspension recorded"
        );
        assert!(
            events.iter().any(|e| matches!(
                e,
                RecordedEvent::RenderStop {
                    status: ExitStatus::Suspended,
                    ..
                }
            )),
            "suspended render recorded"
        );
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        let events: Vec<_> = decode(&[]).collect();
        assert!(events.is_empty(), "no bytes, no events");
    }

    #[test]
    fn truncated_record_stops_decoding() {
        let root = make_root();
        let mut rec = RecorderSink::new();
        rec.on_ping(&PingEvent {
            root,
            lanes: Lane::RETRY_1.into(),
            restarted: false,
            timestamp: Timestamp(9),
        });
        let bytes = rec.into_bytes();
        let events: Vec<_> = decode(&bytes[..bytes.len() - 1]).collect();
        assert!(events.is_empty(), "partial record is dropped");
    }
}
