// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A cooperative scheduler with a manual clock.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use stratum_core::host::{CooperativeScheduler, Microtask, SchedulerPriority, Task, TaskHandle};
use stratum_core::time::{Duration, Timestamp};

/// When [`VirtualScheduler::should_yield`] answers `true`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum YieldPolicy {
    /// Never yield; every time-sliced render runs to completion.
    #[default]
    Never,
    /// Yield after this many units per task run.
    EveryUnits(u32),
    /// Yield before the first unit of every task run.
    Always,
}

/// Something the scheduler was asked to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A task was queued.
    Scheduled {
        /// Handle returned to the reconciler.
        handle: TaskHandle,
        /// Queue priority.
        priority: SchedulerPriority,
        /// The task.
        task: Task,
    },
    /// A queued task was cancelled.
    Cancelled(TaskHandle),
    /// A microtask was queued.
    Microtask(Microtask),
    /// The reconciler asked for a paint.
    Paint,
}

/// A task taken off the queue by [`VirtualScheduler::pop_task`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueuedTask {
    /// Handle the task was scheduled under.
    pub handle: TaskHandle,
    /// Queue priority.
    pub priority: SchedulerPriority,
    /// The task.
    pub task: Task,
    /// When the task was first queued.
    pub queued_at: Timestamp,
    seq: u64,
}

impl QueuedTask {
    /// Returns `true` if the task waited longer than its priority allows.
    ///
    /// Idle tasks never time out.
    #[must_use]
    pub fn timed_out(&self, now: Timestamp) -> bool {
        let limit = match self.priority {
            SchedulerPriority::Immediate => Some(Duration::ZERO),
            SchedulerPriority::UserBlocking => Some(Duration(250)),
            SchedulerPriority::Normal => Some(Duration(5000)),
            SchedulerPriority::Idle => None,
        };
        limit.is_some_and(|limit| now.saturating_duration_since(self.queued_at) > limit)
    }
}

/// Deterministic [`CooperativeScheduler`].
///
/// Tasks run in priority order, then in the order they were queued. The clock
/// only moves when told to: [`advance`](Self::advance) moves it explicitly,
/// and each unit a time-sliced render performs costs
/// [`unit_cost`](Self::set_unit_cost).
#[derive(Debug, Default)]
pub struct VirtualScheduler {
    now: Timestamp,
    next_handle: u64,
    next_seq: u64,
    queue: BTreeMap<(SchedulerPriority, u64), QueuedTask>,
    microtasks: VecDeque<Microtask>,
    policy: YieldPolicy,
    units_this_slice: u32,
    unit_cost: Duration,
    log: Vec<SchedulerEvent>,
}

impl VirtualScheduler {
    /// Creates a scheduler at time zero that never yields.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets when time-sliced renders yield.
    pub fn set_yield_policy(&mut self, policy: YieldPolicy) {
        self.policy = policy;
    }

    /// Sets how far the clock moves per unit of time-sliced work.
    pub fn set_unit_cost(&mut self, cost: Duration) {
        self.unit_cost = cost;
    }

    /// Moves the clock forward.
    pub fn advance(&mut self, by: Duration) {
        self.now = self.now + by;
    }

    /// Moves the clock to `to` if that is later than now.
    pub fn advance_to(&mut self, to: Timestamp) {
        if to > self.now {
            self.now = to;
        }
    }

    /// Takes the most urgent queued task.
    pub fn pop_task(&mut self) -> Option<QueuedTask> {
        self.queue.pop_first().map(|(_, task)| task)
    }

    /// Puts a task that asked to continue back in its old queue position.
    pub fn requeue(&mut self, task: QueuedTask) {
        self.queue.insert((task.priority, task.seq), task);
    }

    /// Takes the oldest queued microtask.
    pub fn pop_microtask(&mut self) -> Option<Microtask> {
        self.microtasks.pop_front()
    }

    /// Starts a new time slice for [`YieldPolicy::EveryUnits`].
    pub fn begin_slice(&mut self) {
        self.units_this_slice = 0;
    }

    /// Returns the queued tasks, most urgent first.
    pub fn queued(&self) -> impl Iterator<Item = &QueuedTask> + '_ {
        self.queue.values()
    }

    /// Returns `true` if a task with this handle is queued.
    #[must_use]
    pub fn is_queued(&self, handle: TaskHandle) -> bool {
        self.queue.values().any(|t| t.handle == handle)
    }

    /// Returns `true` if neither tasks nor microtasks are queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.microtasks.is_empty()
    }

    /// Returns everything the scheduler was asked to do, oldest first.
    #[must_use]
    pub fn log(&self) -> &[SchedulerEvent] {
        &self.log
    }

    /// Forgets the log.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}

impl CooperativeScheduler for VirtualScheduler {
    fn schedule_task(&mut self, priority: SchedulerPriority, task: Task) -> TaskHandle {
        self.next_handle += 1;
        self.next_seq += 1;
        let handle = TaskHandle(self.next_handle);
        self.queue.insert(
            (priority, self.next_seq),
            QueuedTask {
                handle,
                priority,
                task,
                queued_at: self.now,
                seq: self.next_seq,
            },
        );
        self.log.push(SchedulerEvent::Scheduled {
            handle,
            priority,
            task,
        });
        handle
    }

    fn cancel_task(&mut self, handle: TaskHandle) {
        self.queue.retain(|_, t| t.handle != handle);
        self.log.push(SchedulerEvent::Cancelled(handle));
    }

    fn should_yield(&mut self) -> bool {
        let stop = match self.policy {
            YieldPolicy::Never => false,
            YieldPolicy::Always => true,
            YieldPolicy::EveryUnits(n) => self.units_this_slice >= n,
        };
        if !stop {
            self.units_this_slice += 1;
            self.now = self.now + self.unit_cost;
        }
        stop
    }

    fn now(&self) -> Timestamp {
        self.now
    }

    fn schedule_microtask(&mut self, task: Microtask) {
        self.microtasks.push_back(task);
        self.log.push(SchedulerEvent::Microtask(task));
    }

    fn request_paint(&mut self) {
        self.log.push(SchedulerEvent::Paint);
    }
}
