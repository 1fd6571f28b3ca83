// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end scheduling, suspense, and error scenarios.

use stratum_core::config::ReconcilerConfig;
use stratum_core::error::{Invariant, ReconcileError};
use stratum_core::host::{CacheHandle, Microtask, SchedulerPriority, Task, TaskStatus};
use stratum_core::lane::{EventPriority, Lane, Lanes};
use stratum_core::reconciler::jnd;
use stratum_core::time::{Duration, Timestamp};
use stratum_core::unit::{RootId, Transition, UnitMode, UpdateAction, WakeableId};
use stratum_harness::{CommitPass, Harness, HostOp, NodeKind, SchedulerEvent, Tree, YieldPolicy};

// -- Helpers --

fn make_list(names: &[&'static str]) -> Tree {
    let mut tree = Tree::new();
    let list = tree.add(None, "list", NodeKind::Component);
    for &name in names {
        tree.add(Some(list), name, NodeKind::Host);
    }
    tree
}

fn make_harness(config: ReconcilerConfig, tree: Tree, mode: UnitMode) -> (Harness, RootId) {
    let mut harness = Harness::new(config, tree);
    let root = harness.create_root(mode);
    (harness, root)
}

fn perform_work_tasks(harness: &Harness, root: RootId) -> usize {
    harness
        .scheduler()
        .queued()
        .filter(|t| t.task == Task::PerformWork(root))
        .count()
}

/// Runs tasks one at a time and returns how often a render yielded.
fn drain_counting_yields(harness: &mut Harness) -> usize {
    let mut yields = 0;
    loop {
        harness.run_microtasks().unwrap();
        match harness.run_next_task() {
            Some(Ok(TaskStatus::Continue)) => yields += 1,
            Some(Ok(TaskStatus::Done)) => {}
            Some(Err(error)) => panic!("task failed: {error}"),
            None => return yields,
        }
    }
}

/// `page` suspense boundary around `a`, plus `b` (revealed at state 1)
/// that waits on wakeable 1.
fn make_page() -> Tree {
    let mut tree = Tree::new();
    let page = tree.add(None, "page", NodeKind::Suspense);
    tree.add(Some(page), "a", NodeKind::Host);
    let b = tree.add(Some(page), "b", NodeKind::Host);
    tree.node_mut(b).visible_from = 1;
    tree.node_mut(b).suspends_on = Some(WakeableId(1));
    tree.add_fallback(page, "spinner");
    tree
}

// -- Root scheduler --

#[test]
fn normal_update_schedules_one_task_and_clears_it_after_commit() {
    let (mut h, root) = make_harness(ReconcilerConfig::new(), make_list(&["a"]), UnitMode::CONCURRENT);

    let lane = h.update_root(root, UpdateAction::Replace(1)).unwrap();
    assert_eq!(lane, Lane::DEFAULT);
    assert_eq!(perform_work_tasks(&h, root), 1, "one task for the root");
    assert_eq!(
        h.scheduler().queued().next().map(|t| t.priority),
        Some(SchedulerPriority::Normal)
    );

    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["list", "a"]);
    assert!(h.reconciler().root(root).callback_node().is_none(), "task cleared");
    assert!(h.reconciler().root(root).pending_lanes().is_empty());
    assert!(h.scheduler().is_idle());
}

#[test]
fn same_priority_updates_reuse_the_scheduled_task() {
    let (mut h, root) = make_harness(ReconcilerConfig::new(), make_list(&["a"]), UnitMode::CONCURRENT);

    h.update_root(root, UpdateAction::Add(1)).unwrap();
    let first = h.reconciler().root(root).callback_node();
    h.update_root(root, UpdateAction::Add(1)).unwrap();

    assert_eq!(
        h.reconciler().root(root).callback_node(),
        first,
        "same handle for the same priority"
    );
    let scheduled = h
        .scheduler()
        .log()
        .iter()
        .filter(|e| matches!(e, SchedulerEvent::Scheduled { .. }))
        .count();
    assert_eq!(scheduled, 1, "second update scheduled nothing");

    h.run_until_idle().unwrap();
    assert_eq!(h.root_state(root), 2, "both updates rendered together");
    assert_eq!(h.host().commit_count(), 1);
}

#[test]
fn urgent_update_replaces_idle_task_then_idle_runs() {
    let (mut h, root) = make_harness(ReconcilerConfig::new(), make_list(&["a"]), UnitMode::CONCURRENT);

    h.host_mut().set_event_priority(Some(EventPriority::Idle));
    assert_eq!(h.update_root(root, UpdateAction::Add(1)).unwrap(), Lane::IDLE);
    h.host_mut().set_event_priority(Some(EventPriority::Continuous));
    assert_eq!(
        h.update_root(root, UpdateAction::Add(10)).unwrap(),
        Lane::INPUT_CONTINUOUS
    );
    h.host_mut().set_event_priority(None);

    assert_eq!(perform_work_tasks(&h, root), 1, "never two tasks for one root");
    let log = h.scheduler().log();
    let [
        SchedulerEvent::Scheduled {
            handle: idle,
            priority: SchedulerPriority::Idle,
            ..
        },
        SchedulerEvent::Cancelled(cancelled),
        SchedulerEvent::Scheduled {
            priority: SchedulerPriority::UserBlocking,
            ..
        },
    ] = log
    else {
        panic!("unexpected scheduler log: {log:?}");
    };
    assert_eq!(idle, cancelled, "idle task replaced");

    assert_eq!(h.run_next_task(), Some(Ok(TaskStatus::Done)));
    assert_eq!(h.root_state(root), 10, "idle update skipped");
    let remaining: Vec<_> = h.scheduler().queued().map(|t| t.priority).collect();
    assert_eq!(remaining, [SchedulerPriority::Idle], "idle lane rescheduled");

    h.run_until_idle().unwrap();
    assert_eq!(h.root_state(root), 11, "idle update applied in order");
}

#[test]
fn discrete_update_outside_a_batch_commits_before_returning() {
    let (mut h, root) = make_harness(ReconcilerConfig::new(), make_list(&["a"]), UnitMode::CONCURRENT);

    let lane = h
        .reconciler_mut()
        .discrete_updates(|r| r.update_root(root, UpdateAction::Replace(1)))
        .unwrap();

    assert_eq!(lane, Lane::SYNC);
    assert_eq!(h.committed(root), ["list", "a"], "committed synchronously");
    assert_eq!(h.host().commit_count(), 1);
}

#[test]
fn batched_sync_updates_commit_once_at_scope_end() {
    let (mut h, root) = make_harness(ReconcilerConfig::new(), make_list(&["a"]), UnitMode::LEGACY);

    let commits_inside = h
        .reconciler_mut()
        .batched_updates(|r| {
            r.update_root(root, UpdateAction::Add(1)).unwrap();
            r.update_root(root, UpdateAction::Add(2)).unwrap();
            r.host().commit_count()
        })
        .unwrap();

    assert_eq!(commits_inside, 0, "nothing flushed inside the batch");
    assert_eq!(h.host().commit_count(), 1, "one commit for the batch");
    assert_eq!(h.root_state(root), 3);
}

#[test]
fn flush_sync_flushes_pending_sync_work() {
    let (mut h, root) = make_harness(ReconcilerConfig::new(), make_list(&["a"]), UnitMode::CONCURRENT);

    h.reconciler_mut()
        .flush_sync(|r| r.update_root(root, UpdateAction::Replace(4)))
        .unwrap()
        .unwrap();

    assert_eq!(h.root_state(root), 4, "committed before flush_sync returned");
    assert!(
        h.scheduler()
            .log()
            .contains(&SchedulerEvent::Microtask(Microtask::FlushSyncQueue)),
        "sync work is also queued for a microtask flush"
    );
    h.run_until_idle().unwrap();
    assert_eq!(h.host().commit_count(), 1, "the microtask finds nothing left");
}

// -- Work loop --

#[test]
fn interrupted_render_commits_the_same_tree_as_an_exhaustive_one() {
    let names = ["a", "b", "c", "d", "e"];
    let run = |policy: YieldPolicy| {
        let (mut h, root) = make_harness(ReconcilerConfig::new(), make_list(&names), UnitMode::CONCURRENT);
        h.scheduler_mut().set_yield_policy(policy);
        h.transition(Transition::new(1), root, UpdateAction::Replace(1))
            .unwrap();
        h.transition(Transition::new(2), root, UpdateAction::Add(5))
            .unwrap();
        let yields = drain_counting_yields(&mut h);
        (h.committed(root), h.root_state(root), yields)
    };

    let (sliced_tree, sliced_state, sliced_yields) = run(YieldPolicy::EveryUnits(1));
    let (full_tree, full_state, full_yields) = run(YieldPolicy::Never);

    assert!(sliced_yields > 0, "the sliced render yielded");
    assert_eq!(full_yields, 0, "the exhaustive render never yielded");
    assert_eq!(sliced_tree, full_tree, "same committed tree");
    assert_eq!(sliced_state, full_state, "same committed state");
    assert_eq!(sliced_state, 6);
}

#[test]
fn urgent_update_interrupts_transition_and_rebases() {
    let (mut h, root) = make_harness(
        ReconcilerConfig::new(),
        make_list(&["a", "b", "c", "d"]),
        UnitMode::CONCURRENT,
    );
    h.scheduler_mut().set_yield_policy(YieldPolicy::EveryUnits(2));

    h.transition(Transition::new(1), root, UpdateAction::Replace(1))
        .unwrap();
    assert_eq!(h.run_next_task(), Some(Ok(TaskStatus::Continue)));
    assert!(h.reconciler().render_in_progress().is_some());

    h.reconciler_mut()
        .discrete_updates(|r| r.update_root(root, UpdateAction::Add(10)))
        .unwrap();
    assert!(
        !h.evaluator().interrupted().is_empty(),
        "transition render thrown away"
    );
    assert_eq!(h.root_state(root), 10, "urgent update committed alone");

    h.run_until_idle().unwrap();
    assert_eq!(h.root_state(root), 11, "transition replayed before the urgent update");
    assert_eq!(h.committed(root), ["list", "a", "b", "c", "d"]);
}

#[test]
fn starved_transition_renders_without_yielding() {
    let (mut h, root) = make_harness(ReconcilerConfig::new(), make_list(&["a"]), UnitMode::CONCURRENT);
    h.scheduler_mut().set_yield_policy(YieldPolicy::Always);

    h.transition(Transition::new(1), root, UpdateAction::Replace(1))
        .unwrap();
    assert_eq!(h.run_next_task(), Some(Ok(TaskStatus::Continue)));
    assert_eq!(h.host().commit_count(), 0, "yielded before any work");

    h.advance(Duration(5001)).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["list", "a"], "expired lanes render to completion");
}

#[test]
fn removed_units_are_deleted_and_unmounted() {
    let mut tree = make_list(&["a", "b"]);
    let a = tree.find("a").unwrap();
    let b = tree.find("b").unwrap();
    tree.node_mut(a).passive = true;
    tree.node_mut(b).passive = true;
    tree.node_mut(b).visible_until = Some(1);
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::CONCURRENT);

    h.update_root(root, UpdateAction::Replace(0)).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.host().effects(CommitPass::PassiveMount), [a.tag(), b.tag()]);
    h.host_mut().clear_log();

    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["list", "a"]);
    assert_eq!(h.host().effects(CommitPass::Deletion), [b.tag()]);
    assert_eq!(
        h.host().effects(CommitPass::PassiveUnmount),
        [b.tag(), a.tag()],
        "deleted subtrees unmount first"
    );
    assert_eq!(h.host().effects(CommitPass::PassiveMount), [a.tag()]);
}

// -- Suspense --

#[test]
fn suspended_unit_shows_fallback_then_retry_completes() {
    let mut tree = Tree::new();
    let boundary = tree.add(None, "boundary", NodeKind::Suspense);
    let content = tree.add(Some(boundary), "content", NodeKind::Host);
    tree.node_mut(content).suspends_on = Some(WakeableId(7));
    tree.add_fallback(boundary, "spinner");
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::CONCURRENT);

    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.evaluator().suspended(), [(content.tag(), WakeableId(7))]);
    assert_eq!(h.committed(root), ["boundary", "spinner"], "fallback committed");

    h.resolve(WakeableId(7)).unwrap();
    let retry = h.reconciler().root(root).pending_lanes();
    assert!(retry.includes_only_retries(), "boundary retries in a retry lane");

    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["boundary", "content"], "content replaced the fallback");
    assert!(h.reconciler().root(root).pending_lanes().is_empty());
}

#[test]
fn ping_restarts_a_render_waiting_to_show_a_delayed_fallback() {
    let (mut h, root) = make_harness(ReconcilerConfig::new(), make_page(), UnitMode::CONCURRENT);
    h.update_root(root, UpdateAction::Replace(0)).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["page", "a"]);

    h.scheduler_mut().set_yield_policy(YieldPolicy::EveryUnits(1));
    h.transition(Transition::new(1), root, UpdateAction::Replace(1))
        .unwrap();
    while h.evaluator().suspended().is_empty() {
        assert_eq!(h.run_next_task(), Some(Ok(TaskStatus::Continue)));
    }
    assert!(
        h.reconciler().render_in_progress().is_some(),
        "still rendering after the suspension"
    );
    assert!(h.evaluator().interrupted().is_empty());

    h.resolve(WakeableId(1)).unwrap();
    assert!(
        !h.evaluator().interrupted().is_empty(),
        "the attempt was restarted from scratch"
    );

    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["page", "a", "b"]);
}

#[test]
fn suspended_transition_keeps_old_content_until_resolved() {
    let (mut h, root) = make_harness(ReconcilerConfig::new(), make_page(), UnitMode::CONCURRENT);
    h.update_root(root, UpdateAction::Replace(0)).unwrap();
    h.run_until_idle().unwrap();

    let lane = h
        .transition(Transition::new(1), root, UpdateAction::Replace(1))
        .unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["page", "a"], "old content stays");
    assert!(h.host().pending_timeouts().is_empty(), "no delayed commit for transitions");
    assert!(h.reconciler().root(root).suspended_lanes().has(lane));

    h.advance(Duration(60_000)).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["page", "a"], "a suspended lane never expires");

    h.resolve(WakeableId(1)).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["page", "a", "b"]);
}

#[test]
fn transition_without_boundary_waits_for_the_ping() {
    let mut tree = make_list(&["a", "b"]);
    let b = tree.find("b").unwrap();
    tree.node_mut(b).visible_from = 1;
    tree.node_mut(b).suspends_on = Some(WakeableId(3));
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::CONCURRENT);
    h.update_root(root, UpdateAction::Replace(0)).unwrap();
    h.run_until_idle().unwrap();

    h.transition(Transition::new(1), root, UpdateAction::Replace(1))
        .unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["list", "a"], "nothing committed");
    assert_eq!(h.host().commit_count(), 1);

    h.resolve(WakeableId(3)).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["list", "a", "b"]);
}

/// `outer` boundary around `c` (waits on 1) and an `inner` boundary around
/// `d` (waits on 2). Returns the harness after the outer fallback committed
/// at t = 0, wakeable 1 resolved at t = 50, and the retry rendered at t = 80.
fn make_throttled_retry() -> (Harness, RootId) {
    let mut tree = Tree::new();
    let outer = tree.add(None, "outer", NodeKind::Suspense);
    let c = tree.add(Some(outer), "c", NodeKind::Host);
    tree.node_mut(c).suspends_on = Some(WakeableId(1));
    let inner = tree.add(Some(outer), "inner", NodeKind::Suspense);
    let d = tree.add(Some(inner), "d", NodeKind::Host);
    tree.node_mut(d).suspends_on = Some(WakeableId(2));
    tree.add_fallback(outer, "outer_spinner");
    tree.add_fallback(inner, "inner_spinner");
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::CONCURRENT);

    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["outer", "outer_spinner"]);

    h.advance(Duration(50)).unwrap();
    h.resolve(WakeableId(1)).unwrap();
    h.advance(Duration(30)).unwrap();
    h.run_until_idle().unwrap();
    (h, root)
}

#[test]
fn retry_fallback_is_throttled_by_jnd() {
    let (mut h, root) = make_throttled_retry();

    // The retry was requested at t = 50 and finished at t = 80.
    let expected = jnd(Duration(30)) - Duration(30);
    let [timeout] = h.host().pending_timeouts() else {
        panic!("expected one delayed commit");
    };
    assert_eq!(timeout.delay, expected);
    assert_eq!(timeout.due(), Some(Timestamp(80) + expected));
    assert_eq!(h.committed(root), ["outer", "outer_spinner"], "not committed yet");

    h.advance(expected - Duration(1)).unwrap();
    assert_eq!(h.committed(root), ["outer", "outer_spinner"], "never early");

    h.advance(Duration(1)).unwrap();
    assert_eq!(h.committed(root), ["outer", "c", "inner", "inner_spinner"]);

    h.resolve(WakeableId(2)).unwrap();
    h.run_all().unwrap();
    assert_eq!(h.committed(root), ["outer", "c", "inner", "d"]);
}

#[test]
fn new_render_cancels_a_delayed_commit() {
    let (mut h, root) = make_throttled_retry();
    let [timeout] = h.host().pending_timeouts() else {
        panic!("expected one delayed commit");
    };
    let handle = timeout.handle;

    h.update_root(root, UpdateAction::Replace(2)).unwrap();
    assert_eq!(h.run_next_task(), Some(Ok(TaskStatus::Done)));
    assert!(
        h.host().pending_timeouts().iter().all(|t| t.handle != handle),
        "stale delayed commit cancelled"
    );
    assert_eq!(h.committed(root), ["outer", "c", "inner", "inner_spinner"]);
}

#[test]
fn eager_config_commits_retry_fallbacks_immediately() {
    let mut tree = Tree::new();
    let outer = tree.add(None, "outer", NodeKind::Suspense);
    let c = tree.add(Some(outer), "c", NodeKind::Host);
    tree.node_mut(c).suspends_on = Some(WakeableId(1));
    let inner = tree.add(Some(outer), "inner", NodeKind::Suspense);
    let d = tree.add(Some(inner), "d", NodeKind::Host);
    tree.node_mut(d).suspends_on = Some(WakeableId(2));
    tree.add_fallback(outer, "outer_spinner");
    tree.add_fallback(inner, "inner_spinner");
    let (mut h, root) = make_harness(ReconcilerConfig::eager(), tree, UnitMode::CONCURRENT);

    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    h.run_until_idle().unwrap();
    h.resolve(WakeableId(1)).unwrap();
    h.run_until_idle().unwrap();

    assert!(h.host().pending_timeouts().is_empty(), "no throttling");
    assert_eq!(h.committed(root), ["outer", "c", "inner", "inner_spinner"]);
}

#[test]
fn legacy_boundary_retries_on_the_sync_lane() {
    let mut tree = Tree::new();
    let boundary = tree.add(None, "boundary", NodeKind::Suspense);
    let content = tree.add(Some(boundary), "content", NodeKind::Host);
    tree.node_mut(content).suspends_on = Some(WakeableId(4));
    tree.add_fallback(boundary, "spinner");
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::LEGACY);

    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    assert_eq!(h.committed(root), ["boundary", "spinner"]);

    h.resolve(WakeableId(4)).unwrap();
    assert_eq!(h.reconciler().root(root).pending_lanes(), Lanes::from(Lane::SYNC));
    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["boundary", "content"]);
}

#[test]
fn sync_suspension_without_boundary_is_an_uncaught_error() {
    let mut tree = make_list(&["a"]);
    let a = tree.find("a").unwrap();
    tree.node_mut(a).suspends_on = Some(WakeableId(9));
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::LEGACY);

    let err = h.update_root(root, UpdateAction::Replace(1)).unwrap_err();
    let ReconcileError::Uncaught(captured) = err else {
        panic!("expected an uncaught error, got {err:?}");
    };
    assert!(captured.error.message().contains("no suspense boundary"));
    assert!(h.committed(root).is_empty(), "root content removed");
}

#[test]
fn retry_on_a_plain_unit_is_rejected() {
    let (mut h, root) = make_harness(ReconcilerConfig::new(), make_list(&["a"]), UnitMode::LEGACY);
    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    let a = h.committed_unit(root, "a").unwrap();

    let err = h
        .reconciler_mut()
        .resolve_retry_wakeable(a, WakeableId(1))
        .unwrap_err();
    assert_eq!(err, ReconcileError::Invariant(Invariant::NotASuspenseBoundary));
}

// -- Errors --

#[test]
fn commit_mutation_error_becomes_a_sync_update_on_the_root() {
    let tree = make_list(&["a", "b"]);
    let a = tree.find("a").unwrap();
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::CONCURRENT);
    h.host_mut().fail_once(CommitPass::Mutation, a.tag());

    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    h.scheduler_mut().clear_log();
    let Some(Err(ReconcileError::Uncaught(captured))) = h.run_next_task() else {
        panic!("expected the root's error render to raise");
    };

    assert!(captured.error.message().contains("Mutation"));
    assert!(
        h.scheduler()
            .log()
            .contains(&SchedulerEvent::Microtask(Microtask::FlushSyncQueue)),
        "the error was scheduled as sync work, not thrown from commit"
    );
    let mutated = h.host().effects(CommitPass::Mutation);
    assert!(mutated.contains(&a.tag()), "failing effect ran");
    assert_eq!(h.host().commit_count(), 2, "first commit finished, then the error render");
    assert!(h.committed(root).is_empty(), "root content removed");
}

#[test]
fn commit_error_is_captured_by_nearest_error_boundary() {
    let mut tree = Tree::new();
    let guard = tree.add(None, "guard", NodeKind::ErrorBoundary);
    let widget = tree.add(Some(guard), "widget", NodeKind::Host);
    tree.add_fallback(guard, "oops");
    tree.add(None, "footer", NodeKind::Host);
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::CONCURRENT);
    h.host_mut().fail_once(CommitPass::Mutation, widget.tag());

    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    h.run_until_idle().unwrap();

    assert_eq!(h.committed(root), ["guard", "oops", "footer"]);
    assert_eq!(h.host().commit_count(), 2);
}

#[test]
fn render_error_recovers_with_a_sync_retry() {
    let mut tree = make_list(&["a", "b"]);
    let a = tree.find("a").unwrap();
    tree.node_mut(a).failures = 1;
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::CONCURRENT);

    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    h.run_until_idle().unwrap();

    assert_eq!(h.evaluator().failed(), [a.tag()]);
    assert_eq!(h.committed(root), ["list", "a", "b"], "retry succeeded");
    assert_eq!(h.host().recoverable_errors(), ["a failed"]);
}

#[test]
fn render_error_caught_by_boundary_shows_fallback() {
    let mut tree = Tree::new();
    let guard = tree.add(None, "guard", NodeKind::ErrorBoundary);
    let widget = tree.add(Some(guard), "widget", NodeKind::Host);
    tree.node_mut(widget).failures = u32::MAX;
    tree.add_fallback(guard, "oops");
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::CONCURRENT);

    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    h.run_until_idle().unwrap();

    assert_eq!(h.committed(root), ["guard", "oops"]);
    assert!(h.host().recoverable_errors().is_empty(), "the retry failed too");
    assert_eq!(h.evaluator().failed().len(), 2, "failed once per attempt");
}

#[test]
fn root_failure_is_fatal_and_suspends_the_lanes() {
    let mut tree = make_list(&["a"]);
    tree.fail_root(1);
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::CONCURRENT);

    let lane = h.update_root(root, UpdateAction::Replace(1)).unwrap();
    let Some(Err(ReconcileError::Fatal(captured))) = h.run_next_task() else {
        panic!("expected a fatal error");
    };
    assert_eq!(captured.error.message(), "root failed");
    assert!(h.reconciler().root(root).suspended_lanes().has(lane));
    assert!(h.committed(root).is_empty());
    assert_eq!(perform_work_tasks(&h, root), 0, "suspended lanes are not rescheduled");

    h.update_root(root, UpdateAction::Replace(2)).unwrap();
    h.run_until_idle().unwrap();
    assert_eq!(h.committed(root), ["list", "a"], "a new update unblocks the root");
}

#[test]
fn passive_update_loop_hits_depth_limit() {
    let mut tree = make_list(&["ticker"]);
    let ticker = tree.find("ticker").unwrap();
    tree.node_mut(ticker).passive = true;
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::CONCURRENT);
    h.host_mut()
        .follow_up(CommitPass::PassiveMount, ticker.tag(), UpdateAction::Add(1), u32::MAX);

    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    let err = h.run_until_idle().unwrap_err();
    assert_eq!(err, ReconcileError::MaxPassiveUpdateDepth);
}

#[test]
fn layout_update_loop_hits_depth_limit() {
    let mut tree = make_list(&["ticker"]);
    let ticker = tree.find("ticker").unwrap();
    tree.node_mut(ticker).layout = true;
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::LEGACY);
    h.host_mut()
        .follow_up(CommitPass::Layout, ticker.tag(), UpdateAction::Add(1), u32::MAX);

    let err = h.update_root(root, UpdateAction::Replace(1)).unwrap_err();
    assert_eq!(err, ReconcileError::MaxUpdateDepth);
}

#[test]
fn bounded_layout_follow_ups_settle() {
    let mut tree = make_list(&["ticker"]);
    let ticker = tree.find("ticker").unwrap();
    tree.node_mut(ticker).layout = true;
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::LEGACY);
    h.host_mut()
        .follow_up(CommitPass::Layout, ticker.tag(), UpdateAction::Add(1), 3);

    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    assert_eq!(h.host().commit_count(), 4, "initial commit plus three follow-ups");
}

// -- Post-commit reports --

#[test]
fn transitions_are_reported_after_passive_effects() {
    let (mut h, root) = make_harness(ReconcilerConfig::new(), make_list(&["a"]), UnitMode::CONCURRENT);

    h.transition(Transition::named(7, "open"), root, UpdateAction::Replace(1))
        .unwrap();
    h.run_until_idle().unwrap();

    let reports: Vec<_> = h
        .host()
        .log()
        .iter()
        .filter_map(|op| match op {
            HostOp::TransitionsComplete { root: r, ids, .. } => Some((*r, ids.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(reports, [(root, vec![7])]);
    let scheduled_idle = h.scheduler().log().iter().any(|e| {
        matches!(
            e,
            SchedulerEvent::Scheduled {
                priority: SchedulerPriority::Idle,
                task: Task::TransitionCallbacks(_),
                ..
            }
        )
    });
    assert!(scheduled_idle, "reported from an idle task");
}

#[test]
fn pooled_cache_is_released_when_its_lanes_finish() {
    let mut tree = make_list(&["a"]);
    let a = tree.find("a").unwrap();
    tree.node_mut(a).uses_cache = true;
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::CONCURRENT);

    h.update_root(root, UpdateAction::Replace(1)).unwrap();
    h.run_until_idle().unwrap();

    assert!(h.host().log().contains(&HostOp::CacheReleased(CacheHandle(1))));
    assert!(h.reconciler().root(root).pooled_cache().is_none());
}

#[test]
fn layout_runs_after_mutation_in_one_commit() {
    let mut tree = make_list(&["a"]);
    let a = tree.find("a").unwrap();
    tree.node_mut(a).layout = true;
    let (mut h, root) = make_harness(ReconcilerConfig::new(), tree, UnitMode::LEGACY);

    h.update_root(root, UpdateAction::Replace(1)).unwrap();

    let passes: Vec<CommitPass> = h
        .host()
        .log()
        .iter()
        .filter_map(|op| match *op {
            HostOp::Effect { pass, tag, .. } if tag == a.tag() => Some(pass),
            _ => None,
        })
        .collect();
    assert_eq!(
        passes,
        [CommitPass::BeforeMutation, CommitPass::Mutation, CommitPass::Layout]
    );
    assert!(
        h.host().log().contains(&HostOp::ResetAfterCommit(root)),
        "host reset after the mutation pass"
    );
}
