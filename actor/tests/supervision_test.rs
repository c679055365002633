// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Supervision scenarios: restart strategies, restart intensity and the
//! child lifecycle.

use actor::{
    ActorContext, ActorSystem, Behavior, BehaviorFn, ChildKind, Error,
    ExitReason, Inbox, Link, Mode, Payload, RestartPolicy, SpawnOptions,
    Start, Strategy, Supervisor, SupervisorConfig, SupervisorRef, SystemRef,
    TaskStart, DEFAULT_TASK_POLL, DEFAULT_TASK_TIMEOUT,
};

use async_trait::async_trait;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

// Payload that makes the echo behavior fail.
#[derive(Clone, Copy, Debug)]
struct Boom;

// Payload that makes the finishing behavior stop cleanly.
#[derive(Clone, Copy, Debug)]
struct Done;

fn echo() -> impl Behavior {
    BehaviorFn::new((), |_, msg: Payload| {
        if msg.is::<Boom>() {
            Err(Error::Behavior("boom".to_owned()))
        } else {
            Ok(msg)
        }
    })
}

// Stops itself with a clean reason when told so.
struct Finishing;

#[async_trait]
impl Behavior for Finishing {
    async fn dispatch(
        &mut self,
        ctx: &mut ActorContext,
        msg: Payload,
    ) -> Result<Payload, Error> {
        if msg.is::<Done>() {
            ctx.stop(ExitReason::Normal);
        }
        Ok(Payload::unit())
    }
}

async fn ping(link: &Link) -> String {
    link.request(Payload::new("ping".to_owned()), Some(Duration::from_secs(1)))
        .await
        .unwrap()
        .extract::<String>()
        .unwrap()
}

async fn until_closed(link: &Link) {
    for _ in 0..200 {
        if link.is_closed() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} did not close", link);
}

async fn supervisor_with(
    system: &SystemRef,
    config: SupervisorConfig,
) -> SupervisorRef {
    system
        .supervisor(config, SpawnOptions::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_one_for_one_restarts_only_the_failed_child() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;
    let b1 = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();
    let b2 = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

    let mut watcher = Inbox::new(8);
    watcher.link().monitor(&b2).await.unwrap();

    b1.send(Payload::new(Boom)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // the preserved links answer again; the sibling never went down
    assert_eq!(ping(&b1).await, "ping");
    assert_eq!(ping(&b2).await, "ping");
    assert!(watcher
        .next_exit(Some(Duration::from_millis(100)))
        .await
        .is_err());
}

#[tokio::test]
async fn test_one_for_all_cascades_to_siblings() {
    let system = ActorSystem::create();
    let sv = supervisor_with(
        &system,
        SupervisorConfig::default().with_strategy(Strategy::OneForAll),
    )
    .await;
    let b1 = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();
    let b2 = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();
    let b3 = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

    let mut watch1 = Inbox::new(8);
    watch1.link().monitor(&b1).await.unwrap();
    let mut watch3 = Inbox::new(8);
    watch3.link().monitor(&b3).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    b2.send(Payload::new(Boom)).await.unwrap();

    // the siblings were shut down deliberately
    let notice = watch1.next_exit(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(notice.reason, ExitReason::Shutdown);
    let notice = watch3.next_exit(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(notice.reason, ExitReason::Shutdown);

    // all three come back behind their original links
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ping(&b1).await, "ping");
    assert_eq!(ping(&b2).await, "ping");
    assert_eq!(ping(&b3).await, "ping");
}

#[tokio::test]
async fn test_rest_for_one_restarts_the_suffix() {
    let system = ActorSystem::create();
    let sv = supervisor_with(
        &system,
        SupervisorConfig::default().with_strategy(Strategy::RestForOne),
    )
    .await;
    let b1 = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();
    let b2 = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();
    let b3 = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

    let mut watch1 = Inbox::new(8);
    watch1.link().monitor(&b1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    b2.send(Payload::new(Boom)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // B1 is untouched, B2 and B3 are back behind their original links
    assert!(watch1
        .next_exit(Some(Duration::from_millis(100)))
        .await
        .is_err());
    assert_eq!(ping(&b1).await, "ping");
    assert_eq!(ping(&b2).await, "ping");
    assert_eq!(ping(&b3).await, "ping");

    let infos = sv.which_children().await.unwrap();
    let links: Vec<Link> = infos.iter().map(|info| info.link.clone()).collect();
    assert_eq!(links, vec![b1, b2, b3]);
}

#[tokio::test]
async fn test_restart_intensity_exceeded_shuts_the_supervisor_down() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;
    let b1 = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();
    let b2 = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

    let mut watch2 = Inbox::new(8);
    watch2.link().monitor(&b2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // three failures are restarted; the fourth within the window tears the
    // supervisor and every remaining child down
    for _ in 0..4 {
        b1.send(Payload::new(Boom)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let notice = watch2.next_exit(Some(Duration::from_secs(2))).await.unwrap();
    assert_eq!(notice.reason, ExitReason::Shutdown);
    until_closed(sv.link()).await;
    until_closed(&b1).await;
    until_closed(&b2).await;
}

#[tokio::test]
async fn test_failures_spread_over_time_stay_within_budget() {
    let system = ActorSystem::create();
    let sv = supervisor_with(
        &system,
        SupervisorConfig::default()
            .with_max_seconds(Duration::from_millis(300)),
    )
    .await;
    let b1 = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

    for _ in 0..4 {
        b1.send(Payload::new(Boom)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // the window never held four failures, so everything is still up
    assert_eq!(ping(&b1).await, "ping");
    assert_eq!(sv.count_children().await.unwrap().total, 1);
}

#[tokio::test]
async fn test_transient_child_is_not_restarted_after_clean_exit() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;
    let child = sv
        .start_actor(
            Start::new(|| Finishing),
            RestartPolicy::Transient,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

    child.send(Payload::new(Done)).await.unwrap();
    until_closed(&child).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(sv.which_children().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_temporary_child_is_never_restarted() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;
    let child = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Temporary,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

    child.send(Payload::new(Boom)).await.unwrap();
    until_closed(&child).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(sv.which_children().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transient_child_is_restarted_after_failure() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;
    let child = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Transient,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

    child.send(Payload::new(Boom)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(ping(&child).await, "ping");
}

#[tokio::test]
async fn test_task_timeout_is_clean_for_transient() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;
    let handle = sv
        .start_task(
            TaskStart::new(|| futures::future::pending::<Result<(), Error>>()),
            RestartPolicy::Transient,
            Duration::from_millis(300),
            Duration::from_millis(30),
        )
        .await
        .unwrap();

    // a task link is identity only
    assert!(handle.link().is_closed());
    assert_eq!(sv.count_children().await.unwrap().tasks, 1);

    tokio::time::sleep(Duration::from_millis(600)).await;

    // timed_out is a clean reason: the task is gone, not restarted
    assert!(sv.which_children().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_task_is_rescheduled() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let start = TaskStart::new(move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                Err(Error::Task("first run fails".to_owned()))
            } else {
                Ok(())
            }
        }
    });
    sv.start_task(
        start,
        RestartPolicy::Transient,
        Duration::from_secs(2),
        Duration::from_millis(20),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    // the second run completed cleanly and the record was removed
    assert!(sv.which_children().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_supervise_then_unsupervise_leaves_children_unchanged() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;
    let free = system.spawn(echo(), SpawnOptions::default()).await.unwrap();

    let before = sv.count_children().await.unwrap();
    sv.supervise(&free, Start::new(echo), RestartPolicy::Permanent)
        .await
        .unwrap();
    sv.unsupervise(&free).await.unwrap();
    let after = sv.count_children().await.unwrap();

    assert_eq!(before, after);
    assert_eq!(ping(&free).await, "ping");
}

#[tokio::test]
async fn test_supervised_caller_is_restarted() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;
    let free = system.spawn(echo(), SpawnOptions::default()).await.unwrap();

    sv.supervise(&free, Start::new(echo), RestartPolicy::Permanent)
        .await
        .unwrap();
    free.send(Payload::new(Boom)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(ping(&free).await, "ping");
}

#[tokio::test]
async fn test_supervisor_refuses_to_supervise_itself() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;

    let result = sv
        .supervise(sv.link(), Start::new(echo), RestartPolicy::Permanent)
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn test_delete_child_keeps_the_child_running() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;
    let child = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

    sv.delete_child(&child).await.unwrap();

    let infos = sv.which_children().await.unwrap();
    assert!(infos.iter().all(|info| info.link != child));
    assert_eq!(ping(&child).await, "ping");
}

#[tokio::test]
async fn test_terminate_child_shuts_the_child_down() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;
    let child = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

    sv.terminate_child(&child).await.unwrap();
    until_closed(&child).await;

    assert!(sv.which_children().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_count_children_tallies_by_policy_and_kind() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;
    sv.start_actor(
        Start::new(echo),
        RestartPolicy::Permanent,
        SpawnOptions::default(),
    )
    .await
    .unwrap();
    sv.start_actor(
        Start::new(echo),
        RestartPolicy::Transient,
        SpawnOptions::default(),
    )
    .await
    .unwrap();
    sv.start_task(
        TaskStart::new(|| futures::future::pending::<Result<(), Error>>()),
        RestartPolicy::Transient,
        DEFAULT_TASK_TIMEOUT,
        DEFAULT_TASK_POLL,
    )
    .await
    .unwrap();

    let counts = sv.count_children().await.unwrap();
    assert_eq!(counts.total, 3);
    assert_eq!(counts.permanent, 1);
    assert_eq!(counts.transient, 2);
    assert_eq!(counts.temporary, 0);
    assert_eq!(counts.actors, 2);
    assert_eq!(counts.tasks, 1);
    assert_eq!(counts.running, 3);

    let infos = sv.which_children().await.unwrap();
    assert_eq!(
        infos.iter().filter(|info| info.kind == ChildKind::Task).count(),
        1
    );
}

#[tokio::test]
async fn test_named_child_keeps_its_name_across_restarts() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;
    let child = sv
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default().with_name("worker"),
        )
        .await
        .unwrap();

    assert_eq!(system.whereis("worker").await, Some(child.clone()));

    child.send(Payload::new(Boom)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(system.whereis("worker").await, Some(child.clone()));
    assert_eq!(ping(&child).await, "ping");
}

#[tokio::test]
async fn test_nested_supervision_tree() {
    let system = ActorSystem::create();
    let root = supervisor_with(&system, SupervisorConfig::default()).await;

    // a supervisor child forms the next level of the tree
    let inner_link = root
        .start_actor(
            Start::new(|| Supervisor::new(SupervisorConfig::default())),
            RestartPolicy::Permanent,
            SpawnOptions::default().with_mode(Mode::Sv),
        )
        .await
        .unwrap();
    let inner = SupervisorRef::new(inner_link);
    let worker = inner
        .start_actor(
            Start::new(echo),
            RestartPolicy::Permanent,
            SpawnOptions::default(),
        )
        .await
        .unwrap();

    worker.send(Payload::new(Boom)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // the inner supervisor recovered its worker; the root saw no failure
    assert_eq!(ping(&worker).await, "ping");
    assert_eq!(root.count_children().await.unwrap().total, 1);
    assert_eq!(inner.count_children().await.unwrap().total, 1);
}

#[tokio::test]
async fn test_supervisor_survives_unexpected_payloads() {
    let system = ActorSystem::create();
    let sv = supervisor_with(&system, SupervisorConfig::default()).await;

    let rejected = sv
        .link()
        .request(
            Payload::new("nonsense".to_owned()),
            Some(Duration::from_secs(1)),
        )
        .await;
    assert!(matches!(rejected, Err(Error::UnexpectedMessage(_))));

    // the supervisor keeps serving its API afterwards
    assert_eq!(sv.count_children().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_invalid_supervisor_config_is_rejected() {
    let system = ActorSystem::create();
    let result = system
        .supervisor(
            SupervisorConfig::default().with_max_seconds(Duration::ZERO),
            SpawnOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
}
