// Integration tests for the messaging core

use actor::{
    ActorContext, ActorSystem, Behavior, BehaviorFn, Error, ExitReason, Inbox,
    Link, Payload, SpawnOptions, UpdateField,
};

use async_trait::async_trait;

use std::time::Duration;

// Payload that makes the echo behavior fail.
#[derive(Clone, Copy, Debug)]
struct Boom;

// Defines an echo behavior that fails on `Boom`.
fn echo() -> impl Behavior {
    BehaviorFn::new((), |_, msg: Payload| {
        if msg.is::<Boom>() {
            Err(Error::Behavior("boom".to_owned()))
        } else {
            Ok(msg)
        }
    })
}

// Behavior that takes a while to answer.
struct Slow;

#[async_trait]
impl Behavior for Slow {
    async fn dispatch(
        &mut self,
        _ctx: &mut ActorContext,
        msg: Payload,
    ) -> Result<Payload, Error> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(msg)
    }
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

#[tokio::test]
async fn test_send_and_request_round_trip() {
    let system = ActorSystem::create();
    let link = system.spawn(echo(), SpawnOptions::default()).await.unwrap();

    link.send(Payload::new("fire and forget".to_owned()))
        .await
        .unwrap();
    let pong = link
        .request(Payload::new("ping".to_owned()), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(pong.extract::<String>(), Some("ping".to_owned()));
}

#[tokio::test]
async fn test_per_sender_fifo_order() {
    let system = ActorSystem::create();
    let collector = system
        .spawn(
            BehaviorFn::new(Vec::new(), |seen: &mut Vec<u64>, msg: Payload| {
                if let Some(value) = msg.extract::<u64>() {
                    seen.push(value);
                }
                Ok(Payload::new(seen.clone()))
            }),
            SpawnOptions::default(),
        )
        .await
        .unwrap();

    for value in 0..100u64 {
        collector.send(Payload::new(value)).await.unwrap();
    }
    let seen = collector
        .request(Payload::unit(), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(
        seen.extract::<Vec<u64>>().unwrap(),
        (0..100).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_request_deadline_expires() {
    let system = ActorSystem::create();
    let link = system.spawn(Slow, SpawnOptions::default()).await.unwrap();

    let result = link
        .request(Payload::unit(), Some(Duration::from_millis(100)))
        .await;
    assert_eq!(result.unwrap_err(), Error::Timeout);
}

#[tokio::test]
async fn test_dangling_link_surfaces_closed_mailbox() {
    let system = ActorSystem::create();
    let link = system.spawn(echo(), SpawnOptions::default()).await.unwrap();

    link.exit(ExitReason::Shutdown).await.unwrap();
    until_closed(&link).await;

    let result = link.send(Payload::unit()).await;
    assert_eq!(result.unwrap_err(), Error::ClosedMailbox);
    let result = link
        .request(Payload::unit(), Some(Duration::from_millis(100)))
        .await;
    assert_eq!(result.unwrap_err(), Error::ClosedMailbox);
}

#[tokio::test]
async fn test_exit_is_out_of_band() {
    let system = ActorSystem::create();
    let link = system.spawn(Slow, SpawnOptions::default()).await.unwrap();

    let mut watcher = Inbox::new(8);
    watcher.link().monitor(&link).await.unwrap();

    // The first payload is mid-dispatch, the second queued behind it. The
    // exit request wins over the queue: only the running dispatch finishes.
    link.send(Payload::unit()).await.unwrap();
    link.send(Payload::unit()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    link.exit(ExitReason::Shutdown).await.unwrap();

    let notice = watcher
        .next_exit(Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(notice.from, link);
    assert_eq!(notice.reason, ExitReason::Shutdown);
}

#[tokio::test]
async fn test_failure_propagates_to_monitors() {
    let system = ActorSystem::create();
    let victim = system.spawn(echo(), SpawnOptions::default()).await.unwrap();
    let bystander =
        system.spawn(echo(), SpawnOptions::default()).await.unwrap();

    // `bystander` monitors `victim`; the default policy terminates it with
    // the same reason when the victim fails.
    bystander.monitor(&victim).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    victim.send(Payload::new(Boom)).await.unwrap();
    until_closed(&victim).await;
    until_closed(&bystander).await;
}

// Connects to any link it receives as a payload.
struct Pairing;

#[async_trait]
impl Behavior for Pairing {
    async fn dispatch(
        &mut self,
        ctx: &mut ActorContext,
        msg: Payload,
    ) -> Result<Payload, Error> {
        if let Some(peer) = msg.extract::<Link>() {
            ctx.connect(&peer).await?;
        }
        Ok(Payload::unit())
    }
}

#[tokio::test]
async fn test_connected_peers_share_their_fate() {
    let system = ActorSystem::create();
    let pairing = system.spawn(Pairing, SpawnOptions::default()).await.unwrap();
    let peer = system.spawn(echo(), SpawnOptions::default()).await.unwrap();

    pairing.send(Payload::new(peer.clone())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // the connection is bidirectional: the peer's failure takes the
    // pairing actor down with the same reason
    peer.send(Payload::new(Boom)).await.unwrap();
    until_closed(&peer).await;
    until_closed(&pairing).await;
}

#[tokio::test]
async fn test_fail_fast_send_policy() {
    let system = ActorSystem::create();
    let link = system
        .spawn(Slow, SpawnOptions::default().with_mailbox_size(1))
        .await
        .unwrap();

    link.send(Payload::unit()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The first payload is mid-dispatch; one slot is free, then the
    // mailbox is full.
    link.try_send(Payload::unit()).unwrap();
    let full = link.try_send(Payload::unit());
    assert_eq!(full.unwrap_err(), Error::MailboxFull);
}

#[tokio::test]
async fn test_inbox_pairs_responses_by_correlation() {
    let system = ActorSystem::create();
    let link = system.spawn(echo(), SpawnOptions::default()).await.unwrap();

    let mut inbox = Inbox::new(8);
    let corr_a = inbox
        .send_request(&link, Payload::new("a".to_owned()))
        .await
        .unwrap();
    let corr_b = inbox
        .send_request(&link, Payload::new("b".to_owned()))
        .await
        .unwrap();

    // Await the second response first; the first is requeued to the
    // pending tail and handed out afterwards.
    let b = inbox
        .receive_response(corr_b, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(b.extract::<String>(), Some("b".to_owned()));
    let a = inbox
        .receive_response(corr_a, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(a.extract::<String>(), Some("a".to_owned()));
}

#[tokio::test]
async fn test_update_swaps_the_behavior() {
    let system = ActorSystem::create();
    let link = system.spawn(echo(), SpawnOptions::default()).await.unwrap();

    link.update(UpdateField::Behavior(Box::new(BehaviorFn::new(
        (),
        |_, msg: Payload| {
            let text = msg.extract::<String>().unwrap_or_default();
            Ok(Payload::new(text.chars().rev().collect::<String>()))
        },
    ))))
    .await
    .unwrap();

    let pong = link
        .request(Payload::new("abc".to_owned()), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(pong.extract::<String>(), Some("cba".to_owned()));
}

#[tokio::test]
async fn test_remote_spawn_needs_a_transport() {
    let system = ActorSystem::create();
    let result = system.spawn(echo(), SpawnOptions::default().remote()).await;
    assert!(matches!(result, Err(Error::RemoteUnavailable(_))));
}
