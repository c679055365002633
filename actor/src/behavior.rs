// Copyright 2024 Antonio Estévez
// SPDX-License-Identifier: Apache-2.0

//! # Behavior
//!
//! The `Behavior` trait is the reaction of an actor to its input: a
//! callable value plus whatever state it captured. The runner invokes it
//! for every user payload and consults its hooks for exit notices, child
//! management and shutdown. Behaviors are trait objects, so `Update` can
//! swap them while the actor keeps its mailbox and link.
//!

use crate::{
    envelope::{ExitNotice, Mode, Payload, ReplyTo},
    error::Error,
    link::Link,
    runner::ActorContext,
};

use async_trait::async_trait;

use tracing::warn;

/// Child-management messages routed to the behavior rather than handled by
/// the runner. Meaningful for supervisors; plain actors reject them.
#[derive(Debug)]
pub enum Control {
    /// Remove a child record without terminating the child.
    Delete(Link),
    /// Remove a child record and shut the child down.
    Terminate(Link),
    /// Report the current child records.
    Which(ReplyTo),
}

/// The reaction of an actor to each incoming payload.
#[async_trait]
pub trait Behavior: Send + 'static {
    /// Apply the behavior to one payload. The returned value becomes the
    /// actor's last result and answers the request when the payload arrived
    /// in one.
    ///
    /// # Errors
    ///
    /// Protocol-class errors are answered to the sender and leave the actor
    /// running; any other error terminates the actor and notifies its
    /// connected peers.
    async fn dispatch(
        &mut self,
        ctx: &mut ActorContext,
        msg: Payload,
    ) -> Result<Payload, Error>;

    /// Reaction to an exit notice from a connected peer.
    ///
    /// The default policy terminates the actor with the peer's reason.
    /// Supervisors and supervised actors stay up: the former feed their
    /// restart machinery, the latter await a restart.
    async fn on_exit(
        &mut self,
        ctx: &mut ActorContext,
        exit: ExitNotice,
    ) -> Result<(), Error> {
        if ctx.mode() == Mode::Sv || ctx.is_supervised() {
            return Ok(());
        }
        ctx.stop(exit.reason);
        Ok(())
    }

    /// Reaction to child-management control messages.
    async fn on_control(
        &mut self,
        ctx: &mut ActorContext,
        control: Control,
    ) -> Result<(), Error> {
        warn!(
            "Actor {} received a control message but is not a supervisor.",
            ctx.self_link()
        );
        if let Control::Which(reply) = control {
            reply
                .respond(Err(Error::UnexpectedMessage(
                    "not a supervisor".to_owned(),
                )))
                .await;
        }
        Ok(())
    }

    /// Called once when the actor terminates, before exit notices go out.
    async fn on_stop(&mut self, _ctx: &mut ActorContext) {}
}

/// Behavior built from a callable plus captured state.
///
/// The closure is applied to every payload; the state survives between
/// dispatches and dies with the actor. Behaviors that need the actor
/// context or asynchronous work implement [`Behavior`] directly.
pub struct BehaviorFn<S, F> {
    state: S,
    f: F,
}

impl<S, F> BehaviorFn<S, F>
where
    S: Send + 'static,
    F: FnMut(&mut S, Payload) -> Result<Payload, Error> + Send + 'static,
{
    /// Creates a behavior from captured state and a callable.
    pub fn new(state: S, f: F) -> Self {
        BehaviorFn { state, f }
    }
}

#[async_trait]
impl<S, F> Behavior for BehaviorFn<S, F>
where
    S: Send + 'static,
    F: FnMut(&mut S, Payload) -> Result<Payload, Error> + Send + 'static,
{
    async fn dispatch(
        &mut self,
        _ctx: &mut ActorContext,
        msg: Payload,
    ) -> Result<Payload, Error> {
        (self.f)(&mut self.state, msg)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::system::SystemRef;

    #[tokio::test]
    async fn test_behavior_fn_keeps_state() {
        let mut behavior = BehaviorFn::new(0usize, |total, msg: Payload| {
            *total += msg.extract::<usize>().unwrap_or(0);
            Ok(Payload::new(*total))
        });
        let mut ctx = ActorContext::test_context(SystemRef::default());
        let result = behavior
            .dispatch(&mut ctx, Payload::new(2usize))
            .await
            .unwrap();
        assert_eq!(result.extract::<usize>(), Some(2));
        let result = behavior
            .dispatch(&mut ctx, Payload::new(3usize))
            .await
            .unwrap();
        assert_eq!(result.extract::<usize>(), Some(5));
    }
}
