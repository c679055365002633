// Copyright 2024 Antonio Estévez
// SPDX-License-Identifier: Apache-2.0

//! # Actor runner
//!
//! The runner owns one actor: its state, its mailbox receiver and its
//! behavior. It drains the mailbox, handles control envelopes inline,
//! dispatches user payloads to the behavior and, on termination, notifies
//! every connected peer with an exit notice.
//!

use crate::{
    behavior::{Behavior, Control},
    envelope::{
        Conn, ConnKind, Envelope, ExitNotice, ExitReason, Mode, Payload,
        UpdateField,
    },
    error::Error,
    link::Link,
    mailbox::MailboxReceiver,
    system::SystemRef,
};

use tokio::select;
use tokio_util::sync::CancellationToken;

use tracing::{debug, error, warn};

use std::collections::HashMap;

/// The state the runner owns for one actor, passed into every behavior
/// dispatch.
///
/// Only the owning runner mutates an `ActorContext`, and only between
/// message dispatches; behaviors must not retain references to another
/// actor's context. All cross-actor effects go through links.
pub struct ActorContext {
    self_link: Link,
    system: SystemRef,
    mode: Mode,
    name: Option<String>,
    conn: HashMap<Link, ConnKind>,
    result: Option<Payload>,
    exit: Option<ExitReason>,
}

impl ActorContext {
    pub(crate) fn new(
        self_link: Link,
        system: SystemRef,
        mode: Mode,
        name: Option<String>,
        seed: Vec<Conn>,
    ) -> Self {
        let mut conn = HashMap::new();
        for peer in seed {
            conn.insert(peer.link, peer.kind);
        }
        ActorContext {
            self_link,
            system,
            mode,
            name,
            conn,
            result: None,
            exit: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn test_context(system: SystemRef) -> Self {
        ActorContext::new(
            Link::detached(),
            system,
            Mode::Default,
            None,
            Vec::new(),
        )
    }

    /// Link of this actor's own mailbox.
    pub fn self_link(&self) -> &Link {
        &self.self_link
    }

    /// The actor system this actor runs in.
    pub fn system(&self) -> &SystemRef {
        &self.system
    }

    /// Runtime mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Symbolic name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Last value the behavior computed.
    pub fn result(&self) -> Option<&Payload> {
        self.result.as_ref()
    }

    /// Ask the runner to terminate with `reason` once the current dispatch
    /// returns. The first requested reason wins.
    pub fn stop(&mut self, reason: ExitReason) {
        self.exit.get_or_insert(reason);
    }

    /// True if a supervisor is connected.
    pub fn is_supervised(&self) -> bool {
        self.conn.values().any(|kind| *kind == ConnKind::Supervisor)
    }

    /// Link of the connected supervisor, if any.
    pub fn supervisor(&self) -> Option<&Link> {
        self.conn
            .iter()
            .find_map(|(link, kind)| {
                (*kind == ConnKind::Supervisor).then_some(link)
            })
    }

    /// Install a bidirectional monitor between this actor and `peer`.
    pub async fn connect(&mut self, peer: &Link) -> Result<(), Error> {
        self.conn.insert(peer.clone(), ConnKind::Peer);
        peer.send_envelope(Envelope::Connect {
            peer: Conn::peer(self.self_link.clone()),
            remove: false,
        })
        .await
    }

    /// Tear a monitor down on both sides.
    pub async fn disconnect(&mut self, peer: &Link) -> Result<(), Error> {
        self.conn.remove(peer);
        peer.send_envelope(Envelope::Connect {
            peer: Conn::peer(self.self_link.clone()),
            remove: true,
        })
        .await
    }

    pub(crate) fn conn_insert(&mut self, peer: Conn) {
        self.conn.insert(peer.link, peer.kind);
    }

    pub(crate) fn conn_remove(&mut self, link: &Link) {
        self.conn.remove(link);
    }

    fn take_exit(&mut self) -> Option<ExitReason> {
        self.exit.take()
    }
}

/// Actor runner.
pub(crate) struct ActorRunner {
    behavior: Box<dyn Behavior>,
    ctx: ActorContext,
    receiver: MailboxReceiver,
    token: CancellationToken,
}

impl ActorRunner {
    /// Creates a new actor runner.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        behavior: Box<dyn Behavior>,
        link: Link,
        receiver: MailboxReceiver,
        token: CancellationToken,
        system: SystemRef,
        mode: Mode,
        name: Option<String>,
        conn: Vec<Conn>,
    ) -> Self {
        debug!("Creating runner for actor {}.", link);
        let ctx = ActorContext::new(link, system, mode, name, conn);
        ActorRunner {
            behavior,
            ctx,
            receiver,
            token,
        }
    }

    /// Main loop of the actor. Runs until the mailbox closes, the behavior
    /// requests termination or an out-of-band exit arrives.
    pub(crate) async fn run(mut self) {
        debug!("Actor {} is started.", self.ctx.self_link());
        let reason = loop {
            select! {
                envelope = self.receiver.recv() => {
                    match envelope {
                        Some(envelope) => {
                            self.handle(envelope).await;
                            if let Some(reason) = self.ctx.take_exit() {
                                break reason;
                            }
                            if self.token.is_cancelled() {
                                break self
                                    .ctx
                                    .self_link()
                                    .take_exit_reason()
                                    .unwrap_or(ExitReason::Shutdown);
                            }
                        }
                        None => break ExitReason::Normal,
                    }
                }
                _ = self.token.cancelled() => {
                    break self
                        .ctx
                        .self_link()
                        .take_exit_reason()
                        .unwrap_or(ExitReason::Shutdown);
                }
            }
        };
        self.terminate(reason).await;
    }

    async fn handle(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::User(payload) => self.dispatch(payload).await,
            Envelope::Request { reply, payload } => {
                match self.behavior.dispatch(&mut self.ctx, payload).await {
                    Ok(result) => {
                        self.ctx.result = Some(result.clone());
                        reply.respond(Ok(result)).await;
                    }
                    Err(err) if err.is_protocol() => {
                        reply.respond(Err(err)).await;
                    }
                    Err(err) => {
                        reply.respond(Err(err.clone())).await;
                        self.fail(err);
                    }
                }
            }
            Envelope::Response { corr, payload } => {
                // Link-addressed replies are delivered as ordinary input.
                debug!(
                    "Actor {} received response {}.",
                    self.ctx.self_link(),
                    corr
                );
                self.dispatch(payload).await;
            }
            Envelope::Exit {
                from,
                reason,
                info,
                state,
            } => {
                debug!(
                    "Actor {} received exit notice from {}: {}.",
                    self.ctx.self_link(),
                    from,
                    reason
                );
                self.ctx.conn_remove(&from);
                let notice = ExitNotice {
                    from,
                    reason,
                    info,
                    state,
                };
                if let Err(err) =
                    self.behavior.on_exit(&mut self.ctx, notice).await
                {
                    self.fail(err);
                }
            }
            Envelope::Connect { peer, remove } => {
                debug!(
                    "Actor {} {} connection to {}.",
                    self.ctx.self_link(),
                    if remove { "drops" } else { "adds" },
                    peer.link
                );
                if remove {
                    self.ctx.conn_remove(&peer.link);
                } else {
                    self.ctx.conn_insert(peer);
                }
            }
            Envelope::Update(field) => match field {
                UpdateField::Mode(mode) => self.ctx.mode = mode,
                UpdateField::Name(name) => self.ctx.name = Some(name),
                UpdateField::Behavior(behavior) => {
                    debug!(
                        "Actor {} swapped its behavior.",
                        self.ctx.self_link()
                    );
                    self.behavior = behavior;
                }
            },
            Envelope::Delete(link) => {
                self.control(Control::Delete(link)).await
            }
            Envelope::Terminate(link) => {
                self.control(Control::Terminate(link)).await
            }
            Envelope::Which(reply) => {
                self.control(Control::Which(reply)).await
            }
        }
    }

    async fn dispatch(&mut self, payload: Payload) {
        match self.behavior.dispatch(&mut self.ctx, payload).await {
            Ok(result) => self.ctx.result = Some(result),
            Err(err) if err.is_protocol() => {
                warn!(
                    "Actor {} rejected a message: {}",
                    self.ctx.self_link(),
                    err
                );
            }
            Err(err) => self.fail(err),
        }
    }

    async fn control(&mut self, control: Control) {
        match self.behavior.on_control(&mut self.ctx, control).await {
            Ok(()) => {}
            Err(err) if err.is_protocol() => {
                warn!(
                    "Actor {} rejected a control message: {}",
                    self.ctx.self_link(),
                    err
                );
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail(&mut self, err: Error) {
        error!(
            "Actor {} behavior failed: {}",
            self.ctx.self_link(),
            err
        );
        self.ctx.exit.get_or_insert(ExitReason::failure(err));
    }

    /// Terminate the actor: run the stop hook, drop the registration and
    /// notify every connected peer, then close the mailbox.
    async fn terminate(&mut self, reason: ExitReason) {
        debug!(
            "Actor {} is terminating: {}.",
            self.ctx.self_link(),
            reason
        );
        self.behavior.on_stop(&mut self.ctx).await;
        if let Some(name) = self.ctx.name.clone() {
            self.ctx.system.unregister(&name).await;
        }
        let info = match &reason {
            ExitReason::Failure(err) => err.to_string(),
            _ => String::new(),
        };
        let state = self.ctx.result.clone();
        let from = self.ctx.self_link().clone();
        let peers: Vec<Link> = self.ctx.conn.drain().map(|(link, _)| link).collect();
        for peer in peers {
            let envelope = Envelope::Exit {
                from: from.clone(),
                reason: reason.clone(),
                info: info.clone(),
                state: state.clone(),
            };
            if let Err(err) = peer.send_envelope(envelope).await {
                debug!("Exit notice for {} undeliverable: {}", peer, err);
            }
        }
        self.receiver.close();
        debug!("Actor {} is terminated.", from);
    }
}
