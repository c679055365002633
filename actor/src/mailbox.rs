// Copyright 2024 Antonio Estévez
// SPDX-License-Identifier: Apache-2.0

//! # Mailbox
//!
//! Bounded FIFO channels backing actors, and the `Inbox` type that gives
//! non-actor callers a mailbox of their own for the asynchronous
//! request/response pattern.
//!

use crate::{
    envelope::{Envelope, ExitNotice, ExitReason, Payload, ReplyTo},
    error::Error,
    link::{next_corr, Link, SendPolicy},
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tracing::debug;

use std::{collections::VecDeque, time::Duration};

/// Default mailbox capacity.
pub const DEFAULT_MAILBOX_SIZE: usize = 32;

/// Mailbox sender.
pub(crate) type MailboxSender = mpsc::Sender<Envelope>;

/// Mailbox receiver.
pub(crate) type MailboxReceiver = mpsc::Receiver<Envelope>;

/// Mailbox factory.
pub(crate) fn mailbox(capacity: usize) -> (MailboxSender, MailboxReceiver) {
    mpsc::channel(capacity)
}

/// A mailbox owned by a non-actor caller.
///
/// An `Inbox` pairs a link with the receiving half of its mailbox, so host
/// code can be the target of responses and exit notices without running an
/// actor. Envelopes that do not match what a call is waiting for are
/// requeued to an internal pending tail and handed out by later calls.
pub struct Inbox {
    link: Link,
    receiver: MailboxReceiver,
    token: CancellationToken,
    pending: VecDeque<Envelope>,
}

impl Inbox {
    /// Creates an inbox with the given mailbox capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mailbox(capacity.max(1));
        let token = CancellationToken::new();
        let link = Link::local(sender, token.clone(), SendPolicy::default());
        Inbox {
            link,
            receiver,
            token,
            pending: VecDeque::new(),
        }
    }

    /// Link other actors can send and reply to.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Next user or response payload.
    ///
    /// Exit notices surface as [`Error::PeerExit`]; other control envelopes
    /// are discarded.
    pub async fn receive(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Payload, Error> {
        let deadline = timeout.map(|limit| tokio::time::Instant::now() + limit);
        loop {
            let envelope = match self.pending.pop_front() {
                Some(envelope) => envelope,
                None => self.next_envelope(deadline).await?,
            };
            match envelope {
                Envelope::User(payload) => return Ok(payload),
                Envelope::Response { payload, .. } => return Ok(payload),
                Envelope::Exit { reason, .. } => {
                    return Err(Error::PeerExit(reason))
                }
                other => {
                    debug!("Inbox {} discards {:?}.", self.link, other)
                }
            }
        }
    }

    /// Send a request whose response comes back to this inbox, paired by a
    /// fresh correlation id. Await it with [`Inbox::receive_response`].
    pub async fn send_request(
        &self,
        target: &Link,
        payload: Payload,
    ) -> Result<u64, Error> {
        let corr = next_corr();
        target
            .send_envelope(Envelope::Request {
                reply: ReplyTo::Link {
                    link: self.link.clone(),
                    corr,
                },
                payload,
            })
            .await?;
        Ok(corr)
    }

    /// Await the response matching `corr`. Non-matching envelopes are
    /// requeued to the pending tail; an exit notice ends the wait.
    pub async fn receive_response(
        &mut self,
        corr: u64,
        timeout: Option<Duration>,
    ) -> Result<Payload, Error> {
        if let Some(index) = self.pending.iter().position(|envelope| {
            matches!(envelope, Envelope::Response { corr: c, .. } if *c == corr)
        }) {
            if let Some(Envelope::Response { payload, .. }) =
                self.pending.remove(index)
            {
                return Ok(payload);
            }
        }
        let deadline = timeout.map(|limit| tokio::time::Instant::now() + limit);
        loop {
            let envelope = self.next_envelope(deadline).await?;
            match envelope {
                Envelope::Response { corr: c, payload } if c == corr => {
                    return Ok(payload)
                }
                Envelope::Exit { reason, .. } => {
                    return Err(Error::PeerExit(reason))
                }
                other => self.pending.push_back(other),
            }
        }
    }

    /// Await the next exit notice, buffering everything else.
    pub async fn next_exit(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<ExitNotice, Error> {
        if let Some(index) = self
            .pending
            .iter()
            .position(|envelope| matches!(envelope, Envelope::Exit { .. }))
        {
            if let Some(Envelope::Exit {
                from,
                reason,
                info,
                state,
            }) = self.pending.remove(index)
            {
                return Ok(ExitNotice {
                    from,
                    reason,
                    info,
                    state,
                });
            }
        }
        let deadline = timeout.map(|limit| tokio::time::Instant::now() + limit);
        loop {
            match self.next_envelope(deadline).await? {
                Envelope::Exit {
                    from,
                    reason,
                    info,
                    state,
                } => {
                    return Ok(ExitNotice {
                        from,
                        reason,
                        info,
                        state,
                    })
                }
                other => self.pending.push_back(other),
            }
        }
    }

    async fn next_envelope(
        &mut self,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<Envelope, Error> {
        let receiver = &mut self.receiver;
        let token = &self.token;
        let link = &self.link;
        let recv = async {
            tokio::select! {
                envelope = receiver.recv() => {
                    envelope.ok_or(Error::ClosedMailbox)
                }
                _ = token.cancelled() => {
                    let reason = link
                        .take_exit_reason()
                        .unwrap_or(ExitReason::Shutdown);
                    Err(Error::PeerExit(reason))
                }
            }
        };
        match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, recv).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout),
                }
            }
            None => recv.await,
        }
    }
}
