// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Error types
//!
//! This module defines all error conditions the runtime can surface:
//! delivery errors returned to senders, behavior failures that turn into
//! exit notices, timeouts raised to the caller that set the deadline, and
//! policy violations rejected synchronously at the API boundary.
//!

use crate::envelope::ExitReason;

use serde::{Deserialize, Serialize};

use thiserror::Error;

/// Errors produced by the actor runtime.
///
/// The variants fall into four classes with different propagation rules:
///
/// # Error Categories
///
/// ## Delivery errors
/// - [`Error::ClosedMailbox`], [`Error::MailboxFull`],
///   [`Error::RemoteUnavailable`] — returned to the sender and never
///   affecting the target actor.
///
/// ## Behavior failures
/// - [`Error::Behavior`], [`Error::Task`], or any error a behavior returns
///   from dispatch — terminate the failing actor and become an exit notice
///   to every connected peer.
///
/// ## Timeouts
/// - [`Error::Timeout`], [`Error::NoReply`] — propagate only to the caller
///   that set the deadline and leave mailbox contents untouched.
///
/// ## Policy violations
/// - [`Error::Validation`], [`Error::NameTaken`],
///   [`Error::UnexpectedMessage`], [`Error::UnexpectedResponse`] — raised
///   synchronously to the caller of the API function; a target actor that
///   rejects a message this way keeps running.
///
/// # Examples
///
/// Handling delivery outcomes per class:
///
/// ```ignore
/// use actor::{Error, Payload};
///
/// match link.send(Payload::new(job.clone())).await {
///     Ok(()) => {}
///     Err(Error::MailboxFull) => backlog.push_back(job),
///     Err(Error::ClosedMailbox) => supervisor.terminate_child(&link).await?,
///     Err(error) => return Err(error),
/// }
/// ```
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Error {
    /// The target mailbox is closed: the actor terminated, or the link never
    /// had a mailbox behind it.
    ///
    /// A dangling link is not an error in itself; only sending through it
    /// is. A supervised child's link starts accepting messages again as
    /// soon as its supervisor rebinds it.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::{Error, Payload};
    ///
    /// link.exit(ExitReason::Shutdown).await?;
    /// // ...once the runner has drained:
    /// assert_eq!(link.send(Payload::unit()).await, Err(Error::ClosedMailbox));
    /// ```
    #[error("mailbox is closed")]
    ClosedMailbox,

    /// The target mailbox is full and the sender asked for fail-fast
    /// delivery.
    ///
    /// Only produced under [`SendPolicy::FailFast`](crate::SendPolicy) or
    /// [`Link::try_send`](crate::Link::try_send); blocking sends surface
    /// [`Error::Timeout`] instead when the deadline expires first.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::{Error, Payload};
    ///
    /// if let Err(Error::MailboxFull) = link.try_send(Payload::new(sample)) {
    ///     metrics.dropped += 1; // shed load instead of waiting
    /// }
    /// ```
    #[error("mailbox is full")]
    MailboxFull,

    /// A blocking operation reached its deadline.
    ///
    /// Raised by `send` under the blocking policy, by
    /// [`Link::request`](crate::Link::request) and by the
    /// [`Inbox`](crate::Inbox) receive calls. Expiry never disturbs the
    /// mailbox: queued envelopes stay queued.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::{Error, Payload};
    /// use std::time::Duration;
    ///
    /// let answer = link
    ///     .request(Payload::new(query), Some(Duration::from_millis(250)))
    ///     .await;
    /// if answer == Err(Error::Timeout) {
    ///     // the actor may still reply later; the slot is simply dropped
    /// }
    /// ```
    #[error("deadline expired")]
    Timeout,

    /// The requested actor terminated before producing a response.
    ///
    /// Distinguishable from [`Error::Timeout`]: the caller's reply slot was
    /// dropped because the target went down, not because the caller gave
    /// up.
    #[error("actor exited before replying")]
    NoReply,

    /// The remote transport collaborator rejected or cannot carry the
    /// delivery.
    #[error("remote transport unavailable: {0}")]
    RemoteUnavailable(String),

    /// A failure raised inside a behavior dispatch.
    ///
    /// This is the error behaviors return to crash on purpose: the runner
    /// converts it into `Exit(self, failure, ...)` for every connected
    /// peer, and a supervisor applies its restart policy to it.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::{BehaviorFn, Error, Payload};
    ///
    /// let fragile = BehaviorFn::new((), |_, msg: Payload| {
    ///     match msg.extract::<Command>() {
    ///         Some(command) => run(command),
    ///         None => Err(Error::Behavior("corrupt command".to_owned())),
    ///     }
    /// });
    /// ```
    #[error("behavior failed: {0}")]
    Behavior(String),

    /// A supervised one-shot task failed or was cancelled.
    #[error("task failed: {0}")]
    Task(String),

    /// An exit notice surfaced to an inbox receiver.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::Error;
    ///
    /// match inbox.receive(None).await {
    ///     Ok(payload) => handle(payload),
    ///     Err(Error::PeerExit(reason)) => log_exit(reason),
    ///     Err(error) => return Err(error),
    /// }
    /// ```
    #[error("peer exited: {0}")]
    PeerExit(ExitReason),

    /// The receiver cannot make sense of the message.
    ///
    /// Answered to the sender without failing the target; a supervisor
    /// rejects every payload that is not a supervision command this way.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// A response carried a payload of the wrong type.
    #[error("unexpected response from {0}")]
    UnexpectedResponse(String),

    /// A configuration value or symbolic tag failed validation.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::{Error, Strategy};
    ///
    /// let strategy: Result<Strategy, Error> = "one_for_some".parse();
    /// assert!(matches!(strategy, Err(Error::Validation(_))));
    /// ```
    #[error("validation failed: {0}")]
    Validation(String),

    /// The name is already registered to another link.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::Error;
    ///
    /// system.register("gatekeeper", first).await?;
    /// assert_eq!(
    ///     system.register("gatekeeper", second).await,
    ///     Err(Error::NameTaken("gatekeeper".to_owned()))
    /// );
    /// ```
    #[error("name '{0}' is already registered")]
    NameTaken(String),
}

impl Error {
    /// Protocol-class errors are answered to the caller without failing the
    /// target actor.
    ///
    /// The runner consults this predicate for every dispatch error: a
    /// protocol error is replied to the requester (or logged for one-way
    /// sends) and the actor keeps running; anything else terminates the
    /// actor and notifies its connected peers.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::Error;
    ///
    /// assert!(Error::Validation("bad".to_owned()).is_protocol());
    /// assert!(!Error::Behavior("boom".to_owned()).is_protocol());
    /// ```
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::UnexpectedMessage(_)
                | Error::UnexpectedResponse(_)
                | Error::Validation(_)
                | Error::NameTaken(_)
        )
    }
}
