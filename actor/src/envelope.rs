// Copyright 2024 Antonio Estévez
// SPDX-License-Identifier: Apache-2.0

//! # Message envelope
//!
//! The `envelope` module provides the tagged variants that travel through a
//! mailbox: user payloads, request/response pairs, exit notices and the
//! control messages the runner handles before user dispatch.
//!

use crate::{behavior::Behavior, error::Error, link::Link};

use serde::{Deserialize, Serialize};

use tokio::sync::oneshot;

use tracing::debug;

use std::{any::Any, fmt, sync::Arc};

/// Dynamically typed message payload.
///
/// Payloads are cheap to clone and share; local delivery passes the same
/// value by reference counting, remote transports copy on send. Use
/// [`Payload::downcast_ref`] or [`Payload::extract`] to get the value back.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    tag: &'static str,
}

impl Payload {
    /// Wraps a value as a payload.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Payload {
            value: Arc::new(value),
            tag: std::any::type_name::<T>(),
        }
    }

    /// The empty payload.
    pub fn unit() -> Self {
        Payload::new(())
    }

    /// True if the payload holds a `T`.
    pub fn is<T: Send + Sync + 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Borrows the payload as a `T`.
    pub fn downcast_ref<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    /// Clones the payload out as a `T`.
    pub fn extract<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }

    /// Type name of the wrapped value, for diagnostics.
    pub fn type_tag(&self) -> &'static str {
        self.tag
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({})", self.tag)
    }
}

/// Why an actor terminated. `Normal`, `Shutdown` and `TimedOut` are clean
/// reasons; a transient child is not restarted after them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The behavior finished on its own terms.
    Normal,
    /// A deliberate termination request.
    Shutdown,
    /// A monitored task reached its deadline.
    TimedOut,
    /// Abnormal termination carrying the failure.
    Failure(Box<Error>),
}

impl ExitReason {
    /// Wraps a failure as an exit reason.
    pub fn failure(error: Error) -> Self {
        ExitReason::Failure(Box::new(error))
    }

    /// Clean reasons do not restart a transient child.
    pub fn is_clean(&self) -> bool {
        !matches!(self, ExitReason::Failure(_))
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::TimedOut => write!(f, "timed_out"),
            ExitReason::Failure(error) => write!(f, "failure: {}", error),
        }
    }
}

/// Runtime mode of an actor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Plain actor.
    #[default]
    Default,
    /// Supervisor: exit notices from peers feed the restart machinery
    /// instead of terminating the actor.
    Sv,
}

/// How a connection entry behaves when exits propagate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnKind {
    /// Bidirectional monitor.
    Peer,
    /// The parent supervisor. An actor with a supervisor connection does not
    /// self-terminate on peer exits; it reports its own.
    Supervisor,
}

/// A peer to notify when the actor terminates.
#[derive(Clone, Debug, PartialEq)]
pub struct Conn {
    /// The peer's link.
    pub link: Link,
    /// Role of the connection.
    pub kind: ConnKind,
}

impl Conn {
    /// Monitor connection.
    pub fn peer(link: Link) -> Self {
        Conn {
            link,
            kind: ConnKind::Peer,
        }
    }

    /// Parent supervisor connection.
    pub fn supervisor(link: Link) -> Self {
        Conn {
            link,
            kind: ConnKind::Supervisor,
        }
    }
}

/// Where the outcome of a `Request` goes.
pub enum ReplyTo {
    /// Single-slot reply inbox of a caller blocked in `request`.
    Slot(oneshot::Sender<Result<Payload, Error>>),
    /// Mailbox of an asynchronous caller, paired by correlation id.
    Link {
        /// Link of the caller's mailbox.
        link: Link,
        /// Correlation identity carried back in the `Response`.
        corr: u64,
    },
}

impl ReplyTo {
    /// Deliver the outcome of a dispatched request. Slot replies carry
    /// errors too; link replies only carry successful responses, failures
    /// reach the caller as exit notices or timeouts.
    pub(crate) async fn respond(self, result: Result<Payload, Error>) {
        match self {
            ReplyTo::Slot(slot) => {
                if slot.send(result).is_err() {
                    debug!("Requester dropped the reply slot.");
                }
            }
            ReplyTo::Link { link, corr } => match result {
                Ok(payload) => {
                    if let Err(error) = link
                        .send_envelope(Envelope::Response { corr, payload })
                        .await
                    {
                        debug!(
                            "Response {} to {} undeliverable: {}",
                            corr, link, error
                        );
                    }
                }
                Err(error) => {
                    debug!("Request {} from {} failed: {}", corr, link, error)
                }
            },
        }
    }
}

impl fmt::Debug for ReplyTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyTo::Slot(_) => write!(f, "ReplyTo::Slot"),
            ReplyTo::Link { link, corr } => {
                write!(f, "ReplyTo::Link({}, {})", link, corr)
            }
        }
    }
}

/// State fields a peer may update through an `Update` envelope.
pub enum UpdateField {
    /// Switch the runtime mode.
    Mode(Mode),
    /// Rename the actor. Registration stays explicit.
    Name(String),
    /// Swap the behavior applied to subsequent messages.
    Behavior(Box<dyn Behavior>),
}

impl fmt::Debug for UpdateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateField::Mode(mode) => write!(f, "Update::Mode({:?})", mode),
            UpdateField::Name(name) => write!(f, "Update::Name({})", name),
            UpdateField::Behavior(_) => write!(f, "Update::Behavior"),
        }
    }
}

/// An exit notice as surfaced to behavior hooks and inbox callers.
#[derive(Clone, Debug)]
pub struct ExitNotice {
    /// Link of the terminated peer.
    pub from: Link,
    /// Why it terminated.
    pub reason: ExitReason,
    /// Free-form diagnostic, usually the failure message.
    pub info: String,
    /// The peer's last computed result, if any.
    pub state: Option<Payload>,
}

/// A message as it travels through a mailbox.
pub enum Envelope {
    /// User payload dispatched to the behavior.
    User(Payload),
    /// User payload whose dispatch result is sent back.
    Request {
        /// Reply destination.
        reply: ReplyTo,
        /// The request payload.
        payload: Payload,
    },
    /// Response to a link-addressed request.
    Response {
        /// Correlation identity of the request.
        corr: u64,
        /// The dispatch result.
        payload: Payload,
    },
    /// Termination notice from a connected peer.
    Exit {
        /// Link of the terminated peer.
        from: Link,
        /// Why it terminated.
        reason: ExitReason,
        /// Diagnostic information.
        info: String,
        /// The peer's captured state.
        state: Option<Payload>,
    },
    /// Add or remove a connection entry.
    Connect {
        /// The peer to connect.
        peer: Conn,
        /// Remove instead of add.
        remove: bool,
    },
    /// Mutate a permitted state field.
    Update(UpdateField),
    /// Supervisor: remove the child record without terminating it.
    Delete(Link),
    /// Supervisor: remove the child record and shut the child down.
    Terminate(Link),
    /// Supervisor: report the current child records.
    Which(ReplyTo),
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::User(payload) => write!(f, "User({:?})", payload),
            Envelope::Request { payload, .. } => {
                write!(f, "Request({:?})", payload)
            }
            Envelope::Response { corr, payload } => {
                write!(f, "Response({}, {:?})", corr, payload)
            }
            Envelope::Exit { from, reason, .. } => {
                write!(f, "Exit({}, {})", from, reason)
            }
            Envelope::Connect { peer, remove } => {
                write!(f, "Connect({}, remove: {})", peer.link, remove)
            }
            Envelope::Update(field) => write!(f, "{:?}", field),
            Envelope::Delete(link) => write!(f, "Delete({})", link),
            Envelope::Terminate(link) => write!(f, "Terminate({})", link),
            Envelope::Which(_) => write!(f, "Which"),
        }
    }
}
