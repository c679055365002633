// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Link
//!
//! The `link` module provides the `Link` type, the addressable handle to an
//! actor mailbox. A link is a two-level handle: an immutable identity used
//! for equality and hashing, and a transport slot a supervisor can rebind to
//! a fresh mailbox when it restarts the actor, so outstanding links keep
//! working across restarts.
//!

use crate::{
    envelope::{Conn, Envelope, ExitReason, Payload, ReplyTo, UpdateField},
    error::Error,
    mailbox::MailboxSender,
};

use async_trait::async_trait;

use serde::{Deserialize, Serialize};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tracing::{debug, error};

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

/// Host identifier of this process.
pub const LOCAL_HOST: u64 = 0;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);
static NEXT_CORR: AtomicU64 = AtomicU64::new(1);

/// Fresh correlation identity for request/response pairing.
pub(crate) fn next_corr() -> u64 {
    NEXT_CORR.fetch_add(1, Ordering::Relaxed)
}

/// Identity of an actor mailbox, stable across restarts of the actor behind
/// it. Two links are equal iff they carry the same identity, regardless of
/// the transport that currently backs them.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct LinkId {
    /// Owning host; `LOCAL_HOST` for this process.
    pub host: u64,
    /// Sequence number, unique within the host.
    pub seq: u64,
}

impl LinkId {
    pub(crate) fn next_local() -> Self {
        LinkId {
            host: LOCAL_HOST,
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.host, self.seq)
    }
}

/// What `send` does when the target mailbox is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendPolicy {
    /// Wait for free capacity, giving up after the deadline.
    Block {
        /// How long the sender may wait.
        deadline: Duration,
    },
    /// Fail immediately with [`Error::MailboxFull`].
    FailFast,
}

impl Default for SendPolicy {
    fn default() -> Self {
        SendPolicy::Block {
            deadline: Duration::from_secs(5),
        }
    }
}

/// Transport contract for mailboxes owned by another host.
///
/// The collaborator implementing this trait is responsible for copying
/// mutable payloads on send and for resolving a forwarded local link to a
/// remote link carrying the same [`LinkId`].
#[async_trait]
pub trait RemoteTransport: fmt::Debug + Send + Sync + 'static {
    /// Identity of the mailbox this transport dereferences to.
    fn id(&self) -> LinkId;

    /// Deliver an envelope to the remote mailbox.
    async fn deliver(&self, envelope: Envelope) -> Result<(), Error>;

    /// Deliver an out-of-band termination request.
    async fn exit(&self, reason: ExitReason) -> Result<(), Error>;
}

/// The rebindable transport of a local link.
#[derive(Clone)]
pub(crate) struct Slot {
    pub(crate) sender: MailboxSender,
    pub(crate) token: CancellationToken,
}

enum Transport {
    Local {
        slot: RwLock<Slot>,
        policy: SendPolicy,
        exit_reason: Mutex<Option<ExitReason>>,
    },
    Remote(Box<dyn RemoteTransport>),
    /// Identity without a mailbox, used for task children. Sends fail with
    /// [`Error::ClosedMailbox`].
    Detached,
}

struct LinkInner {
    id: LinkId,
    transport: Transport,
}

/// Addressable handle to an actor mailbox.
///
/// Links are cheap to clone and share; equality and hashing identify the
/// actor. A dangling link sends into a closed mailbox and surfaces
/// [`Error::ClosedMailbox`].
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

impl Link {
    pub(crate) fn local(
        sender: MailboxSender,
        token: CancellationToken,
        policy: SendPolicy,
    ) -> Self {
        Link {
            inner: Arc::new(LinkInner {
                id: LinkId::next_local(),
                transport: Transport::Local {
                    slot: RwLock::new(Slot { sender, token }),
                    policy,
                    exit_reason: Mutex::new(None),
                },
            }),
        }
    }

    /// Identity without a mailbox, used for task children.
    pub(crate) fn detached() -> Self {
        Link {
            inner: Arc::new(LinkInner {
                id: LinkId::next_local(),
                transport: Transport::Detached,
            }),
        }
    }

    /// Wraps a remote transport as a link.
    pub fn remote(transport: Box<dyn RemoteTransport>) -> Self {
        Link {
            inner: Arc::new(LinkInner {
                id: transport.id(),
                transport: Transport::Remote(transport),
            }),
        }
    }

    /// Identity of the mailbox this link addresses.
    pub fn id(&self) -> LinkId {
        self.inner.id
    }

    /// True if the mailbox lives in this process.
    pub fn is_local(&self) -> bool {
        !matches!(self.inner.transport, Transport::Remote(_))
    }

    /// True if the mailbox no longer accepts messages. Remote links cannot
    /// be probed and report open.
    pub fn is_closed(&self) -> bool {
        match &self.inner.transport {
            Transport::Local { .. } => self
                .slot()
                .map(|(slot, _)| slot.sender.is_closed())
                .unwrap_or(true),
            Transport::Remote(_) => false,
            Transport::Detached => true,
        }
    }

    fn slot(&self) -> Option<(Slot, SendPolicy)> {
        match &self.inner.transport {
            Transport::Local { slot, policy, .. } => {
                let slot = match slot.read() {
                    Ok(guard) => guard.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                };
                Some((slot, *policy))
            }
            _ => None,
        }
    }

    /// Buffered delivery of a user payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClosedMailbox`] when the actor terminated,
    /// [`Error::Timeout`] when a blocking send exceeded its deadline and
    /// [`Error::MailboxFull`] under fail-fast policy.
    pub async fn send(&self, payload: Payload) -> Result<(), Error> {
        self.send_envelope(Envelope::User(payload)).await
    }

    /// Fail-fast delivery of a user payload, regardless of the mailbox
    /// policy. Only meaningful for local links.
    pub fn try_send(&self, payload: Payload) -> Result<(), Error> {
        match &self.inner.transport {
            Transport::Local { .. } => {
                let (slot, _) = self.slot().ok_or(Error::ClosedMailbox)?;
                slot.sender
                    .try_send(Envelope::User(payload))
                    .map_err(|error| match error {
                        mpsc::error::TrySendError::Full(_) => Error::MailboxFull,
                        mpsc::error::TrySendError::Closed(_) => {
                            Error::ClosedMailbox
                        }
                    })
            }
            Transport::Remote(_) => Err(Error::RemoteUnavailable(
                "fail-fast delivery needs a local link".to_owned(),
            )),
            Transport::Detached => Err(Error::ClosedMailbox),
        }
    }

    /// Synchronous request: sends the payload with a single-slot reply inbox
    /// and blocks the caller until the response, the actor's termination or
    /// the deadline.
    ///
    /// # Errors
    ///
    /// Delivery errors from the send itself, [`Error::Timeout`] on deadline
    /// expiry, [`Error::NoReply`] when the actor terminated first, or the
    /// error the behavior rejected the request with.
    pub async fn request(
        &self,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> Result<Payload, Error> {
        let (sender, receiver) = oneshot::channel();
        self.send_envelope(Envelope::Request {
            reply: ReplyTo::Slot(sender),
            payload,
        })
        .await?;
        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, receiver)
                .await
                .map_err(|_| Error::Timeout)?,
            None => receiver.await,
        };
        response.map_err(|_| Error::NoReply)?
    }

    /// Out-of-band termination request. The target completes the current
    /// behavior invocation, then shuts down with `reason` and notifies its
    /// connected peers.
    pub async fn exit(&self, reason: ExitReason) -> Result<(), Error> {
        match &self.inner.transport {
            Transport::Local {
                slot, exit_reason, ..
            } => {
                debug!("Requesting exit of {} with reason {}.", self, reason);
                {
                    let mut stored = match exit_reason.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    *stored = Some(reason);
                }
                let token = match slot.read() {
                    Ok(guard) => guard.token.clone(),
                    Err(poisoned) => poisoned.into_inner().token.clone(),
                };
                token.cancel();
                Ok(())
            }
            Transport::Remote(transport) => transport.exit(reason).await,
            Transport::Detached => Err(Error::ClosedMailbox),
        }
    }

    /// Install this link's actor as a monitor of `peer`: `peer` will notify
    /// this mailbox when it terminates.
    pub async fn monitor(&self, peer: &Link) -> Result<(), Error> {
        peer.send_envelope(Envelope::Connect {
            peer: Conn::peer(self.clone()),
            remove: false,
        })
        .await
    }

    /// Tear a monitor installed with [`Link::monitor`] down.
    pub async fn demonitor(&self, peer: &Link) -> Result<(), Error> {
        peer.send_envelope(Envelope::Connect {
            peer: Conn::peer(self.clone()),
            remove: true,
        })
        .await
    }

    /// Mutate one of the target's permitted state fields.
    pub async fn update(&self, field: UpdateField) -> Result<(), Error> {
        self.send_envelope(Envelope::Update(field)).await
    }

    pub(crate) async fn send_envelope(
        &self,
        envelope: Envelope,
    ) -> Result<(), Error> {
        match &self.inner.transport {
            Transport::Local { .. } => {
                let (slot, policy) = self.slot().ok_or(Error::ClosedMailbox)?;
                match policy {
                    SendPolicy::Block { deadline } => {
                        match tokio::time::timeout(
                            deadline,
                            slot.sender.send(envelope),
                        )
                        .await
                        {
                            Ok(Ok(())) => Ok(()),
                            Ok(Err(_)) => Err(Error::ClosedMailbox),
                            Err(_) => Err(Error::Timeout),
                        }
                    }
                    SendPolicy::FailFast => {
                        slot.sender.try_send(envelope).map_err(|error| {
                            match error {
                                mpsc::error::TrySendError::Full(_) => {
                                    Error::MailboxFull
                                }
                                mpsc::error::TrySendError::Closed(_) => {
                                    Error::ClosedMailbox
                                }
                            }
                        })
                    }
                }
            }
            Transport::Remote(transport) => transport.deliver(envelope).await,
            Transport::Detached => Err(Error::ClosedMailbox),
        }
    }

    /// Rebind the transport slot to a fresh mailbox, preserving identity.
    pub(crate) fn rebind(&self, fresh: Slot) {
        match &self.inner.transport {
            Transport::Local {
                slot, exit_reason, ..
            } => {
                {
                    let mut stored = match exit_reason.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    *stored = None;
                }
                let mut guard = match slot.write() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *guard = fresh;
                debug!("Rebound link {} to a fresh mailbox.", self);
            }
            _ => error!("Link {} has no rebindable transport.", self),
        }
    }

    /// The reason an `exit` call stored for the runner.
    pub(crate) fn take_exit_reason(&self) -> Option<ExitReason> {
        match &self.inner.transport {
            Transport::Local { exit_reason, .. } => {
                let mut stored = match exit_reason.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                stored.take()
            }
            _ => None,
        }
    }

    /// Poll until the mailbox closes, up to `limit`. True if it closed.
    pub(crate) async fn wait_closed(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while !self.is_closed() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.inner.id)
            .field("local", &self.is_local())
            .finish()
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.inner.id)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::mailbox::mailbox;

    #[test]
    fn test_link_identity() {
        let (sender, _receiver) = mailbox(8);
        let token = CancellationToken::new();
        let link = Link::local(sender, token, SendPolicy::default());
        let clone = link.clone();
        assert_eq!(link, clone);
        assert_eq!(link.id(), clone.id());
        assert!(link.is_local());

        let other = Link::detached();
        assert_ne!(link, other);
    }

    #[tokio::test]
    async fn test_detached_link_is_dangling() {
        let link = Link::detached();
        assert!(link.is_closed());
        let result = link.send(Payload::unit()).await;
        assert_eq!(result, Err(Error::ClosedMailbox));
    }

    #[tokio::test]
    async fn test_rebind_reopens_the_same_identity() {
        let (sender, receiver) = mailbox(8);
        let token = CancellationToken::new();
        let link = Link::local(sender, token, SendPolicy::default());
        drop(receiver);
        assert!(link.is_closed());

        let (sender, _receiver) = mailbox(8);
        let id = link.id();
        link.rebind(Slot {
            sender,
            token: CancellationToken::new(),
        });
        assert!(!link.is_closed());
        assert_eq!(link.id(), id);
    }
}
