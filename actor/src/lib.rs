// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor model with hierarchical supervision
//!
//! This crate provides a simplified actor model implementation. It is based on the
//! [actor model](https://en.wikipedia.org/wiki/Actor_model) as described by Carl Hewitt in 1973.
//!
//! An actor is an independently scheduled unit of work with a private, bounded
//! mailbox, a behavior and optional local state. In response to a message an
//! actor can:
//!
//! - make local decisions
//! - update its private state
//! - create more actors
//! - send more messages
//! - swap the behavior applied to the next message
//!
//! Actors may modify their own private state, but can only affect each other
//! indirectly through messaging (no actor can access the state of another actor
//! directly). On top of the messaging core the crate offers hierarchical
//! supervision: supervisor actors own child records and react to exit notices
//! with `one_for_one`, `one_for_all` or `rest_for_one` restart strategies,
//! bounded by a sliding restart-intensity window.
//!

mod behavior;
mod envelope;
mod error;
mod link;
mod mailbox;
mod runner;
mod supervision;
mod system;
mod task;

pub use behavior::{Behavior, BehaviorFn, Control};
pub use envelope::{
    Conn, ConnKind, Envelope, ExitNotice, ExitReason, Mode, Payload, ReplyTo,
    UpdateField,
};
pub use error::Error;
pub use link::{Link, LinkId, RemoteTransport, SendPolicy, LOCAL_HOST};
pub use mailbox::{Inbox, DEFAULT_MAILBOX_SIZE};
pub use runner::ActorContext;
pub use supervision::{
    ChildCounts, ChildInfo, ChildKind, RestartPolicy, Start, Strategy,
    Supervisor, SupervisorConfig, SupervisorRef,
};
pub use system::{ActorSystem, SpawnOptions, SystemRef};
pub use task::{TaskHandle, TaskStart, DEFAULT_TASK_POLL, DEFAULT_TASK_TIMEOUT};
