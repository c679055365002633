// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Core library for the Warden framework.
//! Provides an actor runtime with hierarchical supervision: actors with
//! private mailboxes and swappable behaviors, links that stay valid across
//! restarts, and supervisors that apply restart strategies under a bounded
//! restart intensity.

pub use actor::{
    ActorContext, ActorSystem, Behavior, BehaviorFn, Error as ActorError,
    ExitReason, Inbox, Link, Mode, Payload, RestartPolicy, SpawnOptions,
    Start, Strategy, SupervisorConfig, SupervisorRef, SystemRef, TaskStart,
};
