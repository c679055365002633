// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor system
//!
//! The `system` module provides the `ActorSystem` type and its shared
//! `SystemRef`: the spawn entry points and the name service mapping
//! symbolic names to links.
//!

use crate::{
    behavior::Behavior,
    envelope::{Conn, Mode},
    error::Error,
    link::{Link, SendPolicy, Slot},
    mailbox::{mailbox, DEFAULT_MAILBOX_SIZE},
    runner::ActorRunner,
    supervision::{Supervisor, SupervisorConfig, SupervisorRef},
};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use tracing::{debug, error};

use std::{collections::HashMap, sync::Arc};

/// Options recognised by `spawn`.
#[derive(Clone, Debug)]
pub struct SpawnOptions {
    /// Ask the remote transport collaborator for a remote mailbox.
    pub remote: bool,
    /// Register the link under this name at spawn; the registration is
    /// dropped when the actor terminates.
    pub name: Option<String>,
    /// Runtime mode of the actor.
    pub mode: Mode,
    /// Mailbox capacity.
    pub mailbox_size: usize,
    /// Behavior of `send` on a full mailbox.
    pub send_policy: SendPolicy,
    pub(crate) conn: Vec<Conn>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        SpawnOptions {
            remote: false,
            name: None,
            mode: Mode::Default,
            mailbox_size: DEFAULT_MAILBOX_SIZE,
            send_policy: SendPolicy::default(),
            conn: Vec::new(),
        }
    }
}

impl SpawnOptions {
    /// Sets the symbolic name to register at spawn.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the runtime mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the mailbox capacity.
    pub fn with_mailbox_size(mut self, size: usize) -> Self {
        self.mailbox_size = size;
        self
    }

    /// Sets the full-mailbox policy.
    pub fn with_send_policy(mut self, policy: SendPolicy) -> Self {
        self.send_policy = policy;
        self
    }

    /// Requests a remote mailbox.
    pub fn remote(mut self) -> Self {
        self.remote = true;
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if self.mailbox_size == 0 {
            return Err(Error::Validation(
                "mailbox_size must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Actor system.
pub struct ActorSystem {}

impl ActorSystem {
    /// Create a new actor system.
    ///
    /// # Returns
    ///
    /// Returns the system reference used to spawn actors and resolve names.
    pub fn create() -> SystemRef {
        SystemRef::default()
    }
}

/// System reference: spawn entry points plus the name service. Cloning is
/// cheap and all clones share the same registry.
#[derive(Clone, Default)]
pub struct SystemRef {
    /// The names registered in this actor system.
    names: Arc<RwLock<HashMap<String, Link>>>,
}

impl SystemRef {
    /// Start a new actor.
    ///
    /// # Arguments
    ///
    /// * `behavior` - The behavior applied to each incoming payload.
    /// * `opts` - The spawn options.
    ///
    /// # Returns
    ///
    /// Returns the link of the new actor's mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the options fail validation or the requested
    /// name is taken.
    pub async fn spawn(
        &self,
        behavior: impl Behavior,
        opts: SpawnOptions,
    ) -> Result<Link, Error> {
        self.spawn_boxed(Box::new(behavior), opts).await
    }

    pub(crate) async fn spawn_boxed(
        &self,
        behavior: Box<dyn Behavior>,
        opts: SpawnOptions,
    ) -> Result<Link, Error> {
        opts.validate()?;
        if opts.remote {
            return Err(Error::RemoteUnavailable(
                "no remote transport is configured".to_owned(),
            ));
        }
        let (sender, receiver) = mailbox(opts.mailbox_size);
        let token = CancellationToken::new();
        let link = Link::local(sender, token.clone(), opts.send_policy);
        if let Some(name) = &opts.name {
            self.register(name, link.clone()).await?;
        }
        let runner = ActorRunner::create(
            behavior,
            link.clone(),
            receiver,
            token,
            self.clone(),
            opts.mode,
            opts.name.clone(),
            opts.conn,
        );
        tokio::spawn(runner.run());
        Ok(link)
    }

    /// Restart an actor behind an existing link: fresh mailbox and runner,
    /// same identity.
    pub(crate) async fn respawn(
        &self,
        behavior: Box<dyn Behavior>,
        link: &Link,
        opts: &SpawnOptions,
    ) {
        let (sender, receiver) = mailbox(opts.mailbox_size);
        let token = CancellationToken::new();
        link.rebind(Slot {
            sender,
            token: token.clone(),
        });
        if let Some(name) = &opts.name {
            self.reregister(name, link.clone()).await;
        }
        let runner = ActorRunner::create(
            behavior,
            link.clone(),
            receiver,
            token,
            self.clone(),
            opts.mode,
            opts.name.clone(),
            opts.conn.clone(),
        );
        tokio::spawn(runner.run());
    }

    /// Start a supervisor actor.
    ///
    /// # Arguments
    ///
    /// * `config` - Strategy and restart-intensity window.
    /// * `opts` - Spawn options; the mode is forced to supervisor.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or options fail validation.
    pub async fn supervisor(
        &self,
        config: SupervisorConfig,
        opts: SpawnOptions,
    ) -> Result<SupervisorRef, Error> {
        config.validate()?;
        let link = self
            .spawn(Supervisor::new(config), opts.with_mode(Mode::Sv))
            .await?;
        Ok(SupervisorRef::new(link))
    }

    /// Register `link` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NameTaken`] if the name is already registered.
    pub async fn register(&self, name: &str, link: Link) -> Result<(), Error> {
        let mut names = self.names.write().await;
        if names.contains_key(name) {
            error!("Name '{}' is already registered.", name);
            return Err(Error::NameTaken(name.to_owned()));
        }
        names.insert(name.to_owned(), link);
        Ok(())
    }

    /// Resolve a name to a link.
    pub async fn whereis(&self, name: &str) -> Option<Link> {
        let names = self.names.read().await;
        names.get(name).cloned()
    }

    /// Drop a registration. Unknown names are ignored.
    pub async fn unregister(&self, name: &str) {
        let mut names = self.names.write().await;
        names.remove(name);
    }

    /// Restart path: the preserved link keeps its name even if the dying
    /// runner has not unregistered it yet.
    pub(crate) async fn reregister(&self, name: &str, link: Link) {
        debug!("Re-registering '{}' after restart.", name);
        let mut names = self.names.write().await;
        names.insert(name.to_owned(), link);
    }
}
