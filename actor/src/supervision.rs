// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Supervision
//!
//! This module provides the supervision subsystem: a supervisor is a
//! specialised behavior that owns an ordered list of child records and
//! reacts to exit notices according to a declared strategy.
//!
//! The supervision system follows the "let it crash" philosophy common in
//! actor systems: failures are expected and recovered through restarts
//! rather than defensive programming. Three strategies are supported:
//!
//! - **one_for_one**: only the failed child is restarted.
//! - **one_for_all**: when one child fails, every sibling is shut down and
//!   all children are restarted in start order.
//! - **rest_for_one**: the failed child and every child started after it
//!   are shut down and restarted in start order.
//!
//! Per child a restart policy decides whether a restart happens at all:
//! `permanent` children always restart, `temporary` children never, and
//! `transient` children only after an unclean exit. Restart frequency is
//! bounded by a sliding window: when more than `max_restarts` restarts
//! would fall within `max_seconds`, the supervisor shuts itself and all its
//! children down.
//!
//! Restarting an actor child preserves its link identity: the transport
//! slot inside the existing link is rebound to the fresh mailbox, so
//! outstanding links keep working. A task child cannot be resumed in place;
//! its start recipe is re-scheduled and the handles in the child record are
//! replaced.
//!
//! # Usage Examples
//!
//! ## Basic Supervision Setup
//!
//! ```ignore
//! use actor::{
//!     ActorSystem, RestartPolicy, SpawnOptions, Start, Strategy,
//!     SupervisorConfig,
//! };
//!
//! let system = ActorSystem::create();
//! let sv = system
//!     .supervisor(
//!         SupervisorConfig::default().with_strategy(Strategy::OneForOne),
//!         SpawnOptions::default(),
//!     )
//!     .await?;
//!
//! // a worker that comes back after every failure
//! let worker = sv
//!     .start_actor(
//!         Start::new(|| Worker::default()),
//!         RestartPolicy::Permanent,
//!         SpawnOptions::default(),
//!     )
//!     .await?;
//! ```
//!
//! ## Multi-Level Supervision Trees
//!
//! Supervisors can manage other supervisors as children, so subsystems can
//! carry their own strategies and restart budgets:
//!
//! ```ignore
//! use actor::{Mode, Supervisor, SupervisorConfig, SupervisorRef};
//!
//! let inner = root
//!     .start_actor(
//!         Start::new(|| Supervisor::new(SupervisorConfig::default())),
//!         RestartPolicy::Permanent,
//!         SpawnOptions::default().with_mode(Mode::Sv),
//!     )
//!     .await?;
//! let inner = SupervisorRef::new(inner);
//! ```
//!

use crate::{
    behavior::{Behavior, Control},
    envelope::{Conn, Envelope, ExitNotice, ExitReason, Payload, ReplyTo},
    error::Error,
    link::Link,
    runner::ActorContext,
    system::SpawnOptions,
    task::{self, TaskChild, TaskHandle, TaskStart},
};

use async_trait::async_trait;

use serde::{Deserialize, Serialize};

use tokio::sync::oneshot;

use tracing::{debug, warn};

use std::{
    collections::VecDeque,
    fmt,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

/// How long a deliberate child shutdown may take before the supervisor
/// moves on.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// Restart strategy over siblings.
///
/// The strategy defines what happens to the other children when one child
/// fails:
///
/// - **OneForOne**: only the failing child is restarted.
/// - **OneForAll**: every sibling is shut down, then all children are
///   restarted in start order.
/// - **RestForOne**: the failing child and all children started after it
///   are shut down and restarted in start order.
///
/// # Examples
///
/// ```ignore
/// use actor::{Strategy, SupervisorConfig};
///
/// // dependent pipeline stages: a failure invalidates everything after it
/// let config =
///     SupervisorConfig::default().with_strategy(Strategy::RestForOne);
///
/// // symbolic tags parse through the same closed enum
/// let strategy: Strategy = "one_for_all".parse()?;
/// assert_eq!(strategy, Strategy::OneForAll);
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Restart only the failed child.
    #[default]
    OneForOne,
    /// Shut every sibling down, then restart all children in order.
    OneForAll,
    /// Shut down and restart the failed child and everything started after
    /// it.
    RestForOne,
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "one_for_one" => Ok(Strategy::OneForOne),
            "one_for_all" => Ok(Strategy::OneForAll),
            "rest_for_one" => Ok(Strategy::RestForOne),
            other => Err(Error::Validation(format!(
                "unknown strategy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::OneForOne => write!(f, "one_for_one"),
            Strategy::OneForAll => write!(f, "one_for_all"),
            Strategy::RestForOne => write!(f, "rest_for_one"),
        }
    }
}

/// Per-child restart rule.
///
/// # Policy Selection
///
/// - **Permanent**: for children the system cannot run without; restarted
///   no matter how they exited.
/// - **Temporary**: for best-effort work; never restarted.
/// - **Transient**: for children expected to finish; restarted only when
///   the exit reason is unclean.
///
/// # Examples
///
/// ```ignore
/// use actor::{ExitReason, RestartPolicy};
///
/// let policy: RestartPolicy = "transient".parse()?;
/// assert!(!policy.should_restart(&ExitReason::Normal));
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Always restarted.
    Permanent,
    /// Never restarted.
    Temporary,
    /// Restarted only after an unclean exit.
    #[default]
    Transient,
}

impl RestartPolicy {
    /// Whether a child with this policy should be restarted after leaving
    /// with `reason`.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::{Error, ExitReason, RestartPolicy};
    ///
    /// let crash = ExitReason::failure(Error::Behavior("boom".to_owned()));
    /// assert!(RestartPolicy::Transient.should_restart(&crash));
    /// assert!(!RestartPolicy::Transient.should_restart(&ExitReason::TimedOut));
    /// assert!(RestartPolicy::Permanent.should_restart(&ExitReason::Shutdown));
    /// ```
    pub fn should_restart(&self, reason: &ExitReason) -> bool {
        match self {
            RestartPolicy::Permanent => true,
            RestartPolicy::Temporary => false,
            RestartPolicy::Transient => !reason.is_clean(),
        }
    }
}

impl FromStr for RestartPolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "permanent" => Ok(RestartPolicy::Permanent),
            "temporary" => Ok(RestartPolicy::Temporary),
            "transient" => Ok(RestartPolicy::Transient),
            other => Err(Error::Validation(format!(
                "unknown restart policy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::Permanent => write!(f, "permanent"),
            RestartPolicy::Temporary => write!(f, "temporary"),
            RestartPolicy::Transient => write!(f, "transient"),
        }
    }
}

/// Supervisor configuration: the strategy and the restart-intensity window.
///
/// The window bounds restart frequency: when more than `max_restarts`
/// restarts would fall within `max_seconds`, the supervisor shuts itself
/// and all its children down instead of looping.
///
/// # Examples
///
/// ```ignore
/// use actor::{Strategy, SupervisorConfig};
/// use std::time::Duration;
///
/// // defaults: one_for_one, 3 restarts in 5 seconds
/// let config = SupervisorConfig::default();
///
/// // a subsystem that tolerates more churn
/// let busy = SupervisorConfig::default()
///     .with_strategy(Strategy::OneForAll)
///     .with_max_restarts(10)
///     .with_max_seconds(Duration::from_secs(30));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct SupervisorConfig {
    /// Restart strategy over siblings.
    pub strategy: Strategy,
    /// Width of the restart window in events.
    pub max_restarts: usize,
    /// Width of the restart window in time.
    pub max_seconds: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            strategy: Strategy::OneForOne,
            max_restarts: 3,
            max_seconds: Duration::from_secs(5),
        }
    }
}

impl SupervisorConfig {
    /// Sets the strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the window width in events.
    pub fn with_max_restarts(mut self, max_restarts: usize) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    /// Sets the window width in time.
    pub fn with_max_seconds(mut self, max_seconds: Duration) -> Self {
        self.max_seconds = max_seconds;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.max_seconds.is_zero() {
            return Err(Error::Validation(
                "max_seconds must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Recipe to (re)create an actor child's behavior.
///
/// The supervisor keeps the recipe in the child record and runs it again
/// for every restart, so the factory must capture everything a fresh
/// incarnation needs.
///
/// # Examples
///
/// ```ignore
/// use actor::{BehaviorFn, Payload, Start};
///
/// // a stateless echo child
/// let echo = Start::new(|| BehaviorFn::new((), |_, msg: Payload| Ok(msg)));
///
/// // captured configuration survives into every incarnation
/// let dsn = config.dsn.clone();
/// let store = Start::new(move || StoreWriter::connect(dsn.clone()));
/// ```
#[derive(Clone)]
pub struct Start {
    factory: Arc<dyn Fn() -> Box<dyn Behavior> + Send + Sync>,
}

impl Start {
    /// Creates a start recipe from a behavior factory.
    pub fn new<B, F>(factory: F) -> Self
    where
        B: Behavior,
        F: Fn() -> B + Send + Sync + 'static,
    {
        Start {
            factory: Arc::new(move || Box::new(factory())),
        }
    }

    pub(crate) fn build(&self) -> Box<dyn Behavior> {
        (self.factory)()
    }
}

impl fmt::Debug for Start {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Start")
    }
}

/// Kind of supervised child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildKind {
    /// A restartable actor.
    Actor,
    /// A one-shot monitored task.
    Task,
}

/// Introspection record returned by `which_children`.
#[derive(Clone, Debug)]
pub struct ChildInfo {
    /// Link identifying the child.
    pub link: Link,
    /// Restart policy of the child.
    pub policy: RestartPolicy,
    /// Actor or task.
    pub kind: ChildKind,
    /// True if the child is currently running.
    pub running: bool,
}

/// Tally returned by `count_children`.
///
/// # Examples
///
/// ```ignore
/// let counts = sv.count_children().await?;
/// assert_eq!(counts.total, counts.actors + counts.tasks);
/// if counts.running < counts.permanent {
///     // some permanent children are mid-restart
/// }
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChildCounts {
    /// All child records.
    pub total: usize,
    /// Children with a `permanent` policy.
    pub permanent: usize,
    /// Children with a `temporary` policy.
    pub temporary: usize,
    /// Children with a `transient` policy.
    pub transient: usize,
    /// Actor children.
    pub actors: usize,
    /// Task children.
    pub tasks: usize,
    /// Children currently running.
    pub running: usize,
}

enum ChildStart {
    Actor(Start),
    Task(TaskStart),
}

/// Record the supervisor holds per child.
struct Child {
    link: Link,
    start: Option<ChildStart>,
    policy: RestartPolicy,
    kind: ChildKind,
    opts: SpawnOptions,
    timeout: Duration,
    pollint: Duration,
    task: Option<TaskChild>,
    /// A deliberate shutdown is under way; the next exit notice from this
    /// child closes it instead of counting as a failure.
    shutting_down: bool,
}

impl Child {
    fn is_running(&self) -> bool {
        match self.kind {
            ChildKind::Actor => !self.link.is_closed(),
            ChildKind::Task => self
                .task
                .as_ref()
                .map(|running| !running.is_finished())
                .unwrap_or(false),
        }
    }

    fn info(&self) -> ChildInfo {
        ChildInfo {
            link: self.link.clone(),
            policy: self.policy,
            kind: self.kind,
            running: self.is_running(),
        }
    }
}

/// Commands handled by the supervisor behavior. They travel as request
/// payloads to the supervisor's link.
#[derive(Clone, Debug)]
enum SuperCmd {
    StartActor {
        start: Start,
        policy: RestartPolicy,
        opts: SpawnOptions,
    },
    StartTask {
        start: TaskStart,
        policy: RestartPolicy,
        timeout: Duration,
        pollint: Duration,
    },
    Supervise {
        who: Link,
        start: Start,
        policy: RestartPolicy,
    },
    Unsupervise {
        who: Link,
    },
    Count,
}

/// The supervisor behavior: an ordered list of child records, the restart
/// strategy and the sliding restart-intensity window.
pub struct Supervisor {
    config: SupervisorConfig,
    children: Vec<Child>,
    rtime: VecDeque<Instant>,
}

impl Supervisor {
    /// Creates a supervisor behavior. Spawn it through
    /// [`SystemRef::supervisor`](crate::SystemRef::supervisor), which also
    /// validates the configuration.
    ///
    /// Constructing the behavior directly is how a supervisor becomes the
    /// child of another supervisor:
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::{Mode, RestartPolicy, SpawnOptions, Start, Supervisor, SupervisorConfig};
    ///
    /// let inner = root
    ///     .start_actor(
    ///         Start::new(|| Supervisor::new(SupervisorConfig::default())),
    ///         RestartPolicy::Permanent,
    ///         SpawnOptions::default().with_mode(Mode::Sv),
    ///     )
    ///     .await?;
    /// ```
    pub fn new(config: SupervisorConfig) -> Self {
        Supervisor {
            config,
            children: Vec::new(),
            rtime: VecDeque::new(),
        }
    }

    fn position(&self, link: &Link) -> Option<usize> {
        self.children.iter().position(|child| child.link == *link)
    }

    /// Slide the restart window. True when the incoming attempt exceeds the
    /// allowed intensity: the window already holds `max_restarts` attempts
    /// and this one lands within `max_seconds` of the oldest retained.
    fn note_restart(&mut self, now: Instant) -> bool {
        if self.config.max_restarts == 0 {
            return true;
        }
        let over = self.rtime.len() >= self.config.max_restarts
            && self
                .rtime
                .front()
                .map(|oldest| {
                    now.duration_since(*oldest) <= self.config.max_seconds
                })
                .unwrap_or(false);
        if self.rtime.len() >= self.config.max_restarts {
            self.rtime.pop_front();
        }
        self.rtime.push_back(now);
        over
    }

    async fn start_actor(
        &mut self,
        ctx: &mut ActorContext,
        start: Start,
        policy: RestartPolicy,
        mut opts: SpawnOptions,
    ) -> Result<Link, Error> {
        opts.conn.push(Conn::supervisor(ctx.self_link().clone()));
        let system = ctx.system().clone();
        let link = system.spawn_boxed(start.build(), opts.clone()).await?;
        ctx.conn_insert(Conn::peer(link.clone()));
        self.children.push(Child {
            link: link.clone(),
            start: Some(ChildStart::Actor(start)),
            policy,
            kind: ChildKind::Actor,
            opts,
            timeout: Duration::ZERO,
            pollint: Duration::ZERO,
            task: None,
            shutting_down: false,
        });
        debug!(
            "Supervisor {} started child {} ({}).",
            ctx.self_link(),
            link,
            policy
        );
        Ok(link)
    }

    async fn start_task(
        &mut self,
        ctx: &mut ActorContext,
        start: TaskStart,
        policy: RestartPolicy,
        timeout: Duration,
        pollint: Duration,
    ) -> Result<TaskHandle, Error> {
        if pollint.is_zero() {
            return Err(Error::Validation(
                "pollint must be positive".to_owned(),
            ));
        }
        let link = Link::detached();
        let running = task::schedule(
            &start,
            link.clone(),
            ctx.self_link().clone(),
            timeout,
            pollint,
        );
        ctx.conn_insert(Conn::peer(link.clone()));
        self.children.push(Child {
            link: link.clone(),
            start: Some(ChildStart::Task(start)),
            policy,
            kind: ChildKind::Task,
            opts: SpawnOptions::default(),
            timeout,
            pollint,
            task: Some(running),
            shutting_down: false,
        });
        debug!(
            "Supervisor {} scheduled task {} ({}).",
            ctx.self_link(),
            link,
            policy
        );
        Ok(TaskHandle::new(link))
    }

    async fn supervise(
        &mut self,
        ctx: &mut ActorContext,
        who: Link,
        start: Start,
        policy: RestartPolicy,
    ) -> Result<(), Error> {
        if who == *ctx.self_link() {
            return Err(Error::Validation(
                "a supervisor cannot supervise itself".to_owned(),
            ));
        }
        if self.position(&who).is_some() {
            return Err(Error::Validation(format!(
                "{} is already supervised",
                who
            )));
        }
        who.send_envelope(Envelope::Connect {
            peer: Conn::supervisor(ctx.self_link().clone()),
            remove: false,
        })
        .await?;
        ctx.conn_insert(Conn::peer(who.clone()));
        let mut opts = SpawnOptions::default();
        opts.conn.push(Conn::supervisor(ctx.self_link().clone()));
        self.children.push(Child {
            link: who,
            start: Some(ChildStart::Actor(start)),
            policy,
            kind: ChildKind::Actor,
            opts,
            timeout: Duration::ZERO,
            pollint: Duration::ZERO,
            task: None,
            shutting_down: false,
        });
        Ok(())
    }

    async fn unsupervise(
        &mut self,
        ctx: &mut ActorContext,
        who: &Link,
    ) -> Result<(), Error> {
        let Some(index) = self.position(who) else {
            return Err(Error::Validation(format!(
                "{} is not supervised",
                who
            )));
        };
        self.children.remove(index);
        ctx.conn_remove(who);
        who.send_envelope(Envelope::Connect {
            peer: Conn::supervisor(ctx.self_link().clone()),
            remove: true,
        })
        .await?;
        Ok(())
    }

    fn count(&self) -> ChildCounts {
        let mut counts = ChildCounts::default();
        for child in &self.children {
            counts.total += 1;
            match child.policy {
                RestartPolicy::Permanent => counts.permanent += 1,
                RestartPolicy::Temporary => counts.temporary += 1,
                RestartPolicy::Transient => counts.transient += 1,
            }
            match child.kind {
                ChildKind::Actor => counts.actors += 1,
                ChildKind::Task => counts.tasks += 1,
            }
            if child.is_running() {
                counts.running += 1;
            }
        }
        counts
    }

    /// Deliberate shutdown of one child. Actor children get an out-of-band
    /// exit and the supervisor waits for the mailbox to close; task
    /// children are aborted together with their monitor.
    async fn shutdown_child(&mut self, index: usize) {
        let child = &mut self.children[index];
        match child.kind {
            ChildKind::Actor => {
                // A dead child already has an exit notice in flight, a live
                // one will produce it now. Either way the notice must not
                // count as a failure.
                child.shutting_down = true;
                if !child.link.is_closed() {
                    if let Err(err) =
                        child.link.exit(ExitReason::Shutdown).await
                    {
                        debug!(
                            "Shutdown of {} failed: {}",
                            child.link, err
                        );
                    }
                    if !child.link.wait_closed(SHUTDOWN_WAIT).await {
                        warn!(
                            "Child {} ignored shutdown for {:?}.",
                            child.link, SHUTDOWN_WAIT
                        );
                    }
                }
            }
            ChildKind::Task => {
                if let Some(running) = child.task.take() {
                    running.abort();
                }
            }
        }
    }

    /// Restart one child behind its existing link.
    async fn restart_child(
        &mut self,
        ctx: &mut ActorContext,
        index: usize,
    ) -> Result<(), Error> {
        let system = ctx.system().clone();
        let supervisor = ctx.self_link().clone();
        let child = &mut self.children[index];
        match &child.start {
            Some(ChildStart::Actor(start)) => {
                debug!("Restarting child {} behind its link.", child.link);
                system.respawn(start.build(), &child.link, &child.opts).await;
            }
            Some(ChildStart::Task(start)) => {
                debug!("Re-scheduling task {}.", child.link);
                if let Some(previous) = child.task.take() {
                    previous.abort();
                }
                child.task = Some(task::schedule(
                    start,
                    child.link.clone(),
                    supervisor,
                    child.timeout,
                    child.pollint,
                ));
            }
            None => {
                return Err(Error::Validation(format!(
                    "{} has no start recipe",
                    child.link
                )));
            }
        }
        let link = child.link.clone();
        ctx.conn_insert(Conn::peer(link));
        Ok(())
    }

    /// Drop records at positions ≥ `from` that can never come back.
    /// Returns the removed links.
    fn prune_unrestartable(&mut self, from: usize) -> Vec<Link> {
        let mut removed = Vec::new();
        let mut index = from;
        while index < self.children.len() {
            if self.children[index].start.is_none() {
                removed.push(self.children.remove(index).link);
            } else {
                index += 1;
            }
        }
        removed
    }

    /// Restart decision for an exit notice that matches a child.
    async fn child_exit(
        &mut self,
        ctx: &mut ActorContext,
        exit: ExitNotice,
    ) -> Result<(), Error> {
        let Some(index) = self.position(&exit.from) else {
            debug!(
                "Supervisor {} ignores exit notice from {}.",
                ctx.self_link(),
                exit.from
            );
            return Ok(());
        };
        // The runner dropped the peer on delivery; children stay connected.
        ctx.conn_insert(Conn::peer(exit.from.clone()));

        if self.children[index].shutting_down {
            self.children[index].shutting_down = false;
            debug!(
                "Supervisor {} completed shutdown of {}.",
                ctx.self_link(),
                exit.from
            );
            return Ok(());
        }

        let child = &self.children[index];
        let should_start =
            child.policy.should_restart(&exit.reason) && child.start.is_some();
        if !should_start {
            debug!(
                "Child {} left with reason {} and is removed.",
                exit.from, exit.reason
            );
            let gone = self.children.remove(index);
            ctx.conn_remove(&gone.link);
            return Ok(());
        }

        if self.note_restart(Instant::now()) {
            warn!(
                "Supervisor {} exceeded {} restarts in {:?}; shutting down.",
                ctx.self_link(),
                self.config.max_restarts,
                self.config.max_seconds
            );
            ctx.stop(ExitReason::Shutdown);
            return Ok(());
        }

        match self.config.strategy {
            Strategy::OneForOne => {
                self.restart_child(ctx, index).await?;
            }
            Strategy::OneForAll => {
                for other in 0..self.children.len() {
                    if other != index {
                        self.shutdown_child(other).await;
                    }
                }
                for link in self.prune_unrestartable(0) {
                    ctx.conn_remove(&link);
                }
                for position in 0..self.children.len() {
                    self.restart_child(ctx, position).await?;
                }
            }
            Strategy::RestForOne => {
                for other in index + 1..self.children.len() {
                    self.shutdown_child(other).await;
                }
                for link in self.prune_unrestartable(index) {
                    ctx.conn_remove(&link);
                }
                let mut position = index;
                while position < self.children.len() {
                    self.restart_child(ctx, position).await?;
                    position += 1;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Behavior for Supervisor {
    async fn dispatch(
        &mut self,
        ctx: &mut ActorContext,
        msg: Payload,
    ) -> Result<Payload, Error> {
        let Some(cmd) = msg.extract::<SuperCmd>() else {
            warn!(
                "Supervisor {} received a non-command payload: {:?}.",
                ctx.self_link(),
                msg
            );
            return Err(Error::UnexpectedMessage(format!(
                "supervisor cannot dispatch {}",
                msg.type_tag()
            )));
        };
        match cmd {
            SuperCmd::StartActor {
                start,
                policy,
                opts,
            } => {
                let link = self.start_actor(ctx, start, policy, opts).await?;
                Ok(Payload::new(link))
            }
            SuperCmd::StartTask {
                start,
                policy,
                timeout,
                pollint,
            } => {
                let handle = self
                    .start_task(ctx, start, policy, timeout, pollint)
                    .await?;
                Ok(Payload::new(handle))
            }
            SuperCmd::Supervise { who, start, policy } => {
                self.supervise(ctx, who, start, policy).await?;
                Ok(Payload::unit())
            }
            SuperCmd::Unsupervise { who } => {
                self.unsupervise(ctx, &who).await?;
                Ok(Payload::unit())
            }
            SuperCmd::Count => Ok(Payload::new(self.count())),
        }
    }

    async fn on_exit(
        &mut self,
        ctx: &mut ActorContext,
        exit: ExitNotice,
    ) -> Result<(), Error> {
        self.child_exit(ctx, exit).await
    }

    async fn on_control(
        &mut self,
        ctx: &mut ActorContext,
        control: Control,
    ) -> Result<(), Error> {
        match control {
            Control::Delete(link) => {
                let Some(index) = self.position(&link) else {
                    warn!(
                        "Supervisor {} cannot delete unknown child {}.",
                        ctx.self_link(),
                        link
                    );
                    return Ok(());
                };
                let child = self.children.remove(index);
                ctx.conn_remove(&child.link);
                if child.kind == ChildKind::Actor {
                    // The child keeps running, unsupervised.
                    let dropped = child
                        .link
                        .send_envelope(Envelope::Connect {
                            peer: Conn::supervisor(ctx.self_link().clone()),
                            remove: true,
                        })
                        .await;
                    if let Err(err) = dropped {
                        debug!(
                            "Could not detach from deleted child {}: {}",
                            child.link, err
                        );
                    }
                }
                Ok(())
            }
            Control::Terminate(link) => {
                let Some(index) = self.position(&link) else {
                    warn!(
                        "Supervisor {} cannot terminate unknown child {}.",
                        ctx.self_link(),
                        link
                    );
                    return Ok(());
                };
                let mut child = self.children.remove(index);
                ctx.conn_remove(&child.link);
                match child.kind {
                    ChildKind::Actor => {
                        if let Err(err) =
                            child.link.exit(ExitReason::Shutdown).await
                        {
                            debug!(
                                "Terminate of {} failed: {}",
                                child.link, err
                            );
                        }
                    }
                    ChildKind::Task => {
                        if let Some(running) = child.task.take() {
                            running.abort();
                        }
                    }
                }
                Ok(())
            }
            Control::Which(reply) => {
                let infos: Vec<ChildInfo> =
                    self.children.iter().map(Child::info).collect();
                reply.respond(Ok(Payload::new(infos))).await;
                Ok(())
            }
        }
    }

    async fn on_stop(&mut self, ctx: &mut ActorContext) {
        debug!(
            "Supervisor {} shuts its children down.",
            ctx.self_link()
        );
        for index in (0..self.children.len()).rev() {
            self.shutdown_child(index).await;
        }
        self.children.clear();
    }
}

/// Handle wrapping a supervisor's link with the supervision API.
///
/// Every operation is a message to the supervisor's mailbox; the handle
/// itself holds no state and can be rebuilt from the bare link at any
/// time.
///
/// # Examples
///
/// ```ignore
/// use actor::{SupervisorRef, SystemRef};
///
/// // recover the API for a supervisor found through the name service
/// let link = system.whereis("workers").await.ok_or(Error::NoReply)?;
/// let sv = SupervisorRef::new(link);
/// for child in sv.which_children().await? {
///     println!("{} ({}): running={}", child.link, child.policy, child.running);
/// }
/// ```
#[derive(Clone, Debug)]
pub struct SupervisorRef {
    link: Link,
}

impl SupervisorRef {
    /// Wraps a supervisor link.
    pub fn new(link: Link) -> Self {
        SupervisorRef { link }
    }

    /// The supervisor's link.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Spawn a child actor under this supervisor and return its link.
    ///
    /// The link stays valid across restarts: the supervisor rebinds it to
    /// each new incarnation's mailbox.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::{RestartPolicy, SpawnOptions, Start};
    ///
    /// let cache = sv
    ///     .start_actor(
    ///         Start::new(Cache::default),
    ///         RestartPolicy::Permanent,
    ///         SpawnOptions::default().with_name("cache"),
    ///     )
    ///     .await?;
    /// ```
    pub async fn start_actor(
        &self,
        start: Start,
        policy: RestartPolicy,
        opts: SpawnOptions,
    ) -> Result<Link, Error> {
        let reply = self
            .link
            .request(
                Payload::new(SuperCmd::StartActor {
                    start,
                    policy,
                    opts,
                }),
                None,
            )
            .await?;
        reply
            .extract::<Link>()
            .ok_or_else(|| Error::UnexpectedResponse(self.link.to_string()))
    }

    /// Schedule a one-shot task under this supervisor. The monitor polls
    /// every `pollint` until `timeout` elapses.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::{RestartPolicy, TaskStart, DEFAULT_TASK_POLL, DEFAULT_TASK_TIMEOUT};
    ///
    /// // retried until it stops failing; a timeout counts as clean
    /// sv.start_task(
    ///     TaskStart::new(|| flush_spool()),
    ///     RestartPolicy::Transient,
    ///     DEFAULT_TASK_TIMEOUT,
    ///     DEFAULT_TASK_POLL,
    /// )
    /// .await?;
    /// ```
    pub async fn start_task(
        &self,
        start: TaskStart,
        policy: RestartPolicy,
        timeout: Duration,
        pollint: Duration,
    ) -> Result<TaskHandle, Error> {
        let reply = self
            .link
            .request(
                Payload::new(SuperCmd::StartTask {
                    start,
                    policy,
                    timeout,
                    pollint,
                }),
                None,
            )
            .await?;
        reply
            .extract::<TaskHandle>()
            .ok_or_else(|| Error::UnexpectedResponse(self.link.to_string()))
    }

    /// Add an already running actor (usually the caller itself) as a child.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use actor::{RestartPolicy, Start};
    ///
    /// // from inside a behavior: place this actor under supervision
    /// sv.supervise(
    ///     ctx.self_link(),
    ///     Start::new(Worker::default),
    ///     RestartPolicy::Transient,
    /// )
    /// .await?;
    /// ```
    pub async fn supervise(
        &self,
        who: &Link,
        start: Start,
        policy: RestartPolicy,
    ) -> Result<(), Error> {
        self.link
            .request(
                Payload::new(SuperCmd::Supervise {
                    who: who.clone(),
                    start,
                    policy,
                }),
                None,
            )
            .await?;
        Ok(())
    }

    /// Remove an actor added with [`SupervisorRef::supervise`].
    pub async fn unsupervise(&self, who: &Link) -> Result<(), Error> {
        self.link
            .request(
                Payload::new(SuperCmd::Unsupervise { who: who.clone() }),
                None,
            )
            .await?;
        Ok(())
    }

    /// Remove a child record without terminating the child.
    pub async fn delete_child(&self, child: &Link) -> Result<(), Error> {
        self.link.send_envelope(Envelope::Delete(child.clone())).await
    }

    /// Remove a child record and shut the child down.
    pub async fn terminate_child(&self, child: &Link) -> Result<(), Error> {
        self.link
            .send_envelope(Envelope::Terminate(child.clone()))
            .await
    }

    /// The current child records.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let stuck: Vec<_> = sv
    ///     .which_children()
    ///     .await?
    ///     .into_iter()
    ///     .filter(|child| !child.running)
    ///     .collect();
    /// ```
    pub async fn which_children(&self) -> Result<Vec<ChildInfo>, Error> {
        let (sender, receiver) = oneshot::channel();
        self.link
            .send_envelope(Envelope::Which(ReplyTo::Slot(sender)))
            .await?;
        let reply = receiver.await.map_err(|_| Error::NoReply)??;
        reply
            .extract::<Vec<ChildInfo>>()
            .ok_or_else(|| Error::UnexpectedResponse(self.link.to_string()))
    }

    /// Tally of child records by policy, kind and liveness.
    pub async fn count_children(&self) -> Result<ChildCounts, Error> {
        let reply = self
            .link
            .request(Payload::new(SuperCmd::Count), None)
            .await?;
        reply
            .extract::<ChildCounts>()
            .ok_or_else(|| Error::UnexpectedResponse(self.link.to_string()))
    }
}
