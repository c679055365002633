// Copyright 2024 Antonio Estévez
// SPDX-License-Identifier: Apache-2.0

//! # Task children
//!
//! One-shot callables supervised through a timed poller. A task cannot be
//! resumed in place: the monitor reports how it left the runnable state and
//! the supervisor can only re-run its start recipe.
//!

use crate::{
    envelope::{Envelope, ExitReason},
    error::Error,
    link::Link,
};

use futures::future::BoxFuture;

use tokio::task::{AbortHandle, JoinHandle};

use tracing::{debug, error};

use std::{fmt, future::Future, sync::Arc, time::Duration};

/// Default deadline for a supervised task.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default polling interval of the task monitor.
pub const DEFAULT_TASK_POLL: Duration = Duration::from_millis(100);

/// Recipe to (re)schedule a one-shot task.
#[derive(Clone)]
pub struct TaskStart {
    factory: Arc<dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync>,
}

impl TaskStart {
    /// Creates a task recipe from a callable producing the future to run.
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        TaskStart {
            factory: Arc::new(move || Box::pin(factory())),
        }
    }
}

impl fmt::Debug for TaskStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskStart")
    }
}

/// Handle returned by `start_task`: the task's identity link. The link has
/// no mailbox behind it; it identifies the task in child records and exit
/// notices.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    link: Link,
}

impl TaskHandle {
    pub(crate) fn new(link: Link) -> Self {
        TaskHandle { link }
    }

    /// Identity link of the task.
    pub fn link(&self) -> &Link {
        &self.link
    }
}

/// Live handles of a scheduled task.
pub(crate) struct TaskChild {
    task: AbortHandle,
    monitor: AbortHandle,
}

impl TaskChild {
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) fn abort(self) {
        self.monitor.abort();
        self.task.abort();
    }
}

/// Schedule the task and its monitor.
///
/// The monitor polls every `pollint` until the task leaves the runnable
/// state or `timeout` elapses, then reports exactly one exit notice to the
/// supervisor: `Normal` on clean completion, the failure on an error or
/// panic, `TimedOut` when the deadline won (the task is aborted).
pub(crate) fn schedule(
    start: &TaskStart,
    link: Link,
    supervisor: Link,
    timeout: Duration,
    pollint: Duration,
) -> TaskChild {
    let join = tokio::spawn((start.factory)());
    let task = join.abort_handle();
    let monitor =
        tokio::spawn(monitor(join, link, supervisor, timeout, pollint));
    TaskChild {
        task,
        monitor: monitor.abort_handle(),
    }
}

async fn monitor(
    join: JoinHandle<Result<(), Error>>,
    link: Link,
    supervisor: Link,
    timeout: Duration,
    pollint: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !join.is_finished() {
        if tokio::time::Instant::now() >= deadline {
            debug!("Task {} reached its deadline and is aborted.", link);
            join.abort();
            notify(&supervisor, &link, ExitReason::TimedOut, "task deadline reached")
                .await;
            return;
        }
        tokio::time::sleep(pollint).await;
    }
    let (reason, info) = match join.await {
        Ok(Ok(())) => (ExitReason::Normal, String::new()),
        Ok(Err(err)) => {
            let info = err.to_string();
            (ExitReason::failure(err), info)
        }
        Err(join_error) => {
            let err = Error::Task(join_error.to_string());
            let info = err.to_string();
            (ExitReason::failure(err), info)
        }
    };
    notify(&supervisor, &link, reason, &info).await;
}

async fn notify(supervisor: &Link, link: &Link, reason: ExitReason, info: &str) {
    let envelope = Envelope::Exit {
        from: link.clone(),
        reason,
        info: info.to_owned(),
        state: None,
    };
    if let Err(err) = supervisor.send_envelope(envelope).await {
        error!("Task exit notice for {} undeliverable: {}", supervisor, err);
    }
}
