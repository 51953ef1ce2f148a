//! Long-running supervision of a [`MessageConsumer`].
//!
//! The [`ConsumerSupervisor`] is a hosted service. Once started it keeps the
//! consumer running until the host stops it:
//!
//! ```text
//!          start()
//!   Idle ──────────► Running ──► Cancelled ──┐
//!                      ▲    └──► Faulted ────┤ (backoff)
//!                      └─────────────────────┘
//!   Running ──► Stopped   (manager stop, parked)
//!   Running ──► Faulted   (retries exhausted, parked)
//!   parked  ──► Running   (manager restart)
//!   any state ──► exit    (host stop)
//! ```
//!
//! Each attempt runs with a signal that fires when either the host stop signal
//! or the manager's current signal fires. A cancelled attempt is expected
//! control flow: after `restart_execution()` the loop immediately starts a new
//! attempt with the manager's fresh signal.
//!
//! Faults are retried with exponential backoff from the [`RetryPolicy`]. When
//! more than `max_retries` consecutive attempts fault, the supervisor stays
//! `Faulted` and parks. A parked supervisor, whether stopped by its manager or
//! faulted, resumes on the next `restart_execution()`; the host process never
//! has to restart. If the host stops a faulted supervisor, the last error is
//! reported from [`ConsumerSupervisor::stop`]. A clean attempt resets the
//! fault count.

use crate::host::HostedService;
use crate::manager::ConsumerManager;
use crate::metrics::{CONSUMER_FAULTED, CONSUMER_RUNNING, CONSUMER_STARTED};
use crate::retry::{RetryPolicy, backoff};
use courier_core::cancellation::CancellationSignal;
use courier_core::consumer::MessageConsumer;
use courier_core::error::MessagingError;
use futures::future::BoxFuture;
use metrics::{counter, gauge};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Delay before re-entering the consumer after it returned without being
/// cancelled.
const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(250);

/// Lifecycle state of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    /// Constructed, not started
    Idle,
    /// A consumer attempt is in progress
    Running,
    /// The last attempt was cancelled; a new one follows unless stopping
    Cancelled,
    /// The last attempt faulted. Parked once retries are exhausted
    Faulted,
    /// Stopped on request. Parked until a restart unless the host stopped it
    Stopped,
}

impl SupervisorState {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Cancelled => "cancelled",
            Self::Faulted => "faulted",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Shared {
    consumer: Arc<dyn MessageConsumer>,
    manager: Arc<ConsumerManager>,
    policy: RetryPolicy,
    idle_delay: Duration,
    host: CancellationSignal,
    state: Arc<watch::Sender<SupervisorState>>,
}

impl Shared {
    fn name(&self) -> &str {
        self.consumer.name()
    }

    fn transition(&self, next: SupervisorState) {
        transition(&self.state, self.name(), next);
    }
}

fn transition(state: &watch::Sender<SupervisorState>, consumer: &str, next: SupervisorState) {
    let previous = state.send_replace(next);
    if previous != next {
        tracing::debug!(consumer, from = %previous, to = %next, "Supervisor state change");
    }
}

/// Hosted service that owns a consumer's receive loop.
pub struct ConsumerSupervisor {
    consumer: Arc<dyn MessageConsumer>,
    manager: Arc<ConsumerManager>,
    policy: RetryPolicy,
    idle_delay: Duration,
    host: CancellationSignal,
    state: Arc<watch::Sender<SupervisorState>>,
    task: Mutex<Option<JoinHandle<Result<(), MessagingError>>>>,
}

impl ConsumerSupervisor {
    /// Supervise `consumer`, controlled through `manager`.
    #[must_use]
    pub fn new(consumer: Arc<dyn MessageConsumer>, manager: Arc<ConsumerManager>) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            consumer,
            manager,
            policy: RetryPolicy::default(),
            idle_delay: DEFAULT_IDLE_DELAY,
            host: CancellationSignal::new(),
            state: Arc::new(state),
            task: Mutex::new(None),
        }
    }

    /// Use `policy` for fault backoff.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Pause for `delay` when the consumer returns without being cancelled.
    #[must_use]
    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    /// Name of the supervised consumer.
    #[must_use]
    pub fn name(&self) -> &str {
        self.consumer.name()
    }

    /// The manager controlling the supervised consumer.
    #[must_use]
    pub const fn manager(&self) -> &Arc<ConsumerManager> {
        &self.manager
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Spawn the supervision loop and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidConfiguration`] if the supervisor was
    /// already started or has been stopped.
    pub fn start(&self) -> Result<(), MessagingError> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() || self.host.is_cancelled() {
            return Err(MessagingError::InvalidConfiguration(format!(
                "supervisor for {} cannot be started twice",
                self.name()
            )));
        }

        tracing::info!(consumer = self.name(), family = %self.manager.family(), "Starting consumer supervisor");
        let shared = Shared {
            consumer: Arc::clone(&self.consumer),
            manager: Arc::clone(&self.manager),
            policy: self.policy.clone(),
            idle_delay: self.idle_delay,
            host: self.host.clone(),
            state: Arc::clone(&self.state),
        };
        *task = Some(tokio::spawn(run(shared)));
        Ok(())
    }

    /// Stop the loop and wait up to `timeout` for it to exit.
    ///
    /// Cancels the host stop signal and the manager's current signal.
    ///
    /// # Errors
    ///
    /// - [`MessagingError::ShutdownTimeout`] if the loop did not exit in time;
    ///   the task is aborted
    /// - the last consumer error if the loop had exited after exhausting retries
    /// - [`MessagingError::ConsumerFailed`] if the loop task panicked
    pub async fn stop(&self, timeout: Duration) -> Result<(), MessagingError> {
        self.host.cancel();
        self.manager.stop_execution();

        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut handle) = handle else {
            transition(&self.state, self.name(), SupervisorState::Stopped);
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                tracing::error!(consumer = self.name(), error = %join_error, "Supervisor task failed");
                transition(&self.state, self.name(), SupervisorState::Stopped);
                Err(MessagingError::ConsumerFailed(join_error.to_string()))
            }
            Err(_) => {
                tracing::error!(consumer = self.name(), ?timeout, "Supervisor did not stop in time, aborting");
                handle.abort();
                transition(&self.state, self.name(), SupervisorState::Stopped);
                Err(MessagingError::ShutdownTimeout(timeout))
            }
        }
    }
}

impl fmt::Debug for ConsumerSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerSupervisor")
            .field("consumer", &self.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl HostedService for ConsumerSupervisor {
    fn name(&self) -> &str {
        Self::name(self)
    }

    fn start(&self) -> BoxFuture<'_, Result<(), MessagingError>> {
        Box::pin(async move { Self::start(self) })
    }

    fn stop(&self, timeout: Duration) -> BoxFuture<'_, Result<(), MessagingError>> {
        Box::pin(Self::stop(self, timeout))
    }
}

async fn run(shared: Shared) -> Result<(), MessagingError> {
    let consumer = shared.name().to_string();
    gauge!(CONSUMER_RUNNING, "consumer" => consumer.clone()).set(1.0);
    let result = supervise(&shared).await;
    gauge!(CONSUMER_RUNNING, "consumer" => consumer).set(0.0);
    result
}

async fn supervise(shared: &Shared) -> Result<(), MessagingError> {
    let mut generations = shared.manager.subscribe_generation();
    let mut faults = 0usize;

    loop {
        generations.mark_unchanged();
        let control = shared.manager.cancellation_token();

        if shared.host.is_cancelled() {
            tracing::info!(consumer = shared.name(), "Consumer supervisor stopping");
            shared.transition(SupervisorState::Stopped);
            return Ok(());
        }

        if control.is_cancelled() {
            tracing::info!(consumer = shared.name(), "Consumer stopped, waiting for a restart");
            shared.transition(SupervisorState::Stopped);
            if !park(shared, &mut generations).await {
                return Ok(());
            }
            faults = 0;
            continue;
        }

        let attempt = CancellationSignal::any_of([shared.host.clone(), control]);
        shared.transition(SupervisorState::Running);
        counter!(CONSUMER_STARTED, "consumer" => shared.name().to_string()).increment(1);

        match shared.consumer.start(attempt.clone()).await {
            Err(error) if !error.is_cancellation() && !attempt.is_cancelled() => {
                counter!(CONSUMER_FAULTED, "consumer" => shared.name().to_string()).increment(1);
                shared.transition(SupervisorState::Faulted);

                if faults >= shared.policy.max_retries {
                    tracing::error!(
                        consumer = shared.name(),
                        faults = faults + 1,
                        error = %error,
                        "Consumer faulted too many times, waiting for a restart"
                    );
                    if !park(shared, &mut generations).await {
                        return Err(error);
                    }
                    faults = 0;
                    continue;
                }

                let delay = shared.policy.delay_for_attempt(faults);
                faults += 1;
                tracing::warn!(
                    consumer = shared.name(),
                    faults,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "Consumer faulted, retrying"
                );
                // A restart or stop cuts the backoff short; the loop re-checks.
                let _ = backoff(delay, &attempt).await;
            }
            Err(_) => {
                faults = 0;
                shared.transition(SupervisorState::Cancelled);
                tracing::debug!(consumer = shared.name(), "Consumer attempt cancelled");
            }
            Ok(()) if attempt.is_cancelled() => {
                faults = 0;
                shared.transition(SupervisorState::Cancelled);
                tracing::debug!(consumer = shared.name(), "Consumer attempt cancelled");
            }
            Ok(()) => {
                faults = 0;
                tracing::warn!(consumer = shared.name(), "Consumer returned without being cancelled");
                let _ = backoff(shared.idle_delay, &attempt).await;
            }
        }
    }
}

/// Wait for the manager's next restart.
///
/// Returns `false` if the host stops first.
async fn park(shared: &Shared, generations: &mut watch::Receiver<u64>) -> bool {
    let consumer = shared.name().to_string();
    gauge!(CONSUMER_RUNNING, "consumer" => consumer.clone()).set(0.0);

    let revived = tokio::select! {
        biased;
        () = shared.host.cancelled() => false,
        changed = generations.changed() => changed.is_ok(),
    };

    if revived {
        gauge!(CONSUMER_RUNNING, "consumer" => consumer.clone()).set(1.0);
        tracing::info!(consumer = %consumer, generation = *generations.borrow(), "Consumer resumed by restart");
    }
    revived
}
