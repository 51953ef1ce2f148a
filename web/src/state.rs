//! Shared state for the admin router.

use courier_core::message::MessageFamily;
use courier_runtime::{ConsumerManager, ConsumerStatus, ConsumerSupervisor, SupervisorState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
struct Registered {
    manager: Arc<ConsumerManager>,
    supervisor: Option<Arc<ConsumerSupervisor>>,
}

/// Manager status plus, when known, the supervisor's lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerReport {
    /// Manager snapshot
    #[serde(flatten)]
    pub status: ConsumerStatus,
    /// Supervisor state, if a supervisor was registered
    pub supervisor: Option<SupervisorState>,
}

impl ConsumerReport {
    /// Whether the consumer is currently able to receive messages.
    ///
    /// A stopped manager is never ready. A supervisor must be running or
    /// between two attempts.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.status.stopped
            && self
                .supervisor
                .is_none_or(|state| matches!(state, SupervisorState::Running | SupervisorState::Cancelled))
    }
}

/// Consumers reachable from the admin endpoints, one per family.
///
/// # Examples
///
/// ```ignore
/// let state = AdminState::new()
///     .with_supervisor(Arc::clone(&domain_supervisor))
///     .with_supervisor(Arc::clone(&integration_supervisor));
/// let app = admin_router(state);
/// ```
#[derive(Clone, Default)]
pub struct AdminState {
    consumers: Arc<BTreeMap<&'static str, Registered>>,
}

impl AdminState {
    /// State with no consumers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `manager` under its family. Readiness only looks at the
    /// manager's signal. A second registration for the same family replaces
    /// the first.
    #[must_use]
    pub fn with_manager(self, manager: Arc<ConsumerManager>) -> Self {
        self.insert(Registered {
            manager,
            supervisor: None,
        })
    }

    /// Expose `supervisor` and its manager under the manager's family.
    #[must_use]
    pub fn with_supervisor(self, supervisor: Arc<ConsumerSupervisor>) -> Self {
        self.insert(Registered {
            manager: Arc::clone(supervisor.manager()),
            supervisor: Some(supervisor),
        })
    }

    fn insert(mut self, registered: Registered) -> Self {
        Arc::make_mut(&mut self.consumers).insert(registered.manager.family().as_str(), registered);
        self
    }

    /// Manager for `family`, if registered.
    #[must_use]
    pub fn manager(&self, family: MessageFamily) -> Option<&Arc<ConsumerManager>> {
        self.consumers.get(family.as_str()).map(|registered| &registered.manager)
    }

    /// Report for `family`, if registered.
    #[must_use]
    pub fn report(&self, family: MessageFamily) -> Option<ConsumerReport> {
        self.consumers.get(family.as_str()).map(Registered::report)
    }

    /// Report for every registered consumer, ordered by family name.
    #[must_use]
    pub fn reports(&self) -> Vec<ConsumerReport> {
        self.consumers.values().map(Registered::report).collect()
    }
}

impl Registered {
    fn report(&self) -> ConsumerReport {
        ConsumerReport {
            status: self.manager.status(),
            supervisor: self.supervisor.as_ref().map(|supervisor| supervisor.state()),
        }
    }
}

impl std::fmt::Debug for AdminState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminState")
            .field("families", &self.consumers.keys().collect::<Vec<_>>())
            .finish()
    }
}
