//! Hosted services and graceful shutdown.
//!
//! A [`Host`] owns the background services of a process (consumer supervisors,
//! mostly), starts them in registration order and stops them in parallel with
//! a grace period.
//!
//! ## Usage
//!
//! ```ignore
//! let mut host = Host::new(Duration::from_secs(30));
//! host.register(Arc::new(ConsumerSupervisor::new(consumer, manager)));
//!
//! host.start().await?;
//! wait_for_signal().await;
//! host.stop().await?;
//! ```

use courier_core::error::MessagingError;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// A background service managed by a [`Host`].
pub trait HostedService: Send + Sync {
    /// Service name for logging.
    fn name(&self) -> &str;

    /// Start the service. Must return once the service is running, not when
    /// it finishes.
    ///
    /// # Errors
    ///
    /// Returns an error if the service could not be started.
    fn start(&self) -> BoxFuture<'_, Result<(), MessagingError>>;

    /// Stop the service, waiting at most `timeout` for it to wind down.
    ///
    /// # Errors
    ///
    /// Returns an error if the service failed or did not stop in time.
    fn stop(&self, timeout: Duration) -> BoxFuture<'_, Result<(), MessagingError>>;
}

/// Starts and stops a set of hosted services.
pub struct Host {
    services: Vec<Arc<dyn HostedService>>,
    shutdown_timeout: Duration,
}

impl Host {
    /// Create a host that gives each service `shutdown_timeout` to stop.
    #[must_use]
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            services: Vec::new(),
            shutdown_timeout,
        }
    }

    /// Register a service.
    pub fn register(&mut self, service: Arc<dyn HostedService>) {
        info!(service = service.name(), "Registered hosted service");
        self.services.push(service);
    }

    /// Number of registered services.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Start every service in registration order.
    ///
    /// If one fails to start, the services started before it are stopped again.
    ///
    /// # Errors
    ///
    /// Returns the start error of the failing service.
    pub async fn start(&self) -> Result<(), MessagingError> {
        for (index, service) in self.services.iter().enumerate() {
            if let Err(e) = service.start().await {
                error!(service = service.name(), error = %e, "Hosted service failed to start");
                if let Err(errors) = self.stop_services(&self.services[..index]).await {
                    warn!(count = errors.len(), "Rollback after failed start reported errors");
                }
                return Err(e);
            }
            info!(service = service.name(), "Hosted service started");
        }
        Ok(())
    }

    /// Stop every service in parallel.
    ///
    /// # Errors
    ///
    /// Returns every stop failure, tagged with the service name.
    pub async fn stop(&self) -> Result<(), Vec<(String, MessagingError)>> {
        info!(
            services = self.services.len(),
            timeout = ?self.shutdown_timeout,
            "Initiating graceful shutdown"
        );
        self.stop_services(&self.services).await
    }

    async fn stop_services(&self, services: &[Arc<dyn HostedService>]) -> Result<(), Vec<(String, MessagingError)>> {
        let timeout = self.shutdown_timeout;
        let stops = services.iter().map(|service| async move {
            let name = service.name().to_string();
            // The outer timeout covers services that ignore their own.
            let result = match tokio::time::timeout(timeout, service.stop(timeout)).await {
                Ok(result) => result,
                Err(_) => Err(MessagingError::ShutdownTimeout(timeout)),
            };
            match result {
                Ok(()) => {
                    info!(service = %name, "Hosted service stopped");
                    Ok(())
                }
                Err(e) => {
                    error!(service = %name, error = %e, "Hosted service stop failed");
                    Err((name, e))
                }
            }
        });

        let errors: Vec<_> = futures::future::join_all(stops)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            info!("All hosted services stopped");
            Ok(())
        } else {
            error!(failed = errors.len(), "Shutdown completed with errors");
            Err(errors)
        }
    }
}

/// Wait for Ctrl+C or, on Unix, SIGTERM.
///
/// If a signal handler cannot be installed the error is logged and that
/// source is ignored.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
