//! Stop/restart control for one consumer.
//!
//! A [`ConsumerManager`] owns the revocable [`CancellationSignal`] of one
//! `(consumer, family)` pair. The supervisor reads the current signal before
//! every consumer attempt; callers outside the host (an admin endpoint, an ops
//! script) use the manager to stop the consumer or kick it into a fresh attempt.
//!
//! Restarting replaces the signal rather than resetting it: in-flight work keeps
//! observing the old, now cancelled signal and unwinds, while the next attempt
//! picks up the new one. Every restart is also broadcast on a generation
//! channel, which wakes a supervisor that has parked after a stop or after
//! exhausting its retries.

use crate::metrics::CONSUMER_RESTARTS;
use courier_core::cancellation::CancellationSignal;
use courier_core::message::MessageFamily;
use metrics::counter;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

#[derive(Debug)]
struct ControlSlot {
    signal: CancellationSignal,
    generation: u64,
}

/// Holder of the current cancellation signal of one consumer.
///
/// All operations take one short critical section, so readers never observe a
/// half-replaced signal.
#[derive(Debug)]
pub struct ConsumerManager {
    name: String,
    family: MessageFamily,
    slot: Mutex<ControlSlot>,
    generations: watch::Sender<u64>,
}

/// Point-in-time view of a manager, for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerStatus {
    /// Consumer name
    pub name: String,
    /// Family the consumer receives
    pub family: MessageFamily,
    /// Number of restarts so far
    pub generation: u64,
    /// Whether the current signal is cancelled
    pub stopped: bool,
}

impl ConsumerManager {
    /// Create a manager with a fresh, uncancelled signal.
    #[must_use]
    pub fn new(name: impl Into<String>, family: MessageFamily) -> Self {
        Self {
            name: name.into(),
            family,
            slot: Mutex::new(ControlSlot {
                signal: CancellationSignal::new(),
                generation: 0,
            }),
            generations: watch::Sender::new(0),
        }
    }

    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Family of the managed consumer.
    #[must_use]
    pub const fn family(&self) -> MessageFamily {
        self.family
    }

    /// Cancel the current signal and install a fresh one.
    ///
    /// Returns the new generation number.
    pub fn restart_execution(&self) -> u64 {
        let generation = {
            let mut slot = self.lock();
            slot.signal.cancel();
            slot.signal = CancellationSignal::new();
            slot.generation += 1;
            self.generations.send_replace(slot.generation);
            slot.generation
        };

        counter!(CONSUMER_RESTARTS, "consumer" => self.name.clone()).increment(1);
        tracing::info!(
            consumer = %self.name,
            family = %self.family,
            generation,
            "Consumer restart requested"
        );
        generation
    }

    /// Cancel the current signal without installing a new one.
    ///
    /// The supervisor parks the next time it checks the signal, until the next
    /// restart.
    pub fn stop_execution(&self) {
        self.lock().signal.cancel();
        tracing::info!(consumer = %self.name, family = %self.family, "Consumer stop requested");
    }

    /// The current signal.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationSignal {
        self.lock().signal.clone()
    }

    /// Number of restarts performed.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Watch the generation number. A new value is published on every restart.
    #[must_use]
    pub fn subscribe_generation(&self) -> watch::Receiver<u64> {
        self.generations.subscribe()
    }

    /// Whether the current signal is cancelled.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.lock().signal.is_cancelled()
    }

    /// Snapshot for status reporting.
    #[must_use]
    pub fn status(&self) -> ConsumerStatus {
        let slot = self.lock();
        ConsumerStatus {
            name: self.name.clone(),
            family: self.family,
            generation: slot.generation,
            stopped: slot.signal.is_cancelled(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
