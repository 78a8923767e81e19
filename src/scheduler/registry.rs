//! Registry of concurrently running schedules.
//!
//! Every registered schedule is a [`ScheduleMachine`]. A single reactor loop
//! ticks all running machines under one lock, so a schedule never sees two
//! ticks at once and a stopped schedule cannot emit after `stop` returns.

use super::events::{RegistryEvent, ScheduleEvent, ScheduleId};
use super::machine::ScheduleMachine;
use super::plan::ScheduleSpec;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::time::{Clock, SystemClock};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Lifecycle of a registered schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Registered, never started.
    Idle,
    Running,
    /// Started, then paused; keeps its countdowns.
    Paused,
}

#[derive(Debug)]
struct Entry {
    machine: ScheduleMachine,
    status: RunStatus,
}

/// Shared handle to the set of registered schedules.
///
/// Cloning is cheap; clones share the same schedules and event channel.
#[derive(Debug, Clone)]
pub struct ScheduleRegistry {
    entries: Arc<Mutex<BTreeMap<ScheduleId, Entry>>>,
    events_tx: mpsc::UnboundedSender<RegistryEvent>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl ScheduleRegistry {
    /// Create an empty registry that reports on `events_tx` and reads the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Config`](crate::error::ScheduleError::Config) if
    /// `config` fails validation.
    pub fn new(
        config: EngineConfig,
        events_tx: mpsc::UnboundedSender<RegistryEvent>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            events_tx,
            config,
            clock: Arc::new(SystemClock),
        })
    }

    /// Read time from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a schedule. Returns `false` if `id` is already taken.
    pub fn add(&self, id: ScheduleId, spec: ScheduleSpec) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(&id) {
            debug!("schedule {id} already registered");
            return false;
        }
        entries.insert(
            id,
            Entry {
                machine: ScheduleMachine::new(spec, self.config.clone()),
                status: RunStatus::Idle,
            },
        );
        debug!("schedule {id} registered");
        true
    }

    /// Start or resume a schedule. Returns `false` if `id` is unknown.
    pub fn start(&self, id: ScheduleId) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        if entry.status != RunStatus::Running {
            entry.status = RunStatus::Running;
            info!("schedule {id} started");
            self.emit(id, ScheduleEvent::Started);
        }
        true
    }

    /// Pause a running schedule. Returns `false` if `id` is unknown.
    pub fn pause(&self, id: ScheduleId) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        if entry.status == RunStatus::Running {
            entry.status = RunStatus::Paused;
            info!("schedule {id} paused");
            self.emit(id, ScheduleEvent::Paused);
        }
        true
    }

    /// Stop a schedule and unregister it. Returns `false` if `id` is unknown.
    pub fn stop(&self, id: ScheduleId) -> bool {
        let mut entries = self.lock();
        if entries.remove(&id).is_none() {
            return false;
        }
        info!("schedule {id} stopped");
        self.emit(id, ScheduleEvent::Stopped);
        true
    }

    /// Unregister a schedule, stopping it first.
    pub fn remove(&self, id: ScheduleId) -> bool {
        self.stop(id)
    }

    pub fn has(&self, id: ScheduleId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn status(&self, id: ScheduleId) -> Option<RunStatus> {
        self.lock().get(&id).map(|entry| entry.status)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<ScheduleId> {
        self.lock().keys().copied().collect()
    }

    /// Tick every running schedule once.
    ///
    /// Finished schedules are unregistered after their final event.
    pub fn tick(&self) {
        let now = self.clock.now();
        let mut entries = self.lock();
        let mut finished = Vec::new();

        for (id, entry) in entries.iter_mut() {
            if entry.status != RunStatus::Running {
                continue;
            }
            for event in entry.machine.tick(now) {
                self.emit(*id, event);
            }
            if entry.machine.is_finished() {
                finished.push(*id);
            }
        }

        for id in finished {
            entries.remove(&id);
            debug!("schedule {id} unregistered after finishing");
        }
    }

    /// Spawn the reactor loop, ticking every `tick_ms` until the event receiver is dropped.
    pub fn run(&self) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            info!(
                "schedule registry started, tick every {}ms",
                registry.config.tick_ms
            );
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(registry.config.tick_ms));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if registry.events_tx.is_closed() {
                    debug!("registry event channel closed, stopping");
                    return;
                }
                registry.tick();
            }
        })
    }

    fn emit(&self, id: ScheduleId, event: ScheduleEvent) {
        if self.events_tx.send(RegistryEvent { id, event }).is_err() {
            debug!("registry event channel closed, dropping event for schedule {id}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ScheduleId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
