//! LifecycleController - ordered startup and shutdown of the whole service.
//!
//! Startup: engines initialize (concurrently, any failure is fatal) → gates →
//! worker pools spawn and report ready → dispatcher opens.
//!
//! Shutdown: dispatcher closes → stop marker per worker → worker loops joined
//! → engines released. Idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, SchedulerConfig};
use crate::dispatcher::{Dispatcher, SubmitError};
use crate::engine::{EngineError, Engines};
use crate::gate::{GateError, Gates};
use crate::health::{GateStatus, ServiceState, StatusSnapshot, WorkerStatus};
use crate::pool::{PoolError, WorkerPool};
use crate::task::{Outcome, Payload, TaskKind};
use crate::version::VersionInfo;
use crate::worker::WorkerContext;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{kind} engine failed to initialize: {source}")]
    Engine {
        kind: TaskKind,
        #[source]
        source: EngineError,
    },

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("startup called in state {0:?}")]
    InvalidState(ServiceState),
}

pub struct LifecycleController {
    config: SchedulerConfig,
    engines: Engines,
    gates: OnceLock<Gates>,
    dispatcher: Dispatcher,
    state: watch::Sender<ServiceState>,
    engines_live: AtomicBool,
    shutdown_token: CancellationToken,
    /// Held for the whole startup sequence; shutdown waits on it.
    startup: Mutex<()>,
    /// Held for the whole shutdown sequence; `true` once it has completed.
    shutdown_done: Mutex<bool>,
    version: VersionInfo,
}

impl LifecycleController {
    /// Validate config and lay out the pools. Nothing runs yet; the service
    /// reports `Starting` until [`initialize`](Self::initialize) succeeds.
    pub fn new(config: SchedulerConfig, engines: Engines) -> Result<Self, StartupError> {
        config.validate()?;

        let pools = TaskKind::ALL
            .into_iter()
            .map(|kind| {
                WorkerPool::new(kind, config.workers_per_pool, config.queue_capacity_per_worker)
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let dispatcher = Dispatcher::new(pools, config.queue_policy);

        Ok(Self {
            config,
            engines,
            gates: OnceLock::new(),
            dispatcher,
            state: watch::Sender::new(ServiceState::Starting),
            engines_live: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            startup: Mutex::new(()),
            shutdown_done: Mutex::new(false),
            version: VersionInfo::new(),
        })
    }

    /// Build and fully start a controller.
    pub async fn start(config: SchedulerConfig, engines: Engines) -> Result<Self, StartupError> {
        let controller = Self::new(config, engines)?;
        controller.initialize().await?;
        Ok(controller)
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    /// Run the startup sequence. On failure everything already started is
    /// torn down and the state becomes `StartupFailed`.
    ///
    /// A shutdown requested meanwhile waits for this to finish; the service
    /// then never becomes `Ready` and `InvalidState(Stopping)` is returned.
    pub async fn initialize(&self) -> Result<(), StartupError> {
        let _startup = self.startup.lock().await;
        let state = self.state();
        if state != ServiceState::Starting {
            return Err(StartupError::InvalidState(state));
        }

        match self.bring_up().await {
            Ok(()) => {
                let opened = self.state.send_if_modified(|state| {
                    if *state == ServiceState::Starting {
                        *state = ServiceState::Ready;
                        true
                    } else {
                        false
                    }
                });
                if !opened {
                    let state = self.state();
                    tracing::warn!(?state, "Shutdown requested during startup");
                    return Err(StartupError::InvalidState(state));
                }
                self.dispatcher.open();
                tracing::info!(
                    workers_per_pool = self.config.workers_per_pool,
                    queue_capacity = self.config.queue_capacity_per_worker,
                    "Service ready"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "Startup failed");
                self.stop_pools().await;
                self.release_engines().await;
                self.state.send_replace(ServiceState::StartupFailed);
                Err(err)
            }
        }
    }

    async fn bring_up(&self) -> Result<(), StartupError> {
        self.engines_live.store(true, Ordering::Release);
        self.engines
            .initialize()
            .await
            .map_err(|(kind, source)| StartupError::Engine { kind, source })?;

        let gates = Gates::new(&self.config.gate_capacity)?;
        let gates = self.gates.get_or_init(|| gates).clone();

        let ctx = Arc::new(WorkerContext {
            gates,
            engines: self.engines.clone(),
            skip_abandoned: self.config.skip_abandoned_tasks,
        });
        futures::future::try_join_all(
            self.dispatcher
                .pools()
                .iter()
                .map(|pool| pool.spawn(Arc::clone(&ctx))),
        )
        .await?;
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Watch state changes (e.g. to wait for `Ready`).
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Submit a payload and wait for its outcome.
    pub async fn submit_task(
        &self,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Outcome, SubmitError> {
        self.dispatcher.submit_and_wait(payload, timeout).await
    }

    pub fn status(&self) -> StatusSnapshot {
        let workers: Vec<WorkerStatus> = self
            .dispatcher
            .pools()
            .iter()
            .flat_map(|pool| pool.workers())
            .map(|worker| WorkerStatus {
                id: worker.id().to_string(),
                kind: worker.id().kind,
                queued: worker.queue_len(),
                capacity: worker.capacity(),
                state: worker.state(),
            })
            .collect();

        let gates: Vec<GateStatus> = self
            .gates
            .get()
            .map(|gates| {
                gates
                    .iter()
                    .map(|gate| GateStatus {
                        accelerator: gate.accelerator(),
                        capacity: gate.capacity(),
                        held: gate.held(),
                        waiting: gate.waiting(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        StatusSnapshot {
            state: self.state(),
            workers,
            gates,
        }
    }

    /// Cancelled once shutdown has been requested.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// First shutdown step only: refuse new work and notify listeners.
    /// Callers already waiting on a task keep waiting.
    pub fn trigger_shutdown(&self) {
        self.dispatcher.close();
        self.state.send_if_modified(|state| match state {
            ServiceState::Starting | ServiceState::Ready => {
                *state = ServiceState::Stopping;
                true
            }
            _ => false,
        });
        if !self.shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested");
            self.shutdown_token.cancel();
        }
    }

    /// Full shutdown. A second call waits for the first to finish and returns.
    pub async fn shutdown(&self) {
        let mut done = self.shutdown_done.lock().await;
        if *done {
            return;
        }

        self.trigger_shutdown();
        // Engines still initializing must not be released underneath it.
        let _startup = self.startup.lock().await;
        self.stop_pools().await;
        self.release_engines().await;

        self.state.send_if_modified(|state| {
            if *state == ServiceState::Stopping {
                *state = ServiceState::Stopped;
                true
            } else {
                false
            }
        });
        *done = true;
        tracing::info!("Shutdown complete");
    }

    async fn stop_pools(&self) {
        futures::future::join_all(self.dispatcher.pools().iter().map(|pool| pool.stop())).await;
    }

    async fn release_engines(&self) {
        if self.engines_live.swap(false, Ordering::AcqRel) {
            self.engines.release().await;
        }
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("state", &self.state())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
