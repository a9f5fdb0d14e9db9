//! Reactor Core
//!
//! Root factory and owner: creates proxies (via actors) and isolates
//! (via schedulers), owns the shared worker pool that batches run on,
//! and performs cascading, idempotent shutdown of everything it
//! created. Destruction is deferred until both owned sets are empty;
//! only then is the pool released.
//!
//! # Lock Ordering (CRITICAL for deadlock prevention)
//!
//! When acquiring multiple reactor locks, ALWAYS follow this order:
//! 1. `lifecycle`
//! 2. `actors`
//! 3. `isolates`

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::actor::{ActorCore, ActorId, ActorRuntime, Handler, Lifecycle, Proxy};
use crate::completion::Completion;
use crate::error::{ReactorError, Result};
use crate::metrics::ReactorMetrics;
use crate::scheduler::{Isolate, IsolateId, SchedulerCore};

/// Reactor construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactorConfig {
    /// Maximum worker threads executing batches; `None` grows on demand
    pub worker_threads: Option<usize>,
    /// Name prefix for pool threads
    pub thread_name: String,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name: "reactor-worker".to_string(),
        }
    }
}

impl ReactorConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == Some(0) {
            return Err(ReactorError::configuration(
                "worker_threads must be at least 1",
                Some("worker_threads"),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(ReactorError::configuration(
                "thread_name must not be empty",
                Some("thread_name"),
            ));
        }
        Ok(())
    }
}

pub(crate) struct ReactorCore {
    reactor_id: String,
    lifecycle: Mutex<Lifecycle>,
    actors: Mutex<HashMap<ActorId, Arc<dyn ActorRuntime>>>,
    isolates: Mutex<HashMap<IsolateId, Arc<SchedulerCore>>>,
    /// Owned worker pool; taken (and released) exactly once at finalize
    pool: Mutex<Option<tokio::runtime::Runtime>>,
    pool_handle: tokio::runtime::Handle,
    metrics: Arc<ReactorMetrics>,
    destroy_completion: Completion<()>,
}

impl ReactorCore {
    /// Submit one scheduler batch to the shared pool
    ///
    /// Batches run on the blocking pool, which grows on demand up to
    /// the configured `worker_threads` cap and tolerates handler code
    /// that blocks.
    pub(crate) fn submit(&self, task: impl FnOnce() + Send + 'static) {
        self.pool_handle.spawn_blocking(task);
    }

    pub(crate) fn unregister_actor(&self, actor_id: &ActorId) {
        self.actors.lock().remove(actor_id);
        self.maybe_finalize();
    }

    pub(crate) fn unregister_isolate(&self, isolate_id: &IsolateId) {
        self.isolates.lock().remove(isolate_id);
        self.maybe_finalize();
    }

    /// Finish shutdown once every owned actor and scheduler is gone
    fn maybe_finalize(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::Destroying {
                return;
            }
            if !self.actors.lock().is_empty() || !self.isolates.lock().is_empty() {
                return;
            }
            *lifecycle = Lifecycle::Destroyed;
        }
        // shutdown_background: finalize may run on a pool thread.
        if let Some(pool) = self.pool.lock().take() {
            pool.shutdown_background();
        }
        info!(reactor_id = %self.reactor_id, "reactor destroyed, worker pool released");
        self.destroy_completion.succeed(());
    }
}

/// Root owner of all actors and schedulers
///
/// Cheap to clone; all clones drive the same reactor.
#[derive(Clone)]
pub struct Reactor {
    core: Arc<ReactorCore>,
}

impl Reactor {
    /// Create a reactor with the default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(ReactorConfig::default())
    }

    /// Create a reactor with an explicit configuration
    pub fn with_config(config: ReactorConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.thread_name(config.thread_name.clone()).enable_time();
        if let Some(worker_threads) = config.worker_threads {
            // Batches run on the blocking pool, so the cap must land
            // there as well as on the core workers.
            builder.worker_threads(worker_threads);
            builder.max_blocking_threads(worker_threads);
        }
        let pool = builder.build().map_err(|e| {
            ReactorError::configuration(&format!("failed to build worker pool: {}", e), None)
        })?;
        let pool_handle = pool.handle().clone();

        let reactor_id = format!("reactor-{}", Uuid::new_v4().simple());
        info!(
            reactor_id = %reactor_id,
            worker_threads = ?config.worker_threads,
            "creating reactor"
        );

        Ok(Self {
            core: Arc::new(ReactorCore {
                reactor_id,
                lifecycle: Mutex::new(Lifecycle::Active),
                actors: Mutex::new(HashMap::new()),
                isolates: Mutex::new(HashMap::new()),
                pool: Mutex::new(Some(pool)),
                pool_handle,
                metrics: Arc::new(ReactorMetrics::default()),
                destroy_completion: Completion::pending(),
            }),
        })
    }

    /// Create a proxy for callback interface `H`
    ///
    /// The backing actor starts unassigned and active; invocations
    /// queue up until a handler or delegate is assigned.
    pub fn create_proxy<H: Handler>(&self) -> Result<Proxy<H>> {
        let lifecycle = self.core.lifecycle.lock();
        if *lifecycle != Lifecycle::Active {
            return Err(ReactorError::ShuttingDown);
        }
        let actor = ActorCore::<H>::new(Arc::downgrade(&self.core), Arc::clone(&self.core.metrics));
        self.core
            .actors
            .lock()
            .insert(actor.actor_id(), Arc::clone(&actor) as Arc<dyn ActorRuntime>);
        drop(lifecycle);

        self.core.metrics.proxies_created.fetch_add(1, Ordering::Relaxed);
        debug!(
            reactor_id = %self.core.reactor_id,
            actor_id = %actor.actor_id(),
            "proxy created"
        );
        Ok(Proxy::new(actor))
    }

    /// Create an isolate (execution context)
    pub fn create_isolate(&self) -> Result<Isolate> {
        let lifecycle = self.core.lifecycle.lock();
        if *lifecycle != Lifecycle::Active {
            return Err(ReactorError::ShuttingDown);
        }
        let scheduler =
            SchedulerCore::new(Arc::downgrade(&self.core), Arc::clone(&self.core.metrics));
        self.core
            .isolates
            .lock()
            .insert(scheduler.id(), Arc::clone(&scheduler));
        drop(lifecycle);

        self.core.metrics.isolates_created.fetch_add(1, Ordering::Relaxed);
        debug!(
            reactor_id = %self.core.reactor_id,
            isolate_id = %scheduler.id(),
            "isolate created"
        );
        Ok(Isolate::from_core(scheduler))
    }

    /// Destroy everything this reactor owns; idempotent
    ///
    /// Triggers destroy on every actor, then on every scheduler (actors
    /// first, since schedulers cannot finish until their actors
    /// unregister), and waits up to `timeout` for the cascade to
    /// finish. Returns
    /// whether shutdown completed within the timeout (`None` = wait
    /// forever, `Some(ZERO)` = poll).
    pub fn destroy(&self, timeout: Option<Duration>) -> bool {
        self.trigger_destroy();
        self.await_termination(timeout)
    }

    fn trigger_destroy(&self) {
        {
            let mut lifecycle = self.core.lifecycle.lock();
            if *lifecycle != Lifecycle::Active {
                return;
            }
            *lifecycle = Lifecycle::Destroying;
        }
        info!(reactor_id = %self.core.reactor_id, "reactor destroying");

        let actors: Vec<_> = self.core.actors.lock().values().cloned().collect();
        for actor in actors {
            actor.trigger_destroy();
        }
        let isolates: Vec<_> = self.core.isolates.lock().values().cloned().collect();
        for isolate in isolates {
            isolate.destroy();
        }
        self.core.maybe_finalize();
    }

    /// Block until the reactor has fully shut down
    ///
    /// Returns whether shutdown completed within the timeout.
    pub fn await_termination(&self, timeout: Option<Duration>) -> bool {
        self.core.destroy_completion.wait(timeout)
    }

    /// Get reactor metrics
    pub fn metrics(&self) -> Arc<ReactorMetrics> {
        Arc::clone(&self.core.metrics)
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> Lifecycle {
        *self.core.lifecycle.lock()
    }

    /// Reactor ID for debugging
    pub fn reactor_id(&self) -> &str {
        &self.core.reactor_id
    }
}
