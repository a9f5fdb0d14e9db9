//! Schedulers and Isolates
//!
//! An [`Isolate`] is the logical single-threaded execution context
//! handlers run under; a scheduler is its runtime driver. The scheduler
//! keeps the set of actors assigned to the isolate, a queue of actors
//! with unexecuted work, and a four-state run flag that guarantees at
//! most one batch of this isolate's work is in flight at any instant,
//! even though batches run on the reactor's shared worker pool and
//! different isolates execute concurrently.
//!
//! Work enqueued while a batch is running flips the flag to
//! `RunningNeedsReschedule`, so nothing submitted mid-batch is lost.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

use crate::actor::{ActorId, ActorRuntime, Lifecycle};
use crate::completion::Completion;
use crate::error::{ReactorError, Result};
use crate::metrics::ReactorMetrics;
use crate::reactor::ReactorCore;

/// Unique isolate identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IsolateId {
    id: Uuid,
}

impl IsolateId {
    /// Create new isolate ID
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// Get UUID
    pub fn uuid(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for IsolateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "isolate-{}", self.id.simple())
    }
}

impl Default for IsolateId {
    fn default() -> Self {
        Self::new()
    }
}

/// Batch-execution state; at most one batch per scheduler by construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Scheduled,
    Running,
    RunningNeedsReschedule,
}

struct SchedulerState {
    /// Actors currently assigned to this isolate
    registered: HashMap<ActorId, Arc<dyn ActorRuntime>>,
    /// Actors with unexecuted work, visited FIFO on the next batch
    enqueued: VecDeque<ActorId>,
    enqueued_set: HashSet<ActorId>,
    run_state: RunState,
    lifecycle: Lifecycle,
}

/// Runtime driver for one isolate
pub(crate) struct SchedulerCore {
    id: IsolateId,
    reactor: Weak<ReactorCore>,
    metrics: Arc<ReactorMetrics>,
    state: Mutex<SchedulerState>,
    destroy_completion: Completion<()>,
    self_ref: Weak<SchedulerCore>,
}

impl SchedulerCore {
    pub(crate) fn new(reactor: Weak<ReactorCore>, metrics: Arc<ReactorMetrics>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id: IsolateId::new(),
            reactor,
            metrics,
            state: Mutex::new(SchedulerState {
                registered: HashMap::new(),
                enqueued: VecDeque::new(),
                enqueued_set: HashSet::new(),
                run_state: RunState::Idle,
                lifecycle: Lifecycle::Active,
            }),
            destroy_completion: Completion::pending(),
            self_ref: self_ref.clone(),
        })
    }

    pub(crate) fn id(&self) -> IsolateId {
        self.id
    }

    /// Assign an actor to this isolate
    pub(crate) fn register_actor(&self, actor: Arc<dyn ActorRuntime>) -> Result<()> {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Active {
            return Err(ReactorError::IsolateInactive {
                isolate_id: self.id,
            });
        }
        state.registered.insert(actor.actor_id(), actor);
        Ok(())
    }

    /// Mark an actor as having unexecuted work
    pub(crate) fn enqueue_actor(&self, actor: Arc<dyn ActorRuntime>) {
        let actor_id = actor.actor_id();
        let mut state = self.state.lock();
        if !state.registered.contains_key(&actor_id) {
            return;
        }
        if state.enqueued_set.insert(actor_id) {
            state.enqueued.push_back(actor_id);
        }
        self.schedule_locked(&mut state);
    }

    fn schedule_locked(&self, state: &mut SchedulerState) {
        match state.run_state {
            RunState::Idle => {
                state.run_state = RunState::Scheduled;
                self.submit_batch();
            }
            RunState::Scheduled | RunState::RunningNeedsReschedule => {}
            RunState::Running => {
                state.run_state = RunState::RunningNeedsReschedule;
            }
        }
    }

    fn submit_batch(&self) {
        let scheduler = match self.self_ref.upgrade() {
            Some(scheduler) => scheduler,
            None => return,
        };
        if let Some(reactor) = self.reactor.upgrade() {
            reactor.submit(move || scheduler.execute_batch());
        }
    }

    /// Runs on a worker thread; never concurrently with itself
    fn execute_batch(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            state.run_state = RunState::Running;
        }

        loop {
            let next = {
                let mut state = self.state.lock();
                match state.enqueued.pop_front() {
                    None => None,
                    Some(actor_id) => {
                        state.enqueued_set.remove(&actor_id);
                        Some(state.registered.get(&actor_id).cloned())
                    }
                }
            };
            match next {
                None => break,
                Some(Some(actor)) => actor.drain_pending(),
                // Unregistered while queued; skip.
                Some(None) => continue,
            }
        }

        self.metrics.record_batch();
        self.maybe_finish_destroy();

        let resubmit = {
            let mut state = self.state.lock();
            match state.run_state {
                RunState::RunningNeedsReschedule => {
                    state.run_state = RunState::Scheduled;
                    true
                }
                _ => {
                    state.run_state = RunState::Idle;
                    false
                }
            }
        };
        if resubmit {
            self.submit_batch();
        }
    }

    /// Destroy the isolate; idempotent
    ///
    /// Triggers destroy on every registered actor and defers its own
    /// completion until the last of them has unregistered.
    pub(crate) fn destroy(&self) -> Completion<()> {
        let actors: Vec<Arc<dyn ActorRuntime>> = {
            let mut state = self.state.lock();
            if state.lifecycle != Lifecycle::Active {
                return self.destroy_completion.clone();
            }
            state.lifecycle = Lifecycle::Destroying;
            state.registered.values().cloned().collect()
        };

        debug!(isolate_id = %self.id, actors = actors.len(), "isolate destroying");
        for actor in actors {
            actor.trigger_destroy();
        }
        self.maybe_finish_destroy();
        self.destroy_completion.clone()
    }

    /// Drop an actor from this isolate (its destroy or reassignment)
    pub(crate) fn unregister_actor(&self, actor_id: &ActorId) {
        {
            let mut state = self.state.lock();
            state.registered.remove(actor_id);
            state.enqueued_set.remove(actor_id);
        }
        self.maybe_finish_destroy();
    }

    /// Complete a pending destroy once the registered set is empty
    fn maybe_finish_destroy(&self) {
        let finish = {
            let mut state = self.state.lock();
            if state.lifecycle == Lifecycle::Destroying && state.registered.is_empty() {
                state.lifecycle = Lifecycle::Destroyed;
                true
            } else {
                false
            }
        };
        if finish {
            if let Some(reactor) = self.reactor.upgrade() {
                reactor.unregister_isolate(&self.id);
            }
            self.metrics.isolates_destroyed.fetch_add(1, Ordering::Relaxed);
            debug!(isolate_id = %self.id, "isolate destroyed");
            self.destroy_completion.succeed(());
        }
    }

    fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }
}

/// Execution-context handle exposed to clients and handlers
///
/// Cheap to clone; all clones drive the same scheduler.
pub struct Isolate {
    core: Arc<SchedulerCore>,
}

impl Clone for Isolate {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl Isolate {
    pub(crate) fn from_core(core: Arc<SchedulerCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<SchedulerCore> {
        &self.core
    }

    /// Get isolate ID
    pub fn id(&self) -> IsolateId {
        self.core.id
    }

    /// Destroy the isolate; idempotent
    ///
    /// Completes only after every actor assigned here has unregistered.
    pub fn destroy(&self) -> Completion<()> {
        self.core.destroy()
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> Lifecycle {
        self.core.lifecycle()
    }
}

impl fmt::Debug for Isolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolate")
            .field("id", &self.core.id)
            .field("lifecycle", &self.core.lifecycle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubActor {
        id: ActorId,
    }

    impl ActorRuntime for StubActor {
        fn actor_id(&self) -> ActorId {
            self.id
        }

        fn drain_pending(&self) {}

        fn trigger_destroy(&self) -> Completion<()> {
            Completion::resolved(())
        }
    }

    fn detached_scheduler() -> Arc<SchedulerCore> {
        // No reactor behind it: batches are never submitted, which
        // lets these tests inspect pure bookkeeping.
        SchedulerCore::new(Weak::new(), Arc::new(ReactorMetrics::default()))
    }

    #[test]
    fn test_enqueue_deduplicates() {
        let scheduler = detached_scheduler();
        let actor: Arc<dyn ActorRuntime> = Arc::new(StubActor { id: ActorId::new() });
        scheduler.register_actor(Arc::clone(&actor)).unwrap();

        scheduler.enqueue_actor(Arc::clone(&actor));
        scheduler.enqueue_actor(actor);

        let state = scheduler.state.lock();
        assert_eq!(state.enqueued.len(), 1);
    }

    #[test]
    fn test_enqueue_ignores_unregistered_actor() {
        let scheduler = detached_scheduler();
        let actor: Arc<dyn ActorRuntime> = Arc::new(StubActor { id: ActorId::new() });

        scheduler.enqueue_actor(actor);

        let state = scheduler.state.lock();
        assert!(state.enqueued.is_empty());
    }

    #[test]
    fn test_destroy_waits_for_registered_actors() {
        let scheduler = detached_scheduler();
        let actor_id = ActorId::new();
        let actor: Arc<dyn ActorRuntime> = Arc::new(StubActor { id: actor_id });
        scheduler.register_actor(actor).unwrap();

        let completion = scheduler.destroy();
        assert!(!completion.is_done());
        assert_eq!(scheduler.lifecycle(), Lifecycle::Destroying);

        scheduler.unregister_actor(&actor_id);
        assert!(completion.is_done());
        assert_eq!(scheduler.lifecycle(), Lifecycle::Destroyed);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let scheduler = detached_scheduler();
        let first = scheduler.destroy();
        let second = scheduler.destroy();
        assert!(first.same_cell(&second));
        assert_eq!(first.get(), Ok(()));
    }

    #[test]
    fn test_register_rejected_after_destroy() {
        let scheduler = detached_scheduler();
        scheduler.destroy();

        let actor: Arc<dyn ActorRuntime> = Arc::new(StubActor { id: ActorId::new() });
        let err = scheduler.register_actor(actor).unwrap_err();
        assert!(matches!(err, ReactorError::IsolateInactive { .. }));
    }
}
