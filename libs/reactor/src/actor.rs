//! Actors and Proxies
//!
//! Every [`Proxy`] is backed by exactly one actor: a pending-action
//! queue, an assignment slot (handler, delegate, or nothing), a
//! one-shot failure record, and a monotonic lifecycle. Invoking the
//! proxy enqueues an action and returns its [`Completion`] without ever
//! blocking; a scheduler later drains the queue in FIFO order and
//! delivers each action to the assigned [`Handler`].
//!
//! # Lock Ordering (CRITICAL for deadlock prevention)
//!
//! When acquiring multiple locks, ALWAYS follow this order:
//! 1. actor state
//! 2. scheduler state
//! 3. reactor registries
//!
//! Handler callbacks never run while the actor state lock is held: the
//! handler is moved out of the state for the duration of the call, so a
//! callback may re-enter `invoke` on its own proxy without deadlocking.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::completion::Completion;
use crate::error::{HandlerError, ReactorError, Result};
use crate::metrics::ReactorMetrics;
use crate::reactor::ReactorCore;
use crate::scheduler::{Isolate, SchedulerCore};

/// Unique actor identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorId {
    id: Uuid,
}

impl ActorId {
    /// Create new actor ID
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// Get UUID
    pub fn uuid(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.id.simple())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic lifecycle shared by actors, schedulers, and the reactor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Destroying,
    Destroyed,
}

/// Result type returned by handler callbacks
pub type CallbackResult = std::result::Result<(), HandlerError>;

/// User-supplied implementation of a callback interface
///
/// Bound to a proxy with [`Proxy::assign_handler`]; from that point the
/// owning isolate delivers the proxy's queued actions to it, strictly
/// in invocation order. Any `Err` returned from a callback poisons the
/// actor: the error is recorded once, every still-queued action fails
/// with it, and the actor destroys itself.
pub trait Handler: Sized + Send + 'static {
    /// First callback after assignment, before any queued action
    fn registered(&mut self, _proxy: &Proxy<Self>, _isolate: &Isolate) -> CallbackResult {
        Ok(())
    }

    /// Last callback of a clean destroy (no failure recorded)
    fn unregistered(&mut self) -> CallbackResult {
        Ok(())
    }

    /// Last callback of a poisoned destroy; errors are traced only
    fn failed(&mut self, _error: &ReactorError) -> CallbackResult {
        Ok(())
    }
}

pub(crate) type InvokeFn<H> = Box<dyn FnOnce(&mut H) -> CallbackResult + Send>;

/// A queued unit of work belonging to one actor
enum Action<H: Handler> {
    Invoke {
        run: InvokeFn<H>,
        completion: Completion<()>,
    },
    Register {
        completion: Completion<()>,
    },
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assignment {
    Unassigned,
    Registering,
    Assigned,
    Delegated,
}

struct ActorState<H: Handler> {
    pending: VecDeque<Action<H>>,
    assignment: Assignment,
    handler: Option<H>,
    delegate: Option<Proxy<H>>,
    scheduler: Option<Arc<SchedulerCore>>,
    /// First recorded handler failure; set at most once
    failure: Option<ReactorError>,
    lifecycle: Lifecycle,
}

/// Per-proxy actor state machine
pub(crate) struct ActorCore<H: Handler> {
    id: ActorId,
    reactor: Weak<ReactorCore>,
    metrics: Arc<ReactorMetrics>,
    state: Mutex<ActorState<H>>,
    destroy_completion: Completion<()>,
    self_ref: Weak<ActorCore<H>>,
}

/// Type-erased actor surface used by schedulers and the reactor
pub(crate) trait ActorRuntime: Send + Sync {
    fn actor_id(&self) -> ActorId;
    /// Execute every currently queued action, FIFO
    fn drain_pending(&self);
    fn trigger_destroy(&self) -> Completion<()>;
}

impl<H: Handler> ActorCore<H> {
    pub(crate) fn new(reactor: Weak<ReactorCore>, metrics: Arc<ReactorMetrics>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id: ActorId::new(),
            reactor,
            metrics,
            state: Mutex::new(ActorState {
                pending: VecDeque::new(),
                assignment: Assignment::Unassigned,
                handler: None,
                delegate: None,
                scheduler: None,
                failure: None,
                lifecycle: Lifecycle::Active,
            }),
            destroy_completion: Completion::pending(),
            self_ref: self_ref.clone(),
        })
    }

    fn invoke(&self, run: InvokeFn<H>) -> Result<Completion<()>> {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Active {
            return Err(ReactorError::ProxyInactive { actor_id: self.id });
        }

        // Delegated proxies forward immediately instead of queueing.
        if let Some(delegate) = state.delegate.clone() {
            drop(state);
            let completion = Completion::pending();
            Self::forward_into(&delegate, run, &completion);
            return Ok(completion);
        }

        let completion = Completion::pending();
        state.pending.push_back(Action::Invoke {
            run,
            completion: completion.clone(),
        });
        let scheduler = if state.assignment == Assignment::Assigned {
            state.scheduler.clone()
        } else {
            None
        };
        drop(state);

        if let (Some(scheduler), Some(actor)) = (scheduler, self.self_ref.upgrade()) {
            scheduler.enqueue_actor(actor as Arc<dyn ActorRuntime>);
        }
        Ok(completion)
    }

    /// Dispatch `run` to the delegate and mirror its outcome 1:1
    fn forward_into(delegate: &Proxy<H>, run: InvokeFn<H>, completion: &Completion<()>) {
        match delegate.core.invoke(run) {
            Ok(inner) => {
                let chained = completion.clone();
                inner.observe(move |outcome| {
                    chained.resolve(outcome.clone());
                });
            }
            Err(err) => {
                completion.fail(err);
            }
        }
    }

    fn assign_handler(&self, handler: H, isolate: &Isolate) -> Result<Completion<()>> {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Active {
            return Err(ReactorError::ProxyInactive { actor_id: self.id });
        }
        if state.assignment != Assignment::Unassigned {
            return Err(ReactorError::AlreadyAssigned { actor_id: self.id });
        }
        let actor = match self.self_ref.upgrade() {
            Some(actor) => actor,
            None => return Err(ReactorError::ProxyInactive { actor_id: self.id }),
        };

        let scheduler = Arc::clone(isolate.core());
        scheduler.register_actor(Arc::clone(&actor) as Arc<dyn ActorRuntime>)?;

        let completion = Completion::pending();
        state.assignment = Assignment::Registering;
        state.handler = Some(handler);
        state.scheduler = Some(Arc::clone(&scheduler));
        // Registration always runs before actions queued so far are
        // delivered: a handler cannot receive work it never registered
        // for.
        state.pending.push_front(Action::Register {
            completion: completion.clone(),
        });
        drop(state);

        debug!(
            actor_id = %self.id,
            isolate_id = %scheduler.id(),
            "handler assigned, registration queued"
        );
        scheduler.enqueue_actor(actor as Arc<dyn ActorRuntime>);
        Ok(completion)
    }

    fn assign_delegate(&self, delegate: &Proxy<H>) -> Result<()> {
        if delegate.id() == self.id {
            return Err(ReactorError::SelfDelegation { actor_id: self.id });
        }
        // Walk the delegate chain: a cycle would make forwarding
        // recurse without bound on the next invoke.
        let mut cursor = delegate.core.state.lock().delegate.clone();
        while let Some(next) = cursor {
            if next.id() == self.id {
                return Err(ReactorError::DelegationCycle { actor_id: self.id });
            }
            cursor = next.core.state.lock().delegate.clone();
        }
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Active {
            return Err(ReactorError::ProxyInactive { actor_id: self.id });
        }
        if state.assignment != Assignment::Unassigned {
            return Err(ReactorError::AlreadyAssigned { actor_id: self.id });
        }
        state.assignment = Assignment::Delegated;
        state.delegate = Some(delegate.clone());
        let queued: Vec<Action<H>> = state.pending.drain(..).collect();
        drop(state);

        debug!(
            actor_id = %self.id,
            delegate_id = %delegate.id(),
            forwarded = queued.len(),
            "delegate assigned"
        );
        // Re-dispatch everything queued so far, preserving FIFO order.
        for action in queued {
            match action {
                Action::Invoke { run, completion } => {
                    Self::forward_into(delegate, run, &completion);
                }
                // Only invocations can be queued while unassigned.
                Action::Register { completion } => {
                    completion.fail(ReactorError::Canceled);
                }
                Action::Destroy => {}
            }
        }
        Ok(())
    }

    fn destroy(&self) -> Completion<()> {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Active {
            return self.destroy_completion.clone();
        }
        state.lifecycle = Lifecycle::Destroying;

        match state.assignment {
            // No handler work can be pending: destroy inline.
            Assignment::Unassigned | Assignment::Delegated => {
                let queued: Vec<Action<H>> = state.pending.drain(..).collect();
                state.delegate = None;
                state.lifecycle = Lifecycle::Destroyed;
                drop(state);

                for action in queued {
                    self.cancel_action(action, None);
                }
                self.unregister_from_reactor();
                self.metrics.actors_destroyed.fetch_add(1, Ordering::Relaxed);
                debug!(actor_id = %self.id, "proxy destroyed inline");
                self.destroy_completion.succeed(());
                self.destroy_completion.clone()
            }
            // Destroy runs last, after every already-queued action.
            Assignment::Registering | Assignment::Assigned => {
                state.pending.push_back(Action::Destroy);
                let scheduler = state.scheduler.clone();
                drop(state);

                debug!(actor_id = %self.id, "destroy queued behind pending actions");
                if let (Some(scheduler), Some(actor)) = (scheduler, self.self_ref.upgrade()) {
                    scheduler.enqueue_actor(actor as Arc<dyn ActorRuntime>);
                }
                self.destroy_completion.clone()
            }
        }
    }

    /// FIFO drain executed by the owning scheduler's batch
    fn drain(self: &Arc<Self>) {
        loop {
            let mut state = self.state.lock();
            let action = match state.pending.pop_front() {
                Some(action) => action,
                None => return,
            };
            match action {
                Action::Register { completion } => {
                    if let Some(failure) = state.failure.clone() {
                        drop(state);
                        completion.fail(failure);
                        continue;
                    }
                    let (mut handler, scheduler) =
                        match (state.handler.take(), state.scheduler.clone()) {
                            (Some(handler), Some(scheduler)) => (handler, scheduler),
                            _ => {
                                drop(state);
                                completion.fail(ReactorError::Canceled);
                                continue;
                            }
                        };
                    drop(state);

                    let proxy = Proxy {
                        core: Arc::clone(self),
                    };
                    let isolate = Isolate::from_core(scheduler);
                    let result = handler.registered(&proxy, &isolate);

                    let mut state = self.state.lock();
                    state.handler = Some(handler);
                    match result {
                        Ok(()) => {
                            state.assignment = Assignment::Assigned;
                            drop(state);
                            debug!(actor_id = %self.id, "handler registered");
                            completion.succeed(());
                        }
                        Err(err) => {
                            let failure = self.record_failure(&mut *state, err);
                            drop(state);
                            completion.fail(failure);
                            self.destroy();
                        }
                    }
                }
                Action::Invoke { run, completion } => {
                    if let Some(failure) = state.failure.clone() {
                        drop(state);
                        self.metrics.record_action_failed();
                        completion.fail(failure);
                        continue;
                    }
                    let mut handler = match state.handler.take() {
                        Some(handler) => handler,
                        None => {
                            drop(state);
                            self.metrics.record_action_canceled();
                            completion.fail(ReactorError::Canceled);
                            continue;
                        }
                    };
                    drop(state);

                    let result = run(&mut handler);

                    let mut state = self.state.lock();
                    state.handler = Some(handler);
                    match result {
                        Ok(()) => {
                            drop(state);
                            self.metrics.record_action_executed();
                            completion.succeed(());
                        }
                        Err(err) => {
                            let failure = self.record_failure(&mut *state, err);
                            drop(state);
                            self.metrics.record_action_failed();
                            completion.fail(failure);
                            self.destroy();
                        }
                    }
                }
                Action::Destroy => {
                    drop(state);
                    self.execute_destroy();
                    return;
                }
            }
        }
    }

    /// Record the actor's terminal failure; first one wins
    fn record_failure(&self, state: &mut ActorState<H>, err: HandlerError) -> ReactorError {
        self.metrics.record_handler_failure();
        match &state.failure {
            Some(first) => {
                error!(
                    actor_id = %self.id,
                    error = %err,
                    "handler failed after actor was already poisoned"
                );
                first.clone()
            }
            None => {
                let failure = ReactorError::handler_failed(&err);
                error!(actor_id = %self.id, error = %err, "handler failed, poisoning actor");
                state.failure = Some(failure.clone());
                failure
            }
        }
    }

    /// Terminal destroy: final handler callback, unregistration, and
    /// resolution of everything still outstanding
    fn execute_destroy(self: &Arc<Self>) {
        let (mut failure, handler, scheduler, leftovers) = {
            let mut state = self.state.lock();
            state.lifecycle = Lifecycle::Destroying;
            (
                state.failure.clone(),
                state.handler.take(),
                state.scheduler.take(),
                state.pending.drain(..).collect::<Vec<_>>(),
            )
        };

        if let Some(mut handler) = handler {
            match &failure {
                Some(err) => {
                    // Best effort: a failing failure-callback is only traced.
                    if let Err(callback_err) = handler.failed(err) {
                        warn!(
                            actor_id = %self.id,
                            error = %callback_err,
                            "failure callback itself failed, ignoring"
                        );
                    }
                }
                None => {
                    if let Err(callback_err) = handler.unregistered() {
                        warn!(
                            actor_id = %self.id,
                            error = %callback_err,
                            "unregistration callback failed"
                        );
                        self.metrics.record_handler_failure();
                        failure = Some(ReactorError::handler_failed(&callback_err));
                    }
                }
            }
        }

        for action in leftovers {
            self.cancel_action(action, failure.as_ref());
        }

        // Destroyed before unregistering: once the scheduler (and, in
        // cascade, the reactor) observes this actor gone, its lifecycle
        // must already be terminal.
        {
            let mut state = self.state.lock();
            state.failure = failure.clone();
            state.lifecycle = Lifecycle::Destroyed;
        }
        if let Some(scheduler) = scheduler {
            scheduler.unregister_actor(&self.id);
        }
        self.unregister_from_reactor();

        self.metrics.actors_destroyed.fetch_add(1, Ordering::Relaxed);
        debug!(actor_id = %self.id, failed = failure.is_some(), "actor destroyed");
        match failure {
            Some(err) => self.destroy_completion.fail(err),
            None => self.destroy_completion.succeed(()),
        };
    }

    /// Resolve a never-executed action with the recorded failure, or
    /// the cancellation marker if the actor never failed
    fn cancel_action(&self, action: Action<H>, failure: Option<&ReactorError>) {
        let err = failure.cloned().unwrap_or(ReactorError::Canceled);
        match action {
            Action::Invoke { completion, .. } | Action::Register { completion } => {
                self.metrics.record_action_canceled();
                completion.fail(err);
            }
            Action::Destroy => {}
        }
    }

    fn unregister_from_reactor(&self) {
        if let Some(reactor) = self.reactor.upgrade() {
            reactor.unregister_actor(&self.id);
        }
    }

    fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }
}

impl<H: Handler> ActorRuntime for ActorCore<H> {
    fn actor_id(&self) -> ActorId {
        self.id
    }

    fn drain_pending(&self) {
        if let Some(actor) = self.self_ref.upgrade() {
            actor.drain();
        }
    }

    fn trigger_destroy(&self) -> Completion<()> {
        self.destroy()
    }
}

/// Client-facing handle implementing a callback interface
///
/// Every invocation is queued against the owning actor and answered
/// with a [`Completion`]; nothing here ever blocks. A concrete adapter
/// per callback interface simply wraps its methods around
/// [`Proxy::invoke`].
pub struct Proxy<H: Handler> {
    core: Arc<ActorCore<H>>,
}

impl<H: Handler> Clone for Proxy<H> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<H: Handler> Proxy<H> {
    pub(crate) fn new(core: Arc<ActorCore<H>>) -> Self {
        Self { core }
    }

    /// Get actor ID
    pub fn id(&self) -> ActorId {
        self.core.id
    }

    /// Queue one callback-interface invocation; never blocks
    ///
    /// The closure runs on the owning isolate once a handler is
    /// assigned, or is forwarded if a delegate is. Fails synchronously
    /// only when the proxy is no longer active.
    pub fn invoke<F>(&self, action: F) -> Result<Completion<()>>
    where
        F: FnOnce(&mut H) -> CallbackResult + Send + 'static,
    {
        self.core.invoke(Box::new(action))
    }

    /// Bind a handler and an isolate to this proxy
    ///
    /// The returned completion resolves once `registered` has run on
    /// the isolate. Fails synchronously if the proxy already carries a
    /// handler or delegate, or is no longer active.
    pub fn assign_handler(&self, handler: H, isolate: &Isolate) -> Result<Completion<()>> {
        self.core.assign_handler(handler, isolate)
    }

    /// Forward this proxy's actions to another proxy of the same
    /// interface, draining anything already queued in FIFO order
    pub fn assign_delegate(&self, delegate: &Proxy<H>) -> Result<()> {
        self.core.assign_delegate(delegate)
    }

    /// Destroy the proxy; idempotent
    ///
    /// Every call returns the same completion, which resolves once the
    /// actor has fully torn down (success on a clean destroy, the
    /// recorded failure otherwise).
    pub fn destroy(&self) -> Completion<()> {
        self.core.destroy()
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> Lifecycle {
        self.core.lifecycle()
    }
}

impl<H: Handler> fmt::Debug for Proxy<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("id", &self.core.id)
            .field("lifecycle", &self.core.lifecycle())
            .finish()
    }
}
