//! Completions
//!
//! One-shot observable result cells. A [`Completion`] is handed out for
//! every action enqueued on a proxy and resolves exactly once, to a
//! success value or a [`ReactorError`]. Waiters may block (with an
//! optional timeout), poll, or register observers that fire on
//! resolution (immediately, if the cell is already resolved).

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ReactorError;

/// Final outcome carried by a completion
pub type Outcome<T> = std::result::Result<T, ReactorError>;

type Observer<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

enum State<T> {
    /// Not yet resolved; observers fire on resolution
    Pending { observers: Vec<Observer<T>> },
    /// Terminal. Never reverts.
    Resolved(Arc<Outcome<T>>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
}

/// One-shot future/result cell for a single action
///
/// Cheap to clone; all clones observe the same cell.
pub struct Completion<T = ()> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Completion<T> {
    /// Create an unresolved completion
    pub(crate) fn pending() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending {
                    observers: Vec::new(),
                }),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Completion that is already resolved with `value`
    pub fn resolved(value: T) -> Self {
        let completion = Self::pending();
        completion.resolve(Ok(value));
        completion
    }

    /// Completion that is already failed with `error`
    pub fn failed(error: ReactorError) -> Self {
        let completion = Self::pending();
        completion.resolve(Err(error));
        completion
    }

    /// Non-blocking check for resolution
    pub fn is_done(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Resolved(_))
    }

    /// Block until resolved
    ///
    /// `None` waits forever; `Some(Duration::ZERO)` is a pure poll.
    /// Returns whether the completion resolved within the timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.shared.state.lock();
        match timeout {
            None => {
                while matches!(&*state, State::Pending { .. }) {
                    self.shared.resolved.wait(&mut state);
                }
                true
            }
            Some(limit) => {
                let deadline = Instant::now() + limit;
                while matches!(&*state, State::Pending { .. }) {
                    if self.shared.resolved.wait_until(&mut state, deadline).timed_out() {
                        return matches!(&*state, State::Resolved(_));
                    }
                }
                true
            }
        }
    }

    /// Register an observer that fires once on resolution
    ///
    /// Fires inline on the caller's thread if already resolved,
    /// otherwise on whichever thread resolves the cell. Observers are
    /// never invoked while the cell's lock is held.
    pub fn observe<F>(&self, observer: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending { observers } => {
                    observers.push(Box::new(observer));
                    return;
                }
                State::Resolved(outcome) => Arc::clone(outcome),
            }
        };
        observer(&outcome);
    }

    /// Resolve the cell; returns false if it was already resolved
    pub(crate) fn resolve(&self, outcome: Outcome<T>) -> bool {
        let (outcome, observers) = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Resolved(_) => return false,
                State::Pending { observers } => {
                    let observers = std::mem::take(observers);
                    let outcome = Arc::new(outcome);
                    *state = State::Resolved(Arc::clone(&outcome));
                    self.shared.resolved.notify_all();
                    (outcome, observers)
                }
            }
        };
        for observer in observers {
            observer(&outcome);
        }
        true
    }

    /// Resolve with a success value
    pub(crate) fn succeed(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    /// Resolve with a failure
    pub(crate) fn fail(&self, error: ReactorError) -> bool {
        self.resolve(Err(error))
    }

    /// Whether two handles observe the same underlying cell
    pub fn same_cell(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Clone> Completion<T> {
    /// Non-blocking poll for the outcome
    pub fn try_get(&self) -> Option<Outcome<T>> {
        match &*self.shared.state.lock() {
            State::Pending { .. } => None,
            State::Resolved(outcome) => Some((**outcome).clone()),
        }
    }

    /// Block until resolved and return the outcome
    pub fn get(&self) -> Outcome<T> {
        self.wait(None);
        match &*self.shared.state.lock() {
            State::Resolved(outcome) => (**outcome).clone(),
            // Unreachable: wait(None) only returns once resolved.
            State::Pending { .. } => Err(ReactorError::Canceled),
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.shared.state.lock() {
            State::Pending { .. } => "pending",
            State::Resolved(outcome) => match &**outcome {
                Ok(_) => "succeeded",
                Err(_) => "failed",
            },
        };
        f.debug_struct("Completion").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_pending_then_succeed() {
        let completion = Completion::<u32>::pending();
        assert!(!completion.is_done());
        assert_eq!(completion.try_get(), None);

        assert!(completion.succeed(7));
        assert!(completion.is_done());
        assert_eq!(completion.get(), Ok(7));
    }

    #[test]
    fn test_resolution_is_terminal() {
        let completion = Completion::<u32>::pending();
        assert!(completion.succeed(1));
        assert!(!completion.fail(ReactorError::Canceled));
        assert_eq!(completion.get(), Ok(1));
    }

    #[test]
    fn test_observer_fires_on_late_resolution() {
        let completion = Completion::<u32>::pending();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        completion.observe(move |outcome| {
            assert_eq!(*outcome, Ok(3));
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        completion.succeed(3);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observer_fires_immediately_when_resolved() {
        let completion = Completion::<()>::failed(ReactorError::Canceled);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        completion.observe(move |outcome| {
            assert!(outcome.is_err());
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_timeout_expires() {
        let completion = Completion::<()>::pending();
        assert!(!completion.wait(Some(Duration::from_millis(20))));
        assert!(!completion.wait(Some(Duration::ZERO)));
    }

    #[test]
    fn test_blocking_wait_across_threads() {
        let completion = Completion::<u32>::pending();
        let resolver = completion.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            resolver.succeed(42);
        });
        assert!(completion.wait(Some(Duration::from_secs(5))));
        assert_eq!(completion.get(), Ok(42));
        handle.join().unwrap();
    }

    #[test]
    fn test_same_cell() {
        let a = Completion::<()>::pending();
        let b = a.clone();
        let c = Completion::<()>::pending();
        assert!(a.same_cell(&b));
        assert!(!a.same_cell(&c));
    }
}
