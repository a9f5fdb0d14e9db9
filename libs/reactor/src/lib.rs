//! Callback Reactor
//!
//! In-process actor/scheduler engine that turns synchronous-looking
//! callback-interface invocations into queued, asynchronously-executed,
//! ordered actions with completions as results.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐      ┌───────────────────────┐
//! │       Reactor        │      │   Worker Pool          │
//! │                      │      │   (shared, dynamic)    │
//! │  ┌────────────────┐  │      │  ┌──────────────────┐  │
//! │  │ Proxy ─► Actor │──┼──────┼─►│ Scheduler batch  │  │
//! │  │  pending queue │  │      │  │ (one per isolate │  │
//! │  └────────────────┘  │      │  │  in flight, max) │  │
//! │  ┌────────────────┐  │      │  └──────────────────┘  │
//! │  │ Isolate        │  │      └───────────────────────┘
//! │  │  (Scheduler)   │  │
//! │  └────────────────┘  │
//! └──────────────────────┘
//! ```
//!
//! Invoking a [`Proxy`] never blocks: the call is queued against its
//! owning actor and answered with a [`Completion`]. Once a [`Handler`]
//! and an [`Isolate`] are assigned, queued and future actions are
//! delivered to the handler strictly in invocation order, under the
//! isolate's mutual exclusion. Destruction cascades from the
//! [`Reactor`] down through isolates and actors, and is idempotent at
//! every level.
//!
//! # Examples
//!
//! ```rust
//! use callback_reactor::{Handler, Reactor};
//!
//! struct Greeter {
//!     greeted: usize,
//! }
//!
//! impl Handler for Greeter {}
//!
//! let reactor = Reactor::new().unwrap();
//! let isolate = reactor.create_isolate().unwrap();
//! let proxy = reactor.create_proxy::<Greeter>().unwrap();
//!
//! // Queued before any handler exists; delivered after registration.
//! let done = proxy
//!     .invoke(|greeter: &mut Greeter| {
//!         greeter.greeted += 1;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! proxy.assign_handler(Greeter { greeted: 0 }, &isolate).unwrap();
//! done.get().unwrap();
//!
//! assert!(reactor.destroy(None));
//! ```

pub mod actor;
pub mod completion;
pub mod error;
pub mod metrics;
pub mod reactor;
pub mod scheduler;

pub use actor::{ActorId, CallbackResult, Handler, Lifecycle, Proxy};
pub use completion::{Completion, Outcome};
pub use error::{HandlerError, ReactorError, Result};
pub use metrics::{ReactorMetrics, ReactorStats};
pub use reactor::{Reactor, ReactorConfig};
pub use scheduler::{Isolate, IsolateId};
