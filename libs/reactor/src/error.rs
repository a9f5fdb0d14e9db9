//! Reactor Error Types
//!
//! Error taxonomy for the callback reactor: handler failures, canceled
//! actions, precondition violations, and configuration problems.
//!
//! Precondition violations (assigning a handler twice, invoking a
//! destroyed proxy) are returned synchronously from the offending call.
//! Everything else travels through [`Completion`](crate::Completion)
//! outcomes, never as panics crossing thread boundaries.

use thiserror::Error;

use crate::actor::ActorId;
use crate::scheduler::IsolateId;

/// Result alias used throughout the reactor
pub type Result<T> = std::result::Result<T, ReactorError>;

/// Error type returned by user-supplied handler callbacks
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Main reactor error type
///
/// `Clone` on purpose: one recorded handler failure poisons every
/// still-queued action of its actor, so the same error resolves many
/// completions. The original handler error is flattened to a message
/// to keep that cheap.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReactorError {
    /// A user-supplied handler callback returned an error
    #[error("handler failed: {message}")]
    HandlerFailed { message: String },

    /// Queued work that was destroyed before ever reaching a handler
    #[error("action canceled before delivery")]
    Canceled,

    /// The proxy already carries a handler or delegate
    #[error("proxy {actor_id} already has a handler or delegate assigned")]
    AlreadyAssigned { actor_id: ActorId },

    /// A proxy delegating directly to itself
    #[error("proxy {actor_id} cannot delegate to itself")]
    SelfDelegation { actor_id: ActorId },

    /// A delegate chain that would loop back onto one of its proxies
    #[error("proxy {actor_id} is part of a delegation cycle")]
    DelegationCycle { actor_id: ActorId },

    /// Operation on a proxy that is no longer active
    #[error("proxy {actor_id} is no longer active")]
    ProxyInactive { actor_id: ActorId },

    /// Operation on an isolate that is no longer active
    #[error("isolate {isolate_id} is no longer active")]
    IsolateInactive { isolate_id: IsolateId },

    /// The reactor has begun (or finished) shutting down
    #[error("reactor is shutting down")]
    ShuttingDown,

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

impl ReactorError {
    /// Flatten a handler callback error into the reactor taxonomy
    pub fn handler_failed(error: &HandlerError) -> Self {
        Self::HandlerFailed {
            message: error.to_string(),
        }
    }

    /// Configuration error with an optional offending field
    pub fn configuration(message: &str, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.to_string(),
            field: field.map(|f| f.to_string()),
        }
    }

    /// True for the cancellation marker
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// True for failures originating in user handler code
    pub fn is_handler_failure(&self) -> bool {
        matches!(self, Self::HandlerFailed { .. })
    }

    /// Coarse category label for structured logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::HandlerFailed { .. } => "handler",
            Self::Canceled => "canceled",
            Self::AlreadyAssigned { .. }
            | Self::SelfDelegation { .. }
            | Self::DelegationCycle { .. }
            | Self::ProxyInactive { .. }
            | Self::IsolateInactive { .. } => "precondition",
            Self::ShuttingDown => "shutdown",
            Self::Configuration { .. } => "configuration",
        }
    }
}
