//! Driver-style client of the callback reactor.
//!
//! Models how backend drivers consume the reactor contract: one proxy
//! per pending request/response correlation token, with a handler that
//! forwards the eventual result to a transmitter channel. Business
//! logic awaits or observes the returned completions.

use callback_reactor::{
    CallbackResult, Completion, Handler, Isolate, Proxy, Reactor, ReactorError, Result,
};
use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::time::Duration;

/// Request/response correlation token
pub type Token = u64;

/// What the transmitter eventually sees for one token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Token, String),
    Error(Token, String),
}

/// Handler forwarding one correlation slot's outcome to the transmitter
pub struct ResponseForwarder {
    token: Token,
    transmitter: Sender<Response>,
}

impl ResponseForwarder {
    fn complete(&mut self, payload: String) -> CallbackResult {
        self.transmitter
            .send(Response::Ok(self.token, payload))
            .ok();
        Ok(())
    }
}

impl Handler for ResponseForwarder {
    fn failed(&mut self, error: &ReactorError) -> CallbackResult {
        self.transmitter
            .send(Response::Error(self.token, error.to_string()))
            .ok();
        Ok(())
    }
}

/// Correlation table for in-flight requests
pub struct RequestDriver {
    reactor: Reactor,
    isolate: Isolate,
    transmitter: Sender<Response>,
    pending: HashMap<Token, Proxy<ResponseForwarder>>,
}

impl RequestDriver {
    pub fn new(reactor: Reactor, transmitter: Sender<Response>) -> Result<Self> {
        let isolate = reactor.create_isolate()?;
        Ok(Self {
            reactor,
            isolate,
            transmitter,
            pending: HashMap::new(),
        })
    }

    /// Open a correlation slot for an in-flight request
    pub fn begin_request(&mut self, token: Token) -> Result<Completion<()>> {
        let proxy = self.reactor.create_proxy::<ResponseForwarder>()?;
        let registration = proxy.assign_handler(
            ResponseForwarder {
                token,
                transmitter: self.transmitter.clone(),
            },
            &self.isolate,
        )?;
        self.pending.insert(token, proxy);
        Ok(registration)
    }

    /// Deliver the backend's response for `token`
    ///
    /// The slot is one-shot: the proxy is torn down right behind the
    /// delivery, so the forwarding action still runs first.
    pub fn complete_request(&mut self, token: Token, payload: String) -> Result<Completion<()>> {
        let proxy = self.take(token)?;
        let delivered = proxy.invoke(move |handler: &mut ResponseForwarder| {
            handler.complete(payload)
        })?;
        proxy.destroy();
        Ok(delivered)
    }

    /// Drop a correlation slot without delivering anything
    pub fn abort_request(&mut self, token: Token) -> Result<Completion<()>> {
        let proxy = self.take(token)?;
        Ok(proxy.destroy())
    }

    /// Number of correlation slots still open
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Tear down this driver's execution context
    ///
    /// Every still-open slot is destroyed in cascade by the isolate.
    pub fn shutdown(self, timeout: Option<Duration>) -> bool {
        let destroyed = self.isolate.destroy();
        destroyed.wait(timeout)
    }

    fn take(&mut self, token: Token) -> Result<Proxy<ResponseForwarder>> {
        self.pending.remove(&token).ok_or_else(|| {
            ReactorError::configuration("unknown correlation token", Some("token"))
        })
    }
}
