//! Pending request tracking keyed by transaction id.
//!
//! Every outgoing request gets a [`RequestContext`] holding the original
//! message and a single-assignment result slot. The receive path completes
//! the context when a response with the same transaction id and address
//! path arrives.

use control_wire::ControlMessage;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Receiving half of a request's result slot
pub type PendingResponse = oneshot::Receiver<ControlMessage>;

/// State kept for a request until its response arrives
#[derive(Debug)]
pub struct RequestContext {
    /// The original outgoing request
    request: ControlMessage,
    /// Result slot, consumed on completion
    slot: oneshot::Sender<ControlMessage>,
    /// When the request was registered
    created_at: Instant,
}

impl RequestContext {
    /// Address path of the original request
    pub fn address_path(&self) -> &str {
        &self.request.address_path
    }

    /// Time since the request was registered
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Hand the response to the waiting caller.
    ///
    /// Returns false if the caller stopped waiting.
    fn fulfill(self, response: ControlMessage) -> bool {
        self.slot.send(response).is_ok()
    }
}

/// Outcome of matching a response against the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The waiting caller received the response
    Fulfilled,
    /// The context matched but its caller had already gone away
    Abandoned,
    /// No context is registered under the transaction id
    Unknown,
    /// A context exists but for a different address path; it stays pending
    AddressMismatch {
        /// Address path of the registered request
        expected: String,
    },
}

/// Retires a registered context when dropped unless disarmed.
///
/// Held by the caller while it waits, so a cancelled or abandoned wait does
/// not leave its context in the registry.
#[derive(Debug)]
pub struct ContextGuard<'a> {
    registry: &'a RequestContextRegistry,
    transaction_id: u32,
    armed: bool,
}

impl ContextGuard<'_> {
    /// Transaction id the guard retires
    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    /// Keep the context; used once the response has been taken
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.registry.remove(self.transaction_id) {
            debug!("Retired abandoned request {}", self.transaction_id);
        }
    }
}

/// Map from transaction id to pending request
#[derive(Debug, Default)]
pub struct RequestContextRegistry {
    contexts: DashMap<u32, RequestContext>,
}

impl RequestContextRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `request` under a fresh random transaction id.
    ///
    /// Ids are drawn uniformly from the full 32-bit range and redrawn while
    /// one is still in use, so no two live contexts share an id. The returned
    /// message carries the assigned id and is ready to send.
    pub fn register(&self, request: &ControlMessage) -> (ControlMessage, PendingResponse) {
        loop {
            let transaction_id = rand::random::<u32>();
            if let Some(registered) = self.try_register(transaction_id, request) {
                return registered;
            }
            trace!("Transaction id {} in use, drawing another", transaction_id);
        }
    }

    /// Register `request` under `transaction_id` unless that id is taken
    pub fn try_register(
        &self,
        transaction_id: u32,
        request: &ControlMessage,
    ) -> Option<(ControlMessage, PendingResponse)> {
        match self.contexts.entry(transaction_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let mut outgoing = request.clone();
                outgoing.transaction_id = transaction_id;

                let (slot, pending) = oneshot::channel();
                vacant.insert(RequestContext {
                    request: outgoing.clone(),
                    slot,
                    created_at: Instant::now(),
                });
                Some((outgoing, pending))
            }
        }
    }

    /// Match a response to its pending request and fulfill it.
    ///
    /// The context is removed only when both transaction id and address path
    /// match; the slot is fulfilled after the map entry is released.
    pub fn complete(&self, response: ControlMessage) -> Completion {
        let context = match self.contexts.entry(response.transaction_id) {
            Entry::Vacant(_) => return Completion::Unknown,
            Entry::Occupied(occupied) => {
                if occupied.get().address_path() != response.address_path {
                    return Completion::AddressMismatch {
                        expected: occupied.get().address_path().to_string(),
                    };
                }
                occupied.remove()
            }
        };

        debug!(
            "Completing request {} ({}) after {:?}",
            response.transaction_id,
            response.address_path,
            context.elapsed()
        );

        if context.fulfill(response) {
            Completion::Fulfilled
        } else {
            Completion::Abandoned
        }
    }

    /// Guard that retires the context for `transaction_id` when dropped
    pub fn guard(&self, transaction_id: u32) -> ContextGuard<'_> {
        ContextGuard {
            registry: self,
            transaction_id,
            armed: true,
        }
    }

    /// Drop the context for `transaction_id`, if any
    pub fn remove(&self, transaction_id: u32) -> bool {
        self.contexts.remove(&transaction_id).is_some()
    }

    /// Drop every pending context; their callers observe a closed slot
    pub fn clear(&self) -> usize {
        let pending = self.contexts.len();
        self.contexts.clear();
        pending
    }

    /// Number of requests awaiting a response
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether no request is awaiting a response
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
