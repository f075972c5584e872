//! Update handler registry keyed by address path.

use control_wire::{ControlMessage, ControlUpdate, UpdateParseError};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Callback invoked for each update on a registered address path
pub type UpdateHandler = Arc<dyn Fn(ControlUpdate) + Send + Sync>;

/// Outcome of routing an update message
#[derive(Debug)]
pub enum UpdateDispatch {
    /// The registered handler ran
    Delivered,
    /// Nobody registered for the address path
    NoHandler,
    /// A handler exists but the update could not be built
    Invalid(UpdateParseError),
}

/// At most one handler per address path; last registration wins
#[derive(Default)]
pub struct UpdateHandlerRegistry {
    handlers: DashMap<String, UpdateHandler>,
}

impl std::fmt::Debug for UpdateHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateHandlerRegistry")
            .field("paths", &self.handlers.len())
            .finish()
    }
}

impl UpdateHandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `address_path`, replacing any previous one
    pub fn register(&self, address_path: &str, handler: UpdateHandler) {
        if self
            .handlers
            .insert(address_path.to_string(), handler)
            .is_some()
        {
            debug!("Replaced update handler for {}", address_path);
        }
    }

    /// Remove the handler for `address_path`
    pub fn unregister(&self, address_path: &str) -> bool {
        self.handlers.remove(address_path).is_some()
    }

    /// Look up the handler for `address_path`
    pub fn handler(&self, address_path: &str) -> Option<UpdateHandler> {
        self.handlers
            .get(address_path)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Build the update for `message` and run its handler.
    ///
    /// The handler is cloned out of the map first so it may re-enter the
    /// registry.
    pub fn dispatch(&self, message: &ControlMessage) -> UpdateDispatch {
        let Some(handler) = self.handler(&message.address_path) else {
            return UpdateDispatch::NoHandler;
        };

        match ControlUpdate::parse(&message.address_path, &message.body) {
            Ok(update) => {
                handler(update);
                UpdateDispatch::Delivered
            }
            Err(e) => UpdateDispatch::Invalid(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use control_wire::control::{BatteryUpdate, TakeNameUpdate};
    use control_wire::paths;
    use parking_lot::Mutex;

    fn recorder() -> (UpdateHandler, Arc<Mutex<Vec<ControlUpdate>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: UpdateHandler = Arc::new(move |update: ControlUpdate| sink.lock().push(update));
        (handler, seen)
    }

    #[test]
    fn test_registered_path_receives_parsed_update() {
        let registry = UpdateHandlerRegistry::new();
        let (handler, seen) = recorder();
        registry.register(paths::BATTERY, handler);

        let message = ControlMessage::update(paths::BATTERY, Bytes::from_static(b"{\"level\":0.25}"));
        assert!(matches!(registry.dispatch(&message), UpdateDispatch::Delivered));

        assert_eq!(
            seen.lock().as_slice(),
            &[ControlUpdate::Battery(BatteryUpdate { level: 0.25 })]
        );
    }

    #[test]
    fn test_unregistered_path_is_ignored() {
        let registry = UpdateHandlerRegistry::new();
        let (handler, seen) = recorder();
        registry.register(paths::BATTERY, handler);

        let message = ControlMessage::update(paths::THERMALS, Bytes::from_static(b"{\"state\":\"fair\"}"));
        assert!(matches!(registry.dispatch(&message), UpdateDispatch::NoHandler));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_bad_body_does_not_invoke_handler() {
        let registry = UpdateHandlerRegistry::new();
        let (handler, seen) = recorder();
        registry.register(paths::TAKE_ADDED, handler);

        let message = ControlMessage::update(paths::TAKE_ADDED, Bytes::from_static(b"not json"));
        assert!(matches!(registry.dispatch(&message), UpdateDispatch::Invalid(_)));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = UpdateHandlerRegistry::new();
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();
        registry.register(paths::TAKE_REMOVED, first);
        registry.register(paths::TAKE_REMOVED, second);

        let message = ControlMessage::update(paths::TAKE_REMOVED, Bytes::from_static(b"{\"takeName\":\"t1\"}"));
        registry.dispatch(&message);

        assert!(first_seen.lock().is_empty());
        assert_eq!(
            second_seen.lock().as_slice(),
            &[ControlUpdate::TakeRemoved(TakeNameUpdate {
                take_name: "t1".to_string()
            })]
        );
    }

    #[test]
    fn test_handler_may_reenter_registry() {
        let registry = Arc::new(UpdateHandlerRegistry::new());
        let inner = Arc::clone(&registry);
        registry.register(
            paths::SESSION_STOPPED,
            Arc::new(move |_: ControlUpdate| {
                inner.unregister(paths::SESSION_STOPPED);
            }),
        );

        let message = ControlMessage::update(paths::SESSION_STOPPED, Bytes::new());
        assert!(matches!(registry.dispatch(&message), UpdateDispatch::Delivered));
        assert!(registry.handler(paths::SESSION_STOPPED).is_none());
    }
}
