//! Named user event handlers.

use crate::message::UserEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// What the dispatcher does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next handler.
    Continue,
    /// Skip the remaining handlers for this event.
    Break,
}

/// Reacts to user events of one name.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one event. An error is logged and dispatch moves on.
    async fn handle(&self, event: &UserEvent) -> anyhow::Result<Flow>;
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that ran.
    pub invoked: usize,
    /// Handlers that returned an error.
    pub failed: usize,
    /// Handlers skipped after a `Break`.
    pub skipped: usize,
}

/// Handlers keyed by event name, kept in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Arc<dyn EventHandler>>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `handler` to the list for `name`.
    pub fn register(&self, name: &str, handler: Arc<dyn EventHandler>) {
        self.lock().entry(name.to_string()).or_default().push(handler);
    }

    /// Handlers currently registered for `name`.
    pub fn handlers_for(&self, name: &str) -> Vec<Arc<dyn EventHandler>> {
        self.lock().get(name).cloned().unwrap_or_default()
    }

    /// Runs the handlers registered for `event.name` one after another.
    ///
    /// The lock is only held while copying the list, so handlers may register
    /// further handlers without deadlocking.
    pub async fn dispatch(&self, event: &UserEvent) -> DispatchReport {
        let handlers = self.handlers_for(&event.name);
        let mut report = DispatchReport::default();
        if handlers.is_empty() {
            debug!(event = %event.name, "no handler registered");
            return report;
        }

        let total = handlers.len();
        for (i, handler) in handlers.iter().enumerate() {
            report.invoked += 1;
            match handler.handle(event).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Break) => {
                    report.skipped = total - i - 1;
                    if report.skipped > 0 {
                        debug!(
                            event = %event.name,
                            skipped = report.skipped,
                            "handler stopped dispatch"
                        );
                    }
                    break;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(event = %event.name, origin = %event.origin, error = %e, "event handler failed");
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        id: usize,
        seen: Arc<Mutex<Vec<usize>>>,
        outcome: fn() -> anyhow::Result<Flow>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, _event: &UserEvent) -> anyhow::Result<Flow> {
            self.seen.lock().unwrap().push(self.id);
            (self.outcome)()
        }
    }

    fn event(name: &str) -> UserEvent {
        UserEvent {
            origin: "node-a".into(),
            ltime: 1,
            name: name.into(),
            payload: Vec::new(),
            broadcast: true,
        }
    }

    fn recorder(
        id: usize,
        seen: &Arc<Mutex<Vec<usize>>>,
        outcome: fn() -> anyhow::Result<Flow>,
    ) -> Arc<dyn EventHandler> {
        Arc::new(Recorder {
            id,
            seen: seen.clone(),
            outcome,
        })
    }

    #[tokio::test]
    async fn test_dispatch_in_registration_order() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            registry.register("backup", recorder(id, &seen, || Ok(Flow::Continue)));
        }
        let report = registry.dispatch(&event("backup")).await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(report.invoked, 3);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_dispatch() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.register("backup", recorder(0, &seen, || Err(anyhow::anyhow!("boom"))));
        registry.register("backup", recorder(1, &seen, || Ok(Flow::Continue)));
        let report = registry.dispatch(&event("backup")).await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_break_skips_remaining_handlers() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.register("backup", recorder(0, &seen, || Ok(Flow::Break)));
        registry.register("backup", recorder(1, &seen, || Ok(Flow::Continue)));
        registry.register("backup", recorder(2, &seen, || Ok(Flow::Continue)));
        let report = registry.dispatch(&event("backup")).await;
        assert_eq!(*seen.lock().unwrap(), vec![0]);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_break_on_last_handler_skips_nothing() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.register("backup", recorder(0, &seen, || Ok(Flow::Continue)));
        registry.register("backup", recorder(1, &seen, || Ok(Flow::Break)));
        let report = registry.dispatch(&event("backup")).await;
        assert_eq!(report.invoked, 2);
        assert_eq!(report.skipped, 0);
    }

    #[tokio::test]
    async fn test_names_are_isolated() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.register("backup", recorder(0, &seen, || Ok(Flow::Continue)));
        registry.register("clearsnapshot", recorder(1, &seen, || Ok(Flow::Continue)));
        registry.dispatch(&event("clearsnapshot")).await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(registry.dispatch(&event("unknown")).await.invoked, 0);
    }
}
