//! Event fan-out.
//!
//! A [`Dispatcher`] hands each event to an optional primary handler, then
//! to every handler registered for the event's kind, in registration order.
//! A handler that errors or panics is logged and skipped; it never stops
//! the remaining handlers or the read loop that called in.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;

use crate::client::Connection;
use crate::event::Event;

/// Something that wants to see events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, connection: &Connection, event: &Event) -> anyhow::Result<()>;
}

/// Adapts a plain closure into an [`EventHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Connection, &Event) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, connection: &Connection, event: &Event) -> anyhow::Result<()> {
        (self.0)(connection, event)
    }
}

#[derive(Default)]
pub struct Dispatcher {
    primary: Option<Arc<dyn EventHandler>>,
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl Dispatcher {
    pub fn new(primary: Option<Arc<dyn EventHandler>>) -> Self {
        Self {
            primary,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` for events of `kind`, after any already there.
    pub fn add_handler(&self, kind: &str, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .entry(kind.to_string())
            .or_default()
            .push(handler);
    }

    /// Remove every registration of `handler` under `kind`.
    /// Returns whether anything was removed.
    pub fn remove_handler(&self, kind: &str, handler: &Arc<dyn EventHandler>) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(kind);
        }
        removed
    }

    pub fn clear_handlers(&self) {
        self.handlers.write().clear();
    }

    pub async fn dispatch(&self, connection: &Connection, event: &Event) {
        if let Some(primary) = &self.primary {
            invoke(primary.as_ref(), connection, event).await;
        }
        // Snapshot so handlers may (un)register while we await them.
        let registered = self.handlers.read().get(&event.kind).cloned();
        for handler in registered.into_iter().flatten() {
            invoke(handler.as_ref(), connection, event).await;
        }
    }
}

async fn invoke(handler: &dyn EventHandler, connection: &Connection, event: &Event) {
    match AssertUnwindSafe(handler.handle(connection, event))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(kind = %event.kind, error = ?e, "Handler error");
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(kind = %event.kind, %message, "Handler panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, _: &Connection, event: &Event) -> anyhow::Result<()> {
            self.seen.lock().push(format!("{}:{}", self.name, event.kind));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _: &Connection, _: &Event) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    struct Panicking;

    #[async_trait]
    impl EventHandler for Panicking {
        async fn handle(&self, _: &Connection, _: &Event) -> anyhow::Result<()> {
            panic!("handler blew up")
        }
    }

    fn event(kind: &str) -> Event {
        Event::new(kind, None, None, vec![])
    }

    #[tokio::test]
    async fn primary_then_registered_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let primary: Arc<dyn EventHandler> = Arc::new(Recorder {
            name: "primary",
            seen: seen.clone(),
        });
        let connection = Connection::new(Some(primary));
        for name in ["a", "b"] {
            connection.dispatcher().add_handler(
                "pubmsg",
                Arc::new(Recorder {
                    name,
                    seen: seen.clone(),
                }),
            );
        }

        connection
            .dispatcher()
            .dispatch(&connection, &event("pubmsg"))
            .await;
        connection
            .dispatcher()
            .dispatch(&connection, &event("join"))
            .await;

        assert_eq!(
            *seen.lock(),
            vec!["primary:pubmsg", "a:pubmsg", "b:pubmsg", "primary:join"]
        );
    }

    #[tokio::test]
    async fn failures_do_not_stop_siblings() {
        let count = Arc::new(AtomicUsize::new(0));
        let connection = Connection::new(None);
        let dispatcher = connection.dispatcher();
        dispatcher.add_handler("ping", Arc::new(Failing));
        dispatcher.add_handler("ping", Arc::new(Panicking));
        let counter = count.clone();
        dispatcher.add_handler(
            "ping",
            Arc::new(FnHandler(move |_: &Connection, _: &Event| -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );

        dispatcher.dispatch(&connection, &event("ping")).await;
        dispatcher.dispatch(&connection, &event("ping")).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn removed_handler_is_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let connection = Connection::new(None);
        let handler: Arc<dyn EventHandler> = Arc::new(Recorder {
            name: "r",
            seen: seen.clone(),
        });
        connection.dispatcher().add_handler("part", handler.clone());
        assert!(connection.dispatcher().remove_handler("part", &handler));
        assert!(!connection.dispatcher().remove_handler("part", &handler));

        connection
            .dispatcher()
            .dispatch(&connection, &event("part"))
            .await;
        assert!(seen.lock().is_empty());
    }
}
