//! The transport collaborator.
//!
//! The client needs request/response calls, fire-and-forget notifications and
//! a stream of connection events. Framing, reconnection and id correlation
//! belong to the implementation.

use crate::error::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A connection (or reconnection) was established.
    Connected,
    /// The connection dropped. Calls fail until the next `Connected`.
    Disconnected,
    /// The peer pushed a notification.
    Notification { method: String, params: Value },
}

/// A message-passing link to a replication peer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Call `method` and wait for its result.
    ///
    /// Fails with [`TransportError::Disconnected`] when there is no live
    /// connection; such a call is never retried by the transport.
    async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    /// Send a notification. No reply is expected.
    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError>;

    /// Subscribe to connection events.
    ///
    /// Events are delivered in the order they happened on the connection.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records calls and answers `true` while online.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        online: AtomicBool,
        rejected: Mutex<HashSet<String>>,
        calls: Mutex<Vec<(String, Value)>>,
        subscribers: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    }

    impl MockTransport {
        pub(crate) fn online() -> Self {
            let transport = Self::default();
            transport.set_online(true);
            transport
        }

        pub(crate) fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }

        /// Make calls to `method` fail as disconnected.
        pub(crate) fn drop_method(&self, method: &str) {
            self.rejected.lock().insert(method.to_string());
        }

        pub(crate) fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().clone()
        }

        /// Push a connection event to every subscriber.
        pub(crate) fn emit(&self, event: TransportEvent) {
            self.subscribers
                .lock()
                .retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
            if !self.online.load(Ordering::SeqCst) || self.rejected.lock().contains(method) {
                return Err(TransportError::Disconnected);
            }
            self.calls.lock().push((method.to_string(), params));
            Ok(Value::Bool(true))
        }

        async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
            self.call(method, params).await.map(|_| ())
        }

        fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers.lock().push(tx);
            rx
        }
    }
}
