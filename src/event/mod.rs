//! Event system for connection lifecycle notifications.
//!
//! The connection manager publishes an [`Event`] whenever a client connects
//! or disconnects and whenever the shared channel is opened or closed.
//! Events are sent after the manager's internal lock is released, so a
//! subscriber may call back into the manager while handling one.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::connection::ClientId;

/// Default capacity of the event broadcast buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A client was registered.
    Registered(ClientId),
    /// A client was unregistered.
    Unregistered(ClientId),
    /// A client became connected.
    Connected(ClientId),
    /// A client became disconnected.
    Disconnected(ClientId),
    /// The shared channel was opened for the first connected client.
    ChannelOpened,
    /// The shared channel was closed after the last client disconnected.
    ChannelClosed,
}

impl Event {
    /// Returns the client this event concerns, if any.
    #[must_use]
    pub const fn client(&self) -> Option<ClientId> {
        match self {
            Self::Registered(id)
            | Self::Unregistered(id)
            | Self::Connected(id)
            | Self::Disconnected(id) => Some(*id),
            Self::ChannelOpened | Self::ChannelClosed => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Events missed because the subscriber lagged are skipped. Returns
    /// `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("event subscriber lagged by {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Subscription filter for specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events about this client.
    pub client: Option<ClientId>,
    /// Only channel open/close events.
    pub channel_only: bool,
}

impl EventFilter {
    /// Creates a filter for events about one client.
    #[must_use]
    pub const fn client(id: ClientId) -> Self {
        Self {
            client: Some(id),
            channel_only: false,
        }
    }

    /// Creates a filter for channel open/close events.
    #[must_use]
    pub const fn channel() -> Self {
        Self {
            client: None,
            channel_only: true,
        }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if self.channel_only && event.client().is_some() {
            return false;
        }
        match self.client {
            Some(expected) => event.client() == Some(expected),
            None => true,
        }
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        tracing::trace!(?event, "dispatching event");
        // No receivers is fine.
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to all subsequent events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the dispatcher is gone.
    pub async fn wait_for(
        &self,
        filter: EventFilter,
        timeout: std::time::Duration,
    ) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = async {
                while let Some(event) = subscription.recv().await {
                    if filter.matches(&event) {
                        return Some(event);
                    }
                }
                None
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
