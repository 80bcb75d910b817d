//! Connection lifecycle management.
//!
//! Many logical clients share one physical link to the mount. The
//! [`ConnectionManager`] keeps a registry of clients and their connected
//! state and owns the single [`SharedChannel`]: it is created and opened
//! when the first client connects and closed and dropped when the last
//! one disconnects.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, Subscription};
use crate::transport::{ChannelFactory, SharedChannel};

/// Opaque identity of a logical client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Creates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered clients and the channel they share.
///
/// `channel` is `Some` exactly when at least one client is connected.
#[derive(Default)]
struct Registry {
    clients: HashMap<ClientId, bool>,
    channel: Option<SharedChannel>,
}

impl Registry {
    fn connected_count(&self) -> usize {
        self.clients.values().filter(|connected| **connected).count()
    }
}

/// Multiplexes logical clients onto one physical channel.
pub struct ConnectionManager {
    registry: RwLock<Registry>,
    factory: Arc<dyn ChannelFactory>,
    events: EventDispatcher,
}

impl ConnectionManager {
    /// Creates a manager that builds its channel with `factory`.
    #[must_use]
    pub fn new(factory: impl ChannelFactory + 'static) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            factory: Arc::new(factory),
            events: EventDispatcher::default(),
        }
    }

    /// Subscribes to connection events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Returns the event dispatcher.
    #[must_use]
    pub const fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Registers a new client, initially disconnected.
    pub async fn register_client(&self) -> ClientId {
        let id = ClientId::new();
        self.registry.write().await.clients.insert(id, false);
        tracing::debug!(client = %id, "client registered");
        self.events.dispatch(Event::Registered(id));
        id
    }

    /// Unregisters a client, disconnecting it first if needed.
    ///
    /// Unregistering an unknown client is a logged no-op.
    pub async fn unregister_client(&self, id: ClientId) {
        let mut events = Vec::new();
        {
            let mut registry = self.registry.write().await;
            match registry.clients.get(&id).copied() {
                None => {
                    tracing::warn!(client = %id, "unregister of unknown client ignored");
                    return;
                }
                Some(true) => Self::release(&mut registry, id, &mut events).await,
                Some(false) => {}
            }
            registry.clients.remove(&id);
            events.push(Event::Unregistered(id));
        }
        tracing::debug!(client = %id, "client unregistered");
        self.dispatch_all(events);
    }

    /// Marks a client connected and returns the shared channel.
    ///
    /// The first connecting client causes the channel to be created and
    /// opened; an open failure is returned and leaves no channel behind.
    /// Connecting an already-connected client returns the same channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownClient`] if `id` is not registered,
    /// [`Error::Cancelled`] if `cancel` fires first, or the channel's open
    /// error.
    pub async fn connect(&self, id: ClientId, cancel: &CancellationToken) -> Result<SharedChannel> {
        let mut events = Vec::new();
        let channel = {
            let mut registry = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                registry = self.registry.write() => registry,
            };

            match registry.clients.get(&id).copied() {
                None => return Err(Error::UnknownClient(id)),
                Some(true) => {
                    tracing::warn!(client = %id, "client already connected");
                    return registry.channel.clone().ok_or(Error::NotConnected);
                }
                Some(false) => {}
            }

            let channel = match registry.channel.clone() {
                Some(channel) => channel,
                None => {
                    let channel = self.open_channel(cancel).await?;
                    registry.channel = Some(channel.clone());
                    events.push(Event::ChannelOpened);
                    channel
                }
            };

            registry.clients.insert(id, true);
            events.push(Event::Connected(id));
            tracing::info!(
                client = %id,
                connected = registry.connected_count(),
                "client connected"
            );
            channel
        };

        self.dispatch_all(events);
        Ok(channel)
    }

    /// Marks a client disconnected, closing the channel if it was the last.
    ///
    /// Disconnecting a client that is not connected is a logged no-op.
    /// Once started, the close is not cancellable, so the channel always
    /// ends up closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownClient`] if `id` is not registered.
    pub async fn disconnect(&self, id: ClientId) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut registry = self.registry.write().await;
            match registry.clients.get(&id).copied() {
                None => return Err(Error::UnknownClient(id)),
                Some(false) => {
                    tracing::warn!(client = %id, "client already disconnected");
                    return Ok(());
                }
                Some(true) => Self::release(&mut registry, id, &mut events).await,
            }
        }
        self.dispatch_all(events);
        Ok(())
    }

    /// Number of registered clients.
    pub async fn registered_client_count(&self) -> usize {
        self.registry.read().await.clients.len()
    }

    /// Number of connected clients.
    pub async fn connected_client_count(&self) -> usize {
        self.registry.read().await.connected_count()
    }

    /// Returns true if `id` is registered and connected.
    pub async fn is_connected(&self, id: ClientId) -> bool {
        self.registry
            .read()
            .await
            .clients
            .get(&id)
            .copied()
            .unwrap_or(false)
    }

    /// Returns the shared channel while any client is connected.
    pub async fn channel(&self) -> Option<SharedChannel> {
        self.registry.read().await.channel.clone()
    }

    /// Creates and opens a new channel, closing it again on failure.
    async fn open_channel(&self, cancel: &CancellationToken) -> Result<SharedChannel> {
        let channel = SharedChannel::new(self.factory.create());
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = channel.open() => result,
        };
        if let Err(e) = opened {
            tracing::warn!("failed to open channel: {}", e);
            // A cancelled open may have got partway; never leave it half-open.
            if let Err(close_err) = channel.close().await {
                tracing::warn!("failed to close channel after open error: {}", close_err);
            }
            return Err(e);
        }
        tracing::info!("channel opened");
        Ok(channel)
    }

    /// Marks a connected client disconnected, closing the channel if no
    /// connected clients remain.
    async fn release(registry: &mut Registry, id: ClientId, events: &mut Vec<Event>) {
        registry.clients.insert(id, false);
        events.push(Event::Disconnected(id));
        let remaining = registry.connected_count();
        tracing::info!(client = %id, connected = remaining, "client disconnected");

        if remaining == 0 {
            if let Some(channel) = registry.channel.take() {
                if let Err(e) = channel.close().await {
                    tracing::warn!("error closing channel: {}", e);
                }
                tracing::info!("channel closed");
                events.push(Event::ChannelClosed);
            }
        }
    }

    fn dispatch_all(&self, events: Vec<Event>) {
        for event in events {
            self.events.dispatch(event);
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::ErrorKind;
    use crate::transport::{
        Channel, ChannelConfig, SerialConfig, SimulatorConfig, SimulatorHandle,
    };

    /// A manager over one simulated mount, counting channel creations.
    fn simulated() -> (ConnectionManager, SimulatorHandle, Arc<AtomicUsize>) {
        let handle = SimulatorHandle::new(SimulatorConfig::default());
        let created = Arc::new(AtomicUsize::new(0));
        let factory = {
            let handle = handle.clone();
            let created = Arc::clone(&created);
            move || -> Box<dyn Channel> {
                created.fetch_add(1, Ordering::SeqCst);
                Box::new(handle.channel())
            }
        };
        (ConnectionManager::new(factory), handle, created)
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let (manager, _, _) = simulated();
        let a = manager.register_client().await;
        let b = manager.register_client().await;
        assert_ne!(a, b);
        assert_eq!(manager.registered_client_count().await, 2);
        assert_eq!(manager.connected_client_count().await, 0);

        manager.unregister_client(a).await;
        manager.unregister_client(a).await;
        assert_eq!(manager.registered_client_count().await, 1);
    }

    #[tokio::test]
    async fn test_connect_requires_registration() {
        let (manager, _, created) = simulated();
        let err = manager
            .connect(ClientId::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownClient(_)));
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(created.load(Ordering::SeqCst), 0);

        assert!(matches!(
            manager.disconnect(ClientId::new()).await,
            Err(Error::UnknownClient(_))
        ));
    }

    #[tokio::test]
    async fn test_clients_share_one_channel() {
        let (manager, handle, created) = simulated();
        let cancel = CancellationToken::new();
        let a = manager.register_client().await;
        let b = manager.register_client().await;

        let channel_a = manager.connect(a, &cancel).await.unwrap();
        let channel_b = manager.connect(b, &cancel).await.unwrap();
        assert!(channel_a.ptr_eq(&channel_b));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(handle.open_channels(), 1);
        assert_eq!(manager.connected_client_count().await, 2);

        manager.disconnect(a).await.unwrap();
        assert!(channel_b.is_open().await);
        assert_eq!(handle.open_channels(), 1);

        manager.disconnect(b).await.unwrap();
        assert!(!channel_b.is_open().await);
        assert_eq!(handle.open_channels(), 0);
        assert!(manager.channel().await.is_none());

        // A fresh channel is built for the next first connection.
        let channel_c = manager.connect(a, &cancel).await.unwrap();
        assert!(!channel_c.ptr_eq(&channel_a));
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeated_calls_are_idempotent() {
        let (manager, handle, created) = simulated();
        let cancel = CancellationToken::new();
        let a = manager.register_client().await;

        let first = manager.connect(a, &cancel).await.unwrap();
        let second = manager.connect(a, &cancel).await.unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(manager.connected_client_count().await, 1);
        assert_eq!(created.load(Ordering::SeqCst), 1);

        manager.disconnect(a).await.unwrap();
        manager.disconnect(a).await.unwrap();
        assert_eq!(handle.open_channels(), 0);
        assert!(!manager.is_connected(a).await);
    }

    #[tokio::test]
    async fn test_unregister_connected_client_disconnects() {
        let (manager, handle, _) = simulated();
        let a = manager.register_client().await;
        let channel = manager.connect(a, &CancellationToken::new()).await.unwrap();

        manager.unregister_client(a).await;
        assert_eq!(manager.registered_client_count().await, 0);
        assert_eq!(manager.connected_client_count().await, 0);
        assert!(!channel.is_open().await);
        assert_eq!(handle.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_leaves_no_channel() {
        let manager = ConnectionManager::new(ChannelConfig::Serial(SerialConfig::new(
            "/dev/mountlink-no-such-port",
        )));
        let a = manager.register_client().await;

        let err = manager.connect(a, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(manager.channel().await.is_none());
        assert!(!manager.is_connected(a).await);
        assert_eq!(manager.registered_client_count().await, 1);
    }

    #[tokio::test]
    async fn test_cancelled_connect_leaves_no_channel() {
        let (manager, handle, _) = simulated();
        let a = manager.register_client().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = manager.connect(a, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(manager.channel().await.is_none());
        assert_eq!(handle.open_channels(), 0);
        assert_eq!(manager.connected_client_count().await, 0);
    }

    #[tokio::test]
    async fn test_events_follow_transitions() {
        let (manager, _, _) = simulated();
        let a = manager.register_client().await;
        let mut sub = manager.subscribe();

        manager.connect(a, &CancellationToken::new()).await.unwrap();
        manager.disconnect(a).await.unwrap();
        manager.unregister_client(a).await;

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(sub.recv().await.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                Event::ChannelOpened,
                Event::Connected(a),
                Event::Disconnected(a),
                Event::ChannelClosed,
                Event::Unregistered(a),
            ]
        );
    }

    #[tokio::test]
    async fn test_channel_open_iff_any_client_connected() {
        let (manager, handle, _) = simulated();
        let cancel = CancellationToken::new();
        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(manager.register_client().await);
        }

        // Deterministic pseudo-random walk over the four operations.
        let mut seed: u32 = 0x2545_f491;
        for _ in 0..200 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let slot = (seed % 3) as usize;
            match (seed >> 8) % 4 {
                0 => {
                    let _ = manager.connect(clients[slot], &cancel).await;
                }
                1 => {
                    let _ = manager.disconnect(clients[slot]).await;
                }
                2 => {
                    manager.unregister_client(clients[slot]).await;
                    clients[slot] = manager.register_client().await;
                }
                _ => {}
            }

            let connected = manager.connected_client_count().await;
            let channel = manager.channel().await;
            assert_eq!(channel.is_some(), connected > 0);
            assert_eq!(handle.open_channels(), usize::from(connected > 0));
            if let Some(channel) = channel {
                assert!(channel.is_open().await);
            }
        }
    }
}
