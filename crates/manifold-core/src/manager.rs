//! Connection manager: lifecycle sets, cycle execution, deferred close.
//!
//! The manager owns every connection in an arena keyed by
//! [`ConnectionId`]; lifecycle is an explicit state tag, and the pending
//! / active / message-queue collections are index sets derived from it.
//! All destructive transitions are deferred to explicit drain points so
//! no collection is ever mutated while a cycle is iterating it.
//!
//! # Cycle shape
//!
//! ```text
//!            ┌────────────────────────────────────────────┐
//!  driver ──>│ process()                                  │
//!            │   1. drain pending registrations           │
//!            │   2. dispatch selector-ready events        │
//!            │   3. manually poll message-queue channels  │
//!            └────────────────────────────────────────────┘
//!  driver ──> cleanup()   (drain the close queue snapshot)
//! ```
//!
//! Single-threaded and cooperative: `&mut self` sequencing is the whole
//! concurrency model, and nothing in here blocks. The only blocking
//! point in the system is the external driver's selector wait, whose
//! timeout is informed by [`ConnectionManager::is_idle`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::channel::{ChannelFactory, Endpoint};
use crate::connection::Connection;
use crate::error::{ChannelError, ManagerError};
use crate::handler::{Handler, HandlerFactory, HandlerSpec, NoopFactory};
use crate::selector::{ConnectionId, Selector};

/// Lifecycle stage of a connection.
///
/// `Pending → Active → Closing → Closed`. The tag is authoritative; the
/// manager's index sets are derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, not yet registered with the selector.
    Pending,
    /// Registered; receives event dispatch.
    Active,
    /// At least one teardown request is queued for this connection. It
    /// keeps receiving events until the cleanup drain finalizes it.
    Closing,
    /// Terminal: channel released, entry removed from the arena. Never
    /// observable through [`ConnectionManager::state_of`].
    Closed,
}

/// One queued teardown request: connection, flush flag, optional reason.
#[derive(Debug)]
struct CloseRequest {
    id: ConnectionId,
    flush: bool,
    reason: Option<ChannelError>,
}

struct ConnectionEntry {
    connection: Connection,
    state: Lifecycle,
}

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum concurrent connections; `bind`/`connect` refuse beyond it.
    pub max_connections: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { max_connections: 10_000 }
    }
}

enum BundleSlot {
    Unresolved(Box<dyn Fn() -> Arc<dyn HandlerFactory>>),
    Resolved(Arc<dyn HandlerFactory>),
}

/// Process-wide owner of the connection lifecycle collections.
///
/// Generic over the selector so production and test oracles share the
/// same orchestration code. The channel factory is injected; the
/// stream-versus-message-queue dispatch lives behind it, outside the
/// core.
pub struct ConnectionManager<S: Selector> {
    selector: S,
    channels: Box<dyn ChannelFactory>,
    config: ManagerConfig,
    /// Arena: every live connection, keyed by its stable id.
    entries: HashMap<ConnectionId, ConnectionEntry>,
    /// Ids awaiting registration at the next cycle's drain.
    pending: Vec<ConnectionId>,
    /// Ids registered with the selector.
    active: HashSet<ConnectionId>,
    /// Subset of `active` that needs manual polling every cycle.
    message_queue: HashSet<ConnectionId>,
    /// Ordered teardown requests, drained by `cleanup`.
    closing: Vec<CloseRequest>,
    /// Named capability bundles; resolved lazily and cached.
    bundles: HashMap<&'static str, BundleSlot>,
    next_id: u64,
}

impl<S: Selector> ConnectionManager<S> {
    /// Create a manager around a selector and a channel factory.
    pub fn new(selector: S, channels: Box<dyn ChannelFactory>, config: ManagerConfig) -> Self {
        Self {
            selector,
            channels,
            config,
            entries: HashMap::new(),
            pending: Vec::new(),
            active: HashSet::new(),
            message_queue: HashSet::new(),
            closing: Vec::new(),
            bundles: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a named capability bundle.
    ///
    /// `resolve` runs at most once, on the first `bind`/`connect` that
    /// names the bundle; the resolved factory is cached and reused for
    /// every later request of the same name.
    pub fn register_bundle<R>(&mut self, name: &'static str, resolve: R)
    where
        R: Fn() -> Arc<dyn HandlerFactory> + 'static,
    {
        self.bundles.insert(name, BundleSlot::Unresolved(Box::new(resolve)));
    }

    /// Passive open: listen on `address`/`endpoint` with the given
    /// handler spec. The connection enters `Pending` immediately and is
    /// promoted to `Active` at the start of the next cycle's drain.
    pub fn bind(
        &mut self,
        address: &str,
        endpoint: &Endpoint,
        spec: HandlerSpec,
    ) -> Result<ConnectionId, ManagerError> {
        self.bind_with(address, endpoint, spec, |_| {})
    }

    /// Like [`ConnectionManager::bind`], with a post-construction hook
    /// run against the freshly built handler.
    pub fn bind_with<F>(
        &mut self,
        address: &str,
        endpoint: &Endpoint,
        spec: HandlerSpec,
        on_bind: F,
    ) -> Result<ConnectionId, ManagerError>
    where
        F: FnOnce(&mut dyn Handler),
    {
        tracing::debug!(address, ?endpoint, "bind");
        let mut connection = self.build_connection(address, endpoint, spec)?;
        connection.bind(address, endpoint)?;
        on_bind(connection.handler_mut());
        Ok(self.insert_pending(connection))
    }

    /// Active open: connect to `address`/`endpoint` with the given
    /// handler spec.
    ///
    /// Fails synchronously with
    /// [`ChannelError::AddressResolution`](crate::ChannelError) (wrapped
    /// in [`ManagerError::Channel`]) if the address cannot be resolved;
    /// this is the only connection-level fault surfaced to the caller.
    pub fn connect(
        &mut self,
        address: &str,
        endpoint: &Endpoint,
        spec: HandlerSpec,
    ) -> Result<ConnectionId, ManagerError> {
        self.connect_with(address, endpoint, spec, |_| {})
    }

    /// Like [`ConnectionManager::connect`], with a post-construction
    /// hook run against the freshly built handler.
    pub fn connect_with<F>(
        &mut self,
        address: &str,
        endpoint: &Endpoint,
        spec: HandlerSpec,
        on_connect: F,
    ) -> Result<ConnectionId, ManagerError>
    where
        F: FnOnce(&mut dyn Handler),
    {
        tracing::debug!(address, ?endpoint, "connect");
        let mut connection = self.build_connection(address, endpoint, spec)?;
        connection.connect(address, endpoint)?;
        on_connect(connection.handler_mut());
        Ok(self.insert_pending(connection))
    }

    /// One reactor tick: drain pending registrations, dispatch ready
    /// events, manually poll message-queue connections. Never raises;
    /// every connection-level fault becomes a deferred close.
    pub fn process(&mut self) {
        self.drain_pending();
        self.dispatch_ready();
        self.poll_message_queues();
    }

    /// True iff there are no pending registrations and no message-queue
    /// connection has data available.
    ///
    /// The driver consults this before its selector wait: blocking
    /// indefinitely while a message-queue connection holds unconsumed
    /// data would starve it, since the selector cannot observe that
    /// readiness.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
            && self
                .message_queue
                .iter()
                .all(|id| self.entries.get(id).is_none_or(|e| !e.connection.can_recv()))
    }

    /// Membership test against the active set.
    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.active.contains(&id)
    }

    /// Request teardown of a connection.
    ///
    /// Never executes synchronously; the request is appended to the
    /// close queue and drained by the next [`ConnectionManager::cleanup`]
    /// call. With `flush` set, finalization waits until the channel has
    /// no buffered outbound data. `reason` is delivered to the handler's
    /// unbind hook.
    pub fn close_connection(
        &mut self,
        id: ConnectionId,
        flush: bool,
        reason: Option<ChannelError>,
    ) {
        tracing::debug!(%id, flush, ?reason, "close requested");
        self.defer_close(id, flush, reason);
    }

    /// Drain the close queue.
    ///
    /// No-op on an empty queue. Otherwise the queue is swapped for an
    /// empty one and the captured snapshot processed; requests raised
    /// during the pass (flush-deferred retries) land in the new queue
    /// and are handled by a later call, so one invocation always
    /// terminates.
    pub fn cleanup(&mut self) {
        if self.closing.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.closing);
        tracing::debug!(requests = batch.len(), "draining close queue");
        for request in batch {
            let id = request.id;
            if let Err(err) = self.finalize(request) {
                tracing::warn!(%id, %err, "unbind hook failed");
            }
        }
    }

    /// Close every active connection and run one cleanup pass.
    pub fn shutdown(&mut self) {
        tracing::debug!(active = self.active.len(), "shutdown");
        let ids: Vec<ConnectionId> = self.active.iter().copied().collect();
        for id in ids {
            self.close_connection(id, false, None);
        }
        self.cleanup();
    }

    /// Lifecycle tag of a connection. `None` once it has been finalized
    /// (or for ids this manager never issued).
    pub fn state_of(&self, id: ConnectionId) -> Option<Lifecycle> {
        self.entries.get(&id).map(|e| e.state)
    }

    /// Whether the connection is in the message-queue subset.
    pub fn is_message_queue(&self, id: ConnectionId) -> bool {
        self.message_queue.contains(&id)
    }

    /// Whether a close request is queued for this connection.
    pub fn has_close_request(&self, id: ConnectionId) -> bool {
        self.closing.iter().any(|r| r.id == id)
    }

    /// Ids awaiting registration, in enqueue order.
    pub fn pending_ids(&self) -> Vec<ConnectionId> {
        self.pending.clone()
    }

    /// Ids currently registered with the selector.
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        self.active.iter().copied().collect()
    }

    /// Ids in the message-queue subset.
    pub fn message_queue_ids(&self) -> Vec<ConnectionId> {
        self.message_queue.iter().copied().collect()
    }

    /// Number of live connections in the arena.
    pub fn connection_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of queued close requests.
    pub fn closing_count(&self) -> usize {
        self.closing.len()
    }

    /// The selector, for drivers that need to arm or wait on it.
    pub fn selector(&self) -> &S {
        &self.selector
    }

    /// Mutable selector access.
    pub fn selector_mut(&mut self) -> &mut S {
        &mut self.selector
    }

    // ---- cycle steps -------------------------------------------------

    /// Register every pending connection captured at the start of the
    /// step. Connections enqueued by callbacks during the walk land in
    /// the fresh pending list and are drained next cycle, never this
    /// one.
    fn drain_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let snapshot = std::mem::take(&mut self.pending);
        for id in snapshot {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            match entry.connection.register(&mut self.selector, id) {
                Ok(()) => {
                    entry.state = Lifecycle::Active;
                    self.active.insert(id);
                    if entry.connection.kind().needs_manual_poll() {
                        // No connect event the selector could report for
                        // these; deliver the notification here.
                        self.message_queue.insert(id);
                        entry.connection.notify_connected();
                    }
                    tracing::debug!(%id, "connection registered");
                },
                Err(err) => {
                    tracing::debug!(%id, %err, "registration failed, deferring close");
                    self.defer_close(id, false, Some(err));
                },
            }
        }
    }

    /// Dispatch this cycle's selector-ready batch. A spawned connection
    /// (accepted peer) enters the pending list for the next cycle; an
    /// I/O fault becomes a deferred close and the loop continues.
    fn dispatch_ready(&mut self) {
        for id in self.selector.ready() {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            match entry.connection.process_events() {
                Ok(Some(spawned)) => {
                    let peer = self.insert_pending(spawned);
                    tracing::debug!(listener = %id, %peer, "accepted connection");
                },
                Ok(None) => {},
                Err(err) => {
                    tracing::debug!(%id, %err, "dispatch failed, deferring close");
                    self.defer_close(id, false, Some(err));
                },
            }
        }
    }

    /// Ask every message-queue connection directly whether it can still
    /// receive, independent of selector signaling. Message-queue sockets
    /// only re-arm their readiness descriptor once fully drained; under
    /// sustained load a message always arrives between the last drain
    /// and the next selector wait, so selector-only signaling would
    /// starve them permanently.
    fn poll_message_queues(&mut self) {
        if self.message_queue.is_empty() {
            return;
        }
        let ids: Vec<ConnectionId> = self.message_queue.iter().copied().collect();
        for id in ids {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            if !entry.connection.can_recv() {
                continue;
            }
            if let Err(err) = entry.connection.notify_readable() {
                tracing::debug!(%id, %err, "manual poll failed, deferring close");
                self.defer_close(id, false, Some(err));
            }
        }
    }

    // ---- construction ------------------------------------------------

    fn build_connection(
        &mut self,
        address: &str,
        endpoint: &Endpoint,
        spec: HandlerSpec,
    ) -> Result<Connection, ManagerError> {
        if self.entries.len() >= self.config.max_connections {
            return Err(ManagerError::AtCapacity(self.config.max_connections));
        }
        let (handler, spawn_factory) = self.resolve_handler(spec)?;
        let channel = self.channels.create(address, endpoint);
        Ok(Connection::new(channel, handler, spawn_factory))
    }

    #[allow(clippy::type_complexity)]
    fn resolve_handler(
        &mut self,
        spec: HandlerSpec,
    ) -> Result<(Box<dyn Handler>, Arc<dyn HandlerFactory>), ManagerError> {
        match spec {
            HandlerSpec::Factory(factory) => Ok((factory.build(), factory)),
            HandlerSpec::Existing(handler) => Ok((handler, Arc::new(NoopFactory))),
            HandlerSpec::Bundle(name) => {
                let factory = self.resolve_bundle(name)?;
                Ok((factory.build(), factory))
            },
            HandlerSpec::Default => {
                let factory: Arc<dyn HandlerFactory> = Arc::new(NoopFactory);
                Ok((factory.build(), factory))
            },
        }
    }

    fn resolve_bundle(
        &mut self,
        name: &'static str,
    ) -> Result<Arc<dyn HandlerFactory>, ManagerError> {
        let slot = self.bundles.get_mut(name).ok_or(ManagerError::UnknownBundle(name))?;
        let factory = match slot {
            BundleSlot::Resolved(factory) => Arc::clone(factory),
            BundleSlot::Unresolved(resolve) => {
                let factory = resolve();
                let cloned = Arc::clone(&factory);
                *slot = BundleSlot::Resolved(factory);
                tracing::debug!(bundle = name, "resolved handler bundle");
                cloned
            },
        };
        Ok(factory)
    }

    /// Queue a teardown request and tag the connection `Closing`. The
    /// connection keeps its index-set memberships until finalized.
    fn defer_close(&mut self, id: ConnectionId, flush: bool, reason: Option<ChannelError>) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.state = Lifecycle::Closing;
        }
        self.closing.push(CloseRequest { id, flush, reason });
    }

    fn insert_pending(&mut self, connection: Connection) -> ConnectionId {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, ConnectionEntry { connection, state: Lifecycle::Pending });
        self.pending.push(id);
        id
    }

    // ---- teardown ----------------------------------------------------

    /// Finalize one close request. Fallible so the cleanup drain can log
    /// hook failures and continue the batch; the connection itself is
    /// still released and removed even when its hook fails.
    fn finalize(&mut self, request: CloseRequest) -> Result<(), crate::error::TeardownError> {
        let CloseRequest { id, flush, reason } = request;
        let Some(entry) = self.entries.get_mut(&id) else {
            // Already finalized by an earlier request in this batch.
            return Ok(());
        };

        let hook_result = entry.connection.unbind(reason.as_ref());

        if flush && entry.connection.can_send() {
            // Data still buffered: retry at a later cleanup pass. The
            // retry lands in the fresh queue, so this pass terminates.
            tracing::debug!(%id, "outbound data buffered, deferring close");
            self.closing.push(CloseRequest { id, flush: true, reason });
            return hook_result;
        }

        entry.state = Lifecycle::Closed;
        entry.connection.close_release();
        self.entries.remove(&id);
        self.active.remove(&id);
        self.message_queue.remove(&id);
        self.pending.retain(|p| *p != id);
        tracing::debug!(%id, "connection closed");
        hook_result
    }
}

impl<S: Selector> std::fmt::Debug for ConnectionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.entries.len())
            .field("pending", &self.pending.len())
            .field("active", &self.active.len())
            .field("message_queue", &self.message_queue.len())
            .field("closing", &self.closing.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::channel::{Channel, ChannelKind};
    use crate::handler::NoopHandler;

    struct TestChannel {
        kind: ChannelKind,
        refuse_register: bool,
    }

    impl Channel for TestChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        fn open_passive(&mut self, _: &str, _: &Endpoint) -> Result<(), ChannelError> {
            Ok(())
        }

        fn open_active(&mut self, address: &str, _: &Endpoint) -> Result<(), ChannelError> {
            if address == "unresolvable" {
                return Err(ChannelError::AddressResolution { address: address.to_string() });
            }
            Ok(())
        }

        fn register(
            &mut self,
            selector: &mut dyn Selector,
            id: ConnectionId,
        ) -> Result<(), ChannelError> {
            if self.refuse_register {
                return Err(ChannelError::Closed);
            }
            selector.add(id);
            Ok(())
        }

        fn process_events(&mut self) -> Result<Option<Box<dyn Channel>>, ChannelError> {
            Ok(None)
        }

        fn can_send(&self) -> bool {
            false
        }

        fn can_recv(&self) -> bool {
            false
        }

        fn release(&mut self) {}
    }

    struct TestFactory {
        refuse_register: bool,
    }

    impl ChannelFactory for TestFactory {
        fn create(&self, _: &str, endpoint: &Endpoint) -> Box<dyn Channel> {
            let kind = match endpoint {
                Endpoint::Port(_) => ChannelKind::Stream,
                Endpoint::SocketType(_) => ChannelKind::MessageQueue,
            };
            Box::new(TestChannel { kind, refuse_register: self.refuse_register })
        }
    }

    struct TestSelector {
        registered: Vec<ConnectionId>,
    }

    impl Selector for TestSelector {
        fn add(&mut self, id: ConnectionId) {
            self.registered.push(id);
        }

        fn ready(&mut self) -> Vec<ConnectionId> {
            Vec::new()
        }
    }

    fn manager(refuse_register: bool) -> ConnectionManager<TestSelector> {
        ConnectionManager::new(
            TestSelector { registered: Vec::new() },
            Box::new(TestFactory { refuse_register }),
            ManagerConfig::default(),
        )
    }

    #[test]
    fn bind_enqueues_pending_until_next_process() {
        let mut m = manager(false);
        let id = m.bind("127.0.0.1", &Endpoint::Port(5555), HandlerSpec::Default).unwrap();

        assert_eq!(m.state_of(id), Some(Lifecycle::Pending));
        assert!(!m.is_connected(id));

        m.process();
        assert_eq!(m.state_of(id), Some(Lifecycle::Active));
        assert!(m.is_connected(id));
        assert_eq!(m.selector().registered, vec![id]);
    }

    #[test]
    fn message_queue_connections_join_the_subset() {
        let mut m = manager(false);
        let id = m
            .connect("tcp://broker", &Endpoint::SocketType("dealer".to_string()), HandlerSpec::Default)
            .unwrap();

        m.process();
        assert!(m.is_connected(id));
        assert!(m.is_message_queue(id));
    }

    #[test]
    fn registration_failure_defers_a_close_with_reason() {
        let mut m = manager(true);
        let id = m.bind("127.0.0.1", &Endpoint::Port(5555), HandlerSpec::Default).unwrap();

        m.process();
        assert!(!m.is_connected(id));
        assert!(m.has_close_request(id));
        assert_eq!(m.state_of(id), Some(Lifecycle::Closing));

        m.cleanup();
        assert_eq!(m.state_of(id), None);
    }

    #[test]
    fn connect_surfaces_resolution_failure_synchronously() {
        let mut m = manager(false);
        let result = m.connect("unresolvable", &Endpoint::Port(5555), HandlerSpec::Default);
        assert!(matches!(
            result,
            Err(ManagerError::Channel(ChannelError::AddressResolution { .. }))
        ));
        assert_eq!(m.connection_count(), 0);
    }

    #[test]
    fn capacity_bound_refuses_new_connections() {
        let mut m = ConnectionManager::new(
            TestSelector { registered: Vec::new() },
            Box::new(TestFactory { refuse_register: false }),
            ManagerConfig { max_connections: 1 },
        );

        m.bind("a", &Endpoint::Port(1), HandlerSpec::Default).unwrap();
        let result = m.bind("b", &Endpoint::Port(2), HandlerSpec::Default);
        assert!(matches!(result, Err(ManagerError::AtCapacity(1))));
    }

    #[test]
    fn bundle_resolution_happens_once_and_is_cached() {
        let mut m = manager(false);
        let resolutions = Rc::new(RefCell::new(0usize));
        let counter = Rc::clone(&resolutions);
        m.register_bundle("echo", move || {
            *counter.borrow_mut() += 1;
            Arc::new(|| Box::new(NoopHandler) as Box<dyn Handler>)
        });

        m.bind("a", &Endpoint::Port(1), HandlerSpec::Bundle("echo")).unwrap();
        m.bind("b", &Endpoint::Port(2), HandlerSpec::Bundle("echo")).unwrap();
        assert_eq!(*resolutions.borrow(), 1);
    }

    #[test]
    fn unknown_bundle_is_an_error() {
        let mut m = manager(false);
        let result = m.bind("a", &Endpoint::Port(1), HandlerSpec::Bundle("missing"));
        assert!(matches!(result, Err(ManagerError::UnknownBundle("missing"))));
    }

    #[test]
    fn cleanup_is_a_no_op_on_an_empty_queue() {
        let mut m = manager(false);
        let id = m.bind("a", &Endpoint::Port(1), HandlerSpec::Default).unwrap();
        m.process();

        m.cleanup();
        assert!(m.is_connected(id));
        assert_eq!(m.connection_count(), 1);
    }

    #[test]
    fn close_is_deferred_until_cleanup() {
        let mut m = manager(false);
        let id = m.bind("a", &Endpoint::Port(1), HandlerSpec::Default).unwrap();
        m.process();

        m.close_connection(id, false, None);
        assert!(m.is_connected(id));
        assert_eq!(m.state_of(id), Some(Lifecycle::Closing));

        m.cleanup();
        assert!(!m.is_connected(id));
        assert_eq!(m.state_of(id), None);
    }

    #[test]
    fn shutdown_closes_every_active_connection() {
        let mut m = manager(false);
        let a = m.bind("a", &Endpoint::Port(1), HandlerSpec::Default).unwrap();
        let b = m
            .connect("tcp://broker", &Endpoint::SocketType("sub".to_string()), HandlerSpec::Default)
            .unwrap();
        m.process();

        m.shutdown();
        assert!(!m.is_connected(a));
        assert!(!m.is_connected(b));
        assert_eq!(m.connection_count(), 0);
        assert!(m.message_queue_ids().is_empty());
    }

    #[test]
    fn idle_reflects_pending_connections() {
        let mut m = manager(false);
        assert!(m.is_idle());

        m.bind("a", &Endpoint::Port(1), HandlerSpec::Default).unwrap();
        assert!(!m.is_idle());

        m.process();
        assert!(m.is_idle());
    }
}
