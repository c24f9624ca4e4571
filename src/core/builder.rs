use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::bridge::Bridge;
use crate::{
    actions::State,
    adapters::{ObserverTransport, StateAdapter},
    config::BridgeConfig,
    events::Bus,
    listeners::Listener,
    locks::LockManager,
    resources::ResourceManager,
    router::{ActionExecutor, ActionRouter, Middleware},
    scheduler::TaskScheduler,
    subscriptions::SubscriptionManager,
    thunks::ThunkManager,
};

/// Builder for constructing a [`Bridge`] around a host's state container and transport.
pub struct BridgeBuilder {
    cfg: BridgeConfig,
    adapter: Arc<dyn StateAdapter>,
    transport: Arc<dyn ObserverTransport>,
    middleware: Vec<Arc<dyn Middleware>>,
    listeners: Vec<Arc<dyn Listener>>,
}

impl BridgeBuilder {
    /// Creates a builder with the default configuration.
    pub fn new(adapter: Arc<dyn StateAdapter>, transport: Arc<dyn ObserverTransport>) -> Self {
        Self {
            cfg: BridgeConfig::default(),
            adapter,
            transport,
            middleware: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, cfg: BridgeConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Appends a middleware. Middleware runs in insertion order.
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Sets telemetry listeners.
    ///
    /// Listeners receive bridge events (thunk lifecycle, locks, updates, etc.)
    /// through dedicated workers with bounded queues.
    pub fn with_listeners(mut self, listeners: Vec<Arc<dyn Listener>>) -> Self {
        self.listeners = listeners;
        self
    }

    /// Builds and returns the Bridge instance.
    ///
    /// This consumes the builder and initializes all runtime components in
    /// dependency order:
    /// - Event bus
    /// - Lock manager, then the task scheduler releasing through it
    /// - Thunk manager, executor and router
    /// - Subscription and resource managers
    /// - Listener loop and, when `sweep_interval > 0`, the maintenance loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Arc<Bridge> {
        let cfg = self.cfg;
        let bus = Bus::new(cfg.bus_capacity_clamped());

        let locks = Arc::new(LockManager::new(bus.clone()));
        let scheduler = TaskScheduler::new(Arc::clone(&locks), bus.clone());
        let thunks = ThunkManager::new(Arc::clone(&scheduler), bus.clone(), cfg.eviction_grace);
        let executor = Arc::new(ActionExecutor::new(Arc::clone(&self.adapter), bus.clone()));
        let router = ActionRouter::new(
            Arc::clone(&executor),
            Arc::clone(&scheduler),
            Arc::clone(&thunks),
            self.middleware,
            bus.clone(),
            cfg.default_priority,
            cfg.bypass_priority,
        );
        let resources = ResourceManager::new(cfg.observer_limit(), bus.clone());

        let bridge = Arc::new(Bridge {
            last_state: Mutex::new(self.adapter.get_state()),
            cfg,
            bus,
            locks,
            scheduler,
            thunks,
            executor,
            router,
            subscriptions: SubscriptionManager::new(),
            resources,
            transport: self.transport,
            adapter_subscription: Mutex::new(None),
            token: CancellationToken::new(),
            closed: AtomicBool::new(false),
            maintenance_started: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&bridge);
        let unsub = self.adapter.subscribe(Arc::new(move |state: &State| {
            if let Some(bridge) = weak.upgrade() {
                bridge.on_state_change(state);
            }
        }));
        *bridge.adapter_subscription.lock() = Some(unsub);

        for listener in self.listeners {
            bridge.resources.register_listener(listener);
        }
        bridge.spawn_listener_loop();
        bridge.spawn_maintenance();
        bridge
    }
}
