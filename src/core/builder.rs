use std::sync::Arc;

use super::config::ClusterConfig;
use super::hooks::{ProcessExit, ProcessHooks};
use super::master::{ClusterMaster, MasterParts};
use crate::{
    bus::{EventBus, RelayPolicy, Sender},
    events::Bus,
    process::Spawn,
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for a [`ClusterMaster`] with optional collaborators.
pub struct ClusterMasterBuilder {
    cfg: ClusterConfig,
    spawner: Arc<dyn Spawn>,
    hooks: Arc<dyn ProcessHooks>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    relay: RelayPolicy,
    bus: Option<EventBus>,
}

impl ClusterMasterBuilder {
    /// Creates a builder; workers are started through `spawner`.
    pub fn new(cfg: ClusterConfig, spawner: Arc<dyn Spawn>) -> Self {
        Self {
            cfg,
            spawner,
            hooks: Arc::new(ProcessExit),
            subscribers: Vec::new(),
            relay: RelayPolicy::default(),
            bus: None,
        }
    }

    /// Replaces the default [`ProcessExit`] hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn ProcessHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Sets lifecycle event subscribers.
    ///
    /// Each subscriber gets a dedicated worker with a bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Decides which bus events are relayed to workers.
    pub fn with_relay_policy(mut self, relay: RelayPolicy) -> Self {
        self.relay = relay;
        self
    }

    /// Uses an existing bus instead of creating one. Its sender should be
    /// [`Sender::Master`].
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Builds the master and starts forwarding lifecycle events to subscribers.
    ///
    /// Must be called inside a Tokio runtime. Nothing is forked until
    /// [`ClusterMaster::initialize`] or [`ClusterMaster::run`].
    pub fn build(self) -> Arc<ClusterMaster> {
        let events = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, events.clone()));
        let bus = self.bus.unwrap_or_else(|| EventBus::new(Sender::Master));

        let master = ClusterMaster::new_internal(MasterParts {
            cfg: self.cfg,
            bus,
            events,
            subs,
            spawner: self.spawner,
            hooks: self.hooks,
            relay: self.relay,
        });
        master.subscriber_listener();
        master
    }
}

impl ClusterMaster {
    /// Starts building a master over `spawner`.
    pub fn builder(cfg: ClusterConfig, spawner: Arc<dyn Spawn>) -> ClusterMasterBuilder {
        ClusterMasterBuilder::new(cfg, spawner)
    }
}
