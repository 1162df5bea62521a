//! In-process resource layer: turns the master's container requests into
//! running [`ContainerHandle`]s sharing one store and one stream bus.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::checkpoint::CheckpointStore;
use crate::container::{ContainerHandle, MasterLink};
use crate::master::Master;
use crate::queue::StreamBus;
use crate::registry::ComponentRegistry;
use crate::types::ContainerId;

pub struct LocalCluster {
    master: Arc<Master>,
    registry: ComponentRegistry,
    store: Arc<dyn CheckpointStore>,
    bus: StreamBus,
    containers: Mutex<BTreeMap<ContainerId, Arc<ContainerHandle>>>,
}

impl LocalCluster {
    pub fn new(
        master: Arc<Master>,
        registry: ComponentRegistry,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            master,
            registry,
            store,
            bus: StreamBus::new(),
            containers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn master(&self) -> &Arc<Master> {
        &self.master
    }

    pub fn bus(&self) -> &StreamBus {
        &self.bus
    }

    /// Start every container the master asked for. Must run within a tokio runtime.
    pub fn provision_pending(&self) -> Vec<ContainerId> {
        let mut started = Vec::new();
        for command in self.master.take_container_requests() {
            let id = command.container_id.clone();
            if let Err(e) = self.master.container_provisioned(&id, Instant::now()) {
                tracing::error!("cannot provision {}: {:#}", id, e);
                continue;
            }
            let link = Arc::new(MasterLink::local(Arc::clone(&self.master)));
            match ContainerHandle::spawn(
                &command,
                &self.registry,
                Arc::clone(&self.store),
                &self.bus,
                link,
            ) {
                Ok(handle) => {
                    self.containers
                        .lock()
                        .expect("containers poisoned")
                        .insert(id.clone(), Arc::new(handle));
                    started.push(id);
                }
                Err(error) => {
                    if let Err(e) = self.master.container_deploy_failed(&id, &error) {
                        tracing::error!("cannot report failed deployment of {}: {:#}", id, e);
                    }
                }
            }
        }
        started
    }

    /// One supervision round: time out silent containers, forget finished ones,
    /// and start replacements. Returns the containers timed out in this round.
    pub fn supervise_once(&self, now: Instant) -> Vec<ContainerId> {
        let timed_out = self.master.check_heartbeats(now);
        self.containers
            .lock()
            .expect("containers poisoned")
            .retain(|id, handle| {
                let alive = handle.is_running() || handle.is_heartbeating();
                if !alive {
                    tracing::debug!("container {} exited", id);
                }
                alive
            });
        self.provision_pending();
        timed_out
    }

    pub fn spawn_supervisor(self: Arc<Self>) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.master.config().heartbeat.interval;
        let this = Arc::clone(&self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.supervise_once(Instant::now());
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        (shutdown_tx, handle)
    }

    pub fn container(&self, container_id: &str) -> Option<Arc<ContainerHandle>> {
        self.containers
            .lock()
            .expect("containers poisoned")
            .get(container_id)
            .cloned()
    }

    /// Handle of the container currently assigned `operator` by the master.
    pub fn container_for(&self, operator: &str) -> Option<Arc<ContainerHandle>> {
        self.container(&self.master.container_for(operator)?)
    }

    pub fn container_ids(&self) -> Vec<ContainerId> {
        self.containers
            .lock()
            .expect("containers poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Simulate a process crash of one container.
    pub fn kill_container(&self, container_id: &str) -> bool {
        match self.container(container_id) {
            Some(handle) => {
                handle.kill();
                true
            }
            None => false,
        }
    }

    /// Simulate a network partition between one container and the master.
    pub fn sever_container(&self, container_id: &str, cut: bool) -> bool {
        match self.container(container_id) {
            Some(handle) => {
                handle.sever(cut);
                true
            }
            None => false,
        }
    }

    /// Stop every container without waiting for window boundaries.
    pub fn stop_all(&self) {
        for handle in self.containers.lock().expect("containers poisoned").values() {
            handle.stop();
        }
    }
}

#[cfg(test)]
#[path = "tests/cluster_tests.rs"]
mod tests;
