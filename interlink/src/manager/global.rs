/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::common::BrokerError;
use crate::manager::{
    ComponentDescription, ConnectionDescription, InterfaceDescription, LocalManager,
    ManagerComponentServer,
};

/// The authoritative registry of processes, components, interfaces and
/// connections.
///
/// All state sits behind one lock that is never held across an `await`.
/// Topology changes are reported to the manager component server, when one
/// is registered, after the lock has been released.
pub struct GlobalManager {
    registry: RwLock<Registry>,
    next_connection_id: AtomicU64,
    server: RwLock<Option<Weak<ManagerComponentServer>>>,
}

#[derive(Default)]
struct Registry {
    processes: BTreeMap<String, ProcessEntry>,
    connections: BTreeMap<u64, ConnectionDescription>,
}

struct ProcessEntry {
    local: Weak<LocalManager>,
    components: BTreeMap<String, ComponentEntry>,
}

#[derive(Default)]
struct ComponentEntry {
    provided: BTreeSet<String>,
    required: BTreeSet<String>,
}

impl Debug for GlobalManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("GlobalManager")
            .field("processes", &registry.processes.keys().collect::<Vec<_>>())
            .field("connections", &registry.connections.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    fn component(&self, process: &str, component: &str) -> Option<&ComponentEntry> {
        self.processes.get(process)?.components.get(component)
    }

    fn component_mut(&mut self, process: &str, component: &str) -> Option<&mut ComponentEntry> {
        self.processes.get_mut(process)?.components.get_mut(component)
    }

    // Removes and returns the connections matching `predicate`.
    fn take_connections(
        &mut self,
        predicate: impl Fn(&ConnectionDescription) -> bool,
    ) -> Vec<ConnectionDescription> {
        let ids: Vec<u64> = self
            .connections
            .iter()
            .filter(|(_, connection)| predicate(connection))
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.connections.remove(&id))
            .collect()
    }
}

impl GlobalManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(Registry::default()),
            next_connection_id: AtomicU64::new(1),
            server: RwLock::new(None),
        })
    }

    /// Registers the manager component server; there can only be one.
    pub fn register_server(&self, server: &Arc<ManagerComponentServer>) -> Result<(), BrokerError> {
        let mut slot = self.server.write();
        if slot.as_ref().and_then(Weak::upgrade).is_some() {
            return Err(BrokerError::DuplicateServer(server.name().to_string()));
        }
        *slot = Some(Arc::downgrade(server));
        Ok(())
    }

    /// Forgets `server` if it is the registered one.
    pub(crate) fn unregister_server(&self, server: &Arc<ManagerComponentServer>) -> bool {
        let mut slot = self.server.write();
        let registered = slot
            .as_ref()
            .is_some_and(|current| std::ptr::eq(current.as_ptr(), Arc::as_ptr(server)));
        if registered {
            *slot = None;
            info!(server = server.name(), "server unregistered");
        }
        registered
    }

    pub fn server(&self) -> Option<Arc<ManagerComponentServer>> {
        self.server.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn add_process(&self, name: &str, local: &Arc<LocalManager>) -> Result<(), BrokerError> {
        self.register_process(name, Arc::downgrade(local))
    }

    pub(crate) fn register_process(
        &self,
        name: &str,
        local: Weak<LocalManager>,
    ) -> Result<(), BrokerError> {
        let mut registry = self.registry.write();
        if registry.processes.contains_key(name) {
            error!(process = name, "process already registered");
            return Err(BrokerError::DuplicateProcess(name.to_string()));
        }
        registry.processes.insert(
            name.to_string(),
            ProcessEntry {
                local,
                components: BTreeMap::new(),
            },
        );
        info!(process = name, "process registered");
        Ok(())
    }

    pub fn find_process(&self, name: &str) -> bool {
        self.registry.read().processes.contains_key(name)
    }

    /// The local manager of a registered process, while it is alive.
    pub fn local_manager(&self, name: &str) -> Option<Arc<LocalManager>> {
        self.registry
            .read()
            .processes
            .get(name)
            .and_then(|entry| entry.local.upgrade())
    }

    /// Unregisters a process with its components and connections.
    pub async fn remove_process(&self, name: &str) -> bool {
        let removed = {
            let mut registry = self.registry.write();
            if registry.processes.remove(name).is_none() {
                warn!(process = name, "process not registered");
                return false;
            }
            registry.take_connections(|c| {
                c.client.process_name == name || c.server.process_name == name
            })
        };
        self.notify_removed(removed).await;
        info!(process = name, "process removed");
        true
    }

    pub async fn add_component(&self, process: &str, component: &str) -> bool {
        {
            let mut registry = self.registry.write();
            let Some(entry) = registry.processes.get_mut(process) else {
                error!(process, component, "cannot add component to unknown process");
                return false;
            };
            if entry.components.contains_key(component) {
                error!(process, component, "component already registered");
                return false;
            }
            entry
                .components
                .insert(component.to_string(), ComponentEntry::default());
        }
        debug!(process, component, "component registered");
        if let Some(server) = self.server() {
            server
                .add_component_event(&ComponentDescription::new(process, component))
                .await;
        }
        true
    }

    pub fn find_component(&self, process: &str, component: &str) -> bool {
        self.registry.read().component(process, component).is_some()
    }

    pub async fn remove_component(&self, process: &str, component: &str) -> bool {
        let removed = {
            let mut registry = self.registry.write();
            let Some(entry) = registry.processes.get_mut(process) else {
                return false;
            };
            if entry.components.remove(component).is_none() {
                return false;
            }
            registry.take_connections(|c| {
                (c.client.process_name == process && c.client.component_name == component)
                    || (c.server.process_name == process && c.server.component_name == component)
            })
        };
        self.notify_removed(removed).await;
        true
    }

    pub fn add_interface_provided(&self, process: &str, component: &str, interface: &str) -> bool {
        let mut registry = self.registry.write();
        match registry.component_mut(process, component) {
            Some(entry) => entry.provided.insert(interface.to_string()),
            None => {
                error!(process, component, interface, "cannot add interface to unknown component");
                false
            }
        }
    }

    pub fn add_interface_required(&self, process: &str, component: &str, interface: &str) -> bool {
        let mut registry = self.registry.write();
        match registry.component_mut(process, component) {
            Some(entry) => entry.required.insert(interface.to_string()),
            None => {
                error!(process, component, interface, "cannot add interface to unknown component");
                false
            }
        }
    }

    pub fn find_interface_provided(&self, process: &str, component: &str, interface: &str) -> bool {
        self.registry
            .read()
            .component(process, component)
            .is_some_and(|entry| entry.provided.contains(interface))
    }

    pub fn find_interface_required(&self, process: &str, component: &str, interface: &str) -> bool {
        self.registry
            .read()
            .component(process, component)
            .is_some_and(|entry| entry.required.contains(interface))
    }

    pub async fn remove_interface_provided(
        &self,
        process: &str,
        component: &str,
        interface: &str,
    ) -> bool {
        let removed = {
            let mut registry = self.registry.write();
            let Some(entry) = registry.component_mut(process, component) else {
                return false;
            };
            if !entry.provided.remove(interface) {
                return false;
            }
            registry.take_connections(|c| {
                c.server.process_name == process
                    && c.server.component_name == component
                    && c.server.interface_name == interface
            })
        };
        self.notify_removed(removed).await;
        true
    }

    pub async fn remove_interface_required(
        &self,
        process: &str,
        component: &str,
        interface: &str,
    ) -> bool {
        let removed = {
            let mut registry = self.registry.write();
            let Some(entry) = registry.component_mut(process, component) else {
                return false;
            };
            if !entry.required.remove(interface) {
                return false;
            }
            registry.take_connections(|c| {
                c.client.process_name == process
                    && c.client.component_name == component
                    && c.client.interface_name == interface
            })
        };
        self.notify_removed(removed).await;
        true
    }

    /// Records a connection requested by `requester` and assigns its id.
    ///
    /// The requester must be one of the two processes involved, both
    /// interfaces must be registered and the pair must not be connected yet.
    #[instrument(skip(self, connection), fields(connection = %connection))]
    pub async fn connect(&self, requester: &str, connection: &ConnectionDescription) -> Option<u64> {
        let recorded = {
            let mut registry = self.registry.write();
            if !registry.processes.contains_key(requester) {
                error!(requester, "connection requested by an unknown process");
                return None;
            }
            if requester != connection.client.process_name
                && requester != connection.server.process_name
            {
                error!(requester, "requester is not part of the connection");
                return None;
            }
            let client = &connection.client;
            let server = &connection.server;
            let client_known = registry
                .component(&client.process_name, &client.component_name)
                .is_some_and(|entry| entry.required.contains(&client.interface_name));
            if !client_known {
                error!(client = %client, "required interface is not registered");
                return None;
            }
            let server_known = registry
                .component(&server.process_name, &server.component_name)
                .is_some_and(|entry| entry.provided.contains(&server.interface_name));
            if !server_known {
                error!(server = %server, "provided interface is not registered");
                return None;
            }
            if registry
                .connections
                .values()
                .any(|existing| existing.same_endpoints(connection))
            {
                error!("interfaces are already connected");
                return None;
            }
            let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
            let mut recorded = connection.clone();
            recorded.connection_id = id;
            registry.connections.insert(id, recorded.clone());
            recorded
        };
        info!(id = recorded.connection_id, "connection recorded");
        if let Some(server) = self.server() {
            server.add_connection_event(&recorded).await;
        }
        Some(recorded.connection_id)
    }

    /// Forgets a connection, looked up by id when set and by endpoints otherwise.
    pub async fn disconnect(&self, connection: &ConnectionDescription) -> bool {
        let removed = {
            let mut registry = self.registry.write();
            let id = if connection.connection_id != 0 {
                Some(connection.connection_id)
            } else {
                registry
                    .connections
                    .iter()
                    .find(|(_, existing)| existing.same_endpoints(connection))
                    .map(|(id, _)| *id)
            };
            id.and_then(|id| registry.connections.remove(&id))
        };
        match removed {
            Some(removed) => {
                info!(connection = %removed, "connection removed");
                self.notify_removed(vec![removed]).await;
                true
            }
            None => {
                warn!(connection = %connection, "no such connection");
                false
            }
        }
    }

    async fn notify_removed(&self, removed: Vec<ConnectionDescription>) {
        if removed.is_empty() {
            return;
        }
        if let Some(server) = self.server() {
            for connection in &removed {
                server.remove_connection_event(connection).await;
            }
        }
    }

    pub fn is_already_connected(&self, connection: &ConnectionDescription) -> bool {
        self.registry
            .read()
            .connections
            .values()
            .any(|existing| existing.same_endpoints(connection))
    }

    pub fn connection(&self, id: u64) -> Option<ConnectionDescription> {
        self.registry.read().connections.get(&id).cloned()
    }

    /// The recorded connection with the same endpoints as `connection`,
    /// which must also carry the same id when one is set.
    pub fn recorded_connection(
        &self,
        connection: &ConnectionDescription,
    ) -> Option<ConnectionDescription> {
        self.registry
            .read()
            .connections
            .values()
            .find(|existing| {
                existing.same_endpoints(connection)
                    && (connection.connection_id == 0
                        || existing.connection_id == connection.connection_id)
            })
            .cloned()
    }

    pub fn names_of_processes(&self) -> Vec<String> {
        self.registry.read().processes.keys().cloned().collect()
    }

    pub fn names_of_components(&self, process: &str) -> Vec<String> {
        self.registry
            .read()
            .processes
            .get(process)
            .map(|entry| entry.components.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn names_of_interfaces(&self, process: &str, component: &str) -> Option<InterfaceDescription> {
        self.registry
            .read()
            .component(process, component)
            .map(|entry| {
                InterfaceDescription::new(
                    process.to_string(),
                    component.to_string(),
                    entry.provided.iter().cloned().collect(),
                    entry.required.iter().cloned().collect(),
                )
            })
    }

    pub fn list_of_connections(&self) -> Vec<ConnectionDescription> {
        self.registry.read().connections.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::InterfaceEndpoint;

    async fn two_process_registry() -> Arc<GlobalManager> {
        let global = GlobalManager::new();
        global.register_process("P1", Weak::new()).expect("P1");
        global.register_process("P2", Weak::new()).expect("P2");
        assert!(global.add_component("P1", "Client").await);
        assert!(global.add_component("P2", "Server").await);
        assert!(global.add_interface_required("P1", "Client", "Required"));
        assert!(global.add_interface_provided("P2", "Server", "Provided"));
        global
    }

    fn connection() -> ConnectionDescription {
        ConnectionDescription::new(
            InterfaceEndpoint::new("P1", "Client", "Required"),
            InterfaceEndpoint::new("P2", "Server", "Provided"),
        )
    }

    #[tokio::test]
    async fn connect_assigns_ids_and_rejects_duplicates() {
        let global = two_process_registry().await;
        let id = global.connect("P1", &connection()).await.expect("connected");
        assert!(id > 0);
        assert!(global.is_already_connected(&connection()));
        assert_eq!(global.connect("P2", &connection()).await, None);
        assert_eq!(global.connection(id).map(|c| c.connection_id), Some(id));
    }

    #[tokio::test]
    async fn connect_validates_requester_and_interfaces() {
        let global = two_process_registry().await;
        global.register_process("P3", Weak::new()).expect("P3");
        assert_eq!(global.connect("P3", &connection()).await, None);
        assert_eq!(global.connect("Nobody", &connection()).await, None);

        let mut unknown = connection();
        unknown.server.interface_name = "Missing".to_string();
        assert_eq!(global.connect("P1", &unknown).await, None);
    }

    #[tokio::test]
    async fn removing_a_process_drops_its_connections() {
        let global = two_process_registry().await;
        global.connect("P1", &connection()).await.expect("connected");
        assert!(global.remove_process("P2").await);
        assert!(global.list_of_connections().is_empty());
        assert_eq!(global.names_of_processes(), vec!["P1".to_string()]);
    }

    #[tokio::test]
    async fn disconnect_by_endpoints() {
        let global = two_process_registry().await;
        global.connect("P1", &connection()).await.expect("connected");
        assert!(global.disconnect(&connection()).await);
        assert!(!global.disconnect(&connection()).await);
    }

    #[tokio::test]
    async fn recorded_connection_needs_every_endpoint() {
        let global = two_process_registry().await;
        let id = global.connect("P1", &connection()).await.expect("connected");
        assert_eq!(
            global.recorded_connection(&connection()).map(|c| c.connection_id),
            Some(id)
        );

        let mut other_interface = connection();
        other_interface.server.interface_name = "Other".to_string();
        assert!(global.recorded_connection(&other_interface).is_none());

        let mut stale = connection();
        stale.connection_id = id + 1;
        assert!(global.recorded_connection(&stale).is_none());
    }

    #[test]
    fn duplicate_process_is_an_error() {
        let global = GlobalManager::new();
        global.register_process("P1", Weak::new()).expect("first");
        assert_eq!(
            global.register_process("P1", Weak::new()),
            Err(BrokerError::DuplicateProcess("P1".to_string()))
        );
    }
}
