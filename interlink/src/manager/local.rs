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

use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::bail;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use static_assertions::assert_impl_all;
use tracing::{debug, error, info, instrument, warn};

use crate::common::BrokerError;
use crate::component::{Component, ComponentState};
use crate::interface::{InterfaceProvidedDescription, InterfaceRequiredDescription};
use crate::manager::names::is_manager_component;
use crate::manager::{
    ComponentDescription, ConnectionDescription, GlobalManager, InterfaceEndpoint,
    ManagerComponentClient,
};

/// Builds a component of a registered class from its name and constructor
/// argument.
pub type ComponentFactory = Arc<dyn Fn(&str, &str) -> Arc<Component> + Send + Sync + 'static>;

/// Per-process manager: owns the process's components and applies the
/// lifecycle and connection requests that reach the process.
///
/// Every process has exactly one local manager, registered with the global
/// manager under the process name, and one manager component client that
/// exposes the local manager to the rest of the system.
pub struct LocalManager {
    process_name: String,
    global: Arc<GlobalManager>,
    components: DashMap<String, Arc<Component>>,
    classes: DashMap<String, ComponentFactory>,
    libraries: DashMap<String, Vec<(String, ComponentFactory)>>,
    loaded_libraries: Mutex<BTreeSet<String>>,
    log_forwarding: AtomicBool,
    clock_offset: RwLock<f64>,
    client: RwLock<Option<Arc<ManagerComponentClient>>>,
}

impl Debug for LocalManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalManager")
            .field("process", &self.process_name)
            .field("components", &self.names_of_components())
            .finish_non_exhaustive()
    }
}

impl LocalManager {
    /// Registers process `process_name` and brings up its manager component
    /// client, connected to the server when one exists.
    #[instrument(skip(global))]
    pub async fn new(process_name: &str, global: &Arc<GlobalManager>) -> anyhow::Result<Arc<Self>> {
        let local = Arc::new(Self {
            process_name: process_name.to_string(),
            global: global.clone(),
            components: DashMap::new(),
            classes: DashMap::new(),
            libraries: DashMap::new(),
            loaded_libraries: Mutex::new(BTreeSet::new()),
            log_forwarding: AtomicBool::new(false),
            clock_offset: RwLock::new(0.0),
            client: RwLock::new(None),
        });
        global.add_process(process_name, &local)?;

        let client = ManagerComponentClient::create(&local).await?;
        *local.client.write() = Some(client.clone());

        if let Some(server) = global.server() {
            server.add_new_client_process(process_name)?;
            if !client.connect_to_server(&server) {
                bail!(BrokerError::ConnectionFailed(format!(
                    "{process_name} could not reach {}",
                    server.name()
                )));
            }
        }
        info!("local manager ready");
        Ok(local)
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn global(&self) -> &Arc<GlobalManager> {
        &self.global
    }

    pub fn client(&self) -> Option<Arc<ManagerComponentClient>> {
        self.client.read().clone()
    }

    /// Adds a user component: registers it and its interfaces globally and
    /// attaches it to the manager component client.
    #[instrument(skip(self, component), fields(process = %self.process_name, component = component.name()))]
    pub async fn add_component(&self, component: Arc<Component>) -> bool {
        if is_manager_component(component.name()) {
            error!("manager component names are reserved");
            return false;
        }
        if !component.add_internal_interface() {
            error!("component already has an internal interface");
            return false;
        }
        if !self.insert(component.clone()).await {
            return false;
        }
        if let Some(client) = self.client() {
            if !client.add_new_client_component(&component) {
                warn!("component is not reachable through the manager");
            }
        }
        true
    }

    /// Adds a manager component, which gets no internal interface.
    pub(crate) async fn add_manager_component(&self, component: Arc<Component>) -> bool {
        self.insert(component).await
    }

    /// Kills and unregisters a manager component.
    pub(crate) async fn remove_manager_component(&self, name: &str) -> bool {
        let Some((_, component)) = self.components.remove(name) else {
            return false;
        };
        component.kill().await;
        self.global.remove_component(&self.process_name, name).await
    }

    async fn insert(&self, component: Arc<Component>) -> bool {
        let name = component.name().to_string();
        if self.components.contains_key(&name) {
            error!(component = %name, "component already exists in this process");
            return false;
        }
        component.set_process_name(&self.process_name);
        if !self.global.add_component(&self.process_name, &name).await {
            return false;
        }
        self.components.insert(name, component.clone());
        self.register_interfaces(&component);
        true
    }

    fn register_interfaces(&self, component: &Component) {
        for interface in component.names_of_interfaces_provided() {
            self.global
                .add_interface_provided(&self.process_name, component.name(), &interface);
        }
        for interface in component.names_of_interfaces_required() {
            self.global
                .add_interface_required(&self.process_name, component.name(), &interface);
        }
    }

    /// Kills and unregisters a user component.
    pub async fn remove_component(&self, name: &str) -> bool {
        if is_manager_component(name) {
            error!(component = name, "manager components cannot be removed");
            return false;
        }
        let Some((_, component)) = self.components.remove(name) else {
            warn!(component = name, "no such component");
            return false;
        };
        if let Some(client) = self.client() {
            client.remove_client_component(name).await;
        }
        component.kill().await;
        self.global.remove_component(&self.process_name, name).await
    }

    pub fn component(&self, name: &str) -> Option<Arc<Component>> {
        self.components.get(name).map(|entry| entry.value().clone())
    }

    pub fn names_of_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Connects two interfaces of this process.
    pub async fn connect(
        &self,
        client_component: &str,
        client_interface: &str,
        server_component: &str,
        server_interface: &str,
    ) -> bool {
        let connection = self.local_connection(
            client_component,
            client_interface,
            server_component,
            server_interface,
        );
        self.connect_description(&connection).await
    }

    pub async fn disconnect(
        &self,
        client_component: &str,
        client_interface: &str,
        server_component: &str,
        server_interface: &str,
    ) -> bool {
        let connection = self.local_connection(
            client_component,
            client_interface,
            server_component,
            server_interface,
        );
        self.disconnect_description(&connection).await
    }

    fn local_connection(
        &self,
        client_component: &str,
        client_interface: &str,
        server_component: &str,
        server_interface: &str,
    ) -> ConnectionDescription {
        ConnectionDescription::new(
            InterfaceEndpoint::new(&self.process_name, client_component, client_interface),
            InterfaceEndpoint::new(&self.process_name, server_component, server_interface),
        )
    }

    /// Binds the required interface to the provided one and records the
    /// connection globally. Both ends must live in this process.
    #[instrument(skip(self), fields(process = %self.process_name))]
    pub async fn connect_description(&self, connection: &ConnectionDescription) -> bool {
        if connection.client.process_name != self.process_name
            || connection.server.process_name != self.process_name
        {
            error!(%connection, "connections across processes are not supported");
            return false;
        }
        let Some(required) = self
            .component(&connection.client.component_name)
            .and_then(|c| c.interface_required(&connection.client.interface_name))
        else {
            error!(client = %connection.client, "no such required interface");
            return false;
        };
        let Some(provided) = self
            .component(&connection.server.component_name)
            .and_then(|c| c.interface_provided(&connection.server.interface_name))
        else {
            error!(server = %connection.server, "no such provided interface");
            return false;
        };

        let Some(id) = self.global.connect(&self.process_name, connection).await else {
            return false;
        };
        if !required.connect_to(&provided) {
            let mut recorded = connection.clone();
            recorded.connection_id = id;
            self.global.disconnect(&recorded).await;
            return false;
        }
        true
    }

    #[instrument(skip(self), fields(process = %self.process_name))]
    pub async fn disconnect_description(&self, connection: &ConnectionDescription) -> bool {
        if connection.client.process_name != self.process_name {
            error!(%connection, "client interface does not belong to this process");
            return false;
        }
        let Some(required) = self
            .component(&connection.client.component_name)
            .and_then(|c| c.interface_required(&connection.client.interface_name))
        else {
            error!(client = %connection.client, "no such required interface");
            return false;
        };
        let Some(recorded) = self.global.recorded_connection(connection) else {
            warn!(%connection, "no such connection");
            return false;
        };
        let bound_to_server = required.connected_interface().is_some_and(|provided| {
            provided.component_name() == recorded.server.component_name
        });
        if !bound_to_server {
            warn!(%connection, "interfaces are not connected");
            return false;
        }
        required.detach_commands();
        self.global.disconnect(&recorded).await
    }

    /// Registers a class that [`LocalManager::create_component`] can instantiate.
    pub fn register_component_class<F>(&self, class_name: &str, factory: F) -> bool
    where
        F: Fn(&str, &str) -> Arc<Component> + Send + Sync + 'static,
    {
        self.insert_class(class_name, Arc::new(factory))
    }

    fn insert_class(&self, class_name: &str, factory: ComponentFactory) -> bool {
        if self.classes.contains_key(class_name) {
            error!(class = class_name, "component class already registered");
            return false;
        }
        self.classes.insert(class_name.to_string(), factory);
        true
    }

    pub fn names_of_component_classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Makes a set of classes available under a library name, to be
    /// registered by [`LocalManager::load_library`].
    pub fn register_library(
        &self,
        library_name: &str,
        classes: impl IntoIterator<Item = (String, ComponentFactory)>,
    ) {
        self.libraries
            .insert(library_name.to_string(), classes.into_iter().collect());
    }

    /// Registers the classes of a library. Loading twice succeeds once.
    pub fn load_library(&self, library_name: &str) -> bool {
        let mut loaded = self.loaded_libraries.lock();
        if loaded.contains(library_name) {
            debug!(library = library_name, "library already loaded");
            return true;
        }
        let Some(classes) = self.libraries.get(library_name).map(|e| e.value().clone()) else {
            error!(library = library_name, "unknown library");
            return false;
        };
        for (class_name, factory) in classes {
            self.insert_class(&class_name, factory);
        }
        loaded.insert(library_name.to_string());
        info!(library = library_name, "library loaded");
        true
    }

    /// Instantiates a registered class and adds the new component.
    #[instrument(skip(self, description), fields(component = %description.component_name, class = %description.class_name))]
    pub async fn create_component(&self, description: &ComponentDescription) -> bool {
        if description.process_name != self.process_name {
            error!(process = %description.process_name, "component belongs to another process");
            return false;
        }
        if self.components.contains_key(&description.component_name) {
            error!("component already exists");
            return false;
        }
        let Some(factory) = self
            .classes
            .get(&description.class_name)
            .map(|e| e.value().clone())
        else {
            error!("unknown component class");
            return false;
        };
        let component = factory(&description.component_name, &description.argument);
        if component.name() != description.component_name {
            error!(created = component.name(), "factory returned a component with another name");
            return false;
        }
        self.add_component(component).await
    }

    pub async fn configure_component(&self, name: &str, argument: &str) -> bool {
        match self.component(name) {
            Some(component) => component.configure(argument).await,
            None => {
                error!(component = name, "cannot configure unknown component");
                false
            }
        }
    }

    pub async fn start_component(&self, name: &str) -> bool {
        match self.component(name) {
            Some(component) => component.start().await,
            None => {
                error!(component = name, "cannot start unknown component");
                false
            }
        }
    }

    pub async fn stop_component(&self, name: &str) -> bool {
        match self.component(name) {
            Some(component) => component.stop().await,
            None => {
                error!(component = name, "cannot stop unknown component");
                false
            }
        }
    }

    pub async fn resume_component(&self, name: &str) -> bool {
        match self.component(name) {
            Some(component) => component.resume().await,
            None => {
                error!(component = name, "cannot resume unknown component");
                false
            }
        }
    }

    pub fn component_state(&self, name: &str) -> Option<ComponentState> {
        self.component(name).map(|component| component.state())
    }

    pub fn interface_provided_description(
        &self,
        component: &str,
        interface: &str,
    ) -> Option<InterfaceProvidedDescription> {
        self.component(component)?
            .interface_provided(interface)
            .map(|interface| interface.get_description())
    }

    pub fn interface_required_description(
        &self,
        component: &str,
        interface: &str,
    ) -> Option<InterfaceRequiredDescription> {
        self.component(component)?
            .interface_required(interface)
            .map(|interface| interface.get_description())
    }

    pub fn set_log_forwarding(&self, enabled: bool) {
        self.log_forwarding.store(enabled, Ordering::Release);
        info!(process = %self.process_name, enabled, "log forwarding changed");
    }

    pub fn log_forwarding(&self) -> bool {
        self.log_forwarding.load(Ordering::Acquire)
    }

    /// Sends a log line to the server when forwarding is enabled.
    pub async fn forward_log(&self, text: &str) -> bool {
        if !self.log_forwarding() {
            return false;
        }
        match self.client() {
            Some(client) => client.print_log(text).await,
            None => false,
        }
    }

    /// Seconds since the Unix epoch, shifted by the configured clock offset.
    pub fn absolute_time_in_seconds(&self) -> f64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |elapsed| elapsed.as_secs_f64());
        now + *self.clock_offset.read()
    }

    /// Shifts the clock this process reports, in seconds.
    pub fn set_clock_offset(&self, offset: f64) {
        *self.clock_offset.write() = offset;
    }

    /// Removes every component, then the process itself.
    #[instrument(skip(self), fields(process = %self.process_name))]
    pub async fn shutdown(&self) {
        let user_components: Vec<String> = self
            .names_of_components()
            .into_iter()
            .filter(|name| !is_manager_component(name))
            .collect();
        for name in user_components {
            self.remove_component(&name).await;
        }
        if let Some(server) = self.global.server() {
            server.disconnect_cleanup(&self.process_name).await;
        }
        let client = self.client.write().take();
        if let Some(client) = client {
            client.disconnect_from_server();
        }
        let managers: Vec<Arc<Component>> = self
            .components
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.components.clear();
        join_all(managers.iter().map(|component| component.kill())).await;
        self.global.remove_process(&self.process_name).await;
        info!("process shut down");
    }
}

assert_impl_all!(LocalManager: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{QueuingPolicy, Requirement};

    #[tokio::test]
    async fn components_get_registered_with_their_interfaces() {
        let global = GlobalManager::new();
        let local = LocalManager::new("P1", &global).await.expect("process");
        let component = Component::new("Sensor");
        component.add_interface_provided("Data", QueuingPolicy::CommandsShouldNotBeQueued);
        component.add_interface_required("Clock", Requirement::Optional);
        assert!(local.add_component(component).await);

        assert!(global.find_component("P1", "Sensor"));
        assert!(global.find_interface_provided("P1", "Sensor", "Data"));
        assert!(global.find_interface_provided("P1", "Sensor", "InterfaceInternal"));
        assert!(global.find_interface_required("P1", "Sensor", "Clock"));
        assert!(local.names_of_components().contains(&"P1_MCC".to_string()));

        assert!(!local.add_component(Component::new("Sensor")).await);
        assert!(!local.add_component(Component::new("Fake_MCC")).await);
    }

    #[tokio::test]
    async fn classes_and_libraries() {
        let global = GlobalManager::new();
        let local = LocalManager::new("P1", &global).await.expect("process");
        let factory: ComponentFactory = Arc::new(|name: &str, _argument: &str| Component::new(name));
        local.register_library("sensors", vec![("Thermometer".to_string(), factory)]);

        let description = ComponentDescription::of_class("P1", "T1", "Thermometer", "");
        assert!(!local.create_component(&description).await);
        assert!(!local.load_library("missing"));
        assert!(local.load_library("sensors"));
        assert!(local.load_library("sensors"));
        assert_eq!(local.names_of_component_classes(), vec!["Thermometer".to_string()]);
        assert!(local.create_component(&description).await);
        assert!(!local.create_component(&description).await);
        assert_eq!(local.component_state("T1"), Some(ComponentState::Constructed));
    }

    #[tokio::test]
    async fn duplicate_process_is_rejected() {
        let global = GlobalManager::new();
        let _first = LocalManager::new("P1", &global).await.expect("process");
        assert!(LocalManager::new("P1", &global).await.is_err());
    }

    #[tokio::test]
    async fn clock_offset_shifts_reported_time() {
        let global = GlobalManager::new();
        let local = LocalManager::new("P1", &global).await.expect("process");
        let before = local.absolute_time_in_seconds();
        local.set_clock_offset(100.0);
        assert!(local.absolute_time_in_seconds() - before >= 99.0);
    }
}
