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

use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::anyhow;
use dashmap::DashMap;
use static_assertions::assert_impl_all;
use tracing::{debug, error, info, instrument, warn};

use crate::command::EventWrite;
use crate::component::{Component, ComponentState, ComponentStateChange};
use crate::interface::{
    CommandQueuing, InterfaceProvided, InterfaceProvidedDescription, InterfaceRequired,
    InterfaceRequiredDescription, QueuingPolicy,
};
use crate::manager::function_set::{ComponentFunctionSet, ServerFunctionSet};
use crate::manager::names::*;
use crate::manager::{
    bind_weak, bind_weak_nullary, forward_event, provided_interface, required_interface,
    returned, succeeded, write_event, ComponentDescription, ComponentStatusControl,
    ConnectionDescription, InterfaceDescription, InterfaceEndpoint, LoadLibraryDescription,
    LocalManager, LogMessage, ManagerComponentServer, ProcessTimeDiff,
};

/// The manager component of one process, named `<process>_MCC`.
///
/// It serves the server's requests for its process through the queued
/// `InterfaceLCM`, controls the process's user components through their
/// `InterfaceInternal`, and re-publishes the server's topology events on the
/// non-queued `InterfaceComponent` for user components to observe.
///
/// Its service methods run locally when the target is this process, and go
/// through the server otherwise.
pub struct ManagerComponentClient {
    component: Arc<Component>,
    local: Weak<LocalManager>,
    process_name: String,
    server: ServerFunctionSet,
    lcm_change_state: Arc<EventWrite<ComponentStateChange>>,
    components: DashMap<String, Arc<ComponentFunctionSet>>,
}

impl Debug for ManagerComponentClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerComponentClient")
            .field("name", &self.component.name())
            .field("connected", &self.is_connected_to_server())
            .finish_non_exhaustive()
    }
}

impl ManagerComponentClient {
    /// Builds and starts the client of `local`'s process.
    pub(crate) async fn create(local: &Arc<LocalManager>) -> anyhow::Result<Arc<Self>> {
        let process_name = local.process_name().to_string();
        let component = Component::new(manager_component_client(&process_name));

        let lcm = provided_interface(&component, INTERFACE_LCM, QueuingPolicy::CommandsShouldBeQueued)?;
        let lcm_change_state = write_event::<ComponentStateChange>(&lcm, CHANGE_STATE)?;

        let published = provided_interface(
            &component,
            INTERFACE_COMPONENT,
            QueuingPolicy::CommandsShouldNotBeQueued,
        )?;
        let required = required_interface(&component, INTERFACE_LCM_REQUIRED)?;
        let server = ServerFunctionSet::new();
        let wired = server.register(&required)
            && forward_event(
                &required,
                ADD_COMPONENT,
                write_event::<ComponentDescription>(&published, ADD_COMPONENT)?,
            )
            && forward_event(
                &required,
                ADD_CONNECTION,
                write_event::<ConnectionDescription>(&published, ADD_CONNECTION)?,
            )
            && forward_event(
                &required,
                REMOVE_CONNECTION,
                write_event::<ConnectionDescription>(&published, REMOVE_CONNECTION)?,
            )
            && forward_event(
                &required,
                CHANGE_STATE,
                write_event::<ComponentStateChange>(&published, CHANGE_STATE)?,
            );
        if !wired {
            return Err(anyhow!("{} could not declare its server functions", component.name()));
        }

        let client = Arc::new(Self {
            component: component.clone(),
            local: Arc::downgrade(local),
            process_name,
            server,
            lcm_change_state,
            components: DashMap::new(),
        });
        client.add_lcm_commands(&lcm);

        if !local.add_manager_component(component.clone()).await {
            return Err(anyhow!("{} could not be registered", component.name()));
        }
        component.start().await;
        info!(client = component.name(), "manager component client started");
        Ok(client)
    }

    fn add_lcm_commands(self: &Arc<Self>, lcm: &InterfaceProvided) {
        let queued = CommandQueuing::InterfacePolicy;
        lcm.add_command_write_return(COMPONENT_CREATE, queued, bind_weak(self, Self::lcm_create));
        lcm.add_command_write(COMPONENT_CONFIGURE, queued, bind_weak(self, Self::lcm_configure));
        lcm.add_command_write_return(COMPONENT_CONNECT_NEW, queued, bind_weak(self, Self::lcm_connect));
        lcm.add_command_write_return(
            COMPONENT_DISCONNECT_NEW,
            queued,
            bind_weak(self, Self::lcm_disconnect),
        );
        lcm.add_command_write(COMPONENT_START, queued, bind_weak(self, Self::lcm_start));
        lcm.add_command_write(COMPONENT_STOP, queued, bind_weak(self, Self::lcm_stop));
        lcm.add_command_write(COMPONENT_RESUME, queued, bind_weak(self, Self::lcm_resume));
        lcm.add_command_qualified_read(COMPONENT_GET_STATE, bind_weak(self, Self::lcm_get_state));
        lcm.add_command_qualified_read(
            GET_INTERFACE_PROVIDED_DESCRIPTION,
            bind_weak(self, Self::lcm_interface_provided_description),
        );
        lcm.add_command_qualified_read(
            GET_INTERFACE_REQUIRED_DESCRIPTION,
            bind_weak(self, Self::lcm_interface_required_description),
        );
        lcm.add_command_write_return(LOAD_LIBRARY, queued, bind_weak(self, Self::lcm_load_library));
        lcm.add_command_read(
            GET_LIST_OF_COMPONENT_CLASSES,
            bind_weak_nullary(self, Self::lcm_component_classes),
        );
        lcm.add_command_write(SET_LOG_FORWARDING, queued, bind_weak(self, Self::lcm_set_log_forwarding));
        lcm.add_command_read(
            GET_LOG_FORWARDING_STATE,
            bind_weak_nullary(self, Self::lcm_log_forwarding_state),
        );
        lcm.add_command_read(
            GET_ABSOLUTE_TIME_IN_SECONDS,
            bind_weak_nullary(self, Self::lcm_absolute_time),
        );
    }

    pub fn name(&self) -> &str {
        self.component.name()
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    /// The manager component itself, e.g. to connect to its `InterfaceComponent`.
    pub fn component(&self) -> &Arc<Component> {
        &self.component
    }

    fn local(&self) -> Option<Arc<LocalManager>> {
        let local = self.local.upgrade();
        if local.is_none() {
            error!(client = self.name(), "local manager is gone");
        }
        local
    }

    fn server_interface(&self) -> Option<Arc<InterfaceRequired>> {
        self.component.interface_required(INTERFACE_LCM_REQUIRED)
    }

    pub fn is_connected_to_server(&self) -> bool {
        self.server_interface()
            .is_some_and(|interface| interface.is_connected())
    }

    /// Binds the server functions to the server's `InterfaceGCM`.
    pub(crate) fn connect_to_server(&self, server: &ManagerComponentServer) -> bool {
        if self.is_connected_to_server() {
            return true;
        }
        let (Some(required), Some(gcm)) = (
            self.server_interface(),
            server.component().interface_provided(INTERFACE_GCM),
        ) else {
            error!(client = self.name(), "server interfaces are missing");
            return false;
        };
        let connected = required.connect_to(&gcm);
        if connected {
            info!(client = self.name(), server = server.name(), "connected to server");
        }
        connected
    }

    pub(crate) fn disconnect_from_server(&self) {
        if let Some(required) = self.server_interface() {
            required.detach_commands();
        }
    }

    /// Connects a required interface of the client to the component's
    /// `InterfaceInternal`, through which the client stops and resumes it.
    pub(crate) fn add_new_client_component(&self, component: &Arc<Component>) -> bool {
        let name = component.name();
        if self.components.contains_key(name) {
            return true;
        }
        let Some(internal) = component.interface_provided(INTERFACE_INTERNAL) else {
            error!(component = name, "component has no internal interface");
            return false;
        };
        let required_name = interface_component_required_for(name);
        let Ok(required) = required_interface(&self.component, &required_name) else {
            return false;
        };
        let functions = ComponentFunctionSet::new();
        let wired = functions.register(&required)
            && forward_event(&required, CHANGE_STATE, self.lcm_change_state.clone());
        if !wired || !required.connect_to(&internal) {
            self.component.remove_interface_required(&required_name);
            return false;
        }
        if let Some(local) = self.local() {
            local
                .global()
                .add_interface_required(&self.process_name, self.name(), &required_name);
        }
        self.components.insert(name.to_string(), Arc::new(functions));
        debug!(component = name, "component attached to its manager");
        true
    }

    pub(crate) async fn remove_client_component(&self, name: &str) {
        if self.components.remove(name).is_none() {
            return;
        }
        let required_name = interface_component_required_for(name);
        self.component.remove_interface_required(&required_name);
        if let Some(local) = self.local() {
            local
                .global()
                .remove_interface_required(&self.process_name, self.name(), &required_name)
                .await;
        }
    }

    fn is_local(&self, process_name: &str) -> bool {
        process_name == self.process_name
    }

    fn refuses(&self, control: &ComponentStatusControl, action: &str) -> bool {
        if is_manager_component(&control.component_name) {
            warn!(component = %control.component_name, action, "manager components cannot be controlled");
            return true;
        }
        false
    }

    async fn component_state_of(&self, name: &str) -> ComponentState {
        if is_manager_component(name) {
            return ComponentState::Active;
        }
        let functions = self.components.get(name).map(|entry| entry.value().clone());
        match functions {
            Some(functions) => returned(COMPONENT_GET_STATE, functions.get_state.get().await)
                .unwrap_or(ComponentState::Error),
            None => {
                error!(component = name, "unknown component");
                ComponentState::Error
            }
        }
    }

    async fn start_here(&self, control: &ComponentStatusControl) -> bool {
        if self.refuses(control, "start") {
            return false;
        }
        if !apply_delay(control).await {
            return false;
        }
        match self.local() {
            Some(local) => local.start_component(&control.component_name).await,
            None => false,
        }
    }

    async fn stop_here(&self, control: &ComponentStatusControl) -> bool {
        if self.refuses(control, "stop") {
            return false;
        }
        if !apply_delay(control).await {
            return false;
        }
        let functions = self
            .components
            .get(&control.component_name)
            .map(|entry| entry.value().clone());
        match functions {
            Some(functions) => succeeded(COMPONENT_STOP, functions.stop.trigger().await),
            None => {
                error!(component = %control.component_name, "cannot stop unknown component");
                false
            }
        }
    }

    async fn resume_here(&self, control: &ComponentStatusControl) -> bool {
        if self.refuses(control, "resume") {
            return false;
        }
        if !apply_delay(control).await {
            return false;
        }
        let functions = self
            .components
            .get(&control.component_name)
            .map(|entry| entry.value().clone());
        match functions {
            Some(functions) => succeeded(COMPONENT_RESUME, functions.resume.trigger().await),
            None => {
                error!(component = %control.component_name, "cannot resume unknown component");
                false
            }
        }
    }

    // Commands of InterfaceLCM, run on behalf of the server.

    async fn lcm_create(self: Arc<Self>, description: ComponentDescription) -> bool {
        match self.local() {
            Some(local) => local.create_component(&description).await,
            None => false,
        }
    }

    async fn lcm_configure(self: Arc<Self>, description: ComponentDescription) {
        if let Some(local) = self.local() {
            if !local
                .configure_component(&description.component_name, &description.argument)
                .await
            {
                warn!(component = %description.component_name, "configuration rejected");
            }
        }
    }

    async fn lcm_connect(self: Arc<Self>, connection: ConnectionDescription) -> bool {
        match self.local() {
            Some(local) => local.connect_description(&connection).await,
            None => false,
        }
    }

    async fn lcm_disconnect(self: Arc<Self>, connection: ConnectionDescription) -> bool {
        match self.local() {
            Some(local) => local.disconnect_description(&connection).await,
            None => false,
        }
    }

    async fn lcm_start(self: Arc<Self>, control: ComponentStatusControl) {
        self.start_here(&control).await;
    }

    async fn lcm_stop(self: Arc<Self>, control: ComponentStatusControl) {
        self.stop_here(&control).await;
    }

    async fn lcm_resume(self: Arc<Self>, control: ComponentStatusControl) {
        self.resume_here(&control).await;
    }

    async fn lcm_get_state(self: Arc<Self>, description: ComponentDescription) -> ComponentState {
        self.component_state_of(&description.component_name).await
    }

    async fn lcm_interface_provided_description(
        self: Arc<Self>,
        endpoint: InterfaceEndpoint,
    ) -> InterfaceProvidedDescription {
        self.local()
            .and_then(|local| {
                local.interface_provided_description(&endpoint.component_name, &endpoint.interface_name)
            })
            .unwrap_or_default()
    }

    async fn lcm_interface_required_description(
        self: Arc<Self>,
        endpoint: InterfaceEndpoint,
    ) -> InterfaceRequiredDescription {
        self.local()
            .and_then(|local| {
                local.interface_required_description(&endpoint.component_name, &endpoint.interface_name)
            })
            .unwrap_or_default()
    }

    async fn lcm_load_library(self: Arc<Self>, description: LoadLibraryDescription) -> bool {
        self.local()
            .is_some_and(|local| local.load_library(&description.library_name))
    }

    async fn lcm_component_classes(self: Arc<Self>) -> Vec<String> {
        self.local()
            .map(|local| local.names_of_component_classes())
            .unwrap_or_default()
    }

    async fn lcm_set_log_forwarding(self: Arc<Self>, enabled: bool) {
        if let Some(local) = self.local() {
            local.set_log_forwarding(enabled);
        }
    }

    async fn lcm_log_forwarding_state(self: Arc<Self>) -> bool {
        self.local().is_some_and(|local| local.log_forwarding())
    }

    async fn lcm_absolute_time(self: Arc<Self>) -> f64 {
        self.local()
            .map(|local| local.absolute_time_in_seconds())
            .unwrap_or_default()
    }

    // Services for user code.

    #[instrument(skip(self), fields(client = %self.process_name))]
    pub async fn component_create(&self, description: &ComponentDescription) -> bool {
        if self.is_local(&description.process_name) {
            return match self.local() {
                Some(local) => local.create_component(description).await,
                None => false,
            };
        }
        returned(COMPONENT_CREATE, self.server.component_create.call(description).await)
            .unwrap_or(false)
    }

    pub async fn component_configure(&self, description: &ComponentDescription) -> bool {
        if self.is_local(&description.process_name) {
            return match self.local() {
                Some(local) => {
                    local
                        .configure_component(&description.component_name, &description.argument)
                        .await
                }
                None => false,
            };
        }
        succeeded(
            COMPONENT_CONFIGURE,
            self.server.component_configure.execute_blocking(description).await,
        )
    }

    /// Connects two interfaces; the request is handled by the process of
    /// the required interface.
    #[instrument(skip(self), fields(client = %self.process_name))]
    pub async fn component_connect(&self, connection: &ConnectionDescription) -> bool {
        if self.is_local(&connection.client.process_name) {
            return match self.local() {
                Some(local) => local.connect_description(connection).await,
                None => false,
            };
        }
        returned(COMPONENT_CONNECT_NEW, self.server.component_connect.call(connection).await)
            .unwrap_or(false)
    }

    pub async fn component_disconnect(&self, connection: &ConnectionDescription) -> bool {
        if self.is_local(&connection.client.process_name) {
            return match self.local() {
                Some(local) => local.disconnect_description(connection).await,
                None => false,
            };
        }
        returned(
            COMPONENT_DISCONNECT_NEW,
            self.server.component_disconnect.call(connection).await,
        )
        .unwrap_or(false)
    }

    pub async fn component_start(&self, control: &ComponentStatusControl) -> bool {
        if self.is_local(&control.process_name) {
            return self.start_here(control).await;
        }
        succeeded(COMPONENT_START, self.server.component_start.execute_blocking(control).await)
    }

    pub async fn component_stop(&self, control: &ComponentStatusControl) -> bool {
        if self.is_local(&control.process_name) {
            return self.stop_here(control).await;
        }
        succeeded(COMPONENT_STOP, self.server.component_stop.execute_blocking(control).await)
    }

    pub async fn component_resume(&self, control: &ComponentStatusControl) -> bool {
        if self.is_local(&control.process_name) {
            return self.resume_here(control).await;
        }
        succeeded(COMPONENT_RESUME, self.server.component_resume.execute_blocking(control).await)
    }

    /// State of a component anywhere in the system; [`ComponentState::Error`]
    /// when it cannot be determined.
    pub async fn component_get_state(&self, description: &ComponentDescription) -> ComponentState {
        if self.is_local(&description.process_name) {
            return self.component_state_of(&description.component_name).await;
        }
        returned(COMPONENT_GET_STATE, self.server.component_get_state.call(description).await)
            .unwrap_or(ComponentState::Error)
    }

    pub async fn names_of_processes(&self) -> Vec<String> {
        if !self.is_connected_to_server() {
            return self
                .local()
                .map(|local| local.global().names_of_processes())
                .unwrap_or_default();
        }
        returned(GET_NAMES_OF_PROCESSES, self.server.get_names_of_processes.get().await)
            .unwrap_or_default()
    }

    pub async fn names_of_components(&self, process_name: &str) -> Vec<String> {
        if !self.is_connected_to_server() {
            return self
                .local()
                .map(|local| local.global().names_of_components(process_name))
                .unwrap_or_default();
        }
        let process_name = process_name.to_string();
        returned(
            GET_NAMES_OF_COMPONENTS,
            self.server.get_names_of_components.call(&process_name).await,
        )
        .unwrap_or_default()
    }

    pub async fn names_of_interfaces(
        &self,
        description: &ComponentDescription,
    ) -> Option<InterfaceDescription> {
        if !self.is_connected_to_server() {
            return self.local().and_then(|local| {
                local
                    .global()
                    .names_of_interfaces(&description.process_name, &description.component_name)
            });
        }
        returned(
            GET_NAMES_OF_INTERFACES,
            self.server.get_names_of_interfaces.call(description).await,
        )
        .filter(|interfaces| !interfaces.component_name.is_empty())
    }

    pub async fn list_of_connections(&self) -> Vec<ConnectionDescription> {
        if !self.is_connected_to_server() {
            return self
                .local()
                .map(|local| local.global().list_of_connections())
                .unwrap_or_default();
        }
        returned(GET_LIST_OF_CONNECTIONS, self.server.get_list_of_connections.get().await)
            .unwrap_or_default()
    }

    pub async fn list_of_component_classes(&self, process_name: &str) -> Vec<String> {
        if self.is_local(process_name) {
            return self
                .local()
                .map(|local| local.names_of_component_classes())
                .unwrap_or_default();
        }
        let process_name = process_name.to_string();
        returned(
            GET_LIST_OF_COMPONENT_CLASSES,
            self.server.get_list_of_component_classes.call(&process_name).await,
        )
        .unwrap_or_default()
    }

    pub async fn interface_provided_description(
        &self,
        endpoint: &InterfaceEndpoint,
    ) -> Option<InterfaceProvidedDescription> {
        if self.is_local(&endpoint.process_name) {
            return self.local().and_then(|local| {
                local.interface_provided_description(&endpoint.component_name, &endpoint.interface_name)
            });
        }
        returned(
            GET_INTERFACE_PROVIDED_DESCRIPTION,
            self.server.get_interface_provided_description.call(endpoint).await,
        )
        .filter(|description| !description.interface_name.is_empty())
    }

    pub async fn interface_required_description(
        &self,
        endpoint: &InterfaceEndpoint,
    ) -> Option<InterfaceRequiredDescription> {
        if self.is_local(&endpoint.process_name) {
            return self.local().and_then(|local| {
                local.interface_required_description(&endpoint.component_name, &endpoint.interface_name)
            });
        }
        returned(
            GET_INTERFACE_REQUIRED_DESCRIPTION,
            self.server.get_interface_required_description.call(endpoint).await,
        )
        .filter(|description| !description.interface_name.is_empty())
    }

    pub async fn load_library(&self, description: &LoadLibraryDescription) -> bool {
        if self.is_local(&description.process_name) {
            return self
                .local()
                .is_some_and(|local| local.load_library(&description.library_name));
        }
        returned(LOAD_LIBRARY, self.server.load_library.call(description).await).unwrap_or(false)
    }

    /// Hands a log line to the server, which re-publishes it as `PrintLog`.
    pub async fn print_log(&self, text: &str) -> bool {
        if !self.is_connected_to_server() {
            warn!(client = self.name(), "no server to forward the log line to");
            return false;
        }
        let message = LogMessage::new(self.process_name.clone(), text.to_string());
        succeeded(PRINT_LOG, self.server.print_log.execute(&message).await)
    }

    pub async fn enable_log_forwarding(&self, processes: &[String]) -> bool {
        self.set_log_forwarding(processes, true).await
    }

    pub async fn disable_log_forwarding(&self, processes: &[String]) -> bool {
        self.set_log_forwarding(processes, false).await
    }

    async fn set_log_forwarding(&self, processes: &[String], enabled: bool) -> bool {
        if !self.is_connected_to_server() {
            if processes.iter().any(|process| self.is_local(process)) {
                if let Some(local) = self.local() {
                    local.set_log_forwarding(enabled);
                }
            }
            return processes.iter().all(|process| self.is_local(process));
        }
        let processes = processes.to_vec();
        let (command, function) = if enabled {
            (ENABLE_LOG_FORWARDING, &self.server.enable_log_forwarding)
        } else {
            (DISABLE_LOG_FORWARDING, &self.server.disable_log_forwarding)
        };
        succeeded(command, function.execute_blocking(&processes).await)
    }

    pub async fn log_forwarding_states(&self, processes: &[String]) -> Vec<bool> {
        if !self.is_connected_to_server() {
            let enabled = self.local().is_some_and(|local| local.log_forwarding());
            return processes
                .iter()
                .map(|process| self.is_local(process) && enabled)
                .collect();
        }
        let processes = processes.to_vec();
        returned(
            GET_LOG_FORWARDING_STATES,
            self.server.get_log_forwarding_states.call(&processes).await,
        )
        .unwrap_or_default()
    }

    /// Clock offsets of `processes` relative to the server's process.
    pub async fn absolute_time_diffs(&self, processes: &[String]) -> Vec<ProcessTimeDiff> {
        if !self.is_connected_to_server() {
            error!(client = self.name(), "time differences need a server");
            return Vec::new();
        }
        let processes = processes.to_vec();
        returned(
            GET_ABSOLUTE_TIME_DIFFS,
            self.server.get_absolute_time_diffs.call(&processes).await,
        )
        .unwrap_or_default()
    }
}

// Waits out the requested delay; `false` when it is not a valid duration.
async fn apply_delay(control: &ComponentStatusControl) -> bool {
    if control.delay <= 0.0 {
        return true;
    }
    match Duration::try_from_secs_f64(control.delay) {
        Ok(delay) => {
            tokio::time::sleep(delay).await;
            true
        }
        Err(error) => {
            error!(component = %control.component_name, delay = control.delay, %error, "invalid control delay");
            false
        }
    }
}

assert_impl_all!(ManagerComponentClient: Send, Sync);
