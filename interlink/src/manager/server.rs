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
use std::time::Instant;

use anyhow::{anyhow, bail};
use dashmap::DashMap;
use static_assertions::assert_impl_all;
use tracing::{error, info, instrument, warn};

use crate::command::{EventVoid, EventWrite};
use crate::common::{BrokerError, CONFIG};
use crate::component::{Component, ComponentState, ComponentStateChange};
use crate::interface::{
    CommandQueuing, InterfaceProvided, InterfaceProvidedDescription,
    InterfaceRequiredDescription, QueuingPolicy,
};
use crate::manager::function_set::ProcessFunctionSet;
use crate::manager::names::*;
use crate::manager::{
    bind_weak, bind_weak_nullary, forward_event, provided_interface, required_interface,
    returned, succeeded, write_event, ComponentDescription, ComponentStatusControl,
    ConnectionDescription, GlobalManager, InterfaceDescription, InterfaceEndpoint,
    LoadLibraryDescription, LocalManager, LogMessage, ProcessTimeDiff,
};

/// The single manager component server of a system, hosted by one process.
///
/// Its queued `InterfaceGCM` is the entry point for requests that concern
/// other processes, and publishes the topology events of the global
/// manager. For every client process it keeps a required interface
/// `InterfaceGCMRequiredFor<process>` bound to that process's `InterfaceLCM`.
pub struct ManagerComponentServer {
    component: Arc<Component>,
    global: Arc<GlobalManager>,
    host: Weak<LocalManager>,
    host_process: String,
    events: GcmEvents,
    processes: DashMap<String, Arc<ProcessFunctionSet>>,
}

struct GcmEvents {
    add_component: Arc<EventWrite<ComponentDescription>>,
    add_connection: Arc<EventWrite<ConnectionDescription>>,
    remove_connection: Arc<EventWrite<ConnectionDescription>>,
    change_state: Arc<EventWrite<ComponentStateChange>>,
    print_log: Arc<EventWrite<LogMessage>>,
    mcs_ready: Arc<EventVoid>,
}

impl Debug for ManagerComponentServer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut processes: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        processes.sort();
        f.debug_struct("ManagerComponentServer")
            .field("host", &self.host_process)
            .field("processes", &processes)
            .finish_non_exhaustive()
    }
}

impl ManagerComponentServer {
    /// Creates the server in `host`'s process and connects every process
    /// already registered with the global manager.
    #[instrument(skip(host), fields(host = host.process_name()))]
    pub async fn create(host: &Arc<LocalManager>) -> anyhow::Result<Arc<Self>> {
        let global = host.global().clone();
        if let Some(existing) = global.server() {
            bail!(BrokerError::DuplicateServer(existing.name().to_string()));
        }
        let component = Component::new(manager_component_server());
        let gcm = provided_interface(&component, INTERFACE_GCM, QueuingPolicy::CommandsShouldBeQueued)?;
        let events = GcmEvents {
            add_component: write_event(&gcm, ADD_COMPONENT)?,
            add_connection: write_event(&gcm, ADD_CONNECTION)?,
            remove_connection: write_event(&gcm, REMOVE_CONNECTION)?,
            change_state: write_event(&gcm, CHANGE_STATE)?,
            print_log: write_event(&gcm, PRINT_LOG)?,
            mcs_ready: gcm
                .add_event_void(MCS_READY)
                .ok_or_else(|| BrokerError::InterfaceCreation(MCS_READY.to_string()))?,
        };

        let server = Arc::new(Self {
            component: component.clone(),
            global: global.clone(),
            host: Arc::downgrade(host),
            host_process: host.process_name().to_string(),
            events,
            processes: DashMap::new(),
        });
        server.add_gcm_commands(&gcm);
        global.register_server(&server)?;
        if !host.add_manager_component(component.clone()).await {
            return Err(anyhow!("{} could not be registered", server.name()));
        }
        component.start().await;

        if let Err(error) = server.connect_processes() {
            error!(%error, "server could not reach every process, withdrawing it");
            server.withdraw(host).await;
            return Err(error);
        }
        server.events.mcs_ready.trigger(&()).await;
        info!("manager component server ready");
        Ok(server)
    }

    // Wires every registered process to the server and back.
    fn connect_processes(&self) -> anyhow::Result<()> {
        for process in self.global.names_of_processes() {
            self.add_new_client_process(&process)?;
            let client = self.global.local_manager(&process).and_then(|local| local.client());
            if let Some(client) = client {
                if !client.connect_to_server(self) {
                    bail!(BrokerError::ConnectionFailed(format!(
                        "{} could not reach {}",
                        client.name(),
                        self.name()
                    )));
                }
            }
        }
        Ok(())
    }

    // Undoes a partial `create`: clients, function sets, registration and component.
    async fn withdraw(self: &Arc<Self>, host: &LocalManager) {
        let processes: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        for process in processes {
            if let Some(client) = self.global.local_manager(&process).and_then(|local| local.client()) {
                client.disconnect_from_server();
            }
            self.disconnect_cleanup(&process).await;
        }
        self.global.unregister_server(self);
        host.remove_manager_component(self.name()).await;
    }

    fn add_gcm_commands(self: &Arc<Self>, gcm: &InterfaceProvided) {
        let queued = CommandQueuing::InterfacePolicy;
        gcm.add_command_write_return(COMPONENT_CREATE, queued, bind_weak(self, Self::gcm_create));
        gcm.add_command_write(COMPONENT_CONFIGURE, queued, bind_weak(self, Self::gcm_configure));
        gcm.add_command_write(COMPONENT_CONNECT, queued, bind_weak(self, Self::gcm_connect_legacy));
        gcm.add_command_write_return(COMPONENT_CONNECT_NEW, queued, bind_weak(self, Self::gcm_connect));
        gcm.add_command_write(
            COMPONENT_DISCONNECT,
            queued,
            bind_weak(self, Self::gcm_disconnect_legacy),
        );
        gcm.add_command_write_return(
            COMPONENT_DISCONNECT_NEW,
            queued,
            bind_weak(self, Self::gcm_disconnect),
        );
        gcm.add_command_write(COMPONENT_START, queued, bind_weak(self, Self::gcm_start));
        gcm.add_command_write(COMPONENT_STOP, queued, bind_weak(self, Self::gcm_stop));
        gcm.add_command_write(COMPONENT_RESUME, queued, bind_weak(self, Self::gcm_resume));
        gcm.add_command_qualified_read(COMPONENT_GET_STATE, bind_weak(self, Self::gcm_get_state));
        gcm.add_command_read(
            GET_NAMES_OF_PROCESSES,
            bind_weak_nullary(self, Self::gcm_names_of_processes),
        );
        gcm.add_command_qualified_read(
            GET_NAMES_OF_COMPONENTS,
            bind_weak(self, Self::gcm_names_of_components),
        );
        gcm.add_command_qualified_read(
            GET_NAMES_OF_INTERFACES,
            bind_weak(self, Self::gcm_names_of_interfaces),
        );
        gcm.add_command_read(
            GET_LIST_OF_CONNECTIONS,
            bind_weak_nullary(self, Self::gcm_list_of_connections),
        );
        gcm.add_command_qualified_read(
            GET_LIST_OF_COMPONENT_CLASSES,
            bind_weak(self, Self::gcm_list_of_component_classes),
        );
        gcm.add_command_qualified_read(
            GET_INTERFACE_PROVIDED_DESCRIPTION,
            bind_weak(self, Self::gcm_interface_provided_description),
        );
        gcm.add_command_qualified_read(
            GET_INTERFACE_REQUIRED_DESCRIPTION,
            bind_weak(self, Self::gcm_interface_required_description),
        );
        gcm.add_command_write_return(LOAD_LIBRARY, queued, bind_weak(self, Self::gcm_load_library));
        gcm.add_command_write(PRINT_LOG, queued, bind_weak(self, Self::gcm_print_log));
        gcm.add_command_write(
            ENABLE_LOG_FORWARDING,
            queued,
            bind_weak(self, Self::gcm_enable_log_forwarding),
        );
        gcm.add_command_write(
            DISABLE_LOG_FORWARDING,
            queued,
            bind_weak(self, Self::gcm_disable_log_forwarding),
        );
        gcm.add_command_qualified_read(
            GET_LOG_FORWARDING_STATES,
            bind_weak(self, Self::gcm_log_forwarding_states),
        );
        gcm.add_command_qualified_read(
            GET_ABSOLUTE_TIME_DIFFS,
            bind_weak(self, Self::gcm_absolute_time_diffs),
        );
    }

    pub fn name(&self) -> &str {
        self.component.name()
    }

    pub fn component(&self) -> &Arc<Component> {
        &self.component
    }

    /// Process hosting the server.
    pub fn host_process(&self) -> &str {
        &self.host_process
    }

    /// Binds a function set to the `InterfaceLCM` of `process`. Adding a
    /// process twice is a no-op.
    #[instrument(skip(self), fields(server = %self.name()))]
    pub fn add_new_client_process(&self, process: &str) -> Result<(), BrokerError> {
        if self.processes.contains_key(process) {
            return Ok(());
        }
        let client = self
            .global
            .local_manager(process)
            .and_then(|local| local.client())
            .ok_or_else(|| BrokerError::UnknownProcess(process.to_string()))?;
        let lcm = client
            .component()
            .interface_provided(INTERFACE_LCM)
            .ok_or_else(|| BrokerError::InterfaceCreation(format!("{}.{INTERFACE_LCM}", client.name())))?;

        let required_name = interface_gcm_required_for(process);
        let required = required_interface(&self.component, &required_name)?;
        let functions = ProcessFunctionSet::new();
        let wired = functions.register(&required)
            && forward_event(&required, CHANGE_STATE, self.events.change_state.clone());
        if !wired || !required.connect_to(&lcm) {
            self.component.remove_interface_required(&required_name);
            return Err(BrokerError::ConnectionFailed(format!(
                "{} could not reach {}",
                self.name(),
                client.name()
            )));
        }
        self.global
            .add_interface_required(&self.host_process, self.name(), &required_name);
        self.processes
            .insert(process.to_string(), Arc::new(functions));
        info!(process, "client process connected");
        Ok(())
    }

    /// Drops the function set of a departing process.
    pub async fn disconnect_cleanup(&self, process: &str) -> bool {
        if self.processes.remove(process).is_none() {
            return false;
        }
        let required_name = interface_gcm_required_for(process);
        self.component.remove_interface_required(&required_name);
        self.global
            .remove_interface_required(&self.host_process, self.name(), &required_name)
            .await;
        info!(process, "client process disconnected");
        true
    }

    pub(crate) async fn add_component_event(&self, description: &ComponentDescription) {
        self.events.add_component.trigger(description).await;
    }

    pub(crate) async fn add_connection_event(&self, connection: &ConnectionDescription) {
        self.events.add_connection.trigger(connection).await;
    }

    pub(crate) async fn remove_connection_event(&self, connection: &ConnectionDescription) {
        self.events.remove_connection.trigger(connection).await;
    }

    fn process(&self, process: &str) -> Option<Arc<ProcessFunctionSet>> {
        let functions = self.processes.get(process).map(|entry| entry.value().clone());
        if functions.is_none() {
            error!(process, "process is not connected to the server");
        }
        functions
    }

    fn is_self(&self, component: &str) -> bool {
        component == self.name()
    }

    // Commands of InterfaceGCM.

    async fn gcm_create(self: Arc<Self>, description: ComponentDescription) -> bool {
        if self
            .global
            .find_component(&description.process_name, &description.component_name)
        {
            error!(component = %description.component_name, "component already exists");
            return false;
        }
        let Some(process) = self.process(&description.process_name) else {
            return false;
        };
        returned(COMPONENT_CREATE, process.component_create.call(&description).await)
            .unwrap_or(false)
    }

    async fn gcm_configure(self: Arc<Self>, description: ComponentDescription) {
        if let Some(process) = self.process(&description.process_name) {
            succeeded(
                COMPONENT_CONFIGURE,
                process.component_configure.execute_blocking(&description).await,
            );
        }
    }

    async fn gcm_connect(self: Arc<Self>, connection: ConnectionDescription) -> bool {
        let Some(process) = self.process(&connection.client.process_name) else {
            return false;
        };
        returned(COMPONENT_CONNECT_NEW, process.component_connect.call(&connection).await)
            .unwrap_or(false)
    }

    async fn gcm_connect_legacy(self: Arc<Self>, connection: ConnectionDescription) {
        if !self.gcm_connect(connection).await {
            warn!("connection request failed");
        }
    }

    async fn gcm_disconnect(self: Arc<Self>, connection: ConnectionDescription) -> bool {
        let Some(process) = self.process(&connection.client.process_name) else {
            return false;
        };
        returned(
            COMPONENT_DISCONNECT_NEW,
            process.component_disconnect.call(&connection).await,
        )
        .unwrap_or(false)
    }

    async fn gcm_disconnect_legacy(self: Arc<Self>, connection: ConnectionDescription) {
        if !self.gcm_disconnect(connection).await {
            warn!("disconnection request failed");
        }
    }

    fn controllable(&self, control: &ComponentStatusControl, action: &str) -> bool {
        if self.is_self(&control.component_name) {
            warn!(action, "the server does not control itself");
            return false;
        }
        if !self
            .global
            .find_component(&control.process_name, &control.component_name)
        {
            error!(component = %control.component_name, action, "unknown component");
            return false;
        }
        true
    }

    async fn gcm_start(self: Arc<Self>, control: ComponentStatusControl) {
        if !self.controllable(&control, "start") {
            return;
        }
        if let Some(process) = self.process(&control.process_name) {
            succeeded(COMPONENT_START, process.component_start.execute_blocking(&control).await);
        }
    }

    async fn gcm_stop(self: Arc<Self>, control: ComponentStatusControl) {
        if !self.controllable(&control, "stop") {
            return;
        }
        if let Some(process) = self.process(&control.process_name) {
            succeeded(COMPONENT_STOP, process.component_stop.execute_blocking(&control).await);
        }
    }

    async fn gcm_resume(self: Arc<Self>, control: ComponentStatusControl) {
        if !self.controllable(&control, "resume") {
            return;
        }
        if let Some(process) = self.process(&control.process_name) {
            succeeded(COMPONENT_RESUME, process.component_resume.execute_blocking(&control).await);
        }
    }

    async fn gcm_get_state(self: Arc<Self>, description: ComponentDescription) -> ComponentState {
        if self.is_self(&description.component_name) {
            return ComponentState::Active;
        }
        if !self
            .global
            .find_component(&description.process_name, &description.component_name)
        {
            error!(component = %description.component_name, "unknown component");
            return ComponentState::Error;
        }
        let Some(process) = self.process(&description.process_name) else {
            return ComponentState::Error;
        };
        returned(COMPONENT_GET_STATE, process.component_get_state.call(&description).await)
            .unwrap_or(ComponentState::Error)
    }

    async fn gcm_names_of_processes(self: Arc<Self>) -> Vec<String> {
        self.global.names_of_processes()
    }

    async fn gcm_names_of_components(self: Arc<Self>, process: String) -> Vec<String> {
        self.global.names_of_components(&process)
    }

    async fn gcm_names_of_interfaces(
        self: Arc<Self>,
        description: ComponentDescription,
    ) -> InterfaceDescription {
        self.global
            .names_of_interfaces(&description.process_name, &description.component_name)
            .unwrap_or_default()
    }

    async fn gcm_list_of_connections(self: Arc<Self>) -> Vec<ConnectionDescription> {
        self.global.list_of_connections()
    }

    async fn gcm_list_of_component_classes(self: Arc<Self>, process: String) -> Vec<String> {
        let Some(functions) = self.process(&process) else {
            return Vec::new();
        };
        returned(
            GET_LIST_OF_COMPONENT_CLASSES,
            functions.get_list_of_component_classes.get().await,
        )
        .unwrap_or_default()
    }

    async fn gcm_interface_provided_description(
        self: Arc<Self>,
        endpoint: InterfaceEndpoint,
    ) -> InterfaceProvidedDescription {
        let Some(process) = self.process(&endpoint.process_name) else {
            return InterfaceProvidedDescription::default();
        };
        returned(
            GET_INTERFACE_PROVIDED_DESCRIPTION,
            process.get_interface_provided_description.call(&endpoint).await,
        )
        .unwrap_or_default()
    }

    async fn gcm_interface_required_description(
        self: Arc<Self>,
        endpoint: InterfaceEndpoint,
    ) -> InterfaceRequiredDescription {
        let Some(process) = self.process(&endpoint.process_name) else {
            return InterfaceRequiredDescription::default();
        };
        returned(
            GET_INTERFACE_REQUIRED_DESCRIPTION,
            process.get_interface_required_description.call(&endpoint).await,
        )
        .unwrap_or_default()
    }

    async fn gcm_load_library(self: Arc<Self>, description: LoadLibraryDescription) -> bool {
        let Some(process) = self.process(&description.process_name) else {
            return false;
        };
        returned(LOAD_LIBRARY, process.load_library.call(&description).await).unwrap_or(false)
    }

    async fn gcm_print_log(self: Arc<Self>, message: LogMessage) {
        info!(target: "interlink::forwarded", process = %message.process_name, "{}", message.text);
        self.events.print_log.trigger(&message).await;
    }

    async fn gcm_enable_log_forwarding(self: Arc<Self>, processes: Vec<String>) {
        self.set_log_forwarding(&processes, true).await;
    }

    async fn gcm_disable_log_forwarding(self: Arc<Self>, processes: Vec<String>) {
        self.set_log_forwarding(&processes, false).await;
    }

    async fn set_log_forwarding(&self, processes: &[String], enabled: bool) {
        for name in processes {
            if let Some(process) = self.process(name) {
                succeeded(
                    SET_LOG_FORWARDING,
                    process.set_log_forwarding.execute_blocking(&enabled).await,
                );
            }
        }
    }

    async fn gcm_log_forwarding_states(self: Arc<Self>, processes: Vec<String>) -> Vec<bool> {
        let mut states = Vec::with_capacity(processes.len());
        for name in &processes {
            let state = match self.process(name) {
                Some(process) => {
                    returned(GET_LOG_FORWARDING_STATE, process.get_log_forwarding_state.get().await)
                        .unwrap_or(false)
                }
                None => false,
            };
            states.push(state);
        }
        states
    }

    /// Estimates each process's clock offset from the host's clock.
    ///
    /// Every trial reads the host clock, asks the process for its clock and
    /// measures the round trip; the offset of a trial is
    /// `(host + round_trip / 2) - remote`. Offsets are averaged over the
    /// configured number of trials.
    async fn gcm_absolute_time_diffs(self: Arc<Self>, processes: Vec<String>) -> Vec<ProcessTimeDiff> {
        let Some(host) = self.host.upgrade() else {
            error!("host process is gone");
            return Vec::new();
        };
        let trials = CONFIG.broker.time_sync_trials.max(1);
        let mut diffs = Vec::with_capacity(processes.len());
        for name in processes {
            if name == self.host_process {
                diffs.push(ProcessTimeDiff::new(name, 0.0));
                continue;
            }
            let Some(process) = self.process(&name) else {
                continue;
            };
            let mut total = 0.0;
            let mut samples = 0u32;
            for _ in 0..trials {
                let tic = host.absolute_time_in_seconds();
                let started = Instant::now();
                let remote = process.get_absolute_time_in_seconds.get().await;
                let round_trip = started.elapsed().as_secs_f64();
                if let Some(remote) = returned(GET_ABSOLUTE_TIME_IN_SECONDS, remote) {
                    total += (tic + round_trip / 2.0) - remote;
                    samples += 1;
                }
            }
            if samples > 0 {
                diffs.push(ProcessTimeDiff::new(name, total / f64::from(samples)));
            }
        }
        diffs
    }
}

assert_impl_all!(ManagerComponentServer: Send, Sync);
