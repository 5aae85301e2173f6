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

//! Function bundles through which the manager components call each other.

use std::sync::Arc;

use crate::command::{
    FunctionQualifiedRead, FunctionRead, FunctionVoid, FunctionWrite, FunctionWriteReturn,
};
use crate::component::ComponentState;
use crate::interface::{
    InterfaceProvidedDescription, InterfaceRequired, InterfaceRequiredDescription, Requirement,
};
use crate::manager::names::*;
use crate::manager::{
    ComponentDescription, ComponentStatusControl, ConnectionDescription, InterfaceDescription,
    InterfaceEndpoint, LoadLibraryDescription, LogMessage, ProcessTimeDiff,
};

/// Server-side view of one client process, bound to its `InterfaceLCM`.
pub(crate) struct ProcessFunctionSet {
    pub component_create: Arc<FunctionWriteReturn<ComponentDescription, bool>>,
    pub component_configure: Arc<FunctionWrite<ComponentDescription>>,
    pub component_connect: Arc<FunctionWriteReturn<ConnectionDescription, bool>>,
    pub component_disconnect: Arc<FunctionWriteReturn<ConnectionDescription, bool>>,
    pub component_start: Arc<FunctionWrite<ComponentStatusControl>>,
    pub component_stop: Arc<FunctionWrite<ComponentStatusControl>>,
    pub component_resume: Arc<FunctionWrite<ComponentStatusControl>>,
    pub component_get_state: Arc<FunctionQualifiedRead<ComponentDescription, ComponentState>>,
    pub get_interface_provided_description:
        Arc<FunctionQualifiedRead<InterfaceEndpoint, InterfaceProvidedDescription>>,
    pub get_interface_required_description:
        Arc<FunctionQualifiedRead<InterfaceEndpoint, InterfaceRequiredDescription>>,
    pub load_library: Arc<FunctionWriteReturn<LoadLibraryDescription, bool>>,
    pub get_list_of_component_classes: Arc<FunctionRead<Vec<String>>>,
    pub set_log_forwarding: Arc<FunctionWrite<bool>>,
    pub get_log_forwarding_state: Arc<FunctionRead<bool>>,
    pub get_absolute_time_in_seconds: Arc<FunctionRead<f64>>,
}

impl ProcessFunctionSet {
    pub fn new() -> Self {
        Self {
            component_create: FunctionWriteReturn::write_return(),
            component_configure: FunctionWrite::write(),
            component_connect: FunctionWriteReturn::write_return(),
            component_disconnect: FunctionWriteReturn::write_return(),
            component_start: FunctionWrite::write(),
            component_stop: FunctionWrite::write(),
            component_resume: FunctionWrite::write(),
            component_get_state: FunctionQualifiedRead::qualified_read(),
            get_interface_provided_description: FunctionQualifiedRead::qualified_read(),
            get_interface_required_description: FunctionQualifiedRead::qualified_read(),
            load_library: FunctionWriteReturn::write_return(),
            get_list_of_component_classes: FunctionRead::read(),
            set_log_forwarding: FunctionWrite::write(),
            get_log_forwarding_state: FunctionRead::read(),
            get_absolute_time_in_seconds: FunctionRead::read(),
        }
    }

    /// Declares every function on `required`; `false` if any name clashes.
    pub fn register(&self, required: &InterfaceRequired) -> bool {
        let r = Requirement::Required;
        [
            required.add_function(COMPONENT_CREATE, &self.component_create, r),
            required.add_function(COMPONENT_CONFIGURE, &self.component_configure, r),
            required.add_function(COMPONENT_CONNECT_NEW, &self.component_connect, r),
            required.add_function(COMPONENT_DISCONNECT_NEW, &self.component_disconnect, r),
            required.add_function(COMPONENT_START, &self.component_start, r),
            required.add_function(COMPONENT_STOP, &self.component_stop, r),
            required.add_function(COMPONENT_RESUME, &self.component_resume, r),
            required.add_function(COMPONENT_GET_STATE, &self.component_get_state, r),
            required.add_function(
                GET_INTERFACE_PROVIDED_DESCRIPTION,
                &self.get_interface_provided_description,
                r,
            ),
            required.add_function(
                GET_INTERFACE_REQUIRED_DESCRIPTION,
                &self.get_interface_required_description,
                r,
            ),
            required.add_function(LOAD_LIBRARY, &self.load_library, r),
            required.add_function(
                GET_LIST_OF_COMPONENT_CLASSES,
                &self.get_list_of_component_classes,
                r,
            ),
            required.add_function(SET_LOG_FORWARDING, &self.set_log_forwarding, r),
            required.add_function(GET_LOG_FORWARDING_STATE, &self.get_log_forwarding_state, r),
            required.add_function(
                GET_ABSOLUTE_TIME_IN_SECONDS,
                &self.get_absolute_time_in_seconds,
                r,
            ),
        ]
        .into_iter()
        .all(|added| added)
    }
}

/// Client-side view of the server, bound to its `InterfaceGCM`.
pub(crate) struct ServerFunctionSet {
    pub component_create: Arc<FunctionWriteReturn<ComponentDescription, bool>>,
    pub component_configure: Arc<FunctionWrite<ComponentDescription>>,
    pub component_connect: Arc<FunctionWriteReturn<ConnectionDescription, bool>>,
    pub component_disconnect: Arc<FunctionWriteReturn<ConnectionDescription, bool>>,
    pub component_start: Arc<FunctionWrite<ComponentStatusControl>>,
    pub component_stop: Arc<FunctionWrite<ComponentStatusControl>>,
    pub component_resume: Arc<FunctionWrite<ComponentStatusControl>>,
    pub component_get_state: Arc<FunctionQualifiedRead<ComponentDescription, ComponentState>>,
    pub load_library: Arc<FunctionWriteReturn<LoadLibraryDescription, bool>>,
    pub get_names_of_processes: Arc<FunctionRead<Vec<String>>>,
    pub get_names_of_components: Arc<FunctionQualifiedRead<String, Vec<String>>>,
    pub get_names_of_interfaces:
        Arc<FunctionQualifiedRead<ComponentDescription, InterfaceDescription>>,
    pub get_list_of_connections: Arc<FunctionRead<Vec<ConnectionDescription>>>,
    pub get_list_of_component_classes: Arc<FunctionQualifiedRead<String, Vec<String>>>,
    pub get_interface_provided_description:
        Arc<FunctionQualifiedRead<InterfaceEndpoint, InterfaceProvidedDescription>>,
    pub get_interface_required_description:
        Arc<FunctionQualifiedRead<InterfaceEndpoint, InterfaceRequiredDescription>>,
    pub print_log: Arc<FunctionWrite<LogMessage>>,
    pub enable_log_forwarding: Arc<FunctionWrite<Vec<String>>>,
    pub disable_log_forwarding: Arc<FunctionWrite<Vec<String>>>,
    pub get_log_forwarding_states: Arc<FunctionQualifiedRead<Vec<String>, Vec<bool>>>,
    pub get_absolute_time_diffs: Arc<FunctionQualifiedRead<Vec<String>, Vec<ProcessTimeDiff>>>,
}

impl ServerFunctionSet {
    pub fn new() -> Self {
        Self {
            component_create: FunctionWriteReturn::write_return(),
            component_configure: FunctionWrite::write(),
            component_connect: FunctionWriteReturn::write_return(),
            component_disconnect: FunctionWriteReturn::write_return(),
            component_start: FunctionWrite::write(),
            component_stop: FunctionWrite::write(),
            component_resume: FunctionWrite::write(),
            component_get_state: FunctionQualifiedRead::qualified_read(),
            load_library: FunctionWriteReturn::write_return(),
            get_names_of_processes: FunctionRead::read(),
            get_names_of_components: FunctionQualifiedRead::qualified_read(),
            get_names_of_interfaces: FunctionQualifiedRead::qualified_read(),
            get_list_of_connections: FunctionRead::read(),
            get_list_of_component_classes: FunctionQualifiedRead::qualified_read(),
            get_interface_provided_description: FunctionQualifiedRead::qualified_read(),
            get_interface_required_description: FunctionQualifiedRead::qualified_read(),
            print_log: FunctionWrite::write(),
            enable_log_forwarding: FunctionWrite::write(),
            disable_log_forwarding: FunctionWrite::write(),
            get_log_forwarding_states: FunctionQualifiedRead::qualified_read(),
            get_absolute_time_diffs: FunctionQualifiedRead::qualified_read(),
        }
    }

    pub fn register(&self, required: &InterfaceRequired) -> bool {
        let r = Requirement::Required;
        [
            required.add_function(COMPONENT_CREATE, &self.component_create, r),
            required.add_function(COMPONENT_CONFIGURE, &self.component_configure, r),
            required.add_function(COMPONENT_CONNECT_NEW, &self.component_connect, r),
            required.add_function(COMPONENT_DISCONNECT_NEW, &self.component_disconnect, r),
            required.add_function(COMPONENT_START, &self.component_start, r),
            required.add_function(COMPONENT_STOP, &self.component_stop, r),
            required.add_function(COMPONENT_RESUME, &self.component_resume, r),
            required.add_function(COMPONENT_GET_STATE, &self.component_get_state, r),
            required.add_function(LOAD_LIBRARY, &self.load_library, r),
            required.add_function(GET_NAMES_OF_PROCESSES, &self.get_names_of_processes, r),
            required.add_function(GET_NAMES_OF_COMPONENTS, &self.get_names_of_components, r),
            required.add_function(GET_NAMES_OF_INTERFACES, &self.get_names_of_interfaces, r),
            required.add_function(GET_LIST_OF_CONNECTIONS, &self.get_list_of_connections, r),
            required.add_function(
                GET_LIST_OF_COMPONENT_CLASSES,
                &self.get_list_of_component_classes,
                r,
            ),
            required.add_function(
                GET_INTERFACE_PROVIDED_DESCRIPTION,
                &self.get_interface_provided_description,
                r,
            ),
            required.add_function(
                GET_INTERFACE_REQUIRED_DESCRIPTION,
                &self.get_interface_required_description,
                r,
            ),
            required.add_function(PRINT_LOG, &self.print_log, r),
            required.add_function(ENABLE_LOG_FORWARDING, &self.enable_log_forwarding, r),
            required.add_function(DISABLE_LOG_FORWARDING, &self.disable_log_forwarding, r),
            required.add_function(GET_LOG_FORWARDING_STATES, &self.get_log_forwarding_states, r),
            required.add_function(GET_ABSOLUTE_TIME_DIFFS, &self.get_absolute_time_diffs, r),
        ]
        .into_iter()
        .all(|added| added)
    }
}

/// Client-side control of one user component, bound to its `InterfaceInternal`.
pub(crate) struct ComponentFunctionSet {
    pub stop: Arc<FunctionVoid>,
    pub resume: Arc<FunctionVoid>,
    pub get_state: Arc<FunctionRead<ComponentState>>,
}

impl ComponentFunctionSet {
    pub fn new() -> Self {
        Self {
            stop: FunctionVoid::void(),
            resume: FunctionVoid::void(),
            get_state: FunctionRead::read(),
        }
    }

    pub fn register(&self, required: &InterfaceRequired) -> bool {
        let r = Requirement::Required;
        required.add_function(COMPONENT_STOP, &self.stop, r)
            && required.add_function(COMPONENT_RESUME, &self.resume, r)
            && required.add_function(COMPONENT_GET_STATE, &self.get_state, r)
    }
}
