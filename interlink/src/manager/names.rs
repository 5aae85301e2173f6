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

//! Well-known interface, command and event names of the manager components.

use crate::common::CONFIG;

// Interfaces
pub const INTERFACE_GCM: &str = "InterfaceGCM";
pub const INTERFACE_LCM: &str = "InterfaceLCM";
pub const INTERFACE_LCM_REQUIRED: &str = "InterfaceLCMRequired";
pub const INTERFACE_COMPONENT: &str = "InterfaceComponent";
pub const INTERFACE_INTERNAL: &str = "InterfaceInternal";

// Lifecycle and topology commands
pub const COMPONENT_CREATE: &str = "ComponentCreate";
pub const COMPONENT_CONFIGURE: &str = "ComponentConfigure";
pub const COMPONENT_CONNECT: &str = "ComponentConnect";
pub const COMPONENT_CONNECT_NEW: &str = "ComponentConnectNew";
pub const COMPONENT_DISCONNECT: &str = "ComponentDisconnect";
pub const COMPONENT_DISCONNECT_NEW: &str = "ComponentDisconnectNew";
pub const COMPONENT_START: &str = "ComponentStart";
pub const COMPONENT_STOP: &str = "ComponentStop";
pub const COMPONENT_RESUME: &str = "ComponentResume";
pub const COMPONENT_GET_STATE: &str = "ComponentGetState";
pub const LOAD_LIBRARY: &str = "LoadLibrary";

// Queries
pub const GET_NAMES_OF_PROCESSES: &str = "GetNamesOfProcesses";
pub const GET_NAMES_OF_COMPONENTS: &str = "GetNamesOfComponents";
pub const GET_NAMES_OF_INTERFACES: &str = "GetNamesOfInterfaces";
pub const GET_LIST_OF_CONNECTIONS: &str = "GetListOfConnections";
pub const GET_LIST_OF_COMPONENT_CLASSES: &str = "GetListOfComponentClasses";
pub const GET_INTERFACE_PROVIDED_DESCRIPTION: &str = "GetInterfaceProvidedDescription";
pub const GET_INTERFACE_REQUIRED_DESCRIPTION: &str = "GetInterfaceRequiredDescription";

// Logging and time
pub const PRINT_LOG: &str = "PrintLog";
pub const ENABLE_LOG_FORWARDING: &str = "EnableLogForwarding";
pub const DISABLE_LOG_FORWARDING: &str = "DisableLogForwarding";
pub const SET_LOG_FORWARDING: &str = "SetLogForwarding";
pub const GET_LOG_FORWARDING_STATE: &str = "GetLogForwardingState";
pub const GET_LOG_FORWARDING_STATES: &str = "GetLogForwardingStates";
pub const GET_ABSOLUTE_TIME_IN_SECONDS: &str = "GetAbsoluteTimeInSeconds";
pub const GET_ABSOLUTE_TIME_DIFFS: &str = "GetAbsoluteTimeDiffs";

// Events
pub const ADD_COMPONENT: &str = "AddComponent";
pub const ADD_CONNECTION: &str = "AddConnection";
pub const REMOVE_CONNECTION: &str = "RemoveConnection";
pub const CHANGE_STATE: &str = "ChangeState";
pub const MCS_READY: &str = "MCSReady";

/// Component name of the manager component server.
pub fn manager_component_server() -> String {
    CONFIG.broker.manager_server_name.clone()
}

/// Component name of the manager component client of `process`.
pub fn manager_component_client(process: &str) -> String {
    format!("{process}{}", CONFIG.broker.manager_client_suffix)
}

/// Required interface the server keeps for each client process.
pub fn interface_gcm_required_for(process: &str) -> String {
    format!("InterfaceGCMRequiredFor{process}")
}

/// Required interface a client keeps for each user component of its process.
pub fn interface_component_required_for(component: &str) -> String {
    format!("InterfaceComponentRequiredFor{component}")
}

/// `true` for the names of manager components, which are not user-controllable.
pub fn is_manager_component(name: &str) -> bool {
    name == CONFIG.broker.manager_server_name || name.ends_with(&CONFIG.broker.manager_client_suffix)
}
