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

//! Payloads exchanged by the manager commands and events.

use std::fmt::{Display, Formatter};

use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::argument::Argument;

/// Identifies a component, and the class and argument used to create it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescription {
    pub process_name: String,
    pub component_name: String,
    pub class_name: String,
    /// Constructor argument on creation, configuration argument on configure.
    pub argument: String,
}

impl ComponentDescription {
    pub fn new(process_name: impl Into<String>, component_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            component_name: component_name.into(),
            ..Self::default()
        }
    }

    /// Description used to create an instance of `class_name`.
    pub fn of_class(
        process_name: impl Into<String>,
        component_name: impl Into<String>,
        class_name: impl Into<String>,
        argument: impl Into<String>,
    ) -> Self {
        Self {
            process_name: process_name.into(),
            component_name: component_name.into(),
            class_name: class_name.into(),
            argument: argument.into(),
        }
    }
}

/// Fully qualified interface: process, component and interface names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceEndpoint {
    pub process_name: String,
    pub component_name: String,
    pub interface_name: String,
}

impl InterfaceEndpoint {
    pub fn new(
        process_name: impl Into<String>,
        component_name: impl Into<String>,
        interface_name: impl Into<String>,
    ) -> Self {
        Self {
            process_name: process_name.into(),
            component_name: component_name.into(),
            interface_name: interface_name.into(),
        }
    }
}

impl Display for InterfaceEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.process_name, self.component_name, self.interface_name
        )
    }
}

/// A required interface (client) bound to a provided interface (server).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescription {
    pub client: InterfaceEndpoint,
    pub server: InterfaceEndpoint,
    /// Assigned by the global manager; zero until registered.
    pub connection_id: u64,
}

impl ConnectionDescription {
    pub fn new(client: InterfaceEndpoint, server: InterfaceEndpoint) -> Self {
        Self {
            client,
            server,
            connection_id: 0,
        }
    }

    /// `true` when both descriptions name the same endpoints, ignoring ids.
    pub fn same_endpoints(&self, other: &ConnectionDescription) -> bool {
        self.client == other.client && self.server == other.server
    }
}

impl Display for ConnectionDescription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.client, self.server)
    }
}

/// Interface names of one component.
#[derive(new, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescription {
    pub process_name: String,
    pub component_name: String,
    pub provided: Vec<String>,
    pub required: Vec<String>,
}

/// Target of a start, stop or resume request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatusControl {
    pub process_name: String,
    pub component_name: String,
    /// Seconds to wait before applying the request.
    pub delay: f64,
}

impl ComponentStatusControl {
    pub fn new(process_name: impl Into<String>, component_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            component_name: component_name.into(),
            delay: 0.0,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }
}

/// Library to load into a process.
#[derive(new, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadLibraryDescription {
    pub process_name: String,
    pub library_name: String,
}

/// Log line forwarded from a process to the server.
#[derive(new, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub process_name: String,
    pub text: String,
}

impl Display for LogMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.process_name, self.text)
    }
}

/// Estimated clock offset of a process relative to the server's process.
#[derive(new, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessTimeDiff {
    pub process_name: String,
    /// Positive when the process clock is behind the server's.
    pub offset: f64,
}

impl Argument for ComponentDescription {}
impl Argument for InterfaceEndpoint {}
impl Argument for ConnectionDescription {}
impl Argument for InterfaceDescription {}
impl Argument for ComponentStatusControl {}
impl Argument for LoadLibraryDescription {}
impl Argument for LogMessage {}

impl Argument for ProcessTimeDiff {
    fn scalar_number(&self) -> usize {
        1
    }

    fn scalar(&self, index: usize) -> Option<f64> {
        (index == 0).then_some(self.offset)
    }

    fn scalar_description(&self, index: usize, prefix: &str) -> Option<String> {
        (index == 0).then(|| format!("{prefix}{}", self.process_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_survives_raw_encoding() {
        let mut connection = ConnectionDescription::new(
            InterfaceEndpoint::new("P2", "Display", "Thermostat"),
            InterfaceEndpoint::new("P2", "Thermostat", "Control"),
        );
        connection.connection_id = 7;
        let raw = connection.serialize_raw().expect("encodes");
        let decoded = ConnectionDescription::deserialize_raw(&raw).expect("decodes");
        assert_eq!(decoded, connection);
        assert_eq!(decoded.to_string(), "P2:Display:Thermostat -> P2:Thermostat:Control");
    }

    #[test]
    fn time_diff_flattens_to_its_offset() {
        let diff = ProcessTimeDiff::new("P2".to_string(), 1.5);
        assert_eq!(diff.serialize_text(','), "1.5");
        assert_eq!(diff.serialize_description(',', "offset:"), "offset:P2");
    }
}
