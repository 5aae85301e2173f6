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

use serde::{Deserialize, Serialize};

use crate::argument::{Argument, ArgumentPrototype};
use crate::command::CommandKind;
use crate::interface::Requirement;

/// One command of a provided interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescription {
    pub name: String,
    pub kind: CommandKind,
    pub argument: Option<ArgumentPrototype>,
    pub result: Option<ArgumentPrototype>,
}

/// One event of a provided interface or one event handler of a required one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescription {
    pub name: String,
    pub kind: CommandKind,
    pub argument: Option<ArgumentPrototype>,
}

/// One function of a required interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescription {
    pub name: String,
    pub kind: CommandKind,
    pub requirement: Requirement,
}

/// Everything a peer needs to build a proxy of a provided interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceProvidedDescription {
    pub interface_name: String,
    pub commands: Vec<CommandDescription>,
    pub events: Vec<EventDescription>,
}

impl InterfaceProvidedDescription {
    /// Names of the commands of `kind`, in description order.
    pub fn command_names(&self, kind: CommandKind) -> Vec<&str> {
        self.commands
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Everything a peer needs to build a proxy of a required interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRequiredDescription {
    pub interface_name: String,
    pub requirement: Requirement,
    pub functions: Vec<FunctionDescription>,
    pub event_handlers: Vec<EventDescription>,
}

impl Argument for InterfaceProvidedDescription {}
impl Argument for InterfaceRequiredDescription {}
