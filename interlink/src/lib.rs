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

#![forbid(unsafe_code)]
//! Interlink component middleware.
//!
//! Components publish typed commands and events through provided
//! interfaces and consume them through required interfaces. Queued commands
//! run on the provider's task, in mailbox order; blocking calls wait on a
//! completion signal until the provider has run them. A manager broker
//! creates, connects and drives components across processes.

/// Value contract of command arguments and results.
pub mod argument;
/// Commands, functions and multicast events.
pub mod command;
/// Configuration, errors, execution results and shared aliases.
pub mod common;
/// Components and their lifecycle.
pub mod component;
/// Provided and required interfaces.
pub mod interface;
/// Mailboxes and completion signals.
pub mod mailbox;
/// Global and local managers and the manager components.
pub mod manager;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use async_trait;

    pub use crate::argument::{Argument, ArgumentPrototype};
    pub use crate::command::{
        Command, CommandKind, CommandObject, CommandQualifiedRead, CommandRead, CommandVoid,
        CommandVoidReturn, CommandWrite, CommandWriteReturn, EventObject, EventVoid, EventWrite,
        Function, FunctionObject, FunctionQualifiedRead, FunctionRead, FunctionVoid,
        FunctionVoidReturn, FunctionWrite, FunctionWriteReturn, MulticastEvent,
        BLOCKING_COMMAND_EXECUTED, BLOCKING_COMMAND_RETURN_EXECUTED,
    };
    pub use crate::common::{ArgumentError, BrokerError, ExecutionResult, InterlinkConfig, CONFIG};
    pub use crate::component::{Component, ComponentBehavior, ComponentState, ComponentStateChange};
    pub use crate::interface::{
        CommandQueuing, EventQueuing, EventReceiver, EventReceiverVoid, EventReceiverWrite,
        InterfaceProvided, InterfaceProvidedDescription, InterfaceRequired,
        InterfaceRequiredDescription, QueuingPolicy, Requirement,
    };
    pub use crate::mailbox::{CompletionToken, Mailbox, ThreadSignal};
    pub use crate::manager::names;
    pub use crate::manager::{
        ComponentDescription, ComponentFactory, ComponentStatusControl, ConnectionDescription,
        GlobalManager, InterfaceDescription, InterfaceEndpoint, LoadLibraryDescription,
        LocalManager, LogMessage, ManagerComponentClient, ManagerComponentServer, ProcessTimeDiff,
    };
}
