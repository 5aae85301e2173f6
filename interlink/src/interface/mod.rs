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

//! Provided and required interfaces and the protocol that connects them.
//!
//! A provided interface publishes commands and events. A required interface
//! declares the functions it wants bound and the event handlers it wants
//! attached. [`InterfaceRequired::connect_to`] performs the binding and either
//! succeeds completely or leaves both sides as they were.

use serde::{Deserialize, Serialize};

pub use description::{
    CommandDescription, EventDescription, FunctionDescription, InterfaceProvidedDescription,
    InterfaceRequiredDescription,
};
pub use event_receiver::{EventReceiver, EventReceiverVoid, EventReceiverWrite, ReceiverObject};
pub use provided::InterfaceProvided;
pub use required::{EventHandlerEntry, InterfaceRequired};

mod description;
mod event_receiver;
mod provided;
mod required;

/// Default dispatch of the commands of a provided interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueuingPolicy {
    /// Each connecting client gets an end-user copy with its own mailbox.
    CommandsShouldBeQueued,
    /// Commands run in the caller's task.
    CommandsShouldNotBeQueued,
}

/// Per-command override of the interface policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CommandQueuing {
    #[default]
    InterfacePolicy,
    Queued,
    NotQueued,
}

/// Per-handler override for event handlers of a required interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EventQueuing {
    #[default]
    InterfacePolicy,
    Queued,
    NotQueued,
}

/// Whether a missing counterpart fails the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Requirement {
    #[default]
    Required,
    Optional,
}
