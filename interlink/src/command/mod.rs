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

//! Commands, the functions that call them and the events that fan out to them.

pub use command::{
    Command, CommandObject, CommandQualifiedRead, CommandRead, CommandVoid, CommandVoidReturn,
    CommandWrite, CommandWriteReturn, QueueBinding,
};
pub(crate) use command::downcast_command;
pub use function::{
    Function, FunctionObject, FunctionQualifiedRead, FunctionRead, FunctionVoid,
    FunctionVoidReturn, FunctionWrite, FunctionWriteReturn,
};
pub use kind::CommandKind;
pub(crate) use multicast::downcast_event;
pub use multicast::{
    CompletionEvents, EventObject, EventVoid, EventWrite, MulticastEvent,
    BLOCKING_COMMAND_EXECUTED, BLOCKING_COMMAND_RETURN_EXECUTED,
};

#[allow(clippy::module_inception)]
mod command;
mod function;
mod kind;
mod multicast;
