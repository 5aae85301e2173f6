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

use crate::common::ArgumentError;

/// Outcome code returned by every command and function execution.
///
/// Executions never panic across a component boundary. Local failures are
/// encoded here and handed back to the caller, which decides whether to log,
/// retry or ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionResult {
    /// The command ran to completion.
    Ok,
    /// The invocation was placed in the target mailbox and will run later.
    Queued,
    /// The command itself is disabled.
    Disabled,
    /// An argument could not be rebuilt from its serialized form.
    ArgumentDynamicCreationFailed,
    /// A queued command has no mailbox to deliver into.
    NoMailbox,
    /// The function is bound but its command has been disabled.
    CommandDisabled,
    /// The function has not been bound to a command.
    FunctionNotBound,
    /// The target mailbox is at capacity.
    MailboxFull,
    /// The command already holds the maximum number of pending arguments.
    ArgumentQueueFull,
    /// The serialized argument does not describe the expected type.
    InvalidInputType,
    /// A blocking call did not complete before its deadline.
    TimedOut,
    /// The command completed but its return value was lost.
    NoReturnValue,
}

impl ExecutionResult {
    /// Returns `true` for [`ExecutionResult::Ok`] and [`ExecutionResult::Queued`].
    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok | Self::Queued)
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::Queued => "queued",
            Self::Disabled => "disabled",
            Self::ArgumentDynamicCreationFailed => "argument dynamic creation failed",
            Self::NoMailbox => "no mailbox",
            Self::CommandDisabled => "command disabled",
            Self::FunctionNotBound => "function not bound",
            Self::MailboxFull => "mailbox full",
            Self::ArgumentQueueFull => "argument queue full",
            Self::InvalidInputType => "invalid input type",
            Self::TimedOut => "timed out",
            Self::NoReturnValue => "no return value",
        };
        write!(f, "{text}")
    }
}

impl From<&ArgumentError> for ExecutionResult {
    fn from(error: &ArgumentError) -> Self {
        match error {
            ArgumentError::TypeMismatch(_) => Self::InvalidInputType,
            ArgumentError::Serialize(_) | ArgumentError::Malformed(_) => {
                Self::ArgumentDynamicCreationFailed
            }
        }
    }
}
