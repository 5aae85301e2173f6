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

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{error, instrument, warn};

use crate::argument::Argument;
use crate::command::command::{downcast_command, Reply};
use crate::command::{Command, CommandKind, CommandObject};
use crate::common::{ExecutionResult, CONFIG};
use crate::mailbox::ThreadSignal;

pub type FunctionVoid = Function<(), ()>;
pub type FunctionVoidReturn<R> = Function<(), R>;
pub type FunctionWrite<A> = Function<A, ()>;
pub type FunctionWriteReturn<A, R> = Function<A, R>;
pub type FunctionRead<R> = Function<(), R>;
pub type FunctionQualifiedRead<A, R> = Function<A, R>;

/// Client-side handle on a command provided by another component.
///
/// A function starts unbound. Connecting its required interface binds it to
/// the provider's command of the same name and kind; detaching the interface
/// unbinds it again. Calls on an unbound function fail with
/// [`ExecutionResult::FunctionNotBound`].
///
/// When the bound command is queued, kinds with a result always wait for the
/// provider to run the invocation; void and write kinds wait only through
/// [`Function::execute_blocking`].
pub struct Function<A: Argument, R: Argument> {
    kind: CommandKind,
    command: RwLock<Option<Arc<Command<A, R>>>>,
    signal: RwLock<Option<Arc<ThreadSignal>>>,
}

impl Function<(), ()> {
    pub fn void() -> Arc<Self> {
        Self::new(CommandKind::Void)
    }
}

impl<R: Argument> Function<(), R> {
    pub fn void_return() -> Arc<Self> {
        Self::new(CommandKind::VoidReturn)
    }

    pub fn read() -> Arc<Self> {
        Self::new(CommandKind::Read)
    }

    /// Shorthand for [`Function::execute`] on argument-less kinds.
    pub async fn trigger(&self) -> ExecutionResult {
        self.execute(&()).await
    }

    /// Shorthand for [`Function::call`] on argument-less kinds.
    pub async fn get(&self) -> Result<R, ExecutionResult> {
        self.call(&()).await
    }
}

impl<A: Argument> Function<A, ()> {
    pub fn write() -> Arc<Self> {
        Self::new(CommandKind::Write)
    }
}

impl<A: Argument, R: Argument> Function<A, R> {
    pub fn write_return() -> Arc<Self> {
        Self::new(CommandKind::WriteReturn)
    }

    pub fn qualified_read() -> Arc<Self> {
        Self::new(CommandKind::QualifiedRead)
    }

    /// Creates an unbound function of any kind.
    pub fn new(kind: CommandKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            command: RwLock::new(None),
            signal: RwLock::new(None),
        })
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// `true` while bound to a command.
    pub fn is_valid(&self) -> bool {
        self.command.read().is_some()
    }

    /// Name of the bound command, if any.
    pub fn command_name(&self) -> Option<String> {
        self.command.read().as_ref().map(|c| c.name().to_string())
    }

    pub fn detach(&self) {
        *self.command.write() = None;
    }

    fn bound(&self) -> Option<Arc<Command<A, R>>> {
        self.command.read().clone()
    }

    /// Executes the bound command.
    ///
    /// Queued void and write commands return [`ExecutionResult::Queued`] as
    /// soon as the invocation is in the provider's mailbox.
    #[instrument(skip(self, argument), fields(kind = %self.kind))]
    pub async fn execute(&self, argument: &A) -> ExecutionResult {
        let command = match self.checked() {
            Ok(command) => command,
            Err(result) => return result,
        };
        if !command.is_queued() {
            return outcome(command.run_inline(argument.clone()).await);
        }
        if self.kind.has_return() {
            outcome(self.wait_for_completion(&command, argument.clone()).await)
        } else {
            command.enqueue(argument.clone(), None)
        }
    }

    /// Executes the bound command and waits until the provider has run it.
    pub async fn execute_blocking(&self, argument: &A) -> ExecutionResult {
        let command = match self.checked() {
            Ok(command) => command,
            Err(result) => return result,
        };
        if command.is_queued() {
            outcome(self.wait_for_completion(&command, argument.clone()).await)
        } else {
            outcome(command.run_inline(argument.clone()).await)
        }
    }

    /// Executes the bound command and hands back its result.
    pub async fn call(&self, argument: &A) -> Result<R, ExecutionResult> {
        let command = self.checked()?;
        if command.is_queued() {
            self.wait_for_completion(&command, argument.clone()).await
        } else {
            command.run_inline(argument.clone()).await
        }
    }

    /// Rebuilds the argument from its raw form, then executes.
    pub async fn execute_serialized(&self, raw: &[u8]) -> ExecutionResult {
        match A::deserialize_raw(raw) {
            Ok(argument) => self.execute(&argument).await,
            Err(e) => {
                warn!("{}", e);
                ExecutionResult::from(&e)
            }
        }
    }

    fn checked(&self) -> Result<Arc<Command<A, R>>, ExecutionResult> {
        let command = self.bound().ok_or(ExecutionResult::FunctionNotBound)?;
        if command.is_enabled() {
            Ok(command)
        } else {
            Err(ExecutionResult::CommandDisabled)
        }
    }

    async fn wait_for_completion(
        &self,
        command: &Command<A, R>,
        argument: A,
    ) -> Result<R, ExecutionResult> {
        let signal = self.signal.read().clone();
        let Some(signal) = signal else {
            error!(command = command.name(), "blocking call on a function outside a required interface");
            return Err(ExecutionResult::FunctionNotBound);
        };
        let (token, wait) = signal.prepare();
        let (sender, receiver) = oneshot::channel();
        let queued = command.enqueue(
            argument,
            Some(Reply {
                token,
                value: sender,
            }),
        );
        if queued != ExecutionResult::Queued {
            signal.cancel(&token);
            return Err(queued);
        }
        if !wait.wait(CONFIG.blocking_command_timeout()).await {
            signal.cancel(&token);
            warn!(command = command.name(), "blocking call timed out");
            return Err(ExecutionResult::TimedOut);
        }
        receiver.await.map_err(|_| ExecutionResult::NoReturnValue)
    }
}

fn outcome<R>(result: Result<R, ExecutionResult>) -> ExecutionResult {
    match result {
        Ok(_) => ExecutionResult::Ok,
        Err(result) => result,
    }
}

/// Type-erased view of a function, as stored in required interfaces.
pub trait FunctionObject: Send + Sync + 'static {
    fn kind(&self) -> CommandKind;
    fn is_valid(&self) -> bool;
    /// Binds to `command`; returns `false` when the kind or types differ.
    fn bind(&self, command: Arc<dyn CommandObject>) -> bool;
    fn detach(&self);
    fn install_signal(&self, signal: Arc<ThreadSignal>);
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<A: Argument, R: Argument> FunctionObject for Function<A, R> {
    fn kind(&self) -> CommandKind {
        self.kind
    }

    fn is_valid(&self) -> bool {
        Function::is_valid(self)
    }

    fn bind(&self, command: Arc<dyn CommandObject>) -> bool {
        if command.kind() != self.kind {
            error!(command = command.name(), expected = %self.kind, found = %command.kind(), "command kind mismatch");
            return false;
        }
        let name = command.name().to_string();
        match downcast_command::<A, R>(command) {
            Some(typed) => {
                *self.command.write() = Some(typed);
                true
            }
            None => {
                error!(command = %name, "command argument or result type mismatch");
                false
            }
        }
    }

    fn detach(&self) {
        Function::detach(self);
    }

    fn install_signal(&self, signal: Arc<ThreadSignal>) {
        *self.signal.write() = Some(signal);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRead;

    #[tokio::test]
    async fn unbound_function_reports_not_bound() {
        let function = FunctionRead::<f64>::read();
        assert!(!function.is_valid());
        assert_eq!(function.get().await, Err(ExecutionResult::FunctionNotBound));
    }

    #[tokio::test]
    async fn bound_read_returns_value() {
        let function = FunctionRead::<f64>::read();
        let command: Arc<dyn CommandObject> =
            Arc::new(CommandRead::<f64>::read("GetTemp", || async { 36.6 }));
        assert!(FunctionObject::bind(function.as_ref(), command.clone()));
        assert_eq!(function.get().await, Ok(36.6));

        command.disable();
        assert_eq!(function.get().await, Err(ExecutionResult::CommandDisabled));
        function.detach();
        assert!(!function.is_valid());
    }

    #[test]
    fn kind_mismatch_is_refused() {
        let function = FunctionVoidReturn::<f64>::void_return();
        let command: Arc<dyn CommandObject> =
            Arc::new(CommandRead::<f64>::read("GetTemp", || async { 0.0 }));
        assert!(!FunctionObject::bind(function.as_ref(), command));
        assert!(!function.is_valid());
    }

    #[tokio::test]
    async fn serialized_argument_of_wrong_type_is_rejected() {
        let function = FunctionWrite::<f64>::write();
        let raw = String::from("warm").serialize_raw().expect("serializes");
        // Decoding happens before the binding check.
        assert_eq!(
            function.execute_serialized(&raw).await,
            ExecutionResult::InvalidInputType
        );
    }
}
