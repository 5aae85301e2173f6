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
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use static_assertions::assert_impl_all;
use tokio::sync::oneshot;
use tracing::{error, instrument, trace, warn};

use crate::argument::{Argument, ArgumentPrototype};
use crate::command::{CommandKind, CompletionEvents};
use crate::common::{ExecutionResult, FutureBox, Handler, Invocation};
use crate::mailbox::{CompletionToken, Mailbox};

/// Command taking no argument and returning nothing.
pub type CommandVoid = Command<(), ()>;
/// Command taking no argument and returning `R`.
pub type CommandVoidReturn<R> = Command<(), R>;
/// Command taking an `A` and returning nothing.
pub type CommandWrite<A> = Command<A, ()>;
/// Command taking an `A` and returning `R`.
pub type CommandWriteReturn<A, R> = Command<A, R>;
/// Read command returning `R`.
pub type CommandRead<R> = Command<(), R>;
/// Qualified read command taking an `A` and returning `R`.
pub type CommandQualifiedRead<A, R> = Command<A, R>;

/// Named, executable handle on a component's behavior.
///
/// A command is either executed inline in the caller's task or queued into a
/// mailbox owned by the component that provides it. Queued copies share the
/// handler and the enable flag with the command they were cloned from.
pub struct Command<A: Argument, R: Argument> {
    name: String,
    kind: CommandKind,
    enabled: Arc<AtomicBool>,
    handler: Handler<A, R>,
    dispatch: Dispatch,
}

enum Dispatch {
    Inline,
    Queued(QueueBinding),
}

/// Where a queued command delivers its invocations.
#[derive(Clone)]
pub struct QueueBinding {
    mailbox: Option<Arc<Mailbox>>,
    pending: Arc<AtomicUsize>,
    capacity: usize,
    completion: Option<Arc<CompletionEvents>>,
}

impl QueueBinding {
    pub(crate) fn new(
        mailbox: Option<Arc<Mailbox>>,
        capacity: usize,
        completion: Option<Arc<CompletionEvents>>,
    ) -> Self {
        Self {
            mailbox,
            pending: Arc::new(AtomicUsize::new(0)),
            capacity: capacity.max(1),
            completion,
        }
    }

    /// A queued command with nowhere to deliver, as held by factory interfaces.
    pub(crate) fn detached() -> Self {
        Self::new(None, 1, None)
    }
}

/// Return channel of a blocking invocation.
pub(crate) struct Reply<R> {
    pub(crate) token: CompletionToken,
    pub(crate) value: oneshot::Sender<R>,
}

impl<A: Argument, R: Argument> Debug for Command<A, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("queued", &self.is_queued())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Command<(), ()> {
    /// Creates a void command.
    pub fn void<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::build(CommandKind::Void, name.into(), wrap_nullary(body))
    }
}

impl<R: Argument> Command<(), R> {
    /// Creates a void command that returns a value.
    pub fn void_return<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self::build(CommandKind::VoidReturn, name.into(), wrap_nullary(body))
    }

    /// Creates a read command.
    pub fn read<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self::build(CommandKind::Read, name.into(), wrap_nullary(body))
    }
}

impl<A: Argument> Command<A, ()> {
    /// Creates a write command.
    pub fn write<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::build(CommandKind::Write, name.into(), wrap_unary(body))
    }
}

impl<A: Argument, R: Argument> Command<A, R> {
    /// Creates a write command that returns a value.
    pub fn write_return<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self::build(CommandKind::WriteReturn, name.into(), wrap_unary(body))
    }

    /// Creates a qualified read command.
    pub fn qualified_read<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self::build(CommandKind::QualifiedRead, name.into(), wrap_unary(body))
    }

    /// Creates a command of an explicit kind from a one-argument body.
    pub(crate) fn with_kind<F, Fut>(kind: CommandKind, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self::build(kind, name.into(), wrap_unary(body))
    }

    fn build(kind: CommandKind, name: String, handler: Handler<A, R>) -> Self {
        Self {
            name,
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            handler,
            dispatch: Dispatch::Inline,
        }
    }

    /// Copy of this command that delivers through `binding`.
    pub(crate) fn rebound(&self, binding: QueueBinding) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            enabled: self.enabled.clone(),
            handler: self.handler.clone(),
            dispatch: Dispatch::Queued(binding),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn is_queued(&self) -> bool {
        matches!(self.dispatch, Dispatch::Queued(_))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Executes the command without waiting for queued work.
    ///
    /// Inline commands run to completion and report [`ExecutionResult::Ok`];
    /// queued commands report [`ExecutionResult::Queued`] once the invocation
    /// is in the mailbox.
    pub async fn execute(&self, argument: A) -> ExecutionResult {
        if !self.is_enabled() {
            return ExecutionResult::Disabled;
        }
        match &self.dispatch {
            Dispatch::Inline => {
                (self.handler)(argument).await;
                ExecutionResult::Ok
            }
            Dispatch::Queued(_) => self.enqueue(argument, None),
        }
    }

    /// Runs the handler in the caller's task regardless of dispatch.
    pub(crate) async fn run_inline(&self, argument: A) -> Result<R, ExecutionResult> {
        if !self.is_enabled() {
            return Err(ExecutionResult::Disabled);
        }
        Ok((self.handler)(argument).await)
    }

    /// Queues one invocation, optionally carrying a blocking caller's reply channel.
    #[instrument(skip(self, argument, reply), fields(command = %self.name))]
    pub(crate) fn enqueue(&self, argument: A, reply: Option<Reply<R>>) -> ExecutionResult {
        if !self.is_enabled() {
            return ExecutionResult::Disabled;
        }
        let Dispatch::Queued(binding) = &self.dispatch else {
            error!("enqueue called on an inline command");
            return ExecutionResult::NoMailbox;
        };
        let Some(mailbox) = binding.mailbox.as_ref() else {
            warn!("queued command has no mailbox");
            return ExecutionResult::NoMailbox;
        };
        if binding.pending.fetch_add(1, Ordering::AcqRel) >= binding.capacity {
            binding.pending.fetch_sub(1, Ordering::AcqRel);
            warn!(capacity = binding.capacity, "argument queue full");
            return ExecutionResult::ArgumentQueueFull;
        }

        let handler = self.handler.clone();
        let pending = binding.pending.clone();
        let completion = binding.completion.clone();
        let kind = self.kind;
        let invocation: Invocation = Box::pin(async move {
            pending.fetch_sub(1, Ordering::AcqRel);
            let value = handler(argument).await;
            if let Some(Reply { token, value: sender }) = reply {
                // The caller may have timed out already.
                let _ = sender.send(value);
                match completion {
                    Some(events) => events.complete(kind, token).await,
                    None => warn!("blocking invocation has no completion events"),
                }
            }
        });

        let result = mailbox.try_push(invocation);
        if result == ExecutionResult::Queued {
            trace!("argument queued");
        } else {
            binding.pending.fetch_sub(1, Ordering::AcqRel);
        }
        result
    }

    /// Invocations currently waiting in the mailbox for this command.
    pub fn pending_arguments(&self) -> usize {
        match &self.dispatch {
            Dispatch::Queued(binding) => binding.pending.load(Ordering::Acquire),
            Dispatch::Inline => 0,
        }
    }
}

fn wrap_nullary<R, F, Fut>(body: F) -> Handler<(), R>
where
    R: Argument,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    Arc::new(move |_: ()| -> FutureBox<R> { Box::pin(body()) })
}

fn wrap_unary<A, R, F, Fut>(body: F) -> Handler<A, R>
where
    A: Argument,
    R: Argument,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    Arc::new(move |argument: A| -> FutureBox<R> { Box::pin(body(argument)) })
}

/// Type-erased view of a command, as stored in interface maps.
pub trait CommandObject: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn kind(&self) -> CommandKind;
    fn is_queued(&self) -> bool;
    fn is_enabled(&self) -> bool;
    fn enable(&self);
    fn disable(&self);
    /// Prototype of the argument, for kinds that take one.
    fn argument_prototype(&self) -> Option<ArgumentPrototype>;
    /// Prototype of the result, for kinds that return one.
    fn result_prototype(&self) -> Option<ArgumentPrototype>;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    /// Copy of the command delivering through `binding`.
    fn with_queue(&self, binding: QueueBinding) -> Arc<dyn CommandObject>;
}

impl<A: Argument, R: Argument> CommandObject for Command<A, R> {
    fn name(&self) -> &str {
        Command::name(self)
    }

    fn kind(&self) -> CommandKind {
        self.kind
    }

    fn is_queued(&self) -> bool {
        Command::is_queued(self)
    }

    fn is_enabled(&self) -> bool {
        Command::is_enabled(self)
    }

    fn enable(&self) {
        Command::enable(self);
    }

    fn disable(&self) {
        Command::disable(self);
    }

    fn argument_prototype(&self) -> Option<ArgumentPrototype> {
        matches!(
            self.kind,
            CommandKind::Write | CommandKind::WriteReturn | CommandKind::QualifiedRead
        )
        .then(|| ArgumentPrototype::of::<A>().ok())
        .flatten()
    }

    fn result_prototype(&self) -> Option<ArgumentPrototype> {
        self.kind
            .has_return()
            .then(|| ArgumentPrototype::of::<R>().ok())
            .flatten()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn with_queue(&self, binding: QueueBinding) -> Arc<dyn CommandObject> {
        Arc::new(self.rebound(binding))
    }
}

/// Recovers the typed command behind an erased handle.
pub(crate) fn downcast_command<A: Argument, R: Argument>(
    command: Arc<dyn CommandObject>,
) -> Option<Arc<Command<A, R>>> {
    command.as_any().downcast::<Command<A, R>>().ok()
}

assert_impl_all!(CommandVoid: Send, Sync);
assert_impl_all!(CommandWriteReturn<String, f64>: Send, Sync);

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicI64;

    use super::*;

    #[tokio::test]
    async fn inline_write_runs_immediately() {
        let total = Arc::new(AtomicI64::new(0));
        let sink = total.clone();
        let command = CommandWrite::<i64>::write("Add", move |value| {
            let sink = sink.clone();
            async move {
                sink.fetch_add(value, Ordering::SeqCst);
            }
        });
        assert_eq!(command.execute(5).await, ExecutionResult::Ok);
        assert_eq!(total.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn disabled_command_refuses_execution() {
        let command = CommandVoid::void("Noop", || async {});
        command.disable();
        assert_eq!(command.execute(()).await, ExecutionResult::Disabled);
        command.enable();
        assert_eq!(command.execute(()).await, ExecutionResult::Ok);
    }

    #[tokio::test]
    async fn queued_copy_shares_enable_flag() {
        let command = CommandVoid::void("Tick", || async {});
        let mailbox = Arc::new(Mailbox::new("box", 4));
        let queued = command.rebound(QueueBinding::new(Some(mailbox.clone()), 4, None));
        command.disable();
        assert_eq!(queued.execute(()).await, ExecutionResult::Disabled);
        command.enable();
        assert_eq!(queued.execute(()).await, ExecutionResult::Queued);
        assert_eq!(mailbox.len(), 1);
    }

    #[tokio::test]
    async fn argument_queue_is_bounded_per_command() {
        let command = CommandWrite::<u8>::write("Push", |_| async {});
        let mailbox = Arc::new(Mailbox::new("box", 8));
        let queued = command.rebound(QueueBinding::new(Some(mailbox.clone()), 2, None));
        assert_eq!(queued.execute(1).await, ExecutionResult::Queued);
        assert_eq!(queued.execute(2).await, ExecutionResult::Queued);
        assert_eq!(queued.execute(3).await, ExecutionResult::ArgumentQueueFull);
        assert_eq!(queued.pending_arguments(), 2);

        assert!(mailbox.execute_next().await);
        assert_eq!(queued.pending_arguments(), 1);
        assert_eq!(queued.execute(4).await, ExecutionResult::Queued);
    }

    #[tokio::test]
    async fn queued_without_mailbox_reports_no_mailbox() {
        let command = CommandVoid::void("Orphan", || async {});
        let queued = command.rebound(QueueBinding::detached());
        assert_eq!(queued.execute(()).await, ExecutionResult::NoMailbox);
    }

    #[test]
    fn erased_command_downcasts_to_its_own_types_only() {
        let command: Arc<dyn CommandObject> =
            Arc::new(CommandRead::<f64>::read("GetTemp", || async { 21.5 }));
        assert!(command.result_prototype().is_some());
        assert!(command.argument_prototype().is_none());
        assert!(downcast_command::<(), String>(command.clone()).is_none());
        assert!(downcast_command::<(), f64>(command).is_some());
    }
}
