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
use tracing::{debug, error, instrument, warn};

use crate::argument::{Argument, ArgumentPrototype};
use crate::command::command::downcast_command;
use crate::command::{Command, CommandKind, CommandObject};
use crate::mailbox::CompletionToken;

/// System event fired after a blocking void or write invocation finished.
pub const BLOCKING_COMMAND_EXECUTED: &str = "BlockingCommandExecuted";
/// System event fired after a blocking invocation with a result finished.
pub const BLOCKING_COMMAND_RETURN_EXECUTED: &str = "BlockingCommandReturnExecuted";

/// Event without payload.
pub type EventVoid = MulticastEvent<()>;
/// Event carrying an `A`.
pub type EventWrite<A> = MulticastEvent<A>;

/// Ordered list of observer commands executed when the event fires.
///
/// Observers run in registration order; each one is executed the way its
/// own dispatch says, so queued observers only receive a copy of the payload.
pub struct MulticastEvent<A: Argument> {
    name: String,
    kind: CommandKind,
    observers: RwLock<Vec<Arc<Command<A, ()>>>>,
}

impl MulticastEvent<()> {
    pub fn void(name: impl Into<String>) -> Self {
        Self::build(CommandKind::Void, name.into())
    }
}

impl<A: Argument> MulticastEvent<A> {
    pub fn write(name: impl Into<String>) -> Self {
        Self::build(CommandKind::Write, name.into())
    }

    fn build(kind: CommandKind, name: String) -> Self {
        Self {
            name,
            kind,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Appends an observer. Refuses a second registration of the same command.
    pub fn add_observer(&self, observer: Arc<Command<A, ()>>) -> bool {
        if observer.kind() != self.kind {
            error!(event = %self.name, observer = observer.name(), "observer kind does not match event");
            return false;
        }
        let mut observers = self.observers.write();
        if observers.iter().any(|existing| Arc::ptr_eq(existing, &observer)) {
            warn!(event = %self.name, observer = observer.name(), "observer already registered");
            return false;
        }
        observers.push(observer);
        true
    }

    pub fn remove_observer(&self, observer: &Arc<Command<A, ()>>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|existing| !Arc::ptr_eq(existing, observer));
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Executes every observer with a copy of `argument`.
    ///
    /// Returns how many observers accepted the payload.
    #[instrument(skip(self, argument), fields(event = %self.name))]
    pub async fn trigger(&self, argument: &A) -> usize {
        let observers = self.observers.read().clone();
        let mut delivered = 0;
        for observer in observers {
            let result = observer.execute(argument.clone()).await;
            if result.is_ok() {
                delivered += 1;
            } else {
                debug!(observer = observer.name(), %result, "observer did not accept event");
            }
        }
        delivered
    }
}

/// Type-erased view of an event, as stored in provided interfaces.
pub trait EventObject: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn kind(&self) -> CommandKind;
    fn argument_prototype(&self) -> Option<ArgumentPrototype>;
    /// Registers an erased observer; fails when its kind or payload type differs.
    fn add_observer_object(&self, observer: Arc<dyn CommandObject>) -> bool;
    fn remove_observer_object(&self, observer: &Arc<dyn CommandObject>) -> bool;
    fn observer_count(&self) -> usize;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<A: Argument> EventObject for MulticastEvent<A> {
    fn name(&self) -> &str {
        MulticastEvent::name(self)
    }

    fn kind(&self) -> CommandKind {
        self.kind
    }

    fn argument_prototype(&self) -> Option<ArgumentPrototype> {
        (self.kind == CommandKind::Write)
            .then(|| ArgumentPrototype::of::<A>().ok())
            .flatten()
    }

    fn add_observer_object(&self, observer: Arc<dyn CommandObject>) -> bool {
        let name = observer.name().to_string();
        match downcast_command::<A, ()>(observer) {
            Some(typed) => self.add_observer(typed),
            None => {
                error!(event = %self.name, observer = %name, "observer payload type does not match event");
                false
            }
        }
    }

    fn remove_observer_object(&self, observer: &Arc<dyn CommandObject>) -> bool {
        let target = Arc::as_ptr(observer).cast::<()>();
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|existing| Arc::as_ptr(existing).cast::<()>() != target);
        observers.len() != before
    }

    fn observer_count(&self) -> usize {
        MulticastEvent::observer_count(self)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Recovers the typed event behind an erased handle.
pub(crate) fn downcast_event<A: Argument>(
    event: Arc<dyn EventObject>,
) -> Option<Arc<MulticastEvent<A>>> {
    event.as_any().downcast::<MulticastEvent<A>>().ok()
}

/// The two system events an interface fires to release blocking callers.
pub struct CompletionEvents {
    executed: Arc<EventWrite<CompletionToken>>,
    return_executed: Arc<EventWrite<CompletionToken>>,
}

impl CompletionEvents {
    pub(crate) fn new() -> Self {
        Self {
            executed: Arc::new(EventWrite::write(BLOCKING_COMMAND_EXECUTED)),
            return_executed: Arc::new(EventWrite::write(BLOCKING_COMMAND_RETURN_EXECUTED)),
        }
    }

    pub(crate) fn events(&self) -> [Arc<dyn EventObject>; 2] {
        [self.executed.clone(), self.return_executed.clone()]
    }

    /// Fires the event matching `kind` with the caller's token.
    pub(crate) async fn complete(&self, kind: CommandKind, token: CompletionToken) {
        let event = if kind.has_return() {
            &self.return_executed
        } else {
            &self.executed
        };
        if event.trigger(&token).await == 0 {
            warn!(event = event.name(), "no observer released the blocking caller");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::command::CommandWrite;

    #[tokio::test]
    async fn observers_receive_payload_in_order() {
        let event = EventWrite::<u32>::write("Changed");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for tag in 0..3_u32 {
            let seen = seen.clone();
            let observer = Arc::new(CommandWrite::<u32>::write("Observer", move |value| {
                let seen = seen.clone();
                async move { seen.lock().push((tag, value)) }
            }));
            assert!(event.add_observer(observer));
        }
        assert_eq!(event.trigger(&7).await, 3);
        assert_eq!(*seen.lock(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn erased_observer_of_wrong_type_is_refused() {
        let event: Arc<dyn EventObject> = Arc::new(EventWrite::<f64>::write("Temperature"));
        let observer: Arc<dyn CommandObject> =
            Arc::new(CommandWrite::<String>::write("Text", |_| async {}));
        assert!(!event.add_observer_object(observer));
        assert_eq!(event.observer_count(), 0);
    }

    #[tokio::test]
    async fn removed_observer_stops_receiving() {
        let event = EventVoid::void("Tick");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let observer: Arc<dyn CommandObject> = Arc::new(Command::void("OnTick", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        assert!(event.add_observer_object(observer.clone()));
        event.trigger(&()).await;
        assert!(event.remove_observer_object(&observer));
        event.trigger(&()).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
