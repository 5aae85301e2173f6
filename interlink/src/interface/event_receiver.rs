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
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{error, trace};

use crate::argument::Argument;
use crate::command::{downcast_command, Command, CommandKind, CommandObject};

pub type EventReceiverVoid = EventReceiver<()>;
pub type EventReceiverWrite<A> = EventReceiver<A>;

/// Client-side endpoint of an event that can be waited on.
///
/// The receiver is attached to the provider's event when its required
/// interface connects. Each delivery records the payload, wakes one waiter
/// and runs the handler registered under the same name, if any.
pub struct EventReceiver<A: Argument> {
    name: String,
    kind: CommandKind,
    observer: Arc<Command<A, ()>>,
    handler: RwLock<Option<Arc<Command<A, ()>>>>,
    notify: Notify,
    last: Mutex<Option<A>>,
}

impl EventReceiver<()> {
    pub fn void(name: impl Into<String>) -> Arc<Self> {
        Self::build(CommandKind::Void, name.into())
    }
}

impl<A: Argument> EventReceiver<A> {
    pub fn write(name: impl Into<String>) -> Arc<Self> {
        Self::build(CommandKind::Write, name.into())
    }

    fn build(kind: CommandKind, name: String) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let observer = Command::with_kind(kind, name.clone(), move |argument: A| {
                let weak = weak.clone();
                async move {
                    if let Some(receiver) = weak.upgrade() {
                        receiver.deliver(argument).await;
                    }
                }
            });
            Self {
                name,
                kind,
                observer: Arc::new(observer),
                handler: RwLock::new(None),
                notify: Notify::new(),
                last: Mutex::new(None),
            }
        })
    }

    async fn deliver(&self, argument: A) {
        trace!(receiver = %self.name, "event received");
        *self.last.lock() = Some(argument.clone());
        self.notify.notify_one();
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler.execute(argument).await;
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the next delivery; `false` on timeout.
    ///
    /// A delivery that arrived while nobody was waiting is consumed by the
    /// next call.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok()
    }

    /// Payload of the most recent delivery.
    pub fn last_value(&self) -> Option<A> {
        self.last.lock().clone()
    }

    pub fn set_handler(&self, handler: Arc<Command<A, ()>>) {
        *self.handler.write() = Some(handler);
    }
}

/// Type-erased view of a receiver, as stored in required interfaces.
pub trait ReceiverObject: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn kind(&self) -> CommandKind;
    /// Command attached to the provider's event.
    fn observer(&self) -> Arc<dyn CommandObject>;
    fn set_handler_object(&self, handler: Arc<dyn CommandObject>) -> bool;
    fn has_handler(&self) -> bool;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<A: Argument> ReceiverObject for EventReceiver<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CommandKind {
        self.kind
    }

    fn observer(&self) -> Arc<dyn CommandObject> {
        self.observer.clone()
    }

    fn set_handler_object(&self, handler: Arc<dyn CommandObject>) -> bool {
        if handler.kind() != self.kind {
            error!(receiver = %self.name, "handler kind does not match receiver");
            return false;
        }
        match downcast_command::<A, ()>(handler) {
            Some(typed) => {
                self.set_handler(typed);
                true
            }
            None => {
                error!(receiver = %self.name, "handler payload type does not match receiver");
                false
            }
        }
    }

    fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandWrite;

    #[tokio::test]
    async fn delivery_before_wait_is_not_lost() {
        let receiver = EventReceiverWrite::<i32>::write("Level");
        let observer = receiver.observer.clone();
        observer.execute(4).await;
        assert!(receiver.wait(Duration::from_millis(50)).await);
        assert_eq!(receiver.last_value(), Some(4));
        assert!(!receiver.wait(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn handler_runs_on_delivery() {
        let receiver = EventReceiverWrite::<i32>::write("Level");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Arc<dyn CommandObject> =
            Arc::new(CommandWrite::<i32>::write("Level", move |value| {
                let sink = sink.clone();
                async move { sink.lock().push(value) }
            }));
        assert!(receiver.set_handler_object(handler));
        receiver.observer.execute(9).await;
        assert_eq!(*seen.lock(), vec![9]);
    }
}
