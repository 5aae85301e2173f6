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

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use crate::argument::Argument;
use crate::command::{
    Command, CommandKind, CommandObject, CommandVoid, CommandWrite, Function, FunctionObject,
    QueueBinding, BLOCKING_COMMAND_EXECUTED, BLOCKING_COMMAND_RETURN_EXECUTED,
};
use crate::common::CONFIG;
use crate::interface::{
    EventDescription, EventQueuing, EventReceiver, FunctionDescription, InterfaceProvided,
    InterfaceRequiredDescription, ReceiverObject, Requirement,
};
use crate::mailbox::{CompletionToken, Mailbox, ThreadSignal};

/// One event handler offered to a provided interface during connection.
pub struct EventHandlerEntry {
    pub name: String,
    pub observer: Arc<dyn CommandObject>,
    pub requirement: Requirement,
    /// Set by [`InterfaceProvided::add_observer_list`].
    pub attached: bool,
}

impl Debug for EventHandlerEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlerEntry")
            .field("name", &self.name)
            .field("kind", &self.observer.kind())
            .field("requirement", &self.requirement)
            .field("attached", &self.attached)
            .finish()
    }
}

struct FunctionEntry {
    function: Arc<dyn FunctionObject>,
    requirement: Requirement,
}

struct ReceiverEntry {
    receiver: Arc<dyn ReceiverObject>,
    requirement: Requirement,
}

struct HandlerEntry {
    command: Arc<dyn CommandObject>,
    queued: bool,
}

struct Connection {
    provided: Arc<InterfaceProvided>,
    observers: Vec<(String, Arc<dyn CommandObject>)>,
}

/// Interface through which a component consumes another component's services.
///
/// Functions, event receivers and event handlers are declared up front;
/// [`InterfaceRequired::connect_to`] binds them to a provided interface and
/// [`InterfaceRequired::detach_commands`] undoes the binding.
pub struct InterfaceRequired {
    name: String,
    component_name: String,
    requirement: Requirement,
    mailbox: RwLock<Option<Arc<Mailbox>>>,
    argument_queue_size: AtomicUsize,
    wakeup: Option<Arc<Notify>>,
    functions: [DashMap<String, FunctionEntry>; 6],
    receivers: DashMap<String, ReceiverEntry>,
    handlers: DashMap<String, HandlerEntry>,
    signal: Arc<ThreadSignal>,
    completion_handlers: [(String, Arc<dyn CommandObject>); 2],
    connection: RwLock<Option<Connection>>,
}

impl Debug for InterfaceRequired {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceRequired")
            .field("name", &self.name)
            .field("component", &self.component_name)
            .field("requirement", &self.requirement)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl InterfaceRequired {
    /// Creates a standalone interface with its own mailbox.
    pub fn new(name: impl Into<String>, requirement: Requirement) -> Arc<Self> {
        let name = name.into();
        let mailbox = Mailbox::new(name.clone(), CONFIG.limits.mailbox_size);
        Self::build(name, String::new(), requirement, Some(mailbox), None)
    }

    /// Creates a standalone interface whose handlers all run inline.
    pub fn without_mailbox(name: impl Into<String>, requirement: Requirement) -> Arc<Self> {
        Self::build(name.into(), String::new(), requirement, None, None)
    }

    pub(crate) fn for_component(
        name: impl Into<String>,
        component_name: impl Into<String>,
        requirement: Requirement,
        with_mailbox: bool,
        wakeup: Arc<Notify>,
    ) -> Arc<Self> {
        let name = name.into();
        let mailbox = with_mailbox.then(|| {
            Mailbox::with_wakeup(name.clone(), CONFIG.limits.mailbox_size, wakeup.clone())
        });
        Self::build(name, component_name.into(), requirement, mailbox, Some(wakeup))
    }

    fn build(
        name: String,
        component_name: String,
        requirement: Requirement,
        mailbox: Option<Mailbox>,
        wakeup: Option<Arc<Notify>>,
    ) -> Arc<Self> {
        let signal = Arc::new(ThreadSignal::new(name.clone()));
        let completion_handlers = [BLOCKING_COMMAND_EXECUTED, BLOCKING_COMMAND_RETURN_EXECUTED]
            .map(|event| (event.to_string(), release_handler(event, signal.clone())));
        Arc::new(Self {
            name,
            component_name,
            requirement,
            mailbox: RwLock::new(mailbox.map(Arc::new)),
            argument_queue_size: AtomicUsize::new(CONFIG.limits.argument_queue_size),
            wakeup,
            functions: std::array::from_fn(|_| DashMap::new()),
            receivers: DashMap::new(),
            handlers: DashMap::new(),
            signal,
            completion_handlers,
            connection: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requirement(&self) -> Requirement {
        self.requirement
    }

    /// Name under which this interface appears as a client of a provider.
    pub fn user_name(&self) -> String {
        if self.component_name.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.component_name, self.name)
        }
    }

    pub fn mailbox(&self) -> Option<Arc<Mailbox>> {
        self.mailbox.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.read().is_some()
    }

    /// The provided interface this one is bound to.
    pub fn connected_interface(&self) -> Option<Arc<InterfaceProvided>> {
        self.connection
            .read()
            .as_ref()
            .map(|connection| connection.provided.clone())
    }

    /// Replaces the mailbox with an empty one of `size`.
    ///
    /// Only allowed before connection, on an interface that owns a mailbox.
    pub fn set_mailbox_size(&self, size: usize) -> bool {
        let mut mailbox = self.mailbox.write();
        let Some(current) = mailbox.as_ref() else {
            warn!(interface = %self.name, "interface has no mailbox to resize");
            return false;
        };
        if self.is_connected() {
            error!(interface = %self.name, "mailbox cannot be resized once connected");
            return false;
        }
        let name = current.name().to_string();
        *mailbox = Some(Arc::new(match &self.wakeup {
            Some(wakeup) => Mailbox::with_wakeup(name, size, wakeup.clone()),
            None => Mailbox::new(name, size),
        }));
        true
    }

    /// Sets the pending-argument bound of queued event handlers.
    pub fn set_argument_queues_size(&self, size: usize) -> bool {
        if self.mailbox.read().is_none() {
            warn!(interface = %self.name, "interface has no mailbox, argument queues are unused");
            return false;
        }
        if self.is_connected() {
            error!(interface = %self.name, "argument queues cannot be resized once connected");
            return false;
        }
        self.argument_queue_size.store(size, Ordering::Release);
        true
    }

    /// Declares a function to be bound at connection time.
    pub fn add_function<A: Argument, R: Argument>(
        &self,
        name: &str,
        function: &Arc<Function<A, R>>,
        requirement: Requirement,
    ) -> bool {
        self.add_function_object(name, function.clone(), requirement)
    }

    /// Declares a type-erased function.
    pub fn add_function_object(
        &self,
        name: &str,
        function: Arc<dyn FunctionObject>,
        requirement: Requirement,
    ) -> bool {
        if self.is_connected() {
            error!(interface = %self.name, function = name, "functions cannot be added once connected");
            return false;
        }
        match self.functions[function.kind().index()].entry(name.to_string()) {
            Entry::Occupied(_) => {
                error!(interface = %self.name, function = name, "a function with this name already exists");
                false
            }
            Entry::Vacant(slot) => {
                function.install_signal(self.signal.clone());
                slot.insert(FunctionEntry {
                    function,
                    requirement,
                });
                true
            }
        }
    }

    /// Typed lookup of a declared function.
    pub fn function<A: Argument, R: Argument>(
        &self,
        kind: CommandKind,
        name: &str,
    ) -> Option<Arc<Function<A, R>>> {
        let function = self.functions[kind.index()].get(name)?.function.clone();
        function.as_any().downcast::<Function<A, R>>().ok()
    }

    /// Binding state of a declared function; `None` when undeclared.
    pub fn is_function_valid(&self, kind: CommandKind, name: &str) -> Option<bool> {
        self.functions[kind.index()]
            .get(name)
            .map(|entry| entry.function.is_valid())
    }

    pub fn names_of_functions(&self, kind: CommandKind) -> Vec<String> {
        let mut names: Vec<String> = self.functions[kind.index()]
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn add_event_receiver_void(
        &self,
        name: &str,
        requirement: Requirement,
    ) -> Option<Arc<EventReceiver<()>>> {
        self.add_receiver(EventReceiver::void(name), requirement)
    }

    pub fn add_event_receiver_write<A: Argument>(
        &self,
        name: &str,
        requirement: Requirement,
    ) -> Option<Arc<EventReceiver<A>>> {
        self.add_receiver(EventReceiver::<A>::write(name), requirement)
    }

    fn add_receiver<A: Argument>(
        &self,
        receiver: Arc<EventReceiver<A>>,
        requirement: Requirement,
    ) -> Option<Arc<EventReceiver<A>>> {
        if self.is_connected() {
            error!(interface = %self.name, event = receiver.name(), "receivers cannot be added once connected");
            return None;
        }
        match self.receivers.entry(receiver.name().to_string()) {
            Entry::Occupied(_) => {
                error!(interface = %self.name, event = receiver.name(), "a receiver with this name already exists");
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(ReceiverEntry {
                    receiver: receiver.clone(),
                    requirement,
                });
                Some(receiver)
            }
        }
    }

    /// Resolves the queuing of one handler against the interface's mailbox.
    fn use_queue(&self, queuing: EventQueuing, handler: &str) -> bool {
        let has_mailbox = self.mailbox.read().is_some();
        match (has_mailbox, queuing) {
            (true, EventQueuing::NotQueued) => false,
            (true, _) => true,
            (false, EventQueuing::Queued) => {
                error!(interface = %self.name, handler, "queued event handler on an interface without a mailbox, it will run inline");
                false
            }
            (false, _) => false,
        }
    }

    /// Declares a handler for a void event.
    ///
    /// The returned command can be disabled to ignore the event temporarily.
    pub fn add_event_handler_void<F, Fut>(
        &self,
        name: &str,
        queuing: EventQueuing,
        body: F,
    ) -> Option<Arc<CommandVoid>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_handler(Command::void(name, body), queuing)
    }

    /// Declares a handler for a write event.
    pub fn add_event_handler_write<A, F, Fut>(
        &self,
        name: &str,
        queuing: EventQueuing,
        body: F,
    ) -> Option<Arc<CommandWrite<A>>>
    where
        A: Argument,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_handler(Command::write(name, body), queuing)
    }

    fn add_handler<A: Argument>(
        &self,
        command: Command<A, ()>,
        queuing: EventQueuing,
    ) -> Option<Arc<Command<A, ()>>> {
        if self.is_connected() {
            error!(interface = %self.name, handler = command.name(), "handlers cannot be added once connected");
            return None;
        }
        let queued = self.use_queue(queuing, command.name());
        match self.handlers.entry(command.name().to_string()) {
            Entry::Occupied(_) => {
                error!(interface = %self.name, handler = command.name(), "a handler with this name already exists");
                None
            }
            Entry::Vacant(slot) => {
                let command = Arc::new(command);
                slot.insert(HandlerEntry {
                    command: command.clone(),
                    queued,
                });
                Some(command)
            }
        }
    }

    pub fn enable_all_events(&self) {
        for entry in self.handlers.iter() {
            entry.command.enable();
        }
    }

    pub fn disable_all_events(&self) {
        for entry in self.handlers.iter() {
            entry.command.disable();
        }
    }

    // Handlers are rebound to the current mailbox at every connection.
    fn resolve_handler(&self, entry: &HandlerEntry) -> Arc<dyn CommandObject> {
        if !entry.queued {
            return entry.command.clone();
        }
        match self.mailbox() {
            Some(mailbox) => entry.command.with_queue(QueueBinding::new(
                Some(mailbox),
                self.argument_queue_size.load(Ordering::Acquire),
                None,
            )),
            None => entry.command.clone(),
        }
    }

    /// Builds the observer list offered to a provided interface.
    ///
    /// Receivers carry their own requirement and pick up the handler of the
    /// same name. Handlers without a receiver and the completion handlers
    /// are optional.
    fn event_handler_list(&self) -> Vec<EventHandlerEntry> {
        let mut list = Vec::new();
        for entry in self.receivers.iter() {
            if let Some(handler) = self.handlers.get(entry.key()) {
                entry
                    .receiver
                    .set_handler_object(self.resolve_handler(handler.value()));
            }
            list.push(EventHandlerEntry {
                name: entry.key().clone(),
                observer: entry.receiver.observer(),
                requirement: entry.requirement,
                attached: false,
            });
        }
        for entry in self.handlers.iter() {
            if self.receivers.contains_key(entry.key()) {
                continue;
            }
            list.push(EventHandlerEntry {
                name: entry.key().clone(),
                observer: self.resolve_handler(entry.value()),
                requirement: Requirement::Optional,
                attached: false,
            });
        }
        for (name, handler) in &self.completion_handlers {
            list.push(EventHandlerEntry {
                name: name.clone(),
                observer: handler.clone(),
                requirement: Requirement::Optional,
                attached: false,
            });
        }
        list
    }

    fn bind_functions(&self, provided: &InterfaceProvided) -> bool {
        let mut success = true;
        for kind in CommandKind::ALL {
            for entry in self.functions[kind.index()].iter() {
                match provided.command(kind, entry.key()) {
                    Some(command) => {
                        if !entry.function.bind(command) {
                            error!(interface = %self.name, function = %entry.key(), "function could not be bound");
                            success = false;
                        }
                    }
                    None => {
                        entry.function.detach();
                        match entry.requirement {
                            Requirement::Required => {
                                error!(interface = %self.name, provided = provided.name(), function = %entry.key(), %kind, "required function has no matching command");
                                success = false;
                            }
                            Requirement::Optional => {
                                debug!(interface = %self.name, function = %entry.key(), "optional function left unbound");
                            }
                        }
                    }
                }
            }
        }
        success
    }

    fn detach_functions(&self) {
        for map in &self.functions {
            for entry in map.iter() {
                entry.function.detach();
            }
        }
    }

    /// Binds every function and attaches every handler to `provided`.
    ///
    /// Either the whole binding succeeds, or all functions end up unbound
    /// and the handlers attached by this attempt are removed again.
    #[instrument(skip(self, provided), fields(interface = %self.name, provided = provided.name()))]
    pub fn connect_to(&self, provided: &Arc<InterfaceProvided>) -> bool {
        if self.is_connected() {
            error!("interface is already connected");
            return false;
        }
        let Some(end_user) = provided.end_user_interface(&self.user_name()) else {
            error!("provided interface refused to create an end-user interface");
            return false;
        };

        let functions_bound = self.bind_functions(&end_user);
        let mut events = self.event_handler_list();
        let events_attached = end_user.add_observer_list(&mut events);
        let attached: Vec<(String, Arc<dyn CommandObject>)> = events
            .into_iter()
            .filter(|entry| entry.attached)
            .map(|entry| (entry.name, entry.observer))
            .collect();

        if !(functions_bound && events_attached) {
            for (name, observer) in &attached {
                end_user.remove_observer(name, observer);
            }
            self.detach_functions();
            if !Arc::ptr_eq(provided, &end_user) {
                provided.release_end_user(&end_user);
            }
            error!("connection failed, binding rolled back");
            return false;
        }

        *self.connection.write() = Some(Connection {
            provided: end_user,
            observers: attached,
        });
        info!("connected");
        true
    }

    /// Drops the connection and unbinds every function. Idempotent.
    pub fn detach_commands(&self) {
        let connection = self.connection.write().take();
        self.detach_functions();
        if let Some(connection) = connection {
            for (name, observer) in &connection.observers {
                connection.provided.remove_observer(name, observer);
            }
            connection.provided.release_from_factory();
            debug!(interface = %self.name, provided = connection.provided.name(), "detached");
        }
    }

    /// Drains the interface's own mailbox of queued event handlers.
    pub async fn process_mailbox(&self) -> usize {
        match self.mailbox() {
            Some(mailbox) => mailbox.drain().await,
            None => 0,
        }
    }

    /// Blocking calls currently waiting on this interface's signal.
    pub fn pending_blocking_calls(&self) -> usize {
        self.signal.pending()
    }

    pub fn get_description(&self) -> InterfaceRequiredDescription {
        let mut functions = Vec::new();
        for kind in CommandKind::ALL {
            for entry in self.functions[kind.index()].iter() {
                functions.push(FunctionDescription {
                    name: entry.key().clone(),
                    kind,
                    requirement: entry.requirement,
                });
            }
        }
        functions.sort_by(|a, b| (a.kind.index(), &a.name).cmp(&(b.kind.index(), &b.name)));

        let mut event_handlers: Vec<EventDescription> = self
            .handlers
            .iter()
            .map(|entry| EventDescription {
                name: entry.key().clone(),
                kind: entry.command.kind(),
                argument: entry.command.argument_prototype(),
            })
            .collect();
        for entry in self.receivers.iter() {
            if !self.handlers.contains_key(entry.key()) {
                event_handlers.push(EventDescription {
                    name: entry.key().clone(),
                    kind: entry.receiver.kind(),
                    argument: entry.receiver.observer().argument_prototype(),
                });
            }
        }
        event_handlers.sort_by(|a, b| a.name.cmp(&b.name));

        InterfaceRequiredDescription {
            interface_name: self.name.clone(),
            requirement: self.requirement,
            functions,
            event_handlers,
        }
    }
}

fn release_handler(event: &str, signal: Arc<ThreadSignal>) -> Arc<dyn CommandObject> {
    Arc::new(CommandWrite::<CompletionToken>::write(event, move |token| {
        let signal = signal.clone();
        async move {
            signal.raise(&token);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{FunctionRead, FunctionWrite};
    use crate::common::ExecutionResult;
    use crate::interface::{CommandQueuing, QueuingPolicy};

    fn thermometer() -> Arc<InterfaceProvided> {
        let provided = InterfaceProvided::new("P", QueuingPolicy::CommandsShouldNotBeQueued);
        provided.add_command_read("GetTemp", || async { 21.0_f64 });
        provided.add_command_write("SetGain", CommandQueuing::InterfacePolicy, |_: f64| async {});
        provided
    }

    #[test]
    fn missing_required_function_leaves_everything_unbound() {
        let provided = thermometer();
        let required = InterfaceRequired::without_mailbox("R", Requirement::Required);
        let get_temp = FunctionRead::<f64>::read();
        let missing = FunctionWrite::<u8>::write();
        required.add_function("GetTemp", &get_temp, Requirement::Required);
        required.add_function("Calibrate", &missing, Requirement::Required);

        assert!(!required.connect_to(&provided));
        assert!(!get_temp.is_valid());
        assert!(!required.is_connected());
    }

    #[test]
    fn missing_optional_function_is_tolerated() {
        let provided = thermometer();
        let required = InterfaceRequired::without_mailbox("R", Requirement::Required);
        let get_temp = FunctionRead::<f64>::read();
        let missing = FunctionWrite::<u8>::write();
        required.add_function("GetTemp", &get_temp, Requirement::Required);
        required.add_function("Calibrate", &missing, Requirement::Optional);

        assert!(required.connect_to(&provided));
        assert!(get_temp.is_valid());
        assert!(!missing.is_valid());
    }

    #[tokio::test]
    async fn optional_read_stays_unbound_against_a_write_only_provider() {
        let provided = InterfaceProvided::new("P", QueuingPolicy::CommandsShouldNotBeQueued);
        provided.add_command_write("SetGain", CommandQueuing::InterfacePolicy, |_: f64| async {});
        let required = InterfaceRequired::without_mailbox("R", Requirement::Required);
        let set_gain = FunctionWrite::<f64>::write();
        let get_temp = FunctionRead::<f64>::read();
        required.add_function("SetGain", &set_gain, Requirement::Required);
        required.add_function("GetTemp", &get_temp, Requirement::Optional);

        assert!(required.connect_to(&provided));
        assert!(set_gain.is_valid());
        assert!(!get_temp.is_valid());
        assert_eq!(set_gain.execute(&2.0).await, ExecutionResult::Ok);
        assert_eq!(get_temp.get().await, Err(ExecutionResult::FunctionNotBound));
    }

    #[test]
    fn type_mismatch_fails_even_when_optional() {
        let provided = thermometer();
        let required = InterfaceRequired::without_mailbox("R", Requirement::Required);
        let wrong = FunctionWrite::<String>::write();
        required.add_function("SetGain", &wrong, Requirement::Optional);
        assert!(!required.connect_to(&provided));
    }

    #[test]
    fn queued_handler_without_mailbox_degrades_to_inline() {
        let required = InterfaceRequired::without_mailbox("R", Requirement::Optional);
        let handler = required
            .add_event_handler_void("Tick", EventQueuing::Queued, || async {})
            .expect("handler");
        assert!(!handler.is_queued());
        let list = required.event_handler_list();
        let entry = list.iter().find(|e| e.name == "Tick").expect("listed");
        assert!(!entry.observer.is_queued());
    }

    #[test]
    fn resizing_rules() {
        let without = InterfaceRequired::without_mailbox("R", Requirement::Optional);
        assert!(!without.set_mailbox_size(4));
        assert!(!without.set_argument_queues_size(4));

        let with = InterfaceRequired::new("R", Requirement::Optional);
        assert!(with.set_mailbox_size(4));
        assert_eq!(with.mailbox().map(|m| m.capacity()), Some(4));

        assert!(with.connect_to(&thermometer()));
        assert!(!with.set_mailbox_size(8));
        assert!(!with.set_argument_queues_size(8));
    }

    #[test]
    fn detach_is_idempotent() {
        let provided = thermometer();
        let required = InterfaceRequired::without_mailbox("R", Requirement::Required);
        let get_temp = FunctionRead::<f64>::read();
        required.add_function("GetTemp", &get_temp, Requirement::Required);
        assert!(required.connect_to(&provided));
        required.detach_commands();
        required.detach_commands();
        assert!(!get_temp.is_valid());
        assert!(!required.is_connected());
    }
}
