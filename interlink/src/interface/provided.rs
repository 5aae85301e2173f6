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
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use crate::argument::Argument;
use crate::command::{
    downcast_event, Command, CommandKind, CommandObject, CompletionEvents, EventObject, EventVoid,
    EventWrite, MulticastEvent, QueueBinding,
};
use crate::common::{CommandMap, EventMap, CONFIG};
use crate::interface::{
    CommandDescription, CommandQueuing, EventDescription, EventHandlerEntry,
    InterfaceProvidedDescription, QueuingPolicy, Requirement,
};
use crate::mailbox::Mailbox;

#[derive(Debug, Clone, Copy)]
struct QueueSizes {
    mailbox: usize,
    arguments: usize,
}

/// Interface through which a component publishes commands and events.
///
/// With [`QueuingPolicy::CommandsShouldBeQueued`] the interface acts as a
/// factory: every client connects to its own end-user copy named
/// `Name[user]`, holding a private mailbox and queued copies of the
/// commands. Read and qualified read commands, as well as user events, stay
/// on the factory and are reached through the end-user copy.
pub struct InterfaceProvided {
    name: String,
    component_name: String,
    policy: QueuingPolicy,
    original: Option<Weak<InterfaceProvided>>,
    commands: [CommandMap; 6],
    events: EventMap,
    completion: Arc<CompletionEvents>,
    end_users: Mutex<Vec<Arc<InterfaceProvided>>>,
    mailbox: Option<Arc<Mailbox>>,
    wakeup: Option<Arc<Notify>>,
    sizes: RwLock<QueueSizes>,
}

impl Debug for InterfaceProvided {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceProvided")
            .field("name", &self.name)
            .field("component", &self.component_name)
            .field("policy", &self.policy)
            .field("end_user", &self.is_end_user())
            .finish_non_exhaustive()
    }
}

impl InterfaceProvided {
    /// Creates an interface that is not owned by a component.
    ///
    /// End-user mailboxes of such an interface are drained with
    /// [`InterfaceProvided::process_mailboxes`].
    pub fn new(name: impl Into<String>, policy: QueuingPolicy) -> Arc<Self> {
        Self::build(name.into(), String::new(), policy, None)
    }

    pub(crate) fn for_component(
        name: impl Into<String>,
        component_name: impl Into<String>,
        policy: QueuingPolicy,
        wakeup: Arc<Notify>,
    ) -> Arc<Self> {
        Self::build(name.into(), component_name.into(), policy, Some(wakeup))
    }

    fn build(
        name: String,
        component_name: String,
        policy: QueuingPolicy,
        wakeup: Option<Arc<Notify>>,
    ) -> Arc<Self> {
        let interface = Self {
            name,
            component_name,
            policy,
            original: None,
            commands: std::array::from_fn(|_| DashMap::new()),
            events: DashMap::new(),
            completion: Arc::new(CompletionEvents::new()),
            end_users: Mutex::new(Vec::new()),
            mailbox: None,
            wakeup,
            sizes: RwLock::new(QueueSizes {
                mailbox: CONFIG.limits.end_user_mailbox_size,
                arguments: CONFIG.limits.argument_queue_size,
            }),
        };
        // A factory is never connected directly, so only direct interfaces
        // publish the completion events.
        if policy == QueuingPolicy::CommandsShouldNotBeQueued {
            interface.register_completion_events();
        }
        Arc::new(interface)
    }

    fn register_completion_events(&self) {
        for event in self.completion.events() {
            self.events.insert(event.name().to_string(), event);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    pub fn queuing_policy(&self) -> QueuingPolicy {
        self.policy
    }

    /// `true` for the per-client copies created by a queued interface.
    pub fn is_end_user(&self) -> bool {
        self.original.is_some()
    }

    fn is_factory(&self) -> bool {
        self.policy == QueuingPolicy::CommandsShouldBeQueued && !self.is_end_user()
    }

    fn original(&self) -> Option<Arc<InterfaceProvided>> {
        self.original.as_ref().and_then(Weak::upgrade)
    }

    pub fn mailbox(&self) -> Option<Arc<Mailbox>> {
        self.mailbox.clone()
    }

    /// Overrides the sizes used for end-user copies created from now on.
    pub fn set_queue_sizes(&self, mailbox: usize, arguments: usize) {
        *self.sizes.write() = QueueSizes { mailbox, arguments };
    }

    /// Resolves the queuing of one command against the interface policy.
    fn use_queue(&self, queuing: CommandQueuing, command: &str) -> bool {
        match (self.policy, queuing) {
            (QueuingPolicy::CommandsShouldBeQueued, CommandQueuing::NotQueued) => {
                debug!(interface = %self.name, command, "command bypasses the interface queue");
                false
            }
            (QueuingPolicy::CommandsShouldBeQueued, _) => true,
            (QueuingPolicy::CommandsShouldNotBeQueued, CommandQueuing::Queued) => {
                error!(interface = %self.name, command, "interface does not queue commands, command will run inline");
                false
            }
            (QueuingPolicy::CommandsShouldNotBeQueued, _) => false,
        }
    }

    /// Adds a command. Fails on a duplicate name within the same kind.
    #[instrument(skip(self, command), fields(interface = %self.name, command = command.name()))]
    pub fn add_command<A: Argument, R: Argument>(
        &self,
        command: Command<A, R>,
        queuing: CommandQueuing,
    ) -> bool {
        if self.is_end_user() {
            error!("commands cannot be added to an end-user interface");
            return false;
        }
        let kind = command.kind();
        let queued = kind.is_queueable() && self.use_queue(queuing, command.name());
        match self.commands[kind.index()].entry(command.name().to_string()) {
            Entry::Occupied(_) => {
                error!(%kind, "a command with this name already exists");
                false
            }
            Entry::Vacant(slot) => {
                let command: Arc<dyn CommandObject> = if queued {
                    Arc::new(command.rebound(QueueBinding::detached()))
                } else {
                    Arc::new(command)
                };
                slot.insert(command);
                true
            }
        }
    }

    pub fn add_command_void<F, Fut>(&self, name: &str, queuing: CommandQueuing, body: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_command(Command::void(name, body), queuing)
    }

    pub fn add_command_void_return<R, F, Fut>(
        &self,
        name: &str,
        queuing: CommandQueuing,
        body: F,
    ) -> bool
    where
        R: Argument,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        self.add_command(Command::void_return(name, body), queuing)
    }

    pub fn add_command_write<A, F, Fut>(&self, name: &str, queuing: CommandQueuing, body: F) -> bool
    where
        A: Argument,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_command(Command::write(name, body), queuing)
    }

    pub fn add_command_write_return<A, R, F, Fut>(
        &self,
        name: &str,
        queuing: CommandQueuing,
        body: F,
    ) -> bool
    where
        A: Argument,
        R: Argument,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        self.add_command(Command::write_return(name, body), queuing)
    }

    /// Read commands always run in the caller's task.
    pub fn add_command_read<R, F, Fut>(&self, name: &str, body: F) -> bool
    where
        R: Argument,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        self.add_command(Command::read(name, body), CommandQueuing::NotQueued)
    }

    pub fn add_command_qualified_read<A, R, F, Fut>(&self, name: &str, body: F) -> bool
    where
        A: Argument,
        R: Argument,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        self.add_command(Command::qualified_read(name, body), CommandQueuing::NotQueued)
    }

    /// Looks up a command for binding.
    ///
    /// A factory refuses lookups of queueable kinds: those must go through an
    /// end-user copy so they land in a client's own mailbox.
    pub fn command(&self, kind: CommandKind, name: &str) -> Option<Arc<dyn CommandObject>> {
        if !kind.is_queueable() {
            if let Some(original) = self.original() {
                return original.command(kind, name);
            }
        } else if self.is_factory() {
            error!(interface = %self.name, command = name, "queued commands are only reachable through an end-user interface");
            return None;
        }
        self.commands[kind.index()]
            .get(name)
            .map(|entry| entry.value().clone())
    }

    /// Sorted command names of one kind.
    pub fn names_of_commands(&self, kind: CommandKind) -> Vec<String> {
        if !kind.is_queueable() {
            if let Some(original) = self.original() {
                return original.names_of_commands(kind);
            }
        }
        let mut names: Vec<String> = self.commands[kind.index()]
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn add_event_void(&self, name: &str) -> Option<Arc<EventVoid>> {
        self.add_event(Arc::new(EventVoid::void(name)))
    }

    pub fn add_event_write<A: Argument>(&self, name: &str) -> Option<Arc<EventWrite<A>>> {
        self.add_event(Arc::new(EventWrite::<A>::write(name)))
    }

    // Void and write events share one namespace.
    fn add_event<A: Argument>(
        &self,
        event: Arc<MulticastEvent<A>>,
    ) -> Option<Arc<MulticastEvent<A>>> {
        if self.is_end_user() {
            error!(interface = %self.name, "events cannot be added to an end-user interface");
            return None;
        }
        match self.events.entry(event.name().to_string()) {
            Entry::Occupied(existing) => {
                error!(interface = %self.name, event = event.name(), existing = %existing.get().kind(), "an event with this name already exists");
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(event.clone());
                Some(event)
            }
        }
    }

    /// Looks up an event, falling back to the factory for end-user copies.
    pub fn event(&self, name: &str) -> Option<Arc<dyn EventObject>> {
        self.events
            .get(name)
            .map(|entry| entry.value().clone())
            .or_else(|| self.original().and_then(|original| original.event(name)))
    }

    /// Typed lookup of a write event.
    pub fn event_write<A: Argument>(&self, name: &str) -> Option<Arc<EventWrite<A>>> {
        self.event(name).and_then(downcast_event::<A>)
    }

    pub fn event_void(&self, name: &str) -> Option<Arc<EventVoid>> {
        self.event(name).and_then(downcast_event::<()>)
    }

    /// Sorted event names of one kind.
    pub fn names_of_events(&self, kind: CommandKind) -> Vec<String> {
        if let Some(original) = self.original() {
            return original.names_of_events(kind);
        }
        let mut names: Vec<String> = self
            .events
            .iter()
            .filter(|entry| entry.value().kind() == kind)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Attaches `observer` to the event `name`.
    pub fn add_observer(&self, name: &str, observer: Arc<dyn CommandObject>) -> bool {
        let Some(event) = self.event(name) else {
            debug!(interface = %self.name, event = name, "no such event");
            return false;
        };
        if event.kind() != observer.kind() {
            error!(interface = %self.name, event = name, expected = %event.kind(), found = %observer.kind(), "event handler kind mismatch");
            return false;
        }
        event.add_observer_object(observer)
    }

    pub fn remove_observer(&self, name: &str, observer: &Arc<dyn CommandObject>) -> bool {
        self.event(name)
            .is_some_and(|event| event.remove_observer_object(observer))
    }

    /// Attaches every handler of `list`, marking each entry that succeeded.
    ///
    /// Returns `false` when a required entry could not be attached.
    pub fn add_observer_list(&self, list: &mut [EventHandlerEntry]) -> bool {
        let mut success = true;
        for entry in list.iter_mut() {
            entry.attached = self.add_observer(&entry.name, entry.observer.clone());
            if !entry.attached {
                match entry.requirement {
                    Requirement::Required => {
                        error!(interface = %self.name, event = %entry.name, "required event handler could not be attached");
                        success = false;
                    }
                    Requirement::Optional => {
                        debug!(interface = %self.name, event = %entry.name, "optional event handler not attached");
                    }
                }
            }
        }
        success
    }

    /// Returns the interface a client named `user` should connect to.
    ///
    /// Interfaces that do not queue serve every client directly. A factory
    /// creates a new copy with its own mailbox for each call.
    #[instrument(skip(self))]
    pub fn end_user_interface(self: &Arc<Self>, user: &str) -> Option<Arc<InterfaceProvided>> {
        if self.is_end_user() {
            error!(interface = %self.name, "end-user interfaces cannot create further copies");
            return None;
        }
        if !self.is_factory() {
            return Some(self.clone());
        }
        let sizes = *self.sizes.read();
        let name = format!("{}[{}]", self.name, user);
        let mailbox = Arc::new(match &self.wakeup {
            Some(wakeup) => Mailbox::with_wakeup(name.clone(), sizes.mailbox, wakeup.clone()),
            None => Mailbox::new(name.clone(), sizes.mailbox),
        });
        let completion = Arc::new(CompletionEvents::new());

        let end_user = Self {
            name,
            component_name: self.component_name.clone(),
            policy: self.policy,
            original: Some(Arc::downgrade(self)),
            commands: std::array::from_fn(|_| DashMap::new()),
            events: DashMap::new(),
            completion: completion.clone(),
            end_users: Mutex::new(Vec::new()),
            mailbox: Some(mailbox.clone()),
            wakeup: self.wakeup.clone(),
            sizes: RwLock::new(sizes),
        };
        end_user.register_completion_events();

        for kind in CommandKind::ALL.into_iter().filter(|k| k.is_queueable()) {
            for entry in self.commands[kind.index()].iter() {
                let command = if entry.value().is_queued() {
                    entry.value().with_queue(QueueBinding::new(
                        Some(mailbox.clone()),
                        sizes.arguments,
                        Some(completion.clone()),
                    ))
                } else {
                    entry.value().clone()
                };
                end_user.commands[kind.index()].insert(entry.key().clone(), command);
            }
        }

        let end_user = Arc::new(end_user);
        self.end_users.lock().push(end_user.clone());
        info!(end_user = %end_user.name, "end-user interface created");
        Some(end_user)
    }

    /// Forgets an end-user copy, typically after its client disconnected.
    pub fn release_end_user(&self, end_user: &Arc<InterfaceProvided>) -> bool {
        let mut end_users = self.end_users.lock();
        let before = end_users.len();
        end_users.retain(|existing| !Arc::ptr_eq(existing, end_user));
        end_users.len() != before
    }

    /// Removes an end-user copy from the factory that created it.
    pub(crate) fn release_from_factory(self: &Arc<Self>) -> bool {
        self.original()
            .is_some_and(|original| original.release_end_user(self))
    }

    pub fn end_user_count(&self) -> usize {
        self.end_users.lock().len()
    }

    /// Drains this interface's mailbox and those of all its end-user copies.
    pub async fn process_mailboxes(&self) -> usize {
        let mut executed = 0;
        if let Some(mailbox) = &self.mailbox {
            executed += mailbox.drain().await;
        }
        let end_users = self.end_users.lock().clone();
        for end_user in end_users {
            if let Some(mailbox) = &end_user.mailbox {
                executed += mailbox.drain().await;
            }
        }
        executed
    }

    /// Describes commands and events with their argument prototypes.
    pub fn get_description(&self) -> InterfaceProvidedDescription {
        if let Some(original) = self.original() {
            return original.get_description();
        }
        let mut commands = Vec::new();
        for kind in CommandKind::ALL {
            for entry in self.commands[kind.index()].iter() {
                commands.push(CommandDescription {
                    name: entry.key().clone(),
                    kind,
                    argument: entry.value().argument_prototype(),
                    result: entry.value().result_prototype(),
                });
            }
        }
        commands.sort_by(|a, b| (a.kind.index(), &a.name).cmp(&(b.kind.index(), &b.name)));

        let mut events: Vec<EventDescription> = self
            .events
            .iter()
            .map(|entry| EventDescription {
                name: entry.key().clone(),
                kind: entry.value().kind(),
                argument: entry.value().argument_prototype(),
            })
            .collect();
        events.sort_by(|a, b| a.name.cmp(&b.name));

        if commands.is_empty() && events.is_empty() {
            warn!(interface = %self.name, "describing an empty interface");
        }
        InterfaceProvidedDescription {
            interface_name: self.name.clone(),
            commands,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandWrite, BLOCKING_COMMAND_EXECUTED};

    #[test]
    fn duplicate_command_in_same_kind_is_refused() {
        let interface = InterfaceProvided::new("P", QueuingPolicy::CommandsShouldNotBeQueued);
        assert!(interface.add_command_void("Reset", CommandQueuing::InterfacePolicy, || async {}));
        assert!(!interface.add_command_void("Reset", CommandQueuing::InterfacePolicy, || async {}));
        assert!(interface.add_command_read("Reset", || async { 1_u8 }));
    }

    #[test]
    fn void_and_write_event_cannot_share_a_name() {
        let interface = InterfaceProvided::new("P", QueuingPolicy::CommandsShouldNotBeQueued);
        assert!(interface.add_event_void("Changed").is_some());
        assert!(interface.add_event_write::<f64>("Changed").is_none());
    }

    #[test]
    fn factory_hides_queueable_commands() {
        let interface = InterfaceProvided::new("P", QueuingPolicy::CommandsShouldBeQueued);
        interface.add_command_write("SetGain", CommandQueuing::InterfacePolicy, |_: f64| async {});
        interface.add_command_read("GetTemp", || async { 20.0_f64 });
        assert!(interface.command(CommandKind::Write, "SetGain").is_none());
        assert!(interface.command(CommandKind::Read, "GetTemp").is_some());
    }

    #[test]
    fn end_user_copy_queues_commands_and_forwards_reads() {
        let interface = InterfaceProvided::new("P", QueuingPolicy::CommandsShouldBeQueued);
        interface.add_command_write("SetGain", CommandQueuing::InterfacePolicy, |_: f64| async {});
        interface.add_command_void("Ping", CommandQueuing::NotQueued, || async {});
        interface.add_command_read("GetTemp", || async { 20.0_f64 });

        let end_user = interface.end_user_interface("C.R").expect("end user");
        assert_eq!(end_user.name(), "P[C.R]");
        assert!(end_user.mailbox().is_some());
        let set_gain = end_user.command(CommandKind::Write, "SetGain").expect("copied");
        assert!(set_gain.is_queued());
        let ping = end_user.command(CommandKind::Void, "Ping").expect("copied");
        assert!(!ping.is_queued());
        assert!(end_user.command(CommandKind::Read, "GetTemp").is_some());
        assert!(end_user.event(BLOCKING_COMMAND_EXECUTED).is_some());
        assert_eq!(interface.end_user_count(), 1);
    }

    #[test]
    fn observer_kind_must_match_event() {
        let interface = InterfaceProvided::new("P", QueuingPolicy::CommandsShouldNotBeQueued);
        interface.add_event_void("Tick");
        let write: Arc<dyn CommandObject> =
            Arc::new(CommandWrite::<u8>::write("Tick", |_| async {}));
        assert!(!interface.add_observer("Tick", write));
    }

    #[test]
    fn description_lists_prototypes() {
        let interface = InterfaceProvided::new("P", QueuingPolicy::CommandsShouldNotBeQueued);
        interface.add_command_write("SetGain", CommandQueuing::InterfacePolicy, |_: f64| async {});
        interface.add_event_write::<String>("Message");
        let description = interface.get_description();
        assert_eq!(description.command_names(CommandKind::Write), vec!["SetGain"]);
        let set_gain = &description.commands[0];
        assert!(set_gain.argument.is_some());
        assert!(set_gain.result.is_none());
        assert!(description.events.iter().any(|e| e.name == "Message" && e.argument.is_some()));
    }
}
