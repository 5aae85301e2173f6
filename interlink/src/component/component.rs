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
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use static_assertions::assert_impl_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, trace, warn};

use crate::command::EventWrite;
use crate::common::CONFIG;
use crate::component::{ComponentState, ComponentStateChange};
use crate::interface::{CommandQueuing, InterfaceProvided, InterfaceRequired, QueuingPolicy, Requirement};
use crate::manager::names::{
    CHANGE_STATE, COMPONENT_GET_STATE, COMPONENT_RESUME, COMPONENT_STOP, INTERFACE_INTERNAL,
};

/// Hooks a component runs at lifecycle transitions.
///
/// Every method has an empty default, so implementors only override what
/// they need.
#[async_trait]
pub trait ComponentBehavior: Send + Sync + 'static {
    /// Runs once, before the component task starts.
    async fn startup(&self, _component: &Arc<Component>) {}

    /// Applies a configuration argument; `false` rejects it.
    async fn configure(&self, _component: &Arc<Component>, _argument: &str) -> bool {
        true
    }

    /// Runs once, after the component task has stopped.
    async fn cleanup(&self, _component: &Arc<Component>) {}
}

/// A unit of behavior with its own task, interfaces and lifecycle.
///
/// Queued commands and queued event handlers addressed to the component land
/// in the mailboxes of its interfaces. Every push wakes the component task,
/// which drains all mailboxes while the component is
/// [`ComponentState::Active`].
pub struct Component {
    name: String,
    process_name: RwLock<String>,
    state: RwLock<ComponentState>,
    provided: DashMap<String, Arc<InterfaceProvided>>,
    required: DashMap<String, Arc<InterfaceRequired>>,
    wakeup: Arc<Notify>,
    cancellation_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    behavior: Option<Arc<dyn ComponentBehavior>>,
    state_event: RwLock<Option<Arc<EventWrite<ComponentStateChange>>>>,
}

impl Debug for Component {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("process", &*self.process_name.read())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Component {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), None)
    }

    pub fn with_behavior(name: impl Into<String>, behavior: impl ComponentBehavior) -> Arc<Self> {
        Self::build(name.into(), Some(Arc::new(behavior)))
    }

    fn build(name: String, behavior: Option<Arc<dyn ComponentBehavior>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            process_name: RwLock::new(String::new()),
            state: RwLock::new(ComponentState::Constructed),
            provided: DashMap::new(),
            required: DashMap::new(),
            wakeup: Arc::new(Notify::new()),
            cancellation_token: CancellationToken::new(),
            task: Mutex::new(None),
            behavior,
            state_event: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process_name(&self) -> String {
        self.process_name.read().clone()
    }

    pub(crate) fn set_process_name(&self, process_name: &str) {
        *self.process_name.write() = process_name.to_string();
    }

    pub fn state(&self) -> ComponentState {
        *self.state.read()
    }

    pub fn add_interface_provided(
        &self,
        name: &str,
        policy: QueuingPolicy,
    ) -> Option<Arc<InterfaceProvided>> {
        match self.provided.entry(name.to_string()) {
            Entry::Occupied(_) => {
                error!(component = %self.name, interface = name, "provided interface already exists");
                None
            }
            Entry::Vacant(slot) => {
                let interface =
                    InterfaceProvided::for_component(name, &self.name, policy, self.wakeup.clone());
                slot.insert(interface.clone());
                Some(interface)
            }
        }
    }

    /// Adds a required interface with its own mailbox for queued handlers.
    pub fn add_interface_required(
        &self,
        name: &str,
        requirement: Requirement,
    ) -> Option<Arc<InterfaceRequired>> {
        self.insert_required(name, requirement, true)
    }

    /// Adds a required interface whose handlers all run inline.
    pub fn add_interface_required_without_mailbox(
        &self,
        name: &str,
        requirement: Requirement,
    ) -> Option<Arc<InterfaceRequired>> {
        self.insert_required(name, requirement, false)
    }

    fn insert_required(
        &self,
        name: &str,
        requirement: Requirement,
        with_mailbox: bool,
    ) -> Option<Arc<InterfaceRequired>> {
        match self.required.entry(name.to_string()) {
            Entry::Occupied(_) => {
                error!(component = %self.name, interface = name, "required interface already exists");
                None
            }
            Entry::Vacant(slot) => {
                let interface = InterfaceRequired::for_component(
                    name,
                    &self.name,
                    requirement,
                    with_mailbox,
                    self.wakeup.clone(),
                );
                slot.insert(interface.clone());
                Some(interface)
            }
        }
    }

    pub fn interface_provided(&self, name: &str) -> Option<Arc<InterfaceProvided>> {
        self.provided.get(name).map(|entry| entry.value().clone())
    }

    pub fn interface_required(&self, name: &str) -> Option<Arc<InterfaceRequired>> {
        self.required.get(name).map(|entry| entry.value().clone())
    }

    /// Detaches and removes a required interface.
    pub fn remove_interface_required(&self, name: &str) -> bool {
        match self.required.remove(name) {
            Some((_, interface)) => {
                interface.detach_commands();
                true
            }
            None => false,
        }
    }

    pub fn names_of_interfaces_provided(&self) -> Vec<String> {
        let mut names: Vec<String> = self.provided.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn names_of_interfaces_required(&self) -> Vec<String> {
        let mut names: Vec<String> = self.required.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Required interfaces tagged [`Requirement::Required`] that are not connected.
    pub fn unconnected_required_interfaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .required
            .iter()
            .filter(|e| e.requirement() == Requirement::Required && !e.is_connected())
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Drains every mailbox of the component; returns how many invocations ran.
    pub async fn process_mailboxes(&self) -> usize {
        let provided: Vec<_> = self.provided.iter().map(|e| e.value().clone()).collect();
        let required: Vec<_> = self.required.iter().map(|e| e.value().clone()).collect();
        let mut executed = 0;
        for interface in provided {
            executed += interface.process_mailboxes().await;
        }
        for interface in required {
            executed += interface.process_mailbox().await;
        }
        executed
    }

    /// Starts the component task, or resumes a stopped component.
    ///
    /// Refuses to start while a required interface marked
    /// [`Requirement::Required`] is not connected.
    #[instrument(skip(self), fields(component = %self.name))]
    pub async fn start(self: &Arc<Self>) -> bool {
        match self.state() {
            ComponentState::Constructed => {}
            ComponentState::Ready => return self.resume().await,
            ComponentState::Active => {
                warn!("component already active");
                return true;
            }
            state => {
                error!(%state, "component cannot be started");
                return false;
            }
        }
        let missing = self.unconnected_required_interfaces();
        if !missing.is_empty() {
            error!(?missing, "required interfaces are not connected");
            return false;
        }

        self.set_state(ComponentState::Initializing).await;
        if let Some(behavior) = &self.behavior {
            behavior.startup(self).await;
        }
        let component = self.clone();
        let handle = tokio::spawn(async move { component.run().await });
        *self.task.lock() = Some(handle);
        self.set_state(ComponentState::Ready).await;
        self.set_state(ComponentState::Active).await;
        self.wakeup.notify_one();
        true
    }

    async fn run(self: Arc<Self>) {
        let token = self.cancellation_token.clone();
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    trace!(component = %self.name, "component task cancelled");
                    break;
                }
                () = self.wakeup.notified() => {
                    if self.state() == ComponentState::Active {
                        self.process_mailboxes().await;
                    }
                }
            }
        }
    }

    /// Suspends mailbox processing. Invocations keep queueing meanwhile.
    #[instrument(skip(self), fields(component = %self.name))]
    pub async fn stop(&self) -> bool {
        match self.state() {
            ComponentState::Active => {
                self.set_state(ComponentState::Ready).await;
                true
            }
            ComponentState::Ready => true,
            state => {
                warn!(%state, "component is not running");
                false
            }
        }
    }

    /// Resumes a stopped component and processes what queued meanwhile.
    #[instrument(skip(self), fields(component = %self.name))]
    pub async fn resume(&self) -> bool {
        match self.state() {
            ComponentState::Ready => {
                self.set_state(ComponentState::Active).await;
                self.wakeup.notify_one();
                true
            }
            ComponentState::Active => true,
            state => {
                warn!(%state, "component cannot be resumed");
                false
            }
        }
    }

    /// Stops the component task for good and detaches its required interfaces.
    #[instrument(skip(self), fields(component = %self.name))]
    pub async fn kill(self: &Arc<Self>) -> bool {
        if self.state() == ComponentState::Finished {
            return true;
        }
        self.cancellation_token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(CONFIG.component_shutdown_timeout(), task)
                .await
                .is_err()
            {
                warn!("component task did not finish in time");
            }
        }
        if let Some(behavior) = &self.behavior {
            behavior.cleanup(self).await;
        }
        let required: Vec<_> = self.required.iter().map(|e| e.value().clone()).collect();
        for interface in required {
            interface.detach_commands();
        }
        self.set_state(ComponentState::Finished).await;
        true
    }

    /// Hands a configuration argument to the component behavior.
    pub async fn configure(self: &Arc<Self>, argument: &str) -> bool {
        match &self.behavior {
            Some(behavior) => behavior.configure(self, argument).await,
            None => {
                info!(component = %self.name, "component has nothing to configure");
                true
            }
        }
    }

    async fn set_state(&self, state: ComponentState) {
        *self.state.write() = state;
        info!(component = %self.name, %state, "state changed");
        let event = self.state_event.read().clone();
        if let Some(event) = event {
            let change = ComponentStateChange::new(self.process_name(), self.name.clone(), state);
            event.trigger(&change).await;
        }
    }

    /// Adds the interface the local manager uses to control the component.
    pub(crate) fn add_internal_interface(self: &Arc<Self>) -> bool {
        let Some(interface) = self.add_interface_provided(
            INTERFACE_INTERNAL,
            QueuingPolicy::CommandsShouldNotBeQueued,
        ) else {
            return false;
        };
        let weak = Arc::downgrade(self);

        let stop = weak.clone();
        interface.add_command_void(COMPONENT_STOP, CommandQueuing::NotQueued, move || {
            let component = stop.upgrade();
            async move {
                if let Some(component) = component {
                    component.stop().await;
                }
            }
        });
        let resume = weak.clone();
        interface.add_command_void(COMPONENT_RESUME, CommandQueuing::NotQueued, move || {
            let component = resume.upgrade();
            async move {
                if let Some(component) = component {
                    component.resume().await;
                }
            }
        });
        interface.add_command_read(COMPONENT_GET_STATE, move || {
            let state = weak
                .upgrade()
                .map_or(ComponentState::Error, |component| component.state());
            async move { state }
        });

        let event = interface.add_event_write::<ComponentStateChange>(CHANGE_STATE);
        let added = event.is_some();
        *self.state_event.write() = event;
        added
    }
}

assert_impl_all!(Component: Send, Sync);

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counting {
        startups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ComponentBehavior for Counting {
        async fn startup(&self, _component: &Arc<Component>) {
            self.startups.fetch_add(1, Ordering::SeqCst);
        }

        async fn configure(&self, _component: &Arc<Component>, argument: &str) -> bool {
            !argument.is_empty()
        }
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let behavior = Counting::default();
        let startups = behavior.startups.clone();
        let component = Component::with_behavior("Worker", behavior);
        assert_eq!(component.state(), ComponentState::Constructed);
        assert!(component.start().await);
        assert_eq!(component.state(), ComponentState::Active);
        assert!(component.stop().await);
        assert_eq!(component.state(), ComponentState::Ready);
        assert!(component.start().await);
        assert_eq!(component.state(), ComponentState::Active);
        assert_eq!(startups.load(Ordering::SeqCst), 1);

        assert!(!component.configure("").await);
        assert!(component.configure("gain=2").await);

        assert!(component.kill().await);
        assert_eq!(component.state(), ComponentState::Finished);
        assert!(!component.start().await);
    }

    #[tokio::test]
    async fn unconnected_required_interface_blocks_start() {
        let component = Component::new("Client");
        component.add_interface_required("Needs", Requirement::Required);
        component.add_interface_required("Wants", Requirement::Optional);
        assert_eq!(component.unconnected_required_interfaces(), vec!["Needs".to_string()]);
        assert!(!component.start().await);
        assert_eq!(component.state(), ComponentState::Constructed);
    }

    #[test]
    fn duplicate_interface_names_are_refused() {
        let component = Component::new("Server");
        assert!(component
            .add_interface_provided("P", QueuingPolicy::CommandsShouldBeQueued)
            .is_some());
        assert!(component
            .add_interface_provided("P", QueuingPolicy::CommandsShouldNotBeQueued)
            .is_none());
    }
}
