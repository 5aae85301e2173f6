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

//! The distributed manager broker.
//!
//! A [`GlobalManager`] keeps the registry of processes, components,
//! interfaces and connections. Each process owns a [`LocalManager`] and a
//! [`ManagerComponentClient`]; one process additionally hosts the
//! [`ManagerComponentServer`], through which clients reach every other
//! process. Manager components talk to each other with ordinary required and
//! provided interfaces.

use std::future::Future;
use std::sync::Arc;

use tracing::error;

pub use client::ManagerComponentClient;
pub use descriptions::{
    ComponentDescription, ComponentStatusControl, ConnectionDescription, InterfaceDescription,
    InterfaceEndpoint, LoadLibraryDescription, LogMessage, ProcessTimeDiff,
};
pub use global::GlobalManager;
pub use local::{ComponentFactory, LocalManager};
pub use server::ManagerComponentServer;

use crate::argument::Argument;
use crate::command::EventWrite;
use crate::common::{BrokerError, ExecutionResult, FutureBox};
use crate::component::Component;
use crate::interface::{
    EventQueuing, InterfaceProvided, InterfaceRequired, QueuingPolicy, Requirement,
};

mod client;
mod descriptions;
mod function_set;
mod global;
mod local;
pub mod names;
mod server;

/// Wraps `handler` so that it only holds a weak reference to `target`.
///
/// Once `target` is gone the wrapped handler returns the default value.
pub(crate) fn bind_weak<T, A, R, F, Fut>(
    target: &Arc<T>,
    handler: F,
) -> impl Fn(A) -> FutureBox<R> + Send + Sync + 'static
where
    T: Send + Sync + 'static,
    A: Argument,
    R: Argument,
    F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let weak = Arc::downgrade(target);
    move |argument: A| -> FutureBox<R> {
        match weak.upgrade() {
            Some(target) => Box::pin(handler(target, argument)),
            None => Box::pin(async { R::default() }),
        }
    }
}

/// [`bind_weak`] for commands without an argument.
pub(crate) fn bind_weak_nullary<T, R, F, Fut>(
    target: &Arc<T>,
    handler: F,
) -> impl Fn() -> FutureBox<R> + Send + Sync + 'static
where
    T: Send + Sync + 'static,
    R: Argument,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let weak = Arc::downgrade(target);
    move || -> FutureBox<R> {
        match weak.upgrade() {
            Some(target) => Box::pin(handler(target)),
            None => Box::pin(async { R::default() }),
        }
    }
}

/// Re-emits event `name`, received on `required`, through `target`.
pub(crate) fn forward_event<A: Argument>(
    required: &InterfaceRequired,
    name: &str,
    target: Arc<EventWrite<A>>,
) -> bool {
    required
        .add_event_handler_write(name, EventQueuing::NotQueued, move |payload: A| {
            let target = target.clone();
            async move {
                target.trigger(&payload).await;
            }
        })
        .is_some()
}

pub(crate) fn provided_interface(
    component: &Component,
    name: &str,
    policy: QueuingPolicy,
) -> Result<Arc<InterfaceProvided>, BrokerError> {
    component
        .add_interface_provided(name, policy)
        .ok_or_else(|| BrokerError::InterfaceCreation(format!("{}.{name}", component.name())))
}

pub(crate) fn required_interface(
    component: &Component,
    name: &str,
) -> Result<Arc<InterfaceRequired>, BrokerError> {
    component
        .add_interface_required_without_mailbox(name, Requirement::Optional)
        .ok_or_else(|| BrokerError::InterfaceCreation(format!("{}.{name}", component.name())))
}

pub(crate) fn write_event<A: Argument>(
    interface: &InterfaceProvided,
    name: &str,
) -> Result<Arc<EventWrite<A>>, BrokerError> {
    interface
        .add_event_write::<A>(name)
        .ok_or_else(|| BrokerError::InterfaceCreation(format!("{}.{name}", interface.name())))
}

/// Unwraps the value of a manager call, logging why it failed.
pub(crate) fn returned<R>(command: &str, result: Result<R, ExecutionResult>) -> Option<R> {
    match result {
        Ok(value) => Some(value),
        Err(result) => {
            error!(command, %result, "manager call failed");
            None
        }
    }
}

/// `true` when a manager call went through, logging why it did not.
pub(crate) fn succeeded(command: &str, result: ExecutionResult) -> bool {
    if !result.is_ok() {
        error!(command, %result, "manager call failed");
    }
    result.is_ok()
}
