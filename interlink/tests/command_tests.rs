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

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use interlink::prelude::*;

use crate::setup::initialize_tracing;

mod setup;

fn counter_interface(total: &Arc<AtomicI32>) -> Arc<InterfaceProvided> {
    let provided = InterfaceProvided::new("Counter", QueuingPolicy::CommandsShouldBeQueued);
    for name in ["Add", "AddAgain", "AddOnceMore"] {
        let total = total.clone();
        assert!(provided.add_command_write(name, CommandQueuing::InterfacePolicy, move |n: i32| {
            let total = total.clone();
            async move {
                total.fetch_add(n, Ordering::SeqCst);
            }
        }));
    }
    let doubled = total.clone();
    assert!(provided.add_command_write_return(
        "AddAndGet",
        CommandQueuing::InterfacePolicy,
        move |n: i32| {
            let total = doubled.clone();
            async move { total.fetch_add(n, Ordering::SeqCst) + n }
        }
    ));
    provided
}

#[tokio::test]
async fn test_queued_write_runs_when_the_mailbox_is_drained() {
    initialize_tracing();
    let total = Arc::new(AtomicI32::new(0));
    let provided = counter_interface(&total);
    let required = InterfaceRequired::new("CounterUser", Requirement::Required);
    let add = FunctionWrite::<i32>::write();
    assert!(required.add_function("Add", &add, Requirement::Required));

    assert_eq!(add.execute(&1).await, ExecutionResult::FunctionNotBound);
    assert!(required.connect_to(&provided));
    assert_eq!(provided.end_user_count(), 1);

    assert_eq!(add.execute(&4).await, ExecutionResult::Queued);
    assert_eq!(add.execute(&5).await, ExecutionResult::Queued);
    assert_eq!(total.load(Ordering::SeqCst), 0);

    assert_eq!(provided.process_mailboxes().await, 2);
    assert_eq!(total.load(Ordering::SeqCst), 9);
}

#[tokio::test]
async fn test_full_queues_are_reported() {
    initialize_tracing();
    let total = Arc::new(AtomicI32::new(0));
    let provided = counter_interface(&total);
    provided.set_queue_sizes(2, 1);

    let required = InterfaceRequired::new("CounterUser", Requirement::Required);
    let add = FunctionWrite::<i32>::write();
    let add_again = FunctionWrite::<i32>::write();
    let add_once_more = FunctionWrite::<i32>::write();
    assert!(required.add_function("Add", &add, Requirement::Required));
    assert!(required.add_function("AddAgain", &add_again, Requirement::Required));
    assert!(required.add_function("AddOnceMore", &add_once_more, Requirement::Required));
    assert!(required.connect_to(&provided));

    assert_eq!(add.execute(&1).await, ExecutionResult::Queued);
    assert_eq!(add.execute(&1).await, ExecutionResult::ArgumentQueueFull);
    assert_eq!(add_again.execute(&10).await, ExecutionResult::Queued);
    assert_eq!(add_once_more.execute(&100).await, ExecutionResult::MailboxFull);

    assert_eq!(provided.process_mailboxes().await, 2);
    assert_eq!(total.load(Ordering::SeqCst), 11);
    assert_eq!(add.execute(&1).await, ExecutionResult::Queued);
}

#[tokio::test]
async fn test_blocking_call_waits_for_the_provider() {
    initialize_tracing();
    let total = Arc::new(AtomicI32::new(0));
    let provided = counter_interface(&total);
    let required = InterfaceRequired::new("CounterUser", Requirement::Required);
    let add = FunctionWrite::<i32>::write();
    let add_and_get = FunctionWriteReturn::<i32, i32>::write_return();
    assert!(required.add_function("Add", &add, Requirement::Required));
    assert!(required.add_function("AddAndGet", &add_and_get, Requirement::Required));
    assert!(required.connect_to(&provided));

    let drained = provided.clone();
    let drainer = tokio::spawn(async move {
        loop {
            drained.process_mailboxes().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    assert_eq!(add.execute_blocking(&3).await, ExecutionResult::Ok);
    assert_eq!(total.load(Ordering::SeqCst), 3);
    assert_eq!(add_and_get.call(&4).await, Ok(7));
    assert_eq!(required.pending_blocking_calls(), 0);

    drainer.abort();
}

#[tokio::test]
async fn test_missing_required_event_rolls_back_the_connection() {
    initialize_tracing();
    let total = Arc::new(AtomicI32::new(0));
    let provided = counter_interface(&total);
    let required = InterfaceRequired::new("CounterUser", Requirement::Required);
    let add = FunctionWrite::<i32>::write();
    assert!(required.add_function("Add", &add, Requirement::Required));
    assert!(required
        .add_event_receiver_void("Overflow", Requirement::Required)
        .is_some());

    assert!(!required.connect_to(&provided));
    assert!(!required.is_connected());
    assert!(!add.is_valid());
    assert_eq!(provided.end_user_count(), 0);
}

#[tokio::test]
async fn test_missing_optional_function_stays_unbound() {
    initialize_tracing();
    let total = Arc::new(AtomicI32::new(0));
    let provided = counter_interface(&total);
    let required = InterfaceRequired::new("CounterUser", Requirement::Required);
    let add = FunctionWrite::<i32>::write();
    let reset = FunctionVoid::void();
    assert!(required.add_function("Add", &add, Requirement::Required));
    assert!(required.add_function("Reset", &reset, Requirement::Optional));

    assert!(required.connect_to(&provided));
    assert!(add.is_valid());
    assert_eq!(required.is_function_valid(CommandKind::Void, "Reset"), Some(false));
    assert_eq!(reset.trigger().await, ExecutionResult::FunctionNotBound);
}

#[tokio::test]
async fn test_inline_event_handler_and_disable() {
    initialize_tracing();
    let provided = InterfaceProvided::new("Clock", QueuingPolicy::CommandsShouldNotBeQueued);
    let tick = provided.add_event_void("Tick").expect("tick event");

    let required = InterfaceRequired::without_mailbox("ClockUser", Requirement::Required);
    let ticks = Arc::new(AtomicUsize::new(0));
    let counted = ticks.clone();
    let handler = required
        .add_event_handler_void("Tick", EventQueuing::InterfacePolicy, move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        })
        .expect("tick handler");
    assert!(required.connect_to(&provided));
    assert_eq!(tick.observer_count(), 1);

    tick.trigger(&()).await;
    tick.trigger(&()).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 2);

    handler.disable();
    tick.trigger(&()).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 2);

    required.detach_commands();
    assert_eq!(tick.observer_count(), 0);
}
