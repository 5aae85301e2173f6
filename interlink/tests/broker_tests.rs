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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use interlink::prelude::*;
use tracing::info;

use crate::setup::components::{display, thermostat, CONTROL, THERMOSTAT};
use crate::setup::initialize_tracing;

mod setup;

struct Broker {
    p1: Arc<LocalManager>,
    p2: Arc<LocalManager>,
    server: Arc<ManagerComponentServer>,
    mcc1: Arc<ManagerComponentClient>,
    mcc2: Arc<ManagerComponentClient>,
}

// P1 hosts the server; P2 joins afterwards and offers the "Thermostat" class.
async fn broker() -> anyhow::Result<Broker> {
    let global = GlobalManager::new();
    let p1 = LocalManager::new("P1", &global).await?;
    let server = ManagerComponentServer::create(&p1).await?;
    let p2 = LocalManager::new("P2", &global).await?;
    assert!(p2.register_component_class("Thermostat", |name: &str, _: &str| thermostat(name)));
    let mcc1 = p1.client().expect("P1 client");
    let mcc2 = p2.client().expect("P2 client");
    assert!(mcc1.is_connected_to_server());
    assert!(mcc2.is_connected_to_server());
    Ok(Broker {
        p1,
        p2,
        server,
        mcc1,
        mcc2,
    })
}

#[tokio::test]
async fn test_remote_component_lifecycle() -> anyhow::Result<()> {
    initialize_tracing();
    let broker = broker().await?;
    let mcc1 = &broker.mcc1;
    let created = ComponentDescription::of_class("P2", "T1", "Thermostat", "");

    assert!(mcc1.component_create(&created).await);
    assert!(!mcc1.component_create(&created).await);
    assert!(broker.p2.component("T1").is_some());

    let t1 = ComponentDescription::new("P2", "T1");
    assert_eq!(mcc1.component_get_state(&t1).await, ComponentState::Constructed);

    let control = ComponentStatusControl::new("P2", "T1");
    assert!(mcc1.component_start(&control).await);
    assert_eq!(mcc1.component_get_state(&t1).await, ComponentState::Active);
    assert!(mcc1.component_stop(&control).await);
    assert_eq!(mcc1.component_get_state(&t1).await, ComponentState::Ready);
    assert!(mcc1.component_resume(&control).await);
    assert_eq!(mcc1.component_get_state(&t1).await, ComponentState::Active);

    let missing = ComponentDescription::new("P2", "Nobody");
    assert_eq!(mcc1.component_get_state(&missing).await, ComponentState::Error);

    info!("lifecycle driven remotely, shutting down");
    broker.p2.shutdown().await;
    broker.p1.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_server_refuses_known_components_without_asking_the_process() -> anyhow::Result<()> {
    initialize_tracing();
    let broker = broker().await?;
    let built = Arc::new(AtomicUsize::new(0));
    let counter = built.clone();
    assert!(broker.p2.register_component_class("CountedThermostat", move |name: &str, _: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
        thermostat(name)
    }));

    let t1 = ComponentDescription::of_class("P2", "T1", "CountedThermostat", "");
    assert!(broker.mcc1.component_create(&t1).await);
    assert_eq!(built.load(Ordering::SeqCst), 1);

    // Known to the registry only, so P2 itself would still build it.
    assert!(broker.p2.global().add_component("P2", "Ghost").await);
    let ghost = ComponentDescription::of_class("P2", "Ghost", "CountedThermostat", "");
    assert!(!broker.mcc1.component_create(&ghost).await);
    assert!(!broker.mcc1.component_create(&t1).await);
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(broker.p2.component("Ghost").is_none());

    broker.p2.shutdown().await;
    broker.p1.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_invalid_control_delay_is_rejected() -> anyhow::Result<()> {
    initialize_tracing();
    let broker = broker().await?;
    assert!(
        broker
            .mcc1
            .component_create(&ComponentDescription::of_class("P2", "T1", "Thermostat", ""))
            .await
    );
    let t1 = ComponentDescription::new("P2", "T1");

    let too_long = ComponentStatusControl::new("P2", "T1").with_delay(1e20);
    assert!(!broker.mcc2.component_start(&too_long).await);
    let not_a_number = ComponentStatusControl::new("P2", "T1").with_delay(f64::NAN);
    assert!(!broker.mcc2.component_start(&not_a_number).await);
    assert_eq!(broker.mcc2.component_get_state(&t1).await, ComponentState::Constructed);

    // Through the server the request runs in P2's manager task, which must survive it.
    broker.mcc1.component_start(&too_long).await;
    assert_eq!(broker.mcc1.component_get_state(&t1).await, ComponentState::Constructed);
    assert!(
        broker
            .mcc1
            .component_start(&ComponentStatusControl::new("P2", "T1"))
            .await
    );
    assert_eq!(broker.mcc1.component_get_state(&t1).await, ComponentState::Active);

    broker.p2.shutdown().await;
    broker.p1.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_queries_through_the_server() -> anyhow::Result<()> {
    initialize_tracing();
    let broker = broker().await?;
    let mcc1 = &broker.mcc1;
    assert!(
        mcc1.component_create(&ComponentDescription::of_class("P2", "T1", "Thermostat", ""))
            .await
    );

    let mut processes = mcc1.names_of_processes().await;
    processes.sort();
    assert_eq!(processes, vec!["P1".to_string(), "P2".to_string()]);

    let components = mcc1.names_of_components("P2").await;
    assert!(components.contains(&"T1".to_string()));
    assert!(components.contains(&names::manager_component_client("P2")));

    let interfaces = mcc1
        .names_of_interfaces(&ComponentDescription::new("P2", "T1"))
        .await
        .expect("interfaces of T1");
    assert!(interfaces.provided.contains(&CONTROL.to_string()));
    assert!(interfaces.provided.contains(&names::INTERFACE_INTERNAL.to_string()));
    assert!(mcc1
        .names_of_interfaces(&ComponentDescription::new("P2", "Nobody"))
        .await
        .is_none());

    assert_eq!(mcc1.list_of_component_classes("P2").await, vec!["Thermostat".to_string()]);
    assert!(mcc1.list_of_component_classes("P1").await.is_empty());

    let description = mcc1
        .interface_provided_description(&InterfaceEndpoint::new("P2", "T1", CONTROL))
        .await
        .expect("description of Control");
    assert_eq!(description.interface_name, CONTROL);
    assert_eq!(description.command_names(CommandKind::Write), vec!["Publish", "SetGain"]);
    assert_eq!(description.command_names(CommandKind::Read), vec!["GetGain"]);
    assert!(mcc1
        .interface_provided_description(&InterfaceEndpoint::new("P2", "T1", "Missing"))
        .await
        .is_none());

    broker.p2.shutdown().await;
    broker.p1.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_libraries_register_classes_on_load() -> anyhow::Result<()> {
    initialize_tracing();
    let broker = broker().await?;
    let factory: ComponentFactory = Arc::new(|name: &str, _: &str| display(name).component);
    broker
        .p2
        .register_library("displays", vec![("Display".to_string(), factory)]);

    let library = LoadLibraryDescription::new("P2".to_string(), "displays".to_string());
    assert!(broker.mcc1.load_library(&library).await);
    assert!(broker.mcc1.load_library(&library).await);
    assert_eq!(
        broker.mcc1.list_of_component_classes("P2").await,
        vec!["Display".to_string(), "Thermostat".to_string()]
    );
    let unknown = LoadLibraryDescription::new("P2".to_string(), "nothing".to_string());
    assert!(!broker.mcc1.load_library(&unknown).await);

    broker.p2.shutdown().await;
    broker.p1.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_manager_components_are_not_user_controllable() -> anyhow::Result<()> {
    initialize_tracing();
    let broker = broker().await?;
    let server_name = names::manager_component_server();
    let control = ComponentStatusControl::new("P1", server_name.clone());

    assert!(!broker.mcc1.component_stop(&control).await);
    broker.mcc2.component_stop(&control).await;
    assert_eq!(broker.server.component().state(), ComponentState::Active);
    assert_eq!(
        broker
            .mcc2
            .component_get_state(&ComponentDescription::new("P1", server_name))
            .await,
        ComponentState::Active
    );

    let duplicate = ManagerComponentServer::create(&broker.p2).await;
    let error = duplicate.expect_err("a second server must be refused");
    assert!(matches!(
        error.downcast_ref::<BrokerError>(),
        Some(BrokerError::DuplicateServer(_))
    ));

    broker.p2.shutdown().await;
    broker.p1.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_server_is_withdrawn_when_a_process_cannot_be_reached() -> anyhow::Result<()> {
    initialize_tracing();
    let global = GlobalManager::new();
    let p1 = LocalManager::new("P1", &global).await?;
    // Still registered, but its local manager is gone.
    drop(LocalManager::new("Vanished", &global).await?);

    let error = ManagerComponentServer::create(&p1)
        .await
        .expect_err("an unreachable process must fail the server");
    assert!(matches!(
        error.downcast_ref::<BrokerError>(),
        Some(BrokerError::UnknownProcess(_))
    ));
    assert!(global.server().is_none());
    assert!(p1.component(&names::manager_component_server()).is_none());
    assert!(!global.find_component("P1", &names::manager_component_server()));
    let mcc1 = p1.client().expect("P1 client");
    assert!(!mcc1.is_connected_to_server());

    p1.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_time_differences_follow_clock_offsets() -> anyhow::Result<()> {
    initialize_tracing();
    let broker = broker().await?;
    broker.p2.set_clock_offset(-2.0);

    let diffs = broker
        .mcc1
        .absolute_time_diffs(&["P1".to_string(), "P2".to_string()])
        .await;
    assert_eq!(diffs.len(), 2);
    assert_eq!(diffs[0].process_name, "P1");
    assert_eq!(diffs[0].offset, 0.0);
    assert_eq!(diffs[1].process_name, "P2");
    assert!((diffs[1].offset - 2.0).abs() < 0.1, "offset was {}", diffs[1].offset);

    broker.p2.shutdown().await;
    broker.p1.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_log_lines_are_forwarded_once_enabled() -> anyhow::Result<()> {
    initialize_tracing();
    let broker = broker().await?;
    let gcm = broker
        .server
        .component()
        .interface_provided(names::INTERFACE_GCM)
        .expect("server interface");
    let observer = InterfaceRequired::without_mailbox("LogObserver", Requirement::Required);
    let logs = observer
        .add_event_receiver_write::<LogMessage>(names::PRINT_LOG, Requirement::Required)
        .expect("log receiver");
    assert!(observer.connect_to(&gcm));

    let processes = vec!["P1".to_string(), "P2".to_string()];
    assert_eq!(broker.mcc1.log_forwarding_states(&processes).await, vec![false, false]);
    assert!(!broker.p2.forward_log("dropped").await);

    assert!(broker.mcc1.enable_log_forwarding(&["P2".to_string()]).await);
    assert_eq!(broker.mcc1.log_forwarding_states(&processes).await, vec![false, true]);
    assert!(broker.p2.forward_log("sensor calibrated").await);
    assert!(logs.wait(Duration::from_secs(2)).await);
    assert_eq!(
        logs.last_value(),
        Some(LogMessage::new("P2".to_string(), "sensor calibrated".to_string()))
    );

    assert!(broker.mcc1.disable_log_forwarding(&["P2".to_string()]).await);
    assert!(!broker.p2.log_forwarding());

    observer.detach_commands();
    broker.p2.shutdown().await;
    broker.p1.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_connections_are_made_by_the_client_process() -> anyhow::Result<()> {
    initialize_tracing();
    let broker = broker().await?;
    let mcc1 = &broker.mcc1;
    assert!(broker.p2.register_component_class("Display", |name: &str, _: &str| {
        display(name).component
    }));
    assert!(mcc1.component_create(&ComponentDescription::of_class("P2", "T1", "Thermostat", "")).await);
    assert!(mcc1.component_create(&ComponentDescription::of_class("P2", "D1", "Display", "")).await);

    let published = mcc1
        .component()
        .interface_provided(names::INTERFACE_COMPONENT)
        .expect("component events");
    let watcher = InterfaceRequired::without_mailbox("Watcher", Requirement::Required);
    let added = watcher
        .add_event_receiver_write::<ConnectionDescription>(names::ADD_CONNECTION, Requirement::Required)
        .expect("connection receiver");
    assert!(watcher.connect_to(&published));

    let connection = ConnectionDescription::new(
        InterfaceEndpoint::new("P2", "D1", THERMOSTAT),
        InterfaceEndpoint::new("P2", "T1", CONTROL),
    );
    assert!(mcc1.component_connect(&connection).await);
    assert!(added.wait(Duration::from_secs(2)).await);
    let announced = added.last_value().expect("announced connection");
    assert!(announced.same_endpoints(&connection));
    assert_ne!(announced.connection_id, 0);
    assert_eq!(mcc1.list_of_connections().await.len(), 1);

    assert!(!mcc1.component_connect(&connection).await);
    assert!(mcc1.component_disconnect(&connection).await);
    assert!(mcc1.list_of_connections().await.is_empty());

    assert!(broker.p1.add_component(thermostat("T0")).await);
    let across = ConnectionDescription::new(
        InterfaceEndpoint::new("P2", "D1", THERMOSTAT),
        InterfaceEndpoint::new("P1", "T0", CONTROL),
    );
    assert!(!mcc1.component_connect(&across).await);
    assert!(mcc1.list_of_connections().await.is_empty());

    watcher.detach_commands();
    broker.p2.shutdown().await;
    let processes = mcc1.names_of_processes().await;
    assert_eq!(processes, vec!["P1".to_string()]);
    broker.p1.shutdown().await;
    Ok(())
}
