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

use std::sync::Arc;

use interlink::prelude::*;
use parking_lot::Mutex;

pub const CONTROL: &str = "Control";
pub const THERMOSTAT: &str = "Thermostat";
pub const TEMPERATURE_CHANGED: &str = "TemperatureChanged";

/// A component with a queued `Control` interface:
/// `SetGain` and `Publish` are queued writes, `Sample` a queued void return,
/// `GetGain` a read and `GetTemp` a qualified read.
pub fn thermostat(name: &str) -> Arc<Component> {
    let component = Component::new(name);
    let control = component
        .add_interface_provided(CONTROL, QueuingPolicy::CommandsShouldBeQueued)
        .expect("control interface");
    let gain = Arc::new(Mutex::new(1.0_f64));

    let setter = gain.clone();
    control.add_command_write("SetGain", CommandQueuing::InterfacePolicy, move |value: f64| {
        let setter = setter.clone();
        async move {
            *setter.lock() = value;
        }
    });
    let getter = gain.clone();
    control.add_command_read("GetGain", move || {
        let value = *getter.lock();
        async move { value }
    });
    control.add_command_qualified_read("GetTemp", |offset: f64| async move { 20.0 + offset });
    control.add_command_void_return("Sample", CommandQueuing::InterfacePolicy, move || {
        let value = *gain.lock();
        async move { 20.0 * value }
    });

    let changed = control
        .add_event_write::<f64>(TEMPERATURE_CHANGED)
        .expect("event");
    control.add_command_write("Publish", CommandQueuing::InterfacePolicy, move |value: f64| {
        let changed = changed.clone();
        async move {
            changed.trigger(&value).await;
        }
    });
    component
}

/// Client side of [`thermostat`], with a required `Thermostat` interface.
pub struct Display {
    pub component: Arc<Component>,
    pub set_gain: Arc<FunctionWrite<f64>>,
    pub get_gain: Arc<FunctionRead<f64>>,
    pub get_temp: Arc<FunctionQualifiedRead<f64, f64>>,
    pub sample: Arc<FunctionVoidReturn<f64>>,
    pub publish: Arc<FunctionWrite<f64>>,
    pub changed: Arc<EventReceiverWrite<f64>>,
}

pub fn display(name: &str) -> Display {
    let component = Component::new(name);
    let required = component
        .add_interface_required(THERMOSTAT, Requirement::Required)
        .expect("required interface");
    let display = Display {
        component,
        set_gain: FunctionWrite::write(),
        get_gain: FunctionRead::read(),
        get_temp: FunctionQualifiedRead::qualified_read(),
        sample: FunctionVoidReturn::void_return(),
        publish: FunctionWrite::write(),
        changed: required
            .add_event_receiver_write::<f64>(TEMPERATURE_CHANGED, Requirement::Required)
            .expect("receiver"),
    };
    assert!(required.add_function("SetGain", &display.set_gain, Requirement::Required));
    assert!(required.add_function("GetGain", &display.get_gain, Requirement::Required));
    assert!(required.add_function("GetTemp", &display.get_temp, Requirement::Required));
    assert!(required.add_function("Sample", &display.sample, Requirement::Required));
    assert!(required.add_function("Publish", &display.publish, Requirement::Required));
    display
}
