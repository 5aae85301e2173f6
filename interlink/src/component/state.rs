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

use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::argument::Argument;

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    #[default]
    Constructed,
    Initializing,
    Ready,
    Active,
    Finished,
    Error,
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ComponentState::Constructed => "constructed",
            ComponentState::Initializing => "initializing",
            ComponentState::Ready => "ready",
            ComponentState::Active => "active",
            ComponentState::Finished => "finished",
            ComponentState::Error => "error",
        };
        write!(f, "{text}")
    }
}

impl Argument for ComponentState {
    fn scalar_number(&self) -> usize {
        1
    }

    fn scalar(&self, index: usize) -> Option<f64> {
        let ordinal = match self {
            ComponentState::Constructed => 0.0,
            ComponentState::Initializing => 1.0,
            ComponentState::Ready => 2.0,
            ComponentState::Active => 3.0,
            ComponentState::Finished => 4.0,
            ComponentState::Error => 5.0,
        };
        (index == 0).then_some(ordinal)
    }

    fn scalar_description(&self, index: usize, prefix: &str) -> Option<String> {
        (index == 0).then(|| format!("{prefix}state"))
    }
}

/// Payload of the `ChangeState` events.
#[derive(new, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStateChange {
    pub process_name: String,
    pub component_name: String,
    pub new_state: ComponentState,
}

impl Argument for ComponentStateChange {}

impl std::fmt::Display for ComponentStateChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} -> {}",
            self.process_name, self.component_name, self.new_state
        )
    }
}
