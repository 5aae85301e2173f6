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

/// Errors raised while converting an argument to or from its raw form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    /// The value could not be encoded.
    Serialize(String),
    /// The bytes are truncated or not valid CBOR.
    Malformed(String),
    /// The bytes are valid CBOR but describe a different type.
    TypeMismatch(String),
}

impl std::fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgumentError::Serialize(msg) => write!(f, "Failed to serialize argument: {msg}"),
            ArgumentError::Malformed(msg) => write!(f, "Malformed argument bytes: {msg}"),
            ArgumentError::TypeMismatch(msg) => write!(f, "Argument type mismatch: {msg}"),
        }
    }
}

impl std::error::Error for ArgumentError {}

/// Hard failures of the manager broker.
///
/// Recoverable topology problems are reported as `false` or empty results by
/// the broker commands themselves; these variants cover the cases where a
/// manager cannot be built or wired at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// A manager component server already exists for this global manager.
    DuplicateServer(String),
    /// A process with this name is already registered.
    DuplicateProcess(String),
    /// The named process is not registered with the global manager.
    UnknownProcess(String),
    /// An interface needed by the broker could not be created.
    InterfaceCreation(String),
    /// Two broker interfaces could not be connected.
    ConnectionFailed(String),
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::DuplicateServer(name) => {
                write!(f, "Manager component server already created: {name}")
            }
            BrokerError::DuplicateProcess(name) => write!(f, "Process already registered: {name}"),
            BrokerError::UnknownProcess(name) => write!(f, "Unknown process: {name}"),
            BrokerError::InterfaceCreation(name) => write!(f, "Failed to create interface: {name}"),
            BrokerError::ConnectionFailed(msg) => write!(f, "Failed to connect: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}
