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

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;

use crate::command::{CommandObject, EventObject};

/// A pinned, boxed future that can cross task boundaries.
pub type FutureBox<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Type-erased command body: takes the argument by value and yields the result.
pub type Handler<A, R> = Arc<dyn Fn(A) -> FutureBox<R> + Send + Sync + 'static>;

/// A deferred command execution stored in a mailbox.
pub type Invocation = FutureBox<()>;

/// Commands of one kind, keyed by name.
pub type CommandMap = DashMap<String, Arc<dyn CommandObject>>;

/// Events of an interface, keyed by name. Void and write events share one
/// namespace.
pub type EventMap = DashMap<String, Arc<dyn EventObject>>;
