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

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tracing::{instrument, trace, warn};

use crate::common::{ExecutionResult, Invocation};

/// Bounded FIFO of deferred command executions.
///
/// Any task may push; the owning component drains it with
/// [`Mailbox::execute_next`]. A push never blocks: when the queue is at
/// capacity the invocation is refused with [`ExecutionResult::MailboxFull`].
pub struct Mailbox {
    name: String,
    capacity: usize,
    sender: mpsc::Sender<Invocation>,
    receiver: Mutex<mpsc::Receiver<Invocation>>,
    wakeup: Option<Arc<Notify>>,
}

impl Debug for Mailbox {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Mailbox {
    /// Creates a mailbox holding at most `capacity` invocations.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self::build(name.into(), capacity, None)
    }

    /// Creates a mailbox that notifies `wakeup` after every successful push.
    pub fn with_wakeup(name: impl Into<String>, capacity: usize, wakeup: Arc<Notify>) -> Self {
        Self::build(name.into(), capacity, Some(wakeup))
    }

    fn build(name: String, capacity: usize, wakeup: Option<Arc<Notify>>) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            name,
            capacity,
            sender,
            receiver: Mutex::new(receiver),
            wakeup,
        }
    }

    /// Appends an invocation to the back of the queue.
    #[instrument(skip(self, invocation), fields(mailbox = %self.name))]
    pub fn try_push(&self, invocation: Invocation) -> ExecutionResult {
        match self.sender.try_send(invocation) {
            Ok(()) => {
                trace!("invocation queued");
                if let Some(wakeup) = &self.wakeup {
                    wakeup.notify_one();
                }
                ExecutionResult::Queued
            }
            Err(TrySendError::Full(_)) => {
                warn!("mailbox full");
                ExecutionResult::MailboxFull
            }
            Err(TrySendError::Closed(_)) => {
                warn!("mailbox closed");
                ExecutionResult::NoMailbox
            }
        }
    }

    /// Pops the front invocation and runs it to completion.
    ///
    /// Returns `false` when the mailbox was empty. The receiver lock is
    /// released before the invocation is awaited, so handlers may push into
    /// the same mailbox.
    pub async fn execute_next(&self) -> bool {
        let next = self.receiver.lock().try_recv().ok();
        match next {
            Some(invocation) => {
                invocation.await;
                true
            }
            None => false,
        }
    }

    /// Runs queued invocations until the mailbox is empty, returning how many ran.
    pub async fn drain(&self) -> usize {
        let mut executed = 0;
        while self.execute_next().await {
            executed += 1;
        }
        executed
    }

    /// Number of invocations waiting.
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn empty_mailbox_executes_nothing() {
        let mailbox = Mailbox::new("empty", 4);
        assert!(mailbox.is_empty());
        assert!(!mailbox.execute_next().await);
    }

    #[tokio::test]
    async fn push_notifies_wakeup() {
        let wakeup = Arc::new(Notify::new());
        let mailbox = Mailbox::with_wakeup("woken", 2, wakeup.clone());
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = counter.clone();
        let result = mailbox.try_push(Box::pin(async move {
            inner.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(result, ExecutionResult::Queued);
        // The stored permit completes immediately.
        wakeup.notified().await;
        assert_eq!(mailbox.drain().await, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drains_in_submission_order_and_refuses_when_full() {
        let mailbox = Mailbox::new("fifo", 3);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for value in 0..3 {
            let seen = seen.clone();
            let result = mailbox.try_push(Box::pin(async move { seen.lock().push(value) }));
            assert_eq!(result, ExecutionResult::Queued);
        }
        assert_eq!(mailbox.try_push(Box::pin(async {})), ExecutionResult::MailboxFull);
        assert_eq!(mailbox.len(), 3);

        assert_eq!(mailbox.drain().await, 3);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }
}
