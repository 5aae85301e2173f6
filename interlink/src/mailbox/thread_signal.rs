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

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::argument::Argument;

static NEXT_SIGNAL_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one pending blocking call.
///
/// The token travels with the invocation and comes back through the
/// completion system event, so only the caller that issued it is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletionToken {
    signal: u64,
    sequence: u64,
}

impl Argument for CompletionToken {}

/// Completion signal shared by all functions of one required interface.
///
/// Each blocking call takes its own token from [`ThreadSignal::prepare`], so
/// concurrent callers never consume each other's wakeups.
#[derive(Debug)]
pub struct ThreadSignal {
    id: u64,
    owner: String,
    next_sequence: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<()>>,
}

/// Waiting half of a prepared blocking call.
#[derive(Debug)]
pub struct SignalWait {
    receiver: oneshot::Receiver<()>,
}

impl ThreadSignal {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            id: NEXT_SIGNAL_ID.fetch_add(1, Ordering::Relaxed),
            owner: owner.into(),
            next_sequence: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }

    /// Registers a new pending call and returns its token with the wait handle.
    pub fn prepare(&self) -> (CompletionToken, SignalWait) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(sequence, sender);
        trace!(owner = %self.owner, sequence, "blocking call prepared");
        (
            CompletionToken {
                signal: self.id,
                sequence,
            },
            SignalWait { receiver },
        )
    }

    /// Releases the caller waiting on `token`.
    ///
    /// Returns `false` for tokens issued by another signal or already
    /// released or cancelled.
    pub fn raise(&self, token: &CompletionToken) -> bool {
        if token.signal != self.id {
            return false;
        }
        match self.pending.remove(&token.sequence) {
            Some((_, sender)) => sender.send(()).is_ok(),
            None => {
                debug!(owner = %self.owner, sequence = token.sequence, "late or unknown completion");
                false
            }
        }
    }

    /// Forgets a pending call, typically after a timeout or a failed enqueue.
    pub fn cancel(&self, token: &CompletionToken) {
        if token.signal == self.id && self.pending.remove(&token.sequence).is_some() {
            warn!(owner = %self.owner, sequence = token.sequence, "blocking call abandoned");
        }
    }

    /// Number of blocking calls currently waiting.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl SignalWait {
    /// Waits for the matching [`ThreadSignal::raise`]; `false` on timeout.
    pub async fn wait(self, timeout: Duration) -> bool {
        matches!(tokio::time::timeout(timeout, self.receiver).await, Ok(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn raise_releases_only_its_caller() {
        let signal = ThreadSignal::new("test");
        let (first, first_wait) = signal.prepare();
        let (_second, second_wait) = signal.prepare();
        assert_eq!(signal.pending(), 2);

        assert!(signal.raise(&first));
        assert!(first_wait.wait(Duration::from_millis(50)).await);
        assert!(!second_wait.wait(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn foreign_token_is_ignored() {
        let ours = ThreadSignal::new("ours");
        let theirs = ThreadSignal::new("theirs");
        let (token, _wait) = theirs.prepare();
        assert!(!ours.raise(&token));
        assert!(theirs.raise(&token));
        assert!(!theirs.raise(&token));
    }
}
