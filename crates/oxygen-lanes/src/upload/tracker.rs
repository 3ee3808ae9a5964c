// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ticket bookkeeping: which uploads are pending on which fence, and what
//! became of the finished ones.

use super::types::{TicketId, UploadErrorKind, UploadResult};
use oxygen_core::graphics::FenceValue;
use oxygen_core::utils::lock;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Number of finished tickets whose results stay queryable.
pub const RESULT_HISTORY: usize = 4096;

#[derive(Debug)]
struct TicketEntry {
    fence: FenceValue,
    bytes: u64,
    debug_name: String,
    result: Option<UploadResult>,
}

#[derive(Debug, Default)]
struct TrackerState {
    entries: HashMap<TicketId, TicketEntry>,
    finished: VecDeque<TicketId>,
    completed: FenceValue,
}

impl TrackerState {
    fn finish(&mut self, id: TicketId, result: UploadResult) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if entry.result.is_some() {
            return;
        }
        if !result.success {
            log::debug!(
                "UploadTracker: '{}' failed ({:?}): {}",
                entry.debug_name,
                result.error,
                result.message
            );
        }
        entry.result = Some(result);
        self.finished.push_back(id);
        while self.finished.len() > RESULT_HISTORY {
            if let Some(old) = self.finished.pop_front() {
                self.entries.remove(&old);
            }
        }
    }
}

/// Maps tickets to fences and results.
#[derive(Debug, Default)]
pub struct UploadTracker {
    state: Mutex<TrackerState>,
    changed: Notify,
}

impl UploadTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pending ticket completing on `fence`.
    pub fn register(&self, id: TicketId, fence: FenceValue, bytes: u64, debug_name: &str) {
        let mut state = lock(&self.state);
        state.entries.insert(
            id,
            TicketEntry {
                fence,
                bytes,
                debug_name: debug_name.to_string(),
                result: None,
            },
        );
    }

    /// Records a ticket that finished without reaching the GPU.
    pub fn register_finished(&self, id: TicketId, debug_name: &str, result: UploadResult) {
        {
            let mut state = lock(&self.state);
            state.entries.insert(
                id,
                TicketEntry {
                    fence: FenceValue(0),
                    bytes: 0,
                    debug_name: debug_name.to_string(),
                    result: None,
                },
            );
            state.finish(id, result);
        }
        self.changed.notify_waiters();
    }

    /// Completes every pending ticket whose fence is at or below `completed`.
    ///
    /// Returns the number of tickets completed.
    pub fn mark_fence_completed(&self, completed: FenceValue) -> usize {
        let closed = {
            let mut state = lock(&self.state);
            let completed = completed.max(state.completed);
            state.completed = completed;
            let ready: Vec<(TicketId, u64)> = state
                .entries
                .iter()
                .filter(|(_, e)| e.result.is_none() && e.fence <= completed)
                .map(|(id, e)| (*id, e.bytes))
                .collect();
            for (id, bytes) in &ready {
                state.finish(*id, UploadResult::completed(*bytes));
            }
            ready.len()
        };
        if closed > 0 {
            self.changed.notify_waiters();
        }
        closed
    }

    /// Fails a pending ticket as canceled. Returns `false` if it already finished.
    pub fn cancel(&self, id: TicketId) -> bool {
        let canceled = {
            let mut state = lock(&self.state);
            let pending = state.entries.get(&id).is_some_and(|e| e.result.is_none());
            if pending {
                state.finish(id, UploadResult::failed(UploadErrorKind::Canceled, "canceled"));
            }
            pending
        };
        if canceled {
            self.changed.notify_waiters();
        }
        canceled
    }

    /// Fails the given pending tickets.
    pub fn fail(&self, ids: &[TicketId], kind: UploadErrorKind, message: &str) {
        {
            let mut state = lock(&self.state);
            for id in ids {
                state.finish(*id, UploadResult::failed(kind, message));
            }
        }
        self.changed.notify_waiters();
    }

    /// Fails every pending ticket. Returns how many were failed.
    pub fn fail_all_pending(&self, kind: UploadErrorKind, message: &str) -> usize {
        let failed = {
            let mut state = lock(&self.state);
            let pending: Vec<TicketId> = state
                .entries
                .iter()
                .filter(|(_, e)| e.result.is_none())
                .map(|(id, _)| *id)
                .collect();
            for id in &pending {
                state.finish(*id, UploadResult::failed(kind, message));
            }
            pending.len()
        };
        if failed > 0 {
            self.changed.notify_waiters();
        }
        failed
    }

    /// The result of a finished ticket.
    pub fn try_get_result(&self, id: TicketId) -> Option<UploadResult> {
        lock(&self.state)
            .entries
            .get(&id)
            .and_then(|e| e.result.clone())
    }

    /// Removes a finished ticket, returning its result.
    pub fn take_result(&self, id: TicketId) -> Option<UploadResult> {
        let mut state = lock(&self.state);
        let result = state.entries.get(&id).and_then(|e| e.result.clone())?;
        state.entries.remove(&id);
        state.finished.retain(|f| *f != id);
        Some(result)
    }

    /// Returns `true` if the ticket is pending or its result is still kept.
    pub fn is_known(&self, id: TicketId) -> bool {
        lock(&self.state).entries.contains_key(&id)
    }

    /// Returns `true` if the ticket has a result.
    pub fn is_finished(&self, id: TicketId) -> bool {
        lock(&self.state)
            .entries
            .get(&id)
            .is_some_and(|e| e.result.is_some())
    }

    /// Number of tickets without a result.
    pub fn pending_count(&self) -> usize {
        lock(&self.state)
            .entries
            .values()
            .filter(|e| e.result.is_none())
            .count()
    }

    /// The highest fence reported through [`mark_fence_completed`](Self::mark_fence_completed).
    pub fn completed_fence(&self) -> FenceValue {
        lock(&self.state).completed
    }

    /// Resolves the next time any ticket finishes. Enable it before checking
    /// state to avoid missing a wake-up.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_completion_closes_lower_tickets_only() {
        let tracker = UploadTracker::new();
        tracker.register(TicketId(1), FenceValue(1), 64, "a");
        tracker.register(TicketId(2), FenceValue(2), 32, "b");

        assert_eq!(tracker.mark_fence_completed(FenceValue(1)), 1);
        assert_eq!(tracker.try_get_result(TicketId(1)), Some(UploadResult::completed(64)));
        assert_eq!(tracker.try_get_result(TicketId(2)), None);
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn cancel_only_affects_pending_tickets() {
        let tracker = UploadTracker::new();
        tracker.register(TicketId(1), FenceValue(1), 8, "a");
        assert!(tracker.cancel(TicketId(1)));
        assert!(!tracker.cancel(TicketId(1)));

        tracker.mark_fence_completed(FenceValue(1));
        let result = tracker.try_get_result(TicketId(1)).unwrap();
        assert!(!result.success);
        assert_eq!(result.error, UploadErrorKind::Canceled);
    }

    #[test]
    fn completion_never_regresses() {
        let tracker = UploadTracker::new();
        tracker.mark_fence_completed(FenceValue(5));
        tracker.register(TicketId(1), FenceValue(3), 8, "late");
        assert_eq!(tracker.mark_fence_completed(FenceValue(4)), 1);
        assert_eq!(tracker.completed_fence(), FenceValue(5));
    }

    #[test]
    fn history_is_bounded() {
        let tracker = UploadTracker::new();
        for i in 0..(RESULT_HISTORY as u64 + 10) {
            tracker.register_finished(TicketId(i), "x", UploadResult::completed(0));
        }
        assert!(!tracker.is_known(TicketId(0)));
        assert!(tracker.is_known(TicketId(RESULT_HISTORY as u64 + 9)));
    }
}
