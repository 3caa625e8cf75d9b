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

//! Counters describing the job system's activity.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// A point-in-time snapshot of the job system, returned by
/// [`JobSystem::stats`](crate::JobSystem::stats).
///
/// Counters are cumulative since the system was created. Queue depths are
/// read one after another and can be slightly inconsistent with each other
/// while jobs are being submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Jobs handed to `submit_now` or `submit_after`, refused ones included.
    pub submitted: u64,
    /// Job bodies that ran, successfully or not.
    pub executed: u64,
    /// Submitted jobs whose handle reached `Completed`, abandoned ones included.
    pub completed: u64,
    /// Job bodies that panicked.
    pub panicked: u64,
    /// Jobs currently waiting on a prerequisite.
    pub deferred: usize,
    /// Jobs queued in the high-priority queue.
    pub queued_high: usize,
    /// Jobs queued in the low-priority queue.
    pub queued_low: usize,
    /// Jobs waiting for the next main-thread drain.
    pub queued_main: usize,
    /// Worker threads in the pool.
    pub workers: usize,
}

impl JobStats {
    /// Jobs accepted but not yet completed.
    pub fn in_flight(&self) -> u64 {
        self.submitted.saturating_sub(self.completed)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) submitted: AtomicU64,
    pub(crate) executed: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) panicked: AtomicU64,
    pub(crate) deferred: AtomicUsize,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Fills the counter fields of `stats`.
    pub(crate) fn read_into(&self, stats: &mut JobStats) {
        stats.submitted = self.submitted.load(Ordering::Relaxed);
        stats.executed = self.executed.load(Ordering::Relaxed);
        stats.completed = self.completed.load(Ordering::Relaxed);
        stats.panicked = self.panicked.load(Ordering::Relaxed);
        stats.deferred = self.deferred.load(Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_never_underflows() {
        let stats = JobStats {
            submitted: 3,
            completed: 5,
            ..JobStats::default()
        };
        assert_eq!(stats.in_flight(), 0);
    }

    #[test]
    fn counters_snapshot() {
        let counters = Counters::default();
        Counters::bump(&counters.submitted);
        Counters::bump(&counters.submitted);
        Counters::bump(&counters.completed);
        counters.deferred.fetch_add(4, Ordering::Relaxed);

        let mut stats = JobStats::default();
        counters.read_into(&mut stats);
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.deferred, 4);
        assert_eq!(stats.in_flight(), 1);
    }
}
