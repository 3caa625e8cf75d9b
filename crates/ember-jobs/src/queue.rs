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

//! Per-class job queues.
//!
//! The two worker classes share one mutex so that "high before low" is
//! decided atomically with the pop. The main-thread class is a plain
//! multi-producer channel with a single consumer, the simulation thread.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};

use crate::handle::JobHandle;
use crate::work::{JobClass, Work};

/// A unit of work bound to its completion handle. Immutable once queued.
pub(crate) struct Job {
    pub(crate) work: Box<dyn Work>,
    pub(crate) handle: JobHandle,
}

impl Job {
    pub(crate) fn class(&self) -> JobClass {
        self.handle.class().unwrap_or(JobClass::LowPriority)
    }
}

/// Why a queue refused a job. The job is handed back either way.
pub(crate) enum PushError {
    /// The class queue reached its capacity.
    Full(Job),
    /// Nobody will ever drain this queue again.
    Closed(Job),
}

#[derive(Default)]
struct Lanes {
    high: VecDeque<Job>,
    low: VecDeque<Job>,
    shutting_down: bool,
    closed: bool,
}

impl Lanes {
    fn lane_mut(&mut self, class: JobClass) -> &mut VecDeque<Job> {
        match class {
            JobClass::HighPriority => &mut self.high,
            _ => &mut self.low,
        }
    }

    fn pop(&mut self) -> Option<Job> {
        self.high.pop_front().or_else(|| self.low.pop_front())
    }
}

/// The high- and low-priority queues consumed by the worker pool.
#[derive(Default)]
pub(crate) struct WorkerQueues {
    lanes: Mutex<Lanes>,
    available: Condvar,
}

impl WorkerQueues {
    fn lanes(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `job` to its class queue. With a `capacity`, refuses the job
    /// when that queue is full.
    pub(crate) fn push(&self, job: Job, capacity: Option<usize>) -> Result<(), PushError> {
        let class = job.class();
        debug_assert!(class.is_worker_class());
        {
            let mut lanes = self.lanes();
            if lanes.closed {
                return Err(PushError::Closed(job));
            }
            let lane = lanes.lane_mut(class);
            if capacity.is_some_and(|capacity| lane.len() >= capacity) {
                return Err(PushError::Full(job));
            }
            lane.push_back(job);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Pops the next job without blocking, high priority first.
    pub(crate) fn try_pop(&self) -> Option<Job> {
        self.lanes().pop()
    }

    /// Pops the next job, sleeping while both queues are empty. Returns
    /// `None` once shutdown was requested and nothing is left to run.
    pub(crate) fn pop_blocking(&self) -> Option<Job> {
        let mut lanes = self.lanes();
        loop {
            if let Some(job) = lanes.pop() {
                return Some(job);
            }
            if lanes.shutting_down {
                return None;
            }
            lanes = self
                .available
                .wait(lanes)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wakes every worker so they can finish the remaining jobs and exit.
    pub(crate) fn shutdown(&self) {
        self.lanes().shutting_down = true;
        self.available.notify_all();
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.lanes().shutting_down
    }

    /// Refuses every later push and returns whatever is still queued. Called
    /// once no worker is left to run them.
    pub(crate) fn close(&self) -> Vec<Job> {
        let mut lanes = self.lanes();
        lanes.shutting_down = true;
        lanes.closed = true;
        let Lanes { high, low, .. } = &mut *lanes;
        high.drain(..).chain(low.drain(..)).collect()
    }

    pub(crate) fn len(&self, class: JobClass) -> usize {
        let lanes = self.lanes();
        match class {
            JobClass::HighPriority => lanes.high.len(),
            JobClass::LowPriority => lanes.low.len(),
            JobClass::MainThread => 0,
        }
    }
}

/// Jobs waiting for the next main-thread drain.
pub(crate) struct MainThreadQueue {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    /// Serializes producers so the capacity check and the send are one step.
    /// The consumer only ever shrinks the queue and does not take it.
    producers: Mutex<()>,
}

impl MainThreadQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            producers: Mutex::new(()),
        }
    }

    pub(crate) fn push(&self, job: Job, capacity: Option<usize>) -> Result<(), PushError> {
        let _producer = self.producers.lock().unwrap_or_else(PoisonError::into_inner);
        if capacity.is_some_and(|capacity| self.receiver.len() >= capacity) {
            return Err(PushError::Full(job));
        }
        // Both ends live in `self`, so the channel cannot be disconnected.
        self.sender
            .send(job)
            .map_err(|e| PushError::Closed(e.into_inner()))
    }

    /// Pops the oldest queued job.
    pub(crate) fn pop(&self) -> Option<Job> {
        self.receiver.try_recv().ok()
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }
}
