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

//! Units of work and the context they execute in.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::handle::JobHandle;
use crate::system::JobSpawner;
use crate::worker;

/// The scheduling class of a job, which decides who executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobClass {
    /// Executed by the worker pool, always before any low-priority job.
    HighPriority,
    /// Executed by the worker pool when no high-priority job is queued.
    /// A continuous stream of high-priority work can starve this class.
    LowPriority,
    /// Executed only by [`JobSystem::execute_main_thread_jobs`](crate::JobSystem::execute_main_thread_jobs)
    /// on the simulation thread.
    MainThread,
}

impl JobClass {
    /// All classes, in the order they are reported.
    pub const ALL: [JobClass; 3] = [
        JobClass::HighPriority,
        JobClass::LowPriority,
        JobClass::MainThread,
    ];

    /// Returns `true` for the classes drained by the worker pool.
    pub fn is_worker_class(self) -> bool {
        !matches!(self, JobClass::MainThread)
    }

    /// Short, stable label used in logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            JobClass::HighPriority => "high",
            JobClass::LowPriority => "low",
            JobClass::MainThread => "main",
        }
    }
}

impl fmt::Display for JobClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A unit of work executed exactly once by the job system.
///
/// Most callers never implement this directly and go through
/// [`JobSpawner::create_job`], which wraps a payload and a closure in a
/// [`PayloadWork`]. Implementing `Work` on a struct is useful when the same
/// kind of job is submitted from many places.
pub trait Work: Send + 'static {
    /// Runs the job, consuming it.
    fn execute(self: Box<Self>, ctx: &JobContext<'_>);

    /// Name used in logs.
    fn name(&self) -> &'static str {
        "job"
    }
}

/// A typed payload captured by value together with the function run on it.
pub struct PayloadWork<P, F> {
    payload: P,
    func: F,
}

impl<P, F> PayloadWork<P, F>
where
    P: Send + 'static,
    F: FnOnce(P, &JobContext<'_>) + Send + 'static,
{
    /// Binds `func` to `payload`.
    pub fn new(payload: P, func: F) -> Self {
        Self { payload, func }
    }
}

impl<P, F> Work for PayloadWork<P, F>
where
    P: Send + 'static,
    F: FnOnce(P, &JobContext<'_>) + Send + 'static,
{
    fn execute(self: Box<Self>, ctx: &JobContext<'_>) {
        let PayloadWork { payload, func } = *self;
        func(payload, ctx);
    }

    fn name(&self) -> &'static str {
        std::any::type_name::<P>()
    }
}

/// What a running job can see of the system it runs in.
pub struct JobContext<'a> {
    spawner: &'a JobSpawner,
    handle: &'a JobHandle,
}

impl<'a> JobContext<'a> {
    pub(crate) fn new(spawner: &'a JobSpawner, handle: &'a JobHandle) -> Self {
        Self { spawner, handle }
    }

    /// The handle of the job currently executing. Pass it to
    /// [`JobSpawner::create_child_job`] to fan work out under this job.
    pub fn handle(&self) -> &JobHandle {
        self.handle
    }

    /// A spawner for submitting further jobs, from inside this one.
    pub fn spawner(&self) -> &JobSpawner {
        self.spawner
    }

    /// Index of the pool worker executing this job, `None` on any other thread.
    pub fn worker_index(&self) -> Option<usize> {
        worker::current_worker_index()
    }
}
