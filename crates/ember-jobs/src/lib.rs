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

//! # Ember Jobs
//!
//! The asynchronous job scheduling core of the engine.
//!
//! Work is submitted to one of three [`JobClass`]es. High- and low-priority
//! jobs are executed by a fixed pool of worker threads, high priority always
//! first. Main-thread jobs accumulate until the simulation thread calls
//! [`JobSystem::execute_main_thread_jobs`] once per frame, which is the only
//! safe place to mutate simulation state from background results.
//!
//! Every submission returns a [`JobHandle`]. Handles can be waited on, and
//! jobs can be chained so they only start once another job completed:
//!
//! ```no_run
//! use ember_jobs::{JobClass, JobSystem, JobSystemConfig};
//!
//! let jobs = JobSystem::new(JobSystemConfig::default()).unwrap();
//!
//! let load = jobs.submit_now(JobClass::LowPriority, "hero.mesh", |path, _ctx| {
//!     log::info!("streaming {path}");
//! });
//! let init = jobs
//!     .create_job(JobClass::MainThread, 42u32, |entity, _ctx| {
//!         log::info!("initializing animation on {entity}");
//!     })
//!     .submit_after(&load);
//!
//! load.wait_for_completion();
//! jobs.execute_main_thread_jobs();
//! init.wait_for_completion();
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handle;
pub mod stats;
pub mod system;
pub mod work;

mod queue;
mod worker;

pub use config::{ExecutionMode, JobSystemConfig, WaitStrategy};
pub use error::{JobError, JobResult};
pub use handle::{JobHandle, JobId, JobOutcome, JobState};
pub use stats::JobStats;
pub use system::{JobSpawner, JobSystem, PendingJob};
pub use work::{JobClass, JobContext, PayloadWork, Work};
