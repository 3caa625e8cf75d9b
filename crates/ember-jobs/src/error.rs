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

//! Recoverable errors of the job system.
//!
//! Scheduling-contract violations (waiting on a null handle, starting a job
//! twice, draining from the wrong thread) are not represented here: they are
//! programmer errors and panic where they are detected.

use thiserror::Error;

use crate::work::JobClass;

/// A specialized `Result` for job system operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors returned by the fallible job system entry points.
#[derive(Debug, Error)]
pub enum JobError {
    /// The queue for `class` already holds `capacity` jobs.
    #[error("the {class} job queue is full ({capacity} jobs)")]
    QueueFull {
        /// The class whose queue is full.
        class: JobClass,
        /// The configured per-class capacity.
        capacity: usize,
    },
    /// The configuration failed validation.
    #[error("invalid job system configuration: {0}")]
    InvalidConfig(String),
    /// The configuration text could not be parsed.
    #[error("failed to parse job system configuration: {0}")]
    ConfigParse(String),
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
