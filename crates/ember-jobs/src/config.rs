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

//! Job system configuration.

use serde::{Deserialize, Serialize};

use crate::error::{JobError, JobResult};

/// What a thread does while blocked in
/// [`JobHandle::wait_for_completion`](crate::JobHandle::wait_for_completion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WaitStrategy {
    /// Execute queued worker jobs while waiting. Never picks up main-thread
    /// jobs, so it cannot drain them reentrantly. The main thread itself
    /// never assists; it always sleeps.
    #[default]
    Assist,
    /// Sleep on a condition variable. A worker waiting on a job queued on its
    /// own pool can deadlock if no other worker is free.
    Block,
}

/// Where worker-class jobs execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// On the worker pool.
    #[default]
    Threaded,
    /// Inline on the thread that submits (or releases) them. No worker
    /// threads are spawned. Meant for deterministic tests and tools.
    Synchronous,
}

/// Configuration of a [`JobSystem`](crate::JobSystem).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSystemConfig {
    /// Number of worker threads. 0 = available parallelism minus the main thread.
    pub worker_threads: usize,
    /// Maximum number of queued jobs per class accepted by direct submission.
    /// Dependents released by a completed prerequisite are never refused.
    pub queue_capacity: usize,
    /// Behaviour of blocking waits.
    pub wait_strategy: WaitStrategy,
    /// Threaded or synchronous execution of worker-class jobs.
    pub execution_mode: ExecutionMode,
    /// Worker threads are named `<prefix>-<index>`.
    pub thread_name_prefix: String,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            queue_capacity: 4096,
            wait_strategy: WaitStrategy::Assist,
            execution_mode: ExecutionMode::Threaded,
            thread_name_prefix: "ember-worker".to_string(),
        }
    }
}

impl JobSystemConfig {
    /// A threaded configuration with exactly `worker_threads` workers.
    pub fn with_workers(worker_threads: usize) -> Self {
        Self {
            worker_threads: worker_threads.max(1),
            ..Self::default()
        }
    }

    /// A configuration that runs every worker-class job inline.
    pub fn synchronous() -> Self {
        Self {
            execution_mode: ExecutionMode::Synchronous,
            ..Self::default()
        }
    }

    /// Parses a configuration from RON text. Missing fields take their
    /// default value.
    pub fn from_ron_str(text: &str) -> JobResult<Self> {
        let config: Self = ron::from_str(text).map_err(|e| JobError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values that would make the system unusable.
    pub fn validate(&self) -> JobResult<()> {
        if self.queue_capacity == 0 {
            return Err(JobError::InvalidConfig(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(JobError::InvalidConfig(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of worker threads actually spawned.
    pub fn resolved_worker_threads(&self) -> usize {
        match self.execution_mode {
            ExecutionMode::Synchronous => 0,
            ExecutionMode::Threaded if self.worker_threads > 0 => self.worker_threads,
            ExecutionMode::Threaded => std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(3)
                .max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = JobSystemConfig::default();
        assert_eq!(config.worker_threads, 0);
        assert_eq!(config.queue_capacity, 4096);
        assert_eq!(config.wait_strategy, WaitStrategy::Assist);
        assert_eq!(config.execution_mode, ExecutionMode::Threaded);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn resolved_worker_threads() {
        let mut config = JobSystemConfig::default();
        assert!(config.resolved_worker_threads() >= 1);

        config.worker_threads = 6;
        assert_eq!(config.resolved_worker_threads(), 6);

        assert_eq!(JobSystemConfig::synchronous().resolved_worker_threads(), 0);
        assert_eq!(JobSystemConfig::with_workers(0).resolved_worker_threads(), 1);
    }

    #[test]
    fn parses_partial_ron() {
        let config = JobSystemConfig::from_ron_str("(worker_threads: 2, wait_strategy: Block)")
            .expect("valid config");
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.wait_strategy, WaitStrategy::Block);
        assert_eq!(config.queue_capacity, 4096);
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = JobSystemConfig::from_ron_str("(queue_capacity: 0)").unwrap_err();
        assert!(matches!(err, JobError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_garbage() {
        let err = JobSystemConfig::from_ron_str("(worker_threads: \"many\")").unwrap_err();
        assert!(matches!(err, JobError::ConfigParse(_)));
    }
}
