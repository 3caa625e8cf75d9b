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

//! The fixed pool of background threads draining the worker queues.

use std::cell::Cell;
use std::thread::{self, JoinHandle};

use crate::error::JobResult;
use crate::system::JobSpawner;

thread_local! {
    static WORKER_INDEX: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Index of the pool worker running on the current thread, if any.
pub(crate) fn current_worker_index() -> Option<usize> {
    WORKER_INDEX.with(Cell::get)
}

/// Owns the worker threads. Dropping the pool does not stop it; the owning
/// [`JobSystem`](crate::JobSystem) calls [`WorkerPool::shutdown`].
pub(crate) struct WorkerPool {
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers, each looping on the shared worker queues.
    pub(crate) fn spawn(spawner: &JobSpawner, count: usize, name_prefix: &str) -> JobResult<Self> {
        let mut pool = Self {
            threads: Vec::with_capacity(count),
        };

        for index in 0..count {
            let worker_spawner = spawner.clone();
            let spawned = thread::Builder::new()
                .name(format!("{name_prefix}-{index}"))
                .spawn(move || worker_loop(index, worker_spawner));

            match spawned {
                Ok(handle) => pool.threads.push(handle),
                Err(e) => {
                    log::error!("Failed to spawn worker {index}: {e}");
                    spawner.shared().worker_queues().shutdown();
                    pool.join();
                    return Err(e.into());
                }
            }
        }

        log::info!("Job system worker pool started with {count} workers.");
        Ok(pool)
    }

    pub(crate) fn len(&self) -> usize {
        self.threads.len()
    }

    /// Asks the workers to finish every queued job and waits for them to exit.
    pub(crate) fn shutdown(&mut self, spawner: &JobSpawner) {
        spawner.shared().worker_queues().shutdown();
        self.join();
        log::info!("Job system worker pool stopped.");
    }

    fn join(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("A job system worker thread panicked outside of a job.");
            }
        }
    }
}

fn worker_loop(index: usize, spawner: JobSpawner) {
    WORKER_INDEX.with(|slot| slot.set(Some(index)));
    log::debug!("Worker {index} started.");

    while let Some(job) = spawner.shared().worker_queues().pop_blocking() {
        spawner.execute(job);
    }

    log::debug!("Worker {index} exiting.");
}
