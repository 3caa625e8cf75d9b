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

//! The job system: submission, dependency release, execution and the
//! main-thread drain.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, ThreadId};

use ember_core::Stopwatch;

use crate::config::{ExecutionMode, JobSystemConfig};
use crate::error::{JobError, JobResult};
use crate::handle::{HandleInner, JobHandle, JobId, JobOutcome};
use crate::queue::{Job, MainThreadQueue, PushError, WorkerQueues};
use crate::stats::{Counters, JobStats};
use crate::work::{JobClass, JobContext, PayloadWork, Work};
use crate::worker::WorkerPool;

/// State shared by the system, its spawners, its workers and its handles.
pub(crate) struct Shared {
    config: JobSystemConfig,
    worker_queues: WorkerQueues,
    main_queue: MainThreadQueue,
    main_thread: ThreadId,
    draining: AtomicBool,
    next_id: AtomicU64,
    counters: Counters,
}

impl Shared {
    fn new(config: JobSystemConfig) -> Self {
        Self {
            config,
            worker_queues: WorkerQueues::default(),
            main_queue: MainThreadQueue::new(),
            main_thread: thread::current().id(),
            draining: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    pub(crate) fn config(&self) -> &JobSystemConfig {
        &self.config
    }

    pub(crate) fn worker_queues(&self) -> &WorkerQueues {
        &self.worker_queues
    }

    /// Returns `true` on the thread that created the [`JobSystem`].
    pub(crate) fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    pub(crate) fn record_completion(&self) {
        Counters::bump(&self.counters.completed);
    }
}

/// A submitted job waiting for its prerequisites.
///
/// `remaining` counts unfinished prerequisites plus one registration guard,
/// released once every prerequisite has been registered, so the job cannot
/// be released while `submit_after_all` is still walking its list.
pub(crate) struct DeferredJob {
    remaining: AtomicUsize,
    job: Mutex<Option<Job>>,
    shared: Weak<Shared>,
}

impl DeferredJob {
    /// Called once per completed prerequisite. The last call enqueues the job.
    pub(crate) fn prerequisite_done(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let Some(job) = self
            .job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let Some(shared) = self.shared.upgrade() else {
            log::warn!("Job system gone before a deferred job could be released.");
            abandon(&job);
            return;
        };
        shared.counters.deferred.fetch_sub(1, Ordering::Relaxed);
        release(JobSpawner::from_shared(shared), job);
    }
}

thread_local! {
    /// Dependents released on this thread while an outer release is still
    /// dispatching. `None` when no release is in progress.
    static RELEASED: RefCell<Option<VecDeque<(JobSpawner, Job)>>> = const { RefCell::new(None) };
}

/// Dispatches a released dependent.
///
/// Dispatch may run the job inline (synchronous mode, or after shutdown),
/// and its completion releases the next dependent. Nested releases are
/// queued and run by the outermost call, so a chain of any length runs in
/// constant stack depth.
fn release(spawner: JobSpawner, job: Job) {
    let first = RELEASED.with(|released| match released.borrow_mut().as_mut() {
        Some(pending) => {
            pending.push_back((spawner, job));
            None
        }
        None => Some((spawner, job)),
    });
    let Some(first) = first else {
        return;
    };

    RELEASED.with(|released| *released.borrow_mut() = Some(VecDeque::new()));
    let _guard = ReleaseGuard;
    let mut next = Some(first);
    while let Some((spawner, job)) = next {
        // No capacity: a released dependent is never refused.
        if let Err(job) = spawner.dispatch(job, None) {
            abandon(&job);
        }
        next = RELEASED.with(|released| {
            released
                .borrow_mut()
                .as_mut()
                .and_then(VecDeque::pop_front)
        });
    }
}

/// Ends a release loop, abandoning whatever an unwind left behind.
struct ReleaseGuard;

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let leftovers = RELEASED.with(|released| released.borrow_mut().take());
        for (_, job) in leftovers.into_iter().flatten() {
            abandon(&job);
        }
    }
}

fn abandon(job: &Job) {
    if let Some(inner) = &job.handle.inner {
        inner.abandon();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// A cheap, clonable entry point for creating and submitting jobs.
///
/// Obtained from [`JobSystem::spawner`] or, inside a running job, from
/// [`JobContext::spawner`]. Every spawner feeds the same queues.
#[derive(Clone)]
pub struct JobSpawner {
    shared: Arc<Shared>,
}

impl JobSpawner {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Creates a job running `func(payload, ctx)` in the given class. The job
    /// is not queued until the returned [`PendingJob`] is submitted.
    pub fn create_job<P, F>(&self, class: JobClass, payload: P, func: F) -> PendingJob
    where
        P: Send + 'static,
        F: FnOnce(P, &JobContext<'_>) + Send + 'static,
    {
        self.create_work(class, PayloadWork::new(payload, func))
    }

    /// Creates a job from a custom [`Work`] implementation.
    pub fn create_work<W: Work>(&self, class: JobClass, work: W) -> PendingJob {
        self.new_pending(class, Box::new(work), None)
    }

    /// Creates a job whose completion is folded into `parent`: the parent's
    /// handle stays `Running` until this job completed too.
    ///
    /// A null `parent` creates an ordinary job.
    ///
    /// # Panics
    ///
    /// If `parent` already completed.
    pub fn create_child_job<P, F>(
        &self,
        parent: &JobHandle,
        class: JobClass,
        payload: P,
        func: F,
    ) -> PendingJob
    where
        P: Send + 'static,
        F: FnOnce(P, &JobContext<'_>) + Send + 'static,
    {
        let parent = parent.is_valid().then(|| parent.clone());
        self.new_pending(class, Box::new(PayloadWork::new(payload, func)), parent)
    }

    /// Creates and immediately submits a job. Shorthand for
    /// `create_job(..).submit_now()`.
    ///
    /// # Panics
    ///
    /// If the class queue is full. See [`JobSpawner::try_submit_now`].
    pub fn submit_now<P, F>(&self, class: JobClass, payload: P, func: F) -> JobHandle
    where
        P: Send + 'static,
        F: FnOnce(P, &JobContext<'_>) + Send + 'static,
    {
        self.create_job(class, payload, func).submit_now()
    }

    /// Creates and submits a job, returning [`JobError::QueueFull`] instead of
    /// panicking when the class queue is full.
    pub fn try_submit_now<P, F>(&self, class: JobClass, payload: P, func: F) -> JobResult<JobHandle>
    where
        P: Send + 'static,
        F: FnOnce(P, &JobContext<'_>) + Send + 'static,
    {
        self.create_job(class, payload, func).try_submit_now()
    }

    fn new_pending(
        &self,
        class: JobClass,
        work: Box<dyn Work>,
        parent: Option<JobHandle>,
    ) -> PendingJob {
        let parent_inner = parent.as_ref().and_then(|parent| parent.inner.clone());
        if let Some(parent_inner) = &parent_inner {
            parent_inner.attach_child();
        }
        let id = JobId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let inner = Arc::new(HandleInner::new(
            id,
            class,
            work.name(),
            parent,
            Arc::downgrade(&self.shared),
        ));
        if let Some(parent_inner) = parent_inner {
            parent_inner.add_gate(&inner);
        }
        PendingJob {
            job: Some(Job {
                work,
                handle: JobHandle::from_inner(inner),
            }),
            spawner: self.clone(),
        }
    }

    /// Routes a submitted job to where it will run. Returns the job when its
    /// queue is at `capacity`.
    pub(crate) fn dispatch(&self, job: Job, capacity: Option<usize>) -> Result<(), Job> {
        let class = job.class();
        let pushed = if class == JobClass::MainThread {
            self.shared.main_queue.push(job, capacity)
        } else if self.shared.config.execution_mode == ExecutionMode::Synchronous {
            self.execute(job);
            Ok(())
        } else {
            self.shared.worker_queues.push(job, capacity)
        };

        match pushed {
            Ok(()) => Ok(()),
            Err(PushError::Full(job)) => Err(job),
            Err(PushError::Closed(job)) if class.is_worker_class() => {
                log::debug!("Worker pool stopped, running {:?} inline.", job.handle);
                self.execute(job);
                Ok(())
            }
            Err(PushError::Closed(job)) => {
                abandon(&job);
                Ok(())
            }
        }
    }

    /// Runs one job on the current thread and signals its handle.
    pub(crate) fn execute(&self, job: Job) {
        let Job { work, handle } = job;
        let Some(inner) = handle.inner.clone() else {
            return;
        };

        inner.begin();
        log::trace!(
            "Job {} ({}) started on the {} queue.",
            inner.id(),
            inner.name(),
            inner.class()
        );

        let clock = Stopwatch::new();
        let ctx = JobContext::new(self, &handle);
        // The body gets a release context of its own: dependents it releases
        // run before it returns, not after the job that released it.
        let outer_release = RELEASED.with(|released| released.borrow_mut().take());
        let result = panic::catch_unwind(AssertUnwindSafe(|| work.execute(&ctx)));
        RELEASED.with(|released| *released.borrow_mut() = outer_release);
        Counters::bump(&self.shared.counters.executed);

        let outcome = match result {
            Ok(()) => {
                log::trace!(
                    "Job {} ({}) finished in {:.3} ms.",
                    inner.id(),
                    inner.name(),
                    clock.elapsed_ms_f64()
                );
                JobOutcome::Success
            }
            Err(payload) => {
                Counters::bump(&self.shared.counters.panicked);
                log::error!(
                    "Job {} ({}) panicked: {}",
                    inner.id(),
                    inner.name(),
                    panic_message(payload.as_ref())
                );
                JobOutcome::Panicked
            }
        };
        inner.finish_body(outcome);
    }

    /// Pops and runs one queued worker job, high priority first. Returns
    /// `false` when both worker queues were empty.
    pub(crate) fn run_one_worker_job(&self) -> bool {
        match self.shared.worker_queues.try_pop() {
            Some(job) => {
                self.execute(job);
                true
            }
            None => false,
        }
    }
}

/// A created job that owns its handle but has not been queued yet.
///
/// Submit it with [`PendingJob::submit_now`], [`PendingJob::submit_after`] or
/// [`PendingJob::submit_after_all`]. Dropping it unsubmitted completes its
/// handle as [`JobOutcome::Abandoned`] without running the body.
#[must_use = "a job does nothing until it is submitted"]
pub struct PendingJob {
    job: Option<Job>,
    spawner: JobSpawner,
}

impl PendingJob {
    /// The handle the job will complete, usable before submission (for
    /// example to create child jobs under it).
    pub fn handle(&self) -> JobHandle {
        self.job
            .as_ref()
            .map(|job| job.handle.clone())
            .unwrap_or_default()
    }

    /// Queues the job in its class queue and returns its handle. Never blocks.
    ///
    /// # Panics
    ///
    /// If the class queue already holds `queue_capacity` jobs.
    pub fn submit_now(self) -> JobHandle {
        match self.try_submit_now() {
            Ok(handle) => handle,
            Err(e) => panic!("{e}"),
        }
    }

    /// Like [`PendingJob::submit_now`], but reports a full queue as
    /// [`JobError::QueueFull`]. The refused job is abandoned.
    pub fn try_submit_now(mut self) -> JobResult<JobHandle> {
        let Some((job, handle)) = self.take_for_submission() else {
            return Ok(JobHandle::null());
        };
        let capacity = self.spawner.shared.config.queue_capacity;
        let class = job.class();

        match self.spawner.dispatch(job, Some(capacity)) {
            Ok(()) => Ok(handle),
            Err(job) => {
                abandon(&job);
                Err(JobError::QueueFull { class, capacity })
            }
        }
    }

    /// Submits the job to start only once `prerequisite` completed, whatever
    /// the two classes are. A null prerequisite counts as completed.
    ///
    /// # Panics
    ///
    /// If `prerequisite` is this job's own handle.
    pub fn submit_after(self, prerequisite: &JobHandle) -> JobHandle {
        self.submit_after_all(std::slice::from_ref(prerequisite))
    }

    /// Submits the job to start only once every handle in `prerequisites`
    /// completed. Null handles are ignored.
    ///
    /// Released jobs are queued regardless of the queue capacity.
    pub fn submit_after_all<'h, I>(mut self, prerequisites: I) -> JobHandle
    where
        I: IntoIterator<Item = &'h JobHandle>,
    {
        let Some((job, handle)) = self.take_for_submission() else {
            return JobHandle::null();
        };
        let shared = &self.spawner.shared;
        shared.counters.deferred.fetch_add(1, Ordering::Relaxed);

        let deferred = Arc::new(DeferredJob {
            remaining: AtomicUsize::new(1),
            job: Mutex::new(Some(job)),
            shared: Arc::downgrade(shared),
        });
        for prerequisite in prerequisites {
            let Some(inner) = &prerequisite.inner else {
                continue;
            };
            assert!(
                *prerequisite != handle,
                "job {} cannot be submitted after itself",
                inner.id()
            );
            if let Some(own) = &handle.inner {
                own.add_gate(inner);
            }
            deferred.remaining.fetch_add(1, Ordering::AcqRel);
            inner.add_dependent(Arc::clone(&deferred));
        }
        deferred.prerequisite_done();

        handle
    }

    fn take_for_submission(&mut self) -> Option<(Job, JobHandle)> {
        let job = self.job.take()?;
        let handle = job.handle.clone();
        if let Some(inner) = &handle.inner {
            inner.mark_submitted();
        }
        Counters::bump(&self.spawner.shared.counters.submitted);
        Some((job, handle))
    }
}

impl Drop for PendingJob {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            abandon(&job);
        }
    }
}

/// Clears the draining flag when a drain ends, even by unwinding.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The job system: owns the worker pool and the queues.
///
/// The thread that calls [`JobSystem::new`] becomes the *main thread*: the
/// only one allowed to call [`JobSystem::execute_main_thread_jobs`]. There is
/// no global instance; the composition root creates one and hands out
/// [`JobSpawner`]s.
pub struct JobSystem {
    spawner: JobSpawner,
    pool: Option<WorkerPool>,
}

impl JobSystem {
    /// Validates `config` and starts the worker pool.
    pub fn new(config: JobSystemConfig) -> JobResult<Self> {
        config.validate()?;
        let workers = config.resolved_worker_threads();
        let prefix = config.thread_name_prefix.clone();
        let spawner = JobSpawner::from_shared(Arc::new(Shared::new(config)));

        let pool = if workers > 0 {
            Some(WorkerPool::spawn(&spawner, workers, &prefix)?)
        } else {
            log::info!("Job system running in synchronous mode.");
            None
        };

        Ok(Self { spawner, pool })
    }

    /// A spawner feeding this system's queues.
    pub fn spawner(&self) -> JobSpawner {
        self.spawner.clone()
    }

    /// See [`JobSpawner::create_job`].
    pub fn create_job<P, F>(&self, class: JobClass, payload: P, func: F) -> PendingJob
    where
        P: Send + 'static,
        F: FnOnce(P, &JobContext<'_>) + Send + 'static,
    {
        self.spawner.create_job(class, payload, func)
    }

    /// See [`JobSpawner::create_work`].
    pub fn create_work<W: Work>(&self, class: JobClass, work: W) -> PendingJob {
        self.spawner.create_work(class, work)
    }

    /// See [`JobSpawner::create_child_job`].
    pub fn create_child_job<P, F>(
        &self,
        parent: &JobHandle,
        class: JobClass,
        payload: P,
        func: F,
    ) -> PendingJob
    where
        P: Send + 'static,
        F: FnOnce(P, &JobContext<'_>) + Send + 'static,
    {
        self.spawner.create_child_job(parent, class, payload, func)
    }

    /// See [`JobSpawner::submit_now`].
    pub fn submit_now<P, F>(&self, class: JobClass, payload: P, func: F) -> JobHandle
    where
        P: Send + 'static,
        F: FnOnce(P, &JobContext<'_>) + Send + 'static,
    {
        self.spawner.submit_now(class, payload, func)
    }

    /// See [`JobSpawner::try_submit_now`].
    pub fn try_submit_now<P, F>(&self, class: JobClass, payload: P, func: F) -> JobResult<JobHandle>
    where
        P: Send + 'static,
        F: FnOnce(P, &JobContext<'_>) + Send + 'static,
    {
        self.spawner.try_submit_now(class, payload, func)
    }

    /// Runs every main-thread job queued before this call, in submission
    /// order, on the calling thread. Jobs queued while the drain runs wait
    /// for the next call. Returns the number of jobs executed.
    ///
    /// # Panics
    ///
    /// When called from any thread other than the one that created the
    /// system, or from inside a main-thread job.
    pub fn execute_main_thread_jobs(&self) -> usize {
        let shared = &self.spawner.shared;
        assert!(
            shared.is_main_thread(),
            "execute_main_thread_jobs must be called from the thread that created the job system"
        );
        let already_draining = shared.draining.swap(true, Ordering::AcqRel);
        assert!(
            !already_draining,
            "execute_main_thread_jobs called from inside a main-thread job"
        );
        let _guard = DrainGuard(&shared.draining);

        let queued = shared.main_queue.len();
        let mut executed = 0;
        for _ in 0..queued {
            let Some(job) = shared.main_queue.pop() else {
                break;
            };
            self.spawner.execute(job);
            executed += 1;
        }

        if executed > 0 {
            log::trace!("Drained {executed} main-thread jobs.");
        }
        executed
    }

    /// A snapshot of the system's counters and queue depths.
    pub fn stats(&self) -> JobStats {
        let shared = &self.spawner.shared;
        let mut stats = JobStats {
            queued_high: shared.worker_queues.len(JobClass::HighPriority),
            queued_low: shared.worker_queues.len(JobClass::LowPriority),
            queued_main: shared.main_queue.len(),
            workers: self.worker_count(),
            ..JobStats::default()
        };
        shared.counters.read_into(&mut stats);
        stats
    }

    /// Number of worker threads, 0 in synchronous mode or after shutdown.
    pub fn worker_count(&self) -> usize {
        self.pool.as_ref().map_or(0, WorkerPool::len)
    }

    /// The configuration the system was created with.
    pub fn config(&self) -> &JobSystemConfig {
        &self.spawner.shared.config
    }

    /// Stops the pool once the workers ran every queued worker job.
    ///
    /// Worker jobs submitted afterwards run inline on the submitting thread.
    /// Main-thread jobs still queued are abandoned. Called by `Drop`; calling
    /// it more than once is harmless.
    pub fn shutdown(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown(&self.spawner);
        }

        let shared = &self.spawner.shared;
        for job in shared.worker_queues.close() {
            self.spawner.execute(job);
        }

        let mut dropped = 0;
        while let Some(job) = shared.main_queue.pop() {
            abandon(&job);
            dropped += 1;
        }
        if dropped > 0 {
            log::warn!("Job system shut down with {dropped} undrained main-thread jobs.");
        }
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
