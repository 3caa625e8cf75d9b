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

//! Completion handles.
//!
//! A [`JobHandle`] is a cheap, clonable token for the eventual completion of
//! one submitted job. It moves through [`JobState::Pending`],
//! [`JobState::Running`] and [`JobState::Completed`] exactly once and never
//! goes back.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use crate::config::WaitStrategy;
use crate::system::{DeferredJob, JobSpawner, Shared};
use crate::work::JobClass;

/// How long an assisting waiter sleeps when there is nothing to help with
/// before checking the worker queues again.
const ASSIST_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Monotonic identifier of a job within its [`JobSystem`](crate::JobSystem).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JobState {
    /// Created, queued, or waiting on a prerequisite.
    Pending = 0,
    /// The body is executing, or has finished while child jobs are still outstanding.
    Running = 1,
    /// The body and every child job finished.
    Completed = 2,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Pending,
            1 => JobState::Running,
            _ => JobState::Completed,
        }
    }
}

/// How a completed job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JobOutcome {
    /// The body returned normally.
    Success = 1,
    /// The body panicked; the panic was caught and logged.
    Panicked = 2,
    /// The job was dropped before it could run (never submitted, or still
    /// queued for the main thread when the system shut down).
    Abandoned = 3,
}

impl JobOutcome {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(JobOutcome::Success),
            2 => Some(JobOutcome::Panicked),
            3 => Some(JobOutcome::Abandoned),
            _ => None,
        }
    }
}

struct Completion {
    /// Set once the job completed; later dependents are released immediately.
    closed: bool,
    /// Set after every dependent was released. Waiters key on this.
    settled: bool,
    dependents: Vec<Arc<DeferredJob>>,
}

pub(crate) struct HandleInner {
    id: JobId,
    class: JobClass,
    name: &'static str,
    state: AtomicU8,
    outcome: AtomicU8,
    submitted: AtomicBool,
    /// The job's own body plus every child job not yet completed.
    unfinished: AtomicUsize,
    parent: Option<JobHandle>,
    shared: Weak<Shared>,
    /// Jobs this one cannot complete without: prerequisites and children.
    gates: Mutex<Vec<Weak<HandleInner>>>,
    completion: Mutex<Completion>,
    settled: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HandleInner {
    pub(crate) fn new(
        id: JobId,
        class: JobClass,
        name: &'static str,
        parent: Option<JobHandle>,
        shared: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            class,
            name,
            state: AtomicU8::new(JobState::Pending as u8),
            outcome: AtomicU8::new(0),
            submitted: AtomicBool::new(false),
            unfinished: AtomicUsize::new(1),
            parent,
            shared,
            gates: Mutex::new(Vec::new()),
            completion: Mutex::new(Completion {
                closed: false,
                settled: false,
                dependents: Vec::new(),
            }),
            settled: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn class(&self) -> JobClass {
        self.class
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn mark_submitted(&self) {
        let was_submitted = self.submitted.swap(true, Ordering::AcqRel);
        assert!(!was_submitted, "job {} was submitted twice", self.id);
    }

    /// Pending -> Running. A job can only ever be started once.
    pub(crate) fn begin(&self) {
        let started = self.state.compare_exchange(
            JobState::Pending as u8,
            JobState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert!(
            started.is_ok(),
            "job {} ({}) was started twice",
            self.id,
            self.name
        );
    }

    /// Called by a child job being created under this one.
    pub(crate) fn attach_child(&self) {
        let previous = self.unfinished.fetch_add(1, Ordering::AcqRel);
        assert!(
            previous > 0,
            "cannot attach a child job to job {} which already completed",
            self.id
        );
    }

    /// Records that this job cannot complete before `gate` did.
    pub(crate) fn add_gate(&self, gate: &Arc<HandleInner>) {
        lock(&self.gates).push(Arc::downgrade(gate));
    }

    /// Walks prerequisites and children, transitively, looking for a
    /// main-thread job that has not started yet. Only the main thread can
    /// run such a job, so the main thread must not block on anything it gates.
    pub(crate) fn undrained_main_thread_gate(self: &Arc<Self>) -> Option<Arc<HandleInner>> {
        let mut visited = HashSet::new();
        let mut stack = vec![Arc::clone(self)];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.id) {
                continue;
            }
            match node.state() {
                JobState::Completed => continue,
                JobState::Pending if node.class == JobClass::MainThread => return Some(node),
                _ => {}
            }
            stack.extend(lock(&node.gates).iter().filter_map(Weak::upgrade));
        }
        None
    }

    /// Called once the job's own body returned.
    pub(crate) fn finish_body(&self, outcome: JobOutcome) {
        self.outcome.store(outcome as u8, Ordering::Release);
        self.release_unit();
    }

    /// Completes a job that will never run, without going through Running.
    pub(crate) fn abandon(&self) {
        let abandoned = self.state.compare_exchange(
            JobState::Pending as u8,
            JobState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if abandoned.is_err() {
            return;
        }
        log::warn!("Job {} ({}) abandoned before it ran.", self.id, self.name);
        self.finish_body(JobOutcome::Abandoned);
    }

    fn release_unit(&self) {
        if self.unfinished.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.complete();
        }
    }

    fn complete(&self) {
        let completed = self.state.compare_exchange(
            JobState::Running as u8,
            JobState::Completed as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert!(
            completed.is_ok(),
            "job {} ({}) completed twice or without running",
            self.id,
            self.name
        );
        lock(&self.gates).clear();

        if self.submitted.load(Ordering::Acquire) {
            if let Some(shared) = self.shared.upgrade() {
                shared.record_completion();
            }
        }

        let dependents = {
            let mut completion = lock(&self.completion);
            completion.closed = true;
            std::mem::take(&mut completion.dependents)
        };
        // Released before waiters wake, so a waiter on the main thread finds
        // main-thread dependents already queued for the next drain.
        for dependent in dependents {
            dependent.prerequisite_done();
        }

        {
            let mut completion = lock(&self.completion);
            completion.settled = true;
        }
        self.settled.notify_all();

        if let Some(parent) = &self.parent {
            if let Some(inner) = &parent.inner {
                inner.release_unit();
            }
        }
    }

    /// Registers `dependent` to be released when this job completes, or
    /// releases it right away if that already happened.
    pub(crate) fn add_dependent(&self, dependent: Arc<DeferredJob>) {
        let mut completion = lock(&self.completion);
        if completion.closed {
            drop(completion);
            dependent.prerequisite_done();
        } else {
            completion.dependents.push(dependent);
        }
    }

    fn is_settled(&self) -> bool {
        lock(&self.completion).settled
    }

    fn block_until_settled(&self) {
        let mut completion = lock(&self.completion);
        while !completion.settled {
            completion = self
                .settled
                .wait(completion)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns `true` if the job settled within `timeout`.
    fn wait_settled_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completion = lock(&self.completion);
        while !completion.settled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            completion = self
                .settled
                .wait_timeout(completion, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// A handle to a submitted (or about to be submitted) job.
///
/// Handles are reference counted: the submitter may drop its copy at any
/// time, the job keeps running. A default-constructed handle is *null* and
/// refers to no job at all.
#[derive(Clone, Default)]
pub struct JobHandle {
    pub(crate) inner: Option<Arc<HandleInner>>,
}

impl JobHandle {
    /// A handle that refers to no job.
    pub const fn null() -> Self {
        Self { inner: None }
    }

    pub(crate) fn from_inner(inner: Arc<HandleInner>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Returns `true` if this handle refers to a job.
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// The job's id, `None` for a null handle.
    pub fn id(&self) -> Option<JobId> {
        self.inner.as_ref().map(|inner| inner.id())
    }

    /// The scheduling class the job was created for.
    pub fn class(&self) -> Option<JobClass> {
        self.inner.as_ref().map(|inner| inner.class())
    }

    /// Current lifecycle state. A null handle reports `Completed`.
    pub fn state(&self) -> JobState {
        self.inner
            .as_ref()
            .map_or(JobState::Completed, |inner| inner.state())
    }

    /// Returns `true` once the job and all of its children finished.
    pub fn is_completed(&self) -> bool {
        self.state() == JobState::Completed
    }

    /// How the job ended, `None` until it completed (or for a null handle).
    pub fn outcome(&self) -> Option<JobOutcome> {
        let inner = self.inner.as_ref()?;
        if inner.state() != JobState::Completed {
            return None;
        }
        JobOutcome::from_u8(inner.outcome.load(Ordering::Acquire))
    }

    /// Blocks the calling thread until the job completed.
    ///
    /// Returns immediately if it already did. With
    /// [`WaitStrategy::Assist`] a thread other than the main thread executes
    /// queued worker jobs while it waits, so a worker waiting on a job queued
    /// behind it on the same pool cannot deadlock the pool. The main thread
    /// never runs worker jobs; it sleeps until the job completed.
    ///
    /// # Panics
    ///
    /// - on a null handle, or a job that was never submitted;
    /// - when called from the main thread while the job, one of its
    ///   prerequisites or one of its children (transitively) is a main-thread
    ///   job that has not been drained yet, since only the main thread can
    ///   ever run it.
    pub fn wait_for_completion(&self) {
        let inner = self.checked_inner("wait_for_completion");
        if inner.is_settled() {
            return;
        }

        let Some(shared) = inner.shared.upgrade() else {
            inner.block_until_settled();
            return;
        };

        if shared.is_main_thread() {
            if let Some(blocker) = inner.undrained_main_thread_gate() {
                if Arc::ptr_eq(&blocker, inner) {
                    panic!(
                        "main-thread job {} ({}) awaited from the main thread before it was \
                         drained; this would deadlock",
                        inner.id(),
                        inner.name()
                    );
                }
                panic!(
                    "job {} ({}) awaited from the main thread depends on main-thread job {} ({}) \
                     which was not drained yet; this would deadlock",
                    inner.id(),
                    inner.name(),
                    blocker.id(),
                    blocker.name()
                );
            }
            inner.block_until_settled();
            return;
        }

        match shared.config().wait_strategy {
            WaitStrategy::Block => inner.block_until_settled(),
            WaitStrategy::Assist => {
                let spawner = JobSpawner::from_shared(shared);
                while !inner.is_settled() {
                    if !spawner.run_one_worker_job() {
                        inner.wait_settled_for(ASSIST_POLL_INTERVAL);
                    }
                }
            }
        }
    }

    /// Blocks until the job completed or `timeout` elapsed, without
    /// assisting. Returns `true` if the job completed.
    ///
    /// This is a diagnostic helper for tooling and tests; it does not cancel
    /// anything.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.checked_inner("wait_timeout").wait_settled_for(timeout)
    }

    fn checked_inner(&self, operation: &str) -> &Arc<HandleInner> {
        let Some(inner) = self.inner.as_ref() else {
            panic!("{operation} called on a null job handle");
        };
        assert!(
            inner.submitted.load(Ordering::Acquire),
            "{operation} called on job {} ({}) which was never submitted",
            inner.id(),
            inner.name()
        );
        inner
    }
}

impl PartialEq for JobHandle {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for JobHandle {}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("JobHandle")
                .field("id", &inner.id())
                .field("name", &inner.name())
                .field("class", &inner.class())
                .field("state", &inner.state())
                .finish(),
            None => f.write_str("JobHandle(null)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(class: JobClass) -> Arc<HandleInner> {
        Arc::new(HandleInner::new(JobId(1), class, "test", None, Weak::new()))
    }

    #[test]
    fn null_handle_reports_completed() {
        let handle = JobHandle::null();
        assert!(!handle.is_valid());
        assert!(handle.is_completed());
        assert_eq!(handle.outcome(), None);
        assert_eq!(handle.id(), None);
    }

    #[test]
    #[should_panic(expected = "null job handle")]
    fn waiting_on_null_handle_panics() {
        JobHandle::null().wait_for_completion();
    }

    #[test]
    #[should_panic(expected = "never submitted")]
    fn waiting_on_unsubmitted_handle_panics() {
        let handle = JobHandle::from_inner(detached(JobClass::LowPriority));
        handle.wait_for_completion();
    }

    #[test]
    fn state_moves_forward_once() {
        let inner = detached(JobClass::HighPriority);
        inner.mark_submitted();
        let handle = JobHandle::from_inner(Arc::clone(&inner));

        assert_eq!(handle.state(), JobState::Pending);
        inner.begin();
        assert_eq!(handle.state(), JobState::Running);
        assert_eq!(handle.outcome(), None);
        inner.finish_body(JobOutcome::Success);
        assert_eq!(handle.state(), JobState::Completed);
        assert_eq!(handle.outcome(), Some(JobOutcome::Success));

        handle.wait_for_completion();
    }

    #[test]
    #[should_panic(expected = "started twice")]
    fn starting_twice_panics() {
        let inner = detached(JobClass::HighPriority);
        inner.begin();
        inner.begin();
    }

    #[test]
    fn parent_waits_for_children() {
        let parent_inner = detached(JobClass::LowPriority);
        parent_inner.mark_submitted();
        let parent = JobHandle::from_inner(Arc::clone(&parent_inner));

        let child = Arc::new(HandleInner::new(
            JobId(2),
            JobClass::LowPriority,
            "child",
            Some(parent.clone()),
            Weak::new(),
        ));
        parent_inner.attach_child();

        parent_inner.begin();
        parent_inner.finish_body(JobOutcome::Success);
        assert_eq!(parent.state(), JobState::Running);

        child.begin();
        child.finish_body(JobOutcome::Success);
        assert!(parent.is_completed());
    }

    #[test]
    fn abandon_completes_without_running_body() {
        let inner = detached(JobClass::MainThread);
        inner.mark_submitted();
        let handle = JobHandle::from_inner(Arc::clone(&inner));

        inner.abandon();
        assert_eq!(handle.outcome(), Some(JobOutcome::Abandoned));
        // A second abandon is a no-op.
        inner.abandon();
    }

    #[test]
    fn wait_timeout_reports_pending_job() {
        let inner = detached(JobClass::LowPriority);
        inner.mark_submitted();
        let handle = JobHandle::from_inner(inner);
        assert!(!handle.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn undrained_main_thread_gate_is_found_through_the_chain() {
        let init = detached(JobClass::MainThread);
        let build = Arc::new(HandleInner::new(
            JobId(2),
            JobClass::LowPriority,
            "build",
            None,
            Weak::new(),
        ));
        let upload = Arc::new(HandleInner::new(
            JobId(3),
            JobClass::HighPriority,
            "upload",
            None,
            Weak::new(),
        ));
        build.add_gate(&init);
        upload.add_gate(&build);

        let blocker = upload.undrained_main_thread_gate().map(|inner| inner.id());
        assert_eq!(blocker, Some(JobId(1)));

        init.begin();
        init.finish_body(JobOutcome::Success);
        assert!(upload.undrained_main_thread_gate().is_none());
    }

    #[test]
    fn handles_compare_by_identity() {
        let a = JobHandle::from_inner(detached(JobClass::LowPriority));
        let b = JobHandle::from_inner(detached(JobClass::LowPriority));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(JobHandle::null(), JobHandle::default());
    }
}
