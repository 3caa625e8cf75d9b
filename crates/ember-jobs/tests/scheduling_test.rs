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

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use ember_jobs::{
    JobClass, JobHandle, JobOutcome, JobState, JobSystem, JobSystemConfig, WaitStrategy,
};

const GENEROUS: Duration = Duration::from_secs(10);

fn threaded(workers: usize, wait_strategy: WaitStrategy) -> JobSystem {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = JobSystemConfig::with_workers(workers);
    config.wait_strategy = wait_strategy;
    JobSystem::new(config).expect("job system should start")
}

/// Occupies a worker until the returned sender is dropped or written to.
/// Returns once the gate job is actually running.
fn block_one_worker(jobs: &JobSystem) -> (Sender<()>, JobHandle) {
    let (release_tx, release_rx): (Sender<()>, Receiver<()>) = bounded(1);
    let (started_tx, started_rx) = bounded(1);
    let gate = jobs.submit_now(JobClass::LowPriority, (), move |_, _| {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
    });
    started_rx
        .recv_timeout(GENEROUS)
        .expect("gate job should start");
    (release_tx, gate)
}

#[test]
fn test_every_job_runs_exactly_once() {
    let jobs = threaded(4, WaitStrategy::Assist);
    let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..500).map(|_| AtomicUsize::new(0)).collect());

    let handles: Vec<JobHandle> = (0..500)
        .map(|index| {
            let runs = Arc::clone(&runs);
            let class = if index % 3 == 0 {
                JobClass::HighPriority
            } else {
                JobClass::LowPriority
            };
            jobs.submit_now(class, index, move |index, _| {
                runs[index].fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    for handle in &handles {
        handle.wait_for_completion();
        assert_eq!(handle.state(), JobState::Completed);
        assert_eq!(handle.outcome(), Some(JobOutcome::Success));
    }
    assert!(runs.iter().all(|count| count.load(Ordering::SeqCst) == 1));

    let stats = jobs.stats();
    assert_eq!(stats.submitted, 500);
    assert_eq!(stats.executed, 500);
    assert_eq!(stats.completed, 500);
}

#[test]
fn test_high_priority_runs_before_low() {
    // --- 1. ARRANGE: a single busy worker ---
    let jobs = threaded(1, WaitStrategy::Block);
    let (release, gate) = block_one_worker(&jobs);
    let order = Arc::new(Mutex::new(Vec::new()));

    // --- 2. ACT: queue low work first, then high work ---
    let mut handles = Vec::new();
    for (class, label) in [
        (JobClass::LowPriority, "low-1"),
        (JobClass::LowPriority, "low-2"),
        (JobClass::HighPriority, "high-1"),
        (JobClass::HighPriority, "high-2"),
    ] {
        let order = Arc::clone(&order);
        handles.push(jobs.submit_now(class, label, move |label, _| {
            order.lock().unwrap().push(label);
        }));
    }
    release.send(()).unwrap();

    // --- 3. ASSERT ---
    assert!(gate.wait_timeout(GENEROUS));
    for handle in &handles {
        assert!(handle.wait_timeout(GENEROUS));
    }
    assert_eq!(
        *order.lock().unwrap(),
        vec!["high-1", "high-2", "low-1", "low-2"]
    );
}

#[test]
fn test_worker_jobs_know_their_worker() {
    let jobs = threaded(2, WaitStrategy::Assist);
    let seen = Arc::new(Mutex::new(None));

    let on_worker = Arc::clone(&seen);
    let handle = jobs.submit_now(JobClass::HighPriority, (), move |_, ctx| {
        *on_worker.lock().unwrap() = Some(ctx.worker_index());
    });
    assert!(handle.wait_timeout(GENEROUS));
    let index = seen.lock().unwrap().expect("job ran").expect("ran on a worker");
    assert!(index < 2);

    let on_main = Arc::clone(&seen);
    jobs.submit_now(JobClass::MainThread, (), move |_, ctx| {
        *on_main.lock().unwrap() = Some(ctx.worker_index());
    });
    assert_eq!(jobs.execute_main_thread_jobs(), 1);
    assert_eq!(*seen.lock().unwrap(), Some(None));
}

#[test]
fn test_workers_are_named() {
    let mut config = JobSystemConfig::with_workers(1);
    config.thread_name_prefix = "asset-stream".to_string();
    let jobs = JobSystem::new(config).unwrap();

    let name = Arc::new(Mutex::new(String::new()));
    let slot = Arc::clone(&name);
    let handle = jobs.submit_now(JobClass::LowPriority, (), move |_, _| {
        *slot.lock().unwrap() = thread::current().name().unwrap_or_default().to_string();
    });
    assert!(handle.wait_timeout(GENEROUS));
    assert_eq!(*name.lock().unwrap(), "asset-stream-0");
}

#[test]
fn test_assisted_wait_on_single_worker_does_not_deadlock() {
    let jobs = threaded(1, WaitStrategy::Assist);
    let inner_ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&inner_ran);
    let outer = jobs.submit_now(JobClass::LowPriority, (), move |_, ctx| {
        // Queued behind us on the only worker.
        let inner = ctx.spawner().submit_now(JobClass::LowPriority, (), move |_, _| {
            flag.store(true, Ordering::SeqCst);
        });
        inner.wait_for_completion();
    });

    // Plain timed wait: the main thread must not be the one helping here.
    assert!(outer.wait_timeout(GENEROUS), "outer job deadlocked");
    assert!(inner_ran.load(Ordering::SeqCst));
}

#[test]
fn test_main_thread_never_runs_worker_jobs_while_waiting() {
    // --- 1. ARRANGE: the only worker is busy, a worker job will wait on the next drain ---
    let jobs = threaded(1, WaitStrategy::Assist);
    let (release, _gate) = block_one_worker(&jobs);
    let init = jobs.submit_now(JobClass::MainThread, (), |_, _| {});

    let workers_seen = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&workers_seen);
    let awaited = init.clone();
    let waiter = jobs.submit_now(JobClass::LowPriority, (), move |_, ctx| {
        seen.lock().unwrap().push(ctx.worker_index());
        awaited.wait_for_completion();
    });
    let seen = Arc::clone(&workers_seen);
    let trivial = jobs.submit_now(JobClass::LowPriority, (), move |_, ctx| {
        seen.lock().unwrap().push(ctx.worker_index());
    });

    // --- 2. ACT: the main thread waits while both jobs are still queued ---
    let opener = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        release.send(()).unwrap();
    });
    trivial.wait_for_completion();
    opener.join().unwrap();

    assert_eq!(jobs.execute_main_thread_jobs(), 1);
    assert!(waiter.wait_timeout(GENEROUS));

    // --- 3. ASSERT: both ran on the worker, and the waiter was not broken ---
    assert_eq!(waiter.outcome(), Some(JobOutcome::Success));
    assert_eq!(*workers_seen.lock().unwrap(), vec![Some(0), Some(0)]);
}

#[test]
fn test_panicking_job_keeps_pool_alive() {
    let jobs = threaded(1, WaitStrategy::Assist);

    let bad = jobs.submit_now(JobClass::HighPriority, (), |_, _| {
        panic!("corrupt mesh header");
    });
    bad.wait_for_completion();
    assert_eq!(bad.outcome(), Some(JobOutcome::Panicked));

    let good = jobs.submit_now(JobClass::HighPriority, 2, |n: i32, _| {
        assert_eq!(n * 2, 4);
    });
    assert!(good.wait_timeout(GENEROUS));
    assert_eq!(good.outcome(), Some(JobOutcome::Success));
    assert_eq!(jobs.stats().panicked, 1);
}

#[test]
fn test_parent_completes_after_children() {
    let jobs = threaded(3, WaitStrategy::Assist);
    let finished_children = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&finished_children);
    let parent = jobs.submit_now(JobClass::LowPriority, 8usize, move |count, ctx| {
        for _ in 0..count {
            let counter = Arc::clone(&counter);
            let _ = ctx
                .spawner()
                .create_child_job(ctx.handle(), JobClass::LowPriority, (), move |_, _| {
                    thread::sleep(Duration::from_millis(2));
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .submit_now();
        }
    });

    parent.wait_for_completion();
    assert_eq!(finished_children.load(Ordering::SeqCst), 8);
}

#[test]
fn test_child_of_pending_job_created_before_submission() {
    let jobs = threaded(2, WaitStrategy::Assist);
    let pending = jobs.create_job(JobClass::LowPriority, (), |_, _| {});
    let child_done = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&child_done);
    let child = jobs
        .create_child_job(&pending.handle(), JobClass::HighPriority, (), move |_, _| {
            thread::sleep(Duration::from_millis(10));
            flag.store(true, Ordering::SeqCst);
        })
        .submit_now();
    let parent = pending.submit_now();

    parent.wait_for_completion();
    assert!(child.is_completed());
    assert!(child_done.load(Ordering::SeqCst));
}

#[test]
fn test_try_submit_reports_full_queue() {
    let mut config = JobSystemConfig::with_workers(1);
    config.queue_capacity = 2;
    config.wait_strategy = WaitStrategy::Block;
    let jobs = JobSystem::new(config).unwrap();
    let (release, _gate) = block_one_worker(&jobs);

    assert!(jobs.try_submit_now(JobClass::LowPriority, (), |_, _| {}).is_ok());
    assert!(jobs.try_submit_now(JobClass::LowPriority, (), |_, _| {}).is_ok());
    let refused = jobs.try_submit_now(JobClass::LowPriority, (), |_, _| {});
    assert!(matches!(
        refused,
        Err(ember_jobs::JobError::QueueFull { capacity: 2, .. })
    ));
    // Capacity is per class.
    assert!(jobs.try_submit_now(JobClass::HighPriority, (), |_, _| {}).is_ok());

    release.send(()).unwrap();
}

#[test]
fn test_shutdown_runs_worker_jobs_and_abandons_main_thread_jobs() {
    let mut jobs = threaded(1, WaitStrategy::Block);
    let (release, _gate) = block_one_worker(&jobs);
    let ran = Arc::new(AtomicUsize::new(0));

    let workers: Vec<JobHandle> = (0..10)
        .map(|_| {
            let ran = Arc::clone(&ran);
            jobs.submit_now(JobClass::LowPriority, (), move |_, _| {
                ran.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    let main = jobs.submit_now(JobClass::MainThread, (), |_, _| {
        unreachable!("never drained");
    });

    release.send(()).unwrap();
    jobs.shutdown();

    assert_eq!(ran.load(Ordering::SeqCst), 10);
    assert!(workers.iter().all(JobHandle::is_completed));
    assert_eq!(main.outcome(), Some(JobOutcome::Abandoned));
    assert_eq!(jobs.worker_count(), 0);

    // After shutdown, worker jobs run on the submitting thread.
    let late = jobs.submit_now(JobClass::HighPriority, (), |_, _| {});
    assert!(late.is_completed());
}
