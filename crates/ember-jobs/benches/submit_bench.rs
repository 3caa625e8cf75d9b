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

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use ember_jobs::{JobClass, JobHandle, JobSystem, JobSystemConfig};

fn bench_submission(c: &mut Criterion) {
    let jobs = JobSystem::new(JobSystemConfig::with_workers(4)).expect("job system");

    let mut group = c.benchmark_group("Job System");

    group.bench_function("submit + wait 1000 low-priority jobs", |b| {
        b.iter(|| {
            let handles: Vec<JobHandle> = (0..1000u64)
                .map(|i| {
                    jobs.submit_now(JobClass::LowPriority, i, |i, _| {
                        black_box(i.wrapping_mul(31));
                    })
                })
                .collect();
            for handle in &handles {
                handle.wait_for_completion();
            }
        });
    });

    group.bench_function("chain of 100 dependents", |b| {
        b.iter(|| {
            let mut previous = JobHandle::null();
            for i in 0..100u64 {
                previous = jobs
                    .create_job(JobClass::HighPriority, i, |i, _| {
                        black_box(i);
                    })
                    .submit_after(&previous);
            }
            previous.wait_for_completion();
        });
    });

    group.bench_function("drain 1000 main-thread jobs", |b| {
        b.iter(|| {
            for i in 0..1000u64 {
                jobs.submit_now(JobClass::MainThread, i, |i, _| {
                    black_box(i);
                });
            }
            black_box(jobs.execute_main_thread_jobs());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_submission);
criterion_main!(benches);
