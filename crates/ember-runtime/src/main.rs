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

//! Ember runtime: a headless frame loop feeding the job system with
//! asset-streaming style work.

mod streaming;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ember_core::telemetry::MetricId;
use ember_core::{EntityId, EventQueue, SpinLock, Stopwatch};
use ember_jobs::{JobSystem, JobSystemConfig};
use ember_telemetry::{init_logging, publish_job_stats, MetricsRegistry};

use crate::streaming::{CollisionLog, EntityPipeline, SceneState};

/// How long the runtime keeps draining after the last frame before giving up
/// on unfinished pipelines.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "ember-runtime", version, about = "Runs a headless Ember frame loop")]
struct Cli {
    /// Number of frames to simulate.
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Worker threads, overriding the configuration file.
    #[arg(long)]
    workers: Option<usize>,

    /// Job system configuration in RON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Entities whose meshes are streamed at startup.
    #[arg(long, default_value_t = 16)]
    entities: u32,

    /// Frame budget in milliseconds.
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log: String,
}

fn load_config(cli: &Cli) -> Result<JobSystemConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            JobSystemConfig::from_ron_str(&text)
                .with_context(|| format!("invalid job system configuration in {}", path.display()))?
        }
        None => JobSystemConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.worker_threads = workers;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let config = load_config(&cli)?;
    let jobs = JobSystem::new(config).context("failed to start the job system")?;
    log::info!(
        "Ember runtime: {} frames, {} entities, {} workers.",
        cli.frames,
        cli.entities,
        jobs.worker_count()
    );

    let spawner = jobs.spawner();
    let scene = Arc::new(SceneState::default());
    let collisions = Arc::new(EventQueue::new());
    let contacts = Arc::new(SpinLock::new(CollisionLog::default()));
    let metrics = MetricsRegistry::new();

    let pipelines: Vec<EntityPipeline> = (1..=cli.entities)
        .map(|index| streaming::spawn_entity(&spawner, &scene, EntityId::new(index, 0)))
        .collect();

    let budget = Duration::from_millis(cli.frame_ms);
    let frame_time = MetricId::new("frame", "time_ms");
    let frame_count = MetricId::new("frame", "count");
    let main_jobs = MetricId::new("frame", "main_thread_jobs");

    for frame in 0..cli.frames {
        let clock = Stopwatch::new();

        streaming::publish_contacts(&collisions, frame, cli.entities);
        let drain = streaming::submit_collision_drain(
            &spawner,
            Arc::clone(&collisions),
            Arc::clone(&contacts),
        );

        let drained = jobs.execute_main_thread_jobs();
        drain.wait_for_completion();

        publish_job_stats(&metrics, &jobs.stats());
        metrics.increment_counter(&frame_count, 1);
        metrics.increment_counter(&main_jobs, drained as u64);
        metrics.set_gauge(&frame_time, clock.elapsed_ms_f64());
        log::trace!(
            "Frame {frame}: {drained} main-thread jobs in {:.3} ms.",
            clock.elapsed_ms_f64()
        );

        if let Some(rest) = budget.checked_sub(clock.elapsed()) {
            thread::sleep(rest);
        }
    }

    let settle = Stopwatch::new();
    while !pipelines.iter().all(EntityPipeline::is_complete) {
        if settle.elapsed() > SETTLE_TIMEOUT {
            let stuck: Vec<String> = pipelines
                .iter()
                .filter(|pipeline| !pipeline.is_complete())
                .map(|pipeline| pipeline.entity.to_string())
                .collect();
            bail!(
                "pipelines of {} still running {SETTLE_TIMEOUT:?} after the last frame",
                stuck.join(", ")
            );
        }
        jobs.execute_main_thread_jobs();
        thread::sleep(Duration::from_millis(1));
    }

    let stats = jobs.stats();
    publish_job_stats(&metrics, &stats);
    let contact_log = contacts.lock();
    log::info!(
        "Done: {} jobs completed ({} panicked), {} animated entities, {} hierarchy links.",
        stats.completed,
        stats.panicked,
        scene.animated().len(),
        scene.hierarchy.len()
    );
    log::info!(
        "Collisions: {} contacts, total impulse {:.1}, last pair {:?}.",
        contact_log.contacts,
        contact_log.total_impulse,
        contact_log.last_pair
    );
    drop(contact_log);
    log::debug!("Metrics:\n{}", metrics.to_json()?);

    Ok(())
}
