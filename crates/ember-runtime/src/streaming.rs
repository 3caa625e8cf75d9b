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

//! The per-entity job graph: mesh streaming, animation setup and
//! acceleration-structure builds, plus the per-frame collision drain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ember_core::{EntityId, EventQueue, SpinLock};
use ember_data::EntityHierarchy;
use ember_jobs::{JobClass, JobHandle, JobSpawner};

/// Number of detail levels streamed per mesh, one child job each.
pub const LOD_COUNT: u32 = 3;

/// Acceleration structures get ids in a range of their own.
const ACCEL_ID_BASE: u32 = 1 << 20;

/// The streamed geometry of one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadedMesh {
    /// Vertices summed over every streamed LOD.
    pub vertex_count: u32,
    /// LODs streamed so far.
    pub lods: u32,
}

/// Simulation state written by job completions.
#[derive(Debug, Default)]
pub struct SceneState {
    meshes: Mutex<HashMap<EntityId, LoadedMesh>>,
    animated: Mutex<Vec<EntityId>>,
    /// Entity to acceleration-structure links, attached on the main thread.
    pub hierarchy: EntityHierarchy,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SceneState {
    /// The mesh streamed for `entity` so far.
    pub fn mesh(&self, entity: EntityId) -> Option<LoadedMesh> {
        lock(&self.meshes).get(&entity).copied()
    }

    /// Entities whose animation was initialized, in initialization order.
    pub fn animated(&self) -> Vec<EntityId> {
        lock(&self.animated).clone()
    }
}

/// Handles of the jobs submitted for one entity.
#[derive(Debug)]
pub struct EntityPipeline {
    /// The entity the jobs work on.
    pub entity: EntityId,
    /// Mesh streaming, completes once every LOD child finished.
    pub load: JobHandle,
    /// Main-thread animation init, chained after `load`.
    pub init: JobHandle,
    /// Acceleration-structure build, completes once its main-thread attach ran.
    pub accel: JobHandle,
}

impl EntityPipeline {
    /// Returns `true` once every job of the pipeline completed.
    pub fn is_complete(&self) -> bool {
        self.load.is_completed() && self.init.is_completed() && self.accel.is_completed()
    }
}

/// Stand-in for decoding one LOD: deterministic, and costly enough to show
/// up on the workers.
fn decode_lod(entity: EntityId, lod: u32) -> u32 {
    let mut hash = 0x811c_9dc5u32 ^ entity.index;
    for round in 0..(4096 >> lod) {
        hash = (hash ^ round).wrapping_mul(0x0100_0193);
    }
    256 + hash % 1024
}

/// Submits the load, animation-init and acceleration-structure jobs of
/// `entity`.
pub fn spawn_entity(
    spawner: &JobSpawner,
    scene: &Arc<SceneState>,
    entity: EntityId,
) -> EntityPipeline {
    let meshes = Arc::clone(scene);
    let load = spawner.submit_now(JobClass::LowPriority, entity, move |entity, ctx| {
        log::trace!("Streaming mesh of {entity}.");
        for lod in 0..LOD_COUNT {
            let meshes = Arc::clone(&meshes);
            let _ = ctx
                .spawner()
                .create_child_job(ctx.handle(), JobClass::LowPriority, lod, move |lod, _| {
                    let vertices = decode_lod(entity, lod);
                    let mut all = lock(&meshes.meshes);
                    let mesh = all.entry(entity).or_default();
                    mesh.vertex_count += vertices;
                    mesh.lods += 1;
                })
                .submit_now();
        }
    });

    let animated = Arc::clone(scene);
    let init = spawner
        .create_job(JobClass::MainThread, entity, move |entity, _| {
            match animated.mesh(entity) {
                Some(mesh) if mesh.lods == LOD_COUNT => {
                    lock(&animated.animated).push(entity);
                    log::debug!(
                        "Animation initialized on {entity} ({} vertices).",
                        mesh.vertex_count
                    );
                }
                other => {
                    log::error!("Animation init on {entity} found an incomplete mesh: {other:?}")
                }
            }
        })
        .submit_after(&load);

    let target = Arc::clone(scene);
    let accel = spawner.submit_now(
        JobClass::LowPriority,
        (entity, load.clone()),
        move |(entity, load), ctx| {
            load.wait_for_completion();
            let vertices = target.mesh(entity).map_or(0, |mesh| mesh.vertex_count);
            let structure = EntityId::new(ACCEL_ID_BASE + entity.index, entity.generation);
            log::trace!("Built acceleration structure {structure} over {vertices} vertices.");

            let spawner = ctx.spawner();
            let attach = spawner.create_child_job(
                ctx.handle(),
                JobClass::MainThread,
                structure,
                move |structure, _| target.hierarchy.emplace_pair(entity, structure),
            );
            let _ = attach.submit_now();
        },
    );

    EntityPipeline {
        entity,
        load,
        init,
        accel,
    }
}

/// A contact reported by the physics step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionEvent {
    /// First body.
    pub a: EntityId,
    /// Second body.
    pub b: EntityId,
    /// Impulse magnitude.
    pub impulse: f32,
}

/// The callback target collision events are dispatched to.
#[derive(Debug, Default)]
pub struct CollisionLog {
    /// Contacts dispatched so far.
    pub contacts: u64,
    /// Sum of every impulse.
    pub total_impulse: f64,
    /// The most recent pair.
    pub last_pair: Option<(EntityId, EntityId)>,
}

/// Publishes the contacts of one simulated physics step.
pub fn publish_contacts(events: &EventQueue<CollisionEvent>, frame: u32, entities: u32) {
    if entities < 2 {
        return;
    }
    for i in 0..(frame % 4) {
        let a = 1 + (frame + i) % entities;
        let b = 1 + (frame + i + 1) % entities;
        events.publish(CollisionEvent {
            a: EntityId::new(a, 0),
            b: EntityId::new(b, 0),
            impulse: 0.5 * (i + 1) as f32,
        });
    }
}

/// Submits the high-priority job dispatching every pending collision into
/// `target` under its spin lock.
pub fn submit_collision_drain(
    spawner: &JobSpawner,
    events: Arc<EventQueue<CollisionEvent>>,
    target: Arc<SpinLock<CollisionLog>>,
) -> JobHandle {
    spawner.submit_now(JobClass::HighPriority, (events, target), |(events, target), _| {
        let dispatched = events.drain_into(&*target, |log, event| {
            log.contacts += 1;
            log.total_impulse += f64::from(event.impulse);
            log.last_pair = Some((event.a, event.b));
        });
        if dispatched > 0 {
            log::trace!("Dispatched {dispatched} collision events.");
        }
    })
}
