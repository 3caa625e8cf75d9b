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

//! Synchronization primitives for very short critical sections.
//!
//! Coarse, long-held state should use `std::sync::Mutex`. The [`SpinLock`]
//! here is reserved for hot per-frame paths where the protected section is
//! short and bounded, e.g. dispatching an already collected batch of events
//! into a callback target. Callbacks run under it must not block.

mod spin_lock;

pub use self::spin_lock::{SpinLock, SpinLockGuard};
