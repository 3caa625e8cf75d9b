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

//! Process-wide logger installation.

use env_logger::{Builder, Env};

/// Installs an `env_logger` logger reading `RUST_LOG`, falling back to
/// `default_filter` when the variable is unset.
///
/// Only the first call installs a logger; later calls (from tests running in
/// the same process, for instance) return `false` and change nothing.
pub fn init_logging(default_filter: &str) -> bool {
    Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .format_target(true)
        .try_init()
        .is_ok()
}
