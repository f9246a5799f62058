// Copyright 2026 rrcache Project Authors
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

//! A reference counted cache of DNS resource records.
//!
//! A [`Cache`] owns a record store and a cleaner. The cleaner runs as a task on a
//! [`TaskManager`](rrcache_common::task::TaskManager): it sweeps the store for expired data periodically and whenever
//! the memory context of the cache crosses its high watermark.
//!
//! ```rust
//! use rrcache::prelude::*;
//!
//! let cache = CacheBuilder::new().with_cache_size(64 * 1024 * 1024).build().unwrap();
//! let now = stdtime_now();
//! let name: Name = "www.example.".parse().unwrap();
//! cache
//!     .store()
//!     .insert(&name, Rdataset::new(RdataType::A, 300, vec!["192.0.2.1".to_string()], now), now)
//!     .unwrap();
//! assert!(cache.store().lookup(&name, RdataType::A, now).unwrap().is_some());
//!
//! cache.flush_name(&name).unwrap();
//! assert!(cache.store().lookup(&name, RdataType::A, now).unwrap().is_none());
//! ```

mod cache;
mod cleaner;
mod config;
mod listener;
mod water;

/// Re-exports of the types needed to run a cache.
pub mod prelude;
pub use prelude::*;

/// Utilities for testing.
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
