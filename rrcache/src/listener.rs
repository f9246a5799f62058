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

use rrcache_common::error::Result;

/// Hooks into the life of a cache.
///
/// Hooks run synchronously on whatever thread triggered the event, possibly from inside a memory watermark callback,
/// so they must be cheap and must not call back into the cache.
pub trait CacheEventListener: Send + Sync + 'static {
    /// Called after every dump attempt to a configured file.
    #[expect(unused_variables)]
    fn on_dump(&self, result: &Result<()>) {}

    /// Called when the cache enters or leaves overmem mode.
    #[expect(unused_variables)]
    fn on_overmem(&self, overmem: bool) {}

    /// Called when a background sweep walked the whole store, with the number of nodes examined.
    #[expect(unused_variables)]
    fn on_sweep_complete(&self, nodes: usize) {}

    /// Called once, when the cache is freed.
    fn on_free(&self) {}
}

/// A listener that ignores every event.
#[derive(Debug, Default)]
pub struct DefaultCacheEventListener;

impl CacheEventListener for DefaultCacheEventListener {}
