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

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rrcache_common::error::Result;

use crate::listener::CacheEventListener;

/// A listener that records every event it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    dumps: Mutex<Vec<bool>>,
    overmem: Mutex<Vec<bool>>,
    sweeps: Mutex<Vec<usize>>,
    frees: AtomicUsize,
    events: Mutex<Vec<&'static str>>,
}

impl RecordingListener {
    /// Outcome of every dump, `true` for success.
    pub fn dumps(&self) -> Vec<bool> {
        self.dumps.lock().clone()
    }

    /// Every overmem transition.
    pub fn overmem(&self) -> Vec<bool> {
        self.overmem.lock().clone()
    }

    /// Nodes examined by every completed background sweep.
    pub fn sweeps(&self) -> Vec<usize> {
        self.sweeps.lock().clone()
    }

    /// Every event in arrival order: `dump`, `overmem`, `sweep` or `free`.
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }

    /// How many times the cache was freed.
    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::Acquire)
    }
}

impl CacheEventListener for RecordingListener {
    fn on_dump(&self, result: &Result<()>) {
        self.dumps.lock().push(result.is_ok());
        self.events.lock().push("dump");
    }

    fn on_overmem(&self, overmem: bool) {
        self.overmem.lock().push(overmem);
        self.events.lock().push("overmem");
    }

    fn on_sweep_complete(&self, nodes: usize) {
        self.sweeps.lock().push(nodes);
        self.events.lock().push("sweep");
    }

    fn on_free(&self) {
        self.events.lock().push("free");
        self.frees.fetch_add(1, Ordering::Release);
    }
}
