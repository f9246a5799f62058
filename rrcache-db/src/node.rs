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

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rrcache_common::time::StdTime;

use crate::{name::Name, rdata::Rdataset, RdataType};

/// Shared reference to a [`Node`].
///
/// Holding a `NodeRef` keeps the node attached. Release it with [`crate::Database::detach_node`] so the store can
/// reclaim stale data.
pub type NodeRef = Arc<Node>;

/// All rdatasets cached for one owner name.
#[derive(Debug)]
pub struct Node {
    name: Name,
    rdatasets: RwLock<Vec<Rdataset>>,
}

impl Node {
    pub(crate) fn new(name: Name) -> Self {
        Self {
            name,
            rdatasets: RwLock::new(vec![]),
        }
    }

    /// Owner name.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Number of rdatasets held, stale ones included.
    pub fn len(&self) -> usize {
        self.rdatasets.read().len()
    }

    /// Whether the node holds nothing.
    pub fn is_empty(&self) -> bool {
        self.rdatasets.read().is_empty()
    }

    /// Whether some rdataset of the node can still be served at `now`.
    pub fn has_active(&self, now: StdTime) -> bool {
        self.rdatasets.read().iter().any(|r| r.is_active(now))
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<Rdataset>> {
        self.rdatasets.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<Rdataset>> {
        self.rdatasets.write()
    }

    /// Remove stale rdatasets, returns the weight they were accounted for.
    pub(crate) fn free_stale(&self) -> usize {
        let mut rdatasets = self.rdatasets.write();
        let mut freed = 0;
        rdatasets.retain(|r| {
            if r.stale {
                freed += r.weight();
            }
            !r.stale
        });
        freed
    }

    /// Remove the rdataset of the given type, returns it if there was one.
    pub(crate) fn remove(&self, rtype: RdataType, covers: RdataType) -> Option<Rdataset> {
        let mut rdatasets = self.rdatasets.write();
        let index = rdatasets.iter().position(|r| r.matches(rtype, covers))?;
        Some(rdatasets.swap_remove(index))
    }
}
