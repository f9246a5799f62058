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

use std::{fmt::Debug, path::Path};

use rrcache_common::{error::Result, time::StdTime};

use crate::{
    master,
    name::Name,
    node::NodeRef,
    rdata::{RdataClass, RdataType, Rdataset},
};

/// Outcome of [`Database::add_rdataset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// No rdataset of that type existed.
    Added,
    /// An existing rdataset of that type was replaced.
    Replaced,
}

/// Outcome of [`Database::delete_rdataset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The rdataset was removed.
    Deleted,
    /// There was nothing to remove.
    Unchanged,
}

/// The record store contract.
///
/// Implementations are shared as `Arc<dyn Database>`. Every method may be called concurrently. Implementations must
/// make [`Database::set_overmem`] cheap: it is called from a memory watermark callback and must neither take a lock
/// held while accounting memory nor account memory itself.
pub trait Database: Send + Sync + Debug + 'static {
    /// Class of the records held.
    fn class(&self) -> RdataClass;

    /// Origin of the store.
    fn origin(&self) -> &Name;

    /// Find the node for `name`, creating an empty one if `create` is set.
    fn find_node(&self, name: &Name, create: bool) -> Result<Option<NodeRef>>;

    /// First node in canonical order.
    fn first_node(&self) -> Result<Option<NodeRef>>;

    /// First node strictly after `after` in canonical order.
    fn next_node(&self, after: &Name) -> Result<Option<NodeRef>>;

    /// Mark every rdataset of the node expiring at or before `now` as stale, returns how many were marked.
    fn expire_node(&self, node: &NodeRef, now: StdTime) -> Result<usize>;

    /// Release a node reference.
    fn detach_node(&self, node: NodeRef);

    /// Snapshot of the node's rdatasets that are not stale.
    fn all_rdatasets(&self, node: &NodeRef) -> Result<Vec<Rdataset>>;

    /// The rdataset of the given type if it can be served at `now`.
    fn find_rdataset(
        &self,
        node: &NodeRef,
        rtype: RdataType,
        covers: RdataType,
        now: StdTime,
    ) -> Result<Option<Rdataset>>;

    /// Add an rdataset, replacing any existing one of the same type.
    fn add_rdataset(&self, node: &NodeRef, rdataset: Rdataset, now: StdTime) -> Result<AddOutcome>;

    /// Delete the rdataset of the given type.
    fn delete_rdataset(&self, node: &NodeRef, rtype: RdataType, covers: RdataType) -> Result<DeleteOutcome>;

    /// Switch overmem mode.
    fn set_overmem(&self, overmem: bool);

    /// Whether the store is in overmem mode.
    fn is_overmem(&self) -> bool;

    /// Number of nodes.
    fn node_count(&self) -> usize;

    /// Populate the store from a master file, returns the number of rdatasets added.
    fn load(&self, path: &Path, now: StdTime) -> Result<usize> {
        master::load(self, path, now)
    }

    /// Write the servable content of the store to a master file, returns the number of rdatasets written.
    fn dump(&self, path: &Path, now: StdTime) -> Result<usize> {
        master::dump(self, path, now)
    }

    /// Find the servable rdataset of `rtype` at `name`.
    fn lookup(&self, name: &Name, rtype: RdataType, now: StdTime) -> Result<Option<Rdataset>> {
        let Some(node) = self.find_node(name, false)? else {
            return Ok(None);
        };
        let res = self.find_rdataset(&node, rtype, RdataType::NONE, now);
        self.detach_node(node);
        res
    }

    /// Add an rdataset at `name`, creating the node if needed.
    fn insert(&self, name: &Name, rdataset: Rdataset, now: StdTime) -> Result<AddOutcome> {
        let Some(node) = self.find_node(name, true)? else {
            return Err(rrcache_common::error::Error::unexpected("node creation returned nothing")
                .with_context("name", name));
        };
        let res = self.add_rdataset(&node, rdataset, now);
        self.detach_node(node);
        res
    }
}
