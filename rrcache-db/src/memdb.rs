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

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use itertools::Itertools;
use parking_lot::RwLock;
use rrcache_common::{
    error::{Error, ErrorKind, Result},
    mem::MemoryContext,
    time::StdTime,
};

use crate::{
    db::{AddOutcome, Database, DeleteOutcome},
    name::Name,
    node::{Node, NodeRef},
    rdata::{RdataClass, RdataType, Rdataset},
};

/// Store type identifier of [`MemDb`].
pub const MEMDB_TYPE: &str = "btree";

const DEFAULT_PURGE_BATCH: usize = 2;

/// Fixed bookkeeping cost charged per node on top of its name.
const NODE_OVERHEAD: usize = 128;

fn node_weight(name: &Name) -> usize {
    NODE_OVERHEAD + name.as_str().len()
}

/// In-memory record store backed by an ordered map.
///
/// Every node and rdataset held is charged to the memory context. Memory is never accounted while the tree lock or a
/// node lock is held, so watermark callbacks triggered by the accounting are free to call back into the store.
#[derive(Debug)]
pub struct MemDb {
    mctx: Arc<MemoryContext>,
    origin: Name,
    class: RdataClass,
    tree: RwLock<BTreeMap<Name, NodeRef>>,
    overmem: AtomicBool,
    purge_batch: usize,
    /// Bytes currently charged to `mctx` by this store.
    charged: AtomicUsize,
}

impl MemDb {
    /// Create an empty store.
    pub fn new(mctx: Arc<MemoryContext>, origin: Name, class: RdataClass) -> Self {
        Self {
            mctx,
            origin,
            class,
            tree: RwLock::new(BTreeMap::new()),
            overmem: AtomicBool::new(false),
            purge_batch: DEFAULT_PURGE_BATCH,
            charged: AtomicUsize::new(0),
        }
    }

    /// Set how many rdatasets an add purges from other nodes while in overmem mode.
    pub fn with_purge_batch(mut self, purge_batch: usize) -> Self {
        self.purge_batch = purge_batch;
        self
    }

    /// Store constructor registered as [`MEMDB_TYPE`].
    ///
    /// Accepted args: `purge-batch=<n>`.
    pub fn create(
        mctx: &Arc<MemoryContext>,
        origin: &Name,
        class: RdataClass,
        args: &[String],
    ) -> Result<Arc<dyn Database>> {
        let mut db = MemDb::new(mctx.clone(), origin.clone(), class);
        for arg in args {
            match arg.split_once('=') {
                Some(("purge-batch", value)) => {
                    db.purge_batch = value.parse().map_err(|e| {
                        Error::new(ErrorKind::Config, "invalid purge batch")
                            .with_context("arg", arg)
                            .with_source(e)
                    })?;
                }
                _ => {
                    return Err(Error::new(ErrorKind::Config, "unknown store argument")
                        .with_context("type", MEMDB_TYPE)
                        .with_context("arg", arg))
                }
            }
        }
        Ok(Arc::new(db))
    }

    /// Bytes this store currently accounts to its memory context.
    pub fn charged(&self) -> usize {
        self.charged.load(Ordering::Relaxed)
    }

    fn charge(&self, size: usize) {
        if size == 0 {
            return;
        }
        self.charged.fetch_add(size, Ordering::Relaxed);
        self.mctx.allocate(size);
    }

    fn uncharge(&self, size: usize) {
        if size == 0 {
            return;
        }
        self.charged.fetch_sub(size, Ordering::Relaxed);
        self.mctx.release(size);
    }

    /// Remove up to `purge_batch` rdatasets held by nodes other than `except`, stale ones first, then the ones
    /// closest to expiry. Returns the weight freed.
    fn purge(&self, except: &Name) -> usize {
        if self.purge_batch == 0 {
            return 0;
        }
        let victims = {
            let tree = self.tree.read();
            tree.values()
                .filter(|node| node.name() != except)
                .flat_map(|node| {
                    node.read()
                        .iter()
                        .map(|r| (!r.stale, r.expire, node.clone(), r.rtype, r.covers))
                        .collect_vec()
                })
                .k_smallest_by_key(self.purge_batch, |(active, expire, node, rtype, covers)| {
                    (*active, *expire, node.name().clone(), *rtype, *covers)
                })
                .collect_vec()
        };

        let mut freed = 0;
        for (_, _, node, rtype, covers) in victims {
            if let Some(rdataset) = node.remove(rtype, covers) {
                tracing::trace!("[memdb] purged {} {} under memory pressure", node.name(), rdataset.rtype);
                freed += rdataset.weight();
            }
        }
        freed
    }
}

impl Drop for MemDb {
    fn drop(&mut self) {
        let charged = *self.charged.get_mut();
        if charged > 0 {
            self.mctx.release(charged);
        }
    }
}

impl Database for MemDb {
    fn class(&self) -> RdataClass {
        self.class
    }

    fn origin(&self) -> &Name {
        &self.origin
    }

    fn find_node(&self, name: &Name, create: bool) -> Result<Option<NodeRef>> {
        if let Some(node) = self.tree.read().get(name) {
            return Ok(Some(node.clone()));
        }
        if !create {
            return Ok(None);
        }
        let (node, created) = {
            let mut tree = self.tree.write();
            match tree.get(name) {
                Some(node) => (node.clone(), false),
                None => {
                    let node = Arc::new(Node::new(name.clone()));
                    tree.insert(name.clone(), node.clone());
                    (node, true)
                }
            }
        };
        if created {
            self.charge(node_weight(name));
        }
        Ok(Some(node))
    }

    fn first_node(&self) -> Result<Option<NodeRef>> {
        Ok(self.tree.read().values().next().cloned())
    }

    fn next_node(&self, after: &Name) -> Result<Option<NodeRef>> {
        Ok(self
            .tree
            .read()
            .range::<Name, _>((Bound::Excluded(after), Bound::Unbounded))
            .next()
            .map(|(_, node)| node.clone()))
    }

    fn expire_node(&self, node: &NodeRef, now: StdTime) -> Result<usize> {
        let mut rdatasets = node.write();
        let mut expired = 0;
        for rdataset in rdatasets.iter_mut().filter(|r| !r.stale && r.expire <= now) {
            rdataset.stale = true;
            expired += 1;
        }
        Ok(expired)
    }

    fn detach_node(&self, node: NodeRef) {
        let freed = node.free_stale();
        let pruned = if node.is_empty() {
            let mut tree = self.tree.write();
            // Only the tree and this reference hold the node, nobody can repopulate it.
            let prunable = matches!(tree.get(node.name()), Some(held) if Arc::ptr_eq(held, &node))
                && Arc::strong_count(&node) == 2
                && node.is_empty();
            if prunable {
                tree.remove(node.name())
            } else {
                None
            }
        } else {
            None
        };
        let pruned_weight = pruned.as_ref().map(|node| node_weight(node.name())).unwrap_or_default();
        drop(pruned);
        drop(node);
        self.uncharge(freed + pruned_weight);
    }

    fn all_rdatasets(&self, node: &NodeRef) -> Result<Vec<Rdataset>> {
        Ok(node.read().iter().filter(|r| !r.stale).cloned().collect())
    }

    fn find_rdataset(
        &self,
        node: &NodeRef,
        rtype: RdataType,
        covers: RdataType,
        now: StdTime,
    ) -> Result<Option<Rdataset>> {
        Ok(node
            .read()
            .iter()
            .find(|r| r.matches(rtype, covers) && r.is_active(now))
            .cloned())
    }

    fn add_rdataset(&self, node: &NodeRef, rdataset: Rdataset, _now: StdTime) -> Result<AddOutcome> {
        let purged = if self.is_overmem() { self.purge(node.name()) } else { 0 };

        let weight = rdataset.weight();
        let old = {
            let mut rdatasets = node.write();
            match rdatasets
                .iter_mut()
                .find(|r| r.matches(rdataset.rtype, rdataset.covers))
            {
                Some(existing) => Some(std::mem::replace(existing, rdataset)),
                None => {
                    rdatasets.push(rdataset);
                    None
                }
            }
        };

        self.charge(weight);
        let released = purged + old.as_ref().map(Rdataset::weight).unwrap_or_default();
        self.uncharge(released);

        Ok(match old {
            Some(_) => AddOutcome::Replaced,
            None => AddOutcome::Added,
        })
    }

    fn delete_rdataset(&self, node: &NodeRef, rtype: RdataType, covers: RdataType) -> Result<DeleteOutcome> {
        match node.remove(rtype, covers) {
            Some(rdataset) => {
                self.uncharge(rdataset.weight());
                Ok(DeleteOutcome::Deleted)
            }
            None => Ok(DeleteOutcome::Unchanged),
        }
    }

    fn set_overmem(&self, overmem: bool) {
        self.overmem.store(overmem, Ordering::Release);
    }

    fn is_overmem(&self) -> bool {
        self.overmem.load(Ordering::Acquire)
    }

    fn node_count(&self) -> usize {
        self.tree.read().len()
    }
}
