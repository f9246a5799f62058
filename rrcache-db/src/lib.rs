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

//! The record store rrcache manages.
//!
//! A [`Database`] maps owner [`Name`]s to [`Node`]s, each holding the [`Rdataset`]s cached for that name. The cache
//! core only ever talks to the [`Database`] contract; [`MemDb`] is the in-memory implementation registered as the
//! `"btree"` store type in the default [`DbRegistry`].

mod db;
mod iterator;
/// Master-file style dump and load.
pub mod master;
mod memdb;
mod name;
mod node;
mod rdata;
mod registry;

pub use crate::{
    db::{AddOutcome, Database, DeleteOutcome},
    iterator::DbIterator,
    memdb::{MemDb, MEMDB_TYPE},
    name::Name,
    node::{Node, NodeRef},
    rdata::{RdataClass, RdataType, Rdataset},
    registry::{DbCreator, DbRegistry},
};
