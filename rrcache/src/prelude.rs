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

pub use rrcache_common::{
    error::{Error, ErrorKind, Result},
    mem::{MemoryContext, WaterMark},
    runtime::Spawner,
    task::TaskManager,
    time::{stdtime_now, StdTime},
};
pub use rrcache_db::{
    AddOutcome, Database, DbIterator, DbRegistry, DeleteOutcome, MemDb, Name, NodeRef, RdataClass, RdataType,
    Rdataset, MEMDB_TYPE,
};

pub use crate::{
    cache::{Cache, CacheBuilder},
    cleaner::{clean_now, CleanerState},
    config::{CacheConfig, DEFAULT_CLEANING_INCREMENT, DEFAULT_CLEANING_INTERVAL, MIN_CACHE_SIZE},
    listener::{CacheEventListener, DefaultCacheEventListener},
};
