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

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use itertools::Itertools;
use rrcache_common::{
    error::{Error, ErrorKind, Result},
    mem::MemoryContext,
};

use crate::{
    db::Database,
    memdb::{MemDb, MEMDB_TYPE},
    name::Name,
    rdata::RdataClass,
};

/// Store constructor: `(memory context, origin, class, args)`.
pub trait DbCreator:
    Fn(&Arc<MemoryContext>, &Name, RdataClass, &[String]) -> Result<Arc<dyn Database>> + Send + Sync + 'static
{
}
impl<T> DbCreator for T where
    T: Fn(&Arc<MemoryContext>, &Name, RdataClass, &[String]) -> Result<Arc<dyn Database>> + Send + Sync + 'static
{
}

/// Store constructors keyed by store type identifier.
#[derive(Clone)]
pub struct DbRegistry {
    creators: HashMap<String, Arc<dyn DbCreator>>,
}

impl Debug for DbRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbRegistry")
            .field("types", &self.creators.keys().sorted().collect_vec())
            .finish()
    }
}

impl Default for DbRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.creators.insert(MEMDB_TYPE.to_string(), Arc::new(MemDb::create));
        registry
    }
}

impl DbRegistry {
    /// A registry that knows no store type.
    pub fn empty() -> Self {
        Self {
            creators: HashMap::new(),
        }
    }

    /// Register a store type. Fails with [`ErrorKind::Exists`] if the identifier is taken.
    pub fn register(&mut self, db_type: impl Into<String>, creator: impl DbCreator) -> Result<()> {
        let db_type = db_type.into();
        if self.creators.contains_key(&db_type) {
            return Err(Error::new(ErrorKind::Exists, "store type already registered").with_context("type", db_type));
        }
        self.creators.insert(db_type, Arc::new(creator));
        Ok(())
    }

    /// Whether a store type is registered.
    pub fn contains(&self, db_type: &str) -> bool {
        self.creators.contains_key(db_type)
    }

    /// Create a store of the given type.
    pub fn create(
        &self,
        db_type: &str,
        mctx: &Arc<MemoryContext>,
        origin: &Name,
        class: RdataClass,
        args: &[String],
    ) -> Result<Arc<dyn Database>> {
        let creator = self
            .creators
            .get(db_type)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "unknown store type").with_context("type", db_type))?;
        creator(mctx, origin, class, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_knows_memdb() {
        let registry = DbRegistry::default();
        let mctx = Arc::new(MemoryContext::new("test"));
        let db = registry.create(MEMDB_TYPE, &mctx, &Name::root(), RdataClass::Ch, &[]).unwrap();
        assert_eq!(db.class(), RdataClass::Ch);
        assert_eq!(db.node_count(), 0);

        let err = registry.create("rbt", &mctx, &Name::root(), RdataClass::In, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_register() {
        let mut registry = DbRegistry::empty();
        assert!(!registry.contains(MEMDB_TYPE));
        registry.register("small", |mctx: &Arc<MemoryContext>, origin: &Name, class: RdataClass, _: &[String]| {
            Ok(Arc::new(MemDb::new(mctx.clone(), origin.clone(), class).with_purge_batch(1)) as Arc<dyn Database>)
        })
        .unwrap();
        assert!(registry.contains("small"));
        let err = registry.register("small", MemDb::create).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exists);
    }
}
