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

use std::{path::PathBuf, time::Duration};

use rrcache_db::{RdataClass, MEMDB_TYPE};
use serde::{Deserialize, Serialize};

/// Nonzero cache sizes below this are raised to it.
pub const MIN_CACHE_SIZE: usize = 2 * 1024 * 1024;

/// Default number of nodes a cleaning pass examines.
pub const DEFAULT_CLEANING_INCREMENT: usize = 1000;

/// Default cleaning interval in seconds. Zero disables periodic cleaning.
pub const DEFAULT_CLEANING_INTERVAL: u32 = 0;

/// Declarative cache configuration.
///
/// Every field has a default, so a partial document deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Class of the cached records.
    pub class: RdataClass,
    /// Store type identifier, looked up in the store registry.
    pub db_type: String,
    /// Arguments passed to the store constructor.
    pub db_args: Vec<String>,
    /// Cache size in bytes, 0 means unlimited.
    pub cache_size: usize,
    /// Cleaning interval in seconds, 0 disables periodic cleaning.
    pub cleaning_interval: u32,
    /// Nodes examined per cleaning pass.
    pub cleaning_increment: usize,
    /// File the cache is dumped to and loaded from.
    pub filename: Option<PathBuf>,
    /// Interval of the diagnostic statistics log, disabled if absent.
    #[serde(with = "secs", skip_serializing_if = "Option::is_none")]
    pub diagnostic_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            class: RdataClass::In,
            db_type: MEMDB_TYPE.to_string(),
            db_args: vec![],
            cache_size: 0,
            cleaning_interval: DEFAULT_CLEANING_INTERVAL,
            cleaning_increment: DEFAULT_CLEANING_INCREMENT,
            filename: None,
            diagnostic_interval: None,
        }
    }
}

/// Optional durations as whole seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
