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
    fmt::{Debug, Display},
    str::FromStr,
};

use rrcache_common::{
    error::{Error, ErrorKind, Result},
    time::StdTime,
};
use serde::{Deserialize, Serialize};

/// Record class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RdataClass {
    /// Internet.
    #[default]
    In,
    /// Chaos.
    Ch,
    /// Hesiod.
    Hs,
}

impl RdataClass {
    /// Mnemonic of the class.
    pub fn as_str(&self) -> &'static str {
        match self {
            RdataClass::In => "IN",
            RdataClass::Ch => "CH",
            RdataClass::Hs => "HS",
        }
    }

    /// Numeric value of the class.
    pub fn value(&self) -> u16 {
        match self {
            RdataClass::In => 1,
            RdataClass::Ch => 3,
            RdataClass::Hs => 4,
        }
    }
}

impl Display for RdataClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RdataClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(RdataClass::In),
            "CH" | "CHAOS" => Ok(RdataClass::Ch),
            "HS" | "HESIOD" => Ok(RdataClass::Hs),
            _ => Err(Error::new(ErrorKind::Parse, "unknown class").with_context("class", s)),
        }
    }
}

/// Record type.
///
/// Types without a mnemonic are written and parsed in the generic `TYPEnnn` form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RdataType(pub u16);

macro_rules! rdata_types {
    ($( $name:ident = $value:expr, )*) => {
        impl RdataType {
            $(
                #[doc = concat!("`", stringify!($name), "` record type.")]
                pub const $name: RdataType = RdataType($value);
            )*

            /// Mnemonic of the type, if it has one.
            pub fn mnemonic(&self) -> Option<&'static str> {
                match self.0 {
                    $( $value => Some(stringify!($name)), )*
                    _ => None,
                }
            }

            fn from_mnemonic(s: &str) -> Option<Self> {
                match s {
                    $( stringify!($name) => Some(Self::$name), )*
                    _ => None,
                }
            }
        }
    };
}

rdata_types! {
    A = 1,
    NS = 2,
    CNAME = 5,
    SOA = 6,
    PTR = 12,
    MX = 15,
    TXT = 16,
    AAAA = 28,
    SRV = 33,
    DS = 43,
    RRSIG = 46,
    NSEC = 47,
    DNSKEY = 48,
}

impl RdataType {
    /// The "no type" value, used as `covers` by everything but signatures.
    pub const NONE: RdataType = RdataType(0);
}

impl Display for RdataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mnemonic() {
            Some(mnemonic) => f.write_str(mnemonic),
            None => write!(f, "TYPE{}", self.0),
        }
    }
}

impl Debug for RdataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for RdataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.to_ascii_uppercase();
        if let Some(t) = RdataType::from_mnemonic(&upper) {
            return Ok(t);
        }
        upper
            .strip_prefix("TYPE")
            .and_then(|v| v.parse::<u16>().ok())
            .map(RdataType)
            .ok_or_else(|| Error::new(ErrorKind::Parse, "unknown type").with_context("type", s))
    }
}

/// A set of records sharing owner name, class and type.
///
/// `rdata` holds the records in presentation form. `expire` is the absolute time the set stops being usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdataset {
    /// Type of the records.
    pub rtype: RdataType,
    /// Covered type for signatures, [`RdataType::NONE`] otherwise.
    pub covers: RdataType,
    /// TTL the set was cached with.
    pub ttl: u32,
    /// Absolute expiry time.
    pub expire: StdTime,
    /// Records in presentation form.
    pub rdata: Vec<String>,
    /// Marked stale by expiry, waiting to be freed.
    pub stale: bool,
}

/// Fixed bookkeeping cost charged per rdataset on top of its records.
const RDATASET_OVERHEAD: usize = 64;

impl Rdataset {
    /// Create a set cached at `now` for `ttl` seconds.
    pub fn new(rtype: RdataType, ttl: u32, rdata: Vec<String>, now: StdTime) -> Self {
        Self {
            rtype,
            covers: RdataType::NONE,
            ttl,
            expire: now.saturating_add(ttl),
            rdata,
            stale: false,
        }
    }

    /// Set the covered type.
    pub fn with_covers(mut self, covers: RdataType) -> Self {
        self.covers = covers;
        self
    }

    /// Bytes this set is accounted for.
    pub fn weight(&self) -> usize {
        RDATASET_OVERHEAD + self.rdata.iter().map(|r| r.len()).sum::<usize>()
    }

    /// Whether the set may still be served at `now`.
    pub fn is_active(&self, now: StdTime) -> bool {
        !self.stale && self.expire > now
    }

    /// Whether this set has the given type and covered type.
    pub fn matches(&self, rtype: RdataType, covers: RdataType) -> bool {
        self.rtype == rtype && self.covers == covers
    }
}
