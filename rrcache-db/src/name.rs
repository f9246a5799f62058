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
    cmp::Ordering,
    fmt::{Debug, Display},
    str::FromStr,
};

use rrcache_common::error::{Error, ErrorKind, Result};

const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;

/// An absolute domain name.
///
/// Names are stored lowercased with a trailing dot, so equality is case-insensitive. Ordering follows the DNSSEC
/// canonical order: labels are compared right to left, so a zone sorts right before everything below it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Name(String);

impl Name {
    /// Parse and normalize a name. A missing trailing dot is added.
    pub fn new(name: &str) -> Result<Self> {
        let invalid = |reason: &'static str| {
            Error::new(ErrorKind::Parse, "invalid name")
                .with_context("name", name)
                .with_context("reason", reason)
        };

        if name.is_empty() {
            return Err(invalid("empty"));
        }
        if name == "." {
            return Ok(Self::root());
        }

        if name.starts_with('$') {
            return Err(invalid("leading `$`"));
        }

        let trimmed = name.strip_suffix('.').unwrap_or(name);
        let mut normalized = String::with_capacity(trimmed.len() + 1);
        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(invalid("empty label"));
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(invalid("label too long"));
            }
            if label.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(invalid("whitespace or control character"));
            }
            // Reserved by the master file syntax.
            if label.contains([';', '"', '\\']) {
                return Err(invalid("reserved character"));
            }
            normalized.push_str(&label.to_ascii_lowercase());
            normalized.push('.');
        }
        if normalized.len() > MAX_NAME_LEN {
            return Err(invalid("name too long"));
        }
        Ok(Self(normalized))
    }

    /// The root name.
    pub fn root() -> Self {
        Self(".".to_string())
    }

    /// Whether this is the root name.
    pub fn is_root(&self) -> bool {
        self.0 == "."
    }

    /// Textual form, always with a trailing dot.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Labels from left to right, root excluded.
    pub fn labels(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.split('.').filter(|label| !label.is_empty())
    }

    /// Whether `self` is `other` or below it.
    pub fn is_subdomain_of(&self, other: &Name) -> bool {
        other.is_root() || self.0 == other.0 || self.0.ends_with(&format!(".{}", other.0))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.labels().rev().cmp(other.labels().rev())
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Name({})", self.0)
    }
}
