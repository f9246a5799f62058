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

use rrcache_common::error::Result;

use crate::{db::Database, name::Name, node::NodeRef};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Unstarted,
    At(Name),
    Exhausted,
}

/// Forward iterator over the nodes of a store in canonical order.
///
/// The iterator only remembers the name it stopped at, so it holds no node attached between steps and tolerates
/// nodes being added or removed concurrently: it resumes from the first name after the last visited one.
#[derive(Debug)]
pub struct DbIterator {
    db: Arc<dyn Database>,
    position: Position,
}

impl DbIterator {
    /// Create an iterator positioned before the first node.
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            position: Position::Unstarted,
        }
    }

    /// The store iterated.
    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Move to the first node.
    pub fn first(&mut self) -> Result<Option<NodeRef>> {
        self.position = Position::Unstarted;
        self.advance()
    }

    /// Move to the next node, `Ok(None)` once exhausted.
    pub fn advance(&mut self) -> Result<Option<NodeRef>> {
        let node = match &self.position {
            Position::Unstarted => self.db.first_node()?,
            Position::At(name) => self.db.next_node(name)?,
            Position::Exhausted => return Ok(None),
        };
        self.position = match &node {
            Some(node) => Position::At(node.name().clone()),
            None => Position::Exhausted,
        };
        Ok(node)
    }

    /// The node the iterator is at, if it still exists.
    pub fn current(&self) -> Result<Option<NodeRef>> {
        match &self.position {
            Position::At(name) => self.db.find_node(name, false),
            _ => Ok(None),
        }
    }

    /// Whether the iterator ran past the last node.
    pub fn is_exhausted(&self) -> bool {
        self.position == Position::Exhausted
    }
}

impl Iterator for DbIterator {
    type Item = Result<NodeRef>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}
