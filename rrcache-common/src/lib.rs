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

//! Shared components for rrcache.
//!
//! This crate hosts the pieces every other rrcache crate leans on: the error type, the memory context with its
//! high/low watermarks, the task/timer runtime the cache cleaner is driven by, and a couple of small helpers.

/// Strict assertion helpers.
pub mod assert;
/// The error type shared by all rrcache crates.
pub mod error;
/// Memory accounting with watermark signaling.
pub mod mem;
/// Tokio runtime wrappers.
pub mod runtime;
/// Serialized execution contexts.
pub mod task;
/// Timers bound to a task.
pub mod timer;
/// Wall clock helpers in whole seconds.
pub mod time;
