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

use std::sync::{Arc, Weak};

use rrcache_common::mem::{WaterCallback, WaterMark};

use crate::{cache::CacheInner, cleaner::CleanerEvent, config::MIN_CACHE_SIZE};

/// Watermarks `(hi, lo)` for a cache of `size` bytes, `None` if the size means unlimited.
///
/// Nonzero sizes are raised to [`MIN_CACHE_SIZE`].
pub(crate) fn watermarks(size: usize) -> Option<(usize, usize)> {
    let size = if size != 0 && size < MIN_CACHE_SIZE { MIN_CACHE_SIZE } else { size };
    let hi = size - (size >> 3);
    let lo = size - (size >> 2);
    if size == 0 || hi == 0 || lo == 0 {
        None
    } else {
        Some((hi, lo))
    }
}

/// The callback installed on the memory context of a cache.
///
/// It only holds a weak reference: the memory context outlives the cache and must not keep it alive.
pub(crate) fn callback(cache: Weak<CacheInner>) -> impl WaterCallback {
    move |mark: WaterMark| {
        if let Some(inner) = cache.upgrade() {
            on_watermark(&inner, mark);
        }
    }
}

/// React to a watermark crossing.
///
/// Runs under the cleaner lock only. The cleaner lock is never held while memory is accounted, and nothing here
/// accounts memory while holding it.
pub(crate) fn on_watermark(inner: &Arc<CacheInner>, mark: WaterMark) {
    let overmem = mark == WaterMark::High;

    let (changed, task) = {
        let mut cleaner = inner.cleaner.lock();
        if cleaner.overmem == overmem {
            (false, None)
        } else {
            // Flush swaps the store under this lock, so the store seen here is the one that stays current. The guard
            // never holds the last reference to it.
            inner.db.load().set_overmem(overmem);
            cleaner.overmem = overmem;
            inner.mctx.water_ack(mark);
            (true, cleaner.task.clone())
        }
    };

    if !changed {
        return;
    }
    tracing::debug!("[water] {}: overmem {overmem}", inner.mctx.name());
    inner.listener.on_overmem(overmem);

    if overmem {
        if let Some(task) = task {
            if let Err(e) = task.send(CleanerEvent::Overmem) {
                tracing::debug!("[water] cleaner gone, overmem not posted: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermarks() {
        assert_eq!(watermarks(0), None);
        // Clamped to the minimum.
        assert_eq!(
            watermarks(1),
            Some((MIN_CACHE_SIZE - MIN_CACHE_SIZE / 8, MIN_CACHE_SIZE - MIN_CACHE_SIZE / 4))
        );
        let size = 10 * 1024 * 1024 + 3;
        assert_eq!(watermarks(size), Some((size - size / 8, size - size / 4)));
    }
}
