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

use std::{fmt::Debug, sync::Arc};

use parking_lot::Mutex;

/// Which watermark a usage change crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaterMark {
    /// Usage rose above the high watermark.
    High,
    /// Usage fell below the low watermark after a high watermark signal.
    Low,
}

/// Watermark callback.
///
/// The callback is always invoked outside of the memory context lock, but it may be invoked from inside any
/// [`MemoryContext::allocate`] or [`MemoryContext::release`] call. Whatever lock the callback takes must never be
/// held while memory is being accounted to the same context.
pub trait WaterCallback: Fn(WaterMark) + Send + Sync + 'static {}
impl<T> WaterCallback for T where T: Fn(WaterMark) + Send + Sync + 'static {}

/// A pair of watermarks with the callback to notify when usage crosses them.
#[derive(Clone)]
pub struct Water {
    /// High watermark in bytes.
    pub hi: usize,
    /// Low watermark in bytes.
    pub lo: usize,
    /// Callback to notify.
    pub callback: Arc<dyn WaterCallback>,
}

impl Debug for Water {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Water").field("hi", &self.hi).field("lo", &self.lo).finish()
    }
}

impl Water {
    /// Create a watermark pair.
    pub fn new(hi: usize, lo: usize, callback: impl WaterCallback) -> Self {
        Self {
            hi,
            lo,
            callback: Arc::new(callback),
        }
    }

    fn is_enabled(&self) -> bool {
        self.hi != 0 && self.lo != 0
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    inuse: usize,
    max_inuse: usize,
    water: Option<Water>,
    /// A high watermark signal has been acknowledged and no low watermark signal has been acknowledged since.
    hi_called: bool,
}

/// Memory accounting context.
///
/// Stores charge what they hold with [`MemoryContext::allocate`] and give it back with [`MemoryContext::release`].
/// When watermarks are installed, crossing them notifies the installed callback until the owner acknowledges the
/// signal with [`MemoryContext::water_ack`].
#[derive(Debug)]
pub struct MemoryContext {
    name: String,
    state: Mutex<MemoryState>,
}

impl Default for MemoryContext {
    fn default() -> Self {
        Self::new("default")
    }
}

impl MemoryContext {
    /// Create a memory context with a name for logging.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Name of the memory context.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes currently accounted.
    pub fn inuse(&self) -> usize {
        self.state.lock().inuse
    }

    /// Peak of bytes accounted.
    pub fn max_inuse(&self) -> usize {
        self.state.lock().max_inuse
    }

    /// Current watermarks as `(hi, lo)`, if enforcement is enabled.
    pub fn watermarks(&self) -> Option<(usize, usize)> {
        self.state.lock().water.as_ref().map(|w| (w.hi, w.lo))
    }

    /// Account `size` bytes.
    pub fn allocate(&self, size: usize) {
        let callback = {
            let mut state = self.state.lock();
            state.inuse += size;
            state.max_inuse = state.max_inuse.max(state.inuse);
            match state.water.as_ref() {
                Some(water) if state.inuse > water.hi && !state.hi_called => Some(water.callback.clone()),
                _ => None,
            }
        };
        if let Some(callback) = callback {
            tracing::trace!("[mem] {}: crossed high watermark", self.name);
            callback(WaterMark::High);
        }
    }

    /// Give back `size` bytes.
    pub fn release(&self, size: usize) {
        let callback = {
            let mut state = self.state.lock();
            crate::strict_assert!(state.inuse >= size, "releasing more memory than accounted");
            state.inuse = state.inuse.saturating_sub(size);
            match state.water.as_ref() {
                Some(water) if state.hi_called && state.inuse < water.lo => Some(water.callback.clone()),
                _ => None,
            }
        };
        if let Some(callback) = callback {
            tracing::trace!("[mem] {}: crossed low watermark", self.name);
            callback(WaterMark::Low);
        }
    }

    /// Acknowledge a watermark signal.
    ///
    /// An acknowledged high watermark stops further high signals until a low signal is acknowledged.
    pub fn water_ack(&self, mark: WaterMark) {
        self.state.lock().hi_called = mark == WaterMark::High;
    }

    /// Install, replace, or (with `None` or a zero watermark) remove the watermarks.
    ///
    /// If the context is acknowledged over the high watermark and the new setting no longer considers it so, the
    /// previous callback receives one final [`WaterMark::Low`].
    pub fn set_water(&self, water: Option<Water>) {
        let water = water.filter(Water::is_enabled);
        let callback = {
            let mut state = self.state.lock();
            let relieved = match water.as_ref() {
                None => true,
                Some(water) => state.inuse < water.lo,
            };
            let old = std::mem::replace(&mut state.water, water);
            if state.hi_called && relieved {
                state.hi_called = false;
                old.map(|old| old.callback)
            } else {
                None
            }
        };
        if let Some(callback) = callback {
            callback(WaterMark::Low);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        high: AtomicUsize,
        low: AtomicUsize,
    }

    fn water(counter: &Arc<Counter>, hi: usize, lo: usize) -> Water {
        let counter = counter.clone();
        Water::new(hi, lo, move |mark| {
            match mark {
                WaterMark::High => counter.high.fetch_add(1, Ordering::Relaxed),
                WaterMark::Low => counter.low.fetch_add(1, Ordering::Relaxed),
            };
        })
    }

    #[test]
    fn test_accounting() {
        let mctx = MemoryContext::new("test");
        mctx.allocate(100);
        mctx.allocate(50);
        mctx.release(120);
        assert_eq!(mctx.inuse(), 30);
        assert_eq!(mctx.max_inuse(), 150);
    }

    #[test]
    fn test_high_signal_repeats_until_ack() {
        let counter = Arc::new(Counter::default());
        let mctx = MemoryContext::new("test");
        mctx.set_water(Some(water(&counter, 100, 50)));

        mctx.allocate(101);
        mctx.allocate(1);
        assert_eq!(counter.high.load(Ordering::Relaxed), 2);

        mctx.water_ack(WaterMark::High);
        mctx.allocate(1);
        assert_eq!(counter.high.load(Ordering::Relaxed), 2);

        // Still above the low watermark.
        mctx.release(40);
        assert_eq!(counter.low.load(Ordering::Relaxed), 0);

        mctx.release(20);
        assert_eq!(counter.low.load(Ordering::Relaxed), 1);
        mctx.water_ack(WaterMark::Low);
        mctx.release(1);
        assert_eq!(counter.low.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_disable_water_relieves_pending_high() {
        let counter = Arc::new(Counter::default());
        let mctx = MemoryContext::new("test");
        mctx.set_water(Some(water(&counter, 100, 50)));
        mctx.allocate(200);
        mctx.water_ack(WaterMark::High);

        mctx.set_water(None);
        assert_eq!(counter.low.load(Ordering::Relaxed), 1);
        assert_eq!(mctx.watermarks(), None);

        // No more signals once disabled.
        mctx.allocate(1000);
        assert_eq!(counter.high.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_zero_watermark_disables() {
        let counter = Arc::new(Counter::default());
        let mctx = MemoryContext::new("test");
        mctx.set_water(Some(water(&counter, 0, 0)));
        assert_eq!(mctx.watermarks(), None);
        mctx.allocate(usize::MAX / 2);
        assert_eq!(counter.high.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_replace_water_keeps_overmem_when_still_above() {
        let counter = Arc::new(Counter::default());
        let mctx = MemoryContext::new("test");
        mctx.set_water(Some(water(&counter, 100, 50)));
        mctx.allocate(200);
        mctx.water_ack(WaterMark::High);

        mctx.set_water(Some(water(&counter, 150, 120)));
        assert_eq!(counter.low.load(Ordering::Relaxed), 0);
        mctx.allocate(1);
        assert_eq!(counter.high.load(Ordering::Relaxed), 1);

        mctx.set_water(Some(water(&counter, 1000, 500)));
        assert_eq!(counter.low.load(Ordering::Relaxed), 1);
    }
}
