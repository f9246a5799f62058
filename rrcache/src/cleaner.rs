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

use std::{sync::Arc, time::Duration};

use rrcache_common::{
    error::Result,
    strict_assert_eq,
    task::{Task, TaskContext, TaskEvent},
    time::{stdtime_now, StdTime},
    timer::{timer, Timer, TimerEvent, TimerMode, TimerSource},
};
use rrcache_db::{Database, DbIterator};

use crate::cache::CacheInner;

/// State of the cache cleaner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanerState {
    /// Waiting for the next tick or memory pressure.
    #[default]
    Idle,
    /// A sweep is in progress.
    Busy,
    /// A sweep driven by memory pressure finished. The next tick returns to idle.
    Done,
}

/// Events posted to the cleaner task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CleanerEvent {
    /// The cache went overmem.
    Overmem,
    /// Run the next pass of the current sweep.
    Pass,
}

/// Cleaner state guarded by the cleaner lock.
///
/// The lock is taken from the memory watermark callback. Never account memory while holding it.
#[derive(Debug, Default)]
pub(crate) struct CleanerShared {
    pub(crate) overmem: bool,
    pub(crate) state: CleanerState,
    /// Bumped by every flush so a running sweep moves to the new store.
    pub(crate) generation: u64,
    pub(crate) task: Option<Task<CleanerEvent>>,
}

/// Periodic statistics log, re-armed after each fire.
#[derive(Debug)]
pub(crate) struct Diagnostic {
    timer: Timer,
    source: TimerSource,
    interval: Duration,
}

impl Diagnostic {
    pub(crate) fn new(interval: Duration) -> Self {
        let (timer, source) = timer(TimerMode::Once(interval));
        Self {
            timer,
            source,
            interval,
        }
    }
}

async fn diagnostic_fired(diagnostic: &mut Option<Diagnostic>) -> Option<TimerEvent> {
    match diagnostic {
        Some(diagnostic) => diagnostic.source.fired().await,
        None => std::future::pending().await,
    }
}

/// Mark stale every rdataset of `db` expiring at or before `now`, returns the number of nodes examined.
///
/// A node that fails to expire is logged and skipped. Only failing to walk the store is an error.
pub fn clean_now(db: &Arc<dyn Database>, now: StdTime) -> Result<usize> {
    let mut iter = DbIterator::new(db.clone());
    let mut examined = 0;
    let mut next = iter.first()?;
    while let Some(node) = next {
        if let Err(e) = db.expire_node(&node, now) {
            tracing::warn!("[cleaner] failed to expire {}: {e}", node.name());
        }
        db.detach_node(node);
        examined += 1;
        next = iter.advance()?;
    }
    Ok(examined)
}

struct Sweep {
    iter: DbIterator,
    generation: u64,
    /// Started or joined by memory pressure.
    pressure: bool,
    examined: usize,
    expired: usize,
}

/// The cleaner task.
///
/// Owns a strong reference to the cache: while it runs the cache cannot be freed. It lets go of it only after the
/// shutdown notification, once its timers are detached and its pending events purged.
pub(crate) struct Cleaner {
    inner: Arc<CacheInner>,
    ctx: TaskContext<CleanerEvent>,
    ticker: TimerSource,
    diagnostic: Option<Diagnostic>,
    sweep: Option<Sweep>,
}

impl Cleaner {
    pub(crate) fn new(
        inner: Arc<CacheInner>,
        ctx: TaskContext<CleanerEvent>,
        ticker: TimerSource,
        diagnostic: Option<Diagnostic>,
    ) -> Self {
        Self {
            inner,
            ctx,
            ticker,
            diagnostic,
            sweep: None,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!("[cleaner] {} started", self.ctx.name());
        loop {
            tokio::select! {
                biased;
                event = self.ctx.next() => match event {
                    Some(TaskEvent::Event(CleanerEvent::Pass)) => self.pass(),
                    Some(TaskEvent::Event(CleanerEvent::Overmem)) => self.on_overmem(),
                    Some(TaskEvent::Shutdown) | None => break,
                },
                Some(_) = self.ticker.fired() => self.on_tick(),
                Some(_) = diagnostic_fired(&mut self.diagnostic) => self.on_diagnostic(),
            }
        }
        self.shutdown();
    }

    fn post(&self, event: CleanerEvent) {
        let task = self.inner.cleaner.lock().task.clone();
        if let Some(task) = task {
            if let Err(e) = task.send(event) {
                tracing::error!("[cleaner] failed to post {event:?}: {e}");
            }
        }
    }

    fn start_sweep(&mut self, pressure: bool, generation: u64) {
        tracing::debug!("[cleaner] begin {} sweep", if pressure { "overmem" } else { "periodic" });
        self.sweep = Some(Sweep {
            iter: DbIterator::new(self.inner.store()),
            generation,
            pressure,
            examined: 0,
            expired: 0,
        });
        self.post(CleanerEvent::Pass);
    }

    fn on_tick(&mut self) {
        let start = {
            let mut cleaner = self.inner.cleaner.lock();
            tracing::debug!("[cleaner] cleaning timer fired, state {:?}", cleaner.state);
            match cleaner.state {
                CleanerState::Busy => None,
                CleanerState::Done => {
                    cleaner.state = CleanerState::Idle;
                    None
                }
                CleanerState::Idle => {
                    cleaner.state = CleanerState::Busy;
                    Some(cleaner.generation)
                }
            }
        };
        if let Some(generation) = start {
            self.start_sweep(false, generation);
        }
    }

    fn on_overmem(&mut self) {
        let start = {
            let mut cleaner = self.inner.cleaner.lock();
            match (cleaner.overmem, cleaner.state, self.sweep.as_mut()) {
                // Relieved before the signal was handled.
                (false, _, _) => None,
                (true, CleanerState::Busy, Some(sweep)) => {
                    sweep.pressure = true;
                    None
                }
                (true, _, _) => {
                    cleaner.state = CleanerState::Busy;
                    Some(cleaner.generation)
                }
            }
        };
        if let Some(generation) = start {
            self.start_sweep(true, generation);
        }
    }

    /// Examine the next `increment` nodes of the running sweep.
    fn pass(&mut self) {
        let Some(mut sweep) = self.sweep.take() else {
            return;
        };

        let generation = self.inner.cleaner.lock().generation;
        if generation != sweep.generation {
            tracing::debug!("[cleaner] store flushed, restarting sweep on the new store");
            sweep.iter = DbIterator::new(self.inner.store());
            sweep.generation = generation;
        }

        let db = sweep.iter.db().clone();
        let now = stdtime_now();
        for _ in 0..self.inner.increment {
            match sweep.iter.advance() {
                Ok(Some(node)) => {
                    match db.expire_node(&node, now) {
                        Ok(expired) => sweep.expired += expired,
                        Err(e) => tracing::warn!("[cleaner] failed to expire {}: {e}", node.name()),
                    }
                    db.detach_node(node);
                    sweep.examined += 1;
                }
                Ok(None) => return self.complete(sweep),
                Err(e) => {
                    tracing::warn!("[cleaner] sweep aborted after {} nodes: {e}", sweep.examined);
                    self.inner.cleaner.lock().state = CleanerState::Idle;
                    return;
                }
            }
        }

        self.sweep = Some(sweep);
        self.post(CleanerEvent::Pass);
    }

    fn complete(&mut self, sweep: Sweep) {
        let restart = {
            let mut cleaner = self.inner.cleaner.lock();
            // Sweep again while it still frees something and the pressure lasts.
            if sweep.pressure && cleaner.overmem && sweep.expired > 0 {
                Some(cleaner.generation)
            } else {
                cleaner.state = match sweep.pressure {
                    true => CleanerState::Done,
                    false => CleanerState::Idle,
                };
                None
            }
        };
        tracing::debug!(
            "[cleaner] sweep complete, {} nodes examined, {} rdatasets expired",
            sweep.examined,
            sweep.expired
        );
        self.inner.listener.on_sweep_complete(sweep.examined);
        drop(sweep);

        if let Some(generation) = restart {
            self.start_sweep(true, generation);
        }
    }

    fn on_diagnostic(&mut self) {
        let db = self.inner.store();
        let (overmem, state) = {
            let cleaner = self.inner.cleaner.lock();
            (cleaner.overmem, cleaner.state)
        };
        tracing::debug!(
            "[cleaner] {}: {} nodes, {} bytes in use (peak {}), overmem {overmem}, state {state:?}",
            self.inner.mctx.name(),
            db.node_count(),
            self.inner.mctx.inuse(),
            self.inner.mctx.max_inuse(),
        );
        if let Some(diagnostic) = self.diagnostic.as_ref() {
            if let Err(e) = diagnostic.timer.reset(TimerMode::Once(diagnostic.interval)) {
                tracing::warn!("[cleaner] failed to re-arm diagnostic timer: {e}");
            }
        }
    }

    fn shutdown(mut self) {
        let (references, timer) = {
            let mut handle = self.inner.handle.lock();
            let timer = handle.timer.take();
            strict_assert_eq!(handle.live_tasks, 1);
            handle.live_tasks = handle.live_tasks.saturating_sub(1);
            (handle.references, timer)
        };
        drop(timer);
        self.diagnostic = None;
        let abandoned = self.sweep.take();
        let task = {
            let mut cleaner = self.inner.cleaner.lock();
            if abandoned.is_some() {
                cleaner.state = CleanerState::Idle;
            }
            cleaner.task.take()
        };
        drop(task);

        let purged = self.ctx.purge(|_| true);
        if let Some(sweep) = abandoned {
            tracing::debug!("[cleaner] sweep abandoned after {} nodes", sweep.examined);
        }
        tracing::debug!("[cleaner] {} shut down, {purged} pending events purged", self.ctx.name());
        if references == 0 {
            tracing::debug!("[cleaner] last cache reference already gone, freeing");
        }
    }
}
