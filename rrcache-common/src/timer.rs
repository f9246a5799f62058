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

use std::time::Duration;

use tokio::{sync::watch, time::Instant};

use crate::error::{Error, Result};

/// How a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerMode {
    /// Never fires.
    #[default]
    Inactive,
    /// Fires repeatedly with the given period. A zero period is treated as inactive.
    Ticker(Duration),
    /// Fires once after the given delay, then stays silent until reset.
    Once(Duration),
}

/// What fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// A ticker period elapsed.
    Tick,
    /// A one-shot delay elapsed.
    Once,
}

/// Create a timer and the source that delivers its expirations.
///
/// The [`TimerSource`] is meant to be polled by the task the timer is bound to. Dropping it detaches the timer: no
/// further expirations can be observed and [`Timer::reset`] fails with [`crate::error::ErrorKind::Closed`].
pub fn timer(mode: TimerMode) -> (Timer, TimerSource) {
    let (tx, rx) = watch::channel(mode);
    (
        Timer { tx },
        TimerSource {
            rx,
            deadline: None,
            expired: false,
        },
    )
}

/// Control side of a timer.
#[derive(Debug)]
pub struct Timer {
    tx: watch::Sender<TimerMode>,
}

impl Timer {
    /// Reprogram the timer. The new mode starts counting from now.
    pub fn reset(&self, mode: TimerMode) -> Result<()> {
        self.tx.send(mode).map_err(|_| Error::closed("timer"))
    }

    /// Current mode.
    pub fn mode(&self) -> TimerMode {
        *self.tx.borrow()
    }

    /// Whether the source has been dropped.
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Expiration side of a timer.
#[derive(Debug)]
pub struct TimerSource {
    rx: watch::Receiver<TimerMode>,
    deadline: Option<Instant>,
    /// A one-shot timer already fired for the current mode.
    expired: bool,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl TimerSource {
    /// Wait for the next expiration.
    ///
    /// Returns `None` once the [`Timer`] is dropped.
    pub async fn fired(&mut self) -> Option<TimerEvent> {
        loop {
            match self.rx.has_changed() {
                Ok(true) => {
                    self.deadline = None;
                    self.expired = false;
                }
                Ok(false) => {}
                Err(_) => return None,
            }
            let mode = *self.rx.borrow_and_update();
            let deadline = match mode {
                TimerMode::Inactive => None,
                TimerMode::Ticker(period) if period.is_zero() => None,
                TimerMode::Ticker(period) => Some(*self.deadline.get_or_insert_with(|| Instant::now() + period)),
                TimerMode::Once(_) if self.expired => None,
                TimerMode::Once(delay) => Some(*self.deadline.get_or_insert_with(|| Instant::now() + delay)),
            };

            tokio::select! {
                biased;
                res = self.rx.changed() => {
                    if res.is_err() {
                        return None;
                    }
                    self.deadline = None;
                    self.expired = false;
                }
                _ = sleep_until(deadline) => {
                    return match mode {
                        TimerMode::Ticker(period) => {
                            self.deadline = Some(Instant::now() + period);
                            Some(TimerEvent::Tick)
                        }
                        TimerMode::Once(_) => {
                            self.deadline = None;
                            self.expired = true;
                            Some(TimerEvent::Once)
                        }
                        TimerMode::Inactive => unreachable!("an inactive timer has no deadline"),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_ticker() {
        let (timer, mut source) = timer(TimerMode::Ticker(Duration::from_secs(10)));
        let start = Instant::now();
        assert_eq!(source.fired().await, Some(TimerEvent::Tick));
        assert_eq!(source.fired().await, Some(TimerEvent::Tick));
        assert!(start.elapsed() >= Duration::from_secs(20));
        drop(timer);
        assert_eq!(source.fired().await, None);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_once_fires_once_until_reset() {
        let (timer, mut source) = timer(TimerMode::Once(Duration::from_secs(5)));
        assert_eq!(source.fired().await, Some(TimerEvent::Once));
        let res = tokio::time::timeout(Duration::from_secs(60), source.fired()).await;
        assert!(res.is_err());

        timer.reset(TimerMode::Once(Duration::from_secs(5))).unwrap();
        assert_eq!(source.fired().await, Some(TimerEvent::Once));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_reset_to_inactive() {
        let (timer, mut source) = timer(TimerMode::Ticker(Duration::from_secs(1)));
        timer.reset(TimerMode::Inactive).unwrap();
        let res = tokio::time::timeout(Duration::from_secs(60), source.fired()).await;
        assert!(res.is_err());
        assert_eq!(timer.mode(), TimerMode::Inactive);
    }

    #[test]
    fn test_reset_after_detach() {
        let (timer, source) = timer(TimerMode::Inactive);
        drop(source);
        assert!(timer.is_detached());
        let err = timer.reset(TimerMode::Ticker(Duration::from_secs(1))).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Closed);
    }
}
