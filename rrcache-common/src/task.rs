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

use std::{collections::VecDeque, fmt::Debug, future::Future, sync::Arc};

use tokio::sync::{mpsc, watch};

use crate::{
    error::{Error, Result},
    runtime::{SpawnHandle, Spawner},
};

#[derive(Debug)]
struct TaskManagerInner {
    spawner: Spawner,
    shutdown: watch::Sender<bool>,
}

/// Creates serialized execution contexts and owns the runtime they are driven on.
///
/// Shutting the manager down delivers the shutdown notification to every task it created, including tasks created
/// after the shutdown.
#[derive(Debug, Clone)]
pub struct TaskManager {
    inner: Arc<TaskManagerInner>,
}

impl TaskManager {
    /// Create a task manager that drives its tasks with the given spawner.
    pub fn new(spawner: impl Into<Spawner>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(TaskManagerInner {
                spawner: spawner.into(),
                shutdown,
            }),
        }
    }

    /// Create a task manager on the current tokio runtime.
    pub fn current() -> Self {
        Self::new(Spawner::current())
    }

    /// The spawner tasks are driven on.
    pub fn spawner(&self) -> &Spawner {
        &self.inner.spawner
    }

    /// Spawn the future that drives a task.
    pub fn spawn<F>(&self, future: F) -> SpawnHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.spawner.spawn(future)
    }

    /// Create a task.
    ///
    /// The returned [`Task`] is the clonable handle used to post events and request shutdown. The [`TaskContext`]
    /// is the single consumer of those events and must be driven by exactly one future.
    pub fn create_task<E>(&self, name: impl Into<String>) -> (Task<E>, TaskContext<E>)
    where
        E: Send + 'static,
    {
        let name: Arc<str> = name.into().into();
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = Task {
            name: name.clone(),
            tx,
            shutdown: Arc::new(shutdown),
        };
        let context = TaskContext {
            name,
            rx,
            pending: VecDeque::new(),
            shutdown_rx,
            manager_rx: self.inner.shutdown.subscribe(),
            _manager: self.inner.clone(),
            orphaned: false,
            shutdown_delivered: false,
        };
        (task, context)
    }

    /// Deliver the shutdown notification to all tasks.
    pub fn shutdown(&self) {
        tracing::debug!("[task] manager shutdown");
        self.inner.shutdown.send_replace(true);
    }

    /// Whether [`TaskManager::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown.borrow()
    }
}

/// Handle of a serialized execution context.
pub struct Task<E> {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<E>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<E> Debug for Task<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

impl<E> Clone for Task<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<E> Task<E> {
    /// Name of the task.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Post an event to the task.
    pub fn send(&self, event: E) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| Error::closed("task").with_context("task", &self.name))
    }

    /// Request the task to shut down. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether the consumer side of the task is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What a task receives.
#[derive(Debug, PartialEq, Eq)]
pub enum TaskEvent<E> {
    /// A posted event.
    Event(E),
    /// The shutdown notification. Delivered once, before any event still queued.
    Shutdown,
}

/// The consumer side of a task.
pub struct TaskContext<E> {
    name: Arc<str>,
    rx: mpsc::UnboundedReceiver<E>,
    pending: VecDeque<E>,
    shutdown_rx: watch::Receiver<bool>,
    manager_rx: watch::Receiver<bool>,
    _manager: Arc<TaskManagerInner>,
    /// All task handles are gone, nothing can reach the task anymore.
    orphaned: bool,
    shutdown_delivered: bool,
}

impl<E> Debug for TaskContext<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("name", &self.name)
            .field("pending", &self.pending.len())
            .field("shutdown_delivered", &self.shutdown_delivered)
            .finish()
    }
}

impl<E> TaskContext<E> {
    /// Name of the task.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn shutdown_requested(&self) -> bool {
        self.orphaned || *self.shutdown_rx.borrow() || *self.manager_rx.borrow()
    }

    /// Wait for the next thing the task must handle.
    ///
    /// Returns `None` once the shutdown notification has been delivered.
    pub async fn next(&mut self) -> Option<TaskEvent<E>> {
        loop {
            if self.shutdown_delivered {
                return None;
            }
            if self.shutdown_requested() {
                self.shutdown_delivered = true;
                return Some(TaskEvent::Shutdown);
            }
            if let Some(event) = self.pending.pop_front() {
                return Some(TaskEvent::Event(event));
            }
            tokio::select! {
                biased;
                res = self.shutdown_rx.changed() => {
                    if res.is_err() {
                        self.orphaned = true;
                    }
                }
                _ = self.manager_rx.changed() => {}
                event = self.rx.recv() => match event {
                    Some(event) => return Some(TaskEvent::Event(event)),
                    None => self.orphaned = true,
                },
            }
        }
    }

    /// Drop every queued event that matches `pred`, returns how many were dropped.
    pub fn purge<P>(&mut self, mut pred: P) -> usize
    where
        P: FnMut(&E) -> bool,
    {
        while let Ok(event) = self.rx.try_recv() {
            self.pending.push_back(event);
        }
        let before = self.pending.len();
        self.pending.retain(|event| !pred(event));
        before - self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Ev {
        Clean(u32),
        Other,
    }

    #[test_log::test(tokio::test)]
    async fn test_events_in_order() {
        let manager = TaskManager::current();
        let (task, mut ctx) = manager.create_task::<Ev>("test");
        task.send(Ev::Clean(1)).unwrap();
        task.send(Ev::Other).unwrap();
        assert_eq!(ctx.next().await, Some(TaskEvent::Event(Ev::Clean(1))));
        assert_eq!(ctx.next().await, Some(TaskEvent::Event(Ev::Other)));
    }

    #[test_log::test(tokio::test)]
    async fn test_shutdown_has_priority_and_is_delivered_once() {
        let manager = TaskManager::current();
        let (task, mut ctx) = manager.create_task::<Ev>("test");
        task.send(Ev::Other).unwrap();
        task.shutdown();
        task.shutdown();
        assert_eq!(ctx.next().await, Some(TaskEvent::Shutdown));
        assert_eq!(ctx.next().await, None);
    }

    #[test_log::test(tokio::test)]
    async fn test_manager_shutdown_reaches_tasks() {
        let manager = TaskManager::current();
        let (_t1, mut c1) = manager.create_task::<Ev>("t1");
        manager.shutdown();
        let (_t2, mut c2) = manager.create_task::<Ev>("t2");
        assert!(manager.is_shutdown());
        assert_eq!(c1.next().await, Some(TaskEvent::Shutdown));
        assert_eq!(c2.next().await, Some(TaskEvent::Shutdown));
    }

    #[test_log::test(tokio::test)]
    async fn test_shutdown_wakes_waiting_context() {
        let manager = TaskManager::current();
        let (task, mut ctx) = manager.create_task::<Ev>("test");
        let handle = manager.spawn(async move { ctx.next().await });
        tokio::task::yield_now().await;
        task.shutdown();
        assert_eq!(handle.await.unwrap(), Some(TaskEvent::Shutdown));
    }

    #[test_log::test(tokio::test)]
    async fn test_dropping_all_handles_shuts_down() {
        let manager = TaskManager::current();
        let (task, mut ctx) = manager.create_task::<Ev>("test");
        drop(task);
        assert_eq!(ctx.next().await, Some(TaskEvent::Shutdown));
        assert!(ctx.next().await.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_purge() {
        let manager = TaskManager::current();
        let (task, mut ctx) = manager.create_task::<Ev>("test");
        for i in 0..4 {
            task.send(Ev::Clean(i)).unwrap();
        }
        task.send(Ev::Other).unwrap();
        assert_eq!(ctx.purge(|e| matches!(e, Ev::Clean(_))), 4);
        assert_eq!(ctx.next().await, Some(TaskEvent::Event(Ev::Other)));
    }

    #[test_log::test(tokio::test)]
    async fn test_send_after_context_dropped() {
        let manager = TaskManager::current();
        let (task, ctx) = manager.create_task::<Ev>("test");
        drop(ctx);
        assert!(task.is_closed());
        let err = task.send(Ev::Other).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Closed);
    }
}
