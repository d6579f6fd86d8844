// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Single-threaded event loop
//!
//! Every completion callback (backing store, auth client, timers) is posted
//! here and executed one at a time, in FIFO order, on the thread that drives
//! the loop. A task is never run from inside [`LoopHandle::post`], so a step
//! that issues a call always returns before that call's callback fires.

use tokio::sync::mpsc;

/// Completion continuation handed to an async call.
pub type Callback = Box<dyn FnOnce() + 'static>;

/// Cheap clonable handle used to post tasks onto the loop.
#[derive(Clone)]
pub struct LoopHandle {
    tx: mpsc::UnboundedSender<Callback>,
}

impl LoopHandle {
    /// Queue a task for execution on the loop thread.
    pub fn post(&self, task: impl FnOnce() + 'static) {
        if self.tx.send(Box::new(task)).is_err() {
            tracing::warn!("event loop is gone, dropping posted task");
        }
    }
}

pub struct EventLoop {
    tx: mpsc::UnboundedSender<Callback>,
    rx: mpsc::UnboundedReceiver<Callback>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run queued tasks, including the ones they post, until the queue is
    /// empty. Returns the number of tasks executed.
    pub fn run_until_idle(&mut self) -> usize {
        let mut executed = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            executed += 1;
        }
        executed
    }

    /// Run exactly one queued task, if any.
    pub fn run_one(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(task) => {
                task();
                true
            }
            Err(_) => false,
        }
    }

    /// Drive the loop until every [`LoopHandle`] has been dropped.
    pub async fn run(self) {
        let EventLoop { tx, mut rx } = self;
        drop(tx);

        tracing::info!("event loop started");
        while let Some(task) = rx.recv().await {
            task();
        }
        tracing::info!("event loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_tasks_run_in_post_order() {
        let mut event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let seen = seen.clone();
            handle.post(move || seen.borrow_mut().push(i));
        }
        assert!(seen.borrow().is_empty());

        assert_eq!(event_loop.run_until_idle(), 3);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_tasks_posted_by_tasks_are_drained() {
        let mut event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let inner_handle = handle.clone();
        let inner_seen = seen.clone();
        handle.post(move || {
            inner_seen.borrow_mut().push("outer");
            let seen = inner_seen.clone();
            inner_handle.post(move || seen.borrow_mut().push("inner"));
        });

        assert!(event_loop.run_one());
        assert_eq!(*seen.borrow(), vec!["outer"]);
        assert_eq!(event_loop.run_until_idle(), 1);
        assert_eq!(*seen.borrow(), vec!["outer", "inner"]);
        assert!(!event_loop.run_one());
    }

    #[tokio::test]
    async fn test_run_exits_when_handles_are_dropped() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let seen = Rc::new(RefCell::new(0));

        let counter = seen.clone();
        handle.post(move || *counter.borrow_mut() += 1);
        drop(handle);

        event_loop.run().await;
        assert_eq!(*seen.borrow(), 1);
    }
}
