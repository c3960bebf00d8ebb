// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unbounded FIFO between the reader thread and the consumer.
//!
//! Items travel over a crossbeam channel. A separate counter tracks items
//! that were pushed but not yet acknowledged with [`IngestQueue::task_done`],
//! so shutdown can wait until the consumer has really finished with
//! everything, not just dequeued it.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::{Duration, Instant};

/// Multi-consumer FIFO queue with acknowledgement tracking.
pub struct IngestQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    unfinished: Mutex<usize>,
    drained: Condvar,
}

impl<T> IngestQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx,
            unfinished: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    /// Append an item at the back of the queue.
    pub fn push(&self, item: T) {
        *self.unfinished.lock() += 1;
        if self.tx.send(item).is_err() {
            // Unreachable while `rx` lives in `self`; keep the count honest anyway.
            self.finish_one();
        }
    }

    /// Remove the item at the front, blocking while the queue is empty.
    pub fn pop(&self) -> T {
        match self.rx.recv() {
            Ok(item) => item,
            // The queue owns a sender, so the channel never disconnects.
            Err(_) => unreachable!("ingest queue channel disconnected"),
        }
    }

    /// Remove the item at the front, waiting at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Remove the item at the front if there is one.
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Acknowledge that a popped item has been fully processed.
    pub fn task_done(&self) {
        if !self.finish_one() {
            tracing::warn!("task_done() called more times than items were pushed");
        }
    }

    /// Whether no item is waiting to be popped.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Number of items waiting to be popped.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Number of items pushed but not yet acknowledged.
    pub fn pending(&self) -> usize {
        *self.unfinished.lock()
    }

    /// Block until every pushed item has been popped and acknowledged.
    pub fn wait_until_drained(&self) {
        let mut unfinished = self.unfinished.lock();
        while *unfinished > 0 {
            self.drained.wait(&mut unfinished);
        }
    }

    /// Like [`wait_until_drained`](Self::wait_until_drained) but gives up
    /// after `timeout`. Returns `true` if the queue drained.
    ///
    /// A timeout too large to express as a deadline waits without limit.
    pub fn wait_until_drained_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait_until_drained();
            return true;
        };
        let mut unfinished = self.unfinished.lock();
        while *unfinished > 0 {
            if self.drained.wait_until(&mut unfinished, deadline).timed_out() {
                return *unfinished == 0;
            }
        }
        true
    }

    fn finish_one(&self) -> bool {
        let mut unfinished = self.unfinished.lock();
        if *unfinished == 0 {
            return false;
        }
        *unfinished -= 1;
        if *unfinished == 0 {
            self.drained.notify_all();
        }
        true
    }
}

impl<T> Default for IngestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for IngestQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestQueue")
            .field("len", &self.len())
            .field("pending", &self.pending())
            .finish()
    }
}
