/*
 * Copyright (c) 2026.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Bounded blocking queues for the decode pipeline.
//!
//! One generic MPMC queue backs every channel in the pipeline: caller
//! to Init, Init to the universal workers, workers to Final, Final to
//! the caller, and the decoder-instance pool. Capacity gives natural
//! back-pressure; a shutdown flag wakes every blocked thread during
//! `close` and makes further operations fail fast.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Result of a queue operation after shutdown.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Closed;

/// A non-blocking operation found no room or no item.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TryError {
    Empty,
    Full,
    Closed
}

struct Inner<T> {
    items:  VecDeque<T>,
    closed: bool
}

pub struct Queue<T> {
    inner:     Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full:  Condvar,
    capacity:  usize
}

impl<T> Queue<T> {
    pub fn new(capacity: usize) -> Queue<T> {
        Queue {
            inner: Mutex::new(Inner {
                items:  VecDeque::with_capacity(capacity),
                closed: false
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity
        }
    }

    /// Blocking push; fails only after shutdown.
    pub fn send(&self, value: T) -> Result<(), Closed> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.closed {
                return Err(Closed);
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(value);
                self.not_empty.notify_one();
                return Ok(());
            }
            inner = self.not_full.wait(inner).unwrap();
        }
    }

    /// Non-blocking push.
    pub fn try_send(&self, value: T) -> Result<(), (T, TryError)> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err((value, TryError::Closed));
        }
        if inner.items.len() >= self.capacity {
            return Err((value, TryError::Full));
        }
        inner.items.push_back(value);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocking pop; drains remaining items after shutdown, then
    /// fails.
    pub fn recv(&self) -> Result<T, Closed> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Ok(item);
            }
            if inner.closed {
                return Err(Closed);
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Non-blocking pop.
    pub fn try_recv(&self) -> Result<T, TryError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(item) = inner.items.pop_front() {
            self.not_full.notify_one();
            return Ok(item);
        }
        if inner.closed {
            Err(TryError::Closed)
        } else {
            Err(TryError::Empty)
        }
    }

    /// Flip the shutdown flag and wake every waiter.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// A counted resource gate: Init blocks on it before taking a reorder
/// ring slot, Final releases drained slots back.
pub struct CountGate {
    count:    Mutex<(usize, bool)>,
    non_zero: Condvar
}

impl CountGate {
    pub fn new(initial: usize) -> CountGate {
        CountGate {
            count:    Mutex::new((initial, false)),
            non_zero: Condvar::new()
        }
    }

    /// Wait for a unit and take it; fails after shutdown.
    pub fn acquire(&self) -> Result<(), Closed> {
        let mut guard = self.count.lock().unwrap();
        loop {
            if guard.1 {
                return Err(Closed);
            }
            if guard.0 > 0 {
                guard.0 -= 1;
                return Ok(());
            }
            guard = self.non_zero.wait(guard).unwrap();
        }
    }

    pub fn release(&self) {
        let mut guard = self.count.lock().unwrap();
        guard.0 += 1;
        self.non_zero.notify_one();
    }

    pub fn close(&self) {
        let mut guard = self.count.lock().unwrap();
        guard.1 = true;
        self.non_zero.notify_all();
    }
}

/// Per-slice readiness variable for the cross-slice vertical overlap.
pub mod slice_sync {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Condvar, Mutex};
    use std::time::Duration;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub enum State {
        Init,
        Ok,
        Error
    }

    pub struct SliceSync {
        state: Mutex<State>,
        cond:  Condvar
    }

    impl SliceSync {
        pub fn new() -> SliceSync {
            SliceSync {
                state: Mutex::new(State::Init),
                cond:  Condvar::new()
            }
        }

        pub fn reset(&self) {
            *self.state.lock().unwrap() = State::Init;
        }

        pub fn set(&self, state: State) {
            let mut guard = self.state.lock().unwrap();
            *guard = state;
            self.cond.notify_all();
        }

        /// Current state without waiting.
        pub fn get(&self) -> State {
            *self.state.lock().unwrap()
        }

        /// Block until the state leaves `Init`. Both terminal states
        /// wake every waiter; the abort flag covers the shutdown
        /// window where the awaited slice was never dispatched.
        pub fn wait_done(&self, abort: &AtomicBool) -> State {
            let mut guard = self.state.lock().unwrap();
            while *guard == State::Init {
                if abort.load(Ordering::Acquire) {
                    return State::Error;
                }
                let (g, _) = self
                    .cond
                    .wait_timeout(guard, Duration::from_millis(20))
                    .unwrap();
                guard = g;
            }
            *guard
        }
    }

    impl Default for SliceSync {
        fn default() -> Self {
            SliceSync::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn bounded_send_recv() {
        let q = Queue::new(2);
        q.send(1).unwrap();
        q.send(2).unwrap();
        assert!(matches!(q.try_send(3), Err((3, TryError::Full))));
        assert_eq!(q.recv().unwrap(), 1);
        q.send(3).unwrap();
        assert_eq!(q.recv().unwrap(), 2);
        assert_eq!(q.recv().unwrap(), 3);
        assert_eq!(q.try_recv(), Err(TryError::Empty));
    }

    #[test]
    fn close_wakes_blocked_receiver() {
        let q: Arc<Queue<u32>> = Arc::new(Queue::new(1));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.recv());
        thread::sleep(std::time::Duration::from_millis(20));
        q.close();
        assert_eq!(handle.join().unwrap(), Err(Closed));
    }

    #[test]
    fn close_drains_pending_items() {
        let q: Queue<u32> = Queue::new(4);
        q.send(7).unwrap();
        q.close();
        assert_eq!(q.recv(), Ok(7));
        assert_eq!(q.recv(), Err(Closed));
    }

    #[test]
    fn slice_sync_transitions() {
        use slice_sync::{SliceSync, State};
        use std::sync::atomic::AtomicBool;

        let sync = Arc::new(SliceSync::new());
        let waiter = Arc::clone(&sync);
        let handle = thread::spawn(move || {
            let abort = AtomicBool::new(false);
            waiter.wait_done(&abort)
        });
        thread::sleep(std::time::Duration::from_millis(10));
        sync.set(State::Ok);
        assert_eq!(handle.join().unwrap(), State::Ok);
    }

    #[test]
    fn slice_sync_abort_unblocks() {
        use slice_sync::{SliceSync, State};
        use std::sync::atomic::{AtomicBool, Ordering};

        let sync = Arc::new(SliceSync::new());
        let abort = Arc::new(AtomicBool::new(false));
        let (waiter, flag) = (Arc::clone(&sync), Arc::clone(&abort));
        let handle = thread::spawn(move || waiter.wait_done(&flag));
        abort.store(true, Ordering::Release);
        assert_eq!(handle.join().unwrap(), State::Error);
    }
}
