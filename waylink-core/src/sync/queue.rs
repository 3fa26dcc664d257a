use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Why a value could not be pushed; ownership is returned to the caller.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PushError<T> {
    #[error("queue is closed")]
    Closed(T),
    #[error("queue is full")]
    Full(T),
}

/// Why a blocking pop returned without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PopError {
    #[error("queue is closed")]
    Closed,
    #[error("timed out waiting for a queue item")]
    Timeout,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded multi-producer queue with blocking consumers.
///
/// [`close`](MessageQueue::close) wakes every blocked consumer; remaining
/// items can still be drained afterwards.
pub struct MessageQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> MessageQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Non-blocking push.
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(PushError::Closed(value));
        }
        if inner.items.len() == self.capacity {
            return Err(PushError::Full(value));
        }
        inner.items.push_back(value);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Non-blocking pop. `None` when the queue is currently empty.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().unwrap().items.pop_front()
    }

    /// Block until an item is available or the queue is closed.
    pub fn pop_blocking(&self) -> Result<T, PopError> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(value) = inner.items.pop_front() {
                return Ok(value);
            }
            if inner.closed {
                return Err(PopError::Closed);
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Like [`pop_blocking`](Self::pop_blocking) with an upper bound on the
    /// wait.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, PopError> {
        let deadline = std::time::Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(value) = inner.items.pop_front() {
                return Ok(value);
            }
            if inner.closed {
                return Err(PopError::Closed);
            }
            let Some(remaining) = deadline.checked_duration_since(std::time::Instant::now())
            else {
                return Err(PopError::Timeout);
            };
            let (guard, result) = self.not_empty.wait_timeout(inner, remaining).unwrap();
            inner = guard;
            if result.timed_out() && inner.items.is_empty() {
                return if inner.closed {
                    Err(PopError::Closed)
                } else {
                    Err(PopError::Timeout)
                };
            }
        }
    }

    /// Close the queue, waking every blocked consumer.
    ///
    /// Further pushes fail with [`PushError::Closed`]; already queued items
    /// can still be popped.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_order() {
        let queue = MessageQueue::new(4);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn full_queue_returns_value() {
        let queue = MessageQueue::new(1);
        queue.push("a").unwrap();
        assert_eq!(queue.push("b"), Err(PushError::Full("b")));
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(MessageQueue::<u32>::new(4));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop_blocking())
        };
        // Give the consumer time to block
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap(), Err(PopError::Closed));
        assert_eq!(queue.push(1), Err(PushError::Closed(1)));
    }

    #[test]
    fn close_drains_remaining_items() {
        let queue = MessageQueue::new(4);
        queue.push(1).unwrap();
        queue.close();
        assert_eq!(queue.pop_blocking(), Ok(1));
        assert_eq!(queue.pop_blocking(), Err(PopError::Closed));
    }

    #[test]
    fn pop_timeout_expires() {
        let queue = MessageQueue::<u32>::new(4);
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(10)),
            Err(PopError::Timeout)
        );
    }

    #[test]
    fn blocking_pop_sees_producer() {
        let queue = Arc::new(MessageQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop_blocking())
        };
        thread::sleep(Duration::from_millis(10));
        queue.push(42u32).unwrap();
        assert_eq!(consumer.join().unwrap(), Ok(42));
    }
}
