use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A lock-free single-producer single-consumer ring.
///
/// Capacity is rounded up to a power of two; one slot is kept empty to
/// distinguish full from empty, so a ring of capacity `N` holds `N - 1`
/// items. Exactly one thread may push and exactly one may pop.
pub struct SpscRing<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Next slot to write, owned by the producer
    head: AtomicUsize,
    /// Next slot to read, owned by the consumer
    tail: AtomicUsize,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Self {
            slots,
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Number of items the ring can hold at once.
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Push a value; on a full ring the value is handed back and nothing
    /// changes.
    pub fn push(&self, value: T) -> Result<(), T> {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) & self.mask;
        if next == self.tail.load(Ordering::Acquire) {
            return Err(value);
        }

        // SAFETY: only the producer writes slots between tail and head, and
        // this slot is unoccupied because the ring is not full.
        unsafe { (*self.slots[head].get()).write(value) };

        self.head.store(next, Ordering::Release);
        Ok(())
    }

    /// Pop the oldest value, or `None` when the ring is empty.
    pub fn pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: the slot was fully written before the producer published
        // it with its release store on `head`.
        let value = unsafe { (*self.slots[tail].get()).assume_init_read() };

        self.tail.store((tail + 1) & self.mask, Ordering::Release);
        Some(value)
    }

    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Acquire)
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fill_and_drain_in_order() {
        let ring = SpscRing::new(8);
        for i in 0..ring.capacity() {
            ring.push(i).unwrap();
        }
        assert_eq!(ring.push(99), Err(99));
        for i in 0..ring.capacity() {
            assert_eq!(ring.pop(), Some(i));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn push_on_full_has_no_side_effect() {
        let ring = SpscRing::new(2);
        ring.push(1).unwrap();
        assert_eq!(ring.push(2), Err(2));
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn cross_thread_order_is_preserved() {
        let ring = Arc::new(SpscRing::new(16));
        const COUNT: u32 = 10_000;

        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                for i in 0..COUNT {
                    let mut value = i;
                    loop {
                        match ring.push(value) {
                            Ok(()) => break,
                            Err(v) => value = v,
                        }
                        thread::yield_now();
                    }
                }
            })
        };

        let mut expected = 0;
        while expected < COUNT {
            if let Some(value) = ring.pop() {
                assert_eq!(value, expected);
                expected += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn drop_releases_remaining_items() {
        let item = Arc::new(());
        {
            let ring = SpscRing::new(4);
            ring.push(item.clone()).unwrap();
            ring.push(item.clone()).unwrap();
            assert_eq!(Arc::strong_count(&item), 3);
        }
        assert_eq!(Arc::strong_count(&item), 1);
    }
}
