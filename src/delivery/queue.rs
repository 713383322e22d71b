//! Work queue between the Router and one delivery worker.
//!
//! A deque rather than a channel: the uplink worker re-sends a failed buffer
//! ahead of everything else (`push_front`), and the Router drains a queue
//! whose path has gone away back into the full queue.

use parking_lot::{Condvar, Mutex};
use std::{collections::VecDeque, time::Duration};

use crate::buffer::SampleBuffer;

pub struct DeliveryQueue {
    name: &'static str,
    items: Mutex<VecDeque<SampleBuffer>>,
    ready: Condvar,
}

impl DeliveryQueue {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn push_back(&self, buf: SampleBuffer) {
        self.items.lock().push_back(buf);
        self.ready.notify_one();
    }

    /// Priority re-send: goes ahead of everything queued.
    pub fn push_front(&self, buf: SampleBuffer) {
        self.items.lock().push_front(buf);
        self.ready.notify_one();
    }

    /// Blocks until a buffer is queued.
    pub fn pop(&self) -> SampleBuffer {
        let mut items = self.items.lock();
        loop {
            if let Some(buf) = items.pop_front() {
                return buf;
            }
            self.ready.wait(&mut items);
        }
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<SampleBuffer> {
        let mut items = self.items.lock();
        if items.is_empty() {
            self.ready.wait_for(&mut items, timeout);
        }
        items.pop_front()
    }

    pub fn try_pop(&self) -> Option<SampleBuffer> {
        self.items.lock().pop_front()
    }

    /// Removes everything queued, front first.
    pub fn drain(&self) -> Vec<SampleBuffer> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{layout::{BufferLayout, SensorSpec}, pool::BufferPool};
    use std::{sync::Arc, thread};

    fn pool() -> BufferPool {
        let layout = BufferLayout::new(2, 100, b'A', &[SensorSpec { id: 0, bytes_per_item: 1 }]).unwrap();
        BufferPool::allocate(Arc::new(layout), 3).unwrap()
    }

    #[test]
    fn front_insert_jumps_the_line() {
        let pool = pool();
        let q = DeliveryQueue::new("uplink", 3);
        let a = pool.acquire_empty();
        let b = pool.acquire_empty();
        let (ida, idb) = (a.id(), b.id());
        q.push_back(a);
        q.push_front(b);

        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().id(), idb);
        assert_eq!(q.try_pop().map(|b| b.id()), Some(ida));
        assert!(q.is_empty());
    }

    #[test]
    fn pop_waits_for_a_producer() {
        let pool = pool();
        let q = Arc::new(DeliveryQueue::new("storage", 3));
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.pop().id())
        };
        thread::sleep(Duration::from_millis(10));
        let buf = pool.acquire_empty();
        let id = buf.id();
        q.push_back(buf);
        assert_eq!(consumer.join().unwrap(), id);
        assert!(q.pop_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn drain_empties_in_order() {
        let pool = pool();
        let q = DeliveryQueue::new("uplink", 3);
        let ids: Vec<_> = (0..3)
            .map(|_| {
                let buf = pool.acquire_empty();
                let id = buf.id();
                q.push_back(buf);
                id
            })
            .collect();
        let drained: Vec<_> = q.drain().iter().map(|b| b.id()).collect();
        assert_eq!(drained, ids);
        assert_eq!(q.len(), 0);
    }
}
