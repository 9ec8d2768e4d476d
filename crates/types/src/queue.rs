//! Fixed-capacity FIFO used to record arrival order.
//!
//! Every ordering structure (mutex waiters, condition waiters) keeps one of
//! these. Capacity is fixed at construction and equals the number of thread
//! slots, so a well-behaved program can never overflow it: each thread waits
//! on at most one structure at a time.

use thiserror::Error;

/// Error returned when pushing into a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("wait queue is full (capacity {capacity})")]
pub struct QueueFull {
    /// Capacity of the queue that rejected the push.
    pub capacity: usize,
}

/// Ring buffer with a fixed capacity.
#[derive(Debug, Clone)]
pub struct WaitQueue<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

impl<T: Copy> WaitQueue<T> {
    /// Create an empty queue holding at most `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Append an item at the tail.
    pub fn push(&mut self, item: T) -> Result<(), QueueFull> {
        let capacity = self.capacity();
        if self.len == capacity {
            return Err(QueueFull { capacity });
        }
        let tail = (self.head + self.len) % capacity;
        self.slots[tail] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Remove and return the item at the head.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        item
    }

    /// Peek at the head without removing it.
    pub fn head(&self) -> Option<T> {
        if self.len == 0 {
            None
        } else {
            self.slots[self.head]
        }
    }

    /// Remove the first occurrence of `item`, keeping the order of the rest.
    ///
    /// Returns false if the item was not queued.
    pub fn remove(&mut self, item: T) -> bool
    where
        T: PartialEq,
    {
        let Some(pos) = self.iter().position(|queued| queued == item) else {
            return false;
        };
        let capacity = self.capacity();
        for i in pos..self.len - 1 {
            let from = (self.head + i + 1) % capacity;
            let to = (self.head + i) % capacity;
            self.slots[to] = self.slots[from];
        }
        let tail = (self.head + self.len - 1) % capacity;
        self.slots[tail] = None;
        self.len -= 1;
        true
    }

    /// Drop every queued item.
    pub fn clear(&mut self) {
        while self.pop().is_some() {}
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of items.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % self.capacity()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut q = WaitQueue::with_capacity(4);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();

        assert_eq!(q.head(), Some(1));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.head(), Some(3));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_full_queue_rejects_push() {
        let mut q = WaitQueue::with_capacity(2);
        q.push('a').unwrap();
        q.push('b').unwrap();
        assert_eq!(q.push('c'), Err(QueueFull { capacity: 2 }));

        // Space frees up after a pop.
        assert_eq!(q.pop(), Some('a'));
        q.push('c').unwrap();
        assert_eq!(q.iter().collect::<Vec<_>>(), vec!['b', 'c']);
    }

    #[test]
    fn test_wraparound() {
        let mut q = WaitQueue::with_capacity(3);
        for round in 0..10 {
            q.push(round).unwrap();
            q.push(round + 100).unwrap();
            assert_eq!(q.pop(), Some(round));
            assert_eq!(q.pop(), Some(round + 100));
            assert!(q.is_empty());
        }
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut q = WaitQueue::with_capacity(4);
        // Force wraparound before removing.
        q.push(0).unwrap();
        q.push(0).unwrap();
        q.pop();
        q.pop();
        for i in 1..=4 {
            q.push(i).unwrap();
        }

        assert!(q.remove(2));
        assert_eq!(q.iter().collect::<Vec<_>>(), vec![1, 3, 4]);
        assert!(!q.remove(2));

        assert!(q.remove(4));
        assert!(q.remove(1));
        assert_eq!(q.head(), Some(3));
        q.push(5).unwrap();
        assert_eq!(q.iter().collect::<Vec<_>>(), vec![3, 5]);
    }

    #[test]
    fn test_empty_queue() {
        let mut q: WaitQueue<usize> = WaitQueue::with_capacity(1);
        assert!(q.is_empty());
        assert_eq!(q.head(), None);
        assert_eq!(q.pop(), None);
        q.push(9).unwrap();
        q.clear();
        assert!(q.is_empty());
    }
}
