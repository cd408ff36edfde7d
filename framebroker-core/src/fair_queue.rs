//! Per-key fair queue.
//!
//! Items are queued FIFO per key; keys are served round-robin in the order
//! they first became non-empty. A key with a long backlog gets one item per
//! rotation, so it cannot starve keys that queued later.
//!
//! ```text
//! push(A,1) push(A,2) push(B,3)   ring: [A, B]
//! pop -> (A,1)                    ring: [B, A]
//! pop -> (B,3)                    ring: [A]
//! pop -> (A,2)                    ring: []
//! ```

use hashbrown::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;

#[derive(Debug)]
pub struct FairQueue<K, T> {
    queues: HashMap<K, VecDeque<T>>,
    // Rotation of keys that currently have queued items.
    ring: VecDeque<K>,
    len: usize,
}

impl<K, T> Default for FairQueue<K, T>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> FairQueue<K, T>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
            ring: VecDeque::new(),
            len: 0,
        }
    }

    /// Queue `item` behind everything already queued for `key`.
    pub fn push(&mut self, key: K, item: T) {
        self.len += 1;
        if let Some(queue) = self.queues.get_mut(&key) {
            queue.push_back(item);
            return;
        }
        self.ring.push_back(key.clone());
        self.queues.insert(key, VecDeque::from([item]));
    }

    /// Put `item` back at the head of `key`'s queue and make `key` next in
    /// the rotation. Used when a dequeued item could not be delivered.
    pub fn push_front(&mut self, key: K, item: T) {
        self.len += 1;
        if let Some(queue) = self.queues.get_mut(&key) {
            queue.push_front(item);
            if let Some(pos) = self.ring.iter().position(|k| k == &key) {
                self.ring.remove(pos);
            }
        } else {
            self.queues.insert(key.clone(), VecDeque::from([item]));
        }
        self.ring.push_front(key);
    }

    /// Take the next item in fair order.
    pub fn pop(&mut self) -> Option<(K, T)> {
        let key = self.ring.pop_front()?;
        let queue = self.queues.get_mut(&key)?;
        let item = queue.pop_front()?;
        self.len -= 1;

        if queue.is_empty() {
            self.queues.remove(&key);
        } else {
            self.ring.push_back(key.clone());
        }
        Some((key, item))
    }

    /// Drop everything queued for `key`, returning it in FIFO order.
    pub fn remove_key(&mut self, key: &K) -> Vec<T> {
        let Some(queue) = self.queues.remove(key) else {
            return Vec::new();
        };
        if let Some(pos) = self.ring.iter().position(|k| k == key) {
            self.ring.remove(pos);
        }
        self.len -= queue.len();
        queue.into_iter().collect()
    }

    /// Number of items queued for `key`.
    pub fn queued_for(&self, key: &K) -> usize {
        self.queues.get(key).map_or(0, VecDeque::len)
    }

    /// Number of keys with queued items.
    pub fn active_keys(&self) -> usize {
        self.ring.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
