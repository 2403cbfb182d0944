//! Recency Index Module
//!
//! Implements Least Recently Used ordering for cache eviction.
//!
//! Nodes live in a slab (`Vec` of slots plus a free list) and link to each
//! other by slot index, so every operation is O(1) without shared mutable
//! references between nodes.

use std::collections::HashMap;

// == Node ==
/// A key's position in the recency list.
#[derive(Debug)]
struct Node {
    key: String,
    prev: Option<usize>,
    next: Option<usize>,
}

// == Recency Index ==
/// Tracks access order for LRU eviction.
///
/// - Front = Most recently used
/// - Back = Least recently used
#[derive(Debug, Default)]
pub struct RecencyIndex {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl RecencyIndex {
    // == Constructor ==
    /// Creates a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used.
    ///
    /// Keys not yet tracked are inserted at the front.
    pub fn touch(&mut self, key: &str) {
        match self.index.get(key).copied() {
            Some(idx) => {
                if self.head == Some(idx) {
                    return;
                }
                self.unlink(idx);
                self.link_front(idx);
            }
            None => self.insert_front(key),
        }
    }

    // == Insert Front ==
    /// Tracks a brand-new key as most recently used.
    ///
    /// The caller enforces size limits; an already tracked key is just touched.
    pub fn insert_front(&mut self, key: &str) {
        if self.index.contains_key(key) {
            self.touch(key);
            return;
        }

        let node = Node {
            key: key.to_string(),
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        self.index.insert(key.to_string(), idx);
        self.link_front(idx);
    }

    // == Evict Back ==
    /// Removes and returns the least recently used key.
    ///
    /// Returns None if the index is empty. The caller drops the matching entry.
    pub fn evict_back(&mut self) -> Option<String> {
        let idx = self.tail?;
        Some(self.release(idx))
    }

    // == Remove ==
    /// Stops tracking a key, wherever it sits. No-op if absent.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.index.get(key).copied() {
            Some(idx) => {
                self.release(idx);
                true
            }
            None => false,
        }
    }

    // == Peek Back ==
    /// Returns the least recently used key without removing it.
    pub fn peek_back(&self) -> Option<&str> {
        self.tail.map(|idx| self.node(idx).key.as_str())
    }

    /// Returns tracked keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.node(idx);
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Drops every tracked key.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    // == Internal helpers ==

    fn release(&mut self, idx: usize) -> String {
        self.unlink(idx);
        let node = self.slots[idx].take().expect("released slot is occupied");
        self.index.remove(&node.key);
        self.free.push(idx);
        node.key
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };

        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }

        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
    }

    fn link_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn node(&self, idx: usize) -> &Node {
        self.slots[idx].as_ref().expect("dangling recency slot")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.slots[idx].as_mut().expect("dangling recency slot")
    }
}
