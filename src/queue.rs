//! FIFO of commands with O(1) splice.
//!
//! Used as a connection's "sent, awaiting reply" queue and as the staging
//! list of a batch before it is handed to the connection. Backed by a
//! doubly-linked list so that moving a whole batch onto either end of
//! another queue costs the same regardless of its length.

use std::collections::linked_list::{IntoIter, Iter};
use std::collections::LinkedList;

#[derive(Debug)]
pub struct CommandQueue<T> {
    items: LinkedList<T>,
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CommandQueue<T> {
    pub fn new() -> Self {
        Self {
            items: LinkedList::new(),
        }
    }

    pub fn push_back(&mut self, item: T) {
        self.items.push_back(item);
    }

    pub fn push_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    /// Oldest entry, or `None` when empty.
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn peek_mut(&mut self) -> Option<&mut T> {
        self.items.front_mut()
    }

    /// Move every entry of `other` onto the end of `self`, leaving `other`
    /// empty.
    pub fn splice_all(&mut self, other: &mut CommandQueue<T>) {
        self.items.append(&mut other.items);
    }

    /// Move every entry of `other` in front of `self`, leaving `other` empty.
    pub fn splice_all_front(&mut self, other: &mut CommandQueue<T>) {
        other.items.append(&mut self.items);
        std::mem::swap(&mut self.items, &mut other.items);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, T> {
        self.items.iter()
    }

    /// Remove and yield every entry, oldest first.
    pub fn drain(&mut self) -> IntoIter<T> {
        std::mem::take(&mut self.items).into_iter()
    }
}

impl<T> FromIterator<T> for CommandQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<T> Extend<T> for CommandQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl<T> IntoIterator for CommandQueue<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
