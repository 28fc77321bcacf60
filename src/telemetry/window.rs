use std::collections::VecDeque;

const PREALLOCATE_LIMIT: usize = 1024;

/// Newest-first buffer. Inserting past capacity evicts from the tail (oldest).
#[derive(Debug, Clone)]
pub struct RecencyFeed<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RecencyFeed<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(PREALLOCATE_LIMIT)),
            capacity,
        }
    }

    pub fn push_newest(&mut self, item: T) {
        self.items.push_front(item);
        self.items.truncate(self.capacity);
    }

    pub fn newest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Oldest-first buffer. Appending past capacity evicts from the head (oldest).
#[derive(Debug, Clone)]
pub struct HistoryWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistoryWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(PREALLOCATE_LIMIT)),
            capacity,
        }
    }

    pub fn append(&mut self, item: T) {
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
