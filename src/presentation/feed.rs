use std::collections::VecDeque;

/// Newest-first list that never holds more than `max_items` entries.
#[derive(Debug, Clone)]
pub struct BoundedFeed<T> {
    items: VecDeque<T>,
    max_items: usize,
}

impl<T> BoundedFeed<T> {
    /// Empty feed holding at most `max_items`, clamped to at least one.
    pub fn new(max_items: usize) -> Self {
        let max_items = max_items.max(1);
        Self {
            items: VecDeque::with_capacity(max_items),
            max_items,
        }
    }

    /// Insert at the front, then drop from the back until within the cap.
    ///
    /// Returns how many entries were evicted.
    pub fn push(&mut self, item: T) -> usize {
        self.items.push_front(item);
        let mut evicted = 0;
        while self.items.len() > self.max_items {
            self.items.pop_back();
            evicted += 1;
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Newest entry.
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}
